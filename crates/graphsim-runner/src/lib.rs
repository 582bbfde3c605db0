//! # graphsim-runner library
//!
//! Library interface for the GraphSim runner.
//!
//! The heart of this crate is the [`Executor`]: the deterministic tick loop
//! that advances simulated time, applies the injected fault at its trigger
//! tick, delivers due messages, fires periodic loops, ticks watchdogs, and
//! snapshots per-node feature vectors.
//!
//! Within a tick the ordering guarantees are:
//! 1. Injected-fault application precedes all other work.
//! 2. Receipts are processed before loop firings, in stable bus order.
//! 3. Loops fire in node declaration order; deliveries they make due in the
//!    same tick are processed right after.
//! 4. Watchdogs tick once per subscription.
//! 5. Feature vectors are snapshotted.

pub mod dataset;
pub mod viz;

use graphsim_core::{
    Classification, Delivery, MessageBus, NodeState, PublishFaultState, PublishOutcome,
    SimContext, FEATURE_WIDTH,
};
use graphsim_model::{
    Callback, FaultKind, Graph, ModelError, PublishSpec, ResolvedFault, Tick,
};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, info, warn};
use viz::TermViz;

/// Default RNG seed when none is supplied on the command line.
pub const DEFAULT_SEED: u64 = 24;

// ============================================================================
// Error Types
// ============================================================================

/// Errors that can occur while driving a simulation run.
#[derive(Debug, Error)]
pub enum RunnerError {
    /// Configuration error.
    #[error("model error: {0}")]
    Model(#[from] ModelError),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid runner configuration.
    #[error("configuration error: {0}")]
    Config(String),
}

// ============================================================================
// Simulation Statistics
// ============================================================================

/// Counters collected across a run, reported as JSON after completion.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SimulationStats {
    /// Number of ticks simulated (stop + 1).
    pub ticks: u64,
    /// Messages delivered to subscribers.
    pub deliveries: u64,
    /// Publications emitted (suppressed ones excluded).
    pub publications: u64,
    /// Publications suppressed by a publish-side fault.
    pub publications_suppressed: u64,
    /// Deliveries suppressed by a receive-side fault.
    pub deliveries_dropped: u64,
    /// Invalid-input classifications observed.
    pub invalid_input_events: u64,
    /// Lost-input watchdog events observed.
    pub lost_input_events: u64,
    /// Wall clock time for the run, in milliseconds.
    pub wall_time_ms: u64,
}

// ============================================================================
// Executor
// ============================================================================

/// One row of the feature trace: the feature vector of every node at a tick,
/// in declaration order.
pub type FeatureRow = Vec<[i64; FEATURE_WIDTH]>;

/// The deterministic tick loop.
pub struct Executor {
    graph: Arc<Graph>,
    stop: Tick,
    fault: Option<ResolvedFault>,
    ctx: SimContext,
    bus: MessageBus,
    nodes: Vec<NodeState>,
    stats: SimulationStats,
    feature_rows: Vec<FeatureRow>,
    record_features: bool,
    viz: Option<TermViz>,
}

impl Executor {
    /// Create an executor for a validated graph.
    ///
    /// `fault` must already be resolved against `graph`; `stop` is the
    /// terminal tick (inclusive).
    pub fn new(graph: Graph, fault: Option<ResolvedFault>, stop: Tick, seed: u64) -> Self {
        let nodes = graph.nodes().iter().map(NodeState::new).collect();
        Executor {
            graph: Arc::new(graph),
            stop,
            fault,
            ctx: SimContext::new(seed),
            bus: MessageBus::new(),
            nodes,
            stats: SimulationStats::default(),
            feature_rows: Vec::new(),
            record_features: true,
            viz: None,
        }
    }

    /// Enable terminal visualization and disable feature recording.
    pub fn set_viz(&mut self, viz: TermViz) {
        self.viz = Some(viz);
        self.record_features = false;
    }

    /// The graph being simulated.
    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    /// The recorded feature trace, one row per tick.
    pub fn feature_rows(&self) -> &[FeatureRow] {
        &self.feature_rows
    }

    /// Statistics collected so far.
    pub fn stats(&self) -> &SimulationStats {
        &self.stats
    }

    /// Run the tick loop from 0 through the stop tick inclusive.
    pub fn run(&mut self) -> SimulationStats {
        let start = Instant::now();
        if let Some(viz) = &mut self.viz {
            viz.print_header(&self.graph);
        }

        for tick in 0..=self.stop {
            self.ctx.set_tick(tick);
            self.apply_fault_if_due(tick);
            // In-flight receipts settle before this tick's loops fire.
            self.process_due_deliveries(tick);
            self.fire_due_loops(tick);
            // Zero-delay loop publications land within the same tick.
            self.process_due_deliveries(tick);
            self.tick_watchdogs(tick);
            self.snapshot(tick);
        }

        self.stats.ticks = self.stop + 1;
        self.stats.wall_time_ms = start.elapsed().as_millis() as u64;
        info!(
            ticks = self.stats.ticks,
            deliveries = self.stats.deliveries,
            publications = self.stats.publications,
            "simulation complete"
        );
        self.stats.clone()
    }

    /// Step 1: install the externally injected fault at its trigger tick,
    /// before any other work in the tick.
    fn apply_fault_if_due(&mut self, tick: Tick) {
        let Some(fault) = &self.fault else { return };
        if fault.inject_at != tick {
            return;
        }
        let node = fault.node;
        let name = &self.graph.nodes()[node].name;
        match fault.kind.clone() {
            FaultKind::PublishDrop { topic, times } => {
                info!(node = %name, %topic, times, tick, "injecting publish-drop fault");
                self.nodes[node]
                    .faults
                    .install_publish(&topic, PublishFaultState::Drop { remaining: times });
            }
            FaultKind::PublishOverride {
                topic,
                value,
                count,
            } => {
                info!(node = %name, %topic, value, count, tick, "injecting publish-override fault");
                self.nodes[node].faults.install_publish(
                    &topic,
                    PublishFaultState::Override {
                        value,
                        remaining: count,
                    },
                );
            }
            FaultKind::ReceiveDelay { topic, delay } => {
                info!(node = %name, %topic, delay, tick, "injecting receive-delay fault");
                self.nodes[node].faults.install_receive_delay(&topic, delay);
            }
            FaultKind::ReceiveDrop { topic, times } => {
                info!(node = %name, %topic, times, tick, "injecting receive-drop fault");
                self.nodes[node].faults.install_receive_drop(&topic, times);
            }
        }
    }

    /// Step 2: drain and process deliveries due at `tick` until none remain.
    /// Callbacks may publish with zero delay, which makes new deliveries due
    /// within the same tick.
    fn process_due_deliveries(&mut self, tick: Tick) {
        loop {
            let due = self.bus.drain_due(tick);
            if due.is_empty() {
                break;
            }
            for delivery in due {
                self.deliver(tick, delivery);
            }
        }
    }

    fn deliver(&mut self, tick: Tick, delivery: Delivery) {
        let graph = Arc::clone(&self.graph);
        let node_cfg = &graph.nodes()[delivery.subscriber];
        let sub_cfg = &node_cfg.subscriptions()[delivery.subscription];

        if self.nodes[delivery.subscriber]
            .faults
            .take_receive_drop(&sub_cfg.topic)
        {
            warn!(node = %node_cfg.name, topic = %sub_cfg.topic, tick, "dropped received message");
            self.stats.deliveries_dropped += 1;
            return;
        }

        let classification = self.nodes[delivery.subscriber].receive(
            tick,
            delivery.subscription,
            delivery.value,
            sub_cfg,
        );
        self.stats.deliveries += 1;

        let callback = match classification {
            Classification::Nominal => {
                debug!(
                    node = %node_cfg.name,
                    topic = %sub_cfg.topic,
                    value = delivery.value,
                    tick,
                    "nominal input"
                );
                sub_cfg.nominal_callback.as_ref()
            }
            Classification::InvalidInput => {
                self.stats.invalid_input_events += 1;
                warn!(
                    node = %node_cfg.name,
                    topic = %sub_cfg.topic,
                    value = delivery.value,
                    tick,
                    "invalid input"
                );
                sub_cfg.invalid_input_callback.as_ref()
            }
        };
        if let Some(callback) = callback {
            self.execute_callback(delivery.subscriber, callback);
        }
    }

    /// Step 3: fire due periodic loops in node declaration order.
    fn fire_due_loops(&mut self, tick: Tick) {
        let graph = Arc::clone(&self.graph);
        for (idx, node_cfg) in graph.nodes().iter().enumerate() {
            let Some(loop_cfg) = &node_cfg.r#loop else {
                continue;
            };
            if !self.nodes[idx].loop_due(tick) {
                continue;
            }
            self.nodes[idx].advance_loop(loop_cfg.period);
            debug!(node = %node_cfg.name, tick, "executing loop callback");
            self.execute_callback(idx, &loop_cfg.callback);
        }
    }

    /// Step 4: per-subscription watchdog step, firing lost-input callbacks on
    /// the first tick a gap strictly exceeds its watchdog.
    fn tick_watchdogs(&mut self, tick: Tick) {
        let graph = Arc::clone(&self.graph);
        for (idx, node_cfg) in graph.nodes().iter().enumerate() {
            for (sub_idx, sub_cfg) in node_cfg.subscriptions().iter().enumerate() {
                if self.nodes[idx].watchdog_step(tick, sub_idx, sub_cfg) {
                    self.stats.lost_input_events += 1;
                    warn!(node = %node_cfg.name, topic = %sub_cfg.topic, tick, "lost input");
                    if let Some(callback) = sub_cfg.lost_input_callback.as_ref() {
                        self.execute_callback(idx, callback);
                    }
                }
            }
        }
    }

    /// Step 5: snapshot every node's feature vector at `tick`.
    fn snapshot(&mut self, tick: Tick) {
        if self.record_features {
            let row: FeatureRow = self
                .nodes
                .iter()
                .enumerate()
                .map(|(idx, node)| node.feature_vector(tick, &self.graph.nodes()[idx]))
                .collect();
            self.feature_rows.push(row);
        }
        if let Some(viz) = &mut self.viz {
            let graph = Arc::clone(&self.graph);
            viz.render_tick(tick, &graph, &self.nodes);
        }
    }

    fn execute_callback(&mut self, node_idx: usize, callback: &Callback) {
        match callback {
            Callback::Publish(specs) => {
                for spec in specs {
                    self.publish(node_idx, spec);
                }
            }
            Callback::Fault(directive) => {
                let graph = Arc::clone(&self.graph);
                let name = &graph.nodes()[node_idx].name;
                let state = match &directive.affect_publish {
                    graphsim_model::PublishFaultSpec::Drop { drop, .. } => {
                        PublishFaultState::Drop { remaining: *drop }
                    }
                    graphsim_model::PublishFaultSpec::Override { value, count, .. } => {
                        PublishFaultState::Override {
                            value: *value,
                            remaining: *count,
                        }
                    }
                };
                let topic = directive.affect_publish.topic();
                info!(node = %name, %topic, "callback installed publish fault");
                self.nodes[node_idx].faults.install_publish(topic, state);
            }
        }
    }

    /// Sample and emit one publication. Sampling always happens, even when
    /// the publication ends up suppressed, so the RNG stream is identical
    /// with and without publish-side faults.
    fn publish(&mut self, publisher: usize, spec: &PublishSpec) {
        let graph = Arc::clone(&self.graph);
        let tick = self.ctx.tick();
        let (sampled, delay) = self.ctx.sample_publish(spec);

        let value = match self.nodes[publisher]
            .faults
            .apply_publish(&spec.topic, sampled)
        {
            PublishOutcome::Suppressed => {
                warn!(
                    node = %graph.nodes()[publisher].name,
                    topic = %spec.topic,
                    tick,
                    "dropped publish"
                );
                self.stats.publications_suppressed += 1;
                return;
            }
            PublishOutcome::Deliver(value) => value,
        };
        if value != sampled {
            warn!(
                node = %graph.nodes()[publisher].name,
                topic = %spec.topic,
                value,
                tick,
                "mutated publish"
            );
        }

        let is_primary = graph.primary_topic(publisher) == Some(spec.topic.as_str());
        self.nodes[publisher].record_publish(value, is_primary);
        self.stats.publications += 1;

        for sub in graph.topic_subscribers(&spec.topic) {
            let extra = self.nodes[sub.node].faults.receive_delay(&spec.topic);
            let delivery_tick = tick + delay + extra;
            debug!(
                topic = %spec.topic,
                to = %graph.nodes()[sub.node].name,
                value,
                eta = delivery_tick,
                "publish"
            );
            self.bus.schedule(Delivery {
                delivery_tick,
                subscriber: sub.node,
                subscription: sub.subscription,
                value,
            });
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
