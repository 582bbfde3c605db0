//! # graphsim-core
//!
//! Core simulation primitives for the GraphSim simulator.
//!
//! This crate provides:
//! - Simulation context ([`SimContext`]): the tick clock and the single
//!   seeded RNG used for all value and delay sampling
//! - The message bus ([`MessageBus`]): pending deliveries keyed by delivery
//!   tick, drained in stable insertion order
//! - The per-node fault overlay ([`NodeFaults`], [`PublishFaultState`])
//! - Per-node runtime state ([`NodeState`]): watchdogs, last-received values,
//!   the periodic loop schedule, and the feature counters
//! - Per-tick feature extraction ([`NodeState::feature_vector`])
//!
//! All state here is created at tick 0 from the graph config, evolves
//! deterministically, and is discarded at termination.

use graphsim_model::{NodeConfig, PublishSpec, SubscriptionConfig, Tick};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::collections::BTreeMap;

/// Width of the per-node feature vector.
pub const FEATURE_WIDTH: usize = 9;

// ============================================================================
// Simulation Context
// ============================================================================

/// The tick clock plus the single seeded RNG shared by all sampling.
///
/// Two runs with identical inputs and seed produce bit-identical outputs, so
/// the RNG is owned here and threaded explicitly through publish sampling
/// rather than living in process-wide state.
pub struct SimContext {
    tick: Tick,
    rng: ChaCha8Rng,
}

impl SimContext {
    /// Create a context at tick 0 with the given seed.
    pub fn new(seed: u64) -> Self {
        SimContext {
            tick: 0,
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }

    /// Current simulation tick.
    pub fn tick(&self) -> Tick {
        self.tick
    }

    /// Advance the clock (used by the executor).
    pub fn set_tick(&mut self, tick: Tick) {
        self.tick = tick;
    }

    /// Sample a publication value and delay from a publish spec.
    ///
    /// Value is always sampled before delay; publish-side faults are applied
    /// afterwards so the RNG stream is identical with and without faults.
    pub fn sample_publish(&mut self, spec: &PublishSpec) -> (i64, Tick) {
        let value = self
            .rng
            .gen_range(spec.value_range.0..=spec.value_range.1);
        let delay = self
            .rng
            .gen_range(spec.delay_range.0..=spec.delay_range.1);
        (value, delay)
    }
}

// ============================================================================
// Message Bus
// ============================================================================

/// A scheduled message delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Delivery {
    /// Tick at which the message becomes due.
    pub delivery_tick: Tick,
    /// Declaration index of the subscriber node.
    pub subscriber: usize,
    /// Index of the matching subscription within the subscriber.
    pub subscription: usize,
    /// The published value.
    pub value: i64,
}

/// Pending deliveries keyed by delivery tick.
///
/// BTreeMap keeps drain order deterministic across runs; within a tick the
/// per-tick Vec preserves insertion order, which is the ordering guarantee
/// subscribers rely on.
#[derive(Debug, Default)]
pub struct MessageBus {
    pending: BTreeMap<Tick, Vec<Delivery>>,
}

impl MessageBus {
    /// Create an empty bus.
    pub fn new() -> Self {
        MessageBus::default()
    }

    /// Enqueue a delivery.
    pub fn schedule(&mut self, delivery: Delivery) {
        self.pending
            .entry(delivery.delivery_tick)
            .or_default()
            .push(delivery);
    }

    /// Remove and return all deliveries due at or before `tick`, ordered by
    /// delivery tick and then by insertion order.
    pub fn drain_due(&mut self, tick: Tick) -> Vec<Delivery> {
        let mut due = Vec::new();
        while let Some((&first, _)) = self.pending.iter().next() {
            if first > tick {
                break;
            }
            let (_, batch) = self.pending.remove_entry(&first).unwrap();
            due.extend(batch);
        }
        due
    }

    /// Number of pending deliveries.
    pub fn len(&self) -> usize {
        self.pending.values().map(Vec::len).sum()
    }

    /// Whether no deliveries are pending.
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

// ============================================================================
// Fault Overlay
// ============================================================================

/// An active publish-side fault on one topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishFaultState {
    /// Suppress the next `remaining` publications.
    Drop {
        /// Publications left to suppress.
        remaining: u64,
    },
    /// Substitute `value` for the next `remaining` publications.
    Override {
        /// Replacement value.
        value: i64,
        /// Publications left to override.
        remaining: u64,
    },
}

/// Outcome of passing a sampled publication through the fault overlay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    /// Deliver this value (possibly overridden).
    Deliver(i64),
    /// The publication is suppressed entirely.
    Suppressed,
}

/// Mutable fault state attached to one node.
///
/// Publish-side faults decay as their counters reach zero; receive-side delay
/// overrides persist for the run unless overwritten.
#[derive(Debug, Default)]
pub struct NodeFaults {
    publish: BTreeMap<String, PublishFaultState>,
    receive_delay: BTreeMap<String, Tick>,
    receive_drop: BTreeMap<String, u64>,
}

impl NodeFaults {
    /// Install a publish-side fault, replacing any active one on the topic.
    /// Faults come from reactions to current conditions, so the newest wins.
    pub fn install_publish(&mut self, topic: &str, state: PublishFaultState) {
        self.publish.insert(topic.to_string(), state);
    }

    /// Install a permanent receive-side delay override on a topic.
    pub fn install_receive_delay(&mut self, topic: &str, delay: Tick) {
        self.receive_delay.insert(topic.to_string(), delay);
    }

    /// Install a receive-side drop counter on a topic.
    pub fn install_receive_drop(&mut self, topic: &str, times: u64) {
        self.receive_drop.insert(topic.to_string(), times);
    }

    /// Apply the active publish fault (if any) to a sampled value, decaying
    /// the fault counter. The fault state is removed once its counter hits 0.
    pub fn apply_publish(&mut self, topic: &str, value: i64) -> PublishOutcome {
        let Some(state) = self.publish.get_mut(topic) else {
            return PublishOutcome::Deliver(value);
        };
        let outcome = match state {
            PublishFaultState::Drop { remaining } => {
                *remaining -= 1;
                PublishOutcome::Suppressed
            }
            PublishFaultState::Override { value, remaining } => {
                *remaining -= 1;
                PublishOutcome::Deliver(*value)
            }
        };
        let expired = matches!(
            state,
            PublishFaultState::Drop { remaining: 0 }
                | PublishFaultState::Override { remaining: 0, .. }
        );
        if expired {
            self.publish.remove(topic);
        }
        outcome
    }

    /// Extra delivery delay for a topic on this node (0 if none installed).
    pub fn receive_delay(&self, topic: &str) -> Tick {
        self.receive_delay.get(topic).copied().unwrap_or(0)
    }

    /// Consume one receive-drop charge for a topic. Returns true when the
    /// delivery must be suppressed.
    pub fn take_receive_drop(&mut self, topic: &str) -> bool {
        let Some(remaining) = self.receive_drop.get_mut(topic) else {
            return false;
        };
        *remaining -= 1;
        if *remaining == 0 {
            self.receive_drop.remove(topic);
        }
        true
    }

    /// Whether any fault state is currently active on this node.
    pub fn is_active(&self) -> bool {
        !self.publish.is_empty() || !self.receive_delay.is_empty() || !self.receive_drop.is_empty()
    }
}

// ============================================================================
// Node Runtime State
// ============================================================================

/// How a received value was classified against its subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// Value inside the valid range.
    Nominal,
    /// Value outside the valid range.
    InvalidInput,
}

/// Runtime state of one subscription.
#[derive(Debug, Default)]
struct SubscriptionState {
    /// Most recent value received, None until the first receipt.
    last_value: Option<i64>,
    /// Tick of the most recent receipt. The watchdog is armed once this is
    /// set; a subscription that never receives never fires lost-input.
    last_receive_tick: Option<Tick>,
    /// Whether lost-input already fired for the current gap.
    lost_fired: bool,
}

/// Runtime state of one node: loop schedule, subscription states, fault
/// overlay, and the observable feature counters.
#[derive(Debug)]
pub struct NodeState {
    /// Tick at which the periodic loop next fires (None for loop-less nodes).
    next_loop_tick: Option<Tick>,
    subs: Vec<SubscriptionState>,
    /// Fault overlay for this node.
    pub faults: NodeFaults,

    // Feature counters.
    last_received_value: i64,
    last_published_primary: i64,
    publish_count: u64,
    invalid_count: u64,
    lost_count: u64,
}

impl NodeState {
    /// Fresh state for a node config at tick 0.
    pub fn new(config: &NodeConfig) -> Self {
        NodeState {
            next_loop_tick: config.r#loop.as_ref().map(|_| 0),
            subs: config
                .subscriptions()
                .iter()
                .map(|_| SubscriptionState::default())
                .collect(),
            faults: NodeFaults::default(),
            last_received_value: 0,
            last_published_primary: 0,
            publish_count: 0,
            invalid_count: 0,
            lost_count: 0,
        }
    }

    /// Whether the loop is due at `tick`.
    pub fn loop_due(&self, tick: Tick) -> bool {
        self.next_loop_tick == Some(tick)
    }

    /// Advance the loop schedule after a firing.
    pub fn advance_loop(&mut self, period: Tick) {
        if let Some(next) = self.next_loop_tick.as_mut() {
            *next += period;
        }
    }

    /// Process a message receipt on subscription `sub_idx`: reset the
    /// watchdog gap, re-arm lost-input, record the value, and classify it.
    pub fn receive(
        &mut self,
        tick: Tick,
        sub_idx: usize,
        value: i64,
        config: &SubscriptionConfig,
    ) -> Classification {
        let sub = &mut self.subs[sub_idx];
        sub.last_value = Some(value);
        sub.last_receive_tick = Some(tick);
        sub.lost_fired = false;
        self.last_received_value = value;

        if config.is_nominal(value) {
            Classification::Nominal
        } else {
            self.invalid_count += 1;
            Classification::InvalidInput
        }
    }

    /// Per-tick watchdog step for subscription `sub_idx`. Returns true the
    /// first tick the gap since the last receipt strictly exceeds the
    /// watchdog bound; subsequent ticks return false until the next receipt
    /// resets the gap.
    pub fn watchdog_step(
        &mut self,
        tick: Tick,
        sub_idx: usize,
        config: &SubscriptionConfig,
    ) -> bool {
        let Some(watchdog) = config.watchdog else {
            return false;
        };
        let sub = &mut self.subs[sub_idx];
        let Some(last_receive) = sub.last_receive_tick else {
            return false;
        };
        if tick - last_receive > watchdog && !sub.lost_fired {
            sub.lost_fired = true;
            self.lost_count += 1;
            true
        } else {
            false
        }
    }

    /// Record an emitted publication. Suppressed publications are not
    /// recorded: nothing was emitted.
    pub fn record_publish(&mut self, value: i64, is_primary_topic: bool) {
        self.publish_count += 1;
        if is_primary_topic {
            self.last_published_primary = value;
        }
    }

    /// Most recent value received on subscription `sub_idx`.
    pub fn last_value(&self, sub_idx: usize) -> Option<i64> {
        self.subs[sub_idx].last_value
    }

    /// Ticks since the last receipt on subscription `sub_idx`, or None if
    /// nothing has been received yet.
    pub fn ticks_since_last_receive(&self, tick: Tick, sub_idx: usize) -> Option<Tick> {
        self.subs[sub_idx].last_receive_tick.map(|rx| tick - rx)
    }

    /// Number of lost-input events observed so far.
    pub fn lost_count(&self) -> u64 {
        self.lost_count
    }

    /// Number of invalid-input events observed so far.
    pub fn invalid_count(&self) -> u64 {
        self.invalid_count
    }

    /// Count of subscriptions whose gap currently exceeds their watchdog.
    fn subs_past_watchdog(&self, tick: Tick, config: &NodeConfig) -> i64 {
        config
            .subscriptions()
            .iter()
            .zip(&self.subs)
            .filter(|(cfg, sub)| match (cfg.watchdog, sub.last_receive_tick) {
                (Some(watchdog), Some(rx)) => tick - rx > watchdog,
                _ => false,
            })
            .count() as i64
    }

    /// Snapshot the 9-wide feature vector at `tick`.
    ///
    /// Column semantics are stable across a run; downstream datasets depend
    /// on them. Index 3 is the authoritative row timestamp.
    pub fn feature_vector(&self, tick: Tick, config: &NodeConfig) -> [i64; FEATURE_WIDTH] {
        let kind = if config.subscriptions().is_empty() { 0 } else { 1 };
        [
            kind,
            config.subscriptions().len() as i64,
            self.last_published_primary,
            tick as i64,
            self.last_received_value,
            self.subs_past_watchdog(tick, config),
            self.publish_count as i64,
            self.invalid_count as i64,
            self.lost_count as i64,
        ]
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use graphsim_model::load_graph_from_strs;

    fn delivery(tick: Tick, value: i64) -> Delivery {
        Delivery {
            delivery_tick: tick,
            subscriber: 0,
            subscription: 0,
            value,
        }
    }

    #[test]
    fn test_bus_drains_in_tick_then_insertion_order() {
        let mut bus = MessageBus::new();
        bus.schedule(delivery(5, 1));
        bus.schedule(delivery(3, 2));
        bus.schedule(delivery(5, 3));
        bus.schedule(delivery(3, 4));

        let due = bus.drain_due(5);
        let values: Vec<i64> = due.iter().map(|d| d.value).collect();
        assert_eq!(values, vec![2, 4, 1, 3]);
        assert!(bus.is_empty());
    }

    #[test]
    fn test_bus_leaves_future_deliveries() {
        let mut bus = MessageBus::new();
        bus.schedule(delivery(3, 1));
        bus.schedule(delivery(7, 2));

        assert_eq!(bus.drain_due(4).len(), 1);
        assert_eq!(bus.len(), 1);
        assert_eq!(bus.drain_due(7).len(), 1);
    }

    #[test]
    fn test_publish_drop_fault_decays() {
        let mut faults = NodeFaults::default();
        faults.install_publish("t", PublishFaultState::Drop { remaining: 2 });

        assert_eq!(faults.apply_publish("t", 5), PublishOutcome::Suppressed);
        assert_eq!(faults.apply_publish("t", 6), PublishOutcome::Suppressed);
        // Counter hit zero: fault removed, publishes flow again.
        assert_eq!(faults.apply_publish("t", 7), PublishOutcome::Deliver(7));
        assert!(!faults.is_active());
    }

    #[test]
    fn test_publish_override_fault_decays() {
        let mut faults = NodeFaults::default();
        faults.install_publish(
            "t",
            PublishFaultState::Override {
                value: 100,
                remaining: 2,
            },
        );

        assert_eq!(faults.apply_publish("t", 5), PublishOutcome::Deliver(100));
        assert_eq!(faults.apply_publish("t", 6), PublishOutcome::Deliver(100));
        assert_eq!(faults.apply_publish("t", 7), PublishOutcome::Deliver(7));
    }

    #[test]
    fn test_publish_fault_last_writer_wins() {
        let mut faults = NodeFaults::default();
        faults.install_publish("t", PublishFaultState::Drop { remaining: 10 });
        faults.install_publish(
            "t",
            PublishFaultState::Override {
                value: 1,
                remaining: 1,
            },
        );
        assert_eq!(faults.apply_publish("t", 5), PublishOutcome::Deliver(1));
        assert_eq!(faults.apply_publish("t", 5), PublishOutcome::Deliver(5));
    }

    #[test]
    fn test_receive_drop_decays() {
        let mut faults = NodeFaults::default();
        faults.install_receive_drop("t", 1);
        assert!(faults.take_receive_drop("t"));
        assert!(!faults.take_receive_drop("t"));
    }

    #[test]
    fn test_receive_delay_persists() {
        let mut faults = NodeFaults::default();
        assert_eq!(faults.receive_delay("t"), 0);
        faults.install_receive_delay("t", 3);
        assert_eq!(faults.receive_delay("t"), 3);
        assert_eq!(faults.receive_delay("t"), 3);
    }

    fn subscriber_config() -> NodeConfig {
        let yaml = r#"
nodes:
  - name: A
    loop:
      period: 10
      callback:
        publish:
          - topic: topic1
            value_range: [0, 10]
  - name: B
    subscribe:
      - topic: topic1
        valid_range: [0, 10]
        watchdog: 15
"#;
        let graph = load_graph_from_strs(&[yaml]).unwrap();
        graph.nodes()[1].clone()
    }

    #[test]
    fn test_receive_classifies_against_valid_range() {
        let config = subscriber_config();
        let sub = &config.subscriptions()[0];
        let mut node = NodeState::new(&config);

        assert_eq!(node.receive(0, 0, 5, sub), Classification::Nominal);
        assert_eq!(node.receive(1, 0, 10, sub), Classification::Nominal);
        assert_eq!(node.receive(2, 0, 11, sub), Classification::InvalidInput);
        assert_eq!(node.invalid_count(), 1);
        assert_eq!(node.last_value(0), Some(11));
    }

    #[test]
    fn test_watchdog_fires_once_per_gap() {
        let config = subscriber_config();
        let sub = &config.subscriptions()[0];
        let mut node = NodeState::new(&config);

        // Never received: watchdog stays unarmed.
        for tick in 0..100 {
            assert!(!node.watchdog_step(tick, 0, sub));
        }

        node.receive(100, 0, 5, sub);
        // Gap of exactly 15 does not fire; the first strictly-greater gap does.
        for tick in 100..=115 {
            assert!(!node.watchdog_step(tick, 0, sub));
        }
        assert!(node.watchdog_step(116, 0, sub));
        // Fire-on-edge: no re-fire while the input stays lost.
        for tick in 117..150 {
            assert!(!node.watchdog_step(tick, 0, sub));
        }
        assert_eq!(node.lost_count(), 1);

        // The next receipt re-arms the watchdog.
        node.receive(150, 0, 5, sub);
        assert!(node.watchdog_step(166, 0, sub));
        assert_eq!(node.lost_count(), 2);
    }

    #[test]
    fn test_loop_schedule() {
        let yaml = r#"
nodes:
  - name: A
    loop:
      period: 10
      callback:
        publish:
          - topic: topic1
            value_range: [0, 10]
"#;
        let graph = load_graph_from_strs(&[yaml]).unwrap();
        let mut node = NodeState::new(&graph.nodes()[0]);

        assert!(node.loop_due(0));
        assert!(!node.loop_due(5));
        node.advance_loop(10);
        assert!(!node.loop_due(0));
        assert!(node.loop_due(10));
    }

    #[test]
    fn test_feature_vector_columns() {
        let config = subscriber_config();
        let sub = &config.subscriptions()[0];
        let mut node = NodeState::new(&config);

        let features = node.feature_vector(0, &config);
        assert_eq!(features, [1, 1, 0, 0, 0, 0, 0, 0, 0]);

        node.receive(3, 0, 7, sub);
        let features = node.feature_vector(3, &config);
        assert_eq!(features[3], 3);
        assert_eq!(features[4], 7);

        // Gap of 19 > 15: subscription counts as past watchdog.
        let features = node.feature_vector(22, &config);
        assert_eq!(features[5], 1);
    }

    #[test]
    fn test_sampling_is_deterministic() {
        let spec = PublishSpec {
            topic: "t".to_string(),
            value_range: (0, 1000),
            delay_range: (0, 5),
        };
        let mut a = SimContext::new(24);
        let mut b = SimContext::new(24);
        for _ in 0..100 {
            assert_eq!(a.sample_publish(&spec), b.sample_publish(&spec));
        }
        let mut c = SimContext::new(25);
        let seq_a: Vec<_> = (0..100).map(|_| a.sample_publish(&spec)).collect();
        let seq_c: Vec<_> = (0..100).map(|_| c.sample_publish(&spec)).collect();
        assert_ne!(seq_a, seq_c);
    }

    #[test]
    fn test_single_value_range_sampling() {
        let spec = PublishSpec {
            topic: "t".to_string(),
            value_range: (5, 5),
            delay_range: (0, 0),
        };
        let mut ctx = SimContext::new(24);
        assert_eq!(ctx.sample_publish(&spec), (5, 0));
    }
}
