//! # graphsim-model
//!
//! Graph-config and fault-config schema for the GraphSim simulator.
//!
//! This crate provides:
//! - YAML schema types for node configs ([`NodeConfig`], [`SubscriptionConfig`],
//!   [`LoopConfig`], [`PublishSpec`], [`Callback`])
//! - Fault injection config types ([`FaultConfig`], [`PublishFaultSpec`],
//!   [`ReceiveFaultSpec`])
//! - Config loading from files and strings, with multi-file merging
//! - The derived pub/sub graph structure ([`Graph`]) with declaration-order
//!   node indices, topic publisher/subscriber maps, and the edge list
//!
//! When loading multiple graph files, node lists are concatenated in order.
//! Duplicate node names across files are rejected.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

/// Simulated time unit. Unitless, monotonically increasing from 0.
pub type Tick = u64;

// ============================================================================
// Error Types
// ============================================================================

/// Errors that can occur while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ModelError {
    /// YAML parsing error.
    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// File could not be read.
    #[error("failed to read {}: {source}", .path.display())]
    ReadFile {
        /// Offending path.
        path: PathBuf,
        /// Underlying IO error.
        source: std::io::Error,
    },

    /// Duplicate node name.
    #[error("duplicate node name: {0}")]
    DuplicateNode(String),

    /// Two different nodes publish to the same topic.
    #[error("duplicate publisher for topic {topic}: {first} and {second}")]
    DuplicatePublisher {
        /// Topic with more than one publisher.
        topic: String,
        /// First registered publisher.
        first: String,
        /// Conflicting publisher.
        second: String,
    },

    /// A subscribed topic has no publisher.
    #[error("node {subscriber} subscribes to {topic} but no node publishes it")]
    MissingPublisher {
        /// Topic without a publisher.
        topic: String,
        /// Subscribing node.
        subscriber: String,
    },

    /// Node not found.
    #[error("node not found: {0}")]
    NodeNotFound(String),

    /// Invalid configuration.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Invalid fault injection config.
    #[error("invalid fault config: {0}")]
    InvalidFault(String),
}

// ============================================================================
// Graph Config Schema
// ============================================================================

/// A single publication: topic, sampled value, sampled transmission delay.
///
/// `value_range` and `delay_range` are inclusive bounds sampled uniformly at
/// publish time.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PublishSpec {
    /// Topic to publish on.
    pub topic: String,
    /// Inclusive bounds for the published value.
    pub value_range: (i64, i64),
    /// Inclusive bounds for the transmission delay in ticks.
    #[serde(default)]
    pub delay_range: (Tick, Tick),
}

/// What a callback does when it runs: either publish a list of messages or
/// install a publish-side fault on the node that ran it.
///
/// Callbacks are data, not code. In YAML the variant is the top-level key:
///
/// ```yaml
/// nominal_callback:
///   publish:
///     - topic: topic2
///       value_range: [1, 10]
/// lost_input_callback:
///   fault:
///     affect_publish:
///       topic: topic1
///       drop: 2
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Callback {
    /// Publish one message per spec, in declared order.
    Publish(Vec<PublishSpec>),
    /// Install a publish-side fault on this node.
    Fault(FaultDirective),
}

/// A callback-produced fault directive. Always publish-side.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FaultDirective {
    /// The publish-side mutation to install.
    pub affect_publish: PublishFaultSpec,
}

/// Publish-side fault: suppress or override upcoming publications on a topic.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PublishFaultSpec {
    /// Suppress the next `drop` publications entirely.
    Drop {
        /// Affected topic.
        topic: String,
        /// Number of publications to suppress.
        drop: u64,
    },
    /// Substitute `value` for the next `count` publications.
    Override {
        /// Affected topic.
        topic: String,
        /// Replacement value.
        value: i64,
        /// Number of publications to override.
        count: u64,
    },
}

impl PublishFaultSpec {
    /// The topic this fault affects.
    pub fn topic(&self) -> &str {
        match self {
            PublishFaultSpec::Drop { topic, .. } => topic,
            PublishFaultSpec::Override { topic, .. } => topic,
        }
    }
}

/// Number of publications a publish-side fault affects.
fn publish_fault_count(spec: &PublishFaultSpec) -> u64 {
    match spec {
        PublishFaultSpec::Drop { drop, .. } => *drop,
        PublishFaultSpec::Override { count, .. } => *count,
    }
}

/// Receive-side fault: delay or suppress incoming deliveries on a topic.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ReceiveFaultSpec {
    /// Add `delay` ticks to every delivery of the topic to this node.
    Delay {
        /// Affected topic.
        topic: String,
        /// Extra delivery delay in ticks.
        delay: Tick,
    },
    /// Suppress the next `drop` deliveries of the topic to this node.
    Drop {
        /// Affected topic.
        topic: String,
        /// Number of deliveries to suppress.
        drop: u64,
    },
}

impl ReceiveFaultSpec {
    /// The topic this fault affects.
    pub fn topic(&self) -> &str {
        match self {
            ReceiveFaultSpec::Delay { topic, .. } => topic,
            ReceiveFaultSpec::Drop { topic, .. } => topic,
        }
    }
}

/// What a node does when it receives a message on a topic.
///
/// A value inside `valid_range` (inclusive) dispatches `nominal_callback`,
/// anything else dispatches `invalid_input_callback`. If no message arrives
/// for more than `watchdog` ticks after the first receipt,
/// `lost_input_callback` fires once; it is re-armed by the next receipt.
/// An absent callback means no action.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SubscriptionConfig {
    /// Subscribed topic.
    pub topic: String,
    /// Inclusive bounds classifying a received value as nominal.
    pub valid_range: (i64, i64),
    /// Maximum tick gap between receipts before the input counts as lost.
    /// A subscription without a watchdog never fires lost-input.
    #[serde(default)]
    pub watchdog: Option<Tick>,
    /// Dispatched on an in-range value.
    #[serde(default)]
    pub nominal_callback: Option<Callback>,
    /// Dispatched on an out-of-range value.
    #[serde(default)]
    pub invalid_input_callback: Option<Callback>,
    /// Dispatched when the watchdog gap is exceeded.
    #[serde(default)]
    pub lost_input_callback: Option<Callback>,
}

impl SubscriptionConfig {
    /// Whether `value` falls inside the inclusive valid range.
    pub fn is_nominal(&self, value: i64) -> bool {
        self.valid_range.0 <= value && value <= self.valid_range.1
    }
}

/// Periodic work: the callback fires at tick 0 and then every `period` ticks.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoopConfig {
    /// Loop period in ticks (>= 1).
    pub period: Tick,
    /// Callback executed on each firing.
    pub callback: Callback,
}

/// A node in the pub/sub graph: optional periodic loop plus zero or more
/// subscriptions.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NodeConfig {
    /// Node name (must be unique).
    pub name: String,
    /// Optional periodic loop.
    #[serde(default)]
    pub r#loop: Option<LoopConfig>,
    /// Subscriptions, in declaration order.
    #[serde(default)]
    pub subscribe: Option<Vec<SubscriptionConfig>>,
}

impl NodeConfig {
    /// Subscriptions as a slice (empty when the node has none).
    pub fn subscriptions(&self) -> &[SubscriptionConfig] {
        self.subscribe.as_deref().unwrap_or(&[])
    }

    /// All publish callbacks of this node, in declaration order:
    /// the loop callback first, then per subscription nominal, invalid, lost.
    fn callbacks(&self) -> impl Iterator<Item = &Callback> {
        self.r#loop
            .iter()
            .map(|l| &l.callback)
            .chain(self.subscriptions().iter().flat_map(|sub| {
                sub.nominal_callback
                    .iter()
                    .chain(sub.invalid_input_callback.iter())
                    .chain(sub.lost_input_callback.iter())
            }))
    }
}

/// Root graph file structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct GraphFileYaml {
    /// Node definitions in declaration order.
    nodes: Vec<NodeConfig>,
}

// ============================================================================
// Fault Config Schema
// ============================================================================

/// An externally injected fault. Exactly one per simulation run; exactly one
/// of `affect_publish` / `affect_receive` must be set.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FaultConfig {
    /// Target node name.
    pub inject_to: String,
    /// Tick at which the fault is installed, before that tick's other work.
    pub inject_at: Tick,
    /// Publish-side mutation on the target node.
    #[serde(default)]
    pub affect_publish: Option<PublishFaultSpec>,
    /// Receive-side mutation on the target node.
    #[serde(default)]
    pub affect_receive: Option<ReceiveFaultSpec>,
}

/// A fault config validated against a graph, with node name resolved to its
/// declaration index.
#[derive(Debug, Clone)]
pub struct ResolvedFault {
    /// Declaration index of the injected node.
    pub node: usize,
    /// Effective injection tick (CLI override already applied by the caller).
    pub inject_at: Tick,
    /// The mutation to install.
    pub kind: FaultKind,
}

/// The concrete mutation installed by an injected fault.
#[derive(Debug, Clone)]
pub enum FaultKind {
    /// Suppress the next `times` publications on `topic`.
    PublishDrop {
        /// Affected topic.
        topic: String,
        /// Publications to suppress.
        times: u64,
    },
    /// Substitute `value` for the next `count` publications on `topic`.
    PublishOverride {
        /// Affected topic.
        topic: String,
        /// Replacement value.
        value: i64,
        /// Publications to override.
        count: u64,
    },
    /// Add `delay` ticks to every delivery of `topic`, for the rest of the run.
    ReceiveDelay {
        /// Affected topic.
        topic: String,
        /// Extra delay in ticks.
        delay: Tick,
    },
    /// Suppress the next `times` deliveries of `topic`.
    ReceiveDrop {
        /// Affected topic.
        topic: String,
        /// Deliveries to suppress.
        times: u64,
    },
}

impl FaultConfig {
    /// Validate this fault against `graph` and resolve the target node.
    ///
    /// Publish faults must target a topic the node publishes; receive faults
    /// must target a topic the node subscribes to.
    pub fn resolve(&self, graph: &Graph) -> Result<ResolvedFault, ModelError> {
        let node = graph
            .node_index(&self.inject_to)
            .ok_or_else(|| ModelError::NodeNotFound(self.inject_to.clone()))?;

        let kind = match (&self.affect_publish, &self.affect_receive) {
            (Some(publish), None) => {
                let topic = publish.topic();
                if graph.topic_publisher(topic) != Some(node) {
                    return Err(ModelError::InvalidFault(format!(
                        "cannot inject publish fault to {}: it does not publish {}",
                        self.inject_to, topic
                    )));
                }
                if publish_fault_count(publish) == 0 {
                    return Err(ModelError::InvalidFault(format!(
                        "publish fault on {} must affect at least one publication",
                        topic
                    )));
                }
                match publish {
                    PublishFaultSpec::Drop { topic, drop } => FaultKind::PublishDrop {
                        topic: topic.clone(),
                        times: *drop,
                    },
                    PublishFaultSpec::Override {
                        topic,
                        value,
                        count,
                    } => FaultKind::PublishOverride {
                        topic: topic.clone(),
                        value: *value,
                        count: *count,
                    },
                }
            }
            (None, Some(receive)) => {
                let topic = receive.topic();
                let subscribes = graph.nodes()[node]
                    .subscriptions()
                    .iter()
                    .any(|sub| sub.topic == topic);
                if !subscribes {
                    return Err(ModelError::InvalidFault(format!(
                        "cannot inject receive fault to {}: it does not subscribe to {}",
                        self.inject_to, topic
                    )));
                }
                match receive {
                    ReceiveFaultSpec::Delay { topic, delay } => FaultKind::ReceiveDelay {
                        topic: topic.clone(),
                        delay: *delay,
                    },
                    ReceiveFaultSpec::Drop { topic, drop } => {
                        if *drop == 0 {
                            return Err(ModelError::InvalidFault(format!(
                                "receive fault on {} must drop at least one delivery",
                                topic
                            )));
                        }
                        FaultKind::ReceiveDrop {
                            topic: topic.clone(),
                            times: *drop,
                        }
                    }
                }
            }
            (None, None) => {
                return Err(ModelError::InvalidFault(format!(
                    "fault for {} must set affect_publish or affect_receive",
                    self.inject_to
                )))
            }
            (Some(_), Some(_)) => {
                return Err(ModelError::InvalidFault(format!(
                    "fault for {} sets both affect_publish and affect_receive",
                    self.inject_to
                )))
            }
        };

        debug!(
            node = %self.inject_to,
            inject_at = self.inject_at,
            "resolved fault config"
        );

        Ok(ResolvedFault {
            node,
            inject_at: self.inject_at,
            kind,
        })
    }
}

// ============================================================================
// Config Loading
// ============================================================================

/// Load and merge one or more graph config files.
///
/// Node lists are concatenated in file order; a duplicate node name anywhere
/// in the merged list is an error.
pub fn load_graph(paths: &[&Path]) -> Result<Graph, ModelError> {
    if paths.is_empty() {
        return Err(ModelError::InvalidConfig(
            "no graph config files provided".to_string(),
        ));
    }
    let mut yamls = Vec::with_capacity(paths.len());
    for path in paths {
        debug!(path = %path.display(), "loading graph config");
        let text = std::fs::read_to_string(path).map_err(|source| ModelError::ReadFile {
            path: path.to_path_buf(),
            source,
        })?;
        yamls.push(text);
    }
    let strs: Vec<&str> = yamls.iter().map(|s| s.as_str()).collect();
    load_graph_from_strs(&strs)
}

/// Parse and merge graph configs from YAML strings.
pub fn load_graph_from_strs(yaml_strs: &[&str]) -> Result<Graph, ModelError> {
    let mut nodes = Vec::new();
    for yaml_str in yaml_strs {
        let file: GraphFileYaml = serde_yaml::from_str(yaml_str)?;
        nodes.extend(file.nodes);
    }
    Graph::build(nodes)
}

/// Load a fault config file.
pub fn load_fault(path: &Path) -> Result<FaultConfig, ModelError> {
    let text = std::fs::read_to_string(path).map_err(|source| ModelError::ReadFile {
        path: path.to_path_buf(),
        source,
    })?;
    load_fault_from_str(&text)
}

/// Parse a fault config from a YAML string.
pub fn load_fault_from_str(yaml_str: &str) -> Result<FaultConfig, ModelError> {
    let fault: FaultConfig = serde_yaml::from_str(yaml_str)?;
    Ok(fault)
}

// ============================================================================
// Derived Graph Structure
// ============================================================================

/// A subscriber of a topic: the node's declaration index and the index of the
/// matching subscription within that node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TopicSubscriber {
    /// Declaration index of the subscribing node.
    pub node: usize,
    /// Index of the subscription within the node's subscribe list.
    pub subscription: usize,
}

/// The validated pub/sub graph derived from node configs.
///
/// Nodes are indexed by declaration order; those indices are stable across a
/// run and are what the edge index and fault label outputs refer to.
#[derive(Debug, Clone)]
pub struct Graph {
    nodes: Vec<NodeConfig>,
    index_by_name: BTreeMap<String, usize>,
    publisher_by_topic: BTreeMap<String, usize>,
    subscribers_by_topic: BTreeMap<String, Vec<TopicSubscriber>>,
    /// Published topics in first-registration order (node declaration order).
    published_topics: Vec<String>,
    /// Per node, the topic reported as its primary output.
    primary_topic: Vec<Option<String>>,
}

impl Graph {
    /// Validate node configs and derive the graph structure.
    pub fn build(nodes: Vec<NodeConfig>) -> Result<Graph, ModelError> {
        let mut index_by_name = BTreeMap::new();
        for (idx, node) in nodes.iter().enumerate() {
            Self::validate_node(node)?;
            if index_by_name.insert(node.name.clone(), idx).is_some() {
                return Err(ModelError::DuplicateNode(node.name.clone()));
            }
        }

        // Register publishers. Each topic has exactly one publisher; a node
        // may publish the same topic from several callbacks.
        let mut publisher_by_topic: BTreeMap<String, usize> = BTreeMap::new();
        let mut published_topics: Vec<String> = Vec::new();
        for (idx, node) in nodes.iter().enumerate() {
            for callback in node.callbacks() {
                if let Callback::Publish(specs) = callback {
                    for spec in specs {
                        match publisher_by_topic.get(&spec.topic) {
                            Some(&existing) if existing != idx => {
                                return Err(ModelError::DuplicatePublisher {
                                    topic: spec.topic.clone(),
                                    first: nodes[existing].name.clone(),
                                    second: node.name.clone(),
                                });
                            }
                            Some(_) => {}
                            None => {
                                publisher_by_topic.insert(spec.topic.clone(), idx);
                                published_topics.push(spec.topic.clone());
                            }
                        }
                    }
                }
            }
        }

        // Callback-produced faults must target a topic their own node publishes.
        for (idx, node) in nodes.iter().enumerate() {
            for callback in node.callbacks() {
                if let Callback::Fault(directive) = callback {
                    let topic = directive.affect_publish.topic();
                    if publisher_by_topic.get(topic) != Some(&idx) {
                        return Err(ModelError::InvalidConfig(format!(
                            "node {} declares a fault callback on {} but does not publish it",
                            node.name, topic
                        )));
                    }
                }
            }
        }

        // Register subscribers and check every subscribed topic has a publisher.
        let mut subscribers_by_topic: BTreeMap<String, Vec<TopicSubscriber>> = BTreeMap::new();
        for (idx, node) in nodes.iter().enumerate() {
            for (sub_idx, sub) in node.subscriptions().iter().enumerate() {
                if !publisher_by_topic.contains_key(&sub.topic) {
                    return Err(ModelError::MissingPublisher {
                        topic: sub.topic.clone(),
                        subscriber: node.name.clone(),
                    });
                }
                let subs = subscribers_by_topic.entry(sub.topic.clone()).or_default();
                if subs.iter().any(|s| s.node == idx) {
                    return Err(ModelError::InvalidConfig(format!(
                        "node {} subscribes to {} more than once",
                        node.name, sub.topic
                    )));
                }
                subs.push(TopicSubscriber {
                    node: idx,
                    subscription: sub_idx,
                });
            }
        }

        let primary_topic = nodes.iter().map(Self::find_primary_topic).collect();

        debug!(
            nodes = nodes.len(),
            topics = published_topics.len(),
            "derived pub/sub graph"
        );

        Ok(Graph {
            nodes,
            index_by_name,
            publisher_by_topic,
            subscribers_by_topic,
            published_topics,
            primary_topic,
        })
    }

    fn validate_node(node: &NodeConfig) -> Result<(), ModelError> {
        if node.name.is_empty() {
            return Err(ModelError::InvalidConfig(
                "node name must not be empty".to_string(),
            ));
        }
        if node.r#loop.is_none() && node.subscribe.is_none() {
            return Err(ModelError::InvalidConfig(format!(
                "node {} must have a loop or at least one subscription",
                node.name
            )));
        }
        if let Some(subs) = &node.subscribe {
            if subs.is_empty() {
                return Err(ModelError::InvalidConfig(format!(
                    "node {}: subscribe must not be an empty list",
                    node.name
                )));
            }
        }
        if let Some(lp) = &node.r#loop {
            if lp.period == 0 {
                return Err(ModelError::InvalidConfig(format!(
                    "node {}: loop period must be >= 1",
                    node.name
                )));
            }
            Self::validate_callback(&node.name, &lp.callback)?;
        }
        for sub in node.subscriptions() {
            if sub.valid_range.0 > sub.valid_range.1 {
                return Err(ModelError::InvalidConfig(format!(
                    "node {}: valid_range for {} is out of order",
                    node.name, sub.topic
                )));
            }
            for cb in sub
                .nominal_callback
                .iter()
                .chain(sub.invalid_input_callback.iter())
                .chain(sub.lost_input_callback.iter())
            {
                Self::validate_callback(&node.name, cb)?;
            }
        }
        Ok(())
    }

    fn validate_callback(node: &str, callback: &Callback) -> Result<(), ModelError> {
        match callback {
            Callback::Publish(specs) => {
                for spec in specs {
                    if spec.value_range.0 > spec.value_range.1 {
                        return Err(ModelError::InvalidConfig(format!(
                            "node {}: value_range for {} is out of order",
                            node, spec.topic
                        )));
                    }
                    if spec.delay_range.0 > spec.delay_range.1 {
                        return Err(ModelError::InvalidConfig(format!(
                            "node {}: delay_range for {} is out of order",
                            node, spec.topic
                        )));
                    }
                }
            }
            Callback::Fault(directive) => {
                if publish_fault_count(&directive.affect_publish) == 0 {
                    return Err(ModelError::InvalidConfig(format!(
                        "node {}: fault callback on {} must affect at least one publication",
                        node,
                        directive.affect_publish.topic()
                    )));
                }
            }
        }
        Ok(())
    }

    /// The first topic the node publishes: loop callback first, then
    /// subscription callbacks in declaration order.
    fn find_primary_topic(node: &NodeConfig) -> Option<String> {
        node.callbacks().find_map(|cb| match cb {
            Callback::Publish(specs) => specs.first().map(|s| s.topic.clone()),
            Callback::Fault(_) => None,
        })
    }

    /// Nodes in declaration order.
    pub fn nodes(&self) -> &[NodeConfig] {
        &self.nodes
    }

    /// Number of nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the graph has no nodes.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Declaration index for a node name.
    pub fn node_index(&self, name: &str) -> Option<usize> {
        self.index_by_name.get(name).copied()
    }

    /// Declaration index of the node publishing `topic`.
    pub fn topic_publisher(&self, topic: &str) -> Option<usize> {
        self.publisher_by_topic.get(topic).copied()
    }

    /// Subscribers of `topic` in declaration order.
    pub fn topic_subscribers(&self, topic: &str) -> &[TopicSubscriber] {
        self.subscribers_by_topic
            .get(topic)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    /// The primary output topic of a node, if it publishes anything.
    pub fn primary_topic(&self, node: usize) -> Option<&str> {
        self.primary_topic[node].as_deref()
    }

    /// Directed edges `(publisher_index, subscriber_index)`, one per
    /// topic/subscriber pair, in topic first-registration order.
    pub fn edges(&self) -> Vec<(usize, usize)> {
        let mut edges = Vec::new();
        for topic in &self.published_topics {
            let publisher = self.publisher_by_topic[topic];
            for sub in self.topic_subscribers(topic) {
                edges.push((publisher, sub.node));
            }
        }
        edges
    }
}

// ============================================================================
// Tests
// ============================================================================
