//! Terminal visualization of a running simulation.
//!
//! Prints a node table at startup and then one status line per tick to
//! stderr. Consecutive identical status lines are collapsed so steady-state
//! stretches stay readable. Enabled with `--viz`; tensor output is disabled
//! while visualizing.

use graphsim_core::NodeState;
use graphsim_model::{Graph, Tick};
use std::io::Write;

/// Per-tick terminal renderer.
#[derive(Debug, Default)]
pub struct TermViz {
    last_status: Option<String>,
}

impl TermViz {
    /// Create a renderer.
    pub fn new() -> Self {
        TermViz::default()
    }

    /// Print the node table once at simulation start.
    pub fn print_header(&mut self, graph: &Graph) {
        eprintln!();
        eprintln!("┌{}┬{}┬{}┬{}┐", "─".repeat(18), "─".repeat(12), "─".repeat(8), "─".repeat(8));
        eprintln!(
            "│ {:^16} │ {:^10} │ {:^6} │ {:^6} │",
            "Node", "Kind", "Subs", "Period"
        );
        eprintln!("├{}┼{}┼{}┼{}┤", "─".repeat(18), "─".repeat(12), "─".repeat(8), "─".repeat(8));
        for node in graph.nodes() {
            let kind = if node.subscriptions().is_empty() {
                "publisher"
            } else if node.r#loop.is_some() {
                "hybrid"
            } else {
                "subscriber"
            };
            let period = node
                .r#loop
                .as_ref()
                .map(|l| l.period.to_string())
                .unwrap_or_else(|| "-".to_string());
            eprintln!(
                "│ {:16} │ {:10} │ {:>6} │ {:>6} │",
                node.name,
                kind,
                node.subscriptions().len(),
                period
            );
        }
        eprintln!("└{}┴{}┴{}┴{}┘", "─".repeat(18), "─".repeat(12), "─".repeat(8), "─".repeat(8));
        eprintln!();
        let _ = std::io::stderr().flush();
    }

    /// Render the per-tick status line.
    pub fn render_tick(&mut self, tick: Tick, graph: &Graph, nodes: &[NodeState]) {
        let mut status = String::new();
        for (idx, node) in nodes.iter().enumerate() {
            let config = &graph.nodes()[idx];
            let features = node.feature_vector(tick, config);
            let marker = if features[5] > 0 {
                "lost"
            } else if node.faults.is_active() {
                "fault"
            } else {
                "ok"
            };
            status.push_str(&format!(
                "  {}:{} inv={} lost={}",
                config.name, marker, features[7], features[8]
            ));
        }
        if self.last_status.as_deref() != Some(status.as_str()) {
            eprintln!("t={:<6}{}", tick, status);
            self.last_status = Some(status);
        }
    }
}
