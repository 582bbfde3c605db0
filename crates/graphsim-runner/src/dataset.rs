//! Dataset export for simulation results.
//!
//! Three CSV artifacts are produced per run:
//! - **node features**: one line per tick; per line the records
//!   `name,f0..f8` of every node in declaration order, concatenated.
//! - **edge index**: one line per edge, `publisher_index,subscriber_index`,
//!   using declaration-order node indices.
//! - **fault label**: a single line `node_index,inject_at`.
//!
//! Each file is rendered into an in-memory buffer and written with a single
//! `fs::write`, so a fatal error never leaves a partial output file behind.

use crate::{FeatureRow, RunnerError};
use graphsim_model::{Graph, ResolvedFault};
use std::io::Write;
use std::path::Path;
use tracing::info;

/// Write the per-tick node feature rows as CSV.
pub fn write_node_features<W: Write>(
    writer: &mut W,
    graph: &Graph,
    rows: &[FeatureRow],
) -> std::io::Result<()> {
    for row in rows {
        let mut first = true;
        for (node, features) in graph.nodes().iter().zip(row) {
            if !first {
                write!(writer, ",")?;
            }
            first = false;
            write!(writer, "{}", node.name)?;
            for feature in features {
                write!(writer, ",{}", feature)?;
            }
        }
        writeln!(writer)?;
    }
    Ok(())
}

/// Write the derived edge index as CSV, one `publisher,subscriber` pair per
/// line.
pub fn write_edge_index<W: Write>(writer: &mut W, graph: &Graph) -> std::io::Result<()> {
    for (publisher, subscriber) in graph.edges() {
        writeln!(writer, "{},{}", publisher, subscriber)?;
    }
    Ok(())
}

/// Write the fault label line for a run.
pub fn write_fault_label<W: Write>(writer: &mut W, fault: &ResolvedFault) -> std::io::Result<()> {
    writeln!(writer, "{},{}", fault.node, fault.inject_at)
}

/// Write node features to a file.
pub fn export_node_features(
    path: &Path,
    graph: &Graph,
    rows: &[FeatureRow],
) -> Result<(), RunnerError> {
    let mut buffer = Vec::new();
    write_node_features(&mut buffer, graph, rows)?;
    std::fs::write(path, buffer)?;
    info!(path = %path.display(), rows = rows.len(), "wrote node features");
    Ok(())
}

/// Write the edge index to a file.
pub fn export_edge_index(path: &Path, graph: &Graph) -> Result<(), RunnerError> {
    let mut buffer = Vec::new();
    write_edge_index(&mut buffer, graph)?;
    std::fs::write(path, buffer)?;
    info!(path = %path.display(), edges = graph.edges().len(), "wrote edge index");
    Ok(())
}

/// Write the fault label to a file.
pub fn export_fault_label(path: &Path, fault: &ResolvedFault) -> Result<(), RunnerError> {
    let mut buffer = Vec::new();
    write_fault_label(&mut buffer, fault)?;
    std::fs::write(path, buffer)?;
    info!(path = %path.display(), "wrote fault label");
    Ok(())
}
