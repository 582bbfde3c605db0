//! Dataset output integration tests for the GraphSim runner.
//!
//! These tests run the compiled `graphsim` binary end-to-end and verify the
//! node-feature, edge-index, and fault-label CSV outputs.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

const CHAIN_GRAPH: &str = r#"
nodes:
  - name: A
    loop:
      period: 10
      callback:
        publish:
          - topic: topic1
            value_range: [5, 5]
            delay_range: [0, 0]
  - name: B
    subscribe:
      - topic: topic1
        valid_range: [0, 10]
        watchdog: 15
"#;

const DROP_FAULT: &str = r#"
inject_to: A
inject_at: 5
affect_publish:
  topic: topic1
  drop: 2
"#;

// ============================================================================
// Test Helper Functions
// ============================================================================

struct RunOutput {
    status: std::process::ExitStatus,
    stdout: String,
    stderr: String,
}

/// Run the graphsim binary with the given arguments.
fn run_graphsim(args: &[&str], cwd: &Path) -> RunOutput {
    // CARGO_BIN_EXE_graphsim is set by cargo when running tests for this crate
    let binary = env!("CARGO_BIN_EXE_graphsim");
    let output = Command::new(binary)
        .args(args)
        .current_dir(cwd)
        .output()
        .expect("Failed to execute graphsim");
    RunOutput {
        status: output.status,
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
    }
}

/// Write a config file into the temp dir and return its path.
fn write_config(dir: &TempDir, name: &str, contents: &str) -> PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, contents).expect("Failed to write config");
    path
}

fn expect_success(output: &RunOutput) {
    assert!(
        output.status.success(),
        "graphsim failed:\nstdout: {}\nstderr: {}",
        output.stdout,
        output.stderr
    );
}

// ============================================================================
// Integration Tests
// ============================================================================

#[test]
fn test_run_produces_dataset_files() {
    let temp = TempDir::new().unwrap();
    let graph = write_config(&temp, "graph.yaml", CHAIN_GRAPH);
    let fault = write_config(&temp, "fault.yaml", DROP_FAULT);
    let features = temp.path().join("node_feature.csv");
    let edges = temp.path().join("edge_index.csv");
    let label = temp.path().join("fault_label.csv");

    let output = run_graphsim(
        &[
            "run",
            "--graph",
            graph.to_str().unwrap(),
            "--stop",
            "20",
            "--fault",
            fault.to_str().unwrap(),
            "--node_feature_output",
            features.to_str().unwrap(),
            "--edge_index_output",
            edges.to_str().unwrap(),
            "--fault_label_output",
            label.to_str().unwrap(),
        ],
        temp.path(),
    );
    expect_success(&output);

    // One feature row per tick in [0, stop].
    let features = fs::read_to_string(&features).unwrap();
    let rows: Vec<&str> = features.lines().collect();
    assert_eq!(rows.len(), 21);

    // Each row carries name,f0..f8 for both nodes; index 3 is the tick.
    for (tick, row) in rows.iter().enumerate() {
        let fields: Vec<&str> = row.split(',').collect();
        assert_eq!(fields.len(), 20);
        assert_eq!(fields[0], "A");
        assert_eq!(fields[10], "B");
        assert_eq!(fields[4], tick.to_string());
        assert_eq!(fields[14], tick.to_string());
    }

    // Single edge from A (0) to B (1).
    assert_eq!(fs::read_to_string(&edges).unwrap(), "0,1\n");

    // Fault label names A's declaration index and the config's inject_at.
    assert_eq!(fs::read_to_string(&label).unwrap(), "0,5\n");

    // Run stats go to stdout as JSON.
    let stats: serde_json::Value = serde_json::from_str(&output.stdout).unwrap();
    assert_eq!(stats["ticks"], 21);
    assert_eq!(stats["publications_suppressed"], 2);
}

#[test]
fn test_inject_at_override_is_recorded() {
    let temp = TempDir::new().unwrap();
    let graph = write_config(&temp, "graph.yaml", CHAIN_GRAPH);
    let fault = write_config(&temp, "fault.yaml", DROP_FAULT);
    let label = temp.path().join("fault_label.csv");

    let output = run_graphsim(
        &[
            "run",
            "--graph",
            graph.to_str().unwrap(),
            "--stop",
            "20",
            "--fault",
            fault.to_str().unwrap(),
            "--inject_at",
            "7",
            "--fault_label_output",
            label.to_str().unwrap(),
        ],
        temp.path(),
    );
    expect_success(&output);

    // The CLI override wins over the config's inject_at.
    assert_eq!(fs::read_to_string(&label).unwrap(), "0,7\n");
}

#[test]
fn test_runs_are_byte_identical() {
    let temp = TempDir::new().unwrap();
    let graph = write_config(&temp, "graph.yaml", CHAIN_GRAPH);
    let fault = write_config(&temp, "fault.yaml", DROP_FAULT);

    let mut outputs = Vec::new();
    for name in ["first.csv", "second.csv"] {
        let features = temp.path().join(name);
        let output = run_graphsim(
            &[
                "run",
                "--graph",
                graph.to_str().unwrap(),
                "--stop",
                "50",
                "--fault",
                fault.to_str().unwrap(),
                "--seed",
                "42",
                "--node_feature_output",
                features.to_str().unwrap(),
            ],
            temp.path(),
        );
        expect_success(&output);
        outputs.push(fs::read(&features).unwrap());
    }
    assert_eq!(outputs[0], outputs[1]);
}

#[test]
fn test_merged_graphs_share_topics() {
    let subscriber_file = r#"
nodes:
  - name: C
    subscribe:
      - topic: topic1
        valid_range: [0, 10]
"#;
    let temp = TempDir::new().unwrap();
    let base = write_config(&temp, "base.yaml", CHAIN_GRAPH);
    let extra = write_config(&temp, "extra.yaml", subscriber_file);
    let edges = temp.path().join("edge_index.csv");

    let output = run_graphsim(
        &[
            "run",
            "--graph",
            base.to_str().unwrap(),
            "--graph",
            extra.to_str().unwrap(),
            "--stop",
            "10",
            "--edge_index_output",
            edges.to_str().unwrap(),
        ],
        temp.path(),
    );
    expect_success(&output);

    // C merges in as index 2 and subscribes to A's topic.
    assert_eq!(fs::read_to_string(&edges).unwrap(), "0,1\n0,2\n");
}

#[test]
fn test_invalid_graph_fails_without_outputs() {
    let duplicate_publisher = r#"
nodes:
  - name: A
    loop:
      period: 10
      callback:
        publish:
          - topic: topic1
            value_range: [0, 10]
  - name: B
    loop:
      period: 10
      callback:
        publish:
          - topic: topic1
            value_range: [0, 10]
"#;
    let temp = TempDir::new().unwrap();
    let graph = write_config(&temp, "graph.yaml", duplicate_publisher);
    let features = temp.path().join("node_feature.csv");

    let output = run_graphsim(
        &[
            "run",
            "--graph",
            graph.to_str().unwrap(),
            "--stop",
            "10",
            "--node_feature_output",
            features.to_str().unwrap(),
        ],
        temp.path(),
    );

    assert!(!output.status.success());
    assert!(
        output.stderr.contains("topic1"),
        "error should name the offending topic: {}",
        output.stderr
    );
    // No partial output files on fatal errors.
    assert!(!features.exists());
}

#[test]
fn test_fault_targeting_unknown_node_fails() {
    let temp = TempDir::new().unwrap();
    let graph = write_config(&temp, "graph.yaml", CHAIN_GRAPH);
    let fault = write_config(
        &temp,
        "fault.yaml",
        "inject_to: nobody\ninject_at: 5\naffect_receive:\n  topic: topic1\n  delay: 3\n",
    );

    let output = run_graphsim(
        &[
            "run",
            "--graph",
            graph.to_str().unwrap(),
            "--stop",
            "10",
            "--fault",
            fault.to_str().unwrap(),
        ],
        temp.path(),
    );

    assert!(!output.status.success());
    assert!(output.stderr.contains("nobody"), "{}", output.stderr);
}

#[test]
fn test_sweep_produces_dataset_tree() {
    let temp = TempDir::new().unwrap();
    let graph = write_config(&temp, "graph.yaml", CHAIN_GRAPH);

    let fault_dir = temp.path().join("faults");
    fs::create_dir(&fault_dir).unwrap();
    fs::write(fault_dir.join("drop_publish.yaml"), DROP_FAULT).unwrap();
    fs::write(
        fault_dir.join("delay_receive.yaml"),
        "inject_to: B\ninject_at: 5\naffect_receive:\n  topic: topic1\n  delay: 3\n",
    )
    .unwrap();

    let output_dir = temp.path().join("dataset");
    let output = run_graphsim(
        &[
            "sweep",
            "--graph",
            graph.to_str().unwrap(),
            "--output_dir",
            output_dir.to_str().unwrap(),
            "--fault_dir",
            fault_dir.to_str().unwrap(),
            "--stop",
            "60",
            "--fault_begin",
            "10",
            "--fault_end",
            "50",
            "--max_num_sweep",
            "5",
        ],
        temp.path(),
    );
    expect_success(&output);

    for stem in ["drop_publish", "delay_receive"] {
        let subdir = output_dir.join(stem);
        assert!(subdir.join("edge_index.csv").exists());
        for tick in [10, 20, 30, 40, 50] {
            let features = subdir.join(format!("node_feature_inject_at_{}.csv", tick));
            let label = subdir.join(format!("fault_label_inject_at_{}.csv", tick));
            assert!(features.exists(), "missing {}", features.display());
            let label = fs::read_to_string(&label).unwrap();
            assert!(label.ends_with(&format!(",{}\n", tick)), "label: {}", label);
        }
    }

    // The edge index does not depend on the injected fault.
    assert_eq!(
        fs::read(output_dir.join("drop_publish/edge_index.csv")).unwrap(),
        fs::read(output_dir.join("delay_receive/edge_index.csv")).unwrap()
    );
}

#[test]
fn test_sweep_rejects_bad_bounds() {
    let temp = TempDir::new().unwrap();
    let graph = write_config(&temp, "graph.yaml", CHAIN_GRAPH);
    let fault_dir = temp.path().join("faults");
    fs::create_dir(&fault_dir).unwrap();
    fs::write(fault_dir.join("drop.yaml"), DROP_FAULT).unwrap();

    let output = run_graphsim(
        &[
            "sweep",
            "--graph",
            graph.to_str().unwrap(),
            "--output_dir",
            temp.path().join("out").to_str().unwrap(),
            "--fault_dir",
            fault_dir.to_str().unwrap(),
            "--stop",
            "60",
            "--fault_begin",
            "50",
            "--fault_end",
            "10",
            "--max_num_sweep",
            "5",
        ],
        temp.path(),
    );
    assert!(!output.status.success());
}
