//! # graphsim-runner
//!
//! CLI runner for the GraphSim fault-propagation simulator.
//!
//! `graphsim run` executes a single simulation and writes the node-feature,
//! edge-index, and fault-label CSV files. `graphsim sweep` repeats a run for
//! every fault config in a directory across a range of injection ticks,
//! producing a dataset tree for downstream training pipelines.

use clap::{Parser, Subcommand};
use graphsim_model::{load_fault, load_graph, Graph, Tick};
use graphsim_runner::dataset;
use graphsim_runner::viz::TermViz;
use graphsim_runner::{Executor, RunnerError, DEFAULT_SEED};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tracing::warn;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

// ============================================================================
// CLI Configuration
// ============================================================================

/// GraphSim - pub/sub graph fault-propagation simulator
#[derive(Parser, Debug)]
#[command(name = "graphsim")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a single simulation from graph config YAML file(s)
    Run(RunConfig),
    /// Sweep a fault-config directory across a range of injection ticks
    Sweep(SweepConfig),
}

/// Configuration for running a single simulation
#[derive(Parser, Debug)]
pub struct RunConfig {
    /// Path(s) to graph config YAML file(s). Node lists are merged in order.
    #[arg(long = "graph", required = true)]
    pub graph: Vec<PathBuf>,

    /// Terminal tick (inclusive)
    #[arg(long = "stop")]
    pub stop: Tick,

    /// Path to a fault injection config file
    #[arg(long = "fault")]
    pub fault: Option<PathBuf>,

    /// Override the fault config's own inject_at tick
    #[arg(long = "inject_at")]
    pub inject_at: Option<Tick>,

    /// Where to write per-tick node feature rows (CSV)
    #[arg(long = "node_feature_output")]
    pub node_feature_output: Option<PathBuf>,

    /// Where to write the edge index (CSV)
    #[arg(long = "edge_index_output")]
    pub edge_index_output: Option<PathBuf>,

    /// Where to write the fault label line (CSV)
    #[arg(long = "fault_label_output")]
    pub fault_label_output: Option<PathBuf>,

    /// Random seed for value and delay sampling
    #[arg(long, default_value_t = DEFAULT_SEED)]
    pub seed: u64,

    /// Render a terminal animation instead of generating tensors
    #[arg(
        long,
        conflicts_with_all = ["node_feature_output", "edge_index_output", "fault_label_output"]
    )]
    pub viz: bool,

    /// Verbose output
    #[arg(short, long)]
    pub verbose: bool,
}

/// Configuration for sweeping fault injection times
#[derive(Parser, Debug)]
pub struct SweepConfig {
    /// Path(s) to graph config YAML file(s). Node lists are merged in order.
    #[arg(long = "graph", required = true)]
    pub graph: Vec<PathBuf>,

    /// Directory to save the dataset. Each fault config gets a subdirectory
    /// with a node feature file and fault label file per injection tick,
    /// plus one edge index file.
    #[arg(long = "output_dir")]
    pub output_dir: PathBuf,

    /// Directory containing fault injection config files (*.yaml)
    #[arg(long = "fault_dir")]
    pub fault_dir: PathBuf,

    /// Terminal tick (inclusive) for every run
    #[arg(long = "stop")]
    pub stop: Tick,

    /// Lower bound tick of fault injection
    #[arg(long = "fault_begin")]
    pub fault_begin: Tick,

    /// Upper bound tick of fault injection
    #[arg(long = "fault_end")]
    pub fault_end: Tick,

    /// Number of runs per fault config. Injection ticks are equally
    /// distributed between fault_begin and fault_end; duplicates are removed.
    #[arg(long = "max_num_sweep")]
    pub max_num_sweep: u64,

    /// Random seed for value and delay sampling
    #[arg(long, default_value_t = DEFAULT_SEED)]
    pub seed: u64,

    /// Verbose output
    #[arg(short, long)]
    pub verbose: bool,
}

// ============================================================================
// Run Command
// ============================================================================

fn load_merged_graph(paths: &[PathBuf]) -> Result<Graph, RunnerError> {
    let paths: Vec<&Path> = paths.iter().map(|p| p.as_path()).collect();
    Ok(load_graph(&paths)?)
}

/// Run a single simulation with the given configuration.
pub fn run_simulation(config: RunConfig) -> Result<(), RunnerError> {
    let graph = load_merged_graph(&config.graph)?;
    if config.verbose {
        eprintln!(
            "Loaded graph with {} nodes from {} file(s)",
            graph.len(),
            config.graph.len()
        );
        eprintln!("Using seed: {}", config.seed);
    }

    let fault = match &config.fault {
        Some(path) => {
            let mut fault_config = load_fault(path)?;
            if let Some(tick) = config.inject_at {
                fault_config.inject_at = tick;
            }
            Some(fault_config.resolve(&graph)?)
        }
        None => {
            if config.inject_at.is_some() {
                warn!("--inject_at given without --fault; ignoring");
            }
            None
        }
    };

    let mut executor = Executor::new(graph, fault.clone(), config.stop, config.seed);
    if config.viz {
        executor.set_viz(TermViz::new());
    }
    let stats = executor.run();

    if !config.viz {
        if let Some(path) = &config.node_feature_output {
            dataset::export_node_features(path, executor.graph(), executor.feature_rows())?;
        }
        if let Some(path) = &config.edge_index_output {
            dataset::export_edge_index(path, executor.graph())?;
        }
        if let Some(path) = &config.fault_label_output {
            match &fault {
                Some(fault) => dataset::export_fault_label(path, fault)?,
                None => warn!("--fault_label_output given without --fault; skipping"),
            }
        }
    }

    println!("{}", serde_json::to_string_pretty(&stats)?);
    Ok(())
}

// ============================================================================
// Sweep Command
// ============================================================================

/// Injection ticks equally distributed over `[begin, end]`, deduplicated.
/// Ties round to even, so existing dataset grids reproduce exactly.
fn injection_ticks(begin: Tick, end: Tick, count: u64) -> BTreeSet<Tick> {
    let span = (end - begin) as f64;
    let steps = (count - 1) as f64;
    (0..count)
        .map(|i| (begin as f64 + i as f64 * span / steps).round_ties_even() as Tick)
        .collect()
}

/// List fault config files in a directory, sorted by name.
fn fault_files(dir: &Path) -> Result<Vec<PathBuf>, RunnerError> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            matches!(
                path.extension().and_then(|e| e.to_str()),
                Some("yaml") | Some("yml")
            )
        })
        .collect();
    files.sort();
    Ok(files)
}

/// Run a sweep over fault configs and injection ticks.
pub fn run_sweep(config: SweepConfig) -> Result<(), RunnerError> {
    if config.fault_begin >= config.fault_end || config.fault_end == 0 {
        return Err(RunnerError::Config(
            "fault_begin must be less than fault_end, and fault_end non-zero".to_string(),
        ));
    }
    if config.max_num_sweep < 2 {
        return Err(RunnerError::Config(
            "max_num_sweep must be at least 2".to_string(),
        ));
    }
    if config.fault_begin + config.max_num_sweep >= config.fault_end {
        return Err(RunnerError::Config(
            "fault_begin + max_num_sweep must be less than fault_end".to_string(),
        ));
    }

    let graph = load_merged_graph(&config.graph)?;
    let ticks = injection_ticks(config.fault_begin, config.fault_end, config.max_num_sweep);
    let faults = fault_files(&config.fault_dir)?;
    if faults.is_empty() {
        return Err(RunnerError::Config(format!(
            "no fault config files found in {}",
            config.fault_dir.display()
        )));
    }

    eprintln!(
        "Sweeping {} fault config(s) across {} injection tick(s)",
        faults.len(),
        ticks.len()
    );

    std::fs::create_dir_all(&config.output_dir)?;
    for fault_path in &faults {
        let stem = fault_path
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(|| {
                RunnerError::Config(format!("bad fault file name: {}", fault_path.display()))
            })?;
        let subdir = config.output_dir.join(stem);
        std::fs::create_dir_all(&subdir)?;

        dataset::export_edge_index(&subdir.join("edge_index.csv"), &graph)?;

        for &inject_at in &ticks {
            let mut fault_config = load_fault(fault_path)?;
            fault_config.inject_at = inject_at;
            let fault = fault_config.resolve(&graph)?;

            let mut executor =
                Executor::new(graph.clone(), Some(fault.clone()), config.stop, config.seed);
            executor.run();

            dataset::export_node_features(
                &subdir.join(format!("node_feature_inject_at_{}.csv", inject_at)),
                executor.graph(),
                executor.feature_rows(),
            )?;
            dataset::export_fault_label(
                &subdir.join(format!("fault_label_inject_at_{}.csv", inject_at)),
                &fault,
            )?;

            if config.verbose {
                eprintln!("  {} @ inject_at={}", stem, inject_at);
            }
        }
    }

    Ok(())
}

// ============================================================================
// Main Entry Point
// ============================================================================

fn main() -> Result<(), RunnerError> {
    // Initialize tracing subscriber with RUST_LOG env filter.
    // Default to "warn" level if RUST_LOG is not set.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run(config) => run_simulation(config),
        Commands::Sweep(config) => run_sweep(config),
    }
}
