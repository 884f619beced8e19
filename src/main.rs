//! slotq CLI
//!
//! Entry point for the `slotq` command-line tool.

use clap::{Parser, Subcommand};
use serde_json::{Map, Value};
use slotq::config::{locate_config, EffectiveConfig, Settings};
use slotq::status::{format_job_line, write_queue, PlainReporter};
use slotq::{
    jobs_for_plan, run_queue, JobGraph, QueueStore, RunOptions, RunOutcome, ShutdownToken,
    SignalHandler,
};
use slotq_exec::{ExecutionAdapter, ProcessAdapter};
use slotq_stage::{classify, Stage};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "slotq")]
#[command(about = "Slot-weighted, dependency-aware local job queue", version)]
struct Cli {
    /// Queue file (default: $SLOTQ_QUEUE_FILE, then config, then the temp dir)
    #[arg(long, global = true)]
    queue_file: Option<PathBuf>,

    /// Config file (default: $SLOTQ_CONFIG or ~/.config/slotq/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the queue
    List {
        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Queue a payload as one job, or two chained jobs
    Add {
        /// Run as one named stage (single, first, second)
        #[arg(long)]
        stage: Option<String>,

        /// Working directory for the job (default: current directory)
        #[arg(long)]
        cwd: Option<PathBuf>,

        /// The command to queue (after --)
        #[arg(last = true, required = true)]
        payload: Vec<String>,
    },

    /// Remove jobs by index
    Remove {
        #[arg(required = true)]
        indices: Vec<usize>,
    },

    /// Remove every job
    Clear,

    /// Return jobs to waiting by index
    Reset {
        #[arg(required = true)]
        indices: Vec<usize>,
    },

    /// Return every job that is not running to waiting
    #[command(alias = "reset_all")]
    ResetAll,

    /// Run queued jobs until the queue drains or an interrupt
    Run {
        /// Slot budget shared by running jobs
        max_slots: Option<u32>,

        /// Seconds between status redraws
        refresh_interval_secs: Option<u64>,

        /// Worker thread count (default: max_slots)
        #[arg(long)]
        workers: Option<usize>,
    },

    /// Print the effective configuration with its sources
    Config,
}

fn main() {
    init_tracing();
    let cli = Cli::parse();

    match &cli.command {
        Commands::List { json } => run_list(&cli, *json),
        Commands::Add { stage, cwd, payload } => {
            run_add(&cli, stage.as_deref(), cwd.as_deref(), payload);
        }
        Commands::Remove { indices } => run_remove(&cli, indices),
        Commands::Clear => run_clear(&cli),
        Commands::Reset { indices } => run_reset(&cli, indices),
        Commands::ResetAll => run_reset_all(&cli),
        Commands::Run {
            max_slots,
            refresh_interval_secs,
            workers,
        } => run_run(&cli, *max_slots, *refresh_interval_secs, *workers),
        Commands::Config => run_config(&cli),
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("SLOTQ_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn load_config(cli: &Cli, overrides: Option<Value>) -> EffectiveConfig {
    let path = match locate_config(cli.config.as_deref()) {
        Ok(path) => path,
        Err(e) => {
            eprintln!("Error loading config: {}", e);
            process::exit(1);
        }
    };
    match EffectiveConfig::build(path.as_deref(), overrides) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error loading config: {}", e);
            process::exit(1);
        }
    }
}

fn load_settings(cli: &Cli, overrides: Option<Value>) -> Settings {
    match load_config(cli, overrides).settings() {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Error loading config: {}", e);
            process::exit(1);
        }
    }
}

fn open_store(cli: &Cli, settings: &Settings) -> QueueStore {
    let path = cli
        .queue_file
        .clone()
        .unwrap_or_else(|| QueueStore::resolve_path(settings.queue_file.as_deref()));
    QueueStore::new(path)
}

fn save_or_exit(store: &QueueStore, graph: &JobGraph) {
    if let Err(e) = store.save_graph(graph) {
        eprintln!("Error saving queue {}: {}", store.path().display(), e);
        process::exit(1);
    }
}

fn run_list(cli: &Cli, json_output: bool) {
    let settings = load_settings(cli, None);
    let store = open_store(cli, &settings);
    let graph = store.load();

    if json_output {
        match serde_json::to_string_pretty(graph.list()) {
            Ok(json) => println!("{}", json),
            Err(e) => {
                eprintln!("Error serializing output: {}", e);
                process::exit(1);
            }
        }
        return;
    }

    let mut stdout = io::stdout().lock();
    if let Err(e) = write_queue(&mut stdout, graph.list()).and_then(|_| stdout.flush()) {
        eprintln!("Error writing output: {}", e);
        process::exit(1);
    }
}

fn run_add(cli: &Cli, stage: Option<&str>, cwd: Option<&Path>, payload: &[String]) {
    let settings = load_settings(cli, None);

    let stage = match stage.map(str::parse::<Stage>).transpose() {
        Ok(stage) => stage,
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    };
    let plan = match classify(payload, stage, &settings.stages) {
        Ok(plan) => plan,
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    };

    let working_dir = match resolve_working_dir(cwd) {
        Ok(dir) => dir,
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    };

    let store = open_store(cli, &settings);
    let mut graph = store.load();
    let first_index = graph.len();
    for job in jobs_for_plan(&plan, &working_dir) {
        if let Err(e) = graph.add(job) {
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    }
    save_or_exit(&store, &graph);

    for (index, job) in graph.list().iter().enumerate().skip(first_index) {
        println!("{}", format_job_line(index, job));
    }
}

fn resolve_working_dir(cwd: Option<&Path>) -> Result<PathBuf, String> {
    let current = std::env::current_dir()
        .map_err(|e| format!("cannot determine current directory: {}", e))?;
    let dir = match cwd {
        Some(dir) => current.join(dir),
        None => current,
    };
    if !dir.is_dir() {
        return Err(format!("working directory does not exist: {}", dir.display()));
    }
    Ok(dir)
}

fn run_remove(cli: &Cli, indices: &[usize]) {
    let settings = load_settings(cli, None);
    let store = open_store(cli, &settings);
    let mut graph = store.load();

    match graph.remove(indices) {
        Ok(removed) => {
            save_or_exit(&store, &graph);
            println!("Removed {} job(s)", removed.len());
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    }
}

fn run_clear(cli: &Cli) {
    let settings = load_settings(cli, None);
    let store = open_store(cli, &settings);
    let mut graph = store.load();
    let count = graph.len();
    graph.clear();
    save_or_exit(&store, &graph);
    println!("Removed {} job(s)", count);
}

fn run_reset(cli: &Cli, indices: &[usize]) {
    let settings = load_settings(cli, None);
    let store = open_store(cli, &settings);
    let mut graph = store.load();

    match graph.reset(indices) {
        Ok(count) => {
            save_or_exit(&store, &graph);
            println!("Reset {} job(s)", count);
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    }
}

fn run_reset_all(cli: &Cli) {
    let settings = load_settings(cli, None);
    let store = open_store(cli, &settings);
    let mut graph = store.load();
    let count = graph.reset_all();
    save_or_exit(&store, &graph);
    println!("Reset {} job(s)", count);
}

fn run_run(
    cli: &Cli,
    max_slots: Option<u32>,
    refresh_interval_secs: Option<u64>,
    workers: Option<usize>,
) {
    let mut overrides = Map::new();
    if let Some(max_slots) = max_slots {
        overrides.insert("max_slots".to_string(), max_slots.into());
    }
    if let Some(refresh) = refresh_interval_secs {
        overrides.insert("refresh_interval_secs".to_string(), refresh.into());
    }
    if let Some(workers) = workers {
        overrides.insert("workers".to_string(), workers.into());
    }
    let overrides = (!overrides.is_empty()).then(|| Value::Object(overrides));

    let settings = load_settings(cli, overrides);
    let store = open_store(cli, &settings);

    let shutdown = ShutdownToken::new();
    if let Err(e) = SignalHandler::new(shutdown.clone()).install() {
        eprintln!("Error installing signal handler: {}", e);
        process::exit(1);
    }

    let adapter: Arc<dyn ExecutionAdapter> =
        Arc::new(ProcessAdapter::new(settings.process_config()));
    let options = RunOptions::from_settings(&settings);
    let mut reporter = PlainReporter::new(io::stdout());

    match run_queue(store, &options, adapter, shutdown, &mut reporter) {
        Ok(outcome) => {
            if let RunOutcome::Interrupted(reason) = outcome {
                eprintln!("Run interrupted: {}", reason);
            }
            process::exit(outcome.exit_code());
        }
        Err(e) => {
            eprintln!("Run failed: {}", e);
            process::exit(1);
        }
    }
}

fn run_config(cli: &Cli) {
    let config = load_config(cli, None);
    if let Err(e) = config.settings() {
        eprintln!("Configuration error: {}", e);
        process::exit(1);
    }
    match config.to_json() {
        Ok(json) => println!("{}", json),
        Err(e) => {
            eprintln!("Error serializing output: {}", e);
            process::exit(1);
        }
    }
}
