// Entry point for the `runserver` harness.
//
// Gathers configuration (config file, environment, command line), then runs
// the server task: fetch the runtime through the cache, stage it together
// with the built plugin, and run it attached to this terminal. Exits with
// the server's own exit code, or 1 if the harness itself failed.

use anyhow::{Context, Result};
use clap::Parser;
use runserver_common::constants::{defaults, return_code};
use runserver_common::{HarnessConfig, HarnessConfigOverrides, HarnessTask, RunServerTask};
use runserver_sdk::{HarnessPackage, TracingTraceWriter};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Command-line arguments. Every setting is optional here; anything left
/// out falls back to the environment, then `runserver.json`, then defaults.
#[derive(Parser, Debug, Default)]
#[command(
    name = "runserver",
    version,
    about = "Run a server with the freshly built plugin installed"
)]
struct Args {
    /// URL of the server runtime artifact (http, https or file).
    #[arg(long)]
    url: Option<String>,

    /// Start the runtime with a debugger listening on port 5005.
    #[arg(long)]
    debug: bool,

    /// Path of the built plugin artifact.
    #[arg(long)]
    plugin: Option<PathBuf>,

    /// Base directory for relative paths and `runserver.json`.
    #[arg(long = "project-dir")]
    project_dir: Option<PathBuf>,

    /// Read settings from this file instead of `<project-dir>/runserver.json`.
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long = "run-dir")]
    run_dir: Option<PathBuf>,

    #[arg(long = "cache-dir")]
    cache_dir: Option<PathBuf>,

    /// File name the runtime is staged under.
    #[arg(long = "runtime-file-name")]
    runtime_file_name: Option<String>,

    /// Java executable to start the runtime with.
    #[arg(long)]
    java: Option<String>,

    /// Extra JVM argument, placed before the debug flag. Repeatable.
    #[arg(long = "jvm-arg", allow_hyphen_values = true)]
    jvm_args: Vec<String>,
}

impl Args {
    /// The command-line layer. Unset flags stay `None` so lower layers show
    /// through.
    fn overrides(&self) -> HarnessConfigOverrides {
        HarnessConfigOverrides {
            url: self.url.clone(),
            debug: self.debug.then_some(true),
            plugin: self.plugin.clone(),
            project_dir: self.project_dir.clone(),
            run_dir: self.run_dir.clone(),
            cache_dir: self.cache_dir.clone(),
            runtime_file_name: self.runtime_file_name.clone(),
            java: self.java.clone(),
            jvm_args: (!self.jvm_args.is_empty()).then(|| self.jvm_args.clone()),
        }
    }
}

/// Merge defaults, config file, environment and command line, lowest first.
fn load_config<F>(args: &Args, env: F) -> Result<HarnessConfig>
where
    F: Fn(&str) -> Option<String>,
{
    let project_dir = args
        .project_dir
        .clone()
        .unwrap_or_else(|| PathBuf::from(defaults::PROJECT_DIR));
    let file = HarnessConfigOverrides::discover(&project_dir, args.config.as_deref())?;
    let env = HarnessConfigOverrides::from_env_with(env)?;

    let merged = file.merge(env).merge(args.overrides());
    HarnessConfig::from_overrides(merged).context("Invalid runserver configuration")
}

fn main() {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            tracing::error!("Failed to build Tokio runtime: {e}");
            std::process::exit(return_code::FATAL_ERROR);
        }
    };

    let exit_code = runtime.block_on(run(args));

    // Tokio's stdin reader may still be parked in a blocking read of the
    // terminal; exiting here does not wait for it.
    std::process::exit(exit_code);
}

async fn run(args: Args) -> i32 {
    tracing::info!(
        "runserver {} ({})",
        HarnessPackage::VERSION,
        HarnessPackage::COMMIT_HASH
    );

    let config = match load_config(&args, |key| std::env::var(key).ok()) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("{e:#}");
            return return_code::FATAL_ERROR;
        }
    };

    let trace = Arc::new(TracingTraceWriter::new("RunServer"));
    let task = match RunServerTask::with_default_fetcher(config, trace) {
        Ok(task) => Arc::new(task),
        Err(e) => {
            tracing::error!("{e:#}");
            return return_code::FATAL_ERROR;
        }
    };

    install_interrupt_handler(task.clone());
    log_inputs(task.as_ref());

    let exit_code = match task.execute().await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!("Task '{}' failed: {e:#}", task.name());
            return_code::FATAL_ERROR
        }
    };
    task.on_orchestrator_ending();
    exit_code
}

/// First Ctrl+C asks the server to stop; a second one gives up waiting.
fn install_interrupt_handler(task: Arc<dyn HarnessTask>) {
    let presses = AtomicUsize::new(0);
    let result = ctrlc::set_handler(move || {
        if presses.fetch_add(1, Ordering::SeqCst) == 0 {
            task.on_orchestrator_ending();
        } else {
            tracing::warn!("Interrupted again, exiting without waiting for the server.");
            std::process::exit(return_code::INTERRUPTED);
        }
    });
    if let Err(e) = result {
        tracing::warn!("Failed to install Ctrl+C handler: {e}");
    }
}

fn log_inputs(task: &dyn HarnessTask) {
    tracing::info!("Running task '{}'", task.name());
    let inputs = task.inputs();
    match serde_json::to_string(&inputs) {
        Ok(json) => tracing::debug!(inputs = %json, "Task inputs"),
        Err(e) => tracing::debug!("Failed to serialize task inputs: {e}"),
    }
    for (name, value) in inputs.iter() {
        tracing::info!("  {name} = {value}");
    }
}
