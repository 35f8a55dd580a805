//! Drover CLI - autonomous coding-task executor
//!
//! Usage:
//!   drover serve                 Run the HTTP API and the task worker
//!   drover run <title>           Execute one task in the foreground
//!   drover config                Show the effective configuration
//!   drover config --init         Write a default .drover/config.toml

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use drover_agent::{AnthropicProvider, HubClient, ModelProvider};
use drover_core::{
    CompletionReport, ConfigUpdate, DroverConfig, OperatingMode, Priority, TaskSubmission,
};
use drover_orchestrator::{HubBridge, InMemoryTaskStore};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser)]
#[command(name = "drover")]
#[command(author, version, about = "Autonomous coding-task executor")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Project root every tool is confined to
    #[arg(short, long, global = true, default_value = ".")]
    project: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the HTTP API and process tasks in the background
    Serve {
        /// Address to listen on
        #[arg(long, default_value = "127.0.0.1:7878")]
        addr: String,
    },

    /// Run a single task to completion or pause
    Run {
        /// Task title
        title: String,

        /// Longer task description
        #[arg(short, long)]
        description: Option<String>,

        /// critical, high, medium or low
        #[arg(long)]
        priority: Option<Priority>,

        /// Override the iteration ceiling for this run
        #[arg(long)]
        max_iterations: Option<usize>,

        /// Acceptance criterion (repeatable)
        #[arg(long = "criteria", value_name = "CRITERION")]
        criteria: Vec<String>,
    },

    /// Show or initialize the configuration
    Config {
        /// Write the default config file instead of printing
        #[arg(long)]
        init: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Serve { addr } => cmd_serve(&cli.project, &addr).await,
        Commands::Run {
            title,
            description,
            priority,
            max_iterations,
            criteria,
        } => {
            let submission = TaskSubmission {
                title,
                description,
                priority,
                acceptance_criteria: (!criteria.is_empty()).then_some(criteria),
            };
            cmd_run(&cli.project, submission, max_iterations).await
        }
        Commands::Config { init } => cmd_config(&cli.project, init),
    }
}

fn load_config(project: &Path) -> Result<DroverConfig> {
    let root = project
        .canonicalize()
        .with_context(|| format!("Project root {} does not exist", project.display()))?;
    DroverConfig::load(&root).context("Failed to load configuration")
}

/// Build the bridge shared by `serve` and `run`
fn build_bridge(config: DroverConfig) -> Result<Arc<HubBridge>> {
    let provider: Arc<dyn ModelProvider> = Arc::new(
        AnthropicProvider::from_env(config.model.clone())
            .context("Failed to configure the model provider")?,
    );
    let context = config.load_project_context();
    let hub = HubClient::from_config(&config);

    let store = Arc::new(InMemoryTaskStore::with_terminal_limit(config.retained_tasks));
    let mut bridge = HubBridge::new(config.clone(), store, provider).with_project_context(context);

    if let Some(hub) = hub {
        let sweep_every = Duration::from_millis(config.cache.default_ttl_ms.max(1000));
        hub.cached_client().spawn_sweeper(sweep_every);
        info!("Hub enabled for agent {}", hub.agent_id());
        bridge = bridge.with_hub(hub);
    }

    Ok(Arc::new(bridge))
}

async fn cmd_serve(project: &Path, addr: &str) -> Result<()> {
    let config = load_config(project)?;
    info!(
        "Serving {} in {} mode",
        config.project_root.display(),
        config.mode
    );

    let bridge = build_bridge(config)?;
    let worker = bridge.spawn_worker();

    let stopper = Arc::clone(&bridge);
    let shutdown = async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Could not listen for ctrl-c: {}", e);
            std::future::pending::<()>().await;
        }
        info!("Shutting down");
        stopper.stop();
    };

    drover_server::serve(Arc::clone(&bridge), addr, shutdown).await?;
    bridge.stop();
    worker.await.context("Worker task panicked")?;
    Ok(())
}

async fn cmd_run(
    project: &Path,
    submission: TaskSubmission,
    max_iterations: Option<usize>,
) -> Result<()> {
    let mut config = load_config(project)?;
    config.mode = OperatingMode::Auto;

    let bridge = build_bridge(config)?;
    if max_iterations.is_some() {
        bridge
            .update_config(ConfigUpdate {
                max_iterations,
                ..Default::default()
            })
            .await
            .context("Invalid iteration ceiling")?;
    }

    let task = bridge.submit(submission).await?;
    info!("Running task {}: {}", task.id, task.title);

    let stopper = Arc::clone(&bridge);
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted; stopping after the current round");
            stopper.stop();
        }
    });

    let report = bridge.run_next().await?;
    interrupt.abort();

    let report = report.context("Submitted task was not runnable")?;
    print_report(&report)?;
    Ok(())
}

fn print_report(report: &CompletionReport) -> Result<()> {
    let outcome = if report.paused { "PAUSED" } else { "COMPLETED" };
    println!(
        "{} after {} round(s) ({:?})",
        outcome, report.iterations, report.stop_reason
    );
    println!();
    println!("{}", report.summary);
    println!();
    println!("{}", serde_json::to_string_pretty(report)?);
    Ok(())
}

fn cmd_config(project: &Path, init: bool) -> Result<()> {
    if init {
        let config_path = project.join(".drover/config.toml");
        if config_path.exists() {
            anyhow::bail!("{} already exists", config_path.display());
        }
        DroverConfig::write_default(project).context("Failed to write default config")?;
        println!("Wrote {}", config_path.display());
        return Ok(());
    }

    let config = load_config(project)?;
    let rendered =
        toml::to_string_pretty(&config.redacted()).context("Failed to render configuration")?;
    println!("{}", rendered);
    Ok(())
}
