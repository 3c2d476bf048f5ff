mod config;
mod executor;

use cadence_core::{BroadcastEventBus, SchedulingError};
use cadence_orchestrator::{
    build_graph, schedule, Orchestrator, TaskDescriptor, WorkflowResult, WorkflowState,
};
use clap::{Parser, Subcommand};
use config::CadenceConfig;
use executor::CliExecutor;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "cadence", about = "Cadence: wave-based workflow orchestrator")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "cadence.toml")]
    config: PathBuf,

    /// Checkpoint directory (overrides config)
    #[arg(long, global = true)]
    checkpoint_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the wave layout of a task file without running it
    Plan {
        /// JSON array of tasks
        #[arg(short, long)]
        tasks: PathBuf,
    },
    /// Execute a task file
    Run {
        #[arg(short, long)]
        tasks: PathBuf,
        /// Workflow id (generated when omitted)
        #[arg(long)]
        workflow_id: Option<String>,
        /// Do not write checkpoints
        #[arg(long)]
        no_checkpoints: bool,
        /// Maximum concurrent tasks per wave (overrides config)
        #[arg(long)]
        max_parallel: Option<usize>,
    },
    /// Resume a workflow from a checkpoint with the tasks still to run
    Resume {
        #[arg(long)]
        checkpoint: String,
        #[arg(short, long)]
        tasks: PathBuf,
        #[arg(long)]
        max_parallel: Option<usize>,
    },
    /// Manage checkpoints
    Checkpoints {
        #[command(subcommand)]
        action: CheckpointAction,
    },
}

#[derive(Subcommand)]
enum CheckpointAction {
    /// List checkpoints of a workflow, oldest first
    List {
        #[arg(long)]
        workflow: String,
    },
    /// Print a checkpoint
    Show { id: String },
    /// Delete all but the newest checkpoints of a workflow
    Cleanup {
        #[arg(long)]
        workflow: String,
        #[arg(long)]
        keep: usize,
    },
}

#[derive(Serialize)]
struct Plan {
    tasks: usize,
    waves: Vec<Vec<String>>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    let cli = Cli::parse();
    let mut config = CadenceConfig::load(&cli.config).await?;
    if let Some(dir) = cli.checkpoint_dir {
        config.orchestrator.checkpoint_dir = dir;
    }

    match cli.command {
        Commands::Plan { tasks } => {
            let tasks = read_tasks(&tasks).await?;
            let layout = plan(&tasks)?;
            println!("{}", serde_json::to_string_pretty(&layout)?);
        }
        Commands::Run {
            tasks,
            workflow_id,
            no_checkpoints,
            max_parallel,
        } => {
            if no_checkpoints {
                config.orchestrator.enable_checkpoints = false;
            }
            if max_parallel.is_some() {
                config.orchestrator.max_parallel = max_parallel;
            }
            let tasks = read_tasks(&tasks).await?;
            let (orch, events) = build_orchestrator(&config)?;
            let result = orch.execute_wave_based(&tasks, workflow_id).await;
            shutdown(orch, events).await;
            report(result?)?;
        }
        Commands::Resume {
            checkpoint,
            tasks,
            max_parallel,
        } => {
            if max_parallel.is_some() {
                config.orchestrator.max_parallel = max_parallel;
            }
            let tasks = read_tasks(&tasks).await?;
            let (orch, events) = build_orchestrator(&config)?;
            let result = orch.resume_workflow(&checkpoint, &tasks).await;
            shutdown(orch, events).await;
            report(result?)?;
        }
        Commands::Checkpoints { action } => {
            let (orch, _) = build_orchestrator(&CadenceConfig {
                events: Default::default(),
                ..config
            })?;
            match action {
                CheckpointAction::List { workflow } => {
                    let entries = orch.list_checkpoints(&workflow).await?;
                    if entries.is_empty() {
                        println!("No checkpoints for workflow '{workflow}'.");
                    } else {
                        for entry in &entries {
                            println!(
                                "  {}  wave {}  {}",
                                entry.checkpoint_id,
                                entry.wave_id,
                                entry.path.display()
                            );
                        }
                        println!("\nTotal: {} checkpoint(s)", entries.len());
                    }
                }
                CheckpointAction::Show { id } => {
                    let checkpoint = orch.load_checkpoint(&id).await?;
                    println!("{}", serde_json::to_string_pretty(&checkpoint)?);
                }
                CheckpointAction::Cleanup { workflow, keep } => {
                    let removed = orch.cleanup_old_checkpoints(&workflow, keep).await?;
                    println!("Removed {removed} checkpoint(s) for workflow '{workflow}'.");
                }
            }
        }
    }

    Ok(())
}

async fn read_tasks(path: &Path) -> anyhow::Result<Vec<TaskDescriptor>> {
    let raw = tokio::fs::read_to_string(path).await.map_err(|e| {
        anyhow::anyhow!("Failed to read task file '{}': {e}", path.display())
    })?;
    let tasks: Vec<TaskDescriptor> = serde_json::from_str(&raw)
        .map_err(|e| anyhow::anyhow!("Invalid task file '{}': {e}", path.display()))?;
    Ok(tasks)
}

fn plan(tasks: &[TaskDescriptor]) -> Result<Plan, SchedulingError> {
    let waves = schedule(&build_graph(tasks))?;
    Ok(Plan {
        tasks: tasks.len(),
        waves,
    })
}

fn build_orchestrator(
    config: &CadenceConfig,
) -> anyhow::Result<(Orchestrator, Option<JoinHandle<()>>)> {
    let orch = Orchestrator::new(config.orchestrator.clone(), Arc::new(CliExecutor::new()))?;
    if !config.events.enabled {
        return Ok((orch, None));
    }

    let bus = Arc::new(BroadcastEventBus::new(config.events.capacity));
    let mut rx = bus.subscribe();
    let logger = tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    info!(topic = %event.topic, payload = %event.payload, "Workflow event");
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Event logger lagged behind");
                }
                Err(RecvError::Closed) => break,
            }
        }
    });
    Ok((orch.with_event_bus(bus), Some(logger)))
}

/// Drop the orchestrator (and with it the bus sender) and let the event
/// logger drain what is left.
async fn shutdown(orch: Orchestrator, events: Option<JoinHandle<()>>) {
    drop(orch);
    if let Some(logger) = events {
        if let Err(e) = logger.await {
            warn!(error = %e, "Event logger stopped abnormally");
        }
    }
}

fn report(result: WorkflowResult) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(&result)?);
    if result.state == WorkflowState::Failed {
        anyhow::bail!(
            "workflow {} failed: {}",
            result.workflow_id,
            result
                .errors
                .iter()
                .map(|(k, v)| format!("{k}: {v}"))
                .collect::<Vec<_>>()
                .join("; ")
        );
    }
    Ok(())
}
