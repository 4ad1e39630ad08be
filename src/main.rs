use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use serde_json::Value;

use flowsync::client::{ChannelStatus, HttpBackend, WsTransport};
use flowsync::config::Config;
use flowsync::execution::{Execution, ExecutionStatus, Tab, TabStore};
use flowsync::shutdown::ShutdownCoordinator;
use flowsync::sync::{ExecutionObserver, SyncConfig, SyncEngine};
use flowsync::telemetry;

const WATCH_TAB_ID: &str = "watch";

#[derive(Parser)]
#[command(name = "flowsync")]
#[command(about = "Follow workflow executions over push and poll channels", long_about = None)]
#[command(version)]
struct Cli {
    /// Config file (defaults to ~/.config/flowsync/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Follow one execution until it completes or fails
    Watch {
        /// Workflow ID the execution belongs to
        #[arg(short, long)]
        workflow: String,
        /// Execution ID to follow
        #[arg(short, long)]
        execution: String,
        /// Origin the push channel URL is derived from
        #[arg(long)]
        origin: Option<String>,
        /// Backend REST API root
        #[arg(long)]
        api_url: Option<String>,
        /// Fallback poll interval in milliseconds
        #[arg(long)]
        poll_interval_ms: Option<u64>,
    },
    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match cli.config.as_deref() {
        Some(path) => Config::load_from_path(path)?,
        None => Config::load(),
    };
    telemetry::init_tracing(&config.logging);

    match cli.command {
        Commands::Watch {
            workflow,
            execution,
            origin,
            api_url,
            poll_interval_ms,
        } => {
            let mut config = config;
            if let Some(origin) = origin {
                config.push.origin = origin;
            }
            if let Some(url) = api_url {
                config.backend.api_base_url = url;
            }
            if let Some(ms) = poll_interval_ms {
                config.poller.interval_ms = ms;
            }
            cmd_watch(&config, &workflow, &execution).await?
        }
        Commands::Config => cmd_config(&config)?,
    }

    Ok(())
}

fn cmd_config(config: &Config) -> anyhow::Result<()> {
    print!("{}", config.to_toml()?);
    Ok(())
}

/// Prints what does not land in the tab model.
struct ConsoleObserver;

impl ExecutionObserver for ConsoleObserver {
    fn on_completion(&self, _workflow_id: &str, execution_id: &str, result: &Value) {
        println!("[{}] result: {}", execution_id, result);
    }

    fn on_error(&self, _workflow_id: &str, execution_id: &str, message: &str) {
        eprintln!("[{}] error: {}", execution_id, message);
    }

    fn on_channel_status(&self, _workflow_id: &str, execution_id: &str, status: ChannelStatus) {
        println!("[{}] push channel {}", execution_id, status);
    }
}

async fn cmd_watch(config: &Config, workflow_id: &str, execution_id: &str) -> anyhow::Result<()> {
    let backend = HttpBackend::new(
        &config.backend.api_base_url,
        Duration::from_secs(config.backend.timeout_seconds),
    )?;

    let store = TabStore::new(vec![
        Tab::new(WATCH_TAB_ID, Some(workflow_id.to_string())).with_name(workflow_id)
    ]);
    let mut engine = SyncEngine::new(
        store.clone(),
        Arc::new(backend),
        Arc::new(WsTransport),
        SyncConfig::from(config),
    )
    .with_observer(Arc::new(ConsoleObserver));

    let shutdown = ShutdownCoordinator::new();
    shutdown.start_signal_listener();

    let mut changes = store.subscribe();
    engine.start();
    engine.handle_execution_start(Some(WATCH_TAB_ID), execution_id);

    println!(
        "Watching execution {} of workflow {} (Ctrl+C to stop)",
        execution_id, workflow_id
    );

    let mut printed_logs = 0;
    let mut last_status = None;

    loop {
        let current = store
            .snapshot()
            .first()
            .and_then(|tab| tab.execution(execution_id).cloned());
        let Some(current) = current else {
            println!("Execution {} is no longer tracked", execution_id);
            break;
        };

        for entry in current.logs.iter().skip(printed_logs) {
            println!("  {}", format_log(entry));
        }
        printed_logs = current.logs.len();

        if last_status != Some(current.status) {
            println!("[{}] status: {}", execution_id, current.status);
            last_status = Some(current.status);
        }
        if current.status.is_terminal() {
            print_summary(&current);
            break;
        }

        tokio::select! {
            _ = shutdown.wait_for_shutdown() => break,
            changed = changes.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }

    engine.shutdown().await?;
    Ok(())
}

fn format_log(entry: &Value) -> String {
    let message = entry.get("message").and_then(Value::as_str);
    let level = entry.get("level").and_then(Value::as_str).unwrap_or("INFO");
    match message {
        Some(message) => format!("{:<7} {}", level, message),
        None => entry.to_string(),
    }
}

fn print_summary(execution: &Execution) {
    println!();
    println!("{:<30} {:<12}", "NODE", "STATUS");
    println!("{}", "-".repeat(43));

    let mut nodes: Vec<_> = execution.nodes.iter().collect();
    nodes.sort_by(|a, b| a.0.cmp(b.0));
    for (node_id, state) in nodes {
        let status = state
            .get("status")
            .and_then(Value::as_str)
            .unwrap_or("-");
        println!("{:<30} {:<12}", node_id, status);
    }

    if let Some(completed_at) = execution.completed_at {
        let elapsed = completed_at - execution.started_at;
        println!();
        println!(
            "{} at {} ({}s)",
            if execution.status == ExecutionStatus::Completed {
                "Completed"
            } else {
                "Failed"
            },
            completed_at.format("%Y-%m-%d %H:%M:%S"),
            elapsed.num_seconds().max(0)
        );
    }
}
