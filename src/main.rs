use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use bkmond::adapters;
use bkmond::config::AppConfig;
use bkmond::context::AppContext;
use bkmond::core::orchestrator::StartOutcome;
use bkmond::daemon::Daemon;
use bkmond::logging;
use clap::{Args, Parser, Subcommand};
use serde::Serialize;

#[derive(Parser)]
#[command(name = "bkmond")]
#[command(about = "Triggered backup daemon for embedded devices", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Use the simulated power adapter (battery driven from stdin)
    #[arg(long, global = true)]
    simulation: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the background monitor until interrupted
    Daemon(DaemonArgs),
    /// Run one manually triggered backup job and exit
    Backup,
    /// Print the tail of the audit log
    Status,
}

#[derive(Args, Serialize)]
struct DaemonArgs {
    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long)]
    backup_base: Option<PathBuf>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long)]
    battery_threshold: Option<u8>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long)]
    monitoring_interval_secs: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long)]
    verbose: Option<bool>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.command {
        Commands::Daemon(args) => AppConfig::load(Some(args))?,
        _ => AppConfig::load(None::<&DaemonArgs>)?,
    };

    logging::init(logging::LogConfig {
        json: false,
        verbose: config.verbose,
    });

    let simulation = cli.simulation || config.simulation;

    match cli.command {
        Commands::Daemon(_) => run_daemon(config, simulation)
            .await
            .context("Failed to run daemon")?,
        Commands::Backup => run_backup(config).await.context("Failed to run backup")?,
        Commands::Status => run_status(&config)?,
    }

    Ok(())
}

async fn run_daemon(config: AppConfig, simulation: bool) -> Result<()> {
    let ctx = AppContext::new(config);
    let adapter = adapters::get_adapter(simulation);

    let mut daemon = Daemon::new(ctx, adapter);
    daemon.start()?;

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    println!("Shutting down, waiting for the current task to finish...");
    daemon.stop().await;

    Ok(())
}

/// One-shot manual trigger for external control surfaces.
async fn run_backup(config: AppConfig) -> Result<()> {
    let ctx = AppContext::new(config);
    let adapter = adapters::get_adapter(true);

    let mut daemon = Daemon::new(ctx, adapter);
    daemon.start()?;

    match daemon.trigger_manual() {
        StartOutcome::Accepted => {
            let orchestrator = daemon.orchestrator();
            orchestrator.wait_idle().await;
            match orchestrator.last_job() {
                Some(job) => println!(
                    "Backup {}: {} files, {} bytes, {} errors",
                    job.status, job.files_copied, job.bytes_copied, job.error_count
                ),
                None => println!("Backup produced no result"),
            }
        }
        StartOutcome::Rejected => println!("Backup rejected: a job is already running"),
    }

    daemon.stop().await;
    Ok(())
}

fn run_status(config: &AppConfig) -> Result<()> {
    const TAIL_LINES: usize = 20;

    let content = match fs::read_to_string(&config.audit_log_path) {
        Ok(content) => content,
        Err(_) => {
            println!("No audit log at {}", config.audit_log_path.display());
            return Ok(());
        }
    };

    let lines: Vec<&str> = content.lines().collect();
    let start = lines.len().saturating_sub(TAIL_LINES);
    for line in &lines[start..] {
        println!("{line}");
    }

    Ok(())
}
