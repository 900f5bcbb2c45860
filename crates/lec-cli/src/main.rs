use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use lec_storage::PgStore;
use lec_sync::{RunOptions, SyncConfig};
use tracing::info;
use tracing_subscriber::{fmt::SubscriberBuilder, EnvFilter};

#[derive(Debug, Parser)]
#[command(name = "lec-cli")]
#[command(about = "LEC stats ingestion and reconciliation pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run one update now.
    Sync {
        /// Read the newest CSV drop from a local directory.
        #[arg(long)]
        from_dir: Option<PathBuf>,
        /// Use an in-memory store; the database is never touched.
        #[arg(long)]
        dry_run: bool,
    },
    /// Run updates on the configured cron schedule until interrupted.
    Schedule,
    /// Apply database migrations.
    Migrate,
    /// Print a markdown digest of recent runs.
    Report {
        #[arg(long, default_value_t = 5)]
        runs: usize,
    },
}

fn init_tracing(default_filter: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    SubscriberBuilder::default()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to initialize tracing: {e}"))
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    init_tracing("info,lec_sync=info")?;
    let cli = Cli::parse();

    let command = cli.command.unwrap_or(Commands::Sync {
        from_dir: None,
        dry_run: false,
    });
    match command {
        Commands::Sync { from_dir, dry_run } => {
            let summary = lec_sync::run_sync_once_from_env(&RunOptions { from_dir, dry_run }).await?;
            println!(
                "sync {:?}: run_id={} matches={} performances={} reports={}",
                summary.status,
                summary.run_id,
                summary.load.as_ref().map(|l| l.matches.inserted + l.matches.updated).unwrap_or(0),
                summary.load.as_ref().map(|l| l.performances.inserted).unwrap_or(0),
                summary.reports_dir.as_deref().unwrap_or("-"),
            );
            for failure in &summary.failures {
                eprintln!("  failure: {failure}");
            }
            return Ok(ExitCode::from(summary.status.exit_code()));
        }
        Commands::Schedule => {
            let config = SyncConfig::from_env();
            let cron = config.scheduler_cron.clone();
            let orchestrator = lec_sync::orchestrator_from_config(config, &RunOptions::default()).await?;
            let sched = lec_sync::build_scheduler(Arc::new(orchestrator), &cron).await?;
            sched.start().await.context("starting scheduler")?;
            info!(%cron, "scheduler started");
            tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
            info!("shutting down scheduler");
        }
        Commands::Migrate => {
            let config = SyncConfig::from_env();
            let store = PgStore::connect(&config.database_url).await?;
            store.migrate().await?;
            println!("migrations applied");
        }
        Commands::Report { runs } => {
            let config = SyncConfig::from_env();
            print!("{}", lec_sync::report_daily_markdown(runs, &config.reports_dir)?);
        }
    }

    Ok(ExitCode::SUCCESS)
}
