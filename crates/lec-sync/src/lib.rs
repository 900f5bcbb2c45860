//! LEC update pipeline: partition, ingest, reconcile, roster sync and run orchestration.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use lec_storage::{
    IdentityBackend, JsonFileIdentityBackend, MemoryIdentityBackend, MemoryStore, PgStore, Store,
};
use tracing::info;

pub mod config;
pub mod ingest;
pub mod loader;
pub mod orchestrator;
pub mod partition;
pub mod report;
pub mod roster;

pub use config::{PipelineSettings, RoleFallbackPolicy, SourceConfig, SourceMode, SourceRegistry, SyncConfig};
pub use ingest::{BulkIngestor, GameRecord, IngestReport, IngestedBatch, SkippedGame};
pub use loader::{LoadReport, ReconciliationLoader, StageCounts};
pub use orchestrator::{
    build_scheduler, RunSources, RunState, RunStatus, RunSummary, RunTrigger, UpdateOrchestrator,
};
pub use partition::{partition_rows, PartitionReport};
pub use report::{report_daily_markdown, write_run_reports};
pub use roster::{RosterReport, RosterSync};

pub const CRATE_NAME: &str = "lec-sync";

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Read the bulk drop from this directory instead of the configured source.
    pub from_dir: Option<PathBuf>,
    /// In-memory store and identity map; nothing outside the reports directory is written.
    pub dry_run: bool,
}

/// Orchestrator wired from `sources.yaml`, `config/pipeline.yaml` and the environment.
pub async fn orchestrator_from_config(config: SyncConfig, options: &RunOptions) -> Result<UpdateOrchestrator> {
    let registry = SourceRegistry::load(&config.sources_path())?;
    let settings = PipelineSettings::load(&config.pipeline_path())?;
    let sources = RunSources::from_registry(&registry, &config, options.from_dir.as_deref())?;

    let (store, identity): (Arc<dyn Store>, Arc<dyn IdentityBackend>) = if options.dry_run {
        info!("dry run: using in-memory store and identity map");
        (Arc::new(MemoryStore::new()), Arc::new(MemoryIdentityBackend::new()))
    } else {
        (
            Arc::new(PgStore::connect(&config.database_url).await?),
            Arc::new(JsonFileIdentityBackend::new(config.identity_dir.clone())),
        )
    };
    UpdateOrchestrator::new(config, settings, sources, store, identity)
}

pub async fn run_sync_once_from_env(options: &RunOptions) -> Result<RunSummary> {
    let orchestrator = orchestrator_from_config(SyncConfig::from_env(), options).await?;
    Ok(orchestrator.run(RunTrigger::Manual).await)
}
