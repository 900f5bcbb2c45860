//! One update run: fetch the newest drop, partition, ingest, load, sync rosters, clean up.
//!
//! Scheduled and manual runs go through [`UpdateOrchestrator::run`] with identical
//! semantics. Runs are single-flight: an in-process mutex plus a lock file in the
//! artifacts directory.

use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use lec_adapters::{
    parse_game_log, AdapterContext, ChampionSource, CsvDropSource, CsvLogOptions, DirectoryCsvDrop,
    RosterSource, RowIssue, SourceKind,
};
use lec_core::{ChampionEntry, MatchRecord};
use lec_storage::{
    ArtifactStore, HttpFetcher, IdentityBackend, LockOutcome, RunLock, StoredArtifact, Store,
};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::config::{
    champion_source_for, drop_source_for, roster_source_for, PipelineSettings, SourceRegistry,
    SyncConfig,
};
use crate::ingest::{BulkIngestor, IngestReport};
use crate::loader::{LoadReport, ReconciliationLoader};
use crate::partition::{partition_rows, PartitionReport};
use crate::report::write_run_reports;
use crate::roster::{RosterReport, RosterSync};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunState {
    Idle,
    Fetching,
    Partitioning,
    Ingesting,
    Loading,
    RosterSyncing,
    Cleanup,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunTrigger {
    Scheduled,
    Manual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunStatus {
    Success,
    /// Data was loaded but some source, batch or stage degraded.
    Partial,
    Failed,
    /// Another run held the lock; nothing was touched.
    Skipped,
}

impl RunStatus {
    pub fn exit_code(self) -> u8 {
        match self {
            RunStatus::Success | RunStatus::Skipped => 0,
            RunStatus::Failed => 1,
            RunStatus::Partial => 2,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FetchedDrop {
    pub source_id: String,
    pub file_id: String,
    pub file_name: String,
    pub created_at: Option<DateTime<Utc>>,
    pub bytes: usize,
    pub content_hash: String,
    pub artifact_path: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DecodeReport {
    pub rows: usize,
    pub malformed_rows: usize,
    pub issues: Vec<RowIssue>,
    pub missing_columns: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub trigger: RunTrigger,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub status: RunStatus,
    pub states: Vec<RunState>,
    pub fetched: Option<FetchedDrop>,
    pub decode: Option<DecodeReport>,
    pub partition: Option<PartitionReport>,
    pub ingest: Option<IngestReport>,
    pub identities_flushed: bool,
    pub champions_fetched: Option<usize>,
    pub load: Option<LoadReport>,
    pub roster: Option<RosterReport>,
    pub artifacts_removed: usize,
    pub failures: Vec<String>,
    pub reports_dir: Option<String>,
    /// Matches stored by this run; exported with the reports, not serialized.
    #[serde(skip)]
    pub loaded_matches: Vec<MatchRecord>,
}

impl RunSummary {
    pub(crate) fn new(run_id: Uuid, trigger: RunTrigger) -> Self {
        Self {
            run_id,
            trigger,
            started_at: Utc::now(),
            finished_at: None,
            status: RunStatus::Success,
            states: vec![RunState::Idle],
            fetched: None,
            decode: None,
            partition: None,
            ingest: None,
            identities_flushed: false,
            champions_fetched: None,
            load: None,
            roster: None,
            artifacts_removed: 0,
            failures: Vec::new(),
            reports_dir: None,
            loaded_matches: Vec::new(),
        }
    }

    fn enter(&mut self, state: RunState) {
        info!(run_id = %self.run_id, state = ?state, "run state");
        self.states.push(state);
    }

    /// Record a failure that leaves the run usable.
    fn degrade(&mut self, failure: String) {
        warn!(run_id = %self.run_id, failure = %failure, "run degraded");
        self.failures.push(failure);
        if self.status == RunStatus::Success {
            self.status = RunStatus::Partial;
        }
    }
}

pub const LOCAL_DROP_SOURCE_ID: &str = "local-drop";

/// Sources a run reads from. Only the drop is mandatory.
pub struct RunSources {
    pub drop: Box<dyn CsvDropSource>,
    pub roster: Option<Box<dyn RosterSource>>,
    pub champions: Option<Box<dyn ChampionSource>>,
}

impl RunSources {
    /// First enabled source of each kind in `sources.yaml`. `from_dir` replaces the bulk
    /// drop with a local directory under the same source id.
    pub fn from_registry(registry: &SourceRegistry, config: &SyncConfig, from_dir: Option<&Path>) -> Result<Self> {
        let bulk = registry.enabled(SourceKind::BulkCsv);
        let drop: Box<dyn CsvDropSource> = match (from_dir, bulk) {
            (Some(dir), source) => {
                let source_id = source.map_or(LOCAL_DROP_SOURCE_ID, |s| s.source_id.as_str());
                Box::new(DirectoryCsvDrop::new(source_id, dir))
            }
            (None, Some(source)) => drop_source_for(source, config)?,
            (None, None) => bail!("sources.yaml has no enabled bulk_csv source"),
        };
        let roster = registry
            .enabled(SourceKind::Roster)
            .map(|s| roster_source_for(s, config))
            .transpose()?;
        let champions = registry
            .enabled(SourceKind::Champions)
            .map(|s| champion_source_for(s, config))
            .transpose()?;
        Ok(Self {
            drop,
            roster,
            champions,
        })
    }
}

pub struct UpdateOrchestrator {
    config: SyncConfig,
    settings: PipelineSettings,
    sources: RunSources,
    store: Arc<dyn Store>,
    identity: Arc<dyn IdentityBackend>,
    http: HttpFetcher,
    artifacts: ArtifactStore,
    in_flight: Mutex<()>,
    write_reports: bool,
}

impl UpdateOrchestrator {
    pub fn new(
        config: SyncConfig,
        settings: PipelineSettings,
        sources: RunSources,
        store: Arc<dyn Store>,
        identity: Arc<dyn IdentityBackend>,
    ) -> Result<Self> {
        let http = HttpFetcher::new(config.http_client_config())?;
        let artifacts = ArtifactStore::new(config.artifacts_dir.clone());
        Ok(Self {
            config,
            settings,
            sources,
            store,
            identity,
            http,
            artifacts,
            in_flight: Mutex::new(()),
            write_reports: true,
        })
    }

    pub fn with_reports(mut self, enabled: bool) -> Self {
        self.write_reports = enabled;
        self
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub async fn run(&self, trigger: RunTrigger) -> RunSummary {
        let run_id = Uuid::new_v4();
        let span = info_span!("update_run", %run_id, trigger = ?trigger);
        self.run_with_id(run_id, trigger).instrument(span).await
    }

    async fn run_with_id(&self, run_id: Uuid, trigger: RunTrigger) -> RunSummary {
        let mut run = RunSummary::new(run_id, trigger);

        let Ok(_in_flight) = self.in_flight.try_lock() else {
            warn!("another run is in progress in this process");
            run.status = RunStatus::Skipped;
            run.failures.push("another run is in progress".to_string());
            return self.finish(run).await;
        };
        let acquired = RunLock::acquire(&self.config.artifacts_dir, run_id, self.config.lock_stale_after()).await;
        let lock = match acquired {
            Ok(LockOutcome::Acquired(lock)) => lock,
            Ok(LockOutcome::Held { path, holder }) => {
                warn!(path = %path.display(), holder = %holder, "run lock held; skipping run");
                run.status = RunStatus::Skipped;
                run.failures.push(format!("run lock held by {holder}"));
                return self.finish(run).await;
            }
            Err(err) => {
                error!(error = %format!("{err:#}"), "could not take run lock");
                run.status = RunStatus::Failed;
                run.failures.push(format!("run lock: {err:#}"));
                return self.finish(run).await;
            }
        };

        let mut stored: Option<StoredArtifact> = None;
        if let Err(err) = self.execute(&mut run, &mut stored).await {
            error!(error = %format!("{err:#}"), "run failed");
            run.enter(RunState::Failed);
            run.failures.push(format!("{err:#}"));
            run.status = RunStatus::Failed;
        }

        run.enter(RunState::Cleanup);
        self.cleanup(&mut run, stored.as_ref()).await;
        if let Err(err) = lock.release().await {
            warn!(error = %format!("{err:#}"), "releasing run lock failed");
        }
        run.enter(RunState::Idle);
        self.finish(run).await
    }

    async fn finish(&self, mut run: RunSummary) -> RunSummary {
        run.finished_at = Some(Utc::now());
        if self.write_reports {
            run.reports_dir = Some(
                self.config
                    .reports_dir
                    .join(run.run_id.to_string())
                    .display()
                    .to_string(),
            );
            if let Err(err) = write_run_reports(&self.config.reports_dir, &run).await {
                warn!(error = %format!("{err:#}"), "writing run reports failed");
                run.reports_dir = None;
            }
        }
        info!(
            status = ?run.status,
            failures = run.failures.len(),
            artifacts_removed = run.artifacts_removed,
            "run finished"
        );
        run
    }

    /// Stages up to roster sync. An `Err` is unrecoverable for this run; degraded stages
    /// are recorded on `run` instead.
    async fn execute(&self, run: &mut RunSummary, stored: &mut Option<StoredArtifact>) -> Result<()> {
        let ctx = AdapterContext::new(run.run_id);
        let drop_source = self.sources.drop.as_ref();

        run.enter(RunState::Fetching);
        let file = drop_source
            .latest(&self.http, &ctx)
            .await
            .with_context(|| format!("listing drop {}", drop_source.source_id()))?
            .with_context(|| format!("drop {} has no csv file", drop_source.source_id()))?;
        info!(file = %file.name, "newest drop file");
        let bytes = drop_source
            .download(&self.http, &ctx, &file)
            .await
            .with_context(|| format!("downloading {}", file.name))?;
        if bytes.is_empty() {
            bail!("drop file {} is empty", file.name);
        }
        let artifact = self
            .artifacts
            .store_bytes(ctx.fetched_at, drop_source.source_id(), "csv", &bytes)
            .await?;
        run.fetched = Some(FetchedDrop {
            source_id: drop_source.source_id().to_string(),
            file_id: file.id.clone(),
            file_name: file.name.clone(),
            created_at: file.created_at,
            bytes: bytes.len(),
            content_hash: artifact.content_hash.clone(),
            artifact_path: artifact.relative_path.display().to_string(),
        });
        *stored = Some(artifact);

        run.enter(RunState::Partitioning);
        let options = CsvLogOptions {
            counter_columns: self.settings.objectives.clone(),
        };
        let parsed = parse_game_log(&bytes, &options).with_context(|| format!("decoding {}", file.name))?;
        drop(bytes);
        run.decode = Some(DecodeReport {
            rows: parsed.rows.len(),
            malformed_rows: parsed.issues.len(),
            issues: parsed.issues.iter().take(50).cloned().collect(),
            missing_columns: parsed.missing_columns.clone(),
        });
        if !parsed.issues.is_empty() {
            run.degrade(format!("decode: {} malformed rows dropped", parsed.issues.len()));
        }
        let (rows, partition) = partition_rows(parsed.rows, &self.settings);
        run.partition = Some(partition);

        run.enter(RunState::Ingesting);
        let mut identity = self.identity.load_map().await.context("loading identity map")?;
        let batch = BulkIngestor::new(&self.settings)
            .with_year_hint(file.year_hint())
            .ingest(&rows, &mut identity);
        run.ingest = Some(batch.report.clone());
        if !batch.report.skipped_games.is_empty() {
            run.degrade(format!("ingest: {} games skipped", batch.report.skipped_games.len()));
        }
        run.identities_flushed = self
            .identity
            .flush(&mut identity)
            .await
            .context("persisting identity map; nothing loaded")?;

        run.enter(RunState::Loading);
        let champions = self.fetch_champions(run, &ctx).await;
        let mut loader = ReconciliationLoader::new(self.store.as_ref(), self.config.batch_size).await?;
        let load = loader.load(&champions, &batch).await;
        run.loaded_matches = batch
            .matches
            .iter()
            .filter(|m| loader.has_match(m.id))
            .cloned()
            .collect();
        for failure in &load.failures {
            run.degrade(failure.clone());
        }
        for (stage, counts) in load.stages() {
            if counts.omitted_total() > 0 {
                let reasons: Vec<String> = counts.omitted.iter().map(|(r, n)| format!("{r}: {n}")).collect();
                run.degrade(format!(
                    "{stage}: {} records omitted ({})",
                    counts.omitted_total(),
                    reasons.join(", ")
                ));
            }
        }
        run.load = Some(load);

        run.enter(RunState::RosterSyncing);
        self.sync_rosters(run, &ctx).await;
        Ok(())
    }

    /// Failure keeps the stored catalog and degrades the run.
    async fn fetch_champions(&self, run: &mut RunSummary, ctx: &AdapterContext) -> Vec<ChampionEntry> {
        let Some(source) = self.sources.champions.as_ref() else {
            return Vec::new();
        };
        match source.fetch_champions(&self.http, ctx).await {
            Ok(entries) => {
                info!(source = source.source_id(), champions = entries.len(), "fetched champion catalog");
                run.champions_fetched = Some(entries.len());
                entries
            }
            Err(err) => {
                run.degrade(format!("champions {}: {err}", source.source_id()));
                Vec::new()
            }
        }
    }

    async fn sync_rosters(&self, run: &mut RunSummary, ctx: &AdapterContext) {
        let Some(source) = self.sources.roster.as_ref() else {
            return;
        };
        let snapshot = match source.fetch_roster(&self.http, ctx).await {
            Ok(snapshot) => snapshot,
            Err(err) => {
                run.degrade(format!("roster {}: {err}", source.source_id()));
                return;
            }
        };
        let sync = RosterSync::new(self.store.as_ref(), self.config.batch_size);
        match sync.apply(&snapshot).await {
            Ok(report) => {
                for failure in &report.failures {
                    run.degrade(failure.clone());
                }
                run.roster = Some(report);
            }
            Err(err) => run.degrade(format!("roster sync: {err:#}")),
        }
    }

    /// Always runs: removes this run's download and any leftovers of earlier runs.
    async fn cleanup(&self, run: &mut RunSummary, stored: Option<&StoredArtifact>) {
        if let Some(artifact) = stored {
            match self.artifacts.remove(artifact).await {
                Ok(true) => run.artifacts_removed += 1,
                Ok(false) => {}
                Err(err) => warn!(error = %format!("{err:#}"), "removing run artifact failed"),
            }
        }
        match self.artifacts.purge_source(self.sources.drop.source_id(), "csv").await {
            Ok(removed) => run.artifacts_removed += removed,
            Err(err) => warn!(error = %format!("{err:#}"), "purging stale artifacts failed"),
        }
    }
}

/// Cron job that triggers a scheduled run on `cron` (six-field, seconds first).
pub async fn build_scheduler(orchestrator: Arc<UpdateOrchestrator>, cron: &str) -> Result<JobScheduler> {
    let sched = JobScheduler::new().await.context("creating scheduler")?;
    let job = Job::new_async(cron, move |_uuid, _l| {
        let orchestrator = Arc::clone(&orchestrator);
        Box::pin(async move {
            let summary = orchestrator.run(RunTrigger::Scheduled).await;
            info!(run_id = %summary.run_id, status = ?summary.status, "scheduled run complete");
        })
    })
    .with_context(|| format!("creating scheduler job for cron {cron}"))?;
    sched.add(job).await.context("adding scheduler job")?;
    Ok(sched)
}
