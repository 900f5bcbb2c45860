use std::path::{Path, PathBuf};
use std::sync::Arc;

use lec_adapters::champions::parse_champion_table;
use lec_adapters::{
    parse_game_log, BundleChampionSource, BundleRosterSource, CsvLogOptions, DirectoryCsvDrop,
};
use lec_core::{ChampionEntry, EntityKind, GameRow, IdentityMap};
use lec_storage::{EntityCounts, MemoryIdentityBackend, MemoryStore, Store};
use lec_sync::{
    partition_rows, BulkIngestor, LoadReport, PipelineSettings, ReconciliationLoader, RunSources,
    RunState, RunStatus, RunTrigger, SyncConfig, UpdateOrchestrator,
};
use tempfile::tempdir;

const DROP_FILE: &str = "2025_LoL_esports_match_data_from_OraclesElixir.csv";
const FNATIC_KEY: &str = "oe:team:78f183fa5a7d8ecb22b9ad272c3abd79";

fn workspace_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("../..")
        .canonicalize()
        .expect("workspace root")
}

fn settings() -> PipelineSettings {
    PipelineSettings::load(&workspace_root().join("config").join("pipeline.yaml")).expect("pipeline settings")
}

fn lec_rows() -> Vec<GameRow> {
    let bytes = std::fs::read(workspace_root().join("fixtures/oracles-elixir/drop").join(DROP_FILE))
        .expect("fixture drop");
    let settings = settings();
    let options = CsvLogOptions {
        counter_columns: settings.objectives.clone(),
    };
    let parsed = parse_game_log(&bytes, &options).expect("decode");
    assert!(parsed.issues.is_empty(), "fixture rows decode cleanly");
    let (rows, report) = partition_rows(parsed.rows, &settings);
    assert_eq!(report.discarded_by_league.get("LCK"), Some(&12));
    rows
}

fn fixture_csv() -> String {
    std::fs::read_to_string(workspace_root().join("fixtures/oracles-elixir/drop").join(DROP_FILE))
        .expect("fixture drop")
}

fn champions() -> Vec<ChampionEntry> {
    let html = std::fs::read_to_string(workspace_root().join("fixtures/gol-gg/sample/champion_list.html"))
        .expect("champion page");
    parse_champion_table(&html).expect("champions")
}

async fn ingest_and_load(store: &dyn Store, rows: &[GameRow], identity: &mut IdentityMap) -> LoadReport {
    let batch = BulkIngestor::new(&settings())
        .with_year_hint(Some(2025))
        .ingest(rows, identity);
    let mut loader = ReconciliationLoader::new(store, 4).await.expect("loader");
    loader.load(&champions(), &batch).await
}

#[tokio::test]
async fn bo1_batch_loads_once_and_reruns_leave_counts_unchanged() {
    let store = MemoryStore::new();
    let mut identity = IdentityMap::new();
    let rows = lec_rows();
    assert_eq!(rows.len(), 12);

    let first = ingest_and_load(&store, &rows, &mut identity).await;
    assert!(first.failures.is_empty(), "{:?}", first.failures);
    let counts = store.counts().await.expect("counts");
    assert_eq!(counts.splits, 1);
    assert_eq!(counts.series, 1);
    assert_eq!(counts.teams, 2);
    assert_eq!(counts.players, 10);
    assert_eq!(counts.matches, 1);
    assert_eq!(counts.performances, 10);
    assert!((1..=10).contains(&counts.draft_selections));
    assert_eq!(counts.objective_tallies, 2);

    let tables = store.tables().await;
    let series = tables.series.values().next().expect("series");
    assert_eq!(series.id, "2025_winter_1");
    assert_eq!(series.split_id, "Winter_2025");
    assert_eq!(series.best_of, 1);
    assert_eq!(series.num_games, 1);

    let second = ingest_and_load(&store, &rows, &mut identity).await;
    assert_eq!(store.counts().await.expect("counts"), counts);
    assert_eq!(second.matches.inserted, 0);
    assert_eq!(second.series.already_present, 1);
    assert_eq!(second.performances.inserted, 0);
}

#[tokio::test]
async fn team_rows_without_id_resolve_to_the_named_team() {
    let store = MemoryStore::new();
    let mut identity = IdentityMap::new();
    let rows = lec_rows();
    ingest_and_load(&store, &rows, &mut identity).await;
    let fnatic = identity.lookup(EntityKind::Team, FNATIC_KEY).expect("fnatic id");

    let blanked: Vec<GameRow> = rows
        .into_iter()
        .map(|mut row| {
            if row.team_name.as_deref() == Some("Fnatic") {
                row.team_key = None;
            }
            row
        })
        .collect();
    let report = ingest_and_load(&store, &blanked, &mut identity).await;
    assert_eq!(report.matches.placeholders, 1);
    assert!(report.matches.omitted.is_empty());

    let tables = store.tables().await;
    assert_eq!(tables.teams.len(), 2);
    let stored = tables.matches.values().next().expect("match");
    assert_eq!(stored.red_team_id, fnatic);
    assert_eq!(tables.objective_tallies.len(), 2);
}

#[tokio::test]
async fn game_with_nine_players_keeps_match_but_no_performances() {
    let store = MemoryStore::new();
    let mut identity = IdentityMap::new();
    let mut rows = lec_rows();
    let dropped = rows
        .iter()
        .position(|r| r.team_name.as_deref() == Some("Fnatic") && r.is_player_row())
        .expect("fnatic player row");
    rows.remove(dropped);

    let report = ingest_and_load(&store, &rows, &mut identity).await;
    assert_eq!(report.performances.seen, 0);
    let counts = store.counts().await.expect("counts");
    assert_eq!(counts.matches, 1);
    assert_eq!(counts.performances, 0);
}

#[tokio::test]
async fn stored_matches_never_break_side_or_winner_integrity() {
    let store = MemoryStore::new();
    let mut identity = IdentityMap::new();
    let mut rows = lec_rows();
    // Both sides claim the same team: the match must be omitted, not stored.
    for row in rows.iter_mut() {
        row.team_key = Some(FNATIC_KEY.to_string());
        row.team_name = Some("Fnatic".to_string());
    }
    let report = ingest_and_load(&store, &rows, &mut identity).await;
    assert_eq!(store.counts().await.expect("counts").matches, 0);
    assert_eq!(report.matches.omitted.get("invalid match"), Some(&1));

    ingest_and_load(&store, &lec_rows(), &mut identity).await;
    for m in store.tables().await.matches.values() {
        m.validate().expect("valid match");
        assert_ne!(m.blue_team_id, m.red_team_id);
        assert!(m.winner_team_id == m.blue_team_id || m.winner_team_id == m.red_team_id);
    }
}

struct Harness {
    _dir: tempfile::TempDir,
    config: SyncConfig,
    store: Arc<MemoryStore>,
}

impl Harness {
    fn new(drop_csv: Option<String>) -> Self {
        let dir = tempdir().expect("tempdir");
        let drop_dir = dir.path().join("drop");
        std::fs::create_dir_all(&drop_dir).expect("drop dir");
        if let Some(csv) = drop_csv {
            std::fs::write(drop_dir.join(DROP_FILE), csv).expect("write drop");
        }
        let mut config = SyncConfig::for_workspace(dir.path());
        config.batch_size = 3;
        Self {
            _dir: dir,
            config,
            store: Arc::new(MemoryStore::new()),
        }
    }

    fn orchestrator(&self) -> UpdateOrchestrator {
        let root = workspace_root();
        let sources = RunSources {
            drop: Box::new(DirectoryCsvDrop::new(
                "oracles-elixir",
                self.config.workspace_root.join("drop"),
            )),
            roster: Some(Box::new(BundleRosterSource::new(
                "leaguepedia",
                root.join("fixtures/leaguepedia/sample/bundle.json"),
            ))),
            champions: Some(Box::new(BundleChampionSource::new(
                "gol-gg",
                root.join("fixtures/gol-gg/sample/bundle.json"),
            ))),
        };
        UpdateOrchestrator::new(
            self.config.clone(),
            settings(),
            sources,
            self.store.clone(),
            Arc::new(MemoryIdentityBackend::new()),
        )
        .expect("orchestrator")
    }

    fn csv_artifacts(&self) -> usize {
        walk(&self.config.artifacts_dir)
            .into_iter()
            .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("csv"))
            .count()
    }
}

fn walk(dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    entries
        .filter_map(|e| e.ok())
        .flat_map(|e| {
            let path = e.path();
            if path.is_dir() {
                walk(&path)
            } else {
                vec![path]
            }
        })
        .collect()
}

#[tokio::test]
async fn manual_run_loads_syncs_rosters_and_cleans_up() {
    let harness = Harness::new(Some(fixture_csv()));
    let orchestrator = harness.orchestrator();

    let summary = orchestrator.run(RunTrigger::Manual).await;
    assert_eq!(summary.status, RunStatus::Success, "{:?}", summary.failures);
    assert_eq!(
        summary.states,
        vec![
            RunState::Idle,
            RunState::Fetching,
            RunState::Partitioning,
            RunState::Ingesting,
            RunState::Loading,
            RunState::RosterSyncing,
            RunState::Cleanup,
            RunState::Idle,
        ]
    );
    assert!(summary.identities_flushed);
    assert!(summary.artifacts_removed >= 1);
    assert_eq!(harness.csv_artifacts(), 0);
    assert!(!harness.config.artifacts_dir.join(".run.lock").exists());

    let reports_dir = PathBuf::from(summary.reports_dir.clone().expect("reports dir"));
    assert!(reports_dir.join("run_summary.json").exists());
    assert!(reports_dir.join("daily_brief.md").exists());
    assert!(reports_dir.join("snapshots").join("matches.parquet").exists());

    let counts = harness.store.counts().await.expect("counts");
    assert_eq!(counts.matches, 1);
    assert_eq!(counts.performances, 10);

    let tables = harness.store.tables().await;
    let g2 = tables
        .teams
        .values()
        .find(|t| t.name == "G2 Esports")
        .expect("g2");
    assert!(g2.active);
    assert_eq!(g2.logo_ref.as_deref(), Some("images/teams/G2_Esportslogo_square.png"));
    let caps = tables.players.values().find(|p| p.handle == "Caps").expect("caps");
    assert_eq!(caps.real_name.as_deref(), Some("Rasmus Borregaard Winther"));
    let roster = summary.roster.expect("roster report");
    assert!(roster.teams_unmatched.contains(&"Misfits Gaming".to_string()));

    let again = orchestrator.run(RunTrigger::Scheduled).await;
    assert_eq!(again.status, RunStatus::Success);
    assert_eq!(harness.store.counts().await.expect("counts"), counts);
}

#[tokio::test]
async fn run_that_omits_records_reports_partial() {
    // A team with neither a known id nor a known name cannot be resolved.
    let drop = fixture_csv().replace(&format!("Fnatic,{FNATIC_KEY}"), "Nobody Esports,");
    let harness = Harness::new(Some(drop));
    let summary = harness.orchestrator().run(RunTrigger::Manual).await;

    assert_eq!(summary.status, RunStatus::Partial);
    assert_eq!(summary.status.exit_code(), 2);
    let load = summary.load.as_ref().expect("load report");
    assert_eq!(load.matches.omitted.get("team not found"), Some(&1));
    assert!(load.omitted_rows() > 0);
    assert!(summary.failures.iter().any(|f| f.starts_with("matches: 1 records omitted")));
    assert_eq!(summary.states.last(), Some(&RunState::Idle));
    assert!(!summary.states.contains(&RunState::Failed));
    assert_eq!(harness.store.counts().await.expect("counts").matches, 0);
}

#[tokio::test]
async fn empty_drop_fails_the_run_and_still_cleans_up() {
    let harness = Harness::new(None);
    let summary = harness.orchestrator().run(RunTrigger::Manual).await;
    assert_eq!(summary.status, RunStatus::Failed);
    assert_eq!(summary.status.exit_code(), 1);
    assert_eq!(
        summary.states,
        vec![
            RunState::Idle,
            RunState::Fetching,
            RunState::Failed,
            RunState::Cleanup,
            RunState::Idle,
        ]
    );
    assert_eq!(harness.store.counts().await.expect("counts"), EntityCounts::default());
}

#[tokio::test]
async fn held_lock_skips_the_run_without_touching_the_store() {
    let harness = Harness::new(Some(fixture_csv()));
    std::fs::create_dir_all(&harness.config.artifacts_dir).expect("artifacts dir");
    std::fs::write(harness.config.artifacts_dir.join(".run.lock"), "other-run").expect("lock");

    let summary = harness.orchestrator().run(RunTrigger::Scheduled).await;
    assert_eq!(summary.status, RunStatus::Skipped);
    assert_eq!(summary.status.exit_code(), 0);
    assert_eq!(harness.store.counts().await.expect("counts"), EntityCounts::default());
    assert!(harness.config.artifacts_dir.join(".run.lock").exists());
}
