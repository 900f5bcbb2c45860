//! Per-run reports under `reports/<run_id>/`: `run_summary.json`, `daily_brief.md` and
//! Parquet snapshots with a checksum manifest.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use arrow_array::{Int32Array, RecordBatch, StringArray, UInt64Array};
use arrow_schema::{DataType, Field as ArrowField, Schema};
use lec_core::MatchRecord;
use parquet::arrow::ArrowWriter;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::fs;

use crate::loader::LoadReport;
use crate::orchestrator::RunSummary;

pub const SUMMARY_FILE: &str = "run_summary.json";
pub const BRIEF_FILE: &str = "daily_brief.md";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParquetManifest {
    pub schema_version: u32,
    pub files: Vec<ParquetManifestFile>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParquetManifestFile {
    pub name: String,
    pub path: String,
    pub sha256: String,
    pub bytes: u64,
}

pub async fn write_run_reports(reports_root: &Path, run: &RunSummary) -> Result<PathBuf> {
    let reports_dir = reports_root.join(run.run_id.to_string());
    fs::create_dir_all(&reports_dir)
        .await
        .with_context(|| format!("creating {}", reports_dir.display()))?;

    let summary = serde_json::to_vec_pretty(run).context("serializing run summary")?;
    fs::write(reports_dir.join(SUMMARY_FILE), summary)
        .await
        .with_context(|| format!("writing {SUMMARY_FILE}"))?;
    fs::write(reports_dir.join(BRIEF_FILE), render_brief(run))
        .await
        .with_context(|| format!("writing {BRIEF_FILE}"))?;

    export_parquet_snapshots(&reports_dir, run).await?;
    Ok(reports_dir)
}

fn render_brief(run: &RunSummary) -> String {
    let mut lines = vec![
        "# LEC Daily Brief".to_string(),
        String::new(),
        format!("- Run ID: `{}`", run.run_id),
        format!("- Trigger: {:?}", run.trigger),
        format!("- Status: **{:?}**", run.status),
        format!("- Started: {}", run.started_at),
    ];
    if let Some(finished) = run.finished_at {
        lines.push(format!("- Finished: {finished}"));
    }
    let trail: Vec<String> = run.states.iter().map(|s| format!("{s:?}")).collect();
    lines.push(format!("- States: {}", trail.join(" → ")));
    if let Some(fetched) = &run.fetched {
        lines.push(format!("- Drop file: `{}` ({} bytes)", fetched.file_name, fetched.bytes));
    }
    if let Some(partition) = &run.partition {
        lines.push(format!(
            "- Rows: {} total, {} {}, {} discarded",
            partition.total_rows, partition.tracked_rows, partition.competition, partition.discarded_rows
        ));
    }
    if let Some(ingest) = &run.ingest {
        lines.push(format!(
            "- Games: {} ({} series, {} short, {} skipped)",
            ingest.games,
            ingest.series,
            ingest.short_games,
            ingest.skipped_games.len()
        ));
    }
    lines.push(format!("- Artifacts removed: {}", run.artifacts_removed));

    if let Some(load) = &run.load {
        lines.push(String::new());
        lines.push("## Stages".to_string());
        lines.push(String::new());
        lines.push("| stage | seen | inserted | updated | present | duplicates | omitted | placeholders | partial | failed |".to_string());
        lines.push("|---|---|---|---|---|---|---|---|---|---|".to_string());
        for (stage, c) in load.stages() {
            lines.push(format!(
                "| {stage} | {} | {} | {} | {} | {} | {} | {} | {} | {} |",
                c.seen,
                c.inserted,
                c.updated,
                c.already_present,
                c.duplicates,
                c.omitted_total(),
                c.placeholders,
                c.partial,
                c.failed
            ));
        }
    }

    if let Some(roster) = &run.roster {
        lines.push(String::new());
        lines.push("## Roster".to_string());
        lines.push(format!(
            "- Teams: {} seen, {} updated, {} unmatched",
            roster.teams_seen,
            roster.teams_updated,
            roster.teams_unmatched.len()
        ));
        lines.push(format!(
            "- Players: {} seen, {} updated, {} unmatched",
            roster.players_seen,
            roster.players_updated,
            roster.players_unmatched.len()
        ));
    }

    if !run.failures.is_empty() {
        lines.push(String::new());
        lines.push("## Failures".to_string());
        lines.extend(run.failures.iter().map(|f| format!("- {f}")));
    }
    lines.push(String::new());
    lines.join("\n")
}

async fn export_parquet_snapshots(reports_dir: &Path, run: &RunSummary) -> Result<PathBuf> {
    let snapshot_dir = reports_dir.join("snapshots");
    fs::create_dir_all(&snapshot_dir)
        .await
        .with_context(|| format!("creating {}", snapshot_dir.display()))?;

    let matches_path = snapshot_dir.join("matches.parquet");
    let stages_path = snapshot_dir.join("stage_counts.parquet");
    write_matches_parquet(&matches_path, &run.loaded_matches)?;
    write_stage_counts_parquet(&stages_path, run.load.as_ref())?;

    let manifest = ParquetManifest {
        schema_version: 1,
        files: vec![
            manifest_entry("matches", reports_dir, &matches_path)?,
            manifest_entry("stage_counts", reports_dir, &stages_path)?,
        ],
    };
    let manifest_path = snapshot_dir.join("manifest.json");
    let bytes = serde_json::to_vec_pretty(&manifest).context("serializing parquet manifest")?;
    fs::write(&manifest_path, bytes)
        .await
        .with_context(|| format!("writing {}", manifest_path.display()))?;
    Ok(manifest_path)
}

fn write_parquet(path: &Path, batch: RecordBatch) -> Result<()> {
    let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    let mut writer = ArrowWriter::try_new(file, batch.schema(), None)
        .with_context(|| format!("opening parquet writer {}", path.display()))?;
    writer
        .write(&batch)
        .with_context(|| format!("writing record batch {}", path.display()))?;
    writer
        .close()
        .with_context(|| format!("closing parquet writer {}", path.display()))?;
    Ok(())
}

fn write_matches_parquet(path: &Path, matches: &[MatchRecord]) -> Result<()> {
    let schema = Arc::new(Schema::new(vec![
        ArrowField::new("match_id", DataType::Utf8, false),
        ArrowField::new("game_key", DataType::Utf8, false),
        ArrowField::new("series_id", DataType::Utf8, false),
        ArrowField::new("game_order", DataType::Int32, false),
        ArrowField::new("played_at", DataType::Utf8, true),
        ArrowField::new("duration_secs", DataType::Int32, true),
        ArrowField::new("blue_team", DataType::Utf8, false),
        ArrowField::new("red_team", DataType::Utf8, false),
        ArrowField::new("winner_side", DataType::Utf8, false),
    ]));

    let ids = StringArray::from(matches.iter().map(|m| Some(m.id.to_string())).collect::<Vec<_>>());
    let game_keys = StringArray::from(matches.iter().map(|m| Some(m.game_key.as_str())).collect::<Vec<_>>());
    let series = StringArray::from(matches.iter().map(|m| Some(m.series_key.as_str())).collect::<Vec<_>>());
    let orders = Int32Array::from(matches.iter().map(|m| m.game_order).collect::<Vec<_>>());
    let played_at = StringArray::from(
        matches
            .iter()
            .map(|m| m.played_at.map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string()))
            .collect::<Vec<_>>(),
    );
    let durations = Int32Array::from(matches.iter().map(|m| m.duration_secs).collect::<Vec<_>>());
    let team_label = |t: &lec_core::TeamRef| t.name().map(str::to_string).unwrap_or_else(|| t.display_key());
    let blue = StringArray::from(matches.iter().map(|m| Some(team_label(&m.blue))).collect::<Vec<_>>());
    let red = StringArray::from(matches.iter().map(|m| Some(team_label(&m.red))).collect::<Vec<_>>());
    let winners = StringArray::from(matches.iter().map(|m| Some(m.winner.as_str())).collect::<Vec<_>>());

    let batch = RecordBatch::try_new(
        schema,
        vec![
            Arc::new(ids),
            Arc::new(game_keys),
            Arc::new(series),
            Arc::new(orders),
            Arc::new(played_at),
            Arc::new(durations),
            Arc::new(blue),
            Arc::new(red),
            Arc::new(winners),
        ],
    )
    .context("building matches record batch")?;
    write_parquet(path, batch)
}

fn write_stage_counts_parquet(path: &Path, load: Option<&LoadReport>) -> Result<()> {
    let stages = load.map(|l| l.stages().to_vec()).unwrap_or_default();
    let schema = Arc::new(Schema::new(vec![
        ArrowField::new("stage", DataType::Utf8, false),
        ArrowField::new("seen", DataType::UInt64, false),
        ArrowField::new("inserted", DataType::UInt64, false),
        ArrowField::new("updated", DataType::UInt64, false),
        ArrowField::new("already_present", DataType::UInt64, false),
        ArrowField::new("duplicates", DataType::UInt64, false),
        ArrowField::new("omitted", DataType::UInt64, false),
        ArrowField::new("placeholders", DataType::UInt64, false),
        ArrowField::new("partial", DataType::UInt64, false),
        ArrowField::new("failed", DataType::UInt64, false),
    ]));
    let column = |f: fn(&crate::loader::StageCounts) -> usize| {
        UInt64Array::from(stages.iter().map(|(_, c)| f(*c) as u64).collect::<Vec<_>>())
    };

    let names = StringArray::from(stages.iter().map(|(s, _)| Some(*s)).collect::<Vec<_>>());
    let batch = RecordBatch::try_new(
        schema,
        vec![
            Arc::new(names),
            Arc::new(column(|c| c.seen)),
            Arc::new(column(|c| c.inserted)),
            Arc::new(column(|c| c.updated)),
            Arc::new(column(|c| c.already_present)),
            Arc::new(column(|c| c.duplicates)),
            Arc::new(column(|c| c.omitted_total())),
            Arc::new(column(|c| c.placeholders)),
            Arc::new(column(|c| c.partial)),
            Arc::new(column(|c| c.failed)),
        ],
    )
    .context("building stage_counts record batch")?;
    write_parquet(path, batch)
}

fn manifest_entry(name: &str, reports_dir: &Path, path: &Path) -> Result<ParquetManifestFile> {
    let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    let sha256 = hex::encode(hasher.finalize());
    let rel = path
        .strip_prefix(reports_dir)
        .unwrap_or(path)
        .display()
        .to_string();
    Ok(ParquetManifestFile {
        name: name.to_string(),
        path: rel,
        sha256,
        bytes: bytes.len() as u64,
    })
}

/// Markdown digest of the newest `runs` report directories.
pub fn report_daily_markdown(runs: usize, reports_root: &Path) -> Result<String> {
    let mut dirs = std::fs::read_dir(reports_root)
        .with_context(|| format!("reading {}", reports_root.display()))?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().map(|ft| ft.is_dir()).unwrap_or(false))
        .filter(|entry| entry.path().join(SUMMARY_FILE).exists())
        .collect::<Vec<_>>();
    dirs.sort_by_key(|e| e.metadata().and_then(|m| m.modified()).ok());
    dirs.reverse();

    let mut lines = vec!["# LEC Run Report".to_string(), String::new()];
    for dir in dirs.into_iter().take(runs.max(1)) {
        let summary_path = dir.path().join(SUMMARY_FILE);
        let summary: serde_json::Value = serde_json::from_str(
            &std::fs::read_to_string(&summary_path)
                .with_context(|| format!("reading {}", summary_path.display()))?,
        )
        .with_context(|| format!("parsing {}", summary_path.display()))?;

        let field = |path: &[&str]| {
            path.iter()
                .try_fold(&summary, |v, key| v.get(key))
                .map(|v| match v {
                    serde_json::Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .unwrap_or_else(|| "-".to_string())
        };

        lines.push(format!("## Run `{}`", dir.file_name().to_string_lossy()));
        lines.push(format!("- status: {}", field(&["status"])));
        lines.push(format!("- trigger: {}", field(&["trigger"])));
        lines.push(format!("- started: {}", field(&["started_at"])));
        lines.push(format!("- drop file: {}", field(&["fetched", "file_name"])));
        lines.push(format!(
            "- matches: {} inserted, {} updated",
            field(&["load", "matches", "inserted"]),
            field(&["load", "matches", "updated"])
        ));
        lines.push(format!(
            "- performances: {} inserted, {} updated",
            field(&["load", "performances", "inserted"]),
            field(&["load", "performances", "updated"])
        ));
        let failures = summary
            .get("failures")
            .and_then(|v| v.as_array())
            .map(|a| a.len())
            .unwrap_or(0);
        lines.push(format!("- failures: {failures}"));
        let manifest_path = dir.path().join("snapshots").join("manifest.json");
        if manifest_path.exists() {
            lines.push(format!("- parquet manifest: `{}`", manifest_path.display()));
        }
        lines.push(String::new());
    }
    Ok(lines.join("\n"))
}
