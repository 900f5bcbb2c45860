//! Source contracts for the LEC pipeline: the bulk CSV drop, the wiki roster and the
//! stats-site champion catalog.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lec_core::{ChampionEntry, RosterSnapshot};
use lec_storage::{FetchError, HttpFetcher};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub mod champions;
pub mod csv_log;
pub mod drop;
pub mod roster;

pub use champions::{BundleChampionSource, StatsSiteChampionSource};
pub use csv_log::{parse_game_log, CsvLogOptions, ParsedGameLog, RowIssue};
pub use drop::{DirectoryCsvDrop, DriveCsvDrop, DropFile};
pub use roster::{parse_roster_date, BundleRosterSource, HttpRosterSource};

pub const CRATE_NAME: &str = "lec-adapters";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    BulkCsv,
    Roster,
    Champions,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdapterContext {
    pub run_id: Uuid,
    pub fetched_at: DateTime<Utc>,
}

impl AdapterContext {
    pub fn new(run_id: Uuid) -> Self {
        Self {
            run_id,
            fetched_at: Utc::now(),
        }
    }
}

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("{0}")]
    Message(String),
    #[error("missing required column `{0}`")]
    MissingColumn(String),
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

/// Periodic bulk export of per-game rows.
#[async_trait]
pub trait CsvDropSource: Send + Sync {
    fn source_id(&self) -> &str;

    /// Newest file in the drop, if any.
    async fn latest(&self, http: &HttpFetcher, ctx: &AdapterContext) -> Result<Option<DropFile>, AdapterError>;

    async fn download(
        &self,
        http: &HttpFetcher,
        ctx: &AdapterContext,
        file: &DropFile,
    ) -> Result<Vec<u8>, AdapterError>;
}

#[async_trait]
pub trait RosterSource: Send + Sync {
    fn source_id(&self) -> &str;

    async fn fetch_roster(&self, http: &HttpFetcher, ctx: &AdapterContext) -> Result<RosterSnapshot, AdapterError>;
}

#[async_trait]
pub trait ChampionSource: Send + Sync {
    fn source_id(&self) -> &str;

    async fn fetch_champions(
        &self,
        http: &HttpFetcher,
        ctx: &AdapterContext,
    ) -> Result<Vec<ChampionEntry>, AdapterError>;
}

/// Captured output of an external scraper: structured records plus the optional raw page
/// they were taken from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceBundle {
    pub source_id: String,
    pub captured_from_url: String,
    pub fetched_at: DateTime<Utc>,
    pub extractor_version: String,
    #[serde(default)]
    pub raw_artifact: Option<RawArtifact>,
    #[serde(default)]
    pub roster: Option<RosterSnapshot>,
    #[serde(default)]
    pub champions: Vec<ChampionEntry>,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawArtifact {
    pub content_type: String,
    pub path: Option<String>,
    pub inline_text: Option<String>,
}

pub fn load_source_bundle(path: impl AsRef<Path>) -> Result<SourceBundle> {
    let path = path.as_ref();
    let mut bundle: SourceBundle = read_json_file(path)?;
    hydrate_inline_raw_artifact(path, &mut bundle)?;
    Ok(bundle)
}

pub(crate) fn read_json_file<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T> {
    let path = path.as_ref();
    let data = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&data).with_context(|| format!("parsing {}", path.display()))
}

fn hydrate_inline_raw_artifact(bundle_path: &Path, bundle: &mut SourceBundle) -> Result<()> {
    let Some(raw) = bundle.raw_artifact.as_mut() else {
        return Ok(());
    };
    if raw.inline_text.is_some() {
        return Ok(());
    }
    let Some(rel_path) = &raw.path else {
        return Ok(());
    };
    let raw_path = bundle_path
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .join(rel_path);
    if !raw_path.exists() {
        return Ok(());
    }
    let text = fs::read_to_string(&raw_path)
        .with_context(|| format!("reading raw artifact {}", raw_path.display()))?;
    raw.inline_text = Some(text);
    Ok(())
}

/// Conventional location of a captured bundle under the workspace root.
pub fn bundle_path(workspace_root: &Path, source_id: &str) -> PathBuf {
    workspace_root
        .join("fixtures")
        .join(source_id)
        .join("sample")
        .join("bundle.json")
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::path::{Path, PathBuf};

    pub fn workspace_root() -> PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("../..")
            .canonicalize()
            .expect("workspace root")
    }
}
