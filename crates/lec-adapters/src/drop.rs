//! Bulk CSV drops: a shared Google Drive folder, or a local directory for manual runs.

use std::path::PathBuf;
use std::time::SystemTime;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lec_storage::HttpFetcher;
use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::{AdapterContext, AdapterError, CsvDropSource};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DropFile {
    pub id: String,
    pub name: String,
    pub created_at: Option<DateTime<Utc>>,
}

impl DropFile {
    /// Leading year of names such as `2025_LoL_esports_match_data_from_OraclesElixir.csv`.
    pub fn year_hint(&self) -> Option<i32> {
        let digits: String = self.name.chars().take_while(|c| c.is_ascii_digit()).collect();
        (digits.len() == 4).then(|| digits.parse().ok()).flatten()
    }
}

pub const DRIVE_FILES_API: &str = "https://www.googleapis.com/drive/v3/files";
pub const DRIVE_DOWNLOAD_URL: &str = "https://drive.google.com/uc";

#[derive(Debug, Clone)]
pub struct DriveCsvDrop {
    source_id: String,
    folder_id: String,
    api_key: String,
    files_api: String,
    download_url: String,
}

#[derive(Debug, Deserialize)]
struct DriveFileList {
    #[serde(default)]
    files: Vec<DriveFile>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DriveFile {
    id: String,
    name: String,
    #[serde(default)]
    created_time: Option<DateTime<Utc>>,
}

impl DriveCsvDrop {
    pub fn new(source_id: impl Into<String>, folder_id: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            source_id: source_id.into(),
            folder_id: folder_id.into(),
            api_key: api_key.into(),
            files_api: DRIVE_FILES_API.to_string(),
            download_url: DRIVE_DOWNLOAD_URL.to_string(),
        }
    }

    pub fn with_endpoints(mut self, files_api: impl Into<String>, download_url: impl Into<String>) -> Self {
        self.files_api = files_api.into();
        self.download_url = download_url.into();
        self
    }
}

/// Pick the newest listed file by creation time; files without a timestamp lose.
fn newest(files: Vec<DriveFile>) -> Option<DropFile> {
    files
        .into_iter()
        .max_by_key(|f| f.created_time)
        .map(|f| DropFile {
            id: f.id,
            name: f.name,
            created_at: f.created_time,
        })
}

/// Large files are answered with a confirmation page whose form re-issues the download.
fn confirmation_form(html: &str) -> Result<Option<(String, Vec<(String, String)>)>, AdapterError> {
    let document = Html::parse_document(html);
    let form_sel = Selector::parse("form#download-form").map_err(|e| AdapterError::Message(e.to_string()))?;
    let input_sel = Selector::parse("input[type=hidden]").map_err(|e| AdapterError::Message(e.to_string()))?;
    let Some(form) = document.select(&form_sel).next() else {
        return Ok(None);
    };
    let Some(action) = form.value().attr("action") else {
        return Ok(None);
    };
    let params = form
        .select(&input_sel)
        .filter_map(|input| {
            let name = input.value().attr("name")?;
            let value = input.value().attr("value").unwrap_or_default();
            Some((name.to_string(), value.to_string()))
        })
        .collect();
    Ok(Some((action.to_string(), params)))
}

#[async_trait]
impl CsvDropSource for DriveCsvDrop {
    fn source_id(&self) -> &str {
        &self.source_id
    }

    async fn latest(&self, http: &HttpFetcher, ctx: &AdapterContext) -> Result<Option<DropFile>, AdapterError> {
        let query = format!("'{}' in parents and mimeType='text/csv'", self.folder_id);
        let url = HttpFetcher::url_with_query(
            &self.files_api,
            &[
                ("q", query.as_str()),
                ("orderBy", "createdTime desc"),
                ("fields", "files(id,name,createdTime)"),
                ("key", self.api_key.as_str()),
            ],
        )?;
        let response = http.fetch_url(ctx.run_id, &self.source_id, url).await?;
        let listing: DriveFileList = serde_json::from_slice(&response.body)
            .context("parsing drive file listing")?;
        info!(files = listing.files.len(), folder = %self.folder_id, "listed bulk drop");
        Ok(newest(listing.files))
    }

    async fn download(
        &self,
        http: &HttpFetcher,
        ctx: &AdapterContext,
        file: &DropFile,
    ) -> Result<Vec<u8>, AdapterError> {
        let url = HttpFetcher::url_with_query(
            &self.download_url,
            &[("export", "download"), ("id", file.id.as_str())],
        )?;
        let response = http.fetch_url(ctx.run_id, &self.source_id, url).await?;
        if !response.looks_like_html() {
            return Ok(response.body);
        }

        let html = String::from_utf8_lossy(&response.body);
        let Some((action, params)) = confirmation_form(&html)? else {
            return Err(AdapterError::Message(format!(
                "drive returned an html page for {} without a download form",
                file.name
            )));
        };
        warn!(file = %file.name, "confirming large-file download");
        let pairs: Vec<(&str, &str)> = params.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
        let confirmed = HttpFetcher::url_with_query(&action, &pairs)?;
        let response = http.fetch_url(ctx.run_id, &self.source_id, confirmed).await?;
        if response.looks_like_html() {
            return Err(AdapterError::Message(format!(
                "drive did not release {} after confirmation",
                file.name
            )));
        }
        Ok(response.body)
    }
}

/// Newest `*.csv` in a local directory, by modification time.
#[derive(Debug, Clone)]
pub struct DirectoryCsvDrop {
    source_id: String,
    dir: PathBuf,
}

impl DirectoryCsvDrop {
    pub fn new(source_id: impl Into<String>, dir: impl Into<PathBuf>) -> Self {
        Self {
            source_id: source_id.into(),
            dir: dir.into(),
        }
    }
}

#[async_trait]
impl CsvDropSource for DirectoryCsvDrop {
    fn source_id(&self) -> &str {
        &self.source_id
    }

    async fn latest(&self, _http: &HttpFetcher, _ctx: &AdapterContext) -> Result<Option<DropFile>, AdapterError> {
        let mut entries = tokio::fs::read_dir(&self.dir)
            .await
            .with_context(|| format!("reading {}", self.dir.display()))?;
        let mut best: Option<(SystemTime, DropFile)> = None;
        while let Some(entry) = entries
            .next_entry()
            .await
            .with_context(|| format!("listing {}", self.dir.display()))?
        {
            let path = entry.path();
            let is_csv = path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| e.eq_ignore_ascii_case("csv"));
            if !is_csv {
                continue;
            }
            let modified = entry
                .metadata()
                .await
                .and_then(|m| m.modified())
                .with_context(|| format!("reading metadata of {}", path.display()))?;
            let name = entry.file_name().to_string_lossy().to_string();
            if best.as_ref().is_some_and(|(t, _)| *t >= modified) {
                continue;
            }
            best = Some((
                modified,
                DropFile {
                    id: path.display().to_string(),
                    name,
                    created_at: Some(DateTime::<Utc>::from(modified)),
                },
            ));
        }
        Ok(best.map(|(_, f)| f))
    }

    async fn download(
        &self,
        _http: &HttpFetcher,
        _ctx: &AdapterContext,
        file: &DropFile,
    ) -> Result<Vec<u8>, AdapterError> {
        let bytes = tokio::fs::read(&file.id)
            .await
            .with_context(|| format!("reading {}", file.id))?;
        Ok(bytes)
    }
}
