//! Champion catalog from the stats site's champion list page.

use std::collections::BTreeSet;
use std::path::PathBuf;

use async_trait::async_trait;
use lec_core::normalize::champion_key;
use lec_core::ChampionEntry;
use lec_storage::HttpFetcher;
use scraper::{Html, Selector};
use tracing::info;

use crate::{load_source_bundle, AdapterContext, AdapterError, ChampionSource};

pub const STATS_SITE_ORIGIN: &str = "https://gol.gg";
pub const CHAMPION_LIST_URL: &str = "https://gol.gg/champion/list/";

const FORBIDDEN_NAME_CHARS: [char; 9] = ['\\', '/', '*', '?', ':', '"', '<', '>', '|'];

fn absolute_image(src: &str) -> String {
    if src.starts_with("http://") || src.starts_with("https://") {
        return src.to_string();
    }
    let trimmed = src.trim_start_matches("..").trim_start_matches('/');
    format!("{STATS_SITE_ORIGIN}/{trimmed}")
}

/// Champion icons from the list table; duplicate names keep the first occurrence.
pub fn parse_champion_table(html: &str) -> Result<Vec<ChampionEntry>, AdapterError> {
    let document = Html::parse_document(html);
    let icon_sel = Selector::parse("table.table_list tbody tr img.champion_icon_light")
        .map_err(|e| AdapterError::Message(e.to_string()))?;

    let mut seen = BTreeSet::new();
    let mut entries = Vec::new();
    for icon in document.select(&icon_sel) {
        let Some(alt) = icon.value().attr("alt") else {
            continue;
        };
        let name: String = alt
            .chars()
            .filter(|c| !FORBIDDEN_NAME_CHARS.contains(c))
            .collect::<String>()
            .trim()
            .to_string();
        if name.is_empty() || !seen.insert(champion_key(&name)) {
            continue;
        }
        entries.push(ChampionEntry {
            name,
            image: icon.value().attr("src").map(absolute_image),
        });
    }
    Ok(entries)
}

#[derive(Debug, Clone)]
pub struct BundleChampionSource {
    source_id: String,
    path: PathBuf,
}

impl BundleChampionSource {
    pub fn new(source_id: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            source_id: source_id.into(),
            path: path.into(),
        }
    }
}

#[async_trait]
impl ChampionSource for BundleChampionSource {
    fn source_id(&self) -> &str {
        &self.source_id
    }

    async fn fetch_champions(
        &self,
        _http: &HttpFetcher,
        _ctx: &AdapterContext,
    ) -> Result<Vec<ChampionEntry>, AdapterError> {
        let bundle = load_source_bundle(&self.path)?;
        let html = bundle
            .raw_artifact
            .filter(|raw| raw.content_type.starts_with("text/html"))
            .and_then(|raw| raw.inline_text);
        let mut entries = match html {
            Some(html) => parse_champion_table(&html)?,
            None => Vec::new(),
        };
        let mut seen: BTreeSet<String> = entries.iter().map(|e| champion_key(&e.name)).collect();
        for entry in bundle.champions {
            if seen.insert(champion_key(&entry.name)) {
                entries.push(entry);
            }
        }
        info!(source_id = %self.source_id, champions = entries.len(), "loaded champion bundle");
        Ok(entries)
    }
}

#[derive(Debug, Clone)]
pub struct StatsSiteChampionSource {
    source_id: String,
    url: String,
}

impl StatsSiteChampionSource {
    pub fn new(source_id: impl Into<String>, url: Option<String>) -> Self {
        Self {
            source_id: source_id.into(),
            url: url.unwrap_or_else(|| CHAMPION_LIST_URL.to_string()),
        }
    }
}

#[async_trait]
impl ChampionSource for StatsSiteChampionSource {
    fn source_id(&self) -> &str {
        &self.source_id
    }

    async fn fetch_champions(
        &self,
        http: &HttpFetcher,
        ctx: &AdapterContext,
    ) -> Result<Vec<ChampionEntry>, AdapterError> {
        let response = http.fetch_bytes(ctx.run_id, &self.source_id, &self.url).await?;
        let html = String::from_utf8_lossy(&response.body);
        let entries = parse_champion_table(&html)?;
        if entries.is_empty() {
            return Err(AdapterError::Message(format!(
                "no champion icons found at {}",
                response.final_url
            )));
        }
        info!(source_id = %self.source_id, champions = entries.len(), "fetched champion list");
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{bundle_path, test_support::workspace_root};
    use lec_storage::HttpClientConfig;
    use uuid::Uuid;

    #[test]
    fn icons_become_entries_with_absolute_images() {
        let html = r#"<table class="table_list"><tbody>
            <tr><td><img class="champion_icon_light" alt="Kai'Sa" src="../_img/champions_icon/Kaisa.png"></td></tr>
            <tr><td><img class="champion_icon_light" alt="Nunu &amp; Willump" src="/_img/champions_icon/Nunu.png"></td></tr>
            <tr><td><img class="champion_icon_light" alt="Kai'Sa" src="dup.png"></td></tr>
            <tr><td><img class="champion_icon" alt="Ignored" src="x.png"></td></tr>
        </tbody></table>"#;
        let entries = parse_champion_table(html).expect("parse");
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].name, "Kai'Sa");
        assert_eq!(
            entries[0].image.as_deref(),
            Some("https://gol.gg/_img/champions_icon/Kaisa.png")
        );
        assert_eq!(entries[1].name, "Nunu & Willump");
    }

    #[test]
    fn forbidden_characters_are_stripped_from_names() {
        let html = r#"<table class="table_list"><tbody>
            <tr><td><img class="champion_icon_light" alt="Dr. Mundo?" src="https://cdn.example/mundo.png"></td></tr>
        </tbody></table>"#;
        let entries = parse_champion_table(html).expect("parse");
        assert_eq!(entries[0].name, "Dr. Mundo");
        assert_eq!(entries[0].image.as_deref(), Some("https://cdn.example/mundo.png"));
    }

    #[tokio::test]
    async fn fixture_bundle_lists_champions() {
        let source = BundleChampionSource::new("gol-gg", bundle_path(&workspace_root(), "gol-gg"));
        let http = HttpFetcher::new(HttpClientConfig::default()).expect("http");
        let ctx = AdapterContext::new(Uuid::new_v4());
        let champions = source.fetch_champions(&http, &ctx).await.expect("champions");
        let keys: Vec<String> = champions.iter().map(|c| champion_key(&c.name)).collect();
        assert!(keys.contains(&"ahri".to_string()));
        assert!(keys.contains(&"rumble".to_string()));
    }
}
