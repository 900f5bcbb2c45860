//! Wiki roster source: team profiles and player contracts.

use std::collections::BTreeSet;
use std::path::PathBuf;

use anyhow::Context;
use async_trait::async_trait;
use chrono::NaiveDate;
use lec_core::normalize::{player_handle_key, team_name_key};
use lec_core::{PlayerProfile, RosterSnapshot};
use lec_storage::HttpFetcher;
use scraper::{ElementRef, Html, Selector};
use tracing::{debug, info};

use crate::{load_source_bundle, AdapterContext, AdapterError, RosterSource};

const ROSTER_DATE_FORMATS: [&str; 4] = ["%B %d, %Y", "%Y-%m-%d", "%d/%m/%Y", "%b %d, %Y"];

/// Parse the loose date strings the wiki uses; falls back to the first embedded `YYYY-MM-DD`.
pub fn parse_roster_date(raw: &str) -> Option<NaiveDate> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    for format in ROSTER_DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(trimmed, format) {
            return Some(date);
        }
    }
    let bytes = trimmed.as_bytes();
    (0..bytes.len().saturating_sub(9)).find_map(|start| {
        let window = trimmed.get(start..start + 10)?;
        let shaped = window.bytes().enumerate().all(|(i, b)| match i {
            4 | 7 => b == b'-',
            _ => b.is_ascii_digit(),
        });
        shaped
            .then(|| NaiveDate::parse_from_str(window, "%Y-%m-%d").ok())
            .flatten()
    })
}

fn selector(css: &str) -> Result<Selector, AdapterError> {
    Selector::parse(css).map_err(|e| AdapterError::Message(format!("bad selector {css}: {e}")))
}

fn cell_text(cell: &ElementRef<'_>) -> Option<String> {
    let text = cell.text().collect::<String>();
    let text = text.split_whitespace().collect::<Vec<_>>().join(" ");
    (!text.is_empty()).then_some(text)
}

/// Rows of a `table.team-members` roster table. Rows with fewer than seven cells are
/// headers or separators.
pub fn parse_team_members_table(html: &str, team: &str) -> Result<Vec<PlayerProfile>, AdapterError> {
    let document = Html::parse_document(html);
    let row_sel = selector("table.team-members tbody tr")?;
    let cell_sel = selector("td")?;
    let titled_sel = selector("span[title]")?;
    let role_sel = selector("span.markup-object-name")?;
    let span_sel = selector("span")?;

    let mut players = Vec::new();
    for row in document.select(&row_sel) {
        let cells: Vec<ElementRef<'_>> = row.select(&cell_sel).collect();
        if cells.len() < 7 {
            continue;
        }
        let Some(handle) = cell_text(&cells[2]) else {
            continue;
        };
        let residency = cells[0]
            .select(&titled_sel)
            .next()
            .and_then(|s| s.value().attr("title").map(str::to_string))
            .or_else(|| cell_text(&cells[0]));
        let country = cells[1]
            .select(&titled_sel)
            .next()
            .and_then(|s| s.value().attr("title").map(str::to_string));
        let role = cells[4]
            .select(&role_sel)
            .next()
            .and_then(|s| cell_text(&s))
            .or_else(|| cell_text(&cells[4]));
        let joined = cells[6].select(&span_sel).nth(1).and_then(|s| cell_text(&s));

        players.push(PlayerProfile {
            handle,
            team: team.to_string(),
            real_name: cell_text(&cells[3]),
            residency,
            role,
            country,
            contract_until: cell_text(&cells[5]),
            contract_from: joined,
            ..PlayerProfile::default()
        });
    }
    debug!(team, players = players.len(), "parsed team-members table");
    Ok(players)
}

fn page_team_name(html: &str) -> Result<Option<String>, AdapterError> {
    let document = Html::parse_document(html);
    let heading = selector("#firstHeading")?;
    Ok(document.select(&heading).next().and_then(|h| cell_text(&h)))
}

/// Fold table-parsed players into a snapshot; structured entries win on conflict.
fn merge_table_players(snapshot: &mut RosterSnapshot, parsed: Vec<PlayerProfile>) -> usize {
    let mut known: BTreeSet<(String, String)> = snapshot
        .players
        .iter()
        .map(|p| (team_name_key(&p.team), player_handle_key(&p.handle)))
        .collect();
    let mut added = 0;
    for player in parsed {
        if known.insert((team_name_key(&player.team), player_handle_key(&player.handle))) {
            snapshot.players.push(player);
            added += 1;
        }
    }
    added
}

fn roster_from_html(html: &str, fallback_team: &str) -> Result<RosterSnapshot, AdapterError> {
    let team = page_team_name(html)?.unwrap_or_else(|| fallback_team.to_string());
    let mut snapshot = RosterSnapshot::default();
    merge_table_players(&mut snapshot, parse_team_members_table(html, &team)?);
    Ok(snapshot)
}

/// Roster captured to disk by an external scraper run.
#[derive(Debug, Clone)]
pub struct BundleRosterSource {
    source_id: String,
    path: PathBuf,
}

impl BundleRosterSource {
    pub fn new(source_id: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            source_id: source_id.into(),
            path: path.into(),
        }
    }
}

#[async_trait]
impl RosterSource for BundleRosterSource {
    fn source_id(&self) -> &str {
        &self.source_id
    }

    async fn fetch_roster(&self, _http: &HttpFetcher, _ctx: &AdapterContext) -> Result<RosterSnapshot, AdapterError> {
        let bundle = load_source_bundle(&self.path)?;
        let mut snapshot = bundle.roster.unwrap_or_default();
        let html = bundle
            .raw_artifact
            .filter(|raw| raw.content_type.starts_with("text/html"))
            .and_then(|raw| raw.inline_text);
        if let Some(html) = html {
            let team = page_team_name(&html)?.unwrap_or_default();
            let parsed = parse_team_members_table(&html, &team)?;
            let added = merge_table_players(&mut snapshot, parsed);
            debug!(added, "merged roster table players");
        }
        info!(
            source_id = %self.source_id,
            current_teams = snapshot.current_teams.len(),
            historical_teams = snapshot.historical_teams.len(),
            players = snapshot.players.len(),
            "loaded roster bundle"
        );
        Ok(snapshot)
    }
}

/// Roster published over HTTP, either as a JSON snapshot or as a wiki team page.
#[derive(Debug, Clone)]
pub struct HttpRosterSource {
    source_id: String,
    url: String,
}

impl HttpRosterSource {
    pub fn new(source_id: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            source_id: source_id.into(),
            url: url.into(),
        }
    }
}

#[async_trait]
impl RosterSource for HttpRosterSource {
    fn source_id(&self) -> &str {
        &self.source_id
    }

    async fn fetch_roster(&self, http: &HttpFetcher, ctx: &AdapterContext) -> Result<RosterSnapshot, AdapterError> {
        let response = http.fetch_bytes(ctx.run_id, &self.source_id, &self.url).await?;
        if response.looks_like_html() {
            let html = String::from_utf8_lossy(&response.body);
            return roster_from_html(&html, "");
        }
        let snapshot: RosterSnapshot = serde_json::from_slice(&response.body)
            .with_context(|| format!("parsing roster from {}", self.url))?;
        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{bundle_path, test_support::workspace_root};
    use lec_storage::HttpClientConfig;
    use uuid::Uuid;

    const TEAM_PAGE: &str = r#"<html><body>
        <h1 id="firstHeading">G2 Esports</h1>
        <table class="team-members"><tbody>
          <tr><th>Res</th><th>ID</th></tr>
          <tr>
            <td><span title="EMEA">EUW</span></td>
            <td><span class="sprite" title="Poland"></span></td>
            <td>Caps</td>
            <td>Rasmus Winther</td>
            <td><span class="markup-object-name">Mid</span></td>
            <td>2026-11-18</td>
            <td><span>Joined</span><span>2018-11-01</span></td>
          </tr>
          <tr><td colspan="7">Former</td></tr>
        </tbody></table>
        </body></html>"#;

    #[test]
    fn roster_dates_accept_wiki_formats() {
        let expected = NaiveDate::from_ymd_opt(2026, 11, 18);
        assert_eq!(parse_roster_date("November 18, 2026"), expected);
        assert_eq!(parse_roster_date("2026-11-18"), expected);
        assert_eq!(parse_roster_date("18/11/2026"), expected);
        assert_eq!(parse_roster_date("Nov 18, 2026"), expected);
        assert_eq!(parse_roster_date("until 2026-11-18 (extended)"), expected);
        assert_eq!(parse_roster_date("TBD"), None);
        assert_eq!(parse_roster_date(""), None);
    }

    #[test]
    fn team_members_rows_are_extracted() {
        let players = parse_team_members_table(TEAM_PAGE, "G2 Esports").expect("parse");
        assert_eq!(players.len(), 1);
        let caps = &players[0];
        assert_eq!(caps.handle, "Caps");
        assert_eq!(caps.team, "G2 Esports");
        assert_eq!(caps.residency.as_deref(), Some("EMEA"));
        assert_eq!(caps.country.as_deref(), Some("Poland"));
        assert_eq!(caps.real_name.as_deref(), Some("Rasmus Winther"));
        assert_eq!(caps.role.as_deref(), Some("Mid"));
        assert_eq!(caps.contract_until.as_deref(), Some("2026-11-18"));
        assert_eq!(caps.contract_from.as_deref(), Some("2018-11-01"));
    }

    #[test]
    fn structured_players_win_over_table_rows() {
        let mut snapshot = RosterSnapshot {
            players: vec![PlayerProfile {
                handle: "caps".into(),
                team: "G2_Esports".into(),
                real_name: Some("Structured".into()),
                ..PlayerProfile::default()
            }],
            ..RosterSnapshot::default()
        };
        let parsed = parse_team_members_table(TEAM_PAGE, "G2 Esports").expect("parse");
        assert_eq!(merge_table_players(&mut snapshot, parsed), 0);
        assert_eq!(snapshot.players[0].real_name.as_deref(), Some("Structured"));

        let from_page = roster_from_html(TEAM_PAGE, "fallback").expect("page");
        assert_eq!(from_page.players[0].team, "G2 Esports");
    }

    #[tokio::test]
    async fn fixture_bundle_yields_teams_and_players() {
        let source = BundleRosterSource::new("leaguepedia", bundle_path(&workspace_root(), "leaguepedia"));
        let http = HttpFetcher::new(HttpClientConfig::default()).expect("http");
        let ctx = AdapterContext::new(Uuid::new_v4());
        let snapshot = source.fetch_roster(&http, &ctx).await.expect("roster");
        assert!(!snapshot.current_teams.is_empty());
        assert!(!snapshot.historical_teams.is_empty());
        assert!(snapshot.players.iter().any(|p| p.handle == "Caps"));
    }
}
