//! Wiki roster metadata applied to teams and players already in the store.
//!
//! Roster sync never creates entities: a team or player it cannot match is counted and
//! left alone.

use std::collections::{BTreeMap, HashMap};

use anyhow::{Context, Result};
use lec_adapters::parse_roster_date;
use lec_core::normalize::{non_blank, player_handle_key, team_name_key};
use lec_core::{Player, PlayerProfile, RosterSnapshot, Team, TeamProfile};
use lec_storage::Store;
use serde::{Deserialize, Serialize};
use strsim::jaro_winkler;
use tracing::{info, warn};
use uuid::Uuid;

pub const DEFAULT_MATCH_THRESHOLD: f64 = 0.94;
const MAX_FREE_TEXT_CHARS: usize = 100;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RosterReport {
    pub teams_seen: usize,
    pub teams_updated: usize,
    pub teams_fuzzy_matched: usize,
    pub teams_unmatched: Vec<String>,
    pub teams_ambiguous: Vec<String>,
    pub players_seen: usize,
    pub players_updated: usize,
    pub players_unmatched: Vec<String>,
    pub players_ambiguous: Vec<String>,
    pub failed: usize,
    pub failures: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
enum TeamMatch {
    Exact(Uuid),
    Fuzzy(Uuid, f64),
    Ambiguous,
    Unmatched,
}

/// Lowercase alphanumeric words, for fuzzy comparison only.
fn fuzzy_key(input: &str) -> String {
    team_name_key(input)
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn truncate_chars(value: &str, max: usize) -> String {
    value.chars().take(max).collect()
}

fn image_path(raw: &str) -> String {
    raw.trim().replace('\\', "/")
}

fn text(value: &Option<String>) -> Option<String> {
    non_blank(value.as_deref()).map(str::to_string)
}

pub struct RosterSync<'a> {
    store: &'a dyn Store,
    batch_size: usize,
    threshold: f64,
}

impl<'a> RosterSync<'a> {
    pub fn new(store: &'a dyn Store, batch_size: usize) -> Self {
        Self {
            store,
            batch_size: batch_size.max(1),
            threshold: DEFAULT_MATCH_THRESHOLD,
        }
    }

    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    fn match_team(&self, name: &str, teams: &HashMap<Uuid, Team>) -> TeamMatch {
        let key = team_name_key(name);
        if key.is_empty() {
            return TeamMatch::Unmatched;
        }
        let exact: Vec<Uuid> = teams
            .values()
            .filter(|t| team_name_key(&t.name) == key)
            .map(|t| t.id)
            .collect();
        match exact.as_slice() {
            [id] => return TeamMatch::Exact(*id),
            [] => {}
            _ => return TeamMatch::Ambiguous,
        }

        let wanted = fuzzy_key(name);
        let mut scored: Vec<(f64, Uuid)> = teams
            .values()
            .map(|t| (jaro_winkler(&wanted, &fuzzy_key(&t.name)), t.id))
            .filter(|(score, _)| *score >= self.threshold)
            .collect();
        scored.sort_by(|a, b| b.0.total_cmp(&a.0));
        match scored.as_slice() {
            [] => TeamMatch::Unmatched,
            [(score, id)] => TeamMatch::Fuzzy(*id, *score),
            [(best, id), (next, _), ..] if best > next => TeamMatch::Fuzzy(*id, *best),
            _ => TeamMatch::Ambiguous,
        }
    }

    fn apply_team_profile(team: &mut Team, profile: &TeamProfile, active: bool) {
        team.country = text(&profile.country).or(team.country.take());
        team.region = text(&profile.region).or(team.region.take());
        team.owner = text(&profile.owner).or(team.owner.take());
        team.head_coach = text(&profile.head_coach).or(team.head_coach.take());
        team.partners = text(&profile.partners)
            .map(|p| truncate_chars(&p, MAX_FREE_TEXT_CHARS))
            .or(team.partners.take());
        team.founded_on = profile
            .founded
            .as_deref()
            .and_then(parse_roster_date)
            .or(team.founded_on);
        team.logo_ref = text(&profile.logo)
            .map(|l| image_path(&l))
            .or(team.logo_ref.take());
        team.active = active;
    }

    fn apply_player_profile(player: &mut Player, profile: &PlayerProfile) {
        let date = |raw: &Option<String>| raw.as_deref().and_then(parse_roster_date);
        player.real_name = text(&profile.real_name).or(player.real_name.take());
        player.role = text(&profile.role).or(player.role.take());
        player.nationality = text(&profile.country).or(player.nationality.take());
        player.residency = text(&profile.residency).or(player.residency.take());
        player.birth_date = date(&profile.birth_date).or(player.birth_date);
        player.contract_from = date(&profile.contract_from).or(player.contract_from);
        player.contract_until = date(&profile.contract_until).or(player.contract_until);
        let soloqueue: Vec<&str> = profile
            .soloqueue_ids
            .iter()
            .filter_map(|id| non_blank(Some(id)))
            .collect();
        if !soloqueue.is_empty() {
            player.soloqueue_ids = Some(truncate_chars(&soloqueue.join(", "), MAX_FREE_TEXT_CHARS));
        }
        player.image_ref = text(&profile.image)
            .map(|i| image_path(&i))
            .or(player.image_ref.take());
    }

    /// Historical teams first, then current ones, so a team listed in both ends active.
    pub async fn apply(&self, snapshot: &RosterSnapshot) -> Result<RosterReport> {
        let mut report = RosterReport::default();
        let mut teams: HashMap<Uuid, Team> = self
            .store
            .teams()
            .await
            .context("loading teams for roster sync")?
            .into_iter()
            .map(|t| (t.id, t))
            .collect();

        let mut changed: BTreeMap<Uuid, Team> = BTreeMap::new();
        let mut team_by_name: HashMap<String, Uuid> = HashMap::new();
        let profiles = snapshot
            .historical_teams
            .iter()
            .map(|p| (p, false))
            .chain(snapshot.current_teams.iter().map(|p| (p, true)));
        for (profile, active) in profiles {
            report.teams_seen += 1;
            let id = match self.match_team(&profile.name, &teams) {
                TeamMatch::Exact(id) => id,
                TeamMatch::Fuzzy(id, score) => {
                    info!(team = %profile.name, score, "roster team matched by similarity");
                    report.teams_fuzzy_matched += 1;
                    id
                }
                TeamMatch::Ambiguous => {
                    warn!(team = %profile.name, "roster team matches several stored teams");
                    report.teams_ambiguous.push(profile.name.clone());
                    continue;
                }
                TeamMatch::Unmatched => {
                    warn!(team = %profile.name, "roster team not in store");
                    report.teams_unmatched.push(profile.name.clone());
                    continue;
                }
            };
            team_by_name.insert(team_name_key(&profile.name), id);
            let Some(team) = teams.get_mut(&id) else {
                continue;
            };
            let before = team.clone();
            Self::apply_team_profile(team, profile, active);
            if *team != before {
                changed.insert(id, team.clone());
            }
        }

        let team_rows: Vec<Team> = changed.into_values().collect();
        for chunk in team_rows.chunks(self.batch_size) {
            match self.store.upsert_teams(chunk).await {
                Ok(outcome) => report.teams_updated += outcome.updated + outcome.inserted,
                Err(err) => {
                    warn!(rows = chunk.len(), error = %format!("{err:#}"), "roster team batch failed");
                    report.failed += chunk.len();
                    report.failures.push(format!("roster teams: {err:#}"));
                }
            }
        }

        self.apply_players(snapshot, &teams, &team_by_name, &mut report).await?;

        info!(
            teams_seen = report.teams_seen,
            teams_updated = report.teams_updated,
            teams_unmatched = report.teams_unmatched.len(),
            players_seen = report.players_seen,
            players_updated = report.players_updated,
            players_unmatched = report.players_unmatched.len(),
            failed = report.failed,
            "roster sync finished"
        );
        Ok(report)
    }

    async fn apply_players(
        &self,
        snapshot: &RosterSnapshot,
        teams: &HashMap<Uuid, Team>,
        team_by_name: &HashMap<String, Uuid>,
        report: &mut RosterReport,
    ) -> Result<()> {
        let mut players: HashMap<Uuid, Player> = self
            .store
            .players()
            .await
            .context("loading players for roster sync")?
            .into_iter()
            .map(|p| (p.id, p))
            .collect();

        let mut changed: BTreeMap<Uuid, Player> = BTreeMap::new();
        for profile in &snapshot.players {
            report.players_seen += 1;
            let label = format!("{} ({})", profile.handle, profile.team);
            let team_id = match team_by_name.get(&team_name_key(&profile.team)) {
                Some(id) => Some(*id),
                None => match self.match_team(&profile.team, teams) {
                    TeamMatch::Exact(id) | TeamMatch::Fuzzy(id, _) => Some(id),
                    TeamMatch::Ambiguous | TeamMatch::Unmatched => None,
                },
            };
            let Some(team_id) = team_id else {
                warn!(player = %label, "roster player team not in store");
                report.players_unmatched.push(label);
                continue;
            };

            let handle = player_handle_key(&profile.handle);
            let candidates: Vec<Uuid> = players
                .values()
                .filter(|p| !p.placeholder && p.team_id == Some(team_id))
                .filter(|p| player_handle_key(&p.handle) == handle)
                .map(|p| p.id)
                .collect();
            let id = match candidates.as_slice() {
                [id] => *id,
                [] => {
                    warn!(player = %label, "roster player not in store");
                    report.players_unmatched.push(label);
                    continue;
                }
                _ => {
                    warn!(player = %label, candidates = candidates.len(), "roster player is ambiguous");
                    report.players_ambiguous.push(label);
                    continue;
                }
            };
            let Some(player) = players.get_mut(&id) else {
                continue;
            };
            let before = player.clone();
            Self::apply_player_profile(player, profile);
            if *player != before {
                changed.insert(id, player.clone());
            }
        }

        let player_rows: Vec<Player> = changed.into_values().collect();
        for chunk in player_rows.chunks(self.batch_size) {
            match self.store.upsert_players(chunk).await {
                Ok(outcome) => report.players_updated += outcome.updated + outcome.inserted,
                Err(err) => {
                    warn!(rows = chunk.len(), error = %format!("{err:#}"), "roster player batch failed");
                    report.failed += chunk.len();
                    report.failures.push(format!("roster players: {err:#}"));
                }
            }
        }
        Ok(())
    }
}
