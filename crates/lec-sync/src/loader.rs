//! Idempotent, batched upsert of an ingested batch into the relational store.
//!
//! Foreign keys resolve against caches warmed once from the store and extended only by
//! batches that committed, so a failed batch never leaves later stages pointing at rows
//! that do not exist.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt::Display;

use anyhow::{Context, Result};
use lec_core::normalize::{champion_key, team_name_key};
use lec_core::{
    Champion, ChampionEntry, DraftRecord, DraftSelection, Match, MatchRecord, ObjectiveRecord,
    ObjectiveTally, PerformanceRecord, Player, PlayerPerformance, PlayerRecord, Series,
    SeriesRecord, Split, SplitRecord, Team, TeamRecord, TeamRef,
};
use lec_storage::{BatchOutcome, Store};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::ingest::IngestedBatch;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageCounts {
    pub seen: usize,
    pub inserted: usize,
    pub updated: usize,
    pub already_present: usize,
    /// Repeats of a key already handled earlier in the same run.
    pub duplicates: usize,
    pub omitted: BTreeMap<String, usize>,
    pub placeholders: usize,
    pub partial: usize,
    pub failed: usize,
}

impl StageCounts {
    fn record(&mut self, outcome: BatchOutcome) {
        self.inserted += outcome.inserted;
        self.updated += outcome.updated;
        self.already_present += outcome.unchanged;
    }

    fn omit(&mut self, stage: &'static str, reason: &str, context: impl Display) {
        warn!(stage, reason, record = %context, "omitted record");
        *self.omitted.entry(reason.to_string()).or_default() += 1;
    }

    pub fn omitted_total(&self) -> usize {
        self.omitted.values().sum()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadReport {
    pub champions: StageCounts,
    pub splits: StageCounts,
    pub series: StageCounts,
    pub teams: StageCounts,
    pub players: StageCounts,
    pub matches: StageCounts,
    pub performances: StageCounts,
    pub drafts: StageCounts,
    pub objectives: StageCounts,
    pub series_recounted: usize,
    pub failures: Vec<String>,
}

impl LoadReport {
    pub fn stages(&self) -> [(&'static str, &StageCounts); 9] {
        [
            ("champions", &self.champions),
            ("splits", &self.splits),
            ("series", &self.series),
            ("teams", &self.teams),
            ("players", &self.players),
            ("matches", &self.matches),
            ("performances", &self.performances),
            ("drafts", &self.drafts),
            ("objectives", &self.objectives),
        ]
    }

    pub fn failed_rows(&self) -> usize {
        self.stages().iter().map(|(_, c)| c.failed).sum()
    }

    pub fn omitted_rows(&self) -> usize {
        self.stages().iter().map(|(_, c)| c.omitted_total()).sum()
    }
}

/// Fold one batch result into the stage counters. Returns whether the batch committed.
fn absorb(
    stage: &'static str,
    counts: &mut StageCounts,
    failures: &mut Vec<String>,
    rows: usize,
    result: Result<BatchOutcome>,
) -> bool {
    match result {
        Ok(outcome) => {
            counts.record(outcome);
            true
        }
        Err(err) => {
            error!(stage, rows, error = %format!("{err:#}"), "batch failed");
            counts.failed += rows;
            failures.push(format!("{stage}: {err:#}"));
            false
        }
    }
}

#[derive(Debug, Default)]
struct LoaderCache {
    champions: HashMap<String, Uuid>,
    splits: HashSet<String>,
    series: HashSet<String>,
    teams: HashMap<Uuid, Team>,
    team_names: HashMap<String, Uuid>,
    players: HashMap<Uuid, Player>,
    matches: HashSet<Uuid>,
}

impl LoaderCache {
    fn set_champions(&mut self, champions: Vec<Champion>) {
        self.champions = champions
            .into_iter()
            .map(|c| (c.normalized_name(), c.id))
            .collect();
    }

    fn champion(&self, name: &str) -> Option<Uuid> {
        self.champions.get(&champion_key(name)).copied()
    }

    fn remember_team(&mut self, team: Team) {
        self.team_names.insert(team_name_key(&team.name), team.id);
        self.teams.insert(team.id, team);
    }

    /// By id first; a missing id or a placeholder falls back to the display name.
    fn resolve_team(&self, team: &TeamRef) -> Option<Uuid> {
        if let Some(id) = team.id().filter(|id| self.teams.contains_key(id)) {
            return Some(id);
        }
        team.name()
            .and_then(|name| self.team_names.get(&team_name_key(name)))
            .copied()
    }
}

pub struct ReconciliationLoader<'a> {
    store: &'a dyn Store,
    batch_size: usize,
    cache: LoaderCache,
}

impl<'a> ReconciliationLoader<'a> {
    /// Warm every lookup cache from the store.
    pub async fn new(store: &'a dyn Store, batch_size: usize) -> Result<Self> {
        let mut cache = LoaderCache::default();
        cache.set_champions(store.champions().await.context("warming champion cache")?);
        cache.splits = store.split_ids().await.context("warming split cache")?;
        cache.series = store.series_ids().await.context("warming series cache")?;
        for team in store.teams().await.context("warming team cache")? {
            cache.remember_team(team);
        }
        cache.players = store
            .players()
            .await
            .context("warming player cache")?
            .into_iter()
            .map(|p| (p.id, p))
            .collect();
        cache.matches = store.match_ids().await.context("warming match cache")?;
        info!(
            backend = store.backend_name(),
            champions = cache.champions.len(),
            teams = cache.teams.len(),
            players = cache.players.len(),
            matches = cache.matches.len(),
            "loader caches warmed"
        );
        Ok(Self {
            store,
            batch_size: batch_size.max(1),
            cache,
        })
    }

    pub fn has_match(&self, id: Uuid) -> bool {
        self.cache.matches.contains(&id)
    }

    pub async fn load(&mut self, champions: &[ChampionEntry], batch: &IngestedBatch) -> LoadReport {
        let mut report = LoadReport::default();
        self.load_champions(champions, &mut report).await;
        self.load_splits(&batch.splits, &mut report).await;
        self.load_series(&batch.series, &mut report).await;
        self.load_teams(&batch.teams, &mut report).await;
        self.load_players(&batch.players, &mut report).await;
        self.load_matches(&batch.matches, &mut report).await;
        self.load_performances(&batch.performances, &mut report).await;
        self.load_drafts(&batch.drafts, &mut report).await;
        self.load_objectives(&batch.objectives, &mut report).await;

        for (stage, counts) in report.stages() {
            info!(
                stage,
                seen = counts.seen,
                inserted = counts.inserted,
                updated = counts.updated,
                already_present = counts.already_present,
                duplicates = counts.duplicates,
                omitted = counts.omitted_total(),
                placeholders = counts.placeholders,
                partial = counts.partial,
                failed = counts.failed,
                "stage loaded"
            );
        }
        report
    }

    async fn load_champions(&mut self, entries: &[ChampionEntry], report: &mut LoadReport) {
        let counts = &mut report.champions;
        let mut seen = HashSet::new();
        let mut pending = Vec::new();
        for entry in entries {
            counts.seen += 1;
            let key = champion_key(&entry.name);
            if key.is_empty() {
                counts.omit("champions", "blank name", &entry.name);
                continue;
            }
            if !seen.insert(key) {
                counts.duplicates += 1;
                continue;
            }
            pending.push(Champion::from_name(entry.name.clone(), entry.image.clone()));
        }

        let mut committed = false;
        for chunk in pending.chunks(self.batch_size) {
            let result = self.store.upsert_champions(chunk).await;
            committed |= absorb("champions", counts, &mut report.failures, chunk.len(), result);
        }
        if committed {
            match self.store.champions().await {
                Ok(list) => self.cache.set_champions(list),
                Err(err) => report.failures.push(format!("champions: reloading cache: {err:#}")),
            }
        }
    }

    async fn load_splits(&mut self, records: &[SplitRecord], report: &mut LoadReport) {
        let counts = &mut report.splits;
        let mut seen = HashSet::new();
        let mut pending = Vec::new();
        for record in records {
            counts.seen += 1;
            let id = record.id();
            if !seen.insert(id.clone()) {
                counts.duplicates += 1;
            } else if self.cache.splits.contains(&id) {
                counts.already_present += 1;
            } else {
                pending.push(Split::new(record.split_type.clone(), record.year, record.league.clone()));
            }
        }
        for chunk in pending.chunks(self.batch_size) {
            let result = self.store.insert_splits(chunk).await;
            if absorb("splits", counts, &mut report.failures, chunk.len(), result) {
                self.cache.splits.extend(chunk.iter().map(|s| s.id.clone()));
            }
        }
    }

    async fn load_series(&mut self, records: &[SeriesRecord], report: &mut LoadReport) {
        let counts = &mut report.series;
        let mut seen = HashSet::new();
        let mut pending = Vec::new();
        for record in records {
            counts.seen += 1;
            if !seen.insert(record.key.as_str()) {
                counts.duplicates += 1;
                continue;
            }
            if self.cache.series.contains(&record.key) {
                counts.already_present += 1;
                continue;
            }
            let split_id = match record.split.id().filter(|id| self.cache.splits.contains(id)) {
                Some(id) => id,
                None => match record
                    .split
                    .unknown_fallback_id()
                    .filter(|id| self.cache.splits.contains(id))
                {
                    Some(id) => {
                        warn!(series = %record.key, split = %id, "series filed under unknown split");
                        counts.partial += 1;
                        id
                    }
                    None => {
                        counts.omit("series", "split not found", &record.key);
                        continue;
                    }
                },
            };
            pending.push(Series {
                id: record.key.clone(),
                split_id,
                played_on: record.played_on,
                best_of: record.best_of(),
                num_games: i32::try_from(record.game_keys.len()).unwrap_or(i32::MAX),
                patch: record.patch.clone(),
                playoffs: record.playoffs,
            });
        }
        for chunk in pending.chunks(self.batch_size) {
            let result = self.store.insert_series(chunk).await;
            if absorb("series", counts, &mut report.failures, chunk.len(), result) {
                self.cache.series.extend(chunk.iter().map(|s| s.id.clone()));
            }
        }
    }

    /// New teams are inserted active; known teams keep their roster metadata and only
    /// take the latest display name.
    async fn load_teams(&mut self, records: &[TeamRecord], report: &mut LoadReport) {
        let counts = &mut report.teams;
        let mut seen = HashSet::new();
        let mut pending = Vec::new();
        for record in records {
            counts.seen += 1;
            if !seen.insert(record.id) {
                counts.duplicates += 1;
                continue;
            }
            match self.cache.teams.get(&record.id) {
                Some(existing) if existing.name == record.name => counts.already_present += 1,
                Some(existing) => {
                    let mut team = existing.clone();
                    team.name = record.name.clone();
                    pending.push(team);
                }
                None => pending.push(Team::named(record.id, record.name.clone())),
            }
        }
        for chunk in pending.chunks(self.batch_size) {
            let result = self.store.upsert_teams(chunk).await;
            if absorb("teams", counts, &mut report.failures, chunk.len(), result) {
                for team in chunk {
                    self.cache.remember_team(team.clone());
                }
            }
        }
    }

    /// A player is active when their latest appearance is in the newest season of the batch.
    async fn load_players(&mut self, records: &[PlayerRecord], report: &mut LoadReport) {
        let counts = &mut report.players;
        let newest_year = records.iter().filter_map(|p| p.last_seen_year).max();
        let mut seen = HashSet::new();
        let mut pending = Vec::new();
        for record in records {
            counts.seen += 1;
            if !seen.insert(record.id) {
                counts.duplicates += 1;
                continue;
            }
            let team_id = record.team_id.filter(|t| self.cache.teams.contains_key(t));
            if record.team_id.is_some() && team_id.is_none() {
                warn!(player = %record.handle, "player team not in store; team left unset");
                counts.partial += 1;
            }
            let active = newest_year.is_none() || record.last_seen_year == newest_year;
            let player = match self.cache.players.get(&record.id) {
                Some(existing) => {
                    let mut player = existing.clone();
                    player.handle = record.handle.clone();
                    player.team_id = team_id.or(existing.team_id);
                    player.active = active;
                    player.placeholder = false;
                    if player == *existing {
                        counts.already_present += 1;
                        continue;
                    }
                    player
                }
                None => {
                    let mut player = Player::named(record.id, record.handle.clone(), team_id);
                    player.active = active;
                    player
                }
            };
            pending.push(player);
        }
        for chunk in pending.chunks(self.batch_size) {
            let result = self.store.upsert_players(chunk).await;
            if absorb("players", counts, &mut report.failures, chunk.len(), result) {
                for player in chunk {
                    self.cache.players.insert(player.id, player.clone());
                }
            }
        }
    }

    async fn load_matches(&mut self, records: &[MatchRecord], report: &mut LoadReport) {
        let counts = &mut report.matches;
        let mut seen = HashSet::new();
        let mut pending = Vec::new();
        for record in records {
            counts.seen += 1;
            if !seen.insert(record.id) {
                counts.duplicates += 1;
                continue;
            }
            if !self.cache.series.contains(&record.series_key) {
                counts.omit("matches", "series not found", &record.game_key);
                continue;
            }
            let blue = self.cache.resolve_team(&record.blue);
            let red = self.cache.resolve_team(&record.red);
            let (Some(blue), Some(red)) = (blue, red) else {
                counts.omit("matches", "team not found", &record.game_key);
                continue;
            };
            counts.placeholders += [&record.blue, &record.red]
                .iter()
                .filter(|t| matches!(t, TeamRef::Placeholder { .. }))
                .count();
            let built = Match::new(
                record.id,
                record.series_key.clone(),
                record.game_order,
                blue,
                red,
                record.winner,
            );
            let mut m = match built {
                Ok(m) => m,
                Err(err) => {
                    counts.omit("matches", "invalid match", format!("{}: {err}", record.game_key));
                    continue;
                }
            };
            m.played_at = record.played_at;
            m.duration_secs = record.duration_secs;
            pending.push(m);
        }

        let mut touched: Vec<String> = Vec::new();
        for chunk in pending.chunks(self.batch_size) {
            let result = self.store.upsert_matches(chunk).await;
            if absorb("matches", counts, &mut report.failures, chunk.len(), result) {
                for m in chunk {
                    self.cache.matches.insert(m.id);
                    if !touched.contains(&m.series_id) {
                        touched.push(m.series_id.clone());
                    }
                }
            }
        }
        if !touched.is_empty() {
            match self.store.refresh_series_game_counts(&touched).await {
                Ok(changed) => report.series_recounted = changed,
                Err(err) => {
                    error!(error = %format!("{err:#}"), "series game count refresh failed");
                    report.failures.push(format!("series recount: {err:#}"));
                }
            }
        }
    }

    /// Unknown players become deterministic placeholders; an unknown match or champion
    /// drops the row.
    async fn load_performances(&mut self, records: &[PerformanceRecord], report: &mut LoadReport) {
        let mut placeholders: BTreeMap<Uuid, Player> = BTreeMap::new();
        let mut seen = HashSet::new();
        let mut pending = Vec::new();
        {
            let counts = &mut report.performances;
            for record in records {
                counts.seen += 1;
                if !self.cache.matches.contains(&record.match_id) {
                    counts.omit("performances", "match not found", &record.game_key);
                    continue;
                }
                let Some(champion_id) = record.champion.as_deref().and_then(|c| self.cache.champion(c)) else {
                    let champion = record.champion.as_deref().unwrap_or("<blank>");
                    counts.omit(
                        "performances",
                        "champion not found",
                        format!("{} {champion}", record.game_key),
                    );
                    continue;
                };
                let player_id = match record.player_id.filter(|id| self.cache.players.contains_key(id)) {
                    Some(id) => id,
                    None => {
                        let team_id = record.team.as_ref().and_then(|t| self.cache.resolve_team(t));
                        let placeholder = Player::placeholder(record.match_id, record.side, record.side_slot, team_id);
                        let id = placeholder.id;
                        if !self.cache.players.contains_key(&id) {
                            placeholders.entry(id).or_insert(placeholder);
                        }
                        counts.placeholders += 1;
                        id
                    }
                };
                if !seen.insert((player_id, record.match_id)) {
                    counts.duplicates += 1;
                    continue;
                }
                pending.push(PlayerPerformance {
                    id: PlayerPerformance::id_for(player_id, record.match_id),
                    player_id,
                    match_id: record.match_id,
                    champion_id,
                    side: record.side,
                    position: record.position,
                    won: record.won,
                    stats: record.stats.clone(),
                    snapshots: record.snapshots.clone(),
                });
            }
        }

        let placeholder_rows: Vec<Player> = placeholders.into_values().collect();
        for chunk in placeholder_rows.chunks(self.batch_size) {
            let result = self.store.upsert_players(chunk).await;
            if absorb("players", &mut report.players, &mut report.failures, chunk.len(), result) {
                for player in chunk {
                    self.cache.players.insert(player.id, player.clone());
                }
            }
        }
        let counts = &mut report.performances;
        let (ready, orphaned): (Vec<_>, Vec<_>) = pending
            .into_iter()
            .partition(|p| self.cache.players.contains_key(&p.player_id));
        for perf in &orphaned {
            counts.omit("performances", "placeholder player not stored", perf.match_id);
        }
        for chunk in ready.chunks(self.batch_size) {
            let result = self.store.upsert_performances(chunk).await;
            absorb("performances", counts, &mut report.failures, chunk.len(), result);
        }
    }

    /// A draft row survives with whichever champion resolved; it is dropped only when
    /// neither the pick nor the ban resolves.
    async fn load_drafts(&mut self, records: &[DraftRecord], report: &mut LoadReport) {
        let counts = &mut report.drafts;
        let mut seen_slots = HashSet::new();
        let mut seen_selected = HashSet::new();
        let mut pending = Vec::new();
        for record in records {
            counts.seen += 1;
            if !self.cache.matches.contains(&record.match_id) {
                counts.omit("drafts", "match not found", &record.game_key);
                continue;
            }
            let Some(team_id) = self.cache.resolve_team(&record.team) else {
                counts.omit("drafts", "team not found", record.team.display_key());
                continue;
            };
            let selected = self.cache.champion(&record.champion_selected);
            let banned = record.champion_banned.as_deref().and_then(|c| self.cache.champion(c));
            if selected.is_none() && banned.is_none() {
                counts.omit(
                    "drafts",
                    "champions not found",
                    format!("{} pick {}", record.game_key, record.pick_order),
                );
                continue;
            }
            if selected.is_none() || (record.champion_banned.is_some() && banned.is_none()) {
                warn!(game = %record.game_key, pick = record.pick_order, "draft stored with partial champions");
                counts.partial += 1;
            }

            let pick_order = i16::from(record.pick_order);
            let slot = (team_id, record.match_id, pick_order);
            let selected_key = selected.map(|c| (team_id, record.match_id, c));
            if seen_slots.contains(&slot) || selected_key.is_some_and(|k| seen_selected.contains(&k)) {
                counts.duplicates += 1;
                continue;
            }
            let ban = match (record.ban_order, banned) {
                (Some(order), Some(champion)) => Some((i16::from(order), champion)),
                _ => None,
            };
            match DraftSelection::new(team_id, record.match_id, pick_order, selected, ban) {
                Ok(draft) => {
                    seen_slots.insert(slot);
                    if let Some(key) = selected_key {
                        seen_selected.insert(key);
                    }
                    pending.push(draft);
                }
                Err(err) => counts.omit("drafts", "empty selection", err),
            }
        }
        for chunk in pending.chunks(self.batch_size) {
            let result = self.store.upsert_draft_selections(chunk).await;
            absorb("drafts", counts, &mut report.failures, chunk.len(), result);
        }
    }

    async fn load_objectives(&mut self, records: &[ObjectiveRecord], report: &mut LoadReport) {
        let counts = &mut report.objectives;
        let mut seen = HashSet::new();
        let mut pending = Vec::new();
        for record in records {
            counts.seen += 1;
            if !self.cache.matches.contains(&record.match_id) {
                counts.omit("objectives", "match not found", &record.game_key);
                continue;
            }
            let Some(team_id) = self.cache.resolve_team(&record.team) else {
                counts.omit("objectives", "team not found", record.team.display_key());
                continue;
            };
            if !seen.insert((record.match_id, team_id)) {
                counts.duplicates += 1;
                continue;
            }
            pending.push(ObjectiveTally::new(record.match_id, team_id, record.counts.clone()));
        }
        for chunk in pending.chunks(self.batch_size) {
            let result = self.store.upsert_objective_tallies(chunk).await;
            absorb("objectives", counts, &mut report.failures, chunk.len(), result);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use lec_core::{Side, SplitRef, StatLine};
    use lec_storage::{EntityCounts, MemoryStore};

    fn team_ref(id: Uuid, name: &str) -> TeamRef {
        TeamRef::Known {
            id,
            name: Some(name.to_string()),
        }
    }

    struct Fixture {
        batch: IngestedBatch,
        blue: Uuid,
        red: Uuid,
        match_id: Uuid,
    }

    fn champions() -> Vec<ChampionEntry> {
        ["Ahri", "Azir", "Rumble", "Vi"]
            .into_iter()
            .map(|name| ChampionEntry {
                name: name.to_string(),
                image: None,
            })
            .collect()
    }

    fn fixture() -> Fixture {
        let blue = Uuid::new_v4();
        let red = Uuid::new_v4();
        let match_id = Uuid::new_v4();
        let split = SplitRef::new(Some(2025), Some("Winter"));
        let batch = IngestedBatch {
            splits: vec![SplitRecord {
                split_type: "Winter".into(),
                year: 2025,
                league: "LEC".into(),
            }],
            series: vec![SeriesRecord {
                key: "2025_winter_1".into(),
                split,
                played_on: NaiveDate::from_ymd_opt(2025, 1, 18),
                patch: Some("15.01".into()),
                playoffs: false,
                game_keys: vec!["G1".into()],
            }],
            teams: vec![
                TeamRecord { id: blue, name: "G2 Esports".into(), last_seen_year: Some(2025) },
                TeamRecord { id: red, name: "Fnatic".into(), last_seen_year: Some(2025) },
            ],
            players: Vec::new(),
            matches: vec![MatchRecord {
                id: match_id,
                game_key: "G1".into(),
                series_key: "2025_winter_1".into(),
                game_order: 1,
                played_at: None,
                duration_secs: Some(1800),
                blue: team_ref(blue, "G2 Esports"),
                red: team_ref(red, "Fnatic"),
                winner: Side::Red,
            }],
            ..IngestedBatch::default()
        };
        Fixture { batch, blue, red, match_id }
    }

    fn perf(match_id: Uuid, player_id: Option<Uuid>, champion: &str, side: Side) -> PerformanceRecord {
        PerformanceRecord {
            match_id,
            game_key: "G1".into(),
            player_id,
            player_name: None,
            team: None,
            champion: Some(champion.into()),
            side,
            side_slot: 0,
            position: Some(lec_core::Role::Mid),
            won: Some(side == Side::Red),
            stats: StatLine::default(),
            snapshots: Vec::new(),
        }
    }

    fn draft(match_id: Uuid, team: TeamRef, order: u8, pick: &str, ban: Option<&str>) -> DraftRecord {
        DraftRecord {
            match_id,
            game_key: "G1".into(),
            team,
            pick_order: order,
            champion_selected: pick.into(),
            ban_order: ban.map(|_| order),
            champion_banned: ban.map(str::to_string),
        }
    }

    async fn load(store: &dyn Store, batch: &IngestedBatch) -> LoadReport {
        let mut loader = ReconciliationLoader::new(store, 2).await.expect("loader");
        loader.load(&champions(), batch).await
    }

    #[tokio::test]
    async fn rerun_reports_everything_as_present() {
        let store = MemoryStore::new();
        let fx = fixture();
        let first = load(&store, &fx.batch).await;
        assert_eq!(first.matches.inserted, 1);
        assert_eq!(first.series.inserted, 1);
        let before = store.counts().await.expect("counts");

        let second = load(&store, &fx.batch).await;
        assert_eq!(second.series.already_present, 1);
        assert_eq!(second.splits.already_present, 1);
        assert_eq!(second.teams.already_present, 2);
        assert_eq!(store.counts().await.expect("counts"), before);
    }

    #[tokio::test]
    async fn series_completed_by_a_later_drop_is_recounted() {
        let store = MemoryStore::new();
        let mut fx = fixture();
        load(&store, &fx.batch).await;
        assert_eq!(store.tables().await.series["2025_winter_1"].best_of, 1);

        let mut second = fx.batch.matches[0].clone();
        second.id = Uuid::new_v4();
        second.game_key = "G2".into();
        second.game_order = 2;
        fx.batch.series[0].game_keys.push("G2".into());
        fx.batch.matches.push(second);
        let report = load(&store, &fx.batch).await;
        assert_eq!(report.series.already_present, 1);
        assert_eq!(report.matches.inserted, 1);
        assert_eq!(report.series_recounted, 1);

        let tables = store.tables().await;
        let series = &tables.series["2025_winter_1"];
        assert_eq!(series.num_games, 2);
        assert_eq!(series.best_of, 3);
    }

    #[tokio::test]
    async fn series_falls_back_to_unknown_split_or_is_omitted() {
        let store = MemoryStore::new();
        store
            .insert_splits(&[Split::new("Unknown", 2025, "LEC")])
            .await
            .expect("unknown split");
        let mut fx = fixture();
        fx.batch.splits.clear();
        let report = load(&store, &fx.batch).await;
        assert_eq!(report.series.inserted, 1);
        assert_eq!(report.series.partial, 1);
        let tables = store.tables().await;
        assert_eq!(tables.series["2025_winter_1"].split_id, "Unknown_2025");

        let empty = MemoryStore::new();
        let report = load(&empty, &fx.batch).await;
        assert_eq!(report.series.omitted.get("split not found"), Some(&1));
        assert_eq!(report.matches.omitted.get("series not found"), Some(&1));
        assert_eq!(empty.counts().await.expect("counts").matches, 0);
    }

    #[tokio::test]
    async fn placeholder_team_resolves_by_name_and_unknown_team_omits_match() {
        let store = MemoryStore::new();
        let mut fx = fixture();
        fx.batch.matches[0].red = TeamRef::Placeholder { name: "fnatic".into() };
        let report = load(&store, &fx.batch).await;
        assert_eq!(report.matches.inserted, 1);
        assert_eq!(report.matches.placeholders, 1);
        let tables = store.tables().await;
        assert_eq!(tables.matches[&fx.match_id].red_team_id, fx.red);
        assert_eq!(tables.matches[&fx.match_id].winner_team_id, fx.red);

        let store = MemoryStore::new();
        let mut fx = fixture();
        fx.batch.matches[0].red = TeamRef::Placeholder { name: "Team Vitality".into() };
        let report = load(&store, &fx.batch).await;
        assert_eq!(report.matches.omitted.get("team not found"), Some(&1));
    }

    #[tokio::test]
    async fn same_team_on_both_sides_is_never_stored() {
        let store = MemoryStore::new();
        let mut fx = fixture();
        fx.batch.matches[0].red = team_ref(fx.blue, "G2 Esports");
        let report = load(&store, &fx.batch).await;
        assert_eq!(report.matches.omitted.get("invalid match"), Some(&1));
        assert_eq!(store.counts().await.expect("counts").matches, 0);
    }

    #[tokio::test]
    async fn unknown_players_get_stable_placeholders_and_unknown_champions_drop() {
        let store = MemoryStore::new();
        let mut fx = fixture();
        fx.batch.performances = vec![
            perf(fx.match_id, None, "Ahri", Side::Blue),
            perf(fx.match_id, Some(Uuid::new_v4()), "Vi", Side::Red),
            perf(fx.match_id, None, "Not A Champion", Side::Red),
        ];
        let report = load(&store, &fx.batch).await;
        assert_eq!(report.performances.inserted, 2);
        assert_eq!(report.performances.placeholders, 2);
        assert_eq!(report.performances.omitted.get("champion not found"), Some(&1));
        let placeholders = store
            .tables()
            .await
            .players
            .values()
            .filter(|p| p.placeholder)
            .count();
        assert_eq!(placeholders, 2);

        load(&store, &fx.batch).await;
        assert_eq!(store.counts().await.expect("counts").players, 2);
        assert_eq!(store.counts().await.expect("counts").performances, 2);
    }

    #[tokio::test]
    async fn unresolved_players_on_one_side_each_keep_their_row() {
        let store = MemoryStore::new();
        let mut fx = fixture();
        let mut first = perf(fx.match_id, None, "Ahri", Side::Blue);
        first.position = None;
        let mut second = perf(fx.match_id, None, "Vi", Side::Blue);
        second.position = None;
        second.side_slot = 1;
        fx.batch.performances = vec![first, second];

        let report = load(&store, &fx.batch).await;
        assert_eq!(report.performances.inserted, 2);
        assert_eq!(report.performances.duplicates, 0);
        assert_eq!(report.performances.placeholders, 2);
        let counts = store.counts().await.expect("counts");
        assert_eq!(counts.performances, 2);
        assert_eq!(counts.players, 2);

        load(&store, &fx.batch).await;
        assert_eq!(store.counts().await.expect("counts"), counts);
    }

    #[tokio::test]
    async fn drafts_keep_partial_champions_and_drop_empty_ones() {
        let store = MemoryStore::new();
        let mut fx = fixture();
        let blue = team_ref(fx.blue, "G2 Esports");
        fx.batch.drafts = vec![
            draft(fx.match_id, blue.clone(), 1, "Ahri", Some("Mystery")),
            draft(fx.match_id, blue.clone(), 2, "Nobody", Some("Azir")),
            draft(fx.match_id, blue.clone(), 3, "Nobody", Some("Mystery")),
            draft(fx.match_id, blue.clone(), 4, "Ahri", None),
            draft(fx.match_id, TeamRef::Placeholder { name: "G2 ESPORTS".into() }, 5, "Rumble", Some("Vi")),
        ];
        let report = load(&store, &fx.batch).await;
        assert_eq!(report.drafts.inserted, 3);
        assert_eq!(report.drafts.partial, 2);
        assert_eq!(report.drafts.duplicates, 1);
        assert_eq!(report.drafts.omitted.get("champions not found"), Some(&1));

        let tables = store.tables().await;
        let first = &tables.draft_selections[&(fx.blue, fx.match_id, 1)];
        assert!(first.champion_selected_id.is_some());
        assert_eq!(first.champion_banned_id, None);
        let second = &tables.draft_selections[&(fx.blue, fx.match_id, 2)];
        assert_eq!(second.champion_selected_id, None);
        assert_eq!(second.ban_order, Some(2));
    }

    #[tokio::test]
    async fn objective_team_falls_back_to_name() {
        let store = MemoryStore::new();
        let mut fx = fixture();
        fx.batch.objectives = vec![
            ObjectiveRecord {
                match_id: fx.match_id,
                game_key: "G1".into(),
                team: team_ref(Uuid::new_v4(), "Fnatic"),
                counts: BTreeMap::from([("dragons".to_string(), 2)]),
            },
            ObjectiveRecord {
                match_id: fx.match_id,
                game_key: "G1".into(),
                team: team_ref(fx.red, "Fnatic"),
                counts: BTreeMap::new(),
            },
        ];
        let report = load(&store, &fx.batch).await;
        assert_eq!(report.objectives.inserted, 1);
        assert_eq!(report.objectives.duplicates, 1);
        let tables = store.tables().await;
        assert_eq!(tables.objective_tallies[&(fx.match_id, fx.red)].counts["dragons"], 2);
    }

    /// Rejects every draft batch; everything else goes to the inner store.
    struct DraftFailingStore {
        inner: MemoryStore,
    }

    #[async_trait]
    impl Store for DraftFailingStore {
        fn backend_name(&self) -> &'static str {
            "draft-failing"
        }
        async fn champions(&self) -> Result<Vec<Champion>> {
            self.inner.champions().await
        }
        async fn upsert_champions(&self, batch: &[Champion]) -> Result<BatchOutcome> {
            self.inner.upsert_champions(batch).await
        }
        async fn split_ids(&self) -> Result<HashSet<String>> {
            self.inner.split_ids().await
        }
        async fn insert_splits(&self, batch: &[Split]) -> Result<BatchOutcome> {
            self.inner.insert_splits(batch).await
        }
        async fn series_ids(&self) -> Result<HashSet<String>> {
            self.inner.series_ids().await
        }
        async fn insert_series(&self, batch: &[Series]) -> Result<BatchOutcome> {
            self.inner.insert_series(batch).await
        }
        async fn refresh_series_game_counts(&self, series_ids: &[String]) -> Result<usize> {
            self.inner.refresh_series_game_counts(series_ids).await
        }
        async fn teams(&self) -> Result<Vec<Team>> {
            self.inner.teams().await
        }
        async fn upsert_teams(&self, batch: &[Team]) -> Result<BatchOutcome> {
            self.inner.upsert_teams(batch).await
        }
        async fn players(&self) -> Result<Vec<Player>> {
            self.inner.players().await
        }
        async fn upsert_players(&self, batch: &[Player]) -> Result<BatchOutcome> {
            self.inner.upsert_players(batch).await
        }
        async fn match_ids(&self) -> Result<HashSet<Uuid>> {
            self.inner.match_ids().await
        }
        async fn upsert_matches(&self, batch: &[Match]) -> Result<BatchOutcome> {
            self.inner.upsert_matches(batch).await
        }
        async fn upsert_performances(&self, batch: &[PlayerPerformance]) -> Result<BatchOutcome> {
            self.inner.upsert_performances(batch).await
        }
        async fn upsert_draft_selections(&self, _batch: &[DraftSelection]) -> Result<BatchOutcome> {
            anyhow::bail!("draft table unavailable")
        }
        async fn upsert_objective_tallies(&self, batch: &[ObjectiveTally]) -> Result<BatchOutcome> {
            self.inner.upsert_objective_tallies(batch).await
        }
        async fn counts(&self) -> Result<EntityCounts> {
            self.inner.counts().await
        }
    }

    #[tokio::test]
    async fn failed_draft_batches_do_not_block_objectives() {
        let store = DraftFailingStore { inner: MemoryStore::new() };
        let mut fx = fixture();
        fx.batch.drafts = vec![draft(fx.match_id, team_ref(fx.blue, "G2 Esports"), 1, "Ahri", None)];
        fx.batch.objectives = vec![ObjectiveRecord {
            match_id: fx.match_id,
            game_key: "G1".into(),
            team: team_ref(fx.blue, "G2 Esports"),
            counts: BTreeMap::new(),
        }];
        let report = load(&store, &fx.batch).await;
        assert_eq!(report.drafts.failed, 1);
        assert_eq!(report.objectives.inserted, 1);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failed_rows(), 1);
    }
}
