//! Bulk ingestion: decoded rows to games, games to series, and the normalized records
//! the loader consumes.
//!
//! Every stage isolates failures to the game: a game that cannot produce a record is
//! listed in [`IngestReport::skipped_games`] and the batch continues.

use std::collections::{BTreeMap, HashMap};

use chrono::NaiveDateTime;
use lec_adapters::csv_log::parse_int;
use lec_core::normalize::{non_blank, resolve_role, split_series_token, RoleFallback};
use lec_core::{
    DraftRecord, EntityKind, GameRow, IdentityMap, MatchRecord, ObjectiveRecord, PerformanceRecord,
    PlayerRecord, SeriesRecord, Side, SplitRecord, SplitRef, TeamRecord, TeamRef,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::PipelineSettings;

/// Rows of one side of one game.
#[derive(Debug, Clone, Default)]
pub struct SideRows {
    pub team_row: Option<GameRow>,
    pub players: Vec<GameRow>,
    pub team: Option<TeamRef>,
    pub extra_team_rows: usize,
}

impl SideRows {
    fn won(&self) -> Option<bool> {
        self.team_row
            .as_ref()
            .and_then(|r| r.result)
            .or_else(|| self.players.iter().find_map(|r| r.result))
    }
}

#[derive(Debug, Clone)]
pub struct GameRecord {
    pub key: String,
    pub match_id: Uuid,
    pub first_row_index: usize,
    pub league: Option<String>,
    pub split: SplitRef,
    pub raw_split: Option<String>,
    pub playoffs: bool,
    pub played_at: Option<NaiveDateTime>,
    pub game_number: Option<u32>,
    pub patch: Option<String>,
    pub duration_secs: Option<i32>,
    pub blue: SideRows,
    pub red: SideRows,
}

impl GameRecord {
    pub fn side(&self, side: Side) -> &SideRows {
        match side {
            Side::Blue => &self.blue,
            Side::Red => &self.red,
        }
    }

    fn side_mut(&mut self, side: Side) -> &mut SideRows {
        match side {
            Side::Blue => &mut self.blue,
            Side::Red => &mut self.red,
        }
    }

    pub fn player_row_count(&self) -> usize {
        self.blue.players.len() + self.red.players.len()
    }

    /// Winning side, from the team rows first and the player rows otherwise. Both sides
    /// claiming the same result means there is no winner.
    pub fn winner(&self) -> Option<Side> {
        match (self.blue.won(), self.red.won()) {
            (Some(blue), Some(red)) if blue == red => None,
            (Some(true), _) | (_, Some(false)) => Some(Side::Blue),
            (Some(false), _) | (_, Some(true)) => Some(Side::Red),
            (None, None) => None,
        }
    }

    pub fn has_conflicting_results(&self) -> bool {
        matches!((self.blue.won(), self.red.won()), (Some(blue), Some(red)) if blue == red)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedGame {
    pub game_key: String,
    pub stage: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestReport {
    pub rows: usize,
    pub games: usize,
    pub series: usize,
    pub splits: usize,
    pub teams: usize,
    pub players: usize,
    pub matches: usize,
    pub performances: usize,
    pub drafts: usize,
    pub objectives: usize,
    pub short_games: usize,
    pub duplicate_team_rows: usize,
    pub skipped_games: Vec<SkippedGame>,
}

impl IngestReport {
    fn skip(&mut self, game_key: &str, stage: &str, reason: impl Into<String>) {
        let reason = reason.into();
        warn!(game = %game_key, stage, %reason, "skipping game");
        self.skipped_games.push(SkippedGame {
            game_key: game_key.to_string(),
            stage: stage.to_string(),
            reason,
        });
    }
}

/// Everything one batch produced, in load order.
#[derive(Debug, Clone, Default)]
pub struct IngestedBatch {
    pub splits: Vec<SplitRecord>,
    pub series: Vec<SeriesRecord>,
    pub teams: Vec<TeamRecord>,
    pub players: Vec<PlayerRecord>,
    pub matches: Vec<MatchRecord>,
    pub performances: Vec<PerformanceRecord>,
    pub drafts: Vec<DraftRecord>,
    pub objectives: Vec<ObjectiveRecord>,
    pub report: IngestReport,
}

pub struct BulkIngestor {
    competition: String,
    objectives: Vec<String>,
    role_fallback: RoleFallback,
    min_players_per_side: usize,
    year_hint: Option<i32>,
}

impl BulkIngestor {
    pub fn new(settings: &PipelineSettings) -> Self {
        Self {
            competition: settings.competition.clone(),
            objectives: settings.objectives.clone(),
            role_fallback: settings.role_fallback.as_fn(),
            min_players_per_side: settings.min_players_per_side.max(1),
            year_hint: None,
        }
    }

    /// Season year to use for rows that carry neither a year nor a date.
    pub fn with_year_hint(mut self, year: Option<i32>) -> Self {
        self.year_hint = year;
        self
    }

    pub fn with_role_fallback(mut self, fallback: RoleFallback) -> Self {
        self.role_fallback = fallback;
        self
    }

    pub fn ingest(&self, rows: &[GameRow], identity: &mut IdentityMap) -> IngestedBatch {
        let mut report = IngestReport {
            rows: rows.len(),
            ..IngestReport::default()
        };
        let games = self.group_rows_into_games(rows, identity, &mut report);
        let series = self.group_games_into_series(&games);
        let by_key: HashMap<&str, &GameRecord> = games.iter().map(|g| (g.key.as_str(), g)).collect();

        let splits = self.extract_splits(&games);
        let teams = extract_teams(rows, identity);
        let players = extract_players(rows, identity);

        let mut matches = Vec::new();
        let mut performances = Vec::new();
        let mut drafts = Vec::new();
        let mut objectives = Vec::new();
        for record in &series {
            for (order, game_key) in record.game_keys.iter().enumerate() {
                let Some(game) = by_key.get(game_key.as_str()) else {
                    continue;
                };
                let Some(m) = self.extract_match(game, &record.key, order + 1, &mut report) else {
                    continue;
                };
                matches.push(m);
                if let Some(perfs) = self.extract_player_performances(game, identity, &mut report) {
                    performances.extend(perfs);
                }
                drafts.extend(self.extract_draft_selections(game));
                objectives.extend(self.extract_objective_tallies(game));
            }
        }

        report.games = games.len();
        report.series = series.len();
        report.splits = splits.len();
        report.teams = teams.len();
        report.players = players.len();
        report.matches = matches.len();
        report.performances = performances.len();
        report.drafts = drafts.len();
        report.objectives = objectives.len();
        info!(
            rows = report.rows,
            games = report.games,
            series = report.series,
            matches = report.matches,
            performances = report.performances,
            drafts = report.drafts,
            objectives = report.objectives,
            skipped_games = report.skipped_games.len(),
            "ingested bulk rows"
        );

        IngestedBatch {
            splits,
            series,
            teams,
            players,
            matches,
            performances,
            drafts,
            objectives,
            report,
        }
    }

    /// Group rows by game key, then by side into team and player rows. Games keep the
    /// order of their first row.
    pub fn group_rows_into_games(
        &self,
        rows: &[GameRow],
        identity: &mut IdentityMap,
        report: &mut IngestReport,
    ) -> Vec<GameRecord> {
        let mut games: Vec<GameRecord> = Vec::new();
        let mut index: HashMap<String, usize> = HashMap::new();

        for row in rows {
            let Some(side) = row.side else {
                continue;
            };
            let slot = match index.get(&row.game_key) {
                Some(&slot) => slot,
                None => {
                    let year = row.season_year().or(self.year_hint);
                    games.push(GameRecord {
                        key: row.game_key.clone(),
                        match_id: identity.resolve(EntityKind::Game, &row.game_key),
                        first_row_index: row.row_index,
                        league: row.league.clone(),
                        split: SplitRef::new(year, row.split.as_deref()),
                        raw_split: row.split.clone(),
                        playoffs: row.playoffs,
                        played_at: row.date,
                        game_number: row.game_number,
                        patch: row.patch.clone(),
                        duration_secs: row.game_length_secs,
                        blue: SideRows::default(),
                        red: SideRows::default(),
                    });
                    index.insert(row.game_key.clone(), games.len() - 1);
                    games.len() - 1
                }
            };
            let game = &mut games[slot];
            game.played_at = game.played_at.or(row.date);
            game.game_number = game.game_number.or(row.game_number);
            game.duration_secs = game.duration_secs.or(row.game_length_secs);
            if game.patch.is_none() {
                game.patch = row.patch.clone();
            }

            let rows_for_side = game.side_mut(side);
            if row.is_team_row() {
                if rows_for_side.team_row.is_some() {
                    rows_for_side.extra_team_rows += 1;
                    report.duplicate_team_rows += 1;
                    warn!(game = %row.game_key, row = row.row_index, %side, "duplicate team row ignored");
                } else {
                    rows_for_side.team_row = Some(row.clone());
                }
            } else {
                rows_for_side.players.push(row.clone());
            }
        }

        for game in &mut games {
            for side in [Side::Blue, Side::Red] {
                let team = side_team_ref(game.side(side), identity);
                game.side_mut(side).team = team;
            }
        }
        debug!(games = games.len(), "grouped rows into games");
        games
    }

    /// Single forward pass over chronologically ordered games. A series starts at the
    /// first game, at every game numbered 1, when the split changes, and when the game
    /// number fails to increase. A game without a number stands alone, and so does the
    /// game after it: neither can be placed in a series.
    pub fn group_games_into_series(&self, games: &[GameRecord]) -> Vec<SeriesRecord> {
        let mut series: Vec<SeriesRecord> = Vec::new();
        let mut counters: HashMap<(Option<i32>, String), usize> = HashMap::new();
        let mut last_number: Option<u32> = None;

        for game in games {
            if game.game_number.is_none() {
                warn!(game = %game.key, "game has no number; filed as its own series");
            }
            let starts_new = match series.last() {
                None => true,
                Some(current) => {
                    game.game_number.is_none()
                        || last_number.is_none()
                        || game.game_number == Some(1)
                        || current.split != game.split
                        || matches!((last_number, game.game_number), (Some(prev), Some(n)) if n <= prev)
                }
            };
            if starts_new {
                let token = split_series_token(game.raw_split.as_deref());
                let n = counters.entry((game.split.year, token.clone())).or_insert(0);
                *n += 1;
                let year = game
                    .split
                    .year
                    .map(|y| y.to_string())
                    .unwrap_or_else(|| "unknown".to_string());
                series.push(SeriesRecord {
                    key: format!("{year}_{token}_{n}"),
                    split: game.split.clone(),
                    played_on: game.played_at.map(|d| d.date()),
                    patch: game.patch.clone(),
                    playoffs: game.playoffs,
                    game_keys: Vec::new(),
                });
            }
            if let Some(current) = series.last_mut() {
                current.game_keys.push(game.key.clone());
            }
            last_number = game.game_number;
        }
        series
    }

    fn extract_splits(&self, games: &[GameRecord]) -> Vec<SplitRecord> {
        let mut splits: BTreeMap<String, SplitRecord> = BTreeMap::new();
        for game in games {
            let Some(year) = game.split.year else {
                continue;
            };
            let record = SplitRecord {
                split_type: game.split.split_type.clone(),
                year,
                league: self.competition.clone(),
            };
            splits.entry(record.id()).or_insert(record);
        }
        splits.into_values().collect()
    }

    fn extract_match(
        &self,
        game: &GameRecord,
        series_key: &str,
        order: usize,
        report: &mut IngestReport,
    ) -> Option<MatchRecord> {
        let (Some(blue), Some(red)) = (game.blue.team.clone(), game.red.team.clone()) else {
            report.skip(&game.key, "matches", "a side has no team reference");
            return None;
        };
        let Some(winner) = game.winner() else {
            let reason = if game.has_conflicting_results() {
                "both sides report the same result"
            } else {
                "no result on either side"
            };
            report.skip(&game.key, "matches", reason);
            return None;
        };
        Some(MatchRecord {
            id: game.match_id,
            game_key: game.key.clone(),
            series_key: series_key.to_string(),
            game_order: i32::try_from(order).unwrap_or(i32::MAX),
            played_at: game.played_at,
            duration_secs: game.duration_secs,
            blue,
            red,
            winner,
        })
    }

    /// Five player rows per side or nothing: role assignment is unreliable for short games.
    pub fn extract_player_performances(
        &self,
        game: &GameRecord,
        identity: &mut IdentityMap,
        report: &mut IngestReport,
    ) -> Option<Vec<PerformanceRecord>> {
        let (blue, red) = (game.blue.players.len(), game.red.players.len());
        let needed = self.min_players_per_side;
        if blue < needed || red < needed {
            report.short_games += 1;
            report.skip(
                &game.key,
                "performances",
                format!("{blue} blue / {red} red player rows, need {needed} per side"),
            );
            return None;
        }

        let mut records = Vec::with_capacity(needed * 2);
        for side in [Side::Blue, Side::Red] {
            let rows = game.side(side);
            if rows.players.len() > needed {
                warn!(game = %game.key, %side, rows = rows.players.len(), "extra player rows ignored");
            }
            for (ordinal, row) in rows.players.iter().take(needed).enumerate() {
                let player_id = row
                    .player_key
                    .as_deref()
                    .and_then(|k| non_blank(Some(k)))
                    .map(|k| identity.resolve(EntityKind::Player, k));
                records.push(PerformanceRecord {
                    match_id: game.match_id,
                    game_key: game.key.clone(),
                    player_id,
                    player_name: row.player_name.clone(),
                    team: rows.team.clone(),
                    champion: row.champion.clone(),
                    side,
                    side_slot: u8::try_from(ordinal).unwrap_or(u8::MAX),
                    position: resolve_role(row.position.as_deref(), ordinal, self.role_fallback),
                    won: row.result,
                    stats: row.stats.clone(),
                    snapshots: row.snapshots.clone(),
                });
            }
        }
        Some(records)
    }

    /// Picks come from the team row, slot by slot, falling back to the champion of the
    /// player row at the same position. A ban is only kept alongside a pick.
    pub fn extract_draft_selections(&self, game: &GameRecord) -> Vec<DraftRecord> {
        let mut records = Vec::new();
        for side in [Side::Blue, Side::Red] {
            let rows = game.side(side);
            let Some(team) = rows.team.clone() else {
                continue;
            };
            for slot in 0..5 {
                let from_team_row = rows.team_row.as_ref().and_then(|r| r.picks[slot].clone());
                let pick = from_team_row.or_else(|| rows.players.get(slot).and_then(|r| r.champion.clone()));
                let Some(pick) = pick else {
                    continue;
                };
                let ban = rows.team_row.as_ref().and_then(|r| r.bans[slot].clone());
                let order = (slot + 1) as u8;
                records.push(DraftRecord {
                    match_id: game.match_id,
                    game_key: game.key.clone(),
                    team: team.clone(),
                    pick_order: order,
                    champion_selected: pick,
                    ban_order: ban.as_ref().map(|_| order),
                    champion_banned: ban,
                });
            }
        }
        records
    }

    /// One tally per side with a team row; absent or unparseable counters are zero.
    pub fn extract_objective_tallies(&self, game: &GameRecord) -> Vec<ObjectiveRecord> {
        let mut records = Vec::new();
        for side in [Side::Blue, Side::Red] {
            let rows = game.side(side);
            let (Some(team_row), Some(team)) = (rows.team_row.as_ref(), rows.team.clone()) else {
                continue;
            };
            let counts = self
                .objectives
                .iter()
                .map(|name| {
                    let value = team_row
                        .counters
                        .get(name)
                        .and_then(|v| parse_int(v))
                        .unwrap_or(0);
                    (name.clone(), value)
                })
                .collect();
            records.push(ObjectiveRecord {
                match_id: game.match_id,
                game_key: game.key.clone(),
                team,
                counts,
            });
        }
        records
    }
}

/// Team id from the team row, then from the player rows; failing both, a name placeholder.
fn side_team_ref(rows: &SideRows, identity: &mut IdentityMap) -> Option<TeamRef> {
    let candidates = rows.team_row.iter().chain(rows.players.iter());
    let keyed = candidates
        .clone()
        .find_map(|r| r.team_key.as_deref().map(|k| (k, r.team_name.clone())));
    if let Some((key, name)) = keyed {
        let name = name.or_else(|| candidates.clone().find_map(|r| r.team_name.clone()));
        return Some(TeamRef::Known {
            id: identity.resolve(EntityKind::Team, key),
            name,
        });
    }
    candidates
        .clone()
        .find_map(|r| r.team_name.clone())
        .map(|name| TeamRef::Placeholder { name })
}

/// Every keyed team in the batch, with the latest name seen for it.
fn extract_teams(rows: &[GameRow], identity: &mut IdentityMap) -> Vec<TeamRecord> {
    let mut teams: BTreeMap<Uuid, TeamRecord> = BTreeMap::new();
    for row in rows {
        let Some(key) = row.team_key.as_deref() else {
            continue;
        };
        let id = identity.resolve(EntityKind::Team, key);
        let year = row.season_year();
        let entry = teams.entry(id).or_insert_with(|| TeamRecord {
            id,
            name: row.team_name.clone().unwrap_or_else(|| key.to_string()),
            last_seen_year: year,
        });
        if let Some(name) = &row.team_name {
            entry.name = name.clone();
        }
        entry.last_seen_year = entry.last_seen_year.max(year);
    }
    teams.into_values().collect()
}

/// Every keyed player in the batch, with their latest team.
fn extract_players(rows: &[GameRow], identity: &mut IdentityMap) -> Vec<PlayerRecord> {
    let mut players: BTreeMap<Uuid, PlayerRecord> = BTreeMap::new();
    for row in rows.iter().filter(|r| r.is_player_row()) {
        let Some(key) = row.player_key.as_deref() else {
            continue;
        };
        let id = identity.resolve(EntityKind::Player, key);
        let team_id = row
            .team_key
            .as_deref()
            .map(|k| identity.resolve(EntityKind::Team, k));
        let year = row.season_year();
        let entry = players.entry(id).or_insert_with(|| PlayerRecord {
            id,
            handle: row.player_name.clone().unwrap_or_else(|| key.to_string()),
            team_id,
            last_seen_year: year,
        });
        if year >= entry.last_seen_year {
            if let Some(name) = &row.player_name {
                entry.handle = name.clone();
            }
            if team_id.is_some() {
                entry.team_id = team_id;
            }
            entry.last_seen_year = year;
        }
    }
    players.into_values().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use lec_core::Role;

    const ROLES: [&str; 5] = ["top", "jng", "mid", "bot", "sup"];

    fn at(day: u32, hour: u32) -> Option<NaiveDateTime> {
        NaiveDate::from_ymd_opt(2025, 1, day).and_then(|d| d.and_hms_opt(hour, 0, 0))
    }

    fn player(game: &str, number: u32, side: Side, slot: usize, team: &str, won: bool, date: Option<NaiveDateTime>) -> GameRow {
        GameRow {
            game_key: game.into(),
            league: Some("LEC".into()),
            year: Some(2025),
            split: Some("Winter".into()),
            date,
            game_number: Some(number),
            side: Some(side),
            position: Some(ROLES[slot].into()),
            player_key: Some(format!("oe:player:{team}-{slot}")),
            player_name: Some(format!("{team}-{slot}")),
            team_key: Some(format!("oe:team:{team}")),
            team_name: Some(team.into()),
            champion: Some(format!("Champ{}{slot}", side.as_str())),
            result: Some(won),
            ..GameRow::default()
        }
    }

    fn team_row(game: &str, number: u32, side: Side, team: &str, won: bool, date: Option<NaiveDateTime>) -> GameRow {
        let mut row = GameRow {
            game_key: game.into(),
            league: Some("LEC".into()),
            year: Some(2025),
            split: Some("Winter".into()),
            date,
            game_number: Some(number),
            side: Some(side),
            position: Some("team".into()),
            team_key: Some(format!("oe:team:{team}")),
            team_name: Some(team.into()),
            result: Some(won),
            ..GameRow::default()
        };
        row.counters.insert("dragons".into(), if won { "3".into() } else { "1".into() });
        row.counters.insert("barons".into(), "nan".into());
        row
    }

    fn game_rows(game: &str, number: u32, day: u32, hour: u32) -> Vec<GameRow> {
        let date = at(day, hour);
        let mut rows = Vec::new();
        for slot in 0..5 {
            rows.push(player(game, number, Side::Blue, slot, "G2", true, date));
        }
        for slot in 0..5 {
            rows.push(player(game, number, Side::Red, slot, "FNC", false, date));
        }
        rows.push(team_row(game, number, Side::Blue, "G2", true, date));
        rows.push(team_row(game, number, Side::Red, "FNC", false, date));
        rows
    }

    fn ingestor() -> BulkIngestor {
        let settings = PipelineSettings {
            objectives: vec!["dragons".into(), "barons".into(), "heralds".into()],
            ..PipelineSettings::default()
        };
        BulkIngestor::new(&settings)
    }

    #[test]
    fn single_game_produces_full_record_set() {
        let mut identity = IdentityMap::new();
        let batch = ingestor().ingest(&game_rows("G1", 1, 18, 17), &mut identity);
        assert_eq!(batch.series.len(), 1);
        assert_eq!(batch.series[0].key, "2025_winter_1");
        assert_eq!(batch.series[0].best_of(), 1);
        assert_eq!(batch.splits.len(), 1);
        assert_eq!(batch.splits[0].id(), "Winter_2025");
        assert_eq!(batch.matches.len(), 1);
        assert_eq!(batch.matches[0].winner, Side::Blue);
        assert_eq!(batch.performances.len(), 10);
        assert_eq!(batch.drafts.len(), 10);
        assert_eq!(batch.objectives.len(), 2);
        assert_eq!(batch.teams.len(), 2);
        assert_eq!(batch.players.len(), 10);
        assert!(batch.report.skipped_games.is_empty());
    }

    #[test]
    fn series_boundaries_follow_game_numbers() {
        let mut rows = game_rows("A", 1, 18, 15);
        rows.extend(game_rows("B", 2, 18, 16));
        rows.extend(game_rows("C", 1, 19, 15));
        rows.extend(game_rows("D", 2, 19, 16));
        let mut identity = IdentityMap::new();
        let batch = ingestor().ingest(&rows, &mut identity);
        assert_eq!(batch.series.len(), 2);
        assert_eq!(batch.series[0].game_keys, vec!["A", "B"]);
        assert_eq!(batch.series[1].game_keys, vec!["C", "D"]);
        assert_eq!(batch.series[1].key, "2025_winter_2");
        let orders: Vec<i32> = batch.matches.iter().map(|m| m.game_order).collect();
        assert_eq!(orders, vec![1, 2, 1, 2]);
    }

    #[test]
    fn repeated_game_number_opens_a_new_series() {
        let mut rows = game_rows("A", 2, 18, 15);
        rows.extend(game_rows("B", 2, 18, 16));
        let mut identity = IdentityMap::new();
        let batch = ingestor().ingest(&rows, &mut identity);
        assert_eq!(batch.series.len(), 2);
    }

    #[test]
    fn unnumbered_games_never_share_a_series() {
        let mut rows = game_rows("A", 1, 18, 15);
        rows.extend(game_rows("B", 2, 18, 16));
        rows.extend(game_rows("C", 1, 19, 15));
        rows.extend(game_rows("D", 2, 19, 16));
        for row in rows.iter_mut().filter(|r| r.game_key == "B" || r.game_key == "C") {
            row.game_number = None;
        }
        let mut identity = IdentityMap::new();
        let batch = ingestor().ingest(&rows, &mut identity);
        let keys: Vec<Vec<String>> = batch.series.iter().map(|s| s.game_keys.clone()).collect();
        assert_eq!(keys, vec![vec!["A"], vec!["B"], vec!["C"], vec!["D"]]);
        assert_eq!(batch.series[3].key, "2025_winter_4");
        assert!(batch.series.iter().all(|s| s.best_of() == 1));
    }

    #[test]
    fn both_sides_claiming_the_win_skips_the_match() {
        let mut rows = game_rows("G1", 1, 18, 17);
        for row in rows.iter_mut().filter(|r| r.side == Some(Side::Red)) {
            row.result = Some(true);
        }
        let mut identity = IdentityMap::new();
        let batch = ingestor().ingest(&rows, &mut identity);
        assert!(batch.matches.is_empty());
        let skipped = &batch.report.skipped_games;
        assert_eq!(skipped.len(), 1);
        assert_eq!(skipped[0].stage, "matches");
        assert_eq!(skipped[0].reason, "both sides report the same result");
    }

    #[test]
    fn short_game_emits_match_but_no_performances() {
        let mut rows = game_rows("G1", 1, 18, 17);
        rows.remove(4);
        let mut identity = IdentityMap::new();
        let batch = ingestor().ingest(&rows, &mut identity);
        assert_eq!(batch.matches.len(), 1);
        assert!(batch.performances.is_empty());
        assert_eq!(batch.report.short_games, 1);
        assert_eq!(batch.report.skipped_games[0].stage, "performances");
    }

    #[test]
    fn role_fallback_applies_only_to_unusable_positions() {
        let mut rows = game_rows("G1", 1, 18, 17);
        rows[2].position = Some("flex".into());
        rows[3].position = None;
        let mut identity = IdentityMap::new();
        let batch = ingestor().ingest(&rows, &mut identity);
        assert_eq!(batch.performances[2].position, Some(Role::Mid));
        assert_eq!(batch.performances[3].position, Some(Role::Bottom));

        let mut identity = IdentityMap::new();
        let strict = ingestor().with_role_fallback(lec_core::normalize::no_role_fallback);
        let batch = strict.ingest(&rows, &mut identity);
        assert_eq!(batch.performances[2].position, None);
        assert_eq!(batch.performances[0].position, Some(Role::Top));
    }

    #[test]
    fn picks_fall_back_to_player_champions_and_bans_ride_along() {
        let mut rows = game_rows("G1", 1, 18, 17);
        rows[10].picks[0] = Some("Ahri".into());
        rows[10].bans[0] = Some("Azir".into());
        rows[10].bans[1] = Some("Vi".into());
        let mut identity = IdentityMap::new();
        let batch = ingestor().ingest(&rows, &mut identity);
        let blue: Vec<&DraftRecord> = batch
            .drafts
            .iter()
            .filter(|d| d.team.name() == Some("G2"))
            .collect();
        assert_eq!(blue.len(), 5);
        assert_eq!(blue[0].champion_selected, "Ahri");
        assert_eq!(blue[0].champion_banned.as_deref(), Some("Azir"));
        assert_eq!(blue[1].champion_selected, "ChampBlue1");
        assert_eq!(blue[1].ban_order, Some(2));
        assert_eq!(blue[2].champion_banned, None);
    }

    #[test]
    fn objective_counters_default_to_zero() {
        let mut identity = IdentityMap::new();
        let batch = ingestor().ingest(&game_rows("G1", 1, 18, 17), &mut identity);
        let blue = &batch.objectives[0];
        assert_eq!(blue.counts.get("dragons"), Some(&3));
        assert_eq!(blue.counts.get("barons"), Some(&0));
        assert_eq!(blue.counts.get("heralds"), Some(&0));
    }

    #[test]
    fn blank_team_id_becomes_name_placeholder() {
        let mut rows = game_rows("G1", 1, 18, 17);
        for row in rows.iter_mut().filter(|r| r.side == Some(Side::Red)) {
            row.team_key = None;
        }
        let mut identity = IdentityMap::new();
        let batch = ingestor().ingest(&rows, &mut identity);
        assert_eq!(
            batch.matches[0].red,
            TeamRef::Placeholder { name: "FNC".into() }
        );
        assert_eq!(batch.matches[0].red.display_key(), "Unknown_FNC");
        assert_eq!(batch.teams.len(), 1);
    }

    #[test]
    fn game_without_result_is_skipped_with_trace() {
        let mut rows = game_rows("G1", 1, 18, 17);
        for row in &mut rows {
            row.result = None;
        }
        let mut identity = IdentityMap::new();
        let batch = ingestor().ingest(&rows, &mut identity);
        assert!(batch.matches.is_empty());
        assert!(batch.performances.is_empty());
        assert_eq!(batch.report.skipped_games.len(), 1);
    }

    #[test]
    fn identities_are_stable_across_ingests() {
        let rows = game_rows("G1", 1, 18, 17);
        let mut identity = IdentityMap::new();
        let first = ingestor().ingest(&rows, &mut identity);
        let second = ingestor().ingest(&rows, &mut identity);
        assert_eq!(first.matches[0].id, second.matches[0].id);
        assert_eq!(first.teams, second.teams);
        assert_eq!(first.players, second.players);
    }

    #[test]
    fn year_hint_fills_missing_years() {
        let mut rows = game_rows("G1", 1, 18, 17);
        for row in &mut rows {
            row.year = None;
            row.date = None;
            row.split = None;
        }
        let mut identity = IdentityMap::new();
        let batch = ingestor().with_year_hint(Some(2024)).ingest(&rows, &mut identity);
        assert_eq!(batch.series[0].key, "2024_unknown_1");
        assert_eq!(batch.splits[0].id(), "Unknown_2024");
    }
}
