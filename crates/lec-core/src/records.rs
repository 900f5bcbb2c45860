//! Typed handoff records between the bulk decoder, the ingestor and the loader.

use std::collections::BTreeMap;

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::normalize;
use crate::{Role, Side, StatLine, TimelineSnapshot};

pub const TEAM_POSITION: &str = "team";

/// One decoded line of the bulk game log. Every column except the game key is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GameRow {
    pub row_index: usize,
    pub game_key: String,
    pub league: Option<String>,
    pub year: Option<i32>,
    pub split: Option<String>,
    pub playoffs: bool,
    pub date: Option<NaiveDateTime>,
    pub game_number: Option<u32>,
    pub patch: Option<String>,
    pub side: Option<Side>,
    pub position: Option<String>,
    pub player_key: Option<String>,
    pub player_name: Option<String>,
    pub team_key: Option<String>,
    pub team_name: Option<String>,
    pub champion: Option<String>,
    pub picks: [Option<String>; 5],
    pub bans: [Option<String>; 5],
    pub game_length_secs: Option<i32>,
    pub result: Option<bool>,
    pub stats: StatLine,
    pub snapshots: Vec<TimelineSnapshot>,
    /// Raw values of the configured objective-counter columns present on this row.
    pub counters: BTreeMap<String, String>,
}

impl GameRow {
    pub fn is_team_row(&self) -> bool {
        self.position
            .as_deref()
            .is_some_and(|p| p.trim().eq_ignore_ascii_case(TEAM_POSITION))
    }

    pub fn is_player_row(&self) -> bool {
        !self.is_team_row()
    }

    pub fn season_year(&self) -> Option<i32> {
        self.year.or_else(|| self.date.map(|d| chrono::Datelike::year(&d)))
    }
}

/// Reference to a team as seen in the bulk log.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TeamRef {
    Known { id: Uuid, name: Option<String> },
    /// Team-aggregate row with a blank team id; resolved later by display name.
    Placeholder { name: String },
}

impl TeamRef {
    pub fn name(&self) -> Option<&str> {
        match self {
            TeamRef::Known { name, .. } => name.as_deref(),
            TeamRef::Placeholder { name } => Some(name.as_str()),
        }
    }

    pub fn id(&self) -> Option<Uuid> {
        match self {
            TeamRef::Known { id, .. } => Some(*id),
            TeamRef::Placeholder { .. } => None,
        }
    }

    pub fn placeholder_key(name: &str) -> String {
        format!("Unknown_{name}")
    }

    pub fn display_key(&self) -> String {
        match self {
            TeamRef::Known { id, .. } => id.to_string(),
            TeamRef::Placeholder { name } => Self::placeholder_key(name),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitRecord {
    pub split_type: String,
    pub year: i32,
    pub league: String,
}

impl SplitRecord {
    pub fn id(&self) -> String {
        crate::split_id(&self.split_type, self.year)
    }
}

/// A split as referenced by a series; the year may be unknown.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitRef {
    pub year: Option<i32>,
    pub split_type: String,
}

impl SplitRef {
    pub fn new(year: Option<i32>, raw_split: Option<&str>) -> Self {
        Self {
            year,
            split_type: normalize::split_type_label(raw_split),
        }
    }

    pub fn id(&self) -> Option<String> {
        self.year.map(|y| crate::split_id(&self.split_type, y))
    }

    /// Best-effort id used when the referenced split is missing from the store.
    pub fn unknown_fallback_id(&self) -> Option<String> {
        self.year
            .map(|y| crate::split_id(normalize::UNKNOWN_SPLIT, y))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeriesRecord {
    pub key: String,
    pub split: SplitRef,
    pub played_on: Option<NaiveDate>,
    pub patch: Option<String>,
    pub playoffs: bool,
    pub game_keys: Vec<String>,
}

impl SeriesRecord {
    pub fn best_of(&self) -> i16 {
        crate::infer_best_of(self.game_keys.len(), self.playoffs)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeamRecord {
    pub id: Uuid,
    pub name: String,
    pub last_seen_year: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerRecord {
    pub id: Uuid,
    pub handle: String,
    pub team_id: Option<Uuid>,
    pub last_seen_year: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchRecord {
    pub id: Uuid,
    pub game_key: String,
    pub series_key: String,
    pub game_order: i32,
    pub played_at: Option<NaiveDateTime>,
    pub duration_secs: Option<i32>,
    pub blue: TeamRef,
    pub red: TeamRef,
    pub winner: Side,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceRecord {
    pub match_id: Uuid,
    pub game_key: String,
    pub player_id: Option<Uuid>,
    pub player_name: Option<String>,
    pub team: Option<TeamRef>,
    pub champion: Option<String>,
    pub side: Side,
    /// Ordinal of the player row within its side, in input order.
    pub side_slot: u8,
    pub position: Option<Role>,
    pub won: Option<bool>,
    pub stats: StatLine,
    pub snapshots: Vec<TimelineSnapshot>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DraftRecord {
    pub match_id: Uuid,
    pub game_key: String,
    pub team: TeamRef,
    pub pick_order: u8,
    pub champion_selected: String,
    pub ban_order: Option<u8>,
    pub champion_banned: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectiveRecord {
    pub match_id: Uuid,
    pub game_key: String,
    pub team: TeamRef,
    pub counts: BTreeMap<String, i64>,
}

/// Roster metadata pushed by the wiki source.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeamProfile {
    pub name: String,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default)]
    pub head_coach: Option<String>,
    #[serde(default)]
    pub partners: Option<String>,
    #[serde(default)]
    pub founded: Option<String>,
    #[serde(default)]
    pub logo: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerProfile {
    pub handle: String,
    pub team: String,
    #[serde(default)]
    pub real_name: Option<String>,
    #[serde(default)]
    pub residency: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub birth_date: Option<String>,
    #[serde(default)]
    pub soloqueue_ids: Vec<String>,
    #[serde(default)]
    pub contract_from: Option<String>,
    #[serde(default)]
    pub contract_until: Option<String>,
    #[serde(default)]
    pub image: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RosterSnapshot {
    #[serde(default)]
    pub current_teams: Vec<TeamProfile>,
    #[serde(default)]
    pub historical_teams: Vec<TeamProfile>,
    #[serde(default)]
    pub players: Vec<PlayerProfile>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChampionEntry {
    pub name: String,
    #[serde(default)]
    pub image: Option<String>,
}
