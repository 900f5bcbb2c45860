//! Core domain model for LEC competitive statistics.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub mod identity;
pub mod normalize;
pub mod records;

pub use identity::{EntityKind, IdentityMap, IdentitySnapshot};
pub use records::*;

pub const CRATE_NAME: &str = "lec-core";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModelError {
    #[error("match {match_id}: blue and red sides reference the same team {team_id}")]
    SameTeamOnBothSides { match_id: Uuid, team_id: Uuid },
    #[error("match {match_id}: winner {winner} is neither the blue nor the red team")]
    WinnerNotParticipant { match_id: Uuid, winner: Uuid },
    #[error("draft selection for team {team_id} in match {match_id} has neither pick nor ban")]
    EmptyDraftSelection { team_id: Uuid, match_id: Uuid },
    #[error("unknown {kind} value: {value}")]
    UnknownVariant { kind: &'static str, value: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Side {
    Blue,
    Red,
}

impl Side {
    pub fn as_str(self) -> &'static str {
        match self {
            Side::Blue => "Blue",
            Side::Red => "Red",
        }
    }

    pub fn opposite(self) -> Side {
        match self {
            Side::Blue => Side::Red,
            Side::Red => Side::Blue,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Side {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "blue" => Ok(Side::Blue),
            "red" => Ok(Side::Red),
            _ => Err(ModelError::UnknownVariant {
                kind: "side",
                value: s.to_string(),
            }),
        }
    }
}

/// Lane position in the bulk game log's short form (`top`, `jng`, `mid`, `bot`, `sup`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Role {
    Top,
    Jungle,
    Mid,
    Bottom,
    Support,
}

impl Role {
    pub const ORDER: [Role; 5] = [Role::Top, Role::Jungle, Role::Mid, Role::Bottom, Role::Support];

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Top => "top",
            Role::Jungle => "jng",
            Role::Mid => "mid",
            Role::Bottom => "bot",
            Role::Support => "sup",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "top" => Ok(Role::Top),
            "jng" | "jungle" => Ok(Role::Jungle),
            "mid" | "middle" => Ok(Role::Mid),
            "bot" | "adc" | "bottom" => Ok(Role::Bottom),
            "sup" | "support" => Ok(Role::Support),
            _ => Err(ModelError::UnknownVariant {
                kind: "role",
                value: s.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Team {
    pub id: Uuid,
    pub name: String,
    pub country: Option<String>,
    pub region: Option<String>,
    pub owner: Option<String>,
    pub head_coach: Option<String>,
    pub partners: Option<String>,
    pub founded_on: Option<NaiveDate>,
    pub logo_ref: Option<String>,
    pub active: bool,
}

impl Team {
    pub fn named(id: Uuid, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            country: None,
            region: None,
            owner: None,
            head_coach: None,
            partners: None,
            founded_on: None,
            logo_ref: None,
            active: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Player {
    pub id: Uuid,
    pub handle: String,
    pub real_name: Option<String>,
    pub role: Option<String>,
    pub nationality: Option<String>,
    pub residency: Option<String>,
    pub birth_date: Option<NaiveDate>,
    pub contract_from: Option<NaiveDate>,
    pub contract_until: Option<NaiveDate>,
    pub soloqueue_ids: Option<String>,
    pub image_ref: Option<String>,
    pub team_id: Option<Uuid>,
    pub active: bool,
    pub placeholder: bool,
}

pub const PLACEHOLDER_PLAYER_HANDLE: &str = "Unknown";

impl Player {
    pub fn named(id: Uuid, handle: impl Into<String>, team_id: Option<Uuid>) -> Self {
        Self {
            id,
            handle: handle.into(),
            real_name: None,
            role: None,
            nationality: None,
            residency: None,
            birth_date: None,
            contract_from: None,
            contract_until: None,
            soloqueue_ids: None,
            image_ref: None,
            team_id,
            active: true,
            placeholder: false,
        }
    }

    /// Minimal stand-in for a performance whose player could not be resolved.
    /// The id is derived from the row's slot within its side so reruns reuse the same
    /// row and two unresolved players of one side never collide.
    pub fn placeholder(match_id: Uuid, side: Side, side_slot: u8, team_id: Option<Uuid>) -> Self {
        let slot = format!("{side}:{side_slot}");
        let mut player = Self::named(
            Uuid::new_v5(&match_id, slot.as_bytes()),
            PLACEHOLDER_PLAYER_HANDLE,
            team_id,
        );
        player.active = false;
        player.placeholder = true;
        player
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Champion {
    pub id: Uuid,
    pub name: String,
    pub image_ref: Option<String>,
}

impl Champion {
    /// Champions are keyed by normalized name, so the id is too.
    pub fn from_name(name: impl Into<String>, image_ref: Option<String>) -> Self {
        let name = name.into();
        let key = normalize::champion_key(&name);
        Self {
            id: Uuid::new_v5(&Uuid::NAMESPACE_URL, format!("lec:champion:{key}").as_bytes()),
            name,
            image_ref,
        }
    }

    pub fn normalized_name(&self) -> String {
        normalize::champion_key(&self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Split {
    pub id: String,
    pub split_type: String,
    pub year: i32,
    pub league: String,
}

impl Split {
    pub fn new(split_type: impl Into<String>, year: i32, league: impl Into<String>) -> Self {
        let split_type = split_type.into();
        Self {
            id: split_id(&split_type, year),
            split_type,
            year,
            league: league.into(),
        }
    }
}

pub fn split_id(split_type: &str, year: i32) -> String {
    format!("{split_type}_{year}")
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Series {
    pub id: String,
    pub split_id: String,
    pub played_on: Option<NaiveDate>,
    pub best_of: i16,
    pub num_games: i32,
    pub patch: Option<String>,
    pub playoffs: bool,
}

/// Best-of inference from the number of games observed in a series.
pub fn infer_best_of(num_games: usize, playoffs: bool) -> i16 {
    match num_games {
        0 | 1 => 1,
        2 => 3,
        3 if playoffs => 5,
        3 => 3,
        _ => 5,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Match {
    pub id: Uuid,
    pub series_id: String,
    pub game_order: i32,
    pub played_at: Option<NaiveDateTime>,
    pub duration_secs: Option<i32>,
    pub blue_team_id: Uuid,
    pub red_team_id: Uuid,
    pub winner_team_id: Uuid,
}

impl Match {
    pub fn new(
        id: Uuid,
        series_id: impl Into<String>,
        game_order: i32,
        blue_team_id: Uuid,
        red_team_id: Uuid,
        winner: Side,
    ) -> Result<Self, ModelError> {
        let winner_team_id = match winner {
            Side::Blue => blue_team_id,
            Side::Red => red_team_id,
        };
        let m = Self {
            id,
            series_id: series_id.into(),
            game_order,
            played_at: None,
            duration_secs: None,
            blue_team_id,
            red_team_id,
            winner_team_id,
        };
        m.validate()?;
        Ok(m)
    }

    pub fn validate(&self) -> Result<(), ModelError> {
        if self.blue_team_id == self.red_team_id {
            return Err(ModelError::SameTeamOnBothSides {
                match_id: self.id,
                team_id: self.blue_team_id,
            });
        }
        if self.winner_team_id != self.blue_team_id && self.winner_team_id != self.red_team_id {
            return Err(ModelError::WinnerNotParticipant {
                match_id: self.id,
                winner: self.winner_team_id,
            });
        }
        Ok(())
    }

    pub fn team_for(&self, side: Side) -> Uuid {
        match side {
            Side::Blue => self.blue_team_id,
            Side::Red => self.red_team_id,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatLine {
    pub kills: Option<i32>,
    pub deaths: Option<i32>,
    pub assists: Option<i32>,
    pub double_kills: Option<i32>,
    pub triple_kills: Option<i32>,
    pub quadra_kills: Option<i32>,
    pub penta_kills: Option<i32>,
    pub first_blood_kill: Option<bool>,
    pub first_blood_assist: Option<bool>,
    pub first_blood_victim: Option<bool>,
    pub damage_to_champions: Option<i64>,
    pub damage_taken: Option<i64>,
    pub wards_placed: Option<i32>,
    pub wards_killed: Option<i32>,
    pub control_wards_bought: Option<i32>,
    pub vision_score: Option<i32>,
    pub total_gold: Option<i32>,
    pub total_cs: Option<i32>,
    pub minion_kills: Option<i32>,
    pub monster_kills: Option<i32>,
    pub monster_kills_own_jungle: Option<i32>,
    pub monster_kills_enemy_jungle: Option<i32>,
}

/// Cumulative values at a fixed minute mark.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimelineSnapshot {
    pub minute: u8,
    pub gold: Option<i32>,
    pub xp: Option<i32>,
    pub cs: Option<i32>,
    pub kills: Option<i32>,
    pub assists: Option<i32>,
    pub deaths: Option<i32>,
}

pub const SNAPSHOT_MINUTES: [u8; 4] = [10, 15, 20, 25];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerPerformance {
    pub id: Uuid,
    pub player_id: Uuid,
    pub match_id: Uuid,
    pub champion_id: Uuid,
    pub side: Side,
    pub position: Option<Role>,
    pub won: Option<bool>,
    pub stats: StatLine,
    pub snapshots: Vec<TimelineSnapshot>,
}

impl PlayerPerformance {
    pub fn id_for(player_id: Uuid, match_id: Uuid) -> Uuid {
        Uuid::new_v5(&match_id, player_id.as_bytes())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DraftSelection {
    pub id: Uuid,
    pub team_id: Uuid,
    pub match_id: Uuid,
    pub pick_order: i16,
    pub champion_selected_id: Option<Uuid>,
    pub ban_order: Option<i16>,
    pub champion_banned_id: Option<Uuid>,
}

impl DraftSelection {
    pub fn new(
        team_id: Uuid,
        match_id: Uuid,
        pick_order: i16,
        champion_selected_id: Option<Uuid>,
        ban: Option<(i16, Uuid)>,
    ) -> Result<Self, ModelError> {
        if champion_selected_id.is_none() && ban.is_none() {
            return Err(ModelError::EmptyDraftSelection { team_id, match_id });
        }
        let slot = format!("draft:{team_id}:{pick_order}");
        Ok(Self {
            id: Uuid::new_v5(&match_id, slot.as_bytes()),
            team_id,
            match_id,
            pick_order,
            champion_selected_id,
            ban_order: ban.map(|(order, _)| order),
            champion_banned_id: ban.map(|(_, id)| id),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectiveTally {
    pub id: Uuid,
    pub match_id: Uuid,
    pub team_id: Uuid,
    pub counts: BTreeMap<String, i64>,
}

impl ObjectiveTally {
    pub fn new(match_id: Uuid, team_id: Uuid, counts: BTreeMap<String, i64>) -> Self {
        Self {
            id: Uuid::new_v5(&match_id, format!("objectives:{team_id}").as_bytes()),
            match_id,
            team_id,
            counts,
        }
    }
}
