//! Relational store contract used by the reconciliation loader and roster sync.
//!
//! Every batch method runs as one unit: either the whole batch is applied or none of it.

use std::collections::HashSet;

use anyhow::Result;
use async_trait::async_trait;
use lec_core::{
    Champion, DraftSelection, Match, ObjectiveTally, Player, PlayerPerformance, Series, Split, Team,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub mod memory;
pub mod postgres;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchOutcome {
    pub inserted: usize,
    pub updated: usize,
    /// Rows the store already held and left untouched.
    pub unchanged: usize,
}

impl BatchOutcome {
    pub fn merge(&mut self, other: BatchOutcome) {
        self.inserted += other.inserted;
        self.updated += other.updated;
        self.unchanged += other.unchanged;
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityCounts {
    pub champions: u64,
    pub splits: u64,
    pub series: u64,
    pub teams: u64,
    pub players: u64,
    pub matches: u64,
    pub performances: u64,
    pub draft_selections: u64,
    pub objective_tallies: u64,
}

#[async_trait]
pub trait Store: Send + Sync {
    fn backend_name(&self) -> &'static str;

    async fn champions(&self) -> Result<Vec<Champion>>;
    async fn upsert_champions(&self, batch: &[Champion]) -> Result<BatchOutcome>;

    async fn split_ids(&self) -> Result<HashSet<String>>;
    /// Existing splits are left untouched.
    async fn insert_splits(&self, batch: &[Split]) -> Result<BatchOutcome>;

    async fn series_ids(&self) -> Result<HashSet<String>>;
    /// Existing series are left untouched.
    async fn insert_series(&self, batch: &[Series]) -> Result<BatchOutcome>;
    /// Recompute `num_games` from the stored matches of each listed series, raising
    /// `best_of` when the stored games no longer fit it.
    async fn refresh_series_game_counts(&self, series_ids: &[String]) -> Result<usize>;

    async fn teams(&self) -> Result<Vec<Team>>;
    async fn upsert_teams(&self, batch: &[Team]) -> Result<BatchOutcome>;

    async fn players(&self) -> Result<Vec<Player>>;
    async fn upsert_players(&self, batch: &[Player]) -> Result<BatchOutcome>;

    async fn match_ids(&self) -> Result<HashSet<Uuid>>;
    async fn upsert_matches(&self, batch: &[Match]) -> Result<BatchOutcome>;

    /// Keyed by (player, match).
    async fn upsert_performances(&self, batch: &[PlayerPerformance]) -> Result<BatchOutcome>;
    /// Keyed by (team, match, pick order).
    async fn upsert_draft_selections(&self, batch: &[DraftSelection]) -> Result<BatchOutcome>;
    /// Keyed by (match, team).
    async fn upsert_objective_tallies(&self, batch: &[ObjectiveTally]) -> Result<BatchOutcome>;

    async fn counts(&self) -> Result<EntityCounts>;
}
