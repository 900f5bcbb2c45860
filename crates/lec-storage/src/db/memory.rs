//! In-process store with the same key and reference constraints as the SQL schema.

use std::collections::{BTreeMap, HashSet};

use anyhow::{bail, Result};
use async_trait::async_trait;
use lec_core::{
    infer_best_of, Champion, DraftSelection, Match, ObjectiveTally, Player, PlayerPerformance, Series,
    Split, Team,
};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{BatchOutcome, EntityCounts, Store};

#[derive(Debug, Default, Clone)]
pub struct MemoryTables {
    pub champions: BTreeMap<String, Champion>,
    pub splits: BTreeMap<String, Split>,
    pub series: BTreeMap<String, Series>,
    pub teams: BTreeMap<Uuid, Team>,
    pub players: BTreeMap<Uuid, Player>,
    pub matches: BTreeMap<Uuid, Match>,
    pub performances: BTreeMap<(Uuid, Uuid), PlayerPerformance>,
    pub draft_selections: BTreeMap<(Uuid, Uuid, i16), DraftSelection>,
    pub objective_tallies: BTreeMap<(Uuid, Uuid), ObjectiveTally>,
}

impl MemoryTables {
    fn champion_exists(&self, id: Uuid) -> bool {
        self.champions.values().any(|c| c.id == id)
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<MemoryTables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn tables(&self) -> MemoryTables {
        self.tables.lock().await.clone()
    }
}

fn upsert<K: Ord, V>(map: &mut BTreeMap<K, V>, key: K, value: V, outcome: &mut BatchOutcome) {
    if map.insert(key, value).is_some() {
        outcome.updated += 1;
    } else {
        outcome.inserted += 1;
    }
}

#[async_trait]
impl Store for MemoryStore {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    async fn champions(&self) -> Result<Vec<Champion>> {
        Ok(self.tables.lock().await.champions.values().cloned().collect())
    }

    async fn upsert_champions(&self, batch: &[Champion]) -> Result<BatchOutcome> {
        let mut tables = self.tables.lock().await;
        let mut outcome = BatchOutcome::default();
        for champion in batch {
            let key = champion.normalized_name();
            let mut row = champion.clone();
            if let Some(existing) = tables.champions.get(&key) {
                row.id = existing.id;
                row.image_ref = row.image_ref.or_else(|| existing.image_ref.clone());
            }
            upsert(&mut tables.champions, key, row, &mut outcome);
        }
        Ok(outcome)
    }

    async fn split_ids(&self) -> Result<HashSet<String>> {
        Ok(self.tables.lock().await.splits.keys().cloned().collect())
    }

    async fn insert_splits(&self, batch: &[Split]) -> Result<BatchOutcome> {
        let mut tables = self.tables.lock().await;
        let mut outcome = BatchOutcome::default();
        for split in batch {
            if tables.splits.contains_key(&split.id) {
                outcome.unchanged += 1;
            } else {
                tables.splits.insert(split.id.clone(), split.clone());
                outcome.inserted += 1;
            }
        }
        Ok(outcome)
    }

    async fn series_ids(&self) -> Result<HashSet<String>> {
        Ok(self.tables.lock().await.series.keys().cloned().collect())
    }

    async fn insert_series(&self, batch: &[Series]) -> Result<BatchOutcome> {
        let mut tables = self.tables.lock().await;
        for series in batch {
            if !tables.splits.contains_key(&series.split_id) {
                bail!("series {} references missing split {}", series.id, series.split_id);
            }
        }
        let mut outcome = BatchOutcome::default();
        for series in batch {
            if tables.series.contains_key(&series.id) {
                outcome.unchanged += 1;
            } else {
                tables.series.insert(series.id.clone(), series.clone());
                outcome.inserted += 1;
            }
        }
        Ok(outcome)
    }

    async fn refresh_series_game_counts(&self, series_ids: &[String]) -> Result<usize> {
        let mut tables = self.tables.lock().await;
        let mut changed = 0usize;
        for id in series_ids {
            let count = tables.matches.values().filter(|m| &m.series_id == id).count();
            let n = i32::try_from(count).unwrap_or(i32::MAX);
            if let Some(series) = tables.series.get_mut(id) {
                let best_of = series.best_of.max(infer_best_of(count, series.playoffs));
                if series.num_games != n || series.best_of != best_of {
                    series.num_games = n;
                    series.best_of = best_of;
                    changed += 1;
                }
            }
        }
        Ok(changed)
    }

    async fn teams(&self) -> Result<Vec<Team>> {
        Ok(self.tables.lock().await.teams.values().cloned().collect())
    }

    async fn upsert_teams(&self, batch: &[Team]) -> Result<BatchOutcome> {
        let mut tables = self.tables.lock().await;
        let mut outcome = BatchOutcome::default();
        for team in batch {
            upsert(&mut tables.teams, team.id, team.clone(), &mut outcome);
        }
        Ok(outcome)
    }

    async fn players(&self) -> Result<Vec<Player>> {
        Ok(self.tables.lock().await.players.values().cloned().collect())
    }

    async fn upsert_players(&self, batch: &[Player]) -> Result<BatchOutcome> {
        let mut tables = self.tables.lock().await;
        for player in batch {
            if let Some(team_id) = player.team_id {
                if !tables.teams.contains_key(&team_id) {
                    bail!("player {} references missing team {team_id}", player.id);
                }
            }
        }
        let mut outcome = BatchOutcome::default();
        for player in batch {
            upsert(&mut tables.players, player.id, player.clone(), &mut outcome);
        }
        Ok(outcome)
    }

    async fn match_ids(&self) -> Result<HashSet<Uuid>> {
        Ok(self.tables.lock().await.matches.keys().copied().collect())
    }

    async fn upsert_matches(&self, batch: &[Match]) -> Result<BatchOutcome> {
        let mut tables = self.tables.lock().await;
        for m in batch {
            m.validate()?;
            if !tables.series.contains_key(&m.series_id) {
                bail!("match {} references missing series {}", m.id, m.series_id);
            }
            for team in [m.blue_team_id, m.red_team_id] {
                if !tables.teams.contains_key(&team) {
                    bail!("match {} references missing team {team}", m.id);
                }
            }
        }
        let mut outcome = BatchOutcome::default();
        for m in batch {
            upsert(&mut tables.matches, m.id, m.clone(), &mut outcome);
        }
        Ok(outcome)
    }

    async fn upsert_performances(&self, batch: &[PlayerPerformance]) -> Result<BatchOutcome> {
        let mut tables = self.tables.lock().await;
        for perf in batch {
            if !tables.players.contains_key(&perf.player_id) {
                bail!("performance references missing player {}", perf.player_id);
            }
            if !tables.matches.contains_key(&perf.match_id) {
                bail!("performance references missing match {}", perf.match_id);
            }
            if !tables.champion_exists(perf.champion_id) {
                bail!("performance references missing champion {}", perf.champion_id);
            }
        }
        let mut outcome = BatchOutcome::default();
        for perf in batch {
            let key = (perf.player_id, perf.match_id);
            let mut row = perf.clone();
            if let Some(existing) = tables.performances.get(&key) {
                row.id = existing.id;
            }
            upsert(&mut tables.performances, key, row, &mut outcome);
        }
        Ok(outcome)
    }

    async fn upsert_draft_selections(&self, batch: &[DraftSelection]) -> Result<BatchOutcome> {
        let mut tables = self.tables.lock().await;
        for draft in batch {
            if !tables.teams.contains_key(&draft.team_id) {
                bail!("draft selection references missing team {}", draft.team_id);
            }
            if !tables.matches.contains_key(&draft.match_id) {
                bail!("draft selection references missing match {}", draft.match_id);
            }
            for champion in [draft.champion_selected_id, draft.champion_banned_id].into_iter().flatten() {
                if !tables.champion_exists(champion) {
                    bail!("draft selection references missing champion {champion}");
                }
            }
            if let Some(selected) = draft.champion_selected_id {
                let clash = tables.draft_selections.values().any(|other| {
                    other.team_id == draft.team_id
                        && other.match_id == draft.match_id
                        && other.pick_order != draft.pick_order
                        && other.champion_selected_id == Some(selected)
                });
                if clash {
                    bail!(
                        "champion {selected} already selected by team {} in match {}",
                        draft.team_id,
                        draft.match_id
                    );
                }
            }
        }
        let mut outcome = BatchOutcome::default();
        for draft in batch {
            let key = (draft.team_id, draft.match_id, draft.pick_order);
            upsert(&mut tables.draft_selections, key, draft.clone(), &mut outcome);
        }
        Ok(outcome)
    }

    async fn upsert_objective_tallies(&self, batch: &[ObjectiveTally]) -> Result<BatchOutcome> {
        let mut tables = self.tables.lock().await;
        for tally in batch {
            if !tables.teams.contains_key(&tally.team_id) {
                bail!("objective tally references missing team {}", tally.team_id);
            }
            if !tables.matches.contains_key(&tally.match_id) {
                bail!("objective tally references missing match {}", tally.match_id);
            }
        }
        let mut outcome = BatchOutcome::default();
        for tally in batch {
            let key = (tally.match_id, tally.team_id);
            upsert(&mut tables.objective_tallies, key, tally.clone(), &mut outcome);
        }
        Ok(outcome)
    }

    async fn counts(&self) -> Result<EntityCounts> {
        let tables = self.tables.lock().await;
        Ok(EntityCounts {
            champions: tables.champions.len() as u64,
            splits: tables.splits.len() as u64,
            series: tables.series.len() as u64,
            teams: tables.teams.len() as u64,
            players: tables.players.len() as u64,
            matches: tables.matches.len() as u64,
            performances: tables.performances.len() as u64,
            draft_selections: tables.draft_selections.len() as u64,
            objective_tallies: tables.objective_tallies.len() as u64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lec_core::Side;

    async fn seeded() -> (MemoryStore, Uuid, Uuid) {
        let store = MemoryStore::new();
        store
            .insert_splits(&[Split::new("Spring", 2025, "LEC")])
            .await
            .expect("split");
        store
            .insert_series(&[Series {
                id: "2025_spring_1".into(),
                split_id: "Spring_2025".into(),
                played_on: None,
                best_of: 1,
                num_games: 1,
                patch: None,
                playoffs: false,
            }])
            .await
            .expect("series");
        let blue = Uuid::new_v4();
        let red = Uuid::new_v4();
        store
            .upsert_teams(&[Team::named(blue, "G2 Esports"), Team::named(red, "Fnatic")])
            .await
            .expect("teams");
        (store, blue, red)
    }

    #[tokio::test]
    async fn batch_with_dangling_reference_is_rejected_whole() {
        let (store, blue, red) = seeded().await;
        let good = Match::new(Uuid::new_v4(), "2025_spring_1", 1, blue, red, Side::Blue).expect("match");
        let dangling = Match::new(Uuid::new_v4(), "2025_spring_1", 2, blue, Uuid::new_v4(), Side::Blue)
            .expect("match");

        assert!(store.upsert_matches(&[good.clone(), dangling]).await.is_err());
        assert_eq!(store.counts().await.expect("counts").matches, 0);

        let outcome = store.upsert_matches(&[good.clone()]).await.expect("good batch");
        assert_eq!(outcome.inserted, 1);
        let again = store.upsert_matches(&[good]).await.expect("rerun");
        assert_eq!(again.updated, 1);
        assert_eq!(store.counts().await.expect("counts").matches, 1);
    }

    #[tokio::test]
    async fn series_counts_follow_stored_matches() {
        let (store, blue, red) = seeded().await;
        let m1 = Match::new(Uuid::new_v4(), "2025_spring_1", 1, blue, red, Side::Blue).expect("m1");
        let m2 = Match::new(Uuid::new_v4(), "2025_spring_1", 2, blue, red, Side::Red).expect("m2");
        store.upsert_matches(&[m1, m2]).await.expect("matches");

        let changed = store
            .refresh_series_game_counts(&["2025_spring_1".to_string()])
            .await
            .expect("refresh");
        assert_eq!(changed, 1);
        let tables = store.tables().await;
        let series = &tables.series["2025_spring_1"];
        assert_eq!(series.num_games, 2);
        assert_eq!(series.best_of, 3);
    }

    #[tokio::test]
    async fn champions_are_keyed_by_normalized_name() {
        let store = MemoryStore::new();
        store
            .upsert_champions(&[Champion::from_name("Kai'Sa", None)])
            .await
            .expect("first");
        let outcome = store
            .upsert_champions(&[Champion::from_name("KaiSa", Some("img/kaisa.png".into()))])
            .await
            .expect("second");
        assert_eq!(outcome.updated, 1);
        assert_eq!(store.champions().await.expect("champions").len(), 1);
    }
}
