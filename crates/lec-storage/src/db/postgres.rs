use std::collections::HashSet;

use anyhow::{Context, Result};
use async_trait::async_trait;
use lec_core::{
    Champion, DraftSelection, Match, ObjectiveTally, Player, PlayerPerformance, Series, Split, Team,
};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::types::Json;
use sqlx::Row;
use tracing::info;
use uuid::Uuid;

use super::{BatchOutcome, EntityCounts, Store};

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .context("connecting to postgres")?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .context("running migrations")?;
        info!("migrations applied");
        Ok(())
    }
}

fn record_upsert(outcome: &mut BatchOutcome, row: &PgRow) -> Result<()> {
    let inserted: bool = row.try_get("inserted").context("reading upsert marker")?;
    if inserted {
        outcome.inserted += 1;
    } else {
        outcome.updated += 1;
    }
    Ok(())
}

fn record_insert(outcome: &mut BatchOutcome, rows_affected: u64) {
    if rows_affected > 0 {
        outcome.inserted += 1;
    } else {
        outcome.unchanged += 1;
    }
}

fn team_from_row(row: &PgRow) -> Result<Team> {
    Ok(Team {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        country: row.try_get("country")?,
        region: row.try_get("region")?,
        owner: row.try_get("owner")?,
        head_coach: row.try_get("head_coach")?,
        partners: row.try_get("partners")?,
        founded_on: row.try_get("founded_on")?,
        logo_ref: row.try_get("logo_ref")?,
        active: row.try_get("active")?,
    })
}

fn player_from_row(row: &PgRow) -> Result<Player> {
    Ok(Player {
        id: row.try_get("id")?,
        handle: row.try_get("handle")?,
        real_name: row.try_get("real_name")?,
        role: row.try_get("role")?,
        nationality: row.try_get("nationality")?,
        residency: row.try_get("residency")?,
        birth_date: row.try_get("birth_date")?,
        contract_from: row.try_get("contract_from")?,
        contract_until: row.try_get("contract_until")?,
        soloqueue_ids: row.try_get("soloqueue_ids")?,
        image_ref: row.try_get("image_ref")?,
        team_id: row.try_get("team_id")?,
        active: row.try_get("active")?,
        placeholder: row.try_get("placeholder")?,
    })
}

#[async_trait]
impl Store for PgStore {
    fn backend_name(&self) -> &'static str {
        "postgres"
    }

    async fn champions(&self) -> Result<Vec<Champion>> {
        let rows = sqlx::query("SELECT id, name, image_ref FROM champions ORDER BY name")
            .fetch_all(&self.pool)
            .await
            .context("loading champions")?;
        rows.iter()
            .map(|row| -> Result<Champion> {
                Ok(Champion {
                    id: row.try_get("id")?,
                    name: row.try_get("name")?,
                    image_ref: row.try_get("image_ref")?,
                })
            })
            .collect()
    }

    async fn upsert_champions(&self, batch: &[Champion]) -> Result<BatchOutcome> {
        let mut tx = self.pool.begin().await.context("beginning champion batch")?;
        let mut outcome = BatchOutcome::default();
        for champion in batch {
            let row = sqlx::query(
                r#"
                INSERT INTO champions (id, name, normalized_name, image_ref)
                VALUES ($1, $2, $3, $4)
                ON CONFLICT (normalized_name) DO UPDATE
                SET name = EXCLUDED.name,
                    image_ref = COALESCE(EXCLUDED.image_ref, champions.image_ref)
                RETURNING (xmax = 0) AS inserted
                "#,
            )
            .bind(champion.id)
            .bind(&champion.name)
            .bind(champion.normalized_name())
            .bind(&champion.image_ref)
            .fetch_one(&mut *tx)
            .await
            .with_context(|| format!("upserting champion {}", champion.name))?;
            record_upsert(&mut outcome, &row)?;
        }
        tx.commit().await.context("committing champion batch")?;
        Ok(outcome)
    }

    async fn split_ids(&self) -> Result<HashSet<String>> {
        let rows = sqlx::query("SELECT id FROM splits")
            .fetch_all(&self.pool)
            .await
            .context("loading split ids")?;
        rows.iter()
            .map(|row| row.try_get::<String, _>("id").map_err(anyhow::Error::from))
            .collect()
    }

    async fn insert_splits(&self, batch: &[Split]) -> Result<BatchOutcome> {
        let mut tx = self.pool.begin().await.context("beginning split batch")?;
        let mut outcome = BatchOutcome::default();
        for split in batch {
            let result = sqlx::query(
                r#"
                INSERT INTO splits (id, split_type, year, league)
                VALUES ($1, $2, $3, $4)
                ON CONFLICT DO NOTHING
                "#,
            )
            .bind(&split.id)
            .bind(&split.split_type)
            .bind(split.year)
            .bind(&split.league)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("inserting split {}", split.id))?;
            record_insert(&mut outcome, result.rows_affected());
        }
        tx.commit().await.context("committing split batch")?;
        Ok(outcome)
    }

    async fn series_ids(&self) -> Result<HashSet<String>> {
        let rows = sqlx::query("SELECT id FROM series")
            .fetch_all(&self.pool)
            .await
            .context("loading series ids")?;
        rows.iter()
            .map(|row| row.try_get::<String, _>("id").map_err(anyhow::Error::from))
            .collect()
    }

    async fn insert_series(&self, batch: &[Series]) -> Result<BatchOutcome> {
        let mut tx = self.pool.begin().await.context("beginning series batch")?;
        let mut outcome = BatchOutcome::default();
        for series in batch {
            let result = sqlx::query(
                r#"
                INSERT INTO series (id, split_id, played_on, best_of, num_games, patch, playoffs)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                ON CONFLICT (id) DO NOTHING
                "#,
            )
            .bind(&series.id)
            .bind(&series.split_id)
            .bind(series.played_on)
            .bind(series.best_of)
            .bind(series.num_games)
            .bind(&series.patch)
            .bind(series.playoffs)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("inserting series {}", series.id))?;
            record_insert(&mut outcome, result.rows_affected());
        }
        tx.commit().await.context("committing series batch")?;
        Ok(outcome)
    }

    async fn refresh_series_game_counts(&self, series_ids: &[String]) -> Result<usize> {
        if series_ids.is_empty() {
            return Ok(0);
        }
        let result = sqlx::query(
            r#"
            UPDATE series s
            SET num_games = counted.n,
                best_of = GREATEST(s.best_of, counted.inferred)
            FROM (
                SELECT
                    s2.id,
                    count(m.id)::INTEGER AS n,
                    (CASE
                        WHEN count(m.id) <= 1 THEN 1
                        WHEN count(m.id) = 2 THEN 3
                        WHEN count(m.id) = 3 AND bool_or(s2.playoffs) THEN 5
                        WHEN count(m.id) = 3 THEN 3
                        ELSE 5
                    END)::SMALLINT AS inferred
                FROM series s2
                LEFT JOIN matches m ON m.series_id = s2.id
                WHERE s2.id = ANY($1)
                GROUP BY s2.id
            ) counted
            WHERE s.id = counted.id
              AND (s.num_games <> counted.n OR s.best_of < counted.inferred)
            "#,
        )
        .bind(series_ids)
        .execute(&self.pool)
        .await
        .context("refreshing series game counts")?;
        Ok(result.rows_affected() as usize)
    }

    async fn teams(&self) -> Result<Vec<Team>> {
        let rows = sqlx::query(
            r#"
            SELECT id, name, country, region, owner, head_coach, partners, founded_on, logo_ref, active
            FROM teams
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .context("loading teams")?;
        rows.iter().map(team_from_row).collect()
    }

    async fn upsert_teams(&self, batch: &[Team]) -> Result<BatchOutcome> {
        let mut tx = self.pool.begin().await.context("beginning team batch")?;
        let mut outcome = BatchOutcome::default();
        for team in batch {
            let row = sqlx::query(
                r#"
                INSERT INTO teams (id, name, country, region, owner, head_coach, partners, founded_on, logo_ref, active)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                ON CONFLICT (id) DO UPDATE
                SET name = EXCLUDED.name,
                    country = EXCLUDED.country,
                    region = EXCLUDED.region,
                    owner = EXCLUDED.owner,
                    head_coach = EXCLUDED.head_coach,
                    partners = EXCLUDED.partners,
                    founded_on = EXCLUDED.founded_on,
                    logo_ref = EXCLUDED.logo_ref,
                    active = EXCLUDED.active,
                    updated_at = now()
                RETURNING (xmax = 0) AS inserted
                "#,
            )
            .bind(team.id)
            .bind(&team.name)
            .bind(&team.country)
            .bind(&team.region)
            .bind(&team.owner)
            .bind(&team.head_coach)
            .bind(&team.partners)
            .bind(team.founded_on)
            .bind(&team.logo_ref)
            .bind(team.active)
            .fetch_one(&mut *tx)
            .await
            .with_context(|| format!("upserting team {}", team.name))?;
            record_upsert(&mut outcome, &row)?;
        }
        tx.commit().await.context("committing team batch")?;
        Ok(outcome)
    }

    async fn players(&self) -> Result<Vec<Player>> {
        let rows = sqlx::query(
            r#"
            SELECT id, handle, real_name, role, nationality, residency, birth_date, contract_from,
                   contract_until, soloqueue_ids, image_ref, team_id, active, placeholder
            FROM players
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .context("loading players")?;
        rows.iter().map(player_from_row).collect()
    }

    async fn upsert_players(&self, batch: &[Player]) -> Result<BatchOutcome> {
        let mut tx = self.pool.begin().await.context("beginning player batch")?;
        let mut outcome = BatchOutcome::default();
        for player in batch {
            let row = sqlx::query(
                r#"
                INSERT INTO players (id, handle, real_name, role, nationality, residency, birth_date,
                                     contract_from, contract_until, soloqueue_ids, image_ref, team_id,
                                     active, placeholder)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
                ON CONFLICT (id) DO UPDATE
                SET handle = EXCLUDED.handle,
                    real_name = EXCLUDED.real_name,
                    role = EXCLUDED.role,
                    nationality = EXCLUDED.nationality,
                    residency = EXCLUDED.residency,
                    birth_date = EXCLUDED.birth_date,
                    contract_from = EXCLUDED.contract_from,
                    contract_until = EXCLUDED.contract_until,
                    soloqueue_ids = EXCLUDED.soloqueue_ids,
                    image_ref = EXCLUDED.image_ref,
                    team_id = EXCLUDED.team_id,
                    active = EXCLUDED.active,
                    placeholder = EXCLUDED.placeholder,
                    updated_at = now()
                RETURNING (xmax = 0) AS inserted
                "#,
            )
            .bind(player.id)
            .bind(&player.handle)
            .bind(&player.real_name)
            .bind(&player.role)
            .bind(&player.nationality)
            .bind(&player.residency)
            .bind(player.birth_date)
            .bind(player.contract_from)
            .bind(player.contract_until)
            .bind(&player.soloqueue_ids)
            .bind(&player.image_ref)
            .bind(player.team_id)
            .bind(player.active)
            .bind(player.placeholder)
            .fetch_one(&mut *tx)
            .await
            .with_context(|| format!("upserting player {}", player.handle))?;
            record_upsert(&mut outcome, &row)?;
        }
        tx.commit().await.context("committing player batch")?;
        Ok(outcome)
    }

    async fn match_ids(&self) -> Result<HashSet<Uuid>> {
        let rows = sqlx::query("SELECT id FROM matches")
            .fetch_all(&self.pool)
            .await
            .context("loading match ids")?;
        rows.iter()
            .map(|row| row.try_get::<Uuid, _>("id").map_err(anyhow::Error::from))
            .collect()
    }

    async fn upsert_matches(&self, batch: &[Match]) -> Result<BatchOutcome> {
        let mut tx = self.pool.begin().await.context("beginning match batch")?;
        let mut outcome = BatchOutcome::default();
        for m in batch {
            let row = sqlx::query(
                r#"
                INSERT INTO matches (id, series_id, game_order, played_at, duration_secs,
                                     blue_team_id, red_team_id, winner_team_id)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                ON CONFLICT (id) DO UPDATE
                SET series_id = EXCLUDED.series_id,
                    game_order = EXCLUDED.game_order,
                    played_at = EXCLUDED.played_at,
                    duration_secs = EXCLUDED.duration_secs,
                    blue_team_id = EXCLUDED.blue_team_id,
                    red_team_id = EXCLUDED.red_team_id,
                    winner_team_id = EXCLUDED.winner_team_id
                RETURNING (xmax = 0) AS inserted
                "#,
            )
            .bind(m.id)
            .bind(&m.series_id)
            .bind(m.game_order)
            .bind(m.played_at)
            .bind(m.duration_secs)
            .bind(m.blue_team_id)
            .bind(m.red_team_id)
            .bind(m.winner_team_id)
            .fetch_one(&mut *tx)
            .await
            .with_context(|| format!("upserting match {}", m.id))?;
            record_upsert(&mut outcome, &row)?;
        }
        tx.commit().await.context("committing match batch")?;
        Ok(outcome)
    }

    async fn upsert_performances(&self, batch: &[PlayerPerformance]) -> Result<BatchOutcome> {
        let mut tx = self.pool.begin().await.context("beginning performance batch")?;
        let mut outcome = BatchOutcome::default();
        for perf in batch {
            let s = &perf.stats;
            let row = sqlx::query(
                r#"
                INSERT INTO player_performances (
                    id, player_id, match_id, champion_id, side, position, won,
                    kills, deaths, assists, double_kills, triple_kills, quadra_kills, penta_kills,
                    first_blood_kill, first_blood_assist, first_blood_victim,
                    damage_to_champions, damage_taken, wards_placed, wards_killed,
                    control_wards_bought, vision_score, total_gold, total_cs,
                    minion_kills, monster_kills, monster_kills_own_jungle, monster_kills_enemy_jungle,
                    snapshots
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17,
                        $18, $19, $20, $21, $22, $23, $24, $25, $26, $27, $28, $29, $30)
                ON CONFLICT (player_id, match_id) DO UPDATE
                SET champion_id = EXCLUDED.champion_id,
                    side = EXCLUDED.side,
                    position = EXCLUDED.position,
                    won = EXCLUDED.won,
                    kills = EXCLUDED.kills,
                    deaths = EXCLUDED.deaths,
                    assists = EXCLUDED.assists,
                    double_kills = EXCLUDED.double_kills,
                    triple_kills = EXCLUDED.triple_kills,
                    quadra_kills = EXCLUDED.quadra_kills,
                    penta_kills = EXCLUDED.penta_kills,
                    first_blood_kill = EXCLUDED.first_blood_kill,
                    first_blood_assist = EXCLUDED.first_blood_assist,
                    first_blood_victim = EXCLUDED.first_blood_victim,
                    damage_to_champions = EXCLUDED.damage_to_champions,
                    damage_taken = EXCLUDED.damage_taken,
                    wards_placed = EXCLUDED.wards_placed,
                    wards_killed = EXCLUDED.wards_killed,
                    control_wards_bought = EXCLUDED.control_wards_bought,
                    vision_score = EXCLUDED.vision_score,
                    total_gold = EXCLUDED.total_gold,
                    total_cs = EXCLUDED.total_cs,
                    minion_kills = EXCLUDED.minion_kills,
                    monster_kills = EXCLUDED.monster_kills,
                    monster_kills_own_jungle = EXCLUDED.monster_kills_own_jungle,
                    monster_kills_enemy_jungle = EXCLUDED.monster_kills_enemy_jungle,
                    snapshots = EXCLUDED.snapshots
                RETURNING (xmax = 0) AS inserted
                "#,
            )
            .bind(perf.id)
            .bind(perf.player_id)
            .bind(perf.match_id)
            .bind(perf.champion_id)
            .bind(perf.side.as_str())
            .bind(perf.position.map(|r| r.as_str()))
            .bind(perf.won)
            .bind(s.kills)
            .bind(s.deaths)
            .bind(s.assists)
            .bind(s.double_kills)
            .bind(s.triple_kills)
            .bind(s.quadra_kills)
            .bind(s.penta_kills)
            .bind(s.first_blood_kill)
            .bind(s.first_blood_assist)
            .bind(s.first_blood_victim)
            .bind(s.damage_to_champions)
            .bind(s.damage_taken)
            .bind(s.wards_placed)
            .bind(s.wards_killed)
            .bind(s.control_wards_bought)
            .bind(s.vision_score)
            .bind(s.total_gold)
            .bind(s.total_cs)
            .bind(s.minion_kills)
            .bind(s.monster_kills)
            .bind(s.monster_kills_own_jungle)
            .bind(s.monster_kills_enemy_jungle)
            .bind(Json(&perf.snapshots))
            .fetch_one(&mut *tx)
            .await
            .with_context(|| {
                format!("upserting performance of player {} in match {}", perf.player_id, perf.match_id)
            })?;
            record_upsert(&mut outcome, &row)?;
        }
        tx.commit().await.context("committing performance batch")?;
        Ok(outcome)
    }

    async fn upsert_draft_selections(&self, batch: &[DraftSelection]) -> Result<BatchOutcome> {
        let mut tx = self.pool.begin().await.context("beginning draft batch")?;
        let mut outcome = BatchOutcome::default();
        for draft in batch {
            let row = sqlx::query(
                r#"
                INSERT INTO draft_selections (id, team_id, match_id, pick_order, champion_selected_id,
                                              ban_order, champion_banned_id)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                ON CONFLICT (team_id, match_id, pick_order) DO UPDATE
                SET champion_selected_id = EXCLUDED.champion_selected_id,
                    ban_order = EXCLUDED.ban_order,
                    champion_banned_id = EXCLUDED.champion_banned_id
                RETURNING (xmax = 0) AS inserted
                "#,
            )
            .bind(draft.id)
            .bind(draft.team_id)
            .bind(draft.match_id)
            .bind(draft.pick_order)
            .bind(draft.champion_selected_id)
            .bind(draft.ban_order)
            .bind(draft.champion_banned_id)
            .fetch_one(&mut *tx)
            .await
            .with_context(|| {
                format!("upserting draft pick {} of team {} in match {}", draft.pick_order, draft.team_id, draft.match_id)
            })?;
            record_upsert(&mut outcome, &row)?;
        }
        tx.commit().await.context("committing draft batch")?;
        Ok(outcome)
    }

    async fn upsert_objective_tallies(&self, batch: &[ObjectiveTally]) -> Result<BatchOutcome> {
        let mut tx = self.pool.begin().await.context("beginning objective batch")?;
        let mut outcome = BatchOutcome::default();
        for tally in batch {
            let row = sqlx::query(
                r#"
                INSERT INTO objective_tallies (id, match_id, team_id, counts)
                VALUES ($1, $2, $3, $4)
                ON CONFLICT (match_id, team_id) DO UPDATE
                SET counts = EXCLUDED.counts
                RETURNING (xmax = 0) AS inserted
                "#,
            )
            .bind(tally.id)
            .bind(tally.match_id)
            .bind(tally.team_id)
            .bind(Json(&tally.counts))
            .fetch_one(&mut *tx)
            .await
            .with_context(|| format!("upserting objectives of team {} in match {}", tally.team_id, tally.match_id))?;
            record_upsert(&mut outcome, &row)?;
        }
        tx.commit().await.context("committing objective batch")?;
        Ok(outcome)
    }

    async fn counts(&self) -> Result<EntityCounts> {
        let row = sqlx::query(
            r#"
            SELECT
                (SELECT count(*) FROM champions) AS champions,
                (SELECT count(*) FROM splits) AS splits,
                (SELECT count(*) FROM series) AS series,
                (SELECT count(*) FROM teams) AS teams,
                (SELECT count(*) FROM players) AS players,
                (SELECT count(*) FROM matches) AS matches,
                (SELECT count(*) FROM player_performances) AS performances,
                (SELECT count(*) FROM draft_selections) AS draft_selections,
                (SELECT count(*) FROM objective_tallies) AS objective_tallies
            "#,
        )
        .fetch_one(&self.pool)
        .await
        .context("counting entities")?;
        let get = |col: &str| -> Result<u64> {
            let n: i64 = row.try_get(col).with_context(|| format!("reading count {col}"))?;
            Ok(n.max(0) as u64)
        };
        Ok(EntityCounts {
            champions: get("champions")?,
            splits: get("splits")?,
            series: get("series")?,
            teams: get("teams")?,
            players: get("players")?,
            matches: get("matches")?,
            performances: get("performances")?,
            draft_selections: get("draft_selections")?,
            objective_tallies: get("objective_tallies")?,
        })
    }
}
