//! Entity persistence.
//!
//! Every record type gets a [`Repository`] implementation. Inserts skip rows whose natural
//! key already exists (`ON CONFLICT DO NOTHING`) and each `create_many` call is one
//! transaction. The two link record types (club membership, chief judge) are applied as
//! updates on the row they link from.

use crate::records::{
    ChiefJudgeAssignment, Club, ClubMembership, Game, GameStatistic, ImportRecord, Player,
    PlayerYearStat, Tournament, TournamentJudge, TournamentParticipation,
};
use crate::repository::Repository;
use crate::{Error, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::{Sqlite, Transaction};

use super::Database;

/// Partial update of a player; `None` fields keep their stored value
#[derive(Debug, Clone, Default)]
pub struct PlayerUpdate {
    /// Given name
    pub first_name: Option<String>,
    /// Family name
    pub last_name: Option<String>,
    /// Year of birth
    pub birth_year: Option<i32>,
    /// Current rating
    pub rating: Option<i32>,
    /// Title
    pub title: Option<String>,
    /// Club source identifier
    pub club_external_id: Option<String>,
}

/// Partial update of a tournament; `None` fields keep their stored value
#[derive(Debug, Clone, Default)]
pub struct TournamentUpdate {
    /// Tournament name
    pub name: Option<String>,
    /// Last day
    pub end_date: Option<NaiveDate>,
    /// Venue
    pub location: Option<String>,
    /// Number of rounds
    pub rounds: Option<u32>,
    /// Chief judge source identifier
    pub chief_judge_external_id: Option<String>,
}

impl Database {
    async fn key_exists(&self, sql: &str, key: &str) -> Result<bool> {
        let count: i64 = sqlx::query_scalar(sql)
            .bind(key)
            .fetch_one(&self.pool)
            .await
            .map_err(Error::Sqlx)?;
        Ok(count > 0)
    }

    async fn begin(&self) -> Result<Transaction<'_, Sqlite>> {
        self.pool.begin().await.map_err(Error::Sqlx)
    }

    /// Apply a partial update to a player
    ///
    /// Returns false if no player has this ID.
    pub async fn update_player(&self, external_id: &str, update: &PlayerUpdate) -> Result<bool> {
        let now = chrono::Utc::now().timestamp();
        let result = sqlx::query(
            r#"
            UPDATE players
            SET first_name = COALESCE(?, first_name),
                last_name = COALESCE(?, last_name),
                birth_year = COALESCE(?, birth_year),
                rating = COALESCE(?, rating),
                title = COALESCE(?, title),
                club_external_id = COALESCE(?, club_external_id),
                updated_at = ?
            WHERE external_id = ?
            "#,
        )
        .bind(&update.first_name)
        .bind(&update.last_name)
        .bind(update.birth_year)
        .bind(update.rating)
        .bind(&update.title)
        .bind(&update.club_external_id)
        .bind(now)
        .bind(external_id)
        .execute(&self.pool)
        .await
        .map_err(Error::Sqlx)?;

        Ok(result.rows_affected() > 0)
    }

    /// Apply a partial update to a tournament
    ///
    /// Returns false if no tournament has this ID.
    pub async fn update_tournament(
        &self,
        external_id: &str,
        update: &TournamentUpdate,
    ) -> Result<bool> {
        let now = chrono::Utc::now().timestamp();
        let result = sqlx::query(
            r#"
            UPDATE tournaments
            SET name = COALESCE(?, name),
                end_date = COALESCE(?, end_date),
                location = COALESCE(?, location),
                rounds = COALESCE(?, rounds),
                chief_judge_external_id = COALESCE(?, chief_judge_external_id),
                updated_at = ?
            WHERE external_id = ?
            "#,
        )
        .bind(&update.name)
        .bind(update.end_date.map(|d| d.to_string()))
        .bind(&update.location)
        .bind(update.rounds.map(i64::from))
        .bind(&update.chief_judge_external_id)
        .bind(now)
        .bind(external_id)
        .execute(&self.pool)
        .await
        .map_err(Error::Sqlx)?;

        Ok(result.rows_affected() > 0)
    }

    /// Number of rows in an entity table
    ///
    /// Only the known entity tables are accepted.
    pub async fn count_entities(&self, table: &str) -> Result<i64> {
        const TABLES: &[&str] = &[
            "clubs",
            "players",
            "player_year_stats",
            "tournaments",
            "tournament_judges",
            "player_tournament_history",
            "games",
            "game_statistics",
        ];
        if !TABLES.contains(&table) {
            return Err(Error::NotFound(format!("entity table {table}")));
        }
        let sql = format!("SELECT COUNT(*) FROM {table}");
        sqlx::query_scalar::<_, i64>(&sql)
            .fetch_one(&self.pool)
            .await
            .map_err(Error::Sqlx)
    }
}

#[async_trait]
impl Repository<Club> for Database {
    async fn exists(&self, natural_key: &str) -> Result<bool> {
        self.key_exists("SELECT COUNT(*) FROM clubs WHERE external_id = ?", natural_key)
            .await
    }

    async fn create_many(&self, records: &[Club]) -> Result<u64> {
        let now = chrono::Utc::now().timestamp();
        let mut tx = self.begin().await?;
        let mut written = 0;
        for club in records {
            let result = sqlx::query(
                r#"
                INSERT INTO clubs (external_id, name, city, region, imported_at)
                VALUES (?, ?, ?, ?, ?)
                ON CONFLICT(external_id) DO NOTHING
                "#,
            )
            .bind(&club.external_id)
            .bind(&club.name)
            .bind(&club.city)
            .bind(&club.region)
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(Error::Sqlx)?;
            written += result.rows_affected();
        }
        tx.commit().await.map_err(Error::Sqlx)?;
        Ok(written)
    }
}

#[async_trait]
impl Repository<Player> for Database {
    async fn exists(&self, natural_key: &str) -> Result<bool> {
        self.key_exists(
            "SELECT COUNT(*) FROM players WHERE external_id = ?",
            natural_key,
        )
        .await
    }

    async fn create_many(&self, records: &[Player]) -> Result<u64> {
        let now = chrono::Utc::now().timestamp();
        let mut tx = self.begin().await?;
        let mut written = 0;
        for player in records {
            let result = sqlx::query(
                r#"
                INSERT INTO players (
                    external_id, first_name, last_name, birth_year, rating, title, imported_at
                )
                VALUES (?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(external_id) DO NOTHING
                "#,
            )
            .bind(&player.external_id)
            .bind(&player.first_name)
            .bind(&player.last_name)
            .bind(player.birth_year)
            .bind(player.rating)
            .bind(&player.title)
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(Error::Sqlx)?;
            written += result.rows_affected();
        }
        tx.commit().await.map_err(Error::Sqlx)?;
        Ok(written)
    }
}

#[async_trait]
impl Repository<ClubMembership> for Database {
    // a membership is present once the player row carries a club
    async fn exists(&self, natural_key: &str) -> Result<bool> {
        self.key_exists(
            "SELECT COUNT(*) FROM players WHERE external_id = ? AND club_external_id IS NOT NULL",
            natural_key,
        )
        .await
    }

    async fn create_many(&self, records: &[ClubMembership]) -> Result<u64> {
        let now = chrono::Utc::now().timestamp();
        let mut tx = self.begin().await?;
        let mut written = 0;
        for membership in records {
            let result = sqlx::query(
                r#"
                UPDATE players
                SET club_external_id = ?, updated_at = ?
                WHERE external_id = ? AND club_external_id IS NULL
                "#,
            )
            .bind(&membership.club_external_id)
            .bind(now)
            .bind(&membership.player_external_id)
            .execute(&mut *tx)
            .await
            .map_err(Error::Sqlx)?;
            if result.rows_affected() == 0 {
                tracing::debug!(
                    player = %membership.player_external_id,
                    club = %membership.club_external_id,
                    "Membership not applied: unknown player or club already set"
                );
            }
            written += result.rows_affected();
        }
        tx.commit().await.map_err(Error::Sqlx)?;
        Ok(written)
    }
}

#[async_trait]
impl Repository<PlayerYearStat> for Database {
    async fn exists(&self, natural_key: &str) -> Result<bool> {
        self.key_exists(
            "SELECT COUNT(*) FROM player_year_stats WHERE natural_key = ?",
            natural_key,
        )
        .await
    }

    async fn create_many(&self, records: &[PlayerYearStat]) -> Result<u64> {
        let now = chrono::Utc::now().timestamp();
        let mut tx = self.begin().await?;
        let mut written = 0;
        for stat in records {
            let result = sqlx::query(
                r#"
                INSERT INTO player_year_stats (
                    natural_key, player_external_id, year, games_played, wins, draws, losses,
                    rating_end, imported_at
                )
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(natural_key) DO NOTHING
                "#,
            )
            .bind(stat.natural_key())
            .bind(&stat.player_external_id)
            .bind(stat.year)
            .bind(i64::from(stat.games_played))
            .bind(i64::from(stat.wins))
            .bind(i64::from(stat.draws))
            .bind(i64::from(stat.losses))
            .bind(stat.rating_end)
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(Error::Sqlx)?;
            written += result.rows_affected();
        }
        tx.commit().await.map_err(Error::Sqlx)?;
        Ok(written)
    }
}

#[async_trait]
impl Repository<Tournament> for Database {
    async fn exists(&self, natural_key: &str) -> Result<bool> {
        self.key_exists(
            "SELECT COUNT(*) FROM tournaments WHERE external_id = ?",
            natural_key,
        )
        .await
    }

    async fn create_many(&self, records: &[Tournament]) -> Result<u64> {
        let now = chrono::Utc::now().timestamp();
        let mut tx = self.begin().await?;
        let mut written = 0;
        for tournament in records {
            let result = sqlx::query(
                r#"
                INSERT INTO tournaments (
                    external_id, name, start_date, end_date, location, rounds, imported_at
                )
                VALUES (?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(external_id) DO NOTHING
                "#,
            )
            .bind(&tournament.external_id)
            .bind(&tournament.name)
            .bind(tournament.start_date.to_string())
            .bind(tournament.end_date.map(|d| d.to_string()))
            .bind(&tournament.location)
            .bind(tournament.rounds.map(i64::from))
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(Error::Sqlx)?;
            written += result.rows_affected();
        }
        tx.commit().await.map_err(Error::Sqlx)?;
        Ok(written)
    }
}

#[async_trait]
impl Repository<TournamentJudge> for Database {
    async fn exists(&self, natural_key: &str) -> Result<bool> {
        self.key_exists(
            "SELECT COUNT(*) FROM tournament_judges WHERE natural_key = ?",
            natural_key,
        )
        .await
    }

    async fn create_many(&self, records: &[TournamentJudge]) -> Result<u64> {
        let now = chrono::Utc::now().timestamp();
        let mut tx = self.begin().await?;
        let mut written = 0;
        for judge in records {
            let result = sqlx::query(
                r#"
                INSERT INTO tournament_judges (
                    natural_key, tournament_external_id, judge_external_id, name, role,
                    imported_at
                )
                VALUES (?, ?, ?, ?, ?, ?)
                ON CONFLICT(natural_key) DO NOTHING
                "#,
            )
            .bind(judge.natural_key())
            .bind(&judge.tournament_external_id)
            .bind(&judge.judge_external_id)
            .bind(&judge.name)
            .bind(&judge.role)
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(Error::Sqlx)?;
            written += result.rows_affected();
        }
        tx.commit().await.map_err(Error::Sqlx)?;
        Ok(written)
    }
}

#[async_trait]
impl Repository<ChiefJudgeAssignment> for Database {
    async fn exists(&self, natural_key: &str) -> Result<bool> {
        self.key_exists(
            "SELECT COUNT(*) FROM tournaments WHERE external_id = ? AND chief_judge_external_id IS NOT NULL",
            natural_key,
        )
        .await
    }

    async fn create_many(&self, records: &[ChiefJudgeAssignment]) -> Result<u64> {
        let now = chrono::Utc::now().timestamp();
        let mut tx = self.begin().await?;
        let mut written = 0;
        for assignment in records {
            let result = sqlx::query(
                r#"
                UPDATE tournaments
                SET chief_judge_external_id = ?, updated_at = ?
                WHERE external_id = ? AND chief_judge_external_id IS NULL
                "#,
            )
            .bind(&assignment.judge_external_id)
            .bind(now)
            .bind(&assignment.tournament_external_id)
            .execute(&mut *tx)
            .await
            .map_err(Error::Sqlx)?;
            written += result.rows_affected();
        }
        tx.commit().await.map_err(Error::Sqlx)?;
        Ok(written)
    }
}

#[async_trait]
impl Repository<TournamentParticipation> for Database {
    async fn exists(&self, natural_key: &str) -> Result<bool> {
        self.key_exists(
            "SELECT COUNT(*) FROM player_tournament_history WHERE natural_key = ?",
            natural_key,
        )
        .await
    }

    async fn create_many(&self, records: &[TournamentParticipation]) -> Result<u64> {
        let now = chrono::Utc::now().timestamp();
        let mut tx = self.begin().await?;
        let mut written = 0;
        for entry in records {
            let result = sqlx::query(
                r#"
                INSERT INTO player_tournament_history (
                    natural_key, player_external_id, tournament_external_id, final_rank,
                    points, rating_change, imported_at
                )
                VALUES (?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(natural_key) DO NOTHING
                "#,
            )
            .bind(entry.natural_key())
            .bind(&entry.player_external_id)
            .bind(&entry.tournament_external_id)
            .bind(entry.final_rank.map(i64::from))
            .bind(entry.points)
            .bind(entry.rating_change)
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(Error::Sqlx)?;
            written += result.rows_affected();
        }
        tx.commit().await.map_err(Error::Sqlx)?;
        Ok(written)
    }
}

#[async_trait]
impl Repository<Game> for Database {
    async fn exists(&self, natural_key: &str) -> Result<bool> {
        self.key_exists("SELECT COUNT(*) FROM games WHERE external_id = ?", natural_key)
            .await
    }

    async fn create_many(&self, records: &[Game]) -> Result<u64> {
        let now = chrono::Utc::now().timestamp();
        let mut tx = self.begin().await?;
        let mut written = 0;
        for game in records {
            let result = sqlx::query(
                r#"
                INSERT INTO games (
                    external_id, tournament_external_id, round, white_player_external_id,
                    black_player_external_id, result, played_on, imported_at
                )
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(external_id) DO NOTHING
                "#,
            )
            .bind(&game.external_id)
            .bind(&game.tournament_external_id)
            .bind(game.round.map(i64::from))
            .bind(&game.white_player_external_id)
            .bind(&game.black_player_external_id)
            .bind(game.result.as_str())
            .bind(game.played_on.map(|d| d.to_string()))
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(Error::Sqlx)?;
            written += result.rows_affected();
        }
        tx.commit().await.map_err(Error::Sqlx)?;
        Ok(written)
    }
}

#[async_trait]
impl Repository<GameStatistic> for Database {
    async fn exists(&self, natural_key: &str) -> Result<bool> {
        self.key_exists(
            "SELECT COUNT(*) FROM game_statistics WHERE natural_key = ?",
            natural_key,
        )
        .await
    }

    async fn create_many(&self, records: &[GameStatistic]) -> Result<u64> {
        let now = chrono::Utc::now().timestamp();
        let mut tx = self.begin().await?;
        let mut written = 0;
        for stat in records {
            let result = sqlx::query(
                r#"
                INSERT INTO game_statistics (
                    natural_key, game_external_id, player_external_id, score, rating_before,
                    rating_change, imported_at
                )
                VALUES (?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(natural_key) DO NOTHING
                "#,
            )
            .bind(stat.natural_key())
            .bind(&stat.game_external_id)
            .bind(&stat.player_external_id)
            .bind(stat.score)
            .bind(stat.rating_before)
            .bind(stat.rating_change)
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(Error::Sqlx)?;
            written += result.rows_affected();
        }
        tx.commit().await.map_err(Error::Sqlx)?;
        Ok(written)
    }
}
