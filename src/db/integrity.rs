//! Read-only reference scans backing the integrity check.

use crate::integrity::{IntegrityQueries, ReferenceScan};
use crate::{Error, Result};
use async_trait::async_trait;

use super::Database;

/// Most problems reported per scan; the row counts stay exact
const MAX_REPORTED_PROBLEMS: i64 = 100;

impl Database {
    async fn count(&self, sql: &str) -> Result<u64> {
        let count: i64 = sqlx::query_scalar(sql)
            .fetch_one(&self.pool)
            .await
            .map_err(Error::Sqlx)?;
        Ok(count.max(0) as u64)
    }

    /// Rows of `sql` as (child, parent) key pairs
    async fn dangling(&self, sql: &str) -> Result<Vec<(String, String)>> {
        sqlx::query_as::<_, (String, String)>(sql)
            .bind(MAX_REPORTED_PROBLEMS)
            .fetch_all(&self.pool)
            .await
            .map_err(Error::Sqlx)
    }
}

#[async_trait]
impl IntegrityQueries for Database {
    async fn participation_reference_scan(&self) -> Result<ReferenceScan> {
        let total_checked = self.count("SELECT COUNT(*) FROM game_statistics").await?;

        let mut problems = Vec::new();
        for (key, player) in self
            .dangling(
                r#"
                SELECT gs.natural_key, gs.player_external_id
                FROM game_statistics gs
                LEFT JOIN players p ON p.external_id = gs.player_external_id
                WHERE p.external_id IS NULL
                ORDER BY gs.natural_key
                LIMIT ?
                "#,
            )
            .await?
        {
            problems.push(format!("game statistic {key} references missing player {player}"));
        }
        for (key, game) in self
            .dangling(
                r#"
                SELECT gs.natural_key, gs.game_external_id
                FROM game_statistics gs
                LEFT JOIN games g ON g.external_id = gs.game_external_id
                WHERE g.external_id IS NULL
                ORDER BY gs.natural_key
                LIMIT ?
                "#,
            )
            .await?
        {
            problems.push(format!("game statistic {key} references missing game {game}"));
        }

        Ok(ReferenceScan {
            total_checked,
            problems,
        })
    }

    async fn tournament_history_reference_scan(&self) -> Result<ReferenceScan> {
        let total_checked = self
            .count("SELECT COUNT(*) FROM player_tournament_history")
            .await?;

        let mut problems = Vec::new();
        for (key, player) in self
            .dangling(
                r#"
                SELECT h.natural_key, h.player_external_id
                FROM player_tournament_history h
                LEFT JOIN players p ON p.external_id = h.player_external_id
                WHERE p.external_id IS NULL
                ORDER BY h.natural_key
                LIMIT ?
                "#,
            )
            .await?
        {
            problems.push(format!(
                "tournament history {key} references missing player {player}"
            ));
        }
        for (key, tournament) in self
            .dangling(
                r#"
                SELECT h.natural_key, h.tournament_external_id
                FROM player_tournament_history h
                LEFT JOIN tournaments t ON t.external_id = h.tournament_external_id
                WHERE t.external_id IS NULL
                ORDER BY h.natural_key
                LIMIT ?
                "#,
            )
            .await?
        {
            problems.push(format!(
                "tournament history {key} references missing tournament {tournament}"
            ));
        }

        Ok(ReferenceScan {
            total_checked,
            problems,
        })
    }

    async fn orphan_scan(&self) -> Result<ReferenceScan> {
        let total_checked = self
            .count(
                r#"
                SELECT (SELECT COUNT(*) FROM games)
                     + (SELECT COUNT(*) FROM tournament_judges)
                     + (SELECT COUNT(*) FROM player_year_stats)
                     + (SELECT COUNT(*) FROM players WHERE club_external_id IS NOT NULL)
                     + (SELECT COUNT(*) FROM tournaments WHERE chief_judge_external_id IS NOT NULL)
                "#,
            )
            .await?;

        let mut problems = Vec::new();
        for (game, tournament) in self
            .dangling(
                r#"
                SELECT g.external_id, g.tournament_external_id
                FROM games g
                LEFT JOIN tournaments t ON t.external_id = g.tournament_external_id
                WHERE t.external_id IS NULL
                ORDER BY g.external_id
                LIMIT ?
                "#,
            )
            .await?
        {
            problems.push(format!("game {game} references missing tournament {tournament}"));
        }
        for (key, tournament) in self
            .dangling(
                r#"
                SELECT j.natural_key, j.tournament_external_id
                FROM tournament_judges j
                LEFT JOIN tournaments t ON t.external_id = j.tournament_external_id
                WHERE t.external_id IS NULL
                ORDER BY j.natural_key
                LIMIT ?
                "#,
            )
            .await?
        {
            problems.push(format!(
                "judge {key} references missing tournament {tournament}"
            ));
        }
        for (key, player) in self
            .dangling(
                r#"
                SELECT s.natural_key, s.player_external_id
                FROM player_year_stats s
                LEFT JOIN players p ON p.external_id = s.player_external_id
                WHERE p.external_id IS NULL
                ORDER BY s.natural_key
                LIMIT ?
                "#,
            )
            .await?
        {
            problems.push(format!(
                "year statistic {key} references missing player {player}"
            ));
        }
        for (player, club) in self
            .dangling(
                r#"
                SELECT p.external_id, p.club_external_id
                FROM players p
                LEFT JOIN clubs c ON c.external_id = p.club_external_id
                WHERE p.club_external_id IS NOT NULL AND c.external_id IS NULL
                ORDER BY p.external_id
                LIMIT ?
                "#,
            )
            .await?
        {
            problems.push(format!("player {player} references missing club {club}"));
        }
        for (tournament, judge) in self
            .dangling(
                r#"
                SELECT t.external_id, t.chief_judge_external_id
                FROM tournaments t
                LEFT JOIN tournament_judges j
                       ON j.tournament_external_id = t.external_id
                      AND j.judge_external_id = t.chief_judge_external_id
                WHERE t.chief_judge_external_id IS NOT NULL AND j.natural_key IS NULL
                ORDER BY t.external_id
                LIMIT ?
                "#,
            )
            .await?
        {
            problems.push(format!(
                "tournament {tournament} names chief judge {judge} who is not among its judges"
            ));
        }

        Ok(ReferenceScan {
            total_checked,
            problems,
        })
    }
}
