//! Database lifecycle and schema migrations.

use crate::error::DatabaseError;
use crate::{Error, Result};
use sqlx::SqliteConnection;
use sqlx::sqlite::SqlitePool;
use std::path::Path;

use super::Database;

impl Database {
    /// Create a new database connection
    ///
    /// Creates the database file if it doesn't exist and runs migrations.
    pub async fn new(path: &Path) -> Result<Self> {
        // Create parent directory if it doesn't exist
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                Error::Database(DatabaseError::ConnectionFailed(format!(
                    "Failed to create database directory: {}",
                    e
                )))
            })?;
        }

        use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode};
        use std::str::FromStr;

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))
            .map_err(|e| {
                Error::Database(DatabaseError::ConnectionFailed(format!(
                    "Failed to parse database path: {}",
                    e
                )))
            })?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);

        let pool = SqlitePool::connect_with(options).await.map_err(|e| {
            Error::Database(DatabaseError::ConnectionFailed(format!(
                "Failed to connect to database: {}",
                e
            )))
        })?;

        let db = Self { pool };

        db.run_migrations().await?;

        Ok(db)
    }

    /// Run database migrations
    async fn run_migrations(&self) -> Result<()> {
        let mut conn = self.pool.acquire().await.map_err(|e| {
            Error::Database(DatabaseError::ConnectionFailed(format!(
                "Failed to acquire connection: {}",
                e
            )))
        })?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY,
                applied_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&mut *conn)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::MigrationFailed(format!(
                "Failed to create schema_version table: {}",
                e
            )))
        })?;

        let current_version: Option<i64> =
            sqlx::query_scalar("SELECT MAX(version) FROM schema_version")
                .fetch_optional(&mut *conn)
                .await
                .map_err(|e| {
                    Error::Database(DatabaseError::QueryFailed(format!(
                        "Failed to query schema version: {}",
                        e
                    )))
                })?
                .flatten();

        if current_version.unwrap_or(0) < 1 {
            Self::migrate_v1(&mut conn).await?;
        }

        Ok(())
    }

    /// Migration v1: Create initial schema
    async fn migrate_v1(conn: &mut SqliteConnection) -> Result<()> {
        tracing::info!("Applying database migration v1");

        // Wrap migration in a transaction so partial failures don't leave the DB in a broken state
        sqlx::query("BEGIN")
            .execute(&mut *conn)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::MigrationFailed(format!(
                    "Failed to begin transaction: {}",
                    e
                )))
            })?;

        let result = async {
            Self::create_run_schema(conn).await?;
            Self::create_entity_schema(conn).await?;
            Self::record_migration(conn, 1).await?;
            Ok::<(), Error>(())
        }
        .await;

        match result {
            Ok(()) => {
                sqlx::query("COMMIT")
                    .execute(&mut *conn)
                    .await
                    .map_err(|e| {
                        Error::Database(DatabaseError::MigrationFailed(format!(
                            "Failed to commit migration v1: {}",
                            e
                        )))
                    })?;
            }
            Err(e) => {
                let _ = sqlx::query("ROLLBACK").execute(&mut *conn).await;
                return Err(e);
            }
        }

        tracing::info!("Database migration v1 complete");
        Ok(())
    }

    /// Run history, current-run state and checkpoint tables
    async fn create_run_schema(conn: &mut SqliteConnection) -> Result<()> {
        Self::execute_ddl(
            conn,
            "import_runs table",
            r#"
            CREATE TABLE import_runs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                status TEXT NOT NULL,
                started_at INTEGER NOT NULL,
                ended_at INTEGER,
                records_processed INTEGER NOT NULL DEFAULT 0,
                current_phase TEXT,
                error_payload TEXT
            )
            "#,
        )
        .await?;
        Self::execute_ddl(
            conn,
            "import_runs index",
            "CREATE INDEX idx_import_runs_started_at ON import_runs(started_at DESC)",
        )
        .await?;

        Self::execute_ddl(
            conn,
            "run_state table",
            r#"
            CREATE TABLE run_state (
                key TEXT PRIMARY KEY,
                run_id INTEGER,
                status TEXT NOT NULL,
                current_phase TEXT,
                progress INTEGER NOT NULL DEFAULT 0,
                current_operation TEXT,
                last_error TEXT,
                locked_at INTEGER,
                updated_at INTEGER NOT NULL
            )
            "#,
        )
        .await?;

        Self::execute_ddl(
            conn,
            "checkpoints table",
            r#"
            CREATE TABLE checkpoints (
                key TEXT PRIMARY KEY,
                phase TEXT NOT NULL,
                payload TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            )
            "#,
        )
        .await
    }

    /// Entity tables
    ///
    /// References between entities use natural keys and carry no foreign-key constraints,
    /// so partially imported data can land and the integrity scans can report gaps.
    async fn create_entity_schema(conn: &mut SqliteConnection) -> Result<()> {
        Self::execute_ddl(
            conn,
            "clubs table",
            r#"
            CREATE TABLE clubs (
                external_id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                city TEXT,
                region TEXT,
                imported_at INTEGER NOT NULL
            )
            "#,
        )
        .await?;

        Self::execute_ddl(
            conn,
            "players table",
            r#"
            CREATE TABLE players (
                external_id TEXT PRIMARY KEY,
                first_name TEXT NOT NULL,
                last_name TEXT NOT NULL,
                birth_year INTEGER,
                rating INTEGER,
                title TEXT,
                club_external_id TEXT,
                imported_at INTEGER NOT NULL,
                updated_at INTEGER
            )
            "#,
        )
        .await?;
        Self::execute_ddl(
            conn,
            "players index",
            "CREATE INDEX idx_players_club ON players(club_external_id)",
        )
        .await?;

        Self::execute_ddl(
            conn,
            "player_year_stats table",
            r#"
            CREATE TABLE player_year_stats (
                natural_key TEXT PRIMARY KEY,
                player_external_id TEXT NOT NULL,
                year INTEGER NOT NULL,
                games_played INTEGER NOT NULL,
                wins INTEGER NOT NULL,
                draws INTEGER NOT NULL,
                losses INTEGER NOT NULL,
                rating_end INTEGER,
                imported_at INTEGER NOT NULL
            )
            "#,
        )
        .await?;

        Self::execute_ddl(
            conn,
            "tournaments table",
            r#"
            CREATE TABLE tournaments (
                external_id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                start_date TEXT NOT NULL,
                end_date TEXT,
                location TEXT,
                rounds INTEGER,
                chief_judge_external_id TEXT,
                imported_at INTEGER NOT NULL,
                updated_at INTEGER
            )
            "#,
        )
        .await?;

        Self::execute_ddl(
            conn,
            "tournament_judges table",
            r#"
            CREATE TABLE tournament_judges (
                natural_key TEXT PRIMARY KEY,
                tournament_external_id TEXT NOT NULL,
                judge_external_id TEXT NOT NULL,
                name TEXT NOT NULL,
                role TEXT,
                imported_at INTEGER NOT NULL
            )
            "#,
        )
        .await?;
        Self::execute_ddl(
            conn,
            "tournament_judges index",
            "CREATE INDEX idx_tournament_judges_tournament ON tournament_judges(tournament_external_id)",
        )
        .await?;

        Self::execute_ddl(
            conn,
            "player_tournament_history table",
            r#"
            CREATE TABLE player_tournament_history (
                natural_key TEXT PRIMARY KEY,
                player_external_id TEXT NOT NULL,
                tournament_external_id TEXT NOT NULL,
                final_rank INTEGER,
                points REAL,
                rating_change INTEGER,
                imported_at INTEGER NOT NULL
            )
            "#,
        )
        .await?;

        Self::execute_ddl(
            conn,
            "games table",
            r#"
            CREATE TABLE games (
                external_id TEXT PRIMARY KEY,
                tournament_external_id TEXT NOT NULL,
                round INTEGER,
                white_player_external_id TEXT NOT NULL,
                black_player_external_id TEXT NOT NULL,
                result TEXT NOT NULL,
                played_on TEXT,
                imported_at INTEGER NOT NULL
            )
            "#,
        )
        .await?;
        Self::execute_ddl(
            conn,
            "games index",
            "CREATE INDEX idx_games_tournament ON games(tournament_external_id)",
        )
        .await?;

        Self::execute_ddl(
            conn,
            "game_statistics table",
            r#"
            CREATE TABLE game_statistics (
                natural_key TEXT PRIMARY KEY,
                game_external_id TEXT NOT NULL,
                player_external_id TEXT NOT NULL,
                score REAL NOT NULL,
                rating_before INTEGER,
                rating_change INTEGER,
                imported_at INTEGER NOT NULL
            )
            "#,
        )
        .await?;
        Self::execute_ddl(
            conn,
            "game_statistics index",
            "CREATE INDEX idx_game_statistics_game ON game_statistics(game_external_id)",
        )
        .await
    }

    async fn execute_ddl(conn: &mut SqliteConnection, what: &str, sql: &str) -> Result<()> {
        sqlx::query(sql).execute(&mut *conn).await.map_err(|e| {
            Error::Database(DatabaseError::MigrationFailed(format!(
                "Failed to create {}: {}",
                what, e
            )))
        })?;
        Ok(())
    }

    /// Record a migration version as applied
    async fn record_migration(conn: &mut SqliteConnection, version: i32) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        sqlx::query("INSERT INTO schema_version (version, applied_at) VALUES (?, ?)")
            .bind(version)
            .bind(now)
            .execute(&mut *conn)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::MigrationFailed(format!(
                    "Failed to record migration: {}",
                    e
                )))
            })?;

        Ok(())
    }

    /// Close the database connection
    pub async fn close(self) {
        self.pool.close().await;
    }

    /// Get the underlying connection pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}
