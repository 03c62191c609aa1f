use crate::db::*;
use tempfile::NamedTempFile;

#[tokio::test]
async fn test_database_creation() {
    let temp_file = NamedTempFile::new().unwrap();
    let db_path = temp_file.path();

    let db = Database::new(db_path).await.unwrap();

    // Verify tables exist
    let mut conn = db.pool.acquire().await.unwrap();

    let tables: Vec<String> =
        sqlx::query_scalar("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .fetch_all(&mut *conn)
            .await
            .unwrap();

    for table in [
        "schema_version",
        "import_runs",
        "run_state",
        "checkpoints",
        "clubs",
        "players",
        "player_year_stats",
        "tournaments",
        "tournament_judges",
        "player_tournament_history",
        "games",
        "game_statistics",
    ] {
        assert!(tables.contains(&table.to_string()), "missing table {table}");
    }

    drop(conn);
    db.close().await;
}

#[tokio::test]
async fn test_reopen_does_not_reapply_migrations() {
    let temp_file = NamedTempFile::new().unwrap();

    let db = Database::new(temp_file.path()).await.unwrap();
    let run_id = db.create_run().await.unwrap();
    db.close().await;

    let db = Database::new(temp_file.path()).await.unwrap();
    let versions: Vec<i64> = sqlx::query_scalar("SELECT version FROM schema_version")
        .fetch_all(db.pool())
        .await
        .unwrap();
    assert_eq!(versions, vec![1]);
    assert!(db.get_run(run_id).await.unwrap().is_some());

    db.close().await;
}
