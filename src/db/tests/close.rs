use crate::db::*;
use tempfile::NamedTempFile;

/// Verify that querying the database after closing the pool returns an error
/// rather than hanging or panicking.
#[tokio::test]
async fn test_get_run_after_pool_close_returns_error() {
    let temp_file = NamedTempFile::new().unwrap();
    let db = Database::new(temp_file.path()).await.unwrap();

    let id = db.create_run().await.unwrap();
    assert!(db.get_run(id).await.unwrap().is_some());

    // Close the pool (but keep the Database struct alive)
    db.pool().close().await;

    let result = db.get_run(id).await;
    assert!(
        result.is_err(),
        "get_run after pool close should return an error, got: {:?}",
        result
    );
}

#[tokio::test]
async fn test_checkpoint_save_after_pool_close_returns_error() {
    let temp_file = NamedTempFile::new().unwrap();
    let db = Database::new(temp_file.path()).await.unwrap();

    db.pool().close().await;

    let checkpoint = crate::checkpoint::Checkpoint::new(crate::types::Phase::Clubs);
    assert!(db.save_checkpoint(&checkpoint).await.is_err());
}
