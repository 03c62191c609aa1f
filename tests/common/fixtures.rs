//! Records, configuration and orchestrators for end-to-end scenarios

use federation_import::{Club, Database, ImportConfig, Orchestrator, Player, RunRegistry};
use std::sync::Arc;
use std::time::Duration;
use tempfile::NamedTempFile;

/// Config with no pacing, millisecond back-off and one fetch worker
pub fn test_config() -> ImportConfig {
    let mut config = ImportConfig::default();
    config.rate_limit.min_delay = Duration::ZERO;
    config.retry.base_delay = Duration::from_millis(1);
    config.retry.full_outage_delay = Duration::from_millis(1);
    config.batch.concurrency = 1;
    config
}

/// A throwaway database and an orchestrator on it
pub struct TestEnv {
    pub db: Arc<Database>,
    pub registry: Arc<RunRegistry>,
    pub orchestrator: Orchestrator,
    pub file: NamedTempFile,
}

impl TestEnv {
    pub async fn new(config: ImportConfig) -> Self {
        let file = NamedTempFile::new().unwrap();
        let db = Arc::new(Database::new(file.path()).await.unwrap());
        let registry = RunRegistry::shared();
        let orchestrator =
            Orchestrator::from_database(config, db.clone(), registry.clone()).unwrap();
        Self {
            db,
            registry,
            orchestrator,
            file,
        }
    }

    /// A second orchestrator on the same database, as if the process restarted
    pub fn restart(&self, config: ImportConfig) -> Orchestrator {
        Orchestrator::from_database(config, self.db.clone(), RunRegistry::shared()).unwrap()
    }

    /// Sorted natural keys stored in `table`
    pub async fn keys(&self, table: &str) -> Vec<String> {
        sqlx::query_scalar::<_, String>(&format!(
            "SELECT external_id FROM {table} ORDER BY external_id"
        ))
        .fetch_all(self.db.pool())
        .await
        .unwrap()
    }
}

pub fn club(n: usize) -> Club {
    Club {
        external_id: format!("club-{n:03}"),
        name: format!("Chess Club {n}"),
        city: Some("Tallinn".into()),
        region: None,
    }
}

pub fn player(n: usize) -> Player {
    Player {
        external_id: format!("player-{n:03}"),
        first_name: "Paul".into(),
        last_name: format!("Keres {n}"),
        birth_year: Some(1916),
        rating: Some(2600),
        title: Some("GM".into()),
    }
}

/// `count` records split into pages of `page_size`
pub fn paged<R>(count: usize, page_size: usize, make: impl Fn(usize) -> R) -> Vec<Vec<R>> {
    let records: Vec<R> = (1..=count).map(make).collect();
    let mut pages = Vec::new();
    let mut records = records.into_iter().peekable();
    while records.peek().is_some() {
        pages.push(records.by_ref().take(page_size).collect());
    }
    pages
}
