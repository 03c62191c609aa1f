//! In-memory page sources and repository wrappers for end-to-end scenarios

use async_trait::async_trait;
use federation_import::integrity::ReferenceScan;
use federation_import::{
    Database, Error, ImportRecord, IntegrityQueries, PageSession, PageSource, Repository, Result,
    RunRegistry,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

struct Pages<R> {
    pages: Vec<Vec<R>>,
    // page -> remaining failing attempts
    failures: Mutex<HashMap<u32, u32>>,
    fetches: Mutex<Vec<u32>>,
    // fire the registry once this page was served
    cancel_after: Option<(u32, Arc<RunRegistry>)>,
}

/// Source serving fixed pages, numbered from 1
pub struct MemorySource<R> {
    state: Arc<Pages<R>>,
}

impl<R: ImportRecord> MemorySource<R> {
    pub fn new(pages: Vec<Vec<R>>) -> Self {
        Self::build(pages, HashMap::new(), None)
    }

    /// Fail the next `attempts` fetches of `page` with a 503
    pub fn failing(pages: Vec<Vec<R>>, page: u32, attempts: u32) -> Self {
        Self::build(pages, HashMap::from([(page, attempts)]), None)
    }

    /// Cancel every registered run right after `page` was served
    pub fn cancelling_after(pages: Vec<Vec<R>>, page: u32, registry: Arc<RunRegistry>) -> Self {
        Self::build(pages, HashMap::new(), Some((page, registry)))
    }

    fn build(
        pages: Vec<Vec<R>>,
        failures: HashMap<u32, u32>,
        cancel_after: Option<(u32, Arc<RunRegistry>)>,
    ) -> Self {
        Self {
            state: Arc::new(Pages {
                pages,
                failures: Mutex::new(failures),
                fetches: Mutex::new(Vec::new()),
                cancel_after,
            }),
        }
    }

    pub fn heal(&self) {
        self.state.failures.lock().unwrap().clear();
    }

    pub fn fetches(&self) -> Vec<u32> {
        self.state.fetches.lock().unwrap().clone()
    }
}

struct MemorySession<R> {
    state: Arc<Pages<R>>,
}

#[async_trait]
impl<R: ImportRecord> PageSession<R> for MemorySession<R> {
    async fn page_count(&self) -> Result<u32> {
        Ok(self.state.pages.len() as u32)
    }

    async fn fetch_page(&self, page: u32) -> Result<Vec<R>> {
        self.state.fetches.lock().unwrap().push(page);
        {
            let mut failures = self.state.failures.lock().unwrap();
            if let Some(remaining) = failures.get_mut(&page)
                && *remaining > 0
            {
                *remaining -= 1;
                return Err(Error::Source(format!("page {page}: 503 Service Unavailable")));
            }
        }

        let records = self
            .state
            .pages
            .get(page as usize - 1)
            .cloned()
            .ok_or_else(|| Error::Source(format!("page {page} does not exist")))?;

        if let Some((after, registry)) = &self.state.cancel_after
            && *after == page
        {
            registry.cancel_all().await;
        }
        Ok(records)
    }
}

#[async_trait]
impl<R: ImportRecord> PageSource<R> for MemorySource<R> {
    async fn open_session(&self) -> Result<Box<dyn PageSession<R>>> {
        Ok(Box::new(MemorySession {
            state: self.state.clone(),
        }))
    }
}

/// Database wrapper whose write number `crash_at` lands but reports failure, like a
/// process dying between the insert and the checkpoint
pub struct CrashingRepository {
    inner: Arc<Database>,
    crash_at: usize,
    writes: AtomicUsize,
}

impl CrashingRepository {
    pub fn new(inner: Arc<Database>, crash_at: usize) -> Self {
        Self {
            inner,
            crash_at,
            writes: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl<R> Repository<R> for CrashingRepository
where
    R: ImportRecord,
    Database: Repository<R>,
{
    async fn exists(&self, natural_key: &str) -> Result<bool> {
        Repository::<R>::exists(self.inner.as_ref(), natural_key).await
    }

    async fn create_many(&self, records: &[R]) -> Result<u64> {
        let written = Repository::<R>::create_many(self.inner.as_ref(), records).await?;
        let call = self.writes.fetch_add(1, Ordering::SeqCst) + 1;
        if call == self.crash_at {
            return Err(Error::Other("process killed".into()));
        }
        Ok(written)
    }
}

#[async_trait]
impl IntegrityQueries for CrashingRepository {
    async fn participation_reference_scan(&self) -> Result<ReferenceScan> {
        self.inner.participation_reference_scan().await
    }

    async fn tournament_history_reference_scan(&self) -> Result<ReferenceScan> {
        self.inner.tournament_history_reference_scan().await
    }

    async fn orphan_scan(&self) -> Result<ReferenceScan> {
        self.inner.orphan_scan().await
    }
}
