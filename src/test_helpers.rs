//! Shared test helpers: scripted page sources, an in-memory repository and a fast config.

use crate::config::ImportConfig;
use crate::error::{Error, Result};
use crate::records::ImportRecord;
use crate::repository::Repository;
use crate::source::{PageSession, PageSource};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Config with no pacing and millisecond back-off, so tests run fast.
pub(crate) fn fast_config() -> ImportConfig {
    let mut config = ImportConfig::default();
    config.rate_limit.min_delay = Duration::ZERO;
    config.retry.base_delay = Duration::from_millis(1);
    config.retry.full_outage_delay = Duration::from_millis(1);
    config.batch.concurrency = 2;
    config
}

struct SourceState<R> {
    pages: Vec<Vec<R>>,
    // page -> remaining failing attempts
    failures: Mutex<HashMap<u32, u32>>,
    permanent: Mutex<Vec<u32>>,
    fail_open: bool,
    sessions_opened: AtomicUsize,
    fetches: Mutex<Vec<u32>>,
    fetch_delay: Mutex<Duration>,
    // fetches that got past the delay
    completed: AtomicUsize,
}

/// Page source serving fixed pages, with scripted failures
pub(crate) struct ScriptedSource<R> {
    state: Arc<SourceState<R>>,
}

impl<R: ImportRecord> ScriptedSource<R> {
    pub(crate) fn new(pages: Vec<Vec<R>>) -> Self {
        Self::build(pages, false)
    }

    pub(crate) fn failing_to_open() -> Self {
        Self::build(Vec::new(), true)
    }

    fn build(pages: Vec<Vec<R>>, fail_open: bool) -> Self {
        Self {
            state: Arc::new(SourceState {
                pages,
                failures: Mutex::new(HashMap::new()),
                permanent: Mutex::new(Vec::new()),
                fail_open,
                sessions_opened: AtomicUsize::new(0),
                fetches: Mutex::new(Vec::new()),
                fetch_delay: Mutex::new(Duration::ZERO),
                completed: AtomicUsize::new(0),
            }),
        }
    }

    /// Fail the next `attempts` fetches of `page` with a transient error
    pub(crate) fn fail_page(self, page: u32, attempts: u32) -> Self {
        self.state.failures.lock().unwrap().insert(page, attempts);
        self
    }

    /// Fail every fetch of `page` with a permanent error
    pub(crate) fn break_page(self, page: u32) -> Self {
        self.state.permanent.lock().unwrap().push(page);
        self
    }

    /// Make every fetch take `delay`, like a slow remote site
    pub(crate) fn with_fetch_delay(self, delay: Duration) -> Self {
        *self.state.fetch_delay.lock().unwrap() = delay;
        self
    }

    /// Let `page` succeed from now on
    pub(crate) fn heal_page(&self, page: u32) {
        self.state.failures.lock().unwrap().remove(&page);
        self.state.permanent.lock().unwrap().retain(|p| *p != page);
    }

    pub(crate) fn fetches(&self) -> Vec<u32> {
        self.state.fetches.lock().unwrap().clone()
    }

    pub(crate) fn sessions_opened(&self) -> usize {
        self.state.sessions_opened.load(Ordering::SeqCst)
    }

    /// Fetches that returned, whatever their result
    pub(crate) fn completed_fetches(&self) -> usize {
        self.state.completed.load(Ordering::SeqCst)
    }
}

struct ScriptedSession<R> {
    state: Arc<SourceState<R>>,
}

#[async_trait]
impl<R: ImportRecord> PageSession<R> for ScriptedSession<R> {
    async fn page_count(&self) -> Result<u32> {
        Ok(self.state.pages.len() as u32)
    }

    async fn fetch_page(&self, page: u32) -> Result<Vec<R>> {
        self.state.fetches.lock().unwrap().push(page);
        let delay = *self.state.fetch_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.state.completed.fetch_add(1, Ordering::SeqCst);

        if self.state.permanent.lock().unwrap().contains(&page) {
            return Err(Error::source(format!("unexpected markup on page {page}")));
        }
        {
            let mut failures = self.state.failures.lock().unwrap();
            if let Some(remaining) = failures.get_mut(&page)
                && *remaining > 0
            {
                *remaining -= 1;
                return Err(Error::source("HTTP 503 Service Unavailable"));
            }
        }

        self.state
            .pages
            .get(page as usize - 1)
            .cloned()
            .ok_or_else(|| Error::source(format!("page {page} out of range")))
    }
}

#[async_trait]
impl<R: ImportRecord> PageSource<R> for ScriptedSource<R> {
    async fn open_session(&self) -> Result<Box<dyn PageSession<R>>> {
        if self.state.fail_open {
            return Err(Error::source("login rejected"));
        }
        self.state.sessions_opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedSession {
            state: self.state.clone(),
        }))
    }
}

/// Repository keeping records in a map keyed by natural key
pub(crate) struct MemoryRepository<R> {
    rows: Mutex<BTreeMap<String, R>>,
    create_calls: AtomicUsize,
    fail_after: Mutex<Option<usize>>,
}

impl<R: ImportRecord> MemoryRepository<R> {
    pub(crate) fn new() -> Self {
        Self {
            rows: Mutex::new(BTreeMap::new()),
            create_calls: AtomicUsize::new(0),
            fail_after: Mutex::new(None),
        }
    }

    pub(crate) fn with_rows(records: &[R]) -> Self {
        let repo = Self::new();
        {
            let mut rows = repo.rows.lock().unwrap();
            for r in records {
                rows.insert(r.natural_key(), r.clone());
            }
        }
        repo
    }

    pub(crate) fn keys(&self) -> Vec<String> {
        self.rows.lock().unwrap().keys().cloned().collect()
    }

    pub(crate) fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    /// Let the first `calls` writes succeed and fail every later one
    pub(crate) fn fail_writes_after(&self, calls: usize) {
        *self.fail_after.lock().unwrap() = Some(calls);
    }
}

#[async_trait]
impl<R: ImportRecord> Repository<R> for MemoryRepository<R> {
    async fn exists(&self, natural_key: &str) -> Result<bool> {
        Ok(self.rows.lock().unwrap().contains_key(natural_key))
    }

    async fn create_many(&self, records: &[R]) -> Result<u64> {
        let call = self.create_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(allowed) = *self.fail_after.lock().unwrap()
            && call > allowed
        {
            return Err(Error::Other("disk I/O error".into()));
        }
        let mut rows = self.rows.lock().unwrap();
        let mut written = 0;
        for r in records {
            let key = r.natural_key();
            if !rows.contains_key(&key) {
                rows.insert(key, r.clone());
                written += 1;
            }
        }
        Ok(written)
    }
}
