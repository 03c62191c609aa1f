//! FETCHING: source sessions, page count, chunked parallel page fetches.
//!
//! One page per session per chunk. Results of a chunk are folded into the run's counters
//! only after every fetch of the chunk resolved.

use crate::error::{Error, Result};
use crate::error_log::{ErrorCode, ErrorContext};
use crate::records::ImportRecord;
use crate::repository::Repository;
use crate::retry::RetryOptions;
use crate::source::PageSession;
use futures::future::join_all;

use super::persist::FetchedPage;
use super::{PhaseOutcome, PhaseRunner, Sessions};

impl<'a, R, S> PhaseRunner<'a, R, S>
where
    R: ImportRecord,
    S: Repository<R> + ?Sized,
{
    /// Open one session per fetch worker
    pub(super) async fn open_sessions(&self) -> Result<Sessions<R>> {
        let concurrency = self.ctx.config().concurrency_for(R::PHASE).max(1);
        let mut sessions = Vec::with_capacity(concurrency);

        for _ in 0..concurrency {
            match self.source.open_session().await {
                Ok(session) => sessions.push(session),
                Err(e) => {
                    self.ctx.errors().log(
                        e.to_string(),
                        ErrorCode::SessionFailed,
                        ErrorContext::phase(R::PHASE)
                            .with_entity_type(R::ENTITY)
                            .with_operation("open_session"),
                        false,
                    );
                    return Err(Error::phase_fatal(
                        R::PHASE,
                        format!("cannot open source session: {e}"),
                    ));
                }
            }
        }

        tracing::debug!(phase = %R::PHASE, sessions = sessions.len(), "Source sessions opened");
        Ok(sessions)
    }

    fn retry_options(&self, full_outage: bool) -> RetryOptions<'_> {
        RetryOptions::new(self.ctx.cancel_token())
            .full_outage(full_outage)
            .max_attempts(self.ctx.config().max_attempts_for(R::PHASE))
    }

    /// Number of pages, read through the first session
    pub(super) async fn page_count(&self, sessions: &Sessions<R>) -> Result<u32> {
        let Some(session) = sessions.first() else {
            return Err(Error::phase_fatal(R::PHASE, "no source session"));
        };
        let session = session.as_ref();
        let ctx = self.ctx;

        let result = ctx
            .retry()
            .execute(
                || async move {
                    ctx.rate_limiter().wait().await;
                    session.page_count().await
                },
                self.retry_options(ctx.is_full_outage()),
            )
            .await;

        match result {
            Ok(count) => {
                tracing::debug!(phase = %R::PHASE, pages = count, "Page count read");
                Ok(count)
            }
            Err(e) if e.is_cancelled() => Err(e),
            Err(e) => {
                ctx.errors().log(
                    e.to_string(),
                    ErrorCode::FetchFailed,
                    ErrorContext::phase(R::PHASE)
                        .with_entity_type(R::ENTITY)
                        .with_operation("page_count"),
                    false,
                );
                Err(Error::phase_fatal(
                    R::PHASE,
                    format!("cannot read page count: {e}"),
                ))
            }
        }
    }

    /// One page, paced and retried
    async fn fetch_page(
        &self,
        session: &dyn PageSession<R>,
        page: u32,
        full_outage: bool,
    ) -> Result<Vec<R>> {
        let ctx = self.ctx;
        ctx.retry()
            .execute(
                || async move {
                    ctx.rate_limiter().wait().await;
                    session.fetch_page(page).await
                },
                self.retry_options(full_outage),
            )
            .await
    }

    /// Fetch `pages`, skipping those that fail every attempt
    ///
    /// `final_pass` marks the last attempt these pages get in this phase; it decides
    /// whether a skip is logged as retried or critical.
    pub(super) async fn fetch_pages(
        &self,
        sessions: &Sessions<R>,
        pages: &[u32],
        final_pass: bool,
        outcome: &mut PhaseOutcome,
    ) -> Result<Vec<FetchedPage<R>>> {
        let mut fetched = Vec::with_capacity(pages.len());
        let workers = sessions.len().max(1);
        let total_chunks = pages.len().div_ceil(workers);

        for (chunk_index, chunk) in pages.chunks(workers).enumerate() {
            self.ctx.check_cancelled()?;
            self.ctx.check_timeout()?;

            let full_outage = self.ctx.is_full_outage();
            let results = join_all(sessions.iter().zip(chunk).map(|(session, &page)| async move {
                let result = self.fetch_page(session.as_ref(), page, full_outage).await;
                (page, result)
            }))
            .await;

            let mut cancelled = false;
            for (page, result) in results {
                match result {
                    Ok(records) => {
                        self.ctx.record_page_success();
                        self.ctx.unskip_page(R::PHASE, page);
                        outcome.pages_fetched += 1;
                        outcome.records_fetched += records.len() as u64;
                        fetched.push(FetchedPage { page, records });
                    }
                    Err(e) if e.is_cancelled() => cancelled = true,
                    Err(e) => {
                        self.ctx.record_page_failure();
                        self.ctx.skip_page(R::PHASE, page);
                        tracing::warn!(
                            phase = %R::PHASE,
                            page,
                            error = %e,
                            "Page skipped after failed fetch"
                        );
                        self.ctx.errors().log(
                            format!("page {page} skipped: {e}"),
                            ErrorCode::PageSkipped,
                            ErrorContext::phase(R::PHASE)
                                .with_page(page)
                                .with_entity_type(R::ENTITY)
                                .with_operation("fetch_page"),
                            !final_pass,
                        );
                    }
                }
            }

            if cancelled {
                tracing::info!(phase = %R::PHASE, chunk = chunk_index, "Fetching stopped by cancellation");
                return Err(Error::Cancelled);
            }

            tracing::debug!(
                phase = %R::PHASE,
                chunk = chunk_index + 1,
                total_chunks,
                "Chunk fetched"
            );
        }

        Ok(fetched)
    }
}
