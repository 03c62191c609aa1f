use super::*;
use crate::checkpoint::{Checkpoint, CheckpointStore, MemoryCheckpointStore};
use crate::config::ImportConfig;
use crate::error::Error;
use crate::error_log::ErrorCode;
use crate::records::Club;
use crate::test_helpers::{MemoryRepository, ScriptedSource, fast_config};
use crate::types::RunId;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

fn club(n: usize) -> Club {
    Club {
        external_id: format!("c-{n:02}"),
        name: format!("Club {n}"),
        city: None,
        region: None,
    }
}

/// `sizes[i]` clubs on page i+1, numbered consecutively from 1
fn paged_clubs(sizes: &[usize]) -> Vec<Vec<Club>> {
    let mut next = 1;
    sizes
        .iter()
        .map(|&size| {
            let page = (next..next + size).map(club).collect();
            next += size;
            page
        })
        .collect()
}

fn context(config: ImportConfig) -> (RunContext, Arc<MemoryCheckpointStore>) {
    let store = Arc::new(MemoryCheckpointStore::new());
    let ctx = RunContext::new(
        RunId(1),
        Arc::new(config),
        store.clone(),
        CancellationToken::new(),
    );
    (ctx, store)
}

#[tokio::test]
async fn twenty_five_records_in_three_batches() {
    let mut config = fast_config();
    config.batch.batch_size = 10;
    let (ctx, store) = context(config);
    let source = ScriptedSource::new(paged_clubs(&[10, 10, 5]));
    let repo = MemoryRepository::<Club>::new();

    let mut runner = PhaseRunner::new(&ctx, &source, &repo);
    let outcome = runner.run().await.unwrap();

    assert_eq!(runner.state(), PhaseState::Done);
    assert_eq!(outcome.pages_total, 3);
    assert_eq!(outcome.records_fetched, 25);
    assert_eq!(outcome.records_persisted, 25);
    assert_eq!(outcome.batches_written, 3);
    assert_eq!(repo.create_calls(), 3);
    assert_eq!(repo.keys().len(), 25);

    let checkpoint = store.load().await.unwrap().unwrap();
    assert_eq!(checkpoint.current_phase, Phase::Clubs);
    assert_eq!(checkpoint.current_batch_index, 3);
    assert_eq!(checkpoint.progress_percent, 100);
    assert_eq!(checkpoint.processed_ids.len(), 25);
    assert_eq!(checkpoint.last_processed_id.as_deref(), Some("c-25"));
    assert_eq!(ctx.records_persisted(), 25);
}

#[tokio::test]
async fn checkpoint_after_second_of_three_batches_reports_67_percent() {
    let mut config = fast_config();
    config.batch.batch_size = 10;
    let (ctx, store) = context(config);
    let source = ScriptedSource::new(paged_clubs(&[10, 10, 5]));
    let repo = MemoryRepository::<Club>::new();
    repo.fail_writes_after(2);

    let mut runner = PhaseRunner::new(&ctx, &source, &repo);
    let err = runner.run().await.unwrap_err();

    assert!(matches!(err, Error::PhaseFatal { phase: Phase::Clubs, .. }));
    assert_eq!(runner.state(), PhaseState::Failed);

    let checkpoint = store.load().await.unwrap().unwrap();
    assert_eq!(checkpoint.current_batch_index, 2);
    assert_eq!(checkpoint.progress_percent, 67);
    assert_eq!(checkpoint.processed_ids.len(), 20);
    assert!(!checkpoint.processed_ids.contains("c-21"));
    assert_eq!(ctx.errors().summary().by_code.get(&ErrorCode::PersistFailed), Some(&1));
}

#[tokio::test]
async fn page_failing_every_attempt_is_skipped_then_retried_manually() {
    let (ctx, _store) = context(fast_config());
    // 3 attempts in the main pass, 3 more in the end-of-phase retry pass
    let source = ScriptedSource::new(paged_clubs(&[2, 2, 2, 2, 2])).fail_page(3, 6);
    let repo = MemoryRepository::<Club>::new();

    let mut runner = PhaseRunner::new(&ctx, &source, &repo);
    let outcome = runner.run().await.unwrap();

    assert_eq!(outcome.pages_skipped, vec![3]);
    assert_eq!(outcome.pages_fetched, 4);
    assert_eq!(ctx.skipped_pages_of(Phase::Clubs), vec![3]);
    assert_eq!(repo.keys().len(), 8);
    assert!(!repo.keys().contains(&"c-05".to_string()));
    assert_eq!(
        source.fetches().iter().filter(|&&p| p == 3).count(),
        6,
        "3 attempts per pass"
    );

    source.heal_page(3);
    let retried = runner.retry_pages(&[3]).await.unwrap();

    assert!(retried.pages_skipped.is_empty());
    assert_eq!(retried.records_persisted, 2);
    assert!(ctx.skipped_pages().is_empty());
    assert_eq!(repo.keys().len(), 10);

    let metrics = ctx.validation().metrics();
    assert_eq!(metrics.valid_records, 10);
    assert_eq!(metrics.duplicates_skipped, 0);
    assert_eq!(ctx.records_persisted(), 10);
}

#[tokio::test]
async fn retry_pass_recovers_small_number_of_skipped_pages() {
    let (ctx, _store) = context(fast_config());
    let source = ScriptedSource::new(paged_clubs(&[1, 1, 1])).fail_page(2, 3);
    let repo = MemoryRepository::<Club>::new();

    let outcome = PhaseRunner::new(&ctx, &source, &repo).run().await.unwrap();

    assert!(outcome.pages_skipped.is_empty());
    assert_eq!(outcome.pages_fetched, 3);
    assert_eq!(repo.keys().len(), 3);

    let summary = ctx.errors().summary();
    assert_eq!(summary.by_code.get(&ErrorCode::PageSkipped), Some(&1));
    assert_eq!(summary.retried, 1);
    assert_eq!(summary.critical, 0);
}

#[tokio::test]
async fn too_many_skipped_pages_get_no_retry_pass() {
    let mut config = fast_config();
    config.batch.skipped_page_retry_limit = 1;
    let (ctx, _store) = context(config);
    let source = ScriptedSource::new(paged_clubs(&[1, 1, 1]))
        .break_page(1)
        .break_page(3);
    let repo = MemoryRepository::<Club>::new();

    let outcome = PhaseRunner::new(&ctx, &source, &repo).run().await.unwrap();

    assert_eq!(outcome.pages_skipped, vec![1, 3]);
    // permanent errors are not retried and no retry pass ran
    assert_eq!(source.fetches().iter().filter(|&&p| p == 1).count(), 1);
    assert_eq!(repo.keys(), vec!["c-02".to_string()]);

    // nothing is going to retry these pages
    let summary = ctx.errors().summary();
    assert_eq!(summary.by_code.get(&ErrorCode::PageSkipped), Some(&2));
    assert_eq!(summary.critical, 2);
    assert_eq!(summary.retried, 0);
}

#[tokio::test]
async fn consecutive_failed_pages_switch_to_outage_delay() {
    let mut config = fast_config();
    config.batch.concurrency = 1;
    config.retry.max_attempts = 2;
    config.retry.full_outage_threshold = 2;
    config.retry.full_outage_delay = Duration::from_millis(300);
    let (ctx, _store) = context(config);
    // pages 1 and 2 use up both attempts, pages 3 and 4 fail once
    let source = ScriptedSource::new(paged_clubs(&[1, 1, 1, 1]))
        .fail_page(1, 2)
        .fail_page(2, 2)
        .fail_page(3, 1)
        .fail_page(4, 1);
    let repo = MemoryRepository::<Club>::new();

    let started = Instant::now();
    let outcome = PhaseRunner::new(&ctx, &source, &repo).run().await.unwrap();
    let elapsed = started.elapsed();

    // page 3 waits out the outage delay, its success ends the outage before page 4
    assert!(elapsed >= Duration::from_millis(300), "took {elapsed:?}");
    assert!(elapsed < Duration::from_millis(600), "took {elapsed:?}");
    assert!(!ctx.is_full_outage());

    // the retry pass recovers the two skipped pages
    assert!(outcome.pages_skipped.is_empty());
    assert_eq!(source.fetches(), vec![1, 1, 2, 2, 3, 3, 4, 4, 1, 2]);
    assert_eq!(repo.keys().len(), 4);
}

#[tokio::test]
async fn session_failure_is_phase_fatal() {
    let (ctx, _store) = context(fast_config());
    let source = ScriptedSource::<Club>::failing_to_open();
    let repo = MemoryRepository::<Club>::new();

    let mut runner = PhaseRunner::new(&ctx, &source, &repo);
    let err = runner.run().await.unwrap_err();

    assert!(matches!(err, Error::PhaseFatal { phase: Phase::Clubs, .. }));
    assert_eq!(runner.state(), PhaseState::Failed);
    assert_eq!(ctx.errors().summary().by_code.get(&ErrorCode::SessionFailed), Some(&1));
}

#[tokio::test]
async fn invalid_and_duplicate_records_are_counted_and_dropped() {
    let (ctx, _store) = context(fast_config());
    let mut nameless = club(3);
    nameless.name = "  ".into();
    let pages = vec![
        vec![club(1), club(2), nameless],
        // c-02 again on the next page, c-09 already stored
        vec![club(2), club(9), club(4)],
    ];
    let source = ScriptedSource::new(pages);
    let repo = MemoryRepository::with_rows(&[club(9)]);

    let outcome = PhaseRunner::new(&ctx, &source, &repo).run().await.unwrap();

    assert_eq!(outcome.records_fetched, 6);
    assert_eq!(outcome.records_accepted, 3);
    assert_eq!(outcome.records_persisted, 3);

    let summary = ctx.validation().summary();
    assert_eq!(summary.metrics.total_fetched, 6);
    assert_eq!(summary.metrics.valid_records, 3);
    assert_eq!(summary.metrics.invalid_records, 1);
    assert_eq!(summary.metrics.duplicates_skipped, 2);
    assert!((summary.metrics.validation_rate - 0.5).abs() < f64::EPSILON);
    assert!(summary.degraded);
    assert_eq!(summary.invalid_samples[0].context.page, Some(1));
    assert_eq!(
        summary.invalid_samples[0].context.entity_id.as_deref(),
        Some("c-03")
    );
    assert_eq!(
        ctx.errors().summary().by_code.get(&ErrorCode::ValidationFailed),
        Some(&1)
    );
}

#[tokio::test]
async fn resumed_phase_skips_processed_ids_and_continues_batch_numbering() {
    let mut config = fast_config();
    config.batch.batch_size = 10;
    let (ctx, store) = context(config);

    let mut checkpoint = Checkpoint::new(Phase::Clubs);
    checkpoint.current_batch_index = 1;
    checkpoint.processed_ids = (1..=10).map(|n| club(n).external_id).collect();
    ctx.begin_phase(Phase::Clubs, Some(&checkpoint));

    let source = ScriptedSource::new(paged_clubs(&[10, 10, 5]));
    let repo = MemoryRepository::<Club>::new();

    let outcome = PhaseRunner::new(&ctx, &source, &repo).run().await.unwrap();

    assert_eq!(outcome.records_persisted, 15);
    assert_eq!(outcome.batches_written, 2);
    assert_eq!(repo.keys().len(), 15);
    assert_eq!(ctx.validation().metrics().duplicates_skipped, 10);

    let saved = store.load().await.unwrap().unwrap();
    assert_eq!(saved.current_batch_index, 3);
    assert_eq!(saved.processed_ids.len(), 25);
}

#[tokio::test]
async fn cancelled_run_stops_before_fetching() {
    let (ctx, store) = context(fast_config());
    let source = ScriptedSource::new(paged_clubs(&[3, 3]));
    let repo = MemoryRepository::<Club>::new();

    ctx.cancel_token().cancel();
    let mut runner = PhaseRunner::new(&ctx, &source, &repo);
    let err = runner.run().await.unwrap_err();

    assert!(err.is_cancelled());
    assert!(source.fetches().is_empty());
    assert_eq!(repo.create_calls(), 0);
    assert!(store.load().await.unwrap().is_none());
}

#[tokio::test]
async fn exceeded_budget_stops_the_phase() {
    let mut config = fast_config();
    config.timeout.max_duration = std::time::Duration::ZERO;
    let (ctx, _store) = context(config);
    ctx.timeout().start();

    let source = ScriptedSource::new(paged_clubs(&[3]));
    let repo = MemoryRepository::<Club>::new();

    let err = PhaseRunner::new(&ctx, &source, &repo)
        .run()
        .await
        .unwrap_err();
    assert!(err.is_timeout());
    assert!(repo.keys().is_empty());
}

#[tokio::test]
async fn one_session_per_worker() {
    let mut config = fast_config();
    config.batch.concurrency = 3;
    let (ctx, _store) = context(config);
    let source = ScriptedSource::new(paged_clubs(&[1, 1, 1, 1, 1, 1, 1]));
    let repo = MemoryRepository::<Club>::new();

    let outcome = PhaseRunner::new(&ctx, &source, &repo).run().await.unwrap();

    assert_eq!(source.sessions_opened(), 3);
    assert_eq!(outcome.pages_fetched, 7);
    assert_eq!(repo.keys().len(), 7);
}
