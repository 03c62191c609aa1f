//! Fixed-size batching
//!
//! Splits a record slice into chunks and hands them to an async callback one at a time.
//! There is no parallelism at this layer: batch `n + 1` starts only after batch `n`'s
//! future resolved, which is what keeps checkpoint writes in increasing batch order.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::future::Future;

/// Sizing information for a batched record set
///
/// `estimated_memory_bytes` is informational only (shallow `size_of::<T>()` per batch).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchMetrics {
    /// Number of batches the input splits into
    pub total_batches: usize,
    /// Number of records
    pub total_records: usize,
    /// Records per full batch
    pub batch_size: usize,
    /// Rough per-batch footprint
    pub estimated_memory_bytes: usize,
}

/// Sequential batch runner
#[derive(Clone, Copy, Debug)]
pub struct BatchProcessor {
    batch_size: usize,
}

impl BatchProcessor {
    /// Create a processor; a zero batch size is treated as 1
    pub fn new(batch_size: usize) -> Self {
        Self {
            batch_size: batch_size.max(1),
        }
    }

    /// Records per batch
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// `ceil(len / batch_size)`
    pub fn total_batches(&self, len: usize) -> usize {
        len.div_ceil(self.batch_size)
    }

    /// Call `f(batch, index, total_batches)` for every batch, in order
    ///
    /// Stops at the first error and returns it; later batches are not attempted. Does
    /// nothing for empty input.
    pub async fn process<'a, T, F, Fut>(&self, items: &'a [T], mut f: F) -> Result<()>
    where
        F: FnMut(&'a [T], usize, usize) -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        if items.is_empty() {
            return Ok(());
        }

        let total = self.total_batches(items.len());
        for (index, batch) in items.chunks(self.batch_size).enumerate() {
            tracing::trace!(batch_index = index, total_batches = total, size = batch.len(), "Processing batch");
            f(batch, index, total).await?;
        }
        Ok(())
    }

    /// Sizing information for `len` records of type `T`
    pub fn metrics<T>(&self, len: usize) -> BatchMetrics {
        BatchMetrics {
            total_batches: self.total_batches(len),
            total_records: len,
            batch_size: self.batch_size,
            estimated_memory_bytes: self.batch_size.min(len) * std::mem::size_of::<T>(),
        }
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use std::sync::Mutex;

    #[tokio::test]
    async fn twenty_five_items_in_batches_of_ten() {
        let items: Vec<u32> = (0..25).collect();
        let processor = BatchProcessor::new(10);
        let seen = Mutex::new(Vec::new());

        processor
            .process(&items, |batch, index, total| {
                seen.lock().unwrap().push((batch.to_vec(), index, total));
                async { Ok(()) }
            })
            .await
            .unwrap();

        let seen = seen.into_inner().unwrap();
        let sizes: Vec<usize> = seen.iter().map(|(b, _, _)| b.len()).collect();
        assert_eq!(sizes, vec![10, 10, 5]);
        assert!(seen.iter().all(|(_, _, total)| *total == 3));
        assert_eq!(
            seen.iter().map(|(_, i, _)| *i).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );
    }

    #[tokio::test]
    async fn concatenated_batches_equal_input() {
        for (len, size) in [(1, 1), (7, 3), (9, 3), (100, 7), (3, 50)] {
            let items: Vec<usize> = (0..len).collect();
            let processor = BatchProcessor::new(size);
            let mut calls = 0;
            let mut joined = Vec::new();

            processor
                .process(&items, |batch, _, _| {
                    calls += 1;
                    joined.extend_from_slice(batch);
                    async { Ok(()) }
                })
                .await
                .unwrap();

            assert_eq!(calls, len.div_ceil(size), "len={len} size={size}");
            assert_eq!(joined, items);
        }
    }

    #[tokio::test]
    async fn empty_input_is_a_no_op() {
        let processor = BatchProcessor::new(10);
        let mut calls = 0;
        processor
            .process(&[] as &[u8], |_, _, _| {
                calls += 1;
                async { Ok(()) }
            })
            .await
            .unwrap();
        assert_eq!(calls, 0);
    }

    #[tokio::test]
    async fn first_error_stops_processing() {
        let items: Vec<u8> = vec![0; 30];
        let processor = BatchProcessor::new(10);
        let mut calls = 0;

        let result = processor
            .process(&items, |_, index, _| {
                calls += 1;
                async move {
                    if index == 1 {
                        Err(Error::Cancelled)
                    } else {
                        Ok(())
                    }
                }
            })
            .await;

        assert!(matches!(result, Err(Error::Cancelled)));
        assert_eq!(calls, 2);
    }

    #[test]
    fn metrics_report_batch_shape() {
        let processor = BatchProcessor::new(10);
        let metrics = processor.metrics::<u64>(25);
        assert_eq!(metrics.total_batches, 3);
        assert_eq!(metrics.total_records, 25);
        assert_eq!(metrics.batch_size, 10);
        assert_eq!(metrics.estimated_memory_bytes, 80);

        assert_eq!(processor.metrics::<u64>(0).total_batches, 0);
        assert_eq!(BatchProcessor::new(0).batch_size(), 1);
    }
}
