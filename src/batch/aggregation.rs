//! Outcome aggregation
//!
//! Windows hand their settled outcomes to a [`ResultAggregator`]; once the
//! last window finishes the aggregator splits, orders and summarizes them
//! into a [`BatchResult`].

use chrono::Utc;
use tracing::debug;
use uuid::Uuid;

use crate::batch::types::{BatchResult, BatchSummary, TaskFailure, TaskOutcome, TaskSuccess};

/// Collects task outcomes across windows
#[derive(Debug)]
pub struct ResultAggregator {
    batch_id: Uuid,
    expected: usize,
    successes: Vec<TaskSuccess>,
    failures: Vec<TaskFailure>,
}

impl ResultAggregator {
    /// Create an aggregator for a batch of `expected` descriptors
    pub fn new(batch_id: Uuid, expected: usize) -> Self {
        Self {
            batch_id,
            expected,
            successes: Vec::with_capacity(expected),
            failures: Vec::new(),
        }
    }

    /// Record one settled outcome, in whatever order it arrived
    pub fn push(&mut self, outcome: TaskOutcome) {
        match outcome {
            TaskOutcome::Success(success) => self.successes.push(success),
            TaskOutcome::Failure(failure) => self.failures.push(failure),
        }
    }

    /// Record every outcome of a settled window
    pub fn extend<I: IntoIterator<Item = TaskOutcome>>(&mut self, outcomes: I) {
        for outcome in outcomes {
            self.push(outcome);
        }
    }

    /// Outcomes recorded so far
    pub fn settled(&self) -> usize {
        self.successes.len() + self.failures.len()
    }

    /// Sort both lists by index and compute the summary
    pub fn finish(self) -> BatchResult {
        let Self { batch_id, expected, mut successes, mut failures } = self;

        successes.sort_by_key(|success| success.index);
        failures.sort_by_key(|failure| failure.index);

        debug_assert_eq!(successes.len() + failures.len(), expected);

        let summary = BatchSummary {
            total: expected,
            succeeded_count: successes.len(),
            failed_count: failures.len(),
            total_usage: successes.iter().map(|success| &success.usage).sum(),
        };

        debug!(
            batch_id = %batch_id,
            succeeded = summary.succeeded_count,
            failed = summary.failed_count,
            total_tokens = summary.total_usage.total_tokens,
            "Aggregated batch outcomes"
        );

        BatchResult {
            batch_id,
            successes,
            failures,
            summary,
            generated_at: Utc::now(),
        }
    }
}
