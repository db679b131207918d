//! Batch Executor
//!
//! Runs a batch of task descriptors in waves:
//! - descriptors are split by position into windows of `concurrency_limit`
//! - every task in a window is spawned at once and the window is joined
//!   before anything else happens, so at most `concurrency_limit` tasks are
//!   ever in flight
//! - a fixed `inter_window_delay` separates consecutive windows (none after
//!   the last one)
//! - outcomes are merged, ordered by index and summarized
//!
//! Dropping the returned future aborts the tasks of the window in flight.
//!
//! Only configuration problems fail the call. Task failures end up in
//! [`BatchResult::failures`].

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use futures::future::join_all;
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::batch::aggregation::ResultAggregator;
use crate::batch::error_handling::TaskError;
use crate::batch::runner::{TaskExecutor, TaskRunner};
use crate::batch::template::{build_batch_descriptors, build_profiled_consistent_descriptors, GenerationProfile};
use crate::batch::types::{BatchConfig, BatchResult, ProgressCallback, TaskDescriptor, TaskOutcome};
use crate::Result;

/// Executes batches of tasks with bounded, windowed concurrency
pub struct BatchExecutor {
    runner: TaskRunner,
    config: BatchConfig,
    progress_callback: Option<Arc<ProgressCallback>>,
}

impl BatchExecutor {
    /// Create an executor around a task capability with default settings
    pub fn new(executor: Arc<dyn TaskExecutor>) -> Self {
        Self {
            runner: TaskRunner::new(executor),
            config: BatchConfig::default(),
            progress_callback: None,
        }
    }

    /// Replace the whole configuration, e.g. one parsed from request options
    pub fn with_config(mut self, config: BatchConfig) -> Self {
        self.config = config;
        self
    }

    /// Set concurrency limit (tasks per window)
    pub fn with_concurrency_limit(mut self, limit: usize) -> Self {
        self.config.concurrency_limit = limit.max(1);
        self
    }

    /// Set the pause inserted between windows
    pub fn with_inter_window_delay(mut self, delay: Duration) -> Self {
        self.config.inter_window_delay = delay;
        self
    }

    /// Set the largest accepted batch
    pub fn with_max_batch_size(mut self, max_batch_size: usize) -> Self {
        self.config.max_batch_size = max_batch_size;
        self
    }

    /// Set progress callback, called with `(completed, total)` as each task settles
    pub fn with_progress_callback<F>(mut self, callback: F) -> Self
    where
        F: Fn(usize, usize) + Send + Sync + 'static,
    {
        self.progress_callback = Some(Arc::new(Box::new(callback)));
        self
    }

    /// Current configuration
    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    /// Execute a batch of descriptors
    #[instrument(skip(self, descriptors), fields(job_count = descriptors.len()))]
    pub async fn execute_batch(&self, descriptors: Vec<TaskDescriptor>) -> Result<BatchResult> {
        let batch_start = Instant::now();

        self.config.validate()?;
        if let Err(e) = self.config.check_descriptors(&descriptors) {
            warn!(error = %e, "Rejecting batch");
            return Err(e.into());
        }

        let batch_id = Uuid::new_v4();
        let total_jobs = descriptors.len();
        let window_count = self.config.window_count(total_jobs);

        info!(
            batch_id = %batch_id,
            total_jobs = total_jobs,
            concurrency_limit = self.config.concurrency_limit,
            windows = window_count,
            inter_window_delay_ms = self.config.inter_window_delay.as_millis(),
            "Starting batch execution"
        );

        let completed = AtomicUsize::new(0);
        let mut aggregator = ResultAggregator::new(batch_id, total_jobs);

        for (window_index, window) in descriptors.chunks(self.config.concurrency_limit).enumerate() {
            debug!(window = window_index, size = window.len(), "Window starting");

            let outcomes = self.run_window(window, &completed, total_jobs).await?;
            aggregator.extend(outcomes);

            debug!(window = window_index, settled = aggregator.settled(), "Window settled");

            if window_index + 1 < window_count && !self.config.inter_window_delay.is_zero() {
                debug!(
                    delay_ms = self.config.inter_window_delay.as_millis(),
                    "Pausing before next window"
                );
                tokio::time::sleep(self.config.inter_window_delay).await;
            }
        }

        let result = aggregator.finish();
        let batch_duration = batch_start.elapsed();
        let success_rate = (result.summary.succeeded_count as f64 / total_jobs as f64) * 100.0;

        info!(
            batch_id = %batch_id,
            total_jobs = total_jobs,
            succeeded = result.summary.succeeded_count,
            failed = result.summary.failed_count,
            total_tokens = result.summary.total_usage.total_tokens,
            success_rate = format!("{:.2}%", success_rate),
            batch_duration_ms = batch_duration.as_millis(),
            "Batch execution completed"
        );

        if success_rate < 80.0 && total_jobs > 5 {
            warn!(
                batch_id = %batch_id,
                success_rate = format!("{:.2}%", success_rate),
                failed = result.summary.failed_count,
                "High failure rate detected in batch execution"
            );
        }

        Ok(result)
    }

    /// Expand a base prompt over variations, enhance each composed prompt with
    /// the profile (consistency is always on for a set), then run the batch
    pub async fn execute_consistent_set(
        &self,
        base: &str,
        variations: &[String],
        profile: &GenerationProfile,
    ) -> Result<BatchResult> {
        let descriptors =
            build_profiled_consistent_descriptors(base, variations, profile, self.config.max_batch_size)?;
        self.execute_batch(descriptors).await
    }

    /// Validate and enhance a list of prompts with a generation profile, then run the batch
    pub async fn execute_prompts(
        &self,
        prompts: &[String],
        profile: &GenerationProfile,
    ) -> Result<BatchResult> {
        let descriptors = build_batch_descriptors(prompts, profile, self.config.max_batch_size)?;
        self.execute_batch(descriptors).await
    }

    /// Spawn every task of one window and wait until all of them settle
    async fn run_window(
        &self,
        window: &[TaskDescriptor],
        completed: &AtomicUsize,
        total_jobs: usize,
    ) -> Result<Vec<TaskOutcome>> {
        let mut handles = WindowHandles(
            window
                .iter()
                .cloned()
                .map(|descriptor| {
                    let runner = self.runner.clone();
                    tokio::spawn(async move { runner.run(descriptor).await })
                })
                .collect(),
        );

        let joined = join_all(handles.0.iter_mut().map(|handle| async move {
            let joined = handle.await;
            self.report_progress(completed.fetch_add(1, Ordering::SeqCst) + 1, total_jobs);
            joined
        }))
        .await;

        let mut outcomes = Vec::with_capacity(window.len());
        for (descriptor, joined) in window.iter().zip(joined) {
            match joined {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) if e.is_panic() => {
                    let message = panic_message(e);
                    error!(index = descriptor.index, panic = %message, "Task panicked");
                    outcomes.push(TaskRunner::failure(
                        descriptor.clone(),
                        &TaskError::Internal(format!("task panicked: {}", message)),
                    ));
                }
                Err(e) => {
                    error!(index = descriptor.index, error = %e, "Task join error");
                    return Err(e.into());
                }
            }
        }

        Ok(outcomes)
    }

    /// Invoke the progress callback, keeping a panicking callback away from the batch
    fn report_progress(&self, current: usize, total_jobs: usize) {
        if let Some(ref callback) = self.progress_callback {
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| callback(current, total_jobs))) {
                warn!(
                    completed = current,
                    panic = %payload_message(payload.as_ref()),
                    "Progress callback panicked"
                );
            }
        }
    }
}

/// Join handles of one window, aborted if the window is dropped before it settles
struct WindowHandles(Vec<JoinHandle<TaskOutcome>>);

impl Drop for WindowHandles {
    fn drop(&mut self) {
        for handle in &self.0 {
            handle.abort();
        }
    }
}

fn panic_message(error: JoinError) -> String {
    let payload: Box<dyn Any + Send> = error.into_panic();
    payload_message(payload.as_ref())
}

fn payload_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

impl std::fmt::Debug for BatchExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchExecutor")
            .field("config", &self.config)
            .field("progress_callback", &self.progress_callback.is_some())
            .finish()
    }
}
