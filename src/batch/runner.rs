//! Single-task execution
//!
//! [`TaskRunner`] is the outcome-conversion boundary: every path through
//! [`TaskRunner::run`] ends in a [`TaskOutcome`] value. Capability errors are
//! recorded as failures and never surface as `Err` to the batch.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use async_trait::async_trait;
use tracing::{debug, instrument, warn};

use crate::batch::error_handling::TaskError;
use crate::batch::types::{TaskDescriptor, TaskExecution, TaskFailure, TaskOutcome, TaskSuccess};

/// Capability that performs one task against the external provider
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    /// Execute a single descriptor. Implementations report provider problems
    /// as [`TaskError`] rather than panicking.
    async fn execute(&self, descriptor: &TaskDescriptor) -> Result<TaskExecution, TaskError>;
}

/// Adapter turning an async closure into a [`TaskExecutor`]
pub struct FnExecutor<F> {
    func: F,
}

impl<F, Fut> FnExecutor<F>
where
    F: Fn(TaskDescriptor) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<TaskExecution, TaskError>> + Send + 'static,
{
    /// Wrap an async closure taking an owned descriptor
    pub fn new(func: F) -> Self {
        Self { func }
    }
}

#[async_trait]
impl<F, Fut> TaskExecutor for FnExecutor<F>
where
    F: Fn(TaskDescriptor) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<TaskExecution, TaskError>> + Send + 'static,
{
    async fn execute(&self, descriptor: &TaskDescriptor) -> Result<TaskExecution, TaskError> {
        (self.func)(descriptor.clone()).await
    }
}

/// Wraps a capability with a per-task deadline.
///
/// The batch engine never applies a timeout by itself; callers that want one
/// wrap their capability in this adapter. An expired task is reported as
/// [`TaskError::Timeout`].
pub struct TimeoutExecutor<E> {
    inner: E,
    timeout: Duration,
}

impl<E: TaskExecutor> TimeoutExecutor<E> {
    /// Wrap `inner` so each call fails after `timeout`
    pub fn new(inner: E, timeout: Duration) -> Self {
        Self { inner, timeout }
    }
}

#[async_trait]
impl<E: TaskExecutor> TaskExecutor for TimeoutExecutor<E> {
    async fn execute(&self, descriptor: &TaskDescriptor) -> Result<TaskExecution, TaskError> {
        match tokio::time::timeout(self.timeout, self.inner.execute(descriptor)).await {
            Ok(result) => result,
            Err(_) => Err(TaskError::Timeout(format!("no response within {:?}", self.timeout))),
        }
    }
}

/// Runs one descriptor through the injected capability
#[derive(Clone)]
pub struct TaskRunner {
    executor: Arc<dyn TaskExecutor>,
}

impl TaskRunner {
    /// Create a runner around a shared capability
    pub fn new(executor: Arc<dyn TaskExecutor>) -> Self {
        Self { executor }
    }

    /// Execute once and convert the result into an outcome. No retries.
    #[instrument(skip(self, descriptor), fields(index = descriptor.index))]
    pub async fn run(&self, descriptor: TaskDescriptor) -> TaskOutcome {
        let start = Instant::now();
        debug!(index = descriptor.index, "Task starting");

        match self.executor.execute(&descriptor).await {
            Ok(execution) => {
                debug!(
                    index = descriptor.index,
                    duration_ms = start.elapsed().as_millis(),
                    total_tokens = execution.usage.total_tokens,
                    "Task completed"
                );
                TaskOutcome::Success(TaskSuccess {
                    index: descriptor.index,
                    value: execution.value,
                    usage: execution.usage,
                })
            }
            Err(error) => {
                warn!(
                    index = descriptor.index,
                    duration_ms = start.elapsed().as_millis(),
                    error = %error,
                    "Task failed"
                );
                Self::failure(descriptor, &error)
            }
        }
    }

    /// Failure outcome for a descriptor
    pub fn failure(descriptor: TaskDescriptor, error: &TaskError) -> TaskOutcome {
        TaskOutcome::Failure(TaskFailure {
            index: descriptor.index,
            payload: descriptor.payload,
            error: error.to_string(),
            kind: error.kind(),
        })
    }
}

impl std::fmt::Debug for TaskRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskRunner")
            .field("executor", &"dyn TaskExecutor")
            .finish()
    }
}
