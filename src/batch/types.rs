//! Batch data types
//!
//! Descriptors, outcomes, usage counters, configuration and the result
//! envelope shared by every part of the engine.

use std::iter::Sum;
use std::ops::{Add, AddAssign};
use std::time::Duration;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

use crate::batch::error_handling::{ConfigurationError, TaskErrorKind};

/// Default upper bound on descriptors per batch
pub const DEFAULT_MAX_BATCH_SIZE: usize = 10;

/// Default number of tasks in flight per window
pub const DEFAULT_CONCURRENCY_LIMIT: usize = 3;

/// Default pause between windows
pub const DEFAULT_INTER_WINDOW_DELAY: Duration = Duration::from_millis(1000);

/// One unit of batch work
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskDescriptor {
    /// Stable 0-based position assigned at submission time
    pub index: usize,
    /// Caller-supplied task data (usually a prompt)
    pub payload: String,
    /// Enriched input computed before execution
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub derived_input: Option<String>,
}

impl TaskDescriptor {
    /// Descriptor with no derived input
    pub fn new(index: usize, payload: impl Into<String>) -> Self {
        Self {
            index,
            payload: payload.into(),
            derived_input: None,
        }
    }

    /// Attach the enriched input the provider should receive
    pub fn with_derived_input(mut self, derived_input: impl Into<String>) -> Self {
        self.derived_input = Some(derived_input.into());
        self
    }

    /// Input handed to the provider: the derived input when present, otherwise the payload
    pub fn input(&self) -> &str {
        self.derived_input.as_deref().unwrap_or(&self.payload)
    }

    /// Build descriptors from an ordered list of payloads, indexing by position
    pub fn from_payloads<I, S>(payloads: I) -> Vec<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        payloads
            .into_iter()
            .enumerate()
            .map(|(index, payload)| Self::new(index, payload))
            .collect()
    }
}

/// Token counters reported by the provider for one task
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageMetrics {
    /// Tokens consumed by the input
    pub prompt_tokens: u64,
    /// Tokens consumed overall
    pub total_tokens: u64,
}

impl UsageMetrics {
    /// Counters from prompt and total token counts
    pub fn new(prompt_tokens: u64, total_tokens: u64) -> Self {
        Self { prompt_tokens, total_tokens }
    }
}

impl Add for UsageMetrics {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self {
            prompt_tokens: self.prompt_tokens + rhs.prompt_tokens,
            total_tokens: self.total_tokens + rhs.total_tokens,
        }
    }
}

impl AddAssign for UsageMetrics {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

impl<'a> Sum<&'a UsageMetrics> for UsageMetrics {
    fn sum<I: Iterator<Item = &'a UsageMetrics>>(iter: I) -> Self {
        iter.fold(UsageMetrics::default(), |acc, usage| acc + *usage)
    }
}

/// Value returned by a task capability on success
#[derive(Debug, Clone, PartialEq)]
pub struct TaskExecution {
    /// Opaque provider output
    pub value: serde_json::Value,
    /// Tokens spent producing it
    pub usage: UsageMetrics,
}

impl TaskExecution {
    /// Wrap a provider value and its usage
    pub fn new(value: serde_json::Value, usage: UsageMetrics) -> Self {
        Self { value, usage }
    }
}

/// A task that completed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskSuccess {
    /// Index of the descriptor that produced it
    pub index: usize,
    /// Provider output
    pub value: serde_json::Value,
    /// Provider usage for this task
    pub usage: UsageMetrics,
}

/// A task whose capability failed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskFailure {
    /// Index of the descriptor that failed
    pub index: usize,
    /// Original payload, kept for diagnostics and resubmission
    pub payload: String,
    /// Human-readable error message
    pub error: String,
    /// Classification of the error
    pub kind: TaskErrorKind,
}

/// Result of executing one descriptor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TaskOutcome {
    /// The capability returned a value
    Success(TaskSuccess),
    /// The capability returned an error or panicked
    Failure(TaskFailure),
}

impl TaskOutcome {
    /// Index of the underlying descriptor
    pub fn index(&self) -> usize {
        match self {
            TaskOutcome::Success(success) => success.index,
            TaskOutcome::Failure(failure) => failure.index,
        }
    }

    /// True for [`TaskOutcome::Success`]
    pub fn is_success(&self) -> bool {
        matches!(self, TaskOutcome::Success(_))
    }
}

/// Batch execution configuration
///
/// Deserializes from the request options object, e.g.
/// `{"concurrencyLimit": 2, "interWindowDelayMs": 500}`; omitted fields take
/// the process-wide defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BatchConfig {
    /// Largest accepted batch (`maxBatchSize`)
    pub max_batch_size: usize,
    /// Tasks per window (`concurrencyLimit`)
    pub concurrency_limit: usize,
    /// Pause between windows (`interWindowDelayMs`)
    #[serde(
        rename = "interWindowDelayMs",
        serialize_with = "serialize_millis",
        deserialize_with = "deserialize_millis"
    )]
    pub inter_window_delay: Duration,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
            concurrency_limit: DEFAULT_CONCURRENCY_LIMIT,
            inter_window_delay: DEFAULT_INTER_WINDOW_DELAY,
        }
    }
}

impl BatchConfig {
    /// Parse and validate a JSON options object
    pub fn from_options_json(options: &str) -> crate::Result<Self> {
        let config: Self = serde_json::from_str(options)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject limits of zero
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.concurrency_limit == 0 {
            return Err(ConfigurationError::InvalidConcurrencyLimit);
        }
        if self.max_batch_size == 0 {
            return Err(ConfigurationError::InvalidMaxBatchSize);
        }
        Ok(())
    }

    /// Check a descriptor count against the batch bounds
    pub fn check_batch_size(&self, size: usize) -> Result<(), ConfigurationError> {
        if size == 0 {
            return Err(ConfigurationError::EmptyBatch);
        }
        if size > self.max_batch_size {
            return Err(ConfigurationError::BatchTooLarge {
                size,
                max: self.max_batch_size,
            });
        }
        Ok(())
    }

    /// Check size bounds, then that the indices form a permutation of `0..len`
    pub fn check_descriptors(&self, descriptors: &[TaskDescriptor]) -> Result<(), ConfigurationError> {
        self.check_batch_size(descriptors.len())?;

        let size = descriptors.len();
        let mut seen = vec![false; size];
        for descriptor in descriptors {
            let index = descriptor.index;
            if index >= size {
                return Err(ConfigurationError::IndexOutOfRange { index, size });
            }
            if seen[index] {
                return Err(ConfigurationError::DuplicateIndex { index });
            }
            seen[index] = true;
        }
        Ok(())
    }

    /// Number of windows a batch of `size` descriptors is split into
    pub fn window_count(&self, size: usize) -> usize {
        size.div_ceil(self.concurrency_limit.max(1))
    }
}

fn serialize_millis<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(duration.as_millis() as u64)
}

fn deserialize_millis<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
    u64::deserialize(deserializer).map(Duration::from_millis)
}

/// Counters over a finished batch
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchSummary {
    /// Descriptors submitted
    pub total: usize,
    /// Length of `successes`
    pub succeeded_count: usize,
    /// Length of `failures`
    pub failed_count: usize,
    /// Usage summed over successes
    pub total_usage: UsageMetrics,
}

/// Result envelope for one batch invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchResult {
    /// Identifier generated for this invocation
    pub batch_id: Uuid,
    /// Ascending by index
    pub successes: Vec<TaskSuccess>,
    /// Ascending by index
    pub failures: Vec<TaskFailure>,
    /// Counters over both lists
    pub summary: BatchSummary,
    /// When the result was assembled
    pub generated_at: DateTime<Utc>,
}

impl BatchResult {
    /// True when at least one task failed but the batch itself was accepted
    pub fn is_partial(&self) -> bool {
        !self.failures.is_empty() && !self.successes.is_empty()
    }

    /// Indices of failed tasks, for resubmission
    pub fn failed_indices(&self) -> Vec<usize> {
        self.failures.iter().map(|failure| failure.index).collect()
    }
}

/// Progress callback type: `(completed, total)`
pub type ProgressCallback = Box<dyn Fn(usize, usize) + Send + Sync>;
