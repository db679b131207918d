//! Error taxonomy for batch execution
//!
//! Two families live here:
//! - [`ConfigurationError`]: the whole batch is rejected before any task runs.
//! - [`TaskError`]: a single task's capability failed. These never escape the
//!   task runner; they are recorded on the failure outcome instead.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that reject a batch before execution starts
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigurationError {
    /// No descriptors were submitted
    #[error("Batch contains no task descriptors")]
    EmptyBatch,

    /// More descriptors than the configured maximum
    #[error("Batch size {size} exceeds the limit of {max} tasks")]
    BatchTooLarge {
        /// Submitted descriptor count
        size: usize,
        /// Configured maximum
        max: usize,
    },

    /// A concurrency limit of zero
    #[error("Concurrency limit must be at least 1")]
    InvalidConcurrencyLimit,

    /// A maximum batch size of zero
    #[error("Maximum batch size must be at least 1")]
    InvalidMaxBatchSize,

    /// A prompt failed validation
    #[error("Invalid prompt at index {index}: {reason}")]
    InvalidPrompt {
        /// Position of the offending prompt
        index: usize,
        /// What was wrong with it
        reason: String,
    },

    /// Two descriptors share an index
    #[error("Task index {index} appears more than once")]
    DuplicateIndex {
        /// The repeated index
        index: usize,
    },

    /// A descriptor index falls outside `0..size`
    #[error("Task index {index} is out of range for a batch of {size}")]
    IndexOutOfRange {
        /// The offending index
        index: usize,
        /// Batch size the indices must cover
        size: usize,
    },
}

/// Errors reported by an injected task capability
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TaskError {
    /// The provider rejected the API key
    #[error("Provider rejected the credentials")]
    InvalidCredentials,

    /// The provider's rate or usage quota is exhausted
    #[error("Provider quota exceeded")]
    QuotaExceeded,

    /// The credentials lack access to the requested resource
    #[error("Permission denied by provider")]
    PermissionDenied,

    /// No response in time; carries the provider or adapter message
    #[error("Task timed out: {0}")]
    Timeout(String),

    /// The capability refused the task input
    #[error("Invalid task input: {0}")]
    InvalidInput(String),

    /// Any other provider failure, with its raw message
    #[error("Provider error: {0}")]
    Provider(String),

    /// A bug or panic inside the task
    #[error("Internal task error: {0}")]
    Internal(String),
}

/// Coarse classification of a task failure, carried on every failure outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskErrorKind {
    /// See [`TaskError::InvalidCredentials`]
    InvalidCredentials,
    /// See [`TaskError::QuotaExceeded`]
    QuotaExceeded,
    /// See [`TaskError::PermissionDenied`]
    PermissionDenied,
    /// See [`TaskError::Timeout`]
    Timeout,
    /// See [`TaskError::InvalidInput`]
    InvalidInput,
    /// See [`TaskError::Provider`]
    Provider,
    /// See [`TaskError::Internal`]
    Internal,
}

impl TaskError {
    /// Classify a raw provider error message.
    ///
    /// Providers report well-known conditions as marker strings inside the
    /// message (`API_KEY_INVALID`, `QUOTA_EXCEEDED`, `PERMISSION_DENIED`);
    /// anything unrecognised stays a generic provider error.
    pub fn from_provider_message(message: impl Into<String>) -> Self {
        let message = message.into();
        let lowered = message.to_lowercase();

        if message.contains("API_KEY_INVALID") {
            TaskError::InvalidCredentials
        } else if message.contains("QUOTA_EXCEEDED") {
            TaskError::QuotaExceeded
        } else if message.contains("PERMISSION_DENIED") {
            TaskError::PermissionDenied
        } else if lowered.contains("timed out") || lowered.contains("timeout") {
            TaskError::Timeout(message)
        } else {
            TaskError::Provider(message)
        }
    }

    /// Kind recorded on the failure outcome
    pub fn kind(&self) -> TaskErrorKind {
        match self {
            TaskError::InvalidCredentials => TaskErrorKind::InvalidCredentials,
            TaskError::QuotaExceeded => TaskErrorKind::QuotaExceeded,
            TaskError::PermissionDenied => TaskErrorKind::PermissionDenied,
            TaskError::Timeout(_) => TaskErrorKind::Timeout,
            TaskError::InvalidInput(_) => TaskErrorKind::InvalidInput,
            TaskError::Provider(_) => TaskErrorKind::Provider,
            TaskError::Internal(_) => TaskErrorKind::Internal,
        }
    }
}

impl TaskErrorKind {
    /// HTTP status a request boundary would use for this failure
    pub fn status_code(&self) -> u16 {
        match self {
            TaskErrorKind::InvalidCredentials => 401,
            TaskErrorKind::PermissionDenied => 403,
            TaskErrorKind::QuotaExceeded => 429,
            TaskErrorKind::InvalidInput => 400,
            TaskErrorKind::Timeout => 504,
            TaskErrorKind::Provider => 502,
            TaskErrorKind::Internal => 500,
        }
    }
}
