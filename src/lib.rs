//! # Batch Generation Engine
//!
//! Bounded-concurrency batch execution for generation tasks that run against a
//! rate-limited external provider.
//!
//! ## Overview
//!
//! A batch is an ordered list of [`batch::TaskDescriptor`]s. The
//! [`batch::BatchExecutor`] splits it into windows of `concurrency_limit`
//! tasks, runs each window concurrently, waits for the whole window to settle,
//! pauses between windows and returns a [`batch::BatchResult`] whose successes
//! and failures are ordered by descriptor index.
//!
//! The provider itself is injected through the [`batch::TaskExecutor`] trait.
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use batchgen::batch::{BatchExecutor, FnExecutor, TaskDescriptor, TaskExecution, UsageMetrics};
//! use serde_json::json;
//!
//! # async fn example() -> batchgen::Result<()> {
//! let provider = FnExecutor::new(|descriptor: TaskDescriptor| async move {
//!     Ok(TaskExecution::new(json!({ "prompt": descriptor.input() }), UsageMetrics::new(50, 150)))
//! });
//!
//! let executor = BatchExecutor::new(Arc::new(provider)).with_concurrency_limit(3);
//! let result = executor
//!     .execute_batch(TaskDescriptor::from_payloads(["a cat", "a dog", "a fox"]))
//!     .await?;
//!
//! assert_eq!(result.summary.succeeded_count, 3);
//! # Ok(())
//! # }
//! ```
//!
//! ## Error model
//!
//! - Task failures are contained and reported in `BatchResult::failures`.
//! - Configuration problems (empty or oversized batch, zero concurrency)
//!   reject the whole call with [`BatchGenError::Configuration`] before any
//!   task runs.

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

use thiserror::Error;

/// Result type for batch operations
pub type Result<T> = std::result::Result<T, BatchGenError>;

/// Main error type for batch operations
#[derive(Error, Debug)]
pub enum BatchGenError {
    /// Batch rejected before execution
    #[error("Configuration error: {0}")]
    Configuration(#[from] batch::ConfigurationError),

    /// Join error from async tasks
    #[error("Async join error: {0}")]
    Join(#[from] tokio::task::JoinError),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Generic error for unexpected conditions
    #[error("Internal error: {0}")]
    Internal(String),
}

impl BatchGenError {
    /// HTTP status a request boundary would answer with.
    ///
    /// Configuration errors mean the batch was rejected as a whole (400);
    /// everything else is unexpected (500). A partially successful batch is
    /// never an error.
    pub fn status_code(&self) -> u16 {
        match self {
            BatchGenError::Configuration(_) => 400,
            BatchGenError::Serialization(_) => 400,
            BatchGenError::Join(_) | BatchGenError::Internal(_) => 500,
        }
    }

    /// True when the batch was rejected before any task ran
    pub fn is_configuration(&self) -> bool {
        matches!(self, BatchGenError::Configuration(_))
    }
}

/// Batch execution: task runner, windowed executor, aggregation and descriptor construction
pub mod batch;
