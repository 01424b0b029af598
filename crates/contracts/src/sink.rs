//! AccessSink trait - dispatch output interface
//!
//! Defines the abstract interface for sinks.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{ContractError, SharedEvent};

/// Event output trait
///
/// Called on the request-handling thread (or a queue worker), possibly from
/// many threads at once, so receivers are `&self`; sinks keep any buffers or
/// connections behind their own locks. Implementations must treat the event
/// as read-only.
pub trait AccessSink: Send + Sync {
    /// Sink name (used for logging/metrics)
    fn name(&self) -> &str;

    /// Deliver one frozen event
    ///
    /// # Errors
    /// Returns a write error with context; mark it transient when a retry may succeed
    fn deliver(&self, event: &SharedEvent) -> Result<(), ContractError>;

    /// How a queue worker may retry transient failures of this sink
    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::none()
    }

    /// Flush buffer (if any)
    fn flush(&self) -> Result<(), ContractError> {
        Ok(())
    }

    /// Close sink
    fn close(&self) -> Result<(), ContractError> {
        Ok(())
    }
}

impl<S: AccessSink + ?Sized> AccessSink for Arc<S> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn deliver(&self, event: &SharedEvent) -> Result<(), ContractError> {
        (**self).deliver(event)
    }

    fn retry_policy(&self) -> RetryPolicy {
        (**self).retry_policy()
    }

    fn flush(&self) -> Result<(), ContractError> {
        (**self).flush()
    }

    fn close(&self) -> Result<(), ContractError> {
        (**self).close()
    }
}

/// Sink-defined retry policy for transient delivery failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Extra attempts after the first failure
    pub max_retries: u32,
    /// Pause between attempts
    pub backoff_ms: u64,
}

impl RetryPolicy {
    /// Never retry
    pub const fn none() -> Self {
        Self {
            max_retries: 0,
            backoff_ms: 0,
        }
    }

    pub const fn fixed(max_retries: u32, backoff_ms: u64) -> Self {
        Self {
            max_retries,
            backoff_ms,
        }
    }

    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }

    /// Whether attempt number `attempt` (1-based) may be followed by another
    pub fn allows_retry_after(&self, attempt: u32, error: &ContractError) -> bool {
        error.is_transient() && attempt <= self.max_retries
    }
}
