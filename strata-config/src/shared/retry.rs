use serde::{Deserialize, Serialize};

use crate::shared::ValidationError;

/// Retry policy for transient destination failures.
///
/// Retries use exponential backoff with jitter, capped at [`RetryConfig::max_backoff_ms`].
/// Once `max_attempts` is exhausted the failure is escalated to a fatal destination error.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RetryConfig {
    /// Maximum number of attempts per table, including the first one.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Delay before the first retry, in milliseconds.
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    /// Upper bound for the backoff delay, in milliseconds.
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    /// Upper bound for a single destination call, in milliseconds.
    ///
    /// A call that exceeds it is aborted and treated as a transient failure,
    /// so a hung backend cannot block a table worker indefinitely.
    #[serde(default = "default_operation_timeout_ms")]
    pub operation_timeout_ms: u64,
}

impl RetryConfig {
    /// Default number of attempts per table.
    pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

    /// Default delay before the first retry in milliseconds.
    pub const DEFAULT_INITIAL_BACKOFF_MS: u64 = 200;

    /// Default backoff cap in milliseconds.
    pub const DEFAULT_MAX_BACKOFF_MS: u64 = 10_000;

    /// Default per-call timeout in milliseconds.
    pub const DEFAULT_OPERATION_TIMEOUT_MS: u64 = 300_000;

    /// Validates retry configuration settings.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.max_attempts == 0 {
            return Err(ValidationError::MaxAttemptsZero);
        }

        if self.max_backoff_ms < self.initial_backoff_ms {
            return Err(ValidationError::InvalidFieldValue {
                field: "retry.max_backoff_ms".to_string(),
                constraint: "must be greater than or equal to `initial_backoff_ms`".to_string(),
            });
        }

        if self.operation_timeout_ms == 0 {
            return Err(ValidationError::InvalidFieldValue {
                field: "retry.operation_timeout_ms".to_string(),
                constraint: "must be greater than zero".to_string(),
            });
        }

        Ok(())
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            operation_timeout_ms: default_operation_timeout_ms(),
        }
    }
}

fn default_max_attempts() -> u32 {
    RetryConfig::DEFAULT_MAX_ATTEMPTS
}

fn default_initial_backoff_ms() -> u64 {
    RetryConfig::DEFAULT_INITIAL_BACKOFF_MS
}

fn default_max_backoff_ms() -> u64 {
    RetryConfig::DEFAULT_MAX_BACKOFF_MS
}

fn default_operation_timeout_ms() -> u64 {
    RetryConfig::DEFAULT_OPERATION_TIMEOUT_MS
}
