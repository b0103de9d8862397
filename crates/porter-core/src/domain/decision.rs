//! Decision model: what happens to a task after a failed attempt.
//!
//! The decider is a pure function of (task record, classified error, now).
//! Executing the decision (mutating and persisting the record) is the
//! worker's job.

use chrono::{DateTime, Utc};

use super::errors::{ErrorKind, PorterError};
use super::retry::RetryPolicy;
use super::task::TaskRecord;

#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// Back to pending after a delay, counting one retry.
    Retry {
        not_before: DateTime<Utc>,
        reason: String,
    },

    /// Back to pending without counting: the failure was not the task's fault
    /// (the signing session died underneath it).
    Release { reason: String },

    /// Terminal.
    Fail { reason: String },
}

impl Decision {
    /// Short name used in decision records.
    pub fn name(&self) -> &'static str {
        match self {
            Decision::Retry { .. } => "schedule_retry",
            Decision::Release { .. } => "release",
            Decision::Fail { .. } => "mark_error",
        }
    }
}

pub trait Decider: Send + Sync {
    fn decide(&self, task: &TaskRecord, error: &PorterError, now: DateTime<Utc>) -> Decision;
}

/// Default decider: taxonomy first, then the retry budget.
///
/// - `Terminal` -> Fail
/// - `SessionExpired` -> Release
/// - `Retryable` -> Retry while `retry_count < max_retries`, Fail afterwards
#[derive(Debug, Clone, Default)]
pub struct DefaultDecider {
    retry_policy: RetryPolicy,
}

impl DefaultDecider {
    pub fn new(retry_policy: RetryPolicy) -> Self {
        Self { retry_policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.retry_policy
    }
}

impl Decider for DefaultDecider {
    fn decide(&self, task: &TaskRecord, error: &PorterError, now: DateTime<Utc>) -> Decision {
        match error.kind() {
            ErrorKind::Terminal => Decision::Fail {
                reason: error.message().to_string(),
            },
            ErrorKind::SessionExpired => Decision::Release {
                reason: error.message().to_string(),
            },
            ErrorKind::Retryable if task.retry_count >= self.retry_policy.max_retries => {
                Decision::Fail {
                    reason: format!(
                        "max retries exhausted ({}/{}): {}",
                        task.retry_count,
                        self.retry_policy.max_retries,
                        error.message()
                    ),
                }
            }
            ErrorKind::Retryable => {
                let delay = self.retry_policy.next_delay(task.retry_count + 1);
                let not_before = now
                    + chrono::Duration::from_std(delay).unwrap_or(chrono::Duration::zero());
                Decision::Retry {
                    not_before,
                    reason: error.message().to_string(),
                }
            }
        }
    }
}
