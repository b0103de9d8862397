//! Attempt and Decision models for execution history.
//!
//! These make a job's breakdown explainable: what each try did, what came of
//! it, and why the task ended up where it is.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::decision::Decision;
use super::errors::ErrorKind;
use super::ids::{AttemptId, TaskId, WorkerId};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AttemptOutcome {
    Success {
        event_id: String,
        acked: Vec<String>,
        failed: Vec<String>,
    },
    Failure {
        error_kind: ErrorKind,
        message: String,
    },
}

/// A single execution attempt of a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub attempt_id: AttemptId,
    pub task_id: TaskId,
    pub worker: WorkerId,
    /// retry_count at claim time.
    pub retry_count: u32,
    /// How many media were uploaded during this attempt.
    pub uploads: usize,
    pub outcome: AttemptOutcome,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// A decision made after a failed attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub task_id: TaskId,

    /// What was observed that triggered this decision.
    pub trigger: serde_json::Value,

    /// Examples: "retry_policy", "taxonomy"
    pub policy: String,

    /// Examples: "schedule_retry", "release", "mark_error"
    pub decision: String,

    pub context: Option<serde_json::Value>,

    pub decided_at: DateTime<Utc>,
}

impl DecisionRecord {
    pub fn new(
        task_id: TaskId,
        trigger: serde_json::Value,
        policy: impl Into<String>,
        decision: impl Into<String>,
        context: Option<serde_json::Value>,
        decided_at: DateTime<Utc>,
    ) -> Self {
        Self {
            task_id,
            trigger,
            policy: policy.into(),
            decision: decision.into(),
            context,
            decided_at,
        }
    }

    /// Record for a decider verdict.
    pub fn from_decision(
        task_id: TaskId,
        decision: &Decision,
        error_kind: ErrorKind,
        retry_count: u32,
        decided_at: DateTime<Utc>,
    ) -> Self {
        let policy = match error_kind {
            ErrorKind::Retryable => "retry_policy",
            ErrorKind::Terminal | ErrorKind::SessionExpired => "taxonomy",
        };
        let (reason, context) = match decision {
            Decision::Retry { not_before, reason } => (
                reason,
                Some(serde_json::json!({ "not_before": not_before.to_rfc3339() })),
            ),
            Decision::Release { reason } | Decision::Fail { reason } => (reason, None),
        };
        let trigger = serde_json::json!({
            "error": reason,
            "error_kind": error_kind,
            "retry_count": retry_count,
        });
        Self::new(task_id, trigger, policy, decision.name(), context, decided_at)
    }
}
