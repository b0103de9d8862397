//! Job record and status management.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{JobId, TaskId};
use super::task::TaskState;
use crate::crypto::Keys;

/// Job status (aggregated from tasks).
///
/// - Pending: submitted, signer not usable yet (remote handshake outstanding)
/// - Processing: tasks are claimable
/// - Complete: every task is complete or error (partial success is still complete),
///   or the job was cancelled and nothing is in flight
/// - Error: job-level failure (signer could never be established)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Complete,
    Error,
}

impl JobStatus {
    pub fn is_finished(self) -> bool {
        matches!(self, JobStatus::Complete | JobStatus::Error)
    }
}

/// Who holds the private key for this job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum SigningMaterial {
    /// The process holds the keypair.
    Embedded { keys: Keys },

    /// A remote signer holds it; we only know the session coordinates.
    Remote {
        /// Ephemeral client public key of the session (hex).
        client_pubkey: String,
        relay: String,
        /// Learned from the connect ack.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        signer_pubkey: Option<String>,
        /// Learned from `get_public_key`; the author of every event.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        user_pubkey: Option<String>,
    },
}

impl SigningMaterial {
    pub fn is_remote(&self) -> bool {
        matches!(self, SigningMaterial::Remote { .. })
    }
}

/// Kind-0 profile fields carried over from the source account.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub about: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub picture: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub website: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nip05: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lud16: Option<String>,
}

/// Job record: tracks a collection of tasks.
///
/// Same pattern as TaskRecord: state transitions via methods.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub job_id: JobId,
    pub source_handle: String,
    pub signing: SigningMaterial,
    pub status: JobStatus,
    pub profile: Option<ProfileMetadata>,

    pub task_ids: Vec<TaskId>,

    /// Set by cancellation; claims skip this job's tasks from then on.
    pub cancelled: bool,
    pub error: Option<String>,
    pub profile_event_id: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl JobRecord {
    pub fn new(
        job_id: JobId,
        source_handle: impl Into<String>,
        signing: SigningMaterial,
        profile: Option<ProfileMetadata>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            job_id,
            source_handle: source_handle.into(),
            signing,
            status: JobStatus::Pending,
            profile,
            task_ids: Vec::new(),
            cancelled: false,
            error: None,
            profile_event_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn add_task(&mut self, task_id: TaskId) {
        self.task_ids.push(task_id);
    }

    /// Tasks of this job may be claimed.
    pub fn accepts_claims(&self) -> bool {
        self.status == JobStatus::Processing && !self.cancelled
    }

    /// Signer is ready: pending -> processing.
    pub fn activate(&mut self, now: DateTime<Utc>) {
        if self.status == JobStatus::Pending {
            self.status = JobStatus::Processing;
            self.error = None;
            self.updated_at = now;
        }
    }

    /// Signer went away: processing -> pending until a new handshake.
    pub fn suspend(&mut self, reason: impl Into<String>, now: DateTime<Utc>) {
        if self.status == JobStatus::Processing {
            self.status = JobStatus::Pending;
            self.error = Some(reason.into());
            self.updated_at = now;
        }
    }

    pub fn fail(&mut self, reason: impl Into<String>, now: DateTime<Utc>) {
        if !self.status.is_finished() {
            self.status = JobStatus::Error;
            self.error = Some(reason.into());
            self.updated_at = now;
        }
    }

    pub fn cancel(&mut self, now: DateTime<Utc>) {
        self.cancelled = true;
        self.updated_at = now;
    }

    /// Recompute status from task states.
    ///
    /// Task errors never fail the job: once nothing is pending or in flight the
    /// job is complete, whatever the mix. A cancelled job is complete as soon as
    /// nothing is in flight; its pending tasks stay pending.
    pub fn settle(&mut self, task_states: &[TaskState], now: DateTime<Utc>) {
        if self.status != JobStatus::Processing {
            return;
        }
        let done = if self.cancelled {
            task_states.iter().all(|s| !s.is_in_flight())
        } else {
            task_states.iter().all(|s| s.is_terminal())
        };
        if done {
            self.status = JobStatus::Complete;
            self.updated_at = now;
        }
    }
}
