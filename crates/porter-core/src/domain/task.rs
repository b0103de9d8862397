//! Task record and its state machine.
//!
//! ```text
//! pending --claim--> uploading --(uploads done)--> publishing --(ack >= 1)--> complete
//!    ^                   |                             |
//!    +---- retry --------+-----------------------------+   (retry_count += 1)
//!    +---- release ------+-----------------------------+   (session expired, not counted)
//!                        +------ fail -----------------+--> error
//! ```
//!
//! Design:
//! - すべての状態遷移はこのファイルのメソッドを通す（直接 `state` を書き換えない）
//! - `complete` は不変。以降の遷移はすべて `TransitionError`
//! - `claimed_by` が lease の持ち主。ストアは claim 中のレコードしか更新させない
//! - `lease_until` を過ぎた in-flight タスクは持ち主が消えたとみなして回収される

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::decision::Decision;
use super::errors::PorterError;
use super::ids::{JobId, TaskId, WorkerId};
use super::media::{MediaRef, UploadedMedia};
use crate::event::SignedEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Pending,
    Uploading,
    Publishing,
    Complete,
    Error,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskState::Complete | TaskState::Error)
    }

    /// Claimed by a worker right now.
    pub fn is_in_flight(self) -> bool {
        matches!(self, TaskState::Uploading | TaskState::Publishing)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PostKind {
    Single,
    Multi,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("cannot {action} a task in state {from:?}")]
    InvalidState { action: &'static str, from: TaskState },

    #[error("task is not claimable until {0}")]
    NotYetDue(DateTime<Utc>),

    #[error("upload checkpoint out of order: expected index {expected}, got {got}")]
    UploadOutOfOrder { expected: usize, got: usize },

    #[error("{uploaded} of {total} media uploaded")]
    UploadsIncomplete { uploaded: usize, total: usize },

    #[error("refusing to complete without a signed event id")]
    MissingEventId,

    #[error("refusing to complete without a relay acknowledgement")]
    NoAcknowledgement,
}

/// 遷移違反はワーカーのバグ。リトライしても直らない
impl From<TransitionError> for PorterError {
    fn from(err: TransitionError) -> Self {
        PorterError::terminal(err.to_string())
    }
}

/// One content item to migrate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub task_id: TaskId,
    pub job_id: JobId,

    pub media: Vec<MediaRef>,
    pub caption: Option<String>,
    /// Raw timestamp string from the source platform; parsed at event build time.
    pub original_timestamp: Option<String>,
    pub post_kind: PostKind,

    pub state: TaskState,

    /// Index-aligned with `media`; grows as uploads are checkpointed.
    pub uploaded: Vec<UploadedMedia>,

    pub event_id: Option<String>,
    pub event: Option<SignedEvent>,
    pub acked_relays: Vec<String>,

    pub last_error: Option<String>,
    pub retry_count: u32,

    pub claimed_by: Option<WorkerId>,
    /// The claim is void after this instant; renewed at every checkpoint.
    pub lease_until: Option<DateTime<Utc>>,
    /// Pending tasks are not claimable before this instant (retry backoff).
    pub not_before: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TaskRecord {
    pub fn new(
        task_id: TaskId,
        job_id: JobId,
        media: Vec<MediaRef>,
        caption: Option<String>,
        original_timestamp: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        let post_kind = if media.len() > 1 {
            PostKind::Multi
        } else {
            PostKind::Single
        };
        Self {
            task_id,
            job_id,
            media,
            caption,
            original_timestamp,
            post_kind,
            state: TaskState::Pending,
            uploaded: Vec::new(),
            event_id: None,
            event: None,
            acked_relays: Vec::new(),
            last_error: None,
            retry_count: 0,
            claimed_by: None,
            lease_until: None,
            not_before: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_claimable(&self, now: DateTime<Utc>) -> bool {
        self.state == TaskState::Pending && self.not_before.is_none_or(|t| t <= now)
    }

    /// pending -> uploading
    pub fn claim(&mut self, worker: WorkerId, now: DateTime<Utc>) -> Result<(), TransitionError> {
        if self.state != TaskState::Pending {
            return Err(self.invalid("claim"));
        }
        if let Some(due) = self.not_before
            && due > now
        {
            return Err(TransitionError::NotYetDue(due));
        }
        self.state = TaskState::Uploading;
        self.claimed_by = Some(worker);
        self.not_before = None;
        self.updated_at = now;
        Ok(())
    }

    pub fn renew_lease(&mut self, until: DateTime<Utc>) {
        self.lease_until = Some(until);
    }

    /// In flight and its lease ran out at or before `now`.
    pub fn lease_expired(&self, now: DateTime<Utc>) -> bool {
        self.state.is_in_flight() && self.lease_until.is_some_and(|t| t <= now)
    }

    /// Hand an expired claim over to `owner` (the reaper) so it can be resolved.
    pub fn take_over(
        &mut self,
        owner: WorkerId,
        lease_until: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<(), TransitionError> {
        if !self.lease_expired(now) {
            return Err(self.invalid("take over"));
        }
        self.claimed_by = Some(owner);
        self.lease_until = Some(lease_until);
        self.updated_at = now;
        Ok(())
    }

    /// Media still to upload, as `(index, media)`.
    pub fn remaining_media(&self) -> impl Iterator<Item = (usize, &MediaRef)> {
        self.media.iter().enumerate().skip(self.uploaded.len())
    }

    /// Record one finished upload (checkpoint).
    pub fn record_upload(
        &mut self,
        index: usize,
        uploaded: UploadedMedia,
        now: DateTime<Utc>,
    ) -> Result<(), TransitionError> {
        if self.state != TaskState::Uploading {
            return Err(self.invalid("record an upload for"));
        }
        if index != self.uploaded.len() {
            return Err(TransitionError::UploadOutOfOrder {
                expected: self.uploaded.len(),
                got: index,
            });
        }
        self.uploaded.push(uploaded);
        self.updated_at = now;
        Ok(())
    }

    /// uploading -> publishing
    pub fn begin_publishing(&mut self, now: DateTime<Utc>) -> Result<(), TransitionError> {
        if self.state != TaskState::Uploading {
            return Err(self.invalid("publish"));
        }
        if self.uploaded.len() != self.media.len() {
            return Err(TransitionError::UploadsIncomplete {
                uploaded: self.uploaded.len(),
                total: self.media.len(),
            });
        }
        self.state = TaskState::Publishing;
        self.updated_at = now;
        Ok(())
    }

    /// Keep the signed event before broadcasting, so a retry republishes the
    /// same id instead of signing a new one.
    pub fn record_signed(
        &mut self,
        event: SignedEvent,
        now: DateTime<Utc>,
    ) -> Result<(), TransitionError> {
        if self.state != TaskState::Publishing {
            return Err(self.invalid("record a signed event for"));
        }
        if event.id.is_empty() {
            return Err(TransitionError::MissingEventId);
        }
        self.event_id = Some(event.id.clone());
        self.event = Some(event);
        self.updated_at = now;
        Ok(())
    }

    /// publishing -> complete
    pub fn complete(
        &mut self,
        event: SignedEvent,
        acked_relays: Vec<String>,
        now: DateTime<Utc>,
    ) -> Result<(), TransitionError> {
        if self.state != TaskState::Publishing {
            return Err(self.invalid("complete"));
        }
        if event.id.is_empty() {
            return Err(TransitionError::MissingEventId);
        }
        if acked_relays.is_empty() {
            return Err(TransitionError::NoAcknowledgement);
        }
        self.event_id = Some(event.id.clone());
        self.event = Some(event);
        self.acked_relays = acked_relays;
        self.last_error = None;
        self.claimed_by = None;
        self.lease_until = None;
        self.state = TaskState::Complete;
        self.updated_at = now;
        Ok(())
    }

    /// Apply the decider's verdict for a failed attempt.
    pub fn apply(&mut self, decision: &Decision, now: DateTime<Utc>) -> Result<(), TransitionError> {
        if !self.state.is_in_flight() {
            return Err(self.invalid("fail"));
        }
        match decision {
            Decision::Retry { not_before, reason } => {
                self.retry_count += 1;
                self.state = TaskState::Pending;
                self.not_before = Some(*not_before);
                self.last_error = Some(reason.clone());
            }
            Decision::Release { reason } => {
                self.state = TaskState::Pending;
                self.last_error = Some(reason.clone());
            }
            Decision::Fail { reason } => {
                self.state = TaskState::Error;
                self.last_error = Some(reason.clone());
            }
        }
        self.claimed_by = None;
        self.lease_until = None;
        self.updated_at = now;
        Ok(())
    }

    fn invalid(&self, action: &'static str) -> TransitionError {
        TransitionError::InvalidState {
            action,
            from: self.state,
        }
    }
}
