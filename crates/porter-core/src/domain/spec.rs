//! Input specs: what a job submission looks like.
//!
//! The item lister (outside this crate) turns a source account into a
//! `JobSpec`; `JobSpec::into_records` turns it into store records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::ids::{JobId, TaskId};
use super::job::{JobRecord, ProfileMetadata, SigningMaterial};
use super::media::MediaRef;
use super::task::TaskRecord;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSpec {
    pub source_handle: String,

    #[serde(default)]
    pub profile: Option<ProfileMetadata>,

    pub tasks: Vec<TaskSpec>,
}

/// One source post.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSpec {
    pub media: Vec<MediaRef>,

    #[serde(default)]
    pub caption: Option<String>,

    /// As provided by the source; parsed later, UTC when no offset is given.
    #[serde(default)]
    pub timestamp: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SpecError {
    #[error("source handle is empty")]
    EmptyHandle,

    #[error("task #{0} has no media")]
    NoMedia(usize),
}

impl JobSpec {
    pub fn validate(&self) -> Result<(), SpecError> {
        if self.source_handle.trim().is_empty() {
            return Err(SpecError::EmptyHandle);
        }
        if let Some(i) = self.tasks.iter().position(|t| t.media.is_empty()) {
            return Err(SpecError::NoMedia(i));
        }
        Ok(())
    }

    /// Task ids come from `next_task_id`, in task order.
    pub fn into_records(
        self,
        job_id: JobId,
        signing: SigningMaterial,
        now: DateTime<Utc>,
        mut next_task_id: impl FnMut() -> TaskId,
    ) -> Result<(JobRecord, Vec<TaskRecord>), SpecError> {
        self.validate()?;
        let mut job = JobRecord::new(job_id, self.source_handle, signing, self.profile, now);
        let tasks: Vec<TaskRecord> = self
            .tasks
            .into_iter()
            .map(|t| {
                TaskRecord::new(
                    next_task_id(),
                    job_id,
                    t.media,
                    t.caption,
                    t.timestamp,
                    now,
                )
            })
            .collect();
        for t in &tasks {
            job.add_task(t.task_id);
        }
        Ok((job, tasks))
    }
}
