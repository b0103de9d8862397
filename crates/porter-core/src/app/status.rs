//! JobProgress - ジョブの内訳（完了 / エラー / 残り）

use serde::Serialize;

use crate::domain::{JobId, JobRecord, JobStatus, TaskId, TaskRecord, TaskState};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskFailure {
    pub task_id: TaskId,
    pub cause: String,
}

/// Breakdown of a job, always distinguishing completed from errored tasks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobProgress {
    pub job_id: JobId,
    pub status: JobStatus,
    pub cancelled: bool,
    /// Why the job was last suspended.
    pub job_error: Option<String>,
    pub profile_event_id: Option<String>,

    pub total: usize,
    pub pending: usize,
    pub uploading: usize,
    pub publishing: usize,
    pub complete: usize,
    pub error: usize,

    pub errors: Vec<TaskFailure>,
}

impl JobProgress {
    pub fn from_records(job: &JobRecord, tasks: &[TaskRecord]) -> Self {
        let mut progress = Self {
            job_id: job.job_id,
            status: job.status,
            cancelled: job.cancelled,
            job_error: job.error.clone(),
            profile_event_id: job.profile_event_id.clone(),
            total: tasks.len(),
            pending: 0,
            uploading: 0,
            publishing: 0,
            complete: 0,
            error: 0,
            errors: Vec::new(),
        };
        for task in tasks {
            match task.state {
                TaskState::Pending => progress.pending += 1,
                TaskState::Uploading => progress.uploading += 1,
                TaskState::Publishing => progress.publishing += 1,
                TaskState::Complete => progress.complete += 1,
                TaskState::Error => {
                    progress.error += 1;
                    progress.errors.push(TaskFailure {
                        task_id: task.task_id,
                        cause: task.last_error.clone().unwrap_or_default(),
                    });
                }
            }
        }
        progress
    }

    pub fn in_flight(&self) -> usize {
        self.uploading + self.publishing
    }

    /// Nothing more will happen without outside action.
    pub fn is_settled(&self) -> bool {
        self.status.is_finished() || (self.cancelled && self.in_flight() == 0)
    }

    /// Waiting for a (new) signer: submitted or suspended, with no task running.
    pub fn awaiting_signer(&self) -> bool {
        self.status == JobStatus::Pending && self.in_flight() == 0
    }

    /// Some tasks ended in error while others completed.
    pub fn is_partial(&self) -> bool {
        self.complete > 0 && self.error > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::Keys;
    use crate::domain::{Decision, MediaRef, SigningMaterial, WorkerId};
    use chrono::Utc;

    #[test]
    fn breakdown_lists_errors_with_cause() {
        let now = Utc::now();
        let mut job = JobRecord::new(
            JobId::generate(),
            "alice",
            SigningMaterial::Embedded {
                keys: Keys::generate(),
            },
            None,
            now,
        );
        job.activate(now);

        let mut tasks: Vec<TaskRecord> = (0..3)
            .map(|i| {
                TaskRecord::new(
                    TaskId::generate(),
                    job.job_id,
                    vec![MediaRef::image(format!("https://cdn/{i}.jpg"))],
                    None,
                    None,
                    now,
                )
            })
            .collect();
        tasks[0].claim(WorkerId(0), now).unwrap();
        tasks[0]
            .apply(
                &Decision::Fail {
                    reason: "HTTP 404".into(),
                },
                now,
            )
            .unwrap();
        tasks[1].claim(WorkerId(1), now).unwrap();

        let p = JobProgress::from_records(&job, &tasks);
        assert_eq!(p.total, 3);
        assert_eq!(p.error, 1);
        assert_eq!(p.uploading, 1);
        assert_eq!(p.pending, 1);
        assert_eq!(p.errors[0].cause, "HTTP 404");
        assert!(!p.is_settled());
        assert!(!p.is_partial());
    }
}
