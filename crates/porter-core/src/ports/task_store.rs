//! TaskStore port - job / task / 実行履歴の正本（source of truth）
//!
//! # 設計原則
//! - `claim_next` が唯一の直列化ポイント。同じ task を 2 つのワーカーが同時に持つことはない
//! - task の更新は claim 中のワーカーからしか受け付けない（[`StoreError::LeaseLost`]）
//! - claim には期限（`lease_until`）がある。期限切れの claim は `reap_expired_leases` で取り上げる
//! - complete になった task は以後一切更新できない
//! - job の状態変更は個別の操作として公開する（read-modify-write をワーカー側でやらない）

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::domain::{
    AttemptRecord, DecisionRecord, JobId, JobRecord, SigningMaterial, TaskId, TaskRecord,
    WorkerId,
};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("job {0} not found")]
    JobNotFound(JobId),

    #[error("task {0} not found")]
    TaskNotFound(TaskId),

    #[error("job {0} already exists")]
    DuplicateJob(JobId),

    #[error("task {task_id} is not claimed by {worker}")]
    LeaseLost { task_id: TaskId, worker: WorkerId },

    #[error("task {0} is complete and can no longer change")]
    Immutable(TaskId),

    #[error("storage backend error: {0}")]
    Backend(String),
}

#[async_trait]
pub trait TaskStore: Send + Sync {
    // ---- jobs ----

    /// Insert a job together with all of its tasks.
    async fn insert_job(&self, job: JobRecord, tasks: Vec<TaskRecord>) -> Result<(), StoreError>;

    async fn get_job(&self, job_id: JobId) -> Result<JobRecord, StoreError>;

    /// Signer is usable: store the (possibly updated) signing material and
    /// move the job to processing.
    async fn activate_job(
        &self,
        job_id: JobId,
        signing: SigningMaterial,
        now: DateTime<Utc>,
    ) -> Result<JobRecord, StoreError>;

    async fn suspend_job(
        &self,
        job_id: JobId,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<JobRecord, StoreError>;

    async fn fail_job(
        &self,
        job_id: JobId,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<JobRecord, StoreError>;

    async fn cancel_job(&self, job_id: JobId, now: DateTime<Utc>) -> Result<JobRecord, StoreError>;

    async fn set_profile_event(
        &self,
        job_id: JobId,
        event_id: &str,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Recompute job status from its tasks.
    async fn settle_job(&self, job_id: JobId, now: DateTime<Utc>) -> Result<JobRecord, StoreError>;

    // ---- tasks ----

    /// Atomically claim one claimable task of a job that accepts claims.
    ///
    /// Returns the record already moved to `uploading`, owned by `worker`
    /// until `lease_until`.
    async fn claim_next(
        &self,
        worker: WorkerId,
        now: DateTime<Utc>,
        lease_until: DateTime<Utc>,
    ) -> Result<Option<TaskRecord>, StoreError>;

    /// Atomically hand every in-flight task whose lease ran out to `reaper`.
    ///
    /// The returned records are owned by `reaper` until `lease_until`; the
    /// caller decides where each one goes next.
    async fn reap_expired_leases(
        &self,
        reaper: WorkerId,
        now: DateTime<Utc>,
        lease_until: DateTime<Utc>,
    ) -> Result<Vec<TaskRecord>, StoreError>;

    /// Persist a claimed task (checkpoint or final state).
    ///
    /// The stored record must still be claimed by `worker`.
    async fn save_task(&self, worker: WorkerId, task: &TaskRecord) -> Result<(), StoreError>;

    async fn get_task(&self, task_id: TaskId) -> Result<TaskRecord, StoreError>;

    async fn job_tasks(&self, job_id: JobId) -> Result<Vec<TaskRecord>, StoreError>;

    // ---- history ----

    async fn record_attempt(&self, attempt: AttemptRecord) -> Result<(), StoreError>;

    async fn record_decision(&self, decision: DecisionRecord) -> Result<(), StoreError>;

    async fn attempts(&self, task_id: TaskId) -> Result<Vec<AttemptRecord>, StoreError>;

    async fn decisions(&self, task_id: TaskId) -> Result<Vec<DecisionRecord>, StoreError>;
}
