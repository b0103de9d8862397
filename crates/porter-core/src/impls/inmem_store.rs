//! InMemoryTaskStore - テスト・単一プロセス実行用の正本
//!
//! # 実装詳細
//! - 状態はすべて 1 つの `tokio::sync::Mutex` の中。claim はロック内で完結するので原子的
//! - claim は投入順（job 投入順 → job 内の task 順）で最初に見つかった claimable な task
//! - ロックを握ったまま await しない
//! - lease の期限切れはロック内で判定・取り上げるので、回収と保存が競合しない

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::debug;

use crate::domain::{
    AttemptRecord, DecisionRecord, JobId, JobRecord, SigningMaterial, TaskId, TaskRecord,
    TaskState, WorkerId,
};
use crate::ports::{StoreError, TaskStore};

#[derive(Default)]
struct StoreState {
    jobs: HashMap<JobId, JobRecord>,
    tasks: HashMap<TaskId, TaskRecord>,
    /// Claim order.
    order: Vec<TaskId>,
    attempts: Vec<AttemptRecord>,
    decisions: Vec<DecisionRecord>,
}

impl StoreState {
    fn job_mut(&mut self, job_id: JobId) -> Result<&mut JobRecord, StoreError> {
        self.jobs
            .get_mut(&job_id)
            .ok_or(StoreError::JobNotFound(job_id))
    }
}

#[derive(Clone, Default)]
pub struct InMemoryTaskStore {
    state: Arc<Mutex<StoreState>>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count of tasks per state, across all jobs.
    pub async fn counts(&self) -> HashMap<TaskState, usize> {
        let state = self.state.lock().await;
        let mut counts = HashMap::new();
        for task in state.tasks.values() {
            *counts.entry(task.state).or_insert(0) += 1;
        }
        counts
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn insert_job(&self, job: JobRecord, tasks: Vec<TaskRecord>) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        if state.jobs.contains_key(&job.job_id) {
            return Err(StoreError::DuplicateJob(job.job_id));
        }
        for task in tasks {
            state.order.push(task.task_id);
            state.tasks.insert(task.task_id, task);
        }
        state.jobs.insert(job.job_id, job);
        Ok(())
    }

    async fn get_job(&self, job_id: JobId) -> Result<JobRecord, StoreError> {
        let state = self.state.lock().await;
        state
            .jobs
            .get(&job_id)
            .cloned()
            .ok_or(StoreError::JobNotFound(job_id))
    }

    async fn activate_job(
        &self,
        job_id: JobId,
        signing: SigningMaterial,
        now: DateTime<Utc>,
    ) -> Result<JobRecord, StoreError> {
        let mut state = self.state.lock().await;
        let job = state.job_mut(job_id)?;
        job.signing = signing;
        job.activate(now);
        Ok(job.clone())
    }

    async fn suspend_job(
        &self,
        job_id: JobId,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<JobRecord, StoreError> {
        let mut state = self.state.lock().await;
        let job = state.job_mut(job_id)?;
        job.suspend(reason, now);
        Ok(job.clone())
    }

    async fn fail_job(
        &self,
        job_id: JobId,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<JobRecord, StoreError> {
        let mut state = self.state.lock().await;
        let job = state.job_mut(job_id)?;
        job.fail(reason, now);
        Ok(job.clone())
    }

    async fn cancel_job(&self, job_id: JobId, now: DateTime<Utc>) -> Result<JobRecord, StoreError> {
        let mut state = self.state.lock().await;
        let job = state.job_mut(job_id)?;
        job.cancel(now);
        Ok(job.clone())
    }

    async fn set_profile_event(
        &self,
        job_id: JobId,
        event_id: &str,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        let job = state.job_mut(job_id)?;
        job.profile_event_id = Some(event_id.to_string());
        job.updated_at = now;
        Ok(())
    }

    async fn settle_job(&self, job_id: JobId, now: DateTime<Utc>) -> Result<JobRecord, StoreError> {
        let mut state = self.state.lock().await;
        let StoreState { jobs, tasks, .. } = &mut *state;
        let job = jobs.get_mut(&job_id).ok_or(StoreError::JobNotFound(job_id))?;
        let states: Vec<TaskState> = job
            .task_ids
            .iter()
            .filter_map(|id| tasks.get(id).map(|t| t.state))
            .collect();
        job.settle(&states, now);
        Ok(job.clone())
    }

    async fn claim_next(
        &self,
        worker: WorkerId,
        now: DateTime<Utc>,
        lease_until: DateTime<Utc>,
    ) -> Result<Option<TaskRecord>, StoreError> {
        let mut state = self.state.lock().await;
        let StoreState {
            jobs, tasks, order, ..
        } = &mut *state;

        for task_id in order.iter() {
            let Some(task) = tasks.get_mut(task_id) else {
                continue;
            };
            if !task.is_claimable(now) {
                continue;
            }
            let accepts = jobs.get(&task.job_id).is_some_and(|j| j.accepts_claims());
            if !accepts {
                continue;
            }
            if task.claim(worker, now).is_ok() {
                task.renew_lease(lease_until);
                debug!(task_id = %task.task_id, %worker, "task claimed");
                return Ok(Some(task.clone()));
            }
        }
        Ok(None)
    }

    async fn reap_expired_leases(
        &self,
        reaper: WorkerId,
        now: DateTime<Utc>,
        lease_until: DateTime<Utc>,
    ) -> Result<Vec<TaskRecord>, StoreError> {
        let mut state = self.state.lock().await;
        let StoreState { tasks, order, .. } = &mut *state;

        let mut reaped = Vec::new();
        for task_id in order.iter() {
            let Some(task) = tasks.get_mut(task_id) else {
                continue;
            };
            let owner = task.claimed_by;
            if task.take_over(reaper, lease_until, now).is_ok() {
                debug!(task_id = %task.task_id, owner = ?owner, "expired claim taken over");
                reaped.push(task.clone());
            }
        }
        Ok(reaped)
    }

    async fn save_task(&self, worker: WorkerId, task: &TaskRecord) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        let stored = state
            .tasks
            .get_mut(&task.task_id)
            .ok_or(StoreError::TaskNotFound(task.task_id))?;
        if stored.state == TaskState::Complete {
            return Err(StoreError::Immutable(task.task_id));
        }
        if stored.claimed_by != Some(worker) {
            return Err(StoreError::LeaseLost {
                task_id: task.task_id,
                worker,
            });
        }
        *stored = task.clone();
        Ok(())
    }

    async fn get_task(&self, task_id: TaskId) -> Result<TaskRecord, StoreError> {
        let state = self.state.lock().await;
        state
            .tasks
            .get(&task_id)
            .cloned()
            .ok_or(StoreError::TaskNotFound(task_id))
    }

    async fn job_tasks(&self, job_id: JobId) -> Result<Vec<TaskRecord>, StoreError> {
        let state = self.state.lock().await;
        let job = state.jobs.get(&job_id).ok_or(StoreError::JobNotFound(job_id))?;
        Ok(job
            .task_ids
            .iter()
            .filter_map(|id| state.tasks.get(id).cloned())
            .collect())
    }

    async fn record_attempt(&self, attempt: AttemptRecord) -> Result<(), StoreError> {
        self.state.lock().await.attempts.push(attempt);
        Ok(())
    }

    async fn record_decision(&self, decision: DecisionRecord) -> Result<(), StoreError> {
        self.state.lock().await.decisions.push(decision);
        Ok(())
    }

    async fn attempts(&self, task_id: TaskId) -> Result<Vec<AttemptRecord>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .attempts
            .iter()
            .filter(|a| a.task_id == task_id)
            .cloned()
            .collect())
    }

    async fn decisions(&self, task_id: TaskId) -> Result<Vec<DecisionRecord>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .decisions
            .iter()
            .filter(|d| d.task_id == task_id)
            .cloned()
            .collect())
    }
}
