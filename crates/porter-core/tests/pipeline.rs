mod common;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rstest::rstest;

use common::{Harness, RELAYS, settle};
use porter_core::crypto::Keys;
use porter_core::domain::{
    AttemptOutcome, AttemptRecord, DecisionRecord, JobId, JobRecord, JobStatus, MediaRef,
    ProfileMetadata, SigningMaterial, TaskId, TaskRecord, TaskSpec, TaskState, WorkerId,
};
use porter_core::event::Kind;
use porter_core::impls::{BlobFault, InMemoryTaskStore};
use porter_core::ports::{Clock, FetchError, StoreError, TaskStore};
use porter_core::relay::RelayBehavior;

#[tokio::test]
async fn two_of_three_relays_acking_completes_the_task() {
    let h = Harness::new().await;
    h.relays
        .set_behavior(RELAYS[2], RelayBehavior::Reject("blocked: spam".into()))
        .await;
    let migrator = h.migrator();
    let keys = Keys::generate();
    let job_id = migrator
        .submit_embedded(h.spec(1).await, keys.clone())
        .await
        .unwrap();

    let pool = migrator.spawn_workers();
    let progress = settle(&migrator, job_id).await;
    pool.shutdown_and_join().await;

    assert_eq!(progress.status, JobStatus::Complete);
    assert_eq!(progress.complete, 1);
    assert_eq!(progress.error, 0);

    let task = &h.store.job_tasks(job_id).await.unwrap()[0];
    assert_eq!(task.acked_relays.len(), 2);
    assert!(!task.acked_relays.contains(&RELAYS[2].to_string()));

    let event = task.event.as_ref().unwrap();
    assert_eq!(task.event_id.as_deref(), Some(event.id.as_str()));
    assert_eq!(event.id, event.compute_id().unwrap());
    event.verify().unwrap();
    assert_eq!(event.pubkey, keys.public_key());
    assert_eq!(event.kind, Kind::PICTURE);
    assert!(event.tag_value("imeta").is_some());

    assert_eq!(h.relays.events(RELAYS[0]).await.len(), 1);
    assert!(h.relays.events(RELAYS[2]).await.is_empty());

    let attempts = h.store.attempts(task.task_id).await.unwrap();
    match &attempts[0].outcome {
        AttemptOutcome::Success { failed, .. } => assert_eq!(failed, &vec![RELAYS[2].to_string()]),
        other => panic!("unexpected outcome {other:?}"),
    }
}

#[tokio::test]
async fn retries_stop_at_the_configured_bound() {
    let h = Harness::new().await;
    for url in RELAYS {
        h.relays
            .set_behavior(url, RelayBehavior::Reject("blocked".into()))
            .await;
    }
    let migrator = h.migrator();
    let job_id = migrator
        .submit_embedded(h.spec(1).await, Keys::generate())
        .await
        .unwrap();

    let pool = migrator.spawn_workers();
    let progress = settle(&migrator, job_id).await;
    pool.shutdown_and_join().await;

    assert_eq!(progress.status, JobStatus::Complete);
    assert_eq!(progress.error, 1);
    assert!(progress.errors[0].cause.contains("max retries exhausted"));

    let task = &h.store.job_tasks(job_id).await.unwrap()[0];
    assert_eq!(task.state, TaskState::Error);
    assert_eq!(task.retry_count, 3);

    let attempts = h.store.attempts(task.task_id).await.unwrap();
    assert_eq!(attempts.len(), 4);
    let decisions = h.store.decisions(task.task_id).await.unwrap();
    assert_eq!(decisions.len(), 4);
    assert_eq!(decisions.last().unwrap().decision, "mark_error");
    assert!(
        decisions[..3]
            .iter()
            .all(|d| d.decision == "schedule_retry")
    );

    // 1 回目のアップロードが残るので、再試行で上げ直さない
    assert_eq!(h.blobs.upload_count().await, 1);
}

/// Counts tasks held by more than one worker at a time.
#[derive(Default)]
struct Tracking {
    active: HashMap<TaskId, WorkerId>,
    violations: usize,
    max_active: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StoreCall {
    SaveTask,
    RecordAttempt,
    SettleJob,
}

/// Wraps the in-memory store to watch claims and to fail chosen calls once.
#[derive(Default)]
struct InstrumentedStore {
    inner: InMemoryTaskStore,
    tracking: Arc<Mutex<Tracking>>,
    faults: Mutex<Vec<StoreCall>>,
}

impl InstrumentedStore {
    fn fail_once(&self, call: StoreCall) {
        self.faults.lock().unwrap().push(call);
    }

    fn fault(&self, call: StoreCall) -> Result<(), StoreError> {
        let mut faults = self.faults.lock().unwrap();
        match faults.iter().position(|c| *c == call) {
            Some(i) => {
                faults.remove(i);
                Err(StoreError::Backend(format!("{call:?}: connection reset")))
            }
            None => Ok(()),
        }
    }
}

#[async_trait]
impl TaskStore for InstrumentedStore {
    async fn insert_job(&self, job: JobRecord, tasks: Vec<TaskRecord>) -> Result<(), StoreError> {
        self.inner.insert_job(job, tasks).await
    }

    async fn get_job(&self, job_id: JobId) -> Result<JobRecord, StoreError> {
        self.inner.get_job(job_id).await
    }

    async fn activate_job(
        &self,
        job_id: JobId,
        signing: SigningMaterial,
        now: DateTime<Utc>,
    ) -> Result<JobRecord, StoreError> {
        self.inner.activate_job(job_id, signing, now).await
    }

    async fn suspend_job(
        &self,
        job_id: JobId,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<JobRecord, StoreError> {
        self.inner.suspend_job(job_id, reason, now).await
    }

    async fn fail_job(
        &self,
        job_id: JobId,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<JobRecord, StoreError> {
        self.inner.fail_job(job_id, reason, now).await
    }

    async fn cancel_job(&self, job_id: JobId, now: DateTime<Utc>) -> Result<JobRecord, StoreError> {
        self.inner.cancel_job(job_id, now).await
    }

    async fn set_profile_event(
        &self,
        job_id: JobId,
        event_id: &str,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.inner.set_profile_event(job_id, event_id, now).await
    }

    async fn settle_job(&self, job_id: JobId, now: DateTime<Utc>) -> Result<JobRecord, StoreError> {
        self.fault(StoreCall::SettleJob)?;
        self.inner.settle_job(job_id, now).await
    }

    async fn claim_next(
        &self,
        worker: WorkerId,
        now: DateTime<Utc>,
        lease_until: DateTime<Utc>,
    ) -> Result<Option<TaskRecord>, StoreError> {
        let claimed = self.inner.claim_next(worker, now, lease_until).await?;
        if let Some(task) = &claimed {
            let mut t = self.tracking.lock().unwrap();
            if t.active.insert(task.task_id, worker).is_some() {
                t.violations += 1;
            }
            t.max_active = t.max_active.max(t.active.len());
        }
        Ok(claimed)
    }

    async fn reap_expired_leases(
        &self,
        reaper: WorkerId,
        now: DateTime<Utc>,
        lease_until: DateTime<Utc>,
    ) -> Result<Vec<TaskRecord>, StoreError> {
        self.inner.reap_expired_leases(reaper, now, lease_until).await
    }

    async fn save_task(&self, worker: WorkerId, task: &TaskRecord) -> Result<(), StoreError> {
        self.fault(StoreCall::SaveTask)?;
        // 手放す直前に外す（保存後だと次の claim と競合する）
        if !matches!(task.state, TaskState::Uploading | TaskState::Publishing) {
            self.tracking.lock().unwrap().active.remove(&task.task_id);
        }
        self.inner.save_task(worker, task).await
    }

    async fn get_task(&self, task_id: TaskId) -> Result<TaskRecord, StoreError> {
        self.inner.get_task(task_id).await
    }

    async fn job_tasks(&self, job_id: JobId) -> Result<Vec<TaskRecord>, StoreError> {
        self.inner.job_tasks(job_id).await
    }

    async fn record_attempt(&self, attempt: AttemptRecord) -> Result<(), StoreError> {
        self.fault(StoreCall::RecordAttempt)?;
        self.inner.record_attempt(attempt).await
    }

    async fn record_decision(&self, decision: DecisionRecord) -> Result<(), StoreError> {
        self.inner.record_decision(decision).await
    }

    async fn attempts(&self, task_id: TaskId) -> Result<Vec<AttemptRecord>, StoreError> {
        self.inner.attempts(task_id).await
    }

    async fn decisions(&self, task_id: TaskId) -> Result<Vec<DecisionRecord>, StoreError> {
        self.inner.decisions(task_id).await
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn no_task_is_processed_by_two_workers() {
    let store = InstrumentedStore::default();
    let tracking = Arc::clone(&store.tracking);
    let h = Harness::with_store(Arc::new(store)).await;
    let migrator = h.migrator();
    let job_id = migrator
        .submit_embedded(h.spec(12).await, Keys::generate())
        .await
        .unwrap();

    let pool = migrator.spawn_workers();
    assert_eq!(pool.size(), 3);
    let progress = settle(&migrator, job_id).await;
    pool.shutdown_and_join().await;

    assert_eq!(progress.complete, 12);
    let t = tracking.lock().unwrap();
    assert_eq!(t.violations, 0);
    assert!(t.max_active <= 3, "max active {}", t.max_active);
    assert!(t.active.is_empty());

    for task in h.store.job_tasks(job_id).await.unwrap() {
        assert_eq!(h.store.attempts(task.task_id).await.unwrap().len(), 1);
    }
    assert_eq!(h.relays.events(RELAYS[0]).await.len(), 12);
}

#[tokio::test]
async fn upload_resumes_after_the_last_checkpoint() {
    let h = Harness::new().await;
    let first = "https://cdn.source.test/c/1.jpg";
    let second = "https://cdn.source.test/c/2.jpg";
    h.media.insert(first, b"one".to_vec(), Some("image/jpeg")).await;
    h.media
        .fail(
            second,
            FetchError::Http {
                url: second.into(),
                status: 503,
            },
        )
        .await;

    let mut spec = h.spec(0).await;
    spec.tasks.push(TaskSpec {
        media: vec![MediaRef::image(first), MediaRef::image(second)],
        caption: Some("carousel".into()),
        timestamp: None,
    });

    let migrator = h.migrator();
    let job_id = migrator.submit_embedded(spec, Keys::generate()).await.unwrap();
    let processor = migrator.processor();
    let worker = WorkerId(0);

    let task = processor.claim(worker).await.unwrap().unwrap();
    let state = processor.process(worker, task).await.unwrap();
    assert_eq!(state, TaskState::Pending);

    let task = &h.store.job_tasks(job_id).await.unwrap()[0];
    assert_eq!(task.uploaded.len(), 1);
    assert_eq!(task.retry_count, 1);
    assert!(task.last_error.as_deref().unwrap().contains("503"));
    assert_eq!(h.blobs.upload_count().await, 1);

    h.media.insert(second, b"two".to_vec(), Some("image/jpeg")).await;
    let task = processor.claim(worker).await.unwrap().unwrap();
    let state = processor.process(worker, task).await.unwrap();
    assert_eq!(state, TaskState::Complete);

    // 1 枚目は上げ直さない
    assert_eq!(h.blobs.upload_count().await, 2);
    let task = &h.store.job_tasks(job_id).await.unwrap()[0];
    assert_eq!(task.uploaded.len(), 2);
    assert_eq!(task.event.as_ref().unwrap().kind, Kind::PICTURE);

    let progress = migrator.progress(job_id).await.unwrap();
    assert_eq!(progress.status, JobStatus::Complete);
}

#[tokio::test]
async fn mismatched_blob_hash_is_retried() {
    let h = Harness::new().await;
    h.blobs.push_fault(BlobFault::WrongHash).await;
    let migrator = h.migrator();
    let job_id = migrator
        .submit_embedded(h.spec(1).await, Keys::generate())
        .await
        .unwrap();

    let pool = migrator.spawn_workers();
    let progress = settle(&migrator, job_id).await;
    pool.shutdown_and_join().await;

    assert_eq!(progress.complete, 1);
    let task = &h.store.job_tasks(job_id).await.unwrap()[0];
    assert_eq!(task.retry_count, 1);
    assert_eq!(h.blobs.upload_count().await, 2);

    let attempts = h.store.attempts(task.task_id).await.unwrap();
    assert_eq!(attempts.len(), 2);
    assert!(matches!(
        &attempts[0].outcome,
        AttemptOutcome::Failure { message, .. } if message.contains("hash")
    ));
}

#[tokio::test]
async fn missing_media_fails_one_task_without_stopping_the_job() {
    let h = Harness::new().await;
    let mut spec = h.spec(3).await;
    spec.tasks.push(TaskSpec {
        media: vec![MediaRef::image("https://cdn.source.test/gone.jpg")],
        caption: None,
        timestamp: None,
    });

    let migrator = h.migrator();
    let job_id = migrator.submit_embedded(spec, Keys::generate()).await.unwrap();
    let pool = migrator.spawn_workers();
    let progress = settle(&migrator, job_id).await;
    pool.shutdown_and_join().await;

    assert_eq!(progress.status, JobStatus::Complete);
    assert_eq!(progress.complete, 3);
    assert_eq!(progress.error, 1);
    assert!(progress.is_partial());
    assert!(progress.errors[0].cause.contains("404"));

    let failed = h.store.get_task(progress.errors[0].task_id).await.unwrap();
    assert_eq!(failed.retry_count, 0);
    assert_eq!(h.store.attempts(failed.task_id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn cancelled_job_is_not_claimed() {
    let h = Harness::new().await;
    let migrator = h.migrator();
    let job_id = migrator
        .submit_embedded(h.spec(4).await, Keys::generate())
        .await
        .unwrap();

    let progress = migrator.cancel(job_id).await.unwrap();
    assert!(progress.cancelled);
    assert!(progress.is_settled());
    assert_eq!(progress.status, JobStatus::Complete);

    let pool = migrator.spawn_workers();
    tokio::time::sleep(Duration::from_millis(50)).await;
    pool.shutdown_and_join().await;

    let progress = migrator.progress(job_id).await.unwrap();
    assert_eq!(progress.status, JobStatus::Complete);
    assert_eq!(progress.pending, 4);
    assert_eq!(h.blobs.upload_count().await, 0);
    assert!(h.relays.events(RELAYS[0]).await.is_empty());
}

#[tokio::test]
async fn profile_is_published_when_the_signer_attaches() {
    let h = Harness::new().await;
    let mut spec = h.spec(0).await;
    spec.profile = Some(ProfileMetadata {
        name: Some("alice".into()),
        about: Some("moved here".into()),
        ..ProfileMetadata::default()
    });
    let keys = Keys::generate();

    let migrator = h.migrator();
    let job_id = migrator.submit_embedded(spec, keys.clone()).await.unwrap();

    let progress = migrator.progress(job_id).await.unwrap();
    // タスクなしのジョブはその場で complete
    assert_eq!(progress.status, JobStatus::Complete);
    assert_eq!(progress.total, 0);

    let event_id = progress.profile_event_id.unwrap();
    let events = h.relays.events(RELAYS[1]).await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].id, event_id);
    assert_eq!(events[0].kind, Kind::METADATA);
    assert_eq!(events[0].pubkey, keys.public_key());
    assert!(events[0].content.contains("moved here"));
}

#[tokio::test]
async fn abandoned_claim_is_taken_back_after_its_lease() {
    let h = Harness::new().await;
    let migrator = h.migrator();
    let job_id = migrator
        .submit_embedded(h.spec(2).await, Keys::generate())
        .await
        .unwrap();

    // worker 99 は claim したまま戻ってこない
    let lease = chrono::Duration::seconds(h.config.lease_secs as i64);
    let abandoned = migrator.processor().claim(WorkerId(99)).await.unwrap().unwrap();
    assert_eq!(abandoned.lease_until, Some(h.clock.now() + lease));
    h.clock.advance(lease + chrono::Duration::seconds(1));

    let pool = migrator.spawn_workers();
    let progress = settle(&migrator, job_id).await;
    pool.shutdown_and_join().await;

    assert_eq!(progress.status, JobStatus::Complete);
    assert_eq!(progress.complete, 2);

    let task = h.store.get_task(abandoned.task_id).await.unwrap();
    assert_eq!(task.state, TaskState::Complete);
    assert_eq!(task.retry_count, 1);
    assert!(task.claimed_by.is_none());

    let attempts = h.store.attempts(task.task_id).await.unwrap();
    assert!(matches!(
        &attempts[0].outcome,
        AttemptOutcome::Failure { message, .. } if message.contains("lease expired")
    ));
    let decisions = h.store.decisions(task.task_id).await.unwrap();
    assert_eq!(decisions[0].decision, "schedule_retry");

    // 期限切れの持ち主はもう書き込めない
    assert!(h.store.save_task(WorkerId(99), &abandoned).await.is_err());
}

#[rstest]
#[case::checkpoint(StoreCall::SaveTask)]
#[case::attempt_history(StoreCall::RecordAttempt)]
#[case::job_settlement(StoreCall::SettleJob)]
#[tokio::test]
async fn a_failed_store_call_does_not_strand_the_job(#[case] failing: StoreCall) {
    let store = Arc::new(InstrumentedStore::default());
    let h = Harness::with_store(store.clone()).await;
    let migrator = h.migrator();
    let job_id = migrator
        .submit_embedded(h.spec(1).await, Keys::generate())
        .await
        .unwrap();
    store.fail_once(failing);

    let pool = migrator.spawn_workers();
    let progress = settle(&migrator, job_id).await;
    pool.shutdown_and_join().await;

    assert!(store.faults.lock().unwrap().is_empty(), "{failing:?} was never called");
    assert_eq!(progress.status, JobStatus::Complete);
    assert_eq!(progress.complete, 1);

    let task = &h.store.job_tasks(job_id).await.unwrap()[0];
    assert_eq!(task.state, TaskState::Complete);
    assert_eq!(task.retry_count, 0);
    assert!(task.claimed_by.is_none());
    assert!(task.lease_until.is_none());
    // 上げ直しはしない
    assert_eq!(h.blobs.upload_count().await, 1);
}
