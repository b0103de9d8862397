//! Processor - 1 タスクを upload -> publish まで進める
//!
//! ```text
//! claimed (uploading)
//!   for each remaining media: fetch -> sha256 -> authorize -> PUT -> checkpoint
//! publishing
//!   build -> sign (or reuse the event signed by a previous attempt) -> checkpoint
//!   publish to every relay, >= 1 ack
//! complete
//! ```
//!
//! 失敗は境界で [`PorterError`] に分類され、Decider が行き先（retry / release / error）を決めます。
//! ストアのエラーだけはタスクの失敗として扱わず、呼び出し元（ワーカー）に返します。
//! その場合も一度だけ release を試み、だめなら lease の期限切れで [`Processor::reap`] が回収します。

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::{Instrument, error, info, info_span, warn};

use super::config::PorterConfig;
use crate::crypto::sha256_hex;
use crate::domain::{
    AttemptOutcome, AttemptRecord, Decider, Decision, DecisionRecord, DefaultDecider, ErrorKind,
    JobId, MediaRef, PorterError, TaskRecord, TaskState, UploadedMedia, WorkerId,
};
use crate::event::{EventBuilder, PostInput, SignedEvent};
use crate::ports::{BlobStore, Clock, IdGenerator, MediaSource, StoreError, TaskStore};
use crate::relay::{PublishReport, RelayConnector, RelayPublisher};
use crate::signer::{Signer, SignerRegistry};
use crate::upload::{UploadAuthorizer, UploadError, detect_mime};

/// External collaborators of the pipeline.
#[derive(Clone)]
pub struct Pipeline {
    pub store: Arc<dyn TaskStore>,
    pub media: Arc<dyn MediaSource>,
    pub blobs: Arc<dyn BlobStore>,
    pub relays: Arc<dyn RelayConnector>,
    pub signers: SignerRegistry,
    pub clock: Arc<dyn Clock>,
    pub ids: Arc<dyn IdGenerator>,
}

enum StepError {
    Task(PorterError),
    Store(StoreError),
}

impl From<StoreError> for StepError {
    fn from(err: StoreError) -> Self {
        StepError::Store(err)
    }
}

fn task_err(err: impl Into<PorterError>) -> StepError {
    StepError::Task(err.into())
}

pub struct Processor {
    pipeline: Pipeline,
    publisher: RelayPublisher,
    decider: Arc<dyn Decider>,
    authorizer: UploadAuthorizer,
    relay_urls: Vec<String>,
    publish_deadline: Duration,
    lease: chrono::Duration,
    /// Jobs whose last `settle_job` failed; retried by [`Processor::reap`].
    unsettled: Mutex<HashSet<JobId>>,
}

impl Processor {
    pub fn new(pipeline: Pipeline, config: &PorterConfig) -> Self {
        let publisher = RelayPublisher::new(Arc::clone(&pipeline.relays), config.connect_timeout());
        Self {
            pipeline,
            publisher,
            decider: Arc::new(DefaultDecider::new(config.retry_policy())),
            authorizer: UploadAuthorizer::new(config.auth_window()),
            relay_urls: config.relays.clone(),
            publish_deadline: config.publish_deadline(),
            lease: chrono::Duration::from_std(config.lease()).unwrap_or(chrono::Duration::MAX),
            unsettled: Mutex::new(HashSet::new()),
        }
    }

    pub fn with_decider(mut self, decider: Arc<dyn Decider>) -> Self {
        self.decider = decider;
        self
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    pub fn publisher(&self) -> &RelayPublisher {
        &self.publisher
    }

    pub fn relay_urls(&self) -> &[String] {
        &self.relay_urls
    }

    pub fn publish_deadline(&self) -> Duration {
        self.publish_deadline
    }

    /// Claim the next claimable task for `worker`.
    pub async fn claim(&self, worker: WorkerId) -> Result<Option<TaskRecord>, StoreError> {
        let now = self.pipeline.clock.now();
        self.pipeline
            .store
            .claim_next(worker, now, self.lease_from(now))
            .await
    }

    fn lease_from(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now.checked_add_signed(self.lease).unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// Take back tasks whose claim expired and send them through the decider
    /// as a retryable failure. Also retries job settlements that failed.
    ///
    /// Returns how many tasks were taken back.
    pub async fn reap(&self) -> Result<usize, StoreError> {
        let now = self.pipeline.clock.now();
        let expired = self
            .pipeline
            .store
            .reap_expired_leases(WorkerId::REAPER, now, self.lease_from(now))
            .await?;
        let count = expired.len();

        for task in expired {
            let span = info_span!(
                "task",
                task_id = %task.task_id,
                job_id = %task.job_id,
                worker = %WorkerId::REAPER
            );
            let retry_count = task.retry_count;
            let err = PorterError::retryable("claim lease expired before the task was saved");
            self.fail(WorkerId::REAPER, task, err, retry_count, 0, now)
                .instrument(span)
                .await?;
        }

        let unsettled: Vec<JobId> = self.unsettled.lock().await.iter().copied().collect();
        for job_id in unsettled {
            self.settle(job_id).await?;
        }
        Ok(count)
    }

    /// Drive a claimed task to its next resting state and persist it.
    ///
    /// Returns the state the task was left in (`complete`, `pending` or `error`).
    pub async fn process(&self, worker: WorkerId, task: TaskRecord) -> Result<TaskState, StoreError> {
        let span = info_span!("task", task_id = %task.task_id, job_id = %task.job_id, %worker);
        self.process_claimed(worker, task).instrument(span).await
    }

    async fn process_claimed(
        &self,
        worker: WorkerId,
        mut task: TaskRecord,
    ) -> Result<TaskState, StoreError> {
        let started_at = self.pipeline.clock.now();
        let retry_count = task.retry_count;
        let uploads_before = task.uploaded.len();

        let result = self.run(worker, &mut task).await;
        let uploads = task.uploaded.len() - uploads_before;

        match result {
            Ok(report) => {
                info!(
                    event_id = %report.event_id,
                    acked = report.acked.len(),
                    failed = report.failed.len(),
                    "task complete"
                );
                // task はもう complete。履歴の失敗で settle を飛ばさない
                let recorded = self
                    .finish_attempt(
                        &task,
                        worker,
                        retry_count,
                        uploads,
                        AttemptOutcome::Success {
                            event_id: report.event_id.clone(),
                            acked: report.acked.clone(),
                            failed: report.failed_relays(),
                        },
                        started_at,
                    )
                    .await;
                self.settle(task.job_id).await?;
                recorded?;
                Ok(TaskState::Complete)
            }
            Err(StepError::Store(err)) => {
                self.release_after_store_error(worker, &mut task, &err).await;
                Err(err)
            }
            Err(StepError::Task(err)) => {
                self.fail(worker, task, err, retry_count, uploads, started_at)
                    .await
            }
        }
    }

    /// Put the task back to pending after a checkpoint could not be saved.
    async fn release_after_store_error(
        &self,
        worker: WorkerId,
        task: &mut TaskRecord,
        err: &StoreError,
    ) {
        if !matches!(err, StoreError::Backend(_)) || !task.state.is_in_flight() {
            return;
        }
        let release = Decision::Release {
            reason: format!("task store error: {err}"),
        };
        let now = self.pipeline.clock.now();
        if task.apply(&release, now).is_err() {
            return;
        }
        match self.pipeline.store.save_task(worker, task).await {
            Ok(()) => warn!(error = %err, "task released after a store error"),
            Err(e) => warn!(error = %e, "task not released, waiting for its lease to expire"),
        }
    }

    /// Save a checkpoint and extend the claim.
    async fn checkpoint(&self, worker: WorkerId, task: &mut TaskRecord) -> Result<(), StoreError> {
        task.renew_lease(self.lease_from(self.pipeline.clock.now()));
        self.pipeline.store.save_task(worker, task).await
    }

    async fn run(&self, worker: WorkerId, task: &mut TaskRecord) -> Result<PublishReport, StepError> {
        let signer = self
            .pipeline
            .signers
            .get(task.job_id)
            .await
            .ok_or_else(|| task_err(PorterError::session_expired("no signer attached to job")))?;

        let remaining: Vec<(usize, MediaRef)> = task
            .remaining_media()
            .map(|(i, m)| (i, m.clone()))
            .collect();
        for (index, media) in remaining {
            let uploaded = self.upload_one(signer.as_ref(), &media).await?;
            task.record_upload(index, uploaded, self.pipeline.clock.now())
                .map_err(task_err)?;
            self.checkpoint(worker, task).await?;
        }

        task.begin_publishing(self.pipeline.clock.now())
            .map_err(task_err)?;
        self.checkpoint(worker, task).await?;

        let event = match task.event.clone() {
            Some(event) if event.pubkey == signer.public_key() => event,
            _ => {
                let event = self.sign_post(signer.as_ref(), task).await?;
                task.record_signed(event.clone(), self.pipeline.clock.now())
                    .map_err(task_err)?;
                self.checkpoint(worker, task).await?;
                event
            }
        };

        let report = self
            .publisher
            .publish_checked(&event, &self.relay_urls, self.publish_deadline)
            .await
            .map_err(task_err)?;
        if !report.failed.is_empty() {
            warn!(failed = ?report.failed, "some relays did not acknowledge");
        }

        task.complete(event, report.acked.clone(), self.pipeline.clock.now())
            .map_err(task_err)?;
        self.pipeline.store.save_task(worker, task).await?;
        Ok(report)
    }

    async fn upload_one(
        &self,
        signer: &dyn Signer,
        media: &MediaRef,
    ) -> Result<UploadedMedia, StepError> {
        let fetched = self.pipeline.media.fetch(&media.url).await.map_err(task_err)?;
        let sha256 = sha256_hex(&fetched.bytes);
        let size = fetched.bytes.len() as u64;
        let mime = detect_mime(fetched.content_type.as_deref(), &media.url, media.kind);

        let authorization = self
            .authorizer
            .authorize(signer, &sha256, size, self.pipeline.clock.now())
            .await
            .map_err(|e| task_err(UploadError::Authorization(e)))?;
        let descriptor = self
            .pipeline
            .blobs
            .upload(fetched.bytes, &mime, &authorization)
            .await
            .map_err(task_err)?;
        if !descriptor.sha256.eq_ignore_ascii_case(&sha256) {
            return Err(task_err(UploadError::HashMismatch {
                expected: sha256,
                actual: descriptor.sha256,
            }));
        }

        info!(url = %descriptor.url, %sha256, size, "media uploaded");
        Ok(UploadedMedia {
            url: descriptor.url,
            sha256,
            size,
            mime,
            kind: media.kind,
            dimensions: media.dimensions(),
            duration: media.duration,
        })
    }

    async fn sign_post(&self, signer: &dyn Signer, task: &TaskRecord) -> Result<SignedEvent, StepError> {
        let input = PostInput {
            caption: task.caption.as_deref(),
            original_timestamp: task.original_timestamp.as_deref(),
            media: &task.uploaded,
        };
        let unsigned = EventBuilder::new(signer.public_key())
            .post(&input, self.pipeline.clock.now())
            .map_err(task_err)?;
        signer.sign(unsigned).await.map_err(task_err)
    }

    async fn fail(
        &self,
        worker: WorkerId,
        mut task: TaskRecord,
        err: PorterError,
        retry_count: u32,
        uploads: usize,
        started_at: DateTime<Utc>,
    ) -> Result<TaskState, StoreError> {
        let now = self.pipeline.clock.now();
        let decision = self.decider.decide(&task, &err, now);
        let record =
            DecisionRecord::from_decision(task.task_id, &decision, err.kind(), task.retry_count, now);

        // job の停止は task の release より先
        if err.kind() == ErrorKind::SessionExpired {
            self.pipeline.signers.detach(task.job_id).await;
            let job = self
                .pipeline
                .store
                .suspend_job(task.job_id, err.message(), now)
                .await?;
            warn!(status = ?job.status, "signing session lost, job suspended");
        }

        if let Err(transition) = task.apply(&decision, now) {
            // 遷移できない = すでに終端。記録だけ残す
            error!(error = %transition, "cannot apply decision");
        } else {
            self.pipeline.store.save_task(worker, &task).await?;
        }

        let attempt = self
            .finish_attempt(
                &task,
                worker,
                retry_count,
                uploads,
                AttemptOutcome::Failure {
                    error_kind: err.kind(),
                    message: err.message().to_string(),
                },
                started_at,
            )
            .await;
        let decided = self.pipeline.store.record_decision(record).await;

        match &decision {
            Decision::Retry { not_before, .. } => warn!(
                error = %err.message(),
                retry_count = task.retry_count,
                %not_before,
                "task failed, will retry"
            ),
            Decision::Release { .. } => warn!(error = %err.message(), "task released"),
            Decision::Fail { .. } => error!(error = %err.message(), "task failed"),
        }

        self.settle(task.job_id).await?;
        attempt.and(decided)?;
        Ok(task.state)
    }

    async fn finish_attempt(
        &self,
        task: &TaskRecord,
        worker: WorkerId,
        retry_count: u32,
        uploads: usize,
        outcome: AttemptOutcome,
        started_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let attempt = AttemptRecord {
            attempt_id: self.pipeline.ids.generate_attempt_id(),
            task_id: task.task_id,
            worker,
            retry_count,
            uploads,
            outcome,
            started_at,
            finished_at: self.pipeline.clock.now(),
        };
        self.pipeline.store.record_attempt(attempt).await
    }

    /// Recompute the job status; a failure is remembered and retried by `reap`.
    async fn settle(&self, job_id: JobId) -> Result<(), StoreError> {
        match self
            .pipeline
            .store
            .settle_job(job_id, self.pipeline.clock.now())
            .await
        {
            Ok(job) => {
                self.unsettled.lock().await.remove(&job_id);
                if job.status.is_finished() {
                    info!(%job_id, status = ?job.status, "job settled");
                }
                Ok(())
            }
            Err(e) => {
                self.unsettled.lock().await.insert(job_id);
                Err(e)
            }
        }
    }
}
