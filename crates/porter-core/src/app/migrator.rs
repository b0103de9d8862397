//! Migrator - ジョブのライフサイクル（投入・署名者の接続・キャンセル・進捗）
//!
//! ```text
//! submit (embedded key) --------------------------> processing --(all tasks terminal)--> complete
//! submit (remote) -> pending --connect_remote--> processing
//!                      ^                              |
//!                      +------ session expired -------+
//! ```

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{info, warn};

use super::config::{ConfigError, PorterConfig};
use super::processor::{Pipeline, Processor};
use super::status::JobProgress;
use super::worker_pool::WorkerPool;
use crate::crypto::{Keys, PublicKey};
use crate::domain::{JobId, JobRecord, JobSpec, SigningMaterial, SpecError};
use crate::event::{EventBuilder, EventError};
use crate::ports::StoreError;
use crate::relay::{PublishReport, RelayError};
use crate::remote::{HandshakeError, RemoteSession, SessionConfig};
use crate::signer::{LocalSigner, RemoteSigner, SignError, Signer};

#[derive(Debug, Error)]
pub enum MigrateError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Spec(#[from] SpecError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Handshake(#[from] HandshakeError),

    #[error(transparent)]
    Sign(#[from] SignError),

    #[error(transparent)]
    Event(#[from] EventError),

    #[error(transparent)]
    Relay(#[from] RelayError),

    #[error("job {0} has no live signer")]
    NoSigner(JobId),

    #[error("job {0} does not use a remote signer")]
    NotRemote(JobId),
}

pub struct Migrator {
    config: PorterConfig,
    processor: Arc<Processor>,
}

impl Migrator {
    pub fn new(pipeline: Pipeline, config: PorterConfig) -> Result<Self, MigrateError> {
        config.validate()?;
        let processor = Arc::new(Processor::new(pipeline, &config));
        Ok(Self { config, processor })
    }

    pub fn config(&self) -> &PorterConfig {
        &self.config
    }

    pub fn processor(&self) -> Arc<Processor> {
        Arc::clone(&self.processor)
    }

    fn pipeline(&self) -> &Pipeline {
        self.processor.pipeline()
    }

    /// Start `concurrency` workers.
    pub fn spawn_workers(&self) -> WorkerPool {
        WorkerPool::spawn(
            self.config.concurrency,
            self.processor(),
            self.config.idle_poll(),
            self.config.reap_interval(),
        )
    }

    /// Submit a job signed with a key held by this process. Tasks become
    /// claimable immediately.
    pub async fn submit_embedded(&self, spec: JobSpec, keys: Keys) -> Result<JobId, MigrateError> {
        let signing = SigningMaterial::Embedded { keys: keys.clone() };
        let job_id = self.insert(spec, signing.clone()).await?;
        self.attach_signer(job_id, Arc::new(LocalSigner::new(keys)), signing)
            .await?;
        Ok(job_id)
    }

    /// Submit a job whose key lives in a remote signer.
    ///
    /// The job stays `pending` until [`connect_remote`](Self::connect_remote)
    /// succeeds. Show `session.descriptor()` to the user in between.
    pub async fn submit_remote(&self, spec: JobSpec) -> Result<(JobId, RemoteSession), MigrateError> {
        let session = self.new_session();
        let signing = SigningMaterial::Remote {
            client_pubkey: session.client_pubkey().to_hex(),
            relay: session.relay().to_string(),
            signer_pubkey: None,
            user_pubkey: None,
        };
        let job_id = self.insert(spec, signing).await?;
        Ok((job_id, session))
    }

    /// A fresh session for a job whose previous one expired.
    pub fn new_session(&self) -> RemoteSession {
        let config = SessionConfig {
            relay: self.config.nostr_connect_relay.clone(),
            app_name: self.config.app_name.clone(),
            handshake_timeout: self.config.handshake_timeout(),
            sign_timeout: self.config.sign_timeout(),
            ttl: self.config.session_ttl(),
        };
        RemoteSession::new(Arc::clone(&self.pipeline().relays), config)
    }

    /// Run the connect handshake and, once acknowledged, activate the job.
    ///
    /// A handshake timeout leaves the job pending and its tasks untouched.
    pub async fn connect_remote(
        &self,
        job_id: JobId,
        session: RemoteSession,
    ) -> Result<PublicKey, MigrateError> {
        let job = self.pipeline().store.get_job(job_id).await?;
        if !job.signing.is_remote() {
            return Err(MigrateError::NotRemote(job_id));
        }

        let user = match session.connect().await {
            Ok(user) => user,
            Err(e) => {
                warn!(%job_id, error = %e, "remote signer handshake failed");
                return Err(e.into());
            }
        };
        let signing = SigningMaterial::Remote {
            client_pubkey: session.client_pubkey().to_hex(),
            relay: session.relay().to_string(),
            signer_pubkey: session.signer_pubkey().map(|p| p.to_hex()),
            user_pubkey: Some(user.to_hex()),
        };
        let signer = RemoteSigner::new(session)?;
        self.attach_signer(job_id, Arc::new(signer), signing).await?;
        Ok(user)
    }

    /// Make `signer` the job's signer and let its tasks be claimed.
    pub async fn attach_signer(
        &self,
        job_id: JobId,
        signer: Arc<dyn Signer>,
        signing: SigningMaterial,
    ) -> Result<JobRecord, MigrateError> {
        let pipeline = self.pipeline();
        pipeline.signers.attach(job_id, signer).await;
        let now = pipeline.clock.now();
        pipeline.store.activate_job(job_id, signing, now).await?;
        // a job without tasks is complete right away
        let job = pipeline.store.settle_job(job_id, now).await?;
        info!(%job_id, status = ?job.status, "signer attached");

        if job.profile.is_some()
            && job.profile_event_id.is_none()
            && let Err(e) = self.publish_profile(job_id).await
        {
            warn!(%job_id, error = %e, "profile not published");
        }
        Ok(job)
    }

    /// Build, sign and broadcast the kind-0 profile of the job.
    ///
    /// `None` when the job has no profile metadata.
    pub async fn publish_profile(&self, job_id: JobId) -> Result<Option<PublishReport>, MigrateError> {
        let pipeline = self.pipeline();
        let job = pipeline.store.get_job(job_id).await?;
        let Some(profile) = job.profile.as_ref() else {
            return Ok(None);
        };
        let signer = pipeline
            .signers
            .get(job_id)
            .await
            .ok_or(MigrateError::NoSigner(job_id))?;

        let unsigned = EventBuilder::new(signer.public_key()).profile(profile, pipeline.clock.now())?;
        let event = signer.sign(unsigned).await?;
        let report = self
            .processor
            .publisher()
            .publish_checked(&event, self.processor.relay_urls(), self.processor.publish_deadline())
            .await?;
        pipeline
            .store
            .set_profile_event(job_id, &event.id, pipeline.clock.now())
            .await?;
        info!(%job_id, event_id = %event.id, acked = report.acked.len(), "profile published");
        Ok(Some(report))
    }

    /// Stop claiming the job's tasks. Tasks in flight run to the end, then
    /// the job is complete with its remaining tasks left pending.
    pub async fn cancel(&self, job_id: JobId) -> Result<JobProgress, MigrateError> {
        let pipeline = self.pipeline();
        let now = pipeline.clock.now();
        pipeline.store.cancel_job(job_id, now).await?;
        let job = pipeline.store.settle_job(job_id, now).await?;
        info!(%job_id, status = ?job.status, "job cancelled");
        self.progress(job_id).await
    }

    /// Give up on the job (e.g. the remote signer was never paired).
    /// Unfinished tasks stay as they are and are no longer claimed.
    pub async fn fail(&self, job_id: JobId, reason: &str) -> Result<JobProgress, MigrateError> {
        let pipeline = self.pipeline();
        pipeline.signers.detach(job_id).await;
        pipeline.store.fail_job(job_id, reason, pipeline.clock.now()).await?;
        warn!(%job_id, reason, "job failed");
        self.progress(job_id).await
    }

    pub async fn progress(&self, job_id: JobId) -> Result<JobProgress, MigrateError> {
        let store = &self.pipeline().store;
        let job = store.get_job(job_id).await?;
        let tasks = store.job_tasks(job_id).await?;
        Ok(JobProgress::from_records(&job, &tasks))
    }

    /// Poll until the job is settled or waits for a signer.
    pub async fn wait(&self, job_id: JobId, poll: Duration) -> Result<JobProgress, MigrateError> {
        loop {
            let progress = self.progress(job_id).await?;
            if progress.is_settled() || progress.awaiting_signer() {
                return Ok(progress);
            }
            tokio::time::sleep(poll).await;
        }
    }

    async fn insert(&self, spec: JobSpec, signing: SigningMaterial) -> Result<JobId, MigrateError> {
        let pipeline = self.pipeline();
        let now = pipeline.clock.now();
        let job_id = pipeline.ids.generate_job_id();
        let (job, tasks) = spec.into_records(job_id, signing, now, || pipeline.ids.generate_task_id())?;
        let count = tasks.len();
        pipeline.store.insert_job(job, tasks).await?;
        info!(%job_id, tasks = count, "job submitted");
        Ok(job_id)
    }
}
