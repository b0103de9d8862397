//! インメモリ部品だけで組んだパイプライン
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};

use porter_core::app::{JobProgress, Migrator, Pipeline, PorterConfig};
use porter_core::domain::{JobId, JobSpec, MediaRef, TaskSpec};
use porter_core::impls::{InMemoryBlobStore, InMemoryMediaSource, InMemoryTaskStore};
use porter_core::ports::{FixedClock, TaskStore, UlidGenerator};
use porter_core::relay::{MemoryRelays, RelayBehavior};
use porter_core::signer::SignerRegistry;

pub const RELAYS: [&str; 3] = ["wss://relay-a.test", "wss://relay-b.test", "wss://relay-c.test"];
pub const BUNKER_RELAY: &str = "wss://bunker.test";
pub const BLOSSOM: &str = "https://blossom.test";

pub struct Harness {
    pub store: Arc<dyn TaskStore>,
    pub media: InMemoryMediaSource,
    pub blobs: InMemoryBlobStore,
    pub relays: MemoryRelays,
    pub clock: FixedClock,
    pub signers: SignerRegistry,
    pub config: PorterConfig,
}

pub fn test_config() -> PorterConfig {
    PorterConfig {
        concurrency: 3,
        max_retries: 3,
        relays: RELAYS.iter().map(|r| r.to_string()).collect(),
        upload_base_url: BLOSSOM.into(),
        connect_timeout_secs: 1,
        publish_deadline_secs: 5,
        sign_timeout_secs: 5,
        handshake_timeout_secs: 5,
        retry_base_delay_ms: 0,
        idle_poll_ms: 10,
        reap_interval_ms: 10,
        nostr_connect_relay: BUNKER_RELAY.into(),
        ..PorterConfig::default()
    }
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_store(Arc::new(InMemoryTaskStore::new())).await
    }

    pub async fn with_store(store: Arc<dyn TaskStore>) -> Self {
        let clock = FixedClock::new(Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap());
        let relays = MemoryRelays::new();
        for url in RELAYS {
            relays.add(url, RelayBehavior::Accept).await;
        }
        relays.add(BUNKER_RELAY, RelayBehavior::Accept).await;

        Self {
            store,
            media: InMemoryMediaSource::new(),
            blobs: InMemoryBlobStore::new(BLOSSOM, Arc::new(clock.clone())),
            relays,
            clock,
            signers: SignerRegistry::new(),
            config: test_config(),
        }
    }

    pub fn pipeline(&self) -> Pipeline {
        Pipeline {
            store: Arc::clone(&self.store),
            media: Arc::new(self.media.clone()),
            blobs: Arc::new(self.blobs.clone()),
            relays: Arc::new(self.relays.clone()),
            signers: self.signers.clone(),
            clock: Arc::new(self.clock.clone()),
            ids: Arc::new(UlidGenerator::new(Arc::new(self.clock.clone()))),
        }
    }

    pub fn migrator(&self) -> Migrator {
        Migrator::new(self.pipeline(), self.config.clone()).unwrap()
    }

    /// `count` posts with one image each, all fetchable.
    pub async fn spec(&self, count: usize) -> JobSpec {
        let mut tasks = Vec::new();
        for i in 0..count {
            let url = format!("https://cdn.source.test/p/{i}.jpg");
            self.media
                .insert(url.clone(), format!("image-bytes-{i}").into_bytes(), Some("image/jpeg"))
                .await;
            tasks.push(TaskSpec {
                media: vec![MediaRef::image(url).with_dimensions(1080, 1350)],
                caption: Some(format!("post {i} #porter")),
                timestamp: Some("2021-03-04T05:06:07Z".into()),
            });
        }
        JobSpec {
            source_handle: "alice".into(),
            profile: None,
            tasks,
        }
    }
}

/// Wait until the job settles or waits for a signer, failing the test after 10s.
pub async fn settle(migrator: &Migrator, job_id: JobId) -> JobProgress {
    tokio::time::timeout(
        Duration::from_secs(10),
        migrator.wait(job_id, Duration::from_millis(5)),
    )
    .await
    .expect("job did not settle in time")
    .unwrap()
}
