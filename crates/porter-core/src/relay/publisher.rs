//! Best-effort multi-relay publishing.
//!
//! Every relay is tried independently and concurrently; the results are
//! joined without any cross-relay atomicity. One acknowledgement is enough.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::{ClientMessage, RelayConnector, RelayError, RelayMessage};
use crate::event::SignedEvent;

/// Per-relay outcome of one publish.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PublishReport {
    pub event_id: String,
    /// Relays that acknowledged, in input order.
    pub acked: Vec<String>,
    /// Relays that failed, with the reason.
    pub failed: Vec<(String, String)>,
}

impl PublishReport {
    pub fn is_success(&self) -> bool {
        !self.acked.is_empty()
    }

    pub fn failed_relays(&self) -> Vec<String> {
        self.failed.iter().map(|(url, _)| url.clone()).collect()
    }
}

#[derive(Clone)]
pub struct RelayPublisher {
    connector: Arc<dyn RelayConnector>,
    connect_timeout: Duration,
}

impl RelayPublisher {
    pub fn new(connector: Arc<dyn RelayConnector>, connect_timeout: Duration) -> Self {
        Self {
            connector,
            connect_timeout,
        }
    }

    /// Publish to every relay and report per-relay results. Never fails as a whole.
    pub async fn publish(
        &self,
        event: &SignedEvent,
        relays: &[String],
        deadline: Duration,
    ) -> PublishReport {
        let deadline_at = Instant::now() + deadline;

        let mut targets: Vec<&str> = Vec::new();
        for url in relays {
            if !targets.contains(&url.as_str()) {
                targets.push(url);
            }
        }

        let results = join_all(
            targets
                .iter()
                .map(|url| self.publish_one(url, event, deadline_at)),
        )
        .await;

        let mut report = PublishReport {
            event_id: event.id.clone(),
            ..Default::default()
        };
        for (url, result) in targets.into_iter().zip(results) {
            match result {
                Ok(()) => report.acked.push(url.to_string()),
                Err(reason) => report.failed.push((url.to_string(), reason)),
            }
        }
        info!(
            event_id = %event.id,
            acked = report.acked.len(),
            failed = report.failed.len(),
            "publish finished"
        );
        report
    }

    /// Like [`publish`](Self::publish), but zero acknowledgements is an error.
    pub async fn publish_checked(
        &self,
        event: &SignedEvent,
        relays: &[String],
        deadline: Duration,
    ) -> Result<PublishReport, RelayError> {
        let report = self.publish(event, relays, deadline).await;
        if report.is_success() {
            Ok(report)
        } else {
            Err(RelayError::NoAcknowledgement {
                event_id: report.event_id,
                failed: report.failed.len(),
            })
        }
    }

    async fn publish_one(
        &self,
        url: &str,
        event: &SignedEvent,
        deadline_at: Instant,
    ) -> Result<(), String> {
        let attempt = async {
            let mut channel = tokio::time::timeout(self.connect_timeout, self.connector.connect(url))
                .await
                .map_err(|_| RelayError::ConnectTimeout(url.to_string()).to_string())?
                .map_err(|e| e.to_string())?;

            channel
                .send(ClientMessage::Event(event.clone()))
                .await
                .map_err(|e| e.to_string())?;

            while let Some(msg) = channel.recv().await {
                match msg {
                    RelayMessage::Ok {
                        event_id,
                        accepted,
                        message,
                    } if event_id == event.id => {
                        return if accepted || message.starts_with("duplicate:") {
                            Ok(())
                        } else {
                            Err(format!("rejected: {message}"))
                        };
                    }
                    RelayMessage::Notice(notice) => {
                        debug!(relay = %url, %notice, "notice while publishing");
                    }
                    _ => {}
                }
            }
            Err(RelayError::Closed(url.to_string()).to_string())
        };

        let result = tokio::time::timeout_at(deadline_at, attempt)
            .await
            .unwrap_or_else(|_| Err("no answer before deadline".to_string()));

        match &result {
            Ok(()) => debug!(relay = %url, event_id = %event.id, "acknowledged"),
            Err(reason) => warn!(relay = %url, event_id = %event.id, %reason, "relay failed"),
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::Keys;
    use crate::event::{Kind, UnsignedEvent};
    use crate::relay::{MemoryRelays, RelayBehavior};

    fn event() -> SignedEvent {
        let keys = Keys::generate();
        UnsignedEvent::new(keys.public_key(), 1, Kind::TEXT_NOTE, vec![], "hello")
            .unwrap()
            .sign_with(&keys)
            .unwrap()
    }

    async fn setup(behaviors: &[(&str, RelayBehavior)]) -> (RelayPublisher, MemoryRelays, Vec<String>) {
        let relays = MemoryRelays::new();
        for (url, b) in behaviors {
            relays.add(*url, b.clone()).await;
        }
        let publisher = RelayPublisher::new(Arc::new(relays.clone()), Duration::from_secs(10));
        let urls = behaviors.iter().map(|(u, _)| u.to_string()).collect();
        (publisher, relays, urls)
    }

    #[tokio::test(start_paused = true)]
    async fn two_of_three_acks_is_success() {
        let (publisher, _relays, urls) = setup(&[
            ("wss://a", RelayBehavior::Accept),
            ("wss://b", RelayBehavior::Silent),
            ("wss://c", RelayBehavior::Accept),
        ])
        .await;

        let report = publisher
            .publish_checked(&event(), &urls, Duration::from_secs(15))
            .await
            .unwrap();
        assert_eq!(report.acked, vec!["wss://a", "wss://c"]);
        assert_eq!(report.failed_relays(), vec!["wss://b"]);
    }

    #[tokio::test(start_paused = true)]
    async fn rejection_and_refusal_count_as_failed() {
        let (publisher, _relays, urls) = setup(&[
            ("wss://a", RelayBehavior::Reject("blocked: no".into())),
            ("wss://b", RelayBehavior::Refuse),
            ("wss://c", RelayBehavior::Duplicate),
        ])
        .await;

        let report = publisher.publish(&event(), &urls, Duration::from_secs(15)).await;
        assert_eq!(report.acked, vec!["wss://c"]);
        assert_eq!(report.failed.len(), 2);
        assert!(report.failed[0].1.contains("blocked: no"));
    }

    #[tokio::test(start_paused = true)]
    async fn zero_acks_is_an_error() {
        let (publisher, _relays, urls) = setup(&[
            ("wss://a", RelayBehavior::Silent),
            ("wss://b", RelayBehavior::Unreachable),
        ])
        .await;

        let err = publisher
            .publish_checked(&event(), &urls, Duration::from_secs(15))
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::NoAcknowledgement { failed: 2, .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn unreachable_relay_is_bounded_by_connect_timeout() {
        let (publisher, _relays, urls) = setup(&[("wss://slow", RelayBehavior::Unreachable)]).await;

        let started = Instant::now();
        let report = publisher.publish(&event(), &urls, Duration::from_secs(60)).await;
        assert!(started.elapsed() < Duration::from_secs(11));
        assert!(report.failed[0].1.contains("timed out"));
    }

    #[tokio::test(start_paused = true)]
    async fn duplicate_relay_urls_are_published_once() {
        let (publisher, relays, _) = setup(&[("wss://a", RelayBehavior::Accept)]).await;
        let urls = vec!["wss://a".to_string(), "wss://a".to_string()];
        let report = publisher.publish(&event(), &urls, Duration::from_secs(5)).await;
        assert_eq!(report.acked.len(), 1);
        assert_eq!(relays.connections("wss://a").await, 1);
    }
}
