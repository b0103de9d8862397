//! MediaSource implementations: HTTP download and an in-memory map for tests.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use tokio::sync::Mutex;
use tracing::debug;

use crate::ports::{FetchError, FetchedMedia, MediaSource};

/// Downloads source media over HTTP(S).
#[derive(Debug, Clone)]
pub struct HttpMediaSource {
    http: reqwest::Client,
}

impl HttpMediaSource {
    pub fn new(timeout: Duration) -> Result<Self, FetchError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| FetchError::Transport {
                url: String::new(),
                reason: e.to_string(),
            })?;
        Ok(Self { http })
    }
}

#[async_trait]
impl MediaSource for HttpMediaSource {
    async fn fetch(&self, url: &str) -> Result<FetchedMedia, FetchError> {
        let classify = |e: reqwest::Error| {
            if e.is_timeout() {
                FetchError::Timeout(url.to_string())
            } else {
                FetchError::Transport {
                    url: url.to_string(),
                    reason: e.to_string(),
                }
            }
        };

        let response = self.http.get(url).send().await.map_err(classify)?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Http {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let bytes = response.bytes().await.map_err(classify)?;
        if bytes.is_empty() {
            return Err(FetchError::Empty(url.to_string()));
        }
        debug!(url, size = bytes.len(), "media fetched");
        Ok(FetchedMedia {
            bytes: bytes.to_vec(),
            content_type,
        })
    }
}

/// URL -> canned response.
#[derive(Clone, Default)]
pub struct InMemoryMediaSource {
    media: Arc<Mutex<HashMap<String, Result<FetchedMedia, FetchError>>>>,
}

impl InMemoryMediaSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, url: impl Into<String>, bytes: Vec<u8>, content_type: Option<&str>) {
        let media = FetchedMedia {
            bytes,
            content_type: content_type.map(str::to_string),
        };
        self.media.lock().await.insert(url.into(), Ok(media));
    }

    pub async fn fail(&self, url: impl Into<String>, err: FetchError) {
        self.media.lock().await.insert(url.into(), Err(err));
    }
}

#[async_trait]
impl MediaSource for InMemoryMediaSource {
    async fn fetch(&self, url: &str) -> Result<FetchedMedia, FetchError> {
        self.media
            .lock()
            .await
            .get(url)
            .cloned()
            .unwrap_or_else(|| {
                Err(FetchError::Http {
                    url: url.to_string(),
                    status: 404,
                })
            })
    }
}
