//! InMemoryBlobStore - Blossom サーバーのテスト用実装
//!
//! 本物のサーバーと同じく Authorization を検証します（時刻は Clock から）。
//! `push_fault` で次のアップロードの失敗を仕込めます。

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::crypto::sha256_hex;
use crate::ports::{BlobDescriptor, BlobStore, Clock};
use crate::upload::{UploadError, verify_authorization};

/// A scripted failure for the next upload.
#[derive(Debug, Clone)]
pub enum BlobFault {
    Error(UploadError),
    /// Store the blob but report a different hash.
    WrongHash,
}

#[derive(Default)]
struct BlobState {
    blobs: HashMap<String, (Vec<u8>, String)>,
    faults: VecDeque<BlobFault>,
    uploads: usize,
}

#[derive(Clone)]
pub struct InMemoryBlobStore {
    base_url: String,
    clock: Arc<dyn Clock>,
    state: Arc<Mutex<BlobState>>,
}

impl InMemoryBlobStore {
    pub fn new(base_url: impl Into<String>, clock: Arc<dyn Clock>) -> Self {
        Self {
            base_url: base_url.into(),
            clock,
            state: Arc::new(Mutex::new(BlobState::default())),
        }
    }

    pub async fn push_fault(&self, fault: BlobFault) {
        self.state.lock().await.faults.push_back(fault);
    }

    pub async fn get(&self, sha256: &str) -> Option<Vec<u8>> {
        let state = self.state.lock().await;
        state.blobs.get(sha256).map(|(bytes, _)| bytes.clone())
    }

    /// Accepted uploads.
    pub async fn upload_count(&self) -> usize {
        self.state.lock().await.uploads
    }
}

#[async_trait]
impl BlobStore for InMemoryBlobStore {
    async fn upload(
        &self,
        bytes: Vec<u8>,
        mime: &str,
        authorization: &str,
    ) -> Result<BlobDescriptor, UploadError> {
        let mut state = self.state.lock().await;
        let fault = state.faults.pop_front();
        if let Some(BlobFault::Error(err)) = fault {
            return Err(err);
        }

        let sha256 = sha256_hex(&bytes);
        verify_authorization(authorization, Some(&sha256), self.clock.now()).map_err(|e| {
            UploadError::Http {
                status: 401,
                message: e.to_string(),
            }
        })?;

        let size = bytes.len() as u64;
        state.blobs.insert(sha256.clone(), (bytes, mime.to_string()));
        state.uploads += 1;

        let reported = match fault {
            Some(BlobFault::WrongHash) => "0".repeat(64),
            _ => sha256.clone(),
        };
        Ok(BlobDescriptor {
            url: format!("{}/{}", self.base_url.trim_end_matches('/'), sha256),
            sha256: reported,
            size,
            mime: Some(mime.to_string()),
            uploaded: Some(self.clock.now().timestamp().max(0) as u64),
        })
    }
}
