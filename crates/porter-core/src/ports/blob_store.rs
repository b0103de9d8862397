//! BlobStore port - content-addressed upload endpoint (Blossom)
//!
//! 実装は [`crate::upload::BlossomClient`]（HTTP）と [`crate::impls::InMemoryBlobStore`]（テスト用）。

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::upload::UploadError;

/// What the endpoint returns for a stored blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobDescriptor {
    pub url: String,
    pub sha256: String,
    pub size: u64,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub mime: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uploaded: Option<u64>,
}

#[async_trait]
pub trait BlobStore: Send + Sync {
    /// `PUT` the raw bytes with `Authorization: <authorization>`.
    async fn upload(
        &self,
        bytes: Vec<u8>,
        mime: &str,
        authorization: &str,
    ) -> Result<BlobDescriptor, UploadError>;
}
