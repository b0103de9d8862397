//! HTTP client for a Blossom server (`PUT /upload`).

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use tracing::{debug, warn};
use url::Url;

use super::UploadError;
use crate::ports::{BlobDescriptor, BlobStore};

/// Reason header set by Blossom servers on failures.
const REASON_HEADER: &str = "x-reason";

#[derive(Debug, Clone)]
pub struct BlossomClient {
    upload_url: Url,
    http: reqwest::Client,
}

impl BlossomClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, UploadError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| UploadError::Transport(e.to_string()))?;
        Self::with_client(base_url, http)
    }

    pub fn with_client(base_url: &str, http: reqwest::Client) -> Result<Self, UploadError> {
        let base = Url::parse(base_url).map_err(|_| UploadError::InvalidUrl(base_url.to_string()))?;
        if !matches!(base.scheme(), "http" | "https") {
            return Err(UploadError::InvalidUrl(base_url.to_string()));
        }
        let upload_url = Url::parse(&format!("{}/upload", base.as_str().trim_end_matches('/')))
            .map_err(|_| UploadError::InvalidUrl(base_url.to_string()))?;
        Ok(Self { upload_url, http })
    }

    pub fn upload_url(&self) -> &Url {
        &self.upload_url
    }
}

#[async_trait]
impl BlobStore for BlossomClient {
    async fn upload(
        &self,
        bytes: Vec<u8>,
        mime: &str,
        authorization: &str,
    ) -> Result<BlobDescriptor, UploadError> {
        let size = bytes.len();
        let response = self
            .http
            .put(self.upload_url.clone())
            .header(AUTHORIZATION, authorization)
            .header(CONTENT_TYPE, mime)
            .body(bytes)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let reason = response
                .headers()
                .get(REASON_HEADER)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            let message = match reason {
                Some(r) => r,
                None => response.text().await.unwrap_or_default(),
            };
            warn!(status = status.as_u16(), %message, "blossom upload rejected");
            return Err(UploadError::Http {
                status: status.as_u16(),
                message,
            });
        }

        let descriptor: BlobDescriptor = response
            .json()
            .await
            .map_err(|e| UploadError::InvalidResponse(e.to_string()))?;
        debug!(url = %descriptor.url, sha256 = %descriptor.sha256, size, "blob uploaded");
        Ok(descriptor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{header, header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const HASH: &str = "b1674191a88ec5cdd733e4240a81803105dc412d6c6708d53ab94fc248f4f553";

    fn client(server: &MockServer) -> BlossomClient {
        BlossomClient::new(&server.uri(), Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn put_upload_returns_descriptor() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/upload"))
            .and(header("authorization", "Nostr abc"))
            .and(header("content-type", "image/jpeg"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "url": format!("https://cdn.example/{HASH}.jpg"),
                "sha256": HASH,
                "size": 3,
                "type": "image/jpeg",
                "uploaded": 1_700_000_000u64,
            })))
            .expect(1)
            .mount(&server)
            .await;

        let desc = client(&server)
            .upload(b"abc".to_vec(), "image/jpeg", "Nostr abc")
            .await
            .unwrap();
        assert_eq!(desc.sha256, HASH);
        assert_eq!(desc.size, 3);
        assert_eq!(desc.mime.as_deref(), Some("image/jpeg"));
    }

    #[tokio::test]
    async fn reason_header_becomes_the_error_message() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/upload"))
            .and(header_exists("authorization"))
            .respond_with(ResponseTemplate::new(401).insert_header("X-Reason", "auth expired"))
            .mount(&server)
            .await;

        let err = client(&server)
            .upload(b"abc".to_vec(), "image/jpeg", "Nostr abc")
            .await
            .unwrap_err();
        assert_eq!(
            err,
            UploadError::Http {
                status: 401,
                message: "auth expired".into()
            }
        );
    }

    #[tokio::test]
    async fn server_error_status_is_kept() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(503).set_body_string("busy"))
            .mount(&server)
            .await;

        let err = client(&server)
            .upload(b"abc".to_vec(), "image/jpeg", "Nostr abc")
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::Http { status: 503, .. }));
    }

    #[tokio::test]
    async fn garbage_body_is_an_invalid_response() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
            .mount(&server)
            .await;

        let err = client(&server)
            .upload(b"abc".to_vec(), "image/jpeg", "Nostr abc")
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::InvalidResponse(_)));
    }

    #[test]
    fn base_url_with_trailing_slash() {
        let c = BlossomClient::new("https://blossom.example/", Duration::from_secs(1)).unwrap();
        assert_eq!(c.upload_url().as_str(), "https://blossom.example/upload");
        assert!(BlossomClient::new("ftp://x", Duration::from_secs(1)).is_err());
    }
}
