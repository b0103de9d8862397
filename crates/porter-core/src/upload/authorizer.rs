//! Authorization header for a content-addressed upload.

use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};
use tracing::debug;

use crate::event::EventBuilder;
use crate::event::builder::UPLOAD_AUTH_WINDOW;
use crate::signer::{SignError, Signer};

/// Scheme prefix of the `Authorization` header value.
pub const AUTH_SCHEME: &str = "Nostr";

#[derive(Debug, Clone, Copy)]
pub struct UploadAuthorizer {
    window: Duration,
}

impl Default for UploadAuthorizer {
    fn default() -> Self {
        Self::new(UPLOAD_AUTH_WINDOW)
    }
}

impl UploadAuthorizer {
    pub fn new(window: Duration) -> Self {
        Self { window }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Build, sign and encode a kind 24242 authorization for `sha256` / `size`.
    ///
    /// The window starts at `now`, the authorization's own `created_at`.
    /// Signer errors come back unchanged.
    pub async fn authorize(
        &self,
        signer: &dyn Signer,
        sha256: &str,
        size: u64,
        now: DateTime<Utc>,
    ) -> Result<String, SignError> {
        let created_at = now.timestamp().max(0) as u64;
        let unsigned =
            EventBuilder::new(signer.public_key()).upload_auth(sha256, size, created_at, self.window)?;
        let signed = signer.sign(unsigned).await?;
        let json = signed.to_json()?;
        debug!(event_id = %signed.id, sha256, size, "upload authorization signed");
        Ok(format!("{AUTH_SCHEME} {}", STANDARD.encode(json)))
    }
}
