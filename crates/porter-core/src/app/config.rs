//! PorterConfig - 実行時設定
//!
//! TOML ファイル / CLI フラグ / 環境変数から組み立てられ、起動時に一度だけ `validate` されます。
//! すべてのフィールドにデフォルトがあるので、空の TOML でも読めます。

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::domain::RetryPolicy;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("concurrency must be at least 1")]
    Concurrency,

    #[error("at least one relay is required")]
    NoRelays,

    #[error("relay url {0:?} must be ws:// or wss://")]
    RelayUrl(String),

    #[error("upload url {0:?} must be http:// or https://")]
    UploadUrl(String),

    #[error("{0} must be greater than zero")]
    ZeroTimeout(&'static str),

    #[error("auth_window_secs {0} exceeds {MAX_AUTH_WINDOW_SECS}")]
    AuthWindowTooLong(u64),

    #[error("lease_secs {lease} is shorter than one processing step ({needed}s)")]
    LeaseTooShort { lease: u64, needed: u64 },
}

/// Upper bound for upload authorization lifetimes.
pub const MAX_AUTH_WINDOW_SECS: u64 = 86_400;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PorterConfig {
    pub concurrency: usize,
    pub max_retries: u32,
    pub relays: Vec<String>,
    pub upload_base_url: String,

    pub connect_timeout_secs: u64,
    pub publish_deadline_secs: u64,
    pub sign_timeout_secs: u64,
    pub handshake_timeout_secs: u64,
    pub session_ttl_secs: u64,
    pub auth_window_secs: u64,
    pub fetch_timeout_secs: u64,
    /// How long a claim stays valid without a checkpoint.
    pub lease_secs: u64,

    pub idle_poll_ms: u64,
    pub reap_interval_ms: u64,
    pub retry_base_delay_ms: u64,

    /// Relay used for the remote-signer handshake.
    pub nostr_connect_relay: String,
    pub app_name: String,
}

impl Default for PorterConfig {
    fn default() -> Self {
        Self {
            concurrency: 3,
            max_retries: 3,
            relays: vec![
                "wss://relay.damus.io".into(),
                "wss://nos.lol".into(),
                "wss://relay.primal.net".into(),
            ],
            upload_base_url: "https://blossom.primal.net".into(),
            connect_timeout_secs: 10,
            publish_deadline_secs: 15,
            sign_timeout_secs: 30,
            handshake_timeout_secs: 60,
            session_ttl_secs: 3600,
            auth_window_secs: 300,
            fetch_timeout_secs: 60,
            lease_secs: 300,
            idle_poll_ms: 250,
            reap_interval_ms: 5000,
            retry_base_delay_ms: 2000,
            nostr_connect_relay: "wss://relay.nsec.app".into(),
            app_name: "porter".into(),
        }
    }
}

impl PorterConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.concurrency == 0 {
            return Err(ConfigError::Concurrency);
        }
        if self.relays.is_empty() {
            return Err(ConfigError::NoRelays);
        }
        for relay in self.relays.iter().chain([&self.nostr_connect_relay]) {
            if !has_scheme(relay, &["ws", "wss"]) {
                return Err(ConfigError::RelayUrl(relay.clone()));
            }
        }
        if !has_scheme(&self.upload_base_url, &["http", "https"]) {
            return Err(ConfigError::UploadUrl(self.upload_base_url.clone()));
        }

        let timeouts = [
            ("connect_timeout_secs", self.connect_timeout_secs),
            ("publish_deadline_secs", self.publish_deadline_secs),
            ("sign_timeout_secs", self.sign_timeout_secs),
            ("handshake_timeout_secs", self.handshake_timeout_secs),
            ("session_ttl_secs", self.session_ttl_secs),
            ("auth_window_secs", self.auth_window_secs),
            ("fetch_timeout_secs", self.fetch_timeout_secs),
            ("lease_secs", self.lease_secs),
            ("idle_poll_ms", self.idle_poll_ms),
            ("reap_interval_ms", self.reap_interval_ms),
        ];
        if let Some((name, _)) = timeouts.iter().find(|(_, v)| *v == 0) {
            return Err(ConfigError::ZeroTimeout(*name));
        }
        if self.auth_window_secs > MAX_AUTH_WINDOW_SECS {
            return Err(ConfigError::AuthWindowTooLong(self.auth_window_secs));
        }
        let needed = self.longest_step_secs();
        if self.lease_secs <= needed {
            return Err(ConfigError::LeaseTooShort {
                lease: self.lease_secs,
                needed,
            });
        }
        Ok(())
    }

    /// Longest stretch between two checkpoints: one media (fetch, sign the
    /// authorization, PUT) or one broadcast.
    fn longest_step_secs(&self) -> u64 {
        let upload = self
            .fetch_timeout_secs
            .saturating_mul(2)
            .saturating_add(self.sign_timeout_secs);
        let publish = self
            .connect_timeout_secs
            .saturating_add(self.publish_deadline_secs);
        upload.max(publish)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_retries,
            Duration::from_millis(self.retry_base_delay_ms),
        )
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn publish_deadline(&self) -> Duration {
        Duration::from_secs(self.publish_deadline_secs)
    }

    pub fn sign_timeout(&self) -> Duration {
        Duration::from_secs(self.sign_timeout_secs)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_secs)
    }

    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_secs)
    }

    pub fn auth_window(&self) -> Duration {
        Duration::from_secs(self.auth_window_secs)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn lease(&self) -> Duration {
        Duration::from_secs(self.lease_secs)
    }

    pub fn idle_poll(&self) -> Duration {
        Duration::from_millis(self.idle_poll_ms)
    }

    pub fn reap_interval(&self) -> Duration {
        Duration::from_millis(self.reap_interval_ms)
    }
}

fn has_scheme(raw: &str, schemes: &[&str]) -> bool {
    Url::parse(raw).is_ok_and(|u| schemes.contains(&u.scheme()) && u.host_str().is_some())
}
