//! Config schema types (storage destination, pull zone, transfer tuning, bot transport, server).
use std::time::Duration;

use {
    secrecy::{ExposeSecret, Secret},
    serde::{Deserialize, Serialize},
};

/// Bunny storage endpoint for the default (Falkenstein) region.
pub const DEFAULT_STORAGE_HOST: &str = "storage.bunnycdn.com";

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BunnydropConfig {
    pub storage: StorageConfig,
    pub pull_zone: PullZoneConfig,
    pub transfer: TransferConfig,
    pub media: MediaConfig,
    pub telegram: TelegramConfig,
    pub server: ServerConfig,
}

/// Destination storage zone (the write side of the CDN).
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Explicit storage host or base URL. When unset the host is derived from `region`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    /// Storage region code, e.g. "de", "ny", "la", "sg".
    pub region: String,
    /// Storage zone name, the first path segment of every upload.
    pub zone: String,
    /// Storage zone password, sent as the `AccessKey` header.
    #[serde(
        serialize_with = "serialize_option_secret",
        skip_serializing_if = "Option::is_none"
    )]
    pub api_key: Option<Secret<String>>,
}

impl StorageConfig {
    /// Base URL uploads are PUT under, without a trailing slash.
    #[must_use]
    pub fn base_url(&self) -> String {
        match self.host.as_deref().map(str::trim).filter(|h| !h.is_empty()) {
            Some(host) => normalize_base(host),
            None => normalize_base(&region_host(&self.region)),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            host: None,
            region: "de".into(),
            zone: String::new(),
            api_key: None,
        }
    }
}

impl std::fmt::Debug for StorageConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageConfig")
            .field("host", &self.host)
            .field("region", &self.region)
            .field("zone", &self.zone)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

/// Read-facing hostname under which uploaded objects become public.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PullZoneConfig {
    /// Hostname (`cdn.example.com`) or base URL (`https://cdn.example.com/media`).
    pub host: String,
}

impl PullZoneConfig {
    #[must_use]
    pub fn base_url(&self) -> String {
        normalize_base(&self.host)
    }
}

/// Fetch/upload tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// Upper bound on the fetch stage (whole transfer when streaming).
    pub fetch_timeout_seconds: u64,
    /// Upper bound on the upload request in buffered mode.
    pub upload_timeout_seconds: u64,
    /// 0 streams the source straight into the upload; otherwise the body is
    /// buffered in memory and rejected above this size.
    pub max_buffered_bytes: u64,
    pub retry: RetryConfig,
}

impl TransferConfig {
    #[must_use]
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_seconds)
    }

    #[must_use]
    pub fn upload_timeout(&self) -> Duration {
        Duration::from_secs(self.upload_timeout_seconds)
    }
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            fetch_timeout_seconds: 300,
            upload_timeout_seconds: 300,
            max_buffered_bytes: 0,
            retry: RetryConfig::default(),
        }
    }
}

/// Bounded retry around transient fetch/upload failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts including the first one. 1 disables retries.
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 500,
            max_backoff_ms: 5_000,
        }
    }
}

/// Accepted media file names.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaConfig {
    /// Recognized extensions, without the leading dot.
    pub extensions: Vec<String>,
    /// Appended to derived names that lack a recognized extension.
    pub default_extension: String,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            extensions: vec!["mp4".into()],
            default_extension: "mp4".into(),
        }
    }
}

/// How updates reach the bot.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TransportMode {
    /// Long-poll `getUpdates`.
    #[default]
    Polling,
    /// Register `webhook_url` with Telegram and receive updates over HTTP.
    Webhook,
}

/// Telegram bot settings.
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TelegramConfig {
    /// Bot token from @BotFather.
    #[serde(
        serialize_with = "serialize_option_secret",
        skip_serializing_if = "Option::is_none"
    )]
    pub token: Option<Secret<String>>,
    pub mode: TransportMode,
    /// Public URL Telegram should POST updates to (webhook mode only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub webhook_url: Option<String>,
    /// Value Telegram echoes in `X-Telegram-Bot-Api-Secret-Token`.
    #[serde(
        serialize_with = "serialize_option_secret",
        skip_serializing_if = "Option::is_none"
    )]
    pub webhook_secret: Option<Secret<String>>,
}

impl std::fmt::Debug for TelegramConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramConfig")
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .field("mode", &self.mode)
            .field("webhook_url", &self.webhook_url)
            .finish_non_exhaustive()
    }
}

/// HTTP listener for the liveness probe and webhook receiver.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".into(),
            port: 8000,
        }
    }
}

/// Map a Bunny region code to its storage endpoint.
#[must_use]
pub fn region_host(region: &str) -> String {
    match region.trim().to_ascii_lowercase().as_str() {
        "" | "de" | "falkenstein" => DEFAULT_STORAGE_HOST.to_string(),
        other => format!("{other}.{DEFAULT_STORAGE_HOST}"),
    }
}

/// Turn `host` or `scheme://host/path/` into `scheme://host/path`.
#[must_use]
pub fn normalize_base(host: &str) -> String {
    let trimmed = host.trim().trim_end_matches('/');
    if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("https://{trimmed}")
    }
}

// ── Serde helpers for Secret<String> ────────────────────────────────────────

fn serialize_option_secret<S: serde::Serializer>(
    secret: &Option<Secret<String>>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match secret {
        Some(s) => serializer.serialize_some(s.expose_secret()),
        None => serializer.serialize_none(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_historical_bot() {
        let cfg = BunnydropConfig::default();
        assert_eq!(cfg.storage.region, "de");
        assert_eq!(cfg.storage.base_url(), "https://storage.bunnycdn.com");
        assert_eq!(cfg.transfer.max_buffered_bytes, 0);
        assert_eq!(cfg.transfer.retry.max_attempts, 3);
        assert_eq!(cfg.media.extensions, vec!["mp4"]);
        assert_eq!(cfg.telegram.mode, TransportMode::Polling);
        assert_eq!(cfg.server.port, 8000);
    }

    #[test]
    fn region_selects_storage_host() {
        let storage = StorageConfig {
            region: "NY".into(),
            ..Default::default()
        };
        assert_eq!(storage.base_url(), "https://ny.storage.bunnycdn.com");
    }

    #[test]
    fn explicit_host_wins_over_region() {
        let storage = StorageConfig {
            host: Some("http://127.0.0.1:9000/".into()),
            region: "sg".into(),
            ..Default::default()
        };
        assert_eq!(storage.base_url(), "http://127.0.0.1:9000");
    }

    #[test]
    fn pull_zone_accepts_bare_host() {
        let pz = PullZoneConfig {
            host: "cdn.example.com".into(),
        };
        assert_eq!(pz.base_url(), "https://cdn.example.com");
    }

    #[test]
    fn deserialize_from_toml() {
        let raw = r#"
            [storage]
            zone = "videos"
            api_key = "secret-key"

            [pull_zone]
            host = "cdn.example.com"

            [transfer]
            max_buffered_bytes = 1048576

            [telegram]
            token = "123:ABC"
            mode = "webhook"
            webhook_url = "https://bot.example.com/telegram/webhook"
        "#;
        let cfg: BunnydropConfig = toml::from_str(raw).unwrap();
        assert_eq!(cfg.storage.zone, "videos");
        assert_eq!(
            cfg.storage.api_key.as_ref().unwrap().expose_secret(),
            "secret-key"
        );
        assert_eq!(cfg.transfer.max_buffered_bytes, 1_048_576);
        // unspecified fields keep defaults
        assert_eq!(cfg.transfer.fetch_timeout_seconds, 300);
        assert_eq!(cfg.telegram.mode, TransportMode::Webhook);
    }

    #[test]
    fn debug_redacts_secrets() {
        let cfg = BunnydropConfig {
            storage: StorageConfig {
                api_key: Some(Secret::new("super-secret".into())),
                ..Default::default()
            },
            telegram: TelegramConfig {
                token: Some(Secret::new("123:ABC".into())),
                ..Default::default()
            },
            ..Default::default()
        };
        let debug = format!("{cfg:?}");
        assert!(!debug.contains("super-secret"));
        assert!(!debug.contains("123:ABC"));
        assert!(debug.contains("[REDACTED]"));
    }
}
