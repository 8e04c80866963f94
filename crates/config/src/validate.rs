//! Startup validation.
//!
//! Every required key is checked before the service binds its port; all
//! problems are collected so the operator sees them in one pass.

use secrecy::ExposeSecret;

use crate::schema::{BunnydropConfig, TransportMode};

/// Severity level for a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Error,
    Warning,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Error => write!(f, "error"),
            Self::Warning => write!(f, "warning"),
        }
    }
}

/// A single validation diagnostic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub severity: Severity,
    /// Dotted path, e.g. "storage.zone"
    pub path: &'static str,
    pub message: String,
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}: {}", self.severity, self.path, self.message)
    }
}

/// Outcome of validating a loaded configuration.
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub diagnostics: Vec<Diagnostic>,
}

impl ValidationResult {
    /// Returns `true` if any diagnostic is an error.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|d| d.severity == Severity::Error)
    }

    pub fn warnings(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == Severity::Warning)
    }

    /// Fatal `ConfigError` when any error-level diagnostic is present.
    pub fn into_result(self) -> Result<Vec<Diagnostic>, ConfigError> {
        if self.has_errors() {
            Err(ConfigError {
                diagnostics: self
                    .diagnostics
                    .into_iter()
                    .filter(|d| d.severity == Severity::Error)
                    .collect(),
            })
        } else {
            Ok(self.diagnostics)
        }
    }

    fn error(&mut self, path: &'static str, message: impl Into<String>) {
        self.diagnostics.push(Diagnostic {
            severity: Severity::Error,
            path,
            message: message.into(),
        });
    }

    fn warning(&mut self, path: &'static str, message: impl Into<String>) {
        self.diagnostics.push(Diagnostic {
            severity: Severity::Warning,
            path,
            message: message.into(),
        });
    }
}

/// Fatal configuration problem; startup must stop.
#[derive(Debug, Clone, thiserror::Error)]
#[error("invalid configuration: {}", summarize(.diagnostics))]
pub struct ConfigError {
    pub diagnostics: Vec<Diagnostic>,
}

fn summarize(diagnostics: &[Diagnostic]) -> String {
    diagnostics
        .iter()
        .map(|d| format!("{}: {}", d.path, d.message))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Validate a configuration.
///
/// `require_bot` is false for one-shot CLI relays, which never talk to Telegram.
#[must_use]
pub fn validate(config: &BunnydropConfig, require_bot: bool) -> ValidationResult {
    let mut result = ValidationResult::default();

    if config.storage.zone.trim().is_empty() {
        result.error("storage.zone", "missing (set BUNNY_STORAGE_ZONE)");
    }
    if config
        .storage
        .api_key
        .as_ref()
        .is_none_or(|k| k.expose_secret().trim().is_empty())
    {
        result.error("storage.api_key", "missing (set BUNNY_STORAGE_API_KEY)");
    }
    if config.pull_zone.host.trim().is_empty() {
        result.error("pull_zone.host", "missing (set BUNNY_PULL_ZONE)");
    } else {
        check_url(&mut result, "pull_zone.host", &config.pull_zone.base_url());
    }
    check_url(&mut result, "storage.host", &config.storage.base_url());

    let transfer = &config.transfer;
    if transfer.fetch_timeout_seconds == 0 {
        result.error("transfer.fetch_timeout_seconds", "must be greater than 0");
    }
    if transfer.upload_timeout_seconds == 0 {
        result.error("transfer.upload_timeout_seconds", "must be greater than 0");
    }
    if transfer.retry.max_attempts == 0 {
        result.error("transfer.retry.max_attempts", "must be at least 1");
    }
    if transfer.retry.initial_backoff_ms > transfer.retry.max_backoff_ms {
        result.warning(
            "transfer.retry.initial_backoff_ms",
            "greater than max_backoff_ms, every retry will wait max_backoff_ms",
        );
    }

    let media = &config.media;
    if media.extensions.is_empty() {
        result.error("media.extensions", "at least one extension is required");
    }
    let default_ext = media.default_extension.trim_start_matches('.');
    if !media
        .extensions
        .iter()
        .any(|e| e.trim_start_matches('.').eq_ignore_ascii_case(default_ext))
    {
        result.error(
            "media.default_extension",
            format!("\"{default_ext}\" is not one of media.extensions"),
        );
    }

    if require_bot {
        let telegram = &config.telegram;
        if telegram
            .token
            .as_ref()
            .is_none_or(|t| t.expose_secret().trim().is_empty())
        {
            result.error("telegram.token", "missing (set TELEGRAM_TOKEN)");
        }
        if telegram.mode == TransportMode::Webhook {
            match telegram.webhook_url.as_deref() {
                None | Some("") => {
                    result.error("telegram.webhook_url", "required in webhook mode");
                },
                Some(url) if !url.starts_with("https://") => {
                    result.warning(
                        "telegram.webhook_url",
                        "Telegram only delivers webhooks to https URLs",
                    );
                },
                Some(_) => {},
            }
            if telegram.webhook_secret.is_none() {
                result.warning(
                    "telegram.webhook_secret",
                    "unset, webhook requests are not authenticated",
                );
            }
        }
    }

    result
}

fn check_url(result: &mut ValidationResult, path: &'static str, base: &str) {
    match url::Url::parse(base) {
        Ok(url) if matches!(url.scheme(), "http" | "https") && url.host().is_some() => {},
        Ok(url) => result.error(path, format!("unsupported URL \"{url}\"")),
        Err(e) => result.error(path, format!("not a valid host or URL: {e}")),
    }
}

#[cfg(test)]
mod tests {
    use {super::*, secrecy::Secret};

    use crate::schema::{PullZoneConfig, StorageConfig, TelegramConfig};

    fn complete() -> BunnydropConfig {
        BunnydropConfig {
            storage: StorageConfig {
                zone: "videos".into(),
                api_key: Some(Secret::new("key".into())),
                ..Default::default()
            },
            pull_zone: PullZoneConfig {
                host: "cdn.example.com".into(),
            },
            telegram: TelegramConfig {
                token: Some(Secret::new("123:ABC".into())),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn complete_config_is_valid() {
        let result = validate(&complete(), true);
        assert!(!result.has_errors(), "{:?}", result.diagnostics);
    }

    #[test]
    fn reports_every_missing_key_at_once() {
        let err = validate(&BunnydropConfig::default(), true)
            .into_result()
            .unwrap_err();
        let paths: Vec<_> = err.diagnostics.iter().map(|d| d.path).collect();
        assert_eq!(paths, vec![
            "storage.zone",
            "storage.api_key",
            "pull_zone.host",
            "telegram.token",
        ]);
        let message = err.to_string();
        assert!(message.contains("BUNNY_PULL_ZONE"), "{message}");
    }

    #[test]
    fn bot_token_optional_for_cli_relay() {
        let mut cfg = complete();
        cfg.telegram.token = None;
        assert!(!validate(&cfg, false).has_errors());
        assert!(validate(&cfg, true).has_errors());
    }

    #[test]
    fn webhook_mode_requires_url() {
        let mut cfg = complete();
        cfg.telegram.mode = TransportMode::Webhook;
        let result = validate(&cfg, true);
        assert!(
            result
                .diagnostics
                .iter()
                .any(|d| d.path == "telegram.webhook_url" && d.severity == Severity::Error)
        );
    }

    #[test]
    fn default_extension_must_be_recognized() {
        let mut cfg = complete();
        cfg.media.default_extension = "mkv".into();
        let err = validate(&cfg, true).into_result().unwrap_err();
        assert_eq!(err.diagnostics[0].path, "media.default_extension");
    }

    #[test]
    fn zero_attempts_rejected_and_backoff_warned() {
        let mut cfg = complete();
        cfg.transfer.retry.max_attempts = 0;
        cfg.transfer.retry.initial_backoff_ms = 10_000;
        let result = validate(&cfg, true);
        assert!(result.has_errors());
        assert_eq!(result.warnings().count(), 1);
    }
}
