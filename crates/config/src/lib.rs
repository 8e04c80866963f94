//! Configuration loading, env substitution, env overrides, and startup validation.
//!
//! Config files: `bunnydrop.toml`, `bunnydrop.yaml`, or `bunnydrop.json`
//! Searched in `./` then `~/.config/bunnydrop/`.
//!
//! Supports `${ENV_VAR}` and `${ENV_VAR:-default}` substitution in all string
//! values, and the bot's historical environment variables (`TELEGRAM_TOKEN`,
//! `BUNNY_STORAGE_ZONE`, ...) override whatever the file says.

pub mod env_subst;
pub mod error;
pub mod loader;
pub mod schema;
pub mod validate;

pub use {
    error::{Error, Result},
    loader::{apply_env_overrides, discover_and_load, load_config},
    schema::{
        BunnydropConfig, MediaConfig, PullZoneConfig, RetryConfig, ServerConfig, StorageConfig,
        TelegramConfig, TransferConfig, TransportMode,
    },
    validate::{ConfigError, Diagnostic, Severity, ValidationResult, validate},
};
