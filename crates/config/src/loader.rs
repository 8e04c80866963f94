use std::path::{Path, PathBuf};

use {secrecy::Secret, tracing::debug};

use crate::{
    env_subst::substitute_env,
    error::{Error, Result},
    schema::{BunnydropConfig, TransportMode},
};

/// Standard config file names, checked in order.
const CONFIG_FILENAMES: &[&str] = &[
    "bunnydrop.toml",
    "bunnydrop.yaml",
    "bunnydrop.yml",
    "bunnydrop.json",
];

/// Load config from the given path (any supported format), without env overrides.
pub fn load_config(path: &Path) -> Result<BunnydropConfig> {
    let raw = std::fs::read_to_string(path).map_err(|source| Error::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let raw = substitute_env(&raw);
    parse_config(&raw, path)
}

/// Load the effective configuration.
///
/// Uses `explicit` when given, otherwise searches:
/// 1. `./bunnydrop.{toml,yaml,yml,json}` (project-local)
/// 2. `~/.config/bunnydrop/bunnydrop.{toml,yaml,yml,json}` (user-global)
///
/// A missing file is fine (env-only deployments); a broken one is not.
/// Process environment overrides are applied last.
pub fn discover_and_load(explicit: Option<&Path>) -> Result<(BunnydropConfig, Option<PathBuf>)> {
    let path = match explicit {
        Some(p) => Some(p.to_path_buf()),
        None => find_config_file(),
    };

    let mut config = match &path {
        Some(p) => {
            debug!(path = %p.display(), "loading config");
            load_config(p)?
        },
        None => {
            debug!("no config file found, using defaults and environment");
            BunnydropConfig::default()
        },
    };

    apply_env_overrides(&mut config, |key| std::env::var(key).ok())?;
    Ok((config, path))
}

/// Find the first config file in standard locations.
fn find_config_file() -> Option<PathBuf> {
    CONFIG_FILENAMES
        .iter()
        .map(PathBuf::from)
        .find(|p| p.exists())
        .or_else(|| {
            let dirs = directories::ProjectDirs::from("", "", "bunnydrop")?;
            CONFIG_FILENAMES
                .iter()
                .map(|name| dirs.config_dir().join(name))
                .find(|p| p.exists())
        })
}

/// Overlay environment variables onto `config`.
///
/// The variable names are the ones the bot has always been deployed with;
/// empty values are ignored.
pub fn apply_env_overrides(
    config: &mut BunnydropConfig,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<()> {
    let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

    if let Some(v) = get("TELEGRAM_TOKEN") {
        config.telegram.token = Some(Secret::new(v));
    }
    if let Some(v) = get("BUNNY_STORAGE_ZONE") {
        config.storage.zone = v;
    }
    if let Some(v) = get("BUNNY_STORAGE_API_KEY") {
        config.storage.api_key = Some(Secret::new(v));
    }
    if let Some(v) = get("BUNNY_STORAGE_REGION") {
        config.storage.region = v;
    }
    if let Some(v) = get("BUNNY_STORAGE_HOST") {
        config.storage.host = Some(v);
    }
    if let Some(v) = get("BUNNY_PULL_ZONE") {
        config.pull_zone.host = v;
    }
    if let Some(v) = get("BUNNYDROP_FETCH_TIMEOUT_SECONDS") {
        config.transfer.fetch_timeout_seconds = parse_number("BUNNYDROP_FETCH_TIMEOUT_SECONDS", &v)?;
    }
    if let Some(v) = get("BUNNYDROP_MAX_BUFFERED_BYTES") {
        config.transfer.max_buffered_bytes = parse_number("BUNNYDROP_MAX_BUFFERED_BYTES", &v)?;
    }
    if let Some(v) = get("BUNNYDROP_WEBHOOK_URL") {
        config.telegram.webhook_url = Some(v);
        config.telegram.mode = TransportMode::Webhook;
    }
    if let Some(v) = get("BUNNYDROP_WEBHOOK_SECRET") {
        config.telegram.webhook_secret = Some(Secret::new(v));
    }
    if let Some(v) = get("PORT") {
        config.server.port = parse_number("PORT", &v)?;
    }

    Ok(())
}

fn parse_number<T>(key: &'static str, value: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value.parse().map_err(|e: T::Err| Error::InvalidEnv {
        key,
        message: format!("\"{value}\": {e}"),
    })
}

fn parse_config(raw: &str, path: &Path) -> Result<BunnydropConfig> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");

    match ext {
        "toml" => toml::from_str(raw).map_err(|e| Error::parse(path, e)),
        "yaml" | "yml" => serde_yaml::from_str(raw).map_err(|e| Error::parse(path, e)),
        "json" => serde_json::from_str(raw).map_err(|e| Error::parse(path, e)),
        _ => Err(Error::UnsupportedFormat {
            ext: ext.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use {super::*, secrecy::ExposeSecret, std::collections::HashMap};

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn env_overrides_file_values() {
        let mut cfg = BunnydropConfig::default();
        cfg.storage.zone = "from-file".into();
        apply_env_overrides(
            &mut cfg,
            env(&[
                ("BUNNY_STORAGE_ZONE", "from-env"),
                ("BUNNY_STORAGE_API_KEY", "k"),
                ("BUNNY_PULL_ZONE", "cdn.example.com"),
                ("TELEGRAM_TOKEN", "123:ABC"),
                ("PORT", "9090"),
            ]),
        )
        .unwrap();
        assert_eq!(cfg.storage.zone, "from-env");
        assert_eq!(cfg.storage.api_key.unwrap().expose_secret(), "k");
        assert_eq!(cfg.pull_zone.host, "cdn.example.com");
        assert_eq!(cfg.telegram.token.unwrap().expose_secret(), "123:ABC");
        assert_eq!(cfg.server.port, 9090);
    }

    #[test]
    fn empty_env_values_are_ignored() {
        let mut cfg = BunnydropConfig::default();
        cfg.storage.zone = "from-file".into();
        apply_env_overrides(&mut cfg, env(&[("BUNNY_STORAGE_ZONE", "  ")])).unwrap();
        assert_eq!(cfg.storage.zone, "from-file");
    }

    #[test]
    fn webhook_url_env_switches_mode() {
        let mut cfg = BunnydropConfig::default();
        apply_env_overrides(
            &mut cfg,
            env(&[("BUNNYDROP_WEBHOOK_URL", "https://bot.example.com/telegram/webhook")]),
        )
        .unwrap();
        assert_eq!(cfg.telegram.mode, TransportMode::Webhook);
    }

    #[test]
    fn invalid_number_is_reported() {
        let mut cfg = BunnydropConfig::default();
        let err = apply_env_overrides(&mut cfg, env(&[("BUNNYDROP_MAX_BUFFERED_BYTES", "lots")]))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidEnv {
            key: "BUNNYDROP_MAX_BUFFERED_BYTES",
            ..
        }));
    }

    #[test]
    fn loads_yaml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bunnydrop.yaml");
        std::fs::write(
            &path,
            "storage:\n  zone: videos\n  region: ny\npull_zone:\n  host: cdn.example.com\n",
        )
        .unwrap();
        let cfg = load_config(&path).unwrap();
        assert_eq!(cfg.storage.zone, "videos");
        assert_eq!(cfg.storage.base_url(), "https://ny.storage.bunnycdn.com");
    }

    #[test]
    fn unsupported_extension_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bunnydrop.ini");
        std::fs::write(&path, "zone=videos").unwrap();
        assert!(matches!(
            load_config(&path),
            Err(Error::UnsupportedFormat { .. })
        ));
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bunnydrop.toml");
        std::fs::write(&path, "[storage\nzone = ").unwrap();
        assert!(matches!(load_config(&path), Err(Error::Parse { .. })));
    }

    #[test]
    fn explicit_missing_path_is_a_read_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.toml");
        assert!(matches!(
            discover_and_load(Some(&missing)),
            Err(Error::Read { .. })
        ));
    }
}
