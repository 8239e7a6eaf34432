//! Monitor configuration
//!
//! Node endpoint, telemetry port, refresh cadences and logging. Loaded from
//! a JSON file, then environment overrides, then command-line flags.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

/// Current schema version. Bump when adding/removing/renaming fields.
pub const SCHEMA_VERSION: u32 = 1;

pub const ENV_API_URL: &str = "BITSPY_API_URL";
pub const ENV_WS_PORT: &str = "BITSPY_WS_PORT";
pub const ENV_LOG_LEVEL: &str = "BITSPY_LOG_LEVEL";

/// Monitor configuration.
///
/// Persisted to `{config_dir}/bitspy/config.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub schema_version: u32,

    // ── Node ────────────────────────────────────────────────
    /// Base URL of the node's HTTP API.
    pub api_url: String,
    /// Delay before reconnecting after the log tail fails to connect.
    pub reconnect_delay_ms: u64,

    // ── Telemetry ───────────────────────────────────────────
    /// WebSocket telemetry port (0 = disabled).
    pub ws_port: u16,
    pub telemetry_interval_ms: u64,

    // ── Dashboard ───────────────────────────────────────────
    pub dashboard: bool,
    pub render_interval_ms: u64,

    // ── Logging ─────────────────────────────────────────────
    /// Default filter when `RUST_LOG` is unset.
    pub log_level: String,
    /// Write logs here instead of stderr. Useful while the dashboard owns the terminal.
    pub log_file: Option<PathBuf>,

    /// Unknown fields, preserved for forward compatibility.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            api_url: bitspy_client::DEFAULT_API_URL.to_string(),
            reconnect_delay_ms: 1_000,
            ws_port: 9123,
            telemetry_interval_ms: 1_000,
            dashboard: true,
            render_interval_ms: 1_000,
            log_level: "warn".to_string(),
            log_file: None,
            extra: serde_json::Map::new(),
        }
    }
}

impl MonitorConfig {
    /// Load config from a file, falling back to defaults, then apply env overrides.
    ///
    /// Missing fields take their defaults and unknown fields are kept.
    /// A corrupt file is reported and ignored; it is never overwritten.
    pub fn load_from(path: &Path) -> Self {
        let mut config = Self::read_file(path);
        config.apply_env_overrides();
        config
    }

    /// Load from the default location.
    pub fn load() -> Self {
        match default_config_path() {
            Some(path) => Self::load_from(&path),
            None => {
                debug!("No config directory available, using defaults");
                let mut config = Self::default();
                config.apply_env_overrides();
                config
            }
        }
    }

    fn read_file(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(data) => match serde_json::from_str::<MonitorConfig>(&data) {
                Ok(mut c) => {
                    info!("Loaded config from {:?} (schema v{})", path, c.schema_version);
                    c.migrate();
                    c
                }
                Err(e) => {
                    warn!("Corrupt config {:?}: {}, using defaults", path, e);
                    Self::default()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No config file at {:?}, using defaults", path);
                Self::default()
            }
            Err(e) => {
                warn!("Failed to read config {:?}: {}, using defaults", path, e);
                Self::default()
            }
        }
    }

    /// Save config to a file. Creates parent dirs as needed.
    pub fn save_to(&self, path: &Path) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self).map_err(std::io::Error::other)?;
        // Atomic write: write to .tmp then rename
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, &json)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    fn migrate(&mut self) {
        if self.schema_version > SCHEMA_VERSION {
            warn!(
                "Config schema v{} is newer than supported v{}",
                self.schema_version, SCHEMA_VERSION
            );
        }
        self.schema_version = SCHEMA_VERSION;
    }

    fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|name| std::env::var(name).ok());
    }

    fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(val) = lookup(ENV_API_URL).filter(|v| !v.trim().is_empty()) {
            debug!("{}={}", ENV_API_URL, val);
            self.api_url = val.trim().to_string();
        }
        if let Some(val) = lookup(ENV_WS_PORT) {
            match val.trim().parse::<u16>() {
                Ok(port) => {
                    debug!("{}={}", ENV_WS_PORT, port);
                    self.ws_port = port;
                }
                Err(_) => warn!("Ignoring invalid {}={:?}", ENV_WS_PORT, val),
            }
        }
        if let Some(val) = lookup(ENV_LOG_LEVEL).filter(|v| !v.trim().is_empty()) {
            debug!("{}={}", ENV_LOG_LEVEL, val);
            self.log_level = val.trim().to_string();
        }
    }
}

/// `{config_dir}/bitspy/config.json`, if a config directory can be determined.
pub fn default_config_path() -> Option<PathBuf> {
    dirs_config_dir().map(|d| d.join("bitspy").join("config.json"))
}

fn dirs_config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "macos")]
    {
        dirs_home().map(|h| h.join("Library/Application Support"))
    }
    #[cfg(target_os = "windows")]
    {
        std::env::var("APPDATA").ok().map(PathBuf::from)
    }
    #[cfg(not(any(target_os = "macos", target_os = "windows")))]
    {
        std::env::var("XDG_CONFIG_HOME")
            .ok()
            .filter(|v| !v.is_empty())
            .map(PathBuf::from)
            .or_else(|| dirs_home().map(|h| h.join(".config")))
    }
}

#[cfg(not(target_os = "windows"))]
fn dirs_home() -> Option<PathBuf> {
    std::env::var("HOME").ok().map(PathBuf::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_values() {
        let config = MonitorConfig::default();
        assert_eq!(config.schema_version, SCHEMA_VERSION);
        assert_eq!(config.api_url, "http://127.0.0.1:5001");
        assert_eq!(config.ws_port, 9123);
        assert_eq!(config.render_interval_ms, 1_000);
        assert!(config.dashboard);
        assert_eq!(config.log_level, "warn");
        assert!(config.log_file.is_none());
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = MonitorConfig::read_file(&dir.path().join("config.json"));
        assert_eq!(config, MonitorConfig::default());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");

        let mut config = MonitorConfig::default();
        config.api_url = "http://10.0.0.2:5001".into();
        config.ws_port = 0;
        config.dashboard = false;
        config.save_to(&path).unwrap();
        assert!(!path.with_extension("json.tmp").exists());

        let loaded = MonitorConfig::read_file(&path);
        assert_eq!(loaded.api_url, "http://10.0.0.2:5001");
        assert_eq!(loaded.ws_port, 0);
        assert!(!loaded.dashboard);
    }

    #[test]
    fn test_partial_file_and_unknown_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"ws_port": 7000, "theme": "dark"}"#).unwrap();

        let config = MonitorConfig::read_file(&path);
        assert_eq!(config.ws_port, 7000);
        assert_eq!(config.render_interval_ms, 1_000);
        assert_eq!(config.extra.get("theme").unwrap().as_str().unwrap(), "dark");

        // Extra fields survive a save round trip
        config.save_to(&path).unwrap();
        let reloaded = MonitorConfig::read_file(&path);
        assert_eq!(reloaded.extra.get("theme").unwrap().as_str().unwrap(), "dark");
    }

    #[test]
    fn test_corrupt_file_left_alone() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{ws_port: nope").unwrap();

        let config = MonitorConfig::read_file(&path);
        assert_eq!(config.ws_port, 9123);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "{ws_port: nope");
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            (ENV_API_URL, " http://node:5001 "),
            (ENV_WS_PORT, "0"),
            (ENV_LOG_LEVEL, "debug"),
        ]
        .into_iter()
        .collect();
        let mut config = MonitorConfig::default();
        config.apply_overrides_from(|name| env.get(name).map(|v| v.to_string()));
        assert_eq!(config.api_url, "http://node:5001");
        assert_eq!(config.ws_port, 0);
        assert_eq!(config.log_level, "debug");
    }

    #[test]
    fn test_invalid_env_port_ignored() {
        let mut config = MonitorConfig::default();
        config.apply_overrides_from(|name| (name == ENV_WS_PORT).then(|| "70000".to_string()));
        assert_eq!(config.ws_port, 9123);
    }
}
