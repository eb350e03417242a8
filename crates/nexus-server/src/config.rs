//! Server configuration.

use crate::logging::LogFileSettings;
use anyhow::{bail, Result};
use nexus_core::{ManagerConfig, MessageKind, UpgradeSettings};
use nexus_types::DuplicatePolicy;
use serde::Deserialize;
use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

/// Path prefixes owned by the server itself.
const RESERVED_PREFIXES: &[&str] = &["/api", "/health"];

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Kind used when a send leaves it unset.
    #[serde(default)]
    pub default_kind: MessageKind,
    /// Per-frame write timeout; `0` disables it.
    #[serde(default = "default_write_timeout_ms")]
    pub write_timeout_ms: u64,
    /// Mount the `/api` admin routes.
    #[serde(default = "default_admin_enabled")]
    pub admin_enabled: bool,
    #[serde(default = "default_endpoints")]
    pub endpoints: Vec<EndpointSettings>,
    /// Rotated JSON log files; stdout only when absent.
    #[serde(default)]
    pub log_file: Option<LogFileSettings>,
}

/// One WebSocket endpoint to mount.
#[derive(Debug, Clone, Deserialize)]
pub struct EndpointSettings {
    pub path: String,
    #[serde(default = "default_inbound_capacity")]
    pub inbound_capacity: usize,
    #[serde(default)]
    pub duplicate_policy: DuplicatePolicy,
    #[serde(default)]
    pub identity: IdentitySource,
    /// Write every inbound message back to its sender.
    #[serde(default)]
    pub echo: bool,
    #[serde(default)]
    pub max_message_size: Option<usize>,
    #[serde(default)]
    pub protocols: Vec<String>,
}

/// Where a connection's identity comes from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdentitySource {
    /// A fresh random id per connection.
    #[default]
    Random,
    /// The `id` query parameter; connections without one are rejected.
    Query,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_write_timeout_ms() -> u64 {
    5000
}

fn default_admin_enabled() -> bool {
    true
}

fn default_inbound_capacity() -> usize {
    nexus_core::DEFAULT_INBOUND_CAPACITY
}

fn default_endpoints() -> Vec<EndpointSettings> {
    vec![EndpointSettings::new("/ws")]
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            default_kind: MessageKind::default(),
            write_timeout_ms: default_write_timeout_ms(),
            admin_enabled: default_admin_enabled(),
            endpoints: default_endpoints(),
            log_file: None,
        }
    }
}

impl EndpointSettings {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            inbound_capacity: default_inbound_capacity(),
            duplicate_policy: DuplicatePolicy::default(),
            identity: IdentitySource::default(),
            echo: false,
            max_message_size: None,
            protocols: Vec::new(),
        }
    }

    pub fn upgrade_settings(&self) -> UpgradeSettings {
        UpgradeSettings {
            max_message_size: self.max_message_size,
            max_frame_size: None,
            protocols: self.protocols.clone(),
        }
    }
}

impl Config {
    /// Load config from a specific file path.
    pub fn load_from(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load config from default location (config/default.toml) or fall back to defaults.
    pub fn load() -> Result<Self> {
        let config_path = PathBuf::from("config/default.toml");
        if config_path.exists() {
            return Self::load_from(&config_path);
        }

        Ok(Config::default())
    }

    pub fn write_timeout(&self) -> Option<Duration> {
        (self.write_timeout_ms > 0).then(|| Duration::from_millis(self.write_timeout_ms))
    }

    pub fn manager_config(&self) -> ManagerConfig {
        ManagerConfig {
            default_kind: self.default_kind,
            write_timeout: self.write_timeout(),
        }
    }

    /// File logging with `dir` (from the command line) taking precedence over
    /// the configured directory.
    pub fn log_file(&self, dir: Option<PathBuf>) -> Option<LogFileSettings> {
        match (dir, &self.log_file) {
            (Some(dir), Some(settings)) => Some(LogFileSettings {
                dir,
                ..settings.clone()
            }),
            (Some(dir), None) => Some(LogFileSettings::new(dir)),
            (None, settings) => settings.clone(),
        }
    }

    /// Reject endpoint layouts the router cannot mount.
    pub fn validate(&self) -> Result<()> {
        if self.endpoints.is_empty() {
            bail!("at least one endpoint must be configured");
        }

        let mut seen = HashSet::new();
        for endpoint in &self.endpoints {
            let path = endpoint.path.as_str();
            if !path.starts_with('/') {
                bail!("endpoint path must start with '/': {path:?}");
            }
            if path.contains(['{', '}', '*']) {
                bail!("endpoint path must not contain route pattern characters: {path:?}");
            }
            if RESERVED_PREFIXES
                .iter()
                .any(|prefix| path == *prefix || path.starts_with(&format!("{prefix}/")))
            {
                bail!("endpoint path collides with a server route: {path:?}");
            }
            if !seen.insert(path) {
                bail!("duplicate endpoint path: {path:?}");
            }
        }
        Ok(())
    }
}
