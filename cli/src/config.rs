//! Configuration loading and persistence.
//!
//! Reads `config.json` from the stompwire config directory, falling back to
//! defaults, then applies `STOMPWIRE_*` environment overrides. Command-line
//! flags are applied on top by the binary.

// Rust guideline compliant 2026-02

use anyhow::{Context, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
};

use crate::constants::{
    DEFAULT_BROKER_URL, DEFAULT_HEARTBEAT_MS, DEFAULT_IMPORT_BASE_URL,
    DEFAULT_PUBLISH_DESTINATION,
};
use crate::session::{InboundTypePolicy, Mode};

const CONFIG_FILE: &str = "config.json";

/// Configuration for the stompwire console.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    /// WebSocket URL of the STOMP broker.
    pub broker_url: String,
    /// Extra headers sent with the CONNECT frame (e.g. `login`, `passcode`).
    pub connect_headers: IndexMap<String, String>,
    /// Destination used by `send` when none is given.
    pub publish_destination: String,
    /// Destinations subscribed at startup.
    pub subscriptions: Vec<String>,
    /// Initial communication mode.
    pub mode: Mode,
    /// Message type inbound binary frames are decoded as.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inbound_type: Option<String>,
    /// Base URL unresolved schema imports are fetched from.
    pub import_base_url: String,
    /// Requested STOMP heart-beat interval in milliseconds (0 disables).
    pub heartbeat_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            broker_url: DEFAULT_BROKER_URL.to_string(),
            connect_headers: IndexMap::new(),
            publish_destination: DEFAULT_PUBLISH_DESTINATION.to_string(),
            subscriptions: Vec::new(),
            mode: Mode::Raw,
            inbound_type: None,
            import_base_url: DEFAULT_IMPORT_BASE_URL.to_string(),
            heartbeat_ms: DEFAULT_HEARTBEAT_MS,
        }
    }
}

impl Config {
    /// Returns the configuration directory path, creating it if necessary.
    ///
    /// `STOMPWIRE_CONFIG_DIR` takes priority over the platform config dir
    /// (macOS: ~/Library/Application Support/stompwire).
    pub fn config_dir() -> Result<PathBuf> {
        let dir = if let Ok(dir) = std::env::var("STOMPWIRE_CONFIG_DIR") {
            PathBuf::from(dir)
        } else {
            dirs::config_dir()
                .context("Could not determine config directory")?
                .join("stompwire")
        };
        fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create {}", dir.display()))?;
        Ok(dir)
    }

    /// Loads configuration from file, with environment variable overrides.
    pub fn load() -> Result<Self> {
        let path = Self::config_dir()?.join(CONFIG_FILE);
        let mut config = match Self::load_from(&path) {
            Ok(config) => config,
            Err(e) => {
                log::debug!("Using default config: {:#}", e);
                Self::default()
            }
        };
        config.apply_env_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Reads a config file. Missing fields take their defaults.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            anyhow::bail!("Config file not found: {}", path.display());
        }
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        serde_json::from_str(&content).with_context(|| format!("invalid config {}", path.display()))
    }

    /// Applies `STOMPWIRE_*` overrides using `lookup` to read variables.
    ///
    /// Values that fail to parse are ignored.
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup("STOMPWIRE_BROKER_URL") {
            self.broker_url = url;
        }

        if let Some(destination) = lookup("STOMPWIRE_PUBLISH_DESTINATION") {
            self.publish_destination = destination;
        }

        if let Some(mode) = lookup("STOMPWIRE_MODE") {
            match mode.parse::<Mode>() {
                Ok(mode) => self.mode = mode,
                Err(e) => log::warn!("Ignoring STOMPWIRE_MODE: {}", e),
            }
        }

        if let Some(name) = lookup("STOMPWIRE_INBOUND_TYPE") {
            self.inbound_type = Some(name).filter(|n| !n.trim().is_empty());
        }

        if let Some(base) = lookup("STOMPWIRE_IMPORT_BASE_URL") {
            self.import_base_url = base;
        }

        if let Some(heartbeat) = lookup("STOMPWIRE_HEARTBEAT_MS") {
            if let Ok(ms) = heartbeat.parse::<u64>() {
                self.heartbeat_ms = ms;
            }
        }
    }

    /// Persists the current configuration to the config directory.
    pub fn save(&self) -> Result<PathBuf> {
        self.save_in(&Self::config_dir()?)
    }

    /// Writes `config.json` inside `dir` and returns its path.
    pub fn save_in(&self, dir: &Path) -> Result<PathBuf> {
        let path = dir.join(CONFIG_FILE);
        self.save_to(&path)?;
        Ok(path)
    }

    /// Writes the configuration as pretty JSON to `path`.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        fs::write(path, serde_json::to_string_pretty(self)?)
            .with_context(|| format!("failed to write {}", path.display()))
    }

    /// Connect headers as ordered pairs.
    pub fn header_pairs(&self) -> Vec<(String, String)> {
        self.connect_headers
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Inbound decode policy for the configured type name.
    pub fn inbound_policy(&self) -> InboundTypePolicy {
        InboundTypePolicy::from_config(self.inbound_type.as_deref())
    }
}
