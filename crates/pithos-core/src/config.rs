//! Configuration system for Pithos nodes.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $PITHOS_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/pithos/config.toml
//!   3. ~/.config/pithos/config.toml

use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PithosConfig {
    pub network: NetworkConfig,
    pub roles: RolesConfig,
    pub rpc: RpcConfig,
    pub stats: StatsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Address the UDP transport binds to.
    pub bind: String,
    /// UDP port the communicator binds to.
    pub port: u16,
    /// How long after binding the underlay counts as bootstrapped.
    /// Sends and inbound calls before then fail.
    pub bootstrap_wait_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RolesConfig {
    /// Run the peer-logic sub-component.
    pub peer_logic: bool,
    /// Run the group-storage sub-component.
    pub group_storage: bool,
    /// Run the super-peer sub-component.
    pub super_peer: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RpcConfig {
    /// Timeout used when a call does not specify one.
    pub timeout_ms: u64,
    /// Retries used when a call does not specify them.
    pub retries: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StatsConfig {
    /// Rate statistics are only published for nodes that lived at least this long.
    pub min_measured_secs: u64,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".to_string(),
            port: 2000,
            bootstrap_wait_ms: 0,
        }
    }
}

impl Default for RolesConfig {
    fn default() -> Self {
        Self {
            peer_logic: true,
            group_storage: true,
            super_peer: false,
        }
    }
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 1500,
            retries: 0,
        }
    }
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            min_measured_secs: 30,
        }
    }
}

impl RpcConfig {
    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl StatsConfig {
    pub fn min_measured(&self) -> Duration {
        Duration::from_secs(self.min_measured_secs)
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot access config file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config file {}: {source}", path.display())]
    Invalid {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("cannot render default config: {0}")]
    Render(#[from] toml::ser::Error),
}

impl ConfigError {
    fn io(path: &Path) -> impl FnOnce(std::io::Error) -> Self + '_ {
        move |source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl PithosConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::load_file(&Self::file_path())?;
        config.apply_env_overrides(|name| std::env::var(name).ok());
        Ok(config)
    }

    /// Parse a config file, falling back to defaults if it does not exist.
    pub fn load_file(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(PithosConfig::default());
        }
        let text = std::fs::read_to_string(path).map_err(ConfigError::io(path))?;
        toml::from_str(&text).map_err(|source| ConfigError::Invalid {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        Self::resolve_file_path(|name| std::env::var_os(name))
    }

    /// `$PITHOS_CONFIG`, else `pithos/config.toml` under `$XDG_CONFIG_HOME`,
    /// else under `$HOME/.config`. Empty variables count as unset.
    pub fn resolve_file_path(lookup: impl Fn(&str) -> Option<OsString>) -> PathBuf {
        let set = |name: &str| lookup(name).filter(|v| !v.is_empty()).map(PathBuf::from);
        if let Some(explicit) = set("PITHOS_CONFIG") {
            return explicit;
        }
        let base = set("XDG_CONFIG_HOME").unwrap_or_else(|| {
            set("HOME")
                .unwrap_or_else(std::env::temp_dir)
                .join(".config")
        });
        base.join("pithos").join("config.toml")
    }

    /// Write default config if none exists. Returns the path.
    pub fn write_default_if_missing() -> Result<PathBuf, ConfigError> {
        let path = Self::file_path();
        if path.exists() {
            return Ok(path);
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(ConfigError::io(&path))?;
        }
        let text = toml::to_string_pretty(&PithosConfig::default())?;
        std::fs::write(&path, text).map_err(ConfigError::io(&path))?;
        Ok(path)
    }

    /// Apply PITHOS_* overrides. `lookup` resolves a variable name.
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let flag = |v: String| v == "true" || v == "1";

        if let Some(v) = lookup("PITHOS_NETWORK__BIND") {
            self.network.bind = v;
        }
        if let Some(p) = lookup("PITHOS_NETWORK__PORT").and_then(|v| v.parse().ok()) {
            self.network.port = p;
        }
        if let Some(w) = lookup("PITHOS_NETWORK__BOOTSTRAP_WAIT_MS").and_then(|v| v.parse().ok()) {
            self.network.bootstrap_wait_ms = w;
        }
        if let Some(v) = lookup("PITHOS_ROLES__SUPER_PEER") {
            self.roles.super_peer = flag(v);
        }
        if let Some(v) = lookup("PITHOS_ROLES__GROUP_STORAGE") {
            self.roles.group_storage = flag(v);
        }
        if let Some(t) = lookup("PITHOS_RPC__TIMEOUT_MS").and_then(|v| v.parse().ok()) {
            self.rpc.timeout_ms = t;
        }
        if let Some(r) = lookup("PITHOS_RPC__RETRIES").and_then(|v| v.parse().ok()) {
            self.rpc.retries = r;
        }
    }
}
