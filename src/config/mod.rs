//! Daemon configuration
//!
//! Every field has a default, so the daemon runs without a config file. A
//! YAML or JSON file can override the defaults and command-line flags (or
//! their environment variables) override the file.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::api::DEFAULT_SOCKET_PATH;
use crate::cluster::kube::KubeConfig;
use crate::orchestrator::{OrchestratorConfig, DEFAULT_REMOTE_TIMEOUT_SECS};

pub const DEFAULT_ENGINE_URL: &str = "http://127.0.0.1:2389";
pub const DEFAULT_STORE_PATH: &str = "/var/run/libnetwork/cnidb";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Failed to parse JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid listen address: {0}")]
    InvalidListen(String),

    #[error("Validation error: {0}")]
    ValidationError(String),
}

/// Where the request server listens
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListenAddr {
    Unix(PathBuf),
    Tcp(String),
}

impl FromStr for ListenAddr {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Some(path) = s.strip_prefix("unix:") {
            if path.is_empty() {
                return Err(ConfigError::InvalidListen(s.to_string()));
            }
            return Ok(ListenAddr::Unix(expand_path(path)));
        }
        if s.starts_with('/') {
            return Ok(ListenAddr::Unix(PathBuf::from(s)));
        }
        match s.rsplit_once(':') {
            Some((host, port)) if !host.is_empty() && port.parse::<u16>().is_ok() => {
                Ok(ListenAddr::Tcp(s.to_string()))
            }
            _ => Err(ConfigError::InvalidListen(s.to_string())),
        }
    }
}

impl std::fmt::Display for ListenAddr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ListenAddr::Unix(path) => write!(f, "unix:{}", path.display()),
            ListenAddr::Tcp(addr) => f.write_str(addr),
        }
    }
}

/// Cluster API connection settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterSettings {
    /// API server URL; in-cluster discovery when unset
    pub api_url: Option<String>,
    pub token_path: Option<String>,
    pub ca_path: Option<String>,
    pub timeout_secs: u64,
}

impl Default for ClusterSettings {
    fn default() -> Self {
        Self {
            api_url: None,
            token_path: None,
            ca_path: None,
            timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// `unix:/path`, `/path` or `host:port`
    pub listen: String,
    pub engine_url: String,
    pub store_path: String,
    /// Keep records in memory only (testing)
    pub ephemeral_store: bool,
    /// Defaults to `$HOSTNAME`, then the system hostname
    pub node_name: Option<String>,
    pub network_name: String,
    pub remote_timeout_secs: u64,
    pub conflict_retries: u32,
    pub rollback_on_failure: bool,
    pub cluster: ClusterSettings,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            listen: format!("unix:{}", DEFAULT_SOCKET_PATH),
            engine_url: DEFAULT_ENGINE_URL.to_string(),
            store_path: DEFAULT_STORE_PATH.to_string(),
            ephemeral_store: false,
            node_name: None,
            network_name: "default".to_string(),
            remote_timeout_secs: DEFAULT_REMOTE_TIMEOUT_SECS,
            conflict_retries: 3,
            rollback_on_failure: false,
            cluster: ClusterSettings::default(),
        }
    }
}

impl DaemonConfig {
    /// Parse a config document; JSON if it looks like JSON, YAML otherwise
    pub fn from_str(content: &str) -> Result<Self, ConfigError> {
        let config: DaemonConfig = if content.trim_start().starts_with('{') {
            serde_json::from_str(content)?
        } else {
            serde_yaml::from_str(content)?
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.listen_addr()?;
        if self.engine_url.is_empty() {
            return Err(ConfigError::ValidationError("engine_url is empty".to_string()));
        }
        if self.remote_timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "remote_timeout_secs must be positive".to_string(),
            ));
        }
        if !self.ephemeral_store && self.store_path.is_empty() {
            return Err(ConfigError::ValidationError("store_path is empty".to_string()));
        }
        Ok(())
    }

    pub fn listen_addr(&self) -> Result<ListenAddr, ConfigError> {
        self.listen.parse()
    }

    pub fn store_dir(&self) -> PathBuf {
        expand_path(&self.store_path)
    }

    pub fn remote_timeout(&self) -> Duration {
        Duration::from_secs(self.remote_timeout_secs)
    }

    /// Configured node name, else `$HOSTNAME`, else the system hostname
    pub fn resolve_node_name(&self) -> String {
        self.node_name
            .clone()
            .filter(|n| !n.is_empty())
            .or_else(|| std::env::var("HOSTNAME").ok().filter(|n| !n.is_empty()))
            .or_else(|| {
                hostname::get()
                    .ok()
                    .and_then(|h| h.into_string().ok())
            })
            .unwrap_or_else(|| "localhost".to_string())
    }

    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            remote_timeout: self.remote_timeout(),
            conflict_retries: self.conflict_retries,
            rollback_on_failure: self.rollback_on_failure,
            network_name: self.network_name.clone(),
        }
    }

    pub fn kube_config(&self, node_name: &str) -> KubeConfig {
        let mut kube = KubeConfig::in_cluster(node_name);
        if let Some(ref url) = self.cluster.api_url {
            kube.api_url = url.clone();
        }
        if let Some(ref path) = self.cluster.token_path {
            kube.token_path = Some(expand_path(path));
        }
        if let Some(ref path) = self.cluster.ca_path {
            kube.ca_path = Some(expand_path(path));
        }
        kube.timeout = Duration::from_secs(self.cluster.timeout_secs);
        kube
    }
}

/// Expand `~` and environment variables in a configured path
pub fn expand_path(path: &str) -> PathBuf {
    match shellexpand::full(path) {
        Ok(expanded) => PathBuf::from(expanded.as_ref()),
        Err(_) => PathBuf::from(shellexpand::tilde(path).as_ref()),
    }
}

// ============================================================================
// I/O wrapper - thin layer over pure parsing
// ============================================================================

/// Load and parse a config file from disk
pub fn load_config_file(path: &Path) -> Result<DaemonConfig, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    DaemonConfig::from_str(&content)
}
