use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Hosts this machine drives, plus executor defaults.
/// Loaded from ~/.config/renderfarm/hosts.yaml
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub hosts: Vec<HostConfig>,
    #[serde(default)]
    pub defaults: ExecutorSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub host_type: HostType,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub key_path: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub labels: Vec<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum HostType {
    Ssh,
    Local,
}

impl std::fmt::Display for HostType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HostType::Ssh => write!(f, "ssh"),
            HostType::Local => write!(f, "local"),
        }
    }
}

/// Timeouts and output limits for remote invocations.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExecutorSettings {
    #[serde(default = "default_operation_timeout_ms")]
    pub operation_timeout_ms: u64,
    #[serde(default = "default_recovery_timeout_ms")]
    pub recovery_timeout_ms: u64,
    #[serde(default = "default_output_limit")]
    pub stdout_limit: usize,
    #[serde(default = "default_output_limit")]
    pub stderr_limit: usize,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            operation_timeout_ms: default_operation_timeout_ms(),
            recovery_timeout_ms: default_recovery_timeout_ms(),
            stdout_limit: default_output_limit(),
            stderr_limit: default_output_limit(),
        }
    }
}

impl ExecutorSettings {
    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }

    pub fn recovery_timeout(&self) -> Duration {
        Duration::from_millis(self.recovery_timeout_ms)
    }
}

fn default_operation_timeout_ms() -> u64 {
    60_000
}

fn default_recovery_timeout_ms() -> u64 {
    60_000
}

fn default_output_limit() -> usize {
    1024 * 1024
}

impl Config {
    /// Load config from the default path (~/.config/renderfarm/hosts.yaml).
    pub fn load_default() -> anyhow::Result<Self> {
        Self::load_or_empty(&Self::default_path())
    }

    /// Load config from `path`; a missing file is an empty config.
    pub fn load_or_empty(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            Self::load_from(path)
        } else {
            Ok(Self::empty())
        }
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&contents)?;
        Ok(config)
    }

    /// Default config file path.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("/etc"))
            .join("renderfarm")
            .join("hosts.yaml")
    }

    /// Empty config with no hosts.
    pub fn empty() -> Self {
        Self {
            hosts: Vec::new(),
            defaults: ExecutorSettings::default(),
        }
    }

    pub fn find_host(&self, name: &str) -> Option<&HostConfig> {
        self.hosts.iter().find(|h| h.name == name)
    }

    /// Hosts carrying every one of `labels`.
    pub fn find_by_labels(&self, labels: &[String]) -> Vec<&HostConfig> {
        self.hosts
            .iter()
            .filter(|h| labels.iter().all(|l| h.labels.contains(l)))
            .collect()
    }
}

impl HostConfig {
    /// SSH port, falling back to 22.
    pub fn ssh_port(&self) -> u16 {
        self.port.unwrap_or(22)
    }
}
