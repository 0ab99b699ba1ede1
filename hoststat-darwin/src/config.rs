//! Configuration for the hoststat collector.

use hoststat_common::{Format, LoggingConfig};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(#[from] json5::Error),
    #[error("Validation error: {0}")]
    Validation(String),
}

/// Complete collector configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HoststatConfig {
    /// Which categories to collect.
    #[serde(default)]
    pub collect: CollectConfig,

    /// Mount point filters.
    #[serde(default)]
    pub disk: DiskConfig,

    /// Network interface filters.
    #[serde(default)]
    pub network: NetworkConfig,

    /// Snapshot output settings.
    #[serde(default)]
    pub output: OutputConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Configuration for which categories to collect.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectConfig {
    /// Collect CPU identity (model, frequency, cache size).
    #[serde(default = "default_true")]
    pub cpu: bool,

    /// Collect CPU tick counters.
    #[serde(default = "default_true")]
    pub cpu_times: bool,

    /// Report CPU ticks per processor instead of one aggregate.
    #[serde(default)]
    pub percpu: bool,

    /// Collect physical memory usage.
    #[serde(default = "default_true")]
    pub memory: bool,

    /// Collect swap usage.
    #[serde(default = "default_true")]
    pub swap: bool,

    /// Collect mounted partitions.
    #[serde(default = "default_true")]
    pub disk: bool,

    /// Collect per-mount I/O counters.
    #[serde(default = "default_true")]
    pub disk_io: bool,

    /// Collect network interface counters.
    #[serde(default = "default_true")]
    pub network: bool,

    /// Report network counters per interface instead of one aggregate.
    #[serde(default = "default_true")]
    pub pernic: bool,

    /// Collect host identity and uptime.
    #[serde(default = "default_true")]
    pub host: bool,

    /// Collect logged-in users.
    #[serde(default)]
    pub users: bool,

    /// Collect load averages.
    #[serde(default = "default_true")]
    pub load: bool,
}

impl Default for CollectConfig {
    fn default() -> Self {
        Self {
            cpu: true,
            cpu_times: true,
            percpu: false,
            memory: true,
            swap: true,
            disk: true,
            disk_io: true,
            network: true,
            pernic: true,
            host: true,
            users: false,
            load: true,
        }
    }
}

impl CollectConfig {
    /// Whether any category is enabled.
    pub fn any(&self) -> bool {
        self.cpu
            || self.cpu_times
            || self.memory
            || self.swap
            || self.disk
            || self.disk_io
            || self.network
            || self.host
            || self.users
            || self.load
    }
}

fn default_true() -> bool {
    true
}

/// Network interface filtering configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Only include these interfaces (empty = include all).
    #[serde(default)]
    pub include: Vec<String>,

    /// Exclude these interfaces.
    #[serde(default)]
    pub exclude: Vec<String>,

    /// Exclude loopback interfaces (default: true).
    #[serde(default = "default_true")]
    pub exclude_loopback: bool,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            include: Vec::new(),
            exclude: Vec::new(),
            exclude_loopback: true,
        }
    }
}

/// Disk mount filtering configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DiskConfig {
    /// Only include these mount points (empty = include all).
    #[serde(default)]
    pub include: Vec<String>,

    /// Exclude these mount points.
    #[serde(default)]
    pub exclude: Vec<String>,

    /// Also report filesystems not backed by a device path (devfs, autofs, ...).
    #[serde(default)]
    pub all: bool,
}

/// Snapshot output configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Output format: "json" or "cbor".
    #[serde(default)]
    pub format: Format,

    /// Pretty-print JSON output.
    #[serde(default)]
    pub pretty: bool,
}

impl HoststatConfig {
    /// Load configuration from a JSON5 file.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: HoststatConfig = json5::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.collect.any() {
            return Err(ConfigError::Validation(
                "At least one category must be enabled".to_string(),
            ));
        }

        if self.output.pretty && self.output.format == Format::Cbor {
            return Err(ConfigError::Validation(
                "pretty output is only available for json".to_string(),
            ));
        }

        Ok(())
    }
}

/// `lo0`, `lo1`, ...
fn is_loopback(name: &str) -> bool {
    name.strip_prefix("lo")
        .is_some_and(|n| !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit()))
}

impl NetworkConfig {
    /// Check if an interface should be included.
    pub fn should_include(&self, name: &str) -> bool {
        // Check explicit include list
        if !self.include.is_empty() && !self.include.iter().any(|i| i == name) {
            return false;
        }

        // Check exclude list
        if self.exclude.iter().any(|e| e == name) {
            return false;
        }

        if self.exclude_loopback && is_loopback(name) {
            return false;
        }

        true
    }
}

impl DiskConfig {
    /// Check if a mount point should be included.
    pub fn should_include(&self, mount_point: &str) -> bool {
        // Check explicit include list
        if !self.include.is_empty() && !self.include.iter().any(|i| i == mount_point) {
            return false;
        }

        // Check exclude list
        if self.exclude.iter().any(|e| e == mount_point) {
            return false;
        }

        true
    }
}
