//! Configuration file handling

use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::paths::{artifacts_dir, config_path};
use super::{Error, Result};

/// Main configuration structure
#[derive(Debug, Deserialize, Default, Clone)]
pub struct Config {
    /// Device bridge settings
    #[serde(default)]
    pub device: DeviceConfig,

    /// Default wait settings
    #[serde(default)]
    pub poller: PollerConfig,

    /// Log window settings
    #[serde(default)]
    pub logs: LogConfig,

    /// Failure artifact settings
    #[serde(default)]
    pub artifacts: ArtifactConfig,

    /// Backend HTTP settings
    #[serde(default)]
    pub http: HttpConfig,
}

/// Device bridge configuration
#[derive(Debug, Deserialize, Clone)]
pub struct DeviceConfig {
    /// Path or name of the adb executable
    #[serde(default = "default_adb_path")]
    pub adb_path: PathBuf,

    /// Device serial passed as `adb -s`
    #[serde(default)]
    pub serial: Option<String>,

    /// Application package under test
    #[serde(default)]
    pub package: Option<String>,

    /// Timeout for a single device command
    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            adb_path: default_adb_path(),
            serial: None,
            package: None,
            command_timeout_secs: default_command_timeout(),
        }
    }
}

fn default_adb_path() -> PathBuf {
    PathBuf::from("adb")
}
fn default_command_timeout() -> u64 {
    30
}

/// Default poll settings, in milliseconds
#[derive(Debug, Deserialize, Clone)]
pub struct PollerConfig {
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    #[serde(default = "default_wait_timeout")]
    pub timeout_ms: u64,

    /// Samples kept for timeout diagnostics (unset keeps all)
    #[serde(default)]
    pub history_limit: Option<usize>,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval(),
            timeout_ms: default_wait_timeout(),
            history_limit: None,
        }
    }
}

fn default_poll_interval() -> u64 {
    1000
}
fn default_wait_timeout() -> u64 {
    10_000
}

/// Log scan window
#[derive(Debug, Deserialize, Clone)]
pub struct LogConfig {
    /// How far before the requested instant lines are still considered
    #[serde(default = "default_lookback")]
    pub lookback_ms: u64,

    /// Maximum lines scanned per read
    #[serde(default = "default_max_lines")]
    pub max_lines: usize,

    /// Lines attached to failure diagnostics
    #[serde(default = "default_tail_lines")]
    pub tail_lines: usize,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            lookback_ms: default_lookback(),
            max_lines: default_max_lines(),
            tail_lines: default_tail_lines(),
        }
    }
}

fn default_lookback() -> u64 {
    5_000
}
fn default_max_lines() -> usize {
    2_000
}
fn default_tail_lines() -> usize {
    200
}

/// Failure artifact configuration
#[derive(Debug, Deserialize, Clone, Default)]
pub struct ArtifactConfig {
    /// Directory failure bundles are written to
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

impl ArtifactConfig {
    /// Configured directory, falling back to the platform data dir
    pub fn resolved_dir(&self) -> PathBuf {
        self.dir
            .clone()
            .or_else(artifacts_dir)
            .unwrap_or_else(|| PathBuf::from("artifacts"))
    }
}

/// Backend HTTP configuration
#[derive(Debug, Deserialize, Clone)]
pub struct HttpConfig {
    /// Base URL relative request paths are joined to
    #[serde(default)]
    pub base_url: Option<String>,

    #[serde(default = "default_http_timeout")]
    pub timeout_secs: u64,

    /// Headers sent with every request
    #[serde(default)]
    pub default_headers: BTreeMap<String, String>,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            timeout_secs: default_http_timeout(),
            default_headers: BTreeMap::new(),
        }
    }
}

fn default_http_timeout() -> u64 {
    30
}

impl Config {
    /// Load configuration from the default config file
    ///
    /// Returns default configuration if file doesn't exist
    pub fn load() -> Result<Self> {
        if let Some(path) = config_path() {
            if path.exists() {
                return Self::load_from(&path);
            }
        }
        Ok(Self::default())
    }

    /// Load configuration from an explicit path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| Error::FileRead {
            path: path.display().to_string(),
            error: e.to_string(),
        })?;
        Self::parse(&content)
    }

    /// Parse configuration from TOML text
    pub fn parse(content: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(content).map_err(|e| Error::ConfigParse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the poller could never honor
    pub fn validate(&self) -> Result<()> {
        if self.poller.poll_interval_ms == 0 {
            return Err(Error::Config(
                "poller.poll_interval_ms must be greater than zero".to_string(),
            ));
        }
        if self.poller.timeout_ms < self.poller.poll_interval_ms {
            return Err(Error::Config(format!(
                "poller.timeout_ms ({}) must be at least poller.poll_interval_ms ({})",
                self.poller.timeout_ms, self.poller.poll_interval_ms
            )));
        }
        if self.device.command_timeout_secs == 0 {
            return Err(Error::Config(
                "device.command_timeout_secs must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.device.command_timeout_secs)
    }

    /// Resolve the adb executable
    ///
    /// Absolute paths are used as-is; bare names are searched in PATH
    pub fn resolve_adb(&self) -> Result<PathBuf> {
        let adb = &self.device.adb_path;
        if adb.is_absolute() {
            if adb.exists() {
                return Ok(adb.clone());
            }
            return Err(Error::AdbNotFound(adb.display().to_string()));
        }
        which::which(adb).map_err(|_| Error::AdbNotFound(format!("PATH for '{}'", adb.display())))
    }
}
