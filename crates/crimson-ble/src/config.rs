//! # Configuration
//!
//! [`CrimsonConfig`] holds the driver's tunables. Every field has a default,
//! so an empty TOML file (or no file at all) is a valid configuration.
//!
//! ## Loading Priority
//!
//! 1. Explicit struct fields (programmatic construction)
//! 2. TOML config file at an explicit path
//! 3. File named by `CRIMSON_CONFIG`
//! 4. `./crimson.toml` in the current directory
//! 5. `~/.config/crimson/crimson.toml`
//!
//! Environment variables (`CRIMSON_MOCK_PREFIX`, `CRIMSON_LOG_LEVEL`,
//! `CRIMSON_WRITE_ACK`) override file values.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CrimsonError, CrimsonResult};

/// Advertised-name prefix of development boards that carry no manufacturer data.
pub const DEFAULT_MOCK_NAME_PREFIX: &str = "CM_";

/// Battery level reported for mock-prefixed peripherals.
const DEFAULT_MOCK_BATTERY_LEVEL: u8 = 66;

/// How long `start_scan` waits for the radio to power on.
const DEFAULT_POWER_ON_TIMEOUT_SECS: u64 = 5;

/// Capacity of the driver's broadcast event channel.
const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 64;

/// Verbosity of the driver and the codec.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Warn,
    Error,
    None,
}

impl LogLevel {
    /// `EnvFilter` directive selecting this level for the crate's targets.
    #[must_use]
    pub fn filter_directive(self) -> &'static str {
        match self {
            Self::Debug => "crimson_ble=debug",
            Self::Info => "crimson_ble=info",
            Self::Warn => "crimson_ble=warn",
            Self::Error => "crimson_ble=error",
            Self::None => "crimson_ble=off",
        }
    }
}

impl std::str::FromStr for LogLevel {
    type Err = CrimsonError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "warn" | "warning" => Ok(Self::Warn),
            "error" => Ok(Self::Error),
            "none" | "off" => Ok(Self::None),
            other => Err(CrimsonError::ConfigError {
                reason: format!("Unknown log level '{other}'"),
            }),
        }
    }
}

/// Driver configuration.
///
/// # Examples
///
/// ```
/// use crimson_ble::config::CrimsonConfig;
///
/// let config = CrimsonConfig::default();
/// assert_eq!(config.mock_name_prefix, "CM_");
/// assert!(!config.write_with_response);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrimsonConfig {
    /// Peripherals whose advertised name starts with this prefix are accepted
    /// without manufacturer data.
    #[serde(default = "default_mock_name_prefix")]
    pub mock_name_prefix: String,

    #[serde(default = "default_mock_battery_level")]
    pub mock_battery_level: u8,

    /// Default write flavour for commands.
    #[serde(default)]
    pub write_with_response: bool,

    #[serde(default)]
    pub log_level: LogLevel,

    #[serde(default)]
    pub scan: ScanConfig,

    #[serde(default)]
    pub events: EventConfig,
}

/// Discovery settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanConfig {
    /// Seconds `start_scan` waits for the radio before failing.
    #[serde(default = "default_power_on_timeout")]
    pub power_on_timeout_secs: u64,

    /// Report repeated advertisements from the same peripheral.
    #[serde(default = "default_true")]
    pub allow_duplicates: bool,
}

/// Event channel settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventConfig {
    #[serde(default = "default_event_channel_capacity")]
    pub channel_capacity: usize,
}

// ─── Defaults ───────────────────────────────────────────────────────────

fn default_mock_name_prefix() -> String {
    DEFAULT_MOCK_NAME_PREFIX.to_string()
}

fn default_mock_battery_level() -> u8 {
    DEFAULT_MOCK_BATTERY_LEVEL
}

fn default_power_on_timeout() -> u64 {
    DEFAULT_POWER_ON_TIMEOUT_SECS
}

fn default_true() -> bool {
    true
}

fn default_event_channel_capacity() -> usize {
    DEFAULT_EVENT_CHANNEL_CAPACITY
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            power_on_timeout_secs: DEFAULT_POWER_ON_TIMEOUT_SECS,
            allow_duplicates: true,
        }
    }
}

impl Default for EventConfig {
    fn default() -> Self {
        Self {
            channel_capacity: DEFAULT_EVENT_CHANNEL_CAPACITY,
        }
    }
}

impl Default for CrimsonConfig {
    fn default() -> Self {
        Self {
            mock_name_prefix: default_mock_name_prefix(),
            mock_battery_level: DEFAULT_MOCK_BATTERY_LEVEL,
            write_with_response: false,
            log_level: LogLevel::default(),
            scan: ScanConfig::default(),
            events: EventConfig::default(),
        }
    }
}

// ─── CrimsonConfig impl ─────────────────────────────────────────────────

impl CrimsonConfig {
    /// Default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Power-on wait as a `Duration`.
    #[must_use]
    pub fn power_on_timeout(&self) -> Duration {
        Duration::from_secs(self.scan.power_on_timeout_secs)
    }

    /// Load config from process environment variables on top of defaults.
    ///
    /// # Errors
    ///
    /// Returns [`CrimsonError::ConfigError`] for unparsable values.
    pub fn from_env() -> CrimsonResult<Self> {
        Self::from_env_with(|key| std::env::var(key).ok())
    }

    /// Like [`from_env`](Self::from_env) with an explicit variable lookup.
    ///
    /// # Errors
    ///
    /// Returns [`CrimsonError::ConfigError`] for unparsable values.
    pub fn from_env_with(lookup: impl Fn(&str) -> Option<String>) -> CrimsonResult<Self> {
        let mut config = Self::default();
        config.apply_env(&lookup)?;
        Ok(config)
    }

    fn apply_env(&mut self, lookup: &impl Fn(&str) -> Option<String>) -> CrimsonResult<()> {
        if let Some(prefix) = lookup("CRIMSON_MOCK_PREFIX") {
            self.mock_name_prefix = prefix;
        }
        if let Some(level) = lookup("CRIMSON_LOG_LEVEL") {
            self.log_level = level.parse()?;
        }
        if let Some(ack) = lookup("CRIMSON_WRITE_ACK") {
            self.write_with_response = parse_bool("CRIMSON_WRITE_ACK", &ack)?;
        }
        Ok(())
    }

    /// Load config from a TOML file, with environment variable overrides.
    ///
    /// # Errors
    ///
    /// Returns [`CrimsonError::ConfigError`] if the file cannot be read or
    /// parsed.
    #[cfg(feature = "config-toml")]
    pub fn from_file(path: impl AsRef<Path>) -> CrimsonResult<Self> {
        Self::from_file_with(path, |key| std::env::var(key).ok())
    }

    /// Like [`from_file`](Self::from_file) with an explicit variable lookup.
    ///
    /// # Errors
    ///
    /// Returns [`CrimsonError::ConfigError`] if the file cannot be read or
    /// parsed.
    #[cfg(feature = "config-toml")]
    pub fn from_file_with(
        path: impl AsRef<Path>,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> CrimsonResult<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| CrimsonError::ConfigError {
            reason: format!("Failed to read config file '{}': {}", path.display(), e),
        })?;
        let mut config: Self = toml::from_str(&contents)?;
        config.apply_env(&lookup)?;
        tracing::debug!(path = %path.display(), "Loaded configuration file");
        Ok(config)
    }

    /// Discover and load config from the standard search path.
    ///
    /// Falls back to environment variables over defaults if no file is found.
    ///
    /// # Errors
    ///
    /// Returns [`CrimsonError::ConfigError`] if a discovered file is invalid.
    #[cfg(feature = "config-toml")]
    pub fn discover(explicit_path: Option<&Path>) -> CrimsonResult<Self> {
        Self::discover_with(explicit_path, |key| std::env::var(key).ok())
    }

    /// Like [`discover`](Self::discover) with an explicit variable lookup
    /// (used for `CRIMSON_CONFIG`, the home directory and overrides).
    ///
    /// # Errors
    ///
    /// Returns [`CrimsonError::ConfigError`] if a discovered file is invalid.
    #[cfg(feature = "config-toml")]
    pub fn discover_with(
        explicit_path: Option<&Path>,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> CrimsonResult<Self> {
        if let Some(path) = explicit_path {
            return Self::from_file_with(path, lookup);
        }

        if let Some(path) = lookup("CRIMSON_CONFIG").map(PathBuf::from) {
            if path.exists() {
                return Self::from_file_with(&path, lookup);
            }
        }

        let local_path = PathBuf::from("crimson.toml");
        if local_path.exists() {
            return Self::from_file_with(&local_path, lookup);
        }

        if let Some(path) = user_config_path(&lookup) {
            if path.exists() {
                return Self::from_file_with(&path, lookup);
            }
        }

        Self::from_env_with(lookup)
    }
}

// ─── Helpers ────────────────────────────────────────────────────────────

fn parse_bool(key: &str, value: &str) -> CrimsonResult<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(CrimsonError::ConfigError {
            reason: format!("{key} must be a boolean, got '{other}'"),
        }),
    }
}

/// Platform-appropriate user config path.
#[cfg(feature = "config-toml")]
fn user_config_path(lookup: &impl Fn(&str) -> Option<String>) -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        lookup("APPDATA").map(|dir| PathBuf::from(dir).join("crimson").join("crimson.toml"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        lookup("HOME").map(|dir| {
            PathBuf::from(dir)
                .join(".config")
                .join("crimson")
                .join("crimson.toml")
        })
    }
}
