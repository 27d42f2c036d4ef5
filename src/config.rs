//! Configuration using Figment
//!
//! Configuration is loaded from:
//! 1. `config/meter_cache.toml` (or the file passed on the command line)
//! 2. Environment variables prefixed with `METER_CACHE_`, nesting separated by `__`
//!
//! Every section has defaults, so a missing file yields a usable configuration.
//!
//! # Example
//! ```no_run
//! use meter_cache::config::Config;
//!
//! let config = Config::load()?;
//! println!("Polling {} every {:?}", config.meter.port, config.meter.poll_interval);
//! # Ok::<(), meter_cache::error::MeterError>(())
//! ```

use crate::error::{MeterError, MeterResult};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default configuration file location.
pub const DEFAULT_CONFIG_PATH: &str = "config/meter_cache.toml";

/// Baud rates a mode C readout can start at.
pub const SUPPORTED_BAUD_RATES: [u32; 7] = [300, 600, 1200, 2400, 4800, 9600, 19200];

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Application settings
    pub application: ApplicationConfig,
    /// Meter link and polling cadence
    pub meter: MeterConfig,
    /// Retrieval service settings
    pub service: ServiceConfig,
    /// Measurement cache settings
    pub storage: StorageConfig,
}

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Pretty-printed format with colors (for development)
    #[default]
    Pretty,
    /// Compact single-line format
    Compact,
    /// JSON format for log aggregation
    Json,
}

/// Application-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationConfig {
    /// Application name
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Log output format
    pub log_format: LogFormat,
    /// Emit span open/close events
    pub log_span_events: bool,
    /// Colored output (pretty format only)
    pub log_ansi: bool,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: "meter-cache".to_string(),
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            log_span_events: false,
            log_ansi: true,
        }
    }
}

/// Meter link and polling configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeterConfig {
    /// Serial device path (e.g., "/dev/ttyUSB0", "COM3")
    pub port: String,
    /// Initial baud rate of the readout
    pub baud_rate: u32,
    /// Deadline for each response from the meter
    #[serde(with = "humantime_serde")]
    pub read_timeout: Duration,
    /// Deadline for a whole poll (open plus exchange)
    #[serde(with = "humantime_serde")]
    pub poll_timeout: Option<Duration>,
    /// Quiet period between the end of one poll and the start of the next
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
    /// Minimum quiet period the meter requires between polls
    #[serde(with = "humantime_serde")]
    pub min_poll_spacing: Duration,
    /// Device address for the sign-on request, empty for "any meter"
    pub device_address: Option<String>,
}

impl Default for MeterConfig {
    fn default() -> Self {
        Self {
            port: "/dev/ttyUSB0".to_string(),
            baud_rate: 300,
            read_timeout: Duration::from_millis(1500),
            poll_timeout: Some(Duration::from_secs(30)),
            poll_interval: Duration::from_secs(60),
            min_poll_spacing: Duration::from_secs(5),
            device_address: None,
        }
    }
}

/// Retrieval service configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Address the HTTP server binds to
    pub listen_address: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            listen_address: "127.0.0.1:8080".to_string(),
        }
    }
}

/// Measurement cache configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// JSON-lines file persisting the cache; in-memory only when unset
    pub path: Option<PathBuf>,
}

impl Config {
    /// Load configuration from the default file and environment variables
    ///
    /// Environment variables override the file, e.g.
    /// `METER_CACHE_METER__PORT=/dev/ttyACM0`.
    pub fn load() -> MeterResult<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from a specific file path
    pub fn load_from<P: AsRef<Path>>(path: P) -> MeterResult<Self> {
        Self::figment(path.as_ref())
            .merge(Env::prefixed("METER_CACHE_").split("__"))
            .extract()
            .map_err(MeterError::from)
    }

    fn figment(path: &Path) -> Figment {
        Figment::from(Serialized::defaults(Config::default())).merge(Toml::file(path))
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> MeterResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.to_lowercase().as_str()) {
            return Err(MeterError::Configuration(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        if self.meter.port.trim().is_empty() {
            return Err(MeterError::Configuration(
                "meter.port cannot be empty".to_string(),
            ));
        }

        if !SUPPORTED_BAUD_RATES.contains(&self.meter.baud_rate) {
            return Err(MeterError::Configuration(format!(
                "Invalid baud_rate {}. Must be one of: {:?}",
                self.meter.baud_rate, SUPPORTED_BAUD_RATES
            )));
        }

        if self.meter.poll_interval < self.meter.min_poll_spacing {
            return Err(MeterError::Configuration(format!(
                "poll_interval {:?} is shorter than min_poll_spacing {:?}",
                self.meter.poll_interval, self.meter.min_poll_spacing
            )));
        }

        if self.meter.poll_timeout.is_some_and(|t| t.is_zero()) {
            return Err(MeterError::Configuration(
                "poll_timeout must be greater than zero".to_string(),
            ));
        }

        self.listen_address()?;

        if let Some(path) = &self.storage.path {
            if path.as_os_str().is_empty() {
                return Err(MeterError::Configuration(
                    "storage.path cannot be empty".to_string(),
                ));
            }
        }

        Ok(())
    }

    /// Parsed listen address of the retrieval service.
    pub fn listen_address(&self) -> MeterResult<SocketAddr> {
        self.service.listen_address.parse().map_err(|_| {
            MeterError::Configuration(format!(
                "Invalid listen_address '{}'",
                self.service.listen_address
            ))
        })
    }
}
