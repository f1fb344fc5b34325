//! Configuration loading using Figment
//!
//! Configuration is loaded from:
//! 1. a TOML file (by default `config/thermo.toml`)
//! 2. environment variables prefixed with `THERMO_DAQ_`, nested keys separated by `__`
//!    (e.g. `THERMO_DAQ_APPLICATION__LOG_LEVEL=debug`)
//!
//! Paths starting with `~` are expanded against the user's home directory once after
//! loading, so the rest of the crate only ever sees absolute locations.
//!
//! # Example
//! ```toml
//! [application]
//! log_level = "info"
//!
//! [paths]
//! data = "~/Documents/data/thermo"
//! logs = "~/Documents/data/thermo/logs"
//! staging = "~/Documents/data/thermo/staging"
//!
//! [storage]
//! reporting_interval = 60
//!
//! [[endpoints]]
//! name = "tei49c"
//! instrument_id = 49
//! get_data = "lrec"
//! data_header = "pcdate pctime time date flags o3 cellai cellbi bncht lmpt o3lt flowa flowb pres"
//!
//! [endpoints.transport]
//! kind = "serial"
//! port = "/dev/ttyUSB0"
//! baud_rate = 9600
//! ```

use crate::bin_router::BinWidth;
use crate::error::{AppResult, DaqError};
use crate::logging::OutputFormat;
use crate::validation;
use chrono::format::{Item, StrftimeItems};
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default location of the configuration file, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "config/thermo.toml";

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Application settings
    #[serde(default)]
    pub application: ApplicationConfig,
    /// Data, log and staging directories
    pub paths: PathsConfig,
    /// Data file policy
    #[serde(default)]
    pub storage: StorageConfig,
    /// Instrument definitions
    #[serde(default)]
    pub endpoints: Vec<EndpointConfig>,
}

/// Application-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Application name
    #[serde(default = "default_app_name")]
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Console output format
    #[serde(default)]
    pub log_format: OutputFormat,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: default_app_name(),
            log_level: default_log_level(),
            log_format: OutputFormat::default(),
        }
    }
}

/// Filesystem locations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Root of the per-endpoint data directories
    pub data: PathBuf,
    /// Directory for daily log files; console only when absent
    #[serde(default)]
    pub logs: Option<PathBuf>,
    /// Root of the staging area; finished files are not staged when absent
    #[serde(default)]
    pub staging: Option<PathBuf>,
}

/// Data file rotation and staging policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Default bin width in minutes for endpoints that do not set their own
    #[serde(default = "default_reporting_interval")]
    pub reporting_interval: u32,
    /// Keep finished files in the data directory after staging them
    #[serde(default = "default_true")]
    pub retain_source: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            reporting_interval: default_reporting_interval(),
            retain_source: true,
        }
    }
}

/// One instrument.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointConfig {
    /// Logical name; used for the data directory and file names
    pub name: String,
    /// Instrument id as set on the front panel (0-127)
    pub instrument_id: u8,
    /// Instrument model, informational (e.g. "TEI49C")
    #[serde(default, rename = "type")]
    pub model: String,
    /// Instrument serial number, informational
    #[serde(default)]
    pub serial_number: String,
    /// Commands queried by `get_config`, in order
    #[serde(default)]
    pub get_config: Vec<String>,
    /// Commands issued by `set_config`, in order
    #[serde(default)]
    pub set_config: Vec<String>,
    /// Default data query
    #[serde(default = "default_get_data")]
    pub get_data: String,
    /// First line of every data file
    pub data_header: String,
    /// First line of buffer dump files
    #[serde(default)]
    pub dump_header: Option<String>,
    /// Polling cadence in minutes
    #[serde(default = "default_sampling_interval")]
    pub sampling_interval: u32,
    /// Second within the minute at which polls fire
    #[serde(default)]
    pub offset_seconds: u32,
    /// Bin width override in minutes
    #[serde(default)]
    pub reporting_interval: Option<u32>,
    /// Stage finished files as zip archives instead of plain copies
    #[serde(default)]
    pub staging_zip: bool,
    /// `strftime` format used for `set time` during clock sync
    #[serde(default = "default_clock_time_format")]
    pub clock_time_format: String,
    /// Whether the scheduler drives this endpoint
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// How to reach the instrument
    pub transport: TransportConfig,
    /// Calibrator level program
    #[serde(default)]
    pub calibration: Option<CalibrationConfig>,
}

impl EndpointConfig {
    /// Protocol address byte: the C-link protocol sets the high bit on the instrument id.
    pub fn address(&self) -> u8 {
        0x80 | self.instrument_id
    }

    /// Effective bin width in minutes.
    pub fn bin_width(&self, storage: &StorageConfig) -> u32 {
        self.reporting_interval.unwrap_or(storage.reporting_interval)
    }
}

/// Transport selection, tagged by `kind`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum TransportConfig {
    /// RS-232 port
    Serial(SerialConfig),
    /// Instrument with an Ethernet option (one connection per exchange)
    Tcp(TcpConfig),
    /// Canned replies without any hardware
    Simulated(SimulatedConfig),
}

/// Serial port parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerialConfig {
    /// Device path, e.g. "/dev/ttyUSB0" or "COM3"
    pub port: String,
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    #[serde(default = "default_data_bits")]
    pub data_bits: u8,
    #[serde(default)]
    pub parity: Parity,
    #[serde(default = "default_stop_bits")]
    pub stop_bits: u8,
    /// Per-read timeout of the port
    #[serde(default = "default_serial_timeout", with = "humantime_serde")]
    pub timeout: Duration,
    /// Wait after sending before looking for a reply
    #[serde(default = "default_settle", with = "humantime_serde")]
    pub settle: Duration,
    /// Quiet period that ends a reply
    #[serde(default = "default_poll", with = "humantime_serde")]
    pub poll: Duration,
}

/// Parity setting of a serial line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Parity {
    #[default]
    #[serde(alias = "N")]
    None,
    #[serde(alias = "E")]
    Even,
    #[serde(alias = "O")]
    Odd,
}

/// TCP socket parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TcpConfig {
    pub host: String,
    pub port: u16,
    /// Connect and read timeout
    #[serde(default = "default_tcp_timeout", with = "humantime_serde")]
    pub timeout: Duration,
    /// Wait after sending before reading the reply
    #[serde(default = "default_settle", with = "humantime_serde")]
    pub settle: Duration,
}

/// Simulated instrument.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SimulatedConfig {
    /// Echo every command before the reply, like a serial loopback
    #[serde(default)]
    pub echo: bool,
}

/// Calibrator level program: cycle through `levels`, one step every `interval` minutes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalibrationConfig {
    /// Target ozone levels (ppb)
    pub levels: Vec<u32>,
    /// Minutes between level changes
    pub interval: u32,
    /// Second within the minute at which changes fire
    #[serde(default)]
    pub offset_seconds: u32,
}

fn default_app_name() -> String {
    "thermo-daq".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_reporting_interval() -> u32 {
    60
}

fn default_true() -> bool {
    true
}

fn default_get_data() -> String {
    "lrec".to_string()
}

fn default_sampling_interval() -> u32 {
    1
}

fn default_clock_time_format() -> String {
    "%H:%M".to_string()
}

fn default_baud_rate() -> u32 {
    9600
}

fn default_data_bits() -> u8 {
    8
}

fn default_stop_bits() -> u8 {
    1
}

fn default_serial_timeout() -> Duration {
    Duration::from_millis(100)
}

fn default_settle() -> Duration {
    Duration::from_millis(500)
}

fn default_poll() -> Duration {
    Duration::from_millis(100)
}

fn default_tcp_timeout() -> Duration {
    Duration::from_secs(5)
}

impl Settings {
    /// Load, expand and validate the configuration at `path`, with environment overrides.
    pub fn load<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let settings: Settings = Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("THERMO_DAQ_").split("__"))
            .extract()?;
        settings.finish()
    }

    /// Parse a TOML document without consulting the environment.
    pub fn from_toml_str(toml: &str) -> AppResult<Self> {
        let settings: Settings = Figment::from(Toml::string(toml)).extract()?;
        settings.finish()
    }

    fn finish(mut self) -> AppResult<Self> {
        self.expand_paths();
        self.validate()?;
        Ok(self)
    }

    fn expand_paths(&mut self) {
        self.paths.data = expand_home(&self.paths.data);
        self.paths.logs = self.paths.logs.as_deref().map(expand_home);
        self.paths.staging = self.paths.staging.as_deref().map(expand_home);
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> AppResult<()> {
        let invalid = |msg: String| Err(DaqError::Configuration(msg));

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.to_lowercase().as_str()) {
            return invalid(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            ));
        }

        let paths = [
            ("data", Some(&self.paths.data)),
            ("logs", self.paths.logs.as_ref()),
            ("staging", self.paths.staging.as_ref()),
        ];
        for (key, path) in paths {
            if let Some(path) = path {
                if let Err(msg) = validation::is_valid_path(&path.to_string_lossy()) {
                    return invalid(format!("paths.{key}: {msg}"));
                }
            }
        }

        BinWidth::new(self.storage.reporting_interval)?;

        let mut names = HashSet::new();
        for endpoint in &self.endpoints {
            let name = &endpoint.name;
            if let Err(msg) = validation::is_valid_file_stem(name) {
                return invalid(format!("Endpoint name '{name}': {msg}"));
            }
            if !names.insert(name.as_str()) {
                return invalid(format!("Duplicate endpoint name: {name}"));
            }
            if validation::is_in_range(endpoint.instrument_id, 0..=127).is_err() {
                return invalid(format!(
                    "{name}: instrument_id {} must be 0-127",
                    endpoint.instrument_id
                ));
            }
            if let Some(width) = endpoint.reporting_interval {
                BinWidth::new(width)?;
            }
            if validation::is_not_empty(&endpoint.get_data).is_err() {
                return invalid(format!("{name}: get_data cannot be empty"));
            }
            if endpoint.sampling_interval == 0 {
                return invalid(format!("{name}: sampling_interval must be at least 1 minute"));
            }
            if endpoint.offset_seconds >= 60 {
                return invalid(format!("{name}: offset_seconds must be below 60"));
            }
            if StrftimeItems::new(&endpoint.clock_time_format).any(|item| item == Item::Error) {
                return invalid(format!(
                    "{name}: clock_time_format '{}' is not a valid strftime format",
                    endpoint.clock_time_format
                ));
            }
            match &endpoint.transport {
                TransportConfig::Serial(serial) => {
                    if let Err(msg) = validation::is_not_empty(&serial.port) {
                        return invalid(format!("{name}: serial port: {msg}"));
                    }
                    if validation::is_in_range(serial.data_bits, 5..=8).is_err() {
                        return invalid(format!("{name}: data_bits must be 5-8"));
                    }
                    if validation::is_in_range(serial.stop_bits, 1..=2).is_err() {
                        return invalid(format!("{name}: stop_bits must be 1 or 2"));
                    }
                    if serial.timeout.is_zero() {
                        return invalid(format!("{name}: serial timeout must be above zero"));
                    }
                }
                TransportConfig::Tcp(tcp) => {
                    if let Err(msg) = validation::is_not_empty(&tcp.host) {
                        return invalid(format!("{name}: tcp host: {msg}"));
                    }
                    if let Err(msg) = validation::is_valid_port(tcp.port) {
                        return invalid(format!("{name}: {msg}"));
                    }
                    if tcp.timeout.is_zero() {
                        return invalid(format!("{name}: tcp timeout must be above zero"));
                    }
                }
                TransportConfig::Simulated(_) => {}
            }
            if let Some(calibration) = &endpoint.calibration {
                if calibration.levels.is_empty() {
                    return invalid(format!("{name}: calibration.levels cannot be empty"));
                }
                if calibration.interval == 0 {
                    return invalid(format!("{name}: calibration.interval must be at least 1 minute"));
                }
                if calibration.offset_seconds >= 60 {
                    return invalid(format!("{name}: calibration.offset_seconds must be below 60"));
                }
            }
        }

        Ok(())
    }

    /// The effective configuration, env overrides and `~` expansion applied, as TOML.
    pub fn to_toml_string(&self) -> AppResult<String> {
        toml::to_string_pretty(self).map_err(|e| DaqError::Configuration(e.to_string()))
    }

    /// Look up an endpoint by name.
    pub fn endpoint(&self, name: &str) -> AppResult<&EndpointConfig> {
        self.endpoints
            .iter()
            .find(|endpoint| endpoint.name == name)
            .ok_or_else(|| DaqError::UnknownEndpoint(name.to_string()))
    }

    /// Get all enabled endpoints
    pub fn enabled_endpoints(&self) -> impl Iterator<Item = &EndpointConfig> {
        self.endpoints.iter().filter(|endpoint| endpoint.enabled)
    }
}

/// Replace a leading `~` with the home directory, leaving other paths untouched.
pub fn expand_home(path: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => match dirs::home_dir() {
            Some(home) => home.join(rest),
            None => path.to_path_buf(),
        },
        Err(_) => path.to_path_buf(),
    }
}
