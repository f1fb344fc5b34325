//! Process-wide tracing setup.
//!
//! Components only emit `tracing` events; this module installs the subscriber once,
//! at start-up. It provides:
//! - Environment-based filtering (`RUST_LOG` overrides the configured level)
//! - Pretty, compact or JSON console output
//! - An optional plain-text copy of every event in `{logs}/{YYYYMMDD}.log`, moving on
//!   to a new file when the local date changes
//!
//! # Example
//! ```no_run
//! use thermo_daq::{config::Settings, logging};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let settings = Settings::load("config/thermo.toml")?;
//! logging::init_from_settings(&settings)?;
//! tracing::info!("Application started");
//! # Ok(())
//! # }
//! ```

use crate::config::Settings;
use crate::error::{AppResult, DaqError};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::Level;
use tracing_subscriber::{
    fmt::{self, MakeWriter},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer, Registry,
};

/// Output format for console logging
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Pretty-printed format with colors (for development)
    Pretty,
    /// Single-line format (for production)
    #[default]
    Compact,
    /// JSON format for structured logging (for log aggregation)
    Json,
}

/// Tracing configuration options
#[derive(Debug, Clone)]
pub struct TracingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: Level,
    /// Console output format
    pub format: OutputFormat,
    /// Directory receiving one log file per day
    pub log_dir: Option<PathBuf>,
    /// Whether to enable ANSI colors on the console
    pub with_ansi: bool,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            format: OutputFormat::Compact,
            log_dir: None,
            with_ansi: true,
        }
    }
}

impl TracingConfig {
    /// Create tracing config from the application settings
    pub fn from_settings(settings: &Settings) -> AppResult<Self> {
        Ok(Self {
            level: parse_log_level(&settings.application.log_level)?,
            format: settings.application.log_format,
            log_dir: settings.paths.logs.clone(),
            ..Default::default()
        })
    }

    /// Create tracing config with custom settings
    pub fn new(level: Level) -> Self {
        Self {
            level,
            ..Default::default()
        }
    }

    /// Set output format
    pub fn with_format(mut self, format: OutputFormat) -> Self {
        self.format = format;
        self
    }

    /// Also write events to a daily file in `dir`
    pub fn with_log_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.log_dir = Some(dir.into());
        self
    }

    /// Enable or disable ANSI colors
    pub fn with_ansi(mut self, enabled: bool) -> Self {
        self.with_ansi = enabled;
        self
    }
}

/// Initialize tracing from the application settings
pub fn init_from_settings(settings: &Settings) -> AppResult<()> {
    init(TracingConfig::from_settings(settings)?)
}

/// Initialize tracing with custom configuration
///
/// Idempotent: if a global subscriber is already installed this returns `Ok(())`,
/// which keeps tests and embedding applications working.
pub fn init(config: TracingConfig) -> AppResult<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.to_string().to_lowercase()));

    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = vec![console_layer(&config)];
    if let Some(dir) = &config.log_dir {
        layers.push(file_layer(dir)?);
    }

    tracing_subscriber::registry()
        .with(layers)
        .with(env_filter)
        .try_init()
        .or_else(|e| {
            if e.to_string().contains("already been set") {
                Ok(())
            } else {
                Err(DaqError::Logging(e.to_string()))
            }
        })
}

fn console_layer(config: &TracingConfig) -> Box<dyn Layer<Registry> + Send + Sync> {
    console_layer_to(config, io::stdout)
}

fn console_layer_to<W>(config: &TracingConfig, writer: W) -> Box<dyn Layer<Registry> + Send + Sync>
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let layer = fmt::layer().with_writer(writer).with_ansi(config.with_ansi);
    match config.format {
        OutputFormat::Pretty => layer.pretty().with_thread_names(true).boxed(),
        OutputFormat::Compact => layer.compact().boxed(),
        OutputFormat::Json => layer.json().boxed(),
    }
}

fn file_layer(dir: &Path) -> AppResult<Box<dyn Layer<Registry> + Send + Sync>> {
    Ok(fmt::layer()
        .with_ansi(false)
        .with_target(true)
        .with_writer(DailyLogFile::new(dir)?)
        .boxed())
}

/// Appends to `{dir}/{YYYYMMDD}.log` for the current local date.
pub struct DailyLogFile {
    dir: PathBuf,
    current: Mutex<(NaiveDate, File)>,
}

impl DailyLogFile {
    /// Create `dir` and open today's file.
    pub fn new(dir: &Path) -> AppResult<Self> {
        fs::create_dir_all(dir).map_err(|e| DaqError::persistence(dir, e))?;
        let today = chrono::Local::now().date_naive();
        let path = daily_log_path(dir, today);
        let file = open_append(&path).map_err(|e| DaqError::persistence(&path, e))?;
        Ok(Self {
            dir: dir.to_path_buf(),
            current: Mutex::new((today, file)),
        })
    }

    fn write_on(&self, day: NaiveDate, buf: &[u8]) -> io::Result<usize> {
        let mut current = self
            .current
            .lock()
            .map_err(|_| io::Error::other("log file lock poisoned"))?;
        if current.0 != day {
            *current = (day, open_append(&daily_log_path(&self.dir, day))?);
        }
        current.1.write(buf)
    }

    fn flush(&self) -> io::Result<()> {
        let mut current = self
            .current
            .lock()
            .map_err(|_| io::Error::other("log file lock poisoned"))?;
        current.1.flush()
    }
}

impl<'a> MakeWriter<'a> for DailyLogFile {
    type Writer = DailyLogWriter<'a>;

    fn make_writer(&'a self) -> Self::Writer {
        DailyLogWriter { log: self }
    }
}

/// Handle given to the fmt layer for one event.
pub struct DailyLogWriter<'a> {
    log: &'a DailyLogFile,
}

impl Write for DailyLogWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.log.write_on(chrono::Local::now().date_naive(), buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.log.flush()
    }
}

fn open_append(path: &Path) -> io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

/// `{dir}/{YYYYMMDD}.log`
pub fn daily_log_path(dir: &Path, day: NaiveDate) -> PathBuf {
    dir.join(format!("{}.log", day.format("%Y%m%d")))
}

/// Parse log level string into tracing Level
fn parse_log_level(level: &str) -> AppResult<Level> {
    match level.to_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        _ => Err(DaqError::Configuration(format!(
            "Invalid log level '{}'. Must be one of: trace, debug, info, warn, error",
            level
        ))),
    }
}
