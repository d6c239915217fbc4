//! # Logging Utilities
//!
//! Logging infrastructure for xcoffdb using `tracing`.
//!
//! The core library only emits events; it never installs a subscriber. That is
//! the job of whichever binary links it, through one of the functions here:
//!
//! - Pretty (human) or JSON output
//! - `RUST_LOG` filtering, including per-crate filters such as
//!   `RUST_LOG=xcoffdb_core=debug`
//! - Optional mirroring into a daily rolling log file
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use xcoffdb_utils::init_logging;
//!
//! init_logging().expect("Failed to initialize logging");
//! tracing::info!("Session started");
//! ```
//!
//! ## Environment Variables
//!
//! - `RUST_LOG`: log level filter (e.g. `debug`, `xcoffdb_core::vmap=trace`)
//! - `XCOFFDB_LOG_FORMAT`: `json` or `pretty` (default: `pretty`)
//! - `XCOFFDB_LOG_FILE`: optional path of a log file to write alongside stdout

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::{env, io};

use chrono::Utc;
use tracing::Level;
use tracing_subscriber::fmt::time::ChronoUtc;
use tracing_subscriber::fmt::{self};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

/// Environment variable selecting the output format.
pub const LOG_FORMAT_VAR: &str = "XCOFFDB_LOG_FORMAT";

/// Environment variable naming an additional log file.
pub const LOG_FILE_VAR: &str = "XCOFFDB_LOG_FILE";

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat
{
    /// Pretty-printed, human-readable format (default)
    Pretty,
    /// JSON format, one event per line
    Json,
}

impl FromStr for LogFormat
{
    type Err = LoggingError;

    fn from_str(s: &str) -> Result<Self, Self::Err>
    {
        match s.to_lowercase().as_str() {
            "pretty" | "dev" | "human" => Ok(LogFormat::Pretty),
            "json" | "prod" => Ok(LogFormat::Json),
            _ => Err(LoggingError::InvalidFormat(s.to_string())),
        }
    }
}

/// Log level
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel
{
    Error,
    Warn,
    /// Default level
    Info,
    Debug,
    /// Most verbose; includes every register transfer
    Trace,
}

impl From<LogLevel> for Level
{
    fn from(level: LogLevel) -> Self
    {
        match level {
            LogLevel::Error => Level::ERROR,
            LogLevel::Warn => Level::WARN,
            LogLevel::Info => Level::INFO,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Trace => Level::TRACE,
        }
    }
}

impl FromStr for LogLevel
{
    type Err = LoggingError;

    fn from_str(s: &str) -> Result<Self, Self::Err>
    {
        match s.to_lowercase().as_str() {
            "error" | "err" => Ok(LogLevel::Error),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "info" => Ok(LogLevel::Info),
            "debug" | "dbg" => Ok(LogLevel::Debug),
            "trace" => Ok(LogLevel::Trace),
            _ => Err(LoggingError::InvalidLevel(s.to_string())),
        }
    }
}

/// Initialize logging from the environment.
///
/// Reads `RUST_LOG`, `XCOFFDB_LOG_FORMAT` and `XCOFFDB_LOG_FILE`. Unknown
/// format or level strings fall back to pretty output at `INFO`.
///
/// ## Errors
///
/// Returns an error if a global subscriber is already installed.
pub fn init_logging() -> Result<(), LoggingError>
{
    let format = env::var(LOG_FORMAT_VAR)
        .ok()
        .and_then(|s| LogFormat::from_str(&s).ok())
        .unwrap_or(LogFormat::Pretty);

    let default_level = env::var("RUST_LOG")
        .ok()
        .and_then(|s| s.parse::<LogLevel>().ok())
        .map_or(Level::INFO, Into::into);

    let log_file = env::var(LOG_FILE_VAR).ok().map(PathBuf::from);
    init_logging_internal(format, default_level, log_file.as_deref(), true)
}

/// Initialize logging with an explicit level and format, console only.
///
/// ## Errors
///
/// Returns an error if a global subscriber is already installed.
pub fn init_logging_with_level(level: LogLevel, format: LogFormat) -> Result<(), LoggingError>
{
    init_logging_internal(format, level.into(), None, true)
}

/// Initialize logging into a dated file only, without touching stdout.
///
/// Used when the binary's stdout carries machine-readable output. The file
/// is created in `dir` as `YYYY-MM-DD-xcoffdb.log`; its path is returned.
///
/// ## Errors
///
/// Returns an error if the directory cannot be created or a global
/// subscriber is already installed.
pub fn init_logging_to_file(dir: &Path, level: Option<LogLevel>, format: LogFormat) -> Result<PathBuf, LoggingError>
{
    std::fs::create_dir_all(dir)?;
    let today = Utc::now().format("%Y-%m-%d");
    let log_file = dir.join(format!("{today}-xcoffdb.log"));

    let level = level.map_or(Level::INFO, Into::into);
    init_logging_internal(format, level, Some(&log_file), false)?;
    Ok(log_file)
}

fn build_filter(default_level: Level) -> EnvFilter
{
    // RUST_LOG can override the default level with more specific filters
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level.to_string()))
}

fn file_writer(path: &Path) -> tracing_appender::non_blocking::NonBlocking
{
    let file_appender = tracing_appender::rolling::daily(
        path.parent().unwrap_or_else(|| Path::new(".")),
        path.file_name().unwrap_or_default(),
    );
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    // The writer must outlive every span; the process owns it until exit.
    std::mem::forget(guard);
    non_blocking
}

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// One output layer; every layer gets its own filter built from `RUST_LOG`.
fn output_layer<W>(format: LogFormat, writer: W, ansi: bool, default_level: Level) -> BoxedLayer
where
    W: for<'w> fmt::MakeWriter<'w> + Send + Sync + 'static,
{
    let layer = fmt::layer()
        .with_writer(writer)
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .with_timer(ChronoUtc::rfc_3339());

    match format {
        LogFormat::Pretty => layer.with_ansi(ansi).with_filter(build_filter(default_level)).boxed(),
        LogFormat::Json => layer
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_filter(build_filter(default_level))
            .boxed(),
    }
}

fn init_logging_internal(format: LogFormat, default_level: Level, log_file: Option<&Path>, console: bool) -> Result<(), LoggingError>
{
    let mut layers: Vec<BoxedLayer> = Vec::with_capacity(2);
    if console {
        layers.push(output_layer(format, io::stdout, true, default_level));
    }
    if let Some(path) = log_file {
        // No ANSI in files
        layers.push(output_layer(format, file_writer(path), false, default_level));
    }

    Registry::default()
        .with(layers)
        .try_init()
        .map_err(|err| LoggingError::InitializationFailed(err.to_string()))
}

/// Logging initialization error
#[derive(Debug, thiserror::Error)]
pub enum LoggingError
{
    /// Invalid log format
    #[error("Invalid log format: {0}. Use 'pretty' or 'json'")]
    InvalidFormat(String),

    /// Invalid log level
    #[error("Invalid log level: {0}. Use 'error', 'warn', 'info', 'debug', or 'trace'")]
    InvalidLevel(String),

    /// A global subscriber was already installed
    #[error("Failed to initialize logging: {0}")]
    InitializationFailed(String),

    /// File logging error
    #[error("File logging error: {0}")]
    FileError(#[from] io::Error),
}
