//! # xcoffdb Utilities
//!
//! Shared helpers for the xcoffdb workspace.
//!
//! For now this is the logging setup: every crate logs through `tracing`, and
//! binaries call [`init_logging`] once at startup to install a subscriber.

pub mod logging;

// Re-export commonly used logging functions for convenience
pub use logging::{init_logging, init_logging_to_file, init_logging_with_level, LogFormat, LogLevel, LoggingError};
pub use tracing::{debug, error, info, trace, warn};
