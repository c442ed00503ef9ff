//! Structured, tag-aware logging for the interval pool
//!
//! This module provides the logging API used by every pool component:
//! - Standard log levels (Error/Warning/Info/Debug/Verbose)
//! - Per-component debug control via `LogTag`
//! - Colored console output plus optional plain-text file persistence
//!
//! ## Usage
//!
//! ```rust,ignore
//! use interval_pool::logger::{self, LogTag};
//!
//! logger::error(LogTag::Persist, "Failed to write pool state");
//! logger::warning(LogTag::Gc, "Cache over ceiling, all groups protected");
//! logger::info(LogTag::Pool, "Fetched 96 intervals");
//! logger::debug(LogTag::Gaps, "Gap 2025-11-01T00:00:00 -> ..."); // Only if debug enabled for Gaps
//! logger::verbose(LogTag::Index, "Index rebuilt"); // Only if verbose
//! ```
//!
//! ## Initialization
//!
//! Hosts either call [`init`] (reads `--debug-<tag>` style flags from the
//! process arguments) or build a [`LoggerConfig`] and pass it to
//! [`set_logger_config`]. Without either, Info and above go to the console.

mod config;
mod core;
mod file;
mod format;
mod levels;
mod tags;

pub use config::{
    get_logger_config, init_from_args, set_logger_config, update_logger_config, LoggerConfig,
};
pub use levels::LogLevel;
pub use tags::LogTag;

/// Initialize the logger from command-line arguments and open the log file, if configured.
pub fn init() {
    config::init_from_args();
    file::init_file_logging();
}

/// Apply a configuration and (re)open the log file it names.
pub fn init_with_config(config: LoggerConfig) {
    set_logger_config(config);
    file::init_file_logging();
}

/// Log at ERROR level (always shown)
pub fn error(tag: LogTag, message: &str) {
    core::log_internal(tag, LogLevel::Error, message);
}

/// Log at WARNING level (shown unless the minimum level is Error)
pub fn warning(tag: LogTag, message: &str) {
    core::log_internal(tag, LogLevel::Warning, message);
}

/// Log at INFO level (standard operations)
pub fn info(tag: LogTag, message: &str) {
    core::log_internal(tag, LogLevel::Info, message);
}

/// Log at DEBUG level
///
/// Only shown when debug output is enabled for `tag`.
pub fn debug(tag: LogTag, message: &str) {
    core::log_internal(tag, LogLevel::Debug, message);
}

/// Log at VERBOSE level
///
/// Only shown with global verbose or verbose enabled for `tag`.
pub fn verbose(tag: LogTag, message: &str) {
    core::log_internal(tag, LogLevel::Verbose, message);
}

/// Force flush all pending log file writes
pub fn flush() {
    file::flush_file_logging();
}
