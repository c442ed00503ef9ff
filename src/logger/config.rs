/// Logger configuration and global access
///
/// The configuration lives in a process-wide `RwLock` so that every component
/// can log without threading a handle around. Reads take a cheap clone.
use super::levels::LogLevel;
use super::tags::LogTag;
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use std::collections::HashSet;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct LoggerConfig {
    /// Messages above this level are dropped (Error is always kept)
    pub min_level: LogLevel,
    /// Tags with debug output enabled (debug keys, e.g. "gc")
    pub debug_tags: HashSet<String>,
    /// Tags with verbose output enabled
    pub verbose_tags: HashSet<String>,
    /// When non-empty, only these tags are shown below Error
    pub enabled_tags: HashSet<String>,
    /// Print to stdout
    pub console: bool,
    /// Append plain-text lines to this file
    pub file_path: Option<PathBuf>,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            min_level: LogLevel::Info,
            debug_tags: HashSet::new(),
            verbose_tags: HashSet::new(),
            enabled_tags: HashSet::new(),
            console: true,
            file_path: None,
        }
    }
}

static LOGGER_CONFIG: Lazy<RwLock<LoggerConfig>> =
    Lazy::new(|| RwLock::new(LoggerConfig::default()));

pub fn get_logger_config() -> LoggerConfig {
    LOGGER_CONFIG.read().clone()
}

pub fn set_logger_config(config: LoggerConfig) {
    *LOGGER_CONFIG.write() = config;
}

pub fn update_logger_config<F>(update: F)
where
    F: FnOnce(&mut LoggerConfig),
{
    let mut guard = LOGGER_CONFIG.write();
    update(&mut guard);
}

pub fn is_debug_enabled_for_tag(tag: &LogTag) -> bool {
    let config = LOGGER_CONFIG.read();
    config.min_level >= LogLevel::Debug || config.debug_tags.contains(&tag.to_debug_key())
}

pub fn is_verbose_enabled_for_tag(tag: &LogTag) -> bool {
    LOGGER_CONFIG
        .read()
        .verbose_tags
        .contains(&tag.to_debug_key())
}

/// Build configuration from the process arguments
///
/// Recognized flags: `--debug-<tag>`, `--verbose`, `--verbose-<tag>`, `--quiet`,
/// `--log-file=<path>`.
pub fn init_from_args() {
    let args: Vec<String> = std::env::args().collect();
    set_logger_config(config_from_args(&args));
}

pub(crate) fn config_from_args(args: &[String]) -> LoggerConfig {
    let mut config = LoggerConfig::default();

    for arg in args {
        if arg == "--verbose" {
            config.min_level = LogLevel::Verbose;
        } else if arg == "--quiet" {
            config.min_level = LogLevel::Warning;
        } else if let Some(key) = arg.strip_prefix("--debug-") {
            if LogTag::from_debug_key(key).is_some() {
                config.debug_tags.insert(key.to_lowercase());
            }
        } else if let Some(key) = arg.strip_prefix("--verbose-") {
            if LogTag::from_debug_key(key).is_some() {
                config.verbose_tags.insert(key.to_lowercase());
                config.debug_tags.insert(key.to_lowercase());
            }
        } else if let Some(path) = arg.strip_prefix("--log-file=") {
            config.file_path = Some(PathBuf::from(path));
        }
    }

    config
}
