/// Configuration schemas - all config structures defined once with defaults
///
/// Each struct is defined using the `config_struct!` macro which provides
/// embedded defaults and serde support.
use crate::config_struct;
use crate::logger::{LogLevel, LogTag, LoggerConfig};
use std::path::PathBuf;
use std::time::Duration;

// ============================================================================
// POOL CONFIGURATION
// ============================================================================

config_struct! {
    /// Interval pool behavior
    pub struct PoolConfig {
        /// Ceiling on cached intervals after GC (protected data may exceed it)
        max_cached_intervals: usize = 960,

        /// Quiet period before a change is persisted
        save_debounce_ms: u64 = 10_000,

        /// Slack absorbed by gap detection before a hole counts as a gap
        gap_tolerance_secs: i64 = 1,

        /// Protected range: days before today's midnight (inclusive)
        protected_days_before: i64 = 2,

        /// Protected range: days after today's midnight (exclusive end)
        protected_days_after: i64 = 2,

        /// Recent endpoint covers everything from real today's midnight minus this many days
        recent_window_days_back: i64 = 2,
    }
}

impl PoolConfig {
    pub fn save_debounce(&self) -> Duration {
        Duration::from_millis(self.save_debounce_ms)
    }

    pub fn gap_tolerance(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.gap_tolerance_secs.max(0))
    }

    /// Reject settings the pool cannot run with
    pub fn validate(&self) -> Result<(), String> {
        if self.max_cached_intervals == 0 {
            return Err("pool.max_cached_intervals must be greater than zero".to_string());
        }
        if self.protected_days_before < 0 || self.protected_days_after < 0 {
            return Err("pool.protected_days_* must not be negative".to_string());
        }
        if self.protected_days_before + self.protected_days_after == 0 {
            return Err("pool protected range must cover at least one day".to_string());
        }
        if self.recent_window_days_back < 0 {
            return Err("pool.recent_window_days_back must not be negative".to_string());
        }
        Ok(())
    }
}

// ============================================================================
// STORAGE CONFIGURATION
// ============================================================================

config_struct! {
    /// File-backed state store
    pub struct StorageConfig {
        /// Directory holding one state file per subject
        state_dir: String = "data/interval_pool".to_string(),

        /// File name prefix, followed by the sanitized subject id
        file_prefix: String = "interval_pool".to_string(),
    }
}

impl StorageConfig {
    pub fn state_dir_path(&self) -> PathBuf {
        PathBuf::from(&self.state_dir)
    }
}

// ============================================================================
// LOGGING CONFIGURATION
// ============================================================================

config_struct! {
    /// Logger settings
    pub struct LoggingConfig {
        min_level: String = "info".to_string(),
        debug_tags: Vec<String> = Vec::new(),
        console: bool = true,
        file_path: Option<String> = None,
    }
}

impl LoggingConfig {
    pub fn to_logger_config(&self) -> LoggerConfig {
        let mut config = LoggerConfig {
            min_level: LogLevel::from_str(&self.min_level).unwrap_or(LogLevel::Info),
            console: self.console,
            file_path: self.file_path.as_ref().map(PathBuf::from),
            ..Default::default()
        };

        for key in &self.debug_tags {
            if LogTag::from_debug_key(key).is_some() {
                config.debug_tags.insert(key.trim().to_lowercase());
            }
        }

        config
    }
}

// ============================================================================
// ROOT CONFIGURATION
// ============================================================================

config_struct! {
    /// Complete configuration file layout
    pub struct Config {
        pool: PoolConfig = PoolConfig::default(),
        storage: StorageConfig = StorageConfig::default(),
        logging: LoggingConfig = LoggingConfig::default(),
    }
}
