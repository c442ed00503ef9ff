/// Configuration for the interval pool
///
/// - `macros`: the `config_struct!` macro (struct + defaults in one place)
/// - `schemas`: every configuration section
/// - `utils`: TOML loading and validation
#[macro_use]
pub mod macros;
pub mod schemas;
pub mod utils;

pub use schemas::{Config, LoggingConfig, PoolConfig, StorageConfig};
pub use utils::{config_to_toml, load_config, load_config_from_path, load_config_from_str};
