// Configuration management module
// TOML configuration for the embedding model and search defaults

pub mod settings;


pub use settings::{Config, ConfigError, OllamaConfig, SearchConfig};

/// Get the default configuration directory path
#[inline]
pub fn get_config_dir() -> Result<std::path::PathBuf, ConfigError> {
    Config::default_dir()
}
