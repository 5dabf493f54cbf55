use std::{fs, path::Path};

use lisp::{Config, ConfigError, Settings};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("Error while reading TOML config file: {0}")]
    Read(#[from] std::io::Error),

    #[error("Error while deserializing TOML: {0}")]
    Deserialize(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(#[from] ConfigError),
}

/// Read, deserialize and validate the daemon configuration. Any failure
/// keeps the daemon from starting.
pub fn load(path: &Path) -> Result<Settings, LoadError> {
    let s = fs::read_to_string(path)?;
    let config: Config = toml::from_str(&s)?;
    Ok(config.build()?)
}
