//! Configuration error types

use thiserror::Error;

/// Errors raised while loading or validating configuration
#[derive(Error, Debug)]
pub enum Error {
    /// A value parsed but failed validation
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("cannot read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("config file is not valid TOML: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Result alias using common Error
pub type Result<T> = std::result::Result<T, Error>;
