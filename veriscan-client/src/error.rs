//! Error types for the VERISCAN binary.

use crate::cache::CacheError;
use crate::config::ConfigError;
use crate::persistence::PersistenceError;
use veriscan_core::ApiError;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error("Invalid argument: {0}")]
    Usage(String),
    #[error("Logging setup failed: {0}")]
    Logging(String),
}
