use thiserror::Error;

use models::errors::ConfigurationError;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigurationError),
    #[error("connection error: {0}")]
    Connection(String),
    #[error("persistence error: {0}")]
    Persistence(String),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("runtime error: {0}")]
    Runtime(String),
}

impl ServiceError {
    pub fn persistence(e: impl std::fmt::Display) -> Self { Self::Persistence(e.to_string()) }
}
