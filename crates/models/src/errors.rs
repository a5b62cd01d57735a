use thiserror::Error;

/// Bad or incomplete backend description. Fatal at startup.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigurationError {
    #[error("unsupported database type '{0}'")]
    UnsupportedBackend(String),
    #[error("database.{field} is required for {kind} (need user, pass and host)")]
    MissingField { kind: &'static str, field: &'static str },
    #[error("invalid database path '{0}'")]
    InvalidPath(String),
    #[error("invalid connection url: {0}")]
    InvalidUrl(String),
}
