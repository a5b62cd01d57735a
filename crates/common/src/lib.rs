use thiserror::Error;

pub mod api;
pub mod env;
pub mod utils;

/// Version of the Rollar core, shared by every crate that reports it.
pub const ROLLAR_VERSION: &str = concat!("v", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("network error: {0}")]
    Network(String),
    #[error("unexpected status {status} from {url}")]
    Status { url: String, status: u16 },
    #[error("parse error: {0}")]
    Parse(String),
}
