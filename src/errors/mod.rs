//! Centralized error handling module
//!
//! Structured, typed errors for the daemon and client library. Binaries wrap
//! these in `anyhow::Error` at the top level.

pub mod types;
pub mod context;

pub use types::{AppError, AppResult};
pub use context::ErrorContextExt;

/// Convert from anyhow::Error to AppError at library boundaries
impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Other {
            message: err.to_string(),
            source: None,
        }
    }
}
