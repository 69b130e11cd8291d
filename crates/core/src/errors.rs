//! Core error types for perpflow.
//!
//! This module defines storage-agnostic error types. Backend-specific errors
//! (I/O, CSV encoding) are converted to these types by the storage layer.

use perpflow_market_data::errors::{FetchError, ValidationError};
use thiserror::Error;

/// Type alias for Result using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Root error type for the telemetry services.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Storage operation failed: {0}")]
    Storage(#[from] StorageError),

    #[error("Fetch failed: {0}")]
    Fetch(#[from] FetchError),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Input validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("Operation not supported: {0}")]
    Unsupported(String),

    #[error("Unexpected error: {0}")]
    Unexpected(String),
}

/// Backend-agnostic error type for storage operations.
///
/// Details are carried as strings so the storage crate can convert its own
/// error types without this crate depending on them.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(String),

    #[error("Encoding error: {0}")]
    Csv(String),

    #[error("Corrupt partition {path}: {message}")]
    Corrupt { path: String, message: String },

    #[error("Invalid catalog: {0}")]
    InvalidCatalog(String),
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        StorageError::Io(err.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Storage(err.into())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Unexpected(format!("JSON error: {}", err))
    }
}
