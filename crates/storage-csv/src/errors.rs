//! Storage-specific error types for CSV partitions.
//!
//! These errors wrap `csv` and I/O failures and are converted to the
//! backend-agnostic errors defined in `perpflow_core` before leaving the
//! crate.

use perpflow_core::errors::{Error, StorageError as CoreStorageError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Corrupt partition {path}: {message}")]
    Corrupt { path: String, message: String },

    #[error("Invalid catalog: {0}")]
    InvalidCatalog(String),
}

impl From<StorageError> for Error {
    fn from(err: StorageError) -> Self {
        let storage = match err {
            StorageError::Io(e) => CoreStorageError::Io(e.to_string()),
            StorageError::Csv(e) => CoreStorageError::Csv(e.to_string()),
            StorageError::Corrupt { path, message } => CoreStorageError::Corrupt { path, message },
            StorageError::InvalidCatalog(message) => CoreStorageError::InvalidCatalog(message),
        };
        Error::Storage(storage)
    }
}
