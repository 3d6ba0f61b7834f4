//! Error types for Stemdrop core

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur in Stemdrop core
#[derive(Debug, Error)]
pub enum StemdropError {
    #[error("Ledger storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("Ledger write failed: {0}")]
    WriteFailure(String),

    #[error("No download record for token {0}")]
    RecordNotFound(String),

    #[error("Source not found: {}", .0.display())]
    SourceNotFound(PathBuf),

    #[error("Packaging failed: {0}")]
    PackagingFailure(String),

    #[error("Archive missing from disk: {}", .0.display())]
    ArchiveMissing(PathBuf),

    #[error("Delivery failed: {0}")]
    DeliveryFailure(String),

    #[error("Cleanup failed for {}: {}", .path.display(), .message)]
    CleanupFailure { path: PathBuf, message: String },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Separation failed: {0}")]
    Separation(String),

    #[error("Audio fetch failed: {0}")]
    Fetch(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl StemdropError {
    /// Errors caused by the request rather than the service
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            StemdropError::RecordNotFound(_)
                | StemdropError::SourceNotFound(_)
                | StemdropError::InvalidInput(_)
                | StemdropError::InvalidUrl(_)
        )
    }

    /// Classify an sqlx error raised while reading the ledger
    pub(crate) fn from_read(err: sqlx::Error) -> Self {
        StemdropError::StorageUnavailable(err.to_string())
    }

    /// Classify an sqlx error raised while mutating the ledger.
    ///
    /// Connection-level faults mean the store could not be reached at all;
    /// everything else is a rejected or lost write.
    pub(crate) fn from_write(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Io(_)
            | sqlx::Error::Configuration(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed => StemdropError::StorageUnavailable(err.to_string()),
            other => StemdropError::WriteFailure(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, StemdropError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_classification() {
        assert!(matches!(
            StemdropError::from_write(sqlx::Error::PoolClosed),
            StemdropError::StorageUnavailable(_)
        ));
        assert!(matches!(
            StemdropError::from_write(sqlx::Error::RowNotFound),
            StemdropError::WriteFailure(_)
        ));
        assert!(matches!(
            StemdropError::from_read(sqlx::Error::RowNotFound),
            StemdropError::StorageUnavailable(_)
        ));
    }

    #[test]
    fn test_client_errors() {
        assert!(StemdropError::InvalidUrl("x".into()).is_client_error());
        assert!(!StemdropError::WriteFailure("x".into()).is_client_error());
        assert!(!StemdropError::ArchiveMissing(PathBuf::from("a.zip")).is_client_error());
    }
}
