// Allow unused assignments for diagnostic fields - they're used by the macros
#![allow(unused_assignments)]

use miette::Diagnostic;
use thiserror::Error;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors from the queue and configuration store
#[derive(Error, Debug, Diagnostic)]
pub enum StorageError {
    /// The data file could not be opened or created
    #[error("Cannot open store at {location}: {message}")]
    #[diagnostic(
        code(storage::open_failed),
        help("Check --data-dir points at a writable path and that no other scheduler holds the file")
    )]
    OpenFailed {
        location: String,
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    /// A read or write against the state table failed
    #[error("Store {operation} failed: {message}")]
    #[diagnostic(
        code(storage::operation_failed),
        help("The data file may be damaged; restore it from a backup or re-import the bootstrap file")
    )]
    OperationFailed {
        operation: String,
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    /// A write transaction could not begin or commit
    #[error("Store transaction failed: {message}")]
    #[diagnostic(
        code(storage::transaction_failed),
        help("Nothing was written; the queue change can be retried")
    )]
    TransactionFailed { message: String },
}

/// Result type for storage operations
pub type Result<T> = std::result::Result<T, StorageError>;

impl StorageError {
    pub fn open_failed(
        location: impl Into<String>,
        err: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::OpenFailed {
            location: location.into(),
            message: err.to_string(),
            source: Some(Box::new(err)),
        }
    }

    pub fn operation_failed(
        operation: impl Into<String>,
        err: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::OperationFailed {
            operation: operation.into(),
            message: err.to_string(),
            source: Some(Box::new(err)),
        }
    }

    pub fn transaction_failed(message: impl Into<String>) -> Self {
        Self::TransactionFailed {
            message: message.into(),
        }
    }
}

impl From<redb::TransactionError> for StorageError {
    fn from(err: redb::TransactionError) -> Self {
        StorageError::transaction_failed(format!("begin: {}", err))
    }
}

impl From<redb::CommitError> for StorageError {
    fn from(err: redb::CommitError) -> Self {
        StorageError::transaction_failed(format!("commit: {}", err))
    }
}

impl From<redb::TableError> for StorageError {
    fn from(err: redb::TableError) -> Self {
        StorageError::operation_failed("open table", err)
    }
}

impl From<redb::StorageError> for StorageError {
    fn from(err: redb::StorageError) -> Self {
        StorageError::operation_failed("access", err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_failed_keeps_source() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err = StorageError::open_failed("/data/jobmesh.redb", io);

        assert_eq!(err.to_string(), "Cannot open store at /data/jobmesh.redb: denied");
        assert!(std::error::Error::source(&err).is_some());
    }
}
