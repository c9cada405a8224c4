use std::time::Duration;

/// Errors surfaced by storage backends and the retry layer.
///
/// Only `Transient` is ever retried. Everything else propagates to the caller
/// unchanged, so callers can match on `NotFound` (e.g. when cleaning up files
/// that may already be gone) without inspecting messages.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Transient storage failure: {0}")]
    Transient(String),
    #[error("Object not found: {0}")]
    NotFound(String),
    #[error("Permission denied: {0}")]
    PermissionDenied(String),
    #[error("Storage error: {0}")]
    Permanent(String),
    #[error("Retry budget exceeded after {attempts} attempts in {elapsed:?}")]
    RetryBudgetExceeded {
        attempts: u32,
        elapsed: Duration,
        #[source]
        source: Box<StorageError>,
    },
    #[error("Configuration error: {0}")]
    Configuration(String),
    #[error("Operation cancelled")]
    Cancelled,
}

impl StorageError {
    pub fn is_transient(&self) -> bool {
        matches!(self, StorageError::Transient(_))
    }

    /// Permanent failures are never retried.
    pub fn is_permanent(&self) -> bool {
        !self.is_transient()
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound(_))
    }

    /// The last underlying failure of an exhausted retry, or `self`.
    pub fn root(&self) -> &StorageError {
        match self {
            StorageError::RetryBudgetExceeded { source, .. } => source.root(),
            other => other,
        }
    }
}

impl From<std::io::Error> for StorageError {
    fn from(e: std::io::Error) -> Self {
        use std::io::ErrorKind;
        match e.kind() {
            ErrorKind::NotFound => StorageError::NotFound(e.to_string()),
            ErrorKind::PermissionDenied => StorageError::PermissionDenied(e.to_string()),
            ErrorKind::TimedOut
            | ErrorKind::Interrupted
            | ErrorKind::WouldBlock
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted => StorageError::Transient(e.to_string()),
            _ => StorageError::Permanent(e.to_string()),
        }
    }
}
