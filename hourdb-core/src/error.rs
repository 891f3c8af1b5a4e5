//! Error types for HourDB

use std::path::{Path, PathBuf};
use thiserror::Error;

/// Result type alias for HourDB operations
pub type Result<T> = std::result::Result<T, HourError>;

/// HourDB error types
#[derive(Error, Debug)]
pub enum HourError {
    /// IO operation failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The embedded store reported a failure other than lock contention
    #[error("Storage error in {path:?}: {source}")]
    Storage {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    /// Existing fragment was created with a different layout
    #[error("Schema mismatch in {path:?}: {key} expected {expected}, found {found}")]
    SchemaMismatch {
        path: PathBuf,
        key: String,
        expected: String,
        found: String,
    },

    /// Vector length does not match the month
    #[error("Dimension error for {name}: expected {expected} elements, got {actual}")]
    Dimension {
        name: String,
        expected: usize,
        actual: usize,
    },

    /// Write lock not acquired within the busy timeout
    #[error("Fragment busy: {path:?}")]
    Busy { path: PathBuf },

    /// A stored row could not be decoded
    #[error("Corrupt blob for {name}: {reason}")]
    CorruptBlob { name: String, reason: String },

    /// Stored element type differs from the one required
    #[error("Type mismatch for {name}: expected {expected}, found {found}")]
    DTypeMismatch {
        name: String,
        expected: char,
        found: char,
    },

    /// Month could not be parsed or is not a month boundary
    #[error("Invalid month: {0}")]
    InvalidMonth(String),

    /// Series name is not usable as a key
    #[error("Invalid series name: {0:?}")]
    InvalidName(String),

    /// Write attempted through a read-only handle
    #[error("Fragment opened read-only: {0:?}")]
    ReadOnly(PathBuf),

    /// Fragment used from inside its own write batch on the same thread
    #[error("Fragment {0:?} is locked by a write batch on this thread")]
    Reentrant(PathBuf),

    /// Fragment file does not exist
    #[error("Fragment not found: {0:?}")]
    FragmentNotFound(PathBuf),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Store handle was closed
    #[error("Store is closed")]
    Closed,
}

impl HourError {
    /// Wrap an engine error, mapping lock contention to `Busy`
    pub(crate) fn storage(path: &Path, err: rusqlite::Error) -> Self {
        match err.sqlite_error_code() {
            Some(rusqlite::ErrorCode::DatabaseBusy) | Some(rusqlite::ErrorCode::DatabaseLocked) => {
                HourError::Busy {
                    path: path.to_path_buf(),
                }
            }
            _ => HourError::Storage {
                path: path.to_path_buf(),
                source: err,
            },
        }
    }

    pub(crate) fn corrupt(name: impl Into<String>, reason: impl Into<String>) -> Self {
        HourError::CorruptBlob {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(self, HourError::Busy { .. })
    }

    /// Check if error indicates corruption
    pub fn is_corruption(&self) -> bool {
        matches!(self, HourError::CorruptBlob { .. })
    }
}

/// Attach the fragment path to engine errors
pub(crate) trait StorageContext<T> {
    fn at(self, path: &Path) -> Result<T>;
}

impl<T> StorageContext<T> for std::result::Result<T, rusqlite::Error> {
    fn at(self, path: &Path) -> Result<T> {
        self.map_err(|e| HourError::storage(path, e))
    }
}
