//! Error taxonomy for the storage engine.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Errors produced by storage operations.
///
/// Messages are diagnostic only; boundary layers map the variant to their
/// own user-facing text.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The path would resolve outside the storage root.
    #[error("path escapes storage root: {0}")]
    PathEscape(String),

    /// Nothing exists at the path.
    #[error("path does not exist: {0}")]
    NotFound(String),

    /// Something already exists at the path.
    #[error("path already exists: {0}")]
    AlreadyExists(String),

    /// The storage medium refused access, or the operation is not allowed.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// A name is empty, `.`/`..`, or contains a separator.
    #[error("invalid name: {0:?}")]
    InvalidName(String),

    /// The path exists but is not a directory.
    #[error("path is not a directory: {0}")]
    NotADirectory(String),

    /// The path exists but is not a regular file.
    #[error("path is not a file: {0}")]
    NotAFile(String),

    /// An upload batch contained nothing usable.
    #[error("no valid files in upload")]
    NoValidFiles,

    /// An upload item exceeded the configured size limit.
    #[error("file too large: exceeds limit of {limit} bytes")]
    FileTooLarge {
        /// Configured per-item limit.
        limit: u64,
    },

    /// A download offset past the end of the file.
    #[error("invalid offset {offset} for file of size {size}")]
    InvalidOffset {
        /// Requested offset.
        offset: u64,
        /// Current file size.
        size: u64,
    },

    /// The identity has no provisioned storage root.
    #[error("unknown identity: {0}")]
    UnknownIdentity(String),

    /// Generic storage medium failure.
    ///
    /// The message names the caller-facing path; the absolute path is kept
    /// for server-side logging only.
    #[error("I/O error on {display}: {source}")]
    Io {
        /// Caller-facing form of the path.
        display: String,
        /// Absolute path being operated on.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: io::Error,
    },
}

impl StorageError {
    /// Classify an I/O error raised while touching `path`.
    ///
    /// `display` is the caller-facing (relative) form of the path.
    pub fn from_io(err: io::Error, path: impl Into<PathBuf>, display: &str) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => StorageError::NotFound(display.to_string()),
            io::ErrorKind::AlreadyExists => StorageError::AlreadyExists(display.to_string()),
            io::ErrorKind::PermissionDenied => StorageError::PermissionDenied(display.to_string()),
            _ => StorageError::Io {
                display: display.to_string(),
                path: path.into(),
                source: err,
            },
        }
    }

    /// Whether this failure is a sandbox violation.
    pub fn is_escape(&self) -> bool {
        matches!(self, StorageError::PathEscape(_))
    }
}

/// Result alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_io_maps_kinds() {
        let err = StorageError::from_io(
            io::Error::new(io::ErrorKind::NotFound, "gone"),
            "/srv/a",
            "a",
        );
        assert!(matches!(err, StorageError::NotFound(ref p) if p == "a"));

        let err = StorageError::from_io(
            io::Error::new(io::ErrorKind::PermissionDenied, "no"),
            "/srv/a",
            "a",
        );
        assert!(matches!(err, StorageError::PermissionDenied(_)));

        let err = StorageError::from_io(io::Error::other("disk on fire"), "/srv/a", "a");
        assert!(matches!(err, StorageError::Io { .. }));
    }

    #[test]
    fn test_io_display_hides_absolute_path() {
        let err = StorageError::from_io(
            io::Error::other("disk on fire"),
            "/srv/vault/alice/Documents/a.txt",
            "Documents/a.txt",
        );
        assert_eq!(err.to_string(), "I/O error on Documents/a.txt: disk on fire");
        assert!(!err.to_string().contains("/srv/vault"));
    }

    #[test]
    fn test_display() {
        assert_eq!(
            StorageError::PathEscape("../etc".to_string()).to_string(),
            "path escapes storage root: ../etc"
        );
        assert_eq!(
            StorageError::FileTooLarge { limit: 10 }.to_string(),
            "file too large: exceeds limit of 10 bytes"
        );
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync + 'static>() {}
        assert_send_sync::<StorageError>();
    }
}
