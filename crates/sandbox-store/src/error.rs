//! Error types for sandbox store operations.

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Result type for sandbox store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur while bundling, transferring, assigning or
/// unpacking sandboxes.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Sandbox type outside the closed {Input, Output} set.
    #[error("invalid sandbox type: {value}")]
    InvalidSandboxType { value: String },

    /// Input list rejected as a whole (duplicate names, unnamed paths).
    #[error("invalid sandbox input list: {reason}")]
    InvalidInputCollection { reason: String },

    /// Local path exists but is not something a bundle can carry.
    #[error("unsupported input type for {}: {kind}", path.display())]
    UnsupportedInputType { path: PathBuf, kind: String },

    /// One or more local inputs do not exist. All missing paths are listed.
    #[error("failed to locate files: {}", join_paths(paths))]
    MissingLocalFile { paths: Vec<PathBuf> },

    /// Staging file or directory could not be created.
    #[error("cannot create temporary file: {message}")]
    TempAllocationFailed { message: String },

    /// Compressed bundle is over the caller's limit.
    /// The staging archive is left at `path` and belongs to the caller.
    #[error(
        "size over the limit: {size} bytes > {limit} bytes (bundle kept at {})",
        path.display()
    )]
    SizeLimitExceeded { path: PathBuf, size: u64, limit: u64 },

    /// Writing the archive failed.
    #[error("failed to write sandbox archive: {message}")]
    ArchiveWriteFailed { message: String },

    /// Malformed `SB:<backend>|<physical name>` descriptor.
    #[error("invalid sandbox location '{location}': {reason}")]
    InvalidLocationFormat { location: String, reason: String },

    /// Malformed `Job:<id>` / `Pilot:<id>` key.
    #[error("invalid entity id: {value}")]
    InvalidEntityId { value: String },

    /// Network or remote-side failure. The message is passed through as is.
    #[error("transfer failed: {message}")]
    TransferFailed { message: String },

    /// Entity exists but has no sandbox of the requested type.
    #[error(
        "no {sb_type} sandbox found for {entity}. Possible causes are: no sandbox was \
         registered or you do not have permission to access it"
    )]
    NoSandboxOfType { entity: String, sb_type: String },

    /// Entity has no assignments at all.
    #[error("no sandboxes assigned to {entity}")]
    EntityNotFound { entity: String },

    /// Fetched bundle is corrupt or unreadable.
    #[error("could not open bundle: {message}")]
    ArchiveOpenFailed { message: String },

    /// Metadata database failure (direct access path or service side).
    #[error("metadata error: {message}")]
    Metadata { message: String },

    /// Invalid store specification (URL parsing failed).
    #[error("invalid store spec '{spec}': {reason}")]
    InvalidSpec { spec: String, reason: String },

    /// Configuration could not be loaded.
    #[error("configuration error: {message}")]
    Config { message: String },

    /// Local I/O error.
    #[error("I/O error: {message}")]
    Io { message: String },

    /// Other errors.
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

fn join_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

impl StoreError {
    /// Returns true for errors raised before any side effect took place.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::InvalidSandboxType { .. }
                | Self::InvalidInputCollection { .. }
                | Self::UnsupportedInputType { .. }
                | Self::MissingLocalFile { .. }
                | Self::InvalidLocationFormat { .. }
                | Self::InvalidEntityId { .. }
        )
    }

    /// Returns true if the entity or the requested sandbox type was not found.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::EntityNotFound { .. } | Self::NoSandboxOfType { .. }
        )
    }

    /// Path of the staging archive kept after a failed size check.
    pub fn staging_path(&self) -> Option<&Path> {
        match self {
            Self::SizeLimitExceeded { path, .. } => Some(path),
            _ => None,
        }
    }

    /// Suggested exit code for command line callers.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::EntityNotFound { .. } | Self::NoSandboxOfType { .. } => 2,
            Self::TransferFailed { .. } => 3,
            Self::Config { .. } | Self::InvalidSpec { .. } => 4,
            Self::SizeLimitExceeded { .. } => 5,
            _ => 1,
        }
    }

    pub(crate) fn transfer(message: impl Into<String>) -> Self {
        Self::TransferFailed {
            message: message.into(),
        }
    }

    pub(crate) fn metadata(message: impl Into<String>) -> Self {
        Self::Metadata {
            message: message.into(),
        }
    }
}

impl From<object_store::Error> for StoreError {
    fn from(err: object_store::Error) -> Self {
        StoreError::TransferFailed {
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_files_listed_together() {
        let err = StoreError::MissingLocalFile {
            paths: vec![PathBuf::from("a.txt"), PathBuf::from("dir/b.txt")],
        };
        assert_eq!(err.to_string(), "failed to locate files: a.txt, dir/b.txt");
        assert!(err.is_validation());
    }

    #[test]
    fn test_staging_path_only_for_size_limit() {
        let err = StoreError::SizeLimitExceeded {
            path: PathBuf::from("/tmp/LDSB.x"),
            size: 20,
            limit: 10,
        };
        assert_eq!(err.staging_path(), Some(Path::new("/tmp/LDSB.x")));
        assert_eq!(err.exit_code(), 5);

        let other = StoreError::transfer("boom");
        assert!(other.staging_path().is_none());
        assert!(!other.is_validation());
    }

    #[test]
    fn test_not_found_kinds_are_distinct() {
        let missing = StoreError::EntityNotFound {
            entity: "Job:1".into(),
        };
        let no_type = StoreError::NoSandboxOfType {
            entity: "Job:1".into(),
            sb_type: "Output".into(),
        };
        assert!(missing.is_not_found());
        assert!(no_type.is_not_found());
        assert!(!matches!(missing, StoreError::NoSandboxOfType { .. }));
    }
}
