//! Error types for catalog and versioned-store operations.

use crate::context::ContextError;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for catalog operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Result type for versioned-store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur while reading or writing the catalog tables.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The catalog file is corrupted.
    #[error("catalog corrupted: {0}")]
    Corrupted(String),

    /// Another process holds the catalog lock.
    #[error("catalog locked: {0:?} is held by another process")]
    Locked(PathBuf),

    /// Encoding the catalog snapshot failed.
    #[error("catalog encode error: {0}")]
    Encode(String),
}

/// Marker the store uses in merge errors that stem from conflicts.
const CONFLICT_MARKER: &str = "merge conflict detected";
const NOTHING_TO_COMMIT_MARKER: &str = "nothing to commit";
const ALREADY_EXISTS_MARKER: &str = "already exists";

/// Typed failure reported by a [`VersionedStore`](crate::VersionedStore).
///
/// Callers branch on variants, never on message text. Adapters whose backend
/// only reports text classify once at the boundary with
/// [`StoreError::from_message`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// A merge stopped because both sides changed the same data.
    #[error("merge conflict detected: {message}")]
    ConflictDetected {
        /// Backend message.
        message: String,
    },

    /// Commit found no staged changes.
    #[error("nothing to commit")]
    NothingToCommit,

    /// A ref (branch, remote-tracking ref) does not exist locally.
    #[error("ref not found: {0}")]
    RefNotFound(String),

    /// A remote with this name is already configured.
    #[error("remote already exists: {0}")]
    RemoteAlreadyExists(String),

    /// No remote with this name is configured.
    #[error("remote not found: {0}")]
    RemoteNotFound(String),

    /// The operation context was cancelled.
    #[error("operation cancelled")]
    Cancelled,

    /// The operation context deadline passed.
    #[error("operation deadline exceeded")]
    DeadlineExceeded,

    /// Any other backend failure.
    #[error("{message}")]
    Failed {
        /// Backend message.
        message: String,
    },
}

impl StoreError {
    /// Creates an opaque backend failure.
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
        }
    }

    /// Creates a conflict failure.
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::ConflictDetected {
            message: message.into(),
        }
    }

    /// Classifies a text-only backend error.
    ///
    /// Recognises the fixed conflict, empty-commit and duplicate-remote markers;
    /// everything else becomes [`StoreError::Failed`].
    pub fn from_message(message: impl Into<String>) -> Self {
        let message = message.into();
        let lower = message.to_ascii_lowercase();
        if lower.contains(CONFLICT_MARKER) {
            Self::ConflictDetected { message }
        } else if lower.contains(NOTHING_TO_COMMIT_MARKER) {
            Self::NothingToCommit
        } else if lower.contains(ALREADY_EXISTS_MARKER) {
            Self::RemoteAlreadyExists(message)
        } else {
            Self::Failed { message }
        }
    }

    /// Returns true if a merge failed because of conflicts.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::ConflictDetected { .. })
    }

    /// Returns true for an empty commit.
    pub fn is_nothing_to_commit(&self) -> bool {
        matches!(self, Self::NothingToCommit)
    }

    /// Returns true if a remote was already registered.
    pub fn is_already_exists(&self) -> bool {
        matches!(self, Self::RemoteAlreadyExists(_))
    }

    /// Returns true if the failure came from the operation context.
    pub fn is_interrupted(&self) -> bool {
        matches!(self, Self::Cancelled | Self::DeadlineExceeded)
    }
}

impl From<ContextError> for StoreError {
    fn from(err: ContextError) -> Self {
        match err {
            ContextError::Cancelled => Self::Cancelled,
            ContextError::DeadlineExceeded => Self::DeadlineExceeded,
        }
    }
}
