//! Error types for the sync engine.

use crate::state::SyncReport;
use thiserror::Error;
use townsync_core::CoreError;
use townsync_storage::{Conflict, StoreError};

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur during federation operations.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Validation, credential, catalog or context error.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Fetching from the peer failed.
    #[error("fetch from peer {peer} failed: {source}")]
    Fetch {
        /// Peer name.
        peer: String,
        /// Store error.
        #[source]
        source: StoreError,
    },

    /// Pulling from the peer failed without leaving conflicts behind.
    #[error("pull from peer {peer} failed: {source}")]
    Pull {
        /// Peer name.
        peer: String,
        /// Store error.
        #[source]
        source: StoreError,
    },

    /// Merging the peer's branch failed for a reason other than conflicts.
    #[error("merge of peer {peer} failed: {source}")]
    Merge {
        /// Peer name.
        peer: String,
        /// Store error.
        #[source]
        source: StoreError,
    },

    /// Pushing to the peer failed.
    #[error("push to peer {peer} failed: {source}")]
    Push {
        /// Peer name.
        peer: String,
        /// Store error.
        #[source]
        source: StoreError,
    },

    /// The conflict resolution transaction failed and was rolled back.
    #[error(
        "conflict resolution with peer {peer} failed (conflicts: {}): {source}",
        .conflicts.len()
    )]
    Resolution {
        /// Peer name.
        peer: String,
        /// Conflicts gathered before the failure.
        conflicts: Vec<Conflict>,
        /// Store error.
        #[source]
        source: StoreError,
    },

    /// A local store operation failed.
    #[error("{operation} failed: {source}")]
    Store {
        /// Operation name.
        operation: &'static str,
        /// Store error.
        #[source]
        source: StoreError,
    },
}

impl SyncError {
    /// Creates a fetch error.
    pub fn fetch(peer: impl Into<String>, source: StoreError) -> Self {
        interrupted(&source).unwrap_or_else(|| Self::Fetch {
            peer: peer.into(),
            source,
        })
    }

    /// Creates a pull error.
    pub fn pull(peer: impl Into<String>, source: StoreError) -> Self {
        interrupted(&source).unwrap_or_else(|| Self::Pull {
            peer: peer.into(),
            source,
        })
    }

    /// Creates a merge error.
    pub fn merge(peer: impl Into<String>, source: StoreError) -> Self {
        interrupted(&source).unwrap_or_else(|| Self::Merge {
            peer: peer.into(),
            source,
        })
    }

    /// Creates a push error.
    pub fn push(peer: impl Into<String>, source: StoreError) -> Self {
        interrupted(&source).unwrap_or_else(|| Self::Push {
            peer: peer.into(),
            source,
        })
    }

    /// Creates a local store error.
    pub fn store(operation: &'static str, source: StoreError) -> Self {
        interrupted(&source).unwrap_or(Self::Store { operation, source })
    }

    /// Returns the conflicts carried by a resolution failure.
    pub fn conflicts(&self) -> &[Conflict] {
        match self {
            Self::Resolution { conflicts, .. } => conflicts,
            _ => &[],
        }
    }

    /// Returns true for the missing-credential gate.
    pub fn is_credential(&self) -> bool {
        matches!(self, Self::Core(e) if e.is_credential())
    }

    /// Returns true if the operation context stopped the run.
    pub fn is_interrupted(&self) -> bool {
        matches!(
            self,
            Self::Core(CoreError::Cancelled | CoreError::DeadlineExceeded)
        )
    }
}

fn interrupted(source: &StoreError) -> Option<SyncError> {
    match source {
        StoreError::Cancelled => Some(SyncError::Core(CoreError::Cancelled)),
        StoreError::DeadlineExceeded => Some(SyncError::Core(CoreError::DeadlineExceeded)),
        _ => None,
    }
}

/// A failed sync run, with everything recorded before the failure.
#[derive(Error, Debug)]
#[error("sync with peer {} failed: {error}", .report.peer)]
pub struct SyncFailure {
    /// The partial report: flags already set, conflicts, timestamps.
    pub report: Box<SyncReport>,
    /// What stopped the run.
    #[source]
    pub error: SyncError,
}

impl SyncFailure {
    /// Creates a failure from a partial report.
    pub fn new(report: SyncReport, error: SyncError) -> Self {
        Self {
            report: Box::new(report),
            error,
        }
    }
}
