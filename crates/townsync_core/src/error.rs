//! Error types for Townsync core.

use crate::crypto::CipherError;
use thiserror::Error;
use townsync_storage::{ContextError, StorageError, StoreError};

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in federation core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Peer name failed validation.
    #[error("invalid peer name {name:?}: {reason}")]
    InvalidPeerName {
        /// The rejected name.
        name: String,
        /// Why it was rejected.
        reason: &'static str,
    },

    /// Remote URL failed validation.
    #[error("invalid remote URL for peer {peer}: {reason}")]
    InvalidRemoteUrl {
        /// Peer being registered.
        peer: String,
        /// Why it was rejected.
        reason: &'static str,
    },

    /// A peer declares a username but this machine has no password for it.
    #[error(
        "peer {peer} has username {username:?} but no local password; \
         run '{command} {peer} <url> --user {username} --password <password>' on this machine"
    )]
    MissingCredential {
        /// Peer name.
        peer: String,
        /// Username without a resolvable password.
        username: String,
        /// Registration command that fixes it.
        command: String,
    },

    /// Encrypting a credential failed.
    #[error("credential cipher error: {0}")]
    Cipher(#[from] CipherError),

    /// Catalog error.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Versioned-store failure, tagged with the peer and step.
    #[error("{operation} failed for peer {peer}: {source}")]
    Remote {
        /// Peer or remote name.
        peer: String,
        /// Step that failed (fetch, push, merge, ...).
        operation: &'static str,
        /// Underlying store error.
        #[source]
        source: StoreError,
    },

    /// The operation context was cancelled.
    #[error("operation cancelled")]
    Cancelled,

    /// The operation context deadline passed.
    #[error("operation deadline exceeded")]
    DeadlineExceeded,
}

impl CoreError {
    /// Creates an invalid peer name error.
    pub fn invalid_peer_name(name: impl Into<String>, reason: &'static str) -> Self {
        Self::InvalidPeerName {
            name: name.into(),
            reason,
        }
    }

    /// Wraps a store error with peer and step context.
    ///
    /// Context interruptions surface as [`CoreError::Cancelled`] and
    /// [`CoreError::DeadlineExceeded`] rather than as remote failures.
    pub fn remote(peer: impl Into<String>, operation: &'static str, source: StoreError) -> Self {
        match source {
            StoreError::Cancelled => Self::Cancelled,
            StoreError::DeadlineExceeded => Self::DeadlineExceeded,
            source => Self::Remote {
                peer: peer.into(),
                operation,
                source,
            },
        }
    }

    /// Returns true for validation failures (rejected before any I/O).
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::InvalidPeerName { .. } | Self::InvalidRemoteUrl { .. })
    }

    /// Returns true for the missing-credential gate.
    pub fn is_credential(&self) -> bool {
        matches!(self, Self::MissingCredential { .. })
    }

    /// Returns true if a merge was stopped by conflicts.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Remote { source, .. } if source.is_conflict())
    }

    /// Returns the underlying store error, if any.
    pub fn store_error(&self) -> Option<&StoreError> {
        match self {
            Self::Remote { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<ContextError> for CoreError {
    fn from(err: ContextError) -> Self {
        match err {
            ContextError::Cancelled => Self::Cancelled,
            ContextError::DeadlineExceeded => Self::DeadlineExceeded,
        }
    }
}
