//! The versioned-store collaborator.

use crate::context::OpContext;
use crate::error::StoreResult;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A data item changed incompatibly on both sides of a merge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conflict {
    /// Table the conflicting row lives in.
    pub table: String,
    /// Primary key of the conflicting row.
    pub key: String,
    /// Human-readable description of the conflict.
    pub description: String,
}

impl Conflict {
    /// Creates a new conflict.
    pub fn new(
        table: impl Into<String>,
        key: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            table: table.into(),
            key: key.into(),
            description: description.into(),
        }
    }
}

impl fmt::Display for Conflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]: {}", self.table, self.key, self.description)
    }
}

/// A configured remote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteInfo {
    /// Remote name.
    pub name: String,
    /// Remote URL.
    pub url: String,
}

/// Opaque position of the current branch head.
///
/// Only ever compared for equality; never parsed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct PositionMarker(String);

impl PositionMarker {
    /// Wraps a backend-specific position string.
    pub fn new(marker: impl Into<String>) -> Self {
        Self(marker.into())
    }

    /// The empty marker, used when the position could not be read.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Returns true for the empty marker.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the raw marker.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Commit counts between local history and a remote-tracking ref.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HistoryDivergence {
    /// Commits present locally but not on the remote ref.
    pub ahead: u64,
    /// Commits present on the remote ref but not locally.
    pub behind: u64,
}

/// The external versioned store federation drives.
///
/// Implementations own diffing, merging and history storage. Every call
/// blocks its caller until the backend returns, and every call receives the
/// caller's [`OpContext`], which implementations are expected to honor.
///
/// Remote operations read authentication material from the ambient channel
/// (see `townsync_core::session`) when present; the explicit `username`
/// argument mirrors the backend's `--user` flag.
///
/// # Invariants
///
/// - Merge failures caused by conflicts are reported as
///   [`StoreError::ConflictDetected`](crate::StoreError::ConflictDetected),
///   never as `Failed`.
/// - With autocommit enabled, a conflicting merge is rolled back and leaves no
///   conflict state behind. With autocommit disabled, the merge stays pending
///   so conflicts can be listed, resolved and committed as a merge commit with
///   two parents.
/// - An empty commit fails with [`StoreError::NothingToCommit`](crate::StoreError::NothingToCommit).
pub trait VersionedStore: Send + Sync {
    /// Fetches refs from a remote without merging.
    fn fetch(&self, ctx: &OpContext, remote: &str, username: Option<&str>) -> StoreResult<()>;

    /// Fetches and merges a remote's branch into the current branch.
    fn pull(&self, ctx: &OpContext, remote: &str, username: Option<&str>) -> StoreResult<()>;

    /// Pushes a local branch to a remote.
    fn push(
        &self,
        ctx: &OpContext,
        remote: &str,
        branch: &str,
        username: Option<&str>,
    ) -> StoreResult<()>;

    /// Merges `branch_ref` (e.g. `beta-town/main`) into the current branch.
    fn merge(&self, ctx: &OpContext, branch_ref: &str) -> StoreResult<()>;

    /// Commits all working changes, or the pending merge.
    fn commit(&self, ctx: &OpContext, message: &str) -> StoreResult<()>;

    /// Lists unresolved conflicts of the pending merge.
    fn list_conflicts(&self, ctx: &OpContext) -> StoreResult<Vec<Conflict>>;

    /// Resolves one conflict with a named strategy.
    ///
    /// The strategy is opaque to Townsync and forwarded verbatim.
    fn resolve_conflict(&self, ctx: &OpContext, conflict: &Conflict, strategy: &str)
        -> StoreResult<()>;

    /// Enables or disables automatic commit-on-success.
    fn set_autocommit(&self, ctx: &OpContext, enabled: bool) -> StoreResult<()>;

    /// Discards the pending transaction, including any pending merge.
    fn rollback(&self, ctx: &OpContext) -> StoreResult<()>;

    /// Returns the position of the current branch head.
    fn current_position(&self, ctx: &OpContext) -> StoreResult<PositionMarker>;

    /// Compares local history with a remote-tracking ref.
    ///
    /// Fails with [`StoreError::RefNotFound`](crate::StoreError::RefNotFound)
    /// if the ref was never fetched.
    fn compare_with(&self, ctx: &OpContext, remote_ref: &str) -> StoreResult<HistoryDivergence>;

    /// Lists configured remotes.
    fn list_remotes(&self, ctx: &OpContext) -> StoreResult<Vec<RemoteInfo>>;

    /// Adds a remote.
    fn add_remote(&self, ctx: &OpContext, name: &str, url: &str) -> StoreResult<()>;

    /// Removes a remote.
    fn remove_remote(&self, ctx: &OpContext, name: &str) -> StoreResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflict_display() {
        let conflict = Conflict::new("issues", "bd-42", "title changed on both sides");
        assert_eq!(conflict.to_string(), "issues[bd-42]: title changed on both sides");
    }

    #[test]
    fn position_marker_equality() {
        assert!(PositionMarker::empty().is_empty());
        assert_eq!(PositionMarker::new("c1"), PositionMarker::new("c1"));
        assert_ne!(PositionMarker::new("c1"), PositionMarker::new("c2"));
        assert_eq!(PositionMarker::new("c7").as_str(), "c7");
    }
}
