//! Conflict resolution.
//!
//! When merging a peer's branch reports conflicts, the merge is re-run inside
//! a transaction with autocommit disabled so the conflicts stay pending,
//! every conflict is resolved with one strategy, and the result is committed
//! as a merge commit. Any failure rolls the transaction back.

use crate::error::{SyncError, SyncResult};
use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;
use townsync_storage::{Conflict, OpContext, StoreResult, VersionedStore};
use tracing::{debug, info, warn};

/// How conflicting rows are resolved.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub enum ResolutionStrategy {
    /// Keep the local value.
    #[default]
    Ours,
    /// Take the peer's value.
    Theirs,
    /// A backend-specific strategy, passed through verbatim.
    Custom(String),
}

impl ResolutionStrategy {
    /// Returns the name passed to the store.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Ours => "ours",
            Self::Theirs => "theirs",
            Self::Custom(name) => name,
        }
    }
}

impl FromStr for ResolutionStrategy {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "ours" => Self::Ours,
            "theirs" => Self::Theirs,
            other => Self::Custom(other.to_string()),
        })
    }
}

impl fmt::Display for ResolutionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A store transaction with autocommit disabled.
///
/// Dropping the transaction without committing rolls back and re-enables
/// autocommit. Cleanup uses a fresh context so it still runs after the
/// caller's context was cancelled or expired.
pub struct MergeTransaction<'a, S: VersionedStore + ?Sized> {
    store: &'a S,
    ctx: &'a OpContext,
    open: bool,
}

impl<'a, S: VersionedStore + ?Sized> MergeTransaction<'a, S> {
    /// Disables autocommit and opens the transaction.
    pub fn begin(store: &'a S, ctx: &'a OpContext) -> StoreResult<Self> {
        store.set_autocommit(ctx, false)?;
        Ok(Self {
            store,
            ctx,
            open: true,
        })
    }

    /// Commits the transaction and re-enables autocommit.
    ///
    /// A commit with nothing to commit counts as success. Once the commit has
    /// landed the transaction succeeds even if autocommit cannot be turned
    /// back on; that failure is only logged.
    pub fn commit(mut self, message: &str) -> StoreResult<()> {
        match self.store.commit(self.ctx, message) {
            Ok(()) => {}
            Err(e) if e.is_nothing_to_commit() => debug!("merge left nothing to commit"),
            Err(e) => return Err(e),
        }
        self.open = false;
        if let Err(e) = self.store.set_autocommit(self.ctx, true) {
            warn!(error = %e, "re-enabling autocommit after merge commit failed");
        }
        Ok(())
    }
}

impl<S: VersionedStore + ?Sized> Drop for MergeTransaction<'_, S> {
    fn drop(&mut self) {
        if !self.open {
            return;
        }
        let cleanup = OpContext::new();
        if let Err(e) = self.store.rollback(&cleanup) {
            warn!(error = %e, "rollback of merge transaction failed");
        }
        if let Err(e) = self.store.set_autocommit(&cleanup, true) {
            warn!(error = %e, "re-enabling autocommit failed");
        }
    }
}

/// Merges `branch_ref` and resolves every conflict with `strategy`.
///
/// Returns the conflicts that were resolved, which may be empty if the
/// re-run merge turned out clean.
///
/// # Errors
///
/// [`SyncError::Resolution`] carrying the conflicts gathered so far. The
/// transaction has been rolled back by then.
pub fn resolve_merge<S: VersionedStore + ?Sized>(
    store: &S,
    ctx: &OpContext,
    peer: &str,
    branch_ref: &str,
    strategy: &ResolutionStrategy,
    message: &str,
) -> SyncResult<Vec<Conflict>> {
    let mut conflicts = Vec::new();
    let fail = |conflicts: Vec<Conflict>, source| SyncError::Resolution {
        peer: peer.to_string(),
        conflicts,
        source,
    };

    let tx = match MergeTransaction::begin(store, ctx) {
        Ok(tx) => tx,
        Err(e) => return Err(fail(conflicts, e)),
    };

    match store.merge(ctx, branch_ref) {
        Ok(()) => {}
        Err(e) if e.is_conflict() => debug!(branch_ref, "merge reported conflicts"),
        Err(e) => return Err(fail(conflicts, e)),
    }

    match store.list_conflicts(ctx) {
        Ok(found) => conflicts = found,
        Err(e) => return Err(fail(conflicts, e)),
    }

    let mut failure = None;
    for conflict in &conflicts {
        if let Err(e) = store.resolve_conflict(ctx, conflict, strategy.as_str()) {
            warn!(peer, %conflict, strategy = %strategy, error = %e, "conflict resolution failed");
            failure = Some(e);
            break;
        }
    }
    if let Some(e) = failure {
        return Err(fail(conflicts, e));
    }

    if let Err(e) = tx.commit(message) {
        return Err(fail(conflicts, e));
    }

    info!(
        peer,
        branch_ref,
        strategy = %strategy,
        resolved = conflicts.len(),
        "resolved merge conflicts"
    );
    Ok(conflicts)
}
