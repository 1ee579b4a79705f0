//! Read-only sync status of a peer.

use crate::config::SyncConfig;
use townsync_core::CredentialStore;
use townsync_storage::{Catalog, OpContext, StoreError, Timestamp, VersionedStore};
use tracing::debug;

/// Sentinel for a divergence count that could not be computed.
pub const UNKNOWN_COUNT: i64 = -1;

/// Divergence between local history and a peer's last fetched state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncStatus {
    /// Peer name.
    pub peer: String,
    /// Local commits the peer lacks, or [`UNKNOWN_COUNT`].
    pub ahead: i64,
    /// Peer commits not merged locally, or [`UNKNOWN_COUNT`].
    pub behind: i64,
    /// The local store has unresolved conflicts.
    pub has_conflicts: bool,
    /// Last sync with this peer on this machine.
    pub last_sync: Option<Timestamp>,
}

impl SyncStatus {
    /// Returns true if ahead and behind are known.
    pub fn is_known(&self) -> bool {
        self.ahead != UNKNOWN_COUNT && self.behind != UNKNOWN_COUNT
    }

    /// Returns true if both sides are known to hold the same history.
    pub fn is_in_sync(&self) -> bool {
        self.ahead == 0 && self.behind == 0 && !self.has_conflicts
    }
}

/// Computes a peer's status. Never fails and never mutates state.
///
/// Counts are [`UNKNOWN_COUNT`] when the peer's ref was never fetched or
/// the comparison fails. The last sync time comes from this machine's
/// overlay, falling back to the shared metadata entry.
pub fn sync_status<C: Catalog, S: VersionedStore>(
    creds: &CredentialStore<C, S>,
    config: &SyncConfig,
    ctx: &OpContext,
    peer: &str,
) -> SyncStatus {
    let store = creds.store();
    let (ahead, behind) = match store.compare_with(ctx, &config.remote_ref(peer)) {
        Ok(d) => (saturating_count(d.ahead), saturating_count(d.behind)),
        Err(StoreError::RefNotFound(r)) => {
            debug!(peer, remote_ref = %r, "peer not fetched yet");
            (UNKNOWN_COUNT, UNKNOWN_COUNT)
        }
        Err(e) => {
            debug!(peer, error = %e, "history comparison failed");
            (UNKNOWN_COUNT, UNKNOWN_COUNT)
        }
    };

    let has_conflicts = store
        .list_conflicts(ctx)
        .map(|c| !c.is_empty())
        .unwrap_or(false);

    SyncStatus {
        peer: peer.to_string(),
        ahead,
        behind,
        has_conflicts,
        last_sync: last_sync(creds, config, peer),
    }
}

fn last_sync<C: Catalog, S: VersionedStore>(
    creds: &CredentialStore<C, S>,
    config: &SyncConfig,
    peer: &str,
) -> Option<Timestamp> {
    let catalog = creds.catalog();
    let overlay = catalog
        .peer_auth(peer, creds.machine_id())
        .ok()
        .flatten()
        .and_then(|o| o.last_sync);
    overlay.or_else(|| {
        catalog
            .metadata(&config.last_sync_key(peer))
            .ok()
            .flatten()
            .and_then(|v| Timestamp::parse(&v))
    })
}

fn saturating_count(n: u64) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_predicates() {
        let mut status = SyncStatus {
            peer: "hub".into(),
            ahead: UNKNOWN_COUNT,
            behind: UNKNOWN_COUNT,
            has_conflicts: false,
            last_sync: None,
        };
        assert!(!status.is_known());
        assert!(!status.is_in_sync());

        status.ahead = 0;
        status.behind = 0;
        assert!(status.is_known());
        assert!(status.is_in_sync());

        status.has_conflicts = true;
        assert!(!status.is_in_sync());
    }

    #[test]
    fn counts_saturate() {
        assert_eq!(saturating_count(3), 3);
        assert_eq!(saturating_count(u64::MAX), i64::MAX);
    }
}
