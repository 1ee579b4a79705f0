//! Sync state machine and the orchestrator.

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncFailure, SyncResult};
use crate::resolver::{resolve_merge, ResolutionStrategy};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use townsync_core::CredentialStore;
use townsync_storage::{Catalog, Conflict, OpContext, PositionMarker, Timestamp, VersionedStore};
use tracing::{debug, info, warn};

/// Phase of a sync run with one peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncPhase {
    /// Not syncing.
    Idle,
    /// Fetching the peer's refs.
    Fetching,
    /// Committing local changes before merging.
    Committing,
    /// Merging the peer's branch.
    Merging,
    /// Resolving merge conflicts.
    Resolving,
    /// Pushing to the peer.
    Pushing,
    /// Recording the sync time.
    Recording,
    /// Last run finished.
    Completed,
    /// Last run failed.
    Failed,
}

impl SyncPhase {
    /// Returns true if a run is in progress.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            Self::Fetching
                | Self::Committing
                | Self::Merging
                | Self::Resolving
                | Self::Pushing
                | Self::Recording
        )
    }
}

/// Outcome of one sync run.
#[derive(Debug)]
pub struct SyncReport {
    /// Peer synced with.
    pub peer: String,
    /// When the run started.
    pub started_at: Timestamp,
    /// When the run ended, successful or not.
    pub finished_at: Timestamp,
    /// Fetch succeeded.
    pub fetched: bool,
    /// Merge succeeded, possibly after resolution.
    pub merged: bool,
    /// Push succeeded.
    pub pushed: bool,
    /// 1 if the merge moved the local head, else 0. Stays 0 when the head
    /// position could not be read before or after the merge.
    pub pulled_commits: u64,
    /// 1 if the push sent local history the peer lacked, else 0.
    pub pushed_commits: u64,
    /// Conflicts encountered while merging.
    pub conflicts: Vec<Conflict>,
    /// Conflicts were resolved automatically.
    pub conflicts_resolved: bool,
    /// Why the push failed, when it did. The run still succeeds.
    pub push_error: Option<SyncError>,
}

impl SyncReport {
    /// Creates an empty report starting now.
    pub fn new(peer: impl Into<String>) -> Self {
        let now = Timestamp::now();
        Self {
            peer: peer.into(),
            started_at: now,
            finished_at: now,
            fetched: false,
            merged: false,
            pushed: false,
            pulled_commits: 0,
            pushed_commits: 0,
            conflicts: Vec::new(),
            conflicts_resolved: false,
            push_error: None,
        }
    }

    /// Returns true if the run changed anything worth recording.
    pub fn did_work(&self) -> bool {
        self.pulled_commits > 0 || self.conflicts_resolved
    }
}

/// Counters over every run of an engine.
#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    /// Runs that returned a report.
    pub runs_completed: u64,
    /// Runs that failed.
    pub runs_failed: u64,
    /// Runs that resolved conflicts.
    pub resolutions: u64,
    /// Runs whose push failed.
    pub push_failures: u64,
    /// Last failure message.
    pub last_error: Option<String>,
}

/// Drives fetch, merge, resolution and push against peers.
///
/// One engine may sync different peers from different threads. Remote steps
/// serialize on the process-wide credential lock while they hold a
/// credentialed session.
pub struct SyncEngine<C, S> {
    creds: Arc<CredentialStore<C, S>>,
    config: SyncConfig,
    phases: RwLock<HashMap<String, SyncPhase>>,
    stats: RwLock<SyncStats>,
}

impl<C: Catalog, S: VersionedStore> SyncEngine<C, S> {
    /// Creates a new engine.
    pub fn new(creds: Arc<CredentialStore<C, S>>, config: SyncConfig) -> Self {
        Self {
            creds,
            config,
            phases: RwLock::new(HashMap::new()),
            stats: RwLock::new(SyncStats::default()),
        }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Returns the credential store.
    pub fn credentials(&self) -> &Arc<CredentialStore<C, S>> {
        &self.creds
    }

    /// Returns the phase of the last or current run with `peer`.
    pub fn phase(&self, peer: &str) -> SyncPhase {
        self.phases.read().get(peer).copied().unwrap_or(SyncPhase::Idle)
    }

    /// Returns a snapshot of the counters.
    pub fn stats(&self) -> SyncStats {
        self.stats.read().clone()
    }

    /// Fetches from a peer under its credentials.
    pub fn fetch(&self, ctx: &OpContext, peer: &str) -> SyncResult<()> {
        let store = self.creds.store();
        self.creds.with_peer_credentials(ctx, peer, |user| {
            store
                .fetch(ctx, peer, user)
                .map_err(|e| SyncError::fetch(peer, e))
        })
    }

    /// Pushes the configured branch to a peer under its credentials.
    pub fn push_to(&self, ctx: &OpContext, peer: &str) -> SyncResult<()> {
        let store = self.creds.store();
        self.creds.with_peer_credentials(ctx, peer, |user| {
            store
                .push(ctx, peer, &self.config.branch, user)
                .map_err(|e| SyncError::push(peer, e))
        })
    }

    /// Pulls from a peer under its credentials.
    ///
    /// When the pull fails and the store is left with pending conflicts,
    /// those conflicts are returned instead of the error.
    pub fn pull_from(&self, ctx: &OpContext, peer: &str) -> SyncResult<Vec<Conflict>> {
        let store = self.creds.store();
        self.creds.with_peer_credentials(ctx, peer, |user| {
            let Err(e) = store.pull(ctx, peer, user) else {
                return Ok(Vec::new());
            };
            match store.list_conflicts(ctx) {
                Ok(conflicts) if !conflicts.is_empty() => {
                    warn!(peer, conflicts = conflicts.len(), error = %e, "pull left conflicts");
                    Ok(conflicts)
                }
                _ => Err(SyncError::pull(peer, e)),
            }
        })
    }

    /// Runs a full bidirectional sync with a peer.
    ///
    /// Fetch, merge and resolution failures are fatal and returned with the
    /// partial report. A push failure is recorded on the report and the run
    /// still succeeds.
    pub fn sync(
        &self,
        ctx: &OpContext,
        peer: &str,
        strategy: &ResolutionStrategy,
    ) -> Result<SyncReport, SyncFailure> {
        let mut report = SyncReport::new(peer);
        info!(peer, strategy = %strategy, "starting federation sync");

        let outcome = self.run(ctx, peer, strategy, &mut report);
        report.finished_at = Timestamp::now();

        match outcome {
            Ok(()) => {
                self.set_phase(peer, SyncPhase::Completed);
                let mut stats = self.stats.write();
                stats.runs_completed += 1;
                if report.conflicts_resolved {
                    stats.resolutions += 1;
                }
                if report.push_error.is_some() {
                    stats.push_failures += 1;
                }
                drop(stats);
                info!(
                    peer,
                    pulled = report.pulled_commits,
                    pushed = report.pushed,
                    conflicts = report.conflicts.len(),
                    "federation sync completed"
                );
                Ok(report)
            }
            Err(error) => Err(self.handle_error(report, error)),
        }
    }

    fn run(
        &self,
        ctx: &OpContext,
        peer: &str,
        strategy: &ResolutionStrategy,
        report: &mut SyncReport,
    ) -> SyncResult<()> {
        let store = self.creds.store();
        let remote_ref = self.config.remote_ref(peer);

        self.set_phase(peer, SyncPhase::Fetching);
        self.fetch(ctx, peer)?;
        report.fetched = true;

        self.set_phase(peer, SyncPhase::Committing);
        match store.commit(ctx, &self.config.render_pre_merge_message(peer)) {
            Ok(()) => debug!(peer, "committed local changes before merge"),
            Err(e) if e.is_nothing_to_commit() => {}
            Err(e) => debug!(peer, error = %e, "pre-merge commit skipped"),
        }

        let before = self.position(ctx);

        self.set_phase(peer, SyncPhase::Merging);
        match store.merge(ctx, &remote_ref) {
            Ok(()) => {}
            Err(e) if e.is_conflict() => {
                self.set_phase(peer, SyncPhase::Resolving);
                info!(peer, strategy = %strategy, "merge conflicts detected, resolving");
                let message = self.config.render_merge_message(peer, strategy);
                match resolve_merge(&**store, ctx, peer, &remote_ref, strategy, &message) {
                    Ok(conflicts) => {
                        report.conflicts = conflicts;
                        report.conflicts_resolved = true;
                    }
                    Err(e) => {
                        report.conflicts = e.conflicts().to_vec();
                        return Err(e);
                    }
                }
            }
            Err(e) => return Err(SyncError::merge(peer, e)),
        }
        report.merged = true;

        let after = self.position(ctx);
        if before.is_empty() || after.is_empty() {
            debug!(peer, "head position unknown, not counting pulled commits");
        } else if after != before {
            report.pulled_commits = 1;
        }

        self.set_phase(peer, SyncPhase::Pushing);
        let local_ahead = store
            .compare_with(ctx, &remote_ref)
            .map(|d| d.ahead > 0)
            .unwrap_or(false);
        match self.push_to(ctx, peer) {
            Ok(()) => {
                report.pushed = true;
                report.pushed_commits = u64::from(local_ahead);
            }
            Err(e) => {
                warn!(peer, error = %e, "push failed, continuing");
                report.push_error = Some(e);
            }
        }

        if report.did_work() {
            self.set_phase(peer, SyncPhase::Recording);
            self.record(ctx, peer);
        }
        Ok(())
    }

    /// Best-effort bookkeeping of a sync that did work.
    fn record(&self, ctx: &OpContext, peer: &str) {
        let key = self.config.last_sync_key(peer);
        let now = Timestamp::now().as_millis().to_string();
        if let Err(e) = self.creds.catalog().set_metadata(&key, &now) {
            warn!(peer, error = %e, "failed to record last sync metadata");
        }
        match self.creds.record_sync(ctx, peer) {
            Ok(_) => {}
            Err(e) => warn!(peer, error = %e, "failed to record sync on overlay"),
        }
    }

    fn position(&self, ctx: &OpContext) -> PositionMarker {
        self.creds.store().current_position(ctx).unwrap_or_else(|e| {
            debug!(error = %e, "position unavailable");
            PositionMarker::empty()
        })
    }

    fn set_phase(&self, peer: &str, phase: SyncPhase) {
        debug!(peer, ?phase, "sync phase");
        self.phases.write().insert(peer.to_string(), phase);
    }

    fn handle_error(&self, report: SyncReport, error: SyncError) -> SyncFailure {
        let peer = report.peer.clone();
        warn!(peer = %peer, error = %error, "federation sync failed");
        self.set_phase(&peer, SyncPhase::Failed);
        let mut stats = self.stats.write();
        stats.runs_failed += 1;
        stats.last_error = Some(error.to_string());
        SyncFailure::new(report, error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_activity() {
        assert!(!SyncPhase::Idle.is_active());
        assert!(SyncPhase::Fetching.is_active());
        assert!(SyncPhase::Resolving.is_active());
        assert!(SyncPhase::Recording.is_active());
        assert!(!SyncPhase::Completed.is_active());
        assert!(!SyncPhase::Failed.is_active());
    }

    #[test]
    fn empty_report() {
        let report = SyncReport::new("hub");
        assert_eq!(report.peer, "hub");
        assert!(!report.fetched && !report.merged && !report.pushed);
        assert!(!report.did_work());
        assert!(report.finished_at >= report.started_at);
    }

    #[test]
    fn did_work_on_pull_or_resolution() {
        let mut report = SyncReport::new("hub");
        report.pulled_commits = 1;
        assert!(report.did_work());

        let mut report = SyncReport::new("hub");
        report.conflicts_resolved = true;
        assert!(report.did_work());
    }
}
