//! The federation facade.

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncFailure, SyncResult};
use crate::resolver::ResolutionStrategy;
use crate::state::{SyncEngine, SyncReport};
use crate::status::{sync_status, SyncStatus};
use std::path::Path;
use std::sync::Arc;
use townsync_core::{CoreError, CredentialStore, FederationConfig, Peer, PeerRegistration};
use townsync_storage::{Catalog, Conflict, OpContext, RemoteInfo, VersionedStore};
use tracing::info;

/// Peer management, remote operations and sync over one local store.
pub struct Federation<C, S> {
    engine: SyncEngine<C, S>,
}

impl<C: Catalog, S: VersionedStore> Federation<C, S> {
    /// Creates a federation over an existing credential store.
    pub fn new(creds: CredentialStore<C, S>, config: SyncConfig) -> Self {
        Self {
            engine: SyncEngine::new(Arc::new(creds), config),
        }
    }

    /// Opens the federation for the store at `store_path` on this host.
    pub fn open(
        catalog: Arc<C>,
        store: Arc<S>,
        store_path: &Path,
        federation: FederationConfig,
        sync: SyncConfig,
    ) -> Self {
        Self::new(CredentialStore::open(catalog, store, store_path, federation), sync)
    }

    /// Returns the sync engine.
    pub fn engine(&self) -> &SyncEngine<C, S> {
        &self.engine
    }

    /// Returns the credential store.
    pub fn credentials(&self) -> &CredentialStore<C, S> {
        self.engine.credentials()
    }

    /// Registers or updates a peer.
    pub fn add_peer(&self, ctx: &OpContext, registration: &PeerRegistration) -> SyncResult<()> {
        Ok(self.credentials().add_peer(ctx, registration)?)
    }

    /// Returns the effective view of a peer.
    pub fn get_peer(&self, ctx: &OpContext, name: &str) -> SyncResult<Option<Peer>> {
        Ok(self.credentials().get_peer(ctx, name)?)
    }

    /// Lists every peer.
    pub fn list_peers(&self, ctx: &OpContext) -> SyncResult<Vec<Peer>> {
        Ok(self.credentials().list_peers(ctx)?)
    }

    /// Removes a peer and its remote.
    pub fn remove_peer(&self, ctx: &OpContext, name: &str) -> SyncResult<()> {
        Ok(self.credentials().remove_peer(ctx, name)?)
    }

    /// Migrates every peer's legacy credentials on this machine.
    pub fn migrate_legacy(&self, ctx: &OpContext) -> SyncResult<usize> {
        let migrated = self.credentials().migrate_all_legacy(ctx)?;
        if migrated > 0 {
            info!(migrated, "migrated legacy peer credentials");
        }
        Ok(migrated)
    }

    /// Fetches from a peer.
    pub fn fetch(&self, ctx: &OpContext, peer: &str) -> SyncResult<()> {
        self.engine.fetch(ctx, peer)
    }

    /// Pushes to a peer.
    pub fn push_to(&self, ctx: &OpContext, peer: &str) -> SyncResult<()> {
        self.engine.push_to(ctx, peer)
    }

    /// Pulls from a peer, returning pending conflicts if the pull left any.
    pub fn pull_from(&self, ctx: &OpContext, peer: &str) -> SyncResult<Vec<Conflict>> {
        self.engine.pull_from(ctx, peer)
    }

    /// Runs a full sync with a peer.
    pub fn sync(
        &self,
        ctx: &OpContext,
        peer: &str,
        strategy: &ResolutionStrategy,
    ) -> Result<SyncReport, SyncFailure> {
        self.engine.sync(ctx, peer, strategy)
    }

    /// Runs a full sync with the configured default strategy.
    pub fn sync_default(&self, ctx: &OpContext, peer: &str) -> Result<SyncReport, SyncFailure> {
        let strategy = self.engine.config().default_strategy.clone();
        self.engine.sync(ctx, peer, &strategy)
    }

    /// Returns a peer's sync status. Never fails.
    pub fn sync_status(&self, ctx: &OpContext, peer: &str) -> SyncStatus {
        sync_status(self.credentials(), self.engine.config(), ctx, peer)
    }

    /// Lists configured remotes.
    pub fn list_remotes(&self, ctx: &OpContext) -> SyncResult<Vec<RemoteInfo>> {
        self.credentials()
            .store()
            .list_remotes(ctx)
            .map_err(|e| SyncError::store("list-remotes", e))
    }

    /// Removes a remote without touching the peer tables.
    pub fn remove_remote(&self, ctx: &OpContext, name: &str) -> SyncResult<()> {
        self.credentials()
            .store()
            .remove_remote(ctx, name)
            .map_err(|e| CoreError::remote(name, "remove-remote", e).into())
    }
}

impl<C, S> std::fmt::Debug for Federation<C, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Federation").finish_non_exhaustive()
    }
}
