//! Machine-scoped credential overlay store.
//!
//! Peers live in two tables: one shared row per peer, replicated to every
//! machine that holds the store, and at most one auth overlay per
//! (peer, machine). Reads lay this machine's overlay over the shared row:
//!
//! | Field      | Source                                                    |
//! |------------|-----------------------------------------------------------|
//! | URL        | overlay if non-empty, else shared                         |
//! | username   | overlay if non-empty, else legacy shared                  |
//! | last sync  | overlay if set, else legacy shared                        |
//! | password   | overlay only when an overlay exists, else legacy shared   |
//!
//! An overlay's existence is authoritative for the password: legacy shared
//! credentials are not consulted once this machine has its own row, even if
//! the overlay password is empty or undecryptable.
//!
//! Rows that still carry legacy credentials are migrated lazily: the first
//! read on a machine copies them into that machine's overlay.

use crate::config::FederationConfig;
use crate::crypto::CredentialCipher;
use crate::error::{CoreError, CoreResult};
use crate::identity::StoreIdentity;
use crate::peer::{validate_peer_name, Peer, PeerRegistration};
use crate::session::{AmbientChannel, CredentialSession, EnvChannel};
use std::path::Path;
use std::sync::Arc;
use townsync_storage::{
    Catalog, OpContext, PeerAuthRecord, PeerAuthUpdate, PeerRecord, Timestamp, VersionedStore,
};
use tracing::{debug, info, warn};

/// Peer CRUD with machine-scoped encrypted credentials.
pub struct CredentialStore<C, S> {
    catalog: Arc<C>,
    store: Arc<S>,
    identity: StoreIdentity,
    cipher: CredentialCipher,
    config: FederationConfig,
    channel: Arc<dyn AmbientChannel>,
}

impl<C: Catalog, S: VersionedStore> CredentialStore<C, S> {
    /// Creates a credential store for an already resolved identity.
    ///
    /// Credentials are exposed through an [`EnvChannel`] over the configured
    /// variable names.
    pub fn new(
        catalog: Arc<C>,
        store: Arc<S>,
        identity: StoreIdentity,
        config: FederationConfig,
    ) -> Self {
        let cipher = CredentialCipher::new(identity.key());
        let channel: Arc<dyn AmbientChannel> = Arc::new(EnvChannel::from_config(&config));
        Self {
            catalog,
            store,
            identity,
            cipher,
            config,
            channel,
        }
    }

    /// Creates a credential store for the store at `store_path` on this host.
    pub fn open(
        catalog: Arc<C>,
        store: Arc<S>,
        store_path: &Path,
        config: FederationConfig,
    ) -> Self {
        let identity = StoreIdentity::resolve(store_path, &config);
        Self::new(catalog, store, identity, config)
    }

    /// Replaces the ambient channel.
    #[must_use]
    pub fn with_channel(mut self, channel: Arc<dyn AmbientChannel>) -> Self {
        self.channel = channel;
        self
    }

    /// Returns the store identity.
    pub fn identity(&self) -> &StoreIdentity {
        &self.identity
    }

    /// Returns this machine's id.
    pub fn machine_id(&self) -> &str {
        self.identity.machine_id()
    }

    /// Returns the catalog.
    pub fn catalog(&self) -> &Arc<C> {
        &self.catalog
    }

    /// Returns the versioned store.
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Returns the configuration.
    pub fn config(&self) -> &FederationConfig {
        &self.config
    }

    /// Returns the ambient channel.
    pub fn channel(&self) -> &dyn AmbientChannel {
        self.channel.as_ref()
    }

    /// Registers or updates a peer.
    ///
    /// Upserts the shared row, writes this machine's overlay with the URL,
    /// username and encrypted password, then adds the remote to the versioned
    /// store. A remote that already exists is fine.
    ///
    /// # Errors
    ///
    /// Validation errors before any write; storage, cipher and remote
    /// errors afterwards.
    pub fn add_peer(&self, ctx: &OpContext, registration: &PeerRegistration) -> CoreResult<()> {
        ctx.check()?;
        validate_peer_name(&registration.name)?;
        let remote_url = registration.remote_url.trim();
        if remote_url.is_empty() {
            return Err(CoreError::InvalidRemoteUrl {
                peer: registration.name.clone(),
                reason: "URL is empty",
            });
        }

        let encrypted_password = self.cipher.encrypt(&registration.password)?;

        self.catalog
            .upsert_peer(&registration.name, remote_url, &registration.sovereignty)?;
        self.catalog.upsert_peer_auth(PeerAuthUpdate {
            peer_name: registration.name.clone(),
            machine_id: self.machine_id().to_string(),
            remote_url: Some(remote_url.to_string()),
            username: non_empty(&registration.username),
            encrypted_password,
        })?;

        match self.store.add_remote(ctx, &registration.name, remote_url) {
            Ok(()) => {}
            Err(e) if e.is_already_exists() => {
                debug!(peer = %registration.name, "remote already exists");
            }
            Err(e) => return Err(CoreError::remote(&registration.name, "add-remote", e)),
        }

        info!(
            peer = %registration.name,
            machine_id = %self.machine_id(),
            credentialed = !registration.username.is_empty(),
            "registered federation peer"
        );
        Ok(())
    }

    /// Returns the effective view of a peer on this machine.
    ///
    /// Returns `Ok(None)` when no shared row exists.
    pub fn get_peer(&self, ctx: &OpContext, name: &str) -> CoreResult<Option<Peer>> {
        ctx.check()?;
        match self.catalog.peer(name)? {
            Some(record) => self.effective_peer(record).map(Some),
            None => Ok(None),
        }
    }

    /// Returns the effective view of every peer, ordered by name.
    ///
    /// A peer whose credentials cannot be decrypted is listed with an empty
    /// password.
    pub fn list_peers(&self, ctx: &OpContext) -> CoreResult<Vec<Peer>> {
        ctx.check()?;
        self.catalog
            .peers()?
            .into_iter()
            .map(|record| self.effective_peer(record))
            .collect()
    }

    /// Removes a peer, its overlays on every machine, and its remote.
    ///
    /// Removing an unknown peer is not an error.
    pub fn remove_peer(&self, ctx: &OpContext, name: &str) -> CoreResult<()> {
        ctx.check()?;
        let overlays = self.catalog.delete_peer_auths(name)?;
        let existed = self.catalog.delete_peer(name)?;

        if let Err(e) = self.store.remove_remote(ctx, name) {
            debug!(peer = %name, error = %e, "remote removal skipped");
        }

        info!(peer = %name, existed, overlays, "removed federation peer");
        Ok(())
    }

    /// Records a completed sync on this machine's overlay.
    ///
    /// Returns false when this machine has no overlay for the peer. Neither
    /// the shared row nor any other machine's overlay is touched.
    pub fn record_sync(&self, ctx: &OpContext, name: &str) -> CoreResult<bool> {
        ctx.check()?;
        let touched = self
            .catalog
            .touch_peer_auth_sync(name, self.machine_id(), Timestamp::now())?;
        if !touched {
            debug!(peer = %name, "no local overlay to record sync on");
        }
        Ok(touched)
    }

    /// Migrates a peer's legacy shared credentials into this machine's overlay.
    ///
    /// Returns the legacy password, empty when there is none or it cannot be
    /// decrypted. The overlay is written only when decryption succeeds, the
    /// legacy block carries credentials, and this machine has no overlay yet;
    /// the ciphertext is copied unchanged. Write failures are logged and
    /// otherwise ignored.
    pub fn migrate_legacy_auth(&self, record: &PeerRecord) -> CoreResult<String> {
        let Some(legacy) = record.legacy.as_ref() else {
            return Ok(String::new());
        };

        let Some(password) = self.cipher.decrypt_best_effort(&legacy.encrypted_password) else {
            debug!(peer = %record.name, "legacy password not decryptable on this machine");
            return Ok(String::new());
        };

        if legacy.has_credentials()
            && self.catalog.peer_auth(&record.name, self.machine_id())?.is_none()
        {
            let update = PeerAuthUpdate {
                peer_name: record.name.clone(),
                machine_id: self.machine_id().to_string(),
                remote_url: Some(record.remote_url.clone()),
                username: legacy.username.clone().filter(|u| !u.is_empty()),
                encrypted_password: legacy.encrypted_password.clone(),
            };
            match self.catalog.upsert_peer_auth(update) {
                Ok(()) => info!(
                    peer = %record.name,
                    machine_id = %self.machine_id(),
                    "migrated legacy peer credentials"
                ),
                Err(e) => warn!(peer = %record.name, error = %e, "legacy credential backfill failed"),
            }
        }

        Ok(password)
    }

    /// Runs the legacy migration for every peer; returns how many overlays
    /// were created.
    pub fn migrate_all_legacy(&self, ctx: &OpContext) -> CoreResult<usize> {
        ctx.check()?;
        let mut migrated = 0;
        for record in self.catalog.peers()? {
            if self.catalog.peer_auth(&record.name, self.machine_id())?.is_some() {
                continue;
            }
            self.migrate_legacy_auth(&record)?;
            if self.catalog.peer_auth(&record.name, self.machine_id())?.is_some() {
                migrated += 1;
            }
        }
        Ok(migrated)
    }

    /// Runs `body` with the peer's credentials on the ambient channel.
    ///
    /// `body` receives the username to forward as the `--user` argument. An
    /// unknown peer runs without credentials.
    ///
    /// # Errors
    ///
    /// [`CoreError::MissingCredential`] before any remote call when the peer
    /// declares a username but has no usable password on this machine.
    pub fn with_peer_credentials<T, E>(
        &self,
        ctx: &OpContext,
        name: &str,
        body: impl FnOnce(Option<&str>) -> Result<T, E>,
    ) -> Result<T, E>
    where
        E: From<CoreError>,
    {
        let peer = self.get_peer(ctx, name)?;
        if let Some(peer) = &peer {
            self.require_credentials(peer)?;
        }

        let (username, password) = peer
            .as_ref()
            .map_or(("", ""), |p| (p.username.as_str(), p.password.as_str()));
        let _session = CredentialSession::open(ctx, self.channel.as_ref(), username, password)?;
        body(peer.as_ref().and_then(Peer::username_arg))
    }

    /// Fails when a peer declares a username without a usable password.
    pub fn require_credentials(&self, peer: &Peer) -> CoreResult<()> {
        if peer.has_username() && peer.password.is_empty() {
            warn!(peer = %peer.name, username = %peer.username, "peer has no local password");
            return Err(CoreError::MissingCredential {
                peer: peer.name.clone(),
                username: peer.username.clone(),
                command: self.config.add_peer_command.clone(),
            });
        }
        Ok(())
    }

    fn effective_peer(&self, record: PeerRecord) -> CoreResult<Peer> {
        let overlay = self.catalog.peer_auth(&record.name, self.machine_id())?;
        let password = match &overlay {
            Some(overlay) => self
                .cipher
                .decrypt_best_effort(&overlay.encrypted_password)
                .unwrap_or_default(),
            None => self.migrate_legacy_auth(&record)?,
        };
        Ok(merge_views(record, overlay.as_ref(), password))
    }
}

/// Lays an overlay over a shared row.
fn merge_views(record: PeerRecord, overlay: Option<&PeerAuthRecord>, password: String) -> Peer {
    let legacy = record.legacy.unwrap_or_default();

    let remote_url = overlay
        .and_then(|o| o.remote_url.clone())
        .filter(|url| !url.is_empty())
        .unwrap_or(record.remote_url);
    let username = overlay
        .and_then(|o| o.username.clone())
        .filter(|u| !u.is_empty())
        .or(legacy.username)
        .unwrap_or_default();
    let last_sync = overlay.and_then(|o| o.last_sync).or(legacy.last_sync);

    Peer {
        name: record.name,
        remote_url,
        sovereignty: record.sovereignty,
        username,
        password,
        last_sync,
        created_at: record.created_at,
        updated_at: record.updated_at,
    }
}

fn non_empty(value: &str) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

impl<C, S> std::fmt::Debug for CredentialStore<C, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialStore")
            .field("identity", &self.identity)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use townsync_storage::{LegacyPeerAuth, MemoryCatalog, StoreError};
    use townsync_testkit::{MemoryNetwork, MemoryVersionedStore, StoreOp};

    #[derive(Default)]
    struct RecordingChannel {
        installs: Mutex<Vec<(String, String)>>,
        clears: Mutex<usize>,
    }

    impl AmbientChannel for RecordingChannel {
        fn install(&self, username: &str, password: &str) {
            self.installs
                .lock()
                .push((username.to_string(), password.to_string()));
        }

        fn clear(&self) {
            *self.clears.lock() += 1;
        }
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        catalog: Arc<MemoryCatalog>,
        store: Arc<MemoryVersionedStore>,
        creds: CredentialStore<MemoryCatalog, MemoryVersionedStore>,
        channel: Arc<RecordingChannel>,
    }

    fn fixture() -> Fixture {
        fixture_on_host("host-a", None, None)
    }

    fn fixture_on_host(
        host: &str,
        dir: Option<tempfile::TempDir>,
        catalog: Option<Arc<MemoryCatalog>>,
    ) -> Fixture {
        let dir = dir.unwrap_or_else(|| tempfile::tempdir().unwrap());
        let catalog = catalog.unwrap_or_else(|| Arc::new(MemoryCatalog::new()));
        let store = Arc::new(MemoryVersionedStore::new(&MemoryNetwork::new(), "local"));
        let config = FederationConfig::default();
        let identity = StoreIdentity::for_host(host, dir.path(), &config);
        let channel = Arc::new(RecordingChannel::default());
        let creds = CredentialStore::new(Arc::clone(&catalog), Arc::clone(&store), identity, config)
            .with_channel(channel.clone());
        Fixture {
            _dir: dir,
            catalog,
            store,
            creds,
            channel,
        }
    }

    fn legacy_row(f: &Fixture, name: &str, username: Option<&str>, encrypted: Vec<u8>) {
        f.catalog.upsert_peer(name, "http://shared/db", "T1").unwrap();
        let mut record = f.catalog.peer(name).unwrap().unwrap();
        record.legacy = Some(LegacyPeerAuth {
            username: username.map(str::to_string),
            encrypted_password: encrypted,
            last_sync: Some(Timestamp::from_millis(1_000)),
        });
        f.catalog.put_peer(record).unwrap();
    }

    #[test]
    fn add_and_get_peer() {
        let f = fixture();
        let ctx = OpContext::new();
        let reg = PeerRegistration::new("hub", "http://hub/db")
            .with_sovereignty("T2")
            .with_credentials("sync", "s3cret");

        f.creds.add_peer(&ctx, &reg).unwrap();

        let peer = f.creds.get_peer(&ctx, "hub").unwrap().unwrap();
        assert_eq!(peer.remote_url, "http://hub/db");
        assert_eq!(peer.sovereignty, "T2");
        assert_eq!(peer.username, "sync");
        assert_eq!(peer.password, "s3cret");

        let overlay = f.catalog.peer_auth("hub", f.creds.machine_id()).unwrap().unwrap();
        assert!(!overlay.encrypted_password.is_empty());
        assert_ne!(overlay.encrypted_password, b"s3cret".to_vec());

        let remotes = f.store.list_remotes(&ctx).unwrap();
        assert!(remotes.iter().any(|r| r.name == "hub" && r.url == "http://hub/db"));
    }

    #[test]
    fn add_peer_validates_before_writing() {
        let f = fixture();
        let ctx = OpContext::new();

        let err = f
            .creds
            .add_peer(&ctx, &PeerRegistration::new("abc;rm", "http://x/db"))
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidPeerName { .. }));

        let err = f
            .creds
            .add_peer(&ctx, &PeerRegistration::new("hub", "   "))
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidRemoteUrl { .. }));

        assert!(f.catalog.peers().unwrap().is_empty());
        assert!(f.store.list_remotes(&ctx).unwrap().is_empty());
    }

    #[test]
    fn add_peer_twice_swallows_existing_remote() {
        let f = fixture();
        let ctx = OpContext::new();
        f.creds
            .add_peer(&ctx, &PeerRegistration::new("hub", "http://hub/db"))
            .unwrap();
        f.creds
            .add_peer(
                &ctx,
                &PeerRegistration::new("hub", "http://hub2/db").with_sovereignty("T3"),
            )
            .unwrap();

        let peer = f.creds.get_peer(&ctx, "hub").unwrap().unwrap();
        assert_eq!(peer.remote_url, "http://hub2/db");
        assert_eq!(peer.sovereignty, "T3");
    }

    #[test]
    fn add_peer_surfaces_other_remote_errors() {
        let f = fixture();
        let ctx = OpContext::new();
        f.store
            .fail_next(StoreOp::AddRemote, StoreError::failed("remote config is read-only"));

        let err = f
            .creds
            .add_peer(&ctx, &PeerRegistration::new("hub", "http://hub/db"))
            .unwrap_err();
        assert!(err.to_string().contains("add-remote failed for peer hub"));
    }

    #[test]
    fn get_missing_peer_is_none() {
        let f = fixture();
        assert!(f.creds.get_peer(&OpContext::new(), "nobody").unwrap().is_none());
    }

    #[test]
    fn overlay_url_wins_shared_username_falls_through() {
        let f = fixture();
        legacy_row(&f, "beta", Some("X1"), Vec::new());
        f.catalog
            .upsert_peer_auth(PeerAuthUpdate {
                peer_name: "beta".into(),
                machine_id: f.creds.machine_id().to_string(),
                remote_url: Some("http://U2/db".into()),
                username: None,
                encrypted_password: Vec::new(),
            })
            .unwrap();

        let peer = f.creds.get_peer(&OpContext::new(), "beta").unwrap().unwrap();
        assert_eq!(peer.remote_url, "http://U2/db");
        assert_eq!(peer.username, "X1");
        // Overlay exists: legacy last sync still shows through until this
        // machine records its own.
        assert_eq!(peer.last_sync, Some(Timestamp::from_millis(1_000)));
    }

    #[test]
    fn overlay_wins_over_undecryptable_legacy() {
        let f = fixture();
        legacy_row(&f, "beta-town", Some("shared-user"), b"invalid-ciphertext".to_vec());
        f.catalog
            .upsert_peer_auth(PeerAuthUpdate {
                peer_name: "beta-town".into(),
                machine_id: f.creds.machine_id().to_string(),
                remote_url: Some("http://localhost/db".into()),
                username: Some("local-user".into()),
                encrypted_password: f.creds.cipher.encrypt("local-pass").unwrap(),
            })
            .unwrap();

        let peer = f.creds.get_peer(&OpContext::new(), "beta-town").unwrap().unwrap();
        assert_eq!(peer.username, "local-user");
        assert_eq!(peer.password, "local-pass");
    }

    #[test]
    fn empty_overlay_password_ignores_legacy() {
        let f = fixture();
        let legacy_ct = f.creds.cipher.encrypt("legacy-pass").unwrap();
        legacy_row(&f, "beta", Some("shared-user"), legacy_ct);
        f.catalog
            .upsert_peer_auth(PeerAuthUpdate {
                peer_name: "beta".into(),
                machine_id: f.creds.machine_id().to_string(),
                remote_url: None,
                username: None,
                encrypted_password: Vec::new(),
            })
            .unwrap();

        let peer = f.creds.get_peer(&OpContext::new(), "beta").unwrap().unwrap();
        assert_eq!(peer.password, "");
    }

    #[test]
    fn legacy_backfill_is_idempotent() {
        let f = fixture();
        let ctx = OpContext::new();
        let legacy_ct = f.creds.cipher.encrypt("legacy-pass").unwrap();
        legacy_row(&f, "beta", Some("shared-user"), legacy_ct.clone());

        let first = f.creds.get_peer(&ctx, "beta").unwrap().unwrap();
        let second = f.creds.get_peer(&ctx, "beta").unwrap().unwrap();
        assert_eq!(first.password, "legacy-pass");
        assert_eq!(second.password, "legacy-pass");

        let overlays = f.catalog.peer_auths("beta").unwrap();
        assert_eq!(overlays.len(), 1);
        assert_eq!(overlays[0].machine_id, f.creds.machine_id());
        assert_eq!(overlays[0].username.as_deref(), Some("shared-user"));
        assert_eq!(overlays[0].remote_url.as_deref(), Some("http://shared/db"));
        assert_eq!(overlays[0].encrypted_password, legacy_ct);
    }

    #[test]
    fn undecryptable_legacy_is_not_backfilled() {
        let f = fixture();
        legacy_row(&f, "beta", Some("shared-user"), b"invalid-ciphertext".to_vec());

        let peer = f.creds.get_peer(&OpContext::new(), "beta").unwrap().unwrap();
        assert_eq!(peer.username, "shared-user");
        assert_eq!(peer.password, "");
        assert!(f.catalog.peer_auths("beta").unwrap().is_empty());
    }

    #[test]
    fn list_peers_is_ordered_and_best_effort() {
        let f = fixture();
        let ctx = OpContext::new();
        legacy_row(&f, "zeta", Some("z"), b"invalid-ciphertext".to_vec());
        f.creds
            .add_peer(&ctx, &PeerRegistration::new("alpha", "http://a/db").with_credentials("a", "pa"))
            .unwrap();
        let legacy_ct = f.creds.cipher.encrypt("pm").unwrap();
        legacy_row(&f, "mid", Some("m"), legacy_ct);

        let peers = f.creds.list_peers(&ctx).unwrap();
        let names: Vec<_> = peers.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["alpha", "mid", "zeta"]);
        assert_eq!(peers[0].password, "pa");
        assert_eq!(peers[1].password, "pm");
        assert_eq!(peers[2].password, "");

        // The decryptable legacy row was migrated while listing.
        assert!(f.catalog.peer_auth("mid", f.creds.machine_id()).unwrap().is_some());
    }

    #[test]
    fn other_machine_does_not_inherit_credentials() {
        let a = fixture_on_host("host-a", None, None);
        let ctx = OpContext::new();
        a.creds
            .add_peer(&ctx, &PeerRegistration::new("hub", "http://hub/db").with_credentials("u", "p"))
            .unwrap();

        let Fixture { _dir, catalog, .. } = a;
        let b = fixture_on_host("host-b", Some(_dir), Some(catalog));
        let peer = b.creds.get_peer(&ctx, "hub").unwrap().unwrap();
        assert_eq!(peer.remote_url, "http://hub/db");
        assert_eq!(peer.username, "");
        assert_eq!(peer.password, "");
    }

    #[test]
    fn remove_peer_clears_everything_and_is_idempotent() {
        let f = fixture();
        let ctx = OpContext::new();
        f.creds
            .add_peer(&ctx, &PeerRegistration::new("hub", "http://hub/db").with_credentials("u", "p"))
            .unwrap();
        f.catalog
            .upsert_peer_auth(PeerAuthUpdate {
                peer_name: "hub".into(),
                machine_id: "m-other".into(),
                remote_url: None,
                username: Some("other".into()),
                encrypted_password: Vec::new(),
            })
            .unwrap();

        f.creds.remove_peer(&ctx, "hub").unwrap();
        assert!(f.catalog.peer("hub").unwrap().is_none());
        assert!(f.catalog.peer_auths("hub").unwrap().is_empty());
        assert!(f.store.list_remotes(&ctx).unwrap().is_empty());

        f.creds.remove_peer(&ctx, "hub").unwrap();
    }

    #[test]
    fn record_sync_is_machine_scoped() {
        let f = fixture();
        let ctx = OpContext::new();
        legacy_row(&f, "hub", None, Vec::new());
        f.creds
            .add_peer(&ctx, &PeerRegistration::new("hub", "http://shared/db"))
            .unwrap();
        f.catalog
            .upsert_peer_auth(PeerAuthUpdate {
                peer_name: "hub".into(),
                machine_id: "m-other".into(),
                remote_url: None,
                username: None,
                encrypted_password: Vec::new(),
            })
            .unwrap();

        assert!(f.creds.record_sync(&ctx, "hub").unwrap());

        let mine = f.catalog.peer_auth("hub", f.creds.machine_id()).unwrap().unwrap();
        assert!(mine.last_sync.is_some());
        let other = f.catalog.peer_auth("hub", "m-other").unwrap().unwrap();
        assert!(other.last_sync.is_none());
        let shared = f.catalog.peer("hub").unwrap().unwrap();
        assert_eq!(
            shared.legacy.unwrap().last_sync,
            Some(Timestamp::from_millis(1_000))
        );
    }

    #[test]
    fn record_sync_without_overlay_is_noop() {
        let f = fixture();
        f.catalog.upsert_peer("hub", "http://hub/db", "").unwrap();
        assert!(!f.creds.record_sync(&OpContext::new(), "hub").unwrap());
        assert!(f.catalog.peer_auths("hub").unwrap().is_empty());
    }

    #[test]
    fn migrate_all_legacy_counts_created_overlays() {
        let f = fixture();
        let ctx = OpContext::new();
        legacy_row(&f, "one", Some("u1"), f.creds.cipher.encrypt("p1").unwrap());
        legacy_row(&f, "two", Some("u2"), b"invalid-ciphertext".to_vec());
        legacy_row(&f, "three", None, Vec::new());
        f.catalog.upsert_peer("plain", "http://plain/db", "").unwrap();

        assert_eq!(f.creds.migrate_all_legacy(&ctx).unwrap(), 1);
        assert_eq!(f.creds.migrate_all_legacy(&ctx).unwrap(), 0);
    }

    #[test]
    fn credential_gate_fails_before_remote_call() {
        let f = fixture();
        let ctx = OpContext::new();
        legacy_row(&f, "hub", Some("u"), Vec::new());

        let mut called = false;
        let err = f
            .creds
            .with_peer_credentials(&ctx, "hub", |_| {
                called = true;
                Ok::<_, CoreError>(())
            })
            .unwrap_err();

        assert!(!called);
        assert!(err.is_credential());
        let msg = err.to_string();
        assert!(msg.contains("hub"));
        assert!(msg.contains("\"u\""));
        assert!(msg.contains("town federation add-peer"));
        assert!(f.channel.installs.lock().is_empty());
    }

    #[test]
    fn credentials_are_installed_for_the_body() {
        let f = fixture();
        let ctx = OpContext::new();
        f.creds
            .add_peer(&ctx, &PeerRegistration::new("hub", "http://hub/db").with_credentials("u", "p"))
            .unwrap();

        let user = f
            .creds
            .with_peer_credentials(&ctx, "hub", |user| Ok::<_, CoreError>(user.map(str::to_string)))
            .unwrap();

        assert_eq!(user.as_deref(), Some("u"));
        assert_eq!(*f.channel.installs.lock(), vec![("u".to_string(), "p".to_string())]);
        assert_eq!(*f.channel.clears.lock(), 1);
    }

    #[test]
    fn unknown_or_open_peer_runs_without_credentials() {
        let f = fixture();
        let ctx = OpContext::new();
        f.creds
            .add_peer(&ctx, &PeerRegistration::new("open", "http://open/db"))
            .unwrap();

        for name in ["open", "unknown"] {
            let user = f
                .creds
                .with_peer_credentials(&ctx, name, |user| Ok::<_, CoreError>(user.is_some()))
                .unwrap();
            assert!(!user);
        }
        assert!(f.channel.installs.lock().is_empty());
    }

    #[test]
    fn cancelled_context_is_refused() {
        let f = fixture();
        let ctx = OpContext::new();
        ctx.cancel();
        let err = f
            .creds
            .add_peer(&ctx, &PeerRegistration::new("hub", "http://hub/db"))
            .unwrap_err();
        assert!(matches!(err, CoreError::Cancelled));
        assert!(f.catalog.peers().unwrap().is_empty());
    }
}
