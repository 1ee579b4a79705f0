//! Catalog trait and the federation table records.

use crate::error::StorageResult;
use crate::types::Timestamp;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Credentials that older releases kept on the shared peer row.
///
/// Superseded by [`PeerAuthRecord`]; still read so each machine can migrate
/// its own copy lazily.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegacyPeerAuth {
    /// Username stored on the shared row.
    pub username: Option<String>,
    /// Encrypted password stored on the shared row.
    pub encrypted_password: Vec<u8>,
    /// Last sync time stored on the shared row.
    pub last_sync: Option<Timestamp>,
}

impl LegacyPeerAuth {
    /// Returns true if there is anything to migrate.
    #[must_use]
    pub fn has_credentials(&self) -> bool {
        self.username.is_some() || !self.encrypted_password.is_empty()
    }
}

/// Shared peer metadata, one row per logical peer across all machines.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerRecord {
    /// Unique peer name.
    pub name: String,
    /// Default connection target.
    pub remote_url: String,
    /// Opaque policy tag.
    pub sovereignty: String,
    /// Deprecated shared credentials, if this row predates overlays.
    pub legacy: Option<LegacyPeerAuth>,
    /// Row creation time.
    pub created_at: Timestamp,
    /// Last update time.
    pub updated_at: Timestamp,
}

/// Machine-scoped auth overlay, keyed by (peer name, machine id).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerAuthRecord {
    /// Peer this overlay belongs to.
    pub peer_name: String,
    /// Machine that owns this overlay.
    pub machine_id: String,
    /// Override of the shared URL.
    pub remote_url: Option<String>,
    /// Override of the username.
    pub username: Option<String>,
    /// Encrypted password; empty means "no secret".
    pub encrypted_password: Vec<u8>,
    /// Machine-local last sync time.
    pub last_sync: Option<Timestamp>,
    /// Last update time.
    pub updated_at: Timestamp,
}

/// Values written by an overlay upsert.
///
/// `last_sync` is not part of an upsert; only
/// [`Catalog::touch_peer_auth_sync`] moves it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerAuthUpdate {
    /// Peer name.
    pub peer_name: String,
    /// Owning machine.
    pub machine_id: String,
    /// URL override.
    pub remote_url: Option<String>,
    /// Username override.
    pub username: Option<String>,
    /// Encrypted password.
    pub encrypted_password: Vec<u8>,
}

/// The federation tables inside the local store.
///
/// # Invariants
///
/// - At most one [`PeerAuthRecord`] exists per (peer, machine).
/// - [`peers`](Self::peers) is ordered by name.
/// - Deleting rows that do not exist is not an error.
pub trait Catalog: Send + Sync {
    /// Reads one shared peer row.
    fn peer(&self, name: &str) -> StorageResult<Option<PeerRecord>>;

    /// Reads all shared peer rows ordered by name.
    fn peers(&self) -> StorageResult<Vec<PeerRecord>>;

    /// Inserts a shared row, or updates URL and sovereignty of an existing one.
    fn upsert_peer(&self, name: &str, remote_url: &str, sovereignty: &str) -> StorageResult<()>;

    /// Writes a full shared row as-is (imports and legacy fixtures).
    fn put_peer(&self, record: PeerRecord) -> StorageResult<()>;

    /// Deletes a shared row. Returns whether a row existed.
    fn delete_peer(&self, name: &str) -> StorageResult<bool>;

    /// Reads the overlay of one machine.
    fn peer_auth(&self, name: &str, machine_id: &str) -> StorageResult<Option<PeerAuthRecord>>;

    /// Reads the overlays of every machine for a peer.
    fn peer_auths(&self, name: &str) -> StorageResult<Vec<PeerAuthRecord>>;

    /// Inserts or updates an overlay, preserving its `last_sync`.
    fn upsert_peer_auth(&self, update: PeerAuthUpdate) -> StorageResult<()>;

    /// Deletes the overlays of every machine for a peer. Returns the count.
    fn delete_peer_auths(&self, name: &str) -> StorageResult<usize>;

    /// Sets `last_sync` and `updated_at` of one machine's overlay.
    ///
    /// Returns false if that overlay does not exist.
    fn touch_peer_auth_sync(&self, name: &str, machine_id: &str, at: Timestamp)
        -> StorageResult<bool>;

    /// Reads a metadata value.
    fn metadata(&self, key: &str) -> StorageResult<Option<String>>;

    /// Writes a metadata value.
    fn set_metadata(&self, key: &str, value: &str) -> StorageResult<()>;
}

/// In-memory form of the three tables, shared by every catalog.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct Tables {
    peers: BTreeMap<String, PeerRecord>,
    /// peer name -> machine id -> overlay
    peer_auth: BTreeMap<String, BTreeMap<String, PeerAuthRecord>>,
    metadata: BTreeMap<String, String>,
}

impl Tables {
    pub(crate) fn peer(&self, name: &str) -> Option<PeerRecord> {
        self.peers.get(name).cloned()
    }

    pub(crate) fn peers(&self) -> Vec<PeerRecord> {
        self.peers.values().cloned().collect()
    }

    pub(crate) fn upsert_peer(&mut self, name: &str, remote_url: &str, sovereignty: &str) {
        let now = Timestamp::now();
        match self.peers.get_mut(name) {
            Some(row) => {
                row.remote_url = remote_url.to_string();
                row.sovereignty = sovereignty.to_string();
                row.updated_at = now;
            }
            None => {
                self.peers.insert(
                    name.to_string(),
                    PeerRecord {
                        name: name.to_string(),
                        remote_url: remote_url.to_string(),
                        sovereignty: sovereignty.to_string(),
                        legacy: None,
                        created_at: now,
                        updated_at: now,
                    },
                );
            }
        }
    }

    pub(crate) fn put_peer(&mut self, record: PeerRecord) {
        self.peers.insert(record.name.clone(), record);
    }

    pub(crate) fn delete_peer(&mut self, name: &str) -> bool {
        self.peers.remove(name).is_some()
    }

    pub(crate) fn peer_auth(&self, name: &str, machine_id: &str) -> Option<PeerAuthRecord> {
        self.peer_auth
            .get(name)
            .and_then(|machines| machines.get(machine_id))
            .cloned()
    }

    pub(crate) fn peer_auths(&self, name: &str) -> Vec<PeerAuthRecord> {
        self.peer_auth
            .get(name)
            .map(|machines| machines.values().cloned().collect())
            .unwrap_or_default()
    }

    pub(crate) fn upsert_peer_auth(&mut self, update: PeerAuthUpdate) {
        let now = Timestamp::now();
        let machines = self.peer_auth.entry(update.peer_name.clone()).or_default();
        match machines.get_mut(&update.machine_id) {
            Some(row) => {
                row.remote_url = update.remote_url;
                row.username = update.username;
                row.encrypted_password = update.encrypted_password;
                row.updated_at = now;
            }
            None => {
                machines.insert(
                    update.machine_id.clone(),
                    PeerAuthRecord {
                        peer_name: update.peer_name,
                        machine_id: update.machine_id,
                        remote_url: update.remote_url,
                        username: update.username,
                        encrypted_password: update.encrypted_password,
                        last_sync: None,
                        updated_at: now,
                    },
                );
            }
        }
    }

    pub(crate) fn delete_peer_auths(&mut self, name: &str) -> usize {
        self.peer_auth.remove(name).map_or(0, |machines| machines.len())
    }

    pub(crate) fn touch_peer_auth_sync(&mut self, name: &str, machine_id: &str, at: Timestamp) -> bool {
        match self
            .peer_auth
            .get_mut(name)
            .and_then(|machines| machines.get_mut(machine_id))
        {
            Some(row) => {
                row.last_sync = Some(at);
                row.updated_at = at;
                true
            }
            None => false,
        }
    }

    pub(crate) fn metadata(&self, key: &str) -> Option<String> {
        self.metadata.get(key).cloned()
    }

    pub(crate) fn set_metadata(&mut self, key: &str, value: &str) {
        self.metadata.insert(key.to_string(), value.to_string());
    }
}
