//! In-memory catalog for testing.

use crate::catalog::{Catalog, PeerAuthRecord, PeerAuthUpdate, PeerRecord, Tables};
use crate::error::StorageResult;
use crate::types::Timestamp;
use parking_lot::RwLock;

/// An in-memory catalog.
///
/// Suitable for unit tests, integration tests and stores that keep their
/// federation tables elsewhere.
///
/// # Thread Safety
///
/// This catalog is thread-safe and can be shared across threads.
#[derive(Debug, Default)]
pub struct MemoryCatalog {
    tables: RwLock<Tables>,
}

impl MemoryCatalog {
    /// Creates a new empty catalog.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Catalog for MemoryCatalog {
    fn peer(&self, name: &str) -> StorageResult<Option<PeerRecord>> {
        Ok(self.tables.read().peer(name))
    }

    fn peers(&self) -> StorageResult<Vec<PeerRecord>> {
        Ok(self.tables.read().peers())
    }

    fn upsert_peer(&self, name: &str, remote_url: &str, sovereignty: &str) -> StorageResult<()> {
        self.tables.write().upsert_peer(name, remote_url, sovereignty);
        Ok(())
    }

    fn put_peer(&self, record: PeerRecord) -> StorageResult<()> {
        self.tables.write().put_peer(record);
        Ok(())
    }

    fn delete_peer(&self, name: &str) -> StorageResult<bool> {
        Ok(self.tables.write().delete_peer(name))
    }

    fn peer_auth(&self, name: &str, machine_id: &str) -> StorageResult<Option<PeerAuthRecord>> {
        Ok(self.tables.read().peer_auth(name, machine_id))
    }

    fn peer_auths(&self, name: &str) -> StorageResult<Vec<PeerAuthRecord>> {
        Ok(self.tables.read().peer_auths(name))
    }

    fn upsert_peer_auth(&self, update: PeerAuthUpdate) -> StorageResult<()> {
        self.tables.write().upsert_peer_auth(update);
        Ok(())
    }

    fn delete_peer_auths(&self, name: &str) -> StorageResult<usize> {
        Ok(self.tables.write().delete_peer_auths(name))
    }

    fn touch_peer_auth_sync(
        &self,
        name: &str,
        machine_id: &str,
        at: Timestamp,
    ) -> StorageResult<bool> {
        Ok(self.tables.write().touch_peer_auth_sync(name, machine_id, at))
    }

    fn metadata(&self, key: &str) -> StorageResult<Option<String>> {
        Ok(self.tables.read().metadata(key))
    }

    fn set_metadata(&self, key: &str, value: &str) -> StorageResult<()> {
        self.tables.write().set_metadata(key, value);
        Ok(())
    }
}
