//! File-backed catalog.
//!
//! The three tables are kept in memory and persisted as a single CBOR
//! snapshot after every mutation:
//!
//! ```text
//! <dir>/
//! ├─ federation.cbor       # Snapshot of peers, peer_auth_overlay, metadata
//! ├─ federation.cbor.tmp   # Temporary file for atomic snapshot writes
//! └─ federation.cbor.lock  # Advisory lock for single-writer
//! ```

use crate::catalog::{Catalog, PeerAuthRecord, PeerAuthUpdate, PeerRecord, Tables};
use crate::error::{StorageError, StorageResult};
use crate::types::Timestamp;
use fs2::FileExt;
use parking_lot::RwLock;
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

/// A catalog persisted to a CBOR snapshot file.
///
/// # Durability
///
/// Each mutation writes the full snapshot to a temporary file, syncs it and
/// renames it over the previous snapshot. A failed write leaves both the file
/// and the in-memory tables unchanged.
///
/// # Thread Safety
///
/// Thread-safe within a process. Across processes, the lock file held for the
/// lifetime of the catalog ensures a single writer.
#[derive(Debug)]
pub struct FileCatalog {
    path: PathBuf,
    tables: RwLock<Tables>,
    _lock_file: File,
}

impl FileCatalog {
    /// Opens or creates a catalog at `path`, creating parent directories.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Locked`] if another process holds the catalog,
    /// [`StorageError::Corrupted`] if the snapshot cannot be decoded.
    pub fn open(path: &Path) -> StorageResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let lock_path = with_suffix(path, "lock");
        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)?;
        if lock_file.try_lock_exclusive().is_err() {
            return Err(StorageError::Locked(path.to_path_buf()));
        }

        let tables = Self::load(path)?;
        debug!(path = ?path, "opened federation catalog");

        Ok(Self {
            path: path.to_path_buf(),
            tables: RwLock::new(tables),
            _lock_file: lock_file,
        })
    }

    /// Returns the snapshot path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(path: &Path) -> StorageResult<Tables> {
        let file = match File::open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Tables::default()),
            Err(e) => return Err(e.into()),
        };
        if file.metadata()?.len() == 0 {
            return Ok(Tables::default());
        }
        ciborium::from_reader(BufReader::new(file))
            .map_err(|e| StorageError::Corrupted(e.to_string()))
    }

    fn persist(&self, tables: &Tables) -> StorageResult<()> {
        let temp_path = with_suffix(&self.path, "tmp");
        {
            let file = File::create(&temp_path)?;
            let mut writer = BufWriter::new(file);
            ciborium::into_writer(tables, &mut writer)
                .map_err(|e| StorageError::Encode(e.to_string()))?;
            writer.flush()?;
            writer
                .into_inner()
                .map_err(|e| StorageError::Io(e.into_error()))?
                .sync_all()?;
        }
        fs::rename(&temp_path, &self.path)?;
        Ok(())
    }

    /// Applies a mutation and persists it; rolls the tables back on failure.
    fn mutate<R>(&self, f: impl FnOnce(&mut Tables) -> R) -> StorageResult<R> {
        let mut tables = self.tables.write();
        let before = tables.clone();
        let result = f(&mut tables);
        if let Err(e) = self.persist(&tables) {
            *tables = before;
            return Err(e);
        }
        Ok(result)
    }
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".");
    name.push(suffix);
    PathBuf::from(name)
}

impl Catalog for FileCatalog {
    fn peer(&self, name: &str) -> StorageResult<Option<PeerRecord>> {
        Ok(self.tables.read().peer(name))
    }

    fn peers(&self) -> StorageResult<Vec<PeerRecord>> {
        Ok(self.tables.read().peers())
    }

    fn upsert_peer(&self, name: &str, remote_url: &str, sovereignty: &str) -> StorageResult<()> {
        self.mutate(|t| t.upsert_peer(name, remote_url, sovereignty))
    }

    fn put_peer(&self, record: PeerRecord) -> StorageResult<()> {
        self.mutate(|t| t.put_peer(record))
    }

    fn delete_peer(&self, name: &str) -> StorageResult<bool> {
        self.mutate(|t| t.delete_peer(name))
    }

    fn peer_auth(&self, name: &str, machine_id: &str) -> StorageResult<Option<PeerAuthRecord>> {
        Ok(self.tables.read().peer_auth(name, machine_id))
    }

    fn peer_auths(&self, name: &str) -> StorageResult<Vec<PeerAuthRecord>> {
        Ok(self.tables.read().peer_auths(name))
    }

    fn upsert_peer_auth(&self, update: PeerAuthUpdate) -> StorageResult<()> {
        self.mutate(|t| t.upsert_peer_auth(update))
    }

    fn delete_peer_auths(&self, name: &str) -> StorageResult<usize> {
        self.mutate(|t| t.delete_peer_auths(name))
    }

    fn touch_peer_auth_sync(
        &self,
        name: &str,
        machine_id: &str,
        at: Timestamp,
    ) -> StorageResult<bool> {
        self.mutate(|t| t.touch_peer_auth_sync(name, machine_id, at))
    }

    fn metadata(&self, key: &str) -> StorageResult<Option<String>> {
        Ok(self.tables.read().metadata(key))
    }

    fn set_metadata(&self, key: &str, value: &str) -> StorageResult<()> {
        self.mutate(|t| t.set_metadata(key, value))
    }
}
