//! Test fixtures.
//!
//! A [`TestTown`] is one participant in a federation test: an in-memory
//! versioned store reachable on a shared [`MemoryNetwork`], an in-memory
//! catalog, and a temporary directory standing in for the store path the
//! credential key and machine id are derived from.

use crate::network::MemoryNetwork;
use crate::store::MemoryVersionedStore;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tempfile::TempDir;
use townsync_storage::{MemoryCatalog, OpContext, VersionedStore};

static ENV_COUNTER: AtomicU64 = AtomicU64::new(0);

/// One town in a federation test.
pub struct TestTown {
    /// Town name, also used as the remote name other towns give it.
    pub name: String,
    /// The town's versioned store.
    pub store: Arc<MemoryVersionedStore>,
    /// The town's federation catalog.
    pub catalog: Arc<MemoryCatalog>,
    /// Ambient variable names this town's credentials are exposed through.
    pub env_vars: (String, String),
    _temp_dir: TempDir,
}

impl TestTown {
    /// Creates a town with a fresh history.
    pub fn new(network: &MemoryNetwork, name: &str) -> Self {
        let env_vars = unique_env_vars(name);
        let store = MemoryVersionedStore::new(network, &town_url(name))
            .with_ambient_vars(&env_vars.0, &env_vars.1);
        Self::assemble(name, store, env_vars)
    }

    /// Creates a town that starts from `origin`'s history.
    pub fn forked(network: &MemoryNetwork, name: &str, origin: &TestTown) -> Self {
        let env_vars = unique_env_vars(name);
        let store = MemoryVersionedStore::fork(network, &town_url(name), &origin.store)
            .with_ambient_vars(&env_vars.0, &env_vars.1);
        Self::assemble(name, store, env_vars)
    }

    fn assemble(name: &str, store: MemoryVersionedStore, env_vars: (String, String)) -> Self {
        Self {
            name: name.to_string(),
            store: Arc::new(store),
            catalog: Arc::new(MemoryCatalog::new()),
            env_vars,
            _temp_dir: TempDir::new().expect("Failed to create temp directory"),
        }
    }

    /// Returns the URL other towns reach this one at.
    pub fn url(&self) -> String {
        town_url(&self.name)
    }

    /// Returns the directory standing in for this town's store path.
    pub fn store_path(&self) -> PathBuf {
        self._temp_dir.path().join(".town")
    }

    /// Returns the temporary directory.
    pub fn temp_dir(&self) -> &std::path::Path {
        self._temp_dir.path()
    }

    /// Writes a row and commits it.
    pub fn commit_row(&self, table: &str, key: &str, value: &str) {
        self.store.write(table, key, value);
        self.store
            .commit(&OpContext::new(), &format!("set {table}[{key}]"))
            .expect("Failed to commit row");
    }
}

/// Returns the URL a town named `name` is registered at.
pub fn town_url(name: &str) -> String {
    format!("mem://{name}")
}

/// Returns ambient variable names unique to this process and call.
///
/// Tests run in parallel within one process; distinct names keep them from
/// observing each other's credentials.
pub fn unique_env_vars(tag: &str) -> (String, String) {
    let n = ENV_COUNTER.fetch_add(1, Ordering::SeqCst);
    let tag: String = tag
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
        .collect();
    (
        format!("TOWNSYNC_TEST_{tag}_{n}_USER"),
        format!("TOWNSYNC_TEST_{tag}_{n}_PASSWORD"),
    )
}

/// Creates two towns sharing one history. No remotes are configured.
pub fn town_pair(network: &MemoryNetwork, local: &str, peer: &str) -> (TestTown, TestTown) {
    let a = TestTown::new(network, local);
    let b = TestTown::forked(network, peer, &a);
    (a, b)
}
