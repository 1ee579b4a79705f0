//! Machine identity.
//!
//! A machine id names one physical store instance: the pair (host, resolved
//! store path). It is what keeps one machine's credentials away from every
//! other machine that replicates the same peer rows.

use crate::config::FederationConfig;
use crate::crypto::CredentialKey;
use sha2::{Digest, Sha256};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Prefix of every machine id.
pub const MACHINE_ID_PREFIX: &str = "m-";

/// Number of hash bytes rendered into a machine id.
const MACHINE_ID_BYTES: usize = 16;

/// Resolves a store path to an absolute, symlink-free form.
///
/// Falls back to a lexically absolute path when the path does not exist yet,
/// and to the path as given when even that fails.
#[must_use]
pub fn resolve_store_path(path: &Path) -> PathBuf {
    path.canonicalize()
        .or_else(|_| std::path::absolute(path))
        .unwrap_or_else(|_| path.to_path_buf())
}

/// Returns this host's name, or `fallback` if it cannot be read.
#[must_use]
pub fn local_host_name(fallback: &str) -> String {
    match hostname::get() {
        Ok(name) if !name.is_empty() => name.to_string_lossy().into_owned(),
        _ => fallback.to_string(),
    }
}

/// Computes the machine id for a host and a resolved store path.
///
/// `m-` followed by the hex of the first 16 bytes of
/// `SHA-256(host || "|" || path || "|" || tag)`.
#[must_use]
pub fn machine_id_for(host: &str, resolved_path: &Path, tag: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(host.as_bytes());
    hasher.update(b"|");
    hasher.update(resolved_path.as_os_str().as_encoded_bytes());
    hasher.update(b"|");
    hasher.update(tag.as_bytes());
    let digest = hasher.finalize();

    let mut id = String::with_capacity(MACHINE_ID_PREFIX.len() + MACHINE_ID_BYTES * 2);
    id.push_str(MACHINE_ID_PREFIX);
    for byte in &digest[..MACHINE_ID_BYTES] {
        let _ = write!(id, "{byte:02x}");
    }
    id
}

/// Identity of the local store: resolved path, machine id and credential key.
///
/// Computed once when the store is opened and shared by every operation on it.
#[derive(Debug, Clone)]
pub struct StoreIdentity {
    store_path: PathBuf,
    machine_id: String,
    key: CredentialKey,
}

impl StoreIdentity {
    /// Resolves the identity of the store at `store_path` on this host.
    #[must_use]
    pub fn resolve(store_path: &Path, config: &FederationConfig) -> Self {
        let host = local_host_name(&config.fallback_host);
        Self::for_host(&host, store_path, config)
    }

    /// Resolves the identity as if running on `host`.
    ///
    /// Lets two "machines" share one test process.
    #[must_use]
    pub fn for_host(host: &str, store_path: &Path, config: &FederationConfig) -> Self {
        let store_path = resolve_store_path(store_path);
        let machine_id = machine_id_for(host, &store_path, &config.machine_domain);
        let key = CredentialKey::derive(&store_path, &config.key_domain);
        debug!(machine_id = %machine_id, path = ?store_path, "resolved store identity");
        Self {
            store_path,
            machine_id,
            key,
        }
    }

    /// Returns the resolved store path.
    #[must_use]
    pub fn store_path(&self) -> &Path {
        &self.store_path
    }

    /// Returns the machine id.
    #[must_use]
    pub fn machine_id(&self) -> &str {
        &self.machine_id
    }

    /// Returns the credential key.
    #[must_use]
    pub fn key(&self) -> &CredentialKey {
        &self.key
    }
}
