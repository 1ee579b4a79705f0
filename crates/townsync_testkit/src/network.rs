//! The simulated network of in-memory stores.
//!
//! Every store registered on a [`MemoryNetwork`] is reachable by URL from
//! every other store on it. All stores share one commit graph, so fetching
//! only ever copies refs.
//!
//! Lock order: a repository lock may be held while taking the graph lock.
//! The repository map lock is never held while locking anything else, and no
//! code path holds two repository locks at once.

use parking_lot::{Mutex, MutexGuard};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use crate::store::Repo;

/// Row address: (table, key).
pub(crate) type RowKey = (String, String);

/// Full table contents at one commit.
pub(crate) type Snapshot = BTreeMap<RowKey, String>;

#[derive(Debug, Clone)]
pub(crate) struct Commit {
    pub(crate) parents: Vec<u64>,
    pub(crate) data: Snapshot,
    pub(crate) message: String,
}

/// The commit graph shared by every store on a network.
#[derive(Debug, Default)]
pub(crate) struct Graph {
    commits: BTreeMap<u64, Commit>,
    next_id: u64,
}

impl Graph {
    pub(crate) fn commit(&mut self, parents: Vec<u64>, data: Snapshot, message: &str) -> u64 {
        self.next_id += 1;
        let id = self.next_id;
        self.commits.insert(
            id,
            Commit {
                parents,
                data,
                message: message.to_string(),
            },
        );
        id
    }

    pub(crate) fn get(&self, id: u64) -> Option<&Commit> {
        self.commits.get(&id)
    }

    pub(crate) fn data(&self, id: u64) -> Snapshot {
        self.commits
            .get(&id)
            .map(|c| c.data.clone())
            .unwrap_or_default()
    }

    /// Returns `id` and all of its ancestors.
    pub(crate) fn ancestors(&self, id: u64) -> BTreeSet<u64> {
        let mut seen = BTreeSet::new();
        let mut stack = vec![id];
        while let Some(next) = stack.pop() {
            if !seen.insert(next) {
                continue;
            }
            if let Some(commit) = self.commits.get(&next) {
                stack.extend(commit.parents.iter().copied());
            }
        }
        seen
    }

    /// Returns true if `ancestor` is reachable from `descendant`.
    pub(crate) fn is_ancestor(&self, ancestor: u64, descendant: u64) -> bool {
        self.ancestors(descendant).contains(&ancestor)
    }

    /// Returns the deepest common ancestor of two commits.
    pub(crate) fn merge_base(&self, a: u64, b: u64) -> Option<u64> {
        let ours = self.ancestors(a);
        let theirs = self.ancestors(b);
        ours.intersection(&theirs)
            .copied()
            .max_by_key(|&id| self.ancestors(id).len())
    }
}

#[derive(Default)]
struct NetworkInner {
    repos: Mutex<HashMap<String, Arc<Mutex<Repo>>>>,
    graph: Mutex<Graph>,
}

/// A set of in-memory stores that can reach each other by URL.
///
/// Cheap to clone; clones share the same stores.
#[derive(Clone, Default)]
pub struct MemoryNetwork {
    inner: Arc<NetworkInner>,
}

impl MemoryNetwork {
    /// Creates an empty network.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the store at `url` unreachable.
    ///
    /// Returns true if a store was registered there.
    pub fn disconnect(&self, url: &str) -> bool {
        self.inner.repos.lock().remove(url).is_some()
    }

    /// Returns true if a store is reachable at `url`.
    pub fn is_reachable(&self, url: &str) -> bool {
        self.inner.repos.lock().contains_key(url)
    }

    pub(crate) fn register(&self, url: &str, repo: Arc<Mutex<Repo>>) {
        self.inner.repos.lock().insert(url.to_string(), repo);
    }

    pub(crate) fn repo(&self, url: &str) -> Option<Arc<Mutex<Repo>>> {
        self.inner.repos.lock().get(url).cloned()
    }

    pub(crate) fn graph(&self) -> MutexGuard<'_, Graph> {
        self.inner.graph.lock()
    }
}

impl std::fmt::Debug for MemoryNetwork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut urls: Vec<String> = self.inner.repos.lock().keys().cloned().collect();
        urls.sort();
        f.debug_struct("MemoryNetwork").field("stores", &urls).finish()
    }
}
