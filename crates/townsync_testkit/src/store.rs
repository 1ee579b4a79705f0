//! In-memory versioned store.
//!
//! [`MemoryVersionedStore`] simulates the behavior Townsync relies on from
//! a real versioned database:
//!
//! - a commit DAG with named branches and remote-tracking refs (`peer/main`)
//! - three-way merges against the merge base, with per-row conflicts
//! - autocommit: when on, a clean merge commits immediately and a conflicting
//!   merge is rolled back and reported as `ConflictDetected`; when off, the
//!   merge stays pending until it is resolved and committed as a merge commit
//!   with two parents
//! - fast-forward-only pushes
//!
//! Tests drive data through [`write`](MemoryVersionedStore::write) and
//! [`delete`](MemoryVersionedStore::delete), inject failures with
//! [`fail_next`](MemoryVersionedStore::fail_next), and inspect every call
//! (including the ambient credentials visible at the time) with
//! [`calls`](MemoryVersionedStore::calls).

use crate::network::{Graph, MemoryNetwork, RowKey, Snapshot};
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::Arc;
use townsync_storage::{
    Conflict, HistoryDivergence, OpContext, PositionMarker, RemoteInfo, StoreError, StoreResult,
    VersionedStore,
};

/// Default branch of every in-memory store.
pub const DEFAULT_BRANCH: &str = "main";

/// The versioned-store operations, for failure injection and call logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    /// [`VersionedStore::fetch`]
    Fetch,
    /// [`VersionedStore::pull`]
    Pull,
    /// [`VersionedStore::push`]
    Push,
    /// [`VersionedStore::merge`]
    Merge,
    /// [`VersionedStore::commit`]
    Commit,
    /// [`VersionedStore::list_conflicts`]
    ListConflicts,
    /// [`VersionedStore::resolve_conflict`]
    ResolveConflict,
    /// [`VersionedStore::set_autocommit`]
    SetAutocommit,
    /// [`VersionedStore::rollback`]
    Rollback,
    /// [`VersionedStore::current_position`]
    CurrentPosition,
    /// [`VersionedStore::compare_with`]
    CompareWith,
    /// [`VersionedStore::list_remotes`]
    ListRemotes,
    /// [`VersionedStore::add_remote`]
    AddRemote,
    /// [`VersionedStore::remove_remote`]
    RemoveRemote,
}

impl StoreOp {
    /// Returns true for operations that talk to a remote.
    pub fn is_remote(self) -> bool {
        matches!(self, Self::Fetch | Self::Pull | Self::Push)
    }
}

/// One recorded call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCall {
    /// Operation.
    pub op: StoreOp,
    /// Remote, ref, strategy or message the call targeted.
    pub target: String,
    /// The explicit `--user` argument.
    pub username: Option<String>,
    /// Ambient (username, password) visible when the call started.
    pub ambient: Option<(String, String)>,
}

/// A commit, as seen by tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitInfo {
    /// Commit id.
    pub id: String,
    /// Parent commit ids.
    pub parents: Vec<String>,
    /// Commit message.
    pub message: String,
}

#[derive(Debug, Clone)]
struct PendingConflict {
    conflict: Conflict,
    theirs: Option<String>,
}

#[derive(Debug, Clone)]
struct PendingMerge {
    theirs: u64,
    conflicts: Vec<PendingConflict>,
}

/// Mutable state of one store.
#[derive(Debug)]
pub(crate) struct Repo {
    branch: String,
    branches: BTreeMap<String, u64>,
    remote_refs: BTreeMap<String, u64>,
    remotes: BTreeMap<String, String>,
    working: Snapshot,
    autocommit: bool,
    pending: Option<PendingMerge>,
    read_only: bool,
}

impl Repo {
    pub(crate) fn empty(root: u64) -> Self {
        let mut branches = BTreeMap::new();
        branches.insert(DEFAULT_BRANCH.to_string(), root);
        Self {
            branch: DEFAULT_BRANCH.to_string(),
            branches,
            remote_refs: BTreeMap::new(),
            remotes: BTreeMap::new(),
            working: Snapshot::new(),
            autocommit: true,
            pending: None,
            read_only: false,
        }
    }

    fn head(&self) -> StoreResult<u64> {
        self.branches
            .get(&self.branch)
            .copied()
            .ok_or_else(|| StoreError::RefNotFound(self.branch.clone()))
    }

    fn resolve_ref(&self, name: &str) -> StoreResult<u64> {
        self.remote_refs
            .get(name)
            .or_else(|| self.branches.get(name))
            .copied()
            .ok_or_else(|| StoreError::RefNotFound(name.to_string()))
    }

    fn set_head(&mut self, id: u64) {
        self.branches.insert(self.branch.clone(), id);
    }

    fn merge(&mut self, graph: &mut Graph, theirs: u64, source: &str) -> StoreResult<()> {
        if self.pending.is_some() {
            return Err(StoreError::failed("a merge is already in progress"));
        }
        let head = self.head()?;
        let ours = graph.data(head);
        if self.working != ours {
            return Err(StoreError::failed(
                "uncommitted changes would be overwritten by merge",
            ));
        }

        if graph.is_ancestor(theirs, head) {
            return Ok(());
        }
        if graph.is_ancestor(head, theirs) {
            self.set_head(theirs);
            self.working = graph.data(theirs);
            return Ok(());
        }

        let base = graph
            .merge_base(head, theirs)
            .map(|id| graph.data(id))
            .unwrap_or_default();
        let (merged, conflicts) = three_way(&base, &ours, &graph.data(theirs));

        if conflicts.is_empty() && self.autocommit {
            let id = graph.commit(vec![head, theirs], merged.clone(), &format!("Merge {source}"));
            self.set_head(id);
            self.working = merged;
            return Ok(());
        }
        if self.autocommit {
            return Err(StoreError::conflict(format!(
                "{} conflicting rows merging {source}",
                conflicts.len()
            )));
        }

        self.working = merged;
        self.pending = Some(PendingMerge { theirs, conflicts });
        Ok(())
    }
}

fn three_way(base: &Snapshot, ours: &Snapshot, theirs: &Snapshot) -> (Snapshot, Vec<PendingConflict>) {
    let keys: BTreeSet<&RowKey> = base.keys().chain(ours.keys()).chain(theirs.keys()).collect();
    let mut merged = Snapshot::new();
    let mut conflicts = Vec::new();

    for key in keys {
        let (b, o, t) = (base.get(key), ours.get(key), theirs.get(key));
        let value = if o == t || t == b {
            o
        } else if o == b {
            t
        } else {
            let description = match (o, t) {
                (None, Some(_)) => "deleted locally, changed remotely",
                (Some(_), None) => "changed locally, deleted remotely",
                _ => "changed on both sides",
            };
            conflicts.push(PendingConflict {
                conflict: Conflict::new(&key.0, &key.1, description),
                theirs: t.cloned(),
            });
            o
        };
        if let Some(value) = value {
            merged.insert(key.clone(), value.clone());
        }
    }
    (merged, conflicts)
}

fn commit_id(id: u64) -> String {
    format!("c{id}")
}

/// An in-memory [`VersionedStore`] living on a [`MemoryNetwork`].
pub struct MemoryVersionedStore {
    url: String,
    network: MemoryNetwork,
    repo: Arc<Mutex<Repo>>,
    failures: Mutex<HashMap<StoreOp, VecDeque<StoreError>>>,
    calls: Mutex<Vec<RecordedCall>>,
    ambient_vars: Option<(String, String)>,
}

impl MemoryVersionedStore {
    /// Creates a store with a fresh history and registers it at `url`.
    pub fn new(network: &MemoryNetwork, url: &str) -> Self {
        let root = network
            .graph()
            .commit(Vec::new(), Snapshot::new(), "Initialize data repository");
        Self::register(network, url, Repo::empty(root))
    }

    /// Creates a store sharing `origin`'s current history.
    pub fn fork(network: &MemoryNetwork, url: &str, origin: &MemoryVersionedStore) -> Self {
        let (head, working) = {
            let origin = origin.repo.lock();
            let graph = network.graph();
            let head = origin.head().unwrap_or_default();
            (head, graph.data(head))
        };
        let mut repo = Repo::empty(head);
        repo.working = working;
        Self::register(network, url, repo)
    }

    fn register(network: &MemoryNetwork, url: &str, repo: Repo) -> Self {
        let repo = Arc::new(Mutex::new(repo));
        network.register(url, Arc::clone(&repo));
        Self {
            url: url.to_string(),
            network: network.clone(),
            repo,
            failures: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            ambient_vars: None,
        }
    }

    /// Records the given ambient variables on every call.
    #[must_use]
    pub fn with_ambient_vars(mut self, user_var: &str, password_var: &str) -> Self {
        self.ambient_vars = Some((user_var.to_string(), password_var.to_string()));
        self
    }

    /// Returns the URL this store is reachable at.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Fails the next call of `op` with `error`. Calls queue up.
    pub fn fail_next(&self, op: StoreOp, error: StoreError) {
        self.failures.lock().entry(op).or_default().push_back(error);
    }

    /// Rejects pushes into this store.
    pub fn set_read_only(&self, read_only: bool) {
        self.repo.lock().read_only = read_only;
    }

    /// Returns every recorded call.
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().clone()
    }

    /// Returns the recorded calls that talked to a remote.
    pub fn remote_calls(&self) -> Vec<RecordedCall> {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.op.is_remote())
            .cloned()
            .collect()
    }

    /// Returns the recorded operations in order.
    pub fn ops(&self) -> Vec<StoreOp> {
        self.calls.lock().iter().map(|c| c.op).collect()
    }

    /// Forgets recorded calls.
    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }

    /// Sets a row in the working set.
    pub fn write(&self, table: &str, key: &str, value: &str) {
        self.repo
            .lock()
            .working
            .insert((table.to_string(), key.to_string()), value.to_string());
    }

    /// Deletes a row from the working set.
    pub fn delete(&self, table: &str, key: &str) {
        self.repo
            .lock()
            .working
            .remove(&(table.to_string(), key.to_string()));
    }

    /// Reads a row from the working set.
    pub fn read(&self, table: &str, key: &str) -> Option<String> {
        self.repo
            .lock()
            .working
            .get(&(table.to_string(), key.to_string()))
            .cloned()
    }

    /// Returns the head commit of the current branch.
    pub fn head_commit(&self) -> Option<CommitInfo> {
        let repo = self.repo.lock();
        let head = repo.head().ok()?;
        let graph = self.network.graph();
        graph.get(head).map(|c| CommitInfo {
            id: commit_id(head),
            parents: c.parents.iter().copied().map(commit_id).collect(),
            message: c.message.clone(),
        })
    }

    /// Returns the number of commits reachable from the current branch.
    pub fn history_len(&self) -> usize {
        let repo = self.repo.lock();
        match repo.head() {
            Ok(head) => self.network.graph().ancestors(head).len(),
            Err(_) => 0,
        }
    }

    /// Returns true if autocommit is on.
    pub fn is_autocommit(&self) -> bool {
        self.repo.lock().autocommit
    }

    /// Returns true if a merge is pending.
    pub fn has_pending_merge(&self) -> bool {
        self.repo.lock().pending.is_some()
    }

    fn enter(
        &self,
        ctx: &OpContext,
        op: StoreOp,
        target: &str,
        username: Option<&str>,
    ) -> StoreResult<()> {
        ctx.check()?;

        let ambient = self.ambient_vars.as_ref().and_then(|(user_var, password_var)| {
            let user = std::env::var(user_var).ok()?;
            let password = std::env::var(password_var).unwrap_or_default();
            Some((user, password))
        });
        self.calls.lock().push(RecordedCall {
            op,
            target: target.to_string(),
            username: username.map(str::to_string),
            ambient,
        });

        match self.failures.lock().get_mut(&op).and_then(VecDeque::pop_front) {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn remote_url(&self, remote: &str) -> StoreResult<String> {
        self.repo
            .lock()
            .remotes
            .get(remote)
            .cloned()
            .ok_or_else(|| StoreError::RemoteNotFound(remote.to_string()))
    }

    fn peer_repo(&self, url: &str) -> StoreResult<Arc<Mutex<Repo>>> {
        self.network
            .repo(url)
            .ok_or_else(|| StoreError::failed(format!("could not reach remote at {url}")))
    }

    /// Copies the remote's branch head into `remote/<branch>`.
    fn fetch_ref(&self, remote: &str) -> StoreResult<(String, u64)> {
        let url = self.remote_url(remote)?;
        let peer = self.peer_repo(&url)?;
        let (branch, head) = {
            let peer = peer.lock();
            (peer.branch.clone(), peer.head()?)
        };
        let tracking = format!("{remote}/{branch}");
        self.repo.lock().remote_refs.insert(tracking.clone(), head);
        Ok((tracking, head))
    }
}

impl VersionedStore for MemoryVersionedStore {
    fn fetch(&self, ctx: &OpContext, remote: &str, username: Option<&str>) -> StoreResult<()> {
        self.enter(ctx, StoreOp::Fetch, remote, username)?;
        self.fetch_ref(remote).map(|_| ())
    }

    fn pull(&self, ctx: &OpContext, remote: &str, username: Option<&str>) -> StoreResult<()> {
        self.enter(ctx, StoreOp::Pull, remote, username)?;
        let (tracking, theirs) = self.fetch_ref(remote)?;
        let mut repo = self.repo.lock();
        let mut graph = self.network.graph();
        repo.merge(&mut graph, theirs, &tracking)
    }

    fn push(
        &self,
        ctx: &OpContext,
        remote: &str,
        branch: &str,
        username: Option<&str>,
    ) -> StoreResult<()> {
        self.enter(ctx, StoreOp::Push, remote, username)?;
        let url = self.remote_url(remote)?;
        let local = self
            .repo
            .lock()
            .branches
            .get(branch)
            .copied()
            .ok_or_else(|| StoreError::RefNotFound(branch.to_string()))?;

        let peer = self.peer_repo(&url)?;
        {
            let mut peer = peer.lock();
            if peer.read_only {
                return Err(StoreError::failed("permission denied: remote is read-only"));
            }
            let graph = self.network.graph();
            match peer.branches.get(branch).copied() {
                Some(current) if current == local => {}
                Some(current) if graph.is_ancestor(current, local) => {
                    let clean = peer.branch == branch
                        && peer.pending.is_none()
                        && peer.working == graph.data(current);
                    peer.branches.insert(branch.to_string(), local);
                    if clean {
                        peer.working = graph.data(local);
                    }
                }
                Some(_) => {
                    return Err(StoreError::failed(format!(
                        "push to {remote} rejected: non-fast-forward"
                    )))
                }
                None => {
                    peer.branches.insert(branch.to_string(), local);
                }
            }
        }

        self.repo
            .lock()
            .remote_refs
            .insert(format!("{remote}/{branch}"), local);
        Ok(())
    }

    fn merge(&self, ctx: &OpContext, branch_ref: &str) -> StoreResult<()> {
        self.enter(ctx, StoreOp::Merge, branch_ref, None)?;
        let mut repo = self.repo.lock();
        let theirs = repo.resolve_ref(branch_ref)?;
        let mut graph = self.network.graph();
        repo.merge(&mut graph, theirs, branch_ref)
    }

    fn commit(&self, ctx: &OpContext, message: &str) -> StoreResult<()> {
        self.enter(ctx, StoreOp::Commit, message, None)?;
        let mut repo = self.repo.lock();
        let mut graph = self.network.graph();
        let head = repo.head()?;

        if let Some(pending) = repo.pending.take() {
            if !pending.conflicts.is_empty() {
                let unresolved = pending.conflicts.len();
                repo.pending = Some(pending);
                return Err(StoreError::failed(format!(
                    "cannot commit: {unresolved} unresolved conflicts"
                )));
            }
            let id = graph.commit(vec![head, pending.theirs], repo.working.clone(), message);
            repo.set_head(id);
            return Ok(());
        }

        if repo.working == graph.data(head) {
            return Err(StoreError::NothingToCommit);
        }
        let id = graph.commit(vec![head], repo.working.clone(), message);
        repo.set_head(id);
        Ok(())
    }

    fn list_conflicts(&self, ctx: &OpContext) -> StoreResult<Vec<Conflict>> {
        self.enter(ctx, StoreOp::ListConflicts, "", None)?;
        Ok(self
            .repo
            .lock()
            .pending
            .as_ref()
            .map(|p| p.conflicts.iter().map(|c| c.conflict.clone()).collect())
            .unwrap_or_default())
    }

    fn resolve_conflict(
        &self,
        ctx: &OpContext,
        conflict: &Conflict,
        strategy: &str,
    ) -> StoreResult<()> {
        self.enter(ctx, StoreOp::ResolveConflict, strategy, None)?;
        let mut repo = self.repo.lock();
        let Repo {
            pending, working, ..
        } = &mut *repo;

        let pending = pending
            .as_mut()
            .ok_or_else(|| StoreError::failed("no merge in progress"))?;
        let index = pending
            .conflicts
            .iter()
            .position(|c| c.conflict.table == conflict.table && c.conflict.key == conflict.key)
            .ok_or_else(|| StoreError::failed(format!("no conflict on {conflict}")))?;

        match strategy {
            "ours" => {}
            "theirs" => {
                let key = (conflict.table.clone(), conflict.key.clone());
                match pending.conflicts[index].theirs.clone() {
                    Some(value) => {
                        working.insert(key, value);
                    }
                    None => {
                        working.remove(&key);
                    }
                }
            }
            other => {
                return Err(StoreError::failed(format!(
                    "unknown resolution strategy: {other}"
                )))
            }
        }
        pending.conflicts.remove(index);
        Ok(())
    }

    fn set_autocommit(&self, ctx: &OpContext, enabled: bool) -> StoreResult<()> {
        self.enter(ctx, StoreOp::SetAutocommit, if enabled { "on" } else { "off" }, None)?;
        self.repo.lock().autocommit = enabled;
        Ok(())
    }

    fn rollback(&self, ctx: &OpContext) -> StoreResult<()> {
        self.enter(ctx, StoreOp::Rollback, "", None)?;
        let mut repo = self.repo.lock();
        let head = repo.head()?;
        repo.pending = None;
        repo.working = self.network.graph().data(head);
        Ok(())
    }

    fn current_position(&self, ctx: &OpContext) -> StoreResult<PositionMarker> {
        self.enter(ctx, StoreOp::CurrentPosition, "", None)?;
        let head = self.repo.lock().head()?;
        Ok(PositionMarker::new(commit_id(head)))
    }

    fn compare_with(&self, ctx: &OpContext, remote_ref: &str) -> StoreResult<HistoryDivergence> {
        self.enter(ctx, StoreOp::CompareWith, remote_ref, None)?;
        let repo = self.repo.lock();
        let theirs = repo.resolve_ref(remote_ref)?;
        let head = repo.head()?;
        let graph = self.network.graph();
        let ours = graph.ancestors(head);
        let theirs = graph.ancestors(theirs);
        Ok(HistoryDivergence {
            ahead: ours.difference(&theirs).count() as u64,
            behind: theirs.difference(&ours).count() as u64,
        })
    }

    fn list_remotes(&self, ctx: &OpContext) -> StoreResult<Vec<RemoteInfo>> {
        self.enter(ctx, StoreOp::ListRemotes, "", None)?;
        Ok(self
            .repo
            .lock()
            .remotes
            .iter()
            .map(|(name, url)| RemoteInfo {
                name: name.clone(),
                url: url.clone(),
            })
            .collect())
    }

    fn add_remote(&self, ctx: &OpContext, name: &str, url: &str) -> StoreResult<()> {
        self.enter(ctx, StoreOp::AddRemote, name, None)?;
        let mut repo = self.repo.lock();
        if repo.remotes.contains_key(name) {
            return Err(StoreError::RemoteAlreadyExists(name.to_string()));
        }
        repo.remotes.insert(name.to_string(), url.to_string());
        Ok(())
    }

    fn remove_remote(&self, ctx: &OpContext, name: &str) -> StoreResult<()> {
        self.enter(ctx, StoreOp::RemoveRemote, name, None)?;
        let mut repo = self.repo.lock();
        if repo.remotes.remove(name).is_none() {
            return Err(StoreError::RemoteNotFound(name.to_string()));
        }
        let prefix = format!("{name}/");
        repo.remote_refs.retain(|r, _| !r.starts_with(&prefix));
        Ok(())
    }
}

impl std::fmt::Debug for MemoryVersionedStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryVersionedStore")
            .field("url", &self.url)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair() -> (MemoryNetwork, MemoryVersionedStore, MemoryVersionedStore) {
        let network = MemoryNetwork::new();
        let alpha = MemoryVersionedStore::new(&network, "mem://alpha");
        let beta = MemoryVersionedStore::fork(&network, "mem://beta", &alpha);
        let ctx = OpContext::new();
        alpha.add_remote(&ctx, "beta", "mem://beta").unwrap();
        beta.add_remote(&ctx, "alpha", "mem://alpha").unwrap();
        (network, alpha, beta)
    }

    #[test]
    fn empty_commit_is_reported() {
        let (_net, alpha, _beta) = pair();
        let err = alpha.commit(&OpContext::new(), "noop").unwrap_err();
        assert!(err.is_nothing_to_commit());
    }

    #[test]
    fn fetch_then_fast_forward() {
        let (_net, alpha, beta) = pair();
        let ctx = OpContext::new();
        beta.write("issues", "bd-1", "open");
        beta.commit(&ctx, "add bd-1").unwrap();

        assert!(matches!(
            alpha.compare_with(&ctx, "beta/main"),
            Err(StoreError::RefNotFound(_))
        ));
        alpha.fetch(&ctx, "beta", None).unwrap();
        assert_eq!(
            alpha.compare_with(&ctx, "beta/main").unwrap(),
            HistoryDivergence { ahead: 0, behind: 1 }
        );

        let before = alpha.current_position(&ctx).unwrap();
        alpha.merge(&ctx, "beta/main").unwrap();
        assert_ne!(alpha.current_position(&ctx).unwrap(), before);
        assert_eq!(alpha.read("issues", "bd-1").as_deref(), Some("open"));
    }

    #[test]
    fn clean_divergent_merge_has_two_parents() {
        let (_net, alpha, beta) = pair();
        let ctx = OpContext::new();
        alpha.write("issues", "a", "1");
        alpha.commit(&ctx, "a").unwrap();
        beta.write("issues", "b", "1");
        beta.commit(&ctx, "b").unwrap();

        alpha.fetch(&ctx, "beta", None).unwrap();
        alpha.merge(&ctx, "beta/main").unwrap();

        let head = alpha.head_commit().unwrap();
        assert_eq!(head.parents.len(), 2);
        assert_eq!(alpha.read("issues", "a").as_deref(), Some("1"));
        assert_eq!(alpha.read("issues", "b").as_deref(), Some("1"));
    }

    #[test]
    fn conflict_with_autocommit_rolls_back() {
        let (_net, alpha, beta) = pair();
        let ctx = OpContext::new();
        alpha.write("issues", "x", "ours");
        alpha.commit(&ctx, "ours").unwrap();
        beta.write("issues", "x", "theirs");
        beta.commit(&ctx, "theirs").unwrap();
        alpha.fetch(&ctx, "beta", None).unwrap();

        let before = alpha.current_position(&ctx).unwrap();
        let err = alpha.merge(&ctx, "beta/main").unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(alpha.current_position(&ctx).unwrap(), before);
        assert!(alpha.list_conflicts(&ctx).unwrap().is_empty());
        assert!(!alpha.has_pending_merge());
    }

    #[test]
    fn conflict_without_autocommit_resolves_to_merge_commit() {
        let (_net, alpha, beta) = pair();
        let ctx = OpContext::new();
        alpha.write("issues", "x", "ours");
        alpha.commit(&ctx, "ours").unwrap();
        beta.write("issues", "x", "theirs");
        beta.commit(&ctx, "theirs").unwrap();
        alpha.fetch(&ctx, "beta", None).unwrap();

        alpha.set_autocommit(&ctx, false).unwrap();
        alpha.merge(&ctx, "beta/main").unwrap();
        let conflicts = alpha.list_conflicts(&ctx).unwrap();
        assert_eq!(conflicts, vec![Conflict::new("issues", "x", "changed on both sides")]);

        assert!(alpha.commit(&ctx, "too early").is_err());
        alpha.resolve_conflict(&ctx, &conflicts[0], "theirs").unwrap();
        alpha.commit(&ctx, "resolved").unwrap();
        alpha.set_autocommit(&ctx, true).unwrap();

        assert_eq!(alpha.head_commit().unwrap().parents.len(), 2);
        assert_eq!(alpha.read("issues", "x").as_deref(), Some("theirs"));
    }

    #[test]
    fn rollback_discards_pending_merge() {
        let (_net, alpha, beta) = pair();
        let ctx = OpContext::new();
        alpha.write("issues", "x", "ours");
        alpha.commit(&ctx, "ours").unwrap();
        beta.write("issues", "x", "theirs");
        beta.commit(&ctx, "theirs").unwrap();
        alpha.fetch(&ctx, "beta", None).unwrap();

        alpha.set_autocommit(&ctx, false).unwrap();
        alpha.merge(&ctx, "beta/main").unwrap();
        alpha.rollback(&ctx).unwrap();
        assert!(!alpha.has_pending_merge());
        assert_eq!(alpha.read("issues", "x").as_deref(), Some("ours"));
    }

    #[test]
    fn unknown_strategy_is_rejected() {
        let (_net, alpha, beta) = pair();
        let ctx = OpContext::new();
        alpha.write("issues", "x", "ours");
        alpha.commit(&ctx, "ours").unwrap();
        beta.write("issues", "x", "theirs");
        beta.commit(&ctx, "theirs").unwrap();
        alpha.fetch(&ctx, "beta", None).unwrap();
        alpha.set_autocommit(&ctx, false).unwrap();
        alpha.merge(&ctx, "beta/main").unwrap();

        let conflict = alpha.list_conflicts(&ctx).unwrap().remove(0);
        assert!(alpha.resolve_conflict(&ctx, &conflict, "newest-wins").is_err());
    }

    #[test]
    fn push_fast_forwards_and_rejects_divergence() {
        let (_net, alpha, beta) = pair();
        let ctx = OpContext::new();
        alpha.write("issues", "a", "1");
        alpha.commit(&ctx, "a").unwrap();
        alpha.push(&ctx, "beta", "main", None).unwrap();
        assert_eq!(beta.read("issues", "a").as_deref(), Some("1"));

        beta.write("issues", "b", "1");
        beta.commit(&ctx, "b").unwrap();
        alpha.write("issues", "c", "1");
        alpha.commit(&ctx, "c").unwrap();
        assert!(alpha.push(&ctx, "beta", "main", None).is_err());
    }

    #[test]
    fn read_only_remote_rejects_push() {
        let (_net, alpha, beta) = pair();
        beta.set_read_only(true);
        let err = alpha
            .push(&OpContext::new(), "beta", "main", Some("u"))
            .unwrap_err();
        assert!(err.to_string().contains("permission denied"));
    }

    #[test]
    fn unreachable_remote_fails_fetch() {
        let (network, alpha, _beta) = pair();
        network.disconnect("mem://beta");
        assert!(alpha.fetch(&OpContext::new(), "beta", None).is_err());
    }

    #[test]
    fn remotes_are_managed() {
        let (_net, alpha, _beta) = pair();
        let ctx = OpContext::new();
        assert!(alpha.add_remote(&ctx, "beta", "mem://x").unwrap_err().is_already_exists());
        assert_eq!(alpha.list_remotes(&ctx).unwrap().len(), 1);
        alpha.remove_remote(&ctx, "beta").unwrap();
        assert!(matches!(
            alpha.remove_remote(&ctx, "beta"),
            Err(StoreError::RemoteNotFound(_))
        ));
    }

    #[test]
    fn injected_failures_and_call_log() {
        let (_net, alpha, _beta) = pair();
        let ctx = OpContext::new();
        alpha.clear_calls();
        alpha.fail_next(StoreOp::Fetch, StoreError::failed("boom"));

        assert!(alpha.fetch(&ctx, "beta", Some("u")).is_err());
        assert!(alpha.fetch(&ctx, "beta", Some("u")).is_ok());

        let calls = alpha.remote_calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].username.as_deref(), Some("u"));
        assert_eq!(alpha.ops(), vec![StoreOp::Fetch, StoreOp::Fetch]);
    }

    #[test]
    fn cancelled_context_is_not_recorded() {
        let (_net, alpha, _beta) = pair();
        alpha.clear_calls();
        let ctx = OpContext::new();
        ctx.cancel();
        assert_eq!(alpha.fetch(&ctx, "beta", None), Err(StoreError::Cancelled));
        assert!(alpha.calls().is_empty());
    }

    #[test]
    fn ambient_credentials_are_observed() {
        let network = MemoryNetwork::new();
        let store = MemoryVersionedStore::new(&network, "mem://observed")
            .with_ambient_vars("TOWNSYNC_TESTKIT_USER", "TOWNSYNC_TESTKIT_PASS");
        let ctx = OpContext::new();
        store.add_remote(&ctx, "self", "mem://observed").unwrap();

        std::env::set_var("TOWNSYNC_TESTKIT_USER", "watcher");
        std::env::set_var("TOWNSYNC_TESTKIT_PASS", "pw");
        store.fetch(&ctx, "self", None).unwrap();
        std::env::remove_var("TOWNSYNC_TESTKIT_USER");
        std::env::remove_var("TOWNSYNC_TESTKIT_PASS");
        store.fetch(&ctx, "self", None).unwrap();

        let calls = store.remote_calls();
        assert_eq!(calls[0].ambient, Some(("watcher".to_string(), "pw".to_string())));
        assert_eq!(calls[1].ambient, None);
    }
}
