//! The filesystem: one tree, one lock.
//!
//! The node arena, its path cache and the mount table form a single shared
//! resource behind one `parking_lot::Mutex`. Every operation, read or write,
//! takes the lock for its lookup/mutation phase only. Events are published
//! and persistence I/O is awaited after the guard is dropped, so nothing
//! ever suspends while holding it.
//!
//! Operations follow the same shape: resolve the raw path, authorize each
//! segment, locate the parent, mutate, then publish exactly one event.
//! Validation happens before mutation, so a failed call leaves the tree as
//! it found it.

mod mounts;
mod mutate;
mod persistence;

pub use mounts::MountLease;

use std::collections::VecDeque;
use std::time::SystemTime;

use arbor_types::{AccessMode, UserIdentity};
use parking_lot::Mutex;

use crate::config::VfsConfig;
use crate::context::AccessContext;
use crate::error::{VfsError, VfsResult};
use crate::events::{EventBus, FsEvent, FsEventKind, Subscription};
use crate::mount::{MountOptions, MountTable};
use crate::node::{Metadata, NodeId, NodeKind};
use crate::path::{PathResolver, file_name, join_path, parent_path, segments};
use crate::permissions;
use crate::store::NodeStore;

/// Everything the lock protects.
#[derive(Debug)]
pub(crate) struct FsState {
    pub store: NodeStore,
    pub mounts: MountTable,
}

impl FsState {
    fn new() -> Self {
        Self {
            store: NodeStore::new(
                arbor_types::ROOT_UID,
                arbor_types::ROOT_GID,
                arbor_types::Mode::DIRECTORY_DEFAULT,
                SystemTime::now(),
            ),
            mounts: MountTable::new(),
        }
    }
}

/// An in-memory hierarchical filesystem.
///
/// Share it between tasks and threads behind an `Arc`.
pub struct FileSystem {
    state: Mutex<FsState>,
    events: EventBus,
    resolver: PathResolver,
    config: VfsConfig,
}

impl std::fmt::Debug for FileSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileSystem")
            .field("state", &"<locked>")
            .field("config", &self.config)
            .finish()
    }
}

impl Default for FileSystem {
    fn default() -> Self {
        Self::new(VfsConfig::default())
    }
}

impl FileSystem {
    /// Create a filesystem holding only `/` (root-owned, mode 0755).
    pub fn new(config: VfsConfig) -> Self {
        Self {
            state: Mutex::new(FsState::new()),
            events: EventBus::new(config.event_capacity),
            resolver: PathResolver::new(&config.home_root),
            config,
        }
    }

    pub fn config(&self) -> &VfsConfig {
        &self.config
    }

    pub fn resolver(&self) -> &PathResolver {
        &self.resolver
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Subscribe to events at or beneath `prefix`.
    pub fn subscribe(&self, prefix: &str) -> Subscription {
        self.events.subscribe(prefix)
    }

    /// Subscribe to selected kinds of events at or beneath `prefix`.
    pub fn subscribe_kinds(
        &self,
        prefix: &str,
        kinds: impl IntoIterator<Item = FsEventKind>,
    ) -> Subscription {
        self.events.subscribe_kinds(prefix, kinds)
    }

    /// Number of nodes in the tree, root included.
    pub fn node_count(&self) -> usize {
        self.state.lock().store.len()
    }

    /// Resolve `raw` for the caller without touching the tree.
    pub fn resolve(&self, ctx: &AccessContext, raw: &str) -> VfsResult<String> {
        self.resolver.resolve(raw, &ctx.cwd, &ctx.user.username)
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Does anything (including a dangling link) exist at `path`?
    pub fn exists(&self, path: &str) -> bool {
        self.get_node(path).is_some()
    }

    /// Look up a node as the system, without following a final link.
    pub fn get_node(&self, path: &str) -> Option<Metadata> {
        let path = self.resolver.resolve(path, "/", "root").ok()?;
        let root = UserIdentity::root();
        self.with_state(|st| {
            let id = self.locate(st, &root, &path, false).ok()?;
            Some(st.store[id].metadata())
        })
    }

    /// Stat `path`, following a final symbolic link.
    pub fn metadata(&self, ctx: &AccessContext, path: &str) -> VfsResult<Metadata> {
        self.stat(ctx, path, true)
    }

    /// Stat `path` itself, even when it is a symbolic link.
    pub fn symlink_metadata(&self, ctx: &AccessContext, path: &str) -> VfsResult<Metadata> {
        self.stat(ctx, path, false)
    }

    fn stat(&self, ctx: &AccessContext, raw: &str, follow: bool) -> VfsResult<Metadata> {
        let result = self.with_state(|st| {
            let path = self.resolve(ctx, raw)?;
            let id = self.locate(st, &ctx.user, &path, follow)?;
            Ok(st.store[id].metadata())
        });
        result.map_err(|e| self.fail(raw, e))
    }

    /// Target of the symbolic link at `path`.
    pub fn read_link(&self, ctx: &AccessContext, raw: &str) -> VfsResult<String> {
        let result = self.with_state(|st| {
            let path = self.resolve(ctx, raw)?;
            let id = self.locate(st, &ctx.user, &path, false)?;
            let node = &st.store[id];
            node.symlink_target()
                .map(str::to_string)
                .ok_or_else(|| VfsError::invalid_path(node.path.clone()))
        });
        result.map_err(|e| self.fail(raw, e))
    }

    /// Entries of a directory in insertion order. Requires read permission.
    pub fn list_directory(&self, ctx: &AccessContext, raw: &str) -> VfsResult<Vec<Metadata>> {
        let result = self.with_state(|st| {
            let path = self.resolve(ctx, raw)?;
            let id = self.locate(st, &ctx.user, &path, true)?;
            let node = &st.store[id];
            let Some(children) = node.children() else {
                return Err(VfsError::not_a_directory(node.path.clone()));
            };
            if !permissions::allows(node, &ctx.user, AccessMode::Read) {
                return Err(VfsError::permission_denied(node.path.clone()));
            }
            let entries = children
                .values()
                .map(|&child| st.store[child].metadata())
                .collect();
            st.store[id].accessed_at = SystemTime::now();
            Ok(entries)
        });
        result.map_err(|e| self.fail(raw, e))
    }

    /// Content of a file. Requires read permission; links are followed.
    pub fn read_file(&self, ctx: &AccessContext, raw: &str) -> VfsResult<Vec<u8>> {
        let result = self.with_state(|st| {
            let path = self.resolve(ctx, raw)?;
            let id = self.locate(st, &ctx.user, &path, true)?;
            let node = &st.store[id];
            let NodeKind::File { content } = &node.kind else {
                return Err(VfsError::not_a_file(node.path.clone()));
            };
            if !permissions::allows(node, &ctx.user, AccessMode::Read) {
                return Err(VfsError::permission_denied(node.path.clone()));
            }
            let data = content.clone();
            st.store[id].accessed_at = SystemTime::now();
            Ok(data)
        });
        result.map_err(|e| self.fail(raw, e))
    }

    /// Content of a file as UTF-8 (lossy).
    pub fn read_to_string(&self, ctx: &AccessContext, raw: &str) -> VfsResult<String> {
        self.read_file(ctx, raw)
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Depth-first, pre-order listing of the subtree at `path`.
    ///
    /// Directories the caller cannot read and search are listed but not
    /// descended into. Symbolic links are not followed below the start.
    pub fn walk(&self, ctx: &AccessContext, raw: &str) -> VfsResult<Vec<Metadata>> {
        let result = self.with_state(|st| {
            let path = self.resolve(ctx, raw)?;
            let start = self.locate(st, &ctx.user, &path, true)?;
            let mut out = Vec::new();
            let mut stack = vec![start];
            while let Some(id) = stack.pop() {
                let node = &st.store[id];
                out.push(node.metadata());
                if let Some(children) = node.children() {
                    let searchable = permissions::allows(node, &ctx.user, AccessMode::Read)
                        && permissions::allows(node, &ctx.user, AccessMode::Execute);
                    if searchable {
                        stack.extend(children.values().rev().copied());
                    }
                }
            }
            Ok(out)
        });
        result.map_err(|e| self.fail(raw, e))
    }

    /// Would `ctx.user` be granted `access` on `path`?
    ///
    /// Every directory on the way needs search permission. A missing target
    /// is judged by its parent when the request is a write (a create).
    /// Read-only mounts refuse writes and no-exec mounts refuse executing
    /// files, for root as well. Mounts count where the lookup actually lands,
    /// after links and bind mounts.
    pub fn check_access(&self, ctx: &AccessContext, raw: &str, access: AccessMode) -> bool {
        let Ok(path) = self.resolve(ctx, raw) else {
            return false;
        };
        self.with_state(|st| match self.locate_routed(st, &ctx.user, &path, true) {
            Ok((id, route)) => {
                let node = &st.store[id];
                let options = route.options_at(&st.mounts, &node.path);
                match access {
                    AccessMode::Write if options.read_only => false,
                    AccessMode::Execute if options.no_exec && !node.is_dir() => false,
                    _ => permissions::allows(node, &ctx.user, access),
                }
            }
            Err(VfsError::NotFound(_)) if access == AccessMode::Write => {
                match self.locate_parent(st, &ctx.user, &path) {
                    Ok(slot) => {
                        !slot.options(&st.mounts, &st.store).read_only
                            && permissions::may_modify_entries(&st.store[slot.dir], &ctx.user)
                    }
                    Err(_) => false,
                }
            }
            Err(_) => false,
        })
    }

    // ========================================================================
    // Lookup internals
    // ========================================================================

    pub(crate) fn with_state<T>(&self, f: impl FnOnce(&mut FsState) -> T) -> T {
        let mut guard = self.state.lock();
        f(&mut guard)
    }

    /// Find the node at a resolved path, requiring search permission on
    /// every directory crossed.
    ///
    /// Intermediate symbolic links are always followed; the final one only
    /// when `follow` is set. A link whose own target is missing, or a chain
    /// longer than the hop limit, is reported as broken. An entry missing
    /// beneath a link that did resolve is plain `NotFound`.
    pub(crate) fn locate(
        &self,
        st: &mut FsState,
        user: &UserIdentity,
        path: &str,
        follow: bool,
    ) -> VfsResult<NodeId> {
        self.locate_routed(st, user, path, follow).map(|(id, _)| id)
    }

    /// [`locate`](Self::locate), also returning how the node was reached.
    pub(crate) fn locate_routed(
        &self,
        st: &mut FsState,
        user: &UserIdentity,
        path: &str,
        follow: bool,
    ) -> VfsResult<(NodeId, Route)> {
        let mut route = Route::default();
        match self.locate_inner(st, user, path, follow, &mut route) {
            Ok(id) => Ok((id, route)),
            Err(VfsError::BrokenSymbolicLink(_)) => Err(VfsError::broken_link(path)),
            Err(e) => Err(e),
        }
    }

    fn locate_inner(
        &self,
        st: &mut FsState,
        user: &UserIdentity,
        path: &str,
        follow: bool,
        route: &mut Route,
    ) -> VfsResult<NodeId> {
        let mut current = route.enter(&st.mounts, path, follow);
        let mut via_link = false;
        loop {
            let found = match st.store.lookup(&current) {
                Some(id) => check_search(&st.store, user, id).map(|()| id),
                None => self.walk_segments(st, user, &current, follow, route),
            };
            let id = match found {
                Ok(id) => id,
                // the link's own target is missing
                Err(VfsError::NotFound(_)) if via_link => return Err(VfsError::broken_link(path)),
                Err(e) => return Err(e),
            };

            let target = match st.store[id].symlink_target() {
                Some(target) if follow => target.to_string(),
                _ => return Ok(id),
            };
            route.hops += 1;
            if route.hops > self.config.max_symlink_depth {
                return Err(VfsError::broken_link(path));
            }
            current = route.enter(&st.mounts, &target, true);
            via_link = true;
        }
    }

    /// Segment-by-segment walk that follows intermediate links.
    ///
    /// An intermediate link is resolved on its own first, so a dangling one
    /// is told apart from an entry missing below a good one.
    fn walk_segments(
        &self,
        st: &mut FsState,
        user: &UserIdentity,
        path: &str,
        follow: bool,
        route: &mut Route,
    ) -> VfsResult<NodeId> {
        let mut pending: VecDeque<String> = segments(path).map(String::from).collect();
        let mut current = st.store.root();

        while let Some(segment) = pending.pop_front() {
            let dir = &st.store[current];
            let Some(children) = dir.children() else {
                return Err(VfsError::not_a_directory(dir.path.clone()));
            };
            if !permissions::allows(dir, user, AccessMode::Execute) {
                return Err(VfsError::permission_denied(dir.path.clone()));
            }
            let Some(&child) = children.get(&segment) else {
                return Err(VfsError::not_found(join_path(&dir.path, &segment)));
            };

            let link = if pending.is_empty() {
                None
            } else {
                st.store[child].symlink_target().map(str::to_string)
            };
            let Some(target) = link else {
                current = child;
                continue;
            };

            let link_path = st.store[child].path.clone();
            route.hops += 1;
            if route.hops > self.config.max_symlink_depth {
                return Err(VfsError::broken_link(link_path));
            }
            let resolved = match self.locate_inner(st, user, &target, true, route) {
                Ok(id) => id,
                Err(VfsError::NotFound(_)) => return Err(VfsError::broken_link(link_path)),
                Err(e) => return Err(e),
            };
            let mut next = st.store[resolved].path.clone();
            for rest in pending.drain(..) {
                next = join_path(&next, &rest);
            }
            let next = route.descend(&st.mounts, &next, follow);
            pending = segments(&next).map(String::from).collect();
            current = st.store.root();
        }
        Ok(current)
    }

    /// Locate the directory that holds `path`'s final entry.
    pub(crate) fn locate_parent(
        &self,
        st: &mut FsState,
        user: &UserIdentity,
        path: &str,
    ) -> VfsResult<Slot> {
        if path == "/" {
            return Err(VfsError::invalid_path("/"));
        }
        let (dir, route) = self.locate_routed(st, user, parent_path(path), true)?;
        let node = &st.store[dir];
        if !node.is_dir() {
            return Err(VfsError::not_a_directory(node.path.clone()));
        }
        Ok(Slot {
            dir,
            name: file_name(path).to_string(),
            route,
        })
    }

    /// Locate the entry at `path` without following it, along with the
    /// slot holding it.
    pub(crate) fn locate_entry(
        &self,
        st: &mut FsState,
        user: &UserIdentity,
        path: &str,
    ) -> VfsResult<(Slot, NodeId)> {
        let slot = self.locate_parent(st, user, path)?;
        if !permissions::allows(&st.store[slot.dir], user, AccessMode::Execute) {
            return Err(VfsError::permission_denied(st.store[slot.dir].path.clone()));
        }
        let child = st
            .store
            .child(slot.dir, &slot.name)
            .ok_or_else(|| VfsError::not_found(path))?;
        Ok((slot, child))
    }

    // ========================================================================
    // Event plumbing
    // ========================================================================

    /// Record a failure: log it and publish a `Failed` event.
    pub(crate) fn fail(&self, raw: &str, err: VfsError) -> VfsError {
        match &err {
            VfsError::Io(_) | VfsError::Corrupt(_) => {
                tracing::warn!(path = raw, error = %err, "vfs operation failed")
            }
            _ => tracing::debug!(path = raw, error = %err, "vfs operation refused"),
        }
        self.events.publish(FsEvent::failure(raw, &err));
        err
    }

    /// Publish the event of a committed mutation, or the failure.
    pub(crate) fn publish_outcome(&self, raw: &str, outcome: VfsResult<FsEvent>) -> VfsResult<()> {
        match outcome {
            Ok(event) => {
                tracing::debug!(kind = %event.kind, path = %event.path, "{}", event.message);
                self.events.publish(event);
                Ok(())
            }
            Err(e) => Err(self.fail(raw, e)),
        }
    }
}

/// How a lookup reached its node: the link hops taken, and the options of
/// the bind mount its final route went through.
#[derive(Debug, Default, Clone)]
pub(crate) struct Route {
    hops: u32,
    bind: Option<MountOptions>,
}

impl Route {
    /// Start a fresh path (the caller's, or a link target).
    fn enter(&mut self, mounts: &MountTable, path: &str, follow: bool) -> String {
        let (path, bind) = redirect(mounts, path, follow);
        self.bind = bind;
        path
    }

    /// Continue below an already resolved directory. A bind crossed on the
    /// way there still applies unless another one takes over.
    fn descend(&mut self, mounts: &MountTable, path: &str, follow: bool) -> String {
        let (path, bind) = redirect(mounts, path, follow);
        if bind.is_some() {
            self.bind = bind;
        }
        path
    }

    /// Options in force for a node reached this way: those of the mount
    /// holding its real path, tightened by the bind it came through.
    pub(crate) fn options_at(&self, mounts: &MountTable, real_path: &str) -> MountOptions {
        let mut options = mounts.options_for(real_path).cloned().unwrap_or_default();
        if let Some(bind) = &self.bind {
            options.read_only |= bind.read_only;
            options.no_exec |= bind.no_exec;
            options.no_suid |= bind.no_suid;
            options.no_dev |= bind.no_dev;
        }
        options
    }
}

/// Where a new or existing entry lives: its directory, its name, and the
/// route to that directory.
#[derive(Debug)]
pub(crate) struct Slot {
    pub dir: NodeId,
    pub name: String,
    route: Route,
}

impl Slot {
    /// Real path of the entry.
    pub(crate) fn path(&self, store: &NodeStore) -> String {
        join_path(&store[self.dir].path, &self.name)
    }

    pub(crate) fn options(&self, mounts: &MountTable, store: &NodeStore) -> MountOptions {
        self.route.options_at(mounts, &self.path(store))
    }
}

/// Apply bind-mount redirection. Without `follow`, the final component is
/// the entry itself (e.g. the mount point directory), so only its parent is
/// redirected.
fn redirect(mounts: &MountTable, path: &str, follow: bool) -> (String, Option<MountOptions>) {
    let rewrite = |p: &str| match mounts.rewrite(p) {
        Some((p, options)) => (p, Some(options.clone())),
        None => (p.to_string(), None),
    };
    if follow || path == "/" {
        return rewrite(path);
    }
    let (parent, bind) = rewrite(parent_path(path));
    (join_path(&parent, file_name(path)), bind)
}

/// Search permission on every ancestor of `id`, root first.
fn check_search(store: &NodeStore, user: &UserIdentity, id: NodeId) -> VfsResult<()> {
    if user.is_root() {
        return Ok(());
    }
    for ancestor in store.ancestors(id) {
        let dir = &store[ancestor];
        if !permissions::allows(dir, user, AccessMode::Execute) {
            return Err(VfsError::permission_denied(dir.path.clone()));
        }
    }
    Ok(())
}
