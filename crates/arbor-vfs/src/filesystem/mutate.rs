//! Mutating operations: create, write, delete, move, copy, link, chmod, chown.
//!
//! Each public method runs its locked half (`*_locked`) under the state
//! lock, then publishes the outcome after the guard is gone. Locked halves
//! validate everything they can before the first change to the tree.

use std::collections::HashMap;
use std::time::SystemTime;

use arbor_types::{AccessMode, Gid, Mode, Uid, UserIdentity};

use super::{FileSystem, FsState, Route, Slot};
use crate::context::AccessContext;
use crate::error::{VfsError, VfsResult};
use crate::events::{FsEvent, FsEventKind};
use crate::node::{NodeId, NodeKind};
use crate::path::{join_path, segments};
use crate::permissions::{self, Permissioned};
use crate::store::NewNode;

/// What to attach at a new path.
enum NodeSpec {
    File(Vec<u8>),
    Directory,
    Symlink(String),
}

impl NodeSpec {
    fn label(&self) -> &'static str {
        match self {
            NodeSpec::File(_) => "file",
            NodeSpec::Directory => "directory",
            NodeSpec::Symlink(_) => "symlink",
        }
    }
}

impl FileSystem {
    /// Create a file with default permissions (0666 minus umask).
    pub fn create_file(&self, ctx: &AccessContext, path: &str, content: &[u8]) -> VfsResult<()> {
        self.create_file_with_mode(ctx, path, content, None)
    }

    /// Create a file. `mode` replaces the default before the umask applies.
    pub fn create_file_with_mode(
        &self,
        ctx: &AccessContext,
        path: &str,
        content: &[u8],
        mode: Option<Mode>,
    ) -> VfsResult<()> {
        let spec = NodeSpec::File(content.to_vec());
        let outcome = self.with_state(|st| self.create_locked(st, ctx, path, spec, mode));
        self.publish_outcome(path, outcome)
    }

    /// Create a directory with default permissions (0755 minus umask).
    pub fn create_directory(&self, ctx: &AccessContext, path: &str) -> VfsResult<()> {
        self.create_directory_with_mode(ctx, path, None)
    }

    pub fn create_directory_with_mode(
        &self,
        ctx: &AccessContext,
        path: &str,
        mode: Option<Mode>,
    ) -> VfsResult<()> {
        let outcome =
            self.with_state(|st| self.create_locked(st, ctx, path, NodeSpec::Directory, mode));
        self.publish_outcome(path, outcome)
    }

    /// Create a directory and any missing parents.
    ///
    /// Returns false when everything already existed. Either every missing
    /// level is created or none is.
    pub fn create_directory_all(&self, ctx: &AccessContext, path: &str) -> VfsResult<bool> {
        let outcome = self.with_state(|st| self.create_all_locked(st, ctx, path));
        match outcome {
            Ok(Some(event)) => self.publish_outcome(path, Ok(event)).map(|()| true),
            Ok(None) => Ok(false),
            Err(e) => Err(self.fail(path, e)),
        }
    }

    /// Create a symbolic link at `link` pointing to `target`.
    ///
    /// The target is resolved against the caller's working directory and
    /// stored absolute; it need not exist.
    pub fn create_symbolic_link(
        &self,
        ctx: &AccessContext,
        link: &str,
        target: &str,
    ) -> VfsResult<()> {
        let outcome = self.with_state(|st| {
            let target = self.resolve(ctx, target)?;
            self.create_locked(st, ctx, link, NodeSpec::Symlink(target), None)
        });
        self.publish_outcome(link, outcome)
    }

    /// Replace a file's content, creating the file when it does not exist.
    pub fn write_file(&self, ctx: &AccessContext, path: &str, content: &[u8]) -> VfsResult<()> {
        let outcome = self.with_state(|st| self.write_locked(st, ctx, path, content, false));
        self.publish_outcome(path, outcome)
    }

    /// Append to an existing file.
    pub fn append_file(&self, ctx: &AccessContext, path: &str, content: &[u8]) -> VfsResult<()> {
        let outcome = self.with_state(|st| self.write_locked(st, ctx, path, content, true));
        self.publish_outcome(path, outcome)
    }

    /// Delete a file, link or directory.
    ///
    /// A non-empty directory needs `recursive`. Recursive deletion checks
    /// every entry of the subtree first and removes nothing unless the whole
    /// subtree may go.
    pub fn delete(&self, ctx: &AccessContext, path: &str, recursive: bool) -> VfsResult<()> {
        let outcome = self.with_state(|st| self.delete_locked(st, ctx, path, recursive));
        self.publish_outcome(path, outcome)
    }

    /// Move (rename) a node. The subtree keeps its identity and attributes.
    pub fn move_node(&self, ctx: &AccessContext, from: &str, to: &str) -> VfsResult<()> {
        let outcome = self.with_state(|st| self.move_locked(st, ctx, from, to));
        self.publish_outcome(from, outcome)
    }

    /// Copy a file or directory tree.
    ///
    /// The copy belongs to the caller. Either the whole tree is copied or
    /// nothing is.
    pub fn copy(&self, ctx: &AccessContext, from: &str, to: &str) -> VfsResult<()> {
        let outcome = self.with_state(|st| self.copy_locked(st, ctx, from, to));
        self.publish_outcome(from, outcome)
    }

    /// Change permission bits. Only the owner or root may.
    pub fn set_permissions(&self, ctx: &AccessContext, path: &str, mode: Mode) -> VfsResult<()> {
        let outcome = self.with_state(|st| self.chmod_locked(st, ctx, path, mode));
        self.publish_outcome(path, outcome)
    }

    /// Change owner and/or group.
    ///
    /// Root may set anything. The owner may only change the group, and only
    /// to a group they belong to.
    pub fn set_owner(
        &self,
        ctx: &AccessContext,
        path: &str,
        owner: Option<Uid>,
        group: Option<Gid>,
    ) -> VfsResult<()> {
        let outcome = self.with_state(|st| self.chown_locked(st, ctx, path, owner, group));
        self.publish_outcome(path, outcome)
    }

    // ========================================================================
    // Locked halves
    // ========================================================================

    fn create_locked(
        &self,
        st: &mut FsState,
        ctx: &AccessContext,
        raw: &str,
        spec: NodeSpec,
        mode: Option<Mode>,
    ) -> VfsResult<FsEvent> {
        let path = self.resolve(ctx, raw)?;
        let (parent, name) = self.prepare_create(st, ctx, &path)?;
        let label = spec.label();
        let id = self.attach(st, ctx, parent, &name, spec, mode);
        let node = &st.store[id];
        let message = match node.symlink_target() {
            Some(target) => format!("created symlink {} -> {}", node.path, target),
            None => format!("created {} {} ({:o})", label, node.path, node.mode),
        };
        Ok(FsEvent::new(FsEventKind::Created, node.path.clone(), message))
    }

    fn create_all_locked(
        &self,
        st: &mut FsState,
        ctx: &AccessContext,
        raw: &str,
    ) -> VfsResult<Option<FsEvent>> {
        let path = self.resolve(ctx, raw)?;
        let mut current = String::from("/");
        let mut first_created: Option<NodeId> = None;
        let mut created = 0usize;

        for segment in segments(&path) {
            current = join_path(&current, segment);
            let step = match self.locate(st, &ctx.user, &current, true) {
                Ok(id) if st.store[id].is_dir() => Ok(()),
                Ok(id) => Err(VfsError::not_a_directory(st.store[id].path.clone())),
                Err(VfsError::NotFound(_)) => {
                    self.prepare_create(st, ctx, &current).map(|(parent, name)| {
                        let id = self.attach(st, ctx, parent, &name, NodeSpec::Directory, None);
                        first_created.get_or_insert(id);
                        created += 1;
                    })
                }
                Err(e) => Err(e),
            };
            if let Err(e) = step {
                if let Some(id) = first_created {
                    st.store.remove_subtree(id, SystemTime::now());
                }
                return Err(e);
            }
        }

        Ok(first_created.map(|_| {
            FsEvent::new(
                FsEventKind::Created,
                path.clone(),
                format!("created {} ({} directories)", path, created),
            )
        }))
    }

    fn write_locked(
        &self,
        st: &mut FsState,
        ctx: &AccessContext,
        raw: &str,
        content: &[u8],
        append: bool,
    ) -> VfsResult<FsEvent> {
        let path = self.resolve(ctx, raw)?;
        let id = match self.locate_routed(st, &ctx.user, &path, true) {
            Ok((id, route)) => {
                self.ensure_writable(st, &st.store[id].path, &route)?;
                id
            }
            Err(VfsError::NotFound(_)) if !append => {
                let (parent, name) = self.prepare_create(st, ctx, &path)?;
                let id = self.attach(st, ctx, parent, &name, NodeSpec::File(content.to_vec()), None);
                let node = &st.store[id];
                return Ok(FsEvent::new(
                    FsEventKind::Created,
                    node.path.clone(),
                    format!("created file {} ({} bytes)", node.path, content.len()),
                ));
            }
            Err(e) => return Err(e),
        };

        let node = &mut st.store[id];
        if !matches!(node.kind, NodeKind::File { .. }) {
            return Err(VfsError::not_a_file(node.path.clone()));
        }
        if !permissions::allows(&*node, &ctx.user, AccessMode::Write) {
            return Err(VfsError::permission_denied(node.path.clone()));
        }
        let size = match &mut node.kind {
            NodeKind::File { content: data } => {
                if append {
                    data.extend_from_slice(content);
                } else {
                    data.clear();
                    data.extend_from_slice(content);
                }
                data.len()
            }
            _ => 0,
        };
        node.touch_modified(SystemTime::now());
        let verb = if append { "appended to" } else { "wrote" };
        Ok(FsEvent::new(
            FsEventKind::Written,
            node.path.clone(),
            format!("{} {} ({} bytes)", verb, node.path, size),
        ))
    }

    fn delete_locked(
        &self,
        st: &mut FsState,
        ctx: &AccessContext,
        raw: &str,
        recursive: bool,
    ) -> VfsResult<FsEvent> {
        let path = self.resolve(ctx, raw)?;
        if path == "/" {
            return Err(VfsError::permission_denied("/"));
        }
        let (slot, id) = self.locate_entry(st, &ctx.user, &path)?;
        let parent = slot.dir;
        let node_path = st.store[id].path.clone();
        self.ensure_slot_writable(st, &slot)?;

        if let Some(point) = st.mounts.referencing(&node_path) {
            return Err(VfsError::mount_conflict(point.mount_path.clone()));
        }
        if !permissions::may_remove_entry(&st.store[parent], &st.store[id], &ctx.user) {
            return Err(VfsError::permission_denied(node_path));
        }
        let has_children = st.store[id].children().is_some_and(|c| !c.is_empty());
        if has_children {
            if !recursive {
                return Err(VfsError::directory_not_empty(node_path));
            }
            authorize_subtree_removal(st, &ctx.user, id)?;
        }

        let count = st.store.descendants(id).len();
        st.store.remove_subtree(id, SystemTime::now());
        Ok(FsEvent::new(
            FsEventKind::Deleted,
            node_path.clone(),
            format!("deleted {} ({} nodes)", node_path, count),
        ))
    }

    fn move_locked(
        &self,
        st: &mut FsState,
        ctx: &AccessContext,
        from: &str,
        to: &str,
    ) -> VfsResult<FsEvent> {
        let src = self.resolve(ctx, from)?;
        let dst = self.resolve(ctx, to)?;
        if src == "/" || dst == "/" {
            return Err(VfsError::invalid_path("/"));
        }
        let (src_slot, id) = self.locate_entry(st, &ctx.user, &src)?;
        self.ensure_slot_writable(st, &src_slot)?;
        let dst_slot = self.locate_parent(st, &ctx.user, &dst)?;
        self.ensure_slot_writable(st, &dst_slot)?;
        let (src_parent, dst_parent, dst_name) = (src_slot.dir, dst_slot.dir, dst_slot.name);
        if st.store.child(dst_parent, &dst_name).is_some() {
            return Err(VfsError::already_exists(dst));
        }

        let src_path = st.store[id].path.clone();
        if let Some(point) = st.mounts.referencing(&src_path) {
            return Err(VfsError::mount_conflict(point.mount_path.clone()));
        }
        if !permissions::may_remove_entry(&st.store[src_parent], &st.store[id], &ctx.user) {
            return Err(VfsError::permission_denied(src_path));
        }
        if !permissions::may_modify_entries(&st.store[dst_parent], &ctx.user) {
            return Err(VfsError::permission_denied(st.store[dst_parent].path.clone()));
        }
        if st.store.is_within(dst_parent, id) {
            return Err(VfsError::invalid_path(dst));
        }

        st.store.reparent(id, dst_parent, &dst_name, SystemTime::now());
        let new_path = st.store[id].path.clone();
        Ok(FsEvent::new(
            FsEventKind::Moved,
            new_path.clone(),
            format!("moved {} -> {}", src_path, new_path),
        ))
    }

    fn copy_locked(
        &self,
        st: &mut FsState,
        ctx: &AccessContext,
        from: &str,
        to: &str,
    ) -> VfsResult<FsEvent> {
        let src = self.resolve(ctx, from)?;
        let dst = self.resolve(ctx, to)?;
        let src_id = self.locate(st, &ctx.user, &src, true)?;
        let (dst_parent, dst_name) = self.prepare_create(st, ctx, &dst)?;
        if st.store.is_within(dst_parent, src_id) {
            return Err(VfsError::invalid_path(dst));
        }

        let plan = st.store.descendants(src_id);
        for &id in &plan {
            let node = &st.store[id];
            let readable = match node.kind {
                NodeKind::File { .. } => permissions::allows(node, &ctx.user, AccessMode::Read),
                NodeKind::Directory { .. } => {
                    permissions::allows(node, &ctx.user, AccessMode::Read)
                        && permissions::allows(node, &ctx.user, AccessMode::Execute)
                }
                NodeKind::Symlink { .. } => true,
            };
            if !readable {
                return Err(VfsError::permission_denied(node.path.clone()));
            }
        }

        let umask = ctx.umask.unwrap_or(self.config.umask);
        let now = SystemTime::now();
        let mut copies: HashMap<NodeId, NodeId> = HashMap::with_capacity(plan.len());
        for &id in &plan {
            let (kind, mode, name, parent) = {
                let node = &st.store[id];
                let kind = match &node.kind {
                    NodeKind::File { content } => NodeKind::File {
                        content: content.clone(),
                    },
                    NodeKind::Directory { .. } => NodeKind::empty_directory(),
                    NodeKind::Symlink { target } => NodeKind::Symlink {
                        target: target.clone(),
                    },
                };
                (kind, node.mode, node.name.clone(), node.parent)
            };
            let (new_parent, new_name) = if id == src_id {
                (dst_parent, dst_name.clone())
            } else {
                let Some(&copied_parent) = parent.and_then(|p| copies.get(&p)) else {
                    continue;
                };
                (copied_parent, name)
            };

            let target_dir = &st.store[new_parent];
            let mode = copied_mode(&kind, mode, umask, target_dir, &ctx.user);
            let group = permissions::inherited_group(target_dir, &ctx.user);
            let new_id = st.store.insert(
                new_parent,
                &new_name,
                NewNode {
                    kind,
                    owner: ctx.user.uid,
                    group,
                    mode,
                },
                now,
            );
            copies.insert(id, new_id);
        }

        let src_path = st.store[src_id].path.clone();
        let dst_path = join_path(&st.store[dst_parent].path, &dst_name);
        Ok(FsEvent::new(
            FsEventKind::Copied,
            dst_path.clone(),
            format!("copied {} -> {} ({} nodes)", src_path, dst_path, copies.len()),
        ))
    }

    fn chmod_locked(
        &self,
        st: &mut FsState,
        ctx: &AccessContext,
        raw: &str,
        mode: Mode,
    ) -> VfsResult<FsEvent> {
        let path = self.resolve(ctx, raw)?;
        let (id, route) = self.locate_routed(st, &ctx.user, &path, true)?;
        self.ensure_writable(st, &st.store[id].path, &route)?;
        let user = &ctx.user;
        let node = &mut st.store[id];
        if !user.is_root() && node.owner != user.uid {
            return Err(VfsError::permission_denied(node.path.clone()));
        }
        let mode = if !user.is_root() && !user.in_group(node.group) {
            mode.without(Mode::SETGID)
        } else {
            mode
        };
        node.mode = mode;
        Ok(FsEvent::new(
            FsEventKind::AttributesChanged,
            node.path.clone(),
            format!("mode of {} set to {:o} ({})", node.path, mode, mode),
        ))
    }

    fn chown_locked(
        &self,
        st: &mut FsState,
        ctx: &AccessContext,
        raw: &str,
        owner: Option<Uid>,
        group: Option<Gid>,
    ) -> VfsResult<FsEvent> {
        let path = self.resolve(ctx, raw)?;
        let (id, route) = self.locate_routed(st, &ctx.user, &path, true)?;
        self.ensure_writable(st, &st.store[id].path, &route)?;
        let user = &ctx.user;
        let node = &mut st.store[id];

        if !user.is_root() {
            let gives_away = owner.is_some_and(|uid| uid != node.owner);
            let foreign_group = group.is_some_and(|gid| !user.in_group(gid));
            if node.owner != user.uid || gives_away || foreign_group {
                return Err(VfsError::permission_denied(node.path.clone()));
            }
        }

        if let Some(uid) = owner {
            node.owner = uid;
        }
        if let Some(gid) = group {
            node.group = gid;
        }
        if !user.is_root() && matches!(node.kind, NodeKind::File { .. }) {
            node.mode = node.mode.without(Mode::SETUID).without(Mode::SETGID);
        }
        Ok(FsEvent::new(
            FsEventKind::AttributesChanged,
            node.path.clone(),
            format!("owner of {} set to {}:{}", node.path, node.owner, node.group),
        ))
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    /// Refuse writes to a node whose real path, or the bind mount it was
    /// reached through, is read-only.
    fn ensure_writable(&self, st: &FsState, real_path: &str, route: &Route) -> VfsResult<()> {
        if route.options_at(&st.mounts, real_path).read_only {
            return Err(VfsError::read_only(real_path));
        }
        Ok(())
    }

    /// Refuse adding or removing the entry at `slot` on a read-only mount.
    fn ensure_slot_writable(&self, st: &FsState, slot: &Slot) -> VfsResult<()> {
        if slot.options(&st.mounts, &st.store).read_only {
            return Err(VfsError::read_only(slot.path(&st.store)));
        }
        Ok(())
    }

    /// Check that `path` can be created: parent directory, writable mount
    /// where the entry would really land, free name, and write plus search
    /// permission on the parent.
    fn prepare_create(
        &self,
        st: &mut FsState,
        ctx: &AccessContext,
        path: &str,
    ) -> VfsResult<(NodeId, String)> {
        if path == "/" {
            return Err(VfsError::already_exists("/"));
        }
        let slot = self.locate_parent(st, &ctx.user, path)?;
        self.ensure_slot_writable(st, &slot)?;
        if st.store.child(slot.dir, &slot.name).is_some() {
            return Err(VfsError::already_exists(path));
        }
        let dir = &st.store[slot.dir];
        if !permissions::may_modify_entries(dir, &ctx.user) {
            return Err(VfsError::permission_denied(dir.path.clone()));
        }
        Ok((slot.dir, slot.name))
    }

    /// Attach a new node owned by the caller, with umask and setgid
    /// inheritance applied.
    fn attach(
        &self,
        st: &mut FsState,
        ctx: &AccessContext,
        parent: NodeId,
        name: &str,
        spec: NodeSpec,
        mode: Option<Mode>,
    ) -> NodeId {
        let umask = ctx.umask.unwrap_or(self.config.umask);
        let dir = &st.store[parent];
        let (kind, mode) = match spec {
            NodeSpec::File(content) => (
                NodeKind::File { content },
                permissions::effective_permissions(mode, umask, dir, false),
            ),
            NodeSpec::Directory => (
                NodeKind::empty_directory(),
                permissions::effective_permissions(mode, umask, dir, true),
            ),
            NodeSpec::Symlink(target) => (NodeKind::Symlink { target }, Mode::SYMLINK),
        };
        let group = permissions::inherited_group(dir, &ctx.user);
        st.store.insert(
            parent,
            name,
            NewNode {
                kind,
                owner: ctx.user.uid,
                group,
                mode,
            },
            SystemTime::now(),
        )
    }
}

/// Every non-empty directory in the subtree must be readable, and each of
/// its entries removable by `user`.
fn authorize_subtree_removal(st: &FsState, user: &UserIdentity, id: NodeId) -> VfsResult<()> {
    for dir_id in st.store.descendants(id) {
        let dir = &st.store[dir_id];
        let Some(children) = dir.children() else {
            continue;
        };
        if children.is_empty() {
            continue;
        }
        if !permissions::allows(dir, user, AccessMode::Read) {
            return Err(VfsError::permission_denied(dir.path.clone()));
        }
        for &child in children.values() {
            let entry = &st.store[child];
            if !permissions::may_remove_entry(dir, entry, user) {
                return Err(VfsError::permission_denied(entry.path.clone()));
            }
        }
    }
    Ok(())
}

/// Mode of a copied node: the source mode under the caller's umask, without
/// setuid/setgid unless root copies, with setgid inherited by directories.
fn copied_mode(
    kind: &NodeKind,
    source: Mode,
    umask: Mode,
    target_dir: &impl Permissioned,
    user: &UserIdentity,
) -> Mode {
    if matches!(kind, NodeKind::Symlink { .. }) {
        return Mode::SYMLINK;
    }
    let mut mode = source.masked_by(umask);
    if !user.is_root() {
        mode = mode.without(Mode::SETUID).without(Mode::SETGID);
    }
    if matches!(kind, NodeKind::Directory { .. }) && target_dir.mode().is_setgid() {
        mode = mode.with(Mode::SETGID);
    }
    mode
}
