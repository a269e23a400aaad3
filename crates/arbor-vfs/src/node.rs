//! Tree nodes.
//!
//! Nodes live in an arena owned by the [`NodeStore`](crate::store::NodeStore)
//! and refer to each other by [`NodeId`]. A parent link is a plain index and
//! implies no ownership; lifetime flows from a directory to its children.

use std::time::SystemTime;

use arbor_types::{AccessMode, Gid, Mode, Uid, UserIdentity};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::permissions::{self, Permissioned};

/// Arena index of a node.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) usize);

impl NodeId {
    pub(crate) fn index(self) -> usize {
        self.0
    }
}

/// What a node is, as reported in [`Metadata`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum FileType {
    File,
    Directory,
    Symlink,
}

impl FileType {
    pub fn is_file(&self) -> bool {
        matches!(self, FileType::File)
    }

    /// Directories are the only nodes with entries, and the only ones
    /// that search and sticky bits mean anything on.
    pub fn is_dir(&self) -> bool {
        matches!(self, FileType::Directory)
    }

    /// A link node as stored, before any following.
    pub fn is_symlink(&self) -> bool {
        matches!(self, FileType::Symlink)
    }
}

/// Variant payload of a node.
#[derive(Debug, Clone)]
pub(crate) enum NodeKind {
    File { content: Vec<u8> },
    Directory { children: IndexMap<String, NodeId> },
    Symlink { target: String },
}

impl NodeKind {
    pub(crate) fn empty_directory() -> Self {
        NodeKind::Directory {
            children: IndexMap::new(),
        }
    }

    pub(crate) fn file_type(&self) -> FileType {
        match self {
            NodeKind::File { .. } => FileType::File,
            NodeKind::Directory { .. } => FileType::Directory,
            NodeKind::Symlink { .. } => FileType::Symlink,
        }
    }
}

/// A file, directory or symbolic link in the tree.
#[derive(Debug, Clone)]
pub(crate) struct Node {
    pub name: String,
    /// Canonical absolute path. Rewritten whenever an ancestor moves.
    pub path: String,
    pub parent: Option<NodeId>,
    pub kind: NodeKind,
    pub owner: Uid,
    pub group: Gid,
    pub mode: Mode,
    pub created_at: SystemTime,
    pub modified_at: SystemTime,
    pub accessed_at: SystemTime,
}

impl Node {
    pub fn is_dir(&self) -> bool {
        matches!(self.kind, NodeKind::Directory { .. })
    }

    pub fn children(&self) -> Option<&IndexMap<String, NodeId>> {
        match &self.kind {
            NodeKind::Directory { children } => Some(children),
            _ => None,
        }
    }

    pub fn children_mut(&mut self) -> Option<&mut IndexMap<String, NodeId>> {
        match &mut self.kind {
            NodeKind::Directory { children } => Some(children),
            _ => None,
        }
    }

    pub fn symlink_target(&self) -> Option<&str> {
        match &self.kind {
            NodeKind::Symlink { target } => Some(target),
            _ => None,
        }
    }

    pub fn touch_modified(&mut self, now: SystemTime) {
        self.modified_at = now;
    }

    pub fn metadata(&self) -> Metadata {
        let (size, symlink_target) = match &self.kind {
            NodeKind::File { content } => (content.len() as u64, None),
            NodeKind::Directory { children } => (children.len() as u64, None),
            NodeKind::Symlink { target } => (target.len() as u64, Some(target.clone())),
        };
        Metadata {
            name: self.name.clone(),
            path: self.path.clone(),
            file_type: self.kind.file_type(),
            size,
            owner: self.owner,
            group: self.group,
            mode: self.mode,
            created_at: self.created_at,
            modified_at: self.modified_at,
            accessed_at: self.accessed_at,
            symlink_target,
        }
    }
}

impl Permissioned for Node {
    fn owner(&self) -> Uid {
        self.owner
    }

    fn group(&self) -> Gid {
        self.group
    }

    fn mode(&self) -> Mode {
        self.mode
    }
}

/// Detached view of a node handed out to callers.
///
/// `size` is the byte length for files and the target length for symbolic
/// links; for directories it is the entry count.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    pub name: String,
    pub path: String,
    pub file_type: FileType,
    pub size: u64,
    pub owner: Uid,
    pub group: Gid,
    pub mode: Mode,
    pub created_at: SystemTime,
    pub modified_at: SystemTime,
    pub accessed_at: SystemTime,
    pub symlink_target: Option<String>,
}

impl Metadata {
    pub fn is_file(&self) -> bool {
        self.file_type.is_file()
    }

    pub fn is_dir(&self) -> bool {
        self.file_type.is_dir()
    }

    pub fn is_symlink(&self) -> bool {
        self.file_type.is_symlink()
    }

    /// Would `user` be granted `access` on this node by its own bits?
    pub fn permits(&self, user: &UserIdentity, access: AccessMode) -> bool {
        permissions::allows(self, user, access)
    }
}

impl Permissioned for Metadata {
    fn owner(&self) -> Uid {
        self.owner
    }

    fn group(&self) -> Gid {
        self.group
    }

    fn mode(&self) -> Mode {
        self.mode
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file_node(content: &[u8]) -> Node {
        let now = SystemTime::now();
        Node {
            name: "notes.txt".into(),
            path: "/home/alice/notes.txt".into(),
            parent: None,
            kind: NodeKind::File {
                content: content.to_vec(),
            },
            owner: 1000,
            group: 100,
            mode: Mode::new(0o640),
            created_at: now,
            modified_at: now,
            accessed_at: now,
        }
    }

    #[test]
    fn test_file_type() {
        assert!(FileType::File.is_file());
        assert!(!FileType::File.is_dir());
        assert!(FileType::Directory.is_dir());
        assert!(FileType::Symlink.is_symlink());
        assert_eq!(FileType::Symlink.to_string(), "symlink");
    }

    #[test]
    fn test_metadata_snapshot() {
        let node = file_node(b"hello");
        let meta = node.metadata();
        assert!(meta.is_file());
        assert_eq!(meta.size, 5);
        assert_eq!(meta.path, "/home/alice/notes.txt");
        assert_eq!(meta.mode, Mode::new(0o640));
        assert!(meta.symlink_target.is_none());
    }

    #[test]
    fn test_metadata_permits() {
        let meta = file_node(b"").metadata();
        let alice = UserIdentity::new(1000, "alice", 100);
        let staff = UserIdentity::new(1001, "bob", 100);
        let other = UserIdentity::new(1002, "eve", 200);
        assert!(meta.permits(&alice, AccessMode::Write));
        assert!(meta.permits(&staff, AccessMode::Read));
        assert!(!meta.permits(&staff, AccessMode::Write));
        assert!(!meta.permits(&other, AccessMode::Read));
    }

    #[test]
    fn test_directory_accessors() {
        let mut node = file_node(b"");
        assert!(node.children().is_none());
        node.kind = NodeKind::empty_directory();
        assert!(node.is_dir());
        assert_eq!(node.children().map(|c| c.len()), Some(0));
        assert_eq!(node.metadata().file_type, FileType::Directory);
    }
}
