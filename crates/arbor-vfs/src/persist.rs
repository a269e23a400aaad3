//! Snapshots of the whole tree and where they are kept.
//!
//! A [`Snapshot`] lists nodes in pre-order (every parent before its
//! children) with full attributes, plus the mount table. Snapshots are
//! encoded with postcard and handed to a [`SnapshotStore`].
//!
//! Loading validates the snapshot completely before anything is replaced:
//! a snapshot that fails to decode, or whose nodes do not form a tree, is
//! rejected as corrupt and the live tree stays as it was.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use arbor_types::{Gid, Mode, Uid};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::{VfsError, VfsResult};
use crate::mount::{MountPoint, MountTable};
use crate::node::{NodeId, NodeKind};
use crate::path::{file_name, is_under, normalize, parent_path};
use crate::store::{NewNode, NodeStore};

/// Current snapshot format version.
pub const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub version: u32,
    /// Pre-order; the first entry is `/`.
    pub nodes: Vec<SnapshotNode>,
    pub mounts: Vec<MountPoint>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotNode {
    pub path: String,
    pub kind: SnapshotKind,
    pub owner: Uid,
    pub group: Gid,
    pub mode: Mode,
    pub created_at: SystemTime,
    pub modified_at: SystemTime,
    pub accessed_at: SystemTime,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SnapshotKind {
    File { content: Vec<u8> },
    Directory,
    Symlink { target: String },
}

impl Snapshot {
    pub fn encode(&self) -> VfsResult<Vec<u8>> {
        postcard::to_stdvec(self).map_err(|e| VfsError::Io(std::io::Error::other(e)))
    }

    pub fn decode(bytes: &[u8]) -> VfsResult<Self> {
        let snapshot: Snapshot =
            postcard::from_bytes(bytes).map_err(|e| VfsError::corrupt(e.to_string()))?;
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(VfsError::corrupt(format!(
                "unsupported snapshot version {}",
                snapshot.version
            )));
        }
        Ok(snapshot)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }
}

/// Capture the tree and mount table.
pub(crate) fn capture(store: &NodeStore, mounts: &MountTable) -> Snapshot {
    let nodes = store
        .descendants(store.root())
        .into_iter()
        .map(|id| {
            let node = &store[id];
            let kind = match &node.kind {
                NodeKind::File { content } => SnapshotKind::File {
                    content: content.clone(),
                },
                NodeKind::Directory { .. } => SnapshotKind::Directory,
                NodeKind::Symlink { target } => SnapshotKind::Symlink {
                    target: target.clone(),
                },
            };
            SnapshotNode {
                path: node.path.clone(),
                kind,
                owner: node.owner,
                group: node.group,
                mode: node.mode,
                created_at: node.created_at,
                modified_at: node.modified_at,
                accessed_at: node.accessed_at,
            }
        })
        .collect();
    Snapshot {
        version: SNAPSHOT_VERSION,
        nodes,
        mounts: mounts.points().cloned().collect(),
    }
}

/// Rebuild a store and mount table, checking every tree invariant.
pub(crate) fn rebuild(snapshot: &Snapshot) -> VfsResult<(NodeStore, MountTable)> {
    let mut nodes = snapshot.nodes.iter();
    let root = nodes
        .next()
        .ok_or_else(|| VfsError::corrupt("snapshot has no nodes"))?;
    if root.path != "/" || root.kind != SnapshotKind::Directory {
        return Err(VfsError::corrupt("first node is not the root directory"));
    }

    let mut store = NodeStore::new(root.owner, root.group, root.mode, root.created_at);
    let mut placed: Vec<(NodeId, &SnapshotNode)> = vec![(store.root(), root)];

    for entry in nodes {
        if entry.path == "/" || normalize(&entry.path) != entry.path {
            return Err(VfsError::corrupt(format!("bad node path {:?}", entry.path)));
        }
        let parent = store
            .lookup(parent_path(&entry.path))
            .ok_or_else(|| VfsError::corrupt(format!("orphaned node {}", entry.path)))?;
        if !store[parent].is_dir() {
            return Err(VfsError::corrupt(format!("parent of {} is not a directory", entry.path)));
        }
        let name = file_name(&entry.path);
        if store.child(parent, name).is_some() {
            return Err(VfsError::corrupt(format!("duplicate node {}", entry.path)));
        }
        let kind = match &entry.kind {
            SnapshotKind::File { content } => NodeKind::File {
                content: content.clone(),
            },
            SnapshotKind::Directory => NodeKind::empty_directory(),
            SnapshotKind::Symlink { target } => NodeKind::Symlink {
                target: target.clone(),
            },
        };
        let id = store.insert(
            parent,
            name,
            NewNode {
                kind,
                owner: entry.owner,
                group: entry.group,
                mode: entry.mode,
            },
            entry.created_at,
        );
        placed.push((id, entry));
    }

    // inserting children bumps parent mtimes; put the recorded ones back
    for (id, entry) in placed {
        let node = &mut store[id];
        node.modified_at = entry.modified_at;
        node.accessed_at = entry.accessed_at;
    }

    let mut mounts = MountTable::new();
    for point in &snapshot.mounts {
        if normalize(&point.mount_path) != point.mount_path {
            return Err(VfsError::corrupt(format!("bad mount path {:?}", point.mount_path)));
        }
        let target = store
            .lookup(&point.mount_path)
            .ok_or_else(|| VfsError::corrupt(format!("mount on missing {}", point.mount_path)))?;
        if !store[target].is_dir() || mounts.is_mount_point(&point.mount_path) {
            return Err(VfsError::corrupt(format!("bad mount on {}", point.mount_path)));
        }
        if point.is_bind() {
            check_bind_source(&mut store, point)?;
        }
        mounts.insert(point.clone());
    }

    store.rebuild_cache();
    Ok((store, mounts))
}

/// A bind source must be an existing directory outside its mount point.
fn check_bind_source(store: &mut NodeStore, point: &MountPoint) -> VfsResult<()> {
    let bad = |why: &str| {
        VfsError::corrupt(format!(
            "bind of {} on {}: {}",
            point.source, point.mount_path, why
        ))
    };
    if normalize(&point.source) != point.source {
        return Err(bad("source path not normalized"));
    }
    if point.mount_path == "/" || is_under(&point.source, &point.mount_path) {
        return Err(bad("source lies under the mount point"));
    }
    let source = store.lookup(&point.source).ok_or_else(|| bad("source missing"))?;
    if !store[source].is_dir() {
        return Err(bad("source is not a directory"));
    }
    Ok(())
}

/// Somewhere to keep one encoded snapshot.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Replace the stored snapshot.
    async fn save(&self, bytes: &[u8]) -> VfsResult<()>;

    /// The stored snapshot, or None if nothing was saved yet.
    async fn load(&self) -> VfsResult<Option<Vec<u8>>>;
}

/// Keeps the snapshot in memory. Handy for tests and for checkpoints.
#[derive(Debug, Default)]
pub struct MemoryStore {
    bytes: Mutex<Option<Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite the stored bytes directly.
    pub fn put_raw(&self, bytes: Vec<u8>) {
        *self.bytes.lock() = Some(bytes);
    }
}

#[async_trait]
impl SnapshotStore for MemoryStore {
    async fn save(&self, bytes: &[u8]) -> VfsResult<()> {
        *self.bytes.lock() = Some(bytes.to_vec());
        Ok(())
    }

    async fn load(&self) -> VfsResult<Option<Vec<u8>>> {
        Ok(self.bytes.lock().clone())
    }
}

/// Keeps the snapshot in a file on the host filesystem.
///
/// Saves go to a sibling temporary file first and are renamed over the
/// target, so a crash mid-save leaves the previous snapshot intact.
#[derive(Debug, Clone)]
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self.path.file_name().unwrap_or_default().to_os_string();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[async_trait]
impl SnapshotStore for FileStore {
    async fn save(&self, bytes: &[u8]) -> VfsResult<()> {
        if let Some(dir) = self.path.parent() {
            if !dir.as_os_str().is_empty() {
                tokio::fs::create_dir_all(dir).await?;
            }
        }
        let temp = self.temp_path();
        tokio::fs::write(&temp, bytes).await?;
        tokio::fs::rename(&temp, &self.path).await?;
        Ok(())
    }

    async fn load(&self) -> VfsResult<Option<Vec<u8>>> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_store() -> NodeStore {
        let now = SystemTime::now();
        let mut store = NodeStore::new(0, 0, Mode::new(0o755), now);
        let etc = store.insert(
            store.root(),
            "etc",
            NewNode {
                kind: NodeKind::empty_directory(),
                owner: 0,
                group: 0,
                mode: Mode::new(0o755),
            },
            now,
        );
        store.insert(
            etc,
            "hosts",
            NewNode {
                kind: NodeKind::File {
                    content: b"127.0.0.1 localhost\n".to_vec(),
                },
                owner: 0,
                group: 0,
                mode: Mode::new(0o644),
            },
            now,
        );
        store
    }

    #[test]
    fn test_capture_is_preorder() {
        let store = sample_store();
        let snapshot = capture(&store, &MountTable::new());
        let paths: Vec<_> = snapshot.nodes.iter().map(|n| n.path.as_str()).collect();
        assert_eq!(paths, vec!["/", "/etc", "/etc/hosts"]);
    }

    #[test]
    fn test_rebuild_preserves_attributes() {
        let store = sample_store();
        let snapshot = capture(&store, &MountTable::new());
        let (mut rebuilt, _) = rebuild(&snapshot).unwrap();
        let hosts = rebuilt.lookup("/etc/hosts").unwrap();
        assert_eq!(rebuilt[hosts].mode, Mode::new(0o644));
        assert_eq!(capture(&rebuilt, &MountTable::new()), snapshot);
    }

    #[test]
    fn test_rebuild_rejects_orphans() {
        let store = sample_store();
        let mut snapshot = capture(&store, &MountTable::new());
        snapshot.nodes.remove(1);
        let err = rebuild(&snapshot).unwrap_err();
        assert!(matches!(err, VfsError::Corrupt(_)));
    }

    #[test]
    fn test_rebuild_rejects_duplicates() {
        let store = sample_store();
        let mut snapshot = capture(&store, &MountTable::new());
        let dup = snapshot.nodes[2].clone();
        snapshot.nodes.push(dup);
        assert!(matches!(rebuild(&snapshot), Err(VfsError::Corrupt(_))));
    }

    fn mount(source: &str, mount_path: &str, fs_type: &str) -> MountPoint {
        MountPoint {
            source: source.into(),
            mount_path: mount_path.into(),
            fs_type: fs_type.into(),
            options: Default::default(),
        }
    }

    #[test]
    fn test_rebuild_rejects_unnormalized_mount_path() {
        let mut snapshot = capture(&sample_store(), &MountTable::new());
        snapshot.mounts.push(mount("tmpfs", "/etc/", "tmpfs"));
        assert!(matches!(rebuild(&snapshot), Err(VfsError::Corrupt(_))));

        snapshot.mounts[0].mount_path = "/etc".into();
        let (_, mounts) = rebuild(&snapshot).unwrap();
        assert!(mounts.is_mount_point("/etc"));
    }

    #[test]
    fn test_rebuild_checks_bind_source() {
        let base = capture(&sample_store(), &MountTable::new());

        let mut missing = base.clone();
        missing.mounts.push(mount("/srv", "/etc", "bind"));
        assert!(matches!(rebuild(&missing), Err(VfsError::Corrupt(_))));

        let mut file = base.clone();
        let mut mnt = file.nodes[1].clone();
        mnt.path = "/mnt".into();
        file.nodes.push(mnt);
        file.mounts.push(mount("/etc/hosts", "/mnt", "bind"));
        assert!(matches!(rebuild(&file), Err(VfsError::Corrupt(_))));

        file.mounts[0].source = "/etc".into();
        let (_, mounts) = rebuild(&file).unwrap();
        assert_eq!(mounts.rewrite("/mnt/hosts").unwrap().0, "/etc/hosts");
    }

    #[test]
    fn test_decode_garbage() {
        let err = Snapshot::decode(&[0xff, 0xff, 0xff]).unwrap_err();
        assert!(matches!(err, VfsError::Corrupt(_)));
    }

    #[test]
    fn test_encode_decode() {
        let snapshot = capture(&sample_store(), &MountTable::new());
        let bytes = snapshot.encode().unwrap();
        assert_eq!(Snapshot::decode(&bytes).unwrap(), snapshot);
    }

    #[tokio::test]
    async fn test_memory_store() {
        let store = MemoryStore::new();
        assert_eq!(store.load().await.unwrap(), None);
        store.save(b"abc").await.unwrap();
        assert_eq!(store.load().await.unwrap(), Some(b"abc".to_vec()));
    }

    #[tokio::test]
    async fn test_file_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path().join("state").join("vfs.snap"));
        assert_eq!(store.load().await.unwrap(), None);
        store.save(b"one").await.unwrap();
        store.save(b"two").await.unwrap();
        assert_eq!(store.load().await.unwrap(), Some(b"two".to_vec()));
        assert!(!store.temp_path().exists());
    }
}
