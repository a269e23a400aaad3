//! Snapshot, restore, save and load.

use super::FileSystem;
use crate::error::VfsResult;
use crate::events::{FsEvent, FsEventKind};
use crate::persist::{self, Snapshot, SnapshotStore};

impl FileSystem {
    /// Capture the whole tree and mount table.
    pub fn snapshot(&self) -> Snapshot {
        self.with_state(|st| persist::capture(&st.store, &st.mounts))
    }

    /// Replace the tree with `snapshot`.
    ///
    /// The snapshot is validated and rebuilt off to the side; on any error
    /// the current tree is left untouched. Open mount leases do not carry
    /// over.
    pub fn restore(&self, snapshot: &Snapshot) -> VfsResult<()> {
        let (store, mounts) = persist::rebuild(snapshot).map_err(|e| self.fail("/", e))?;
        let nodes = store.len();
        self.with_state(|st| {
            st.store = store;
            st.mounts = mounts;
        });
        self.publish_outcome(
            "/",
            Ok(FsEvent::new(
                FsEventKind::Loaded,
                "/",
                format!("loaded snapshot ({} nodes)", nodes),
            )),
        )
    }

    /// Encode the tree and hand it to `store`.
    #[tracing::instrument(skip(self, store), name = "vfs.save")]
    pub async fn save_to_store<S>(&self, store: &S) -> VfsResult<()>
    where
        S: SnapshotStore + ?Sized,
    {
        let snapshot = self.snapshot();
        let bytes = snapshot.encode().map_err(|e| self.fail("/", e))?;
        store.save(&bytes).await.map_err(|e| self.fail("/", e))?;
        tracing::info!(
            nodes = snapshot.node_count(),
            bytes = bytes.len(),
            "saved snapshot"
        );
        self.publish_outcome(
            "/",
            Ok(FsEvent::new(
                FsEventKind::Saved,
                "/",
                format!("saved snapshot ({} nodes, {} bytes)", snapshot.node_count(), bytes.len()),
            )),
        )
    }

    /// Replace the tree with the snapshot kept in `store`.
    ///
    /// Returns false, leaving the tree alone, when the store is empty.
    #[tracing::instrument(skip(self, store), name = "vfs.load")]
    pub async fn load_from_store<S>(&self, store: &S) -> VfsResult<bool>
    where
        S: SnapshotStore + ?Sized,
    {
        let Some(bytes) = store.load().await.map_err(|e| self.fail("/", e))? else {
            tracing::debug!("no snapshot stored");
            return Ok(false);
        };
        let snapshot = Snapshot::decode(&bytes).map_err(|e| self.fail("/", e))?;
        self.restore(&snapshot)?;
        tracing::info!(nodes = snapshot.node_count(), "loaded snapshot");
        Ok(true)
    }
}
