//! Mount and unmount.

use super::FileSystem;
use crate::context::AccessContext;
use crate::error::{VfsError, VfsResult};
use crate::events::{FsEvent, FsEventKind};
use crate::mount::{BIND_FS_TYPE, MountId, MountOptions, MountPoint};
use crate::path::is_under;

/// An open handle on a mount. The mount is busy while any lease is alive.
#[derive(Debug)]
pub struct MountLease<'a> {
    fs: &'a FileSystem,
    mount_path: String,
    id: MountId,
}

impl MountLease<'_> {
    pub fn mount_path(&self) -> &str {
        &self.mount_path
    }
}

impl Drop for MountLease<'_> {
    fn drop(&mut self) {
        self.fs.with_state(|st| st.mounts.release(&self.mount_path, self.id));
    }
}

impl FileSystem {
    /// Mount `source` on the directory at `mount_path`. Root only.
    ///
    /// For `bind` mounts `source` is a directory of this tree; paths beneath
    /// the mount point then resolve into it.
    pub fn mount(
        &self,
        ctx: &AccessContext,
        source: &str,
        mount_path: &str,
        fs_type: &str,
        options: MountOptions,
    ) -> VfsResult<()> {
        let outcome = self.with_state(|st| {
            if !ctx.user.is_root() {
                return Err(VfsError::permission_denied(mount_path));
            }
            let path = self.resolve(ctx, mount_path)?;
            let id = self.locate(st, &ctx.user, &path, true)?;
            let target = &st.store[id];
            if !target.is_dir() {
                return Err(VfsError::not_a_directory(target.path.clone()));
            }
            let mount_path = target.path.clone();
            if st.mounts.is_mount_point(&mount_path) {
                return Err(VfsError::mount_conflict(mount_path));
            }

            let source = if fs_type == BIND_FS_TYPE {
                if mount_path == "/" {
                    return Err(VfsError::invalid_path("/"));
                }
                let src = self.resolve(ctx, source)?;
                let src_id = self.locate(st, &ctx.user, &src, true)?;
                let src_node = &st.store[src_id];
                if !src_node.is_dir() {
                    return Err(VfsError::not_a_directory(src_node.path.clone()));
                }
                if is_under(&src_node.path, &mount_path) {
                    return Err(VfsError::mount_conflict(mount_path));
                }
                src_node.path.clone()
            } else {
                source.to_string()
            };

            let point = MountPoint {
                source,
                mount_path,
                fs_type: fs_type.to_string(),
                options,
            };
            let message = format!(
                "mounted {} on {} type {} ({})",
                point.source, point.mount_path, point.fs_type, point.options
            );
            let event = FsEvent::new(FsEventKind::Mounted, point.mount_path.clone(), message);
            st.mounts.insert(point);
            Ok(event)
        });
        let result = self.publish_outcome(mount_path, outcome);
        if result.is_ok() {
            tracing::info!(mount_path, fs_type, "mounted");
        }
        result
    }

    /// Remove the mount at `mount_path`. Root only.
    ///
    /// A mount with open leases is busy; `force` unmounts it anyway.
    pub fn unmount(&self, ctx: &AccessContext, mount_path: &str, force: bool) -> VfsResult<()> {
        let outcome = self.with_state(|st| {
            if !ctx.user.is_root() {
                return Err(VfsError::permission_denied(mount_path));
            }
            let path = self.resolve(ctx, mount_path)?;
            if !st.mounts.is_mount_point(&path) {
                return Err(VfsError::not_found(path));
            }
            let handles = st.mounts.handles(&path);
            if handles > 0 && !force {
                return Err(VfsError::mount_conflict(path));
            }
            if handles > 0 {
                tracing::warn!(path = %path, handles, "forcing unmount of busy mount");
            }
            let point = st
                .mounts
                .remove(&path)
                .ok_or_else(|| VfsError::not_found(path.clone()))?;
            Ok(FsEvent::new(
                FsEventKind::Unmounted,
                point.mount_path.clone(),
                format!("unmounted {} from {}", point.source, point.mount_path),
            ))
        });
        let result = self.publish_outcome(mount_path, outcome);
        if result.is_ok() {
            tracing::info!(mount_path, force, "unmounted");
        }
        result
    }

    /// The mount governing `path`, if any.
    pub fn mount_for(&self, path: &str) -> Option<MountPoint> {
        self.with_state(|st| st.mounts.find(path).cloned())
    }

    /// All mounts, ordered by mount path.
    pub fn mounts(&self) -> Vec<MountPoint> {
        self.with_state(|st| st.mounts.points().cloned().collect())
    }

    /// One line per mount, `/proc/mounts` style.
    pub fn describe_mounts(&self) -> String {
        self.with_state(|st| st.mounts.describe())
    }

    /// Hold the mount governing `path` busy until the lease is dropped.
    pub fn open_mount(&self, path: &str) -> VfsResult<MountLease<'_>> {
        let path = self.resolver.resolve(path, "/", "root")?;
        let held = self.with_state(|st| {
            let mount_path = st.mounts.find(&path)?.mount_path.clone();
            let id = st.mounts.acquire(&mount_path)?;
            Some((mount_path, id))
        });
        match held {
            Some((mount_path, id)) => Ok(MountLease {
                fs: self,
                mount_path,
                id,
            }),
            None => Err(VfsError::not_found(path)),
        }
    }
}
