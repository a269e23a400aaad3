//! Mount table with longest-prefix matching.
//!
//! A mount attaches options (read-only, no-exec, ...) to the subtree below
//! its mount path. A `bind` mount additionally redirects that subtree to
//! another directory of the same tree: `/mnt/data/x` with `/srv/data` bound
//! on `/mnt/data` resolves to `/srv/data/x`.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::path::{is_under, rebase};

/// Filesystem type whose mounts redirect paths.
pub const BIND_FS_TYPE: &str = "bind";

/// Options of a mount, parsed from the usual comma list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountOptions {
    pub read_only: bool,
    pub no_exec: bool,
    pub no_suid: bool,
    pub no_dev: bool,
    /// Flags we do not interpret, kept for display.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extra: Vec<String>,
}

impl MountOptions {
    pub fn read_only() -> Self {
        Self {
            read_only: true,
            ..Self::default()
        }
    }
}

impl FromStr for MountOptions {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut opts = MountOptions::default();
        for flag in s.split(',').map(str::trim).filter(|f| !f.is_empty()) {
            match flag {
                "ro" => opts.read_only = true,
                "rw" => opts.read_only = false,
                "noexec" => opts.no_exec = true,
                "exec" => opts.no_exec = false,
                "nosuid" => opts.no_suid = true,
                "suid" => opts.no_suid = false,
                "nodev" => opts.no_dev = true,
                "dev" => opts.no_dev = false,
                other => opts.extra.push(other.to_string()),
            }
        }
        Ok(opts)
    }
}

impl fmt::Display for MountOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut flags = vec![if self.read_only { "ro" } else { "rw" }];
        if self.no_exec {
            flags.push("noexec");
        }
        if self.no_suid {
            flags.push("nosuid");
        }
        if self.no_dev {
            flags.push("nodev");
        }
        flags.extend(self.extra.iter().map(String::as_str));
        f.write_str(&flags.join(","))
    }
}

/// A mounted filesystem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountPoint {
    /// Device or source directory (for `bind`).
    pub source: String,
    /// Normalized absolute path of an existing directory.
    pub mount_path: String,
    pub fs_type: String,
    pub options: MountOptions,
}

impl MountPoint {
    pub fn is_bind(&self) -> bool {
        self.fs_type == BIND_FS_TYPE
    }
}

/// Identity of one mounting. A later mount at the same path gets a new id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct MountId(u64);

impl MountId {
    fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

#[derive(Debug, Clone)]
struct MountEntry {
    id: MountId,
    point: MountPoint,
    /// Open handles holding the mount busy.
    handles: usize,
}

/// Mount points keyed by normalized path.
#[derive(Debug, Default)]
pub(crate) struct MountTable {
    mounts: BTreeMap<String, MountEntry>,
}

impl MountTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_mount_point(&self, path: &str) -> bool {
        self.mounts.contains_key(path)
    }

    pub fn insert(&mut self, point: MountPoint) {
        let entry = MountEntry {
            id: MountId::next(),
            point,
            handles: 0,
        };
        self.mounts.insert(entry.point.mount_path.clone(), entry);
    }

    pub fn remove(&mut self, path: &str) -> Option<MountPoint> {
        self.mounts.remove(path).map(|entry| entry.point)
    }

    pub fn handles(&self, path: &str) -> usize {
        self.mounts.get(path).map_or(0, |entry| entry.handles)
    }

    /// Take a handle on the mount at `path`.
    pub fn acquire(&mut self, path: &str) -> Option<MountId> {
        let entry = self.mounts.get_mut(path)?;
        entry.handles += 1;
        Some(entry.id)
    }

    /// Give back a handle. Ignored unless `id` is still the mount at `path`.
    pub fn release(&mut self, path: &str, id: MountId) {
        match self.mounts.get_mut(path) {
            Some(entry) if entry.id == id => entry.handles = entry.handles.saturating_sub(1),
            _ => {}
        }
    }

    /// The most specific mount covering `path`.
    pub fn find(&self, path: &str) -> Option<&MountPoint> {
        self.mounts
            .iter()
            .filter(|(mount_path, _)| is_under(path, mount_path))
            .max_by_key(|(mount_path, _)| mount_path.len())
            .map(|(_, entry)| &entry.point)
    }

    /// A mount whose mount point, or bind source, lies at or beneath `path`.
    pub fn referencing(&self, path: &str) -> Option<&MountPoint> {
        self.points().find(|point| {
            is_under(&point.mount_path, path) || (point.is_bind() && is_under(&point.source, path))
        })
    }

    /// Options in force for `path`.
    pub fn options_for(&self, path: &str) -> Option<&MountOptions> {
        self.find(path).map(|point| &point.options)
    }

    /// Redirect `path` through the bind mount that covers it, if any,
    /// along with that bind's options.
    ///
    /// Only the single most specific mount is applied; a bind onto a
    /// directory that is itself beneath another bind is not re-rewritten.
    pub fn rewrite(&self, path: &str) -> Option<(String, &MountOptions)> {
        let point = self.find(path)?;
        if !point.is_bind() {
            return None;
        }
        Some((rebase(path, &point.mount_path, &point.source), &point.options))
    }

    pub fn points(&self) -> impl Iterator<Item = &MountPoint> {
        self.mounts.values().map(|entry| &entry.point)
    }

    /// One line per mount, `/proc/mounts` style.
    pub fn describe(&self) -> String {
        let mut out = String::new();
        for point in self.points() {
            out.push_str(&format!(
                "{} on {} type {} ({})\n",
                point.source, point.mount_path, point.fs_type, point.options
            ));
        }
        out
    }
}
