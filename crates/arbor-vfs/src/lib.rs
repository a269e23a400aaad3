//! # arbor-vfs
//!
//! In-memory hierarchical filesystem with Unix semantics.
//!
//! A [`FileSystem`] is a single tree rooted at `/`:
//! - Files, directories and symbolic links, each with owner, group and mode
//! - Permission checks on every path segment, with sticky and setgid rules
//! - A mount table with read-only, no-exec and bind mounts
//! - Change events on a broadcast bus, filtered by path prefix
//! - Snapshots to memory or to a host file
//!
//! Callers identify themselves with an [`AccessContext`]. Every operation
//! returns a [`VfsResult`]; missing paths and denials are ordinary errors.

pub mod bootstrap;
pub mod config;
pub mod context;
pub mod error;
pub mod events;
pub mod filesystem;
pub mod mount;
pub mod node;
pub mod path;
pub mod permissions;
pub mod persist;
mod store;

pub use config::{ConfigError, VfsConfig};
pub use context::AccessContext;
pub use error::{ErrorKind, VfsError, VfsResult};
pub use events::{EventBus, FsEvent, FsEventKind, Subscription};
pub use filesystem::{FileSystem, MountLease};
pub use mount::{BIND_FS_TYPE, MountOptions, MountPoint};
pub use node::{FileType, Metadata};
pub use path::PathResolver;
pub use persist::{FileStore, MemoryStore, Snapshot, SnapshotStore};

pub use arbor_types::{AccessMode, Gid, Mode, PermissionClass, Uid, UserIdentity};
