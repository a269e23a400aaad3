//! VFS error types.

use std::io;
use thiserror::Error;

/// Fieldless discriminant of [`VfsError`], for branching and for events.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize, strum::Display, strum::AsRefStr,
)]
#[strum(serialize_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    AlreadyExists,
    NotADirectory,
    NotAFile,
    PermissionDenied,
    DirectoryNotEmpty,
    InvalidPath,
    MountConflict,
    BrokenSymbolicLink,
    ReadOnly,
    Io,
    Corrupt,
}

/// VFS error type.
///
/// Missing paths and denied access are ordinary outcomes of a filesystem
/// call; every public operation reports them through `Err`, never by
/// panicking.
#[derive(Debug, Error)]
pub enum VfsError {
    /// File or directory not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Path already exists.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// Expected a directory.
    #[error("not a directory: {0}")]
    NotADirectory(String),

    /// Expected a regular file.
    #[error("not a file: {0}")]
    NotAFile(String),

    /// Permission denied.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// Directory not empty.
    #[error("directory not empty: {0}")]
    DirectoryNotEmpty(String),

    /// Invalid path.
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// Mount point already in use, busy, or in the way of the operation.
    #[error("mount conflict: {0}")]
    MountConflict(String),

    /// Symbolic link whose target is missing or loops.
    #[error("broken symbolic link: {0}")]
    BrokenSymbolicLink(String),

    /// Write beneath a read-only mount.
    #[error("read-only filesystem: {0}")]
    ReadOnly(String),

    /// I/O error from a persistence backend.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Persisted data could not be decoded or violates tree invariants.
    #[error("corrupt snapshot: {0}")]
    Corrupt(String),
}

impl VfsError {
    /// Create a NotFound error.
    pub fn not_found(path: impl Into<String>) -> Self {
        Self::NotFound(path.into())
    }

    /// Create an AlreadyExists error.
    pub fn already_exists(path: impl Into<String>) -> Self {
        Self::AlreadyExists(path.into())
    }

    /// Create a NotADirectory error.
    pub fn not_a_directory(path: impl Into<String>) -> Self {
        Self::NotADirectory(path.into())
    }

    /// Create a NotAFile error.
    pub fn not_a_file(path: impl Into<String>) -> Self {
        Self::NotAFile(path.into())
    }

    /// Create a PermissionDenied error.
    pub fn permission_denied(path: impl Into<String>) -> Self {
        Self::PermissionDenied(path.into())
    }

    /// Create a DirectoryNotEmpty error.
    pub fn directory_not_empty(path: impl Into<String>) -> Self {
        Self::DirectoryNotEmpty(path.into())
    }

    /// Create an InvalidPath error.
    pub fn invalid_path(path: impl Into<String>) -> Self {
        Self::InvalidPath(path.into())
    }

    /// Create a MountConflict error.
    pub fn mount_conflict(path: impl Into<String>) -> Self {
        Self::MountConflict(path.into())
    }

    /// Create a BrokenSymbolicLink error.
    pub fn broken_link(path: impl Into<String>) -> Self {
        Self::BrokenSymbolicLink(path.into())
    }

    /// Create a ReadOnly error.
    pub fn read_only(path: impl Into<String>) -> Self {
        Self::ReadOnly(path.into())
    }

    /// Create a Corrupt error.
    pub fn corrupt(msg: impl Into<String>) -> Self {
        Self::Corrupt(msg.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            VfsError::NotFound(_) => ErrorKind::NotFound,
            VfsError::AlreadyExists(_) => ErrorKind::AlreadyExists,
            VfsError::NotADirectory(_) => ErrorKind::NotADirectory,
            VfsError::NotAFile(_) => ErrorKind::NotAFile,
            VfsError::PermissionDenied(_) => ErrorKind::PermissionDenied,
            VfsError::DirectoryNotEmpty(_) => ErrorKind::DirectoryNotEmpty,
            VfsError::InvalidPath(_) => ErrorKind::InvalidPath,
            VfsError::MountConflict(_) => ErrorKind::MountConflict,
            VfsError::BrokenSymbolicLink(_) => ErrorKind::BrokenSymbolicLink,
            VfsError::ReadOnly(_) => ErrorKind::ReadOnly,
            VfsError::Io(_) => ErrorKind::Io,
            VfsError::Corrupt(_) => ErrorKind::Corrupt,
        }
    }

    /// The path the error refers to, when it refers to one.
    pub fn path(&self) -> Option<&str> {
        match self {
            VfsError::NotFound(p)
            | VfsError::AlreadyExists(p)
            | VfsError::NotADirectory(p)
            | VfsError::NotAFile(p)
            | VfsError::PermissionDenied(p)
            | VfsError::DirectoryNotEmpty(p)
            | VfsError::InvalidPath(p)
            | VfsError::MountConflict(p)
            | VfsError::BrokenSymbolicLink(p)
            | VfsError::ReadOnly(p) => Some(p),
            VfsError::Io(_) | VfsError::Corrupt(_) => None,
        }
    }

    /// Check if this is a "not found" error (a broken link counts).
    pub fn is_not_found(&self) -> bool {
        matches!(self, VfsError::NotFound(_) | VfsError::BrokenSymbolicLink(_))
    }

    /// Check if this is a permission error (a read-only mount counts).
    pub fn is_permission_denied(&self) -> bool {
        matches!(self, VfsError::PermissionDenied(_) | VfsError::ReadOnly(_))
    }
}

/// Convert VfsError to std::io::Error for compatibility.
impl From<VfsError> for io::Error {
    fn from(e: VfsError) -> Self {
        match e {
            VfsError::NotFound(msg) => io::Error::new(io::ErrorKind::NotFound, msg),
            VfsError::AlreadyExists(msg) => io::Error::new(io::ErrorKind::AlreadyExists, msg),
            VfsError::NotADirectory(msg) => io::Error::new(io::ErrorKind::NotADirectory, msg),
            VfsError::NotAFile(msg) => io::Error::new(io::ErrorKind::IsADirectory, msg),
            VfsError::PermissionDenied(msg) => {
                io::Error::new(io::ErrorKind::PermissionDenied, msg)
            }
            VfsError::DirectoryNotEmpty(msg) => {
                io::Error::new(io::ErrorKind::DirectoryNotEmpty, msg)
            }
            VfsError::InvalidPath(msg) => io::Error::new(io::ErrorKind::InvalidInput, msg),
            VfsError::MountConflict(msg) => io::Error::new(io::ErrorKind::ResourceBusy, msg),
            VfsError::BrokenSymbolicLink(msg) => io::Error::new(io::ErrorKind::NotFound, msg),
            VfsError::ReadOnly(msg) => io::Error::new(io::ErrorKind::ReadOnlyFilesystem, msg),
            VfsError::Io(e) => e,
            VfsError::Corrupt(msg) => io::Error::new(io::ErrorKind::InvalidData, msg),
        }
    }
}

/// VFS result type.
pub type VfsResult<T> = Result<T, VfsError>;
