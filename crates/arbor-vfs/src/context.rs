//! Caller context: who is asking, from where.

use arbor_types::{Mode, UserIdentity};

/// Identity, working directory and umask of the caller of an operation.
///
/// Shells keep one per session; applications build one per request. The
/// VFS trusts the identity as given.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessContext {
    pub user: UserIdentity,
    /// Absolute working directory relative paths are anchored at.
    pub cwd: String,
    /// Overrides the filesystem's configured umask when set.
    pub umask: Option<Mode>,
}

impl AccessContext {
    /// Context for `user` with `/` as working directory.
    pub fn new(user: UserIdentity) -> Self {
        Self {
            user,
            cwd: String::from("/"),
            umask: None,
        }
    }

    /// Root at `/`. Used for system lookups and bootstrap.
    pub fn system() -> Self {
        Self::new(UserIdentity::root())
    }

    pub fn with_cwd(mut self, cwd: impl Into<String>) -> Self {
        self.cwd = cwd.into();
        self
    }

    pub fn with_umask(mut self, umask: Mode) -> Self {
        self.umask = Some(umask);
        self
    }
}
