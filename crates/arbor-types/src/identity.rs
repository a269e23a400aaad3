//! Caller identity.
//!
//! The VFS never authenticates anyone. It receives a `UserIdentity` from the
//! session layer and applies permission bits to it.

use serde::{Deserialize, Serialize};

/// Numeric user id.
pub type Uid = u32;

/// Numeric group id.
pub type Gid = u32;

/// The superuser. Exempt from every permission check.
pub const ROOT_UID: Uid = 0;

/// The superuser's primary group.
pub const ROOT_GID: Gid = 0;

/// An externally supplied caller identity.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserIdentity {
    /// Numeric user id (`0` is root).
    pub uid: Uid,
    /// Login name, used for `~` expansion.
    pub username: String,
    /// Primary group, assigned to newly created nodes.
    pub primary_gid: Gid,
    /// Supplementary groups.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub groups: Vec<Gid>,
}

impl UserIdentity {
    /// Create an identity with no supplementary groups.
    pub fn new(uid: Uid, username: impl Into<String>, primary_gid: Gid) -> Self {
        Self {
            uid,
            username: username.into(),
            primary_gid,
            groups: Vec::new(),
        }
    }

    /// The well-known root identity.
    pub fn root() -> Self {
        Self::new(ROOT_UID, "root", ROOT_GID)
    }

    /// Add supplementary groups.
    pub fn with_groups(mut self, groups: impl IntoIterator<Item = Gid>) -> Self {
        self.groups.extend(groups);
        self
    }

    pub fn is_root(&self) -> bool {
        self.uid == ROOT_UID
    }

    /// True if `gid` is the primary group or one of the supplementary groups.
    pub fn in_group(&self, gid: Gid) -> bool {
        self.primary_gid == gid || self.groups.contains(&gid)
    }
}

impl std::fmt::Display for UserIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}({}:{})", self.username, self.uid, self.primary_gid)
    }
}
