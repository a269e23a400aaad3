//! Access requests and permission classes.

use serde::{Deserialize, Serialize};

/// The kind of access a caller requests on a node.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum AccessMode {
    /// Read file content or list a directory.
    Read,
    /// Modify file content or add/remove directory entries.
    Write,
    /// Execute a file or search (traverse) a directory.
    Execute,
}

impl AccessMode {
    /// The bit this access occupies within an `rwx` triple.
    pub fn bit(self) -> u16 {
        match self {
            AccessMode::Read => 0o4,
            AccessMode::Write => 0o2,
            AccessMode::Execute => 0o1,
        }
    }
}

/// Which `rwx` triple of a mode applies to a caller.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum PermissionClass {
    Owner,
    Group,
    Other,
}

impl PermissionClass {
    /// Shift that moves this class's triple into the low three bits.
    pub const fn shift(self) -> u16 {
        match self {
            PermissionClass::Owner => 6,
            PermissionClass::Group => 3,
            PermissionClass::Other => 0,
        }
    }
}
