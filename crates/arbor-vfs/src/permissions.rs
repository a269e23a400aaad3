//! Permission engine.
//!
//! Pure functions over a node's owner, group and mode. Path walking (search
//! permission on every ancestor) lives in the filesystem, which calls these
//! for each segment.

use arbor_types::{AccessMode, Gid, Mode, PermissionClass, Uid, UserIdentity};

/// Anything carrying ownership and a mode.
pub trait Permissioned {
    fn owner(&self) -> Uid;
    fn group(&self) -> Gid;
    fn mode(&self) -> Mode;
}

/// Which `rwx` triple applies to `user` for `node`.
pub fn class_for(node: &impl Permissioned, user: &UserIdentity) -> PermissionClass {
    if node.owner() == user.uid {
        PermissionClass::Owner
    } else if user.in_group(node.group()) {
        PermissionClass::Group
    } else {
        PermissionClass::Other
    }
}

/// Evaluate a single access request against a node's own bits.
///
/// Root is always granted. Otherwise exactly one class applies: an owner
/// who lacks a bit is not rescued by the group or other bits.
pub fn allows(node: &impl Permissioned, user: &UserIdentity, access: AccessMode) -> bool {
    if user.is_root() {
        return true;
    }
    node.mode().allows(class_for(node, user), access)
}

/// May `user` add or remove entries in `dir`? Needs write and search.
pub fn may_modify_entries(dir: &impl Permissioned, user: &UserIdentity) -> bool {
    allows(dir, user, AccessMode::Write) && allows(dir, user, AccessMode::Execute)
}

/// May `user` delete or rename `entry` out of `dir`?
///
/// With the sticky bit set on `dir`, write access to the directory is not
/// enough: the caller must also own the entry or the directory.
pub fn may_remove_entry(
    dir: &impl Permissioned,
    entry: &impl Permissioned,
    user: &UserIdentity,
) -> bool {
    if user.is_root() {
        return true;
    }
    if !may_modify_entries(dir, user) {
        return false;
    }
    if dir.mode().is_sticky() {
        return entry.owner() == user.uid || dir.owner() == user.uid;
    }
    true
}

/// The mode before the umask when the caller supplies none.
pub fn default_mode(is_directory: bool) -> Mode {
    if is_directory {
        Mode::DIRECTORY_DEFAULT
    } else {
        Mode::FILE_DEFAULT
    }
}

/// Mode a new node receives.
///
/// `base` (or the type default) is masked by `umask`. A directory created
/// inside a setgid directory inherits the setgid bit.
pub fn effective_permissions(
    base: Option<Mode>,
    umask: Mode,
    parent: &impl Permissioned,
    is_directory: bool,
) -> Mode {
    let mode = base.unwrap_or_else(|| default_mode(is_directory)).masked_by(umask);
    if is_directory && parent.mode().is_setgid() {
        mode.with(Mode::SETGID)
    } else {
        mode
    }
}

/// Group a new node receives: the parent's group when the parent is setgid,
/// otherwise the creator's primary group.
pub fn inherited_group(parent: &impl Permissioned, creator: &UserIdentity) -> Gid {
    if parent.mode().is_setgid() {
        parent.group()
    } else {
        creator.primary_gid
    }
}
