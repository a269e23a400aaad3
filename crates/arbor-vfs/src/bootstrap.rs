//! Standard directory layout for a fresh filesystem.

use arbor_types::{Mode, UserIdentity};

use crate::context::AccessContext;
use crate::error::VfsResult;
use crate::filesystem::FileSystem;

/// Top-level directories and their modes.
pub const STANDARD_DIRECTORIES: &[(&str, u16)] = &[
    ("/bin", 0o755),
    ("/etc", 0o755),
    ("/home", 0o755),
    ("/root", 0o700),
    ("/tmp", 0o1777),
    ("/usr", 0o755),
    ("/usr/bin", 0o755),
    ("/var", 0o755),
    ("/var/log", 0o755),
];

/// Create the standard layout plus a home directory for each user.
///
/// Directories that already exist are left alone, so this is safe to run
/// on a tree loaded from a snapshot.
pub fn standard_layout(fs: &FileSystem, users: &[UserIdentity]) -> VfsResult<()> {
    let ctx = AccessContext::system().with_umask(Mode::new(0));

    for &(path, mode) in STANDARD_DIRECTORIES {
        if !fs.exists(path) {
            fs.create_directory_with_mode(&ctx, path, Some(Mode::new(mode)))?;
        }
    }
    fs.create_directory_all(&ctx, fs.resolver().home_root())?;

    for user in users.iter().filter(|u| !u.is_root()) {
        let home = fs.resolver().home_of(&user.username);
        if fs.exists(&home) {
            continue;
        }
        fs.create_directory_with_mode(&ctx, &home, Some(Mode::DIRECTORY_DEFAULT))?;
        fs.set_owner(&ctx, &home, Some(user.uid), Some(user.primary_gid))?;
    }

    tracing::info!(users = users.len(), "standard layout ready");
    Ok(())
}
