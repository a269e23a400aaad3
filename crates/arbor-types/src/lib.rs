//! Shared identity and permission types for arbor.
//!
//! This crate is the leaf of the workspace: numeric user and group ids, the
//! caller identity the VFS evaluates permissions against, and the structured
//! Unix mode value. It has **no internal arbor dependencies**.
//!
//! # Key Types
//!
//! |------------------|-----------------------------------------------|
//! | Type             | Purpose                                       |
//! |------------------|-----------------------------------------------|
//! | [`Mode`]         | rwx × owner/group/other plus special bits     |
//! | [`UserIdentity`] | Who is asking (uid, username, groups)         |
//! | [`AccessMode`]   | What is being asked (read, write, execute)    |
//! | [`Uid`]/[`Gid`]  | Numeric owner and group identifiers           |
//! |------------------|-----------------------------------------------|

mod access;
mod identity;
mod mode;

pub use access::{AccessMode, PermissionClass};
pub use identity::{Gid, ROOT_GID, ROOT_UID, Uid, UserIdentity};
pub use mode::{Mode, ModeParseError};
