//! Path resolution.
//!
//! Pure string transformations: nothing here touches the node tree. A
//! resolved path is absolute, has no `.` or `..` segments, no empty
//! segments, and no trailing separator except for `/` itself.

use crate::error::{VfsError, VfsResult};

/// Expands `~`, anchors relative paths at the working directory, and
/// collapses `.`/`..`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathResolver {
    home_root: String,
}

impl Default for PathResolver {
    fn default() -> Self {
        Self::new("/home")
    }
}

impl PathResolver {
    /// Create a resolver that expands `~user` to `{home_root}/user`.
    pub fn new(home_root: impl AsRef<str>) -> Self {
        Self {
            home_root: normalize(home_root.as_ref()),
        }
    }

    pub fn home_root(&self) -> &str {
        &self.home_root
    }

    /// Home directory of `username`.
    pub fn home_of(&self, username: &str) -> String {
        join_path(&self.home_root, username)
    }

    /// Resolve `raw` against `cwd` for `current_user`.
    ///
    /// `..` at the root is a no-op. The result is a fixed point:
    /// resolving it again yields the same string.
    pub fn resolve(&self, raw: &str, cwd: &str, current_user: &str) -> VfsResult<String> {
        validate(raw)?;

        let expanded;
        let raw = if let Some(rest) = raw.strip_prefix('~') {
            let (user, tail) = match rest.find('/') {
                Some(pos) => (&rest[..pos], &rest[pos..]),
                None => (rest, ""),
            };
            let user = if user.is_empty() { current_user } else { user };
            expanded = format!("{}{}", self.home_of(user), tail);
            expanded.as_str()
        } else {
            raw
        };

        if raw.starts_with('/') {
            Ok(normalize(raw))
        } else {
            Ok(normalize(&format!("{}/{}", cwd, raw)))
        }
    }
}

/// Reject paths no resolution can make sense of.
pub fn validate(path: &str) -> VfsResult<()> {
    if path.is_empty() {
        return Err(VfsError::invalid_path("empty path"));
    }
    if path.contains('\0') {
        return Err(VfsError::invalid_path(path.replace('\0', "\\0")));
    }
    Ok(())
}

/// Normalize a path: anchor it at `/`, drop `.` and empty segments, and pop
/// on `..` (clamped at the root).
pub fn normalize(path: &str) -> String {
    let mut components: Vec<&str> = Vec::new();
    for component in path.split('/') {
        match component {
            "" | "." => continue,
            ".." => {
                components.pop();
            }
            c => components.push(c),
        }
    }

    if components.is_empty() {
        return String::from("/");
    }
    let mut result = String::with_capacity(path.len());
    for component in components {
        result.push('/');
        result.push_str(component);
    }
    result
}

/// Segments of a resolved path. `/` has none.
pub fn segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}

/// Get the parent path of a given path.
pub fn parent_path(path: &str) -> &str {
    if path == "/" {
        return "/";
    }
    match path.rfind('/') {
        Some(0) | None => "/",
        Some(pos) => &path[..pos],
    }
}

/// Get the last component of a path.
pub fn file_name(path: &str) -> &str {
    if path == "/" {
        return "";
    }
    match path.rfind('/') {
        Some(pos) => &path[pos + 1..],
        None => path,
    }
}

/// Join a directory path and an entry name.
pub fn join_path(base: &str, name: &str) -> String {
    if base == "/" {
        format!("/{}", name)
    } else {
        format!("{}/{}", base, name)
    }
}

/// True if `path` is `base` or lies beneath it.
pub fn is_under(path: &str, base: &str) -> bool {
    if base == "/" {
        return true;
    }
    path.starts_with(base) && (path.len() == base.len() || path.as_bytes()[base.len()] == b'/')
}

/// Replace the `from` prefix of `path` with `to`. `path` must be under `from`.
pub fn rebase(path: &str, from: &str, to: &str) -> String {
    let rest = if from == "/" {
        path
    } else {
        &path[from.len()..]
    };
    normalize(&format!("{}/{}", to, rest))
}
