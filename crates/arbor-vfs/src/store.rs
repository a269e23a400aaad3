//! Node store: the arena of nodes plus a derived path index.
//!
//! The arena is the single source of truth. The path cache maps resolved
//! absolute paths to node ids; it is filled on lookup and invalidated by
//! prefix whenever a subtree is detached, moved or removed, so it can always
//! be dropped and rebuilt from the tree.

use std::collections::HashMap;
use std::ops::{Index, IndexMut};
use std::time::SystemTime;

use arbor_types::{Gid, Mode, Uid};

use crate::node::{Node, NodeId, NodeKind};
use crate::path::{is_under, join_path, segments};

/// Fields for a node about to be attached.
pub(crate) struct NewNode {
    pub kind: NodeKind,
    pub owner: Uid,
    pub group: Gid,
    pub mode: Mode,
}

#[derive(Debug)]
pub(crate) struct NodeStore {
    nodes: Vec<Option<Node>>,
    free: Vec<NodeId>,
    root: NodeId,
    cache: HashMap<String, NodeId>,
}

impl NodeStore {
    /// A store holding only the root directory.
    pub fn new(owner: Uid, group: Gid, mode: Mode, now: SystemTime) -> Self {
        let root = Node {
            name: String::new(),
            path: String::from("/"),
            parent: None,
            kind: NodeKind::empty_directory(),
            owner,
            group,
            mode,
            created_at: now,
            modified_at: now,
            accessed_at: now,
        };
        let mut cache = HashMap::new();
        cache.insert(String::from("/"), NodeId(0));
        Self {
            nodes: vec![Some(root)],
            free: Vec::new(),
            root: NodeId(0),
            cache,
        }
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    /// Number of live nodes, root included.
    pub fn len(&self) -> usize {
        self.nodes.len() - self.free.len()
    }

    #[cfg(test)]
    pub fn cached_len(&self) -> usize {
        self.cache.len()
    }

    /// Find the node at a resolved path without following symbolic links.
    ///
    /// A cache miss walks from the root; a miss at any segment, or a segment
    /// that is not a directory, yields `None`. Hits are written back.
    pub fn lookup(&mut self, path: &str) -> Option<NodeId> {
        if let Some(&id) = self.cache.get(path) {
            return Some(id);
        }
        let id = self.walk(path)?;
        self.cache.insert(path.to_string(), id);
        Some(id)
    }

    /// Uncached walk from the root.
    pub fn walk(&self, path: &str) -> Option<NodeId> {
        let mut current = self.root;
        for segment in segments(path) {
            current = *self[current].children()?.get(segment)?;
        }
        Some(current)
    }

    /// Child of a directory by name.
    pub fn child(&self, dir: NodeId, name: &str) -> Option<NodeId> {
        self[dir].children()?.get(name).copied()
    }

    /// Attach a new node under `parent`. The caller has checked that
    /// `parent` is a directory without an entry called `name`.
    pub fn insert(&mut self, parent: NodeId, name: &str, new: NewNode, now: SystemTime) -> NodeId {
        let path = join_path(&self[parent].path, name);
        let node = Node {
            name: name.to_string(),
            path: path.clone(),
            parent: Some(parent),
            kind: new.kind,
            owner: new.owner,
            group: new.group,
            mode: new.mode,
            created_at: now,
            modified_at: now,
            accessed_at: now,
        };
        let id = match self.free.pop() {
            Some(id) => {
                self.nodes[id.index()] = Some(node);
                id
            }
            None => {
                self.nodes.push(Some(node));
                NodeId(self.nodes.len() - 1)
            }
        };

        let parent_node = &mut self[parent];
        if let Some(children) = parent_node.children_mut() {
            children.insert(name.to_string(), id);
        }
        parent_node.touch_modified(now);
        self.cache.insert(path, id);
        id
    }

    /// Every node of the subtree rooted at `id`, parents before children.
    pub fn descendants(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            out.push(current);
            if let Some(children) = self[current].children() {
                // reversed so siblings come out in listing order
                stack.extend(children.values().rev().copied());
            }
        }
        out
    }

    /// True if `id` is `ancestor` or lies beneath it.
    pub fn is_within(&self, id: NodeId, ancestor: NodeId) -> bool {
        let mut current = Some(id);
        while let Some(node) = current {
            if node == ancestor {
                return true;
            }
            current = self[node].parent;
        }
        false
    }

    /// Ancestors of `id` from the root down to its parent.
    pub fn ancestors(&self, id: NodeId) -> Vec<NodeId> {
        let mut chain = Vec::new();
        let mut current = self[id].parent;
        while let Some(node) = current {
            chain.push(node);
            current = self[node].parent;
        }
        chain.reverse();
        chain
    }

    /// Detach and free the subtree rooted at `id`.
    pub fn remove_subtree(&mut self, id: NodeId, now: SystemTime) {
        if id == self.root {
            return;
        }
        self.detach(id, now);
        for node in self.descendants(id) {
            self.nodes[node.index()] = None;
            self.free.push(node);
        }
    }

    /// Move the subtree rooted at `id` under `new_parent` as `new_name`,
    /// rewriting the stored path of every node in it.
    pub fn reparent(&mut self, id: NodeId, new_parent: NodeId, new_name: &str, now: SystemTime) {
        self.detach(id, now);

        let base = join_path(&self[new_parent].path, new_name);
        {
            let node = &mut self[id];
            node.name = new_name.to_string();
            node.parent = Some(new_parent);
        }
        let parent_node = &mut self[new_parent];
        if let Some(children) = parent_node.children_mut() {
            children.insert(new_name.to_string(), id);
        }
        parent_node.touch_modified(now);

        for node in self.descendants(id) {
            let path = match self[node].parent {
                Some(parent) if node != id => join_path(&self[parent].path, &self[node].name),
                _ => base.clone(),
            };
            self[node].path = path;
        }
        self.invalidate(&base);
    }

    /// Unlink `id` from its parent and purge its subtree from the cache.
    fn detach(&mut self, id: NodeId, now: SystemTime) {
        let (parent, name, path) = {
            let node = &self[id];
            (node.parent, node.name.clone(), node.path.clone())
        };
        if let Some(parent) = parent {
            let parent_node = &mut self[parent];
            if let Some(children) = parent_node.children_mut() {
                children.shift_remove(&name);
            }
            parent_node.touch_modified(now);
        }
        self.invalidate(&path);
    }

    /// Drop every cache entry at or beneath `prefix`.
    pub fn invalidate(&mut self, prefix: &str) {
        self.cache.retain(|path, _| !is_under(path, prefix));
    }

    /// Throw the cache away and index every live node again.
    pub fn rebuild_cache(&mut self) {
        self.cache.clear();
        for id in self.descendants(self.root) {
            let path = self[id].path.clone();
            self.cache.insert(path, id);
        }
    }
}

impl Index<NodeId> for NodeStore {
    type Output = Node;

    fn index(&self, id: NodeId) -> &Node {
        match self.nodes.get(id.index()) {
            Some(Some(node)) => node,
            _ => panic!("stale node id {:?}", id),
        }
    }
}

impl IndexMut<NodeId> for NodeStore {
    fn index_mut(&mut self, id: NodeId) -> &mut Node {
        match self.nodes.get_mut(id.index()) {
            Some(Some(node)) => node,
            _ => panic!("stale node id {:?}", id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> NodeStore {
        NodeStore::new(0, 0, Mode::new(0o755), SystemTime::now())
    }

    fn dir() -> NewNode {
        NewNode {
            kind: NodeKind::empty_directory(),
            owner: 0,
            group: 0,
            mode: Mode::new(0o755),
        }
    }

    fn file(content: &[u8]) -> NewNode {
        NewNode {
            kind: NodeKind::File {
                content: content.to_vec(),
            },
            owner: 0,
            group: 0,
            mode: Mode::new(0o644),
        }
    }

    #[test]
    fn test_insert_and_lookup() {
        let mut s = store();
        let now = SystemTime::now();
        let tmp = s.insert(s.root(), "tmp", dir(), now);
        let f = s.insert(tmp, "a.txt", file(b"hi"), now);

        assert_eq!(s.lookup("/tmp"), Some(tmp));
        assert_eq!(s.lookup("/tmp/a.txt"), Some(f));
        assert_eq!(s[f].path, "/tmp/a.txt");
        assert_eq!(s.lookup("/tmp/missing"), None);
        assert_eq!(s.len(), 3);
    }

    #[test]
    fn test_file_segment_is_a_miss() {
        let mut s = store();
        let now = SystemTime::now();
        s.insert(s.root(), "f", file(b""), now);
        assert_eq!(s.lookup("/f/child"), None);
    }

    #[test]
    fn test_lookup_fills_cache() {
        let mut s = store();
        let now = SystemTime::now();
        let a = s.insert(s.root(), "a", dir(), now);
        s.insert(a, "b", dir(), now);
        s.invalidate("/a");
        assert_eq!(s.cached_len(), 1);
        assert!(s.lookup("/a/b").is_some());
        assert_eq!(s.cached_len(), 2);
    }

    #[test]
    fn test_remove_subtree_purges_cache_and_frees_slots() {
        let mut s = store();
        let now = SystemTime::now();
        let a = s.insert(s.root(), "a", dir(), now);
        let b = s.insert(a, "b", dir(), now);
        s.insert(b, "c.txt", file(b"x"), now);
        assert!(s.lookup("/a/b/c.txt").is_some());

        s.remove_subtree(a, now);
        assert_eq!(s.lookup("/a"), None);
        assert_eq!(s.lookup("/a/b/c.txt"), None);
        assert_eq!(s.len(), 1);
        assert!(s[s.root()].children().unwrap().is_empty());

        // freed slots are reused
        let d = s.insert(s.root(), "d", dir(), now);
        assert!(d.index() <= 3);
    }

    #[test]
    fn test_reparent_rewrites_paths() {
        let mut s = store();
        let now = SystemTime::now();
        let a = s.insert(s.root(), "a", dir(), now);
        let b = s.insert(a, "b", dir(), now);
        let f = s.insert(b, "f.txt", file(b"data"), now);
        let dest = s.insert(s.root(), "dest", dir(), now);
        assert!(s.lookup("/a/b/f.txt").is_some());

        s.reparent(a, dest, "moved", now);

        assert_eq!(s[a].path, "/dest/moved");
        assert_eq!(s[b].path, "/dest/moved/b");
        assert_eq!(s[f].path, "/dest/moved/b/f.txt");
        assert_eq!(s.lookup("/a/b/f.txt"), None);
        assert_eq!(s.lookup("/dest/moved/b/f.txt"), Some(f));
    }

    #[test]
    fn test_descendants_preorder() {
        let mut s = store();
        let now = SystemTime::now();
        let a = s.insert(s.root(), "a", dir(), now);
        let x = s.insert(a, "x", file(b""), now);
        let y = s.insert(a, "y", dir(), now);
        let z = s.insert(y, "z", file(b""), now);
        assert_eq!(s.descendants(a), vec![a, x, y, z]);
        assert!(s.is_within(z, a));
        assert!(!s.is_within(a, z));
        assert_eq!(s.ancestors(z), vec![s.root(), a, y]);
    }

    #[test]
    fn test_rebuild_cache() {
        let mut s = store();
        let now = SystemTime::now();
        let a = s.insert(s.root(), "a", dir(), now);
        s.insert(a, "b", file(b""), now);
        s.invalidate("/");
        assert_eq!(s.cached_len(), 0);
        s.rebuild_cache();
        assert_eq!(s.cached_len(), 3);
    }
}
