//! Process-wide mapping from absolute path to Node, plus the ino→path reverse index the
//! kernel addressing surface needs.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use fuser::INodeNo;

use crate::node::Node;
use crate::pathenc::join;

/// Path → Node map, with each Node individually lockable so two upcalls against different
/// files never contend (see the crate's concurrency model).
pub struct NodeTable {
    by_path: Mutex<HashMap<String, Arc<Mutex<Node>>>>,
    by_ino: Mutex<HashMap<INodeNo, String>>,
    next_ino: Mutex<u64>,
}

impl NodeTable {
    /// An empty table. The root is created lazily on first access, per the data model.
    pub fn new() -> Self {
        NodeTable {
            by_path: Mutex::new(HashMap::new()),
            by_ino: Mutex::new(HashMap::new()),
            next_ino: Mutex::new(INodeNo::ROOT.0 + 1),
        }
    }

    fn allocate_ino(&self) -> INodeNo {
        let mut next = self.next_ino.lock().unwrap();
        let ino = INodeNo(*next);
        *next += 1;
        ino
    }

    /// Returns the root node, creating it on the first call.
    pub fn root(&self) -> Arc<Mutex<Node>> {
        let mut by_path = self.by_path.lock().unwrap();
        if let Some(node) = by_path.get("") {
            return node.clone();
        }
        let root_ino = INodeNo::ROOT;
        let node = Arc::new(Mutex::new(Node::root(root_ino, SystemTime::now())));
        by_path.insert(String::new(), node.clone());
        self.by_ino.lock().unwrap().insert(root_ino, String::new());
        node
    }

    /// Looks up a node by its absolute path.
    pub fn get(&self, path: &str) -> Option<Arc<Mutex<Node>>> {
        self.by_path.lock().unwrap().get(path).cloned()
    }

    /// Looks up a node by its kernel-facing inode number.
    pub fn get_by_ino(&self, ino: INodeNo) -> Option<Arc<Mutex<Node>>> {
        let path = self.by_ino.lock().unwrap().get(&ino).cloned()?;
        self.get(&path)
    }

    /// Resolves an inode to its absolute path.
    pub fn path_of(&self, ino: INodeNo) -> Option<String> {
        self.by_ino.lock().unwrap().get(&ino).cloned()
    }

    /// Composes the absolute path of a would-be child of `parent_path`.
    pub fn child_path(&self, parent_path: &str, name: &str) -> String {
        join(parent_path, name)
    }

    /// Inserts a freshly built node at `path`, allocating its inode, unless one already exists
    /// (in which case the existing node is returned; a racing insert for the same path never
    /// creates two nodes).
    pub fn insert_with<F>(&self, path: &str, build: F) -> Arc<Mutex<Node>>
    where
        F: FnOnce(INodeNo) -> Node,
    {
        let mut by_path = self.by_path.lock().unwrap();
        if let Some(existing) = by_path.get(path) {
            return existing.clone();
        }
        let ino = self.allocate_ino();
        let node = Arc::new(Mutex::new(build(ino)));
        by_path.insert(path.to_string(), node.clone());
        self.by_ino.lock().unwrap().insert(ino, path.to_string());
        node
    }

    /// Removes the node at `path`, if any.
    pub fn remove(&self, path: &str) {
        let mut by_path = self.by_path.lock().unwrap();
        if let Some(node) = by_path.remove(path) {
            let ino = node.lock().unwrap().metadata.ino;
            self.by_ino.lock().unwrap().remove(&ino);
        }
    }
}

impl Default for NodeTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::NodeKind;

    #[test]
    fn root_is_created_lazily_and_stable() {
        let table = NodeTable::new();
        let first = table.root();
        let second = table.root();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.lock().unwrap().metadata.ino, INodeNo(1));
    }

    #[test]
    fn insert_allocates_monotonic_inodes_after_root() {
        let table = NodeTable::new();
        table.root();
        let a = table.insert_with("a", |ino| {
            Node::directory("a".into(), Some(String::new()), ino, SystemTime::now())
        });
        let b = table.insert_with("b", |ino| {
            Node::directory("b".into(), Some(String::new()), ino, SystemTime::now())
        });
        assert_eq!(a.lock().unwrap().metadata.ino, INodeNo(2));
        assert_eq!(b.lock().unwrap().metadata.ino, INodeNo(3));
    }

    #[test]
    fn insert_is_idempotent_per_path() {
        let table = NodeTable::new();
        let first = table.insert_with("a", |ino| {
            Node::directory("a".into(), None, ino, SystemTime::now())
        });
        let second = table.insert_with("a", |ino| {
            Node::directory("a".into(), None, ino, SystemTime::now())
        });
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn lookup_by_ino_resolves_path() {
        let table = NodeTable::new();
        let node = table.insert_with("a/b", |ino| {
            Node::directory("b".into(), Some("a".into()), ino, SystemTime::now())
        });
        let ino = node.lock().unwrap().metadata.ino;
        assert_eq!(table.path_of(ino).as_deref(), Some("a/b"));
        assert!(table.get_by_ino(ino).is_some());
    }

    #[test]
    fn remove_drops_both_indices() {
        let table = NodeTable::new();
        let node = table.insert_with("a", |ino| {
            Node::directory("a".into(), None, ino, SystemTime::now())
        });
        let ino = node.lock().unwrap().metadata.ino;
        table.remove("a");
        assert!(table.get("a").is_none());
        assert!(table.get_by_ino(ino).is_none());
    }

    #[test]
    fn child_path_joins_relative_to_root() {
        let table = NodeTable::new();
        assert_eq!(table.child_path("", "a"), "a");
        assert_eq!(table.child_path("a", "b"), "a/b");
    }

    #[test]
    fn inserted_regular_node_has_kind_regular() {
        let table = NodeTable::new();
        let node = table.insert_with("f", |ino| {
            Node::pending_regular("f".into(), Some(String::new()), ino, SystemTime::now())
        });
        assert_eq!(node.lock().unwrap().kind, NodeKind::Regular);
    }
}
