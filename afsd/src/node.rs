//! A single entry in the mounted tree: its metadata, children bookkeeping, and (for regular
//! files) staged content.

use std::time::SystemTime;

use fuser::{FileType, INodeNo};

use crate::buffer::WriteBuffer;
use crate::checksum::crc32;

/// Whether a `Node` is a directory or a regular file. Mirrors `fuser::FileType` but only
/// carries the two kinds this client actually creates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Directory,
    Regular,
}

impl From<NodeKind> for FileType {
    fn from(kind: NodeKind) -> Self {
        match kind {
            NodeKind::Directory => FileType::Directory,
            NodeKind::Regular => FileType::RegularFile,
        }
    }
}

/// Attributes the kernel asks for on every `getattr`/`lookup` reply.
#[derive(Debug, Clone, Copy)]
pub struct Metadata {
    pub ino: INodeNo,
    pub size: u64,
    pub atime: SystemTime,
    pub mtime: SystemTime,
    pub crtime: SystemTime,
    pub mode: u32,
}

impl Metadata {
    /// Fresh metadata for a just-created node, all timestamps set to `now`.
    pub fn new(ino: INodeNo, mode: u32, now: SystemTime) -> Self {
        Metadata {
            ino,
            size: 0,
            atime: now,
            mtime: now,
            crtime: now,
            mode,
        }
    }
}

/// One entry in the mounted tree.
pub struct Node {
    pub name: String,
    /// Absolute path of the parent, or `None` for the root. Path-addressed rather than a weak
    /// object reference, since the Node Table is itself keyed by absolute path.
    pub parent: Option<String>,
    pub kind: NodeKind,
    pub metadata: Metadata,
    /// Present iff `kind == Regular`.
    pub buffer: Option<WriteBuffer>,
    /// Set when a node is known to the table (e.g. from a directory listing or a recovered
    /// cache entry) but its content has not yet been pulled from the server.
    pub needs_download: bool,
    /// CRC32 of `buffer` as of the last successful download or upload.
    pub last_checksum: u32,
}

impl Node {
    /// The synthetic root, whose name is empty and which has no parent.
    pub fn root(ino: INodeNo, now: SystemTime) -> Self {
        Node {
            name: String::new(),
            parent: None,
            kind: NodeKind::Directory,
            metadata: Metadata::new(ino, 0o755, now),
            buffer: None,
            needs_download: false,
            last_checksum: 0,
        }
    }

    /// A freshly created or discovered directory.
    pub fn directory(name: String, parent: Option<String>, ino: INodeNo, now: SystemTime) -> Self {
        Node {
            name,
            parent,
            kind: NodeKind::Directory,
            metadata: Metadata::new(ino, 0o755, now),
            buffer: None,
            needs_download: false,
            last_checksum: 0,
        }
    }

    /// A regular file whose content has not yet been downloaded.
    pub fn pending_regular(
        name: String,
        parent: Option<String>,
        ino: INodeNo,
        now: SystemTime,
    ) -> Self {
        Node {
            name,
            parent,
            kind: NodeKind::Regular,
            metadata: Metadata::new(ino, 0o644, now),
            buffer: Some(WriteBuffer::new()),
            needs_download: true,
            last_checksum: 0,
        }
    }

    /// Whether the buffer's current content differs from what was last synced with the server.
    pub fn dirty(&self) -> bool {
        match &self.buffer {
            Some(buf) => crc32(buf.bytes()) != self.last_checksum,
            None => false,
        }
    }

    /// Marks the buffer as synced with the server at its current content.
    pub fn mark_synced(&mut self) {
        if let Some(buf) = &self.buffer {
            self.last_checksum = crc32(buf.bytes());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ino(n: u64) -> INodeNo {
        INodeNo(n)
    }

    #[test]
    fn fresh_regular_node_is_not_dirty() {
        let node = Node::pending_regular("a".into(), None, ino(2), SystemTime::now());
        assert!(!node.dirty());
    }

    #[test]
    fn writing_makes_node_dirty() {
        let mut node = Node::pending_regular("a".into(), None, ino(2), SystemTime::now());
        node.buffer.as_mut().unwrap().write_at(0, b"hi").unwrap();
        assert!(node.dirty());
    }

    #[test]
    fn mark_synced_clears_dirty() {
        let mut node = Node::pending_regular("a".into(), None, ino(2), SystemTime::now());
        node.buffer.as_mut().unwrap().write_at(0, b"hi").unwrap();
        node.mark_synced();
        assert!(!node.dirty());
    }

    #[test]
    fn directory_is_never_dirty() {
        let node = Node::directory("d".into(), None, ino(2), SystemTime::now());
        assert!(!node.dirty());
    }

    #[test]
    fn node_kind_maps_to_fuser_file_type() {
        assert_eq!(FileType::from(NodeKind::Directory), FileType::Directory);
        assert_eq!(FileType::from(NodeKind::Regular), FileType::RegularFile);
    }
}
