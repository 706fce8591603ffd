//! Transport-agnostic core logic for every kernel upcall the client answers, independent of
//! FUSE's wire types so it can be exercised directly from `#[test]` functions.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use fuser::{FileHandle, FileType, INodeNo};
use log::{info, warn};

use crate::cache_store::{CacheEntry, CacheStore};
use crate::checksum::crc32;
use crate::error::ClientError;
use crate::node::Node;
use crate::node_table::NodeTable;
use crate::rpc::FileService;

/// Attributes returned to the kernel for a node; a flattening of `Metadata` and `NodeKind` into
/// the shape `fs.rs` hands straight to a `fuser::Entry`/`attr()` reply.
#[derive(Debug, Clone, Copy)]
pub struct Attr {
    pub ino: INodeNo,
    pub size: u64,
    pub atime: SystemTime,
    pub mtime: SystemTime,
    pub crtime: SystemTime,
    pub kind: FileType,
    pub perm: u16,
}

fn secs_to_time(secs: u64) -> SystemTime {
    UNIX_EPOCH + Duration::from_secs(secs)
}

fn is_directory_mode(mode: u32) -> bool {
    mode & 0o170000 == 0o040000
}

fn attr_of(node: &Node) -> Attr {
    Attr {
        ino: node.metadata.ino,
        size: node.metadata.size,
        atime: node.metadata.atime,
        mtime: node.metadata.mtime,
        crtime: node.metadata.crtime,
        kind: node.kind.into(),
        perm: (node.metadata.mode & 0o777) as u16,
    }
}

/// Owns a Node Table, a cache store, and a handle to the server, and implements every upcall
/// the client answers as a plain `Result<_, ClientError>`-returning method.
pub struct OperationDispatcher {
    nodes: NodeTable,
    cache: CacheStore,
    service: Arc<dyn FileService>,
    /// When set, Open never downloads and recovered cache files stay on disk; used for
    /// deterministic crash-demo testing (the `-crash` flag).
    crash_demo: bool,
}

impl OperationDispatcher {
    pub fn new(nodes: NodeTable, cache: CacheStore, service: Arc<dyn FileService>, crash_demo: bool) -> Self {
        OperationDispatcher {
            nodes,
            cache,
            service,
            crash_demo,
        }
    }

    /// Runs the Recovery Scan against the cache folder, registering a Node for each
    /// successfully recovered entry. Called once at startup, before any kernel traffic.
    pub fn recover(&self) {
        for recovered in self.cache.recover(self.crash_demo) {
            let contents = recovered.entry.contents.clone();
            let checksum = recovered.entry.last_checksum;
            let name = recovered.entry.name.clone();
            let parent = recovered.entry.parent_path.clone();
            let node = self.nodes.insert_with(&recovered.path, |ino| {
                let mut node = Node::pending_regular(name, parent, ino, SystemTime::now());
                node.metadata.size = contents.len() as u64;
                node.buffer = Some(crate::buffer::WriteBuffer::from_bytes(contents));
                node.needs_download = false;
                node.last_checksum = checksum;
                node
            });
            info!("recovered cache entry for {}", recovered.path);
            let _ = node; // the entry is now addressable via the Node Table
        }
    }

    fn root_attr(&self) -> Attr {
        let root = self.nodes.root();
        let node = root.lock().unwrap();
        attr_of(&node)
    }

    /// **Attr.** Returns the node's cached metadata. Lookup, Create, and Mkdir always populate
    /// metadata from the server before a node becomes visible, so no round trip happens here;
    /// `access_time` is bumped as a side effect.
    pub fn getattr(&self, ino: INodeNo) -> Result<Attr, ClientError> {
        if ino == INodeNo::ROOT {
            return Ok(self.root_attr());
        }
        let path = self
            .nodes
            .path_of(ino)
            .ok_or_else(|| ClientError::NotFound(format!("ino {}", ino.0)))?;
        let node = self
            .nodes
            .get(&path)
            .ok_or_else(|| ClientError::NotFound(path))?;
        let mut guard = node.lock().unwrap();
        guard.metadata.atime = SystemTime::now();
        Ok(attr_of(&guard))
    }

    /// **Lookup(parent, name).** Resolves or creates the child node for `name` under `parent`.
    pub async fn lookup(&self, parent: INodeNo, name: &str) -> Result<Attr, ClientError> {
        let parent_path = if parent == INodeNo::ROOT {
            String::new()
        } else {
            self.nodes
                .path_of(parent)
                .ok_or_else(|| ClientError::NotFound(format!("ino {}", parent.0)))?
        };
        let path = self.nodes.child_path(&parent_path, name);
        if let Some(node) = self.nodes.get(&path) {
            return Ok(attr_of(&node.lock().unwrap()));
        }
        let info = self.service.get_file_info(&path).await?;
        let now = SystemTime::now();
        let parent_for_node = Some(parent_path);
        let node = self.nodes.insert_with(&path, |ino| {
            if is_directory_mode(info.mode) {
                Node::directory(name.to_string(), parent_for_node, ino, now)
            } else {
                Node::pending_regular(name.to_string(), parent_for_node, ino, now)
            }
        });
        let mut guard = node.lock().unwrap();
        guard.metadata.size = info.size;
        guard.metadata.mtime = secs_to_time(info.modification_time);
        guard.metadata.crtime = secs_to_time(info.creation_time);
        guard.metadata.mode = info.mode;
        Ok(attr_of(&guard))
    }

    /// **ReadDirAll.** Lists a directory's immediate children directly from the server; no
    /// listing is cached locally. Children already known to the Node Table carry their real
    /// inode number and kind; the rest get a stable synthetic inode derived from the child
    /// path, well clear of the allocator's range, since the kernel only requires it to be
    /// nonzero until a Lookup assigns the real one.
    pub async fn readdir(&self, ino: INodeNo) -> Result<Vec<(u64, FileType, String)>, ClientError> {
        let path = if ino == INodeNo::ROOT {
            String::new()
        } else {
            self.nodes
                .path_of(ino)
                .ok_or_else(|| ClientError::NotFound(format!("ino {}", ino.0)))?
        };
        let names = self.service.get_directory_contents(&path).await?;
        Ok(names
            .into_iter()
            .map(|name| {
                let child = self.nodes.child_path(&path, &name);
                match self.nodes.get(&child) {
                    Some(node) => {
                        let guard = node.lock().unwrap();
                        (guard.metadata.ino.0, guard.kind.into(), name)
                    }
                    None => {
                        let synthetic = u64::from(crc32(child.as_bytes())) | (1 << 48);
                        (synthetic, FileType::RegularFile, name)
                    }
                }
            })
            .collect())
    }

    /// **Open(node).** Downloads content when needed and returns a handle identifying the node.
    pub async fn open(&self, ino: INodeNo) -> Result<FileHandle, ClientError> {
        let path = self
            .nodes
            .path_of(ino)
            .ok_or_else(|| ClientError::NotFound(format!("ino {}", ino.0)))?;
        let node = self
            .nodes
            .get(&path)
            .ok_or_else(|| ClientError::NotFound(path.clone()))?;

        let mut need = {
            let guard = node.lock().unwrap();
            guard.needs_download
        };
        if !need {
            let info = self.service.get_file_info(&path).await?;
            let server_mtime = secs_to_time(info.modification_time);
            let guard = node.lock().unwrap();
            if server_mtime > guard.metadata.mtime {
                need = true;
            }
        }

        if need && !self.crash_demo {
            let data = self.service.download_file(&path).await?;
            let mut guard = node.lock().unwrap();
            let buffer = guard
                .buffer
                .get_or_insert_with(crate::buffer::WriteBuffer::new);
            buffer.reset();
            buffer.write_at(0, &data.contents)?;
            guard.needs_download = false;
            guard.metadata.mtime = secs_to_time(data.info.modification_time);
            guard.metadata.size = data.info.size;
            guard.mark_synced();
        }

        Ok(FileHandle(ino.0))
    }

    /// **Read / ReadAll.** Slices `[offset, offset+size)` out of the node's buffer.
    pub fn read(&self, ino: INodeNo, offset: u64, size: u32) -> Result<Vec<u8>, ClientError> {
        let path = self
            .nodes
            .path_of(ino)
            .ok_or_else(|| ClientError::NotFound(format!("ino {}", ino.0)))?;
        let node = self
            .nodes
            .get(&path)
            .ok_or_else(|| ClientError::NotFound(path))?;
        let guard = node.lock().unwrap();
        let buffer = guard
            .buffer
            .as_ref()
            .ok_or_else(|| ClientError::Io("read on a node with no buffer".into()))?;
        Ok(buffer.read_at(offset, size).to_vec())
    }

    /// **Write(node, offset, data, flags).** Applies `write_at` when the handle was opened for
    /// writing; otherwise logs and still reports the full length as written, so callers on a
    /// read-only handle are not broken mid-stream.
    pub fn write(
        &self,
        ino: INodeNo,
        offset: u64,
        data: &[u8],
        writable: bool,
    ) -> Result<u32, ClientError> {
        let path = self
            .nodes
            .path_of(ino)
            .ok_or_else(|| ClientError::NotFound(format!("ino {}", ino.0)))?;
        let node = self
            .nodes
            .get(&path)
            .ok_or_else(|| ClientError::NotFound(path))?;
        if !writable {
            warn!("write ignored: handle for ino {} not opened for writing", ino.0);
            return Ok(data.len() as u32);
        }
        let mut guard = node.lock().unwrap();
        let buffer = guard
            .buffer
            .get_or_insert_with(crate::buffer::WriteBuffer::new);
        buffer.write_at(offset, data)?;
        let new_len = buffer.len() as u64;
        guard.metadata.size = new_len;
        guard.metadata.mtime = SystemTime::now();
        Ok(data.len() as u32)
    }

    /// **Flush(node).** Persists the node's current buffer to the cache folder.
    pub fn flush(&self, ino: INodeNo) -> Result<(), ClientError> {
        let path = self
            .nodes
            .path_of(ino)
            .ok_or_else(|| ClientError::NotFound(format!("ino {}", ino.0)))?;
        let node = self
            .nodes
            .get(&path)
            .ok_or_else(|| ClientError::NotFound(path.clone()))?;
        let guard = node.lock().unwrap();
        let Some(buffer) = &guard.buffer else {
            return Ok(());
        };
        let entry = CacheEntry {
            name: guard.name.clone(),
            path: path.clone(),
            contents: buffer.bytes().to_vec(),
            parent_path: guard.parent.clone(),
            last_checksum: guard.last_checksum,
        };
        self.cache.write(&entry)
    }

    /// **Release(node).** Uploads the buffer unless the server has moved on, or the buffer is
    /// unchanged since the last sync point. A persisted Cache Entry is left on disk either way;
    /// the next Recovery Scan cleans it up.
    pub async fn release(&self, ino: INodeNo) -> Result<(), ClientError> {
        let path = self
            .nodes
            .path_of(ino)
            .ok_or_else(|| ClientError::NotFound(format!("ino {}", ino.0)))?;
        let node = self
            .nodes
            .get(&path)
            .ok_or_else(|| ClientError::NotFound(path.clone()))?;

        let (local_mtime, buffer_bytes, last_checksum) = {
            let guard = node.lock().unwrap();
            let Some(buffer) = &guard.buffer else {
                return Ok(());
            };
            (guard.metadata.mtime, buffer.bytes().to_vec(), guard.last_checksum)
        };

        let info = self.service.get_file_info(&path).await?;
        let server_mtime = secs_to_time(info.modification_time);
        if server_mtime > local_mtime {
            warn!("local expired, no upload: {path}");
            return Ok(());
        }

        let new_checksum = crc32(&buffer_bytes);
        if new_checksum == last_checksum {
            return Ok(());
        }

        self.service.upload_file(&path, buffer_bytes).await?;
        node.lock().unwrap().last_checksum = new_checksum;
        Ok(())
    }

    /// **Create.** Creates a regular file on the server, then materializes its Node.
    pub async fn create(&self, parent: INodeNo, name: &str) -> Result<(FileHandle, Attr), ClientError> {
        let attr = self.create_or_mkdir(parent, name, false).await?;
        Ok((FileHandle(attr.ino.0), attr))
    }

    /// **Mkdir.** Creates a directory on the server, then materializes its Node.
    pub async fn mkdir(&self, parent: INodeNo, name: &str) -> Result<Attr, ClientError> {
        self.create_or_mkdir(parent, name, true).await
    }

    async fn create_or_mkdir(
        &self,
        parent: INodeNo,
        name: &str,
        is_dir: bool,
    ) -> Result<Attr, ClientError> {
        let parent_path = if parent == INodeNo::ROOT {
            String::new()
        } else {
            self.nodes
                .path_of(parent)
                .ok_or_else(|| ClientError::NotFound(format!("ino {}", parent.0)))?
        };
        let path = self.nodes.child_path(&parent_path, name);
        if is_dir {
            self.service.create_directory(&path).await?;
        } else {
            self.service.create_file(&path).await?;
        }
        let info = self.service.get_file_info(&path).await?;
        let now = SystemTime::now();
        let parent_for_node = Some(parent_path);
        let node = self.nodes.insert_with(&path, |ino| {
            if is_dir {
                Node::directory(name.to_string(), parent_for_node, ino, now)
            } else {
                Node::pending_regular(name.to_string(), parent_for_node, ino, now)
            }
        });
        let mut guard = node.lock().unwrap();
        guard.metadata.size = info.size;
        guard.metadata.mtime = secs_to_time(info.modification_time);
        guard.metadata.crtime = secs_to_time(info.creation_time);
        guard.metadata.mode = info.mode;
        Ok(attr_of(&guard))
    }

    /// **Remove(parent, name).** Removes the file on the server, then drops the Node.
    pub async fn remove(&self, parent: INodeNo, name: &str) -> Result<(), ClientError> {
        let parent_path = if parent == INodeNo::ROOT {
            String::new()
        } else {
            self.nodes
                .path_of(parent)
                .ok_or_else(|| ClientError::NotFound(format!("ino {}", parent.0)))?
        };
        let path = self.nodes.child_path(&parent_path, name);
        self.service.remove_file(&path).await?;
        self.nodes.remove(&path);
        Ok(())
    }

    /// **setattr.** Accepted as a no-op attr echo; the client does not separately model mode
    /// or ownership changes.
    pub fn setattr(&self, ino: INodeNo) -> Result<Attr, ClientError> {
        if ino == INodeNo::ROOT {
            return Ok(self.root_attr());
        }
        let path = self
            .nodes
            .path_of(ino)
            .ok_or_else(|| ClientError::NotFound(format!("ino {}", ino.0)))?;
        let node = self
            .nodes
            .get(&path)
            .ok_or_else(|| ClientError::NotFound(path))?;
        Ok(attr_of(&node.lock().unwrap()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::memory::MemoryFileService;
    use std::sync::Arc as StdArc;

    fn dispatcher(cache_dir: &std::path::Path, crash_demo: bool) -> (OperationDispatcher, StdArc<MemoryFileService>) {
        let service = StdArc::new(MemoryFileService::new());
        let dispatcher = OperationDispatcher::new(
            NodeTable::new(),
            CacheStore::new(cache_dir),
            service.clone(),
            crash_demo,
        );
        (dispatcher, service)
    }

    #[tokio::test]
    async fn scenario_1_create_write_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let (dispatcher, service) = dispatcher(dir.path(), false);
        service.create_file("a").await.unwrap();

        let (fh, attr) = dispatcher.create(INodeNo::ROOT, "a").await.unwrap();
        let ino = attr.ino;
        let _ = fh;
        dispatcher.open(ino).await.unwrap();
        let data = b"File Creation and Write seems OK";
        dispatcher.write(ino, 0, data, true).unwrap();
        let read_back = dispatcher.read(ino, 0, data.len() as u32).unwrap();
        assert_eq!(read_back, data);
    }

    #[tokio::test]
    async fn scenario_2_nested_mkdir() {
        let dir = tempfile::tempdir().unwrap();
        let (dispatcher, _service) = dispatcher(dir.path(), false);
        let b = dispatcher.mkdir(INodeNo::ROOT, "b").await.unwrap();
        let bb = dispatcher.mkdir(b.ino, "b").await.unwrap();
        assert_eq!(bb.kind, FileType::Directory);
    }

    #[tokio::test]
    async fn scenario_3_read_at_middle() {
        let dir = tempfile::tempdir().unwrap();
        let (dispatcher, service) = dispatcher(dir.path(), false);
        service.seed_file("f", b"123456789".to_vec());
        let attr = dispatcher.lookup(INodeNo::ROOT, "f").await.unwrap();
        dispatcher.open(attr.ino).await.unwrap();
        assert_eq!(dispatcher.read(attr.ino, 1, 3).unwrap(), b"234");
    }

    #[tokio::test]
    async fn scenario_4_write_at_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let (dispatcher, service) = dispatcher(dir.path(), false);
        service.seed_file("f", b"123456789".to_vec());
        let attr = dispatcher.lookup(INodeNo::ROOT, "f").await.unwrap();
        dispatcher.open(attr.ino).await.unwrap();
        dispatcher.write(attr.ino, 2, b"abc", true).unwrap();
        assert_eq!(dispatcher.read(attr.ino, 0, 9).unwrap(), b"12abc6789");
    }

    #[tokio::test]
    async fn scenario_5_write_at_extends() {
        let dir = tempfile::tempdir().unwrap();
        let (dispatcher, service) = dispatcher(dir.path(), false);
        service.seed_file("f", b"123456789".to_vec());
        let attr = dispatcher.lookup(INodeNo::ROOT, "f").await.unwrap();
        dispatcher.open(attr.ino).await.unwrap();
        dispatcher.write(attr.ino, 7, b"abcdef", true).unwrap();
        assert_eq!(dispatcher.read(attr.ino, 0, 13).unwrap(), b"1234567abcdef");
    }

    #[tokio::test]
    async fn scenario_6_crash_recovery_rehydrates_and_uploads() {
        let dir = tempfile::tempdir().unwrap();
        let service = StdArc::new(MemoryFileService::new());
        service.seed_file("f", b"old".to_vec());

        {
            let dispatcher = OperationDispatcher::new(
                NodeTable::new(),
                CacheStore::new(dir.path()),
                service.clone(),
                false,
            );
            let attr = dispatcher.lookup(INodeNo::ROOT, "f").await.unwrap();
            dispatcher.open(attr.ino).await.unwrap();
            dispatcher.write(attr.ino, 0, b"new bytes", true).unwrap();
            dispatcher.flush(attr.ino).unwrap();
            // process "crashes" here: no release.
        }

        let dispatcher = OperationDispatcher::new(
            NodeTable::new(),
            CacheStore::new(dir.path()),
            service.clone(),
            false,
        );
        dispatcher.recover();
        assert_eq!(
            std::fs::read_dir(dir.path()).unwrap().count(),
            0,
            "recovery outside crash-demo mode removes the rehydrated cache file"
        );
        let attr = dispatcher.lookup(INodeNo::ROOT, "f").await.unwrap();
        assert_eq!(dispatcher.read(attr.ino, 0, 9).unwrap(), b"new bytes");

        dispatcher.release(attr.ino).await.unwrap();
        let uploaded = service.download_file("f").await.unwrap();
        assert_eq!(uploaded.contents, b"new bytes");
    }

    #[tokio::test]
    async fn release_leaves_persisted_entry_for_next_recovery() {
        let dir = tempfile::tempdir().unwrap();
        let (dispatcher, service) = dispatcher(dir.path(), false);
        service.seed_file("f", b"1234".to_vec());
        let attr = dispatcher.lookup(INodeNo::ROOT, "f").await.unwrap();
        dispatcher.open(attr.ino).await.unwrap();
        dispatcher.write(attr.ino, 0, b"abcd", true).unwrap();
        dispatcher.flush(attr.ino).unwrap();

        dispatcher.release(attr.ino).await.unwrap();

        assert_eq!(service.download_file("f").await.unwrap().contents, b"abcd");
        assert_eq!(
            std::fs::read_dir(dir.path()).unwrap().count(),
            1,
            "the cache entry stays on disk until the next recovery scan"
        );
    }

    #[tokio::test]
    async fn scenario_7_clean_close_skips_upload() {
        let dir = tempfile::tempdir().unwrap();
        let (dispatcher, service) = dispatcher(dir.path(), false);
        service.seed_file("f", b"123456789".to_vec());
        let attr = dispatcher.lookup(INodeNo::ROOT, "f").await.unwrap();
        dispatcher.open(attr.ino).await.unwrap();
        dispatcher.release(attr.ino).await.unwrap();

        service.set_modification_time("f", 1);
        let info_before = service.get_file_info("f").await.unwrap();
        dispatcher.release(attr.ino).await.unwrap();
        let info_after = service.get_file_info("f").await.unwrap();
        assert_eq!(info_before.modification_time, info_after.modification_time);
    }

    #[tokio::test]
    async fn readdir_lists_server_contents_with_nonzero_inos() {
        let dir = tempfile::tempdir().unwrap();
        let (dispatcher, service) = dispatcher(dir.path(), false);
        service.seed_file("seen", b"x".to_vec());
        service.seed_file("unseen", b"y".to_vec());
        let attr = dispatcher.lookup(INodeNo::ROOT, "seen").await.unwrap();

        let listing = dispatcher.readdir(INodeNo::ROOT).await.unwrap();
        let names: Vec<&str> = listing.iter().map(|(_, _, name)| name.as_str()).collect();
        assert_eq!(names, vec!["seen", "unseen"]);
        assert!(listing.iter().all(|(ino, _, _)| *ino != 0));
        assert_eq!(listing[0].0, attr.ino.0, "known child keeps its table ino");
    }

    #[tokio::test]
    async fn getattr_returns_cached_metadata_without_server_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let (dispatcher, service) = dispatcher(dir.path(), false);
        service.seed_file("f", b"12345".to_vec());
        let attr = dispatcher.lookup(INodeNo::ROOT, "f").await.unwrap();
        assert_eq!(attr.size, 5);

        // The server moving on does not disturb the cached view until the next Open.
        service.seed_file("f", b"123456789".to_vec());
        let cached = dispatcher.getattr(attr.ino).unwrap();
        assert_eq!(cached.size, 5);
    }

    #[tokio::test]
    async fn write_on_read_only_handle_is_a_logged_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let (dispatcher, service) = dispatcher(dir.path(), false);
        service.seed_file("f", b"1234".to_vec());
        let attr = dispatcher.lookup(INodeNo::ROOT, "f").await.unwrap();
        dispatcher.open(attr.ino).await.unwrap();

        let written = dispatcher.write(attr.ino, 0, b"xx", false).unwrap();
        assert_eq!(written, 2);
        assert_eq!(dispatcher.read(attr.ino, 0, 4).unwrap(), b"1234");
    }

    #[tokio::test]
    async fn release_skips_upload_when_server_is_newer() {
        let dir = tempfile::tempdir().unwrap();
        let (dispatcher, service) = dispatcher(dir.path(), false);
        service.seed_file("f", b"1234".to_vec());
        let attr = dispatcher.lookup(INodeNo::ROOT, "f").await.unwrap();
        dispatcher.open(attr.ino).await.unwrap();
        dispatcher.write(attr.ino, 0, b"ab", true).unwrap();

        let far_future = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs()
            + 3600;
        service.set_modification_time("f", far_future);
        dispatcher.release(attr.ino).await.unwrap();

        let server_contents = service.download_file("f").await.unwrap().contents;
        assert_eq!(server_contents, b"1234");
    }
}
