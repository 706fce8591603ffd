//! On-disk persistence of dirty Nodes, so a crash between a Flush and a successful upload can
//! be recovered without the server.

use std::fs;
use std::path::{Path, PathBuf};

use log::warn;
use serde::{Deserialize, Serialize};

use crate::error::ClientError;
use crate::pathenc;

/// Self-describing serialization of a dirty Node, one per file under the cache folder.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CacheEntry {
    pub name: String,
    pub path: String,
    pub contents: Vec<u8>,
    pub parent_path: Option<String>,
    pub last_checksum: u32,
}

/// A recovered entry plus the absolute path it was decoded from (derivable from the entry's own
/// `path` field, kept alongside for convenience at call sites).
pub struct Recovered {
    pub path: String,
    pub entry: CacheEntry,
}

/// Reads and writes `CacheEntry` files under a configured cache folder.
pub struct CacheStore {
    root: PathBuf,
}

impl CacheStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        CacheStore { root: root.into() }
    }

    fn entry_path(&self, path: &str) -> PathBuf {
        self.root.join(pathenc::encode(path))
    }

    /// Atomically writes `entry` under the cache folder: serialize to a temp file in the same
    /// directory, then rename over the final name so a crash mid-write never leaves a
    /// partially-written body at the real name.
    pub fn write(&self, entry: &CacheEntry) -> Result<(), ClientError> {
        fs::create_dir_all(&self.root)?;
        let final_path = self.entry_path(&entry.path);
        let tmp_path = self.root.join(format!(
            "{}.tmp",
            pathenc::encode(&entry.path)
        ));
        let bytes = bincode::serialize(entry)?;
        fs::write(&tmp_path, bytes)?;
        fs::rename(&tmp_path, &final_path)?;
        Ok(())
    }

    /// Walks the cache folder, decoding and deserializing every entry found. Any entry that
    /// fails to decode, read, or deserialize is logged and skipped; the scan never aborts.
    /// `keep_files` controls whether successfully recovered entries are left on disk
    /// (crash-demo mode) or removed.
    pub fn recover(&self, keep_files: bool) -> Vec<Recovered> {
        let mut recovered = Vec::new();
        let dir = match fs::read_dir(&self.root) {
            Ok(dir) => dir,
            Err(_) => return recovered,
        };
        for dir_entry in dir.flatten() {
            let file_path = dir_entry.path();
            if let Some(r) = self.recover_one(&file_path) {
                if !keep_files {
                    let _ = fs::remove_file(&file_path);
                }
                recovered.push(r);
            }
        }
        recovered
    }

    fn recover_one(&self, file_path: &Path) -> Option<Recovered> {
        let filename = file_path.file_name()?.to_str()?;
        if filename.ends_with(".tmp") {
            return None;
        }
        let path = match pathenc::decode(filename) {
            Ok(path) => path,
            Err(err) => {
                warn!("skipping cache entry {filename}: {err}");
                return None;
            }
        };
        let bytes = match fs::read(file_path) {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!("skipping cache entry {path}: {err}");
                return None;
            }
        };
        match bincode::deserialize::<CacheEntry>(&bytes) {
            Ok(entry) => Some(Recovered { path, entry }),
            Err(err) => {
                warn!("skipping cache entry {path}: {err}");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(path: &str, contents: &[u8]) -> CacheEntry {
        CacheEntry {
            name: path.rsplit('/').next().unwrap_or(path).to_string(),
            path: path.to_string(),
            contents: contents.to_vec(),
            parent_path: None,
            last_checksum: crate::checksum::crc32(contents),
        }
    }

    #[test]
    fn write_then_recover_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::new(dir.path());
        store.write(&entry("a/b.txt", b"hello")).unwrap();

        let recovered = store.recover(false);
        assert_eq!(recovered.len(), 1);
        assert_eq!(recovered[0].path, "a/b.txt");
        assert_eq!(recovered[0].entry.contents, b"hello");
    }

    #[test]
    fn recover_without_keep_removes_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::new(dir.path());
        store.write(&entry("a", b"x")).unwrap();
        store.recover(false);
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn recover_with_keep_leaves_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::new(dir.path());
        store.write(&entry("a", b"x")).unwrap();
        store.recover(true);
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn recover_skips_unreadable_entries_without_aborting() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::new(dir.path());
        fs::write(dir.path().join("not-valid-base64!!"), b"garbage").unwrap();
        store.write(&entry("good", b"ok")).unwrap();

        let recovered = store.recover(false);
        assert_eq!(recovered.len(), 1);
        assert_eq!(recovered[0].path, "good");
    }

    #[test]
    fn recover_skips_corrupt_body() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::new(dir.path());
        let filename = pathenc::encode("broken");
        fs::write(dir.path().join(filename), b"not bincode").unwrap();

        let recovered = store.recover(false);
        assert!(recovered.is_empty());
    }

    #[test]
    fn empty_cache_folder_recovers_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::new(dir.path());
        assert!(store.recover(false).is_empty());
    }
}
