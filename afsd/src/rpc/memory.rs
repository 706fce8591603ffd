//! In-memory `FileService` used by the test suite so Node Table and Dispatcher logic can be
//! exercised without a running server.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;

use super::{FileData, FileInfo, FileService};
use crate::error::ClientError;

#[derive(Debug, Clone)]
struct Entry {
    contents: Vec<u8>,
    is_dir: bool,
    modification_time: u64,
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs()
}

/// An in-process stand-in for the server, backed by a `Mutex<HashMap<...>>`.
pub struct MemoryFileService {
    entries: Mutex<HashMap<String, Entry>>,
}

impl MemoryFileService {
    pub fn new() -> Self {
        MemoryFileService {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Seeds a regular file directly, bypassing `create_file`/`upload_file` — useful for tests
    /// that want content to already exist on the "server" before the client ever looks it up.
    pub fn seed_file(&self, path: &str, contents: Vec<u8>) {
        self.entries.lock().unwrap().insert(
            path.to_string(),
            Entry {
                contents,
                is_dir: false,
                modification_time: now_secs(),
            },
        );
    }

    /// Sets a file's modification_time directly, to simulate a concurrent writer.
    pub fn set_modification_time(&self, path: &str, time: u64) {
        if let Some(entry) = self.entries.lock().unwrap().get_mut(path) {
            entry.modification_time = time;
        }
    }
}

impl Default for MemoryFileService {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FileService for MemoryFileService {
    async fn get_file_info(&self, path: &str) -> Result<FileInfo, ClientError> {
        let entries = self.entries.lock().unwrap();
        let entry = entries
            .get(path)
            .ok_or_else(|| ClientError::NotFound(path.to_string()))?;
        Ok(FileInfo {
            size: entry.contents.len() as u64,
            access_time: entry.modification_time,
            modification_time: entry.modification_time,
            creation_time: entry.modification_time,
            inode: 0,
            mode: if entry.is_dir { 0o040755 } else { 0o100644 },
        })
    }

    async fn get_directory_contents(&self, path: &str) -> Result<Vec<String>, ClientError> {
        let entries = self.entries.lock().unwrap();
        if !entries.get(path).map(|e| e.is_dir).unwrap_or(path.is_empty()) {
            return Err(ClientError::NotFound(path.to_string()));
        }
        let prefix = if path.is_empty() {
            String::new()
        } else {
            format!("{path}/")
        };
        let mut names: Vec<String> = entries
            .keys()
            .filter_map(|key| {
                let rest = key.strip_prefix(&prefix)?;
                if rest.is_empty() || rest.contains('/') {
                    None
                } else {
                    Some(rest.to_string())
                }
            })
            .collect();
        names.sort();
        Ok(names)
    }

    async fn download_file(&self, path: &str) -> Result<FileData, ClientError> {
        let info = self.get_file_info(path).await?;
        let contents = self.entries.lock().unwrap()[path].contents.clone();
        Ok(FileData { info, contents })
    }

    async fn upload_file(&self, path: &str, contents: Vec<u8>) -> Result<FileInfo, ClientError> {
        let mut entries = self.entries.lock().unwrap();
        let entry = entries
            .get_mut(path)
            .ok_or_else(|| ClientError::NotFound(path.to_string()))?;
        entry.contents = contents;
        entry.modification_time = now_secs();
        Ok(FileInfo {
            size: entry.contents.len() as u64,
            access_time: entry.modification_time,
            modification_time: entry.modification_time,
            creation_time: entry.modification_time,
            inode: 0,
            mode: 0o100644,
        })
    }

    async fn create_file(&self, path: &str) -> Result<(), ClientError> {
        self.entries.lock().unwrap().insert(
            path.to_string(),
            Entry {
                contents: Vec::new(),
                is_dir: false,
                modification_time: now_secs(),
            },
        );
        Ok(())
    }

    async fn create_directory(&self, path: &str) -> Result<(), ClientError> {
        self.entries.lock().unwrap().insert(
            path.to_string(),
            Entry {
                contents: Vec::new(),
                is_dir: true,
                modification_time: now_secs(),
            },
        );
        Ok(())
    }

    async fn remove_file(&self, path: &str) -> Result<(), ClientError> {
        self.entries
            .lock()
            .unwrap()
            .remove(path)
            .ok_or_else(|| ClientError::NotFound(path.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn get_file_info_on_missing_path_is_not_found() {
        let service = MemoryFileService::new();
        assert!(matches!(
            service.get_file_info("missing").await,
            Err(ClientError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn create_then_upload_then_download_round_trips() {
        let service = MemoryFileService::new();
        service.create_file("a").await.unwrap();
        service.upload_file("a", b"hello".to_vec()).await.unwrap();
        let data = service.download_file("a").await.unwrap();
        assert_eq!(data.contents, b"hello");
        assert_eq!(data.info.size, 5);
    }

    #[tokio::test]
    async fn directory_contents_lists_immediate_children_only() {
        let service = MemoryFileService::new();
        service.create_directory("dir").await.unwrap();
        service.create_file("dir/a").await.unwrap();
        service.create_file("dir/b").await.unwrap();
        service.create_directory("dir/sub").await.unwrap();
        service.create_file("dir/sub/c").await.unwrap();

        let mut names = service.get_directory_contents("dir").await.unwrap();
        names.sort();
        assert_eq!(names, vec!["a", "b", "sub"]);
    }

    #[tokio::test]
    async fn remove_then_get_info_is_not_found() {
        let service = MemoryFileService::new();
        service.create_file("a").await.unwrap();
        service.remove_file("a").await.unwrap();
        assert!(service.get_file_info("a").await.is_err());
    }

    #[tokio::test]
    async fn seeded_file_is_visible_without_create() {
        let service = MemoryFileService::new();
        service.seed_file("pre-existing", b"data".to_vec());
        let info = service.get_file_info("pre-existing").await.unwrap();
        assert_eq!(info.size, 4);
    }
}
