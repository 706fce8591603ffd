//! Transport-agnostic facade the Operation Dispatcher talks to. `memory` backs the test suite;
//! `grpc` is the production binding for the contract in `proto/basic_file_service.proto`.

pub mod grpc;
pub mod memory;

use async_trait::async_trait;

use crate::error::ClientError;

/// Metadata the server holds for one path.
#[derive(Debug, Clone, Copy)]
pub struct FileInfo {
    pub size: u64,
    pub access_time: u64,
    pub modification_time: u64,
    pub creation_time: u64,
    pub inode: u64,
    pub mode: u32,
}

/// A downloaded file: its metadata plus content.
#[derive(Debug, Clone)]
pub struct FileData {
    pub info: FileInfo,
    pub contents: Vec<u8>,
}

/// The seven server operations the dispatcher composes over, with a non-zero
/// `error_code`/transport failure already folded into `ClientError` by the implementation.
#[async_trait]
pub trait FileService: Send + Sync {
    async fn get_file_info(&self, path: &str) -> Result<FileInfo, ClientError>;
    async fn get_directory_contents(&self, path: &str) -> Result<Vec<String>, ClientError>;
    async fn download_file(&self, path: &str) -> Result<FileData, ClientError>;
    async fn upload_file(&self, path: &str, contents: Vec<u8>) -> Result<FileInfo, ClientError>;
    async fn create_file(&self, path: &str) -> Result<(), ClientError>;
    async fn create_directory(&self, path: &str) -> Result<(), ClientError>;
    async fn remove_file(&self, path: &str) -> Result<(), ClientError>;
}
