//! Production `FileService` binding: a `tonic` gRPC client for the `BasicFileService`
//! contract in `proto/basic_file_service.proto`. The message types and method stubs are
//! written directly against `tonic`'s runtime API, mirroring what `tonic-build` would emit
//! for the same proto, so building the crate does not require a `protoc` install.

use async_trait::async_trait;
use prost::Message;
use tonic::client::Grpc;
use tonic::codec::ProstCodec;
use tonic::codegen::http::uri::PathAndQuery;
use tonic::transport::Channel;

use super::{FileData, FileInfo, FileService};
use crate::error::ClientError;

/// Wire types for the `basicfileservice` package, field-for-field with the `.proto` contract.
pub mod pb {
    #[derive(Clone, PartialEq, prost::Message)]
    pub struct Path {
        #[prost(string, tag = "1")]
        pub path: String,
    }

    #[derive(Clone, PartialEq, prost::Message)]
    pub struct FileInfo {
        #[prost(uint64, tag = "1")]
        pub size: u64,
        #[prost(uint64, tag = "2")]
        pub access_time: u64,
        #[prost(uint64, tag = "3")]
        pub modification_time: u64,
        #[prost(uint64, tag = "4")]
        pub creation_time: u64,
        #[prost(uint64, tag = "5")]
        pub inode: u64,
        #[prost(uint32, tag = "6")]
        pub mode: u32,
        #[prost(int32, tag = "7")]
        pub error_code: i32,
    }

    #[derive(Clone, PartialEq, prost::Message)]
    pub struct DirectoryContents {
        #[prost(string, repeated, tag = "1")]
        pub contents: Vec<String>,
        #[prost(int32, tag = "2")]
        pub error_code: i32,
    }

    #[derive(Clone, PartialEq, prost::Message)]
    pub struct File {
        #[prost(message, optional, tag = "1")]
        pub info: Option<FileInfo>,
        #[prost(bytes = "vec", tag = "2")]
        pub contents: Vec<u8>,
    }

    #[derive(Clone, PartialEq, prost::Message)]
    pub struct FileData {
        #[prost(string, tag = "1")]
        pub path: String,
        #[prost(bytes = "vec", tag = "2")]
        pub contents: Vec<u8>,
    }

    #[derive(Clone, PartialEq, prost::Message)]
    pub struct Result {
        #[prost(int32, tag = "1")]
        pub error_code: i32,
    }
}

/// Read-path failures surface as not-found so the kernel reports ENOENT.
fn check_error_code(code: i32, path: &str) -> Result<(), ClientError> {
    if code != 0 {
        Err(ClientError::NotFound(path.to_string()))
    } else {
        Ok(())
    }
}

/// Mutating-path failures surface as I/O errors so the kernel reports EIO.
fn check_mutation_error_code(code: i32, path: &str) -> Result<(), ClientError> {
    if code != 0 {
        Err(ClientError::Io(format!(
            "server rejected mutation of {path} (code {code})"
        )))
    } else {
        Ok(())
    }
}

impl From<pb::FileInfo> for FileInfo {
    fn from(info: pb::FileInfo) -> Self {
        FileInfo {
            size: info.size,
            access_time: info.access_time,
            modification_time: info.modification_time,
            creation_time: info.creation_time,
            inode: info.inode,
            mode: info.mode,
        }
    }
}

/// A long-lived connection to a `BasicFileService` server, mirroring the reference client's use
/// of a single stub for the process lifetime.
pub struct GrpcFileService {
    client: Grpc<Channel>,
}

impl GrpcFileService {
    /// Connects to `endpoint` (e.g. `http://localhost:61512`).
    pub async fn connect(endpoint: String) -> Result<Self, ClientError> {
        let channel = Channel::from_shared(endpoint)
            .map_err(|e| ClientError::Io(e.to_string()))?
            .connect()
            .await
            .map_err(|e| ClientError::Io(e.to_string()))?;
        Ok(GrpcFileService {
            client: Grpc::new(channel),
        })
    }

    async fn unary<Req, Resp>(&self, path: &'static str, request: Req) -> Result<Resp, tonic::Status>
    where
        Req: Message + 'static,
        Resp: Message + Default + 'static,
    {
        let mut client = self.client.clone();
        client
            .ready()
            .await
            .map_err(|e| tonic::Status::unavailable(format!("service not ready: {e}")))?;
        let response = client
            .unary(
                tonic::Request::new(request),
                PathAndQuery::from_static(path),
                ProstCodec::default(),
            )
            .await?;
        Ok(response.into_inner())
    }
}

#[async_trait]
impl FileService for GrpcFileService {
    async fn get_file_info(&self, path: &str) -> Result<FileInfo, ClientError> {
        let response: pb::FileInfo = self
            .unary(
                "/basicfileservice.BasicFileService/GetFileInfo",
                pb::Path {
                    path: path.to_string(),
                },
            )
            .await?;
        check_error_code(response.error_code, path)?;
        Ok(response.into())
    }

    async fn get_directory_contents(&self, path: &str) -> Result<Vec<String>, ClientError> {
        let response: pb::DirectoryContents = self
            .unary(
                "/basicfileservice.BasicFileService/GetDirectoryContents",
                pb::Path {
                    path: path.to_string(),
                },
            )
            .await?;
        check_error_code(response.error_code, path)?;
        Ok(response.contents)
    }

    async fn download_file(&self, path: &str) -> Result<FileData, ClientError> {
        let response: pb::File = self
            .unary(
                "/basicfileservice.BasicFileService/DownloadFile",
                pb::Path {
                    path: path.to_string(),
                },
            )
            .await?;
        let info = response
            .info
            .ok_or_else(|| ClientError::NotFound(path.to_string()))?;
        check_error_code(info.error_code, path)?;
        Ok(FileData {
            info: info.into(),
            contents: response.contents,
        })
    }

    async fn upload_file(&self, path: &str, contents: Vec<u8>) -> Result<FileInfo, ClientError> {
        let response: pb::FileInfo = self
            .unary(
                "/basicfileservice.BasicFileService/UploadFile",
                pb::FileData {
                    path: path.to_string(),
                    contents,
                },
            )
            .await?;
        check_mutation_error_code(response.error_code, path)?;
        Ok(response.into())
    }

    async fn create_file(&self, path: &str) -> Result<(), ClientError> {
        let response: pb::Result = self
            .unary(
                "/basicfileservice.BasicFileService/CreateFile",
                pb::Path {
                    path: path.to_string(),
                },
            )
            .await?;
        check_mutation_error_code(response.error_code, path)
    }

    async fn create_directory(&self, path: &str) -> Result<(), ClientError> {
        let response: pb::Result = self
            .unary(
                "/basicfileservice.BasicFileService/CreateDirectory",
                pb::Path {
                    path: path.to_string(),
                },
            )
            .await?;
        check_mutation_error_code(response.error_code, path)
    }

    async fn remove_file(&self, path: &str) -> Result<(), ClientError> {
        let response: pb::Result = self
            .unary(
                "/basicfileservice.BasicFileService/RemoveFile",
                pb::Path {
                    path: path.to_string(),
                },
            )
            .await?;
        check_mutation_error_code(response.error_code, path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nonzero_error_code_maps_to_not_found() {
        assert!(matches!(
            check_error_code(1, "x"),
            Err(ClientError::NotFound(_))
        ));
    }

    #[test]
    fn zero_error_code_is_ok() {
        assert!(check_error_code(0, "x").is_ok());
    }

    #[test]
    fn nonzero_mutation_error_code_maps_to_io() {
        assert!(matches!(
            check_mutation_error_code(1, "x"),
            Err(ClientError::Io(_))
        ));
    }

    #[test]
    fn file_info_decodes_from_encoded_bytes() {
        let info = pb::FileInfo {
            size: 9,
            access_time: 1,
            modification_time: 2,
            creation_time: 3,
            inode: 4,
            mode: 0o100644,
            error_code: 0,
        };
        let bytes = info.encode_to_vec();
        let decoded = pb::FileInfo::decode(bytes.as_slice()).unwrap();
        assert_eq!(decoded, info);
    }
}
