//! The single error type every Operation Dispatcher method returns internally, and the one
//! place it is converted to a kernel errno.

use fuser::Errno;

/// Failure kinds distinguished by the client.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The server reported a non-zero `error_code`, or a read-path RPC failed outright.
    #[error("not found: {0}")]
    NotFound(String),
    /// A write was requested on a handle that was not opened for writing.
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    /// Serialization, cache-folder, or upload failure.
    #[error("i/o error: {0}")]
    Io(String),
    /// `WriteBuffer::write_at` was called with an offset past the current length.
    #[error("invalid offset")]
    InvalidOffset,
    /// The gRPC transport returned an error.
    #[error("transport error: {0}")]
    Transport(#[from] tonic::Status),
}

impl From<std::io::Error> for ClientError {
    fn from(value: std::io::Error) -> Self {
        ClientError::Io(value.to_string())
    }
}

impl From<bincode::Error> for ClientError {
    fn from(value: bincode::Error) -> Self {
        ClientError::Io(value.to_string())
    }
}

impl ClientError {
    /// Maps a `ClientError` to the kernel errno the `fuser::Filesystem` impl should reply with.
    /// This is the only place that mapping exists.
    pub fn to_errno(&self) -> Errno {
        match self {
            ClientError::NotFound(_) => Errno::ENOENT,
            ClientError::PermissionDenied(_) => Errno::EPERM,
            ClientError::Io(_) => Errno::EIO,
            ClientError::InvalidOffset => Errno::EIO,
            ClientError::Transport(_) => Errno::EIO,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_maps_to_enoent() {
        assert_eq!(
            ClientError::NotFound("x".into()).to_errno(),
            Errno::ENOENT
        );
    }

    #[test]
    fn permission_denied_maps_to_eperm() {
        assert_eq!(
            ClientError::PermissionDenied("x".into()).to_errno(),
            Errno::EPERM
        );
    }

    #[test]
    fn io_maps_to_eio() {
        assert_eq!(ClientError::Io("x".into()).to_errno(), Errno::EIO);
    }

    #[test]
    fn invalid_offset_maps_to_eio() {
        assert_eq!(ClientError::InvalidOffset.to_errno(), Errno::EIO);
    }
}
