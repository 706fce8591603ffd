//! Cache-folder filename encoding and absolute-path composition.
//!
//! Cache entries are keyed by the standard-alphabet base64 of their absolute path so that
//! `/` and other path separators never collide with the host file system's own structure.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

/// A cache-folder filename that does not decode back into a valid path.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    /// The filename is not valid base64.
    #[error("invalid base64 filename: {0}")]
    Base64(#[from] base64::DecodeError),
    /// The decoded bytes are not valid UTF-8.
    #[error("decoded filename is not valid UTF-8")]
    Utf8,
}

/// Encodes an absolute path (as it would appear in a `BasicFileService` request) into a
/// cache-folder filename.
pub fn encode(path: &str) -> String {
    STANDARD.encode(path.as_bytes())
}

/// Decodes a cache-folder filename back into the absolute path it was derived from.
pub fn decode(filename: &str) -> Result<String, DecodeError> {
    let bytes = STANDARD.decode(filename)?;
    String::from_utf8(bytes).map_err(|_| DecodeError::Utf8)
}

/// Joins a parent's absolute path with a child's basename. The root's path is the empty
/// string, so `join("", "a") == "a"`.
pub fn join(parent: &str, name: &str) -> String {
    if parent.is_empty() {
        name.to_string()
    } else {
        format!("{parent}/{name}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        for path in ["a", "a/b/c", "", "dir with spaces/file.txt"] {
            assert_eq!(decode(&encode(path)).unwrap(), path);
        }
    }

    #[test]
    fn join_root() {
        assert_eq!(join("", "a"), "a");
    }

    #[test]
    fn join_nested() {
        assert_eq!(join("a", "b"), "a/b");
        assert_eq!(join("a/b", "c"), "a/b/c");
    }

    #[test]
    fn encoded_names_have_no_path_separators() {
        let encoded = encode("a/b/c");
        assert!(!encoded.contains('/'));
    }
}
