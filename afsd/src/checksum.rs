//! CRC32 helper used to detect whether a node's buffer has changed since it was last
//! synced with the server (see `Node::last_checksum`).

/// IEEE CRC32 of `data`.
pub fn crc32(data: &[u8]) -> u32 {
    crc32fast::hash(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_bytes_same_checksum() {
        assert_eq!(crc32(b"123456789"), crc32(b"123456789"));
    }

    #[test]
    fn different_bytes_different_checksum() {
        assert_ne!(crc32(b"123456789"), crc32(b"12345678"));
    }

    #[test]
    fn empty_buffer_is_stable() {
        assert_eq!(crc32(b""), crc32(b""));
    }
}
