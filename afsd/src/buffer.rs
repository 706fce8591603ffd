//! Byte-addressable staging buffer backing a resident regular file's contents.

use crate::error::ClientError;

/// Staged content of one regular file. Carries no concurrency guard of its own; callers
/// serialize access per node.
#[derive(Debug, Default, Clone)]
pub struct WriteBuffer {
    bytes: Vec<u8>,
}

impl WriteBuffer {
    /// An empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Wraps already-known content, e.g. a freshly downloaded or recovered file.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    /// Current length of the buffer.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Whether the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// The buffer's bytes.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Discards all staged content.
    pub fn reset(&mut self) {
        self.bytes.clear();
    }

    /// Writes `data` at `offset`, growing the buffer if the write extends past the current
    /// end. Sparse holes are not supported: an `offset` beyond the current length fails.
    pub fn write_at(&mut self, offset: u64, data: &[u8]) -> Result<(), ClientError> {
        let offset = offset as usize;
        let current_len = self.bytes.len();
        if offset > current_len {
            return Err(ClientError::InvalidOffset);
        }
        let end = offset + data.len();
        if end > current_len {
            self.bytes.extend_from_slice(&data[current_len - offset..]);
        }
        let overlap_end = end.min(current_len);
        self.bytes[offset..overlap_end].copy_from_slice(&data[..overlap_end - offset]);
        Ok(())
    }

    /// Returns `[offset, offset + size)` of the buffer, clamped to the buffer's length.
    pub fn read_at(&self, offset: u64, size: u32) -> &[u8] {
        let offset = (offset as usize).min(self.bytes.len());
        let end = (offset + size as usize).min(self.bytes.len());
        &self.bytes[offset..end]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_extends_from_empty() {
        let mut buf = WriteBuffer::new();
        buf.write_at(0, b"123456789").unwrap();
        assert_eq!(buf.bytes(), b"123456789");
    }

    #[test]
    fn overwrite_in_middle() {
        let mut buf = WriteBuffer::from_bytes(b"123456789".to_vec());
        buf.write_at(2, b"abc").unwrap();
        assert_eq!(buf.bytes(), b"12abc6789");
    }

    #[test]
    fn write_extends_past_end() {
        let mut buf = WriteBuffer::from_bytes(b"123456789".to_vec());
        buf.write_at(7, b"abcdef").unwrap();
        assert_eq!(buf.bytes(), b"1234567abcdef");
    }

    #[test]
    fn write_at_exact_length_extends_by_exactly_len() {
        let mut buf = WriteBuffer::from_bytes(b"123".to_vec());
        buf.write_at(3, b"456").unwrap();
        assert_eq!(buf.len(), 6);
    }

    #[test]
    fn write_at_zero_with_longer_data_replaces_whole_buffer() {
        let mut buf = WriteBuffer::from_bytes(b"123".to_vec());
        buf.write_at(0, b"abcdef").unwrap();
        assert_eq!(buf.bytes(), b"abcdef");
    }

    #[test]
    fn write_past_end_fails() {
        let mut buf = WriteBuffer::from_bytes(b"123".to_vec());
        assert!(matches!(
            buf.write_at(10, b"x"),
            Err(ClientError::InvalidOffset)
        ));
    }

    #[test]
    fn reset_discards_staged_content() {
        let mut buf = WriteBuffer::from_bytes(b"123".to_vec());
        buf.reset();
        assert!(buf.is_empty());
        buf.write_at(0, b"replacement").unwrap();
        assert_eq!(buf.bytes(), b"replacement");
    }

    #[test]
    fn read_at_slices_middle() {
        let buf = WriteBuffer::from_bytes(b"123456789".to_vec());
        assert_eq!(buf.read_at(1, 3), b"234");
    }

    #[test]
    fn read_at_clamps_to_buffer_length() {
        let buf = WriteBuffer::from_bytes(b"123".to_vec());
        assert_eq!(buf.read_at(1, 100), b"23");
    }
}
