use super::FileDescriptorRawHandle;
use std::{io, sync::Arc, time::Duration};

#[derive(Debug, Clone)]
pub struct SubChannel {
    fd: Arc<FileDescriptorRawHandle>,
}

impl SubChannel {
    pub fn as_raw_fd(&self) -> &FileDescriptorRawHandle {
        &self.fd
    }

    pub fn new(fd: FileDescriptorRawHandle, _max_poll_timeout: Duration) -> io::Result<SubChannel> {
        Ok(SubChannel { fd: Arc::new(fd) })
    }

    pub fn close(&self) {
        self.fd.close()
    }

    pub async fn do_receive(&self, buffer: &'_ mut [u8]) -> io::Result<Option<usize>> {
        tokio::task::block_in_place(|| super::blocking_receive(&self.fd, buffer))
    }
}
