//! Low-level FUSE protocol types.
//!
//! This module contains the raw request/reply representation used to talk to the kernel
//! driver, plus a handful of small newtypes that give the public API stronger typing than the
//! raw `u64`s the kernel sends.

mod argument;
#[cfg(any(fuser_mount_impl = "libfuse2", fuser_mount_impl = "libfuse3"))]
pub(crate) mod errno;
pub(crate) mod flags;
pub(crate) mod fuse_abi;
mod ioslice_concat;
pub(crate) mod reply;
pub(crate) mod request;

pub(crate) use reply::Response;
pub use request::Operation;
pub use request::Request;
pub use request::RequestError;

use std::fmt;

/// Inode number as used by the kernel driver.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serializable", derive(serde::Serialize, serde::Deserialize))]
pub struct INodeNo(pub u64);

impl INodeNo {
    /// The inode number the kernel uses for the mount's root directory.
    pub const ROOT: INodeNo = INodeNo(fuse_abi::FUSE_ROOT_ID);
}

impl From<u64> for INodeNo {
    fn from(value: u64) -> Self {
        INodeNo(value)
    }
}

impl From<INodeNo> for u64 {
    fn from(value: INodeNo) -> Self {
        value.0
    }
}

impl fmt::Display for INodeNo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Handle for an open file or directory, chosen by the filesystem and opaque to the kernel.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serializable", derive(serde::Serialize, serde::Deserialize))]
pub struct FileHandle(pub u64);

impl From<u64> for FileHandle {
    fn from(value: u64) -> Self {
        FileHandle(value)
    }
}

impl From<FileHandle> for u64 {
    fn from(value: FileHandle) -> Self {
        value.0
    }
}

impl fmt::Display for FileHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifies the owner of a POSIX byte-range lock, as reported by the kernel.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serializable", derive(serde::Serialize, serde::Deserialize))]
pub struct LockOwner(pub u64);

impl From<u64> for LockOwner {
    fn from(value: u64) -> Self {
        LockOwner(value)
    }
}

impl From<LockOwner> for u64 {
    fn from(value: LockOwner) -> Self {
        value.0
    }
}

impl fmt::Display for LockOwner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// FUSE kernel ABI version.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Version(pub u32, pub u32);

impl Version {
    /// Major ABI version.
    pub fn major(&self) -> u32 {
        self.0
    }

    /// Minor ABI version.
    pub fn minor(&self) -> u32 {
        self.1
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.0, self.1)
    }
}

/// Generation number of an inode, used together with its number to detect inode reuse.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serializable", derive(serde::Serialize, serde::Deserialize))]
pub struct Generation(pub u64);

impl From<u64> for Generation {
    fn from(value: u64) -> Self {
        Generation(value)
    }
}

impl From<Generation> for u64 {
    fn from(value: Generation) -> Self {
        value.0
    }
}

/// Unique id the kernel driver assigns to a request.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct RequestId(pub u64);

impl From<u64> for RequestId {
    fn from(value: u64) -> Self {
        RequestId(value)
    }
}

/// A POSIX byte-range lock, as sent to or returned from the kernel.
#[derive(Debug, Copy, Clone)]
pub(crate) struct Lock {
    pub(crate) range: (u64, u64),
    pub(crate) typ: i32,
    pub(crate) pid: u32,
}

/// Either a specific point in time, or "now" as requested by `utimensat(UTIME_NOW)`.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TimeOrNow {
    /// A concrete timestamp.
    SpecificTime(std::time::SystemTime),
    /// The current time, to be filled in by the filesystem at the time of the call.
    Now,
}

/// Error code returned to the kernel in place of a successful reply.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct Errno(pub(crate) std::num::NonZeroI32);

macro_rules! errno_consts {
    ($($name:ident),* $(,)?) => {
        impl Errno {
            $(
                #[allow(missing_docs)]
                pub const $name: Errno = match std::num::NonZeroI32::new(libc::$name) {
                    Some(v) => Errno(v),
                    None => panic!(concat!(stringify!($name), " must be nonzero")),
                };
            )*
        }
    };
}

errno_consts!(
    EPERM, ENOENT, ESRCH, EINTR, EIO, ENXIO, E2BIG, ENOEXEC, EBADF, ECHILD, EAGAIN, ENOMEM,
    EACCES, EFAULT, ENOTBLK, EBUSY, EEXIST, EXDEV, ENODEV, ENOTDIR, EISDIR, EINVAL, ENFILE,
    EMFILE, ENOTTY, ETXTBSY, EFBIG, ENOSPC, ESPIPE, EROFS, EMLINK, EPIPE, EDOM, ERANGE, EDEADLK,
    ENAMETOOLONG, ENOLCK, ENOSYS, ENOTEMPTY, ELOOP, ENOMSG, EIDRM, EOVERFLOW, ENOTSUP, ESTALE,
    EOPNOTSUPP, EPROTO, ETIMEDOUT,
);

impl Errno {
    /// Wraps a raw C `errno` value.
    pub fn from_i32(value: i32) -> Errno {
        Errno(std::num::NonZeroI32::new(value).expect("errno must be nonzero"))
    }

    /// Returns the raw C `errno` value.
    pub fn code(&self) -> libc::c_int {
        self.0.get()
    }
}

impl From<i32> for Errno {
    fn from(value: i32) -> Self {
        Errno::from_i32(value)
    }
}

impl From<Errno> for i32 {
    fn from(value: Errno) -> Self {
        value.0.get()
    }
}

impl fmt::Display for Errno {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "errno {}", self.0)
    }
}

#[cfg(test)]
pub(crate) mod test {
    use std::io::IoSlice;

    /// Forces 8-byte alignment on raw request fixtures so `ArgumentIterator::fetch` does not
    /// trip its alignment assertion.
    #[repr(align(8))]
    pub(crate) struct AlignedData<T>(pub(crate) T);

    impl<T> std::ops::Deref for AlignedData<T> {
        type Target = T;

        fn deref(&self) -> &Self::Target {
            &self.0
        }
    }

    pub(crate) fn ioslice_to_vec(slices: &[IoSlice<'_>]) -> Vec<u8> {
        let mut v = Vec::with_capacity(slices.iter().map(|x| x.len()).sum());
        for x in slices {
            v.extend_from_slice(x);
        }
        v
    }
}
