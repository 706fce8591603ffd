//! Native FFI bindings to libfuse2.
//!
//! This is a small set of bindings that are required to mount/unmount FUSE filesystems and
//! open/close a fd to the FUSE kernel driver.
#![warn(missing_debug_implementations)]
#![allow(missing_docs)]
#![allow(non_camel_case_types)]

use libc::c_char;
use libc::c_int;

/// Helper function to provide options as a `fuse_args` struct
/// (which contains an argc count and an argv pointer)
#[repr(C)]
pub(crate) struct fuse_args {
    pub(crate) argc: c_int,
    pub(crate) argv: *const *const c_char,
    pub(crate) allocated: c_int,
}

unsafe extern "C" {
    /// Mount a FUSE filesystem using the pre-3.0 libfuse ABI.
    ///
    /// Returns the fd used to communicate with the kernel driver, or a negative value on error.
    pub(crate) fn fuse_mount_compat25(mountpoint: *const c_char, args: *const fuse_args) -> c_int;

    /// Unmount a FUSE filesystem previously mounted with `fuse_mount_compat25`.
    pub(crate) fn fuse_unmount_compat22(mountpoint: *const c_char);
}
