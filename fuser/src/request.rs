//! Filesystem operation request
//!
//! A request represents information about a filesystem operation the kernel driver wants us to
//! perform. Parsing turns the raw bytes read from the kernel channel into a typed
//! [`ll::Operation`]; dispatching routes that operation to the matching [`Filesystem`] method
//! together with a [`ReplyHandler`] bound to the request's unique id.

use std::io;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use log::{debug, error, warn};

use crate::io_ops::ArcSubChannel;
use crate::ll::flags::fattr_flags::FattrFlags;
use crate::ll::flags::fsync_flags::FsyncFlags;
use crate::ll::flags::release_flags::ReleaseFlags;
use crate::ll::{self, Errno, FileHandle, INodeNo, LockOwner, TimeOrNow};
use crate::reply::ReplyHandler;
use crate::request_param;
use crate::session::ActiveSession;
use crate::{
    AccessFlags, Filesystem, InitFlags, KernelConfig, OpenFlags, ReadFlags, RenameFlags,
    WriteFlags,
};

/// Converts the kernel's split seconds/nanoseconds representation into a `SystemTime`.
/// Seconds are signed to allow pre-epoch timestamps, matching `stat.st_mtime`.
fn system_time_from_time(secs: i64, nsecs: u32) -> SystemTime {
    if secs >= 0 {
        UNIX_EPOCH + Duration::new(secs as u64, nsecs)
    } else {
        UNIX_EPOCH - Duration::new((-secs) as u64, nsecs)
    }
}

/// Request data structure
#[derive(Debug)]
pub(crate) struct Request<'a> {
    /// Parsed request
    request: ll::Request<'a>,
}

impl<'a> Request<'a> {
    /// Create a new request from the given data
    pub(crate) fn new(data: &'a [u8]) -> Option<Request<'a>> {
        match ll::Request::try_from(data) {
            Ok(request) => Some(Self { request }),
            Err(err) => {
                error!("{}", err);
                None
            }
        }
    }

    /// Create a reply handler bound to this request's unique id. Exactly one reply is sent per
    /// handler: either by the filesystem calling a reply method, or by the handler's drop glue.
    fn reply(&self, sender: &ArcSubChannel) -> ReplyHandler {
        ReplyHandler::new(self.request.unique(), sender.clone())
    }

    /// The caller-facing view of the request header handed to every `Filesystem` method.
    fn param(&self) -> &request_param::Request {
        request_param::Request::ref_cast(self.request.header())
    }

    fn nodeid(&self) -> INodeNo {
        INodeNo(self.request.nodeid())
    }

    /// Handle the kernel's INIT handshake: negotiate the ABI, let the filesystem adjust the
    /// `KernelConfig`, and record the negotiated protocol version on the session. Any other
    /// operation arriving before the handshake completes is answered with an error.
    pub(crate) async fn dispatch_init<FS: Filesystem>(
        &self,
        active_session: &Arc<ActiveSession>,
        filesystem: &Arc<FS>,
        sender: ArcSubChannel,
    ) {
        let ll::Operation::Init(x) = self.request.operation() else {
            warn!("Ignoring FUSE operation before init: {}", self.request);
            self.reply(&sender).error(Errno::EIO);
            return;
        };
        let reply = self.reply(&sender);
        // We don't support ABI versions before 7.6
        let v = ll::Version(x.arg.major, x.arg.minor);
        if v < ll::Version(7, 6) {
            error!("Unsupported FUSE ABI version {}", v);
            reply.error(Errno::EPROTO);
            return;
        }
        // Remember the ABI version supported by the kernel
        {
            let mut session_configuration = active_session.session_configuration.lock().await;
            session_configuration.proto_major = v.major();
            session_configuration.proto_minor = v.minor();
        }

        let capabilities = InitFlags::from_bits_truncate(u64::from(x.arg.flags));
        let mut config = KernelConfig::new(capabilities, x.arg.max_readahead, v);
        // Call filesystem init method and give it a chance to return an error
        if let Err(err) = filesystem.init(self.param(), &mut config) {
            reply.error(Errno::from_i32(err.raw_os_error().unwrap_or(libc::EIO)));
            return;
        }
        debug!(
            "INIT response: ABI {}.{}, max readahead {}, max write {}",
            ll::fuse_abi::FUSE_KERNEL_VERSION,
            ll::fuse_abi::FUSE_KERNEL_MINOR_VERSION,
            config.max_readahead,
            config.max_write
        );
        active_session.initialized.store(true, Ordering::SeqCst);
        // Reply with our desired version and settings. If the kernel supports a larger major
        // version, it'll re-send a matching init message. If it supports only lower major
        // versions, we replied with an error above.
        reply.config(capabilities, &config);
    }

    /// Dispatch request to the given filesystem.
    /// This calls the appropriate filesystem operation method for the
    /// request and sends back the returned reply to the kernel
    pub(crate) async fn dispatch<FS: Filesystem>(
        &self,
        active_session: &Arc<ActiveSession>,
        filesystem: Arc<FS>,
        sender: ArcSubChannel,
    ) -> io::Result<()> {
        debug!("{}", self.request);

        match self.request.operation() {
            // A second INIT after the handshake is a protocol violation.
            ll::Operation::Init(_) => {
                warn!("Ignoring duplicate FUSE init: {}", self.request);
                self.reply(&sender).error(Errno::EIO);
            }
            ll::Operation::Destroy(_) => {
                active_session.destroy().await;
                self.reply(&sender).ok();
            }
            ll::Operation::Interrupt(_) => {
                // Interrupts are not supported; ENOSYS tells the kernel to stop sending them.
                self.reply(&sender).error(Errno::ENOSYS);
            }

            ll::Operation::Lookup(x) => {
                filesystem.lookup(self.param(), self.nodeid(), x.name, self.reply(&sender));
            }
            ll::Operation::Forget(x) => {
                // No reply.
                filesystem.forget(self.param(), self.nodeid(), x.arg.nlookup);
            }
            ll::Operation::GetAttr(_) => {
                filesystem.getattr(self.param(), self.nodeid(), None, self.reply(&sender));
            }
            ll::Operation::SetAttr(x) => {
                let arg = x.arg;
                let valid = FattrFlags::from_bits_truncate(arg.valid);
                let atime = valid.contains(FattrFlags::FATTR_ATIME).then(|| {
                    if arg.atime_now() {
                        TimeOrNow::Now
                    } else {
                        TimeOrNow::SpecificTime(system_time_from_time(arg.atime, arg.atimensec))
                    }
                });
                let mtime = valid.contains(FattrFlags::FATTR_MTIME).then(|| {
                    if arg.mtime_now() {
                        TimeOrNow::Now
                    } else {
                        TimeOrNow::SpecificTime(system_time_from_time(arg.mtime, arg.mtimensec))
                    }
                });
                filesystem.setattr(
                    self.param(),
                    self.nodeid(),
                    valid.contains(FattrFlags::FATTR_MODE).then_some(arg.mode),
                    valid.contains(FattrFlags::FATTR_UID).then_some(arg.uid),
                    valid.contains(FattrFlags::FATTR_GID).then_some(arg.gid),
                    valid.contains(FattrFlags::FATTR_SIZE).then_some(arg.size),
                    atime,
                    mtime,
                    None,
                    valid
                        .contains(FattrFlags::FATTR_FH)
                        .then_some(FileHandle(arg.fh)),
                    None,
                    None,
                    None,
                    None,
                    self.reply(&sender),
                );
            }
            ll::Operation::ReadLink(_) => {
                filesystem.readlink(self.param(), self.nodeid(), self.reply(&sender));
            }
            ll::Operation::MkNod(x) => {
                filesystem.mknod(
                    self.param(),
                    self.nodeid(),
                    x.name,
                    x.arg.mode,
                    x.arg.umask,
                    x.arg.rdev,
                    self.reply(&sender),
                );
            }
            ll::Operation::MkDir(x) => {
                filesystem.mkdir(
                    self.param(),
                    self.nodeid(),
                    x.name,
                    x.arg.mode,
                    x.arg.umask,
                    self.reply(&sender),
                );
            }
            ll::Operation::Unlink(x) => {
                filesystem.unlink(self.param(), self.nodeid(), x.name, self.reply(&sender));
            }
            ll::Operation::RmDir(x) => {
                filesystem.rmdir(self.param(), self.nodeid(), x.name, self.reply(&sender));
            }
            ll::Operation::SymLink(x) => {
                filesystem.symlink(
                    self.param(),
                    self.nodeid(),
                    x.name,
                    Path::new(x.link),
                    self.reply(&sender),
                );
            }
            ll::Operation::Rename(x) => {
                filesystem.rename(
                    self.param(),
                    self.nodeid(),
                    x.name,
                    INodeNo(x.arg.newdir),
                    x.newname,
                    RenameFlags::empty(),
                    self.reply(&sender),
                );
            }
            ll::Operation::Link(x) => {
                filesystem.link(
                    self.param(),
                    INodeNo(x.arg.oldnodeid),
                    self.nodeid(),
                    x.name,
                    self.reply(&sender),
                );
            }
            ll::Operation::Open(x) => {
                filesystem.open(
                    self.param(),
                    self.nodeid(),
                    OpenFlags(x.arg.flags),
                    self.reply(&sender),
                );
            }
            ll::Operation::Read(x) => {
                let arg = x.arg;
                let read_flags = ReadFlags::from_bits_truncate(arg.read_flags);
                let lock_owner = read_flags
                    .contains(ReadFlags::FUSE_READ_LOCKOWNER)
                    .then_some(LockOwner(arg.lock_owner));
                filesystem.read(
                    self.param(),
                    self.nodeid(),
                    FileHandle(arg.fh),
                    arg.offset as u64,
                    arg.size,
                    read_flags,
                    arg.flags as u32,
                    lock_owner,
                    self.reply(&sender),
                );
            }
            ll::Operation::Write(x) => {
                let arg = x.arg;
                let write_flags = WriteFlags::from_bits_truncate(arg.write_flags);
                let lock_owner = write_flags
                    .contains(WriteFlags::FUSE_WRITE_LOCKOWNER)
                    .then_some(LockOwner(arg.lock_owner));
                filesystem.write(
                    self.param(),
                    self.nodeid(),
                    FileHandle(arg.fh),
                    arg.offset,
                    x.data,
                    write_flags,
                    OpenFlags(arg.flags),
                    lock_owner,
                    self.reply(&sender),
                );
            }
            ll::Operation::Flush(x) => {
                filesystem.flush(
                    self.param(),
                    self.nodeid(),
                    FileHandle(x.arg.fh),
                    LockOwner(x.arg.lock_owner),
                    self.reply(&sender),
                );
            }
            ll::Operation::Release(x) => {
                let arg = x.arg;
                let release_flags = ReleaseFlags::from_bits_truncate(arg.release_flags);
                let lock_owner = release_flags
                    .contains(ReleaseFlags::FUSE_RELEASE_FLOCK_UNLOCK)
                    .then_some(LockOwner(arg.lock_owner));
                filesystem.release(
                    self.param(),
                    self.nodeid(),
                    FileHandle(arg.fh),
                    OpenFlags(arg.flags),
                    lock_owner,
                    release_flags.contains(ReleaseFlags::FUSE_RELEASE_FLUSH),
                    self.reply(&sender),
                );
            }
            ll::Operation::FSync(x) => {
                let datasync = FsyncFlags::from_bits_truncate(x.arg.fsync_flags)
                    .contains(FsyncFlags::FUSE_FSYNC_FDATASYNC);
                filesystem.fsync(
                    self.param(),
                    self.nodeid(),
                    FileHandle(x.arg.fh),
                    datasync,
                    self.reply(&sender),
                );
            }
            ll::Operation::OpenDir(x) => {
                filesystem.opendir(
                    self.param(),
                    self.nodeid(),
                    OpenFlags(x.arg.flags),
                    self.reply(&sender),
                );
            }
            ll::Operation::ReadDir(x) => {
                filesystem.readdir(
                    self.param(),
                    self.nodeid(),
                    FileHandle(x.arg.fh),
                    x.arg.offset as u64,
                    self.reply(&sender),
                );
            }
            ll::Operation::ReleaseDir(x) => {
                filesystem.releasedir(
                    self.param(),
                    self.nodeid(),
                    FileHandle(x.arg.fh),
                    OpenFlags(x.arg.flags),
                    self.reply(&sender),
                );
            }
            ll::Operation::FSyncDir(x) => {
                let datasync = FsyncFlags::from_bits_truncate(x.arg.fsync_flags)
                    .contains(FsyncFlags::FUSE_FSYNC_FDATASYNC);
                filesystem.fsyncdir(
                    self.param(),
                    self.nodeid(),
                    FileHandle(x.arg.fh),
                    datasync,
                    self.reply(&sender),
                );
            }
            ll::Operation::StatFs(_) => {
                filesystem.statfs(self.param(), self.nodeid(), self.reply(&sender));
            }
            ll::Operation::SetXAttr(x) => {
                #[cfg(target_os = "macos")]
                let position = x.arg.position;
                #[cfg(not(target_os = "macos"))]
                let position = 0;
                filesystem.setxattr(
                    self.param(),
                    self.nodeid(),
                    x.name,
                    x.value,
                    x.arg.flags,
                    position,
                    self.reply(&sender),
                );
            }
            ll::Operation::GetXAttr(x) => {
                filesystem.getxattr(
                    self.param(),
                    self.nodeid(),
                    x.name,
                    x.arg.size,
                    self.reply(&sender),
                );
            }
            ll::Operation::ListXAttr(x) => {
                filesystem.listxattr(self.param(), self.nodeid(), x.arg.size, self.reply(&sender));
            }
            ll::Operation::RemoveXAttr(x) => {
                filesystem.removexattr(self.param(), self.nodeid(), x.name, self.reply(&sender));
            }
            ll::Operation::Access(x) => {
                filesystem.access(
                    self.param(),
                    self.nodeid(),
                    AccessFlags::from_bits_truncate(x.arg.mask),
                    self.reply(&sender),
                );
            }
            ll::Operation::Create(x) => {
                filesystem.create(
                    self.param(),
                    self.nodeid(),
                    x.name,
                    x.arg.mode,
                    x.arg.umask,
                    x.arg.flags,
                    self.reply(&sender),
                );
            }
            ll::Operation::GetLk(x) => {
                filesystem.getlk(
                    self.param(),
                    self.nodeid(),
                    FileHandle(x.arg.fh),
                    LockOwner(x.arg.owner),
                    x.arg.lk.start,
                    x.arg.lk.end,
                    x.arg.lk.typ,
                    x.arg.lk.pid,
                    self.reply(&sender),
                );
            }
            ll::Operation::SetLk(x) => {
                filesystem.setlk(
                    self.param(),
                    self.nodeid(),
                    FileHandle(x.arg.fh),
                    LockOwner(x.arg.owner),
                    x.arg.lk.start,
                    x.arg.lk.end,
                    x.arg.lk.typ,
                    x.arg.lk.pid,
                    false,
                    self.reply(&sender),
                );
            }
            ll::Operation::SetLkW(x) => {
                filesystem.setlk(
                    self.param(),
                    self.nodeid(),
                    FileHandle(x.arg.fh),
                    LockOwner(x.arg.owner),
                    x.arg.lk.start,
                    x.arg.lk.end,
                    x.arg.lk.typ,
                    x.arg.lk.pid,
                    true,
                    self.reply(&sender),
                );
            }
            ll::Operation::BMap(x) => {
                filesystem.bmap(
                    self.param(),
                    self.nodeid(),
                    x.arg.blocksize,
                    x.arg.block,
                    self.reply(&sender),
                );
            }

            #[cfg(target_os = "macos")]
            ll::Operation::SetVolName(x) => {
                filesystem.setvolname(self.param(), x.name, self.reply(&sender));
            }
            #[cfg(target_os = "macos")]
            ll::Operation::GetXTimes(_) => {
                filesystem.getxtimes(self.param(), self.nodeid(), self.reply(&sender));
            }
            #[cfg(target_os = "macos")]
            ll::Operation::Exchange(x) => {
                filesystem.exchange(
                    self.param(),
                    INodeNo(x.arg.olddir),
                    x.oldname,
                    INodeNo(x.arg.newdir),
                    x.newname,
                    x.arg.options,
                    self.reply(&sender),
                );
            }
        }
        Ok(())
    }
}
