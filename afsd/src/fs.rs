//! `fuser::Filesystem` implementation wiring kernel upcalls onto the Operation Dispatcher.
//! Every method outside the targeted workload surface (file read/write, directory create/list,
//! file create/delete) is left at its `ENOSYS` default from the trait.

use std::ffi::OsStr;
use std::time::Duration;

use fuser::{
    Entry, FileAttr, FileHandle, INodeNo, OpenFlags, ReplyAttr, ReplyCreate, ReplyData,
    ReplyDirectory, ReplyEmpty, ReplyEntry, ReplyOpen, ReplyWrite, Request,
};
use log::{error, warn};
use tokio::runtime::Handle;

use crate::dispatcher::{Attr, OperationDispatcher};
use crate::error::ClientError;

/// TTL the kernel is told to cache attributes/entries for. Since every Node Table lookup is
/// already served from in-process state (or a single round trip to the server), there is no
/// benefit to a longer TTL and a shorter one keeps concurrent-writer staleness bounded.
const TTL: Duration = Duration::from_secs(1);

fn to_file_attr(attr: Attr) -> FileAttr {
    FileAttr {
        ino: attr.ino,
        size: attr.size,
        blocks: attr.size.div_ceil(512),
        atime: attr.atime,
        mtime: attr.mtime,
        ctime: attr.mtime,
        crtime: attr.crtime,
        kind: attr.kind,
        perm: attr.perm,
        nlink: 1,
        uid: 0,
        gid: 0,
        rdev: 0,
        blksize: 512,
        flags: 0,
    }
}

fn to_entry(attr: Attr) -> Entry {
    Entry {
        ino: attr.ino.0,
        generation: None,
        file_ttl: TTL,
        attr: to_file_attr(attr),
        attr_ttl: TTL,
    }
}

/// A handle into the Mount Harness's Tokio runtime, used to drive the dispatcher's async RPC
/// calls from these synchronous kernel callbacks.
pub struct ClientFilesystem {
    dispatcher: OperationDispatcher,
    runtime: Handle,
}

impl ClientFilesystem {
    pub fn new(dispatcher: OperationDispatcher, runtime: Handle) -> Self {
        ClientFilesystem {
            dispatcher,
            runtime,
        }
    }

    /// Drives an async dispatcher call to completion from a synchronous kernel callback.
    /// The callbacks run on the FUSE session's own multi-threaded runtime, so the worker
    /// must be marked blocking before parking it on this crate's runtime handle.
    fn block_on<F: std::future::Future>(&self, fut: F) -> F::Output {
        tokio::task::block_in_place(|| self.runtime.block_on(fut))
    }
}

impl fuser::Filesystem for ClientFilesystem {
    fn init(&self, _req: &Request, _config: &mut fuser::KernelConfig) -> std::io::Result<()> {
        self.dispatcher.recover();
        Ok(())
    }

    fn lookup(&self, _req: &Request, parent: INodeNo, name: &OsStr, reply: ReplyEntry) {
        let Some(name) = name.to_str() else {
            reply.error(ClientError::NotFound("non-utf8 name".into()).to_errno());
            return;
        };
        match self.block_on(self.dispatcher.lookup(parent, name)) {
            Ok(attr) => reply.entry(to_entry(attr)),
            Err(err) => reply.error(err.to_errno()),
        }
    }

    fn getattr(&self, _req: &Request, ino: INodeNo, _fh: Option<FileHandle>, reply: ReplyAttr) {
        match self.dispatcher.getattr(ino) {
            Ok(attr) => reply.attr(to_file_attr(attr), TTL),
            Err(err) => reply.error(err.to_errno()),
        }
    }

    fn setattr(
        &self,
        _req: &Request,
        ino: INodeNo,
        _mode: Option<u32>,
        _uid: Option<u32>,
        _gid: Option<u32>,
        _size: Option<u64>,
        _atime: Option<fuser::TimeOrNow>,
        _mtime: Option<fuser::TimeOrNow>,
        _ctime: Option<std::time::SystemTime>,
        _fh: Option<FileHandle>,
        _crtime: Option<std::time::SystemTime>,
        _chgtime: Option<std::time::SystemTime>,
        _bkuptime: Option<std::time::SystemTime>,
        _flags: Option<fuser::BsdFileFlags>,
        reply: ReplyAttr,
    ) {
        match self.dispatcher.setattr(ino) {
            Ok(attr) => reply.attr(to_file_attr(attr), TTL),
            Err(err) => reply.error(err.to_errno()),
        }
    }

    fn mkdir(
        &self,
        _req: &Request,
        parent: INodeNo,
        name: &OsStr,
        _mode: u32,
        _umask: u32,
        reply: ReplyEntry,
    ) {
        let Some(name) = name.to_str() else {
            reply.error(ClientError::NotFound("non-utf8 name".into()).to_errno());
            return;
        };
        match self.block_on(self.dispatcher.mkdir(parent, name)) {
            Ok(attr) => reply.entry(to_entry(attr)),
            Err(err) => reply.error(err.to_errno()),
        }
    }

    fn unlink(&self, _req: &Request, parent: INodeNo, name: &OsStr, reply: ReplyEmpty) {
        self.remove(parent, name, reply)
    }

    fn rmdir(&self, _req: &Request, parent: INodeNo, name: &OsStr, reply: ReplyEmpty) {
        self.remove(parent, name, reply)
    }

    fn open(&self, _req: &Request, ino: INodeNo, _flags: OpenFlags, reply: ReplyOpen) {
        match self.block_on(self.dispatcher.open(ino)) {
            Ok(fh) => reply.opened(fuser::Open {
                fh: fh.0,
                flags: 0,
            }),
            Err(err) => reply.error(err.to_errno()),
        }
    }

    fn read(
        &self,
        _req: &Request,
        ino: INodeNo,
        _fh: FileHandle,
        offset: u64,
        size: u32,
        _read_flags: fuser::ReadFlags,
        _flags: u32,
        _lock_owner: Option<fuser::LockOwner>,
        reply: ReplyData,
    ) {
        match self.dispatcher.read(ino, offset, size) {
            Ok(bytes) => reply.data(bytes.into()),
            Err(err) => reply.error(err.to_errno()),
        }
    }

    fn write(
        &self,
        _req: &Request,
        ino: INodeNo,
        _fh: FileHandle,
        offset: i64,
        data: &[u8],
        _write_flags: fuser::WriteFlags,
        flags: OpenFlags,
        _lock_owner: Option<fuser::LockOwner>,
        reply: ReplyWrite,
    ) {
        let writable = matches!(
            flags.acc_mode(),
            fuser::OpenAccMode::O_WRONLY | fuser::OpenAccMode::O_RDWR
        );
        match self.dispatcher.write(ino, offset as u64, data, writable) {
            Ok(written) => reply.written(written),
            Err(err) => reply.error(err.to_errno()),
        }
    }

    fn flush(
        &self,
        _req: &Request,
        ino: INodeNo,
        _fh: FileHandle,
        _lock_owner: fuser::LockOwner,
        reply: ReplyEmpty,
    ) {
        match self.dispatcher.flush(ino) {
            Ok(()) => reply.ok(),
            Err(err) => {
                warn!("flush failed for ino {}: {err}", ino.0);
                reply.error(err.to_errno())
            }
        }
    }

    fn release(
        &self,
        _req: &Request,
        ino: INodeNo,
        _fh: FileHandle,
        _flags: OpenFlags,
        _lock_owner: Option<fuser::LockOwner>,
        _flush: bool,
        reply: ReplyEmpty,
    ) {
        match self.block_on(self.dispatcher.release(ino)) {
            Ok(()) => reply.ok(),
            Err(err) => {
                error!("release failed for ino {}: {err}", ino.0);
                reply.error(err.to_errno())
            }
        }
    }

    fn opendir(&self, _req: &Request, _ino: INodeNo, _flags: OpenFlags, reply: ReplyOpen) {
        reply.opened(fuser::Open { fh: 0, flags: 0 });
    }

    fn releasedir(
        &self,
        _req: &Request,
        _ino: INodeNo,
        _fh: FileHandle,
        _flags: OpenFlags,
        reply: ReplyEmpty,
    ) {
        reply.ok();
    }

    fn readdir(
        &self,
        _req: &Request,
        ino: INodeNo,
        _fh: FileHandle,
        offset: u64,
        reply: ReplyDirectory,
    ) {
        let listing = match self.block_on(self.dispatcher.readdir(ino)) {
            Ok(listing) => listing,
            Err(err) => {
                reply.error(err.to_errno());
                return;
            }
        };
        let entries: Vec<fuser::Dirent> = listing
            .into_iter()
            .enumerate()
            .skip(offset as usize)
            .map(|(i, (ino, kind, name))| fuser::Dirent {
                ino,
                offset: (i + 1) as i64,
                kind,
                name: name.into(),
            })
            .collect();
        reply.dir(&entries.into(), usize::MAX, 0);
    }

    fn create(
        &self,
        _req: &Request,
        parent: INodeNo,
        name: &OsStr,
        _mode: u32,
        _umask: u32,
        _flags: i32,
        reply: ReplyCreate,
    ) {
        let Some(name) = name.to_str() else {
            reply.error(ClientError::NotFound("non-utf8 name".into()).to_errno());
            return;
        };
        match self.block_on(self.dispatcher.create(parent, name)) {
            Ok((fh, attr)) => reply.created(
                to_entry(attr),
                fuser::Open {
                    fh: fh.0,
                    flags: 0,
                },
            ),
            Err(err) => reply.error(err.to_errno()),
        }
    }
}

impl ClientFilesystem {
    fn remove(&self, parent: INodeNo, name: &OsStr, reply: ReplyEmpty) {
        let Some(name) = name.to_str() else {
            reply.error(ClientError::NotFound("non-utf8 name".into()).to_errno());
            return;
        };
        match self.block_on(self.dispatcher.remove(parent, name)) {
            Ok(()) => reply.ok(),
            Err(err) => reply.error(err.to_errno()),
        }
    }
}
