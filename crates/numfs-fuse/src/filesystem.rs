//! `fuser` adapter for [`NumworksFs`].
//!
//! Each callback logs the request, runs the matching operation from
//! [`ops`](crate::ops) and turns its result into a reply.

use crate::error::FuseError;
use crate::ops::NumworksFs;
use fuser::{
    FileType, Filesystem, KernelConfig, ReplyAttr, ReplyCreate, ReplyData, ReplyDirectory,
    ReplyEmpty, ReplyEntry, ReplyIoctl, ReplyOpen, ReplyStatfs, ReplyWrite, ReplyXattr, Request,
    TimeOrNow,
};
use libc::c_int;
use std::ffi::OsStr;
use std::path::Path;
use std::sync::atomic::Ordering;
use std::time::SystemTime;
use tracing::{debug, info, trace};

/// Terminal "get attributes" ioctl, probed by editors such as nano.
const TCGETS: u32 = 0x5401;

fn errno(op: &str, e: &FuseError) -> c_int {
    let code = e.to_errno();
    debug!(op, error = %e, errno = code, "operation failed");
    code
}

fn to_offset(offset: i64) -> u64 {
    u64::try_from(offset).unwrap_or(0)
}

impl Filesystem for NumworksFs {
    fn init(&mut self, _req: &Request<'_>, _config: &mut KernelConfig) -> Result<(), c_int> {
        info!("FUSE filesystem initialized");
        Ok(())
    }

    fn destroy(&mut self) {
        let stats = self.session().stats();
        info!(
            calls = stats.calls_started.load(Ordering::Relaxed),
            completed = stats.calls_completed.load(Ordering::Relaxed),
            failed = stats.calls_failed.load(Ordering::Relaxed),
            timed_out = stats.calls_timed_out.load(Ordering::Relaxed),
            "FUSE filesystem destroyed"
        );
    }

    fn lookup(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEntry) {
        trace!(parent, name = ?name, "lookup");
        match NumworksFs::lookup(self, parent, name) {
            Ok(attr) => reply.entry(&self.config().attr_ttl, &attr, 0),
            Err(e) => reply.error(errno("lookup", &e)),
        }
    }

    fn forget(&mut self, _req: &Request<'_>, ino: u64, nlookup: u64) {
        trace!(inode = ino, nlookup, "forget");
    }

    fn getattr(&mut self, _req: &Request<'_>, ino: u64, _fh: Option<u64>, reply: ReplyAttr) {
        trace!(inode = ino, "getattr");
        match NumworksFs::getattr(self, ino) {
            Ok(attr) => reply.attr(&self.config().attr_ttl, &attr),
            Err(e) => reply.error(errno("getattr", &e)),
        }
    }

    fn setattr(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        mode: Option<u32>,
        _uid: Option<u32>,
        _gid: Option<u32>,
        size: Option<u64>,
        _atime: Option<TimeOrNow>,
        _mtime: Option<TimeOrNow>,
        _ctime: Option<SystemTime>,
        fh: Option<u64>,
        _crtime: Option<SystemTime>,
        _chgtime: Option<SystemTime>,
        _bkuptime: Option<SystemTime>,
        _flags: Option<u32>,
        reply: ReplyAttr,
    ) {
        trace!(inode = ino, mode = ?mode, size = ?size, fh = ?fh, "setattr");
        // Permissions and timestamps are fixed; only size changes are applied
        let result = match size {
            Some(size) => NumworksFs::truncate(self, ino, size, fh),
            None => NumworksFs::getattr(self, ino),
        };
        match result {
            Ok(attr) => reply.attr(&self.config().attr_ttl, &attr),
            Err(e) => reply.error(errno("setattr", &e)),
        }
    }

    fn mknod(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        _umask: u32,
        _rdev: u32,
        reply: ReplyEntry,
    ) {
        trace!(parent, name = ?name, mode, "mknod");
        match NumworksFs::mknod(self, parent, name, mode) {
            Ok(attr) => reply.entry(&self.config().attr_ttl, &attr, 0),
            Err(e) => reply.error(errno("mknod", &e)),
        }
    }

    fn mkdir(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        _mode: u32,
        _umask: u32,
        reply: ReplyEntry,
    ) {
        trace!(parent, name = ?name, "mkdir");
        match NumworksFs::mkdir(self, parent, name) {
            Ok(attr) => reply.entry(&self.config().attr_ttl, &attr, 0),
            Err(e) => reply.error(errno("mkdir", &e)),
        }
    }

    fn unlink(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        trace!(parent, name = ?name, "unlink");
        match NumworksFs::unlink(self, parent, name) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(errno("unlink", &e)),
        }
    }

    fn rmdir(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        trace!(parent, name = ?name, "rmdir");
        match NumworksFs::rmdir(self, parent, name) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(errno("rmdir", &e)),
        }
    }

    fn symlink(
        &mut self,
        _req: &Request<'_>,
        _parent: u64,
        _link_name: &OsStr,
        _target: &Path,
        reply: ReplyEntry,
    ) {
        reply.error(libc::EPERM);
    }

    fn link(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        _newparent: u64,
        _newname: &OsStr,
        reply: ReplyEntry,
    ) {
        reply.error(libc::EPERM);
    }

    fn rename(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        newparent: u64,
        newname: &OsStr,
        flags: u32,
        reply: ReplyEmpty,
    ) {
        trace!(parent, name = ?name, newparent, newname = ?newname, flags, "rename");
        match NumworksFs::rename(self, parent, name, newparent, newname, flags) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(errno("rename", &e)),
        }
    }

    fn open(&mut self, _req: &Request<'_>, ino: u64, flags: i32, reply: ReplyOpen) {
        trace!(inode = ino, flags, "open");
        match NumworksFs::open(self, ino, flags) {
            Ok(fh) => reply.opened(fh, 0),
            Err(e) => reply.error(errno("open", &e)),
        }
    }

    fn read(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        trace!(inode = ino, fh, offset, size, "read");
        match NumworksFs::read(self, fh, to_offset(offset), size) {
            Ok(data) => reply.data(&data),
            Err(e) => reply.error(errno("read", &e)),
        }
    }

    fn write(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        fh: u64,
        offset: i64,
        data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyWrite,
    ) {
        trace!(inode = ino, fh, offset, len = data.len(), "write");
        match NumworksFs::write(self, fh, to_offset(offset), data) {
            Ok(written) => reply.written(written),
            Err(e) => reply.error(errno("write", &e)),
        }
    }

    fn flush(&mut self, _req: &Request<'_>, ino: u64, fh: u64, _lock_owner: u64, reply: ReplyEmpty) {
        trace!(inode = ino, fh, "flush");
        match NumworksFs::flush(self, fh) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(errno("flush", &e)),
        }
    }

    fn fsync(&mut self, _req: &Request<'_>, ino: u64, fh: u64, _datasync: bool, reply: ReplyEmpty) {
        trace!(inode = ino, fh, "fsync");
        match NumworksFs::flush(self, fh) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(errno("fsync", &e)),
        }
    }

    fn release(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        fh: u64,
        _flags: i32,
        _lock_owner: Option<u64>,
        _flush: bool,
        reply: ReplyEmpty,
    ) {
        trace!(inode = ino, fh, "release");
        match NumworksFs::release(self, fh) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(errno("release", &e)),
        }
    }

    fn opendir(&mut self, _req: &Request<'_>, ino: u64, _flags: i32, reply: ReplyOpen) {
        trace!(inode = ino, "opendir");
        match NumworksFs::getattr(self, ino) {
            Ok(attr) if attr.kind == FileType::Directory => reply.opened(0, 0),
            Ok(_) => reply.error(libc::ENOTDIR),
            Err(e) => reply.error(errno("opendir", &e)),
        }
    }

    fn readdir(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        mut reply: ReplyDirectory,
    ) {
        trace!(inode = ino, offset, "readdir");
        let (entries, parent) = match NumworksFs::readdir(self, ino)
            .and_then(|entries| Ok((entries, self.parent_of(ino)?)))
        {
            Ok(listing) => listing,
            Err(e) => {
                reply.error(errno("readdir", &e));
                return;
            }
        };

        let dots = [(ino, "."), (parent, "..")]
            .into_iter()
            .map(|(ino, name)| (ino, FileType::Directory, name));
        let all = dots.chain(entries.iter().map(|e| (e.ino, e.kind, e.name.as_str())));

        // Offsets are 1-based positions in the name-ordered listing
        #[allow(clippy::cast_possible_truncation)]
        let skip = offset.max(0) as usize;
        for (i, (entry_ino, kind, name)) in all.enumerate().skip(skip) {
            #[allow(clippy::cast_possible_wrap)]
            let next = (i + 1) as i64;
            if reply.add(entry_ino, next, kind, name) {
                break;
            }
        }
        reply.ok();
    }

    fn releasedir(&mut self, _req: &Request<'_>, _ino: u64, _fh: u64, _flags: i32, reply: ReplyEmpty) {
        reply.ok();
    }

    fn statfs(&mut self, _req: &Request<'_>, _ino: u64, reply: ReplyStatfs) {
        trace!("statfs");
        match NumworksFs::statfs(self) {
            Ok(usage) => reply.statfs(
                usage.capacity,       // Total blocks (1 byte each)
                usage.free(),         // Free blocks
                usage.free(),         // Available blocks
                usage.records,        // Files
                0,                    // Free inodes: records are bounded by bytes
                1,                    // Block size
                usage.name_max,       // Max name length
                1,                    // Fragment size
            ),
            Err(e) => reply.error(errno("statfs", &e)),
        }
    }

    fn getxattr(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        _name: &OsStr,
        _size: u32,
        reply: ReplyXattr,
    ) {
        reply.error(libc::ENOTSUP);
    }

    fn listxattr(&mut self, _req: &Request<'_>, _ino: u64, size: u32, reply: ReplyXattr) {
        if size == 0 {
            reply.size(0);
        } else {
            reply.data(&[]);
        }
    }

    fn access(&mut self, _req: &Request<'_>, ino: u64, _mask: i32, reply: ReplyEmpty) {
        match NumworksFs::getattr(self, ino) {
            Ok(_) => reply.ok(),
            Err(e) => reply.error(errno("access", &e)),
        }
    }

    fn create(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        _mode: u32,
        _umask: u32,
        flags: i32,
        reply: ReplyCreate,
    ) {
        trace!(parent, name = ?name, flags, "create");
        match NumworksFs::create(self, parent, name, flags) {
            Ok((attr, fh)) => reply.created(&self.config().attr_ttl, &attr, 0, fh, 0),
            Err(e) => reply.error(errno("create", &e)),
        }
    }

    fn ioctl(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        _flags: u32,
        cmd: u32,
        _in_data: &[u8],
        _out_size: u32,
        reply: ReplyIoctl,
    ) {
        trace!(inode = ino, cmd, "ioctl");
        if cmd == TCGETS {
            reply.ioctl(0, &[]);
        } else {
            reply.error(libc::ENOTTY);
        }
    }
}
