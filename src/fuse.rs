//! ## FUSE Adaptor Module
//!
//! A thin shim between the kernel bridge and the volume.  Each callback
//! resolves its inode to a path, enters the volume under a process-wide
//! reader/writer lock, and converts the structured error to the errno the
//! kernel expects.  Read-only callbacks share the lock; mutating ones
//! (`write`, truncating `setattr`, `create`, `unlink`) hold it exclusively.
//!
//! Failures that are not structured errors must not escape into the
//! bridge's dispatch loop: every volume operation runs under
//! `catch_unwind`, and a panic is logged and reported as EIO.  A lock left
//! poisoned by such a panic is likewise reported as EIO on later calls.
//!
//! Inode scheme: the root is `FUSE_ROOT_ID`; a file's inode is its head
//! entry's directory index plus 2.  The directory is small and flat, so
//! no other bookkeeping is needed.

use std::ffi::OsStr;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, RwLock};
use std::time::{Duration, UNIX_EPOCH};
use fuser::{
    FileAttr, FileType, Filesystem, ReplyAttr, ReplyCreate, ReplyData, ReplyDirectory,
    ReplyEmpty, ReplyEntry, ReplyOpen, ReplyStatfs, ReplyWrite, Request, TimeOrNow,
    FUSE_ROOT_ID,
};
use log::{debug, error};
use crate::fs::FileStat;
use crate::fs::cpm::CpmFs;

const TTL: Duration = Duration::from_secs(1);

pub struct FuseAdaptor {
    volume: Arc<RwLock<CpmFs>>,
    uid: u32,
    gid: u32,
}

fn file_attr(ino: u64, stat: &FileStat, uid: u32, gid: u32) -> FileAttr {
    FileAttr {
        ino,
        size: stat.size,
        blocks: stat.blocks,
        atime: UNIX_EPOCH,
        mtime: UNIX_EPOCH,
        ctime: UNIX_EPOCH,
        crtime: UNIX_EPOCH,
        kind: match stat.directory {
            true => FileType::Directory,
            false => FileType::RegularFile,
        },
        perm: match stat.directory {
            true => 0o755,
            false => 0o644,
        },
        nlink: stat.nlink,
        uid,
        gid,
        rdev: 0,
        blksize: stat.blksize,
        flags: 0,
    }
}

fn path_of(volume: &CpmFs, ino: u64) -> Option<String> {
    if ino == FUSE_ROOT_ID {
        return Some("/".to_string());
    }
    match ino.checked_sub(2) {
        Some(idx) => volume.entry_name(idx as usize).map(|name| format!("/{}", name)),
        None => None,
    }
}

/// Run a volume operation, converting its structured error to the errno
/// and any panic to EIO, so no failure escapes into the bridge's dispatch.
fn catching<T>(op: impl FnOnce() -> Result<T, crate::fs::Error>) -> Result<T, i32> {
    match catch_unwind(AssertUnwindSafe(op)) {
        Ok(result) => result.map_err(|e| e.errno()),
        Err(_) => {
            error!("unexpected failure crossed the adaptor boundary");
            Err(libc::EIO)
        }
    }
}

impl FuseAdaptor {
    pub fn new(volume: Arc<RwLock<CpmFs>>) -> Self {
        Self {
            volume,
            uid: unsafe { libc::getuid() },
            gid: unsafe { libc::getgid() },
        }
    }
}

/// unwrap a lock guard, or report EIO through the given reply and bail
macro_rules! guard {
    ($lock:expr, $reply:expr) => {
        match $lock {
            Ok(g) => g,
            Err(_) => {
                error!("volume lock poisoned");
                $reply.error(libc::EIO);
                return;
            }
        }
    };
}

impl Filesystem for FuseAdaptor {
    fn lookup(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEntry) {
        if parent != FUSE_ROOT_ID {
            reply.error(libc::ENOENT);
            return;
        }
        let name = match name.to_str() {
            Some(n) => n,
            None => {
                reply.error(libc::ENOENT);
                return;
            }
        };
        let volume = guard!(self.volume.read(), reply);
        let path = format!("/{}", name);
        match catching(|| {
            let idx = volume.entry_index(&path)?;
            let stat = volume.getattr(&path)?;
            Ok((idx, stat))
        }) {
            Ok((idx, stat)) => reply.entry(&TTL, &file_attr(idx as u64 + 2, &stat, self.uid, self.gid), 0),
            Err(errno) => reply.error(errno),
        }
    }
    fn getattr(&mut self, _req: &Request<'_>, ino: u64, reply: ReplyAttr) {
        let volume = guard!(self.volume.read(), reply);
        let path = match path_of(&volume, ino) {
            Some(p) => p,
            None => {
                reply.error(libc::ENOENT);
                return;
            }
        };
        match catching(|| volume.getattr(&path)) {
            Ok(stat) => reply.attr(&TTL, &file_attr(ino, &stat, self.uid, self.gid)),
            Err(errno) => reply.error(errno),
        }
    }
    fn setattr(&mut self, _req: &Request<'_>, ino: u64, _mode: Option<u32>, _uid: Option<u32>,
               _gid: Option<u32>, size: Option<u64>, _atime: Option<TimeOrNow>, _mtime: Option<TimeOrNow>,
               _ctime: Option<std::time::SystemTime>, _fh: Option<u64>, _crtime: Option<std::time::SystemTime>,
               _chgtime: Option<std::time::SystemTime>, _bkuptime: Option<std::time::SystemTime>,
               _flags: Option<u32>, reply: ReplyAttr) {
        let mut volume = guard!(self.volume.write(), reply);
        let path = match path_of(&volume, ino) {
            Some(p) => p,
            None => {
                reply.error(libc::ENOENT);
                return;
            }
        };
        match catching(|| {
            if let Some(length) = size {
                debug!("truncate {} to {}", path, length);
                volume.truncate(&path, length)?;
            }
            volume.getattr(&path)
        }) {
            Ok(stat) => reply.attr(&TTL, &file_attr(ino, &stat, self.uid, self.gid)),
            Err(errno) => reply.error(errno),
        }
    }
    fn open(&mut self, _req: &Request<'_>, ino: u64, _flags: i32, reply: ReplyOpen) {
        let volume = guard!(self.volume.read(), reply);
        let path = match path_of(&volume, ino) {
            Some(p) => p,
            None => {
                reply.error(libc::ENOENT);
                return;
            }
        };
        match catching(|| volume.open(&path)) {
            Ok(()) => reply.opened(0, 0),
            Err(errno) => reply.error(errno),
        }
    }
    fn read(&mut self, _req: &Request<'_>, ino: u64, _fh: u64, offset: i64, size: u32,
            _flags: i32, _lock_owner: Option<u64>, reply: ReplyData) {
        let volume = guard!(self.volume.read(), reply);
        let path = match path_of(&volume, ino) {
            Some(p) => p,
            None => {
                reply.error(libc::ENOENT);
                return;
            }
        };
        match catching(|| volume.read(&path, offset.max(0) as u64, size)) {
            Ok(data) => reply.data(&data),
            Err(errno) => reply.error(errno),
        }
    }
    fn write(&mut self, _req: &Request<'_>, ino: u64, _fh: u64, offset: i64, data: &[u8],
             _write_flags: u32, _flags: i32, _lock_owner: Option<u64>, reply: ReplyWrite) {
        let mut volume = guard!(self.volume.write(), reply);
        let path = match path_of(&volume, ino) {
            Some(p) => p,
            None => {
                reply.error(libc::ENOENT);
                return;
            }
        };
        match catching(|| volume.write(&path, offset.max(0) as u64, data)) {
            Ok(n) => reply.written(n as u32),
            Err(errno) => reply.error(errno),
        }
    }
    fn release(&mut self, _req: &Request<'_>, ino: u64, _fh: u64, _flags: i32,
               _lock_owner: Option<u64>, _flush: bool, reply: ReplyEmpty) {
        let volume = guard!(self.volume.read(), reply);
        let path = match path_of(&volume, ino) {
            Some(p) => p,
            None => {
                reply.error(libc::ENOENT);
                return;
            }
        };
        match catching(|| volume.release(&path)) {
            Ok(()) => reply.ok(),
            Err(errno) => reply.error(errno),
        }
    }
    fn statfs(&mut self, _req: &Request<'_>, _ino: u64, reply: ReplyStatfs) {
        let volume = guard!(self.volume.read(), reply);
        match catching(|| volume.statfs("/")) {
            Ok(stat) => reply.statfs(
                stat.blocks,
                stat.blocks_free,
                stat.blocks_free,
                stat.files,
                stat.files_free,
                stat.block_size,
                stat.name_max,
                stat.block_size,
            ),
            Err(errno) => reply.error(errno),
        }
    }
    fn readdir(&mut self, _req: &Request<'_>, ino: u64, _fh: u64, offset: i64, mut reply: ReplyDirectory) {
        if ino != FUSE_ROOT_ID {
            reply.error(libc::ENOENT);
            return;
        }
        let volume = guard!(self.volume.read(), reply);
        let listing = match catching(|| volume.readdir("/")) {
            Ok(l) => l,
            Err(errno) => {
                reply.error(errno);
                return;
            }
        };
        let mut rows: Vec<(u64, FileType, String)> = vec![
            (FUSE_ROOT_ID, FileType::Directory, ".".to_string()),
            (FUSE_ROOT_ID, FileType::Directory, "..".to_string()),
        ];
        for (idx, name, _stat) in listing {
            rows.push((idx as u64 + 2, FileType::RegularFile, name));
        }
        for (i, (ino, kind, name)) in rows.iter().enumerate().skip(offset.max(0) as usize) {
            if reply.add(*ino, (i + 1) as i64, *kind, name) {
                break;
            }
        }
        reply.ok();
    }
    fn create(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, _mode: u32,
              _umask: u32, _flags: i32, reply: ReplyCreate) {
        if parent != FUSE_ROOT_ID {
            reply.error(libc::ENOENT);
            return;
        }
        let name = match name.to_str() {
            Some(n) => n,
            None => {
                reply.error(libc::ENOENT);
                return;
            }
        };
        let mut volume = guard!(self.volume.write(), reply);
        let path = format!("/{}", name);
        match catching(|| {
            volume.create(&path)?;
            let idx = volume.entry_index(&path)?;
            let stat = volume.getattr(&path)?;
            Ok((idx, stat))
        }) {
            Ok((idx, stat)) => reply.created(&TTL, &file_attr(idx as u64 + 2, &stat, self.uid, self.gid), 0, 0, 0),
            Err(errno) => reply.error(errno),
        }
    }
    fn unlink(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        if parent != FUSE_ROOT_ID {
            reply.error(libc::ENOENT);
            return;
        }
        let name = match name.to_str() {
            Some(n) => n,
            None => {
                reply.error(libc::ENOENT);
                return;
            }
        };
        let mut volume = guard!(self.volume.write(), reply);
        let path = format!("/{}", name);
        match catching(|| volume.unlink(&path)) {
            Ok(()) => reply.ok(),
            Err(errno) => reply.error(errno),
        }
    }
}
