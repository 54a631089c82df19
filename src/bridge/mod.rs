//! Translation of native FUSE upcalls into operations on the backing tree.
//!
//! The bridge owns the locking policy and nothing else: every upcall resolves
//! its inode to a path, takes the path/data lock combination appropriate for
//! the operation and delegates the actual work to the
//! [`FilesystemOperations`] object. Lock handles are released strictly in
//! reverse acquisition order when the upcall returns.

pub mod inode;

use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use fuser::{
    FileAttr, FileType as FuseFileType, Filesystem, ReplyAttr, ReplyCreate, ReplyData,
    ReplyDirectory, ReplyEmpty, ReplyEntry, ReplyOpen, ReplyWrite, Request, TimeOrNow,
};
use parking_lot::{RwLock, RwLockReadGuard};
use tracing::{debug, error, trace};

use crate::error::FsError;
use crate::locks::{DataLock, LockManager, PathLock};
use crate::ops::{FileKind, FilesystemOperations, Metadata};

use self::inode::{InodeTable, ROOT_INODE};

/// TTL for attributes reported to the kernel (1 second)
const ATTR_TTL: Duration = Duration::from_secs(1);

/// Generation number (not used, always 0)
const GENERATION: u64 = 0;

/// Block size for reporting
const BLOCK_SIZE: u32 = 4096;

fn to_fuse_file_type(kind: FileKind) -> FuseFileType {
    match kind {
        FileKind::File => FuseFileType::RegularFile,
        FileKind::Directory => FuseFileType::Directory,
    }
}

fn metadata_to_attr(ino: u64, meta: &Metadata, uid: u32, gid: u32) -> FileAttr {
    let kind = to_fuse_file_type(meta.kind);
    let perm = meta.mode_or_default() as u16;
    let nlink = if meta.is_dir() { 2 } else { 1 };
    let blocks = meta.size.div_ceil(BLOCK_SIZE as u64);

    FileAttr {
        ino,
        size: meta.size,
        blocks,
        atime: meta.mtime,
        mtime: meta.mtime,
        ctime: meta.mtime,
        crtime: meta.mtime,
        kind,
        perm,
        nlink,
        uid,
        gid,
        rdev: 0,
        blksize: BLOCK_SIZE,
        flags: 0,
    }
}

/// Lock-map key for a tree path.
fn lock_key(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// FUSE filesystem implementation that guards a [`FilesystemOperations`]
/// object with the hierarchical lock manager.
///
/// The bridge is handed to the native session at mount time and lives on the
/// session's worker threads for the whole duration of the mount.
pub struct AdapterBridge {
    fs: Arc<dyn FilesystemOperations>,
    locks: LockManager,
    /// Reader/writer exclusion for the root directory itself. The lock map
    /// cannot key the root (its component sequence is empty), so listings of
    /// the root read-lock here while root-level mutations write-lock here,
    /// giving the root the same serialization every other directory gets
    /// from its path-lock entry. Mutations take this lock before any path
    /// lock; readers of the root take nothing else.
    root_lock: RwLock<()>,
    inodes: InodeTable,
    read_only: bool,
    /// User ID to report for all files (process uid)
    uid: u32,
    /// Group ID to report for all files (process gid)
    gid: u32,
}

impl AdapterBridge {
    pub fn new(fs: Arc<dyn FilesystemOperations>, read_only: bool) -> Self {
        let uid = unsafe { libc::getuid() };
        let gid = unsafe { libc::getgid() };
        Self {
            fs,
            locks: LockManager::new(),
            root_lock: RwLock::new(()),
            inodes: InodeTable::new(),
            read_only,
            uid,
            gid,
        }
    }

    fn path_for(&self, ino: u64) -> Result<PathBuf, i32> {
        self.inodes.path_of(ino).ok_or(libc::ENOENT)
    }

    fn check_writable(&self) -> Result<(), i32> {
        if self.read_only {
            return Err(libc::EROFS);
        }
        Ok(())
    }

    /// Read lock for an upcall target: the path lock for normal targets, or
    /// a read lock on [`AdapterBridge::root_lock`] when the target is the
    /// root itself (which the lock map cannot key).
    fn read_lock(&self, path: &Path) -> ReadScope<'_> {
        if path.parent().is_none() {
            ReadScope::Root(self.root_lock.read())
        } else {
            ReadScope::Path(self.locks.lock_path_for_reading(&lock_key(path)))
        }
    }

    /// Runs `f` under the lock regime for mutating a directory entry: write
    /// lock on the parent path, read lock on the target, and a data write
    /// lock on the target when the entry carries content. Entries directly
    /// under the root write-lock the bridge's root lock in place of a parent
    /// path lock, then write-lock the target itself.
    fn with_mutation_locks<T>(&self, parent: &Path, name: &OsStr, data_write: bool, f: impl FnOnce() -> T) -> T {
        let target = parent.join(name);
        if parent.parent().is_none() {
            let _root = self.root_lock.write();
            let lock = self.locks.lock_path_for_writing(&lock_key(&target));
            let _data = data_write.then(|| lock.lock_data_for_writing());
            f()
        } else {
            let parent_lock = self.locks.lock_path_for_writing(&lock_key(parent));
            let target_lock = parent_lock.lock_child_for_reading(&name.to_string_lossy());
            let _data = data_write.then(|| target_lock.lock_data_for_writing());
            f()
        }
    }
}

/// Held lock scope of a read-type upcall.
enum ReadScope<'a> {
    Root(RwLockReadGuard<'a, ()>),
    Path(PathLock<'a>),
}

impl ReadScope<'_> {
    /// Read-locks the target's data entry; the root carries no data.
    fn lock_data_for_reading(&self) -> Option<DataLock<'_>> {
        match self {
            ReadScope::Path(lock) => Some(lock.lock_data_for_reading()),
            ReadScope::Root(_) => None,
        }
    }

    /// Write-locks the target's data entry; the root carries no data.
    fn lock_data_for_writing(&self) -> Option<DataLock<'_>> {
        match self {
            ReadScope::Path(lock) => Some(lock.lock_data_for_writing()),
            ReadScope::Root(_) => None,
        }
    }
}

impl Filesystem for AdapterBridge {
    fn lookup(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEntry) {
        let parent_path = match self.path_for(parent) {
            Ok(p) => p,
            Err(e) => {
                reply.error(e);
                return;
            }
        };

        let path = parent_path.join(name);
        trace!("lookup: {:?}", path);

        let result = {
            let _path_lock = self.locks.lock_path_for_reading(&lock_key(&path));
            self.fs.lookup(&path)
        };
        match result {
            Ok(meta) => {
                let ino = self.inodes.assign(&path);
                let attr = metadata_to_attr(ino, &meta, self.uid, self.gid);
                reply.entry(&ATTR_TTL, &attr, GENERATION);
            }
            Err(FsError::NotFound(_)) => {
                reply.error(libc::ENOENT);
            }
            Err(e) => {
                error!("lookup error for {:?}: {}", path, e);
                reply.error(e.to_errno());
            }
        }
    }

    fn getattr(&mut self, _req: &Request<'_>, ino: u64, reply: ReplyAttr) {
        let path = match self.path_for(ino) {
            Ok(p) => p,
            Err(e) => {
                reply.error(e);
                return;
            }
        };

        trace!("getattr: {:?} (ino={})", path, ino);

        let result = {
            let _scope = self.read_lock(&path);
            self.fs.getattr(&path)
        };
        match result {
            Ok(meta) => {
                let attr = metadata_to_attr(ino, &meta, self.uid, self.gid);
                reply.attr(&ATTR_TTL, &attr);
            }
            Err(e) => {
                debug!("getattr error for {:?}: {}", path, e);
                reply.error(e.to_errno());
            }
        }
    }

    fn setattr(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _mode: Option<u32>,
        _uid: Option<u32>,
        _gid: Option<u32>,
        size: Option<u64>,
        _atime: Option<TimeOrNow>,
        _mtime: Option<TimeOrNow>,
        _ctime: Option<SystemTime>,
        _fh: Option<u64>,
        _crtime: Option<SystemTime>,
        _chgtime: Option<SystemTime>,
        _bkuptime: Option<SystemTime>,
        _flags: Option<u32>,
        reply: ReplyAttr,
    ) {
        let path = match self.path_for(ino) {
            Ok(p) => p,
            Err(e) => {
                reply.error(e);
                return;
            }
        };

        // Only size changes are meaningful to the backing tree.
        if let Some(new_size) = size {
            if let Err(e) = self.check_writable() {
                reply.error(e);
                return;
            }

            trace!("setattr truncate: {:?} to {} bytes", path, new_size);

            let result = {
                let path_lock = self.locks.lock_path_for_reading(&lock_key(&path));
                let _data_lock = path_lock.lock_data_for_writing();
                self.fs.truncate(&path, new_size).and_then(|()| self.fs.getattr(&path))
            };
            match result {
                Ok(meta) => {
                    let attr = metadata_to_attr(ino, &meta, self.uid, self.gid);
                    reply.attr(&ATTR_TTL, &attr);
                }
                Err(e) => {
                    error!("setattr error for ino {}: {}", ino, e);
                    reply.error(e.to_errno());
                }
            }
            return;
        }

        // No changes requested, just return current attributes
        self.getattr(_req, ino, reply);
    }

    fn open(&mut self, _req: &Request<'_>, ino: u64, _flags: i32, reply: ReplyOpen) {
        let path = match self.path_for(ino) {
            Ok(p) => p,
            Err(e) => {
                reply.error(e);
                return;
            }
        };

        trace!("open: {:?}", path);

        let result = {
            let scope = self.read_lock(&path);
            let _data_lock = scope.lock_data_for_reading();
            self.fs.open(&path)
        };
        match result {
            Ok(()) => reply.opened(0, 0),
            Err(e) => {
                error!("open error for {:?}: {}", path, e);
                reply.error(e.to_errno());
            }
        }
    }

    fn release(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        _flags: i32,
        _lock_owner: Option<u64>,
        _flush: bool,
        reply: ReplyEmpty,
    ) {
        // The entry may already be gone if it was unlinked while open.
        let Some(path) = self.inodes.path_of(ino) else {
            reply.ok();
            return;
        };

        trace!("release: {:?}", path);

        let result = {
            let _scope = self.read_lock(&path);
            self.fs.release(&path)
        };
        match result {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn read(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        let path = match self.path_for(ino) {
            Ok(p) => p,
            Err(e) => {
                reply.error(e);
                return;
            }
        };

        trace!("read: {:?} offset={} size={}", path, offset, size);

        let result = {
            let path_lock = self.locks.lock_path_for_reading(&lock_key(&path));
            let _data_lock = path_lock.lock_data_for_reading();
            self.fs.read(&path, offset as u64, size)
        };
        match result {
            Ok(data) => reply.data(&data),
            Err(e) => {
                error!("read error for {:?}: {}", path, e);
                reply.error(e.to_errno());
            }
        }
    }

    fn write(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyWrite,
    ) {
        if let Err(e) = self.check_writable() {
            reply.error(e);
            return;
        }

        let path = match self.path_for(ino) {
            Ok(p) => p,
            Err(e) => {
                reply.error(e);
                return;
            }
        };

        trace!("write: {:?} offset={} size={}", path, offset, data.len());

        let result = {
            let path_lock = self.locks.lock_path_for_reading(&lock_key(&path));
            let _data_lock = path_lock.lock_data_for_writing();
            self.fs.write(&path, offset as u64, data)
        };
        match result {
            Ok(written) => reply.written(written as u32),
            Err(e) => {
                error!("write error for {:?}: {}", path, e);
                reply.error(e.to_errno());
            }
        }
    }

    fn create(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        umask: u32,
        _flags: i32,
        reply: ReplyCreate,
    ) {
        if let Err(e) = self.check_writable() {
            reply.error(e);
            return;
        }

        let parent_path = match self.path_for(parent) {
            Ok(p) => p,
            Err(e) => {
                reply.error(e);
                return;
            }
        };

        let path = parent_path.join(name);
        let effective_mode = (mode & !umask) & 0o7777;
        debug!("create: {:?} mode={:o}", path, effective_mode);

        let result = self.with_mutation_locks(&parent_path, name, true, || {
            self.fs.create(&path, effective_mode)?;
            self.fs.getattr(&path)
        });
        match result {
            Ok(meta) => {
                let ino = self.inodes.assign(&path);
                let attr = metadata_to_attr(ino, &meta, self.uid, self.gid);
                reply.created(&ATTR_TTL, &attr, GENERATION, 0, 0);
            }
            Err(e) => {
                error!("create error for {:?}: {}", path, e);
                reply.error(e.to_errno());
            }
        }
    }

    fn mkdir(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        umask: u32,
        reply: ReplyEntry,
    ) {
        if let Err(e) = self.check_writable() {
            reply.error(e);
            return;
        }

        let parent_path = match self.path_for(parent) {
            Ok(p) => p,
            Err(e) => {
                reply.error(e);
                return;
            }
        };

        let path = parent_path.join(name);
        let effective_mode = (mode & !umask) & 0o7777;
        debug!("mkdir: {:?} mode={:o}", path, effective_mode);

        let result = self.with_mutation_locks(&parent_path, name, false, || {
            self.fs.mkdir(&path, effective_mode)?;
            self.fs.getattr(&path)
        });
        match result {
            Ok(meta) => {
                let ino = self.inodes.assign(&path);
                let attr = metadata_to_attr(ino, &meta, self.uid, self.gid);
                reply.entry(&ATTR_TTL, &attr, GENERATION);
            }
            Err(e) => {
                error!("mkdir error for {:?}: {}", path, e);
                reply.error(e.to_errno());
            }
        }
    }

    fn unlink(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        if let Err(e) = self.check_writable() {
            reply.error(e);
            return;
        }

        let parent_path = match self.path_for(parent) {
            Ok(p) => p,
            Err(e) => {
                reply.error(e);
                return;
            }
        };

        let path = parent_path.join(name);
        debug!("unlink: {:?}", path);

        let result = self.with_mutation_locks(&parent_path, name, true, || self.fs.unlink(&path));
        match result {
            Ok(()) => {
                self.inodes.forget_subtree(&path);
                reply.ok();
            }
            Err(e) => {
                error!("unlink error for {:?}: {}", path, e);
                reply.error(e.to_errno());
            }
        }
    }

    fn rmdir(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        if let Err(e) = self.check_writable() {
            reply.error(e);
            return;
        }

        let parent_path = match self.path_for(parent) {
            Ok(p) => p,
            Err(e) => {
                reply.error(e);
                return;
            }
        };

        let path = parent_path.join(name);
        debug!("rmdir: {:?}", path);

        let result = self.with_mutation_locks(&parent_path, name, false, || self.fs.rmdir(&path));
        match result {
            Ok(()) => {
                self.inodes.forget_subtree(&path);
                reply.ok();
            }
            Err(e) => {
                error!("rmdir error for {:?}: {}", path, e);
                reply.error(e.to_errno());
            }
        }
    }

    fn rename(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        newparent: u64,
        newname: &OsStr,
        _flags: u32,
        reply: ReplyEmpty,
    ) {
        if let Err(e) = self.check_writable() {
            reply.error(e);
            return;
        }

        let parent_path = match self.path_for(parent) {
            Ok(p) => p,
            Err(e) => {
                reply.error(e);
                return;
            }
        };

        let new_parent_path = match self.path_for(newparent) {
            Ok(p) => p,
            Err(e) => {
                reply.error(e);
                return;
            }
        };

        let old_path = parent_path.join(name);
        let new_path = new_parent_path.join(newname);
        debug!("rename: {:?} -> {:?}", old_path, new_path);

        if old_path == new_path {
            reply.ok();
            return;
        }
        // A path cannot be moved into (or onto) its own subtree, and the
        // pair lock's total order cannot express such a pair anyway.
        if old_path.starts_with(&new_path) || new_path.starts_with(&old_path) {
            reply.error(libc::EINVAL);
            return;
        }

        let result = {
            let pair = self
                .locks
                .lock_pair_for_writing(&lock_key(&old_path), &lock_key(&new_path));
            let _src_data = pair.lock_source_data_for_writing();
            let _dst_data = pair.lock_target_data_for_writing();
            self.fs.rename(&old_path, &new_path)
        };
        match result {
            Ok(()) => {
                self.inodes.rename_subtree(&old_path, &new_path);
                reply.ok();
            }
            Err(e) => {
                error!("rename error {:?} -> {:?}: {}", old_path, new_path, e);
                reply.error(e.to_errno());
            }
        }
    }

    fn opendir(&mut self, _req: &Request<'_>, _ino: u64, _flags: i32, reply: ReplyOpen) {
        // Stateless - just return success
        reply.opened(0, 0);
    }

    fn releasedir(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        _fh: u64,
        _flags: i32,
        reply: ReplyEmpty,
    ) {
        // Stateless - nothing to do
        reply.ok();
    }

    fn readdir(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        mut reply: ReplyDirectory,
    ) {
        let path = match self.path_for(ino) {
            Ok(p) => p,
            Err(e) => {
                reply.error(e);
                return;
            }
        };

        trace!("readdir: {:?} offset={}", path, offset);

        let entries = {
            let _scope = self.read_lock(&path);
            self.fs.readdir(&path)
        };
        let entries = match entries {
            Ok(entries) => entries,
            Err(e) => {
                error!("readdir error for {:?}: {}", path, e);
                reply.error(e.to_errno());
                return;
            }
        };

        // Add . and ..
        let mut idx = 0i64;

        if offset <= idx && reply.add(ino, idx + 1, FuseFileType::Directory, ".") {
            reply.ok();
            return;
        }
        idx += 1;

        if offset <= idx {
            let parent_ino = if ino == ROOT_INODE {
                ROOT_INODE
            } else {
                path.parent()
                    .and_then(|p| self.inodes.inode_of(p))
                    .unwrap_or(ROOT_INODE)
            };
            if reply.add(parent_ino, idx + 1, FuseFileType::Directory, "..") {
                reply.ok();
                return;
            }
        }
        idx += 1;

        for entry in entries {
            if offset <= idx {
                let entry_path = path.join(&entry.name);
                let entry_ino = self.inodes.assign(&entry_path);
                let ft = to_fuse_file_type(entry.kind);

                if reply.add(entry_ino, idx + 1, ft, &entry.name) {
                    // Buffer full
                    reply.ok();
                    return;
                }
            }
            idx += 1;
        }

        reply.ok();
    }

    fn fsync(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        _datasync: bool,
        reply: ReplyEmpty,
    ) {
        let path = match self.path_for(ino) {
            Ok(p) => p,
            Err(e) => {
                reply.error(e);
                return;
            }
        };

        trace!("fsync: {:?}", path);

        let result = {
            let scope = self.read_lock(&path);
            let _data_lock = scope.lock_data_for_writing();
            self.fs.fsync(&path)
        };
        match result {
            Ok(()) => reply.ok(),
            Err(e) => {
                error!("fsync error for {:?}: {}", path, e);
                reply.error(e.to_errno());
            }
        }
    }

    fn flush(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        _lock_owner: u64,
        reply: ReplyEmpty,
    ) {
        let path = match self.path_for(ino) {
            Ok(p) => p,
            Err(e) => {
                reply.error(e);
                return;
            }
        };

        trace!("flush: {:?}", path);

        let result = {
            let scope = self.read_lock(&path);
            let _data_lock = scope.lock_data_for_writing();
            self.fs.fsync(&path)
        };
        match result {
            Ok(()) => reply.ok(),
            Err(e) => {
                error!("flush error for {:?}: {}", path, e);
                reply.error(e.to_errno());
            }
        }
    }

    fn statfs(&mut self, _req: &Request<'_>, ino: u64, reply: fuser::ReplyStatfs) {
        let path = match self.path_for(ino) {
            Ok(p) => p,
            Err(e) => {
                reply.error(e);
                return;
            }
        };

        let result = {
            let _scope = self.read_lock(&path);
            self.fs.statfs(&path)
        };
        match result {
            Ok(stats) => reply.statfs(
                stats.blocks,
                stats.blocks_free,
                stats.blocks_available,
                stats.files,
                stats.files_free,
                stats.block_size,
                stats.name_len,
                stats.fragment_size,
            ),
            Err(e) => reply.error(e.to_errno()),
        }
    }
}
