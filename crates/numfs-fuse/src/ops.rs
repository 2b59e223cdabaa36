//! Filesystem operations on top of the storage tree and the device session.
//!
//! [`NumworksFs`] implements the POSIX operation set addressed by inode and
//! file handle, returning [`FuseResult`]. The `fuser` adapter in
//! [`filesystem`](crate::filesystem) only translates replies, so everything
//! here can be driven directly in tests.
//!
//! Metadata operations (`lookup`, `getattr`, `readdir`) are served from the
//! cached tree and never wait on the device. Everything else goes through
//! the session. Any device-lost error is escalated with
//! [`Session::report_failure`], after which every operation fails with `EIO`.

use crate::config::MountConfig;
use crate::error::{FuseError, FuseResult};
use crate::handles::{HandleTable, OpenHandle, WriteBuffer, check_record_size, slice_window};
use fuser::{FileAttr, FileType};
use numfs_core::names::{MAX_ESCAPED_NAME_LEN, MAX_NAME_LEN};
use numfs_core::record::extension;
use numfs_core::{
    Connection, EntryKind, RecordKey, Session, StorageTree, TransportError, TreeEntry, TreeError,
};
use parking_lot::{Mutex, RwLock};
use std::ffi::OsStr;
use std::sync::Arc;
use std::time::SystemTime;
use tracing::{debug, info, trace, warn};

/// Block size reported in attributes.
const BLOCK_SIZE: u32 = 512;

const FILE_PERM: u16 = 0o644;
const DIR_PERM: u16 = 0o755;
const READ_ONLY_FILE_PERM: u16 = 0o444;
const READ_ONLY_DIR_PERM: u16 = 0o555;

/// `renameat2` flag: fail if the target exists.
pub const RENAME_NOREPLACE: u32 = 1;

/// One directory listing entry, without `.` and `..`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub ino: u64,
    pub kind: FileType,
    pub name: String,
}

/// Storage usage reported by `statfs`, in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StorageUsage {
    pub capacity: u64,
    pub used: u64,
    pub records: u64,
    pub name_max: u32,
}

impl StorageUsage {
    pub fn free(&self) -> u64 {
        self.capacity.saturating_sub(self.used)
    }
}

/// The calculator storage as a filesystem.
pub struct NumworksFs {
    session: Arc<Session>,
    /// Last observed device state; replaced wholesale on every refresh.
    tree: RwLock<Arc<StorageTree>>,
    /// Orders refreshes so an older listing never replaces a newer one.
    refresh_lock: Mutex<()>,
    handles: HandleTable,
    config: MountConfig,
    mounted_at: SystemTime,
}

impl std::fmt::Debug for NumworksFs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NumworksFs")
            .field("session", &self.session)
            .field("open_handles", &self.handles.len())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

fn fs_name(name: &OsStr) -> FuseResult<&str> {
    let name = name
        .to_str()
        .ok_or_else(|| TreeError::InvalidName(name.to_string_lossy().into_owned()))?;
    if name.len() > MAX_ESCAPED_NAME_LEN {
        return Err(TreeError::NameTooLong(name.len()).into());
    }
    Ok(name)
}

impl NumworksFs {
    /// Creates the filesystem with an empty tree. Call [`refresh`](Self::refresh)
    /// before mounting to load the device listing.
    pub fn new(session: Arc<Session>, config: MountConfig) -> Self {
        Self {
            session,
            tree: RwLock::new(Arc::new(StorageTree::empty())),
            refresh_lock: Mutex::new(()),
            handles: HandleTable::new(),
            config,
            mounted_at: SystemTime::now(),
        }
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub fn config(&self) -> &MountConfig {
        &self.config
    }

    /// Current tree snapshot.
    pub fn tree(&self) -> Arc<StorageTree> {
        Arc::clone(&self.tree.read())
    }

    pub fn open_handles(&self) -> usize {
        self.handles.len()
    }

    // ---- device plumbing ----

    /// Runs a device call, escalating device loss to the session.
    fn device<T, F>(&self, op: &'static str, f: F) -> FuseResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut dyn Connection) -> Result<T, TransportError> + Send + 'static,
    {
        self.session.call(op, f).map_err(|e| {
            if e.is_device_lost() {
                self.session.report_failure(&e);
            }
            FuseError::from(e)
        })
    }

    fn check_alive(&self) -> FuseResult<()> {
        Ok(self.session.check_alive()?)
    }

    fn check_writable(&self) -> FuseResult<()> {
        if self.config.read_only {
            return Err(FuseError::ReadOnly);
        }
        Ok(())
    }

    /// Reloads the listing from the device and swaps in a rebuilt tree.
    pub fn refresh(&self) -> FuseResult<()> {
        self.refresh_with(&[])
    }

    fn refresh_with(&self, moved: &[(RecordKey, RecordKey)]) -> FuseResult<()> {
        let _ordered = self.refresh_lock.lock();
        let listing = self.device("list", |conn| conn.list())?;
        let next = self.tree().rebuild(listing, moved);
        debug!(records = next.record_count(), "storage tree rebuilt");
        *self.tree.write() = Arc::new(next);
        Ok(())
    }

    /// Runs `attempt` for `key`; on `RecordNotFound`, refreshes and retries once
    /// if the record is still listed.
    fn retry_stale<T>(
        &self,
        key: &RecordKey,
        mut attempt: impl FnMut(&RecordKey) -> FuseResult<T>,
    ) -> FuseResult<T> {
        match attempt(key) {
            Err(FuseError::Transport(TransportError::RecordNotFound(_))) => {
                debug!(key = %key, "record missing on device, refreshing tree");
                self.refresh()?;
                if self.tree().ino_of(key).is_none() {
                    return Err(TransportError::RecordNotFound(key.clone()).into());
                }
                attempt(key)
            }
            other => other,
        }
    }

    fn read_record(&self, key: &RecordKey) -> FuseResult<Vec<u8>> {
        self.retry_stale(key, |key| {
            let key = key.clone();
            self.device("read", move |conn| conn.read(&key))
        })
    }

    fn write_record(&self, key: &RecordKey, content: Vec<u8>) -> FuseResult<()> {
        let key = key.clone();
        self.device("write", move |conn| conn.write(&key, &content))
    }

    fn delete_record(&self, key: &RecordKey) -> FuseResult<()> {
        self.retry_stale(key, |key| {
            let key = key.clone();
            self.device("delete", move |conn| conn.delete(&key))
        })
    }

    // ---- attributes ----

    fn make_attr(&self, entry: &TreeEntry) -> FileAttr {
        let (kind, perm, nlink, size) = if entry.is_dir() {
            let perm = if self.config.read_only {
                READ_ONLY_DIR_PERM
            } else {
                DIR_PERM
            };
            (FileType::Directory, perm, 2, 0)
        } else {
            let perm = if self.config.read_only {
                READ_ONLY_FILE_PERM
            } else {
                FILE_PERM
            };
            let size = self
                .handles
                .pending_size(entry.ino)
                .unwrap_or_else(|| entry.size());
            (FileType::RegularFile, perm, 1, size)
        };
        FileAttr {
            ino: entry.ino,
            size,
            blocks: size.div_ceil(u64::from(BLOCK_SIZE)),
            atime: self.mounted_at,
            mtime: self.mounted_at,
            ctime: self.mounted_at,
            crtime: self.mounted_at,
            kind,
            perm,
            nlink,
            uid: self.config.uid,
            gid: self.config.gid,
            rdev: 0,
            blksize: BLOCK_SIZE,
            flags: 0,
        }
    }

    fn attr_of(&self, ino: u64) -> FuseResult<FileAttr> {
        let tree = self.tree();
        let entry = tree.get(ino).ok_or(FuseError::InvalidInode(ino))?;
        Ok(self.make_attr(entry))
    }

    /// Looks up the record behind a file inode.
    fn record_key(&self, ino: u64) -> FuseResult<RecordKey> {
        let tree = self.tree();
        let entry = tree.get(ino).ok_or(FuseError::InvalidInode(ino))?;
        match &entry.kind {
            EntryKind::Record(record) => Ok(record.key.clone()),
            _ => Err(FuseError::IsDirectory(ino)),
        }
    }

    // ---- metadata operations ----

    pub fn lookup(&self, parent: u64, name: &OsStr) -> FuseResult<FileAttr> {
        self.check_alive()?;
        let name = fs_name(name)?;
        let tree = self.tree();
        let entry = tree.lookup(parent, name)?;
        Ok(self.make_attr(entry))
    }

    pub fn getattr(&self, ino: u64) -> FuseResult<FileAttr> {
        self.check_alive()?;
        self.attr_of(ino)
    }

    /// Parent inode of a directory, for `..`.
    pub fn parent_of(&self, ino: u64) -> FuseResult<u64> {
        let tree = self.tree();
        let entry = tree.get(ino).ok_or(FuseError::InvalidInode(ino))?;
        Ok(entry.parent)
    }

    /// Lists a directory's children, name-ascending.
    pub fn readdir(&self, ino: u64) -> FuseResult<Vec<DirEntry>> {
        self.check_alive()?;
        let tree = self.tree();
        Ok(tree
            .children(ino)?
            .into_iter()
            .map(|entry| DirEntry {
                ino: entry.ino,
                kind: if entry.is_dir() {
                    FileType::Directory
                } else {
                    FileType::RegularFile
                },
                name: entry.name.clone(),
            })
            .collect())
    }

    pub fn statfs(&self) -> FuseResult<StorageUsage> {
        self.check_alive()?;
        let info = self.device("storage_info", |conn| conn.storage_info())?;
        let tree = self.tree();
        Ok(StorageUsage {
            capacity: info.capacity,
            used: tree.used_bytes(),
            records: tree.record_count() as u64,
            name_max: u32::try_from(MAX_NAME_LEN).unwrap_or(u32::MAX),
        })
    }

    // ---- file operations ----

    /// Opens a record and returns a new file handle.
    pub fn open(&self, ino: u64, flags: i32) -> FuseResult<u64> {
        self.check_alive()?;
        let key = self.record_key(ino)?;
        let writable = (flags & libc::O_ACCMODE) != libc::O_RDONLY;

        let handle = if writable {
            self.check_writable()?;
            let buffer = if flags & libc::O_TRUNC != 0 {
                WriteBuffer::new_for_create()
            } else {
                WriteBuffer::new(self.read_record(&key)?)
            };
            OpenHandle::writer(ino, key, buffer)
        } else {
            self.session.ensure_connected()?;
            OpenHandle::reader(ino, key)
        };

        let fh = self.handles.insert_auto(handle);
        trace!(inode = ino, fh, writable, "open");
        Ok(fh)
    }

    /// Reads up to `size` bytes at `offset`. Short reads only happen at end of record.
    pub fn read(&self, fh: u64, offset: u64, size: u32) -> FuseResult<Vec<u8>> {
        self.check_alive()?;
        let size = size as usize;

        let (key, snapshot) = {
            let handle = self.handles.get(fh).ok_or(FuseError::InvalidHandle(fh))?;
            if let Some(buffer) = &handle.buffer {
                return Ok(buffer.read(offset, size).to_vec());
            }
            (handle.key.clone(), handle.snapshot.clone())
        };

        let content = match snapshot {
            Some(content) => content,
            None => {
                let content = Arc::new(self.read_record(&key)?);
                if let Some(mut handle) = self.handles.get_mut(fh) {
                    handle.snapshot = Some(Arc::clone(&content));
                }
                content
            }
        };
        Ok(slice_window(&content, offset, size).to_vec())
    }

    /// Buffers a write. Nothing reaches the device before flush/release.
    pub fn write(&self, fh: u64, offset: u64, data: &[u8]) -> FuseResult<u32> {
        self.check_alive()?;
        let mut handle = self.handles.get_mut(fh).ok_or(FuseError::InvalidHandle(fh))?;
        let buffer = handle
            .buffer
            .as_mut()
            .ok_or(FuseError::InvalidHandle(fh))?;
        let written = buffer.write(offset, data)?;
        trace!(fh, offset, len = written, "buffered write");
        Ok(u32::try_from(written).unwrap_or(u32::MAX))
    }

    /// Writes a dirty buffer back to the device as one record write.
    pub fn flush(&self, fh: u64) -> FuseResult<()> {
        self.check_alive()?;
        let (ino, key, content) = {
            let handle = self.handles.get(fh).ok_or(FuseError::InvalidHandle(fh))?;
            let Some(buffer) = handle.buffer.as_ref().filter(|b| b.is_dirty()) else {
                return Ok(());
            };
            (handle.ino, handle.key.clone(), buffer.content().to_vec())
        };

        if self.tree().get(ino).is_none() {
            debug!(fh, key = %key, "record was removed while open, discarding buffer");
            self.mark_clean(fh);
            return Ok(());
        }

        let len = content.len();
        self.write_record(&key, content)?;
        self.mark_clean(fh);
        debug!(fh, key = %key, len, "flushed record");
        self.refresh()
    }

    fn mark_clean(&self, fh: u64) {
        if let Some(buffer) = self
            .handles
            .get_mut(fh)
            .as_deref_mut()
            .and_then(|h| h.buffer.as_mut())
        {
            buffer.mark_clean();
        }
    }

    /// Flushes and drops the handle. The handle is gone even if the flush fails.
    pub fn release(&self, fh: u64) -> FuseResult<()> {
        let result = match self.handles.get(fh) {
            Some(handle) if handle.is_dirty() => {
                drop(handle);
                self.flush(fh)
            }
            Some(_) => Ok(()),
            None => Err(FuseError::InvalidHandle(fh)),
        };
        self.handles.remove(fh);
        result
    }

    // ---- namespace operations ----

    /// Writes an empty placeholder record for `name` and returns its tree entry.
    ///
    /// An existing entry is returned as is (with `false`) unless `exclusive`.
    fn create_record(
        &self,
        parent: u64,
        name: &OsStr,
        exclusive: bool,
    ) -> FuseResult<(FileAttr, RecordKey, bool)> {
        self.check_alive()?;
        self.check_writable()?;
        let name = fs_name(name)?;
        let tree = self.tree();

        if let Ok(existing) = tree.lookup(parent, name) {
            if exclusive {
                return Err(FuseError::AlreadyExists(name.to_string()));
            }
            let key = self.record_key(existing.ino)?;
            return Ok((self.make_attr(existing), key, false));
        }

        let key = tree.key_for_child(parent, name)?;
        if !self.config.may_create(&key.name) {
            return Err(FuseError::NotPermitted(format!(
                "cannot create {key}: allowed extensions are {:?}",
                self.config.writable_extensions
            )));
        }
        drop(tree);

        self.write_record(&key, Vec::new())?;
        self.refresh()?;
        let tree = self.tree();
        let ino = tree
            .ino_of(&key)
            .ok_or_else(|| TreeError::NotFound(key.to_string()))?;
        let attr = self.attr_of(ino)?;
        info!(key = %key, inode = ino, "created record");
        Ok((attr, key, true))
    }

    /// Creates (or opens) a record and returns its attributes and a writable handle.
    pub fn create(&self, parent: u64, name: &OsStr, flags: i32) -> FuseResult<(FileAttr, u64)> {
        let exclusive = flags & libc::O_EXCL != 0;
        let (attr, key, created) = self.create_record(parent, name, exclusive)?;
        if !created {
            let fh = self.open(attr.ino, (flags & !libc::O_ACCMODE) | libc::O_RDWR)?;
            return Ok((self.attr_of(attr.ino)?, fh));
        }
        let fh = self
            .handles
            .insert_auto(OpenHandle::writer(attr.ino, key, WriteBuffer::new(Vec::new())));
        Ok((attr, fh))
    }

    /// Creates an empty regular file without opening it.
    pub fn mknod(&self, parent: u64, name: &OsStr, mode: u32) -> FuseResult<FileAttr> {
        if mode & u32::from(libc::S_IFMT) != u32::from(libc::S_IFREG) {
            return Err(FuseError::NotPermitted("only regular files".to_string()));
        }
        let (attr, _, _) = self.create_record(parent, name, true)?;
        Ok(attr)
    }

    pub fn unlink(&self, parent: u64, name: &OsStr) -> FuseResult<()> {
        self.check_alive()?;
        self.check_writable()?;
        let name = fs_name(name)?;
        let ino = self.tree().lookup(parent, name)?.ino;
        let key = self.record_key(ino)?;

        self.delete_record(&key)?;
        info!(key = %key, "deleted record");
        self.refresh()
    }

    /// Renames a record, replacing an existing target unless `RENAME_NOREPLACE`.
    ///
    /// Any other rename flag (`RENAME_EXCHANGE`, `RENAME_WHITEOUT`) is
    /// rejected with `EINVAL`.
    pub fn rename(
        &self,
        parent: u64,
        name: &OsStr,
        new_parent: u64,
        new_name: &OsStr,
        flags: u32,
    ) -> FuseResult<()> {
        self.check_alive()?;
        self.check_writable()?;
        if flags & !RENAME_NOREPLACE != 0 {
            return Err(FuseError::InvalidArgument(format!(
                "unsupported rename flags {flags:#x}"
            )));
        }
        let name = fs_name(name)?;
        let new_name = fs_name(new_name)?;
        let tree = self.tree();

        let source = tree.lookup(parent, name)?;
        if source.is_dir() {
            return Err(FuseError::NotPermitted("groups cannot be renamed".to_string()));
        }
        let from = self.record_key(source.ino)?;
        let to = tree.key_for_child(new_parent, new_name)?;
        if from == to {
            return Ok(());
        }
        if extension(&from.name) != extension(&to.name) && !self.config.may_create(&to.name) {
            return Err(FuseError::NotPermitted(format!("cannot rename to {to}")));
        }

        if let Ok(target) = tree.lookup(new_parent, new_name) {
            if flags & RENAME_NOREPLACE != 0 {
                return Err(FuseError::AlreadyExists(new_name.to_string()));
            }
            if target.is_dir() {
                return Err(FuseError::IsDirectory(target.ino));
            }
            // The source must still be on the device before the target goes
            self.refresh()?;
            if self.tree().ino_of(&from).is_none() {
                return Err(TransportError::RecordNotFound(from).into());
            }
            match self.delete_record(&to) {
                Ok(()) | Err(FuseError::Transport(TransportError::RecordNotFound(_))) => {}
                Err(e) => return Err(e),
            }
        }
        drop(tree);

        self.retry_stale(&from, |from| {
            let (from, to) = (from.clone(), to.clone());
            self.device("rename", move |conn| conn.rename(&from, &to))
        })?;
        self.handles.retarget(&from, &to);
        info!(from = %from, to = %to, "renamed record");
        self.refresh_with(&[(from, to)])
    }

    /// Resizes a record. Open write handles are resized in memory; otherwise
    /// the record is rewritten on the device immediately.
    pub fn truncate(&self, ino: u64, size: u64, fh: Option<u64>) -> FuseResult<FileAttr> {
        self.check_alive()?;
        self.check_writable()?;
        let key = self.record_key(ino)?;

        if let Some(fh) = fh
            && let Some(mut handle) = self.handles.get_mut(fh)
            && let Some(buffer) = handle.buffer.as_mut()
        {
            debug!(inode = ino, fh, old = buffer.len(), new = size, "truncate open buffer");
            buffer.truncate(size)?;
            drop(handle);
            return self.attr_of(ino);
        }

        let new_len = check_record_size(size)?;
        let mut content = self.read_record(&key)?;
        if content.len() != new_len {
            content.resize(new_len, 0);
            self.write_record(&key, content)?;
            self.refresh()?;
        }
        self.attr_of(ino)
    }

    /// Rejects directory creation: the calculator storage has a fixed shape.
    pub fn mkdir(&self, _parent: u64, name: &OsStr) -> FuseResult<FileAttr> {
        self.check_alive()?;
        self.check_writable()?;
        Err(FuseError::NotPermitted(format!(
            "cannot create directory {}",
            name.to_string_lossy()
        )))
    }

    pub fn rmdir(&self, parent: u64, name: &OsStr) -> FuseResult<()> {
        self.check_alive()?;
        self.check_writable()?;
        let name = fs_name(name)?;
        let entry = self.tree().lookup(parent, name)?.clone();
        if !entry.is_dir() {
            return Err(TreeError::NotADirectory(name.to_string()).into());
        }
        warn!(group = name, "refusing to remove a group directory");
        Err(FuseError::NotPermitted(format!("cannot remove directory {name}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use numfs_core::MemoryDevice;
    use std::ffi::OsString;
    use std::time::Duration;

    fn mount(device: &MemoryDevice, config: MountConfig) -> NumworksFs {
        let session = Session::new(
            Box::new(device.connector()),
            Box::new(|_: &str| {}),
            Duration::from_millis(500),
        );
        let fs = NumworksFs::new(Arc::new(session), config);
        fs.refresh().unwrap();
        fs
    }

    fn name(s: &str) -> OsString {
        OsString::from(s)
    }

    #[test]
    fn test_attr_modes() {
        let device = MemoryDevice::new(1024);
        device.insert(RecordKey::root("a.py"), "abc");
        let fs = mount(&device, MountConfig::default().owner(10, 20));

        let root = fs.getattr(numfs_core::ROOT_INODE).unwrap();
        assert_eq!(root.kind, FileType::Directory);
        assert_eq!(root.perm, 0o755);
        assert_eq!(root.nlink, 2);

        let file = fs.lookup(numfs_core::ROOT_INODE, &name("a.py")).unwrap();
        assert_eq!(file.kind, FileType::RegularFile);
        assert_eq!(file.perm, 0o644);
        assert_eq!(file.size, 3);
        assert_eq!(file.uid, 10);
        assert_eq!(file.gid, 20);
    }

    #[test]
    fn test_read_only_modes() {
        let device = MemoryDevice::new(1024);
        device.insert(RecordKey::root("a.py"), "abc");
        let fs = mount(&device, MountConfig::default().read_only(true));
        let file = fs.lookup(numfs_core::ROOT_INODE, &name("a.py")).unwrap();
        assert_eq!(file.perm, 0o444);
        assert_eq!(fs.getattr(numfs_core::ROOT_INODE).unwrap().perm, 0o555);
    }

    #[test]
    fn test_open_directory_fails() {
        let device = MemoryDevice::new(1024);
        let fs = mount(&device, MountConfig::default());
        let err = fs.open(numfs_core::ROOT_INODE, libc::O_RDONLY).unwrap_err();
        assert_eq!(err.to_errno(), libc::EISDIR);
    }

    #[test]
    fn test_write_on_read_handle_is_ebadf() {
        let device = MemoryDevice::new(1024);
        device.insert(RecordKey::root("a.py"), "abc");
        let fs = mount(&device, MountConfig::default());
        let ino = fs.lookup(numfs_core::ROOT_INODE, &name("a.py")).unwrap().ino;
        let fh = fs.open(ino, libc::O_RDONLY).unwrap();
        assert_eq!(fs.write(fh, 0, b"x").unwrap_err().to_errno(), libc::EBADF);
    }

    #[test]
    fn test_pending_size_visible_in_getattr() {
        let device = MemoryDevice::new(1024);
        device.insert(RecordKey::root("a.py"), "abc");
        let fs = mount(&device, MountConfig::default());
        let ino = fs.lookup(numfs_core::ROOT_INODE, &name("a.py")).unwrap().ino;

        let fh = fs.open(ino, libc::O_WRONLY).unwrap();
        fs.write(fh, 3, b"defg").unwrap();
        assert_eq!(fs.getattr(ino).unwrap().size, 7);
        assert_eq!(device.content(&RecordKey::root("a.py")).unwrap(), b"abc");

        fs.release(fh).unwrap();
        assert_eq!(device.content(&RecordKey::root("a.py")).unwrap(), b"abcdefg");
        assert_eq!(fs.getattr(ino).unwrap().size, 7);
        assert_eq!(fs.open_handles(), 0);
    }

    #[test]
    fn test_mknod_and_mkdir() {
        let device = MemoryDevice::new(1024);
        let fs = mount(&device, MountConfig::default());

        let attr = fs
            .mknod(numfs_core::ROOT_INODE, &name("n.py"), u32::from(libc::S_IFREG) | 0o644)
            .unwrap();
        assert_eq!(attr.size, 0);
        assert_eq!(device.content(&RecordKey::root("n.py")).unwrap(), b"");

        let err = fs
            .mknod(numfs_core::ROOT_INODE, &name("fifo.py"), u32::from(libc::S_IFIFO) | 0o644)
            .unwrap_err();
        assert_eq!(err.to_errno(), libc::EPERM);

        let err = fs.mkdir(numfs_core::ROOT_INODE, &name("dir")).unwrap_err();
        assert_eq!(err.to_errno(), libc::EPERM);
    }

    #[test]
    fn test_statfs() {
        let device = MemoryDevice::new(1000);
        device.insert(RecordKey::root("a.py"), vec![b'x'; 100]);
        let fs = mount(&device, MountConfig::default());
        let usage = fs.statfs().unwrap();
        assert_eq!(usage.capacity, 1000);
        assert_eq!(usage.used, 100);
        assert_eq!(usage.free(), 900);
        assert_eq!(usage.records, 1);
        assert_eq!(usage.name_max, 219);
    }
}
