//! Open file handles and their write buffers.
//!
//! The calculator only stores and fetches whole records, so every open file
//! gets a [`WriteBuffer`] holding the complete content:
//!
//! 1. On open (without truncate): the existing record is read into memory
//! 2. On write: data is copied into the buffer at the requested offset
//! 3. On flush/release: if modified, the whole buffer is written back in one call

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use dashmap::mapref::one::{Ref, RefMut};
use numfs_core::RecordKey;

use crate::error::{FuseError, FuseResult};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Largest record a buffer may grow to.
///
/// Calculator storage is measured in tens of kilobytes, so anything past
/// this is rejected before memory is allocated for it.
pub const MAX_RECORD_SIZE: u64 = 1024 * 1024;

/// Converts a record size to `usize`, rejecting anything past [`MAX_RECORD_SIZE`].
pub(crate) fn check_record_size(end: u64) -> FuseResult<usize> {
    if end > MAX_RECORD_SIZE {
        return Err(FuseError::FileTooLarge(end));
    }
    usize::try_from(end).map_err(|_| FuseError::FileTooLarge(end))
}

/// Whole-record buffer for random-access writes.
///
/// # Example
///
/// ```
/// use numfs_fuse::WriteBuffer;
///
/// let mut buf = WriteBuffer::new_for_create();
/// buf.write(0, b"print('hi')").unwrap();
/// assert_eq!(buf.len(), 11);
/// assert!(buf.is_dirty());
/// assert_eq!(buf.read(0, 5), b"print");
/// ```
#[derive(Debug, Default)]
pub struct WriteBuffer {
    content: Vec<u8>,
    dirty: bool,
}

impl WriteBuffer {
    /// Buffer over an existing record's content.
    pub fn new(existing_content: Vec<u8>) -> Self {
        Self {
            content: existing_content,
            dirty: false,
        }
    }

    /// Empty buffer that still must be written back (`O_TRUNC` or create).
    pub fn new_for_create() -> Self {
        Self {
            content: Vec::new(),
            dirty: true,
        }
    }

    /// Writes `data` at `offset`, growing the buffer as needed.
    ///
    /// Gaps between the current end and `offset` are zero-filled. Fails with
    /// [`FuseError::FileTooLarge`] if the buffer would exceed
    /// [`MAX_RECORD_SIZE`]; the buffer is left untouched in that case.
    pub fn write(&mut self, offset: u64, data: &[u8]) -> FuseResult<usize> {
        let end = offset
            .checked_add(data.len() as u64)
            .ok_or(FuseError::FileTooLarge(u64::MAX))?;
        let end = check_record_size(end)?;
        let offset = end - data.len();

        if end > self.content.len() {
            let new_capacity = std::cmp::max(end, (self.content.capacity() * 3) / 2);
            if new_capacity > self.content.capacity() {
                self.content.reserve(new_capacity - self.content.len());
            }
            self.content.resize(end, 0);
        }

        self.content[offset..end].copy_from_slice(data);
        self.dirty = true;
        Ok(data.len())
    }

    /// Reads up to `size` bytes at `offset`, clamped to the end of the buffer.
    pub fn read(&self, offset: u64, size: usize) -> &[u8] {
        slice_window(&self.content, offset, size)
    }

    /// Resizes the buffer, zero-filling when it grows.
    pub fn truncate(&mut self, size: u64) -> FuseResult<()> {
        let size = check_record_size(size)?;
        if size != self.content.len() {
            self.content.resize(size, 0);
            self.dirty = true;
        }
        Ok(())
    }

    #[inline]
    pub fn len(&self) -> u64 {
        self.content.len() as u64
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }

    #[inline]
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    #[inline]
    pub fn content(&self) -> &[u8] {
        &self.content
    }

    /// Marks the buffer clean after a successful write-back.
    #[inline]
    pub fn mark_clean(&mut self) {
        self.dirty = false;
    }
}

/// Returns `data[offset..offset + size]`, clamped to the slice end.
pub fn slice_window(data: &[u8], offset: u64, size: usize) -> &[u8] {
    #[allow(clippy::cast_possible_truncation)]
    let offset = offset as usize;
    if offset >= data.len() {
        return &[];
    }
    let end = offset.saturating_add(size).min(data.len());
    &data[offset..end]
}

/// State of one open file.
#[derive(Debug)]
pub struct OpenHandle {
    /// Inode the handle was opened on.
    pub ino: u64,
    /// Device record the handle writes back to. Follows renames.
    pub key: RecordKey,
    /// Whether the handle was opened for writing.
    pub writable: bool,
    /// Content of a read-only handle, fetched on first read.
    pub snapshot: Option<Arc<Vec<u8>>>,
    /// Write buffer of a writable handle.
    pub buffer: Option<WriteBuffer>,
}

impl OpenHandle {
    pub fn reader(ino: u64, key: RecordKey) -> Self {
        Self {
            ino,
            key,
            writable: false,
            snapshot: None,
            buffer: None,
        }
    }

    pub fn writer(ino: u64, key: RecordKey, buffer: WriteBuffer) -> Self {
        Self {
            ino,
            key,
            writable: true,
            snapshot: None,
            buffer: Some(buffer),
        }
    }

    /// True when the buffer holds changes not yet on the device.
    pub fn is_dirty(&self) -> bool {
        self.buffer.as_ref().is_some_and(WriteBuffer::is_dirty)
    }
}

/// Thread-safe table of open handles with auto-incrementing IDs.
///
/// IDs start at 1; 0 is never handed out.
#[derive(Debug)]
pub struct HandleTable {
    handles: DashMap<u64, OpenHandle>,
    next_id: AtomicU64,
}

impl Default for HandleTable {
    fn default() -> Self {
        Self::new()
    }
}

impl HandleTable {
    pub fn new() -> Self {
        Self {
            handles: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Inserts a handle and returns its new ID.
    pub fn insert_auto(&self, handle: OpenHandle) -> u64 {
        let mut handle = Some(handle);
        loop {
            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            if id == 0 {
                continue;
            }
            if let Entry::Vacant(entry) = self.handles.entry(id)
                && let Some(handle) = handle.take()
            {
                entry.insert(handle);
                return id;
            }
        }
    }

    pub fn get(&self, fh: u64) -> Option<Ref<'_, u64, OpenHandle>> {
        self.handles.get(&fh)
    }

    pub fn get_mut(&self, fh: u64) -> Option<RefMut<'_, u64, OpenHandle>> {
        self.handles.get_mut(&fh)
    }

    pub fn remove(&self, fh: u64) -> Option<OpenHandle> {
        self.handles.remove(&fh).map(|(_, handle)| handle)
    }

    /// Points every handle writing to `from` at `to`.
    pub fn retarget(&self, from: &RecordKey, to: &RecordKey) {
        for mut handle in self.handles.iter_mut() {
            if handle.key == *from {
                handle.key = to.clone();
            }
        }
    }

    /// Largest dirty buffer size among handles open on `ino`, if any.
    pub fn pending_size(&self, ino: u64) -> Option<u64> {
        self.handles
            .iter()
            .filter(|h| h.ino == ino && h.is_dirty())
            .filter_map(|h| h.buffer.as_ref().map(WriteBuffer::len))
            .max()
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_buffer_new() {
        let buf = WriteBuffer::new(vec![1, 2, 3]);
        assert_eq!(buf.len(), 3);
        assert!(!buf.is_dirty());
    }

    #[test]
    fn test_write_buffer_new_for_create() {
        let buf = WriteBuffer::new_for_create();
        assert!(buf.is_empty());
        assert!(buf.is_dirty());
    }

    #[test]
    fn test_write_buffer_write_extends_buffer() {
        let mut buf = WriteBuffer::new(vec![1, 2, 3]);
        let written = buf.write(5, b"xyz").unwrap();
        assert_eq!(written, 3);
        assert_eq!(buf.len(), 8);
        assert_eq!(&buf.content()[..3], &[1, 2, 3]);
        // Gap filled with zeros
        assert_eq!(&buf.content()[3..5], &[0, 0]);
        assert_eq!(&buf.content()[5..8], b"xyz");
    }

    #[test]
    fn test_write_buffer_overwrite_middle() {
        let mut buf = WriteBuffer::new(b"hello world".to_vec());
        buf.write(6, b"WORLD").unwrap();
        assert_eq!(buf.content(), b"hello WORLD");
    }

    #[test]
    fn test_write_buffer_read_clamped() {
        let buf = WriteBuffer::new(b"hello world".to_vec());
        assert_eq!(buf.read(0, 5), b"hello");
        assert_eq!(buf.read(6, 100), b"world");
        assert_eq!(buf.read(100, 10), b"");
    }

    #[test]
    fn test_write_buffer_truncate() {
        let mut buf = WriteBuffer::new(b"hello world".to_vec());
        buf.truncate(5).unwrap();
        assert_eq!(buf.content(), b"hello");
        assert!(buf.is_dirty());

        buf.truncate(7).unwrap();
        assert_eq!(buf.content(), b"hello\0\0");

        let mut same = WriteBuffer::new(b"hi".to_vec());
        same.truncate(2).unwrap();
        assert!(!same.is_dirty());
    }

    #[test]
    fn test_write_buffer_rejects_oversized_records() {
        let mut buf = WriteBuffer::new(b"abc".to_vec());
        assert!(matches!(
            buf.write(1 << 50, b"x"),
            Err(FuseError::FileTooLarge(_))
        ));
        assert!(matches!(
            buf.write(u64::MAX, b"xy"),
            Err(FuseError::FileTooLarge(_))
        ));
        assert!(matches!(
            buf.truncate(MAX_RECORD_SIZE + 1),
            Err(FuseError::FileTooLarge(_))
        ));
        assert_eq!(buf.content(), b"abc");
        assert!(!buf.is_dirty());

        buf.truncate(MAX_RECORD_SIZE).unwrap();
        assert_eq!(buf.len(), MAX_RECORD_SIZE);
    }

    #[test]
    fn test_write_buffer_mark_clean() {
        let mut buf = WriteBuffer::default();
        buf.write(0, b"data").unwrap();
        assert!(buf.is_dirty());
        buf.mark_clean();
        assert!(!buf.is_dirty());
    }

    #[test]
    fn test_slice_window() {
        let data = vec![7u8; 120];
        assert_eq!(slice_window(&data, 100, 50).len(), 20);
        assert_eq!(slice_window(&data, 120, 50).len(), 0);
        assert_eq!(slice_window(&data, 0, usize::MAX).len(), 120);
    }

    #[test]
    fn test_handle_table_ids() {
        let table = HandleTable::new();
        let a = table.insert_auto(OpenHandle::reader(2, RecordKey::root("a.py")));
        let b = table.insert_auto(OpenHandle::reader(3, RecordKey::root("b.py")));
        assert_ne!(a, 0);
        assert_ne!(a, b);
        assert_eq!(table.len(), 2);
        assert_eq!(table.get(a).unwrap().ino, 2);
        assert!(table.remove(a).is_some());
        assert!(table.get(a).is_none());
    }

    #[test]
    fn test_handle_table_retarget() {
        let table = HandleTable::new();
        let fh = table.insert_auto(OpenHandle::writer(
            2,
            RecordKey::root("old.py"),
            WriteBuffer::default(),
        ));
        table.retarget(&RecordKey::root("old.py"), &RecordKey::root("new.py"));
        assert_eq!(table.get(fh).unwrap().key, RecordKey::root("new.py"));
    }

    #[test]
    fn test_pending_size() {
        let table = HandleTable::new();
        let fh = table.insert_auto(OpenHandle::writer(
            5,
            RecordKey::root("a.py"),
            WriteBuffer::new(b"abc".to_vec()),
        ));
        // Clean buffers do not override the device size
        assert_eq!(table.pending_size(5), None);
        table.get_mut(fh).unwrap().buffer.as_mut().unwrap().write(3, b"de").unwrap();
        assert_eq!(table.pending_size(5), Some(5));
        assert_eq!(table.pending_size(6), None);
    }
}
