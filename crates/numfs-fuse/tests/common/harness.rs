//! Test harness driving `NumworksFs` without a kernel mount.
//!
//! `TestMount` wires a `MemoryDevice` into a real `Session` and filesystem,
//! and counts teardown calls so tests can check the failure path.

// Not all tests use all TestMount methods
#![allow(dead_code)]

use numfs_core::{
    Connection, Connector, DeviceRecord, MemoryDevice, ROOT_INODE, RecordKey, Session,
    StorageInfo, TransportError,
};
use numfs_fuse::{MountConfig, NumworksFs};
use std::ffi::OsStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Default capacity of test devices.
pub const TEST_CAPACITY: u64 = 32 * 1024;

/// Device timeout used by the harness.
pub const TEST_IO_TIMEOUT: Duration = Duration::from_secs(2);

/// A filesystem over an in-memory calculator.
pub struct TestMount {
    pub device: MemoryDevice,
    pub fs: NumworksFs,
    teardowns: Arc<AtomicUsize>,
}

impl TestMount {
    /// Mounts a device holding `records` at the top level.
    pub fn new(records: &[(&str, &str)]) -> Self {
        let device = MemoryDevice::new(TEST_CAPACITY);
        for (name, content) in records {
            device.insert(RecordKey::root(*name), *content);
        }
        Self::with_device(device, MountConfig::default().io_timeout(TEST_IO_TIMEOUT))
    }

    pub fn empty() -> Self {
        Self::new(&[])
    }

    pub fn with_device(device: MemoryDevice, config: MountConfig) -> Self {
        let connector = Box::new(device.connector());
        Self::with_connector(device, connector, config)
    }

    pub fn with_connector(
        device: MemoryDevice,
        connector: Box<dyn Connector>,
        config: MountConfig,
    ) -> Self {
        let teardowns = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&teardowns);
        let session = Session::new(
            connector,
            Box::new(move |_: &str| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
            config.io_timeout,
        );
        let fs = NumworksFs::new(Arc::new(session), config);
        fs.refresh().expect("initial refresh failed");
        Self {
            device,
            fs,
            teardowns,
        }
    }

    /// How often the teardown hook fired.
    pub fn teardown_count(&self) -> usize {
        self.teardowns.load(Ordering::SeqCst)
    }

    /// Resolves a path like `/main.py` to its inode.
    pub fn ino(&self, path: &str) -> u64 {
        self.fs
            .tree()
            .resolve(path)
            .unwrap_or_else(|e| panic!("{path} not found: {e}"))
            .ino
    }

    /// Names in a directory, in listing order.
    pub fn names(&self, ino: u64) -> Vec<String> {
        self.fs
            .readdir(ino)
            .expect("readdir failed")
            .into_iter()
            .map(|e| e.name)
            .collect()
    }

    pub fn root_names(&self) -> Vec<String> {
        self.names(ROOT_INODE)
    }

    /// Creates `name` in the root, writes `content` and closes it.
    pub fn write_new(&self, name: &str, content: &[u8]) -> u64 {
        let (attr, fh) = self
            .fs
            .create(ROOT_INODE, OsStr::new(name), libc::O_WRONLY | libc::O_CREAT)
            .expect("create failed");
        self.fs.write(fh, 0, content).expect("write failed");
        self.fs.release(fh).expect("release failed");
        attr.ino
    }

    /// Reads a whole file through a fresh read-only handle.
    pub fn read_all(&self, ino: u64) -> Vec<u8> {
        let fh = self.fs.open(ino, libc::O_RDONLY).expect("open failed");
        let data = self.fs.read(fh, 0, u32::MAX).expect("read failed");
        self.fs.release(fh).expect("release failed");
        data
    }

    pub fn device_content(&self, name: &str) -> Option<Vec<u8>> {
        self.device.content(&RecordKey::root(name))
    }
}

/// Asserts that an operation failed with `errno`.
#[track_caller]
pub fn assert_errno<T: std::fmt::Debug>(result: numfs_fuse::FuseResult<T>, errno: i32) {
    match result {
        Ok(v) => panic!("expected errno {errno}, got Ok({v:?})"),
        Err(e) => assert_eq!(e.to_errno(), errno, "unexpected error: {e}"),
    }
}

/// Connector whose connection reports `RecordNotFound` for the first
/// `misses` reads, as if the cached tree had raced the device.
pub struct FlakyConnector {
    inner: Box<dyn Connector>,
    misses: Arc<AtomicUsize>,
}

impl FlakyConnector {
    pub fn new(device: &MemoryDevice, misses: usize) -> (Self, Arc<AtomicUsize>) {
        let misses = Arc::new(AtomicUsize::new(misses));
        let connector = Self {
            inner: Box::new(device.connector()),
            misses: Arc::clone(&misses),
        };
        (connector, misses)
    }
}

impl Connector for FlakyConnector {
    fn connect(self: Box<Self>) -> Result<Box<dyn Connection>, TransportError> {
        let inner = self.inner.connect()?;
        Ok(Box::new(FlakyConnection {
            inner,
            misses: self.misses,
        }))
    }
}

struct FlakyConnection {
    inner: Box<dyn Connection>,
    misses: Arc<AtomicUsize>,
}

impl Connection for FlakyConnection {
    fn list(&mut self) -> Result<Vec<DeviceRecord>, TransportError> {
        self.inner.list()
    }

    fn read(&mut self, key: &RecordKey) -> Result<Vec<u8>, TransportError> {
        let missed = self
            .misses
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if missed {
            return Err(TransportError::RecordNotFound(key.clone()));
        }
        self.inner.read(key)
    }

    fn write(&mut self, key: &RecordKey, content: &[u8]) -> Result<(), TransportError> {
        self.inner.write(key, content)
    }

    fn delete(&mut self, key: &RecordKey) -> Result<(), TransportError> {
        self.inner.delete(key)
    }

    fn rename(&mut self, from: &RecordKey, to: &RecordKey) -> Result<(), TransportError> {
        self.inner.rename(from, to)
    }

    fn storage_info(&mut self) -> Result<StorageInfo, TransportError> {
        self.inner.storage_info()
    }
}
