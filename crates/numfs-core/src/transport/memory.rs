//! In-memory device with fault injection.
//!
//! Used by the demo mount and by every test that needs a device. A
//! [`MemoryDevice`] is a cheap handle over shared state, so a test can keep
//! one clone to inspect and sabotage the device while the session owns the
//! connection made from another.

use super::{Connection, Connector};
use crate::error::TransportError;
use crate::record::{DeviceRecord, RecordKey, StorageInfo};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::trace;

#[derive(Debug, Default)]
struct DeviceState {
    records: BTreeMap<RecordKey, Vec<u8>>,
    capacity: u64,
    supports_groups: bool,
    unplugged: bool,
    refuse_connect: bool,
    hang: Option<Duration>,
    connects: usize,
    writes: usize,
    calls: usize,
}

impl DeviceState {
    fn used_except(&self, key: &RecordKey) -> u64 {
        self.records
            .iter()
            .filter(|(k, _)| *k != key)
            .map(|(_, v)| v.len() as u64)
            .sum()
    }
}

/// A simulated calculator holding records in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryDevice {
    state: Arc<Mutex<DeviceState>>,
}

impl MemoryDevice {
    /// Creates an empty device with `capacity` bytes of record storage.
    pub fn new(capacity: u64) -> Self {
        Self {
            state: Arc::new(Mutex::new(DeviceState {
                capacity,
                ..DeviceState::default()
            })),
        }
    }

    /// Enables grouped records (shown as directories).
    #[must_use]
    pub fn with_groups(self) -> Self {
        self.state.lock().supports_groups = true;
        self
    }

    /// Stores a record directly, bypassing capacity checks.
    pub fn insert(&self, key: RecordKey, content: impl Into<Vec<u8>>) {
        self.state.lock().records.insert(key, content.into());
    }

    /// Removes a record directly, as if deleted on the calculator itself.
    pub fn remove(&self, key: &RecordKey) -> Option<Vec<u8>> {
        self.state.lock().records.remove(key)
    }

    /// Returns a record's current content.
    pub fn content(&self, key: &RecordKey) -> Option<Vec<u8>> {
        self.state.lock().records.get(key).cloned()
    }

    /// Returns every stored key.
    pub fn keys(&self) -> Vec<RecordKey> {
        self.state.lock().records.keys().cloned().collect()
    }

    /// Simulates unplugging the cable: every later call fails.
    pub fn disconnect(&self) {
        self.state.lock().unplugged = true;
    }

    /// Makes the next connection attempts fail.
    pub fn fail_connect(&self) {
        self.state.lock().refuse_connect = true;
    }

    /// Makes every later call block for `delay` before answering.
    pub fn hang_calls(&self, delay: Duration) {
        self.state.lock().hang = Some(delay);
    }

    /// Number of successful and failed connection attempts.
    pub fn connect_count(&self) -> usize {
        self.state.lock().connects
    }

    /// Number of write calls that reached the device.
    pub fn write_count(&self) -> usize {
        self.state.lock().writes
    }

    /// Number of connection calls of any kind that reached the device.
    pub fn call_count(&self) -> usize {
        self.state.lock().calls
    }

    /// A connector that opens this device.
    pub fn connector(&self) -> MemoryConnector {
        MemoryConnector {
            device: self.clone(),
        }
    }
}

/// Connector for a [`MemoryDevice`].
#[derive(Debug)]
pub struct MemoryConnector {
    device: MemoryDevice,
}

impl Connector for MemoryConnector {
    fn connect(self: Box<Self>) -> Result<Box<dyn Connection>, TransportError> {
        let mut state = self.device.state.lock();
        state.connects += 1;
        if state.refuse_connect || state.unplugged {
            return Err(TransportError::unavailable("no calculator detected"));
        }
        drop(state);
        Ok(Box::new(MemoryConnection {
            device: self.device,
        }))
    }

    fn describe(&self) -> String {
        "in-memory device".to_string()
    }
}

struct MemoryConnection {
    device: MemoryDevice,
}

impl MemoryConnection {
    /// Applies injected faults, then runs `f` against the device state.
    fn with_state<T>(
        &self,
        op: &str,
        f: impl FnOnce(&mut DeviceState) -> Result<T, TransportError>,
    ) -> Result<T, TransportError> {
        let hang = {
            let mut state = self.device.state.lock();
            state.calls += 1;
            state.hang
        };
        if let Some(delay) = hang {
            std::thread::sleep(delay);
        }

        let mut state = self.device.state.lock();
        if state.unplugged {
            return Err(TransportError::unavailable("calculator disconnected"));
        }
        trace!(op, "memory device call");
        f(&mut state)
    }
}

fn check_group(state: &DeviceState, key: &RecordKey) -> Result<(), TransportError> {
    if key.group.is_some() && !state.supports_groups {
        return Err(TransportError::InvalidContent(format!(
            "device has no groups: {key}"
        )));
    }
    Ok(())
}

impl Connection for MemoryConnection {
    fn list(&mut self) -> Result<Vec<DeviceRecord>, TransportError> {
        self.with_state("list", |state| {
            Ok(state
                .records
                .iter()
                .map(|(key, content)| DeviceRecord::new(key.clone(), content.len() as u64))
                .collect())
        })
    }

    fn read(&mut self, key: &RecordKey) -> Result<Vec<u8>, TransportError> {
        self.with_state("read", |state| {
            state
                .records
                .get(key)
                .cloned()
                .ok_or_else(|| TransportError::RecordNotFound(key.clone()))
        })
    }

    fn write(&mut self, key: &RecordKey, content: &[u8]) -> Result<(), TransportError> {
        self.with_state("write", |state| {
            state.writes += 1;
            check_group(state, key)?;
            let available = state.capacity.saturating_sub(state.used_except(key));
            let needed = content.len() as u64;
            if needed > available {
                return Err(TransportError::StorageFull { needed, available });
            }
            state.records.insert(key.clone(), content.to_vec());
            Ok(())
        })
    }

    fn delete(&mut self, key: &RecordKey) -> Result<(), TransportError> {
        self.with_state("delete", |state| {
            state
                .records
                .remove(key)
                .map(|_| ())
                .ok_or_else(|| TransportError::RecordNotFound(key.clone()))
        })
    }

    fn rename(&mut self, from: &RecordKey, to: &RecordKey) -> Result<(), TransportError> {
        self.with_state("rename", |state| {
            check_group(state, to)?;
            if state.records.contains_key(to) {
                return Err(TransportError::NameConflict(to.clone()));
            }
            let content = state
                .records
                .remove(from)
                .ok_or_else(|| TransportError::RecordNotFound(from.clone()))?;
            state.records.insert(to.clone(), content);
            Ok(())
        })
    }

    fn storage_info(&mut self) -> Result<StorageInfo, TransportError> {
        self.with_state("storage_info", |state| {
            Ok(StorageInfo {
                capacity: state.capacity,
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connect(device: &MemoryDevice) -> Box<dyn Connection> {
        Box::new(device.connector()).connect().unwrap()
    }

    #[test]
    fn test_list_read_write() {
        let device = MemoryDevice::new(1024);
        device.insert(RecordKey::root("main.py"), "print(1)");
        let mut conn = connect(&device);

        let listing = conn.list().unwrap();
        assert_eq!(listing, vec![DeviceRecord::new(RecordKey::root("main.py"), 8)]);
        assert_eq!(conn.read(&RecordKey::root("main.py")).unwrap(), b"print(1)");

        conn.write(&RecordKey::root("b.py"), b"x").unwrap();
        assert_eq!(device.content(&RecordKey::root("b.py")).unwrap(), b"x");
        assert_eq!(device.write_count(), 1);
    }

    #[test]
    fn test_read_missing() {
        let device = MemoryDevice::new(1024);
        let mut conn = connect(&device);
        assert!(matches!(
            conn.read(&RecordKey::root("nope.py")),
            Err(TransportError::RecordNotFound(_))
        ));
        assert!(matches!(
            conn.delete(&RecordKey::root("nope.py")),
            Err(TransportError::RecordNotFound(_))
        ));
    }

    #[test]
    fn test_storage_full() {
        let device = MemoryDevice::new(10);
        device.insert(RecordKey::root("a.py"), vec![0u8; 6]);
        let mut conn = connect(&device);

        let err = conn.write(&RecordKey::root("b.py"), &[1u8; 5]).unwrap_err();
        assert!(matches!(
            err,
            TransportError::StorageFull {
                needed: 5,
                available: 4
            }
        ));
        // Overwriting a record does not count its old content
        conn.write(&RecordKey::root("a.py"), &[1u8; 10]).unwrap();
    }

    #[test]
    fn test_rename_conflict() {
        let device = MemoryDevice::new(1024);
        device.insert(RecordKey::root("a.py"), "a");
        device.insert(RecordKey::root("b.py"), "b");
        let mut conn = connect(&device);

        assert!(matches!(
            conn.rename(&RecordKey::root("a.py"), &RecordKey::root("b.py")),
            Err(TransportError::NameConflict(_))
        ));
        conn.rename(&RecordKey::root("a.py"), &RecordKey::root("c.py")).unwrap();
        assert_eq!(device.content(&RecordKey::root("c.py")).unwrap(), b"a");
        assert!(device.content(&RecordKey::root("a.py")).is_none());
    }

    #[test]
    fn test_groups_require_support() {
        let flat = MemoryDevice::new(1024);
        let mut conn = connect(&flat);
        assert!(matches!(
            conn.write(&RecordKey::in_group("lib", "a.py"), b""),
            Err(TransportError::InvalidContent(_))
        ));

        let grouped = MemoryDevice::new(1024).with_groups();
        let mut conn = connect(&grouped);
        conn.write(&RecordKey::in_group("lib", "a.py"), b"").unwrap();
    }

    #[test]
    fn test_disconnect_fails_calls() {
        let device = MemoryDevice::new(1024);
        let mut conn = connect(&device);
        device.disconnect();
        let err = conn.list().unwrap_err();
        assert!(err.is_device_lost());
    }

    #[test]
    fn test_fail_connect() {
        let device = MemoryDevice::new(1024);
        device.fail_connect();
        let result = Box::new(device.connector()).connect();
        assert!(matches!(result, Err(TransportError::DeviceUnavailable(_))));
        assert_eq!(device.connect_count(), 1);
    }

    #[test]
    fn test_storage_info() {
        let device = MemoryDevice::new(32_768);
        let mut conn = connect(&device);
        assert_eq!(conn.storage_info().unwrap().capacity, 32_768);
    }
}
