//! Device transports.
//!
//! A [`Connector`] knows how to reach a device; connecting yields a
//! [`Connection`] exposing the record-storage primitives. Connections are
//! not assumed to be thread-safe for concurrent calls: the session owns the
//! single live connection and drives it from one worker thread.

pub mod image;
pub mod memory;

use crate::error::TransportError;
use crate::record::{DeviceRecord, RecordKey, StorageInfo};

/// Establishes a connection to a device. Consumed on use.
pub trait Connector: Send + 'static {
    /// Opens the device. Called at most once per session.
    fn connect(self: Box<Self>) -> Result<Box<dyn Connection>, TransportError>;

    /// Short human-readable description for logs.
    fn describe(&self) -> String {
        "device".to_string()
    }
}

/// An open connection to the device's record storage.
pub trait Connection: Send {
    /// Lists every record with its size.
    fn list(&mut self) -> Result<Vec<DeviceRecord>, TransportError>;

    /// Reads a record's full content.
    fn read(&mut self, key: &RecordKey) -> Result<Vec<u8>, TransportError>;

    /// Creates or replaces a record with `content`.
    fn write(&mut self, key: &RecordKey, content: &[u8]) -> Result<(), TransportError>;

    /// Removes a record.
    fn delete(&mut self, key: &RecordKey) -> Result<(), TransportError>;

    /// Renames a record. Fails with `NameConflict` if `to` exists.
    fn rename(&mut self, from: &RecordKey, to: &RecordKey) -> Result<(), TransportError>;

    /// Reports storage capacity.
    fn storage_info(&mut self) -> Result<StorageInfo, TransportError>;
}
