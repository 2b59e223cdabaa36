//! Records stored on the calculator.
//!
//! A record is identified by its full device name (`main.py`, `notes.txt`)
//! and, on devices that support it, the group it lives in. Record content
//! is never held here; it is fetched on demand through a [`Connection`].
//!
//! [`Connection`]: crate::transport::Connection

use std::fmt;

/// Extension the calculator uses for Python scripts.
pub const SCRIPT_EXTENSION: &str = "py";

/// What a record holds, derived from its extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordKind {
    /// A Python script (`.py`).
    Script,
    /// Any other record the calculator keeps (exam settings, lists, ...).
    Data,
}

impl RecordKind {
    /// Derives the kind from a full record name.
    pub fn from_name(name: &str) -> Self {
        match extension(name) {
            Some(SCRIPT_EXTENSION) => RecordKind::Script,
            _ => RecordKind::Data,
        }
    }
}

/// Returns the extension of a full record name, if it has a non-empty one.
pub fn extension(name: &str) -> Option<&str> {
    name.rsplit_once('.')
        .map(|(_, ext)| ext)
        .filter(|ext| !ext.is_empty())
}

/// Device-side address of a record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordKey {
    /// Grouping the record belongs to, `None` for the top level.
    pub group: Option<String>,
    /// Full record name including its extension.
    pub name: String,
}

impl RecordKey {
    /// A record at the top level of the device storage.
    pub fn root(name: impl Into<String>) -> Self {
        Self {
            group: None,
            name: name.into(),
        }
    }

    /// A record inside a group.
    pub fn in_group(group: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            group: Some(group.into()),
            name: name.into(),
        }
    }

    /// Same group, different name.
    #[must_use]
    pub fn with_name(&self, name: impl Into<String>) -> Self {
        Self {
            group: self.group.clone(),
            name: name.into(),
        }
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.group {
            Some(group) => write!(f, "{group}/{}", self.name),
            None => f.write_str(&self.name),
        }
    }
}

/// Metadata for one stored record, as reported by a device listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceRecord {
    pub key: RecordKey,
    pub kind: RecordKind,
    /// Size in bytes as reported by the device.
    pub size: u64,
}

impl DeviceRecord {
    pub fn new(key: RecordKey, size: u64) -> Self {
        let kind = RecordKind::from_name(&key.name);
        Self { key, kind, size }
    }
}

/// Capacity information for the device's record storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StorageInfo {
    /// Total bytes available for records.
    pub capacity: u64,
}
