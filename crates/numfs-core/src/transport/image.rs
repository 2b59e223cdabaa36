//! Storage-image device.
//!
//! Reads and writes a JSON dump of the calculator's script storage, the
//! same shape the calculator's backup tooling produces:
//!
//! ```json
//! { "capacity": 32768,
//!   "records": [ { "name": "main", "type": "py", "autoImport": true, "code": "print(1)" } ] }
//! ```
//!
//! The file is reloaded before every call and rewritten atomically after
//! every mutation, so edits made by another program between calls are seen.
//! Images have no groups.

use super::{Connection, Connector};
use crate::error::TransportError;
use crate::record::{extension, DeviceRecord, RecordKey, StorageInfo, SCRIPT_EXTENSION};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::debug;

/// Record storage size of a stock calculator, used when an image omits it.
pub const DEFAULT_CAPACITY: u64 = 32_768;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StorageImage {
    #[serde(default = "default_capacity")]
    capacity: u64,
    #[serde(default)]
    records: Vec<ImageRecord>,
}

fn default_capacity() -> u64 {
    DEFAULT_CAPACITY
}

fn default_auto_import() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ImageRecord {
    /// Name without extension.
    name: String,
    #[serde(rename = "type")]
    kind: String,
    #[serde(rename = "autoImport", default = "default_auto_import")]
    auto_import: bool,
    code: String,
}

impl ImageRecord {
    fn full_name(&self) -> String {
        if self.kind.is_empty() {
            self.name.clone()
        } else {
            format!("{}.{}", self.name, self.kind)
        }
    }

    fn matches(&self, key: &RecordKey) -> bool {
        key.group.is_none() && self.full_name() == key.name
    }
}

/// Splits a full record name into base name and extension.
fn split_name(name: &str) -> (&str, &str) {
    match extension(name) {
        Some(ext) => (&name[..name.len() - ext.len() - 1], ext),
        None => (name, ""),
    }
}

/// Opens a storage image file as a device.
#[derive(Debug, Clone)]
pub struct ImageConnector {
    path: PathBuf,
    create: bool,
}

impl ImageConnector {
    /// Connector for an existing image file.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            create: false,
        }
    }

    /// Creates an empty image on connect if the file does not exist.
    #[must_use]
    pub fn create_if_missing(mut self) -> Self {
        self.create = true;
        self
    }
}

impl Connector for ImageConnector {
    fn connect(self: Box<Self>) -> Result<Box<dyn Connection>, TransportError> {
        if !self.path.exists() {
            if !self.create {
                return Err(TransportError::unavailable(format!(
                    "image not found: {}",
                    self.path.display()
                )));
            }
            let empty = StorageImage {
                capacity: DEFAULT_CAPACITY,
                records: Vec::new(),
            };
            save(&self.path, &empty)?;
        }
        // Fail early on a malformed image
        load(&self.path)?;
        debug!(path = %self.path.display(), "storage image opened");
        Ok(Box::new(ImageConnection { path: self.path }))
    }

    fn describe(&self) -> String {
        format!("storage image {}", self.path.display())
    }
}

fn load(path: &Path) -> Result<StorageImage, TransportError> {
    let bytes = fs::read(path).map_err(|e| {
        TransportError::unavailable(format!("reading {}: {e}", path.display()))
    })?;
    serde_json::from_slice(&bytes).map_err(|e| {
        TransportError::unavailable(format!("malformed image {}: {e}", path.display()))
    })
}

fn save(path: &Path, image: &StorageImage) -> Result<(), TransportError> {
    let io_err = |e: std::io::Error| {
        TransportError::unavailable(format!("writing {}: {e}", path.display()))
    };
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let json = serde_json::to_vec_pretty(image)
        .map_err(|e| TransportError::unavailable(format!("encoding image: {e}")))?;

    let mut tmp = NamedTempFile::new_in(dir).map_err(io_err)?;
    tmp.write_all(&json).map_err(io_err)?;
    tmp.as_file().sync_all().map_err(io_err)?;
    tmp.persist(path).map_err(|e| io_err(e.error))?;
    Ok(())
}

struct ImageConnection {
    path: PathBuf,
}

impl ImageConnection {
    fn mutate<T>(
        &self,
        f: impl FnOnce(&mut StorageImage) -> Result<T, TransportError>,
    ) -> Result<T, TransportError> {
        let mut image = load(&self.path)?;
        let out = f(&mut image)?;
        save(&self.path, &image)?;
        Ok(out)
    }
}

fn reject_group(key: &RecordKey) -> Result<(), TransportError> {
    if key.group.is_some() {
        return Err(TransportError::InvalidContent(format!(
            "storage images have no groups: {key}"
        )));
    }
    Ok(())
}

fn used(image: &StorageImage, except: &RecordKey) -> u64 {
    image
        .records
        .iter()
        .filter(|r| !r.matches(except))
        .map(|r| r.code.len() as u64)
        .sum()
}

impl Connection for ImageConnection {
    fn list(&mut self) -> Result<Vec<DeviceRecord>, TransportError> {
        let image = load(&self.path)?;
        Ok(image
            .records
            .iter()
            .map(|r| DeviceRecord::new(RecordKey::root(r.full_name()), r.code.len() as u64))
            .collect())
    }

    fn read(&mut self, key: &RecordKey) -> Result<Vec<u8>, TransportError> {
        let image = load(&self.path)?;
        image
            .records
            .into_iter()
            .find(|r| r.matches(key))
            .map(|r| r.code.into_bytes())
            .ok_or_else(|| TransportError::RecordNotFound(key.clone()))
    }

    fn write(&mut self, key: &RecordKey, content: &[u8]) -> Result<(), TransportError> {
        reject_group(key)?;
        let code = std::str::from_utf8(content)
            .map_err(|e| TransportError::InvalidContent(format!("{key} is not UTF-8: {e}")))?
            .to_string();

        self.mutate(|image| {
            let available = image.capacity.saturating_sub(used(image, key));
            let needed = code.len() as u64;
            if needed > available {
                return Err(TransportError::StorageFull { needed, available });
            }
            match image.records.iter_mut().find(|r| r.matches(key)) {
                Some(record) => record.code = code,
                None => {
                    let (name, kind) = split_name(&key.name);
                    image.records.push(ImageRecord {
                        name: name.to_string(),
                        kind: kind.to_string(),
                        auto_import: kind == SCRIPT_EXTENSION,
                        code,
                    });
                }
            }
            Ok(())
        })
    }

    fn delete(&mut self, key: &RecordKey) -> Result<(), TransportError> {
        self.mutate(|image| {
            let before = image.records.len();
            image.records.retain(|r| !r.matches(key));
            if image.records.len() == before {
                return Err(TransportError::RecordNotFound(key.clone()));
            }
            Ok(())
        })
    }

    fn rename(&mut self, from: &RecordKey, to: &RecordKey) -> Result<(), TransportError> {
        reject_group(to)?;
        self.mutate(|image| {
            if image.records.iter().any(|r| r.matches(to)) {
                return Err(TransportError::NameConflict(to.clone()));
            }
            let record = image
                .records
                .iter_mut()
                .find(|r| r.matches(from))
                .ok_or_else(|| TransportError::RecordNotFound(from.clone()))?;
            let (name, kind) = split_name(&to.name);
            record.name = name.to_string();
            record.kind = kind.to_string();
            Ok(())
        })
    }

    fn storage_info(&mut self) -> Result<StorageInfo, TransportError> {
        let image = load(&self.path)?;
        Ok(StorageInfo {
            capacity: image.capacity,
        })
    }
}
