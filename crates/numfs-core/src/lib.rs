//! Core of numfs: talking to a NumWorks calculator's record storage.
//!
//! This crate holds everything below the FUSE layer:
//!
//! - [`transport`]: the device-facing [`Connector`]/[`Connection`] traits plus
//!   an in-memory device and a storage-image device
//! - [`tree`]: the in-memory projection of a device listing into a filesystem tree
//! - [`names`]: reversible escaping between device names and filesystem names
//! - [`session`]: the connect-once session state machine that serializes all
//!   device calls onto a single worker thread
//!
//! # Usage
//!
//! ```ignore
//! use numfs_core::{MemoryDevice, Session};
//!
//! let device = MemoryDevice::new(32 * 1024);
//! let session = Session::new(Box::new(device.connector()), teardown, io_timeout);
//! session.ensure_connected()?;
//! let listing = session.call("list", |conn| conn.list())?;
//! ```

pub mod error;
pub mod names;
pub mod record;
pub mod session;
pub mod transport;
pub mod tree;

pub use error::{TransportError, TreeError};
pub use record::{DeviceRecord, RecordKey, RecordKind, StorageInfo};
pub use session::{Session, SessionState, SessionStats, Teardown};
pub use transport::image::{ImageConnector, DEFAULT_CAPACITY};
pub use transport::memory::MemoryDevice;
pub use transport::{Connection, Connector};
pub use tree::{EntryKind, StorageTree, TreeEntry, ROOT_INODE};
