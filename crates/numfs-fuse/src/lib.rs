//! FUSE filesystem for NumWorks calculator storage.
//!
//! Mounts the records stored on a calculator (Python scripts and other
//! records) as regular files, so standard tools can browse, edit, rename
//! and delete them.
//!
//! # Features
//!
//! - One blocking connect per mount; every device call after that is
//!   serialized and bounded by a timeout
//! - Whole-record write buffering: edits reach the device on flush/release
//! - The mount detaches on the first operation that finds the device gone
//! - Read-only mode
//!
//! # Usage
//!
//! ```ignore
//! use numfs_fuse::{MountConfig, NumworksFs, backend};
//!
//! let fs = NumworksFs::new(session, MountConfig::default());
//! fs.refresh()?;
//! let handle = backend::spawn_mount(fs, mountpoint, &backend::mount_options(&config))?;
//! ```

pub mod backend;
pub mod config;
pub mod error;
pub mod filesystem;
pub mod handles;
pub mod ops;

pub use backend::{ChannelTeardown, FuseMountHandle, MountEvent};
pub use config::MountConfig;
pub use error::{FuseError, FuseResult, ToErrno};
pub use handles::{HandleTable, MAX_RECORD_SIZE, OpenHandle, WriteBuffer};
pub use ops::{DirEntry, NumworksFs, StorageUsage, RENAME_NOREPLACE};
