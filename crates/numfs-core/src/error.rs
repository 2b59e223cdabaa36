//! Error types for device transports and the storage tree.

use crate::record::RecordKey;
use std::time::Duration;
use thiserror::Error;

/// Errors reported by a device [`Connection`](crate::transport::Connection)
/// or by the session that serializes calls onto it.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// The device is gone, was never reached, or the session already failed.
    #[error("device unavailable: {0}")]
    DeviceUnavailable(String),

    /// A device call did not complete in time. Handled like `DeviceUnavailable`.
    #[error("device call timed out after {0:?}")]
    Timeout(Duration),

    /// The record does not exist on the device (the cached tree was stale).
    #[error("record not found on device: {0}")]
    RecordNotFound(RecordKey),

    /// The device has no room for the write.
    #[error("device storage full: {needed} bytes needed, {available} available")]
    StorageFull {
        /// Bytes the write would occupy.
        needed: u64,
        /// Bytes still free on the device.
        available: u64,
    },

    /// A record with the target name already exists.
    #[error("record already exists: {0}")]
    NameConflict(RecordKey),

    /// The device cannot store this content or name.
    #[error("device rejected content: {0}")]
    InvalidContent(String),
}

impl TransportError {
    /// True when the error means the device connection is lost for good.
    pub fn is_device_lost(&self) -> bool {
        matches!(
            self,
            TransportError::DeviceUnavailable(_) | TransportError::Timeout(_)
        )
    }

    pub(crate) fn unavailable(reason: impl Into<String>) -> Self {
        TransportError::DeviceUnavailable(reason.into())
    }
}

/// Path-resolution errors from the storage tree. Always local and recoverable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TreeError {
    #[error("no such entry: {0}")]
    NotFound(String),

    #[error("not a directory: {0}")]
    NotADirectory(String),

    #[error("invalid name: {0}")]
    InvalidName(String),

    #[error("name too long: {0} bytes")]
    NameTooLong(usize),
}
