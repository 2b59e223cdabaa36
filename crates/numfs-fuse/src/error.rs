//! Error handling and mapping for the FUSE filesystem.
//!
//! Converts transport and tree errors to the POSIX error codes FUSE hands
//! back to the kernel.

use numfs_core::{TransportError, TreeError};
use thiserror::Error;

/// Errors that can occur during filesystem operations.
#[derive(Debug, Error)]
pub enum FuseError {
    /// Device call failed.
    #[error("device error: {0}")]
    Transport(#[from] TransportError),

    /// Local path resolution failed.
    #[error("{0}")]
    Tree(#[from] TreeError),

    /// Invalid inode.
    #[error("invalid inode: {0}")]
    InvalidInode(u64),

    /// Invalid file handle.
    #[error("invalid file handle: {0}")]
    InvalidHandle(u64),

    /// File already exists.
    #[error("file already exists: {0}")]
    AlreadyExists(String),

    /// Operation targets a directory.
    #[error("is a directory: inode {0}")]
    IsDirectory(u64),

    /// Mount is read-only.
    #[error("filesystem is read-only")]
    ReadOnly,

    /// The calculator cannot represent this operation.
    #[error("operation not permitted: {0}")]
    NotPermitted(String),

    /// Record would grow past the largest size a buffer accepts.
    #[error("record too large: {0} bytes")]
    FileTooLarge(u64),

    /// Request carries flags or arguments this filesystem does not support.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl FuseError {
    /// Converts this error to a libc error code for FUSE.
    pub fn to_errno(&self) -> i32 {
        match self {
            FuseError::Transport(e) => e.to_errno(),
            FuseError::Tree(e) => e.to_errno(),
            FuseError::InvalidInode(_) => libc::ENOENT,
            FuseError::InvalidHandle(_) => libc::EBADF,
            FuseError::AlreadyExists(_) => libc::EEXIST,
            FuseError::IsDirectory(_) => libc::EISDIR,
            FuseError::ReadOnly => libc::EROFS,
            FuseError::NotPermitted(_) => libc::EPERM,
            FuseError::FileTooLarge(_) => libc::EFBIG,
            FuseError::InvalidArgument(_) => libc::EINVAL,
        }
    }

    /// True when the underlying cause is a lost device.
    pub fn is_device_lost(&self) -> bool {
        matches!(self, FuseError::Transport(e) if e.is_device_lost())
    }
}

/// Result type for FUSE operations.
pub type FuseResult<T> = Result<T, FuseError>;

/// Extension trait to convert errors to errno.
pub trait ToErrno {
    /// Converts this error to a libc error code.
    fn to_errno(&self) -> i32;
}

impl ToErrno for TransportError {
    fn to_errno(&self) -> i32 {
        match self {
            TransportError::DeviceUnavailable(_) | TransportError::Timeout(_) => libc::EIO,
            TransportError::RecordNotFound(_) => libc::ENOENT,
            TransportError::StorageFull { .. } => libc::ENOSPC,
            TransportError::NameConflict(_) => libc::EEXIST,
            TransportError::InvalidContent(_) => libc::EINVAL,
        }
    }
}

impl ToErrno for TreeError {
    fn to_errno(&self) -> i32 {
        match self {
            TreeError::NotFound(_) => libc::ENOENT,
            TreeError::NotADirectory(_) => libc::ENOTDIR,
            TreeError::InvalidName(_) => libc::EINVAL,
            TreeError::NameTooLong(_) => libc::ENAMETOOLONG,
        }
    }
}
