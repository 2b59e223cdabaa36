//! Mount configuration for the FUSE filesystem.

use std::time::Duration;

/// Default timeout for a single device call.
pub const DEFAULT_IO_TIMEOUT: Duration = Duration::from_secs(10);

/// Default attribute cache TTL handed to the kernel.
pub const DEFAULT_ATTR_TTL: Duration = Duration::from_secs(1);

/// Configuration options for the FUSE filesystem.
#[derive(Debug, Clone)]
pub struct MountConfig {
    /// Reject every mutating operation with `EROFS`.
    pub read_only: bool,

    /// Timeout for individual device calls. A call that exceeds it fails
    /// the session like a disconnect.
    pub io_timeout: Duration,

    /// Time-to-live for attributes and entries returned to the kernel.
    pub attr_ttl: Duration,

    /// Extensions new records may be created with.
    ///
    /// The calculator only runs Python scripts, so the default is `["py"]`.
    pub writable_extensions: Vec<String>,

    /// Owner reported for every entry. Defaults to the mounting user.
    pub uid: u32,
    pub gid: u32,
}

impl Default for MountConfig {
    fn default() -> Self {
        // SAFETY: getuid/getgid are always successful and have no side effects
        let (uid, gid) = unsafe { (libc::getuid(), libc::getgid()) };
        Self {
            read_only: false,
            io_timeout: DEFAULT_IO_TIMEOUT,
            attr_ttl: DEFAULT_ATTR_TTL,
            writable_extensions: vec![numfs_core::record::SCRIPT_EXTENSION.to_string()],
            uid,
            gid,
        }
    }
}

impl MountConfig {
    /// Sets read-only mode.
    #[must_use]
    pub fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    /// Sets the timeout for individual device calls.
    #[must_use]
    pub fn io_timeout(mut self, timeout: Duration) -> Self {
        self.io_timeout = timeout;
        self
    }

    /// Sets the cache TTL for attributes.
    #[must_use]
    pub fn attr_ttl(mut self, ttl: Duration) -> Self {
        self.attr_ttl = ttl;
        self
    }

    /// Replaces the list of extensions new records may use.
    #[must_use]
    pub fn writable_extensions<I, S>(mut self, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.writable_extensions = extensions.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the reported owner.
    #[must_use]
    pub fn owner(mut self, uid: u32, gid: u32) -> Self {
        self.uid = uid;
        self.gid = gid;
        self
    }

    /// Whether a record with this full name may be created.
    pub fn may_create(&self, name: &str) -> bool {
        numfs_core::record::extension(name)
            .is_some_and(|ext| self.writable_extensions.iter().any(|w| w == ext))
    }
}
