//! Mounting, unmounting and the teardown hook that ties a failed device
//! session to the mount.

use crate::config::MountConfig;
use crate::ops::NumworksFs;
use fuser::{BackgroundSession, MountOption};
use numfs_core::Teardown;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::time::Duration;

/// Timeout for the mount syscall and for a graceful `session.join()`.
const MOUNT_TIMEOUT: Duration = Duration::from_secs(10);
const JOIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Why the mount loop should stop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MountEvent {
    /// Ctrl+C, SIGTERM or SIGHUP.
    Interrupted,
    /// The device session failed; the mount must detach.
    DeviceLost(String),
}

/// Teardown hook that tells the mount loop to unmount.
#[derive(Debug, Clone)]
pub struct ChannelTeardown {
    events: mpsc::Sender<MountEvent>,
}

impl ChannelTeardown {
    pub fn new(events: mpsc::Sender<MountEvent>) -> Self {
        Self { events }
    }
}

impl Teardown for ChannelTeardown {
    fn teardown(&self, reason: &str) {
        // The loop may already be gone if we are shutting down anyway
        let _ = self.events.send(MountEvent::DeviceLost(reason.to_string()));
    }
}

/// Mount options for a calculator mount.
pub fn mount_options(config: &MountConfig) -> Vec<MountOption> {
    let mut options = vec![
        MountOption::FSName("numworks".to_string()),
        MountOption::Subtype("numfs".to_string()),
        MountOption::AutoUnmount,
        MountOption::DefaultPermissions,
    ];

    #[cfg(target_os = "macos")]
    options.push(MountOption::CUSTOM("volname=NumWorks".to_string()));

    if config.read_only {
        options.push(MountOption::RO);
    } else {
        options.push(MountOption::RW);
    }
    options
}

/// Whether FUSE looks usable on this machine.
pub fn is_available() -> bool {
    #[cfg(target_os = "macos")]
    {
        Path::new("/Library/Filesystems/macfuse.fs").exists()
    }
    #[cfg(target_os = "linux")]
    {
        Path::new("/dev/fuse").exists()
    }
    #[cfg(not(any(target_os = "macos", target_os = "linux")))]
    {
        false
    }
}

/// Handle to a mounted filesystem. Dropping it unmounts.
pub struct FuseMountHandle {
    session: Option<BackgroundSession>,
    mountpoint: PathBuf,
}

impl FuseMountHandle {
    pub fn mountpoint(&self) -> &Path {
        &self.mountpoint
    }

    /// Lazy unmount through system tools, for when the FUSE session is stuck.
    fn force_unmount(&self) {
        #[cfg(target_os = "macos")]
        {
            let _ = std::process::Command::new("umount")
                .arg("-f")
                .arg(&self.mountpoint)
                .output();
        }

        #[cfg(target_os = "linux")]
        {
            let _ = std::process::Command::new("fusermount")
                .args(["-uz"])
                .arg(&self.mountpoint)
                .output();
        }
    }
}

impl Drop for FuseMountHandle {
    fn drop(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };
        tracing::debug!(mountpoint = %self.mountpoint.display(), "unmounting");

        // join() blocks while files are open; bound it
        let (tx, rx) = mpsc::channel();
        std::thread::spawn(move || {
            session.join();
            let _ = tx.send(());
        });

        if rx.recv_timeout(JOIN_TIMEOUT).is_err() {
            tracing::warn!(
                mountpoint = %self.mountpoint.display(),
                timeout = ?JOIN_TIMEOUT,
                "unmount timed out, forcing"
            );
            self.force_unmount();
        }
    }
}

/// Mounts `fs` at `mountpoint` in the background.
///
/// The mount call runs on its own thread with a timeout, since mounting over
/// a stale FUSE mount can block forever.
pub fn spawn_mount(
    fs: NumworksFs,
    mountpoint: &Path,
    options: &[MountOption],
) -> io::Result<FuseMountHandle> {
    let target = mountpoint.to_path_buf();
    let options = options.to_vec();
    let (tx, rx) = mpsc::channel();

    std::thread::spawn(move || {
        let _ = tx.send(fuser::spawn_mount2(fs, &target, &options));
    });

    let session = match rx.recv_timeout(MOUNT_TIMEOUT) {
        Ok(result) => result?,
        Err(mpsc::RecvTimeoutError::Timeout) => {
            return Err(io::Error::new(
                io::ErrorKind::TimedOut,
                "mount timed out, the mountpoint may be a stale FUSE mount",
            ));
        }
        Err(mpsc::RecvTimeoutError::Disconnected) => {
            return Err(io::Error::other("mount thread terminated unexpectedly"));
        }
    };

    Ok(FuseMountHandle {
        session: Some(session),
        mountpoint: mountpoint.to_path_buf(),
    })
}
