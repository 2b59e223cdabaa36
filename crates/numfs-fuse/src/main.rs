//! numfs - Mount NumWorks calculator storage as a FUSE filesystem.
//!
//! Usage: numfs (--image <FILE> | --demo) <MOUNTPOINT> [--read-only] [-v]

use anyhow::{Context, Result};
use clap::{ArgGroup, Parser};
use numfs_core::{Connector, ImageConnector, MemoryDevice, RecordKey, Session};
use numfs_fuse::backend::{self, ChannelTeardown, MountEvent};
use numfs_fuse::{MountConfig, NumworksFs};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::sync::mpsc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[cfg(feature = "mimalloc")]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[derive(Parser)]
#[command(name = "numfs")]
#[command(about = "Mount NumWorks calculator storage as a FUSE filesystem")]
#[command(version)]
#[command(group(ArgGroup::new("device").required(true).args(["image", "demo"])))]
struct Cli {
    /// Mountpoint for the filesystem
    mount: PathBuf,

    /// Storage image (JSON backup of the calculator's scripts) to mount
    #[arg(long, env = "NUMFS_IMAGE")]
    image: Option<PathBuf>,

    /// Create the storage image if it does not exist
    #[arg(long, requires = "image")]
    create: bool,

    /// Mount an in-memory demo calculator
    #[arg(long)]
    demo: bool,

    /// Mount as read-only (default: read-write)
    #[arg(long)]
    read_only: bool,

    /// Seconds to wait for a device call before treating the device as lost
    #[arg(long, default_value_t = 10)]
    timeout: u64,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .init();

    run(cli)
}

fn demo_device() -> MemoryDevice {
    let device = MemoryDevice::new(numfs_core::DEFAULT_CAPACITY);
    device.insert(
        RecordKey::root("hello.py"),
        "from math import *\nprint(\"Hello from numfs\")\n",
    );
    device.insert(
        RecordKey::root("squares.py"),
        "def squares(n):\n  return [i * i for i in range(n)]\n",
    );
    device
}

fn connector(cli: &Cli) -> Box<dyn Connector> {
    match &cli.image {
        Some(path) => {
            let connector = ImageConnector::new(path);
            if cli.create {
                Box::new(connector.create_if_missing())
            } else {
                Box::new(connector)
            }
        }
        None => Box::new(demo_device().connector()),
    }
}

fn run(cli: Cli) -> Result<()> {
    if !cli.mount.is_dir() {
        anyhow::bail!("Mountpoint is not a directory: {}", cli.mount.display());
    }
    if !backend::is_available() {
        warn!("FUSE does not look installed, mounting will probably fail");
    }

    let config = MountConfig::default()
        .read_only(cli.read_only)
        .io_timeout(Duration::from_secs(cli.timeout));

    let (tx, rx) = mpsc::channel::<MountEvent>();
    let interrupt = tx.clone();
    ctrlc::set_handler(move || {
        let _ = interrupt.send(MountEvent::Interrupted);
    })
    .context("Failed to set signal handler")?;

    let session = Arc::new(Session::new(
        connector(&cli),
        Box::new(ChannelTeardown::new(tx)),
        config.io_timeout,
    ));
    session
        .ensure_connected()
        .context("Failed to connect to the calculator")?;

    let options = backend::mount_options(&config);
    let fs = NumworksFs::new(Arc::clone(&session), config);
    fs.refresh().context("Failed to list calculator storage")?;
    info!(records = fs.tree().record_count(), "storage loaded");

    let handle = backend::spawn_mount(fs, &cli.mount, &options)
        .with_context(|| format!("Failed to mount at {}", cli.mount.display()))?;
    info!(mountpoint = %handle.mountpoint().display(), "mounted (press Ctrl+C to unmount)");

    match rx.recv() {
        Ok(MountEvent::Interrupted) => info!("Received interrupt signal, unmounting..."),
        Ok(MountEvent::DeviceLost(reason)) => warn!(%reason, "Calculator lost, unmounting..."),
        Err(_) => warn!("Event channel closed unexpectedly"),
    }

    drop(handle);
    let stats = session.stats();
    info!(
        calls = stats.calls_started.load(Ordering::Relaxed),
        failed = stats.calls_failed.load(Ordering::Relaxed),
        timed_out = stats.calls_timed_out.load(Ordering::Relaxed),
        "Filesystem unmounted"
    );
    Ok(())
}
