//! Device session: connect once, serialize every call, fail hard.
//!
//! The session owns the only [`Connection`] and drives it from a dedicated
//! worker thread, so at most one device call is ever in flight. Callers hand
//! jobs to the worker over a channel and wait for the reply with a bounded
//! timeout. The one blocking `connect()` is the only call waited for without
//! a timeout.
//!
//! State machine:
//!
//! ```text
//! Disconnected --ensure_connected--> Connecting --ok--> Connected
//!                                         |                 |
//!                                         +--err--> Failed <+-- report_failure / timeout
//! ```
//!
//! `Failed` is terminal. Entering it fires the [`Teardown`] hook exactly once.

use crate::error::TransportError;
use crate::transport::{Connection, Connector};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use std::sync::Once;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Lifecycle of the device session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
    /// Terminal. No call reaches the device again.
    Failed,
}

/// Host hook invoked once when the session fails (typically: unmount).
pub trait Teardown: Send + Sync {
    fn teardown(&self, reason: &str);
}

impl<F> Teardown for F
where
    F: Fn(&str) + Send + Sync,
{
    fn teardown(&self, reason: &str) {
        self(reason);
    }
}

/// Counters for device calls made through the session.
#[derive(Debug, Default)]
pub struct SessionStats {
    pub calls_started: AtomicU64,
    pub calls_completed: AtomicU64,
    pub calls_failed: AtomicU64,
    pub calls_timed_out: AtomicU64,
}

impl SessionStats {
    fn record_start(&self) {
        self.calls_started.fetch_add(1, Ordering::Relaxed);
    }

    fn record_complete(&self) {
        self.calls_completed.fetch_add(1, Ordering::Relaxed);
    }

    fn record_failure(&self) {
        self.calls_failed.fetch_add(1, Ordering::Relaxed);
    }

    fn record_timeout(&self) {
        self.calls_timed_out.fetch_add(1, Ordering::Relaxed);
    }
}

type Job = Box<dyn FnOnce(&mut dyn Connection) + Send>;

/// The thread that owns the live connection.
struct DeviceWorker {
    jobs: Sender<Job>,
    handle: JoinHandle<()>,
}

impl DeviceWorker {
    fn spawn(mut conn: Box<dyn Connection>) -> Result<Self, TransportError> {
        let (jobs, queue): (Sender<Job>, Receiver<Job>) = crossbeam_channel::unbounded();
        let handle = std::thread::Builder::new()
            .name("numfs-device".to_string())
            .spawn(move || {
                for job in queue {
                    job(conn.as_mut());
                }
                debug!("device worker stopped");
            })
            .map_err(|e| TransportError::unavailable(format!("spawning device worker: {e}")))?;
        Ok(Self { jobs, handle })
    }

    /// Closes the job queue. Joins the thread only when it is known to be idle,
    /// a hung device call would otherwise block the caller forever.
    fn stop(self, wait: bool) {
        drop(self.jobs);
        if wait && self.handle.join().is_err() {
            warn!("device worker panicked");
        }
    }
}

#[derive(Default)]
struct Link {
    connector: Option<Box<dyn Connector>>,
    worker: Option<DeviceWorker>,
}

/// One device connection attempt and its outcome.
pub struct Session {
    state: Mutex<SessionState>,
    /// Held across the blocking connect so later callers wait for its outcome.
    link: Mutex<Link>,
    teardown: Box<dyn Teardown>,
    teardown_once: Once,
    io_timeout: Duration,
    stats: SessionStats,
}

impl Session {
    /// Creates a `Disconnected` session. Nothing touches the device yet.
    pub fn new(
        connector: Box<dyn Connector>,
        teardown: Box<dyn Teardown>,
        io_timeout: Duration,
    ) -> Self {
        Self {
            state: Mutex::new(SessionState::Disconnected),
            link: Mutex::new(Link {
                connector: Some(connector),
                worker: None,
            }),
            teardown,
            teardown_once: Once::new(),
            io_timeout,
            stats: SessionStats::default(),
        }
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock()
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    pub fn io_timeout(&self) -> Duration {
        self.io_timeout
    }

    fn failed_error() -> TransportError {
        TransportError::unavailable("device session has failed")
    }

    /// Fails once the session is `Failed`. Never blocks on the device.
    pub fn check_alive(&self) -> Result<(), TransportError> {
        match self.state() {
            SessionState::Failed => Err(Self::failed_error()),
            _ => Ok(()),
        }
    }

    /// Makes sure the device is connected.
    ///
    /// Returns immediately when `Connected`. The first call performs the one
    /// blocking connect; concurrent callers wait for its outcome. After a
    /// failure this fails immediately and never reconnects.
    pub fn ensure_connected(&self) -> Result<(), TransportError> {
        let mut link = self.link.lock();
        match self.state() {
            SessionState::Connected => return Ok(()),
            SessionState::Failed => return Err(Self::failed_error()),
            SessionState::Disconnected | SessionState::Connecting => {}
        }

        let Some(connector) = link.connector.take() else {
            return Err(Self::failed_error());
        };
        *self.state.lock() = SessionState::Connecting;
        info!(device = %connector.describe(), "connecting to device");

        let worker = connector.connect().and_then(DeviceWorker::spawn);
        match worker {
            Ok(worker) => {
                link.worker = Some(worker);
                *self.state.lock() = SessionState::Connected;
                info!("device connected");
                Ok(())
            }
            Err(e) => {
                drop(link);
                self.report_failure(&e);
                Err(e)
            }
        }
    }

    /// Runs `f` against the connection on the device worker.
    ///
    /// Waits at most `io_timeout` for the reply. A timeout or a dead worker
    /// fails the session; other errors are returned unchanged and the caller
    /// decides whether to escalate them with [`report_failure`](Self::report_failure).
    pub fn call<T, F>(&self, op: &'static str, f: F) -> Result<T, TransportError>
    where
        T: Send + 'static,
        F: FnOnce(&mut dyn Connection) -> Result<T, TransportError> + Send + 'static,
    {
        self.ensure_connected()?;
        let jobs = self
            .link
            .lock()
            .worker
            .as_ref()
            .map(|w| w.jobs.clone())
            .ok_or_else(Self::failed_error)?;

        self.stats.record_start();
        let (reply, answer) = crossbeam_channel::bounded(1);
        let job: Job = Box::new(move |conn: &mut dyn Connection| {
            // The caller may have timed out and gone away
            let _ = reply.send(f(conn));
        });
        if jobs.send(job).is_err() {
            let e = TransportError::unavailable("device worker is gone");
            self.stats.record_failure();
            self.report_failure(&e);
            return Err(e);
        }

        match answer.recv_timeout(self.io_timeout) {
            Ok(Ok(value)) => {
                self.stats.record_complete();
                Ok(value)
            }
            Ok(Err(e)) => {
                debug!(op, error = %e, "device call failed");
                self.stats.record_failure();
                Err(e)
            }
            Err(RecvTimeoutError::Timeout) => {
                let e = TransportError::Timeout(self.io_timeout);
                warn!(op, timeout = ?self.io_timeout, "device call timed out");
                self.stats.record_timeout();
                self.report_failure(&e);
                Err(e)
            }
            Err(RecvTimeoutError::Disconnected) => {
                let e = TransportError::unavailable(format!("device worker died during {op}"));
                self.stats.record_failure();
                self.report_failure(&e);
                Err(e)
            }
        }
    }

    /// Moves the session to `Failed` and fires the teardown hook once.
    pub fn report_failure(&self, cause: &TransportError) {
        let previous = std::mem::replace(&mut *self.state.lock(), SessionState::Failed);
        if previous != SessionState::Failed {
            error!(error = %cause, "device lost, failing the mount");
        }

        let worker = self.link.lock().worker.take();
        if let Some(worker) = worker {
            worker.stop(false);
        }

        let reason = cause.to_string();
        self.teardown_once
            .call_once(|| self.teardown.teardown(&reason));
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        let idle = self.state() == SessionState::Connected;
        if let Some(worker) = self.link.get_mut().worker.take() {
            worker.stop(idle);
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("state", &self.state())
            .field("io_timeout", &self.io_timeout)
            .finish_non_exhaustive()
    }
}
