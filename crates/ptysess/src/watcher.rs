//! SIGCHLD-driven lifecycle watcher.
//!
//! A background task subscribes to `SIGCHLD` and, on every delivery, calls
//! `waitid` to fold the observed state change into a [`Status`]. Callers
//! read the cached status or await its next terminal transition through
//! [`Watcher`] without ever calling `wait`/`waitid` themselves.

use std::io;
use std::sync::{Arc, Mutex};

use signal_hook::consts::signal::SIGCHLD;
use signal_hook::iterator::Signals;
use tokio::sync::{Notify, mpsc};
use tokio::task::JoinHandle;

use crate::error::{PtyError, Result};
use crate::status::Status;

/// Watches a single child's lifecycle, driven by `SIGCHLD`.
pub struct Watcher {
    pid: i32,
    status: Arc<Mutex<Status>>,
    wait_error: Arc<Mutex<Option<WaitErrorRepr>>>,
    notify: Arc<Notify>,
    _watch_task: JoinHandle<()>,
}

/// `PtyError` isn't `Clone` (its `io::Error` payloads aren't), so the
/// watcher keeps its own small, clonable mirror of the handful of error
/// shapes `waitid` can actually produce here.
#[derive(Debug, Clone)]
enum WaitErrorRepr {
    NoChildProcess,
    Wait(io::ErrorKind, String),
}

impl WaitErrorRepr {
    fn into_error(self) -> PtyError {
        match self {
            Self::NoChildProcess => PtyError::NoChildProcess,
            Self::Wait(kind, msg) => PtyError::Wait(io::Error::new(kind, msg)),
        }
    }
}

impl Watcher {
    /// Start watching `pid`. The child is assumed to already be running.
    #[must_use]
    pub fn new(pid: i32) -> Self {
        let status = Arc::new(Mutex::new(Status::Running(pid)));
        let wait_error = Arc::new(Mutex::new(None));
        let notify = Arc::new(Notify::new());

        let task_status = status.clone();
        let task_error = wait_error.clone();
        let task_notify = notify.clone();
        let watch_task = tokio::spawn(async move {
            let mut sigchld = match start_sigchld_channel() {
                Ok(rx) => rx,
                Err(e) => {
                    tracing::error!(error = %e, "failed to install SIGCHLD handler");
                    *task_error.lock().unwrap() = Some(WaitErrorRepr::Wait(e.kind(), e.to_string()));
                    task_notify.notify_waiters();
                    return;
                }
            };

            // The child may already have changed state before we got a
            // chance to subscribe; check once eagerly.
            reap_once(pid, &task_status, &task_error, &task_notify).await;
            if task_status.lock().unwrap().is_terminal() {
                return;
            }

            while sigchld.recv().await.is_some() {
                reap_once(pid, &task_status, &task_error, &task_notify).await;
                if task_status.lock().unwrap().is_terminal() {
                    break;
                }
                if task_error.lock().unwrap().is_some() {
                    break;
                }
            }
        });

        Self {
            pid,
            status,
            wait_error,
            notify,
            _watch_task: watch_task,
        }
    }

    /// The pid this watcher is observing.
    #[must_use]
    pub const fn pid(&self) -> i32 {
        self.pid
    }

    /// The current cached status.
    ///
    /// When the cached status is `Suspended`, this re-peeks with a
    /// non-blocking, non-destructive `waitid` call first: a
    /// stop-then-continue flip can race the signal handler's attention,
    /// and a caller reading status while suspended should never observe
    /// a continue that already happened.
    pub fn status(&self) -> Result<Status> {
        if let Some(e) = self.wait_error.lock().unwrap().clone() {
            return Err(e.into_error());
        }
        let mut current = *self.status.lock().unwrap();
        if matches!(current, Status::Suspended(_)) {
            if let Ok(Some(fresh)) = blocking_waitid(self.pid, true) {
                current = fresh;
                *self.status.lock().unwrap() = current;
            }
        }
        Ok(current)
    }

    /// Wait for the child to reach a terminal status.
    pub async fn wait_until_exit(&self) -> Result<Status> {
        loop {
            let notified = self.notify.notified();
            let current = self.status()?;
            if current.is_terminal() {
                return Ok(current);
            }
            notified.await;
        }
    }

    /// Send a raw signal number to the child.
    pub fn send_signal(&self, signal: i32) -> Result<()> {
        let rc = unsafe { libc::kill(self.pid, signal) };
        if rc != 0 {
            let err = io::Error::last_os_error();
            return Err(match err.raw_os_error() {
                Some(libc::ESRCH) => PtyError::NoSuchProcess,
                _ => PtyError::Signal(err),
            });
        }
        Ok(())
    }
}

/// Forward every `SIGCHLD` delivery to an async channel. `signal-hook`'s
/// iterator is a blocking API, so it runs on its own dedicated thread
/// rather than the async runtime; the channel closing (receiver dropped)
/// has no way to stop that thread early, but it exits on its own once the
/// process itself is tearing down.
fn start_sigchld_channel() -> io::Result<mpsc::UnboundedReceiver<()>> {
    let mut signals = Signals::new([SIGCHLD])?;
    let (tx, rx) = mpsc::unbounded_channel();
    std::thread::Builder::new()
        .name("ptysess-sigchld".into())
        .spawn(move || {
            for _ in signals.forever() {
                if tx.send(()).is_err() {
                    break;
                }
            }
        })?;
    Ok(rx)
}

async fn reap_once(
    pid: i32,
    status: &Arc<Mutex<Status>>,
    wait_error: &Arc<Mutex<Option<WaitErrorRepr>>>,
    notify: &Arc<Notify>,
) {
    let result = tokio::task::spawn_blocking(move || blocking_waitid(pid, false))
        .await
        .expect("blocking waitid task panicked");

    match result {
        Ok(Some(new_status)) => {
            tracing::debug!(pid, status = ?new_status, "status transition");
            *status.lock().unwrap() = new_status;
            notify.notify_waiters();
        }
        Ok(None) => {}
        Err(PtyError::NoChildProcess) if status.lock().unwrap().is_terminal() => {
            // Already reaped by an earlier delivery; SIGCHLD can coalesce
            // and arrive more times than there are state changes left.
            tracing::warn!(pid, "spurious SIGCHLD after child already reaped");
        }
        Err(e) => {
            let repr = match &e {
                PtyError::NoChildProcess => WaitErrorRepr::NoChildProcess,
                PtyError::Wait(io_err) => WaitErrorRepr::Wait(io_err.kind(), io_err.to_string()),
                other => WaitErrorRepr::Wait(io::ErrorKind::Other, other.to_string()),
            };
            *wait_error.lock().unwrap() = Some(repr);
            notify.notify_waiters();
        }
    }
}

/// Issue a single `waitid(P_PID, pid, ..., WEXITED|WSTOPPED|WCONTINUED)`
/// call. `peek` adds `WNOHANG|WNOWAIT` so the call never blocks and never
/// consumes a state the signal-driven path still needs to observe.
fn blocking_waitid(pid: i32, peek: bool) -> Result<Option<Status>> {
    let mut info: libc::siginfo_t = unsafe { std::mem::zeroed() };
    let mut flags = libc::WEXITED | libc::WSTOPPED | libc::WCONTINUED;
    if peek {
        flags |= libc::WNOHANG | libc::WNOWAIT;
    }
    let rc = unsafe { libc::waitid(libc::P_PID, pid as libc::id_t, &raw mut info, flags) };
    if rc != 0 {
        let err = io::Error::last_os_error();
        return Err(match err.raw_os_error() {
            Some(libc::ECHILD) => PtyError::NoChildProcess,
            _ => PtyError::Wait(err),
        });
    }

    let observed_pid = unsafe { info.si_pid() };
    if observed_pid == 0 {
        // WNOHANG with nothing new to report.
        return Ok(None);
    }
    if observed_pid != pid {
        return Err(PtyError::NoChildProcess);
    }

    let status_val = unsafe { info.si_status() };
    let status = match info.si_code {
        libc::CLD_EXITED => Status::Exited(status_val),
        libc::CLD_KILLED | libc::CLD_DUMPED => Status::UncaughtSignal(status_val),
        libc::CLD_STOPPED => Status::Suspended(pid),
        libc::CLD_CONTINUED => Status::Running(pid),
        _ => Status::Running(pid),
    };
    Ok(Some(status))
}
