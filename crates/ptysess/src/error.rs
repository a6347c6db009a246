//! Error types for the ptysess crate.
//!
//! [`PtyError`] covers the error taxonomy: FD-state preconditions,
//! no-such-process/no-child races, wrapped spawn/IO errno, and path
//! resolution. Programmer errors -- reading a stream that was never
//! requested, calling `run` twice -- are not represented here; those panic.

use std::io;
use std::path::PathBuf;

/// The error type for PTY process operations.
#[derive(Debug, thiserror::Error)]
pub enum PtyError {
    /// Failed to allocate a PTY primary/secondary pair.
    #[error("failed to create PTY: {0}")]
    Create(#[source] io::Error),

    /// `posix_spawn` itself failed -- its own return value, since the
    /// implementation propagates child-side exec failures synchronously.
    #[error("failed to spawn process: {0}")]
    Spawn(#[source] io::Error),

    /// A generic I/O failure reading or writing a captured stream.
    #[error("I/O error: {0}")]
    Io(#[source] io::Error),

    /// Failed to read terminal attributes (`tcgetattr`).
    #[error("failed to get terminal attributes: {0}")]
    GetAttributes(#[source] io::Error),

    /// Failed to write terminal attributes (`tcsetattr`).
    #[error("failed to set terminal attributes: {0}")]
    SetAttributes(#[source] io::Error),

    /// Failed to resize the PTY (`tcsetwinsize`).
    #[error("failed to resize PTY: {0}")]
    Resize(#[source] io::Error),

    /// Failed to send a signal to the child (`kill`).
    #[error("failed to send signal: {0}")]
    Signal(#[source] io::Error),

    /// `waitid` failed for a reason other than ECHILD.
    #[error("failed to wait for child: {0}")]
    Wait(#[source] io::Error),

    /// A descriptor operation was attempted on a descriptor that is not
    /// (yet, or any longer) valid -- querying or setting PTY options
    /// before `run`, or after the PTY has been closed.
    #[error("bad file descriptor")]
    BadFileDescriptor,

    /// A control operation (`terminate`, `interrupt`, `suspend`, `resume`,
    /// `send_signal`) was attempted before `run` succeeded.
    #[error("no such process")]
    NoSuchProcess,

    /// `waitid` observed a delivery that didn't belong to our child --
    /// another part of the process raced our wait.
    #[error("no child process")]
    NoChildProcess,

    /// The executable path does not exist.
    #[error("file read: no such file: {}", .0.display())]
    NotFound(PathBuf),

    /// An executable URL used a scheme other than `file`.
    #[error("unsupported scheme: {0}")]
    UnsupportedScheme(String),

    /// A working directory was requested but this host's `posix_spawn`
    /// has no chdir file action.
    #[error("chdir action unsupported on this platform: {0}")]
    ChdirUnsupported(#[source] io::Error),
}

/// A specialized `Result` type for ptysess operations.
pub type Result<T> = std::result::Result<T, PtyError>;

impl PtyError {
    /// Build a [`PtyError`] from a raw spawn-path errno, distinguishing
    /// "file not found" (ENOENT) from other spawn failures.
    #[must_use]
    pub(crate) fn from_spawn_errno(path: &std::ffi::CStr, code: i32) -> Self {
        if code == libc::ENOENT {
            Self::NotFound(PathBuf::from(path.to_string_lossy().into_owned()))
        } else {
            Self::Spawn(io::Error::from_raw_os_error(code))
        }
    }
}

impl From<rustix::io::Errno> for PtyError {
    fn from(errno: rustix::io::Errno) -> Self {
        match errno {
            rustix::io::Errno::BADF => Self::BadFileDescriptor,
            rustix::io::Errno::SRCH => Self::NoSuchProcess,
            rustix::io::Errno::CHILD => Self::NoChildProcess,
            other => Self::Io(io::Error::from_raw_os_error(other.raw_os_error())),
        }
    }
}
