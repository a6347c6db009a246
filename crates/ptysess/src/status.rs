//! Process lifecycle status.

/// The observed lifecycle state of a supervised child process.
///
/// `Status` only ever moves forward: `NotRunYet` -> `Running` ->
/// (`Suspended` <-> `Running`)* -> a single terminal state
/// (`Exited` or `UncaughtSignal`). Once terminal, the status never changes
/// again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    /// `run` has not yet been called, or failed before a child existed.
    NotRunYet,
    /// The child is running normally, identified by its pid.
    Running(i32),
    /// The child has been stopped by `SIGSTOP`/`SIGTSTP`/`SIGTTIN`/`SIGTTOU`.
    Suspended(i32),
    /// The child exited on its own, carrying its exit code.
    Exited(i32),
    /// The child was terminated by an uncaught signal.
    UncaughtSignal(i32),
}

impl Status {
    /// The child's pid, if one has ever been observed running or suspended.
    #[must_use]
    pub const fn pid(self) -> Option<i32> {
        match self {
            Self::Running(pid) | Self::Suspended(pid) => Some(pid),
            Self::NotRunYet | Self::Exited(_) | Self::UncaughtSignal(_) => None,
        }
    }

    /// Whether this status is terminal -- the child will never transition
    /// again.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Exited(_) | Self::UncaughtSignal(_))
    }

    /// Whether the child is currently alive (running or suspended).
    #[must_use]
    pub const fn is_alive(self) -> bool {
        matches!(self, Self::Running(_) | Self::Suspended(_))
    }
}
