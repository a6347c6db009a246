//! Configuration types: capture requests, spawn configuration, signals.
//!
//! This module provides [`PtyProcessConfig`] for configuring how a child is
//! spawned, [`CaptureRequest`] for choosing how each output stream is
//! wired, and [`PtySignal`] for the signals this crate knows how to send.
//! Configuration here is always programmatic -- there is no config file
//! format to parse.

use std::collections::HashMap;
use std::ffi::OsString;
use std::path::PathBuf;

/// How a single child-side stream (stdout or stderr) is wired on spawn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CaptureRequest {
    /// Leave the stream attached to whatever the parent's own descriptor
    /// is (no redirection, no capture).
    None,
    /// Redirect to `/dev/null`; no bytes are ever observable.
    Null,
    /// Redirect through a dedicated pipe, captured independently of the
    /// PTY.
    Pipe,
    /// Redirect to the PTY secondary, the same stream the child's
    /// terminal I/O goes through.
    #[default]
    Pty,
}

/// A signal mask to install on the child via `posix_spawnattr_setsigmask`,
/// applied atomically as part of the spawn rather than raced after fork.
#[derive(Debug, Clone, Copy, Default)]
pub struct SignalMask(libc::sigset_t);

impl SignalMask {
    /// An empty mask: no signals blocked.
    #[must_use]
    pub fn empty() -> Self {
        let mut set: libc::sigset_t = unsafe { std::mem::zeroed() };
        unsafe {
            libc::sigemptyset(&raw mut set);
        }
        Self(set)
    }

    /// Block the given signal number in addition to whatever is already
    /// in this mask.
    #[must_use]
    pub fn with_blocked(mut self, signal: i32) -> Self {
        unsafe {
            libc::sigaddset(&raw mut self.0, signal);
        }
        self
    }

    pub(crate) fn as_raw(&self) -> &libc::sigset_t {
        &self.0
    }
}

/// Configuration for spawning a child process attached to a PTY.
///
/// # Example
///
/// ```
/// use ptysess::PtyProcessConfig;
///
/// let config = PtyProcessConfig::builder()
///     .working_directory("/tmp")
///     .env("TERM", "xterm-256color")
///     .window_size(80, 24)
///     .build();
/// ```
#[derive(Debug, Clone)]
pub struct PtyProcessConfig {
    /// Working directory for the child process. An empty path is treated
    /// the same as `None` -- it does not request a chdir action.
    pub working_directory: Option<PathBuf>,

    /// Environment variables to set for the child process. If `None`,
    /// inherits from the parent process (subject to `env_add`/`env_remove`).
    pub env: Option<HashMap<OsString, OsString>>,

    /// Additional environment variables to add (merged with the base env).
    pub env_add: HashMap<OsString, OsString>,

    /// Environment variables to remove from the base environment.
    pub env_remove: Vec<OsString>,

    /// Initial PTY window size (columns, rows).
    pub window_size: (u16, u16),

    /// Whether the child starts its own process group.
    pub new_session: bool,

    /// Whether the PTY secondary becomes the child's controlling terminal.
    pub controlling_terminal: bool,

    /// Signal mask to install on the child atomically during spawn.
    pub signal_mask: Option<SignalMask>,
}

impl Default for PtyProcessConfig {
    fn default() -> Self {
        Self {
            working_directory: None,
            env: None,
            env_add: HashMap::new(),
            env_remove: Vec::new(),
            window_size: (80, 24),
            new_session: true,
            controlling_terminal: true,
            signal_mask: None,
        }
    }
}

impl PtyProcessConfig {
    /// Create a new builder with default settings.
    #[must_use]
    pub fn builder() -> PtyProcessConfigBuilder {
        PtyProcessConfigBuilder::new()
    }

    /// The effective environment for the child: base env (inherited or
    /// explicit) with `env_add` merged in and `env_remove` stripped out.
    #[must_use]
    pub fn effective_env(&self) -> HashMap<OsString, OsString> {
        let mut env = self
            .env
            .clone()
            .unwrap_or_else(|| std::env::vars_os().collect());
        env.extend(self.env_add.clone());
        for key in &self.env_remove {
            env.remove(key);
        }
        env
    }

    /// The working directory to chdir into, treating an empty path as
    /// equivalent to not having requested one.
    #[must_use]
    pub fn effective_working_directory(&self) -> Option<&PathBuf> {
        self.working_directory
            .as_ref()
            .filter(|p| !p.as_os_str().is_empty())
    }
}

/// Builder for [`PtyProcessConfig`].
#[derive(Debug, Clone, Default)]
pub struct PtyProcessConfigBuilder {
    config: PtyProcessConfig,
}

impl PtyProcessConfigBuilder {
    /// Create a new builder with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the working directory for the child process.
    #[must_use]
    pub fn working_directory(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.working_directory = Some(path.into());
        self
    }

    /// Replace the inherited environment entirely.
    #[must_use]
    pub fn env_clear(mut self) -> Self {
        self.config.env = Some(HashMap::new());
        self
    }

    /// Add an environment variable.
    #[must_use]
    pub fn env(mut self, key: impl Into<OsString>, value: impl Into<OsString>) -> Self {
        self.config.env_add.insert(key.into(), value.into());
        self
    }

    /// Remove an environment variable.
    #[must_use]
    pub fn env_remove(mut self, key: impl Into<OsString>) -> Self {
        self.config.env_remove.push(key.into());
        self
    }

    /// Set the initial window size.
    #[must_use]
    pub const fn window_size(mut self, cols: u16, rows: u16) -> Self {
        self.config.window_size = (cols, rows);
        self
    }

    /// Set whether the child starts a new process group.
    #[must_use]
    pub const fn new_session(mut self, value: bool) -> Self {
        self.config.new_session = value;
        self
    }

    /// Set whether the PTY secondary becomes the controlling terminal.
    #[must_use]
    pub const fn controlling_terminal(mut self, value: bool) -> Self {
        self.config.controlling_terminal = value;
        self
    }

    /// Install a signal mask on the child during spawn.
    #[must_use]
    pub fn signal_mask(mut self, mask: SignalMask) -> Self {
        self.config.signal_mask = Some(mask);
        self
    }

    /// Build the configuration.
    #[must_use]
    pub fn build(self) -> PtyProcessConfig {
        self.config
    }
}

/// Signals this crate knows how to deliver to a supervised child.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum PtySignal {
    /// `SIGINT` (Ctrl+C).
    Interrupt,
    /// `SIGQUIT` (Ctrl+\).
    Quit,
    /// `SIGTERM`.
    Terminate,
    /// `SIGKILL`, uncatchable.
    Kill,
    /// `SIGHUP`.
    Hangup,
    /// `SIGWINCH`, a terminal resize notification.
    WindowChange,
    /// `SIGTSTP` (Ctrl+Z).
    Stop,
    /// `SIGCONT`.
    Continue,
    /// `SIGUSR1`.
    User1,
    /// `SIGUSR2`.
    User2,
}

impl PtySignal {
    /// The underlying Unix signal number.
    #[must_use]
    pub const fn as_raw(self) -> i32 {
        match self {
            Self::Interrupt => libc::SIGINT,
            Self::Quit => libc::SIGQUIT,
            Self::Terminate => libc::SIGTERM,
            Self::Kill => libc::SIGKILL,
            Self::Hangup => libc::SIGHUP,
            Self::WindowChange => libc::SIGWINCH,
            Self::Stop => libc::SIGTSTP,
            Self::Continue => libc::SIGCONT,
            Self::User1 => libc::SIGUSR1,
            Self::User2 => libc::SIGUSR2,
        }
    }
}

/// Window size for a PTY.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowSize {
    /// Number of columns (characters per line).
    pub cols: u16,
    /// Number of rows (lines).
    pub rows: u16,
    /// Pixel width, usually 0.
    pub xpixel: u16,
    /// Pixel height, usually 0.
    pub ypixel: u16,
}

impl WindowSize {
    /// Create a window size from columns and rows, with no pixel info.
    #[must_use]
    pub const fn new(cols: u16, rows: u16) -> Self {
        Self {
            cols,
            rows,
            xpixel: 0,
            ypixel: 0,
        }
    }

    /// Create a window size with pixel dimensions.
    #[must_use]
    pub const fn with_pixels(cols: u16, rows: u16, xpixel: u16, ypixel: u16) -> Self {
        Self {
            cols,
            rows,
            xpixel,
            ypixel,
        }
    }
}

impl Default for WindowSize {
    fn default() -> Self {
        Self::new(80, 24)
    }
}

impl From<(u16, u16)> for WindowSize {
    fn from((cols, rows): (u16, u16)) -> Self {
        Self::new(cols, rows)
    }
}
