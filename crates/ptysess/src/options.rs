//! PTY line-discipline options, backed by `termios`.

use std::os::unix::io::AsFd;

use bitflags::bitflags;
use rustix::termios::{LocalModes, OptionalActions, OutputModes, tcgetattr, tcsetattr};

use crate::error::{PtyError, Result};

bitflags! {
    /// A small, declarative view over the `termios` bits this crate cares
    /// about. `DISABLE_ECHO` and `NON_CANONICAL` are inverted relative to
    /// their underlying termios flags (`ECHO`, `ICANON`): the flag here
    /// means "off", since that's the sense callers usually want to toggle
    /// (e.g. disabling echo for a password prompt). `OUTPUT_CRLF` maps
    /// `ONLCR` directly.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct PtyOptions: u8 {
        /// Suppress the terminal's local echo of input back to the PTY.
        const DISABLE_ECHO = 0b001;
        /// Put the terminal in non-canonical (raw) input mode.
        const NON_CANONICAL = 0b010;
        /// Translate outgoing `\n` to `\r\n` (`ONLCR`).
        const OUTPUT_CRLF = 0b100;
    }
}

impl PtyOptions {
    /// Read the current options off an open PTY descriptor.
    pub fn from_fd<Fd: AsFd>(fd: Fd) -> Result<Self> {
        let termios = tcgetattr(fd.as_fd()).map_err(|e| PtyError::GetAttributes(e.into()))?;
        let mut opts = Self::empty();
        opts.set(Self::DISABLE_ECHO, !termios.local_modes.contains(LocalModes::ECHO));
        opts.set(Self::NON_CANONICAL, !termios.local_modes.contains(LocalModes::ICANON));
        opts.set(Self::OUTPUT_CRLF, termios.output_modes.contains(OutputModes::ONLCR));
        Ok(opts)
    }

    /// Apply these options to an open PTY descriptor.
    ///
    /// `immediately` selects `TCSANOW` over waiting for queued output to
    /// drain; `drain_first` requests `TCSADRAIN` semantics and takes
    /// precedence when both are set, since draining first is always safe.
    /// When neither is set, the default action is `TCSANOW` (a bitmask of
    /// zero maps to "now", not "drain"), matching the open question this
    /// crate settled on.
    pub fn apply_to<Fd: AsFd>(self, fd: Fd, immediately: bool, drain_first: bool) -> Result<()> {
        let fd = fd.as_fd();
        let mut termios = tcgetattr(fd).map_err(|e| PtyError::GetAttributes(e.into()))?;
        termios
            .local_modes
            .set(LocalModes::ECHO, !self.contains(Self::DISABLE_ECHO));
        termios
            .local_modes
            .set(LocalModes::ICANON, !self.contains(Self::NON_CANONICAL));
        termios
            .output_modes
            .set(OutputModes::ONLCR, self.contains(Self::OUTPUT_CRLF));

        let action = if drain_first {
            OptionalActions::Drain
        } else if immediately {
            OptionalActions::Now
        } else {
            OptionalActions::Now
        };
        tcsetattr(fd, action, &termios).map_err(|e| PtyError::SetAttributes(e.into()))
    }
}
