//! Move-only file descriptor ownership.

use std::io;
use std::os::unix::io::{AsFd, AsRawFd, BorrowedFd, FromRawFd, OwnedFd, RawFd};

/// A single owned file descriptor.
///
/// `FdHandle` is move-only: it is not `Clone`, so a caller can never end up
/// holding two owners of the same descriptor. Dropping it closes the
/// descriptor exactly once; a failure from `close` is swallowed, matching
/// `std`'s own `OwnedFd` behavior, since there's nothing useful a caller
/// could do with a close-time error on drop.
#[derive(Debug)]
pub struct FdHandle(OwnedFd);

impl FdHandle {
    /// Take ownership of an already-open raw descriptor.
    ///
    /// # Safety
    /// `fd` must be a valid, open, uniquely-owned descriptor.
    pub unsafe fn from_raw_fd(fd: RawFd) -> Self {
        Self(unsafe { OwnedFd::from_raw_fd(fd) })
    }

    /// Wrap an already-owned descriptor.
    #[must_use]
    pub fn from_owned(fd: OwnedFd) -> Self {
        Self(fd)
    }

    /// The raw descriptor number, for passing to syscalls.
    #[must_use]
    pub fn raw_fd(&self) -> RawFd {
        self.0.as_raw_fd()
    }

    /// Duplicate this descriptor, producing a second, independently-owned
    /// handle to the same underlying open file description.
    pub fn try_clone(&self) -> io::Result<Self> {
        let dup = rustix::io::fcntl_dupfd_cloexec(&self.0, 0).map_err(io::Error::from)?;
        Ok(Self(dup))
    }

    /// Read into `buf`, blocking the calling thread if the descriptor has
    /// no data ready. Callers that need this off the async runtime should
    /// issue it from `spawn_blocking`.
    pub fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        rustix::io::read(&self.0, buf).map_err(io::Error::from)
    }

    /// Write the entirety of `buf`, blocking the calling thread.
    pub fn write_all(&self, mut buf: &[u8]) -> io::Result<()> {
        while !buf.is_empty() {
            let n = rustix::io::write(&self.0, buf).map_err(io::Error::from)?;
            buf = &buf[n..];
        }
        Ok(())
    }
}

impl AsFd for FdHandle {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.0.as_fd()
    }
}

impl AsRawFd for FdHandle {
    fn as_raw_fd(&self) -> RawFd {
        self.0.as_raw_fd()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    #[test]
    fn clone_yields_independent_handle_to_same_file() {
        let mut tmp = tempfile_like();
        tmp.write_all(b"hello").unwrap();
        let fd = FdHandle::from_owned(tmp.into());
        let dup = fd.try_clone().expect("dup");
        assert_ne!(fd.raw_fd(), dup.raw_fd());
    }

    fn tempfile_like() -> std::fs::File {
        let path = std::env::temp_dir().join(format!("ptysess-fd-test-{}", std::process::id()));
        std::fs::OpenOptions::new()
            .create(true)
            .truncate(true)
            .read(true)
            .write(true)
            .open(path)
            .unwrap()
    }
}
