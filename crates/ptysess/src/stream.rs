//! Async byte stream adapter over a blocking descriptor.
//!
//! A single background task performs blocking reads against an owned
//! descriptor and forwards chunks over a bounded channel. This is
//! deliberately not built on non-blocking `AsyncFd` polling: some of the
//! descriptors this crate hands out (a `Null`-backed `/dev/null`, or a
//! pipe end) don't behave usefully under edge-triggered readiness, and a
//! single blocking-read-per-chunk loop keeps every capture kind uniform.

use std::collections::VecDeque;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, ReadBuf};
use tokio::sync::mpsc;

use crate::fd::FdHandle;

/// Documented upper bound on how large a single capture is permitted to
/// grow conceptually; this is not preallocated and does not bound the
/// total bytes a stream may carry end to end.
pub const CAPACITY_CEILING: usize = 1 << 30;

/// The actual size of the buffer used for each blocking read. Kept small
/// regardless of the nominal ceiling above: a PTY or pipe read rarely
/// returns more than a few KiB at a time, and a large preallocated buffer
/// would only waste memory per stream.
const WORKING_BUFFER: usize = 4 * 1024;

const CHANNEL_DEPTH: usize = 8;

/// A single-consumer, non-restartable byte stream read from a descriptor
/// on a background blocking task.
///
/// Dropping a `ByteStream` closes its receiving half; the background task
/// notices on its next completed read (the "next read boundary") and
/// exits instead of blocking forever.
pub struct ByteStream {
    rx: mpsc::Receiver<io::Result<Vec<u8>>>,
    pending: VecDeque<u8>,
    done: bool,
}

impl ByteStream {
    /// Start reading `fd` in the background with the default working
    /// buffer size.
    #[must_use]
    pub fn new(fd: FdHandle) -> Self {
        Self::with_capacity(fd, WORKING_BUFFER)
    }

    /// Start reading `fd`, using `capacity` as the working buffer size
    /// when it's smaller than the crate default, and the default
    /// otherwise -- `capacity` caps how large a single read chunk can be,
    /// it is never preallocated at the full [`CAPACITY_CEILING`].
    #[must_use]
    pub fn with_capacity(fd: FdHandle, capacity: usize) -> Self {
        let working = capacity.clamp(1, WORKING_BUFFER);
        let (tx, rx) = mpsc::channel(CHANNEL_DEPTH);
        tokio::task::spawn_blocking(move || {
            let mut buf = vec![0u8; working];
            loop {
                match fd.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => {
                        tracing::trace!(bytes = n, "byte stream read");
                        if tx.blocking_send(Ok(buf[..n].to_vec())).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        let _ = tx.blocking_send(Err(e));
                        break;
                    }
                }
            }
        });
        Self {
            rx,
            pending: VecDeque::new(),
            done: false,
        }
    }

    /// Pull the next byte, awaiting one if none is buffered yet. Returns
    /// `None` on EOF; a prior error is returned exactly once, after which
    /// the stream behaves as exhausted.
    pub async fn next_byte(&mut self) -> Option<io::Result<u8>> {
        loop {
            if let Some(b) = self.pending.pop_front() {
                return Some(Ok(b));
            }
            if self.done {
                return None;
            }
            match self.rx.recv().await {
                Some(Ok(chunk)) => self.pending.extend(chunk),
                Some(Err(e)) => {
                    self.done = true;
                    return Some(Err(e));
                }
                None => {
                    self.done = true;
                    return None;
                }
            }
        }
    }
}

impl AsyncRead for ByteStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        loop {
            if !this.pending.is_empty() {
                let n = buf.remaining().min(this.pending.len());
                for _ in 0..n {
                    let b = this.pending.pop_front().expect("checked non-empty above");
                    buf.put_slice(std::slice::from_ref(&b));
                }
                return Poll::Ready(Ok(()));
            }
            if this.done {
                return Poll::Ready(Ok(()));
            }
            match this.rx.poll_recv(cx) {
                Poll::Ready(Some(Ok(chunk))) => {
                    this.pending.extend(chunk);
                }
                Poll::Ready(Some(Err(e))) => {
                    this.done = true;
                    return Poll::Ready(Err(e));
                }
                Poll::Ready(None) => {
                    this.done = true;
                    return Poll::Ready(Ok(()));
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::fd::FromRawFd;
    use tokio::io::AsyncReadExt;

    fn pipe() -> (FdHandle, FdHandle) {
        let mut fds = [0i32; 2];
        assert_eq!(unsafe { libc::pipe(fds.as_mut_ptr()) }, 0);
        unsafe { (FdHandle::from_raw_fd(fds[0]), FdHandle::from_raw_fd(fds[1])) }
    }

    #[tokio::test]
    async fn yields_bytes_written_to_pipe() {
        let (r, w) = pipe();
        let mut stream = ByteStream::new(r);
        w.write_all(b"hi").unwrap();
        drop(w);
        let mut collected = Vec::new();
        while let Some(b) = stream.next_byte().await {
            collected.push(b.unwrap());
        }
        assert_eq!(collected, b"hi");
    }

    #[tokio::test]
    async fn async_read_impl_reads_same_bytes() {
        let (r, w) = pipe();
        let mut stream = ByteStream::new(r);
        w.write_all(b"async").unwrap();
        drop(w);
        let mut buf = Vec::new();
        stream.read_to_end(&mut buf).await.unwrap();
        assert_eq!(buf, b"async");
    }

    #[tokio::test]
    async fn eof_on_closed_write_end() {
        let (r, w) = pipe();
        drop(w);
        let mut stream = ByteStream::new(r);
        assert!(stream.next_byte().await.is_none());
    }
}
