//! The process façade: [`PtyProcess`] composes the spawner and the
//! watcher into the single type applications actually hold onto.

use std::ffi::OsString;
use std::os::unix::io::RawFd;
use std::path::PathBuf;

use rustix::termios::Winsize;

use crate::config::{CaptureRequest, PtyProcessConfig, SignalMask};
use crate::error::{PtyError, Result};
use crate::fd::FdHandle;
use crate::options::PtyOptions;
use crate::spawn::{self, Runner};
use crate::status::Status;
use crate::stream::ByteStream;
use crate::watcher::Watcher;

struct CaptureState {
    request: CaptureRequest,
    owned: Option<FdHandle>,
    taken: bool,
}

impl CaptureState {
    const fn new(request: CaptureRequest, owned: Option<FdHandle>) -> Self {
        Self {
            request,
            owned,
            taken: false,
        }
    }

    fn is_capturing(&self) -> bool {
        matches!(
            self.request,
            CaptureRequest::Pipe | CaptureRequest::Pty | CaptureRequest::Null
        )
    }
}

struct RunningState {
    watcher: Watcher,
    pty: FdHandle,
    pty_taken: bool,
    stdout: CaptureState,
    stderr: CaptureState,
}

/// A child process spawned attached to a PTY, and supervised for the rest
/// of its life.
///
/// `PtyProcess` is constructed with everything needed to spawn, but
/// doesn't spawn anything until [`run`](Self::run) is called. Each
/// instance spawns at most one child; calling `run` twice is a programmer
/// error.
pub struct PtyProcess {
    program: OsString,
    args: Vec<OsString>,
    config: PtyProcessConfig,
    state: Option<RunningState>,
}

impl PtyProcess {
    /// Describe a child process to spawn. Nothing happens until
    /// [`run`](Self::run) is called.
    pub fn new<S, I, A, D>(
        program: S,
        args: I,
        working_directory: Option<D>,
        env: Option<std::collections::HashMap<OsString, OsString>>,
    ) -> Self
    where
        S: Into<OsString>,
        I: IntoIterator<Item = A>,
        A: Into<OsString>,
        D: Into<PathBuf>,
    {
        let mut config = PtyProcessConfig::default();
        if let Some(dir) = working_directory {
            config.working_directory = Some(dir.into());
        }
        if env.is_some() {
            config.env = env;
        }
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            config,
            state: None,
        }
    }

    /// Spawn the child, wiring stdout/stderr per the given capture
    /// requests and applying the initial PTY options before the child can
    /// observe or change them.
    ///
    /// # Panics
    /// Panics if `run` has already been called on this instance.
    pub async fn run(
        &mut self,
        stdout_capture: CaptureRequest,
        stderr_capture: CaptureRequest,
        initial_options: PtyOptions,
        signal_mask: Option<SignalMask>,
    ) -> Result<()> {
        assert!(
            self.state.is_none(),
            "PtyProcess::run called more than once"
        );

        if signal_mask.is_some() {
            self.config.signal_mask = signal_mask;
        }

        let config = self.config.clone();
        let program = self.program.clone();
        let args = self.args.clone();
        let runner: Runner = tokio::task::spawn_blocking(move || {
            spawn::spawn(
                program,
                args,
                &config,
                stdout_capture,
                stderr_capture,
                initial_options,
            )
        })
        .await
        .expect("spawn task panicked")?;

        let watcher = Watcher::new(runner.pid);
        self.state = Some(RunningState {
            watcher,
            pty: runner.pty,
            pty_taken: false,
            stdout: CaptureState::new(stdout_capture, runner.stdout),
            stderr: CaptureState::new(stderr_capture, runner.stderr),
        });
        Ok(())
    }

    /// The child's pid, once running.
    #[must_use]
    pub fn pid(&self) -> Option<i32> {
        self.state.as_ref().map(|s| s.watcher.pid())
    }

    /// The current lifecycle status. `NotRunYet` before `run` succeeds.
    #[must_use]
    pub fn status(&self) -> Status {
        match &self.state {
            None => Status::NotRunYet,
            Some(s) => s.watcher.status().unwrap_or(Status::NotRunYet),
        }
    }

    /// Wait for the child to reach a terminal status.
    pub async fn wait_until_exit(&self) -> Result<Status> {
        match &self.state {
            None => Ok(Status::NotRunYet),
            Some(s) => s.watcher.wait_until_exit().await,
        }
    }

    /// Send `SIGTERM`.
    pub fn terminate(&self) -> Result<()> {
        self.send_raw_signal(libc::SIGTERM)
    }

    /// Send `SIGINT`.
    pub fn interrupt(&self) -> Result<()> {
        self.send_raw_signal(libc::SIGINT)
    }

    /// Send `SIGSTOP`, suspending the child unconditionally.
    pub fn suspend(&self) -> Result<()> {
        self.send_raw_signal(libc::SIGSTOP)
    }

    /// Send `SIGCONT`, resuming a suspended child.
    pub fn resume(&self) -> Result<()> {
        self.send_raw_signal(libc::SIGCONT)
    }

    /// Send an arbitrary raw signal number to the child.
    pub fn send_signal(&self, signal: i32) -> Result<()> {
        self.send_raw_signal(signal)
    }

    fn send_raw_signal(&self, signal: i32) -> Result<()> {
        let state = self.state.as_ref().ok_or(PtyError::NoSuchProcess)?;
        state.watcher.send_signal(signal)
    }

    /// Resize the PTY window.
    pub fn resize(&self, cols: u16, rows: u16) -> Result<()> {
        let state = self.state.as_ref().ok_or(PtyError::BadFileDescriptor)?;
        rustix::termios::tcsetwinsize(
            &state.pty,
            Winsize {
                ws_row: rows,
                ws_col: cols,
                ws_xpixel: 0,
                ws_ypixel: 0,
            },
        )
        .map_err(|e| PtyError::Resize(e.into()))
    }

    /// The current PTY line-discipline options.
    pub fn pty_options(&self) -> Result<PtyOptions> {
        let state = self.state.as_ref().ok_or(PtyError::BadFileDescriptor)?;
        PtyOptions::from_fd(&state.pty)
    }

    /// Apply new PTY line-discipline options.
    pub fn set_pty_options(
        &self,
        options: PtyOptions,
        immediately: bool,
        drain_first: bool,
    ) -> Result<()> {
        let state = self.state.as_ref().ok_or(PtyError::BadFileDescriptor)?;
        options.apply_to(&state.pty, immediately, drain_first)
    }

    /// The raw PTY primary descriptor, for callers that need it directly
    /// (e.g. to register with an external event loop).
    #[must_use]
    pub fn pty_raw_fd(&self) -> Option<RawFd> {
        self.state.as_ref().map(|s| s.pty.raw_fd())
    }

    /// Take the PTY byte stream. This is the stream every other PTY
    /// capture (`stdout`/`stderr` set to `CaptureRequest::Pty`) shares a
    /// descriptor with, so it is always available once running,
    /// regardless of what stdout/stderr requested.
    ///
    /// # Panics
    /// Panics if `run` hasn't succeeded yet, or if this has already been
    /// called once.
    pub fn pty_bytes(&mut self) -> ByteStream {
        let state = self
            .state
            .as_mut()
            .expect("pty_bytes called before run() succeeded");
        assert!(!state.pty_taken, "pty_bytes called more than once");
        state.pty_taken = true;
        let dup = state
            .pty
            .try_clone()
            .expect("failed to duplicate PTY primary descriptor");
        ByteStream::new(dup)
    }

    /// Take the stdout byte stream.
    ///
    /// # Panics
    /// Panics if stdout wasn't captured via `Pipe` or `Pty`, if `run`
    /// hasn't succeeded yet, or if this has already been called once.
    pub fn stdout_bytes(&mut self) -> ByteStream {
        Self::take_stream(&mut self.state, |s| &mut s.stdout, "stdout")
    }

    /// Take the stderr byte stream. Same preconditions as
    /// [`stdout_bytes`](Self::stdout_bytes).
    pub fn stderr_bytes(&mut self) -> ByteStream {
        Self::take_stream(&mut self.state, |s| &mut s.stderr, "stderr")
    }

    fn take_stream(
        state: &mut Option<RunningState>,
        select: impl FnOnce(&mut RunningState) -> &mut CaptureState,
        name: &str,
    ) -> ByteStream {
        let running = state
            .as_mut()
            .unwrap_or_else(|| panic!("{name}_bytes called before run() succeeded"));
        let pty_fd = running.pty.try_clone();
        let capture = select(running);
        assert!(
            capture.is_capturing(),
            "{name}_bytes called without requesting Pipe, Pty, or Null capture for {name}"
        );
        assert!(!capture.taken, "{name}_bytes called more than once");
        capture.taken = true;
        match capture.request {
            CaptureRequest::Pipe | CaptureRequest::Null => {
                let handle = capture
                    .owned
                    .take()
                    .expect("Pipe/Null capture state missing its owned descriptor");
                ByteStream::new(handle)
            }
            CaptureRequest::Pty => {
                let dup = pty_fd.expect("failed to duplicate PTY primary descriptor");
                ByteStream::new(dup)
            }
            CaptureRequest::None => unreachable!("checked by is_capturing above"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn not_run_yet_status_and_preconditions() {
        let proc = PtyProcess::new(
            "true",
            [] as [&str; 0],
            None::<PathBuf>,
            None,
        );
        assert_eq!(proc.status(), Status::NotRunYet);
        assert!(matches!(proc.terminate(), Err(PtyError::NoSuchProcess)));
        assert!(matches!(
            proc.pty_options(),
            Err(PtyError::BadFileDescriptor)
        ));
    }

    #[tokio::test]
    async fn run_true_reaches_successful_exit() {
        crate::init_test_tracing();
        let mut proc = PtyProcess::new("true", [] as [&str; 0], None::<PathBuf>, None);
        proc.run(
            CaptureRequest::None,
            CaptureRequest::None,
            PtyOptions::default(),
            None,
        )
        .await
        .expect("run");
        let status = proc.wait_until_exit().await.expect("wait");
        assert_eq!(status, Status::Exited(0));
    }

    #[tokio::test]
    async fn stdout_pipe_capture_reads_child_output() {
        let mut proc = PtyProcess::new(
            "/bin/echo",
            ["hello"],
            None::<PathBuf>,
            None,
        );
        proc.run(
            CaptureRequest::Pipe,
            CaptureRequest::None,
            PtyOptions::default(),
            None,
        )
        .await
        .expect("run");
        let mut out = proc.stdout_bytes();
        let mut buf = Vec::new();
        out.read_to_end(&mut buf).await.unwrap();
        assert_eq!(buf, b"hello\n");
        let status = proc.wait_until_exit().await.unwrap();
        assert_eq!(status, Status::Exited(0));
    }

    #[tokio::test]
    async fn terminate_sends_sigterm() {
        let mut proc = PtyProcess::new("sleep", ["30"], None::<PathBuf>, None);
        proc.run(
            CaptureRequest::Null,
            CaptureRequest::Null,
            PtyOptions::default(),
            None,
        )
        .await
        .expect("run");
        proc.terminate().expect("terminate");
        let status = proc.wait_until_exit().await.expect("wait");
        assert_eq!(status, Status::UncaughtSignal(libc::SIGTERM));
    }

    #[tokio::test]
    async fn null_capture_yields_an_immediately_empty_stream() {
        let mut proc = PtyProcess::new("/bin/echo", ["hello"], None::<PathBuf>, None);
        proc.run(
            CaptureRequest::Null,
            CaptureRequest::None,
            PtyOptions::default(),
            None,
        )
        .await
        .expect("run");
        let mut out = proc.stdout_bytes();
        let mut buf = Vec::new();
        out.read_to_end(&mut buf).await.unwrap();
        assert!(buf.is_empty());
        let status = proc.wait_until_exit().await.unwrap();
        assert_eq!(status, Status::Exited(0));
    }

    #[tokio::test]
    async fn cat_over_pty_with_disabled_echo_is_line_buffered() {
        let mut proc = PtyProcess::new("cat", [] as [&str; 0], None::<PathBuf>, None);
        proc.run(
            CaptureRequest::Pty,
            CaptureRequest::None,
            PtyOptions::DISABLE_ECHO,
            None,
        )
        .await
        .expect("run");

        let pty_fd = proc
            .state
            .as_ref()
            .expect("running")
            .pty
            .try_clone()
            .expect("dup primary for writing");
        let mut out = proc.pty_bytes();

        pty_fd.write_all(b"foo\nbar\nbaz").expect("write partial line");
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let mut buf = [0u8; 64];
        let n = out.read(&mut buf).await.expect("read");
        assert_eq!(&buf[..n], b"foo\nbar\n");

        pty_fd.write_all(b"\n").expect("complete the last line");
        let n = out.read(&mut buf).await.expect("read");
        assert_eq!(&buf[..n], b"baz\n");

        proc.terminate().expect("terminate cat");
        let _ = proc.wait_until_exit().await;
    }

    #[tokio::test]
    async fn interrupt_sends_sigint() {
        let mut proc = PtyProcess::new("sleep", ["30"], None::<PathBuf>, None);
        proc.run(
            CaptureRequest::Null,
            CaptureRequest::Null,
            PtyOptions::default(),
            None,
        )
        .await
        .expect("run");
        proc.interrupt().expect("interrupt");
        let status = proc.wait_until_exit().await.expect("wait");
        assert_eq!(status, Status::UncaughtSignal(libc::SIGINT));
    }

    #[tokio::test]
    async fn custom_env_var_is_visible_to_child() {
        let mut env = std::collections::HashMap::new();
        env.insert(OsString::from("PTYSESS_TEST_VAR"), OsString::from("marker-123"));
        let mut proc = PtyProcess::new(
            "sh",
            ["-c", "echo $PTYSESS_TEST_VAR"],
            None::<PathBuf>,
            Some(env),
        );
        proc.run(
            CaptureRequest::Pipe,
            CaptureRequest::None,
            PtyOptions::default(),
            None,
        )
        .await
        .expect("run");
        let mut out = proc.stdout_bytes();
        let mut buf = Vec::new();
        out.read_to_end(&mut buf).await.unwrap();
        assert_eq!(buf, b"marker-123\n");
        let status = proc.wait_until_exit().await.unwrap();
        assert_eq!(status, Status::Exited(0));
    }

    #[tokio::test]
    #[should_panic(expected = "without requesting")]
    async fn stdout_bytes_without_request_panics() {
        let mut proc = PtyProcess::new("true", [] as [&str; 0], None::<PathBuf>, None);
        proc.run(
            CaptureRequest::None,
            CaptureRequest::None,
            PtyOptions::default(),
            None,
        )
        .await
        .expect("run");
        let _ = proc.stdout_bytes();
    }
}
