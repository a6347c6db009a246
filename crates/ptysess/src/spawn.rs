//! `posix_spawn`-based child process creation attached to a PTY.
//!
//! This is the one module in the crate that talks to raw `libc` FFI
//! directly: neither `rustix` nor `tokio::process::Command` expose
//! `posix_spawn_file_actions_t` / `posix_spawnattr_t`, and those are what
//! let us wire descriptors and set the process group atomically as part
//! of the spawn, instead of racing a `fork`+`pre_exec` closure.

use std::collections::HashMap;
use std::ffi::{CStr, CString, OsStr};
use std::io;
use std::os::unix::ffi::OsStrExt;

use rustix::pty::{OpenptFlags, grantpt, openpt, ptsname, unlockpt};
use rustix::termios::Winsize;

use crate::config::{CaptureRequest, PtyProcessConfig};
use crate::error::{PtyError, Result};
use crate::fd::FdHandle;
use crate::options::PtyOptions;

/// The outcome of a successful spawn.
pub struct Runner {
    /// The child's pid.
    pub pid: i32,
    /// The PTY primary, owned by the parent for the lifetime of the
    /// session.
    pub pty: FdHandle,
    /// The stdout read end, present for every `stdout_capture` except
    /// `None`: `Pipe` and `Null` each get a dedicated descriptor, `Pty` a
    /// duplicate of `pty` so stdout can be read independently of the
    /// PTY-wide stream.
    pub stdout: Option<FdHandle>,
    /// The stderr read end, same rules as `stdout`.
    pub stderr: Option<FdHandle>,
}

/// Spawn `program` with `args`, attached to a freshly allocated PTY.
///
/// `stdin` is always wired to the PTY secondary; it is the PTY's entire
/// purpose and isn't configurable per call. `stdout_capture`/
/// `stderr_capture` choose how the corresponding child-side stream is
/// wired, per [`CaptureRequest`].
#[tracing::instrument(skip(args, config, initial_options), fields(program = %program.as_ref().to_string_lossy(), pid = tracing::field::Empty))]
pub fn spawn<S, I, A>(
    program: S,
    args: I,
    config: &PtyProcessConfig,
    stdout_capture: CaptureRequest,
    stderr_capture: CaptureRequest,
    initial_options: PtyOptions,
) -> Result<Runner>
where
    S: AsRef<OsStr>,
    I: IntoIterator<Item = A>,
    A: AsRef<OsStr>,
{
    let (primary, secondary_path) = open_pty()?;

    let (cols, rows) = config.window_size;
    rustix::termios::tcsetwinsize(
        &primary,
        Winsize {
            ws_row: rows,
            ws_col: cols,
            ws_xpixel: 0,
            ws_ypixel: 0,
        },
    )
    .map_err(|e| PtyError::Create(e.into()))?;
    initial_options.apply_to(&primary, true, false)?;

    let program_c = os_str_to_cstring(program.as_ref())?;
    let mut argv = vec![program_c.clone()];
    for a in args {
        argv.push(os_str_to_cstring(a.as_ref())?);
    }
    let env = config.effective_env();
    let envp = build_envp(&env)?;

    let mut actions = FileActions::new().map_err(PtyError::Spawn)?;
    // stdin is always the PTY secondary. Opening it fresh in the child
    // (rather than dup2-ing a parent-held fd) is what lets the child
    // acquire it as a controlling terminal: a session leader with no
    // controlling terminal that opens a tty device without O_NOCTTY gets
    // it as its ctty automatically.
    actions
        .add_open(0, &secondary_path, libc::O_RDWR, 0)
        .map_err(PtyError::Spawn)?;

    let mut held_write_ends = Vec::new();
    let stdout_handle = wire_stream(&mut actions, 1, stdout_capture, &mut held_write_ends)?;
    let stderr_handle = wire_stream(&mut actions, 2, stderr_capture, &mut held_write_ends)?;

    if let Some(dir) = config.effective_working_directory() {
        let dir_c = os_str_to_cstring(dir.as_os_str())?;
        add_chdir(&mut actions, &dir_c)?;
    }

    let mut attr = SpawnAttr::new().map_err(PtyError::Spawn)?;
    let mut flags: libc::c_short = 0;
    if config.new_session {
        attr.set_pgroup(0).map_err(PtyError::Spawn)?;
        flags |= libc::POSIX_SPAWN_SETPGROUP as libc::c_short;
    }
    if config.controlling_terminal {
        flags |= session_leader_flag();
    }
    if let Some(mask) = &config.signal_mask {
        attr.set_sigmask(mask.as_raw()).map_err(PtyError::Spawn)?;
        flags |= libc::POSIX_SPAWN_SETSIGMASK as libc::c_short;
    }
    attr.set_flags(flags).map_err(PtyError::Spawn)?;

    let argv_ptrs = ptr_array(&argv);
    let envp_ptrs = ptr_array(&envp);

    let mut pid: libc::pid_t = 0;
    let rc = unsafe {
        libc::posix_spawnp(
            &raw mut pid,
            program_c.as_ptr(),
            actions.as_ptr(),
            attr.as_ptr(),
            argv_ptrs.as_ptr().cast_mut(),
            envp_ptrs.as_ptr().cast_mut(),
        )
    };

    // held_write_ends (pipe write ends kept alive only so their fd number
    // stayed valid through posix_spawnp) are dropped here, closing them
    // in the parent unconditionally -- the child already has its own
    // dup2'd copy.
    drop(held_write_ends);

    if rc != 0 {
        let err = PtyError::from_spawn_errno(&program_c, rc);
        tracing::warn!(program = %program_c.to_string_lossy(), errno = rc, "spawn failed");
        return Err(err);
    }

    tracing::Span::current().record("pid", pid);
    tracing::debug!("child spawned");
    Ok(Runner {
        pid,
        pty: primary,
        stdout: stdout_handle,
        stderr: stderr_handle,
    })
}

fn wire_stream(
    actions: &mut FileActions,
    target_fd: i32,
    capture: CaptureRequest,
    held_write_ends: &mut Vec<FdHandle>,
) -> Result<Option<FdHandle>> {
    match capture {
        CaptureRequest::None => Ok(None),
        CaptureRequest::Null => {
            let dev_null = CStr::from_bytes_with_nul(b"/dev/null\0").unwrap();
            actions
                .add_open(target_fd, dev_null, libc::O_RDWR, 0)
                .map_err(PtyError::Spawn)?;
            // The child's stream is silenced above; the parent still gets
            // a handle of its own, so stdout_bytes()/stderr_bytes() work
            // uniformly across every CaptureRequest -- reading it just
            // observes EOF immediately, since nothing is ever written to
            // the other end of /dev/null.
            Ok(Some(open_dev_null_parent_side()?))
        }
        CaptureRequest::Pipe => {
            let (read_end, write_end) = pipe2_cloexec().map_err(PtyError::Spawn)?;
            let write_raw = write_end.raw_fd();
            actions.add_dup2(write_raw, target_fd).map_err(PtyError::Spawn)?;
            if write_raw != target_fd {
                actions.add_close(write_raw).map_err(PtyError::Spawn)?;
            }
            held_write_ends.push(write_end);
            Ok(Some(read_end))
        }
        CaptureRequest::Pty => {
            actions.add_dup2(0, target_fd).map_err(PtyError::Spawn)?;
            Ok(None)
        }
    }
}

// POSIX_SPAWN_SETSID and posix_spawn_file_actions_addchdir_np both
// originated on Darwin's <spawn.h> and were later copied into glibc under
// the same names; both platforms support them. Everything else in the
// `unix` family (the BSDs, in particular) has neither, so those fall back
// to a no-op flag / an explicit unsupported error respectively.
#[cfg(any(target_os = "linux", target_vendor = "apple"))]
fn session_leader_flag() -> libc::c_short {
    libc::POSIX_SPAWN_SETSID as libc::c_short
}

#[cfg(not(any(target_os = "linux", target_vendor = "apple")))]
fn session_leader_flag() -> libc::c_short {
    0
}

#[cfg(any(target_os = "linux", target_vendor = "apple"))]
fn add_chdir(actions: &mut FileActions, dir: &CStr) -> Result<()> {
    actions.add_chdir(dir).map_err(|e| PtyError::ChdirUnsupported(e))
}

#[cfg(not(any(target_os = "linux", target_vendor = "apple")))]
fn add_chdir(_actions: &mut FileActions, _dir: &CStr) -> Result<()> {
    Err(PtyError::ChdirUnsupported(io::Error::from_raw_os_error(
        libc::ENOSYS,
    )))
}

fn open_pty() -> Result<(FdHandle, CString)> {
    let primary =
        openpt(OpenptFlags::RDWR | OpenptFlags::NOCTTY).map_err(|e| PtyError::Create(e.into()))?;
    grantpt(&primary).map_err(|e| PtyError::Create(e.into()))?;
    unlockpt(&primary).map_err(|e| PtyError::Create(e.into()))?;
    let path = ptsname(&primary, Vec::new()).map_err(|e| PtyError::Create(e.into()))?;
    Ok((FdHandle::from_owned(primary), path))
}

fn pipe2_cloexec() -> io::Result<(FdHandle, FdHandle)> {
    let mut fds = [0i32; 2];
    let rc = unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_CLOEXEC) };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: pipe2 just handed us two freshly-opened, uniquely-owned fds.
    Ok(unsafe { (FdHandle::from_raw_fd(fds[0]), FdHandle::from_raw_fd(fds[1])) })
}

/// Open a second, independent `/dev/null` descriptor for the parent side
/// of a `Null`-captured stream, so `stdout_bytes()`/`stderr_bytes()` have
/// something to read regardless of which `CaptureRequest` was chosen --
/// it just observes EOF immediately.
fn open_dev_null_parent_side() -> Result<FdHandle> {
    let dev_null = CStr::from_bytes_with_nul(b"/dev/null\0").unwrap();
    let fd = unsafe { libc::open(dev_null.as_ptr(), libc::O_RDONLY | libc::O_CLOEXEC) };
    if fd < 0 {
        return Err(PtyError::Io(io::Error::last_os_error()));
    }
    // SAFETY: open() just handed us a freshly-opened, uniquely-owned fd.
    Ok(unsafe { FdHandle::from_raw_fd(fd) })
}

fn os_str_to_cstring(s: &OsStr) -> Result<CString> {
    CString::new(s.as_bytes())
        .map_err(|_| PtyError::Spawn(io::Error::new(io::ErrorKind::InvalidInput, "interior NUL")))
}

fn build_envp(env: &HashMap<std::ffi::OsString, std::ffi::OsString>) -> Result<Vec<CString>> {
    env.iter()
        .map(|(k, v)| {
            let mut bytes = k.as_bytes().to_vec();
            bytes.push(b'=');
            bytes.extend_from_slice(v.as_bytes());
            CString::new(bytes).map_err(|_| {
                PtyError::Spawn(io::Error::new(io::ErrorKind::InvalidInput, "interior NUL"))
            })
        })
        .collect()
}

fn ptr_array(strings: &[CString]) -> Vec<*const libc::c_char> {
    let mut ptrs: Vec<*const libc::c_char> = strings.iter().map(|s| s.as_ptr()).collect();
    ptrs.push(std::ptr::null());
    ptrs
}

struct FileActions(libc::posix_spawn_file_actions_t);

impl FileActions {
    fn new() -> io::Result<Self> {
        let mut raw: libc::posix_spawn_file_actions_t = unsafe { std::mem::zeroed() };
        check(unsafe { libc::posix_spawn_file_actions_init(&raw mut raw) })?;
        Ok(Self(raw))
    }

    fn add_close(&mut self, fd: i32) -> io::Result<()> {
        check(unsafe { libc::posix_spawn_file_actions_addclose(&raw mut self.0, fd) })
    }

    fn add_dup2(&mut self, src: i32, dst: i32) -> io::Result<()> {
        check(unsafe { libc::posix_spawn_file_actions_adddup2(&raw mut self.0, src, dst) })
    }

    fn add_open(&mut self, fd: i32, path: &CStr, flags: i32, mode: libc::mode_t) -> io::Result<()> {
        check(unsafe {
            libc::posix_spawn_file_actions_addopen(&raw mut self.0, fd, path.as_ptr(), flags, mode)
        })
    }

    #[cfg(any(target_os = "linux", target_vendor = "apple"))]
    fn add_chdir(&mut self, path: &CStr) -> io::Result<()> {
        check(unsafe { libc::posix_spawn_file_actions_addchdir_np(&raw mut self.0, path.as_ptr()) })
    }

    fn as_ptr(&self) -> *const libc::posix_spawn_file_actions_t {
        &self.0
    }
}

impl Drop for FileActions {
    fn drop(&mut self) {
        unsafe {
            libc::posix_spawn_file_actions_destroy(&raw mut self.0);
        }
    }
}

struct SpawnAttr(libc::posix_spawnattr_t);

impl SpawnAttr {
    fn new() -> io::Result<Self> {
        let mut raw: libc::posix_spawnattr_t = unsafe { std::mem::zeroed() };
        check(unsafe { libc::posix_spawnattr_init(&raw mut raw) })?;
        Ok(Self(raw))
    }

    fn set_flags(&mut self, flags: libc::c_short) -> io::Result<()> {
        check(unsafe { libc::posix_spawnattr_setflags(&raw mut self.0, flags) })
    }

    fn set_pgroup(&mut self, pgroup: libc::pid_t) -> io::Result<()> {
        check(unsafe { libc::posix_spawnattr_setpgroup(&raw mut self.0, pgroup) })
    }

    fn set_sigmask(&mut self, mask: &libc::sigset_t) -> io::Result<()> {
        check(unsafe { libc::posix_spawnattr_setsigmask(&raw mut self.0, mask) })
    }

    fn as_ptr(&self) -> *const libc::posix_spawnattr_t {
        &self.0
    }
}

impl Drop for SpawnAttr {
    fn drop(&mut self) {
        unsafe {
            libc::posix_spawnattr_destroy(&raw mut self.0);
        }
    }
}

fn check(rc: i32) -> io::Result<()> {
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::from_raw_os_error(rc))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envp_formats_key_value_pairs() {
        let mut env = HashMap::new();
        env.insert("FOO".into(), "bar".into());
        let envp = build_envp(&env).unwrap();
        assert_eq!(envp.len(), 1);
        assert_eq!(envp[0].to_str().unwrap(), "FOO=bar");
    }

    #[test]
    fn ptr_array_is_null_terminated() {
        let strings = vec![CString::new("a").unwrap(), CString::new("b").unwrap()];
        let ptrs = ptr_array(&strings);
        assert_eq!(ptrs.len(), 3);
        assert!(ptrs.last().unwrap().is_null());
    }

    #[tokio::test]
    async fn spawn_true_exits_successfully() {
        crate::init_test_tracing();
        let config = PtyProcessConfig::default();
        let runner = spawn(
            "true",
            std::iter::empty::<&str>(),
            &config,
            CaptureRequest::None,
            CaptureRequest::None,
            PtyOptions::default(),
        )
        .expect("spawn true");
        assert!(runner.pid > 0);

        let status = tokio::task::spawn_blocking(move || {
            let mut info: libc::siginfo_t = unsafe { std::mem::zeroed() };
            let rc = unsafe {
                libc::waitid(
                    libc::P_PID,
                    runner.pid as libc::id_t,
                    &raw mut info,
                    libc::WEXITED,
                )
            };
            (rc, info)
        })
        .await
        .unwrap();
        assert_eq!(status.0, 0);
    }

    #[test]
    fn spawn_missing_binary_is_not_found() {
        let config = PtyProcessConfig::default();
        let err = spawn(
            "/no/such/binary-xyz",
            std::iter::empty::<&str>(),
            &config,
            CaptureRequest::None,
            CaptureRequest::None,
            PtyOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(err, PtyError::NotFound(_)));
    }

    /// Nothing besides stdin/stdout/stderr and the handful of descriptors
    /// this crate explicitly wires should be open in the child once it's
    /// running. Checked via `/proc/<pid>/fd`, so this is Linux-only; it's
    /// skipped (not failed) elsewhere.
    #[tokio::test]
    async fn child_does_not_inherit_unrelated_descriptors() {
        if !std::path::Path::new("/proc").exists() {
            return;
        }
        // A descriptor with no wiring of its own: if it leaked into the
        // child, close-on-exec hygiene failed somewhere.
        let sentinel = std::fs::File::open("/dev/null").expect("open /dev/null");
        let sentinel_fd = std::os::unix::io::AsRawFd::as_raw_fd(&sentinel);

        let config = PtyProcessConfig::default();
        let runner = spawn(
            "sleep",
            ["1"],
            &config,
            CaptureRequest::Pipe,
            CaptureRequest::Pipe,
            PtyOptions::default(),
        )
        .expect("spawn sleep");

        let fd_dir = format!("/proc/{}/fd", runner.pid);
        // Give the child a moment to finish its own startup bookkeeping.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        let entries = std::fs::read_dir(&fd_dir);
        if let Ok(entries) = entries {
            for entry in entries.flatten() {
                let name = entry.file_name();
                let fd: i32 = name.to_string_lossy().parse().unwrap_or(-1);
                assert_ne!(
                    fd, sentinel_fd,
                    "parent-only descriptor leaked into the child's fd table"
                );
            }
        }

        unsafe {
            libc::kill(runner.pid, libc::SIGKILL);
        }
        let mut info: libc::siginfo_t = unsafe { std::mem::zeroed() };
        unsafe {
            libc::waitid(libc::P_PID, runner.pid as libc::id_t, &raw mut info, libc::WEXITED);
        }
    }

    /// `new_session` should give the child its own process group, not
    /// share the parent's.
    #[tokio::test]
    async fn new_session_child_gets_its_own_process_group() {
        let config = PtyProcessConfig::default();
        let runner = spawn(
            "sleep",
            ["1"],
            &config,
            CaptureRequest::Null,
            CaptureRequest::Null,
            PtyOptions::default(),
        )
        .expect("spawn sleep");

        let child_pgid = unsafe { libc::getpgid(runner.pid) };
        let parent_pgid = unsafe { libc::getpgid(0) };
        assert_ne!(child_pgid, parent_pgid);
        assert_eq!(child_pgid, runner.pid);

        unsafe {
            libc::kill(runner.pid, libc::SIGKILL);
        }
        let mut info: libc::siginfo_t = unsafe { std::mem::zeroed() };
        unsafe {
            libc::waitid(libc::P_PID, runner.pid as libc::id_t, &raw mut info, libc::WEXITED);
        }
    }
}
