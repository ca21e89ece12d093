//! Child-death detection
//!
//! SIGCHLD is funneled through a self-pipe: the handler does nothing
//! but write one byte, and the pipe's read end joins the host's poll
//! set alongside the session masters. Draining the monitor reaps every
//! terminated child with WNOHANG; the owner matches pids against its
//! sessions, and a pid nobody claims is informational only. This also
//! absorbs the race where a child dies before `open_session` has
//! returned its pid to the caller: the exit is simply picked up by the
//! next drain.

use std::os::unix::io::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::sync::atomic::{AtomicI32, Ordering};

use nix::errno::Errno;
use nix::fcntl::OFlag;
use nix::libc;
use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::{pipe2, read, Pid};

use crate::error::{Result, SessionError};

/// Write end of the self-pipe, readable from the signal handler
static NOTIFY_FD: AtomicI32 = AtomicI32::new(-1);

extern "C" fn on_sigchld(_: libc::c_int) {
    let fd = NOTIFY_FD.load(Ordering::Relaxed);
    if fd >= 0 {
        // async-signal-safe: one write(2), result ignored; the pipe is
        // non-blocking so a full pipe (already pending wakeups) is fine
        unsafe {
            libc::write(fd, b"c".as_ptr() as *const libc::c_void, 1);
        }
    }
}

/// How a reaped child went away
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitKind {
    Exited(i32),
    Signaled(i32),
}

/// One reaped child
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChildExit {
    pub pid: Pid,
    pub kind: ExitKind,
}

/// The process-wide SIGCHLD funnel
pub struct LifecycleMonitor {
    rx: OwnedFd,
    _tx: OwnedFd,
}

impl LifecycleMonitor {
    /// Install the SIGCHLD handler and the self-pipe. One monitor per
    /// process; installing a second replaces the first's pipe.
    pub fn install() -> Result<Self> {
        let (rx, tx) = pipe2(OFlag::O_NONBLOCK | OFlag::O_CLOEXEC).map_err(SessionError::Monitor)?;
        // SAFETY: pipe2 just handed us these descriptors; nothing else
        // owns them yet
        let (rx, tx) = unsafe { (OwnedFd::from_raw_fd(rx), OwnedFd::from_raw_fd(tx)) };
        NOTIFY_FD.store(tx.as_raw_fd(), Ordering::Relaxed);

        let action = SigAction::new(
            SigHandler::Handler(on_sigchld),
            SaFlags::SA_RESTART | SaFlags::SA_NOCLDSTOP,
            SigSet::empty(),
        );
        // SAFETY: the handler only touches an atomic and calls write(2)
        unsafe { sigaction(Signal::SIGCHLD, &action) }.map_err(SessionError::Monitor)?;

        Ok(Self { rx, _tx: tx })
    }

    /// Descriptor for the host's poll set; readable when a child died
    pub fn fd(&self) -> RawFd {
        self.rx.as_raw_fd()
    }

    /// Empty the self-pipe and reap every terminated child
    pub fn drain(&self) -> Vec<ChildExit> {
        let mut buf = [0u8; 64];
        loop {
            match read(self.rx.as_raw_fd(), &mut buf) {
                Ok(0) => break,
                Ok(_) => continue,
                Err(Errno::EINTR) => continue,
                Err(_) => break,
            }
        }

        let mut exits = Vec::new();
        loop {
            match waitpid(Pid::from_raw(-1), Some(WaitPidFlag::WNOHANG)) {
                Ok(WaitStatus::Exited(pid, code)) => exits.push(ChildExit {
                    pid,
                    kind: ExitKind::Exited(code),
                }),
                Ok(WaitStatus::Signaled(pid, sig, _)) => exits.push(ChildExit {
                    pid,
                    kind: ExitKind::Signaled(sig as i32),
                }),
                Ok(WaitStatus::StillAlive) => break,
                Ok(_) => continue,
                Err(Errno::ECHILD) => break,
                Err(Errno::EINTR) => continue,
                Err(_) => break,
            }
        }
        exits
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    #[test]
    fn test_install_and_drain_reaps_child() {
        crate::testutil::init_tracing();
        let monitor = LifecycleMonitor::install().expect("install monitor");

        let child = std::process::Command::new("/bin/true")
            .spawn()
            .expect("spawn child");
        let child_pid = Pid::from_raw(child.id() as i32);

        // The exit lands via SIGCHLD; poll the drain for a bit
        let deadline = Instant::now() + Duration::from_secs(5);
        let mut seen = Vec::new();
        while Instant::now() < deadline {
            seen.extend(monitor.drain());
            if seen.iter().any(|e| e.pid == child_pid) {
                break;
            }
            std::thread::sleep(Duration::from_millis(20));
        }

        let exit = seen
            .iter()
            .find(|e| e.pid == child_pid)
            .expect("child exit observed");
        assert_eq!(exit.kind, ExitKind::Exited(0));
    }
}
