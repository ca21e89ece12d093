//! Background drivers for hosts without a poll loop
//!
//! The default concurrency model is single-thread cooperative: the host
//! polls the master and calls `read_pump` itself. Hosts that have no
//! such loop get the same contract from a dedicated reader thread plus
//! a waiter thread for child termination, both synchronized with the
//! owning state through the shared locks and signalling the UI over a
//! loopback wakeup pipe. Lock order is always session before host.

use std::os::unix::io::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use nix::errno::Errno;
use nix::fcntl::OFlag;
use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::{pipe2, read, write, Pid};

use crate::error::{Result, SessionError};
use crate::host::Host;
use crate::session::{ChildExit, ExitKind, Session};

/// Interval the reader thread waits on the master between lock takes
const READER_POLL_MS: i32 = 50;

/// Loopback signaling channel: worker threads ring it, the UI thread
/// polls `fd` and drains
pub struct Wakeup {
    rx: OwnedFd,
    tx: Arc<OwnedFd>,
}

/// Cloneable write end of a [`Wakeup`]
#[derive(Clone)]
pub struct WakeupSender(Arc<OwnedFd>);

impl Wakeup {
    pub fn new() -> Result<Self> {
        let (rx, tx) =
            pipe2(OFlag::O_NONBLOCK | OFlag::O_CLOEXEC).map_err(SessionError::Monitor)?;
        // SAFETY: pipe2 just handed us these descriptors; nothing else
        // owns them yet
        let (rx, tx) = unsafe { (OwnedFd::from_raw_fd(rx), OwnedFd::from_raw_fd(tx)) };
        Ok(Self {
            rx,
            tx: Arc::new(tx),
        })
    }

    /// Readable when a worker has something for the UI thread
    pub fn fd(&self) -> RawFd {
        self.rx.as_raw_fd()
    }

    /// Consume pending wakeups
    pub fn drain(&self) {
        let mut buf = [0u8; 64];
        loop {
            match read(self.rx.as_raw_fd(), &mut buf) {
                Ok(0) => break,
                Ok(_) => continue,
                Err(Errno::EINTR) => continue,
                Err(_) => break,
            }
        }
    }

    pub fn sender(&self) -> WakeupSender {
        WakeupSender(self.tx.clone())
    }
}

impl WakeupSender {
    pub fn ring(&self) {
        let _ = write(self.0.as_raw_fd(), b"w");
    }
}

/// Reader thread driving `read_pump` over shared session state
pub struct ReaderThread {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl ReaderThread {
    pub fn spawn<H>(
        session: Arc<Mutex<Session>>,
        host: Arc<Mutex<H>>,
        wake: WakeupSender,
    ) -> Self
    where
        H: Host + Send + 'static,
    {
        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = stop.clone();

        let handle = thread::spawn(move || loop {
            if thread_stop.load(Ordering::Relaxed) {
                break;
            }

            // Poll outside the locks so the UI thread is never starved
            let fd = {
                let guard = match session.lock() {
                    Ok(g) => g,
                    Err(_) => break,
                };
                if !guard.is_open() {
                    break;
                }
                guard.master_fd()
            };

            match super::wait_readable(fd, READER_POLL_MS) {
                Ok(false) => continue,
                Ok(true) => {
                    let done = {
                        let mut session = match session.lock() {
                            Ok(g) => g,
                            Err(_) => break,
                        };
                        let mut host = match host.lock() {
                            Ok(g) => g,
                            Err(_) => break,
                        };
                        session.read_pump(&mut *host).is_err()
                    };
                    wake.ring();
                    if done {
                        break;
                    }
                }
                Err(_) => {
                    wake.ring();
                    break;
                }
            }
        });

        Self {
            stop,
            handle: Some(handle),
        }
    }

    /// Ask the thread to stop and join it
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for ReaderThread {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Waiter thread: one blocking waitpid per session child, wakeup on
/// completion. The exit is returned through the join handle.
pub fn spawn_waiter(pid: Pid, wake: WakeupSender) -> JoinHandle<Option<ChildExit>> {
    thread::spawn(move || {
        let exit = loop {
            match waitpid(pid, None) {
                Ok(WaitStatus::Exited(pid, code)) => {
                    break Some(ChildExit {
                        pid,
                        kind: ExitKind::Exited(code),
                    })
                }
                Ok(WaitStatus::Signaled(pid, sig, _)) => {
                    break Some(ChildExit {
                        pid,
                        kind: ExitKind::Signaled(sig as i32),
                    })
                }
                Ok(_) => continue,
                Err(Errno::EINTR) => continue,
                Err(_) => break None,
            }
        };
        wake.ring();
        exit
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::session::open_session;
    use crate::testutil::TestHost;
    use std::time::{Duration, Instant};

    #[test]
    fn test_reader_thread_collects_output() {
        if std::env::var("CI").is_ok() {
            return;
        }
        crate::testutil::init_tracing();
        let session = open_session("/bin/echo threaded", false, None, &Config::default())
            .expect("open session");
        let session = Arc::new(Mutex::new(session));
        let host = Arc::new(Mutex::new(TestHost::default()));
        let wakeup = Wakeup::new().expect("wakeup pipe");

        let reader = ReaderThread::spawn(session.clone(), host.clone(), wakeup.sender());

        let deadline = Instant::now() + Duration::from_secs(5);
        let mut seen = false;
        while !seen && Instant::now() < deadline {
            let _ = super::super::wait_readable(wakeup.fd(), 100);
            wakeup.drain();
            seen = host
                .lock()
                .unwrap()
                .lines
                .iter()
                .any(|l| l.contains("threaded"));
        }
        reader.stop();
        assert!(seen);
    }

    #[test]
    fn test_waiter_reports_exit() {
        if std::env::var("CI").is_ok() {
            return;
        }
        let session =
            open_session("/bin/true", false, None, &Config::default()).expect("open session");
        let pid = session.pid();
        let wakeup = Wakeup::new().expect("wakeup pipe");

        let waiter = spawn_waiter(pid, wakeup.sender());
        // A concurrently running reaper can win the race for this child,
        // in which case the waiter reports None rather than an exit
        if let Some(exit) = waiter.join().expect("join waiter") {
            assert_eq!(exit.pid, pid);
            assert_eq!(exit.kind, ExitKind::Exited(0));
        }
    }
}
