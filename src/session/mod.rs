//! Session lifecycle and the public handle
//!
//! A [`Session`] owns everything one subprocess needs: the master
//! descriptor, child and process-group ids, the captured terminal
//! attributes, the accounting entry, and both pump buffers. There is no
//! per-process global state; any number of sessions can coexist, each
//! pumped from the owner's event loop.

mod launcher;
mod monitor;
mod registry;

pub use launcher::tokenize;
pub use monitor::{ChildExit, ExitKind, LifecycleMonitor};
pub use registry::RegistryEntry;

use std::os::unix::io::{AsRawFd, OwnedFd, RawFd};
use std::path::{Path, PathBuf};

use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::{self, Pid};

use crate::config::Config;
use crate::error::{Result, SessionError};
use crate::host::Host;
use crate::pump::write::FdWriter;
use crate::pump::{self, OutputAssembler, PumpMode, ReadOutcome, WriteQueue, WriteStatus};
use crate::pty::{get_window_size, set_window_size, TerminalAttributes, WindowSize};

/// Open a session running `command` (or the configured shell when the
/// command line is empty) on a fresh pty
pub fn open_session(
    command: &str,
    login_shell: bool,
    registry_host: Option<&str>,
    config: &Config,
) -> Result<Session> {
    Session::open(command, login_shell, registry_host, config)
}

/// A live pty session: one child, one master descriptor, valid from
/// open until close
pub struct Session {
    master: OwnedFd,
    slave_path: PathBuf,
    pid: Pid,
    pgid: Pid,
    registry: Option<RegistryEntry>,
    alive: bool,
    closed_notified: bool,
    assembler: OutputAssembler,
    writes: WriteQueue,
    read_buf: Vec<u8>,
    config: Config,
}

impl Session {
    pub fn open(
        command: &str,
        login_shell: bool,
        registry_host: Option<&str>,
        config: &Config,
    ) -> Result<Self> {
        let argv = if command.trim().is_empty() {
            vec![config.resolve_shell()]
        } else {
            launcher::tokenize(command)?
        };

        // Snapshot the controlling terminal before the child exists so
        // its interrupt/EOF/erase keys carry over. Restricted launch
        // contexts may have no terminal at all; defaults apply then.
        let attrs = TerminalAttributes::capture_controlling().ok();

        let spawned = launcher::spawn(
            &argv,
            login_shell,
            &config.term,
            attrs.as_ref(),
            WindowSize::default(),
        )?;
        tracing::debug!(pid = spawned.pid.as_raw(), slave = %spawned.slave_path.display(), "session spawned");

        let registry =
            registry::record_login(&spawned.slave_path, spawned.pid.as_raw(), registry_host);

        let control = attrs
            .as_ref()
            .map(TerminalAttributes::control_chars)
            .unwrap_or_default();

        Ok(Session {
            master: spawned.master,
            slave_path: spawned.slave_path,
            // setsid in the child made it its own process-group leader
            pgid: spawned.pid,
            pid: spawned.pid,
            registry,
            alive: true,
            closed_notified: false,
            assembler: OutputAssembler::new(control),
            writes: WriteQueue::new(control),
            read_buf: vec![0u8; config.read_chunk.max(1)],
            config: config.clone(),
        })
    }

    /// The master descriptor, for the host's poll set
    pub fn master_fd(&self) -> RawFd {
        self.master.as_raw_fd()
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    pub fn slave_path(&self) -> &Path {
        &self.slave_path
    }

    /// Liveness flag as last observed; does not probe the child
    pub fn is_open(&self) -> bool {
        self.alive
    }

    /// Probe the child and update the liveness flag
    pub fn is_alive(&mut self) -> bool {
        self.alive && self.child_running()
    }

    pub fn mode(&self) -> PumpMode {
        self.assembler.mode()
    }

    /// Hosts call this when the external decoder relinquishes the screen
    pub fn set_mode(&mut self, mode: PumpMode) {
        self.assembler.set_mode(mode);
    }

    /// Whether the tracked prompt looks like a password prompt
    pub fn dot_mode(&self) -> bool {
        self.assembler.dot_mode()
    }

    pub fn prompt(&self) -> Option<String> {
        self.assembler.prompt()
    }

    /// Pump subprocess output into the display.
    ///
    /// Reads at most `reads_per_pump` bounded chunks, re-checking
    /// readiness with a short wait between chunks so the hosting loop
    /// is never starved. EINTR and EAGAIN are absorbed; EOF and any
    /// other failure mark the session dead and surface exactly one
    /// closed-session notification.
    pub fn read_pump(&mut self, host: &mut dyn Host) -> Result<ReadOutcome> {
        if !self.alive {
            // Death discovered out-of-band (an is_alive probe) has not
            // yet notified the host; the one notification is owed here
            self.mark_dead(host);
            return Err(SessionError::SessionClosed);
        }

        let mut total = ReadOutcome::default();
        let mut any_data = false;

        for _ in 0..self.config.reads_per_pump.max(1) {
            match unistd::read(self.master.as_raw_fd(), &mut self.read_buf) {
                Ok(0) => {
                    self.mark_dead(host);
                    break;
                }
                Ok(n) => {
                    any_data = true;
                    let outcome = self.assembler.feed(&self.read_buf[..n], host);
                    total.merge(outcome);
                }
                Err(Errno::EINTR) => continue,
                Err(Errno::EAGAIN) => break,
                Err(e) => {
                    tracing::debug!(error = %e, "read failed, closing session");
                    self.mark_dead(host);
                    break;
                }
            }

            // More pending? A short bounded wait, never an indefinite block
            match pump::wait_readable(self.master.as_raw_fd(), self.config.poll_timeout_ms) {
                Ok(true) => continue,
                Ok(false) => break,
                Err(_) => break,
            }
        }

        if any_data {
            host.request_redraw();
        }
        Ok(total)
    }

    /// Submit input to the subprocess. Empty input retries any queued
    /// remainder from an earlier `Partial`.
    pub fn write_pump(&mut self, text: &str, newline: bool) -> WriteStatus {
        if !self.alive {
            return WriteStatus::Fail;
        }
        let mut writer = FdWriter(self.master.as_raw_fd());
        if text.is_empty() && !newline {
            self.writes.flush(&mut writer)
        } else {
            self.writes
                .push_line(text, newline, self.assembler.mode(), &mut writer)
        }
    }

    /// Send the terminal's EOF byte, after flushing anything queued
    pub fn send_eof(&mut self) -> WriteStatus {
        if !self.alive {
            return WriteStatus::Fail;
        }
        let mut writer = FdWriter(self.master.as_raw_fd());
        self.writes.send_eof(&mut writer)
    }

    /// Queued unsent bytes from earlier partial writes
    pub fn pending_writes(&self) -> usize {
        self.writes.pending_len()
    }

    /// Wait for the master to accept writes, up to `timeout_ms`
    pub fn wait_writable(&self, timeout_ms: i32) -> Result<bool> {
        if !self.alive {
            return Err(SessionError::SessionClosed);
        }
        pump::wait_writable(self.master.as_raw_fd(), timeout_ms)
    }

    /// Resize the pty and nudge the foreground job with SIGWINCH.
    ///
    /// A session whose child already exited gets a recoverable error,
    /// not a crash.
    pub fn resize(&mut self, size: WindowSize) -> Result<()> {
        if !self.is_alive() {
            return Err(SessionError::SessionClosed);
        }
        set_window_size(self.master.as_raw_fd(), size)?;
        let _ = signal::killpg(self.pgid, Signal::SIGWINCH);
        Ok(())
    }

    /// Report the kernel's current window size for this session
    pub fn window_size(&self) -> Result<WindowSize> {
        get_window_size(self.master.as_raw_fd())
    }

    /// Send a signal to the session's child
    pub fn signal(&self, sig: Signal) -> Result<()> {
        if !self.alive {
            return Err(SessionError::SessionClosed);
        }
        signal::kill(self.pid, sig).map_err(SessionError::Signal)
    }

    pub fn kill(&self) -> Result<()> {
        self.signal(Signal::SIGKILL)
    }

    /// Fold a reaped child from the [`LifecycleMonitor`] into this
    /// session. Returns true when the exit was ours; a foreign pid is
    /// informational only.
    pub fn handle_child_exit(&mut self, exit: &ChildExit, host: &mut dyn Host) -> bool {
        if exit.pid != self.pid {
            tracing::debug!(pid = exit.pid.as_raw(), "reaped unrelated child");
            return false;
        }
        tracing::debug!(pid = exit.pid.as_raw(), kind = ?exit.kind, "session child exited");
        self.mark_dead(host);
        true
    }

    /// Tear the session down: hang up the process group, finalize the
    /// accounting record, mark the handle dead. Synchronous; later
    /// pump calls return defined errors.
    pub fn close(&mut self) {
        self.teardown();
        // Owner-initiated teardown does not echo back a notification
        self.closed_notified = true;
    }

    /// Drop liveness, hang up the process group, finalize the
    /// accounting record. Idempotent once dead.
    fn teardown(&mut self) {
        if self.alive {
            self.alive = false;
            let _ = signal::killpg(self.pgid, Signal::SIGHUP);
        }
        if let Some(entry) = self.registry.take() {
            registry::record_logout(&entry);
        }
    }

    fn mark_dead(&mut self, host: &mut dyn Host) {
        self.teardown();
        if !self.closed_notified {
            self.closed_notified = true;
            host.notify_session_closed();
        }
    }

    fn child_running(&mut self) -> bool {
        match waitpid(self.pid, Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::StillAlive) => true,
            // Exited, already reaped elsewhere (ECHILD), or
            // unreachable. The host's notification is still owed and is
            // delivered by the next read_pump.
            Ok(_) | Err(_) => {
                self.teardown();
                false
            }
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        let was_alive = self.alive;
        self.teardown();
        if was_alive {
            let _ = waitpid(self.pid, Some(WaitPidFlag::WNOHANG));
        }
    }
}
