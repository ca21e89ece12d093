//! The I/O pumps
//!
//! Byte traffic between the subprocess and the display buffer flows
//! through here: `read` normalizes and line-splits subprocess output,
//! `write` buffers and retries input to the subprocess, `worker` drives
//! the read path from a background thread for hosts without a poll
//! loop. Neither path ever blocks indefinitely; readiness is checked
//! with a short bounded wait so the hosting UI loop stays responsive.

pub mod read;
pub mod worker;
pub mod write;

pub use read::{OutputAssembler, PumpMode, ReadOutcome};
pub use write::{MasterWrite, WriteQueue, WriteStatus};

use std::os::unix::io::{BorrowedFd, RawFd};

use nix::poll::{poll, PollFd, PollFlags};

use crate::error::{Result, SessionError};

/// Wait for readiness on a descriptor with a bounded timeout.
///
/// Returns true when the requested events (or a hangup, which a
/// subsequent read will report as EOF) are pending. EINTR counts as a
/// timeout rather than an error.
pub(crate) fn wait_fd(fd: RawFd, events: PollFlags, timeout_ms: i32) -> Result<bool> {
    // SAFETY: the caller owns fd for the duration of this call
    let borrowed_fd = unsafe { BorrowedFd::borrow_raw(fd) };
    let mut poll_fds = [PollFd::new(&borrowed_fd, events)];

    match poll(&mut poll_fds, timeout_ms) {
        Ok(n) if n > 0 => {
            let revents = poll_fds[0].revents().unwrap_or(PollFlags::empty());
            Ok(revents.intersects(events | PollFlags::POLLHUP | PollFlags::POLLERR))
        }
        Ok(_) => Ok(false),
        Err(nix::errno::Errno::EINTR) => Ok(false),
        Err(e) => Err(SessionError::Poll(e)),
    }
}

/// Wait for the master to become readable
pub fn wait_readable(fd: RawFd, timeout_ms: i32) -> Result<bool> {
    wait_fd(fd, PollFlags::POLLIN, timeout_ms)
}

/// Wait for the master to accept writes
pub fn wait_writable(fd: RawFd, timeout_ms: i32) -> Result<bool> {
    wait_fd(fd, PollFlags::POLLOUT, timeout_ms)
}
