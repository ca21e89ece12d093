//! PTY allocation
//!
//! Prefers the Unix98 cloning device:
//! - posix_openpt() to open the master
//! - grantpt() to set permissions
//! - unlockpt() to unlock the slave
//! - ptsname() to get the slave device path
//!
//! When the cloning device is missing (old kernels, stripped-down
//! chroots), falls back to scanning the legacy BSD namespace
//! `/dev/pty[p-z][0-9a-f]`, committing to a master only once the paired
//! `/dev/tty??` slave has been verified openable. Either way the master
//! descriptor is handed out non-blocking.

use std::os::unix::io::{AsRawFd, FromRawFd, IntoRawFd, OwnedFd, RawFd};
use std::path::PathBuf;

use nix::errno::Errno;
use nix::fcntl::{fcntl, open, FcntlArg, OFlag};
use nix::pty::{grantpt, posix_openpt, ptsname, unlockpt};
use nix::sys::stat::Mode;
use nix::unistd::close;

use crate::error::{Result, SessionError};

/// A freshly allocated master/slave pair.
///
/// The slave is identified by path rather than descriptor: the child
/// opens it after `setsid` so it becomes the controlling terminal there.
pub struct PtyPair {
    pub master: OwnedFd,
    pub slave_path: PathBuf,
}

/// Allocate a pty pair, preferring the cloning device
pub fn allocate() -> Result<PtyPair> {
    match allocate_unix98() {
        Ok(pair) => Ok(pair),
        Err(err @ SessionError::PermissionDenied(_)) => Err(err),
        Err(err) => {
            tracing::debug!("cloning device unavailable ({err}), scanning legacy namespace");
            allocate_legacy()
        }
    }
}

/// Map a cloning-device errno: denials surface as such, anything else
/// keeps the failing step attached
fn classify(errno: Errno, step: fn(nix::Error) -> SessionError) -> SessionError {
    match errno {
        Errno::EACCES | Errno::EPERM => SessionError::PermissionDenied(errno),
        other => step(other),
    }
}

fn allocate_unix98() -> Result<PtyPair> {
    let master = posix_openpt(OFlag::O_RDWR | OFlag::O_NOCTTY)
        .map_err(|e| classify(e, SessionError::OpenMaster))?;

    grantpt(&master).map_err(|e| classify(e, SessionError::GrantPty))?;
    unlockpt(&master).map_err(|e| classify(e, SessionError::UnlockPty))?;

    // SAFETY: ptsname is not thread-safe, but we copy the result into an
    // owned PathBuf before any other pty call can clobber it
    let slave_name =
        unsafe { ptsname(&master) }.map_err(|e| classify(e, SessionError::SlaveName))?;
    let slave_path = PathBuf::from(slave_name);

    let master = unsafe { OwnedFd::from_raw_fd(master.into_raw_fd()) };
    set_nonblocking(master.as_raw_fd()).map_err(SessionError::SetNonBlocking)?;

    Ok(PtyPair { master, slave_path })
}

/// Letters and digits of the BSD pty namespace, scanned in order
const BANKS: &[u8] = b"pqrstuvwxyz";
const SLOTS: &[u8] = b"0123456789abcdef";

fn allocate_legacy() -> Result<PtyPair> {
    let mut denied = false;

    for bank in BANKS {
        for slot in SLOTS {
            let master_path = format!("/dev/pty{}{}", *bank as char, *slot as char);
            let slave_path = format!("/dev/tty{}{}", *bank as char, *slot as char);

            let master_fd = match open(master_path.as_str(), OFlag::O_RDWR | OFlag::O_NOCTTY, Mode::empty()) {
                Ok(fd) => fd,
                Err(Errno::EACCES) | Err(Errno::EPERM) => {
                    denied = true;
                    continue;
                }
                Err(_) => continue,
            };
            let master = unsafe { OwnedFd::from_raw_fd(master_fd) };

            // Commit only if the paired slave actually opens; a master
            // whose slave is revoked or missing is useless to the child
            match open(slave_path.as_str(), OFlag::O_RDWR | OFlag::O_NOCTTY, Mode::empty()) {
                Ok(slave_fd) => {
                    let _ = close(slave_fd);
                    set_nonblocking(master.as_raw_fd())
                        .map_err(SessionError::SetNonBlocking)?;
                    return Ok(PtyPair {
                        master,
                        slave_path: PathBuf::from(slave_path),
                    });
                }
                Err(Errno::EACCES) | Err(Errno::EPERM) => {
                    denied = true;
                    continue;
                }
                Err(_) => continue,
            }
        }
    }

    if denied {
        Err(SessionError::PermissionDenied(Errno::EACCES))
    } else {
        Err(SessionError::NoPtyAvailable)
    }
}

fn set_nonblocking(fd: RawFd) -> std::result::Result<(), Errno> {
    let flags = fcntl(fd, FcntlArg::F_GETFL)?;
    let flags = OFlag::from_bits_truncate(flags);
    fcntl(fd, FcntlArg::F_SETFL(flags | OFlag::O_NONBLOCK))?;
    Ok(())
}
