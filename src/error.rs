//! Error types for pty sessions.
//!
//! Allocation and spawn failures surface synchronously with the OS error
//! attached. Once a session is running, every failure mode collapses into
//! a single closed-session notification; callers only ever see
//! [`SessionError::SessionClosed`] from a dead handle.

use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("No pty available")]
    NoPtyAvailable,

    #[error("Permission denied: {0}")]
    PermissionDenied(#[source] nix::Error),

    #[error("Failed to open pty master: {0}")]
    OpenMaster(#[source] nix::Error),

    #[error("Failed to grant pty access: {0}")]
    GrantPty(#[source] nix::Error),

    #[error("Failed to unlock pty: {0}")]
    UnlockPty(#[source] nix::Error),

    #[error("Failed to get slave name: {0}")]
    SlaveName(#[source] nix::Error),

    #[error("Failed to set non-blocking mode: {0}")]
    SetNonBlocking(#[source] nix::Error),

    #[error("Failed to read terminal attributes: {0}")]
    Termios(#[source] nix::Error),

    #[error("Bad command line: {0}")]
    BadCommand(String),

    #[error("Failed to fork: {0}")]
    Fork(#[source] nix::Error),

    #[error("Failed to set window size: {0}")]
    WindowSize(#[source] nix::Error),

    #[error("Failed to poll: {0}")]
    Poll(#[source] nix::Error),

    #[error("Failed to signal child: {0}")]
    Signal(#[source] nix::Error),

    #[error("Failed to install child monitor: {0}")]
    Monitor(#[source] nix::Error),

    #[error("Session closed")]
    SessionClosed,

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Result type for session operations
pub type Result<T> = std::result::Result<T, SessionError>;
