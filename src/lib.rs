//! Subshell: a pty session engine for embedded shell windows
//!
//! This crate is the process-and-plumbing core an editor needs to host
//! interactive shell windows: it allocates a pseudo-terminal, spawns a
//! subprocess as a session leader on the slave side, and pumps bytes
//! between the subprocess and the owner's display buffer without ever
//! blocking the owner's event loop.
//!
//! - `pty`: master/slave allocation and terminal mode handling
//! - `session`: the session handle, launch, accounting, child reaping
//! - `pump`: the read and write I/O pumps and the worker-thread driver
//! - `host`: the collaborator traits the owner implements
//!
//! The display model, the VT100 escape grammar, and the rendering are
//! external collaborators behind the [`host`] traits; this crate only
//! normalizes the byte stream (backspace folding, carriage-return
//! idioms, control-byte markers) and decides when to hand a session off
//! to the external decoder.
//!
//! The default concurrency model is cooperative: the owner polls
//! `Session::master_fd` and `LifecycleMonitor::fd` and calls the pumps.
//! [`pump::worker`] provides the same contract via background threads
//! for hosts without a poll loop.

pub mod config;
pub mod error;
pub mod host;
pub mod pty;
pub mod pump;
pub mod session;

#[cfg(test)]
mod testutil;

pub use config::Config;
pub use error::{Result, SessionError};
pub use host::{DisplaySink, Host, UiNotifier, Vt100Decoder};
pub use pty::{ControlChars, TerminalAttributes, TerminalModes, WindowSize};
pub use pump::{OutputAssembler, PumpMode, ReadOutcome, WriteQueue, WriteStatus};
pub use session::{open_session, ChildExit, ExitKind, LifecycleMonitor, Session};
