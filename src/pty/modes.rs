//! Terminal attribute capture, raw mode, and restore
//!
//! The attributes of the controlling terminal are captured once, before
//! raw mode is imposed, and restored exactly once on teardown. In
//! restricted launch contexts (editor started from a window manager, no
//! obvious tty) the controlling terminal may not be on any standard
//! descriptor, so capture walks a short candidate list and commits to
//! the first descriptor that answers tcgetattr.

use std::os::unix::io::{AsFd, BorrowedFd, OwnedFd, RawFd};

use nix::fcntl::{open, OFlag};
use nix::libc;
use nix::sys::stat::Mode;
use nix::sys::termios::{
    self, ControlFlags, InputFlags, LocalFlags, OutputFlags, SetArg,
    SpecialCharacterIndices, Termios,
};

use crate::error::{Result, SessionError};

/// The control characters a session propagates into its child and
/// substitutes markers for in output
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlChars {
    pub intr: u8,
    pub eof: u8,
    pub erase: u8,
    pub kill: u8,
    pub susp: u8,
}

impl Default for ControlChars {
    fn default() -> Self {
        // Classic tty defaults: ^C, ^D, DEL, ^U, ^Z
        Self {
            intr: 0x03,
            eof: 0x04,
            erase: 0x7f,
            kill: 0x15,
            susp: 0x1a,
        }
    }
}

/// Snapshot of terminal attributes taken before raw mode was imposed
#[derive(Debug, Clone)]
pub struct TerminalAttributes {
    termios: Termios,
}

impl TerminalAttributes {
    /// Capture the attributes of a specific descriptor
    pub fn capture(fd: BorrowedFd<'_>) -> Result<Self> {
        let termios = termios::tcgetattr(&fd).map_err(SessionError::Termios)?;
        Ok(Self { termios })
    }

    /// Capture the attributes of the controlling terminal, trying
    /// stdin, stdout, stderr, then `/dev/tty` in that order
    pub fn capture_controlling() -> Result<Self> {
        for fd in [libc::STDIN_FILENO, libc::STDOUT_FILENO, libc::STDERR_FILENO] {
            // SAFETY: the standard descriptors outlive this probe
            let borrowed = unsafe { BorrowedFd::borrow_raw(fd) };
            if let Ok(attrs) = Self::capture(borrowed) {
                return Ok(attrs);
            }
        }
        let tty: OwnedFd = open("/dev/tty", OFlag::O_RDWR | OFlag::O_NOCTTY, Mode::empty())
            .map(|fd| unsafe { std::os::unix::io::FromRawFd::from_raw_fd(fd) })
            .map_err(SessionError::Termios)?;
        Self::capture(tty.as_fd())
    }

    /// The control characters in effect when the snapshot was taken
    pub fn control_chars(&self) -> ControlChars {
        let cc = &self.termios.control_chars;
        ControlChars {
            intr: cc[SpecialCharacterIndices::VINTR as usize],
            eof: cc[SpecialCharacterIndices::VEOF as usize],
            erase: cc[SpecialCharacterIndices::VERASE as usize],
            kill: cc[SpecialCharacterIndices::VKILL as usize],
            susp: cc[SpecialCharacterIndices::VSUSP as usize],
        }
    }

    /// Copy the captured control characters onto another termios, so a
    /// child inherits the user's interrupt/EOF/erase keys
    pub fn apply_control_chars(&self, target: &mut Termios) {
        for idx in [
            SpecialCharacterIndices::VINTR,
            SpecialCharacterIndices::VQUIT,
            SpecialCharacterIndices::VEOF,
            SpecialCharacterIndices::VERASE,
            SpecialCharacterIndices::VKILL,
            SpecialCharacterIndices::VSUSP,
            SpecialCharacterIndices::VSTART,
            SpecialCharacterIndices::VSTOP,
        ] {
            target.control_chars[idx as usize] = self.termios.control_chars[idx as usize];
        }
    }

    pub(crate) fn termios(&self) -> &Termios {
        &self.termios
    }
}

/// Raw-mode manager for a descriptor
///
/// `set_raw` snapshots the attributes on first use; `restore` applies
/// the snapshot back and forgets it, so a restore is never applied
/// twice without an intervening capture.
#[derive(Default)]
pub struct TerminalModes {
    saved: Option<TerminalAttributes>,
}

impl TerminalModes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a snapshot is currently held
    pub fn is_raw(&self) -> bool {
        self.saved.is_some()
    }

    /// Put `fd` into raw mode: no canonical buffering, no echo, no
    /// signal-generating characters, 8-bit no-parity framing,
    /// single-byte minimum reads
    pub fn set_raw(&mut self, fd: RawFd) -> Result<()> {
        // SAFETY: caller guarantees fd stays open across the call
        let borrowed = unsafe { BorrowedFd::borrow_raw(fd) };
        let attrs = match self.saved {
            // Re-rawing without an intervening restore must not clobber
            // the original snapshot
            Some(ref saved) => saved.clone(),
            None => {
                let captured = TerminalAttributes::capture(borrowed)?;
                self.saved = Some(captured.clone());
                captured
            }
        };

        let mut raw = attrs.termios().clone();
        raw.local_flags &= !(LocalFlags::ICANON
            | LocalFlags::ECHO
            | LocalFlags::ISIG
            | LocalFlags::IEXTEN);
        raw.input_flags &= !(InputFlags::IXON
            | InputFlags::ICRNL
            | InputFlags::INPCK
            | InputFlags::ISTRIP
            | InputFlags::BRKINT);
        raw.output_flags &= !OutputFlags::OPOST;
        raw.control_flags &= !ControlFlags::PARENB;
        raw.control_flags |= ControlFlags::CS8;
        raw.control_chars[SpecialCharacterIndices::VMIN as usize] = 1;
        raw.control_chars[SpecialCharacterIndices::VTIME as usize] = 0;

        termios::tcsetattr(&borrowed, SetArg::TCSANOW, &raw).map_err(SessionError::Termios)
    }

    /// Restore the snapshot taken by `set_raw`. A no-op when nothing is
    /// saved.
    pub fn restore(&mut self, fd: RawFd) -> Result<()> {
        let Some(saved) = self.saved.take() else {
            return Ok(());
        };
        // SAFETY: caller guarantees fd stays open across the call
        let borrowed = unsafe { BorrowedFd::borrow_raw(fd) };
        termios::tcsetattr(&borrowed, SetArg::TCSANOW, saved.termios())
            .map_err(SessionError::Termios)
    }
}
