//! Write-path buffering with partial-write continuation
//!
//! The pty master is non-blocking, so any write may stop short. Unsent
//! bytes are queued on the session and retried ahead of new input;
//! bytes are never reordered, duplicated, or dropped across retries.
//! The one exception is deliberate: a line consisting solely of the
//! interrupt character discards whatever is queued and goes out
//! immediately, because an interactive break must not wait in line
//! behind stale output.

use std::io;
use std::os::unix::io::RawFd;

use nix::errno::Errno;

use super::PumpMode;
use crate::pty::ControlChars;

/// Line-buffer capacity. The pending queue stays strictly below this.
pub(crate) const LINE_BUF_CAP: usize = 1024;

/// Result of a write-pump call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteStatus {
    /// Everything went out
    Success,
    /// Earlier queued bytes are still outstanding; the new input was
    /// not accepted and must be resubmitted
    Blocked,
    /// Input accepted; an unsent remainder is queued for the next call
    Partial,
    /// Unrecoverable write failure
    Fail,
}

/// Destination of the write pump. Sessions write to the pty master;
/// tests substitute an in-memory writer.
pub trait MasterWrite {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize>;
}

/// `MasterWrite` over a raw descriptor, mapping EAGAIN/EINTR onto the
/// std error kinds the queue retries on
pub(crate) struct FdWriter(pub RawFd);

impl MasterWrite for FdWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match nix::unistd::write(self.0, buf) {
            Ok(n) => Ok(n),
            Err(Errno::EAGAIN) => Err(io::Error::new(io::ErrorKind::WouldBlock, "would block")),
            Err(Errno::EINTR) => Err(io::Error::new(io::ErrorKind::Interrupted, "interrupted")),
            Err(e) => Err(io::Error::from_raw_os_error(e as i32)),
        }
    }
}

enum Drain {
    Emptied,
    Progress,
    NoProgress,
    Error,
}

/// Per-session pending-write state
pub struct WriteQueue {
    pending: Vec<u8>,
    control: ControlChars,
}

impl WriteQueue {
    pub fn new(control: ControlChars) -> Self {
        Self {
            pending: Vec::new(),
            control,
        }
    }

    /// Queued byte count; always less than [`LINE_BUF_CAP`]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Submit a line of input. The terminator, when requested, is CR in
    /// VT100 mode and LF in line mode. Empty input with `newline` off
    /// just retries the queue.
    pub fn push_line(
        &mut self,
        text: &str,
        newline: bool,
        mode: PumpMode,
        w: &mut dyn MasterWrite,
    ) -> WriteStatus {
        let bytes = text.as_bytes();

        // Interactive break always wins over queued output
        if bytes == [self.control.intr] {
            self.pending.clear();
            return match write_retrying(w, &[self.control.intr]) {
                Written::All => WriteStatus::Success,
                Written::Stopped(_) => {
                    self.pending.push(self.control.intr);
                    WriteStatus::Partial
                }
                Written::Error => WriteStatus::Fail,
            };
        }

        match self.drain(w) {
            Drain::Emptied => {}
            Drain::Progress | Drain::NoProgress => return WriteStatus::Blocked,
            Drain::Error => return WriteStatus::Fail,
        }

        let mut buf = bytes.to_vec();
        if newline {
            buf.push(terminator(mode));
        }
        if buf.is_empty() {
            return WriteStatus::Success;
        }
        if buf.len() >= LINE_BUF_CAP {
            tracing::warn!(len = buf.len(), "input exceeds line buffer capacity");
            return WriteStatus::Fail;
        }

        match write_retrying(w, &buf) {
            Written::All => WriteStatus::Success,
            Written::Stopped(off) => {
                self.pending.extend_from_slice(&buf[off..]);
                WriteStatus::Partial
            }
            Written::Error => WriteStatus::Fail,
        }
    }

    /// Retry queued bytes without submitting new input
    pub fn flush(&mut self, w: &mut dyn MasterWrite) -> WriteStatus {
        match self.drain(w) {
            Drain::Emptied => WriteStatus::Success,
            Drain::Progress => WriteStatus::Partial,
            Drain::NoProgress => WriteStatus::Blocked,
            Drain::Error => WriteStatus::Fail,
        }
    }

    /// Send the terminal's EOF byte. Pending bytes are flushed first;
    /// ordering is preserved and the EOF is never allowed to overtake
    /// them.
    pub fn send_eof(&mut self, w: &mut dyn MasterWrite) -> WriteStatus {
        match self.drain(w) {
            Drain::Error => return WriteStatus::Fail,
            Drain::Emptied => {}
            Drain::Progress | Drain::NoProgress => {
                if self.pending.len() + 1 >= LINE_BUF_CAP {
                    return WriteStatus::Blocked;
                }
                self.pending.push(self.control.eof);
                return WriteStatus::Partial;
            }
        }
        match write_retrying(w, &[self.control.eof]) {
            Written::All => WriteStatus::Success,
            Written::Stopped(_) => {
                self.pending.push(self.control.eof);
                WriteStatus::Partial
            }
            Written::Error => WriteStatus::Fail,
        }
    }

    fn drain(&mut self, w: &mut dyn MasterWrite) -> Drain {
        if self.pending.is_empty() {
            return Drain::Emptied;
        }
        let mut progressed = false;
        while !self.pending.is_empty() {
            match w.write(&self.pending) {
                Ok(0) => break,
                Ok(n) => {
                    self.pending.drain(..n);
                    progressed = true;
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(_) => return Drain::Error,
            }
        }
        if self.pending.is_empty() {
            Drain::Emptied
        } else if progressed {
            Drain::Progress
        } else {
            Drain::NoProgress
        }
    }
}

fn terminator(mode: PumpMode) -> u8 {
    match mode {
        PumpMode::Vt100 => b'\r',
        PumpMode::Line => b'\n',
    }
}

enum Written {
    All,
    Stopped(usize),
    Error,
}

fn write_retrying(w: &mut dyn MasterWrite, buf: &[u8]) -> Written {
    let mut off = 0;
    while off < buf.len() {
        match w.write(&buf[off..]) {
            Ok(0) => return Written::Stopped(off),
            Ok(n) => off += n,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Written::Stopped(off),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(_) => return Written::Error,
        }
    }
    Written::All
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Writer that accepts a budgeted number of bytes per call, then
    /// reports WouldBlock; records everything it accepted in order
    struct ShortWriter {
        accepted: Vec<u8>,
        per_call: usize,
        budget: Option<usize>,
    }

    impl ShortWriter {
        fn new(per_call: usize) -> Self {
            Self {
                accepted: Vec::new(),
                per_call,
                budget: None,
            }
        }

        fn with_budget(per_call: usize, budget: usize) -> Self {
            Self {
                accepted: Vec::new(),
                per_call,
                budget: Some(budget),
            }
        }
    }

    impl MasterWrite for ShortWriter {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            let mut n = self.per_call.min(buf.len());
            if let Some(budget) = self.budget.as_mut() {
                n = n.min(*budget);
                if n == 0 {
                    return Err(io::Error::new(io::ErrorKind::WouldBlock, "budget spent"));
                }
                *budget -= n;
            }
            self.accepted.extend_from_slice(&buf[..n]);
            Ok(n)
        }
    }

    struct FailWriter;

    impl MasterWrite for FailWriter {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::from_raw_os_error(libc::EIO))
        }
    }

    fn queue() -> WriteQueue {
        WriteQueue::new(ControlChars::default())
    }

    #[test]
    fn test_full_write_succeeds() {
        let mut q = queue();
        let mut w = ShortWriter::new(64);
        assert_eq!(q.push_line("ls", true, PumpMode::Line, &mut w), WriteStatus::Success);
        assert_eq!(w.accepted, b"ls\n");
        assert_eq!(q.pending_len(), 0);
    }

    #[test]
    fn test_vt100_mode_uses_cr_terminator() {
        let mut q = queue();
        let mut w = ShortWriter::new(64);
        assert_eq!(q.push_line("ls", true, PumpMode::Vt100, &mut w), WriteStatus::Success);
        assert_eq!(w.accepted, b"ls\r");
    }

    #[test]
    fn test_partial_drains_to_success_without_duplication() {
        let mut q = queue();
        let mut w = ShortWriter::with_budget(3, 3);
        assert_eq!(q.push_line("hello", false, PumpMode::Line, &mut w), WriteStatus::Partial);
        assert_eq!(q.pending_len(), 2);

        // Repeated calls with no new input drain the queue
        w.budget = Some(64);
        assert_eq!(q.flush(&mut w), WriteStatus::Success);
        assert_eq!(q.pending_len(), 0);
        assert_eq!(w.accepted, b"hello");
    }

    #[test]
    fn test_blocked_preserves_buffer_and_rejects_new_input() {
        let mut q = queue();
        let mut w = ShortWriter::with_budget(8, 3);
        assert_eq!(q.push_line("hello", false, PumpMode::Line, &mut w), WriteStatus::Partial);

        // Zero progress on the queued bytes: new input must be rejected
        assert_eq!(q.push_line("world", false, PumpMode::Line, &mut w), WriteStatus::Blocked);
        assert_eq!(q.pending_len(), 2);
        assert_eq!(w.accepted, b"hel");
    }

    #[test]
    fn test_interrupt_discards_queue() {
        let mut q = queue();
        let mut w = ShortWriter::with_budget(3, 3);
        assert_eq!(q.push_line("hello", false, PumpMode::Line, &mut w), WriteStatus::Partial);
        assert_eq!(q.pending_len(), 2);

        // The stale bytes are discarded, not retried
        w.budget = Some(64);
        assert_eq!(q.push_line("\x03", false, PumpMode::Line, &mut w), WriteStatus::Success);
        assert_eq!(q.pending_len(), 0);
        assert_eq!(w.accepted, b"hel\x03");
    }

    #[test]
    fn test_eof_flushes_pending_first() {
        let mut q = queue();
        let mut w = ShortWriter::with_budget(3, 3);
        assert_eq!(q.push_line("hello", false, PumpMode::Line, &mut w), WriteStatus::Partial);

        w.budget = Some(64);
        assert_eq!(q.send_eof(&mut w), WriteStatus::Success);
        // The held-back "lo" went out before the EOF byte
        assert_eq!(w.accepted, b"hello\x04");
        assert_eq!(q.pending_len(), 0);
    }

    #[test]
    fn test_eof_queued_when_blocked() {
        let mut q = queue();
        let mut w = ShortWriter::with_budget(3, 3);
        assert_eq!(q.push_line("hello", false, PumpMode::Line, &mut w), WriteStatus::Partial);

        assert_eq!(q.send_eof(&mut w), WriteStatus::Partial);
        assert_eq!(q.pending_len(), 3); // "lo" then ^D, order preserved

        w.budget = Some(64);
        assert_eq!(q.flush(&mut w), WriteStatus::Success);
        assert_eq!(w.accepted, b"hello\x04");
    }

    #[test]
    fn test_hard_error_is_fail() {
        let mut q = queue();
        let mut w = FailWriter;
        assert_eq!(q.push_line("ls", true, PumpMode::Line, &mut w), WriteStatus::Fail);
    }

    #[test]
    fn test_oversized_input_rejected() {
        let mut q = queue();
        let mut w = ShortWriter::new(64);
        let big = "x".repeat(LINE_BUF_CAP);
        assert_eq!(q.push_line(&big, true, PumpMode::Line, &mut w), WriteStatus::Fail);
        assert_eq!(q.pending_len(), 0);
    }
}
