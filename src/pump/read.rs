//! Read-path normalization and line assembly
//!
//! Subprocess output arrives in arbitrary chunks. In line mode the
//! assembler folds backspaces, strips carriage returns (recognizing the
//! two shell-redraw idioms that invalidate the tracked prompt),
//! substitutes caret markers for echoed EOF/interrupt bytes, pulls BEL
//! bytes out for signaling, and splits on newlines; completed lines go
//! to the display, the unterminated remainder becomes the prompt. A
//! chunk opening with an escape marker can hand the whole stream off to
//! the external VT100 decoder, after which bytes are forwarded verbatim
//! and only an undecoded trailing fragment is carried between reads.

use crate::host::Host;
use crate::pty::ControlChars;

const ESC: u8 = 0x1b;
const BEL: u8 = 0x07;
const BS: u8 = 0x08;

/// Which of the two read-path states the session is in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PumpMode {
    /// Normalize and line-split output
    Line,
    /// Forward output verbatim to the external decoder
    Vt100,
}

/// What one `read_pump` invocation accomplished
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReadOutcome {
    pub lines_emitted: usize,
    pub prompt_changed: bool,
}

impl ReadOutcome {
    pub(crate) fn merge(&mut self, other: ReadOutcome) {
        self.lines_emitted += other.lines_emitted;
        self.prompt_changed |= other.prompt_changed;
    }
}

/// Per-session read-path state.
///
/// Owned by the session handle; the fragment never contains an embedded
/// newline.
pub struct OutputAssembler {
    /// Unterminated tail of output since the last newline
    fragment: Vec<u8>,
    /// Escape-sequence tail the decoder could not yet consume
    escape_carry: Vec<u8>,
    /// A chunk ended in a lone CR; its meaning depends on what follows
    pending_cr: bool,
    /// Password-style prompt heuristic (see `update_prompt`)
    dot_mode: bool,
    mode: PumpMode,
    control: ControlChars,
}

impl OutputAssembler {
    pub fn new(control: ControlChars) -> Self {
        Self {
            fragment: Vec::new(),
            escape_carry: Vec::new(),
            pending_cr: false,
            dot_mode: false,
            mode: PumpMode::Line,
            control,
        }
    }

    pub fn mode(&self) -> PumpMode {
        self.mode
    }

    /// Force the pump mode; hosts call this when the external decoder
    /// relinquishes the screen
    pub fn set_mode(&mut self, mode: PumpMode) {
        if mode == PumpMode::Line {
            self.escape_carry.clear();
        }
        self.mode = mode;
    }

    /// Whether the tracked prompt looks like a password prompt
    pub fn dot_mode(&self) -> bool {
        self.dot_mode
    }

    /// The tracked prompt, if any
    pub fn prompt(&self) -> Option<String> {
        if self.fragment.is_empty() {
            None
        } else {
            Some(String::from_utf8_lossy(&self.fragment).into_owned())
        }
    }

    /// Process one chunk of subprocess output
    pub fn feed(&mut self, chunk: &[u8], host: &mut dyn Host) -> ReadOutcome {
        if self.mode == PumpMode::Vt100 {
            return self.feed_vt100(chunk, host);
        }
        if chunk.first() == Some(&ESC) && host.autovt_switch() {
            self.mode = PumpMode::Vt100;
            return self.feed_vt100(chunk, host);
        }
        self.feed_line(chunk, host)
    }

    fn feed_vt100(&mut self, chunk: &[u8], host: &mut dyn Host) -> ReadOutcome {
        let rest = if self.escape_carry.is_empty() {
            host.vt100_eat(chunk)
        } else {
            let mut joined = std::mem::take(&mut self.escape_carry);
            joined.extend_from_slice(chunk);
            host.vt100_eat(&joined)
        };
        self.escape_carry = rest;
        ReadOutcome::default()
    }

    fn feed_line(&mut self, chunk: &[u8], host: &mut dyn Host) -> ReadOutcome {
        let fragment_before = self.fragment.clone();
        let mut lines_emitted = 0;

        let mut i = 0;
        if self.pending_cr {
            self.pending_cr = false;
            if chunk.starts_with(&[ESC, b'[', b'K']) {
                // The CR was the first half of the redraw idiom, split
                // across two reads; swallow its erase-to-end-of-line
                self.fragment.clear();
                i = 3;
            } else {
                // A lone CR moved the cursor back to column 0; anything
                // but a line ending overwrites from the last confirmed
                // newline
                match chunk.first() {
                    Some(&b'\n') | Some(&b'\r') | None => {}
                    Some(_) => self.fragment.clear(),
                }
            }
        }
        while i < chunk.len() {
            let b = chunk[i];
            match b {
                b'\n' => {
                    self.emit_line(host);
                    lines_emitted += 1;
                    i += 1;
                }
                b'\r' => {
                    if chunk[i + 1..].starts_with(&[ESC, b'[', b'K']) {
                        // CR + erase-to-end-of-line: the shell is
                        // redrawing; the tracked prompt is stale
                        self.fragment.clear();
                        i += 4;
                    } else if i + 1 == chunk.len() {
                        if self.fragment.last() == Some(&b' ') {
                            self.fragment.clear();
                        }
                        self.pending_cr = true;
                        i += 1;
                    } else {
                        // Bare CR mid-chunk
                        i += 1;
                    }
                }
                BS => {
                    // Fragments restart at each newline, so this can
                    // never delete past one
                    self.fragment.pop();
                    i += 1;
                }
                BEL => {
                    host.bell();
                    i += 1;
                }
                b if b != 0 && b == self.control.eof => {
                    self.fragment.extend_from_slice(&caret(b));
                    i += 1;
                }
                b if b != 0 && b == self.control.intr => {
                    self.fragment.extend_from_slice(&caret(b));
                    i += 1;
                }
                _ => {
                    self.fragment.push(b);
                    i += 1;
                }
            }
        }

        let prompt_changed = self.update_prompt(host, &fragment_before, lines_emitted);
        ReadOutcome {
            lines_emitted,
            prompt_changed,
        }
    }

    fn emit_line(&mut self, host: &mut dyn Host) {
        let raw = std::mem::take(&mut self.fragment);
        let line = String::from_utf8_lossy(&raw).into_owned();
        match host.vt100_color_line(&line) {
            Some(colorized) => host.append_line(&colorized),
            None => host.append_line(&line),
        }
        host.evict_oldest_if_over_cap();
    }

    fn update_prompt(
        &mut self,
        host: &mut dyn Host,
        before: &[u8],
        lines_emitted: usize,
    ) -> bool {
        let changed = self.fragment != before;
        if changed || lines_emitted > 0 {
            match self.prompt() {
                Some(prompt) => {
                    // Inherited heuristic: a prompt tail mentioning
                    // "assword" means the child is reading a secret.
                    // Known-approximate; kept as-is.
                    self.dot_mode = prompt.contains("assword");
                    host.set_prompt(Some(&prompt));
                }
                None => {
                    self.dot_mode = false;
                    host.set_prompt(None);
                }
            }
        }
        changed
    }
}

/// Caret notation for a control byte: 0x04 renders as `^D`
fn caret(b: u8) -> [u8; 2] {
    [b'^', b ^ 0x40]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::TestHost;
    use proptest::prelude::*;

    fn assembler() -> OutputAssembler {
        OutputAssembler::new(ControlChars::default())
    }

    #[test]
    fn test_plain_lines() {
        let mut asm = assembler();
        let mut host = TestHost::default();
        asm.feed(b"one\ntwo\nthr", &mut host);
        assert_eq!(host.lines, vec!["one", "two"]);
        assert_eq!(host.prompt.as_deref(), Some("thr"));
        assert_eq!(host.evictions, 2);
    }

    #[test]
    fn test_backspace_folds_one_char() {
        let mut asm = assembler();
        let mut host = TestHost::default();
        asm.feed(b"ab\x08c\n", &mut host);
        assert_eq!(host.lines, vec!["ac"]);
    }

    #[test]
    fn test_backspace_at_start_is_noop() {
        let mut asm = assembler();
        let mut host = TestHost::default();
        asm.feed(b"\x08abc\n", &mut host);
        assert_eq!(host.lines, vec!["abc"]);
    }

    #[test]
    fn test_backspace_never_deletes_past_newline() {
        let mut asm = assembler();
        let mut host = TestHost::default();
        asm.feed(b"line\n\x08x\n", &mut host);
        assert_eq!(host.lines, vec!["line", "x"]);
    }

    #[test]
    fn test_crlf_one_chunk_vs_split() {
        let mut asm1 = assembler();
        let mut host1 = TestHost::default();
        asm1.feed(b"AB\r\nCD", &mut host1);

        let mut asm2 = assembler();
        let mut host2 = TestHost::default();
        asm2.feed(b"AB\r", &mut host2);
        asm2.feed(b"\nCD", &mut host2);

        assert_eq!(host1.lines, vec!["AB"]);
        assert_eq!(host1.lines, host2.lines);
        assert_eq!(asm1.prompt(), asm2.prompt());
        assert_eq!(asm1.prompt().as_deref(), Some("CD"));
    }

    #[test]
    fn test_cr_erase_eol_clears_prompt() {
        let mut asm = assembler();
        let mut host = TestHost::default();
        asm.feed(b"user$ \r\x1b[Kls\n", &mut host);
        assert_eq!(host.lines, vec!["ls"]);
        assert!(host.lines.iter().all(|l| !l.contains("user$")));
    }

    #[test]
    fn test_cr_erase_eol_split_across_reads() {
        let mut asm = assembler();
        let mut host = TestHost::default();
        asm.feed(b"user$ x\r", &mut host);
        asm.feed(b"\x1b[Kls\n", &mut host);
        assert_eq!(host.lines, vec!["ls"]);
        assert!(host.lines.iter().all(|l| !l.contains('\u{1b}')));
    }

    #[test]
    fn test_lone_cr_then_fresh_data_clears_prompt() {
        let mut asm = assembler();
        let mut host = TestHost::default();
        asm.feed(b"user$ x", &mut host);
        asm.feed(b"\r", &mut host);
        asm.feed(b"ls\n", &mut host);
        assert_eq!(host.lines, vec!["ls"]);
    }

    #[test]
    fn test_lone_cr_after_blank_clears_immediately() {
        let mut asm = assembler();
        let mut host = TestHost::default();
        asm.feed(b"user$ \r", &mut host);
        assert_eq!(asm.prompt(), None);
        assert_eq!(host.prompt, None);
    }

    #[test]
    fn test_bare_cr_mid_chunk_is_dropped() {
        let mut asm = assembler();
        let mut host = TestHost::default();
        asm.feed(b"a\rb\n", &mut host);
        assert_eq!(host.lines, vec!["ab"]);
    }

    #[test]
    fn test_bell_extracted() {
        let mut asm = assembler();
        let mut host = TestHost::default();
        asm.feed(b"a\x07b\n", &mut host);
        assert_eq!(host.bells, 1);
        assert_eq!(host.lines, vec!["ab"]);
    }

    #[test]
    fn test_control_bytes_become_markers() {
        let mut asm = assembler();
        let mut host = TestHost::default();
        asm.feed(b"got \x04 and \x03\n", &mut host);
        assert_eq!(host.lines, vec!["got ^D and ^C"]);
    }

    #[test]
    fn test_colorized_line() {
        let mut asm = assembler();
        let mut host = TestHost {
            colorize: true,
            ..TestHost::default()
        };
        asm.feed(b"make\n", &mut host);
        assert_eq!(host.lines, vec!["<make>"]);
    }

    #[test]
    fn test_autovt_switch_enters_vt100() {
        let mut asm = assembler();
        let mut host = TestHost {
            autovt: true,
            ..TestHost::default()
        };
        asm.feed(b"\x1b[2Jhello", &mut host);
        assert_eq!(asm.mode(), PumpMode::Vt100);
        assert_eq!(host.vt_bytes, b"\x1b[2Jhello");
        assert!(host.lines.is_empty());

        // Subsequent chunks stay in vt100 mode regardless of content
        asm.feed(b"more", &mut host);
        assert_eq!(host.vt_bytes, b"\x1b[2Jhellomore");
    }

    #[test]
    fn test_autovt_declined_keeps_line_mode() {
        let mut asm = assembler();
        let mut host = TestHost::default();
        asm.feed(b"\x1b[2J\n", &mut host);
        assert_eq!(asm.mode(), PumpMode::Line);
        assert_eq!(host.lines.len(), 1);
    }

    #[test]
    fn test_escape_fragment_carried_across_reads() {
        let mut asm = assembler();
        let mut host = TestHost {
            autovt: true,
            ..TestHost::default()
        };
        asm.feed(b"\x1b[2J\x1b[", &mut host);
        assert_eq!(host.vt_bytes, b"\x1b[2J");
        asm.feed(b"K", &mut host);
        assert_eq!(host.vt_bytes, b"\x1b[2J\x1b[K");
    }

    #[test]
    fn test_leaving_vt100_drops_carry() {
        let mut asm = assembler();
        let mut host = TestHost {
            autovt: true,
            ..TestHost::default()
        };
        asm.feed(b"\x1b[2J\x1b[", &mut host);
        asm.set_mode(PumpMode::Line);
        asm.feed(b"plain\n", &mut host);
        assert_eq!(host.lines, vec!["plain"]);
    }

    #[test]
    fn test_dot_mode_heuristic() {
        let mut asm = assembler();
        let mut host = TestHost::default();
        asm.feed(b"Password: ", &mut host);
        assert!(asm.dot_mode());
        asm.feed(b"\n", &mut host);
        assert!(!asm.dot_mode());
    }

    proptest! {
        /// Chunk-boundary invariance: for CRLF-terminated streams,
        /// splitting a delivery at any byte yields the same completed
        /// lines and the same final prompt
        #[test]
        fn prop_chunk_boundary_invariance(
            // Pieces stay blank-free: a blank before a chunk-final CR
            // legitimately triggers the prompt-clearing idiom, which is
            // split-sensitive by design
            pieces in proptest::collection::vec("[a-z]{0,6}", 0..8),
            split in 0usize..64,
        ) {
            let mut input = Vec::new();
            for (i, piece) in pieces.iter().enumerate() {
                input.extend_from_slice(piece.as_bytes());
                if i + 1 < pieces.len() {
                    input.extend_from_slice(b"\r\n");
                }
            }
            let split = split.min(input.len());

            let mut asm1 = assembler();
            let mut host1 = TestHost::default();
            asm1.feed(&input, &mut host1);

            let mut asm2 = assembler();
            let mut host2 = TestHost::default();
            asm2.feed(&input[..split], &mut host2);
            asm2.feed(&input[split..], &mut host2);

            prop_assert_eq!(host1.lines, host2.lines);
            prop_assert_eq!(asm1.prompt(), asm2.prompt());
        }
    }
}
