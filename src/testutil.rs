//! In-memory collaborator stand-ins for tests

use crate::host::{DisplaySink, UiNotifier, Vt100Decoder};

const ESC: u8 = 0x1b;

/// Install the test tracing subscriber; `RUST_LOG` selects verbosity.
/// Safe to call from every test, only the first call takes effect.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// One object standing in for the display buffer, the owning window,
/// and the external VT100 decoder
#[derive(Default)]
pub struct TestHost {
    pub lines: Vec<String>,
    pub prompt: Option<String>,
    pub bells: usize,
    pub redraws: usize,
    pub closed: usize,
    pub evictions: usize,
    pub vt_bytes: Vec<u8>,
    pub autovt: bool,
    pub colorize: bool,
}

impl DisplaySink for TestHost {
    fn append_line(&mut self, text: &str) {
        self.lines.push(text.to_string());
    }
    fn evict_oldest_if_over_cap(&mut self) {
        self.evictions += 1;
    }
    fn set_prompt(&mut self, prompt: Option<&str>) {
        self.prompt = prompt.map(str::to_string);
    }
}

impl UiNotifier for TestHost {
    fn bell(&mut self) {
        self.bells += 1;
    }
    fn request_redraw(&mut self) {
        self.redraws += 1;
    }
    fn notify_session_closed(&mut self) {
        self.closed += 1;
    }
}

impl Vt100Decoder for TestHost {
    fn vt100_parse(&mut self, bytes: &[u8]) {
        self.vt_bytes.extend_from_slice(bytes);
    }

    fn vt100_eat(&mut self, bytes: &[u8]) -> Vec<u8> {
        // Hold back a trailing escape sequence that has no final byte
        // yet, like a real decoder would
        if let Some(pos) = bytes.iter().rposition(|&b| b == ESC) {
            let tail = &bytes[pos..];
            let complete = tail.len() >= 3 || (tail.len() == 2 && tail[1] != b'[');
            if !complete {
                self.vt_bytes.extend_from_slice(&bytes[..pos]);
                return tail.to_vec();
            }
        }
        self.vt_bytes.extend_from_slice(bytes);
        Vec::new()
    }

    fn autovt_switch(&self) -> bool {
        self.autovt
    }

    fn vt100_color_line(&self, line: &str) -> Option<String> {
        if self.colorize {
            Some(format!("<{line}>"))
        } else {
            None
        }
    }
}
