//! Collaborator interfaces consumed by the session engine.
//!
//! The engine pumps bytes; what those bytes mean on screen is somebody
//! else's business. The display buffer, the escape-sequence decoder, and
//! the owning window implement these traits and are driven by the pumps.

/// The display buffer a session's output lands in
pub trait DisplaySink {
    /// Append a completed line to the display
    fn append_line(&mut self, text: &str);
    /// Drop the oldest line if the display is over its configured cap
    fn evict_oldest_if_over_cap(&mut self);
    /// Replace the tracked prompt (the unterminated tail of output).
    /// `None` clears it.
    fn set_prompt(&mut self, prompt: Option<&str>);
}

/// Notifications to the owning window
pub trait UiNotifier {
    /// A BEL byte arrived in the output stream
    fn bell(&mut self);
    /// Session state changed in a way worth repainting for
    fn request_redraw(&mut self);
    /// The session died. Delivered exactly once per session.
    fn notify_session_closed(&mut self);
}

/// The external terminal-escape decoder
pub trait Vt100Decoder {
    /// Feed bytes to the decoder wholesale
    fn vt100_parse(&mut self, bytes: &[u8]);
    /// Feed bytes to the decoder; returns the trailing fragment it could
    /// not yet decode (an escape sequence split across reads)
    fn vt100_eat(&mut self, bytes: &[u8]) -> Vec<u8>;
    /// Whether output beginning with an escape marker should switch the
    /// session into VT100 mode
    fn autovt_switch(&self) -> bool;
    /// Optionally colorize a completed line before display
    fn vt100_color_line(&self, line: &str) -> Option<String>;
}

/// Everything the read pump needs from its owner, in one object
pub trait Host: DisplaySink + UiNotifier + Vt100Decoder {}

impl<T: DisplaySink + UiNotifier + Vt100Decoder> Host for T {}
