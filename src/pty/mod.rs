//! PTY allocation and terminal mode handling
//!
//! This module owns the two places the engine touches the kernel's
//! terminal machinery: acquiring a master/slave pair and manipulating
//! termios state. Everything platform-dialect-specific lives behind
//! these interfaces.

mod allocator;
mod modes;

pub use allocator::{allocate, PtyPair};
pub use modes::{ControlChars, TerminalAttributes, TerminalModes};

use std::os::unix::io::RawFd;

use nix::libc;

use crate::error::{Result, SessionError};

/// Window size for a pty
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowSize {
    pub rows: u16,
    pub cols: u16,
    pub pixel_width: u16,
    pub pixel_height: u16,
}

impl Default for WindowSize {
    fn default() -> Self {
        Self {
            rows: 24,
            cols: 80,
            pixel_width: 0,
            pixel_height: 0,
        }
    }
}

impl WindowSize {
    pub fn new(rows: u16, cols: u16) -> Self {
        Self {
            rows,
            cols,
            pixel_width: 0,
            pixel_height: 0,
        }
    }
}

impl From<WindowSize> for libc::winsize {
    fn from(ws: WindowSize) -> Self {
        libc::winsize {
            ws_row: ws.rows,
            ws_col: ws.cols,
            ws_xpixel: ws.pixel_width,
            ws_ypixel: ws.pixel_height,
        }
    }
}

impl From<libc::winsize> for WindowSize {
    fn from(ws: libc::winsize) -> Self {
        WindowSize {
            rows: ws.ws_row,
            cols: ws.ws_col,
            pixel_width: ws.ws_xpixel,
            pixel_height: ws.ws_ypixel,
        }
    }
}

/// Set the window size on a pty file descriptor
pub fn set_window_size(fd: RawFd, size: WindowSize) -> Result<()> {
    let winsize: libc::winsize = size.into();
    // SAFETY: TIOCSWINSZ is a valid ioctl for setting window size
    unsafe {
        if libc::ioctl(fd, libc::TIOCSWINSZ, &winsize) < 0 {
            return Err(SessionError::WindowSize(nix::Error::last()));
        }
    }
    Ok(())
}

/// Query the kernel's window size for a pty file descriptor
pub fn get_window_size(fd: RawFd) -> Result<WindowSize> {
    let mut winsize = libc::winsize {
        ws_row: 0,
        ws_col: 0,
        ws_xpixel: 0,
        ws_ypixel: 0,
    };
    // SAFETY: TIOCGWINSZ fills the winsize struct passed by pointer
    unsafe {
        if libc::ioctl(fd, libc::TIOCGWINSZ, &mut winsize) < 0 {
            return Err(SessionError::WindowSize(nix::Error::last()));
        }
    }
    Ok(winsize.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_size_default() {
        let ws = WindowSize::default();
        assert_eq!(ws.rows, 24);
        assert_eq!(ws.cols, 80);
    }

    #[test]
    fn test_window_size_to_libc() {
        let ws = WindowSize {
            rows: 30,
            cols: 100,
            pixel_width: 800,
            pixel_height: 600,
        };
        let libc_ws: libc::winsize = ws.into();
        assert_eq!(libc_ws.ws_row, 30);
        assert_eq!(libc_ws.ws_col, 100);
        assert_eq!(libc_ws.ws_xpixel, 800);
        assert_eq!(libc_ws.ws_ypixel, 600);
    }

    #[test]
    fn test_set_and_get_window_size() {
        let pair = allocate().expect("failed to allocate pty");
        let fd = std::os::unix::io::AsRawFd::as_raw_fd(&pair.master);

        set_window_size(fd, WindowSize::new(40, 100)).expect("set size");
        let reported = get_window_size(fd).expect("get size");
        assert_eq!(reported.rows, 40);
        assert_eq!(reported.cols, 100);
    }
}
