//! Command parsing and subprocess launch
//!
//! The command line is tokenized with shell-ish quoting (single and
//! double quotes, backslash escape), then the child is forked: new
//! session leader, slave pty as controlling terminal on the standard
//! streams, the user's interrupt/EOF/erase keys copied onto the slave,
//! default signal dispositions, exec.

use std::ffi::CString;
use std::os::unix::io::{AsRawFd, BorrowedFd, OwnedFd};
use std::path::PathBuf;
use std::process;

use nix::fcntl::{open, OFlag};
use nix::libc;
use nix::sys::signal::{self, Signal};
use nix::sys::stat::Mode;
use nix::sys::termios::{self, SetArg};
use nix::unistd::{close, dup2, execvp, fork, setsid, ForkResult, Pid};

use crate::error::{Result, SessionError};
use crate::pty::{allocate, set_window_size, TerminalAttributes, WindowSize};

/// Split a command line into argv.
///
/// Honors single quotes (literal), double quotes (backslash escapes `"`
/// and `\` inside), and backslash as the escape character outside
/// quotes.
pub fn tokenize(command: &str) -> Result<Vec<String>> {
    let mut argv = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut chars = command.chars();

    while let Some(c) = chars.next() {
        match c {
            ' ' | '\t' => {
                if in_word {
                    argv.push(std::mem::take(&mut current));
                    in_word = false;
                }
            }
            '\\' => {
                in_word = true;
                match chars.next() {
                    Some(escaped) => current.push(escaped),
                    None => {
                        return Err(SessionError::BadCommand(
                            "trailing escape character".to_string(),
                        ))
                    }
                }
            }
            '\'' => {
                in_word = true;
                loop {
                    match chars.next() {
                        Some('\'') => break,
                        Some(inner) => current.push(inner),
                        None => {
                            return Err(SessionError::BadCommand(
                                "unterminated single quote".to_string(),
                            ))
                        }
                    }
                }
            }
            '"' => {
                in_word = true;
                loop {
                    match chars.next() {
                        Some('"') => break,
                        Some('\\') => match chars.next() {
                            Some(escaped @ ('"' | '\\')) => current.push(escaped),
                            Some(other) => {
                                current.push('\\');
                                current.push(other);
                            }
                            None => {
                                return Err(SessionError::BadCommand(
                                    "unterminated double quote".to_string(),
                                ))
                            }
                        },
                        Some(inner) => current.push(inner),
                        None => {
                            return Err(SessionError::BadCommand(
                                "unterminated double quote".to_string(),
                            ))
                        }
                    }
                }
            }
            _ => {
                in_word = true;
                current.push(c);
            }
        }
    }
    if in_word {
        argv.push(current);
    }
    if argv.is_empty() {
        return Err(SessionError::BadCommand("empty command".to_string()));
    }
    Ok(argv)
}

/// A successfully launched subprocess on a fresh pty
pub(crate) struct Spawned {
    pub master: OwnedFd,
    pub slave_path: PathBuf,
    pub pid: Pid,
}

/// Fork and exec `argv` attached to a newly allocated pty
pub(crate) fn spawn(
    argv: &[String],
    login_shell: bool,
    term: &str,
    attrs: Option<&TerminalAttributes>,
    size: WindowSize,
) -> Result<Spawned> {
    let pair = allocate()?;
    set_window_size(pair.master.as_raw_fd(), size)?;

    // Build every CString before forking; the child must not allocate
    let program = CString::new(argv[0].as_bytes())
        .map_err(|_| SessionError::BadCommand("argv contains NUL".to_string()))?;
    let mut c_argv: Vec<CString> = Vec::with_capacity(argv.len());
    let argv0 = if login_shell {
        // Login-shell convention: a leading dash on argv[0]
        format!("-{}", basename(&argv[0]))
    } else {
        argv[0].clone()
    };
    c_argv.push(
        CString::new(argv0.as_bytes())
            .map_err(|_| SessionError::BadCommand("argv contains NUL".to_string()))?,
    );
    for arg in &argv[1..] {
        c_argv.push(
            CString::new(arg.as_bytes())
                .map_err(|_| SessionError::BadCommand("argv contains NUL".to_string()))?,
        );
    }
    let slave_cstr = CString::new(pair.slave_path.to_string_lossy().as_bytes().to_vec())
        .map_err(|_| SessionError::BadCommand("slave path contains NUL".to_string()))?;

    // SAFETY: fork is safe here because the child only calls
    // async-signal-safe functions plus exit paths before exec
    match unsafe { fork() }.map_err(SessionError::Fork)? {
        ForkResult::Parent { child } => Ok(Spawned {
            master: pair.master,
            slave_path: pair.slave_path,
            pid: child,
        }),
        ForkResult::Child => {
            drop(pair.master);
            setup_child(&slave_cstr, &program, &c_argv, term, attrs);
        }
    }
}

/// Runs in the forked child; never returns
fn setup_child(
    slave_path: &CString,
    program: &CString,
    argv: &[CString],
    term: &str,
    attrs: Option<&TerminalAttributes>,
) -> ! {
    // Become session leader and process group leader
    if setsid().is_err() {
        process::exit(1);
    }

    // Opening the slave after setsid makes it the controlling terminal
    // on BSD-flavored hosts; the ioctl below covers the SYS5 ones
    let slave_fd = match open(slave_path.as_c_str(), OFlag::O_RDWR, Mode::empty()) {
        Ok(fd) => fd,
        Err(_) => process::exit(1),
    };

    // SAFETY: TIOCSCTTY is a valid ioctl for acquiring a controlling
    // terminal; failure is tolerable where open() already acquired it
    unsafe {
        libc::ioctl(slave_fd, libc::TIOCSCTTY as _, 0);
    }

    // Hand the user's control characters down to the subprocess
    if let Some(attrs) = attrs {
        // SAFETY: slave_fd is open for the duration of this block
        let borrowed = unsafe { BorrowedFd::borrow_raw(slave_fd) };
        if let Ok(mut slave_termios) = termios::tcgetattr(&borrowed) {
            attrs.apply_control_chars(&mut slave_termios);
            let _ = termios::tcsetattr(&borrowed, SetArg::TCSANOW, &slave_termios);
        }
    }

    if dup2(slave_fd, libc::STDIN_FILENO).is_err()
        || dup2(slave_fd, libc::STDOUT_FILENO).is_err()
        || dup2(slave_fd, libc::STDERR_FILENO).is_err()
    {
        process::exit(1);
    }
    if slave_fd > libc::STDERR_FILENO {
        let _ = close(slave_fd);
    }

    // Reset inherited dispositions so the subprocess starts clean
    unsafe {
        for sig in [
            Signal::SIGCHLD,
            Signal::SIGHUP,
            Signal::SIGINT,
            Signal::SIGQUIT,
            Signal::SIGTERM,
            Signal::SIGALRM,
        ] {
            let _ = signal::signal(sig, signal::SigHandler::SigDfl);
        }
    }

    std::env::set_var("TERM", term);

    let argv_refs: Vec<&std::ffi::CStr> = argv.iter().map(|s| s.as_c_str()).collect();
    let _ = execvp(program.as_c_str(), &argv_refs);

    // Only reached when exec failed
    process::exit(127);
}

fn basename(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokenize_plain() {
        assert_eq!(
            tokenize("ls -l /tmp").unwrap(),
            vec!["ls", "-l", "/tmp"]
        );
    }

    #[test]
    fn test_tokenize_collapses_whitespace() {
        assert_eq!(tokenize("  a \t b  ").unwrap(), vec!["a", "b"]);
    }

    #[test]
    fn test_tokenize_single_quotes() {
        assert_eq!(
            tokenize("echo 'hello world'").unwrap(),
            vec!["echo", "hello world"]
        );
    }

    #[test]
    fn test_tokenize_double_quotes_with_escape() {
        assert_eq!(
            tokenize(r#"echo "a \"b\" c""#).unwrap(),
            vec!["echo", r#"a "b" c"#]
        );
    }

    #[test]
    fn test_tokenize_backslash_escapes_space() {
        assert_eq!(
            tokenize(r"cat my\ file").unwrap(),
            vec!["cat", "my file"]
        );
    }

    #[test]
    fn test_tokenize_unterminated_quote() {
        assert!(matches!(
            tokenize("echo 'oops"),
            Err(SessionError::BadCommand(_))
        ));
        assert!(matches!(
            tokenize("echo \"oops"),
            Err(SessionError::BadCommand(_))
        ));
    }

    #[test]
    fn test_tokenize_empty_is_error() {
        assert!(matches!(
            tokenize("   "),
            Err(SessionError::BadCommand(_))
        ));
    }

    #[test]
    fn test_basename() {
        assert_eq!(basename("/bin/bash"), "bash");
        assert_eq!(basename("sh"), "sh");
    }
}
