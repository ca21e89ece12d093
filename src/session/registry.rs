//! Best-effort utmp accounting
//!
//! Login-accounting records are written in the host's native utmpx
//! layout so `who`, `w`, and friends see our sessions. Nothing here is
//! allowed to fail a session: a process without write access to the
//! accounting database just skips the bookkeeping. When the binary runs
//! with a saved privileged uid, it is raised only around the write and
//! dropped again unconditionally.

use std::path::Path;

use nix::libc;
use nix::unistd::{geteuid, seteuid, Uid};

/// Handle for a written accounting record, kept so teardown can rewrite
/// the same key as a dead process
#[derive(Debug, Clone)]
pub struct RegistryEntry {
    line: String,
    id: String,
    pid: libc::pid_t,
}

/// Write a "user process" record for a freshly spawned session.
///
/// Returns `None` when the record could not be written; the session
/// proceeds regardless.
pub(crate) fn record_login(
    slave_path: &Path,
    pid: libc::pid_t,
    host: Option<&str>,
) -> Option<RegistryEntry> {
    let line = short_line(slave_path);
    let id = line_id(&line);
    let user = std::env::var("USER")
        .or_else(|_| std::env::var("LOGNAME"))
        .unwrap_or_default();

    let mut record = blank_record();
    record.ut_type = libc::USER_PROCESS;
    record.ut_pid = pid;
    fill(&mut record.ut_line, &line);
    fill(&mut record.ut_id, &id);
    fill(&mut record.ut_user, &user);
    if let Some(host) = host {
        fill(&mut record.ut_host, host);
    }
    stamp(&mut record);

    if put_record(&record) {
        Some(RegistryEntry { line, id, pid })
    } else {
        tracing::debug!(line = %line, "utmp login record skipped");
        None
    }
}

/// Rewrite the entry as a dead process on teardown
pub(crate) fn record_logout(entry: &RegistryEntry) {
    let mut record = blank_record();
    record.ut_type = libc::DEAD_PROCESS;
    record.ut_pid = entry.pid;
    fill(&mut record.ut_line, &entry.line);
    fill(&mut record.ut_id, &entry.id);
    stamp(&mut record);

    if !put_record(&record) {
        tracing::debug!(line = %entry.line, "utmp logout record skipped");
    }
}

/// The record key: device path minus the `/dev/` prefix
fn short_line(slave_path: &Path) -> String {
    let s = slave_path.to_string_lossy();
    s.strip_prefix("/dev/").unwrap_or(&s).to_string()
}

/// utmp ids are at most four bytes; use the tail of the line, which is
/// the part that distinguishes pts/0 from pts/12
fn line_id(line: &str) -> String {
    let bytes = line.as_bytes();
    let start = bytes.len().saturating_sub(4);
    String::from_utf8_lossy(&bytes[start..]).into_owned()
}

fn blank_record() -> libc::utmpx {
    // SAFETY: utmpx is a plain C struct; all-zeroes is its empty state
    unsafe { std::mem::zeroed() }
}

fn stamp(record: &mut libc::utmpx) {
    if let Ok(now) = std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH) {
        record.ut_tv.tv_sec = now.as_secs() as _;
        record.ut_tv.tv_usec = now.subsec_micros() as _;
    }
}

fn fill(dst: &mut [libc::c_char], src: &str) {
    let n = src.len().min(dst.len().saturating_sub(1));
    for (d, s) in dst.iter_mut().zip(src.as_bytes()[..n].iter()) {
        *d = *s as libc::c_char;
    }
}

/// Write one record, transiently raising the effective uid when the
/// first attempt is refused
fn put_record(record: &libc::utmpx) -> bool {
    if put_once(record) {
        return true;
    }
    let euid = geteuid();
    if euid.is_root() {
        return false;
    }
    if seteuid(Uid::from_raw(0)).is_err() {
        return false;
    }
    let written = put_once(record);
    if seteuid(euid).is_err() {
        // The restore must never silently stick at elevated privilege
        tracing::warn!("failed to drop transient privilege after utmp write");
    }
    written
}

fn put_once(record: &libc::utmpx) -> bool {
    // SAFETY: the utmpx API takes a pointer to a fully initialized
    // record and copies it; the cast exists because pututxline takes a
    // mutable pointer despite not mutating through it
    unsafe {
        libc::setutxent();
        let written = !libc::pututxline(record as *const _ as *mut _).is_null();
        libc::endutxent();
        written
    }
}
