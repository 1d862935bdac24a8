//! Session detachment for `--daemon`
//!
//! POSIX hosts get the classic double fork: the first fork frees the
//! parent to exit, `setsid` drops the controlling terminal, the second
//! fork gives up session leadership so the daemon can never reacquire
//! one. The grandchild then moves to `/`, clears the umask and points
//! stdio at `/dev/null` and the log file.
//!
//! Hosts without `fork` fall back to marker-only registration: the
//! process keeps running attached and `--stop`/`--status` still work
//! through the marker.
//!
//! Detach before installing signal handlers or spawning any thread;
//! fork carries only the calling thread into the child.

use std::path::Path;

/// Detachment errors. A failure here is fatal: the process exits
/// non-zero before any job runs.
#[derive(Debug, thiserror::Error)]
pub enum DaemonError {
    #[error("fork failed: {0}")]
    Fork(String),

    #[error("setsid failed: {0}")]
    Session(String),

    #[error("stdio redirect failed: {0}")]
    Redirect(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// How this host detaches a background run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetachStrategy {
    /// POSIX double fork into a fresh session
    DoubleFork,
    /// No fork available: stay attached, rely on the marker alone
    BackgroundMarker,
}

/// Which side of the detachment the caller landed on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Detached {
    /// Original foreground process; should report and exit promptly
    Parent,
    /// Detached continuation that goes on to run the schedule
    Child,
}

/// Pick the detachment strategy for the current host
pub fn select_strategy() -> DetachStrategy {
    if cfg!(unix) {
        DetachStrategy::DoubleFork
    } else {
        DetachStrategy::BackgroundMarker
    }
}

/// Perform the detachment. `Parent` means the caller is the original
/// process and the daemon is running elsewhere.
pub fn detach(strategy: DetachStrategy, log_path: &Path) -> Result<Detached, DaemonError> {
    match strategy {
        #[cfg(unix)]
        DetachStrategy::DoubleFork => double_fork(log_path),
        #[cfg(not(unix))]
        DetachStrategy::DoubleFork => {
            let _ = log_path;
            Ok(Detached::Child)
        }
        DetachStrategy::BackgroundMarker => Ok(Detached::Child),
    }
}

#[cfg(unix)]
fn double_fork(log_path: &Path) -> Result<Detached, DaemonError> {
    // Single-threaded here; no handler threads exist yet
    let pid = unsafe { libc::fork() };
    if pid < 0 {
        return Err(DaemonError::Fork(last_os_error()));
    }
    if pid > 0 {
        return Ok(Detached::Parent);
    }

    if unsafe { libc::setsid() } < 0 {
        return Err(DaemonError::Session(last_os_error()));
    }

    let pid = unsafe { libc::fork() };
    if pid < 0 {
        return Err(DaemonError::Fork(last_os_error()));
    }
    if pid > 0 {
        // Intermediate session leader has served its purpose
        std::process::exit(0);
    }

    std::env::set_current_dir("/")?;
    unsafe {
        libc::umask(0);
    }
    redirect_stdio(log_path)?;

    Ok(Detached::Child)
}

#[cfg(unix)]
fn redirect_stdio(log_path: &Path) -> Result<(), DaemonError> {
    use std::fs::OpenOptions;
    use std::os::unix::io::AsRawFd;

    let devnull = OpenOptions::new().read(true).open("/dev/null")?;
    let log = OpenOptions::new().create(true).append(true).open(log_path)?;

    // dup2 duplicates the descriptors; dropping the File handles
    // afterwards closes only the originals
    let ok = unsafe {
        libc::dup2(devnull.as_raw_fd(), libc::STDIN_FILENO) >= 0
            && libc::dup2(log.as_raw_fd(), libc::STDOUT_FILENO) >= 0
            && libc::dup2(log.as_raw_fd(), libc::STDERR_FILENO) >= 0
    };
    if !ok {
        return Err(DaemonError::Redirect(last_os_error()));
    }
    Ok(())
}

#[cfg(unix)]
fn last_os_error() -> String {
    std::io::Error::last_os_error().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_select_strategy_matches_host() {
        let strategy = select_strategy();
        if cfg!(unix) {
            assert_eq!(strategy, DetachStrategy::DoubleFork);
        } else {
            assert_eq!(strategy, DetachStrategy::BackgroundMarker);
        }
    }

    #[test]
    fn test_background_marker_detach_stays_inline() {
        let dir = tempdir().unwrap();
        let outcome = detach(
            DetachStrategy::BackgroundMarker,
            &dir.path().join("detach.log"),
        )
        .unwrap();
        assert_eq!(outcome, Detached::Child);
    }
}
