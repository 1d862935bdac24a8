//! Process registry: singleton marker and conflicting-instance control
//!
//! The marker is one small file holding the owner's decimal PID. It is
//! advisory, not a lock: a starting instance scans for others matching its
//! identity, terminates them, then writes its own marker. Two instances
//! starting at the same moment can both pass the scan before either
//! writes; that race is an accepted tradeoff carried over from the
//! behavior this replaces, not a bug to fix here.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use chrono::{Local, TimeZone};
use serde::Serialize;
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, Signal, System, UpdateKind};

use crate::logsink;

/// Identity substring a process must carry in its name or command line to
/// count as an instance of this controller
pub const DEFAULT_IDENTITY: &str = "dripfeed";

/// Poll interval while waiting for a signaled process to exit
const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Errors for marker operations
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// How a termination attempt ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TerminateOutcome {
    /// Exited within the wait window after the graceful signal
    Graceful,
    /// Still alive after the wait window; force-killed
    Forced,
    /// Already gone (or not signalable) when we tried
    AlreadyGone,
}

/// Outcome of `--stop`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StopOutcome {
    /// No marker present
    NotRunning,
    /// Marker pointed at a live instance; a termination was sent
    Stopped { pid: u32, outcome: TerminateOutcome },
    /// Marker PID belongs to an unrelated process; nothing was signaled
    NotOurs { pid: u32 },
    /// Marker PID no longer exists; the stale marker was deleted
    StaleCleared { pid: u32 },
}

/// Live-instance metrics reported by `--status`
#[derive(Debug, Clone, Serialize)]
pub struct InstanceReport {
    pub pid: u32,
    pub name: String,
    /// Local-time start timestamp, when the host exposes one
    pub started_at: Option<String>,
    pub cpu_percent: f32,
    pub memory_bytes: u64,
    /// Most recent log lines
    pub log_tail: Vec<String>,
}

/// Outcome of `--status`
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StatusReport {
    NotRunning,
    StaleCleared { pid: u32 },
    Running(InstanceReport),
}

/// Simplified view of one OS process, for identity matching
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessSnapshot {
    pub pid: u32,
    pub name: String,
    pub cmdline: String,
}

/// True if the process name or command line carries the identity string
pub fn matches_identity(snapshot: &ProcessSnapshot, identity: &str) -> bool {
    snapshot.cmdline.contains(identity) || snapshot.name.contains(identity)
}

/// Select the PIDs that conflict with a starting instance: identity
/// matches and the PID is not the caller's own
pub fn conflicting_pids(processes: &[ProcessSnapshot], own_pid: u32, identity: &str) -> Vec<u32> {
    processes
        .iter()
        .filter(|p| p.pid != own_pid && matches_identity(p, identity))
        .map(|p| p.pid)
        .collect()
}

/// Singleton marker plus OS process scanning for one controller identity
pub struct ProcessRegistry {
    marker_path: PathBuf,
    identity: String,
}

impl ProcessRegistry {
    pub fn new(marker_path: impl Into<PathBuf>, identity: impl Into<String>) -> Self {
        Self {
            marker_path: marker_path.into(),
            identity: identity.into(),
        }
    }

    pub fn marker_path(&self) -> &Path {
        &self.marker_path
    }

    /// Persist the caller's PID to the marker file.
    ///
    /// Write-then-rename so a concurrent reader never sees a torn PID.
    pub fn write_marker(&self) -> Result<(), RegistryError> {
        let temp_path = self.marker_path.with_extension("tmp");
        fs::write(&temp_path, format!("{}\n", std::process::id()))?;
        fs::rename(&temp_path, &self.marker_path)?;
        Ok(())
    }

    /// Read the marker PID, if a parseable marker exists
    pub fn read_marker(&self) -> Option<u32> {
        let contents = fs::read_to_string(&self.marker_path).ok()?;
        contents.trim().parse().ok()
    }

    /// Delete the marker. Idempotent: a missing marker is success.
    pub fn remove_marker(&self) -> Result<(), RegistryError> {
        match fs::remove_file(&self.marker_path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    /// Terminate every other process matching this controller's identity:
    /// graceful signal, bounded wait, forced kill. Returns the number
    /// terminated. Processes that vanish or cannot be signaled mid-scan
    /// are silently skipped.
    pub fn find_and_stop_conflicting_instances(&self, wait: Duration) -> usize {
        let mut system = System::new();
        // Plain refresh_processes never fetches the command line; identity
        // matching needs it, so ask for cmd explicitly
        system.refresh_processes_specifics(
            ProcessesToUpdate::All,
            true,
            ProcessRefreshKind::nothing()
                .with_memory()
                .with_cpu()
                .with_cmd(UpdateKind::OnlyIfNotSet),
        );

        let own_pid = std::process::id();
        let snapshots = snapshot_all(&system);
        let conflicts = conflicting_pids(&snapshots, own_pid, &self.identity);

        let mut terminated = 0;
        for pid in conflicts {
            match terminate_with(&mut system, pid, wait) {
                TerminateOutcome::AlreadyGone => {}
                TerminateOutcome::Graceful | TerminateOutcome::Forced => terminated += 1,
            }
        }
        terminated
    }

    /// True iff a process with this PID exists and its identity matches
    /// this controller (guards against PID reuse by unrelated processes)
    pub fn is_marker_process_alive(&self, pid: u32) -> bool {
        let spid = Pid::from_u32(pid);
        let mut system = System::new();
        // cmd must be requested explicitly or the cmdline identity arm
        // can never match
        system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[spid]),
            true,
            ProcessRefreshKind::nothing()
                .with_memory()
                .with_cpu()
                .with_cmd(UpdateKind::OnlyIfNotSet),
        );
        match system.process(spid) {
            Some(process) => matches_identity(&snapshot_process(spid, process), &self.identity),
            None => false,
        }
    }

    /// Graceful-then-forced termination of one PID
    pub fn terminate_instance(&self, pid: u32, wait: Duration) -> TerminateOutcome {
        let mut system = System::new();
        system.refresh_processes(ProcessesToUpdate::Some(&[Pid::from_u32(pid)]), true);
        terminate_with(&mut system, pid, wait)
    }

    /// Resolve a `--stop` request against the marker
    pub fn stop_running_instance(&self, wait: Duration) -> StopOutcome {
        let Some(pid) = self.read_marker() else {
            return StopOutcome::NotRunning;
        };

        let spid = Pid::from_u32(pid);
        let mut system = System::new();
        // cmd must be requested explicitly or the cmdline identity arm
        // can never match
        system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[spid]),
            true,
            ProcessRefreshKind::nothing()
                .with_memory()
                .with_cpu()
                .with_cmd(UpdateKind::OnlyIfNotSet),
        );

        let Some(process) = system.process(spid) else {
            let _ = self.remove_marker();
            return StopOutcome::StaleCleared { pid };
        };

        if !matches_identity(&snapshot_process(spid, process), &self.identity) {
            return StopOutcome::NotOurs { pid };
        }

        let outcome = terminate_with(&mut system, pid, wait);
        StopOutcome::Stopped { pid, outcome }
    }

    /// Resolve a `--status` request against the marker
    pub fn query_status(&self, log_path: &Path, tail_count: usize) -> StatusReport {
        let Some(pid) = self.read_marker() else {
            return StatusReport::NotRunning;
        };

        if !self.is_marker_process_alive(pid) {
            let _ = self.remove_marker();
            return StatusReport::StaleCleared { pid };
        }

        match self.inspect_instance(pid) {
            Some(mut report) => {
                report.log_tail = logsink::tail_lines(log_path, tail_count).unwrap_or_default();
                StatusReport::Running(report)
            }
            None => {
                // Vanished between the liveness check and the inspection
                let _ = self.remove_marker();
                StatusReport::StaleCleared { pid }
            }
        }
    }

    /// Collect metrics for a live instance. Samples twice so the CPU
    /// figure is a real delta rather than zero.
    pub fn inspect_instance(&self, pid: u32) -> Option<InstanceReport> {
        let spid = Pid::from_u32(pid);
        let mut system = System::new();
        system.refresh_processes(ProcessesToUpdate::Some(&[spid]), true);
        system.process(spid)?;

        thread::sleep(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL);
        system.refresh_processes(ProcessesToUpdate::Some(&[spid]), true);
        let process = system.process(spid)?;

        Some(InstanceReport {
            pid,
            name: process.name().to_string_lossy().to_string(),
            started_at: format_start_time(process.start_time()),
            cpu_percent: process.cpu_usage(),
            memory_bytes: process.memory(),
            log_tail: Vec::new(),
        })
    }
}

fn snapshot_all(system: &System) -> Vec<ProcessSnapshot> {
    system
        .processes()
        .iter()
        .map(|(pid, process)| snapshot_process(*pid, process))
        .collect()
}

fn snapshot_process(pid: Pid, process: &sysinfo::Process) -> ProcessSnapshot {
    ProcessSnapshot {
        pid: pid.as_u32(),
        name: process.name().to_string_lossy().to_string(),
        cmdline: process
            .cmd()
            .iter()
            .map(|arg| arg.to_string_lossy())
            .collect::<Vec<_>>()
            .join(" "),
    }
}

/// Graceful signal, bounded wait for exit, forced kill. The system is
/// refreshed while polling so a vanished process is seen promptly.
fn terminate_with(system: &mut System, pid: u32, wait: Duration) -> TerminateOutcome {
    let spid = Pid::from_u32(pid);
    let Some(process) = system.process(spid) else {
        return TerminateOutcome::AlreadyGone;
    };

    // TERM where the platform supports it, otherwise the portable kill
    let signaled = process
        .kill_with(Signal::Term)
        .unwrap_or_else(|| process.kill());
    if !signaled {
        return TerminateOutcome::AlreadyGone;
    }

    let start = Instant::now();
    while start.elapsed() < wait {
        system.refresh_processes(ProcessesToUpdate::Some(&[spid]), true);
        if system.process(spid).is_none() {
            return TerminateOutcome::Graceful;
        }
        thread::sleep(EXIT_POLL_INTERVAL);
    }

    system.refresh_processes(ProcessesToUpdate::Some(&[spid]), true);
    match system.process(spid) {
        Some(process) => {
            process.kill();
            TerminateOutcome::Forced
        }
        None => TerminateOutcome::Graceful,
    }
}

fn format_start_time(epoch_secs: u64) -> Option<String> {
    if epoch_secs == 0 {
        return None;
    }
    let stamp = Local.timestamp_opt(epoch_secs as i64, 0).single()?;
    Some(stamp.format("%Y-%m-%d %H:%M:%S").to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    /// A PID that cannot exist on any supported host (beyond pid_max)
    const DEAD_PID: u32 = u32::MAX;

    fn own_identity() -> String {
        std::env::current_exe()
            .ok()
            .and_then(|p| p.file_name().map(|n| n.to_string_lossy().to_string()))
            .unwrap_or_else(|| DEFAULT_IDENTITY.to_string())
    }

    fn make_registry(dir: &Path, identity: &str) -> ProcessRegistry {
        ProcessRegistry::new(dir.join("test.pid"), identity)
    }

    #[test]
    fn test_marker_roundtrip() {
        let dir = tempdir().unwrap();
        let registry = make_registry(dir.path(), "x");

        assert_eq!(registry.read_marker(), None);
        registry.write_marker().unwrap();
        assert_eq!(registry.read_marker(), Some(std::process::id()));
    }

    #[test]
    fn test_remove_marker_idempotent() {
        let dir = tempdir().unwrap();
        let registry = make_registry(dir.path(), "x");

        registry.write_marker().unwrap();
        registry.remove_marker().unwrap();
        assert_eq!(registry.read_marker(), None);
        // Second removal is still success
        registry.remove_marker().unwrap();
    }

    #[test]
    fn test_read_marker_garbage_is_none() {
        let dir = tempdir().unwrap();
        let registry = make_registry(dir.path(), "x");
        fs::write(registry.marker_path(), "not-a-pid\n").unwrap();
        assert_eq!(registry.read_marker(), None);
    }

    #[test]
    fn test_matches_identity() {
        let by_cmdline = ProcessSnapshot {
            pid: 10,
            name: "python3".to_string(),
            cmdline: "/usr/bin/python3 /opt/dripfeed/main.py".to_string(),
        };
        let by_name = ProcessSnapshot {
            pid: 11,
            name: "dripfeed".to_string(),
            cmdline: String::new(),
        };
        let unrelated = ProcessSnapshot {
            pid: 12,
            name: "sshd".to_string(),
            cmdline: "/usr/sbin/sshd -D".to_string(),
        };

        assert!(matches_identity(&by_cmdline, "dripfeed"));
        assert!(matches_identity(&by_name, "dripfeed"));
        assert!(!matches_identity(&unrelated, "dripfeed"));
    }

    #[test]
    fn test_conflicting_pids_excludes_own() {
        let snapshot = |pid: u32, cmdline: &str| ProcessSnapshot {
            pid,
            name: String::new(),
            cmdline: cmdline.to_string(),
        };
        let processes = vec![
            snapshot(100, "dripfeed --daemon"),
            snapshot(200, "dripfeed"),
            snapshot(300, "unrelated-tool"),
        ];

        // Two matching processes, one of which is the caller's own
        let conflicts = conflicting_pids(&processes, 100, "dripfeed");
        assert_eq!(conflicts, vec![200]);
    }

    #[test]
    fn test_conflict_sweep_with_unmatched_identity_is_noop() {
        let dir = tempdir().unwrap();
        let registry = make_registry(dir.path(), "no-such-identity-a8f3e9d1");
        let terminated =
            registry.find_and_stop_conflicting_instances(Duration::from_millis(100));
        assert_eq!(terminated, 0);
    }

    #[test]
    fn test_is_marker_process_alive_dead_pid() {
        let dir = tempdir().unwrap();
        let registry = make_registry(dir.path(), "x");
        assert!(!registry.is_marker_process_alive(DEAD_PID));
    }

    #[test]
    fn test_is_marker_process_alive_own_process() {
        let dir = tempdir().unwrap();
        let registry = make_registry(dir.path(), &own_identity());
        assert!(registry.is_marker_process_alive(std::process::id()));
    }

    #[test]
    fn test_stop_without_marker_reports_not_running() {
        let dir = tempdir().unwrap();
        let registry = make_registry(dir.path(), "x");
        assert_eq!(
            registry.stop_running_instance(Duration::from_millis(100)),
            StopOutcome::NotRunning
        );
    }

    #[test]
    fn test_stop_stale_marker_cleans_and_is_idempotent() {
        let dir = tempdir().unwrap();
        let registry = make_registry(dir.path(), "x");
        fs::write(registry.marker_path(), format!("{DEAD_PID}\n")).unwrap();

        let first = registry.stop_running_instance(Duration::from_millis(100));
        assert_eq!(first, StopOutcome::StaleCleared { pid: DEAD_PID });
        assert_eq!(registry.read_marker(), None);

        let second = registry.stop_running_instance(Duration::from_millis(100));
        assert_eq!(second, StopOutcome::NotRunning);
    }

    #[cfg(unix)]
    #[test]
    fn test_stop_unrelated_process_reports_mismatch() {
        let dir = tempdir().unwrap();
        let registry = make_registry(dir.path(), "identity-that-matches-nothing-91c2");

        let mut child = std::process::Command::new("sleep")
            .arg("30")
            .spawn()
            .expect("spawn sleep");
        fs::write(registry.marker_path(), format!("{}\n", child.id())).unwrap();

        let outcome = registry.stop_running_instance(Duration::from_millis(200));
        assert_eq!(outcome, StopOutcome::NotOurs { pid: child.id() });
        // Mismatch leaves the marker alone
        assert_eq!(registry.read_marker(), Some(child.id()));

        child.kill().ok();
        child.wait().ok();
    }

    #[test]
    fn test_status_without_marker_reports_not_running() {
        let dir = tempdir().unwrap();
        let registry = make_registry(dir.path(), "x");
        let report = registry.query_status(&dir.path().join("absent.log"), 5);
        assert!(matches!(report, StatusReport::NotRunning));
    }

    #[test]
    fn test_status_stale_marker_cleans() {
        let dir = tempdir().unwrap();
        let registry = make_registry(dir.path(), "x");
        fs::write(registry.marker_path(), format!("{DEAD_PID}\n")).unwrap();

        let report = registry.query_status(&dir.path().join("absent.log"), 5);
        assert!(matches!(report, StatusReport::StaleCleared { pid: DEAD_PID }));
        assert_eq!(registry.read_marker(), None);
    }

    #[test]
    fn test_status_running_instance_reports_metrics() {
        let dir = tempdir().unwrap();
        let registry = make_registry(dir.path(), &own_identity());
        registry.write_marker().unwrap();

        let log_path = dir.path().join("run.log");
        fs::write(&log_path, "one\ntwo\nthree\n").unwrap();

        match registry.query_status(&log_path, 2) {
            StatusReport::Running(report) => {
                assert_eq!(report.pid, std::process::id());
                assert!(report.memory_bytes > 0);
                assert!(report.cpu_percent >= 0.0);
                assert_eq!(report.log_tail, vec!["two", "three"]);
            }
            other => panic!("expected Running, got {other:?}"),
        }
    }

    #[test]
    fn test_status_report_serialization() {
        let json = serde_json::to_string(&StatusReport::NotRunning).unwrap();
        assert_eq!(json, r#"{"status":"NOT_RUNNING"}"#);

        let json = serde_json::to_string(&StatusReport::StaleCleared { pid: 42 }).unwrap();
        assert!(json.contains(r#""status":"STALE_CLEARED""#));
        assert!(json.contains(r#""pid":42"#));

        let json = serde_json::to_string(&StopOutcome::Stopped {
            pid: 7,
            outcome: TerminateOutcome::Graceful,
        })
        .unwrap();
        assert!(json.contains(r#""result":"STOPPED""#));
        assert!(json.contains(r#""outcome":"GRACEFUL""#));
    }

    #[test]
    fn test_terminate_dead_pid_already_gone() {
        let dir = tempdir().unwrap();
        let registry = make_registry(dir.path(), "x");
        assert_eq!(
            registry.terminate_instance(DEAD_PID, Duration::from_millis(100)),
            TerminateOutcome::AlreadyGone
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_terminate_live_process_graceful() {
        let dir = tempdir().unwrap();
        let registry = make_registry(dir.path(), "x");

        let mut child = std::process::Command::new("sleep")
            .arg("30")
            .spawn()
            .expect("spawn sleep");
        let pid = child.id();
        // Reap in the background so the terminated child does not linger
        // as a zombie that the exit poll would still observe
        let reaper = thread::spawn(move || {
            let _ = child.wait();
        });

        let outcome = registry.terminate_instance(pid, Duration::from_secs(5));
        assert_eq!(outcome, TerminateOutcome::Graceful);
        reaper.join().ok();
    }
}
