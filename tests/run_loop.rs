//! End-to-end runs of the job schedule
//!
//! Drives the run controller from parsed TOML configuration through a
//! mock delivery backend, checking delivery order, pacing, log content,
//! and marker cleanup without touching a real desktop session.

use std::path::Path;
use std::time::{Duration, Instant};

use tempfile::tempdir;

use dripfeed::config::{Pacing, RunConfiguration};
use dripfeed::delivery::DeliveryBackend;
use dripfeed::logsink::{LogSink, STATUS_TAIL_LINES};
use dripfeed::mock::{FlakySink, MemorySink, MockBackend};
use dripfeed::registry::{ProcessRegistry, StatusReport, StopOutcome};
use dripfeed::run::{RunController, RunOutcome};
use dripfeed::signal::CancelToken;
use dripfeed::state::RunPhase;

/// Parse a config and point its paths and pacing at test-friendly values
fn test_config(toml: &str, dir: &Path) -> RunConfiguration {
    let mut config = RunConfiguration::from_toml_str(toml).expect("config should parse");
    config.marker_path = dir.join("run.pid");
    config.log_path = dir.join("run.log");
    config.pacing = Pacing {
        settle_after_prime: Duration::from_millis(5),
        between_jobs: Duration::from_millis(5),
        error_backoff: Duration::from_millis(120),
        post_terminate_settle: Duration::from_millis(5),
        terminate_wait: Duration::from_millis(50),
    };
    config
}

/// Identity that matches no real process, so the startup sweep never
/// signals anything outside the test
fn quiet_registry(config: &RunConfiguration) -> ProcessRegistry {
    ProcessRegistry::new(config.marker_path.clone(), "match-nothing-e41c02")
}

fn controller<'a>(
    config: &'a RunConfiguration,
    backend: Box<dyn DeliveryBackend>,
    sink: Box<dyn LogSink>,
    cancel: CancelToken,
) -> RunController<'a> {
    RunController::new(config, quiet_registry(config), backend, cancel, sink, false)
}

// =============================================================================
// Configured schedules
// =============================================================================

#[test]
fn test_toml_jobs_run_in_listed_order() {
    let dir = tempdir().unwrap();
    let config = test_config(
        r#"
        target_app = "Workbench"

        [[jobs]]
        command = "build the project"
        interval = 0.0
        max_count = 2

        [[jobs]]
        command = "run the tests"
        interval = 0.0
        max_count = 1

        [[jobs]]
        command = "deploy"
        interval = 0.0
        max_count = 1
        "#,
        dir.path(),
    );
    let backend = MockBackend::new();
    let sink = MemorySink::new();
    let mut controller = controller(
        &config,
        Box::new(backend.clone()),
        Box::new(sink.clone()),
        CancelToken::detached(),
    );

    let outcome = controller.execute();

    assert_eq!(outcome, RunOutcome::Completed);
    assert_eq!(
        backend.deliveries(),
        vec![
            "build the project",
            "build the project",
            "run the tests",
            "deploy"
        ]
    );
    assert_eq!(backend.prime_calls(), 1, "input surface primed exactly once");
    assert_eq!(controller.state().phase, RunPhase::Completed);
}

#[test]
fn test_legacy_single_job_keys_drive_one_job() {
    let dir = tempdir().unwrap();
    let config = test_config(
        r#"
        command = "hello world"
        interval = 0.0
        max_count = 2
        "#,
        dir.path(),
    );
    assert_eq!(config.jobs.len(), 1);

    let backend = MockBackend::new();
    let mut controller = controller(
        &config,
        Box::new(backend.clone()),
        Box::new(MemorySink::new()),
        CancelToken::detached(),
    );

    assert_eq!(controller.execute(), RunOutcome::Completed);
    assert_eq!(backend.deliveries(), vec!["hello world", "hello world"]);
}

#[test]
fn test_builtin_fallback_schedule_is_interruptible() {
    // An empty file falls back to the default job, whose interval is far
    // too long for a test to sit through; cancel out of the first sleep.
    let dir = tempdir().unwrap();
    let config = test_config("", dir.path());
    assert_eq!(config.jobs.len(), 1, "default job fills an empty config");

    let cancel = CancelToken::detached();
    let mut backend = MockBackend::new();
    backend.cancel_after(1, cancel.clone());
    let mut controller = controller(
        &config,
        Box::new(backend.clone()),
        Box::new(MemorySink::new()),
        cancel,
    );

    let start = Instant::now();
    let outcome = controller.execute();

    assert_eq!(outcome, RunOutcome::Interrupted);
    assert_eq!(backend.delivery_count(), 1);
    assert!(
        start.elapsed() < Duration::from_secs(2),
        "cancellation must cut the default 10s interval short"
    );
}

// =============================================================================
// Log content
// =============================================================================

#[test]
fn test_run_log_narrates_the_schedule() {
    let dir = tempdir().unwrap();
    let config = test_config(
        r#"
        target_app = "Workbench"

        [[jobs]]
        command = "lint"
        interval = 0.0
        max_count = 1

        [[jobs]]
        command = "format"
        interval = 0.0
        max_count = 2
        "#,
        dir.path(),
    );
    let sink = MemorySink::new();
    let mut controller = controller(
        &config,
        Box::new(MockBackend::new()),
        Box::new(sink.clone()),
        CancelToken::detached(),
    );

    assert_eq!(controller.execute(), RunOutcome::Completed);

    assert_eq!(
        sink.count_containing("=== Job schedule for \"Workbench\" starting ==="),
        1
    );
    assert_eq!(sink.count_containing("Jobs: 2"), 1);
    assert_eq!(sink.count_containing("Press Ctrl+C to stop"), 1);
    assert_eq!(sink.count_containing("Input surface primed"), 1);
    assert_eq!(sink.count_containing("Job 1: \"lint\" x1"), 1);
    assert_eq!(sink.count_containing("Job 2: \"format\" x2"), 1);
    assert_eq!(sink.count_containing("Job 1 attempt 1/1: command delivered"), 1);
    assert_eq!(sink.count_containing("Job 2 attempt 2/2: command delivered"), 1);
    assert_eq!(sink.count_containing("Job 1 of 2 complete"), 1);
    assert_eq!(sink.count_containing("=== All jobs complete ==="), 1);
}

#[test]
fn test_prime_failure_is_noted_and_run_continues() {
    /// Backend whose one-time prime fails while deliveries keep working
    struct FailingPrime(MockBackend);

    impl DeliveryBackend for FailingPrime {
        fn name(&self) -> &'static str {
            "mock"
        }

        fn prime(&mut self) -> bool {
            false
        }

        fn deliver(&mut self, command: &str) -> bool {
            self.0.deliver(command)
        }
    }

    let dir = tempdir().unwrap();
    let config = test_config(
        r#"
        [[jobs]]
        command = "still runs"
        interval = 0.0
        max_count = 1
        "#,
        dir.path(),
    );
    let record = MockBackend::new();
    let sink = MemorySink::new();
    let mut controller = controller(
        &config,
        Box::new(FailingPrime(record.clone())),
        Box::new(sink.clone()),
        CancelToken::detached(),
    );

    assert_eq!(controller.execute(), RunOutcome::Completed);
    assert_eq!(
        sink.count_containing("Input surface prime failed, continuing anyway"),
        1
    );
    assert_eq!(record.deliveries(), vec!["still runs"]);
}

#[test]
fn test_log_write_failure_repeats_the_attempt() {
    let dir = tempdir().unwrap();
    let config = test_config(
        r#"
        [[jobs]]
        command = "persist"
        interval = 0.0
        max_count = 1
        "#,
        dir.path(),
    );
    let backend = MockBackend::new();
    let sink = FlakySink::failing("attempt 1/1", 1);
    let mut controller = controller(
        &config,
        Box::new(backend.clone()),
        Box::new(sink.clone()),
        CancelToken::detached(),
    );

    let start = Instant::now();
    let outcome = controller.execute();
    let elapsed = start.elapsed();

    assert_eq!(outcome, RunOutcome::Completed);
    // The attempt whose record could not be written is delivered again
    assert_eq!(backend.delivery_count(), 2);
    assert_eq!(sink.count_containing("attempt 1/1"), 1);
    assert_eq!(sink.count_containing("Job step error"), 1);
    assert!(
        elapsed >= Duration::from_millis(120),
        "error backoff must pass before the retry, elapsed {elapsed:?}"
    );
}

// =============================================================================
// Cancellation and cleanup
// =============================================================================

#[test]
fn test_cancellation_midway_stops_the_schedule_and_cleans_up() {
    let dir = tempdir().unwrap();
    let config = test_config(
        r#"
        [[jobs]]
        command = "alpha"
        interval = 30.0
        max_count = 2

        [[jobs]]
        command = "beta"
        interval = 0.0
        max_count = 1
        "#,
        dir.path(),
    );
    let cancel = CancelToken::detached();
    let mut backend = MockBackend::new();
    backend.cancel_after(1, cancel.clone());
    let sink = MemorySink::new();
    let mut controller = controller(
        &config,
        Box::new(backend.clone()),
        Box::new(sink.clone()),
        cancel,
    );

    let outcome = controller.execute();

    assert_eq!(outcome, RunOutcome::Interrupted);
    assert_eq!(backend.deliveries(), vec!["alpha"], "beta never starts");
    assert_eq!(sink.count_containing("=== Run interrupted, cleaned up ==="), 1);
    assert_eq!(controller.state().phase, RunPhase::Interrupted);
    assert!(!controller.state().is_running);
    assert!(!config.marker_path.exists(), "marker removed on interrupt");
}

#[test]
fn test_stale_marker_from_a_previous_run_is_replaced() {
    let dir = tempdir().unwrap();
    let config = test_config(
        r#"
        [[jobs]]
        command = "fresh start"
        interval = 0.0
        max_count = 1
        "#,
        dir.path(),
    );
    std::fs::write(&config.marker_path, "not-a-pid\n").unwrap();

    let backend = MockBackend::new();
    let mut controller = controller(
        &config,
        Box::new(backend.clone()),
        Box::new(MemorySink::new()),
        CancelToken::detached(),
    );

    assert_eq!(controller.execute(), RunOutcome::Completed);
    assert_eq!(backend.delivery_count(), 1);
    assert!(
        !config.marker_path.exists(),
        "unreadable leftover marker is overwritten during the run and removed at the end"
    );
}

#[test]
fn test_completed_run_leaves_nothing_for_stop_or_status() {
    let dir = tempdir().unwrap();
    let config = test_config(
        r#"
        [[jobs]]
        command = "one and done"
        interval = 0.0
        max_count = 1
        "#,
        dir.path(),
    );
    let mut controller = controller(
        &config,
        Box::new(MockBackend::new()),
        Box::new(MemorySink::new()),
        CancelToken::detached(),
    );
    assert_eq!(controller.execute(), RunOutcome::Completed);

    let registry = quiet_registry(&config);
    assert_eq!(
        registry.stop_running_instance(config.pacing.terminate_wait),
        StopOutcome::NotRunning
    );
    assert!(matches!(
        registry.query_status(&config.log_path, STATUS_TAIL_LINES),
        StatusReport::NotRunning
    ));
}
