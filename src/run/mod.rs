//! Run controller
//!
//! Owns one run from invocation to a terminal state: conflicting-instance
//! sweep, marker registration, the one-time input-surface prime, then the
//! job schedule in order. Sequential execution; a failed delivery counts
//! as a spent attempt and never aborts its job; cancellation is observed
//! at every suspension point and ends the run at the next one.
//!
//! The attempt counter is staged before each delivery and committed only
//! after the attempt's log line lands. A failed log write therefore
//! retries the same attempt after a fixed backoff instead of silently
//! skipping past it.

use std::io;
use std::time::Duration;

use crate::config::{JobSpec, RunConfiguration};
use crate::delivery::DeliveryBackend;
use crate::logsink::LogSink;
use crate::registry::ProcessRegistry;
use crate::signal::CancelToken;
use crate::state::{RunPhase, RunState};

/// Terminal outcome of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Every job ran to its configured repeat count
    Completed,
    /// Shutdown was requested before the schedule finished
    Interrupted,
}

/// Orchestrates one run of the job schedule
pub struct RunController<'a> {
    config: &'a RunConfiguration,
    state: RunState,
    registry: ProcessRegistry,
    backend: Box<dyn DeliveryBackend>,
    cancel: CancelToken,
    sink: Box<dyn LogSink>,
}

impl<'a> RunController<'a> {
    pub fn new(
        config: &'a RunConfiguration,
        registry: ProcessRegistry,
        backend: Box<dyn DeliveryBackend>,
        cancel: CancelToken,
        sink: Box<dyn LogSink>,
        daemon: bool,
    ) -> Self {
        Self {
            config,
            state: RunState::new(daemon),
            registry,
            backend,
            cancel,
            sink,
        }
    }

    pub fn state(&self) -> &RunState {
        &self.state
    }

    /// Run the schedule to a terminal state. Both terminals remove the
    /// marker; nothing inside the loop propagates out.
    pub fn execute(&mut self) -> RunOutcome {
        self.enter(RunPhase::Starting);
        self.banner();

        let terminated = self
            .registry
            .find_and_stop_conflicting_instances(self.config.pacing.terminate_wait);
        if terminated > 0 {
            self.note(&format!("Stopped {terminated} previous instance(s)"));
            if !self.pause(self.config.pacing.post_terminate_settle) {
                return self.finish_interrupted();
            }
        }

        if let Err(err) = self.registry.write_marker() {
            self.note(&format!("Warning: could not write instance marker: {err}"));
        }

        self.enter(RunPhase::AwaitFirstFocus);
        if self.backend.prime() {
            self.note("Input surface primed");
        } else {
            self.note("Input surface prime failed, continuing anyway");
        }
        if !self.pause(self.config.pacing.settle_after_prime) {
            return self.finish_interrupted();
        }

        let job_count = self.config.jobs.len();
        for index in 0..job_count {
            self.begin_job(index);
            if !self.run_job(index) {
                return self.finish_interrupted();
            }
            if index + 1 < job_count {
                self.enter(RunPhase::BetweenJobs);
                self.note(&format!("Job {} of {job_count} complete", index + 1));
                if !self.pause(self.config.pacing.between_jobs) {
                    return self.finish_interrupted();
                }
            }
        }

        self.finish_completed()
    }

    fn banner(&mut self) {
        let config = self.config;
        let backend_name = self.backend.name();
        self.note(&format!(
            "=== Job schedule for \"{}\" starting ===",
            config.target_app
        ));
        self.note(&format!("Jobs: {}", config.jobs.len()));
        self.note(&format!("Delivery backend: {backend_name}"));
        if self.state.daemon {
            self.note("Running detached");
        } else {
            self.note("Press Ctrl+C to stop");
        }
    }

    /// One job to completion. False means the run was interrupted.
    fn run_job(&mut self, index: usize) -> bool {
        let config = self.config;
        let job = &config.jobs[index];

        loop {
            if !self.state.is_running || self.cancel.is_cancelled() {
                self.state.halt();
                return false;
            }
            if self.state.current_repeat_count >= job.max_repeats {
                return true;
            }

            match self.attempt(index, job) {
                Ok(done) => {
                    if done {
                        return true;
                    }
                    if !self.pause(job.interval()) {
                        return false;
                    }
                }
                Err(err) => {
                    self.note(&format!(
                        "Job step error: {err}; retrying after {:?}",
                        config.pacing.error_backoff
                    ));
                    if !self.pause(config.pacing.error_backoff) {
                        return false;
                    }
                }
            }
        }
    }

    /// One delivery attempt. The counter advances only after the log
    /// write succeeds; an in-flight delivery is never aborted.
    fn attempt(&mut self, index: usize, job: &JobSpec) -> io::Result<bool> {
        let attempt = self.state.current_repeat_count + 1;
        let delivered = self.backend.deliver(&job.command);

        let verdict = if delivered {
            "command delivered"
        } else {
            "delivery failed"
        };
        self.sink.line(&format!(
            "Job {} attempt {attempt}/{}: {verdict}",
            index + 1,
            job.max_repeats
        ))?;

        self.state.current_repeat_count = attempt;
        Ok(attempt >= job.max_repeats)
    }

    fn begin_job(&mut self, index: usize) {
        if let Err(err) = self.state.begin_job(index) {
            self.note(&format!("State error: {err}"));
        }
        let config = self.config;
        let job = &config.jobs[index];
        self.note(&format!(
            "Job {}: \"{}\" x{} every {}s",
            index + 1,
            job.command,
            job.max_repeats,
            job.interval_seconds
        ));
    }

    /// Cancellation-aware sleep. False means shutdown was requested;
    /// the run state is halted before returning.
    fn pause(&mut self, duration: Duration) -> bool {
        if self.cancel.sleep_interruptible(duration) {
            return true;
        }
        self.state.halt();
        false
    }

    fn enter(&mut self, phase: RunPhase) {
        if let Err(err) = self.state.enter(phase) {
            self.note(&format!("State error: {err}"));
        }
    }

    fn finish_completed(&mut self) -> RunOutcome {
        self.enter(RunPhase::Completed);
        self.state.halt();
        self.remove_marker();
        self.note("=== All jobs complete ===");
        RunOutcome::Completed
    }

    fn finish_interrupted(&mut self) -> RunOutcome {
        self.state.halt();
        self.enter(RunPhase::Interrupted);
        self.remove_marker();
        self.note("=== Run interrupted, cleaned up ===");
        RunOutcome::Interrupted
    }

    fn remove_marker(&mut self) {
        if let Err(err) = self.registry.remove_marker() {
            self.note(&format!("Warning: could not remove instance marker: {err}"));
        }
    }

    /// Best-effort write for lifecycle messages. Attempt outcomes go
    /// through `attempt` so their write failures feed the backoff path;
    /// everything else lands here and falls back to stderr.
    fn note(&mut self, message: &str) {
        if self.sink.line(message).is_err() {
            eprintln!("{message}");
        }
    }
}
