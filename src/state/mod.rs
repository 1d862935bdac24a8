//! Run phase state machine
//!
//! Phases: IDLE → STARTING → AWAIT_FIRST_FOCUS → RUNNING_JOB →
//! BETWEEN_JOBS → {COMPLETED | INTERRUPTED}

use serde::{Deserialize, Serialize};

/// Phase of a run, from invocation to one of the two terminals
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunPhase {
    /// No run in progress
    Idle,
    /// Conflict sweep and marker write
    Starting,
    /// One-time input-surface prime before the first job
    AwaitFirstFocus,
    /// Executing the current job's repeat loop
    RunningJob,
    /// Fixed delay between two consecutive jobs
    BetweenJobs,
    /// Every job ran its full repeat count
    Completed,
    /// Run ended early on a termination request
    Interrupted,
}

impl RunPhase {
    /// Check if this phase is terminal (no further transitions possible)
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunPhase::Completed | RunPhase::Interrupted)
    }

    /// Check if transition from this phase to target is valid
    pub fn can_transition_to(&self, target: RunPhase) -> bool {
        match (self, target) {
            (RunPhase::Idle, RunPhase::Starting) => true,

            (RunPhase::Starting, RunPhase::AwaitFirstFocus) => true,
            (RunPhase::Starting, RunPhase::Interrupted) => true,

            (RunPhase::AwaitFirstFocus, RunPhase::RunningJob) => true,
            (RunPhase::AwaitFirstFocus, RunPhase::Interrupted) => true,

            (RunPhase::RunningJob, RunPhase::BetweenJobs) => true,
            (RunPhase::RunningJob, RunPhase::Completed) => true,
            (RunPhase::RunningJob, RunPhase::Interrupted) => true,

            (RunPhase::BetweenJobs, RunPhase::RunningJob) => true,
            (RunPhase::BetweenJobs, RunPhase::Interrupted) => true,

            // Terminal phases cannot transition
            _ => false,
        }
    }
}

/// Errors for run state operations
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("invalid phase transition from {from:?} to {to:?}")]
    InvalidTransition { from: RunPhase, to: RunPhase },
}

/// Mutable run-loop state, owned exclusively by the run controller.
///
/// Invariants: `current_repeat_count` never exceeds the current job's
/// repeat budget, `current_job_index` never exceeds the job count, and
/// once `is_running` is false no further delivery attempts occur.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunState {
    /// Current phase
    pub phase: RunPhase,

    /// Index of the job currently executing (0-based)
    pub current_job_index: usize,

    /// Completed attempts for the current job; resets at each job start
    pub current_repeat_count: u32,

    /// False once a termination request has been observed or the run ended
    pub is_running: bool,

    /// Whether this run is detached from the controlling session
    pub daemon: bool,
}

impl RunState {
    /// Create a fresh state in IDLE
    pub fn new(daemon: bool) -> Self {
        Self {
            phase: RunPhase::Idle,
            current_job_index: 0,
            current_repeat_count: 0,
            is_running: true,
            daemon,
        }
    }

    /// Transition to a new phase
    pub fn enter(&mut self, target: RunPhase) -> Result<(), StateError> {
        if !self.phase.can_transition_to(target) {
            return Err(StateError::InvalidTransition {
                from: self.phase,
                to: target,
            });
        }
        self.phase = target;
        Ok(())
    }

    /// Enter RUNNING_JOB for the given job, resetting the repeat counter
    pub fn begin_job(&mut self, index: usize) -> Result<(), StateError> {
        self.enter(RunPhase::RunningJob)?;
        self.current_job_index = index;
        self.current_repeat_count = 0;
        Ok(())
    }

    /// Mark the run as no longer running; delivery stops after the
    /// in-flight attempt completes
    pub fn halt(&mut self) {
        self.is_running = false;
    }
}
