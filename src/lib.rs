//! dripfeed - scheduled command injection for desktop chat apps
//!
//! Walks an ordered list of jobs, delivering each job's command text into
//! a target application's input surface at fixed intervals. One instance
//! runs at a time, enforced through an on-disk marker; the run can detach
//! into the background and is cleanly interruptible from the terminal or
//! via `--stop` from a second invocation.

pub mod config;
pub mod daemon;
pub mod delivery;
pub mod logsink;
pub mod mock;
pub mod registry;
pub mod run;
pub mod signal;
pub mod state;

pub use config::{JobSpec, RunConfiguration};
pub use delivery::DeliveryBackend;
pub use registry::{ProcessRegistry, StatusReport, StopOutcome};
pub use run::{RunController, RunOutcome};
pub use signal::{CancelToken, SignalHandler};
pub use state::{RunPhase, RunState};
