//! Mock collaborators for testing
//!
//! Implements configurable stand-ins for the two effectful seams of a
//! run: the delivery backend and the log sink. Supports scripted
//! failures and a cancellation trip-wire so shutdown behavior can be
//! tested deterministically, without a GUI session or real signals.
//!
//! # Usage Modes
//!
//! - **Unit tests**: drive the run controller entirely in-process
//! - **Integration tests**: exported from the library crate so the
//!   `tests/` suites can observe deliveries and log lines

mod backend;
mod sink;

pub use backend::MockBackend;
pub use sink::{FlakySink, MemorySink};
