//! In-memory log sinks for tests

use std::io;
use std::sync::{Arc, Mutex};

use crate::logsink::LogSink;

/// Sink that captures raw lines in memory
#[derive(Clone, Default)]
pub struct MemorySink {
    lines: Arc<Mutex<Vec<String>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().unwrap().clone()
    }

    /// Count of captured lines containing the given fragment
    pub fn count_containing(&self, fragment: &str) -> usize {
        self.lines
            .lock()
            .unwrap()
            .iter()
            .filter(|line| line.contains(fragment))
            .count()
    }
}

impl LogSink for MemorySink {
    fn line(&mut self, message: &str) -> io::Result<()> {
        self.lines.lock().unwrap().push(message.to_string());
        Ok(())
    }
}

/// Sink that fails the first N writes whose message contains a fragment
/// and records everything else. Matching on content rather than write
/// index keeps tests independent of how many banner lines precede the
/// write under test. Exercises the write-failure backoff path in the
/// run loop.
#[derive(Clone)]
pub struct FlakySink {
    inner: MemorySink,
    fragment: String,
    remaining_failures: Arc<Mutex<usize>>,
    attempts: Arc<Mutex<usize>>,
}

impl FlakySink {
    /// Fail the first `times` writes containing `fragment`
    pub fn failing(fragment: impl Into<String>, times: usize) -> Self {
        Self {
            inner: MemorySink::new(),
            fragment: fragment.into(),
            remaining_failures: Arc::new(Mutex::new(times)),
            attempts: Arc::new(Mutex::new(0)),
        }
    }

    /// Lines that were actually written (failed writes excluded)
    pub fn lines(&self) -> Vec<String> {
        self.inner.lines()
    }

    /// Count of recorded lines containing the given fragment
    pub fn count_containing(&self, fragment: &str) -> usize {
        self.inner.count_containing(fragment)
    }

    /// Total write attempts, including the failed ones
    pub fn attempt_count(&self) -> usize {
        *self.attempts.lock().unwrap()
    }
}

impl LogSink for FlakySink {
    fn line(&mut self, message: &str) -> io::Result<()> {
        *self.attempts.lock().unwrap() += 1;

        if message.contains(&self.fragment) {
            let mut remaining = self.remaining_failures.lock().unwrap();
            if *remaining > 0 {
                *remaining -= 1;
                // Message deliberately omits the fragment so the error,
                // once logged, cannot itself match
                return Err(io::Error::new(io::ErrorKind::Other, "scripted write failure"));
            }
        }
        self.inner.line(message)
    }
}
