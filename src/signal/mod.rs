//! Signal handling for graceful shutdown (SIGINT/SIGTERM)
//!
//! On receiving SIGINT or SIGTERM:
//! 1. Set the cancellation flag; the run loop observes it at every
//!    suspension point (post-delivery, pre/post sleep) and winds down
//! 2. The main path removes the singleton marker and exits 0
//!
//! On a second signal: exit on the spot, without cleanup. The marker is
//! left behind and handled as stale by the next `--stop`/`--status`.
//! Only the second signal short-circuits. On the first, the handler
//! sets flags and nothing else: marker removal and exit stay on the
//! main path so every normal exit goes through the same code.
//!
//! Handlers must be installed after daemonization: the watcher thread
//! spawned by `ctrlc` would not survive a fork.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Polling interval for cancellation-aware sleeps
pub const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Errors from signal handler installation
#[derive(Debug, thiserror::Error)]
pub enum SignalError {
    #[error("could not install handler: {0}")]
    Install(#[from] ctrlc::Error),
}

/// Signal handler state, shared between the handler thread and the run loop
#[derive(Debug, Default)]
pub struct SignalState {
    /// First signal received (shutdown initiated)
    cancel_requested: AtomicBool,
    /// Second signal received (immediate exit requested)
    immediate_exit: AtomicBool,
    /// Signal count (for tracking the double-signal escalation)
    signal_count: AtomicU8,
}

impl SignalState {
    /// Create a new signal state
    pub fn new() -> Self {
        Self {
            cancel_requested: AtomicBool::new(false),
            immediate_exit: AtomicBool::new(false),
            signal_count: AtomicU8::new(0),
        }
    }

    /// Check if shutdown has been requested
    pub fn is_cancel_requested(&self) -> bool {
        self.cancel_requested.load(Ordering::SeqCst)
    }

    /// Check if immediate exit has been requested (second signal)
    pub fn is_immediate_exit(&self) -> bool {
        self.immediate_exit.load(Ordering::SeqCst)
    }

    /// Get the number of signals received
    pub fn signal_count(&self) -> u8 {
        self.signal_count.load(Ordering::SeqCst)
    }

    /// Handle a signal (SIGINT/SIGTERM)
    ///
    /// Returns the appropriate action to take
    pub fn handle_signal(&self) -> SignalAction {
        let count = self.signal_count.fetch_add(1, Ordering::SeqCst);

        if count == 0 {
            // First signal: initiate shutdown
            self.cancel_requested.store(true, Ordering::SeqCst);
            SignalAction::InitiateShutdown
        } else if count == 1 {
            // Second signal: immediate exit
            self.immediate_exit.store(true, Ordering::SeqCst);
            SignalAction::ImmediateExit
        } else {
            // Third+ signal: ignore
            SignalAction::Ignore
        }
    }

    /// Reset the signal state (for testing)
    pub fn reset(&self) {
        self.cancel_requested.store(false, Ordering::SeqCst);
        self.immediate_exit.store(false, Ordering::SeqCst);
        self.signal_count.store(0, Ordering::SeqCst);
    }
}

/// Action to take after receiving a signal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalAction {
    /// First signal: initiate graceful shutdown
    InitiateShutdown,
    /// Second signal: exit as soon as the in-flight step returns
    ImmediateExit,
    /// Third+ signal: ignore
    Ignore,
}

/// Signal handler that manages the signal state
pub struct SignalHandler {
    state: Arc<SignalState>,
}

impl SignalHandler {
    /// Create a new signal handler
    pub fn new() -> Self {
        Self {
            state: Arc::new(SignalState::new()),
        }
    }

    /// Get a reference to the signal state
    pub fn state(&self) -> Arc<SignalState> {
        Arc::clone(&self.state)
    }

    /// Get a cancellation token backed by this handler's state
    pub fn token(&self) -> CancelToken {
        CancelToken::new(Arc::clone(&self.state))
    }

    /// Install the signal handlers
    ///
    /// Registers SIGINT and SIGTERM; the latter needs ctrlc's
    /// `termination` feature, and is the signal `--stop` sends.
    /// Must be called once at program startup, after any detach.
    pub fn install(&self) -> Result<(), SignalError> {
        let state = Arc::clone(&self.state);
        ctrlc::set_handler(move || {
            let action = state.handle_signal();
            match action {
                SignalAction::InitiateShutdown => {
                    eprintln!("\nReceived interrupt signal, finishing current step...");
                }
                SignalAction::ImmediateExit => {
                    // The main thread may be blocked in an in-flight
                    // delivery; honoring a second signal means exiting
                    // here, stale marker and all
                    eprintln!("\nReceived second interrupt, exiting now");
                    std::process::exit(130);
                }
                SignalAction::Ignore => {}
            }
        })?;
        Ok(())
    }
}

impl Default for SignalHandler {
    fn default() -> Self {
        Self::new()
    }
}

/// Cancellation token polled by the run loop at every suspension point
#[derive(Clone)]
pub struct CancelToken {
    state: Arc<SignalState>,
}

impl CancelToken {
    /// Create a token backed by the given signal state
    pub fn new(state: Arc<SignalState>) -> Self {
        Self { state }
    }

    /// Create a token with fresh state and no installed handler
    /// (programmatic cancellation only; used by tests)
    pub fn detached() -> Self {
        Self::new(Arc::new(SignalState::new()))
    }

    /// Check if shutdown has been requested
    pub fn is_cancelled(&self) -> bool {
        self.state.is_cancel_requested()
    }

    /// Check if immediate exit has been requested
    pub fn should_exit_immediately(&self) -> bool {
        self.state.is_immediate_exit()
    }

    /// Request shutdown programmatically, as if a signal had arrived
    pub fn request_shutdown(&self) {
        self.state.handle_signal();
    }

    /// Sleep for the full duration unless cancelled first.
    ///
    /// Polls the cancellation flag every 100 ms. Returns true if the full
    /// duration elapsed, false if shutdown was requested before (or while)
    /// sleeping.
    pub fn sleep_interruptible(&self, duration: Duration) -> bool {
        let start = Instant::now();
        loop {
            if self.is_cancelled() {
                return false;
            }
            let remaining = duration.saturating_sub(start.elapsed());
            if remaining.is_zero() {
                return true;
            }
            thread::sleep(remaining.min(POLL_INTERVAL));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signal_state_initial() {
        let state = SignalState::new();
        assert!(!state.is_cancel_requested());
        assert!(!state.is_immediate_exit());
        assert_eq!(state.signal_count(), 0);
    }

    #[test]
    fn test_first_signal_initiates_shutdown() {
        let state = SignalState::new();
        let action = state.handle_signal();

        assert_eq!(action, SignalAction::InitiateShutdown);
        assert!(state.is_cancel_requested());
        assert!(!state.is_immediate_exit());
        assert_eq!(state.signal_count(), 1);
    }

    #[test]
    fn test_second_signal_requests_immediate_exit() {
        let state = SignalState::new();

        state.handle_signal(); // First
        let action = state.handle_signal(); // Second

        assert_eq!(action, SignalAction::ImmediateExit);
        assert!(state.is_cancel_requested());
        assert!(state.is_immediate_exit());
        assert_eq!(state.signal_count(), 2);
    }

    #[test]
    fn test_third_signal_ignored() {
        let state = SignalState::new();

        state.handle_signal(); // First
        state.handle_signal(); // Second
        let action = state.handle_signal(); // Third

        assert_eq!(action, SignalAction::Ignore);
        assert_eq!(state.signal_count(), 3);
    }

    #[test]
    fn test_reset() {
        let state = SignalState::new();
        state.handle_signal();
        state.reset();

        assert!(!state.is_cancel_requested());
        assert_eq!(state.signal_count(), 0);
    }

    #[test]
    fn test_token_observes_signal() {
        let state = Arc::new(SignalState::new());
        let token = CancelToken::new(Arc::clone(&state));

        assert!(!token.is_cancelled());
        state.handle_signal();
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_token_request_shutdown() {
        let token = CancelToken::detached();
        assert!(!token.is_cancelled());

        token.request_shutdown();
        assert!(token.is_cancelled());

        // Escalates like a second signal
        token.request_shutdown();
        assert!(token.should_exit_immediately());
    }

    #[test]
    fn test_sleep_completes_when_not_cancelled() {
        let token = CancelToken::detached();
        let start = Instant::now();

        assert!(token.sleep_interruptible(Duration::from_millis(150)));
        assert!(start.elapsed() >= Duration::from_millis(150));
    }

    #[test]
    fn test_sleep_returns_false_if_already_cancelled() {
        let token = CancelToken::detached();
        token.request_shutdown();

        let start = Instant::now();
        assert!(!token.sleep_interruptible(Duration::from_secs(5)));
        // Did not wait out the full sleep
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_sleep_interrupted_mid_way() {
        let token = CancelToken::detached();
        let trip = token.clone();

        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(150));
            trip.request_shutdown();
        });

        let start = Instant::now();
        let completed = token.sleep_interruptible(Duration::from_secs(10));
        handle.join().unwrap();

        assert!(!completed);
        // Observed the cancellation promptly, not after the full sleep
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn test_zero_duration_sleep() {
        let token = CancelToken::detached();
        assert!(token.sleep_interruptible(Duration::ZERO));

        token.request_shutdown();
        assert!(!token.sleep_interruptible(Duration::ZERO));
    }
}
