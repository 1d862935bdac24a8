//! Mock delivery backend with scripted results and a cancel trip-wire

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use crate::delivery::DeliveryBackend;
use crate::signal::CancelToken;

#[derive(Debug, Default)]
struct BackendRecord {
    prime_calls: u32,
    deliveries: Vec<String>,
}

/// Trip the cancel token after the Nth delivery, as if a signal had
/// arrived while that delivery was in flight
#[derive(Clone)]
struct TripWire {
    after_delivery: usize,
    token: CancelToken,
}

/// Recording stand-in for a delivery backend.
///
/// Clones share the same record, so a test can keep one handle while
/// the run controller owns the boxed other.
#[derive(Clone, Default)]
pub struct MockBackend {
    record: Arc<Mutex<BackendRecord>>,
    scripted: Arc<Mutex<VecDeque<bool>>>,
    trip: Option<TripWire>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue per-delivery results. Once the queue drains, deliveries
    /// succeed.
    pub fn script_results(&self, results: impl IntoIterator<Item = bool>) {
        self.scripted.lock().unwrap().extend(results);
    }

    /// Arm the trip-wire: request shutdown on the given token when the
    /// Nth delivery completes (1-based)
    pub fn cancel_after(&mut self, deliveries: usize, token: CancelToken) {
        self.trip = Some(TripWire {
            after_delivery: deliveries,
            token,
        });
    }

    pub fn prime_calls(&self) -> u32 {
        self.record.lock().unwrap().prime_calls
    }

    pub fn deliveries(&self) -> Vec<String> {
        self.record.lock().unwrap().deliveries.clone()
    }

    pub fn delivery_count(&self) -> usize {
        self.record.lock().unwrap().deliveries.len()
    }
}

impl DeliveryBackend for MockBackend {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn prime(&mut self) -> bool {
        self.record.lock().unwrap().prime_calls += 1;
        true
    }

    fn deliver(&mut self, command: &str) -> bool {
        let total = {
            let mut record = self.record.lock().unwrap();
            record.deliveries.push(command.to_string());
            record.deliveries.len()
        };

        if let Some(trip) = &self.trip {
            // Fire exactly once; a second request would escalate
            if total == trip.after_delivery {
                trip.token.request_shutdown();
            }
        }

        self.scripted.lock().unwrap().pop_front().unwrap_or(true)
    }
}
