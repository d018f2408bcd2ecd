//! In-flight deduplication of identical concurrent operations.
//!
//! The first caller for a key becomes the leader and runs the operation;
//! callers arriving before settlement subscribe to the leader's outcome
//! instead of starting their own execution. Outcomes are fanned out as
//! clones, so every waiter gets an independent value and nothing with
//! single-consume semantics is ever shared.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};

use tokio::sync::broadcast;

use super::lock::mutex_lock;

const SOURCE: &str = "resilience::single_flight";

/// One settled outcome per flight; receivers subscribe before the send.
const OUTCOME_CHANNEL_CAPACITY: usize = 1;

type FlightMap<T, E> = Arc<Mutex<HashMap<String, broadcast::Sender<Result<T, E>>>>>;

pub struct SingleFlight<T, E> {
    in_flight: FlightMap<T, E>,
}

impl<T, E> Default for SingleFlight<T, E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, E> SingleFlight<T, E> {
    pub fn new() -> Self {
        Self {
            in_flight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Number of executions currently in flight.
    pub fn in_flight_len(&self) -> usize {
        mutex_lock(&self.in_flight, SOURCE, "in_flight_len").len()
    }
}

impl<T, E> SingleFlight<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    /// Run `operation` under `key`, coalescing with any execution already in
    /// flight for the same key. Every caller observes the same outcome,
    /// success or failure. After settlement the key is free again and a new
    /// call starts a fresh execution.
    ///
    /// Keys must disambiguate operation type and target, e.g.
    /// `"secret:read:<id>"` or `"ratelimit:<class>:<identity>"`.
    pub async fn run<F, Fut>(&self, key: &str, operation: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        loop {
            match self.enter(key) {
                Flight::Follower(mut outcome_rx) => match outcome_rx.recv().await {
                    Ok(outcome) => return outcome,
                    // The leader was cancelled before settling; start over
                    // instead of leaving this caller hanging.
                    Err(_) => continue,
                },
                Flight::Leader(guard) => {
                    let outcome = operation().await;
                    guard.settle(&outcome);
                    return outcome;
                }
            }
        }
    }

    fn enter(&self, key: &str) -> Flight<T, E> {
        let mut in_flight = mutex_lock(&self.in_flight, SOURCE, "enter");
        if let Some(sender) = in_flight.get(key) {
            return Flight::Follower(sender.subscribe());
        }
        let (sender, _first_rx) = broadcast::channel(OUTCOME_CHANNEL_CAPACITY);
        in_flight.insert(key.to_string(), sender);
        Flight::Leader(FlightGuard {
            key: key.to_string(),
            in_flight: Arc::clone(&self.in_flight),
        })
    }
}

enum Flight<T, E> {
    Leader(FlightGuard<T, E>),
    Follower(broadcast::Receiver<Result<T, E>>),
}

/// Removes the flight's bookkeeping on every exit path: `settle` on normal
/// completion, `Drop` if the leader is cancelled or panics mid-flight. A
/// dropped sender wakes followers with a closed-channel error and they retry.
struct FlightGuard<T, E> {
    key: String,
    in_flight: FlightMap<T, E>,
}

impl<T: Clone, E: Clone> FlightGuard<T, E> {
    fn settle(self, outcome: &Result<T, E>) {
        let sender = mutex_lock(&self.in_flight, SOURCE, "settle").remove(&self.key);
        if let Some(sender) = sender {
            // Send can only fail when no follower subscribed; nothing to do.
            let _ = sender.send(outcome.clone());
        }
    }
}

impl<T, E> Drop for FlightGuard<T, E> {
    fn drop(&mut self) {
        mutex_lock(&self.in_flight, SOURCE, "flight_guard.drop").remove(&self.key);
    }
}
