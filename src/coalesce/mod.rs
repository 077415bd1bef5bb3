//! Single-flight request coalescing.
//!
//! Concurrent calls that share a key collapse into one upstream execution:
//! the first caller (the leader) runs the work, every other caller
//! (followers) waits on a broadcast channel and receives a clone of the
//! leader's result. Once the leader settles, the key is released and later
//! calls start a fresh flight.

use dashmap::DashMap;
use std::future::Future;
use tokio::sync::broadcast;

/// Broadcast capacity per flight. The leader sends exactly one value.
const FLIGHT_CAPACITY: usize = 1;

/// Coalesces concurrent identical operations keyed by string.
///
/// `T` and `E` must be `Clone` because one result fans out to every waiter.
pub struct Coalescer<T, E> {
    in_flight: DashMap<String, broadcast::Sender<Result<T, E>>>,
}

impl<T, E> Default for Coalescer<T, E> {
    fn default() -> Self {
        Self {
            in_flight: DashMap::new(),
        }
    }
}

impl<T, E> Coalescer<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of flights currently in progress.
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Run `work` under `key`, or wait for an identical in-progress flight.
    ///
    /// If the leader is dropped before settling, waiting followers observe a
    /// closed channel and re-enter the race; one of them becomes the new
    /// leader. `work` is consumed only by the caller that actually leads.
    pub async fn run<F, Fut>(&self, key: &str, work: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        // Wait out existing flights until this caller wins leadership. The
        // entry guard decides leader vs follower atomically; it must be
        // dropped before any await.
        let tx = loop {
            let rx = match self.in_flight.entry(key.to_string()) {
                dashmap::mapref::entry::Entry::Occupied(occupied) => occupied.get().subscribe(),
                dashmap::mapref::entry::Entry::Vacant(vacant) => {
                    let (tx, _) = broadcast::channel(FLIGHT_CAPACITY);
                    vacant.insert(tx.clone());
                    break tx;
                }
            };

            metrics::counter!("turnstile_coalesced_requests").increment(1);
            let mut rx = rx;
            match rx.recv().await {
                Ok(result) => return result,
                Err(_) => {
                    tracing::debug!(key = %key, "flight leader vanished; re-entering");
                }
            }
        };

        let guard = FlightGuard {
            in_flight: &self.in_flight,
            key,
        };
        let result = work().await;

        // Release the key before fanning out so a racing new call starts a
        // fresh flight instead of attaching to a settled one.
        drop(guard);
        let _ = tx.send(result.clone());
        result
    }
}

/// Removes the flight entry when the leader settles or is dropped mid-air.
struct FlightGuard<'a, T, E> {
    in_flight: &'a DashMap<String, broadcast::Sender<Result<T, E>>>,
    key: &'a str,
}

impl<T, E> Drop for FlightGuard<'_, T, E> {
    fn drop(&mut self) {
        self.in_flight.remove(self.key);
    }
}
