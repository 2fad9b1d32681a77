//! Coalescing of concurrent cache misses for the same key.
//!
//! Only the completion of a flight is broadcast, never its value or error:
//! followers re-read the cache once the leader finishes, so a failed origin
//! call is never shared between callers.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::broadcast;

/// Result of trying to join the flight for a key.
pub enum Slot<'a> {
    /// No flight was in progress; the caller runs the origin query.
    Leader(FlightGuard<'a>),
    /// Another caller is running it; wait, then re-read the cache.
    Follower(broadcast::Receiver<()>),
}

#[derive(Default)]
pub struct SingleFlight {
    in_flight: DashMap<String, broadcast::Sender<()>>,
}

impl SingleFlight {
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomic check-and-register through the map's entry API.
    pub fn acquire(&self, key: &str) -> Slot<'_> {
        match self.in_flight.entry(key.to_string()) {
            Entry::Occupied(entry) => Slot::Follower(entry.get().subscribe()),
            Entry::Vacant(entry) => {
                let (tx, _rx) = broadcast::channel(1);
                entry.insert(tx.clone());
                Slot::Leader(FlightGuard {
                    flights: self,
                    key: key.to_string(),
                    tx,
                })
            }
        }
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }
}

/// Held by the leader. Dropping it, on success, failure or cancellation,
/// unregisters the flight and wakes every follower.
pub struct FlightGuard<'a> {
    flights: &'a SingleFlight,
    key: String,
    tx: broadcast::Sender<()>,
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.flights.in_flight.remove(&self.key);
        // No receivers is fine.
        let _ = self.tx.send(());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_second_caller_follows() {
        let flights = SingleFlight::new();
        let leader = flights.acquire("k");
        assert!(matches!(leader, Slot::Leader(_)));

        let Slot::Follower(mut rx) = flights.acquire("k") else {
            panic!("expected follower");
        };
        assert_eq!(flights.in_flight(), 1);

        drop(leader);
        assert!(rx.recv().await.is_ok());
        assert_eq!(flights.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_keys_are_independent() {
        let flights = SingleFlight::new();
        let _a = flights.acquire("a");
        assert!(matches!(flights.acquire("b"), Slot::Leader(_)));
    }

    #[tokio::test]
    async fn test_next_caller_leads_after_completion() {
        let flights = SingleFlight::new();
        drop(flights.acquire("k"));
        assert!(matches!(flights.acquire("k"), Slot::Leader(_)));
    }
}
