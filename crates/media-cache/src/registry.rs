//! # In-flight Registry
//!
//! Tracks which locators currently have a fetch underway and who is waiting
//! for it. All mutations happen under a single mutex that is never held
//! across I/O.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::cache::CachedFile;
use crate::error::Result;

/// Terminal outcome shared by the driver and every waiter of a locator
pub type FetchOutcome = Result<CachedFile>;

/// Handle used to remove a queued waiter before the driver completes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WaiterId(u64);

/// A caller joined on an in-flight fetch
#[derive(Debug)]
pub struct Waiter {
    id: WaiterId,
    sender: oneshot::Sender<FetchOutcome>,
}

impl Waiter {
    pub fn id(&self) -> WaiterId {
        self.id
    }

    /// Deliver the outcome. A waiter that stopped listening is ignored.
    pub fn notify(self, outcome: FetchOutcome) {
        let _ = self.sender.send(outcome);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BeginOutcome {
    /// The caller is now the sole driver for the locator
    Started,
    /// Another caller is already driving a fetch for the locator
    AlreadyInFlight,
}

#[derive(Debug, Default)]
pub struct InFlightRegistry {
    entries: Mutex<HashMap<String, Vec<Waiter>>>,
    next_waiter_id: AtomicU64,
}

impl InFlightRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check-and-insert in one critical section.
    pub fn try_begin(&self, locator: &str) -> BeginOutcome {
        let mut entries = self.entries.lock();
        if entries.contains_key(locator) {
            BeginOutcome::AlreadyInFlight
        } else {
            entries.insert(locator.to_owned(), Vec::new());
            BeginOutcome::Started
        }
    }

    /// Queue a waiter on an existing entry.
    ///
    /// If the entry completed in the meantime the sender is handed back so
    /// the caller can retry [`InFlightRegistry::try_begin`].
    pub fn add_waiter(
        &self,
        locator: &str,
        sender: oneshot::Sender<FetchOutcome>,
    ) -> std::result::Result<WaiterId, oneshot::Sender<FetchOutcome>> {
        let mut entries = self.entries.lock();
        match entries.get_mut(locator) {
            Some(waiters) => {
                let id = WaiterId(self.next_waiter_id.fetch_add(1, Ordering::Relaxed));
                waiters.push(Waiter { id, sender });
                Ok(id)
            }
            None => Err(sender),
        }
    }

    /// Drop a queued waiter. Returns false if it was already drained.
    pub fn remove_waiter(&self, locator: &str, id: WaiterId) -> bool {
        let mut entries = self.entries.lock();
        let Some(waiters) = entries.get_mut(locator) else {
            return false;
        };
        let before = waiters.len();
        waiters.retain(|w| w.id != id);
        waiters.len() != before
    }

    /// Remove the entry and hand back its waiters in arrival order.
    pub fn complete(&self, locator: &str) -> Vec<Waiter> {
        self.entries.lock().remove(locator).unwrap_or_default()
    }

    pub fn is_in_flight(&self, locator: &str) -> bool {
        self.entries.lock().contains_key(locator)
    }

    pub fn in_flight_count(&self) -> usize {
        self.entries.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Barrier};
    use std::thread;

    #[test]
    fn test_second_begin_is_in_flight() {
        let registry = InFlightRegistry::new();
        assert_eq!(registry.try_begin("mxc://s/a"), BeginOutcome::Started);
        assert_eq!(registry.try_begin("mxc://s/a"), BeginOutcome::AlreadyInFlight);
        // Other locators are independent
        assert_eq!(registry.try_begin("mxc://s/b"), BeginOutcome::Started);
        assert_eq!(registry.in_flight_count(), 2);
    }

    #[test]
    fn test_complete_drains_waiters_in_order() {
        let registry = InFlightRegistry::new();
        registry.try_begin("mxc://s/a");

        let (tx1, _rx1) = oneshot::channel();
        let (tx2, _rx2) = oneshot::channel();
        let id1 = registry.add_waiter("mxc://s/a", tx1).unwrap();
        let id2 = registry.add_waiter("mxc://s/a", tx2).unwrap();
        assert_ne!(id1, id2);

        let waiters = registry.complete("mxc://s/a");
        let ids: Vec<_> = waiters.iter().map(Waiter::id).collect();
        assert_eq!(ids, vec![id1, id2]);
        assert!(!registry.is_in_flight("mxc://s/a"));

        // A fresh request starts a new cycle
        assert_eq!(registry.try_begin("mxc://s/a"), BeginOutcome::Started);
    }

    #[test]
    fn test_add_waiter_without_entry_returns_sender() {
        let registry = InFlightRegistry::new();
        let (tx, _rx) = oneshot::channel();
        assert!(registry.add_waiter("mxc://s/none", tx).is_err());
        assert!(registry.complete("mxc://s/none").is_empty());
    }

    #[test]
    fn test_remove_waiter() {
        let registry = InFlightRegistry::new();
        registry.try_begin("mxc://s/a");
        let (tx, mut rx) = oneshot::channel();
        let id = registry.add_waiter("mxc://s/a", tx).unwrap();

        assert!(registry.remove_waiter("mxc://s/a", id));
        assert!(!registry.remove_waiter("mxc://s/a", id));
        assert!(registry.complete("mxc://s/a").is_empty());
        // Sender was dropped with the waiter
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_notify_ignores_dropped_receiver() {
        let registry = InFlightRegistry::new();
        registry.try_begin("mxc://s/a");
        let (tx, rx) = oneshot::channel();
        registry.add_waiter("mxc://s/a", tx).unwrap();
        drop(rx);

        for waiter in registry.complete("mxc://s/a") {
            waiter.notify(Err(crate::MediaCacheError::FetchFailure("gone".into())));
        }
    }

    #[test]
    fn test_concurrent_begin_has_single_winner() {
        let registry = Arc::new(InFlightRegistry::new());
        let barrier = Arc::new(Barrier::new(16));

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let registry = Arc::clone(&registry);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    registry.try_begin("mxc://s/contended")
                })
            })
            .collect();

        let started = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|o| *o == BeginOutcome::Started)
            .count();
        assert_eq!(started, 1);
    }
}
