//! # Event bus for broadcasting runtime events.
//!
//! [`Bus`] is a thin wrapper around [`tokio::sync::broadcast`]. Publishing is a plain
//! synchronous call, so the reaper and the fork path can publish from inside a
//! signal handler dispatch (or before any scheduler runs) without awaiting.
//!
//! ## Architecture
//! ```text
//! Publishers:                               Receivers (any number):
//!   Orchestrator ──┐
//!   Reaper       ──┼──────► Bus ───────► Supervisor::subscribe() ──► user code
//!   Fork hooks   ──┤  (broadcast chan)
//!   Teardown     ──┘
//! ```
//!
//! ## Rules
//! - **Non-blocking publish**: `publish()` never blocks; it calls `broadcast::Sender::send`.
//! - **Bounded capacity**: a single ring buffer stores recent events for all receivers.
//! - **Lag handling**: slow receivers get `RecvError::Lagged(n)` and skip `n` oldest items.
//! - **No persistence**: events are lost if there are no active receivers at send time.

use tokio::sync::broadcast;

use super::event::Event;

/// Broadcast channel for runtime events.
///
/// ### Properties
/// - **Non-blocking**: `publish()` returns immediately.
/// - **Fire-and-forget**: no delivery or durability guarantees.
/// - **Cloneable**: cheap to clone (internally holds an `Arc`-backed sender).
#[derive(Clone, Debug)]
pub struct Bus {
    tx: broadcast::Sender<Event>,
}

impl Bus {
    /// Creates a new bus with the given channel capacity (clamped to a minimum of 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, _rx) = broadcast::channel::<Event>(capacity);
        Self { tx }
    }

    /// Publishes an event to all active receivers.
    ///
    /// If there are no receivers, the event is dropped.
    pub fn publish(&self, ev: Event) {
        let _ = self.tx.send(ev);
    }

    /// Creates a new receiver that will observe subsequent events.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    /// Number of live receivers.
    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventKind;

    #[test]
    fn test_publish_without_receivers_is_noop() {
        let bus = Bus::new(0);
        bus.publish(Event::new(EventKind::ForkNoticed));
        assert_eq!(bus.receiver_count(), 0);
    }

    #[test]
    fn test_receiver_sees_events_after_subscribe() {
        let bus = Bus::new(4);
        bus.publish(Event::new(EventKind::ProcessSpawned).with_pid(1));

        let mut rx = bus.subscribe();
        bus.publish(Event::new(EventKind::ProcessExited).with_pid(2));

        let ev = rx.try_recv().expect("event");
        assert_eq!(ev.kind, EventKind::ProcessExited);
        assert_eq!(ev.pid, Some(2));
        assert!(rx.try_recv().is_err());
    }
}
