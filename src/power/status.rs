//! Status fan-out for bus adapters
//!
//! The state machine publishes state transitions and panel activity here;
//! the bus adapters subscribe and republish them as property updates. If a
//! subscriber falls too far behind it receives a `Lagged` error and misses
//! entries, which is acceptable for property republication (the next change
//! resynchronizes it).

use tokio::sync::broadcast;

use super::events::Button;
use super::state::{ChassisState, HostState, PowerState};

/// Status channel capacity (ring buffer size)
const STATUS_CHANNEL_CAPACITY: usize = 64;

/// One observable change from the state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusEvent {
    /// The power state changed; carries the published projection
    PowerStateChanged {
        state: PowerState,
        host: HostState,
        chassis: ChassisState,
    },
    /// POST-complete signal moved; `standby` is the OS-standby level
    OsStateChanged { standby: bool },
    /// A panel button changed level
    ButtonActivity { button: Button, pressed: bool },
}

/// Broadcast bus distributing [`StatusEvent`]s to the adapters
pub struct StatusBus {
    tx: broadcast::Sender<StatusEvent>,
}

impl StatusBus {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(STATUS_CHANNEL_CAPACITY);
        Self { tx }
    }

    /// Publish a status event to all subscribers.
    ///
    /// With no active subscribers the event is silently dropped; status
    /// entries are fire-and-forget notifications.
    pub fn publish(&self, event: StatusEvent) {
        let _ = self.tx.send(event);
    }

    /// Subscribe to all future status events
    pub fn subscribe(&self) -> broadcast::Receiver<StatusEvent> {
        self.tx.subscribe()
    }
}

impl Default for StatusBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_reaches_all_subscribers() {
        let bus = StatusBus::new();
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        bus.publish(StatusEvent::OsStateChanged { standby: true });

        assert_eq!(
            rx1.recv().await.unwrap(),
            StatusEvent::OsStateChanged { standby: true }
        );
        assert_eq!(
            rx2.recv().await.unwrap(),
            StatusEvent::OsStateChanged { standby: true }
        );
    }

    #[test]
    fn test_publish_without_subscribers_is_harmless() {
        let bus = StatusBus::new();
        bus.publish(StatusEvent::ButtonActivity {
            button: Button::Power,
            pressed: true,
        });
    }
}
