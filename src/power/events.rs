//! Event fabric for the power state machine
//!
//! Every asynchronous source (GPIO edges, timers, bus requests) is funnelled
//! into one FIFO queue consumed by a single handler. Events are never
//! coalesced or dropped once enqueued; producers hold a cloneable sender and
//! may enqueue from within the handler without re-entering it.

use tokio::sync::mpsc;
use tracing::warn;

use super::timers::TimerName;

/// Front-panel buttons reflected on the bus
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Button {
    Power,
    Reset,
    Nmi,
    Id,
}

impl Button {
    pub fn name(self) -> &'static str {
        match self {
            Button::Power => "power",
            Button::Reset => "reset",
            Button::Nmi => "nmi",
            Button::Id => "id",
        }
    }
}

/// One input to the power state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    // Power-good handshakes
    PsPowerOkAssert,
    PsPowerOkDeAssert,
    SioPowerGoodAssert,
    SioPowerGoodDeAssert,

    // SIO sideband signals
    SioOnControlAssert,
    SioOnControlDeAssert,
    SioS5Assert,
    SioS5DeAssert,

    // Front panel
    PowerButtonPressed,
    PowerButtonReleased,
    ResetButtonPressed,
    ResetButtonReleased,
    NmiButtonPressed,
    NmiButtonReleased,
    IdButtonPressed,
    IdButtonReleased,

    // Host firmware progress
    PostCompleteAssert,
    PostCompleteDeAssert,

    // Bus requests
    PowerOnRequest,
    PowerOffRequest,
    PowerCycleRequest,
    ResetRequest,
    GracefulPowerOffRequest,
    GracefulPowerCycleRequest,

    // Button isolation
    SetButtonMask { button: Button, masked: bool },

    // Timer expiry; carries the arming generation so a cancelled timer's
    // already-posted expiry is discarded before any state mutation
    TimerFired { timer: TimerName, generation: u64 },
}

/// Cloneable producer handle for the event queue
#[derive(Clone)]
pub struct EventSender {
    tx: mpsc::UnboundedSender<Event>,
}

impl EventSender {
    /// Enqueue an event. Delivery is FIFO with respect to all other sends
    /// on any clone of this sender.
    pub fn send(&self, event: Event) {
        if self.tx.send(event).is_err() {
            warn!(?event, "event queue closed, dropping event");
        }
    }
}

/// The single-consumer event queue feeding the state machine
pub struct EventQueue {
    tx: mpsc::UnboundedSender<Event>,
    rx: mpsc::UnboundedReceiver<Event>,
}

impl EventQueue {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self { tx, rx }
    }

    /// New producer handle
    pub fn sender(&self) -> EventSender {
        EventSender {
            tx: self.tx.clone(),
        }
    }

    /// Wait for the next event. Returns `None` only once every sender is
    /// dropped and the queue has drained.
    pub async fn next(&mut self) -> Option<Event> {
        self.rx.recv().await
    }
}

impl Default for EventQueue {
    fn default() -> Self {
        Self::new()
    }
}
