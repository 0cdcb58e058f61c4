//! Named one-shot timers
//!
//! Each timer is keyed by a logical name and owned by exactly one call site
//! in the state machine. Starting an armed timer re-arms it; cancelling an
//! unarmed timer is a no-op. Expiry posts a [`Event::TimerFired`] carrying
//! the arming generation, and the machine acknowledges it before acting, so
//! an expiry that raced a cancel is discarded without touching state.

use std::collections::HashMap;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::trace;

use super::events::{Event, EventSender};

/// Logical timer identities used by the state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerName {
    /// Output pulse in flight on POWER_OUT / RESET_OUT
    GpioAssert,
    /// Off-dwell between the two halves of a power cycle
    PowerCycle,
    /// Host grace window after a soft off request
    GracefulPowerOff,
    /// PSU must report power-good within this window after power-on
    PsPowerOkWatchdog,
    /// SIO must report power-good within this window after PS_PWROK
    SioPowerGoodWatchdog,
}

impl TimerName {
    pub fn label(self) -> &'static str {
        match self {
            TimerName::GpioAssert => "gpioAssert",
            TimerName::PowerCycle => "powerCycle",
            TimerName::GracefulPowerOff => "gracefulPowerOff",
            TimerName::PsPowerOkWatchdog => "psPowerOKWatchdog",
            TimerName::SioPowerGoodWatchdog => "sioPowerGoodWatchdog",
        }
    }
}

struct TimerSlot {
    generation: u64,
    armed: bool,
    task: Option<JoinHandle<()>>,
}

/// Arena of named one-shot timers posting expiries into the event queue
pub struct TimerService {
    events: EventSender,
    slots: HashMap<TimerName, TimerSlot>,
}

impl TimerService {
    pub fn new(events: EventSender) -> Self {
        Self {
            events,
            slots: HashMap::new(),
        }
    }

    /// Arm `timer` for `duration`. An already-armed timer is re-armed with
    /// the new deadline; its pending expiry (if any) becomes stale.
    pub fn start(&mut self, timer: TimerName, duration: Duration) {
        let events = self.events.clone();
        let slot = self.slot(timer);
        slot.generation += 1;
        slot.armed = true;
        if let Some(task) = slot.task.take() {
            task.abort();
        }

        trace!(timer = timer.label(), ?duration, "timer armed");
        let generation = slot.generation;
        slot.task = Some(tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            events.send(Event::TimerFired { timer, generation });
        }));
    }

    /// Disarm `timer`. A no-op when unarmed; a pending expiry already in the
    /// queue will fail acknowledgement and be discarded.
    pub fn cancel(&mut self, timer: TimerName) {
        let slot = self.slot(timer);
        if !slot.armed {
            return;
        }
        slot.generation += 1;
        slot.armed = false;
        if let Some(task) = slot.task.take() {
            task.abort();
        }
        trace!(timer = timer.label(), "timer cancelled");
    }

    /// Validate a delivered expiry. Returns true exactly once per arming:
    /// when the generation matches the live arming and the timer has not
    /// been cancelled or re-armed since.
    pub fn acknowledge(&mut self, timer: TimerName, generation: u64) -> bool {
        let slot = self.slot(timer);
        if slot.armed && slot.generation == generation {
            slot.armed = false;
            slot.task = None;
            true
        } else {
            trace!(timer = timer.label(), generation, "stale timer expiry discarded");
            false
        }
    }

    /// Whether `timer` is currently armed
    pub fn is_armed(&self, timer: TimerName) -> bool {
        self.slots.get(&timer).map(|s| s.armed).unwrap_or(false)
    }

    /// Current arming generation, for tests that deliver expiries by hand
    #[cfg(test)]
    pub fn generation(&self, timer: TimerName) -> u64 {
        self.slots.get(&timer).map(|s| s.generation).unwrap_or(0)
    }

    /// Abort every armed timer. Used on process shutdown.
    pub fn shutdown(&mut self) {
        for slot in self.slots.values_mut() {
            slot.armed = false;
            if let Some(task) = slot.task.take() {
                task.abort();
            }
        }
    }

    fn slot(&mut self, timer: TimerName) -> &mut TimerSlot {
        self.slots.entry(timer).or_insert_with(|| TimerSlot {
            generation: 0,
            armed: false,
            task: None,
        })
    }
}

impl Drop for TimerService {
    fn drop(&mut self) {
        self.shutdown();
    }
}
