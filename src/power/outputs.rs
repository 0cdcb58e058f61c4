//! Output pulse engine and button masking
//!
//! POWER_OUT and RESET_OUT are active-low outputs that are normally left
//! unrequested so the physical panel buttons stay wired through. A pulse
//! acquires the line transiently, asserts it, and releases it when the
//! `gpioAssert` timer fires. Masking a button acquires the same line and
//! holds it released (high), electrically isolating the panel button; a
//! pulse issued while the mask is held is applied through the held handle
//! so the assertion still reaches the host.

use std::time::Duration;

use tracing::{debug, info, warn};

use super::timers::{TimerName, TimerService};
use crate::error::Result;

/// Timing constants for the power sequencer
pub mod timing {
    use std::time::Duration;

    /// Power button assertion for power-on / graceful off
    pub const POWER_PULSE: Duration = Duration::from_millis(200);

    /// Power button hold for force off
    pub const FORCE_OFF_PULSE: Duration = Duration::from_millis(15_000);

    /// Reset button assertion
    pub const RESET_PULSE: Duration = Duration::from_millis(500);

    /// Off-dwell between the halves of a power cycle
    pub const POWER_CYCLE_OFF_DWELL: Duration = Duration::from_millis(1_000);

    /// Window for SIO power-good after PS_PWROK
    pub const SIO_POWER_GOOD_WATCHDOG: Duration = Duration::from_millis(1_000);

    /// Window for PS_PWROK after a power-on request
    pub const PS_POWER_OK_WATCHDOG: Duration = Duration::from_millis(8_000);

    /// Host grace window for a soft shutdown
    pub const GRACEFUL_POWER_OFF: Duration = Duration::from_millis(60_000);

    /// Platform hold time for button isolation
    pub const BUTTON_MASK: Duration = Duration::from_millis(60_000);
}

/// Asserted level for the active-low outputs
const ASSERT_LEVEL: u8 = 0;
/// Released (inactive) level
const RELEASE_LEVEL: u8 = 1;

/// The two drivable outputs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputId {
    PowerOut,
    ResetOut,
}

impl OutputId {
    pub fn label(self) -> &'static str {
        match self {
            OutputId::PowerOut => "POWER_OUT",
            OutputId::ResetOut => "RESET_OUT",
        }
    }
}

/// An owned, requested output line. Dropping it releases the line back to
/// the kernel.
pub trait OutputPort {
    fn set(&mut self, value: u8) -> Result<()>;
}

/// Source of output line handles, implemented by the GPIO registry and by
/// test fakes.
pub trait OutputSource {
    /// Request `id` as an output driven to `initial`.
    fn acquire(&mut self, id: OutputId, initial: u8) -> Result<Box<dyn OutputPort>>;
}

struct ActivePulse {
    target: OutputId,
    /// Transient handle; `None` when the pulse runs through a held mask
    port: Option<Box<dyn OutputPort>>,
}

struct HeldMask {
    port: Box<dyn OutputPort>,
    /// An unmask arrived while a pulse was in flight through this handle;
    /// the release happens when the pulse completes.
    release_pending: bool,
}

/// Owner of all output lines: at most one pulse in flight, at most one mask
/// held per maskable output.
pub struct OutputBank {
    source: Box<dyn OutputSource>,
    power_mask: Option<HeldMask>,
    reset_mask: Option<HeldMask>,
    pulse: Option<ActivePulse>,
}

impl OutputBank {
    pub fn new(source: Box<dyn OutputSource>) -> Self {
        Self {
            source,
            power_mask: None,
            reset_mask: None,
            pulse: None,
        }
    }

    /// Assert `id` low for `duration`. Arms the `gpioAssert` timer; the
    /// machine finishes the pulse when the expiry is acknowledged. A pulse
    /// already in flight is completed early first.
    pub fn pulse(
        &mut self,
        timers: &mut TimerService,
        id: OutputId,
        duration: Duration,
    ) -> Result<()> {
        if self.pulse.is_some() {
            debug!(line = id.label(), "pulse in flight, coalescing");
            self.end_pulse()?;
        }

        let port = if self.mask(id).is_some() {
            let mask = self.mask(id).as_mut().unwrap();
            mask.port.set(ASSERT_LEVEL)?;
            None
        } else {
            Some(self.source.acquire(id, ASSERT_LEVEL)?)
        };

        debug!(line = id.label(), ?duration, "output asserted");
        self.pulse = Some(ActivePulse { target: id, port });
        timers.start(TimerName::GpioAssert, duration);
        Ok(())
    }

    /// Finish the in-flight pulse after its `gpioAssert` expiry was
    /// acknowledged. Returns the output that was being pulsed.
    pub fn complete_pulse(&mut self) -> Result<Option<OutputId>> {
        let target = self.pulse.as_ref().map(|p| p.target);
        self.end_pulse()?;
        Ok(target)
    }

    /// Cancel the in-flight pulse: disarm `gpioAssert` and restore the line
    /// immediately.
    pub fn abort_pulse(&mut self, timers: &mut TimerService) -> Result<()> {
        timers.cancel(TimerName::GpioAssert);
        self.end_pulse()
    }

    /// Hold or release the mask for a maskable output. Double-setting the
    /// same value is a no-op.
    pub fn set_mask(
        &mut self,
        timers: &mut TimerService,
        id: OutputId,
        masked: bool,
    ) -> Result<()> {
        if masked {
            if let Some(held) = self.mask(id).as_mut() {
                // Re-masking while an unmask waits on a pulse keeps the hold.
                held.release_pending = false;
                return Ok(());
            }
            // The line cannot carry a transient pulse and a mask hold at
            // once; finish the pulse before taking the line.
            if self
                .pulse
                .as_ref()
                .map(|p| p.target == id && p.port.is_some())
                .unwrap_or(false)
            {
                warn!(line = id.label(), "masking cuts a pulse short");
                self.abort_pulse(timers)?;
            }
            let port = self.source.acquire(id, RELEASE_LEVEL)?;
            *self.mask(id) = Some(HeldMask {
                port,
                release_pending: false,
            });
            info!(line = id.label(), "button masked");
        } else {
            let pulse_via_mask = self
                .pulse
                .as_ref()
                .map(|p| p.target == id && p.port.is_none())
                .unwrap_or(false);
            let release_now = match self.mask(id).as_mut() {
                None => return Ok(()),
                Some(held) if pulse_via_mask => {
                    // The held handle is carrying a pulse; defer the release
                    // until the pulse completes.
                    held.release_pending = true;
                    debug!(line = id.label(), "unmask deferred until pulse completes");
                    false
                }
                Some(_) => true,
            };
            if release_now {
                *self.mask(id) = None;
                info!(line = id.label(), "button unmasked");
            }
        }
        Ok(())
    }

    /// Whether the mask for `id` is currently held
    pub fn is_masked(&self, id: OutputId) -> bool {
        match id {
            OutputId::PowerOut => self.power_mask.is_some(),
            OutputId::ResetOut => self.reset_mask.is_some(),
        }
    }

    /// Restore every output to its released level. Used on shutdown.
    pub fn release_all(&mut self, timers: &mut TimerService) {
        if let Err(e) = self.abort_pulse(timers) {
            warn!("failed to restore output on shutdown: {}", e);
        }
        self.power_mask = None;
        self.reset_mask = None;
    }

    fn mask(&mut self, id: OutputId) -> &mut Option<HeldMask> {
        match id {
            OutputId::PowerOut => &mut self.power_mask,
            OutputId::ResetOut => &mut self.reset_mask,
        }
    }

    fn end_pulse(&mut self) -> Result<()> {
        let Some(mut pulse) = self.pulse.take() else {
            return Ok(());
        };
        debug!(line = pulse.target.label(), "output released");
        match pulse.port.as_mut() {
            // Transient handle: restore, then drop to release the line.
            Some(port) => port.set(RELEASE_LEVEL)?,
            // Pulse ran through the held mask; restore the hold level and
            // release the mask if an unmask was deferred.
            None => {
                let target = pulse.target;
                let mut release = false;
                if let Some(held) = self.mask(target).as_mut() {
                    held.port.set(RELEASE_LEVEL)?;
                    release = held.release_pending;
                }
                if release {
                    *self.mask(target) = None;
                    info!(line = target.label(), "button unmasked");
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    use crate::power::events::EventQueue;

    /// Records every level written per output, and how many handles were
    /// ever acquired.
    #[derive(Default)]
    struct FakeGpio {
        writes: Rc<RefCell<Vec<(OutputId, u8)>>>,
        acquisitions: Rc<RefCell<Vec<OutputId>>>,
    }

    struct FakePort {
        id: OutputId,
        writes: Rc<RefCell<Vec<(OutputId, u8)>>>,
    }

    impl OutputPort for FakePort {
        fn set(&mut self, value: u8) -> Result<()> {
            self.writes.borrow_mut().push((self.id, value));
            Ok(())
        }
    }

    impl OutputSource for FakeGpio {
        fn acquire(&mut self, id: OutputId, initial: u8) -> Result<Box<dyn OutputPort>> {
            self.acquisitions.borrow_mut().push(id);
            self.writes.borrow_mut().push((id, initial));
            Ok(Box::new(FakePort {
                id,
                writes: self.writes.clone(),
            }))
        }
    }

    fn bank() -> (
        OutputBank,
        Rc<RefCell<Vec<(OutputId, u8)>>>,
        Rc<RefCell<Vec<OutputId>>>,
    ) {
        let fake = FakeGpio::default();
        let writes = fake.writes.clone();
        let acquisitions = fake.acquisitions.clone();
        (OutputBank::new(Box::new(fake)), writes, acquisitions)
    }

    #[tokio::test]
    async fn test_pulse_asserts_then_releases() {
        let queue = EventQueue::new();
        let mut timers = TimerService::new(queue.sender());
        let (mut bank, writes, _) = bank();

        bank.pulse(&mut timers, OutputId::PowerOut, timing::POWER_PULSE)
            .unwrap();
        assert!(timers.is_armed(TimerName::GpioAssert));
        assert_eq!(*writes.borrow(), vec![(OutputId::PowerOut, 0)]);

        let finished = bank.complete_pulse().unwrap();
        assert_eq!(finished, Some(OutputId::PowerOut));
        assert_eq!(
            *writes.borrow(),
            vec![(OutputId::PowerOut, 0), (OutputId::PowerOut, 1)]
        );
    }

    #[tokio::test]
    async fn test_masked_pulse_uses_held_handle() {
        let queue = EventQueue::new();
        let mut timers = TimerService::new(queue.sender());
        let (mut bank, writes, acquisitions) = bank();

        bank.set_mask(&mut timers, OutputId::PowerOut, true).unwrap();
        assert!(bank.is_masked(OutputId::PowerOut));
        // Mask hold drives the line high.
        assert_eq!(*writes.borrow(), vec![(OutputId::PowerOut, 1)]);

        bank.pulse(&mut timers, OutputId::PowerOut, timing::POWER_PULSE)
            .unwrap();
        // No second line request: the pulse rides the mask handle.
        assert_eq!(acquisitions.borrow().len(), 1);
        assert_eq!(writes.borrow().last(), Some(&(OutputId::PowerOut, 0)));

        bank.complete_pulse().unwrap();
        assert_eq!(writes.borrow().last(), Some(&(OutputId::PowerOut, 1)));
        assert!(bank.is_masked(OutputId::PowerOut));
    }

    #[tokio::test]
    async fn test_unmask_during_pulse_is_deferred() {
        let queue = EventQueue::new();
        let mut timers = TimerService::new(queue.sender());
        let (mut bank, _, _) = bank();

        bank.set_mask(&mut timers, OutputId::PowerOut, true).unwrap();
        bank.pulse(&mut timers, OutputId::PowerOut, timing::FORCE_OFF_PULSE)
            .unwrap();
        bank.set_mask(&mut timers, OutputId::PowerOut, false).unwrap();
        // Still held while the pulse is in flight.
        assert!(bank.is_masked(OutputId::PowerOut));

        bank.complete_pulse().unwrap();
        assert!(!bank.is_masked(OutputId::PowerOut));
    }

    #[tokio::test]
    async fn test_double_mask_set_is_noop() {
        let queue = EventQueue::new();
        let mut timers = TimerService::new(queue.sender());
        let (mut bank, _, acquisitions) = bank();

        bank.set_mask(&mut timers, OutputId::ResetOut, true).unwrap();
        bank.set_mask(&mut timers, OutputId::ResetOut, true).unwrap();
        assert_eq!(acquisitions.borrow().len(), 1);

        bank.set_mask(&mut timers, OutputId::ResetOut, false).unwrap();
        bank.set_mask(&mut timers, OutputId::ResetOut, false).unwrap();
        assert!(!bank.is_masked(OutputId::ResetOut));
    }

    #[tokio::test]
    async fn test_coalesced_pulse_restores_previous_line() {
        let queue = EventQueue::new();
        let mut timers = TimerService::new(queue.sender());
        let (mut bank, writes, _) = bank();

        bank.pulse(&mut timers, OutputId::PowerOut, timing::POWER_PULSE)
            .unwrap();
        bank.pulse(&mut timers, OutputId::ResetOut, timing::RESET_PULSE)
            .unwrap();

        // First pulse released before the second asserted.
        assert_eq!(
            *writes.borrow(),
            vec![
                (OutputId::PowerOut, 0),
                (OutputId::PowerOut, 1),
                (OutputId::ResetOut, 0),
            ]
        );
    }

    #[test]
    fn test_timing_constants() {
        assert_eq!(timing::POWER_PULSE.as_millis(), 200);
        assert_eq!(timing::FORCE_OFF_PULSE.as_millis(), 15_000);
        assert_eq!(timing::RESET_PULSE.as_millis(), 500);
        assert_eq!(timing::POWER_CYCLE_OFF_DWELL.as_millis(), 1_000);
        assert_eq!(timing::SIO_POWER_GOOD_WATCHDOG.as_millis(), 1_000);
        assert_eq!(timing::PS_POWER_OK_WATCHDOG.as_millis(), 8_000);
        assert_eq!(timing::GRACEFUL_POWER_OFF.as_millis(), 60_000);
        assert_eq!(timing::BUTTON_MASK.as_millis(), 60_000);
    }
}
