//! Power state machine
//!
//! The single consumer of the event queue. Each event is handled to
//! completion before the next is taken: the handler mutates the power
//! state, drives output pulses, arms or cancels timers, and persists the
//! power-drop flag. Unlisted (state, event) pairs are logged and change
//! nothing.

use tracing::{debug, error, info, warn};

use super::events::{Button, Event};
use super::outputs::{timing, OutputBank, OutputId};
use super::state::PowerState;
use super::status::{StatusBus, StatusEvent};
use super::timers::{TimerName, TimerService};
use crate::pch::HostPowerDown;
use crate::persist::{DropState, PowerDropFlag};

/// Hardware conditions sampled once at startup
#[derive(Debug, Clone, Copy)]
pub struct BootConditions {
    /// PS_PWROK level at boot
    pub ps_power_ok: bool,
    /// The platform saw a mains interruption before this boot
    pub ac_lost: bool,
    /// POST_COMPLETE level indicated OS standby at boot
    pub os_standby: bool,
}

/// Initial machine state per the boot conditions
pub fn initial_state(ps_power_ok: bool, ac_lost: bool) -> PowerState {
    if ps_power_ok {
        PowerState::On
    } else if ac_lost {
        PowerState::AcLossOff
    } else {
        PowerState::Off
    }
}

/// The host power sequencer
pub struct PowerControl {
    state: PowerState,
    ps_power_ok: bool,
    os_standby: bool,
    nmi_masked: bool,
    /// A force-off hold is in flight; escalate to the PCH when it expires
    force_off_pending: bool,
    /// The AC-loss power-on entry has been emitted this boot
    ac_on_logged: bool,
    timers: TimerService,
    outputs: OutputBank,
    pch: Box<dyn HostPowerDown>,
    drop_flag: PowerDropFlag,
    status: StatusBus,
}

impl PowerControl {
    pub fn new(
        boot: BootConditions,
        outputs: OutputBank,
        timers: TimerService,
        pch: Box<dyn HostPowerDown>,
        drop_flag: PowerDropFlag,
        status: StatusBus,
    ) -> Self {
        let state = initial_state(boot.ps_power_ok, boot.ac_lost);
        let mut machine = Self {
            state,
            ps_power_ok: boot.ps_power_ok,
            os_standby: boot.os_standby,
            nmi_masked: false,
            force_off_pending: false,
            ac_on_logged: false,
            timers,
            outputs,
            pch,
            drop_flag,
            status,
        };

        info!(initial = %machine.state, "power sequencer initialized");
        machine.publish_state();
        if boot.ac_lost && machine.state == PowerState::On {
            machine.emit_ac_on_telemetry();
        }
        machine
    }

    /// Current power state
    pub fn state(&self) -> PowerState {
        self.state
    }

    /// Handle one event to completion
    pub fn handle(&mut self, event: Event) {
        match event {
            Event::TimerFired { timer, generation } => {
                if self.timers.acknowledge(timer, generation) {
                    self.on_timer(timer);
                }
            }
            Event::SetButtonMask { button, masked } => self.on_set_mask(button, masked),

            Event::PsPowerOkAssert => {
                self.ps_power_ok = true;
                self.apply(event);
            }
            Event::PsPowerOkDeAssert => {
                self.ps_power_ok = false;
                self.apply(event);
            }

            Event::PowerButtonPressed => {
                info!(
                    redfish_message_id = "PowerButtonPressed",
                    "power button pressed"
                );
                self.publish_button(Button::Power, true);
                if self.outputs.is_masked(OutputId::PowerOut) {
                    info!("power button is masked, press not acted on");
                } else {
                    self.apply(event);
                }
            }
            Event::PowerButtonReleased => self.publish_button(Button::Power, false),

            Event::ResetButtonPressed => {
                info!(
                    redfish_message_id = "ResetButtonPressed",
                    "reset button pressed"
                );
                if self.outputs.is_masked(OutputId::ResetOut) {
                    info!("reset button is masked");
                }
                self.publish_button(Button::Reset, true);
            }
            Event::ResetButtonReleased => self.publish_button(Button::Reset, false),

            Event::NmiButtonPressed => {
                if self.nmi_masked {
                    info!("NMI button is masked, press not acted on");
                } else {
                    info!("NMI button pressed");
                }
                self.publish_button(Button::Nmi, true);
            }
            Event::NmiButtonReleased => self.publish_button(Button::Nmi, false),

            Event::IdButtonPressed => {
                debug!("ID button pressed");
                self.publish_button(Button::Id, true);
            }
            Event::IdButtonReleased => self.publish_button(Button::Id, false),

            Event::PostCompleteAssert => self.set_os_standby(true),
            Event::PostCompleteDeAssert => self.set_os_standby(false),

            Event::SioOnControlAssert => info!("SIO_ONCONTROL asserted"),
            Event::SioOnControlDeAssert => info!("SIO_ONCONTROL deasserted"),

            _ => self.apply(event),
        }
    }

    /// Cancel every timer and restore all outputs. Called on process
    /// shutdown.
    pub fn shutdown(&mut self) {
        self.outputs.release_all(&mut self.timers);
        self.timers.shutdown();
        info!("power sequencer shut down");
    }

    /// The transition table. Anything not matched here is a logged no-op.
    fn apply(&mut self, event: Event) {
        use Event::*;
        use PowerState::*;

        match (self.state, event) {
            // Host is up.
            (On, PsPowerOkDeAssert) => {
                warn!("unexpected host power loss");
                self.drop_flag.store(DropState::Yes);
                self.set_power_state(Off);
            }
            (On, SioS5Assert) => self.set_power_state(TransitionToOff),
            (On, PowerButtonPressed) => {
                self.timers
                    .start(TimerName::GracefulPowerOff, timing::GRACEFUL_POWER_OFF);
                self.set_power_state(GracefulTransitionToOff);
            }
            (On, PowerOffRequest) => {
                self.set_power_state(TransitionToOff);
                self.force_power_off();
            }
            (On, GracefulPowerOffRequest) => {
                self.set_power_state(GracefulTransitionToOff);
                self.timers
                    .start(TimerName::GracefulPowerOff, timing::GRACEFUL_POWER_OFF);
                self.graceful_power_off();
            }
            (On, PowerCycleRequest) => {
                self.set_power_state(TransitionToCycleOff);
                self.force_power_off();
            }
            (On, GracefulPowerCycleRequest) => {
                self.set_power_state(GracefulTransitionToCycleOff);
                self.timers
                    .start(TimerName::GracefulPowerOff, timing::GRACEFUL_POWER_OFF);
                self.graceful_power_off();
            }
            (On, ResetRequest) => self.reset(),

            // Power-on handshake.
            (WaitForPsPowerOk, PsPowerOkAssert) => {
                self.cancel_gpio_assert();
                self.timers.cancel(TimerName::PsPowerOkWatchdog);
                self.timers.start(
                    TimerName::SioPowerGoodWatchdog,
                    timing::SIO_POWER_GOOD_WATCHDOG,
                );
                self.set_power_state(WaitForSioPowerGood);
            }
            (WaitForSioPowerGood, SioPowerGoodAssert) => {
                self.timers.cancel(TimerName::SioPowerGoodWatchdog);
                self.set_power_state(On);
            }

            // A transition to on failed; refuse to come up silently.
            (FailedTransitionToOn, PsPowerOkAssert) => {
                warn!("PS_PWROK asserted after a failed power-on, forcing off");
                self.force_power_off();
            }
            (FailedTransitionToOn, PsPowerOkDeAssert) => self.cancel_gpio_assert(),
            (FailedTransitionToOn, PowerButtonPressed) => {
                self.timers
                    .start(TimerName::PsPowerOkWatchdog, timing::PS_POWER_OK_WATCHDOG);
                self.set_power_state(WaitForPsPowerOk);
            }
            (FailedTransitionToOn, PowerOnRequest) => {
                self.timers
                    .start(TimerName::PsPowerOkWatchdog, timing::PS_POWER_OK_WATCHDOG);
                self.power_on();
                self.set_power_state(WaitForPsPowerOk);
            }

            // Host is down. AcLossOff behaves as Off but also records that
            // this power-on follows an AC loss.
            (Off | AcLossOff, PsPowerOkAssert) => {
                if self.state == AcLossOff {
                    self.emit_ac_on_telemetry();
                }
                self.drop_flag.store(DropState::No);
                self.set_power_state(WaitForSioPowerGood);
            }
            (Off | AcLossOff, PowerButtonPressed) => {
                if self.state == AcLossOff {
                    self.emit_ac_on_telemetry();
                }
                self.drop_flag.store(DropState::No);
                self.timers
                    .start(TimerName::PsPowerOkWatchdog, timing::PS_POWER_OK_WATCHDOG);
                self.set_power_state(WaitForPsPowerOk);
            }
            (Off | AcLossOff, PowerOnRequest) => {
                if self.state == AcLossOff {
                    self.emit_ac_on_telemetry();
                }
                self.drop_flag.store(DropState::No);
                self.timers
                    .start(TimerName::PsPowerOkWatchdog, timing::PS_POWER_OK_WATCHDOG);
                self.power_on();
                self.set_power_state(WaitForPsPowerOk);
            }

            // Powering down.
            (TransitionToOff, PsPowerOkDeAssert) => {
                self.cancel_gpio_assert();
                self.set_power_state(Off);
            }
            (GracefulTransitionToOff, PsPowerOkDeAssert) => {
                self.timers.cancel(TimerName::GracefulPowerOff);
                self.set_power_state(Off);
            }

            // Power cycling.
            (TransitionToCycleOff, PsPowerOkDeAssert) => {
                self.cancel_gpio_assert();
                self.set_power_state(CycleOff);
                self.timers
                    .start(TimerName::PowerCycle, timing::POWER_CYCLE_OFF_DWELL);
            }
            (GracefulTransitionToCycleOff, PsPowerOkDeAssert) => {
                self.timers.cancel(TimerName::GracefulPowerOff);
                self.set_power_state(CycleOff);
                self.timers
                    .start(TimerName::PowerCycle, timing::POWER_CYCLE_OFF_DWELL);
            }

            (state, event) => {
                debug!(%state, ?event, "no action for event in state");
            }
        }
    }

    /// Timer expiries, keyed by the logical timer name
    fn on_timer(&mut self, timer: TimerName) {
        use PowerState::*;

        match (timer, self.state) {
            (TimerName::GpioAssert, _) => self.on_pulse_complete(),

            (TimerName::PsPowerOkWatchdog, WaitForPsPowerOk) => {
                warn!("PS_PWROK did not assert within the watchdog window");
                self.set_power_state(FailedTransitionToOn);
            }
            (TimerName::SioPowerGoodWatchdog, WaitForSioPowerGood) => {
                warn!("SIO power-good did not assert within the watchdog window");
                self.force_power_off();
                self.set_power_state(FailedTransitionToOn);
            }
            (
                TimerName::GracefulPowerOff,
                GracefulTransitionToOff | GracefulTransitionToCycleOff,
            ) => {
                warn!("host did not power off within the grace window");
                self.set_power_state(On);
            }
            (TimerName::PowerCycle, CycleOff) => {
                self.timers
                    .start(TimerName::PsPowerOkWatchdog, timing::PS_POWER_OK_WATCHDOG);
                self.power_on();
                self.set_power_state(WaitForPsPowerOk);
            }

            (timer, state) => {
                debug!(timer = timer.label(), %state, "no action for timer in state");
            }
        }
    }

    fn on_set_mask(&mut self, button: Button, masked: bool) {
        match button {
            Button::Power => {
                if let Err(e) = self
                    .outputs
                    .set_mask(&mut self.timers, OutputId::PowerOut, masked)
                {
                    warn!("power button mask change failed: {}", e);
                }
            }
            Button::Reset => {
                if let Err(e) = self
                    .outputs
                    .set_mask(&mut self.timers, OutputId::ResetOut, masked)
                {
                    warn!("reset button mask change failed: {}", e);
                }
            }
            Button::Nmi => {
                if self.nmi_masked != masked {
                    self.nmi_masked = masked;
                    info!(masked, "NMI mask changed");
                }
            }
            Button::Id => warn!("ID button has no mask"),
        }
    }

    /// An acknowledged `gpioAssert` expiry: finish the pulse and, when a
    /// force-off hold just ended with the host still up, fall back to the
    /// PCH power-down command. The escalation happens at most once per
    /// force-off.
    fn on_pulse_complete(&mut self) {
        let force_off = std::mem::take(&mut self.force_off_pending);
        match self.outputs.complete_pulse() {
            Ok(Some(OutputId::PowerOut)) if force_off && self.ps_power_ok => {
                warn!("host still on after force-off hold, sending PCH power-down");
                if let Err(e) = self.pch.power_down() {
                    error!("PCH power-down failed: {}", e);
                }
            }
            Ok(_) => {}
            Err(e) => warn!("failed to finish output pulse: {}", e),
        }
    }

    fn set_power_state(&mut self, new: PowerState) {
        info!(from = %self.state, to = %new, "power state transition");
        self.state = new;
        self.publish_state();
    }

    fn publish_state(&self) {
        self.status.publish(StatusEvent::PowerStateChanged {
            state: self.state,
            host: self.state.host_state(),
            chassis: self.state.chassis_state(),
        });
    }

    fn publish_button(&self, button: Button, pressed: bool) {
        self.status
            .publish(StatusEvent::ButtonActivity { button, pressed });
    }

    fn set_os_standby(&mut self, standby: bool) {
        if self.os_standby != standby {
            info!(standby, "POST complete changed");
            self.os_standby = standby;
        }
        self.status.publish(StatusEvent::OsStateChanged { standby });
    }

    fn power_on(&mut self) {
        info!("asserting POWER_OUT for power-on");
        self.force_off_pending = false;
        if let Err(e) = self
            .outputs
            .pulse(&mut self.timers, OutputId::PowerOut, timing::POWER_PULSE)
        {
            warn!("power-on pulse failed: {}", e);
        }
    }

    fn graceful_power_off(&mut self) {
        info!("asserting POWER_OUT for graceful power-off");
        self.force_off_pending = false;
        if let Err(e) = self
            .outputs
            .pulse(&mut self.timers, OutputId::PowerOut, timing::POWER_PULSE)
        {
            warn!("graceful power-off pulse failed: {}", e);
        }
    }

    fn force_power_off(&mut self) {
        info!("holding POWER_OUT for force power-off");
        self.force_off_pending = true;
        if let Err(e) = self.outputs.pulse(
            &mut self.timers,
            OutputId::PowerOut,
            timing::FORCE_OFF_PULSE,
        ) {
            warn!("force power-off pulse failed: {}", e);
        }
    }

    fn reset(&mut self) {
        info!("asserting RESET_OUT");
        self.force_off_pending = false;
        if let Err(e) = self
            .outputs
            .pulse(&mut self.timers, OutputId::ResetOut, timing::RESET_PULSE)
        {
            warn!("reset pulse failed: {}", e);
        }
    }

    /// Cancel an in-flight output pulse and any pending force-off
    /// escalation.
    fn cancel_gpio_assert(&mut self) {
        self.force_off_pending = false;
        if let Err(e) = self.outputs.abort_pulse(&mut self.timers) {
            warn!("failed to restore output on pulse cancel: {}", e);
        }
    }

    fn emit_ac_on_telemetry(&mut self) {
        if self.ac_on_logged {
            return;
        }
        self.ac_on_logged = true;
        info!(
            redfish_message_id = "OpenBMC.0.1.DCPowerOnAfterACLost",
            "host powering on after AC loss"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    use crate::error::Result;
    use crate::power::events::EventQueue;
    use crate::power::outputs::{OutputPort, OutputSource};
    use crate::power::state::{ChassisState, HostState};

    #[derive(Default)]
    struct FakeGpio {
        writes: Rc<RefCell<Vec<(OutputId, u8)>>>,
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
            self.writes.borrow_mut().push((id, initial));
            Ok(Box::new(FakePort {
                id,
                writes: self.writes.clone(),
            }))
        }
    }

    #[derive(Default)]
    struct FakePch {
        calls: Rc<RefCell<u32>>,
    }

    impl HostPowerDown for FakePch {
        fn power_down(&mut self) -> Result<()> {
            *self.calls.borrow_mut() += 1;
            Ok(())
        }
    }

    struct Rig {
        machine: PowerControl,
        queue: EventQueue,
        writes: Rc<RefCell<Vec<(OutputId, u8)>>>,
        pch_calls: Rc<RefCell<u32>>,
        flag: PowerDropFlag,
        _state_dir: tempfile::TempDir,
    }

    fn rig(boot: BootConditions) -> Rig {
        let queue = EventQueue::new();
        let gpio = FakeGpio::default();
        let writes = gpio.writes.clone();
        let pch = FakePch::default();
        let pch_calls = pch.calls.clone();
        let state_dir = tempfile::tempdir().unwrap();
        let flag = PowerDropFlag::new(state_dir.path());

        let machine = PowerControl::new(
            boot,
            OutputBank::new(Box::new(gpio)),
            TimerService::new(queue.sender()),
            Box::new(pch),
            flag.clone(),
            StatusBus::new(),
        );
        Rig {
            machine,
            queue,
            writes,
            pch_calls,
            flag,
            _state_dir: state_dir,
        }
    }

    fn off_boot() -> BootConditions {
        BootConditions {
            ps_power_ok: false,
            ac_lost: false,
            os_standby: false,
        }
    }

    fn on_boot() -> BootConditions {
        BootConditions {
            ps_power_ok: true,
            ac_lost: false,
            os_standby: true,
        }
    }

    /// Deliver the live expiry of `timer` as the event loop would.
    fn fire(rig: &mut Rig, timer: TimerName) {
        let generation = rig.machine.timers.generation(timer);
        rig.machine.handle(Event::TimerFired { timer, generation });
    }

    #[tokio::test]
    async fn test_clean_power_on() {
        let mut r = rig(off_boot());
        assert_eq!(r.machine.state(), PowerState::Off);

        r.machine.handle(Event::PowerOnRequest);
        assert_eq!(r.machine.state(), PowerState::WaitForPsPowerOk);
        assert!(r.machine.timers.is_armed(TimerName::PsPowerOkWatchdog));
        assert!(r.machine.timers.is_armed(TimerName::GpioAssert));
        assert_eq!(r.writes.borrow().last(), Some(&(OutputId::PowerOut, 0)));

        r.machine.handle(Event::PsPowerOkAssert);
        assert_eq!(r.machine.state(), PowerState::WaitForSioPowerGood);
        assert!(!r.machine.timers.is_armed(TimerName::PsPowerOkWatchdog));
        assert!(!r.machine.timers.is_armed(TimerName::GpioAssert));
        assert!(r.machine.timers.is_armed(TimerName::SioPowerGoodWatchdog));
        // The power-on pulse was cut short and the line restored.
        assert_eq!(r.writes.borrow().last(), Some(&(OutputId::PowerOut, 1)));

        r.machine.handle(Event::SioPowerGoodAssert);
        assert_eq!(r.machine.state(), PowerState::On);
        assert!(!r.machine.timers.is_armed(TimerName::SioPowerGoodWatchdog));
        assert_eq!(r.machine.state().host_state(), HostState::Running);
        assert_eq!(r.machine.state().chassis_state(), ChassisState::On);
    }

    #[tokio::test]
    async fn test_power_on_fails_at_psu() {
        let mut r = rig(off_boot());
        r.machine.handle(Event::PowerOnRequest);

        fire(&mut r, TimerName::PsPowerOkWatchdog);
        assert_eq!(r.machine.state(), PowerState::FailedTransitionToOn);

        // A stray PS_PWROK afterwards is refused with a force-off hold.
        r.machine.handle(Event::PsPowerOkAssert);
        assert_eq!(r.machine.state(), PowerState::FailedTransitionToOn);
        assert!(r.machine.timers.is_armed(TimerName::GpioAssert));
        assert_eq!(r.writes.borrow().last(), Some(&(OutputId::PowerOut, 0)));
    }

    #[tokio::test]
    async fn test_graceful_off_succeeds() {
        let mut r = rig(on_boot());
        assert_eq!(r.machine.state(), PowerState::On);

        r.machine.handle(Event::GracefulPowerOffRequest);
        assert_eq!(r.machine.state(), PowerState::GracefulTransitionToOff);
        assert!(r.machine.timers.is_armed(TimerName::GracefulPowerOff));
        assert_eq!(r.writes.borrow().last(), Some(&(OutputId::PowerOut, 0)));

        r.machine.handle(Event::PsPowerOkDeAssert);
        assert_eq!(r.machine.state(), PowerState::Off);
        assert!(!r.machine.timers.is_armed(TimerName::GracefulPowerOff));
        // A clean shutdown leaves the drop flag untouched.
        assert_eq!(r.flag.load(), DropState::No);
    }

    #[tokio::test]
    async fn test_graceful_off_times_out() {
        let mut r = rig(on_boot());
        r.machine.handle(Event::GracefulPowerOffRequest);

        fire(&mut r, TimerName::GracefulPowerOff);
        assert_eq!(r.machine.state(), PowerState::On);
        assert_eq!(r.flag.load(), DropState::No);
    }

    #[tokio::test]
    async fn test_unexpected_power_loss_sets_drop_flag() {
        let mut r = rig(on_boot());
        r.machine.handle(Event::PsPowerOkDeAssert);
        assert_eq!(r.machine.state(), PowerState::Off);
        assert_eq!(r.flag.load(), DropState::Yes);
    }

    #[tokio::test]
    async fn test_power_on_clears_drop_flag() {
        let mut r = rig(off_boot());
        r.flag.store(DropState::Yes);

        r.machine.handle(Event::PowerOnRequest);
        assert_eq!(r.flag.load(), DropState::No);
    }

    #[tokio::test]
    async fn test_force_off_escalates_to_pch_once() {
        let mut r = rig(on_boot());
        r.machine.handle(Event::PowerOffRequest);
        assert_eq!(r.machine.state(), PowerState::TransitionToOff);

        // The 15 s hold ends with PS_PWROK still asserted.
        fire(&mut r, TimerName::GpioAssert);
        assert_eq!(*r.pch_calls.borrow(), 1);

        // A later unrelated pulse completion does not re-escalate.
        r.machine.handle(Event::PsPowerOkDeAssert);
        assert_eq!(r.machine.state(), PowerState::Off);
        assert_eq!(*r.pch_calls.borrow(), 1);
    }

    #[tokio::test]
    async fn test_force_off_cancelled_by_power_drop_skips_pch() {
        let mut r = rig(on_boot());
        r.machine.handle(Event::PowerOffRequest);

        // Host powers down inside the hold window.
        r.machine.handle(Event::PsPowerOkDeAssert);
        assert_eq!(r.machine.state(), PowerState::Off);
        assert!(!r.machine.timers.is_armed(TimerName::GpioAssert));
        assert_eq!(*r.pch_calls.borrow(), 0);
        assert_eq!(r.writes.borrow().last(), Some(&(OutputId::PowerOut, 1)));
    }

    #[tokio::test]
    async fn test_power_cycle_round_trip() {
        let mut r = rig(on_boot());
        r.machine.handle(Event::PowerCycleRequest);
        assert_eq!(r.machine.state(), PowerState::TransitionToCycleOff);

        r.machine.handle(Event::PsPowerOkDeAssert);
        assert_eq!(r.machine.state(), PowerState::CycleOff);
        assert!(r.machine.timers.is_armed(TimerName::PowerCycle));

        fire(&mut r, TimerName::PowerCycle);
        assert_eq!(r.machine.state(), PowerState::WaitForPsPowerOk);
        assert!(r.machine.timers.is_armed(TimerName::PsPowerOkWatchdog));
        assert_eq!(r.writes.borrow().last(), Some(&(OutputId::PowerOut, 0)));
    }

    #[tokio::test]
    async fn test_sio_watchdog_failure_forces_off() {
        let mut r = rig(off_boot());
        r.machine.handle(Event::PowerOnRequest);
        r.machine.handle(Event::PsPowerOkAssert);
        assert_eq!(r.machine.state(), PowerState::WaitForSioPowerGood);

        fire(&mut r, TimerName::SioPowerGoodWatchdog);
        assert_eq!(r.machine.state(), PowerState::FailedTransitionToOn);
        assert!(r.machine.timers.is_armed(TimerName::GpioAssert));
    }

    #[tokio::test]
    async fn test_reset_request_keeps_state() {
        let mut r = rig(on_boot());
        r.machine.handle(Event::ResetRequest);
        assert_eq!(r.machine.state(), PowerState::On);
        assert_eq!(r.writes.borrow().last(), Some(&(OutputId::ResetOut, 0)));
    }

    #[tokio::test]
    async fn test_sio_s5_starts_transition_to_off() {
        let mut r = rig(on_boot());
        r.machine.handle(Event::SioS5Assert);
        assert_eq!(r.machine.state(), PowerState::TransitionToOff);

        r.machine.handle(Event::PsPowerOkDeAssert);
        assert_eq!(r.machine.state(), PowerState::Off);
    }

    #[tokio::test]
    async fn test_ac_loss_boot_powers_on_with_telemetry() {
        let mut r = rig(BootConditions {
            ps_power_ok: false,
            ac_lost: true,
            os_standby: false,
        });
        assert_eq!(r.machine.state(), PowerState::AcLossOff);
        assert!(!r.machine.ac_on_logged);

        r.machine.handle(Event::PowerOnRequest);
        assert_eq!(r.machine.state(), PowerState::WaitForPsPowerOk);
        assert!(r.machine.ac_on_logged);
        assert_eq!(r.flag.load(), DropState::No);
    }

    #[tokio::test]
    async fn test_ac_lost_while_on_logs_immediately() {
        let r = rig(BootConditions {
            ps_power_ok: true,
            ac_lost: true,
            os_standby: false,
        });
        assert_eq!(r.machine.state(), PowerState::On);
        assert!(r.machine.ac_on_logged);
    }

    #[tokio::test]
    async fn test_masked_power_button_does_not_transition() {
        let mut r = rig(on_boot());
        r.machine.handle(Event::SetButtonMask {
            button: Button::Power,
            masked: true,
        });

        r.machine.handle(Event::PowerButtonPressed);
        assert_eq!(r.machine.state(), PowerState::On);

        r.machine.handle(Event::SetButtonMask {
            button: Button::Power,
            masked: false,
        });
        r.machine.handle(Event::PowerButtonPressed);
        assert_eq!(r.machine.state(), PowerState::GracefulTransitionToOff);
    }

    #[tokio::test]
    async fn test_unlisted_pair_is_noop() {
        let mut r = rig(off_boot());
        r.machine.handle(Event::SioPowerGoodAssert);
        r.machine.handle(Event::ResetRequest);
        r.machine.handle(Event::GracefulPowerOffRequest);
        r.machine.handle(Event::PowerCycleRequest);
        assert_eq!(r.machine.state(), PowerState::Off);
        assert!(r.writes.borrow().is_empty());
    }

    #[tokio::test]
    async fn test_stale_watchdog_expiry_is_discarded() {
        let mut r = rig(off_boot());
        r.machine.handle(Event::PowerOnRequest);
        let stale = r.machine.timers.generation(TimerName::PsPowerOkWatchdog);

        // PS_PWROK lands first and cancels the watchdog.
        r.machine.handle(Event::PsPowerOkAssert);
        assert_eq!(r.machine.state(), PowerState::WaitForSioPowerGood);

        // The already-posted expiry is discarded without a transition.
        r.machine.handle(Event::TimerFired {
            timer: TimerName::PsPowerOkWatchdog,
            generation: stale,
        });
        assert_eq!(r.machine.state(), PowerState::WaitForSioPowerGood);
    }

    #[tokio::test]
    async fn test_power_button_from_off_waits_for_psu() {
        let mut r = rig(off_boot());
        r.flag.store(DropState::Yes);

        r.machine.handle(Event::PowerButtonPressed);
        assert_eq!(r.machine.state(), PowerState::WaitForPsPowerOk);
        assert!(r.machine.timers.is_armed(TimerName::PsPowerOkWatchdog));
        assert_eq!(r.flag.load(), DropState::No);
        // The physical button makes the electrical press; no pulse here.
        assert!(r.writes.borrow().is_empty());
    }

    #[tokio::test]
    async fn test_spontaneous_ps_power_ok_from_off() {
        let mut r = rig(off_boot());
        r.machine.handle(Event::PsPowerOkAssert);
        assert_eq!(r.machine.state(), PowerState::WaitForSioPowerGood);

        r.machine.handle(Event::SioPowerGoodAssert);
        assert_eq!(r.machine.state(), PowerState::On);
    }

    #[tokio::test]
    async fn test_status_projection_published_on_transition() {
        let queue = EventQueue::new();
        let gpio = FakeGpio::default();
        let state_dir = tempfile::tempdir().unwrap();
        let status = StatusBus::new();
        let mut rx = status.subscribe();

        let mut machine = PowerControl::new(
            off_boot(),
            OutputBank::new(Box::new(gpio)),
            TimerService::new(queue.sender()),
            Box::new(FakePch::default()),
            PowerDropFlag::new(state_dir.path()),
            status,
        );

        // Initial projection.
        assert_eq!(
            rx.recv().await.unwrap(),
            StatusEvent::PowerStateChanged {
                state: PowerState::Off,
                host: HostState::Off,
                chassis: ChassisState::Off,
            }
        );

        machine.handle(Event::PowerOnRequest);
        assert_eq!(
            rx.recv().await.unwrap(),
            StatusEvent::PowerStateChanged {
                state: PowerState::WaitForPsPowerOk,
                host: HostState::Off,
                chassis: ChassisState::Off,
            }
        );
    }

    #[tokio::test]
    async fn test_graceful_cycle_timeout_returns_to_on() {
        let mut r = rig(on_boot());
        r.machine.handle(Event::GracefulPowerCycleRequest);
        assert_eq!(r.machine.state(), PowerState::GracefulTransitionToCycleOff);

        fire(&mut r, TimerName::GracefulPowerOff);
        assert_eq!(r.machine.state(), PowerState::On);
    }

    #[tokio::test]
    async fn test_graceful_cycle_power_drop_enters_cycle_off() {
        let mut r = rig(on_boot());
        r.machine.handle(Event::GracefulPowerCycleRequest);

        r.machine.handle(Event::PsPowerOkDeAssert);
        assert_eq!(r.machine.state(), PowerState::CycleOff);
        assert!(r.machine.timers.is_armed(TimerName::PowerCycle));
        assert!(!r.machine.timers.is_armed(TimerName::GracefulPowerOff));
    }
}
