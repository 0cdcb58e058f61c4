//! Power states and their bus projection
//!
//! The machine's internal state set is richer than what the bus exposes;
//! each state projects deterministically onto a host state and a chassis
//! state.

use std::fmt;

/// Internal state of the power sequencer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerState {
    On,
    WaitForPsPowerOk,
    WaitForSioPowerGood,
    FailedTransitionToOn,
    Off,
    AcLossOff,
    TransitionToOff,
    GracefulTransitionToOff,
    CycleOff,
    TransitionToCycleOff,
    GracefulTransitionToCycleOff,
}

impl PowerState {
    /// Published host state for this power state
    pub fn host_state(self) -> HostState {
        match self {
            PowerState::On
            | PowerState::TransitionToOff
            | PowerState::GracefulTransitionToOff
            | PowerState::TransitionToCycleOff
            | PowerState::GracefulTransitionToCycleOff => HostState::Running,
            PowerState::WaitForPsPowerOk
            | PowerState::WaitForSioPowerGood
            | PowerState::FailedTransitionToOn
            | PowerState::Off
            | PowerState::CycleOff
            | PowerState::AcLossOff => HostState::Off,
        }
    }

    /// Published chassis state for this power state
    pub fn chassis_state(self) -> ChassisState {
        match self.host_state() {
            HostState::Running => ChassisState::On,
            HostState::Off => ChassisState::Off,
        }
    }
}

impl fmt::Display for PowerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PowerState::On => "On",
            PowerState::WaitForPsPowerOk => "WaitForPSPowerOK",
            PowerState::WaitForSioPowerGood => "WaitForSIOPowerGood",
            PowerState::FailedTransitionToOn => "FailedTransitionToOn",
            PowerState::Off => "Off",
            PowerState::AcLossOff => "AcLossOff",
            PowerState::TransitionToOff => "TransitionToOff",
            PowerState::GracefulTransitionToOff => "GracefulTransitionToOff",
            PowerState::CycleOff => "CycleOff",
            PowerState::TransitionToCycleOff => "TransitionToCycleOff",
            PowerState::GracefulTransitionToCycleOff => "GracefulTransitionToCycleOff",
        };
        f.write_str(name)
    }
}

/// Host state as published on the bus
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostState {
    Running,
    Off,
}

impl HostState {
    /// Bus enumeration value
    pub fn bus_value(self) -> &'static str {
        match self {
            HostState::Running => "xyz.openbmc_project.State.Host.HostState.Running",
            HostState::Off => "xyz.openbmc_project.State.Host.HostState.Off",
        }
    }
}

/// Chassis state as published on the bus
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChassisState {
    On,
    Off,
}

impl ChassisState {
    /// Bus enumeration value
    pub fn bus_value(self) -> &'static str {
        match self {
            ChassisState::On => "xyz.openbmc_project.State.Chassis.PowerState.On",
            ChassisState::Off => "xyz.openbmc_project.State.Chassis.PowerState.Off",
        }
    }
}
