//! Chassis state object
//!
//! `/xyz/openbmc_project/state/chassis0`: hard power transitions and the
//! chassis power projection.

use tokio::sync::broadcast;
use tracing::{info, warn};
use zbus::{interface, Connection};

use crate::power::{ChassisState, Event, EventSender, StatusEvent};

pub const CHASSIS_PATH: &str = "/xyz/openbmc_project/state/chassis0";

const TRANSITION_ON: &str = "xyz.openbmc_project.State.Chassis.Transition.On";
const TRANSITION_OFF: &str = "xyz.openbmc_project.State.Chassis.Transition.Off";
const TRANSITION_POWER_CYCLE: &str = "xyz.openbmc_project.State.Chassis.Transition.PowerCycle";
const TRANSITION_RESET: &str = "xyz.openbmc_project.State.Chassis.Transition.Reset";

/// Map a requested chassis transition onto a machine event
pub fn request_event(value: &str) -> Option<Event> {
    match value {
        TRANSITION_ON => Some(Event::PowerOnRequest),
        TRANSITION_OFF => Some(Event::PowerOffRequest),
        TRANSITION_POWER_CYCLE => Some(Event::PowerCycleRequest),
        TRANSITION_RESET => Some(Event::ResetRequest),
        _ => None,
    }
}

pub struct ChassisStateObject {
    events: EventSender,
    current: String,
    requested: String,
}

impl ChassisStateObject {
    pub fn new(events: EventSender, initial: ChassisState) -> Self {
        Self {
            events,
            current: initial.bus_value().to_string(),
            requested: TRANSITION_OFF.to_string(),
        }
    }
}

#[interface(name = "xyz.openbmc_project.State.Chassis")]
impl ChassisStateObject {
    #[zbus(property)]
    fn current_power_state(&self) -> String {
        self.current.clone()
    }

    #[zbus(property)]
    fn requested_power_transition(&self) -> String {
        self.requested.clone()
    }

    #[zbus(property)]
    fn set_requested_power_transition(&mut self, value: String) -> zbus::fdo::Result<()> {
        let Some(event) = request_event(&value) else {
            return Err(zbus::fdo::Error::InvalidArgs(format!(
                "unknown chassis transition: {value}"
            )));
        };
        info!(%value, "chassis transition requested");
        self.events.send(event);
        self.requested = value;
        Ok(())
    }
}

/// Republish power state changes as `CurrentPowerState`
pub async fn publish(
    connection: Connection,
    mut status: broadcast::Receiver<StatusEvent>,
) -> zbus::Result<()> {
    let iface = connection
        .object_server()
        .interface::<_, ChassisStateObject>(CHASSIS_PATH)
        .await?;
    loop {
        match status.recv().await {
            Ok(StatusEvent::PowerStateChanged { chassis, .. }) => {
                let mut object = iface.get_mut().await;
                object.current = chassis.bus_value().to_string();
                object
                    .current_power_state_changed(iface.signal_context())
                    .await?;
            }
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(n)) => {
                warn!("chassis state publisher lagged by {} events", n);
            }
            Err(broadcast::error::RecvError::Closed) => return Ok(()),
        }
    }
}
