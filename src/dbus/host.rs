//! Host state object
//!
//! `/xyz/openbmc_project/state/host0`: the writable requested transition is
//! translated into machine events; the current state mirrors the power
//! state projection.

use tokio::sync::broadcast;
use tracing::{info, warn};
use zbus::{interface, Connection};

use crate::power::{Event, EventSender, HostState, StatusEvent};

pub const HOST_PATH: &str = "/xyz/openbmc_project/state/host0";

const TRANSITION_ON: &str = "xyz.openbmc_project.State.Host.Transition.On";
const TRANSITION_OFF: &str = "xyz.openbmc_project.State.Host.Transition.Off";
const TRANSITION_REBOOT: &str = "xyz.openbmc_project.State.Host.Transition.Reboot";

/// Map a requested host transition onto a machine event
pub fn request_event(value: &str) -> Option<Event> {
    match value {
        TRANSITION_ON => Some(Event::PowerOnRequest),
        TRANSITION_OFF => Some(Event::GracefulPowerOffRequest),
        TRANSITION_REBOOT => Some(Event::GracefulPowerCycleRequest),
        _ => None,
    }
}

pub struct HostStateObject {
    events: EventSender,
    current: String,
    requested: String,
}

impl HostStateObject {
    pub fn new(events: EventSender, initial: HostState) -> Self {
        Self {
            events,
            current: initial.bus_value().to_string(),
            requested: TRANSITION_OFF.to_string(),
        }
    }
}

#[interface(name = "xyz.openbmc_project.State.Host")]
impl HostStateObject {
    #[zbus(property)]
    fn current_host_state(&self) -> String {
        self.current.clone()
    }

    #[zbus(property)]
    fn requested_host_transition(&self) -> String {
        self.requested.clone()
    }

    #[zbus(property)]
    fn set_requested_host_transition(&mut self, value: String) -> zbus::fdo::Result<()> {
        let Some(event) = request_event(&value) else {
            return Err(zbus::fdo::Error::InvalidArgs(format!(
                "unknown host transition: {value}"
            )));
        };
        info!(%value, "host transition requested");
        self.events.send(event);
        self.requested = value;
        Ok(())
    }
}

/// Republish power state changes as `CurrentHostState`
pub async fn publish(
    connection: Connection,
    mut status: broadcast::Receiver<StatusEvent>,
) -> zbus::Result<()> {
    let iface = connection
        .object_server()
        .interface::<_, HostStateObject>(HOST_PATH)
        .await?;
    loop {
        match status.recv().await {
            Ok(StatusEvent::PowerStateChanged { host, .. }) => {
                let mut object = iface.get_mut().await;
                object.current = host.bus_value().to_string();
                object
                    .current_host_state_changed(iface.signal_context())
                    .await?;
            }
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(n)) => {
                warn!("host state publisher lagged by {} events", n);
            }
            Err(broadcast::error::RecvError::Closed) => return Ok(()),
        }
    }
}
