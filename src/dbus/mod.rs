//! System message bus adapters
//!
//! Pure translation: inbound property writes become machine events, status
//! bus notifications become property updates. No policy lives here.

mod buttons;
mod chassis;
mod host;
mod os;
mod settings;

pub use settings::run_restore_policy;

use tracing::{info, warn};
use zbus::{connection::Builder, Connection};

use crate::error::{PowerError, Result};
use crate::power::{Button, EventSender, PowerState, StatusBus};

const HOST_BUS_NAME: &str = "xyz.openbmc_project.State.Host";
const CHASSIS_BUS_NAME: &str = "xyz.openbmc_project.State.Chassis";
const OS_BUS_NAME: &str = "xyz.openbmc_project.State.OperatingSystem";
const BUTTONS_BUS_NAME: &str = "xyz.openbmc_project.Chassis.Buttons";

/// Property values served before the first status event arrives
#[derive(Debug, Clone, Copy)]
pub struct InitialStatus {
    pub power: PowerState,
    pub os_standby: bool,
}

fn setup_err(e: zbus::Error) -> PowerError {
    PowerError::Startup(format!("bus setup: {}", e))
}

/// Connect to the system bus, serve every object, request the well-known
/// names, and spawn the property publishers.
pub async fn serve(
    events: EventSender,
    status: &StatusBus,
    initial: InitialStatus,
) -> Result<Connection> {
    let connection = Builder::system()
        .map_err(setup_err)?
        .name(HOST_BUS_NAME)
        .map_err(setup_err)?
        .name(CHASSIS_BUS_NAME)
        .map_err(setup_err)?
        .name(OS_BUS_NAME)
        .map_err(setup_err)?
        .name(BUTTONS_BUS_NAME)
        .map_err(setup_err)?
        .serve_at(
            host::HOST_PATH,
            host::HostStateObject::new(events.clone(), initial.power.host_state()),
        )
        .map_err(setup_err)?
        .serve_at(
            chassis::CHASSIS_PATH,
            chassis::ChassisStateObject::new(events.clone(), initial.power.chassis_state()),
        )
        .map_err(setup_err)?
        .serve_at(os::OS_PATH, os::OsStateObject::new(initial.os_standby))
        .map_err(setup_err)?
        .serve_at(
            buttons::button_path(Button::Power).as_str(),
            buttons::ButtonObject::new(Button::Power, events.clone()),
        )
        .map_err(setup_err)?
        .serve_at(
            buttons::button_path(Button::Reset).as_str(),
            buttons::ButtonObject::new(Button::Reset, events.clone()),
        )
        .map_err(setup_err)?
        .serve_at(
            buttons::button_path(Button::Nmi).as_str(),
            buttons::ButtonObject::new(Button::Nmi, events.clone()),
        )
        .map_err(setup_err)?
        .serve_at(
            buttons::button_path(Button::Id).as_str(),
            buttons::ButtonObject::new(Button::Id, events),
        )
        .map_err(setup_err)?
        .build()
        .await
        .map_err(setup_err)?;

    spawn_publisher("host", host::publish(connection.clone(), status.subscribe()));
    spawn_publisher(
        "chassis",
        chassis::publish(connection.clone(), status.subscribe()),
    );
    spawn_publisher("os", os::publish(connection.clone(), status.subscribe()));
    spawn_publisher(
        "buttons",
        buttons::publish(connection.clone(), status.subscribe()),
    );

    info!("bus objects registered");
    Ok(connection)
}

fn spawn_publisher(
    name: &'static str,
    task: impl std::future::Future<Output = zbus::Result<()>> + Send + 'static,
) {
    tokio::spawn(async move {
        if let Err(e) = task.await {
            warn!("{} publisher stopped: {}", name, e);
        }
    });
}
