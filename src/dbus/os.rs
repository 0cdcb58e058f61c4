//! Operating system status object
//!
//! `/xyz/openbmc_project/state/os`: reflects the POST_COMPLETE line as the
//! OS standby / inactive status.

use tokio::sync::broadcast;
use tracing::warn;
use zbus::{interface, Connection};

use crate::power::StatusEvent;

pub const OS_PATH: &str = "/xyz/openbmc_project/state/os";

const OS_STANDBY: &str = "xyz.openbmc_project.State.OperatingSystem.Status.OSStatus.Standby";
const OS_INACTIVE: &str = "xyz.openbmc_project.State.OperatingSystem.Status.OSStatus.Inactive";

/// Bus value for the given POST_COMPLETE standby level
pub fn os_state_value(standby: bool) -> &'static str {
    if standby {
        OS_STANDBY
    } else {
        OS_INACTIVE
    }
}

pub struct OsStateObject {
    state: String,
}

impl OsStateObject {
    pub fn new(standby: bool) -> Self {
        Self {
            state: os_state_value(standby).to_string(),
        }
    }
}

#[interface(name = "xyz.openbmc_project.State.OperatingSystem.Status")]
impl OsStateObject {
    #[zbus(property)]
    fn operating_system_state(&self) -> String {
        self.state.clone()
    }
}

/// Republish POST_COMPLETE changes as `OperatingSystemState`
pub async fn publish(
    connection: Connection,
    mut status: broadcast::Receiver<StatusEvent>,
) -> zbus::Result<()> {
    let iface = connection
        .object_server()
        .interface::<_, OsStateObject>(OS_PATH)
        .await?;
    loop {
        match status.recv().await {
            Ok(StatusEvent::OsStateChanged { standby }) => {
                let mut object = iface.get_mut().await;
                object.state = os_state_value(standby).to_string();
                object
                    .operating_system_state_changed(iface.signal_context())
                    .await?;
            }
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(n)) => {
                warn!("OS state publisher lagged by {} events", n);
            }
            Err(broadcast::error::RecvError::Closed) => return Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_os_state_values() {
        assert_eq!(
            os_state_value(true),
            "xyz.openbmc_project.State.OperatingSystem.Status.OSStatus.Standby"
        );
        assert_eq!(
            os_state_value(false),
            "xyz.openbmc_project.State.OperatingSystem.Status.OSStatus.Inactive"
        );
    }
}
