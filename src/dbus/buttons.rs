//! Front-panel button objects
//!
//! `/xyz/openbmc_project/chassis/buttons/{power,reset,nmi,id}`: a live
//! `ButtonPressed` property per button and a writable `ButtonMasked` that is
//! forwarded to the mask manager. The ID button has no mask.

use tokio::sync::broadcast;
use tracing::{info, warn};
use zbus::{interface, Connection};

use crate::power::{Button, Event, EventSender, StatusEvent};

/// Object path for one button
pub fn button_path(button: Button) -> String {
    format!("/xyz/openbmc_project/chassis/buttons/{}", button.name())
}

pub struct ButtonObject {
    button: Button,
    events: EventSender,
    pressed: bool,
    masked: bool,
}

impl ButtonObject {
    pub fn new(button: Button, events: EventSender) -> Self {
        Self {
            button,
            events,
            pressed: false,
            masked: false,
        }
    }
}

#[interface(name = "xyz.openbmc_project.Chassis.Buttons")]
impl ButtonObject {
    #[zbus(property)]
    fn button_pressed(&self) -> bool {
        self.pressed
    }

    #[zbus(property)]
    fn button_masked(&self) -> bool {
        self.masked
    }

    #[zbus(property)]
    fn set_button_masked(&mut self, value: bool) -> zbus::fdo::Result<()> {
        if self.button == Button::Id {
            return Err(zbus::fdo::Error::NotSupported(
                "ID button has no mask".to_string(),
            ));
        }
        if self.masked == value {
            return Ok(());
        }
        info!(button = self.button.name(), masked = value, "button mask requested");
        self.masked = value;
        self.events.send(Event::SetButtonMask {
            button: self.button,
            masked: value,
        });
        Ok(())
    }
}

/// Republish panel activity as `ButtonPressed` on the four objects
pub async fn publish(
    connection: Connection,
    mut status: broadcast::Receiver<StatusEvent>,
) -> zbus::Result<()> {
    let server = connection.object_server();
    let power = server
        .interface::<_, ButtonObject>(button_path(Button::Power).as_str())
        .await?;
    let reset = server
        .interface::<_, ButtonObject>(button_path(Button::Reset).as_str())
        .await?;
    let nmi = server
        .interface::<_, ButtonObject>(button_path(Button::Nmi).as_str())
        .await?;
    let id = server
        .interface::<_, ButtonObject>(button_path(Button::Id).as_str())
        .await?;

    loop {
        match status.recv().await {
            Ok(StatusEvent::ButtonActivity { button, pressed }) => {
                let iface = match button {
                    Button::Power => &power,
                    Button::Reset => &reset,
                    Button::Nmi => &nmi,
                    Button::Id => &id,
                };
                let mut object = iface.get_mut().await;
                object.pressed = pressed;
                object.button_pressed_changed(iface.signal_context()).await?;
            }
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(n)) => {
                warn!("button publisher lagged by {} events", n);
            }
            Err(broadcast::error::RecvError::Closed) => return Ok(()),
        }
    }
}
