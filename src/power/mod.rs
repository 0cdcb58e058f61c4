//! Power sequencing core
//!
//! The state machine and its event fabric: the FIFO event queue, the named
//! one-shot timers, the masked/pulsed output discipline, and the AC-loss
//! restore policy.

pub mod events;
pub mod machine;
pub mod outputs;
pub mod restore;
pub mod state;
pub mod status;
pub mod timers;

pub use events::{Button, Event, EventQueue, EventSender};
pub use machine::{initial_state, BootConditions, PowerControl};
pub use outputs::{timing, OutputBank, OutputId};
pub use state::{ChassisState, HostState, PowerState};
pub use status::{StatusBus, StatusEvent};
pub use timers::{TimerName, TimerService};
