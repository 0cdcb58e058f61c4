//! GPIO line registry
//!
//! Lines are addressed by the symbolic name the device tree labels them
//! with; the registry scans every character device once at startup and
//! resolves each required name to a (chip, offset) pair. Inputs are
//! requested for both-edge events and feed the event queue from a monitor
//! task; outputs are requested transiently by the pulse engine.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

use futures::StreamExt;
use gpio_cdev::{
    chips, AsyncLineEventHandle, Chip, EventRequestFlags, EventType, LineHandle,
    LineRequestFlags,
};
use tracing::{debug, info, warn};

use crate::config::LineNames;
use crate::error::{PowerError, Result};
use crate::power::events::{Event, EventSender};
use crate::power::outputs::{OutputId, OutputPort, OutputSource};

/// Where a symbolic line name lives
#[derive(Debug, Clone)]
pub struct ResolvedLine {
    pub name: String,
    chip: PathBuf,
    offset: u32,
}

/// Startup resolver for every line the daemon touches
pub struct GpioRegistry {
    consumer: String,
    resolved: HashMap<String, ResolvedLine>,
}

impl GpioRegistry {
    /// Scan all GPIO chips and resolve each of `names`. Any missing line is
    /// a fatal startup error.
    pub fn resolve(consumer: &str, names: &LineNames) -> Result<Self> {
        let wanted: HashSet<&str> = [
            names.ps_pwrok.as_str(),
            names.sio_power_good.as_str(),
            names.sio_onctl.as_str(),
            names.sio_s5.as_str(),
            names.power_button.as_str(),
            names.reset_button.as_str(),
            names.nmi_button.as_str(),
            names.id_button.as_str(),
            names.post_complete.as_str(),
            names.power_out.as_str(),
            names.reset_out.as_str(),
        ]
        .into_iter()
        .collect();

        let mut resolved = HashMap::new();
        let iter = chips()
            .map_err(|e| PowerError::Startup(format!("cannot enumerate GPIO chips: {}", e)))?;
        for chip in iter {
            let mut chip = match chip {
                Ok(chip) => chip,
                Err(e) => {
                    warn!("skipping unreadable GPIO chip: {}", e);
                    continue;
                }
            };
            let path = chip.path().to_path_buf();
            for offset in 0..chip.num_lines() {
                let Ok(line) = chip.get_line(offset) else {
                    continue;
                };
                let Ok(line_info) = line.info() else {
                    continue;
                };
                let Some(name) = line_info.name() else {
                    continue;
                };
                if wanted.contains(name) && !resolved.contains_key(name) {
                    debug!(line = name, chip = %path.display(), offset, "resolved GPIO line");
                    resolved.insert(
                        name.to_string(),
                        ResolvedLine {
                            name: name.to_string(),
                            chip: path.clone(),
                            offset,
                        },
                    );
                }
            }
        }

        let missing: Vec<&str> = wanted
            .iter()
            .copied()
            .filter(|name| !resolved.contains_key(*name))
            .collect();
        if !missing.is_empty() {
            return Err(PowerError::Startup(format!(
                "GPIO lines not found: {}",
                missing.join(", ")
            )));
        }

        info!(lines = resolved.len(), "GPIO registry resolved");
        Ok(Self {
            consumer: consumer.to_string(),
            resolved,
        })
    }

    fn line(&self, name: &str) -> Result<&ResolvedLine> {
        self.resolved
            .get(name)
            .ok_or_else(|| PowerError::gpio(name, "line not resolved"))
    }

    /// Request `name` for both-edge events and spawn a monitor task mapping
    /// edges onto the given events. Returns the level at request time.
    pub fn monitor(
        &self,
        name: &str,
        events: EventSender,
        rising: Option<Event>,
        falling: Option<Event>,
    ) -> Result<u8> {
        let resolved = self.line(name)?;
        let mut chip =
            Chip::new(&resolved.chip).map_err(|e| PowerError::gpio(name, e))?;
        let line = chip
            .get_line(resolved.offset)
            .map_err(|e| PowerError::gpio(name, e))?;
        let handle = line
            .events(
                LineRequestFlags::INPUT,
                EventRequestFlags::BOTH_EDGES,
                &self.consumer,
            )
            .map_err(|e| PowerError::gpio(name, e))?;
        let initial = handle.get_value().map_err(|e| PowerError::gpio(name, e))?;
        let mut stream =
            AsyncLineEventHandle::new(handle).map_err(|e| PowerError::gpio(name, e))?;

        let label = name.to_string();
        tokio::spawn(async move {
            while let Some(item) = stream.next().await {
                match item {
                    Ok(edge) => {
                        let mapped = match edge.event_type() {
                            EventType::RisingEdge => rising,
                            EventType::FallingEdge => falling,
                        };
                        if let Some(event) = mapped {
                            debug!(line = %label, ?event, "edge");
                            events.send(event);
                        }
                    }
                    Err(e) => warn!(line = %label, "edge read failed: {}", e),
                }
            }
            warn!(line = %label, "edge monitor ended");
        });

        Ok(initial)
    }

    /// Output handle source for the pulse engine
    pub fn output_source(&self, names: &LineNames) -> Result<GpioOutputSource> {
        Ok(GpioOutputSource {
            consumer: self.consumer.clone(),
            power_out: self.line(&names.power_out)?.clone(),
            reset_out: self.line(&names.reset_out)?.clone(),
        })
    }
}

/// Requests POWER_OUT / RESET_OUT handles on demand
pub struct GpioOutputSource {
    consumer: String,
    power_out: ResolvedLine,
    reset_out: ResolvedLine,
}

impl OutputSource for GpioOutputSource {
    fn acquire(&mut self, id: OutputId, initial: u8) -> Result<Box<dyn OutputPort>> {
        let resolved = match id {
            OutputId::PowerOut => &self.power_out,
            OutputId::ResetOut => &self.reset_out,
        };
        let mut chip =
            Chip::new(&resolved.chip).map_err(|e| PowerError::gpio(&resolved.name, e))?;
        let line = chip
            .get_line(resolved.offset)
            .map_err(|e| PowerError::gpio(&resolved.name, e))?;
        let handle = line
            .request(LineRequestFlags::OUTPUT, initial, &self.consumer)
            .map_err(|e| PowerError::gpio(&resolved.name, e))?;
        Ok(Box::new(GpioOutputLine {
            name: resolved.name.clone(),
            handle,
        }))
    }
}

/// An owned output handle; drop releases the line back to the kernel
struct GpioOutputLine {
    name: String,
    handle: LineHandle,
}

impl OutputPort for GpioOutputLine {
    fn set(&mut self, value: u8) -> Result<()> {
        self.handle
            .set_value(value)
            .map_err(|e| PowerError::gpio(&self.name, e))
    }
}
