//! Configuration schema
//!
//! Platform wiring the daemon cannot discover on its own: GPIO line labels,
//! device node paths, and the state directory. Every field has a default
//! matching the reference platform so an absent config file is valid.

use serde::{Deserialize, Serialize};

/// Main daemon configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PowerConfig {
    /// GPIO line naming
    pub gpio: GpioConfig,
    /// LPC-SIO device access
    pub sio: SioConfig,
    /// PCH SMBus fallback
    pub pch: PchConfig,
    /// Directory holding persisted power state
    pub state_dir: String,
}

impl Default for PowerConfig {
    fn default() -> Self {
        Self {
            gpio: GpioConfig::default(),
            sio: SioConfig::default(),
            pch: PchConfig::default(),
            state_dir: "/var/lib/power-control".to_string(),
        }
    }
}

/// GPIO configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GpioConfig {
    /// Consumer label attached to requested lines
    pub consumer: String,
    /// Symbolic line names as labelled in the device tree
    pub lines: LineNames,
}

impl Default for GpioConfig {
    fn default() -> Self {
        Self {
            consumer: "host-powerd".to_string(),
            lines: LineNames::default(),
        }
    }
}

/// Kernel labels for every line the daemon monitors or drives
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LineNames {
    pub ps_pwrok: String,
    pub sio_power_good: String,
    pub sio_onctl: String,
    pub sio_s5: String,
    pub power_button: String,
    pub reset_button: String,
    pub nmi_button: String,
    pub id_button: String,
    pub post_complete: String,
    pub power_out: String,
    pub reset_out: String,
}

impl Default for LineNames {
    fn default() -> Self {
        Self {
            ps_pwrok: "PS_PWROK".to_string(),
            sio_power_good: "SIO_POWER_GOOD".to_string(),
            sio_onctl: "SIO_ONCONTROL".to_string(),
            sio_s5: "SIO_S5".to_string(),
            power_button: "POWER_BUTTON".to_string(),
            reset_button: "RESET_BUTTON".to_string(),
            nmi_button: "NMI_BUTTON".to_string(),
            id_button: "ID_BUTTON".to_string(),
            post_complete: "POST_COMPLETE".to_string(),
            power_out: "POWER_OUT".to_string(),
            reset_out: "RESET_OUT".to_string(),
        }
    }
}

/// LPC-SIO device configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SioConfig {
    /// Character device exposing the SIO ioctls
    pub device: String,
}

impl Default for SioConfig {
    fn default() -> Self {
        Self {
            device: "/dev/lpc-sio".to_string(),
        }
    }
}

/// PCH SMBus configuration
///
/// The slave address, command register and power-down command are part of
/// the platform contract and are fixed in [`crate::pch`]; only the adapter
/// node is configurable.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PchConfig {
    /// I2C adapter device node for the PCH bus
    pub i2c_device: String,
}

impl Default for PchConfig {
    fn default() -> Self {
        Self {
            i2c_device: "/dev/i2c-3".to_string(),
        }
    }
}
