//! Daemon configuration
//!
//! A small JSON file read once at startup. A missing file yields the
//! built-in defaults; a malformed file is a startup error.

mod schema;

pub use schema::{GpioConfig, LineNames, PchConfig, PowerConfig, SioConfig};

use std::path::Path;

use tracing::info;

use crate::error::{PowerError, Result};

/// Default location of the config file
pub const DEFAULT_CONFIG_PATH: &str = "/etc/host-powerd/config.json";

/// Load the configuration from `path`, falling back to defaults when the
/// file does not exist.
pub fn load(path: &Path) -> Result<PowerConfig> {
    if !path.exists() {
        info!("No config file at {}, using defaults", path.display());
        return Ok(PowerConfig::default());
    }

    let raw = std::fs::read_to_string(path)?;
    let config = serde_json::from_str(&raw).map_err(|e| {
        PowerError::Startup(format!("malformed config {}: {}", path.display(), e))
    })?;
    info!("Loaded config from {}", path.display());
    Ok(config)
}
