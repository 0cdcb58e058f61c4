//! PCH SMBus power-down
//!
//! Last-resort force-off path: when the POWER_OUT hold expires with the
//! host still up, the platform controller hub accepts an unconditional
//! power-down command over SMBus.

use std::fs::OpenOptions;
use std::io::Write;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};

use tracing::info;

use crate::error::{PowerError, Result};

/// PCH SMBus slave address on the platform bus
pub const PCH_SLAVE_ADDRESS: i32 = 0x44;
/// Command register
pub const PCH_CMD_REGISTER: u8 = 0x00;
/// Unconditional power-down command
pub const PCH_POWER_DOWN_CMD: u8 = 0x02;

// Linux i2c-dev slave address selection
nix::ioctl_write_int_bad!(i2c_set_slave, 0x0703);

/// Something that can force the host down without GPIO
pub trait HostPowerDown {
    fn power_down(&mut self) -> Result<()>;
}

/// The PCH reached over an i2c-dev adapter node
pub struct PchDevice {
    path: PathBuf,
}

impl PchDevice {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
        }
    }
}

impl HostPowerDown for PchDevice {
    fn power_down(&mut self) -> Result<()> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&self.path)
            .map_err(|e| PowerError::I2c(format!("open {}: {}", self.path.display(), e)))?;

        unsafe { i2c_set_slave(file.as_raw_fd(), PCH_SLAVE_ADDRESS) }
            .map_err(|e| PowerError::I2c(format!("set slave 0x{:02x}: {}", PCH_SLAVE_ADDRESS, e)))?;

        file.write_all(&[PCH_CMD_REGISTER, PCH_POWER_DOWN_CMD])
            .map_err(|e| PowerError::I2c(format!("power-down write: {}", e)))?;

        info!("PCH power-down command sent");
        Ok(())
    }
}
