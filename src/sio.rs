//! LPC-SIO device access
//!
//! Thin ioctl wrapper over `/dev/lpc-sio`. The device is opened per query;
//! open or ioctl failures are reported to the caller, which substitutes a
//! safe default. Nothing here is fatal at runtime.

use std::fs::OpenOptions;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::error::{PowerError, Result};

const SIO_GET_ACPI_STATE: u16 = 0;
const SIO_GET_PWRGD_STATUS: u16 = 1;
const SIO_GET_PFAIL_STATUS: u16 = 5;

/// Exchange record of the SIO ioctl, mirroring the kernel layout
#[repr(C)]
#[derive(Default)]
struct SioIoctlData {
    sio_cmd: u16,
    param: u16,
    data: u32,
}

const SIO_IOC_BASE: u8 = b'P';
nix::ioctl_readwrite!(sio_ioc_command, SIO_IOC_BASE, 1, SioIoctlData);

/// Handle to the LPC-SIO status device
pub struct SioDevice {
    path: PathBuf,
}

impl SioDevice {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
        }
    }

    fn query(&self, cmd: u16) -> Result<u32> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&self.path)
            .map_err(|e| PowerError::Sio(format!("open {}: {}", self.path.display(), e)))?;

        let mut data = SioIoctlData {
            sio_cmd: cmd,
            param: 0,
            data: 0,
        };
        unsafe { sio_ioc_command(file.as_raw_fd(), &mut data) }
            .map_err(|e| PowerError::Sio(format!("ioctl cmd {}: {}", cmd, e)))?;
        Ok(data.data)
    }

    /// Current ACPI state reported by the SIO
    pub fn acpi_state(&self) -> Result<u32> {
        self.query(SIO_GET_ACPI_STATE)
    }

    /// Voltage-regulator power-good status
    pub fn vrd_good(&self) -> Result<bool> {
        Ok(self.query(SIO_GET_PWRGD_STATUS)? != 0)
    }

    /// Whether mains power was lost before this boot
    pub fn pfail(&self) -> Result<bool> {
        Ok(self.query(SIO_GET_PFAIL_STATUS)? != 0)
    }

    /// `pfail` with the runtime degrade applied: failures log and read as
    /// `default`.
    pub fn pfail_or(&self, default: bool) -> bool {
        match self.pfail() {
            Ok(pfail) => pfail,
            Err(e) => {
                warn!("cannot read Pfail status, assuming {}: {}", default, e);
                default
            }
        }
    }
}
