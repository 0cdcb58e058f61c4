//! AC-loss power restore policy
//!
//! After an AC loss the platform may be configured to bring the host back
//! automatically. The configured delay counts from when mains returned, so
//! the firmware boot time and the daemon's own startup latency are
//! subtracted before waiting.

use std::time::Duration;

use crate::error::{PowerError, Result};

/// Seconds the boot firmware takes before Linux starts counting uptime
pub const UBOOT_BOOT_SECONDS: u64 = 20;

/// Configured behavior after mains power returns
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestorePolicy {
    AlwaysOn,
    Restore,
    AlwaysOff,
}

impl RestorePolicy {
    /// Parse the bus enumeration value. Accepts the fully qualified form
    /// published by the settings service.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "xyz.openbmc_project.Control.Power.RestorePolicy.Policy.AlwaysOn" => {
                Some(RestorePolicy::AlwaysOn)
            }
            "xyz.openbmc_project.Control.Power.RestorePolicy.Policy.Restore" => {
                Some(RestorePolicy::Restore)
            }
            "xyz.openbmc_project.Control.Power.RestorePolicy.Policy.AlwaysOff" => {
                Some(RestorePolicy::AlwaysOff)
            }
            _ => None,
        }
    }
}

/// How long to wait before applying the policy:
/// max(0, configured − firmware boot time − elapsed uptime)
pub fn restore_delay(configured_secs: u64, uptime_secs: u64) -> Duration {
    Duration::from_secs(configured_secs.saturating_sub(UBOOT_BOOT_SECONDS + uptime_secs))
}

/// Whether the policy asks for a power-on given the persisted drop flag
pub fn should_power_on(policy: RestorePolicy, power_was_dropped: bool) -> bool {
    match policy {
        RestorePolicy::AlwaysOn => true,
        RestorePolicy::Restore => power_was_dropped,
        RestorePolicy::AlwaysOff => false,
    }
}

/// Seconds since kernel boot, from `/proc/uptime`
pub fn system_uptime_secs() -> Result<u64> {
    let raw = std::fs::read_to_string("/proc/uptime")?;
    let first = raw
        .split_whitespace()
        .next()
        .ok_or_else(|| PowerError::Startup("empty /proc/uptime".to_string()))?;
    let seconds: f64 = first
        .parse()
        .map_err(|e| PowerError::Startup(format!("bad /proc/uptime: {}", e)))?;
    Ok(seconds as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bus_values() {
        assert_eq!(
            RestorePolicy::parse("xyz.openbmc_project.Control.Power.RestorePolicy.Policy.AlwaysOn"),
            Some(RestorePolicy::AlwaysOn)
        );
        assert_eq!(
            RestorePolicy::parse("xyz.openbmc_project.Control.Power.RestorePolicy.Policy.Restore"),
            Some(RestorePolicy::Restore)
        );
        assert_eq!(
            RestorePolicy::parse(
                "xyz.openbmc_project.Control.Power.RestorePolicy.Policy.AlwaysOff"
            ),
            Some(RestorePolicy::AlwaysOff)
        );
        assert_eq!(RestorePolicy::parse("AlwaysOn"), None);
    }

    #[test]
    fn test_restore_delay_subtracts_boot_time() {
        // 30 s configured, 5 s uptime, 20 s firmware: wait the 5 remaining.
        assert_eq!(restore_delay(30, 5), Duration::from_secs(5));
    }

    #[test]
    fn test_restore_delay_clamps_to_zero() {
        assert_eq!(restore_delay(10, 5), Duration::ZERO);
        assert_eq!(restore_delay(0, 0), Duration::ZERO);
        assert_eq!(restore_delay(25, 600), Duration::ZERO);
    }

    #[test]
    fn test_should_power_on_matrix() {
        assert!(should_power_on(RestorePolicy::AlwaysOn, false));
        assert!(should_power_on(RestorePolicy::AlwaysOn, true));
        assert!(!should_power_on(RestorePolicy::Restore, false));
        assert!(should_power_on(RestorePolicy::Restore, true));
        assert!(!should_power_on(RestorePolicy::AlwaysOff, false));
        assert!(!should_power_on(RestorePolicy::AlwaysOff, true));
    }

    #[test]
    fn test_system_uptime_reads() {
        // /proc/uptime is always present on the platforms this runs on.
        assert!(system_uptime_secs().is_ok());
    }
}
