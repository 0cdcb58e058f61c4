//! Power-restore settings consumers
//!
//! The restore policy and delay live on the settings service and may not be
//! published yet when the daemon starts; in that case the first
//! property-change signal supplies the value, and the subscription is
//! dropped after one application.

use std::sync::atomic::{AtomicBool, Ordering};

use futures::StreamExt;
use tracing::{debug, info, warn};
use zbus::{proxy, Connection};

use crate::persist::{DropState, PowerDropFlag};
use crate::power::restore::{self, RestorePolicy};
use crate::power::{Event, EventSender};

#[proxy(
    interface = "xyz.openbmc_project.Control.Power.RestorePolicy",
    default_service = "xyz.openbmc_project.Settings",
    default_path = "/xyz/openbmc_project/control/host0/power_restore_policy"
)]
trait RestorePolicySetting {
    #[zbus(property)]
    fn power_restore_policy(&self) -> zbus::Result<String>;
}

#[proxy(
    interface = "xyz.openbmc_project.Control.Power.RestoreDelay",
    default_service = "xyz.openbmc_project.Settings",
    default_path = "/xyz/openbmc_project/control/power_restore_delay"
)]
trait RestoreDelaySetting {
    #[zbus(property)]
    fn power_restore_delay(&self) -> zbus::Result<u64>;
}

/// Evaluate the power restore policy once after an AC-loss boot. A second
/// invocation returns immediately.
pub async fn run_restore_policy(
    connection: Connection,
    drop_flag: PowerDropFlag,
    events: EventSender,
) {
    static APPLIED: AtomicBool = AtomicBool::new(false);
    if APPLIED.swap(true, Ordering::SeqCst) {
        debug!("power restore policy already evaluated");
        return;
    }

    let configured = read_delay(&connection).await;
    let uptime = restore::system_uptime_secs().unwrap_or_else(|e| {
        warn!("cannot read system uptime: {}", e);
        0
    });
    let delay = restore::restore_delay(configured, uptime);
    info!(
        configured,
        uptime,
        delay_secs = delay.as_secs(),
        "waiting before applying power restore policy"
    );
    tokio::time::sleep(delay).await;

    let policy = read_policy(&connection).await;
    let dropped = drop_flag.load() == DropState::Yes;
    if restore::should_power_on(policy, dropped) {
        info!(?policy, dropped, "power restore policy requests power-on");
        events.send(Event::PowerOnRequest);
    } else {
        info!(?policy, dropped, "power restore policy leaves host off");
    }
}

async fn read_delay(connection: &Connection) -> u64 {
    let proxy = match RestoreDelaySettingProxy::new(connection).await {
        Ok(proxy) => proxy,
        Err(e) => {
            warn!("restore delay proxy unavailable: {}", e);
            return 0;
        }
    };
    if let Ok(delay) = proxy.power_restore_delay().await {
        return delay;
    }

    info!("restore delay not yet published, waiting for first value");
    let mut stream = proxy.receive_power_restore_delay_changed().await;
    while let Some(change) = stream.next().await {
        if let Ok(delay) = change.get().await {
            return delay;
        }
    }
    warn!("restore delay signal stream ended, using no delay");
    0
}

async fn read_policy(connection: &Connection) -> RestorePolicy {
    let proxy = match RestorePolicySettingProxy::new(connection).await {
        Ok(proxy) => proxy,
        Err(e) => {
            warn!("restore policy proxy unavailable: {}", e);
            return RestorePolicy::AlwaysOff;
        }
    };
    if let Some(policy) = proxy
        .power_restore_policy()
        .await
        .ok()
        .and_then(|value| RestorePolicy::parse(&value))
    {
        return policy;
    }

    info!("restore policy not yet published, waiting for first value");
    let mut stream = proxy.receive_power_restore_policy_changed().await;
    while let Some(change) = stream.next().await {
        if let Ok(value) = change.get().await {
            match RestorePolicy::parse(&value) {
                Some(policy) => return policy,
                None => warn!(%value, "unrecognized restore policy value"),
            }
        }
    }
    warn!("restore policy signal stream ended, leaving host off");
    RestorePolicy::AlwaysOff
}
