use std::path::{Path, PathBuf};

use clap::{Parser, ValueEnum};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use host_powerd::config;
use host_powerd::dbus;
use host_powerd::gpio::GpioRegistry;
use host_powerd::pch::PchDevice;
use host_powerd::persist::PowerDropFlag;
use host_powerd::power::{
    initial_state, BootConditions, Event, EventQueue, OutputBank, PowerControl, PowerState,
    StatusBus, TimerService,
};
use host_powerd::sio::SioDevice;

/// Log level for the daemon
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

/// host-powerd command line arguments
#[derive(Parser, Debug)]
#[command(name = "host-powerd")]
#[command(version, about = "Host power sequencing daemon", long_about = None)]
struct CliArgs {
    /// Path to the config file
    #[arg(short = 'c', long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// State directory (overrides config)
    #[arg(long, value_name = "DIR")]
    state_dir: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short = 'l', long, value_name = "LEVEL", default_value = "info")]
    log_level: LogLevel,

    /// Increase verbosity (-v for debug, -vv for trace)
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();
    init_logging(args.log_level, args.verbose);

    tracing::info!("Starting host-powerd v{}", env!("CARGO_PKG_VERSION"));

    let config_path = args
        .config
        .unwrap_or_else(|| PathBuf::from(config::DEFAULT_CONFIG_PATH));
    let mut config = config::load(&config_path)?;
    if let Some(dir) = args.state_dir {
        config.state_dir = dir.to_string_lossy().to_string();
    }

    // Event fabric: one FIFO queue into the machine, one status bus out.
    let mut queue = EventQueue::new();
    let events = queue.sender();
    let status = StatusBus::new();

    // Every required line must resolve; the supervisor restarts us on
    // failure.
    let registry = GpioRegistry::resolve(&config.gpio.consumer, &config.gpio.lines)?;
    let lines = &config.gpio.lines;

    let ps_power_ok_level = registry.monitor(
        &lines.ps_pwrok,
        events.clone(),
        Some(Event::PsPowerOkAssert),
        Some(Event::PsPowerOkDeAssert),
    )?;
    registry.monitor(
        &lines.sio_power_good,
        events.clone(),
        Some(Event::SioPowerGoodAssert),
        Some(Event::SioPowerGoodDeAssert),
    )?;
    registry.monitor(
        &lines.sio_onctl,
        events.clone(),
        Some(Event::SioOnControlDeAssert),
        Some(Event::SioOnControlAssert),
    )?;
    registry.monitor(
        &lines.sio_s5,
        events.clone(),
        Some(Event::SioS5DeAssert),
        Some(Event::SioS5Assert),
    )?;
    registry.monitor(
        &lines.power_button,
        events.clone(),
        Some(Event::PowerButtonReleased),
        Some(Event::PowerButtonPressed),
    )?;
    registry.monitor(
        &lines.reset_button,
        events.clone(),
        Some(Event::ResetButtonReleased),
        Some(Event::ResetButtonPressed),
    )?;
    registry.monitor(
        &lines.nmi_button,
        events.clone(),
        Some(Event::NmiButtonReleased),
        Some(Event::NmiButtonPressed),
    )?;
    registry.monitor(
        &lines.id_button,
        events.clone(),
        Some(Event::IdButtonReleased),
        Some(Event::IdButtonPressed),
    )?;
    let post_complete_level = registry.monitor(
        &lines.post_complete,
        events.clone(),
        Some(Event::PostCompleteDeAssert),
        Some(Event::PostCompleteAssert),
    )?;

    // SIO startup diagnostics; runtime SIO failures only degrade.
    let sio = SioDevice::new(Path::new(&config.sio.device));
    match sio.acpi_state() {
        Ok(state) => tracing::info!(acpi_state = state, "SIO ACPI state"),
        Err(e) => tracing::warn!("cannot read ACPI state: {}", e),
    }
    match sio.vrd_good() {
        Ok(good) => tracing::info!(vrd_good = good, "SIO VRD status"),
        Err(e) => tracing::warn!("cannot read VRD status: {}", e),
    }
    let ac_lost = sio.pfail_or(false);

    let boot = BootConditions {
        ps_power_ok: ps_power_ok_level != 0,
        ac_lost,
        os_standby: post_complete_level == 0,
    };
    let initial = initial_state(boot.ps_power_ok, boot.ac_lost);

    // Bus front end first so its subscriptions catch every transition the
    // machine publishes.
    let connection = dbus::serve(
        events.clone(),
        &status,
        dbus::InitialStatus {
            power: initial,
            os_standby: boot.os_standby,
        },
    )
    .await?;

    let outputs = OutputBank::new(Box::new(registry.output_source(lines)?));
    let timers = TimerService::new(events.clone());
    let pch = PchDevice::new(Path::new(&config.pch.i2c_device));
    let drop_flag = PowerDropFlag::new(Path::new(&config.state_dir));

    let mut machine = PowerControl::new(
        boot,
        outputs,
        timers,
        Box::new(pch),
        drop_flag.clone(),
        status,
    );

    // AC was lost and the host is off: hand off to the restore policy.
    if machine.state() == PowerState::AcLossOff {
        let restore_connection = connection.clone();
        let restore_events = events.clone();
        tokio::spawn(async move {
            dbus::run_restore_policy(restore_connection, drop_flag, restore_events).await;
        });
    }

    tracing::info!("host-powerd ready");

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            maybe_event = queue.next() => {
                match maybe_event {
                    Some(event) => machine.handle(event),
                    None => break,
                }
            }
            _ = &mut shutdown => {
                tracing::info!("Shutdown signal received");
                break;
            }
        }
    }

    machine.shutdown();
    drop(connection);
    tracing::info!("host-powerd shutdown complete");
    Ok(())
}

/// Initialize logging with tracing
fn init_logging(level: LogLevel, verbose_count: u8) {
    // Verbose count overrides log level
    let effective_level = match verbose_count {
        0 => level,
        1 => LogLevel::Debug,
        _ => LogLevel::Trace,
    };

    let filter = match effective_level {
        LogLevel::Error => "host_powerd=error",
        LogLevel::Warn => "host_powerd=warn",
        LogLevel::Info => "host_powerd=info",
        LogLevel::Debug => "host_powerd=debug",
        LogLevel::Trace => "host_powerd=trace",
    };

    // Environment variable takes highest priority
    let env_filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into());

    if let Err(err) = tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()
    {
        eprintln!("failed to initialize tracing: {}", err);
    }
}
