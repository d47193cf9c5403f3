// src/lib.rs
//
// serial-bridge: forwards newline-delimited JSON from a serial device to an
// MQTT topic or an HTTP telemetry API, and MQTT commands back to the device.
// One device and one mode per process.

pub mod bridge;
pub mod cli;
pub mod codec;
pub mod error;
pub mod io;
pub mod logging;
pub mod retry;
pub mod settings;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use bridge::{Bridge, INBOUND_CAPACITY};
use cli::Cli;
use error::{BridgeError, ConfigError};
use io::mqtt::{MqttConfig, MqttDirection, MqttSession};
use io::serial::{list_serial_ports, LinkManager, PortOpener, SystemPortOpener};
use io::telemetry::{TelemetryClient, TelemetryConfig};
use settings::{Mode, RunConfig};

/// Run the selected mode to completion and map the outcome to an exit code.
pub async fn run(cli: Cli) -> ExitCode {
    let (config, settings_path) = match load_config(&cli) {
        Ok(loaded) => loaded,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = logging::init(&config.log) {
        eprintln!("Error: {}", BridgeError::Logging(e));
        return ExitCode::FAILURE;
    }
    if let Some(path) = settings_path {
        info!("Loaded settings from {}", path.display());
    }

    exit_code(execute_with(config, Arc::new(SystemPortOpener)).await)
}

/// Map a run outcome to the process exit code. A failure is reported here
/// and nowhere else.
pub fn exit_code(result: Result<(), BridgeError>) -> ExitCode {
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn load_config(cli: &Cli) -> Result<(RunConfig, Option<PathBuf>), ConfigError> {
    let (file, path) = settings::load_settings(cli.config.as_deref())?;
    Ok((RunConfig::resolve(cli, &file)?, path))
}

/// Run a resolved configuration, opening devices through `opener`.
pub async fn execute_with(
    config: RunConfig,
    opener: Arc<dyn PortOpener>,
) -> Result<(), BridgeError> {
    if let Mode::ListPorts = config.mode {
        return list_ports();
    }

    let cancel = CancellationToken::new();
    spawn_signal_listener(cancel.clone());

    let serial = config.serial;
    let manager = LinkManager::new(serial.resolver, opener, serial.link, serial.policy);
    let mut bridge = Bridge::new(manager, cancel);
    info!("Starting {} bridge", config.mode.name());

    let result = match config.mode {
        Mode::Publish { mqtt, pacing } => run_publish(&mut bridge, mqtt, pacing).await,
        Mode::Subscribe { mqtt } => run_subscribe(&mut bridge, mqtt).await,
        Mode::Http { telemetry, pacing } => run_http(&mut bridge, telemetry, pacing).await,
        Mode::ListPorts => Ok(()),
    };
    // No-op if the mode already shut down with its sink.
    bridge.shutdown(None).await;
    result
}

// ============================================================================
// Modes
// ============================================================================

/// Connect to the broker, giving up early on shutdown. `Ok(None)` means
/// shutdown was requested.
async fn connect_bus(
    bridge: &Bridge,
    mqtt: MqttConfig,
    direction: MqttDirection,
) -> Result<Option<MqttSession>, BridgeError> {
    info!("Connecting to MQTT broker at {}", mqtt.broker());
    let cancel = bridge.cancel_token();
    tokio::select! {
        _ = cancel.cancelled() => Ok(None),
        session = MqttSession::connect(mqtt, direction) => Ok(Some(session?)),
    }
}

async fn run_publish(
    bridge: &mut Bridge,
    mqtt: MqttConfig,
    pacing: Duration,
) -> Result<(), BridgeError> {
    if !bridge.connect().await? {
        return Ok(());
    }
    let Some(session) = connect_bus(bridge, mqtt, MqttDirection::Publish).await? else {
        return Ok(());
    };
    let result = bridge.run_outbound(&session, pacing).await;
    bridge.shutdown(Some(&session)).await;
    result
}

async fn run_subscribe(bridge: &mut Bridge, mqtt: MqttConfig) -> Result<(), BridgeError> {
    if !bridge.connect().await? {
        return Ok(());
    }
    let (tx, mut rx) = mpsc::channel(INBOUND_CAPACITY);
    let Some(session) = connect_bus(bridge, mqtt, MqttDirection::Subscribe(tx)).await? else {
        return Ok(());
    };
    let result = bridge.run_inbound(&mut rx).await;
    bridge.shutdown(Some(&session)).await;
    result
}

async fn run_http(
    bridge: &mut Bridge,
    telemetry: TelemetryConfig,
    pacing: Duration,
) -> Result<(), BridgeError> {
    // Token and client problems are reported before the device is touched.
    let client = TelemetryClient::new(&telemetry)?;
    info!("Posting telemetry to {}", client.endpoint());
    if !bridge.connect().await? {
        return Ok(());
    }
    let result = bridge.run_outbound(&client, pacing).await;
    bridge.shutdown(Some(&client)).await;
    result
}

fn list_ports() -> Result<(), BridgeError> {
    let ports = list_serial_ports().map_err(BridgeError::PortList)?;
    if ports.is_empty() {
        println!("No serial ports found");
    }
    for port in ports {
        println!("{}", port);
    }
    Ok(())
}

// ============================================================================
// Signals
// ============================================================================

fn spawn_signal_listener(cancel: CancellationToken) {
    tokio::spawn(async move {
        tokio::select! {
            _ = cancel.cancelled() => {}
            _ = wait_for_signal() => {
                info!("Interrupt received, shutting down");
                cancel.cancel();
            }
        }
    });
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            tokio::select! {
                _ = ctrl_c() => {}
                _ = term.recv() => {}
            }
        }
        Err(e) => {
            warn!("SIGTERM handler unavailable: {}", e);
            ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    ctrl_c().await;
}

/// Resolves on Ctrl-C; never resolves if the handler cannot be installed.
async fn ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Ctrl-C handler unavailable: {}", e);
        std::future::pending::<()>().await;
    }
}
