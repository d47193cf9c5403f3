// src/settings.rs
//
// Settings file and run configuration.
//
// Layering, highest first: command line / environment, settings file,
// built-in defaults. `RunConfig::resolve` merges the layers and validates the
// result so every startup error is reported before the device is touched.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cli::{Cli, Command, HttpArgs, MqttArgs, SerialArgs};
use crate::error::ConfigError;
use crate::io::mqtt::MqttConfig;
use crate::io::serial::{LinkSettings, Parity, PortResolver, DEFAULT_PORT_PATTERNS};
use crate::io::telemetry::{token_is_usable, TelemetryConfig};
use crate::retry::RetryPolicy;

const SETTINGS_DIR: &str = "serial-bridge";
const SETTINGS_FILE: &str = "config.toml";

// ============================================================================
// Settings file
// ============================================================================

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct BridgeSettings {
    #[serde(default)]
    pub serial: SerialSettings,
    #[serde(default)]
    pub publish: BusSettings,
    #[serde(default)]
    pub subscribe: BusSettings,
    #[serde(default)]
    pub telemetry: TelemetrySettings,
    #[serde(default)]
    pub logging: LoggingSettings,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct SerialSettings {
    #[serde(default)]
    pub port: Option<String>,
    #[serde(default = "default_patterns")]
    pub patterns: Vec<String>,
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    #[serde(default = "default_data_bits")]
    pub data_bits: u8,
    #[serde(default = "default_stop_bits")]
    pub stop_bits: u8,
    #[serde(default)]
    pub parity: Parity,
    #[serde(default = "default_retries")]
    pub retries: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,
    #[serde(default = "default_max_line_length")]
    pub max_line_length: usize,
}

fn default_patterns() -> Vec<String> {
    DEFAULT_PORT_PATTERNS.iter().map(|p| p.to_string()).collect()
}
fn default_baud_rate() -> u32 {
    115_200
}
fn default_data_bits() -> u8 {
    8
}
fn default_stop_bits() -> u8 {
    1
}
fn default_retries() -> u32 {
    6
}
fn default_retry_delay_ms() -> u64 {
    1200
}
fn default_read_timeout_ms() -> u64 {
    2000
}
fn default_settle_ms() -> u64 {
    500
}
fn default_max_line_length() -> usize {
    crate::io::serial::DEFAULT_MAX_LINE_LENGTH
}

impl Default for SerialSettings {
    fn default() -> Self {
        Self {
            port: None,
            patterns: default_patterns(),
            baud_rate: default_baud_rate(),
            data_bits: default_data_bits(),
            stop_bits: default_stop_bits(),
            parity: Parity::None,
            retries: default_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            read_timeout_ms: default_read_timeout_ms(),
            settle_ms: default_settle_ms(),
            max_line_length: default_max_line_length(),
        }
    }
}

/// One bus direction. Unset fields take the direction's own defaults, so
/// every field is optional here.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct BusSettings {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub topic: Option<String>,
    pub client_id: Option<String>,
    pub qos: Option<u8>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub keep_alive_secs: Option<u64>,
    pub clean_session: Option<bool>,
    pub connect_timeout_secs: Option<u64>,
    pub max_reconnects: Option<u32>,
    pub pacing_ms: Option<u64>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct TelemetrySettings {
    #[serde(default = "default_telemetry_host")]
    pub host: String,
    #[serde(default = "default_device_label")]
    pub device: String,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default = "default_telemetry_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_telemetry_pacing_ms")]
    pub pacing_ms: u64,
}

fn default_telemetry_host() -> String {
    "industrial.api.ubidots.com".to_string()
}
fn default_device_label() -> String {
    "machine-a".to_string()
}
fn default_telemetry_timeout_secs() -> u64 {
    10
}
fn default_telemetry_pacing_ms() -> u64 {
    100
}

impl Default for TelemetrySettings {
    fn default() -> Self {
        Self {
            host: default_telemetry_host(),
            device: default_device_label(),
            token: None,
            timeout_secs: default_telemetry_timeout_secs(),
            pacing_ms: default_telemetry_pacing_ms(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct LoggingSettings {
    /// Directory for log files; no file logging when unset
    #[serde(default)]
    pub dir: Option<PathBuf>,
    /// Default filter when neither -v nor RUST_LOG is given (e.g. "debug")
    #[serde(default)]
    pub level: Option<String>,
}

/// `<config dir>/serial-bridge/config.toml`, if a config dir exists.
pub fn default_settings_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join(SETTINGS_DIR).join(SETTINGS_FILE))
}

/// Read and parse a settings file.
pub fn load_settings_file(path: &Path) -> Result<BridgeSettings, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;
    toml::from_str(&content).map_err(|e| ConfigError::Parse {
        path: path.display().to_string(),
        message: e.to_string(),
    })
}

/// Load settings: an explicit path must exist; the default path is used only
/// when present; otherwise built-in defaults.
pub fn load_settings(explicit: Option<&Path>) -> Result<(BridgeSettings, Option<PathBuf>), ConfigError> {
    if let Some(path) = explicit {
        return Ok((load_settings_file(path)?, Some(path.to_path_buf())));
    }
    match default_settings_path() {
        Some(path) if path.is_file() => Ok((load_settings_file(&path)?, Some(path))),
        _ => Ok((BridgeSettings::default(), None)),
    }
}

// ============================================================================
// Run configuration
// ============================================================================

/// Device side of every mode.
#[derive(Clone, Debug)]
pub struct SerialConfig {
    pub resolver: PortResolver,
    pub link: LinkSettings,
    pub policy: RetryPolicy,
}

#[derive(Clone, Debug)]
pub enum Mode {
    Publish { mqtt: MqttConfig, pacing: Duration },
    Subscribe { mqtt: MqttConfig },
    Http { telemetry: TelemetryConfig, pacing: Duration },
    ListPorts,
}

impl Mode {
    pub fn name(&self) -> &'static str {
        match self {
            Mode::Publish { .. } => "publish",
            Mode::Subscribe { .. } => "subscribe",
            Mode::Http { .. } => "http",
            Mode::ListPorts => "list-ports",
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct LogConfig {
    pub dir: Option<PathBuf>,
    pub verbosity: u8,
    pub level: Option<String>,
}

#[derive(Clone, Debug)]
pub struct RunConfig {
    pub serial: SerialConfig,
    pub mode: Mode,
    pub log: LogConfig,
}

impl RunConfig {
    /// Merge command line over file settings and validate.
    pub fn resolve(cli: &Cli, file: &BridgeSettings) -> Result<Self, ConfigError> {
        let serial = resolve_serial(&cli.serial, &file.serial)?;
        let mode = match &cli.command {
            Command::Publish(args) => {
                let pacing = args
                    .pacing_ms
                    .or(file.publish.pacing_ms)
                    .map(Duration::from_millis)
                    .unwrap_or(crate::bridge::PUBLISH_PACING);
                Mode::Publish {
                    mqtt: resolve_mqtt(args, &file.publish, MqttConfig::default())?,
                    pacing,
                }
            }
            Command::Subscribe(args) => Mode::Subscribe {
                mqtt: resolve_mqtt(args, &file.subscribe, MqttConfig::subscriber())?,
            },
            Command::Http(args) => {
                let (telemetry, pacing) = resolve_telemetry(args, &file.telemetry)?;
                Mode::Http { telemetry, pacing }
            }
            Command::ListPorts => Mode::ListPorts,
        };
        let log = LogConfig {
            dir: cli.log_dir.clone().or_else(|| file.logging.dir.clone()),
            verbosity: cli.verbose,
            level: file.logging.level.clone(),
        };
        Ok(Self { serial, mode, log })
    }
}

fn resolve_serial(args: &SerialArgs, file: &SerialSettings) -> Result<SerialConfig, ConfigError> {
    let link = LinkSettings {
        baud_rate: args.baud.unwrap_or(file.baud_rate),
        data_bits: args.data_bits.unwrap_or(file.data_bits),
        stop_bits: args.stop_bits.unwrap_or(file.stop_bits),
        parity: args.parity.unwrap_or(file.parity),
        read_timeout: Duration::from_millis(file.read_timeout_ms),
        settle: Duration::from_millis(file.settle_ms),
        max_line_length: file.max_line_length,
    };
    if link.baud_rate == 0 {
        return Err(invalid("baud", "must be greater than zero"));
    }
    if !(5..=8).contains(&link.data_bits) {
        return Err(invalid("data_bits", "must be between 5 and 8"));
    }
    if !(1..=2).contains(&link.stop_bits) {
        return Err(invalid("stop_bits", "must be 1 or 2"));
    }
    if link.max_line_length == 0 {
        return Err(invalid("max_line_length", "must be greater than zero"));
    }
    // A zero timeout turns every read into a busy poll.
    if link.read_timeout.is_zero() {
        return Err(invalid("read_timeout_ms", "must be greater than zero"));
    }

    let policy = RetryPolicy {
        attempts: args.retries.unwrap_or(file.retries),
        delay: Duration::from_millis(args.retry_delay_ms.unwrap_or(file.retry_delay_ms)),
    };
    if policy.attempts == 0 {
        return Err(invalid("retries", "must be at least 1"));
    }

    let hint = args.port.as_deref().or(file.port.as_deref());
    let patterns = if args.port_patterns.is_empty() {
        &file.patterns
    } else {
        &args.port_patterns
    };
    Ok(SerialConfig {
        resolver: PortResolver::from_specs(hint, patterns),
        link,
        policy,
    })
}

fn resolve_mqtt(
    args: &MqttArgs,
    file: &BusSettings,
    defaults: MqttConfig,
) -> Result<MqttConfig, ConfigError> {
    let config = MqttConfig {
        host: pick(&args.host, &file.host).unwrap_or(defaults.host),
        port: args.mqtt_port.or(file.port).unwrap_or(defaults.port),
        topic: pick(&args.topic, &file.topic).unwrap_or(defaults.topic),
        client_id: pick(&args.client_id, &file.client_id).unwrap_or(defaults.client_id),
        qos: args.qos.or(file.qos).unwrap_or(defaults.qos),
        username: pick(&args.username, &file.username).or(defaults.username),
        password: pick(&args.password, &file.password).or(defaults.password),
        keep_alive: args
            .keep_alive_secs
            .or(file.keep_alive_secs)
            .map(Duration::from_secs)
            .unwrap_or(defaults.keep_alive),
        clean_session: file.clean_session.unwrap_or(defaults.clean_session),
        connect_timeout: file
            .connect_timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(defaults.connect_timeout),
        max_reconnects: args.max_reconnects.or(file.max_reconnects).or(defaults.max_reconnects),
    };

    if config.qos > 1 {
        return Err(invalid("qos", "must be 0 or 1"));
    }
    if config.host.trim().is_empty() {
        return Err(invalid("host", "must not be empty"));
    }
    if config.topic.trim().is_empty() {
        return Err(invalid("topic", "must not be empty"));
    }
    Ok(config)
}

fn resolve_telemetry(
    args: &HttpArgs,
    file: &TelemetrySettings,
) -> Result<(TelemetryConfig, Duration), ConfigError> {
    let token = pick(&args.token, &file.token).unwrap_or_default();
    if !token_is_usable(&token) {
        return Err(ConfigError::MissingSecret("telemetry token (UBIDOTS_TOKEN)"));
    }
    let telemetry = TelemetryConfig {
        host: args.api_host.clone().unwrap_or_else(|| file.host.clone()),
        device_label: args.device.clone().unwrap_or_else(|| file.device.clone()),
        token,
        timeout: Duration::from_secs(args.timeout_secs.unwrap_or(file.timeout_secs)),
    };
    if telemetry.device_label.trim().is_empty() {
        return Err(invalid("device", "must not be empty"));
    }
    let pacing = Duration::from_millis(args.pacing_ms.unwrap_or(file.pacing_ms));
    Ok((telemetry, pacing))
}

/// Command line value if set, else file value.
fn pick(cli: &Option<String>, file: &Option<String>) -> Option<String> {
    cli.clone().or_else(|| file.clone())
}

fn invalid(field: &'static str, message: &str) -> ConfigError {
    ConfigError::Invalid {
        field,
        message: message.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use std::io::Write;

    fn cli(args: &[&str]) -> Cli {
        let mut argv = vec!["serial-bridge"];
        argv.extend_from_slice(args);
        Cli::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_empty_file_uses_defaults() {
        let settings: BridgeSettings = toml::from_str("").unwrap();
        assert_eq!(settings, BridgeSettings::default());
        assert_eq!(settings.serial.baud_rate, 115_200);
        assert_eq!(settings.serial.patterns.len(), 4);
        assert_eq!(settings.telemetry.device, "machine-a");
    }

    #[test]
    fn test_partial_sections_keep_field_defaults() {
        let settings: BridgeSettings = toml::from_str(
            r#"
            [serial]
            baud_rate = 9600
            parity = "even"

            [subscribe]
            topic = "lab/commands"
            "#,
        )
        .unwrap();
        assert_eq!(settings.serial.baud_rate, 9600);
        assert_eq!(settings.serial.parity, Parity::Even);
        assert_eq!(settings.serial.retries, 6);
        assert_eq!(settings.subscribe.topic.as_deref(), Some("lab/commands"));
        assert_eq!(settings.subscribe.host, None);
    }

    #[test]
    fn test_publish_defaults() {
        let config = RunConfig::resolve(&cli(&["publish"]), &BridgeSettings::default()).unwrap();
        match config.mode {
            Mode::Publish { mqtt, pacing } => {
                assert_eq!(mqtt.host, "localhost");
                assert_eq!(mqtt.port, 1883);
                assert_eq!(mqtt.topic, "PIOT/ConstrainedDevice/SensorMsg");
                assert_eq!(mqtt.client_id, "nano33ble-data-bridge");
                assert_eq!(mqtt.qos, 0);
                assert_eq!(pacing, Duration::from_millis(50));
            }
            other => panic!("unexpected mode {:?}", other),
        }
        assert_eq!(config.serial.link.baud_rate, 115_200);
        assert_eq!(config.serial.policy, RetryPolicy::default());
        assert_eq!(config.serial.resolver.patterns().len(), 4);
    }

    #[test]
    fn test_subscribe_defaults() {
        let config = RunConfig::resolve(&cli(&["subscribe"]), &BridgeSettings::default()).unwrap();
        match config.mode {
            Mode::Subscribe { mqtt } => {
                assert_eq!(mqtt.host, "mqtt-dashboard.com");
                assert_eq!(mqtt.topic, "sensors/nano33ble/command");
                assert_eq!(mqtt.client_id, "nano33ble-command-bridge");
            }
            other => panic!("unexpected mode {:?}", other),
        }
    }

    #[test]
    fn test_command_line_beats_file() {
        let settings: BridgeSettings = toml::from_str(
            r#"
            [serial]
            port = "/dev/ttyUSB9"
            baud_rate = 9600

            [publish]
            host = "broker.lan"
            topic = "from/file"
            qos = 1
            "#,
        )
        .unwrap();
        let config = RunConfig::resolve(
            &cli(&["--port", "/dev/ttyACM1", "publish", "--topic", "from/cli"]),
            &settings,
        )
        .unwrap();

        assert_eq!(config.serial.resolver.resolve().as_deref(), Some("/dev/ttyACM1"));
        assert_eq!(config.serial.link.baud_rate, 9600);
        match config.mode {
            Mode::Publish { mqtt, .. } => {
                assert_eq!(mqtt.host, "broker.lan");
                assert_eq!(mqtt.topic, "from/cli");
                assert_eq!(mqtt.qos, 1);
            }
            other => panic!("unexpected mode {:?}", other),
        }
    }

    #[test]
    fn test_invalid_qos_rejected() {
        let err = RunConfig::resolve(&cli(&["publish", "--qos", "2"]), &BridgeSettings::default())
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "qos", .. }));
    }

    #[test]
    fn test_zero_baud_and_retries_rejected() {
        let err = RunConfig::resolve(&cli(&["--baud", "0", "publish"]), &BridgeSettings::default())
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "baud", .. }));

        let err =
            RunConfig::resolve(&cli(&["--retries", "0", "publish"]), &BridgeSettings::default())
                .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "retries", .. }));
    }

    #[test]
    fn test_zero_read_timeout_rejected() {
        let settings: BridgeSettings = toml::from_str("[serial]\nread_timeout_ms = 0").unwrap();
        let err = RunConfig::resolve(&cli(&["publish"]), &settings).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                field: "read_timeout_ms",
                ..
            }
        ));

        let settings: BridgeSettings = toml::from_str("[serial]\nread_timeout_ms = 1").unwrap();
        let config = RunConfig::resolve(&cli(&["publish"]), &settings).unwrap();
        assert_eq!(config.serial.link.read_timeout, Duration::from_millis(1));
    }

    #[test]
    fn test_http_requires_real_token() {
        let err = RunConfig::resolve(
            &cli(&["http", "--token", "PUT-YOUR-TOKEN-HERE"]),
            &BridgeSettings::default(),
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::MissingSecret(_)));

        let settings: BridgeSettings = toml::from_str(
            r#"
            [telemetry]
            token = "BBUS-from-file"
            device = "press-7"
            "#,
        )
        .unwrap();
        let config = RunConfig::resolve(&cli(&["http"]), &settings).unwrap();
        match config.mode {
            Mode::Http { telemetry, pacing } => {
                assert_eq!(telemetry.token, "BBUS-from-file");
                assert_eq!(telemetry.device_label, "press-7");
                assert_eq!(telemetry.timeout, Duration::from_secs(10));
                assert_eq!(pacing, Duration::from_millis(100));
            }
            other => panic!("unexpected mode {:?}", other),
        }
    }

    #[test]
    fn test_load_settings_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[logging]\nlevel = \"debug\"").unwrap();
        let (settings, path) = load_settings(Some(file.path())).unwrap();
        assert_eq!(settings.logging.level.as_deref(), Some("debug"));
        assert_eq!(path.as_deref(), Some(file.path()));
    }

    #[test]
    fn test_load_settings_errors() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.toml");
        assert!(matches!(
            load_settings(Some(&missing)),
            Err(ConfigError::Read { .. })
        ));

        let broken = dir.path().join("broken.toml");
        std::fs::write(&broken, "[serial\nbaud_rate = ").unwrap();
        assert!(matches!(
            load_settings(Some(&broken)),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn test_log_dir_from_file_when_not_on_command_line() {
        let settings: BridgeSettings = toml::from_str("[logging]\ndir = \"/var/log/bridge\"").unwrap();
        let config = RunConfig::resolve(&cli(&["-v", "list-ports"]), &settings).unwrap();
        assert_eq!(config.log.dir, Some(PathBuf::from("/var/log/bridge")));
        assert_eq!(config.log.verbosity, 1);
        assert_eq!(config.mode.name(), "list-ports");
    }
}
