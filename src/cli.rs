// src/cli.rs
//
// Command line. Every option is optional here; unset values fall through to
// the settings file and then to built-in defaults.

use std::path::PathBuf;

use clap::{ArgAction, Args, Parser, Subcommand};

use crate::io::serial::Parity;

#[derive(Parser, Debug)]
#[command(name = "serial-bridge", version)]
#[command(about = "Bridge a line-oriented serial device to MQTT or HTTP telemetry")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    #[command(flatten)]
    pub serial: SerialArgs,

    /// Settings file (default: <config dir>/serial-bridge/config.toml)
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Also write logs to a timestamped file in this directory
    #[arg(long, global = true, value_name = "DIR")]
    pub log_dir: Option<PathBuf>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Publish JSON lines from the device to an MQTT topic
    Publish(MqttArgs),
    /// Forward messages from an MQTT topic to the device
    Subscribe(MqttArgs),
    /// POST JSON lines from the device to the telemetry HTTP API
    Http(HttpArgs),
    /// List serial ports and exit
    ListPorts,
}

#[derive(Args, Debug, Clone, Default)]
pub struct SerialArgs {
    /// Explicit serial device path; tried before any pattern
    #[arg(long, env = "NANO_PORT", global = true)]
    pub port: Option<String>,

    /// Glob pattern for auto-discovery (repeatable, replaces the defaults)
    #[arg(long = "port-pattern", value_name = "GLOB", global = true)]
    pub port_patterns: Vec<String>,

    #[arg(long, env = "NANO_BAUD", global = true)]
    pub baud: Option<u32>,

    #[arg(long, global = true, value_parser = clap::value_parser!(u8).range(5..=8))]
    pub data_bits: Option<u8>,

    #[arg(long, global = true, value_parser = clap::value_parser!(u8).range(1..=2))]
    pub stop_bits: Option<u8>,

    /// none, odd or even
    #[arg(long, global = true)]
    pub parity: Option<Parity>,

    /// Open attempts before giving up
    #[arg(long, global = true)]
    pub retries: Option<u32>,

    #[arg(long, global = true, value_name = "MS")]
    pub retry_delay_ms: Option<u64>,
}

#[derive(Args, Debug, Clone, Default)]
pub struct MqttArgs {
    /// Broker hostname
    #[arg(long, env = "MQTT_HOST")]
    pub host: Option<String>,

    /// Broker port
    #[arg(long, env = "MQTT_PORT")]
    pub mqtt_port: Option<u16>,

    #[arg(long, env = "MQTT_TOPIC")]
    pub topic: Option<String>,

    #[arg(long, env = "MQTT_CLIENTID")]
    pub client_id: Option<String>,

    /// 0 (at most once) or 1 (at least once)
    #[arg(long, env = "MQTT_QOS")]
    pub qos: Option<u8>,

    #[arg(long, env = "MQTT_USERNAME")]
    pub username: Option<String>,

    #[arg(long, env = "MQTT_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    #[arg(long, value_name = "SECS")]
    pub keep_alive_secs: Option<u64>,

    /// Consecutive broker connection failures tolerated (default: unlimited)
    #[arg(long)]
    pub max_reconnects: Option<u32>,

    /// Delay between publish iterations
    #[arg(long, value_name = "MS")]
    pub pacing_ms: Option<u64>,
}

#[derive(Args, Debug, Clone, Default)]
pub struct HttpArgs {
    /// API auth token
    #[arg(long, env = "UBIDOTS_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Device label in the endpoint path
    #[arg(long, env = "UBIDOTS_DEVICE")]
    pub device: Option<String>,

    /// API host, optionally with scheme
    #[arg(long = "api-host", env = "UBIDOTS_HOST")]
    pub api_host: Option<String>,

    #[arg(long, value_name = "SECS")]
    pub timeout_secs: Option<u64>,

    /// Delay between POST iterations
    #[arg(long, value_name = "MS")]
    pub pacing_ms: Option<u64>,
}
