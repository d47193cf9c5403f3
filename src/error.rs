// src/error.rs
//
// Error taxonomy for the bridge.
// Link and bus errors are transport faults; decode and delivery errors are
// local to a single line or record and never stop the bridging loop.

use thiserror::Error;

/// Serial link acquisition and I/O errors.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum LinkError {
    /// No pattern resolved to a device path. Transient until retries run out.
    #[error("No serial port found. Set --port (NANO_PORT) or plug the board in.")]
    PortNotFound,

    /// The device is claimed by another process. Retrying cannot help.
    #[error("Port {path} is busy: {message}. Close any serial monitor/plotter using it and rerun.")]
    PortBusy { path: String, message: String },

    /// Any other open failure (missing node, permissions, driver error).
    #[error("Failed to open {path}: {message}")]
    Open { path: String, message: String },

    /// Acquisition gave up after the configured number of attempts.
    #[error("Could not open serial port after {attempts} attempt(s). Last error: {last}")]
    Unavailable { attempts: u32, last: String },

    /// Read or write raised on an open handle (device unplugged, EOF, ...).
    #[error("Serial I/O fault on {path}: {message}")]
    Io { path: String, message: String },

    /// Operation attempted on a link that has already been closed.
    #[error("Serial link {0} is closed")]
    Closed(String),

    /// Acquisition was interrupted by shutdown.
    #[error("Serial acquisition cancelled")]
    Cancelled,
}

impl LinkError {
    /// Faults that should trigger re-acquisition rather than abort the bridge.
    pub fn is_link_fault(&self) -> bool {
        matches!(self, LinkError::Io { .. } | LinkError::Closed(_))
    }
}

/// A line that could not be turned into a record.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Expected a JSON object, got {0}")]
    NotAnObject(&'static str),
}

/// Failure to hand a record to a sink.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum DeliveryError {
    /// Record dropped, bridging continues.
    #[error("{0}")]
    Transient(String),

    /// The sink can no longer accept records; the bridge shuts down.
    #[error("{0}")]
    Fatal(String),
}

/// Message-bus session errors.
#[derive(Debug, Error)]
pub enum BusError {
    #[error("Failed to connect to MQTT broker at {host}:{port}: {message}")]
    Connect { host: String, port: u16, message: String },

    #[error("MQTT broker at {host}:{port} refused the connection ({code})")]
    Refused { host: String, port: u16, code: String },

    #[error("Timed out waiting for MQTT broker at {host}:{port}")]
    Timeout { host: String, port: u16 },

    #[error("Failed to subscribe to {topic}: {message}")]
    Subscribe { topic: String, message: String },
}

/// Configuration and startup validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read settings file {path}: {message}")]
    Read { path: String, message: String },

    #[error("Failed to parse settings file {path}: {message}")]
    Parse { path: String, message: String },

    #[error("Invalid value for {field}: {message}")]
    Invalid { field: &'static str, message: String },

    #[error("Missing {0}. Set it before starting the bridge.")]
    MissingSecret(&'static str),

    #[error("Failed to build HTTP client: {0}")]
    HttpClient(String),
}

/// Top-level error; any of these ends the process with exit code 1.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error(transparent)]
    Link(#[from] LinkError),

    #[error(transparent)]
    Bus(#[from] BusError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Sink {sink} failed: {message}")]
    Sink { sink: String, message: String },

    #[error("Inbound message source closed ({0})")]
    SourceClosed(String),

    #[error("Bridge task failed: {0}")]
    Task(String),

    #[error("{0}")]
    PortList(String),

    #[error("Logging setup failed: {0}")]
    Logging(String),
}
