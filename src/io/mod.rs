// src/io/mod.rs
//
// Device and network transports. The serial link is the single upstream
// device; MQTT and HTTP telemetry are the network sides, both reachable by
// the bridge through the `RecordSink` trait.

pub mod mqtt;
pub mod serial;
pub mod telemetry;
pub mod traits;
pub mod types;

pub use traits::RecordSink;
pub use types::{now_us, DeliveryResult, DeliveryStatus, InboundMessage};
