// src/io/mqtt/mod.rs
//
// MQTT transport for the bridge: publishes device records and receives
// commands destined for the device.

mod session;

// Re-export public items
pub use session::{to_qos, MqttConfig, MqttDirection, MqttSession};
