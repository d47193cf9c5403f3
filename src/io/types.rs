// src/io/types.rs
//
// Shared message types crossing the bridge boundary.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

// ============================================================================
// Inbound Messages
// ============================================================================

/// Message from a network source, destined for the device.
#[derive(Clone, Debug, PartialEq)]
pub struct InboundMessage {
    /// Topic the message arrived on.
    pub topic: String,
    /// Raw payload, forwarded to the device untouched.
    pub payload: Vec<u8>,
    /// Host UNIX timestamp in microseconds.
    pub received_us: u64,
}

impl InboundMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            received_us: now_us(),
        }
    }

    /// Payload as text for log lines.
    pub fn payload_text(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }
}

// ============================================================================
// Delivery
// ============================================================================

/// Identifying status of a successful delivery.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DeliveryStatus {
    /// Queued on the bus client for the given topic.
    Published { topic: String },
    /// Accepted by the HTTP endpoint with this status code.
    Accepted { status: u16 },
}

impl fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeliveryStatus::Published { topic } => write!(f, "published to {}", topic),
            DeliveryStatus::Accepted { status } => write!(f, "OK {}", status),
        }
    }
}

/// Outcome of handing one record to one sink.
pub type DeliveryResult = Result<DeliveryStatus, crate::error::DeliveryError>;

// ============================================================================
// Helpers
// ============================================================================

/// Current UNIX time in microseconds.
pub fn now_us() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0)
}
