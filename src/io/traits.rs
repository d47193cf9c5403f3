// src/io/traits.rs
//
// Sink seam between the bridge router and its network transports.

use async_trait::async_trait;

use super::types::DeliveryResult;
use crate::codec::Record;

/// Downstream destination for decoded records (bus topic or HTTP endpoint).
///
/// `deliver` reports failures instead of retrying; transient failures drop
/// the record, fatal ones stop the bridge.
#[async_trait]
pub trait RecordSink: Send + Sync {
    /// Human-readable destination for log lines (topic or URL).
    fn describe(&self) -> String;

    async fn deliver(&self, record: &Record) -> DeliveryResult;

    /// Release network resources. Called once during shutdown.
    async fn close(&self) {}
}
