// src/io/telemetry.rs
//
// HTTP telemetry sink (Ubidots-style device API).
//
// Each record is POSTed as the JSON body to
//   https://<host>/api/v1.6/devices/<device-label>/
// with the auth token in the X-Auth-Token header. Non-2xx responses and
// network errors are transient failures: the record is dropped, never queued.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use tokio::time::Duration;

use crate::codec::Record;
use crate::error::{ConfigError, DeliveryError};
use crate::io::traits::RecordSink;
use crate::io::types::{DeliveryResult, DeliveryStatus};

pub const AUTH_HEADER: &str = "X-Auth-Token";

/// Prefix of the placeholder token shipped in sample configs.
const PLACEHOLDER_TOKEN_PREFIX: &str = "PUT-";

// ============================================================================
// Configuration
// ============================================================================

#[derive(Clone, Debug, PartialEq)]
pub struct TelemetryConfig {
    /// API host, optionally with a scheme (defaults to https)
    pub host: String,
    pub device_label: String,
    pub token: String,
    pub timeout: Duration,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            host: "industrial.api.ubidots.com".to_string(),
            device_label: "machine-a".to_string(),
            token: String::new(),
            timeout: Duration::from_secs(10),
        }
    }
}

impl TelemetryConfig {
    /// Device endpoint URL.
    pub fn endpoint(&self) -> String {
        let host = self.host.trim_end_matches('/');
        let base = if host.contains("://") {
            host.to_string()
        } else {
            format!("https://{}", host)
        };
        format!("{}/api/v1.6/devices/{}/", base, self.device_label)
    }
}

/// A usable token is present and is not the sample placeholder.
pub fn token_is_usable(token: &str) -> bool {
    let token = token.trim();
    !token.is_empty() && !token.starts_with(PLACEHOLDER_TOKEN_PREFIX)
}

/// Map a response status onto a delivery result.
pub fn classify_status(status: StatusCode) -> DeliveryResult {
    if status.is_success() {
        Ok(DeliveryStatus::Accepted {
            status: status.as_u16(),
        })
    } else {
        Err(DeliveryError::Transient(format!("HTTP {}", status)))
    }
}

// ============================================================================
// Client
// ============================================================================

pub struct TelemetryClient {
    client: Client,
    endpoint: String,
    token: String,
}

impl TelemetryClient {
    pub fn new(config: &TelemetryConfig) -> Result<Self, ConfigError> {
        if !token_is_usable(&config.token) {
            return Err(ConfigError::MissingSecret("telemetry token (UBIDOTS_TOKEN)"));
        }
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ConfigError::HttpClient(e.to_string()))?;
        Ok(Self {
            client,
            endpoint: config.endpoint(),
            token: config.token.trim().to_string(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl RecordSink for TelemetryClient {
    fn describe(&self) -> String {
        self.endpoint.clone()
    }

    async fn deliver(&self, record: &Record) -> DeliveryResult {
        let response = self
            .client
            .post(&self.endpoint)
            .header(AUTH_HEADER, &self.token)
            .json(record)
            .send()
            .await
            .map_err(|e| DeliveryError::Transient(format!("POST failed: {}", e)))?;
        classify_status(response.status())
    }
}
