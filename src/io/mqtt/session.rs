// src/io/mqtt/session.rs
//
// MQTT session for both bridge directions.
//
// Publish direction: records are re-serialised as compact JSON and queued on
// the client without blocking the bridging loop.
// Subscribe direction: incoming publishes are pushed onto a bounded channel
// consumed by the bridge; the network loop never waits on the serial side.
//
// Reconnection is left to rumqttc: the driver task keeps polling the event
// loop after errors. An optional budget of consecutive failures ends the
// session, which the router then sees as a fatal sink/source condition.

use async_trait::async_trait;
use rumqttc::{
    AsyncClient, ConnectReturnCode, ConnectionError, Event, EventLoop, MqttOptions, Outgoing,
    Packet, QoS,
};
use std::sync::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::codec::Record;
use crate::error::{BusError, DeliveryError};
use crate::io::traits::RecordSink;
use crate::io::types::{DeliveryResult, DeliveryStatus, InboundMessage};

/// Capacity of the client's outgoing request queue.
const REQUEST_QUEUE: usize = 100;

/// Pause between polls after a connection error.
const RECONNECT_BACKOFF: Duration = Duration::from_secs(1);

/// How long shutdown waits for the DISCONNECT packet to go out.
const DISCONNECT_GRACE: Duration = Duration::from_secs(2);

// ============================================================================
// Configuration
// ============================================================================

/// MQTT session configuration
#[derive(Clone, Debug, PartialEq)]
pub struct MqttConfig {
    /// MQTT broker hostname
    pub host: String,
    /// MQTT broker port
    pub port: u16,
    /// Topic to publish to or subscribe on
    pub topic: String,
    /// Client identifier
    pub client_id: String,
    /// Quality of service, 0 or 1
    pub qos: u8,
    /// Username for authentication (optional)
    pub username: Option<String>,
    /// Password for authentication (optional)
    pub password: Option<String>,
    pub keep_alive: Duration,
    pub clean_session: bool,
    /// Bound on waiting for the first CONNACK
    pub connect_timeout: Duration,
    /// Consecutive connection failures tolerated after startup (None = unlimited)
    pub max_reconnects: Option<u32>,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1883,
            topic: "PIOT/ConstrainedDevice/SensorMsg".to_string(),
            client_id: "nano33ble-data-bridge".to_string(),
            qos: 0,
            username: None,
            password: None,
            keep_alive: Duration::from_secs(30),
            clean_session: true,
            connect_timeout: Duration::from_secs(10),
            max_reconnects: None,
        }
    }
}

impl MqttConfig {
    /// Defaults for the command (subscribe) direction.
    pub fn subscriber() -> Self {
        Self {
            host: "mqtt-dashboard.com".to_string(),
            topic: "sensors/nano33ble/command".to_string(),
            client_id: "nano33ble-command-bridge".to_string(),
            ..Self::default()
        }
    }

    /// `mqtt://host:port` for log lines
    pub fn broker(&self) -> String {
        format!("mqtt://{}:{}", self.host, self.port)
    }

    pub fn rumqttc_qos(&self) -> QoS {
        to_qos(self.qos)
    }

    /// Build client options from this configuration.
    pub fn options(&self) -> MqttOptions {
        let mut options = MqttOptions::new(&self.client_id, &self.host, self.port);
        options.set_keep_alive(self.keep_alive);
        options.set_clean_session(self.clean_session);

        // Set credentials if provided
        if let Some(username) = &self.username {
            options.set_credentials(username, self.password.clone().unwrap_or_default());
        }
        options
    }
}

/// Map a numeric QoS level onto rumqttc. Anything above 1 is validated away
/// at configuration time; treat it as at-least-once here.
pub fn to_qos(level: u8) -> QoS {
    match level {
        0 => QoS::AtMostOnce,
        _ => QoS::AtLeastOnce,
    }
}

/// Which way messages flow through the session.
pub enum MqttDirection {
    /// Bridge publishes records to the topic.
    Publish,
    /// Bridge receives messages from the topic through this channel.
    Subscribe(mpsc::Sender<InboundMessage>),
}

// ============================================================================
// Session
// ============================================================================

pub struct MqttSession {
    config: MqttConfig,
    client: AsyncClient,
    stop: CancellationToken,
    /// Cancelled by the driver task when it exits, for any reason.
    finished: CancellationToken,
    driver: Mutex<Option<JoinHandle<()>>>,
}

impl MqttSession {
    /// Connect, wait for the broker's acknowledgement and start the driver.
    pub async fn connect(config: MqttConfig, direction: MqttDirection) -> Result<Self, BusError> {
        let (client, mut eventloop) = AsyncClient::new(config.options(), REQUEST_QUEUE);

        match tokio::time::timeout(config.connect_timeout, wait_for_connack(&mut eventloop)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(connection_failure(&config, e)),
            Err(_) => {
                return Err(BusError::Timeout {
                    host: config.host.clone(),
                    port: config.port,
                })
            }
        }
        info!("Connected to MQTT broker at {}:{}", config.host, config.port);

        let inbound = match direction {
            MqttDirection::Publish => None,
            MqttDirection::Subscribe(tx) => {
                client
                    .try_subscribe(&config.topic, config.rumqttc_qos())
                    .map_err(|e| BusError::Subscribe {
                        topic: config.topic.clone(),
                        message: e.to_string(),
                    })?;
                info!("Subscribed to topic: {}", config.topic);
                Some(tx)
            }
        };

        let stop = CancellationToken::new();
        let finished = CancellationToken::new();
        let driver = tokio::spawn(drive(
            config.clone(),
            client.clone(),
            eventloop,
            inbound,
            stop.clone(),
            finished.clone(),
        ));

        Ok(Self {
            config,
            client,
            stop,
            finished,
            driver: Mutex::new(Some(driver)),
        })
    }

    /// True once the driver has stopped; no further traffic will flow.
    pub fn is_finished(&self) -> bool {
        self.finished.is_cancelled()
    }

    /// Send DISCONNECT, give it a moment to go out, then stop the driver.
    pub async fn disconnect(&self) {
        let handle = self.driver.lock().ok().and_then(|mut guard| guard.take());
        let Some(handle) = handle else {
            return;
        };

        if !self.is_finished() {
            if let Err(e) = self.client.try_disconnect() {
                debug!("MQTT disconnect request not queued: {}", e);
            }
            let _ = tokio::time::timeout(DISCONNECT_GRACE, self.finished.cancelled()).await;
        }
        self.stop.cancel();
        let _ = handle.await;
        info!("Disconnected from MQTT broker at {}:{}", self.config.host, self.config.port);
    }
}

#[async_trait]
impl RecordSink for MqttSession {
    fn describe(&self) -> String {
        format!("{} topic {}", self.config.broker(), self.config.topic)
    }

    async fn deliver(&self, record: &Record) -> DeliveryResult {
        if self.is_finished() {
            return Err(DeliveryError::Fatal(format!(
                "MQTT session to {} has ended",
                self.config.broker()
            )));
        }

        match self.client.try_publish(
            &self.config.topic,
            self.config.rumqttc_qos(),
            false,
            record.to_json(),
        ) {
            Ok(()) => Ok(DeliveryStatus::Published {
                topic: self.config.topic.clone(),
            }),
            Err(e) if self.is_finished() => Err(DeliveryError::Fatal(format!(
                "Publish to {} failed, session ended: {}",
                self.config.topic, e
            ))),
            Err(e) => Err(DeliveryError::Transient(format!(
                "Publish to {} failed: {}",
                self.config.topic, e
            ))),
        }
    }

    async fn close(&self) {
        self.disconnect().await;
    }
}

// ============================================================================
// Event Loop
// ============================================================================

async fn wait_for_connack(eventloop: &mut EventLoop) -> Result<(), ConnectionError> {
    loop {
        if let Event::Incoming(Packet::ConnAck(ack)) = eventloop.poll().await? {
            if ack.code == ConnectReturnCode::Success {
                return Ok(());
            }
            return Err(ConnectionError::ConnectionRefused(ack.code));
        }
    }
}

fn connection_failure(config: &MqttConfig, e: ConnectionError) -> BusError {
    match e {
        ConnectionError::ConnectionRefused(code) => BusError::Refused {
            host: config.host.clone(),
            port: config.port,
            code: format!("{:?}", code),
        },
        other => BusError::Connect {
            host: config.host.clone(),
            port: config.port,
            message: other.to_string(),
        },
    }
}

/// Poll the event loop until stopped, forwarding inbound publishes.
async fn drive(
    config: MqttConfig,
    client: AsyncClient,
    mut eventloop: EventLoop,
    inbound: Option<mpsc::Sender<InboundMessage>>,
    stop: CancellationToken,
    finished: CancellationToken,
) {
    let _finished = finished.drop_guard();
    let mut failures: u32 = 0;

    loop {
        let event = tokio::select! {
            _ = stop.cancelled() => break,
            event = eventloop.poll() => event,
        };

        match event {
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                let Some(tx) = &inbound else {
                    continue;
                };
                let msg = InboundMessage::new(publish.topic, publish.payload.to_vec());
                match tx.try_send(msg) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(msg)) => {
                        warn!(
                            "Bridge busy, dropping message on {}: {}",
                            msg.topic,
                            msg.payload_text()
                        );
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => break,
                }
            }
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                if failures > 0 {
                    info!("Reconnected to MQTT broker at {}:{}", config.host, config.port);
                }
                failures = 0;
                // Clean sessions lose their subscriptions on reconnect
                if inbound.is_some() {
                    if let Err(e) = client.try_subscribe(&config.topic, config.rumqttc_qos()) {
                        warn!("Failed to resubscribe to {}: {}", config.topic, e);
                    }
                }
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                debug!("MQTT disconnect sent");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                failures += 1;
                warn!(
                    "Unexpected disconnection from MQTT broker at {}:{} ({})",
                    config.host, config.port, e
                );
                if config.max_reconnects.is_some_and(|max| failures > max) {
                    error!(
                        "Giving up on MQTT broker at {}:{} after {} consecutive failures",
                        config.host, config.port, failures
                    );
                    break;
                }
                tokio::select! {
                    _ = stop.cancelled() => break,
                    _ = tokio::time::sleep(RECONNECT_BACKOFF) => {}
                }
            }
        }
    }
}
