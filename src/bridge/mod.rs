// src/bridge/mod.rs
//
// Bridge router: moves lines from the serial link to a record sink, and
// inbound bus messages from a source back to the link.
//
// State machine shared by all modes:
//   Init --acquire--> Connected --fault--> Reconnecting --acquire--> Connected
//                                                       \--exhausted--> error
// Shutdown closes the sink and then the link, exactly once.

mod pump;

use std::fmt;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::codec::{decode, encode_command};
use crate::error::{BridgeError, DeliveryError, LinkError};
use crate::io::serial::{Line, LinkManager, SerialLink};
use crate::io::traits::RecordSink;
use crate::io::types::{now_us, InboundMessage};
use pump::PumpEvent;

pub use pump::PUMP_CAPACITY;

/// Pacing between publish iterations.
pub const PUBLISH_PACING: Duration = Duration::from_millis(50);
/// Pacing between telemetry POST iterations.
pub const TELEMETRY_PACING: Duration = Duration::from_millis(100);
/// Inbound messages buffered between the bus client and the router.
pub const INBOUND_CAPACITY: usize = 32;

// ============================================================================
// State and statistics
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BridgeState {
    Init,
    Connected,
    Reconnecting,
    Stopped,
}

impl fmt::Display for BridgeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BridgeState::Init => "INIT",
            BridgeState::Connected => "CONNECTED",
            BridgeState::Reconnecting => "RECONNECTING",
            BridgeState::Stopped => "STOPPED",
        };
        f.write_str(name)
    }
}

/// Counters for the shutdown summary.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BridgeStats {
    pub lines: u64,
    pub records: u64,
    pub delivered: u64,
    pub failed: u64,
    pub malformed: u64,
    pub commands_written: u64,
    pub commands_dropped: u64,
    pub reconnects: u64,
}

impl fmt::Display for BridgeStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} lines, {} records, {} delivered, {} failed, {} malformed, \
             {} commands written, {} commands dropped, {} reconnects",
            self.lines,
            self.records,
            self.delivered,
            self.failed,
            self.malformed,
            self.commands_written,
            self.commands_dropped,
            self.reconnects
        )
    }
}

/// How one pass over a link ended.
enum PassEnd {
    Cancelled,
    Fault(LinkError),
    Fatal(BridgeError),
}

// ============================================================================
// Bridge
// ============================================================================

pub struct Bridge {
    manager: LinkManager,
    cancel: CancellationToken,
    link: Option<Arc<SerialLink>>,
    state: BridgeState,
    stats: BridgeStats,
}

impl Bridge {
    pub fn new(manager: LinkManager, cancel: CancellationToken) -> Self {
        Self {
            manager,
            cancel,
            link: None,
            state: BridgeState::Init,
            stats: BridgeStats::default(),
        }
    }

    pub fn state(&self) -> BridgeState {
        self.state
    }

    pub fn stats(&self) -> &BridgeStats {
        &self.stats
    }

    pub fn link(&self) -> Option<&Arc<SerialLink>> {
        self.link.as_ref()
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    fn set_state(&mut self, state: BridgeState) {
        if self.state != state {
            debug!("Bridge state {} -> {}", self.state, state);
            self.state = state;
        }
    }

    // ------------------------------------------------------------------------
    // Link acquisition
    // ------------------------------------------------------------------------

    fn spawn_acquire(&self) -> JoinHandle<Result<SerialLink, LinkError>> {
        let manager = self.manager.clone();
        let cancel = self.cancel.clone();
        tokio::spawn(async move { manager.acquire(Some(&cancel)).await })
    }

    /// Install the outcome of an acquisition. `Ok(false)` means shutdown was
    /// requested while acquiring.
    fn finish_acquire(
        &mut self,
        joined: Result<Result<SerialLink, LinkError>, tokio::task::JoinError>,
    ) -> Result<bool, BridgeError> {
        match joined {
            Ok(Ok(link)) => {
                self.link = Some(Arc::new(link));
                self.set_state(BridgeState::Connected);
                Ok(true)
            }
            Ok(Err(LinkError::Cancelled)) => Ok(false),
            Ok(Err(e)) => Err(e.into()),
            Err(e) => Err(BridgeError::Task(format!("serial acquisition: {}", e))),
        }
    }

    /// Initial acquisition (Init -> Connected).
    ///
    /// Returns `Ok(false)` if shutdown was requested before a device opened.
    pub async fn connect(&mut self) -> Result<bool, BridgeError> {
        let joined = self.spawn_acquire().await;
        self.finish_acquire(joined)
    }

    fn begin_reconnect(&mut self, fault: &LinkError) {
        warn!("{}; reconnecting", fault);
        if let Some(link) = self.link.take() {
            link.close();
        }
        self.stats.reconnects += 1;
        self.set_state(BridgeState::Reconnecting);
    }

    async fn reconnect(&mut self, fault: &LinkError) -> Result<bool, BridgeError> {
        self.begin_reconnect(fault);
        let joined = self.spawn_acquire().await;
        self.finish_acquire(joined)
    }

    // ------------------------------------------------------------------------
    // Serial -> sink
    // ------------------------------------------------------------------------

    /// Forward every line from the link to `sink` until shutdown.
    ///
    /// Malformed lines and transient delivery failures are logged and
    /// skipped. Link faults trigger re-acquisition. A fatal sink failure or
    /// an exhausted reconnect ends the run with an error.
    pub async fn run_outbound(
        &mut self,
        sink: &dyn RecordSink,
        pacing: Duration,
    ) -> Result<(), BridgeError> {
        info!("Bridging serial lines to {}", sink.describe());
        loop {
            let Some(link) = self.link.clone() else {
                return Ok(());
            };

            match self.outbound_pass(link, sink, pacing).await {
                PassEnd::Cancelled => return Ok(()),
                PassEnd::Fatal(err) => return Err(err),
                PassEnd::Fault(fault) => {
                    if !self.reconnect(&fault).await? {
                        return Ok(());
                    }
                }
            }
        }
    }

    async fn outbound_pass(
        &mut self,
        link: Arc<SerialLink>,
        sink: &dyn RecordSink,
        pacing: Duration,
    ) -> PassEnd {
        let pump_cancel = self.cancel.child_token();
        let (mut rx, pump) = pump::spawn(link, pump_cancel.clone());
        let cancel = self.cancel.clone();

        let end = loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => break PassEnd::Cancelled,
                event = rx.recv() => event,
            };
            match event {
                Some(PumpEvent::Line(line)) => {
                    if let Err(err) = self.handle_line(&line, sink).await {
                        break PassEnd::Fatal(err);
                    }
                    tokio::select! {
                        _ = cancel.cancelled() => break PassEnd::Cancelled,
                        _ = tokio::time::sleep(pacing) => {}
                    }
                }
                Some(PumpEvent::Fault(fault)) => break PassEnd::Fault(fault),
                None => break PassEnd::Cancelled,
            }
        };

        pump_cancel.cancel();
        drop(rx);
        if let Err(e) = pump.await {
            warn!("Line pump task failed: {}", e);
        }
        end
    }

    async fn handle_line(&mut self, line: &Line, sink: &dyn RecordSink) -> Result<(), BridgeError> {
        self.stats.lines += 1;
        let record = match decode(line) {
            Ok(record) => record,
            Err(e) => {
                self.stats.malformed += 1;
                warn!("Skipping non-JSON line: {} ({})", line, e);
                return Ok(());
            }
        };
        self.stats.records += 1;

        match sink.deliver(&record).await {
            Ok(status) => {
                self.stats.delivered += 1;
                info!("{}: {}", status, record);
                Ok(())
            }
            Err(DeliveryError::Transient(message)) => {
                self.stats.failed += 1;
                warn!(
                    "Delivery to {} failed, record dropped: {} ({})",
                    sink.describe(),
                    message,
                    record
                );
                Ok(())
            }
            Err(DeliveryError::Fatal(message)) => {
                self.stats.failed += 1;
                error!("Delivery to {} failed: {}", sink.describe(), message);
                Err(BridgeError::Sink {
                    sink: sink.describe(),
                    message,
                })
            }
        }
    }

    // ------------------------------------------------------------------------
    // Source -> serial
    // ------------------------------------------------------------------------

    /// Write every inbound message to the link until shutdown.
    ///
    /// Messages are delivered at most once: anything arriving while the link
    /// is closed or reconnecting is dropped with a warning. The source
    /// closing its channel ends the run with an error.
    pub async fn run_inbound(
        &mut self,
        rx: &mut mpsc::Receiver<InboundMessage>,
    ) -> Result<(), BridgeError> {
        info!("Forwarding inbound messages to serial");
        let cancel = self.cancel.clone();
        loop {
            let message = tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                message = rx.recv() => message,
            };
            let Some(message) = message else {
                return Err(BridgeError::SourceClosed("bus session ended".to_string()));
            };
            debug!("Received on {}: {}", message.topic, message.payload_text());

            let link = match &self.link {
                Some(link) if link.is_open() => link.clone(),
                _ => {
                    self.drop_command(&message, "serial link not open");
                    continue;
                }
            };

            let payload = encode_command(&message.payload).to_vec();
            let written = tokio::task::spawn_blocking(move || link.write_line(&payload))
                .await
                .map_err(|e| BridgeError::Task(format!("serial write: {}", e)))?;

            match written {
                Ok(()) => {
                    self.stats.commands_written += 1;
                    info!("Forwarded to serial: {}", message.payload_text());
                    debug!(
                        "Forward latency {} us",
                        now_us().saturating_sub(message.received_us)
                    );
                }
                Err(fault) if fault.is_link_fault() => {
                    self.drop_command(&message, "serial write failed");
                    if !self.reconnect_draining(&fault, rx).await? {
                        return Ok(());
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn drop_command(&mut self, message: &InboundMessage, reason: &str) {
        self.stats.commands_dropped += 1;
        warn!(
            "Dropping message from {} ({}): {}",
            message.topic,
            reason,
            message.payload_text()
        );
    }

    /// Re-acquire the link while discarding whatever arrives meanwhile.
    async fn reconnect_draining(
        &mut self,
        fault: &LinkError,
        rx: &mut mpsc::Receiver<InboundMessage>,
    ) -> Result<bool, BridgeError> {
        self.begin_reconnect(fault);
        let mut acquiring = self.spawn_acquire();
        let mut source_open = true;

        let joined = loop {
            tokio::select! {
                joined = &mut acquiring => break joined,
                message = rx.recv(), if source_open => match message {
                    Some(message) => self.drop_command(&message, "serial link reconnecting"),
                    None => source_open = false,
                },
            }
        };
        self.finish_acquire(joined)
    }

    // ------------------------------------------------------------------------
    // Shutdown
    // ------------------------------------------------------------------------

    /// Close the sink (if any), then the link, and log the run summary.
    /// Only the first call has any effect.
    pub async fn shutdown(&mut self, sink: Option<&dyn RecordSink>) {
        if self.state == BridgeState::Stopped {
            return;
        }
        info!("Shutting down");
        self.cancel.cancel();
        if let Some(sink) = sink {
            sink.close().await;
        }
        if let Some(link) = self.link.take() {
            link.close();
        }
        self.set_state(BridgeState::Stopped);
        info!("Bridge summary: {}", self.stats);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Record;
    use crate::io::serial::link::testing::{
        boxed, fast_policy, fast_settings, ScriptedDevice, ScriptedOpener, Step,
    };
    use crate::io::serial::{PortOpener, PortResolver};
    use crate::io::types::{DeliveryResult, DeliveryStatus};
    use crate::logging::capture::Captured;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::io::ErrorKind;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tracing::Level;

    const TOPIC: &str = "PIOT/ConstrainedDevice/SensorMsg";

    /// Sink that records every payload and replays scripted outcomes.
    #[derive(Default)]
    struct RecordingSink {
        payloads: Mutex<Vec<String>>,
        outcomes: Mutex<VecDeque<DeliveryResult>>,
        closes: AtomicUsize,
    }

    impl RecordingSink {
        fn with_outcomes(outcomes: Vec<DeliveryResult>) -> Self {
            Self {
                outcomes: Mutex::new(outcomes.into()),
                ..Self::default()
            }
        }

        fn payloads(&self) -> Vec<String> {
            self.payloads.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl RecordSink for RecordingSink {
        fn describe(&self) -> String {
            format!("test topic {}", TOPIC)
        }

        async fn deliver(&self, record: &Record) -> DeliveryResult {
            self.payloads.lock().unwrap().push(record.to_json());
            self.outcomes
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| {
                    Ok(DeliveryStatus::Published {
                        topic: TOPIC.to_string(),
                    })
                })
        }

        async fn close(&self) {
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn bridge_with(opener: ScriptedOpener, attempts: u32) -> (Bridge, Arc<ScriptedOpener>) {
        let opener = Arc::new(opener);
        let manager = LinkManager::new(
            PortResolver::from_specs(Some("/dev/ttyTEST0"), Vec::<String>::new()),
            opener.clone() as Arc<dyn PortOpener>,
            fast_settings(),
            fast_policy(attempts),
        );
        (Bridge::new(manager, CancellationToken::new()), opener)
    }

    /// Run the outbound loop until the sink has seen `count` records.
    async fn run_until_delivered(
        bridge: &mut Bridge,
        sink: &RecordingSink,
        count: usize,
    ) -> Result<(), BridgeError> {
        let cancel = bridge.cancel_token();
        let watcher = async {
            while sink.payloads().len() < count {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            cancel.cancel();
        };
        let run = async {
            let result = bridge.run_outbound(sink, Duration::ZERO).await;
            // Unblock the watcher if the run ended on its own.
            cancel.cancel();
            result
        };
        let (result, _) = tokio::time::timeout(Duration::from_secs(5), async {
            tokio::join!(run, watcher)
        })
        .await
        .expect("bridge did not finish in time");
        result
    }

    #[tokio::test]
    async fn test_publishes_compact_record() {
        let (device, _) = ScriptedDevice::lines(&[r#"{"distance_cm": 42}"#]);
        let (mut bridge, _) = bridge_with(ScriptedOpener::new(vec![boxed(device)]), 1);
        let sink = RecordingSink::default();

        assert!(bridge.connect().await.unwrap());
        assert_eq!(bridge.state(), BridgeState::Connected);
        run_until_delivered(&mut bridge, &sink, 1).await.unwrap();

        assert_eq!(sink.payloads(), vec![r#"{"distance_cm":42}"#.to_string()]);
        assert_eq!(bridge.stats().delivered, 1);
    }

    #[tokio::test]
    async fn test_malformed_line_is_skipped() {
        let (device, _) = ScriptedDevice::lines(&["not json", r#"{"x":1}"#]);
        let (mut bridge, _) = bridge_with(ScriptedOpener::new(vec![boxed(device)]), 1);
        let sink = RecordingSink::default();

        bridge.connect().await.unwrap();
        run_until_delivered(&mut bridge, &sink, 1).await.unwrap();

        assert_eq!(sink.payloads(), vec![r#"{"x":1}"#.to_string()]);
        let stats = bridge.stats();
        assert_eq!(stats.lines, 2);
        assert_eq!(stats.malformed, 1);
        assert_eq!(stats.records, 1);
    }

    #[tokio::test]
    async fn test_transient_failure_drops_record_and_continues() {
        let (device, _) = ScriptedDevice::lines(&[r#"{"n":1}"#, r#"{"n":2}"#]);
        let (mut bridge, _) = bridge_with(ScriptedOpener::new(vec![boxed(device)]), 1);
        let sink = RecordingSink::with_outcomes(vec![Err(DeliveryError::Transient(
            "HTTP 500 Internal Server Error".into(),
        ))]);

        bridge.connect().await.unwrap();
        run_until_delivered(&mut bridge, &sink, 2).await.unwrap();

        // Each record was attempted exactly once.
        assert_eq!(sink.payloads(), vec![r#"{"n":1}"#, r#"{"n":2}"#]);
        assert_eq!(bridge.stats().failed, 1);
        assert_eq!(bridge.stats().delivered, 1);
    }

    #[tokio::test]
    async fn test_fatal_sink_failure_stops_bridge() {
        let (device, _) = ScriptedDevice::lines(&[r#"{"n":1}"#, r#"{"n":2}"#]);
        let (mut bridge, _) = bridge_with(ScriptedOpener::new(vec![boxed(device)]), 1);
        let sink = RecordingSink::with_outcomes(vec![Err(DeliveryError::Fatal(
            "MQTT session has ended".into(),
        ))]);

        bridge.connect().await.unwrap();
        let result = bridge.run_outbound(&sink, Duration::ZERO).await;

        assert!(matches!(result, Err(BridgeError::Sink { .. })));
        assert_eq!(sink.payloads().len(), 1);
    }

    #[tokio::test]
    async fn test_link_fault_reconnects() {
        let (first, _) = ScriptedDevice::new(vec![
            Step::Data(b"{\"n\":1}\n".to_vec()),
            Step::Fail(ErrorKind::BrokenPipe),
        ]);
        let (second, _) = ScriptedDevice::lines(&[r#"{"n":2}"#]);
        let (mut bridge, opener) =
            bridge_with(ScriptedOpener::new(vec![boxed(first), boxed(second)]), 3);
        let sink = RecordingSink::default();

        bridge.connect().await.unwrap();
        run_until_delivered(&mut bridge, &sink, 2).await.unwrap();

        assert_eq!(sink.payloads(), vec![r#"{"n":1}"#, r#"{"n":2}"#]);
        assert_eq!(bridge.stats().reconnects, 1);
        assert_eq!(opener.open_count(), 2);
        assert_eq!(bridge.state(), BridgeState::Connected);
    }

    #[tokio::test]
    async fn test_reconnect_exhaustion_is_fatal() {
        let (device, _) = ScriptedDevice::new(vec![Step::Fail(ErrorKind::BrokenPipe)]);
        let (mut bridge, opener) = bridge_with(ScriptedOpener::new(vec![boxed(device)]), 2);
        let sink = RecordingSink::default();

        bridge.connect().await.unwrap();
        let result = bridge.run_outbound(&sink, Duration::ZERO).await;

        assert!(matches!(
            result,
            Err(BridgeError::Link(LinkError::Unavailable { attempts: 2, .. }))
        ));
        // One initial open plus two failed reconnect attempts.
        assert_eq!(opener.open_count(), 3);
    }

    #[tokio::test]
    async fn test_no_device_is_unavailable_after_six_attempts() {
        let opener = Arc::new(ScriptedOpener::new(vec![]));
        let manager = LinkManager::new(
            PortResolver::from_specs(None, ["/nonexistent-serial-bridge-dir/ttyACM*"]),
            opener.clone() as Arc<dyn PortOpener>,
            fast_settings(),
            fast_policy(6),
        );
        let mut bridge = Bridge::new(manager, CancellationToken::new());

        let err = bridge.connect().await.unwrap_err();
        assert!(matches!(
            &err,
            BridgeError::Link(LinkError::Unavailable { attempts: 6, last }) if last.contains("No serial port found")
        ));
        assert_eq!(opener.open_count(), 0);
        assert_eq!(bridge.state(), BridgeState::Init);
    }

    #[tokio::test]
    async fn test_connect_cancelled_before_device_appears() {
        let (mut bridge, _) = bridge_with(ScriptedOpener::new(vec![]), 6);
        bridge.cancel_token().cancel();
        assert!(!bridge.connect().await.unwrap());
        assert!(bridge.link().is_none());
    }

    #[tokio::test]
    async fn test_inbound_message_written_with_newline() {
        let (device, written) = ScriptedDevice::new(vec![]);
        let (mut bridge, _) = bridge_with(ScriptedOpener::new(vec![boxed(device)]), 1);
        let (tx, mut rx) = mpsc::channel(INBOUND_CAPACITY);

        bridge.connect().await.unwrap();
        tx.send(InboundMessage::new("sensors/nano33ble/command", b"LED ON".to_vec()))
            .await
            .unwrap();
        drop(tx);

        let result = bridge.run_inbound(&mut rx).await;
        assert!(matches!(result, Err(BridgeError::SourceClosed(_))));
        assert_eq!(written.lock().unwrap().as_slice(), b"LED ON\n");
        assert_eq!(bridge.stats().commands_written, 1);
    }

    #[tokio::test]
    async fn test_inbound_forward_logs_latency_since_receipt() {
        let captured = Captured::default();
        let _guard = captured.install();
        let (device, _) = ScriptedDevice::new(vec![]);
        let (mut bridge, _) = bridge_with(ScriptedOpener::new(vec![boxed(device)]), 1);
        let (tx, mut rx) = mpsc::channel(INBOUND_CAPACITY);

        bridge.connect().await.unwrap();
        let mut message = InboundMessage::new("cmd", b"LED ON".to_vec());
        message.received_us -= 250_000;
        tx.send(message).await.unwrap();
        drop(tx);
        let _ = bridge.run_inbound(&mut rx).await;

        let latency: u64 = captured
            .at(Level::DEBUG)
            .iter()
            .find_map(|m| m.strip_prefix("Forward latency ")?.strip_suffix(" us")?.parse().ok())
            .expect("latency not logged");
        assert!(latency >= 250_000);
    }

    #[tokio::test]
    async fn test_inbound_dropped_when_link_not_open() {
        let (mut bridge, _) = bridge_with(ScriptedOpener::new(vec![]), 1);
        let (tx, mut rx) = mpsc::channel(INBOUND_CAPACITY);

        tx.send(InboundMessage::new("sensors/nano33ble/command", b"LED ON".to_vec()))
            .await
            .unwrap();
        drop(tx);

        let result = bridge.run_inbound(&mut rx).await;
        assert!(matches!(result, Err(BridgeError::SourceClosed(_))));
        assert_eq!(bridge.stats().commands_dropped, 1);
        assert_eq!(bridge.stats().commands_written, 0);
    }

    #[tokio::test]
    async fn test_inbound_write_fault_reconnects() {
        let (broken, _) = ScriptedDevice::new(vec![]);
        let (healthy, written) = ScriptedDevice::new(vec![]);
        let (mut bridge, opener) = bridge_with(
            ScriptedOpener::new(vec![boxed(broken.failing_writes()), boxed(healthy)]),
            2,
        );
        let (tx, mut rx) = mpsc::channel(INBOUND_CAPACITY);

        bridge.connect().await.unwrap();
        tx.send(InboundMessage::new("cmd", b"LED ON".to_vec())).await.unwrap();

        // Second message is sent only after the reconnect has completed.
        let sender = async {
            while opener.open_count() < 2 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
            tx.send(InboundMessage::new("cmd", b"LED OFF".to_vec())).await.unwrap();
            drop(tx);
        };
        let (result, _) = tokio::time::timeout(Duration::from_secs(5), async {
            tokio::join!(bridge.run_inbound(&mut rx), sender)
        })
        .await
        .expect("bridge did not finish in time");

        assert!(matches!(result, Err(BridgeError::SourceClosed(_))));
        assert_eq!(written.lock().unwrap().as_slice(), b"LED OFF\n");
        let stats = bridge.stats();
        assert_eq!(stats.reconnects, 1);
        assert_eq!(stats.commands_dropped, 1);
        assert_eq!(stats.commands_written, 1);
    }

    #[tokio::test]
    async fn test_shutdown_runs_once() {
        let (device, _) = ScriptedDevice::new(vec![]);
        let (mut bridge, _) = bridge_with(ScriptedOpener::new(vec![boxed(device)]), 1);
        let sink = RecordingSink::default();

        bridge.connect().await.unwrap();
        let link = bridge.link().cloned().unwrap();

        bridge.shutdown(Some(&sink)).await;
        bridge.shutdown(Some(&sink)).await;

        assert_eq!(sink.closes.load(Ordering::SeqCst), 1);
        assert!(!link.is_open());
        assert_eq!(bridge.state(), BridgeState::Stopped);
        assert!(bridge.cancel_token().is_cancelled());
    }

    #[test]
    fn test_stats_summary() {
        let stats = BridgeStats {
            lines: 3,
            records: 2,
            delivered: 2,
            malformed: 1,
            ..BridgeStats::default()
        };
        let text = stats.to_string();
        assert!(text.starts_with("3 lines, 2 records, 2 delivered, 0 failed, 1 malformed"));
        assert!(text.ends_with("0 reconnects"));
    }
}
