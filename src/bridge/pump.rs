// src/bridge/pump.rs
//
// Blocking line pump. Reads happen on one dedicated blocking thread which
// forwards each framed line to the async router over a bounded channel, so a
// slow sink applies backpressure to the reader instead of growing a queue.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::LinkError;
use crate::io::serial::{Line, SerialLink};

/// Lines buffered between the reader thread and the router.
pub const PUMP_CAPACITY: usize = 64;

/// What the reader thread reports.
#[derive(Debug)]
pub enum PumpEvent {
    Line(Line),
    /// The link faulted; the pump has stopped.
    Fault(LinkError),
}

/// Start reading `link` on a blocking thread.
///
/// The pump stops after the first fault, when `cancel` fires (checked between
/// reads, so within one read timeout), or when the receiver is dropped.
pub fn spawn(
    link: Arc<SerialLink>,
    cancel: CancellationToken,
) -> (mpsc::Receiver<PumpEvent>, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(PUMP_CAPACITY);
    let handle = tokio::task::spawn_blocking(move || {
        for item in link.lines().until_cancelled(cancel) {
            let event = match item {
                Ok(line) => PumpEvent::Line(line),
                Err(e) => PumpEvent::Fault(e),
            };
            if tx.blocking_send(event).is_err() {
                break;
            }
        }
        debug!("Line pump for {} stopped", link.path());
    });
    (rx, handle)
}
