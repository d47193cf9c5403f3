// src/io/serial/link.rs
//
// Serial link manager: acquisition with bounded retry, line-level read/write
// and idempotent close.
//
// The device handle lives behind a single mutex. Reads take it for at most
// one read timeout; every write takes it for the duration of write + flush,
// so two writers can never interleave a command line.

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::framer::{frame_outgoing, Line, LineFramer};
use super::resolver::PortResolver;
use super::utils::{self, LinkSettings};
use crate::error::LinkError;
use crate::retry::{pause, retry_bounded, Attempt, RetryError, RetryPolicy};

const READ_CHUNK: usize = 256;

// ============================================================================
// Device seam
// ============================================================================

/// Byte-level device handle. Reads must return `ErrorKind::TimedOut` when the
/// read timeout elapses with no data.
pub trait LinkDevice: Read + Write + Send {}

impl<T: Read + Write + Send> LinkDevice for T {}

/// Why an open attempt failed.
#[derive(Clone, Debug, PartialEq)]
pub enum OpenError {
    /// Claimed by another process.
    Busy(String),
    /// Anything else; worth retrying.
    Other(String),
}

impl OpenError {
    /// Classify a driver error message.
    pub fn classify(message: impl Into<String>) -> OpenError {
        let message = message.into();
        if message.to_lowercase().contains("busy") {
            OpenError::Busy(message)
        } else {
            OpenError::Other(message)
        }
    }
}

/// Opens device paths. The system implementation uses the serialport crate;
/// tests substitute scripted devices.
pub trait PortOpener: Send + Sync {
    fn open(&self, path: &str, settings: &LinkSettings) -> Result<Box<dyn LinkDevice>, OpenError>;
}

/// Real serial ports.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemPortOpener;

impl PortOpener for SystemPortOpener {
    fn open(&self, path: &str, settings: &LinkSettings) -> Result<Box<dyn LinkDevice>, OpenError> {
        let port = serialport::new(path, settings.baud_rate)
            .data_bits(utils::to_serialport_data_bits(settings.data_bits))
            .stop_bits(utils::to_serialport_stop_bits(settings.stop_bits))
            .parity(utils::to_serialport_parity(settings.parity))
            .timeout(settings.read_timeout)
            .open()
            .map_err(|e| OpenError::classify(e.to_string()))?;
        Ok(Box::new(port))
    }
}

// ============================================================================
// Serial Link
// ============================================================================

struct ReadState {
    framer: LineFramer,
    pending: VecDeque<Line>,
}

/// One open device. Dropping the link closes it.
pub struct SerialLink {
    path: String,
    settings: LinkSettings,
    device: Mutex<Option<Box<dyn LinkDevice>>>,
    read_state: Mutex<ReadState>,
}

impl std::fmt::Debug for SerialLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialLink")
            .field("path", &self.path)
            .field("settings", &self.settings)
            .field("open", &self.is_open())
            .finish()
    }
}

impl SerialLink {
    pub fn new(path: impl Into<String>, device: Box<dyn LinkDevice>, settings: LinkSettings) -> Self {
        let framer = LineFramer::new(settings.max_line_length);
        Self {
            path: path.into(),
            settings,
            device: Mutex::new(Some(device)),
            read_state: Mutex::new(ReadState {
                framer,
                pending: VecDeque::new(),
            }),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn settings(&self) -> &LinkSettings {
        &self.settings
    }

    pub fn is_open(&self) -> bool {
        self.lock_device().is_some()
    }

    fn lock_device(&self) -> MutexGuard<'_, Option<Box<dyn LinkDevice>>> {
        // A panic while holding the lock leaves the handle itself intact.
        self.device.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_read_state(&self) -> MutexGuard<'_, ReadState> {
        self.read_state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn io_fault(&self, message: impl Into<String>) -> LinkError {
        LinkError::Io {
            path: self.path.clone(),
            message: message.into(),
        }
    }

    /// Wait up to one read timeout for a complete line.
    ///
    /// `Ok(None)` means the timeout elapsed; the link stays open and any
    /// partial line stays buffered.
    pub fn read_line(&self) -> Result<Option<Line>, LinkError> {
        let mut state = self.lock_read_state();
        if let Some(line) = state.pending.pop_front() {
            return Ok(Some(line));
        }

        let mut buf = [0u8; READ_CHUNK];
        loop {
            let read_result = {
                let mut guard = self.lock_device();
                let Some(device) = guard.as_mut() else {
                    return Err(LinkError::Closed(self.path.clone()));
                };
                device.read(&mut buf)
            };

            match read_result {
                Ok(0) => return Err(self.io_fault("device disconnected (EOF)")),
                Ok(n) => {
                    let lines = state.framer.feed(&buf[..n]);
                    state.pending.extend(lines);
                    if let Some(line) = state.pending.pop_front() {
                        return Ok(Some(line));
                    }
                }
                Err(ref e) if e.kind() == io::ErrorKind::TimedOut => return Ok(None),
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(self.io_fault(e.to_string())),
            }
        }
    }

    /// Write one line: payload, terminator, flush.
    pub fn write_line(&self, payload: &[u8]) -> Result<(), LinkError> {
        let framed = frame_outgoing(payload);
        let mut guard = self.lock_device();
        let Some(device) = guard.as_mut() else {
            return Err(LinkError::Closed(self.path.clone()));
        };
        device
            .write_all(&framed)
            .and_then(|_| device.flush())
            .map_err(|e| self.io_fault(e.to_string()))
    }

    /// Release the device. Safe to call any number of times.
    pub fn close(&self) {
        let device = self.lock_device().take();
        if device.is_some() {
            let mut state = self.lock_read_state();
            state.framer.reset();
            state.pending.clear();
            info!("Serial port closed: {}", self.path);
        }
    }

    /// Lazy, unbounded sequence of lines from this link.
    pub fn lines(&self) -> Lines<'_> {
        Lines {
            link: self,
            cancel: None,
            done: false,
        }
    }
}

impl Drop for SerialLink {
    fn drop(&mut self) {
        self.close();
    }
}

// ============================================================================
// Line sequence
// ============================================================================

/// Iterator over the lines of a link.
///
/// Timeouts are skipped. The sequence ends after yielding the first fault, or
/// when the cancellation token fires between reads.
pub struct Lines<'a> {
    link: &'a SerialLink,
    cancel: Option<CancellationToken>,
    done: bool,
}

impl<'a> Lines<'a> {
    pub fn until_cancelled(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }
}

impl Iterator for Lines<'_> {
    type Item = Result<Line, LinkError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.done || self.cancel.as_ref().is_some_and(|c| c.is_cancelled()) {
                return None;
            }
            match self.link.read_line() {
                Ok(Some(line)) => return Some(Ok(line)),
                Ok(None) => continue,
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            }
        }
    }
}

// ============================================================================
// Acquisition
// ============================================================================

/// Resolve and open a device with bounded retry.
///
/// "Busy" aborts at once; everything else is retried after `policy.delay`.
/// A successful open is followed by the settle pause before returning. The
/// opens themselves run on the blocking pool. Failures are logged here at
/// warn/debug level only; the caller owns the final report.
pub async fn acquire(
    resolver: &PortResolver,
    opener: Arc<dyn PortOpener>,
    settings: &LinkSettings,
    policy: &RetryPolicy,
    cancel: Option<&CancellationToken>,
) -> Result<SerialLink, LinkError> {
    let total = policy.attempts;
    let result = retry_bounded(policy, cancel, |attempt| {
        let resolver = resolver.clone();
        let opener = Arc::clone(&opener);
        let settings = settings.clone();
        async move {
            let opened = tokio::task::spawn_blocking(move || {
                let path = resolver.resolve()?;
                debug!("Attempt {}/{}: opening {}", attempt, total, path);
                let device = opener.open(&path, &settings);
                Some((path, device, settings))
            })
            .await;

            match opened {
                Err(e) => {
                    let err = LinkError::Open {
                        path: "serial port".to_string(),
                        message: format!("open task failed: {}", e),
                    };
                    warn!("Attempt {}/{}: {}", attempt, total, err);
                    Attempt::Retry(err)
                }
                Ok(None) => {
                    warn!("Attempt {}/{}: {}", attempt, total, LinkError::PortNotFound);
                    Attempt::Retry(LinkError::PortNotFound)
                }
                Ok(Some((path, Ok(device), settings))) => {
                    Attempt::Done(SerialLink::new(path, device, settings))
                }
                Ok(Some((path, Err(OpenError::Busy(message)), _))) => {
                    let err = LinkError::PortBusy { path, message };
                    debug!("Attempt {}/{}: {}", attempt, total, err);
                    Attempt::Abort(err)
                }
                Ok(Some((path, Err(OpenError::Other(message)), _))) => {
                    let err = LinkError::Open { path, message };
                    warn!("Attempt {}/{}: {}", attempt, total, err);
                    Attempt::Retry(err)
                }
            }
        }
    })
    .await;

    match result {
        Ok(link) => {
            if !pause(settings.settle, cancel).await {
                return Err(LinkError::Cancelled);
            }
            info!(
                "Serial port opened: {} at {}",
                link.path(),
                link.settings().describe()
            );
            Ok(link)
        }
        Err(RetryError::Aborted(err)) => Err(err),
        Err(RetryError::Cancelled) => Err(LinkError::Cancelled),
        Err(RetryError::Exhausted { attempts, last }) => Err(LinkError::Unavailable {
            attempts,
            last: last.to_string(),
        }),
    }
}

/// Everything needed to (re)acquire the device, bundled so the bridge can
/// hand it to a spawned task.
#[derive(Clone)]
pub struct LinkManager {
    resolver: PortResolver,
    opener: Arc<dyn PortOpener>,
    settings: LinkSettings,
    policy: RetryPolicy,
}

impl LinkManager {
    pub fn new(
        resolver: PortResolver,
        opener: Arc<dyn PortOpener>,
        settings: LinkSettings,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            resolver,
            opener,
            settings,
            policy,
        }
    }

    /// Acquisition with this manager's policy.
    pub async fn acquire(
        &self,
        cancel: Option<&CancellationToken>,
    ) -> Result<SerialLink, LinkError> {
        acquire(
            &self.resolver,
            Arc::clone(&self.opener),
            &self.settings,
            &self.policy,
            cancel,
        )
        .await
    }
}
