//! Capture session state machine.
//!
//! A [`CaptureSession`] exclusively owns one device handle and governs the
//! connect/capture/retry/reset lifecycle:
//!
//! ```text
//! Disconnected --connect()--> Connecting --success--> Ready
//!                                  |  ^
//!            transient busy/not-found  | (bounded retry, fixed backoff)
//!                                  v  |
//!                              Connecting --exhausted--> Faulted (terminal)
//!
//! Ready --capture_one()--> Capturing --success--> Ready  (emits one Frame)
//!                                    --failure--> Ready  (no Frame)
//! Ready --reset()--> Connecting
//! ```
//!
//! At most one capture is in flight at a time; a capture request while
//! `Capturing` is rejected, never queued.

use std::path::PathBuf;
use std::time::Duration;

use bytes::Bytes;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use tokio::time::{sleep, Instant};

use crate::config::SessionSettings;
use crate::device::{CameraDevice, ConfigNode, RawFrame};
use crate::error::{CamError, CamResult};

/// Minimum spacing between sequence timestamps when the clock resolution is
/// coarser than capture latency.
const TIMESTAMP_TICK: Duration = Duration::from_micros(1);

/// Session lifecycle state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    /// No device handle open.
    Disconnected,
    /// Connect loop in progress.
    Connecting,
    /// Connected and idle.
    Ready,
    /// One capture in flight.
    Capturing,
    /// Connect retries exhausted; terminal.
    Faulted,
}

/// Frame payload, either in-memory bytes or a locally materialized file.
///
/// The two are interchangeable at the boundary; a frame is immutable once
/// produced.
#[derive(Clone, Debug)]
pub enum FramePayload {
    /// Raw encoded image bytes.
    Bytes(Bytes),
    /// Path to a locally materialized file.
    File(PathBuf),
}

impl FramePayload {
    /// Materialize the payload as bytes, reading the file variant from disk.
    pub async fn bytes(&self) -> CamResult<Bytes> {
        match self {
            FramePayload::Bytes(data) => Ok(data.clone()),
            FramePayload::File(path) => Ok(Bytes::from(tokio::fs::read(path).await?)),
        }
    }
}

/// One captured image.
#[derive(Clone, Debug)]
pub struct Frame {
    /// Monotonic capture time since the session epoch; the sole ordering
    /// key. Strictly increasing within one session.
    pub sequence_timestamp: Duration,
    /// Encoded image data.
    pub payload: FramePayload,
}

/// Bounded retry policy for the connect loop.
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    /// Maximum connect attempts before the session faults.
    pub max_attempts: u32,
    /// Fixed delay between attempts.
    pub backoff_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff_delay: Duration::from_secs(2),
        }
    }
}

impl From<&SessionSettings> for RetryPolicy {
    fn from(settings: &SessionSettings) -> Self {
        Self {
            max_attempts: settings.connect_attempts,
            backoff_delay: settings.connect_backoff,
        }
    }
}

/// State machine owning exactly one live device handle.
pub struct CaptureSession<D: CameraDevice> {
    device: D,
    state: SessionState,
    policy: RetryPolicy,
    retry_count: u32,
    last_error: Option<String>,
    epoch: Instant,
    last_timestamp: Duration,
}

impl<D: CameraDevice> CaptureSession<D> {
    /// Wrap a device handle. The session starts `Disconnected`.
    pub fn new(device: D, policy: RetryPolicy) -> Self {
        Self {
            device,
            state: SessionState::Disconnected,
            policy,
            retry_count: 0,
            last_error: None,
            epoch: Instant::now(),
            last_timestamp: Duration::ZERO,
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Capture attempts failed since the last successful transition into
    /// `Ready`.
    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    /// Most recent failure classification.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Borrow the owned device, e.g. for driver-specific inspection.
    pub fn device(&self) -> &D {
        &self.device
    }

    /// Mutably borrow the owned device.
    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    /// Open the device handle with bounded retries and fixed backoff.
    ///
    /// Transient conditions (busy device, not yet enumerated) are retried;
    /// anything else, or exhausting the attempt limit, faults the session.
    /// A faulted session is terminal: the caller must build a new one.
    pub async fn connect(&mut self) -> CamResult<()> {
        match self.state {
            SessionState::Disconnected => self.connect_loop().await,
            SessionState::Faulted => Err(CamError::SessionFaulted(
                "session is terminal; create a new session".into(),
            )),
            _ => Ok(()),
        }
    }

    /// Explicit recovery path: drop back to `Connecting` and redo the
    /// connect loop. Invoked by the scheduler after consecutive capture
    /// failures.
    pub async fn reset(&mut self) -> CamResult<()> {
        if self.state != SessionState::Ready {
            return Err(CamError::DeviceUnavailable(format!(
                "reset requires Ready, session is {:?}",
                self.state
            )));
        }
        debug!("Resetting capture session");
        self.connect_loop().await
    }

    async fn connect_loop(&mut self) -> CamResult<()> {
        self.state = SessionState::Connecting;
        for attempt in 1..=self.policy.max_attempts {
            match self.device.connect().await {
                Ok(()) => {
                    self.state = SessionState::Ready;
                    self.retry_count = 0;
                    self.last_error = None;
                    debug!("Device connected on attempt {attempt}");
                    return Ok(());
                }
                Err(err) if err.is_transient() && attempt < self.policy.max_attempts => {
                    warn!(
                        "Device not ready ({err}), attempt {attempt}/{}; retrying in {:?}",
                        self.policy.max_attempts, self.policy.backoff_delay
                    );
                    sleep(self.policy.backoff_delay).await;
                }
                Err(err) => {
                    self.state = SessionState::Faulted;
                    self.last_error = Some(err.to_string());
                    return Err(CamError::SessionFaulted(err.to_string()));
                }
            }
        }
        // Unreachable: the loop always returns on the last attempt.
        self.state = SessionState::Faulted;
        Err(CamError::SessionFaulted("connect attempts exhausted".into()))
    }

    /// Read the device's live configuration tree.
    ///
    /// Read-only snapshot; callers must re-read after any write because
    /// firmware may clamp or reject a write silently.
    pub async fn read_config(&mut self) -> CamResult<ConfigNode> {
        self.require_connected()?;
        self.device.read_config().await
    }

    /// Apply a staged configuration tree to the device.
    pub async fn write_config(&mut self, tree: &ConfigNode) -> CamResult<()> {
        self.require_connected()?;
        self.device.write_config(tree).await
    }

    /// Capture a single frame.
    ///
    /// Blocks until the device reports a frame or a definitive failure. If
    /// the primary technique (live-preview grab) fails, exactly one fallback
    /// attempt (trigger and poll for the file) is made; never more, to bound
    /// latency. Device-side storage for the retrieved frame is freed
    /// best-effort.
    pub async fn capture_one(&mut self) -> CamResult<Frame> {
        match self.state {
            SessionState::Capturing => return Err(CamError::SessionBusy),
            SessionState::Ready => {}
            other => {
                return Err(CamError::DeviceUnavailable(format!(
                    "capture requires Ready, session is {other:?}"
                )))
            }
        }
        self.state = SessionState::Capturing;

        let raw = match self.device.capture_primary().await {
            Ok(raw) => Ok(raw),
            Err(primary_err) => {
                debug!("Primary capture failed ({primary_err}); trying fallback");
                self.device.capture_fallback().await
            }
        };

        match raw {
            Ok(raw) => {
                self.free_best_effort(&raw).await;
                let frame = Frame {
                    sequence_timestamp: self.next_timestamp(),
                    payload: FramePayload::Bytes(raw.data),
                };
                self.state = SessionState::Ready;
                Ok(frame)
            }
            Err(err) => {
                self.state = SessionState::Ready;
                self.retry_count += 1;
                self.last_error = Some(err.to_string());
                Err(CamError::CaptureFailed(err.to_string()))
            }
        }
    }

    async fn free_best_effort(&mut self, raw: &RawFrame) {
        if let Some(frame_ref) = &raw.remote_ref {
            if let Err(err) = self.device.free_remote(frame_ref).await {
                warn!(
                    "Could not free device-side file {}/{}: {err}",
                    frame_ref.folder, frame_ref.name
                );
            }
        }
    }

    /// Monotonic, strictly increasing timestamp. Ties with the previous
    /// frame are broken by submission order via a fixed tick.
    fn next_timestamp(&mut self) -> Duration {
        let elapsed = self.epoch.elapsed();
        let stamp = if elapsed <= self.last_timestamp {
            self.last_timestamp + TIMESTAMP_TICK
        } else {
            elapsed
        };
        self.last_timestamp = stamp;
        stamp
    }

    fn require_connected(&self) -> CamResult<()> {
        match self.state {
            SessionState::Ready | SessionState::Capturing => Ok(()),
            other => Err(CamError::DeviceUnavailable(format!(
                "config access requires a connected session, session is {other:?}"
            ))),
        }
    }

    #[cfg(test)]
    pub(crate) fn force_state(&mut self, state: SessionState) {
        self.state = state;
    }
}
