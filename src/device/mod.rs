//! Device driver abstraction.
//!
//! The concrete wire protocol (PTP over USB in the field) lives behind the
//! [`CameraDevice`] trait; the core is agnostic to how a device handle is
//! obtained and only cares about how it is driven once connected. The
//! scripted [`mock::MockCamera`] implements the same trait for tests and
//! dry runs.

pub mod mock;
pub mod tree;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::CamResult;
pub use tree::{ConfigNode, NodeKind};

/// Reference to a frame still held in device-side storage.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RemoteFileRef {
    /// Device-side folder, e.g. `/store_00010001/DCIM/100MSDCF`.
    pub folder: String,
    /// Device-side file name, e.g. `DSC01234.JPG`.
    pub name: String,
}

/// One captured image as returned by the driver.
#[derive(Clone, Debug)]
pub struct RawFrame {
    /// Encoded image bytes.
    pub data: Bytes,
    /// Device-side storage reference, when the capture technique leaves one.
    pub remote_ref: Option<RemoteFileRef>,
}

/// Driver primitives for one camera.
///
/// Implementations map these onto the actual transport. Errors from
/// `connect` distinguish the transient conditions the session retries
/// (`CamError::DeviceBusy`, `CamError::DeviceNotFound`) from hard failures.
#[async_trait]
pub trait CameraDevice: Send + Sync {
    /// Open the device handle.
    async fn connect(&mut self) -> CamResult<()>;

    /// Read the live configuration tree. Read-only snapshot; firmware may
    /// clamp or reject writes silently, so callers re-read after any write.
    async fn read_config(&mut self) -> CamResult<ConfigNode>;

    /// Apply a staged configuration tree back to the device.
    async fn write_config(&mut self, tree: &ConfigNode) -> CamResult<()>;

    /// Primary capture technique (live-preview grab).
    async fn capture_primary(&mut self) -> CamResult<RawFrame>;

    /// Fallback capture technique (trigger, then poll for the file).
    async fn capture_fallback(&mut self) -> CamResult<RawFrame>;

    /// Free device-side storage for a retrieved frame. Best-effort.
    async fn free_remote(&mut self, frame_ref: &RemoteFileRef) -> CamResult<()>;
}
