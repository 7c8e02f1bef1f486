//! Custom error types for the application.
//!
//! This module defines the primary error type, `CamError`, for the entire
//! application. Using the `thiserror` crate, it provides a centralized and
//! consistent way to classify failures, from device churn to configuration
//! problems.
//!
//! ## Error Hierarchy
//!
//! The variants fall into a few families:
//!
//! - **Transient device errors** (`DeviceBusy`, `DeviceNotFound`): retried
//!   with fixed backoff by the session layer, never by the negotiator.
//! - **Caller-facing negotiation errors** (`UnsupportedSetting`,
//!   `InvalidChoice`): not retried; the caller must supply a different value.
//!   `InvalidChoice` carries the rejected value together with the device's
//!   current choice list so the caller can present it.
//! - **Non-fatal verification** (`VerificationMismatch`): the device accepted
//!   a write but holds a different value afterwards. Logged with both values
//!   and surfaced; the session continues with whatever the device holds.
//! - **Capture and assembly failures** (`CaptureFailed`, `AssemblyFailed`,
//!   `Transcode`): isolated and counted by the scheduler / codec chain; a
//!   failed capture never fabricates a frame and a failed assembly never
//!   reports success with zero frames written.
//!
//! By using `#[from]`, `CamError` can be seamlessly created from underlying
//! error types, simplifying error handling throughout the application with
//! the `?` operator.

use thiserror::Error;

/// Convenience alias for results using the application error type.
pub type CamResult<T> = std::result::Result<T, CamError>;

/// Application-wide error taxonomy.
#[derive(Error, Debug)]
pub enum CamError {
    /// The device is present but currently refusing commands.
    #[error("Device busy")]
    DeviceBusy,

    /// No device was found on the transport.
    #[error("Device not found")]
    DeviceNotFound,

    /// The device handle is not in a state that allows the operation.
    #[error("Device unavailable: {0}")]
    DeviceUnavailable(String),

    /// No candidate physical node for the logical setting exists on this
    /// device.
    #[error("Unsupported setting '{0}' for this device")]
    UnsupportedSetting(String),

    /// The desired value cannot be resolved against the device's choice list.
    #[error("Invalid choice '{value}' (available: {choices:?})")]
    InvalidChoice {
        /// The rejected value as supplied by the caller.
        value: String,
        /// The device's current choice list for the node.
        choices: Vec<String>,
    },

    /// A committed write read back as a different value.
    #[error("Verification mismatch: wrote '{requested}', device holds '{observed}'")]
    VerificationMismatch {
        /// The value resolved and written by the negotiator.
        requested: String,
        /// The value the device reported after the write.
        observed: String,
    },

    /// A single capture attempt failed after the fallback technique.
    #[error("Capture failed: {0}")]
    CaptureFailed(String),

    /// A capture was requested while another is in flight.
    #[error("Capture already in flight")]
    SessionBusy,

    /// The session exhausted its connect retries and is terminal.
    #[error("Session faulted: {0}")]
    SessionFaulted(String),

    /// Every codec-chain entry failed, or zero frames were written.
    #[error("Assembly failed: {0}")]
    AssemblyFailed(String),

    /// The external transcoder process failed for one codec.
    #[error("Transcode error: {0}")]
    Transcode(String),

    /// Blob store failure.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Configuration file or environment parsing failure.
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CamError {
    /// True for failures the session layer retries with backoff.
    pub fn is_transient(&self) -> bool {
        matches!(self, CamError::DeviceBusy | CamError::DeviceNotFound)
    }
}
