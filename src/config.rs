//! Application configuration.
//!
//! Settings are loaded from a TOML file (default `config.toml`) with
//! `TETHERCAM_*` environment variables layered on top, e.g.
//! `TETHERCAM_SESSION__CONNECT_ATTEMPTS=3`.
//!
//! ```toml
//! [session]
//! connect_attempts = 5
//! connect_backoff = "2s"
//! consecutive_failure_threshold = 3
//!
//! [capture]
//! fps = 30.0
//!
//! [storage]
//! root = "./blobs"
//! folder = "a6700_frames"
//!
//! [transcoder]
//! binary = "ffmpeg"
//! ```

use std::path::Path;
use std::time::Duration;

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use crate::error::CamResult;

/// Session-layer retry and recovery policy.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionSettings {
    /// Bounded connect attempts before the session faults.
    pub connect_attempts: u32,
    /// Fixed backoff between connect attempts.
    #[serde(with = "humantime_serde")]
    pub connect_backoff: Duration,
    /// Consecutive capture failures before the scheduler resets the session.
    pub consecutive_failure_threshold: u32,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            connect_attempts: 5,
            connect_backoff: Duration::from_secs(2),
            consecutive_failure_threshold: 3,
        }
    }
}

/// Default capture cadence parameters.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CaptureSettings {
    /// Target frame rate for duration-and-rate runs and video assembly.
    pub fps: f64,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self { fps: 30.0 }
    }
}

/// Blob store location and naming.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StorageSettings {
    /// Root directory of the filesystem-backed store.
    pub root: String,
    /// Folder prefix prepended to generated blob names.
    pub folder: String,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            root: "./blobs".to_string(),
            folder: "a6700_frames".to_string(),
        }
    }
}

/// External transcoder process configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TranscoderSettings {
    /// Transcoder binary invoked per codec-chain entry.
    pub binary: String,
}

impl Default for TranscoderSettings {
    fn default() -> Self {
        Self {
            binary: "ffmpeg".to_string(),
        }
    }
}

/// Top-level application settings.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Session retry policy.
    pub session: SessionSettings,
    /// Capture cadence defaults.
    pub capture: CaptureSettings,
    /// Blob store configuration.
    pub storage: StorageSettings,
    /// Transcoder configuration.
    pub transcoder: TranscoderSettings,
}

impl Settings {
    /// Load settings from an optional TOML file plus environment overrides.
    ///
    /// A missing file is not an error; defaults apply for every key the
    /// sources do not provide.
    pub fn new(path: Option<&Path>) -> CamResult<Self> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(true));
        } else {
            builder = builder.add_source(File::with_name("config").required(false));
        }
        let cfg = builder
            .add_source(Environment::with_prefix("TETHERCAM").separator("__"))
            .build()?;
        Ok(cfg.try_deserialize()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_without_file() {
        let settings = Settings::default();
        assert_eq!(settings.session.connect_attempts, 5);
        assert_eq!(settings.session.connect_backoff, Duration::from_secs(2));
        assert_eq!(settings.transcoder.binary, "ffmpeg");
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .unwrap();
        writeln!(
            file,
            r#"
[session]
connect_attempts = 2
connect_backoff = "500ms"
consecutive_failure_threshold = 4

[capture]
fps = 10.0
"#
        )
        .unwrap();

        let settings = Settings::new(Some(file.path())).unwrap();
        assert_eq!(settings.session.connect_attempts, 2);
        assert_eq!(settings.session.connect_backoff, Duration::from_millis(500));
        assert_eq!(settings.session.consecutive_failure_threshold, 4);
        assert_eq!(settings.capture.fps, 10.0);
        // Sections absent from the file keep their defaults.
        assert_eq!(settings.storage.folder, "a6700_frames");
    }
}
