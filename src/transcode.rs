//! External transcoder invocation.
//!
//! The transcoder is a collaborator, not a linked library: each codec
//! attempt spawns the configured binary (ffmpeg by default) with an input
//! media path, a codec identifier, and an output path. Invocations are
//! idempotent per codec, so the assembler can safely re-invoke with the
//! next chain entry after a failure, given a clean output path.

use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use log::debug;
use tokio::process::Command;

use crate::error::{CamError, CamResult};

/// One entry in a codec fallback chain.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CodecSpec {
    /// Encoder identifier passed to the transcoder (`-c:v`).
    pub name: String,
    /// Container extension for the output artifact.
    pub container: String,
    /// Codec-specific arguments.
    pub extra_args: Vec<String>,
}

impl CodecSpec {
    /// H.264 delivery encode: web-friendly, fast-start, broadly decodable.
    pub fn delivery_h264() -> Self {
        Self {
            name: "libx264".to_string(),
            container: "mp4".to_string(),
            extra_args: [
                "-preset",
                "medium",
                "-crf",
                "23",
                "-movflags",
                "+faststart",
                "-pix_fmt",
                "yuv420p",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        }
    }

    /// Plain MPEG-4 part 2, for toolchains without an H.264 encoder.
    pub fn mpeg4() -> Self {
        Self {
            name: "mpeg4".to_string(),
            container: "mp4".to_string(),
            extra_args: ["-qscale:v", "5", "-pix_fmt", "yuv420p"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }

    /// Motion-JPEG in AVI, the most compatible intermediate.
    pub fn mjpeg() -> Self {
        Self {
            name: "mjpeg".to_string(),
            container: "avi".to_string(),
            extra_args: ["-q:v", "3"].iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Default fallback chain, first success wins.
    pub fn default_chain() -> Vec<CodecSpec> {
        vec![Self::delivery_h264(), Self::mpeg4(), Self::mjpeg()]
    }
}

/// External media transcoder.
#[async_trait]
pub trait Transcoder: Send + Sync {
    /// Encode `input` (a file or an image-sequence pattern) to `output`
    /// with the given codec at the given frame rate.
    async fn transcode(
        &self,
        input: &Path,
        fps: f64,
        codec: &CodecSpec,
        output: &Path,
    ) -> CamResult<()>;
}

/// Transcoder backed by an ffmpeg-compatible binary.
pub struct FfmpegTranscoder {
    binary: String,
}

impl FfmpegTranscoder {
    /// Use the given binary, e.g. `"ffmpeg"`.
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    fn build_args(input: &Path, fps: f64, codec: &CodecSpec, output: &Path) -> Vec<String> {
        let mut args = vec![
            "-y".to_string(),
            "-framerate".to_string(),
            format!("{fps}"),
            "-i".to_string(),
            input.display().to_string(),
            "-c:v".to_string(),
            codec.name.clone(),
        ];
        args.extend(codec.extra_args.iter().cloned());
        args.push(output.display().to_string());
        args
    }
}

#[async_trait]
impl Transcoder for FfmpegTranscoder {
    async fn transcode(
        &self,
        input: &Path,
        fps: f64,
        codec: &CodecSpec,
        output: &Path,
    ) -> CamResult<()> {
        let args = Self::build_args(input, fps, codec, output);
        debug!("Invoking {} {}", self.binary, args.join(" "));
        let result = Command::new(&self.binary)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|err| CamError::Transcode(format!("{} failed to spawn: {err}", self.binary)))?;

        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            let tail: String = stderr
                .lines()
                .rev()
                .take(4)
                .collect::<Vec<_>>()
                .into_iter()
                .rev()
                .collect::<Vec<_>>()
                .join("; ");
            return Err(CamError::Transcode(format!(
                "{} ({}) exited with {}: {tail}",
                self.binary, codec.name, result.status
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_build_args_order() {
        let input = PathBuf::from("/tmp/frames/frame_%06d.jpg");
        let output = PathBuf::from("/tmp/out.mp4");
        let args =
            FfmpegTranscoder::build_args(&input, 30.0, &CodecSpec::delivery_h264(), &output);

        assert_eq!(args[0], "-y");
        assert_eq!(args[1], "-framerate");
        assert_eq!(args[2], "30");
        assert_eq!(args[3], "-i");
        assert_eq!(args[4], "/tmp/frames/frame_%06d.jpg");
        assert_eq!(args[5], "-c:v");
        assert_eq!(args[6], "libx264");
        assert_eq!(args.last().map(String::as_str), Some("/tmp/out.mp4"));
        assert!(args.contains(&"+faststart".to_string()));
    }

    #[test]
    fn test_default_chain_prefers_delivery_codec() {
        let chain = CodecSpec::default_chain();
        assert_eq!(chain[0].name, "libx264");
        assert_eq!(chain.last().map(|c| c.container.as_str()), Some("avi"));
    }
}
