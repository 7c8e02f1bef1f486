//! Frame sequence assembly.
//!
//! Collects the frames of one multi-shot run, orders them
//! deterministically by sequence timestamp, and encodes them into a single
//! media artifact through a codec fallback chain. Frames arrive
//! time-ordered by construction, but the assembler re-sorts defensively to
//! tolerate out-of-order delivery. Frames that cannot be materialized are
//! skipped and counted; the assembly fails only when every codec-chain
//! entry fails or zero frames were written.

use std::path::{Path, PathBuf};

use log::{info, warn};
use uuid::Uuid;

use crate::error::{CamError, CamResult};
use crate::session::Frame;
use crate::transcode::{CodecSpec, Transcoder};

/// The finished artifact of one assembly.
#[derive(Clone, Debug)]
pub struct VideoAssembly {
    /// Path of the encoded artifact.
    pub path: PathBuf,
    /// The codec-chain entry that succeeded.
    pub codec: String,
    /// Frames written into the sequence.
    pub frames_written: u64,
    /// Frames skipped because they could not be materialized.
    pub frames_skipped: u64,
}

/// Orders captured frames and drives the transcoder's codec chain.
pub struct FrameSequenceAssembler<'a> {
    transcoder: &'a dyn Transcoder,
    fps: f64,
    chain: Vec<CodecSpec>,
}

impl<'a> FrameSequenceAssembler<'a> {
    /// Assemble at `fps`, attempting `chain` entries in order.
    pub fn new(transcoder: &'a dyn Transcoder, fps: f64, chain: Vec<CodecSpec>) -> Self {
        Self {
            transcoder,
            fps,
            chain,
        }
    }

    /// Encode `frames` into one artifact next to `output_stem` (the chain
    /// entry decides the extension).
    pub async fn assemble(
        &self,
        mut frames: Vec<Frame>,
        output_stem: &Path,
    ) -> CamResult<VideoAssembly> {
        if frames.is_empty() {
            return Err(CamError::AssemblyFailed("no frames captured".into()));
        }
        if self.chain.is_empty() {
            return Err(CamError::AssemblyFailed("empty codec chain".into()));
        }

        frames.sort_by_key(|f| f.sequence_timestamp);

        let work_dir = std::env::temp_dir().join(format!("tethercam-{}", Uuid::new_v4()));
        tokio::fs::create_dir_all(&work_dir).await?;

        let result = self.assemble_in(&frames, &work_dir, output_stem).await;

        if let Err(err) = tokio::fs::remove_dir_all(&work_dir).await {
            warn!("Could not remove work dir {}: {err}", work_dir.display());
        }
        result
    }

    async fn assemble_in(
        &self,
        frames: &[Frame],
        work_dir: &Path,
        output_stem: &Path,
    ) -> CamResult<VideoAssembly> {
        let (written, skipped) = self.materialize(frames, work_dir).await;
        if written == 0 {
            return Err(CamError::AssemblyFailed(
                "zero frames could be materialized".into(),
            ));
        }

        let pattern = work_dir.join("frame_%06d.jpg");
        for codec in &self.chain {
            let output = output_stem.with_extension(&codec.container);
            // A stale artifact from a failed prior entry would defeat the
            // empty-output check.
            let _ = tokio::fs::remove_file(&output).await;

            match self
                .transcoder
                .transcode(&pattern, self.fps, codec, &output)
                .await
            {
                Ok(()) => match tokio::fs::metadata(&output).await {
                    Ok(meta) if meta.len() > 0 => {
                        info!(
                            "Assembled {written} frames into {} via {}",
                            output.display(),
                            codec.name
                        );
                        return Ok(VideoAssembly {
                            path: output,
                            codec: codec.name.clone(),
                            frames_written: written,
                            frames_skipped: skipped,
                        });
                    }
                    _ => {
                        warn!(
                            "Codec {} produced an empty or missing output; trying next",
                            codec.name
                        );
                    }
                },
                Err(err) => {
                    warn!("Codec {} failed ({err}); trying next", codec.name);
                }
            }
        }

        Err(CamError::AssemblyFailed(format!(
            "all {} codec chain entries failed",
            self.chain.len()
        )))
    }

    /// Write frames as a numbered image sequence, in sorted order.
    /// Returns `(written, skipped)`.
    async fn materialize(&self, frames: &[Frame], work_dir: &Path) -> (u64, u64) {
        let mut written = 0u64;
        let mut skipped = 0u64;
        for frame in frames {
            let data = match frame.payload.bytes().await {
                Ok(data) if !data.is_empty() => data,
                Ok(_) => {
                    warn!(
                        "Skipping empty frame at {:?}",
                        frame.sequence_timestamp
                    );
                    skipped += 1;
                    continue;
                }
                Err(err) => {
                    warn!(
                        "Skipping unreadable frame at {:?}: {err}",
                        frame.sequence_timestamp
                    );
                    skipped += 1;
                    continue;
                }
            };
            let path = work_dir.join(format!("frame_{written:06}.jpg"));
            match tokio::fs::write(&path, &data).await {
                Ok(()) => written += 1,
                Err(err) => {
                    warn!("Skipping unwritable frame {}: {err}", path.display());
                    skipped += 1;
                }
            }
        }
        (written, skipped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::FramePayload;
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::sync::Mutex;
    use std::time::Duration;

    fn frame(millis: u64, tag: &str) -> Frame {
        Frame {
            sequence_timestamp: Duration::from_millis(millis),
            payload: FramePayload::Bytes(Bytes::from(format!("{tag}\n"))),
        }
    }

    /// Concatenates the materialized sequence into the output file, so
    /// tests can observe the exact frame order the transcoder saw.
    struct ConcatTranscoder {
        fail_codecs: Vec<String>,
        invocations: Mutex<Vec<String>>,
    }

    impl ConcatTranscoder {
        fn new(fail_codecs: &[&str]) -> Self {
            Self {
                fail_codecs: fail_codecs.iter().map(|s| s.to_string()).collect(),
                invocations: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl Transcoder for ConcatTranscoder {
        async fn transcode(
            &self,
            input: &Path,
            _fps: f64,
            codec: &CodecSpec,
            output: &Path,
        ) -> CamResult<()> {
            self.invocations
                .lock()
                .unwrap()
                .push(codec.name.clone());
            if self.fail_codecs.contains(&codec.name) {
                return Err(CamError::Transcode(format!("{} unavailable", codec.name)));
            }
            let dir = input.parent().unwrap();
            let mut names: Vec<_> = std::fs::read_dir(dir)
                .unwrap()
                .map(|e| e.unwrap().path())
                .collect();
            names.sort();
            let mut out = Vec::new();
            for name in names {
                out.extend(std::fs::read(name).unwrap());
            }
            std::fs::write(output, out)?;
            Ok(())
        }
    }

    fn test_chain() -> Vec<CodecSpec> {
        vec![CodecSpec::delivery_h264(), CodecSpec::mjpeg()]
    }

    #[tokio::test]
    async fn test_frames_are_written_in_timestamp_order() {
        let transcoder = ConcatTranscoder::new(&[]);
        let assembler = FrameSequenceAssembler::new(&transcoder, 30.0, test_chain());
        let tmp = tempfile::tempdir().unwrap();

        // Deliver out of order on purpose.
        let frames = vec![frame(30, "c"), frame(10, "a"), frame(20, "b")];
        let assembly = assembler
            .assemble(frames, &tmp.path().join("clip"))
            .await
            .unwrap();

        assert_eq!(assembly.frames_written, 3);
        assert_eq!(assembly.codec, "libx264");
        let content = std::fs::read_to_string(&assembly.path).unwrap();
        assert_eq!(content, "a\nb\nc\n");
    }

    #[tokio::test]
    async fn test_codec_chain_advances_on_failure() {
        let transcoder = ConcatTranscoder::new(&["libx264"]);
        let assembler = FrameSequenceAssembler::new(&transcoder, 30.0, test_chain());
        let tmp = tempfile::tempdir().unwrap();

        let assembly = assembler
            .assemble(vec![frame(1, "x")], &tmp.path().join("clip"))
            .await
            .unwrap();

        assert_eq!(assembly.codec, "mjpeg");
        assert_eq!(assembly.path.extension().unwrap(), "avi");
        let calls = transcoder.invocations.lock().unwrap().clone();
        assert_eq!(calls, vec!["libx264".to_string(), "mjpeg".to_string()]);
    }

    #[tokio::test]
    async fn test_all_codecs_failing_is_assembly_failure() {
        let transcoder = ConcatTranscoder::new(&["libx264", "mjpeg"]);
        let assembler = FrameSequenceAssembler::new(&transcoder, 30.0, test_chain());
        let tmp = tempfile::tempdir().unwrap();

        let err = assembler
            .assemble(vec![frame(1, "x")], &tmp.path().join("clip"))
            .await
            .unwrap_err();
        assert!(matches!(err, CamError::AssemblyFailed(_)));
    }

    #[tokio::test]
    async fn test_unreadable_frames_are_skipped() {
        let transcoder = ConcatTranscoder::new(&[]);
        let assembler = FrameSequenceAssembler::new(&transcoder, 30.0, test_chain());
        let tmp = tempfile::tempdir().unwrap();

        let frames = vec![
            frame(10, "a"),
            Frame {
                sequence_timestamp: Duration::from_millis(20),
                payload: FramePayload::File(PathBuf::from("/nonexistent/frame.jpg")),
            },
            frame(30, "b"),
        ];
        let assembly = assembler
            .assemble(frames, &tmp.path().join("clip"))
            .await
            .unwrap();

        assert_eq!(assembly.frames_written, 2);
        assert_eq!(assembly.frames_skipped, 1);
    }

    #[tokio::test]
    async fn test_zero_frames_is_assembly_failure() {
        let transcoder = ConcatTranscoder::new(&[]);
        let assembler = FrameSequenceAssembler::new(&transcoder, 30.0, test_chain());
        let tmp = tempfile::tempdir().unwrap();

        let err = assembler
            .assemble(Vec::new(), &tmp.path().join("clip"))
            .await
            .unwrap_err();
        assert!(matches!(err, CamError::AssemblyFailed(_)));
    }
}
