//! Command-line entry point.
//!
//! Thin wiring over the library: connect a session, negotiate settings,
//! run single or multi-shot captures, assemble bursts into video, and
//! hand artifacts to the blob store. The built-in device is the scripted
//! mock; a real transport plugs in behind the `CameraDevice` trait.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use bytes::Bytes;
use clap::{Parser, Subcommand};
use log::warn;
use tokio::sync::{mpsc, watch};
use uuid::Uuid;

use tethercam::assemble::FrameSequenceAssembler;
use tethercam::config::Settings;
use tethercam::device::mock::MockCamera;
use tethercam::device::{CameraDevice, ConfigNode, NodeKind};
use tethercam::error::CamError;
use tethercam::negotiate::{LogicalSetting, Negotiator};
use tethercam::scheduler::{MultiShotScheduler, ShotPlan};
use tethercam::session::{CaptureSession, Frame, RetryPolicy};
use tethercam::storage::{content_type_for, timestamped_name, BlobStore, FsBlobStore};
use tethercam::transcode::{CodecSpec, FfmpegTranscoder};

#[derive(Parser)]
#[command(name = "tethercam", about = "Tethered camera capture automation")]
struct Cli {
    /// Path to a TOML settings file (defaults to ./config.toml if present).
    #[arg(long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the device's configuration tree.
    Tree,
    /// Negotiate and apply one setting, e.g. `set aperture f/4.0`.
    Set {
        /// Logical setting name (aperture, shutter_speed, iso, ...).
        setting: String,
        /// Desired value; resolved to the nearest legal device value.
        value: String,
    },
    /// Capture shots at a fixed interval, uploading each one.
    Shoot {
        /// Number of shots.
        #[arg(long, default_value_t = 1)]
        count: u64,
        /// Seconds between consecutive shots.
        #[arg(long, default_value_t = 0.0)]
        interval: f64,
    },
    /// Rapid-capture for a duration, assemble a video, and upload it.
    Burst {
        /// Capture duration in seconds.
        #[arg(long)]
        duration: f64,
        /// Frames per second; defaults to the configured rate.
        #[arg(long)]
        fps: Option<f64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    let settings = Settings::new(cli.config.as_deref()).context("loading settings")?;

    let device = MockCamera::new();
    let mut session = CaptureSession::new(device, RetryPolicy::from(&settings.session));
    session.connect().await.context("connecting to camera")?;

    let (cancel_tx, cancel_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = cancel_tx.send(true);
        }
    });

    match cli.command {
        Command::Tree => {
            let tree = session.read_config().await?;
            print_node(&tree, 0);
        }
        Command::Set { setting, value } => {
            let Some(logical) = LogicalSetting::parse(&setting) else {
                bail!(
                    "unknown setting '{setting}'; one of: {}",
                    LogicalSetting::ALL.map(|s| s.name()).join(", ")
                );
            };
            match Negotiator::apply(&mut session, logical, &value).await {
                Ok(applied) => println!(
                    "{} = {} (node '{}', requested '{}')",
                    applied.logical, applied.resolved, applied.physical, applied.requested
                ),
                Err(CamError::VerificationMismatch {
                    requested,
                    observed,
                }) => {
                    // Non-fatal: continue with whatever the device holds.
                    warn!("Device kept '{observed}' instead of '{requested}'");
                    println!("{setting} unverified: device holds '{observed}'");
                }
                Err(CamError::UnsupportedSetting(name)) => {
                    let tree = session.read_config().await?;
                    bail!(
                        "device has no node for '{name}'; available: {}",
                        tree.leaf_names().join(", ")
                    );
                }
                Err(err) => return Err(err.into()),
            }
        }
        Command::Shoot { count, interval } => {
            if interval < 0.0 {
                bail!("interval must be non-negative");
            }
            let plan = ShotPlan::Count {
                shots: count,
                interval: std::time::Duration::from_secs_f64(interval),
            };
            shoot_to_store(&settings, &mut session, plan, cancel_rx).await?;
        }
        Command::Burst { duration, fps } => {
            let fps = fps.unwrap_or(settings.capture.fps);
            if duration <= 0.0 || fps <= 0.0 {
                bail!("duration and fps must be positive");
            }
            let plan = ShotPlan::Rate {
                duration: std::time::Duration::from_secs_f64(duration),
                fps,
            };
            burst_to_store(&settings, &mut session, plan, fps, cancel_rx).await?;
        }
    }
    Ok(())
}

fn print_node(node: &ConfigNode, depth: usize) {
    let pad = "  ".repeat(depth);
    match node.kind {
        NodeKind::Section => {
            println!("{pad}[{}]", node.name);
            for child in &node.children {
                print_node(child, depth + 1);
            }
        }
        _ => {
            let value = node.value.as_deref().unwrap_or("-");
            if node.choices.is_empty() {
                println!("{pad}{} = {value}", node.name);
            } else {
                println!("{pad}{} = {value}  (choices: {})", node.name, node.choices.join(", "));
            }
        }
    }
}

/// Interval-photo use case: every frame goes straight to the blob store.
async fn shoot_to_store<D: CameraDevice>(
    settings: &Settings,
    session: &mut CaptureSession<D>,
    plan: ShotPlan,
    mut cancel: watch::Receiver<bool>,
) -> Result<()> {
    let store = Arc::new(FsBlobStore::new(&settings.storage.root));
    let folder = settings.storage.folder.clone();
    let (tx, mut rx) = mpsc::channel::<Frame>(64);

    let uploader = tokio::spawn(async move {
        let mut uploaded = 0u64;
        while let Some(frame) = rx.recv().await {
            match frame.payload.bytes().await {
                Ok(data) => {
                    let name = timestamped_name(&folder, "photo", "jpg");
                    match store.put(&name, data, content_type_for(&name)).await {
                        Ok(()) => uploaded += 1,
                        Err(err) => warn!("Upload failed: {err}"),
                    }
                }
                Err(err) => warn!("Unreadable frame skipped: {err}"),
            }
        }
        uploaded
    });

    let scheduler = MultiShotScheduler::new(settings.session.consecutive_failure_threshold);
    let report = scheduler.run(session, &plan, &tx, &mut cancel).await?;
    drop(tx);
    let uploaded = uploader.await.context("uploader task")?;

    println!(
        "Captured {}/{} shots ({} failed), uploaded {uploaded}",
        report.succeeded, report.requested, report.failed
    );
    Ok(())
}

/// Burst/video use case: frames are assembled, then the artifact uploads.
async fn burst_to_store<D: CameraDevice>(
    settings: &Settings,
    session: &mut CaptureSession<D>,
    plan: ShotPlan,
    fps: f64,
    mut cancel: watch::Receiver<bool>,
) -> Result<()> {
    let (tx, mut rx) = mpsc::channel::<Frame>(256);
    let collector = tokio::spawn(async move {
        let mut frames = Vec::new();
        while let Some(frame) = rx.recv().await {
            frames.push(frame);
        }
        frames
    });

    let scheduler = MultiShotScheduler::new(settings.session.consecutive_failure_threshold);
    let report = scheduler.run(session, &plan, &tx, &mut cancel).await?;
    drop(tx);
    let frames = collector.await.context("collector task")?;
    println!(
        "Captured {}/{} frames ({} failed)",
        report.succeeded, report.requested, report.failed
    );

    let transcoder = FfmpegTranscoder::new(settings.transcoder.binary.clone());
    let assembler = FrameSequenceAssembler::new(&transcoder, fps, CodecSpec::default_chain());
    let stem = std::env::temp_dir().join(format!("tethercam-burst-{}", Uuid::new_v4()));
    let assembly = assembler.assemble(frames, &stem).await?;

    let store = FsBlobStore::new(&settings.storage.root);
    let ext = assembly
        .path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("mp4")
        .to_string();
    let name = timestamped_name(&settings.storage.folder, "video", &ext);
    let data = Bytes::from(tokio::fs::read(&assembly.path).await?);
    store.put(&name, data, content_type_for(&name)).await?;

    if let Err(err) = tokio::fs::remove_file(&assembly.path).await {
        warn!("Could not remove {}: {err}", assembly.path.display());
    }
    println!(
        "Uploaded {name} ({} frames via {}, {} skipped)",
        assembly.frames_written, assembly.codec, assembly.frames_skipped
    );
    Ok(())
}
