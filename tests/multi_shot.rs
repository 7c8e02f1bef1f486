//! End-to-end multi-shot behavior against the scripted mock camera.

use std::time::Duration;

use tethercam::device::mock::MockCamera;
use tethercam::error::CamError;
use tethercam::scheduler::{MultiShotScheduler, ShotPlan};
use tethercam::session::{CaptureSession, Frame, RetryPolicy, SessionState};
use tethercam::storage::{content_type_for, timestamped_name, BlobStore, MemoryBlobStore};
use tokio::sync::{mpsc, watch};

fn fast_policy() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 5,
        backoff_delay: Duration::from_millis(10),
    }
}

async fn ready_session(device: MockCamera) -> CaptureSession<MockCamera> {
    let mut session = CaptureSession::new(device, fast_policy());
    session.connect().await.unwrap();
    session
}

fn frame_channel() -> (mpsc::Sender<Frame>, mpsc::Receiver<Frame>) {
    mpsc::channel(256)
}

#[tokio::test]
async fn test_five_shots_with_one_failure_store_four_blobs() {
    // Shot 3 (index 2) fails both techniques.
    let device = MockCamera::new()
        .with_primary_failures(&[2])
        .with_fallback_failures(&[2]);
    let mut session = ready_session(device).await;

    let store = MemoryBlobStore::new();
    let (tx, mut rx) = frame_channel();
    let (_cancel_tx, mut cancel) = watch::channel(false);

    let scheduler = MultiShotScheduler::new(3);
    let plan = ShotPlan::Count {
        shots: 5,
        interval: Duration::ZERO,
    };
    let report = scheduler
        .run(&mut session, &plan, &tx, &mut cancel)
        .await
        .unwrap();
    drop(tx);

    while let Some(frame) = rx.recv().await {
        let data = frame.payload.bytes().await.unwrap();
        let name = timestamped_name("shots", "photo", "jpg");
        store.put(&name, data, content_type_for(&name)).await.unwrap();
    }

    assert_eq!(report.requested, 5);
    assert_eq!(report.succeeded, 4);
    assert_eq!(report.failed, 1);
    assert!(!report.aborted);
    assert!(!report.cancelled);
    assert_eq!(store.len().await, 4);
}

#[tokio::test(start_paused = true)]
async fn test_rate_plan_schedules_exactly_duration_times_fps_attempts() {
    let mut session = ready_session(MockCamera::new()).await;
    let (tx, mut rx) = frame_channel();
    let (_cancel_tx, mut cancel) = watch::channel(false);

    let scheduler = MultiShotScheduler::new(3);
    let plan = ShotPlan::Rate {
        duration: Duration::from_secs(2),
        fps: 10.0,
    };
    let report = scheduler
        .run(&mut session, &plan, &tx, &mut cancel)
        .await
        .unwrap();
    drop(tx);

    assert_eq!(report.requested, 20);
    assert_eq!(report.succeeded, 20);
    assert_eq!(session.device().connect_calls(), 1);

    // Frames arrive in strictly increasing timestamp order, and each shot
    // lands at or after its scheduled target of i / fps from the run start.
    let mut frames = Vec::new();
    while let Some(frame) = rx.recv().await {
        frames.push(frame.sequence_timestamp);
    }
    assert_eq!(frames.len(), 20);
    let start = frames[0];
    for (i, &stamp) in frames.iter().enumerate() {
        if i > 0 {
            assert!(stamp > frames[i - 1]);
        }
        let target = Duration::from_millis(100 * i as u64);
        assert!(stamp - start >= target, "shot {i} ran before its target");
    }
}

#[tokio::test(start_paused = true)]
async fn test_consecutive_failures_trigger_one_reset_then_abort() {
    // Every shot fails, both techniques.
    let device = MockCamera::new()
        .with_primary_failures(&[0, 1, 2, 3, 4])
        .with_fallback_failures(&[0, 1, 2, 3, 4]);
    let mut session = ready_session(device).await;
    let (tx, _rx) = frame_channel();
    let (_cancel_tx, mut cancel) = watch::channel(false);

    let scheduler = MultiShotScheduler::new(2);
    let plan = ShotPlan::Count {
        shots: 5,
        interval: Duration::ZERO,
    };
    let report = scheduler
        .run(&mut session, &plan, &tx, &mut cancel)
        .await
        .unwrap();

    // Two failures hit the threshold and reset once; the next failure
    // terminates the run early with partial results.
    assert!(report.aborted);
    assert_eq!(report.failed, 3);
    assert_eq!(report.succeeded, 0);
    assert_eq!(session.device().connect_calls(), 2);
    assert_eq!(session.state(), SessionState::Ready);
}

#[tokio::test(start_paused = true)]
async fn test_capture_recovers_after_reset() {
    // Shots 0 and 1 fail; everything after the reset succeeds.
    let device = MockCamera::new()
        .with_primary_failures(&[0, 1])
        .with_fallback_failures(&[0, 1]);
    let mut session = ready_session(device).await;
    let (tx, _rx) = frame_channel();
    let (_cancel_tx, mut cancel) = watch::channel(false);

    let scheduler = MultiShotScheduler::new(2);
    let plan = ShotPlan::Count {
        shots: 5,
        interval: Duration::ZERO,
    };
    let report = scheduler
        .run(&mut session, &plan, &tx, &mut cancel)
        .await
        .unwrap();

    assert!(!report.aborted);
    assert_eq!(report.succeeded, 3);
    assert_eq!(report.failed, 2);
    assert_eq!(session.device().connect_calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_stops_the_run_preserving_prior_frames() {
    let mut session = ready_session(MockCamera::new()).await;
    let (tx, mut rx) = frame_channel();
    let (cancel_tx, mut cancel) = watch::channel(false);

    // Cancel after the first shot's frame arrives: with a long interval the
    // scheduler is sleeping, so the signal interrupts the wait.
    let plan = ShotPlan::Count {
        shots: 100,
        interval: Duration::from_secs(3600),
    };
    let scheduler = MultiShotScheduler::new(3);

    let first_shot_then_cancel = async {
        let frame = rx.recv().await.unwrap();
        cancel_tx.send(true).unwrap();
        frame
    };
    let (report, frame) = tokio::join!(
        scheduler.run(&mut session, &plan, &tx, &mut cancel),
        first_shot_then_cancel,
    );
    let report = report.unwrap();

    assert!(report.cancelled);
    assert_eq!(report.succeeded, 1);
    assert!(frame.payload.bytes().await.unwrap().starts_with(b"preview"));
}

#[tokio::test(start_paused = true)]
async fn test_faulted_session_rejects_further_work() {
    let device = MockCamera::new().with_connect_errors(vec![
        CamError::DeviceBusy,
        CamError::DeviceBusy,
        CamError::DeviceBusy,
        CamError::DeviceBusy,
        CamError::DeviceBusy,
    ]);
    let mut session = CaptureSession::new(device, fast_policy());

    assert!(session.connect().await.is_err());
    assert_eq!(session.state(), SessionState::Faulted);
    assert!(matches!(
        session.capture_one().await.unwrap_err(),
        CamError::DeviceUnavailable(_)
    ));
}
