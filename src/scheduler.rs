//! Timed multi-shot scheduler.
//!
//! Drives a [`CaptureSession`] repeatedly on a cadence and isolates
//! per-shot failures. Two plans exist:
//!
//! - **Fixed-count**: take `N` shots with a fixed sleep between
//!   consecutive shots. Intervals may be sub-second; bounds validation is
//!   a caller concern.
//! - **Duration-and-rate**: `duration × fps` target frames, each shot
//!   anchored to its wall-clock target `i / fps` from the run start. This
//!   drift-correcting cadence prevents cumulative timing error from a
//!   fixed per-frame delay when each capture has non-negligible latency.
//!
//! A failed shot is counted and logged, never fatal on its own. After a
//! configurable run of consecutive failures the scheduler resets the
//! session once per failure streak; a failure immediately after the reset
//! terminates the run early with partial results. All waiting is
//! cancellable: flipping the watch channel to `true` stops the run in an
//! orderly way, preserving frames already captured.

use std::time::Duration;

use log::{info, warn};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tokio::time::{sleep, Instant};

use crate::device::CameraDevice;
use crate::error::CamResult;
use crate::session::{CaptureSession, Frame};

/// What to capture and on what cadence.
#[derive(Clone, Debug)]
pub enum ShotPlan {
    /// `shots` captures with `interval` between consecutive shots.
    Count {
        /// Number of capture attempts.
        shots: u64,
        /// Sleep between consecutive shots.
        interval: Duration,
    },
    /// `duration × fps` captures anchored to elapsed wall-clock time.
    Rate {
        /// Total run duration.
        duration: Duration,
        /// Target frames per second.
        fps: f64,
    },
}

impl ShotPlan {
    /// Total scheduled capture attempts for this plan.
    pub fn total_shots(&self) -> u64 {
        match self {
            ShotPlan::Count { shots, .. } => *shots,
            ShotPlan::Rate { duration, fps } => {
                let total = duration.as_secs_f64() * fps;
                if total.is_finite() && total > 0.0 {
                    total.floor() as u64
                } else {
                    0
                }
            }
        }
    }
}

/// Partial or complete result of a multi-shot run.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    /// Shots the plan scheduled.
    pub requested: u64,
    /// Shots that produced a frame.
    pub succeeded: u64,
    /// Shots that failed.
    pub failed: u64,
    /// The run was stopped by the cancellation signal.
    pub cancelled: bool,
    /// The run terminated early because capture kept failing after a
    /// session reset.
    pub aborted: bool,
}

/// Drives a capture session on a schedule with per-shot failure isolation.
pub struct MultiShotScheduler {
    reset_threshold: u32,
}

impl MultiShotScheduler {
    /// `reset_threshold` consecutive failures trigger one session reset per
    /// failure streak.
    pub fn new(reset_threshold: u32) -> Self {
        Self {
            reset_threshold: reset_threshold.max(1),
        }
    }

    /// Run the plan to completion, cancellation, or early abort.
    ///
    /// Successful frames are pushed into `frames` in capture order. The
    /// report always reflects what actually happened; an early stop still
    /// returns `Ok` with partial counts.
    pub async fn run<D: CameraDevice>(
        &self,
        session: &mut CaptureSession<D>,
        plan: &ShotPlan,
        frames: &mpsc::Sender<Frame>,
        cancel: &mut watch::Receiver<bool>,
    ) -> CamResult<RunReport> {
        let total = plan.total_shots();
        let start = Instant::now();
        let mut report = RunReport {
            requested: total,
            succeeded: 0,
            failed: 0,
            cancelled: false,
            aborted: false,
        };
        let mut consecutive_failures = 0u32;
        let mut reset_this_streak = false;

        for shot in 0..total {
            if let Some(wait) = self.wait_before(plan, shot, start) {
                if cancelled_during(wait, cancel).await {
                    report.cancelled = true;
                    break;
                }
            }
            if *cancel.borrow() {
                report.cancelled = true;
                break;
            }

            match session.capture_one().await {
                Ok(frame) => {
                    report.succeeded += 1;
                    consecutive_failures = 0;
                    reset_this_streak = false;
                    if frames.send(frame).await.is_err() {
                        // Receiver gone; nobody is consuming frames.
                        warn!("Frame consumer dropped; stopping run at shot {shot}");
                        report.cancelled = true;
                        break;
                    }
                }
                Err(err) => {
                    report.failed += 1;
                    consecutive_failures += 1;
                    warn!(
                        "Shot {}/{total} failed ({err}); {consecutive_failures} consecutive",
                        shot + 1
                    );
                    if consecutive_failures >= self.reset_threshold {
                        if reset_this_streak {
                            warn!("Capture still failing after reset; terminating run early");
                            report.aborted = true;
                            break;
                        }
                        reset_this_streak = true;
                        if let Err(reset_err) = session.reset().await {
                            warn!("Session reset failed ({reset_err}); terminating run early");
                            report.aborted = true;
                            break;
                        }
                    }
                }
            }
        }

        info!(
            "Multi-shot run finished: {}/{} succeeded, {} failed{}{}",
            report.succeeded,
            report.requested,
            report.failed,
            if report.cancelled { ", cancelled" } else { "" },
            if report.aborted { ", aborted" } else { "" },
        );
        Ok(report)
    }

    /// How long to wait before `shot`, if at all.
    fn wait_before(&self, plan: &ShotPlan, shot: u64, start: Instant) -> Option<Duration> {
        match plan {
            ShotPlan::Count { interval, .. } => {
                if shot > 0 && !interval.is_zero() {
                    Some(*interval)
                } else {
                    None
                }
            }
            ShotPlan::Rate { fps, .. } => {
                // Anchor to the run start, not "last capture + interval":
                // the schedule is elapsed-time based, so capture latency on
                // one shot does not skew every later shot.
                let target = Duration::from_secs_f64(shot as f64 / fps);
                let elapsed = start.elapsed();
                if elapsed < target {
                    Some(target - elapsed)
                } else {
                    None
                }
            }
        }
    }
}

/// Sleep for `wait`, returning early with `true` if the cancellation signal
/// flips during the sleep.
async fn cancelled_during(wait: Duration, cancel: &mut watch::Receiver<bool>) -> bool {
    if *cancel.borrow() {
        return true;
    }
    let sleep_fut = sleep(wait);
    tokio::pin!(sleep_fut);
    loop {
        tokio::select! {
            _ = &mut sleep_fut => return false,
            changed = cancel.changed() => match changed {
                Ok(()) if *cancel.borrow() => return true,
                Ok(()) => {}
                // Sender dropped: treat as "never cancelled".
                Err(_) => {
                    sleep_fut.as_mut().await;
                    return false;
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_plan_total_shots() {
        let plan = ShotPlan::Rate {
            duration: Duration::from_secs(2),
            fps: 10.0,
        };
        assert_eq!(plan.total_shots(), 20);
    }

    #[test]
    fn test_rate_plan_degenerate_inputs() {
        let plan = ShotPlan::Rate {
            duration: Duration::from_secs(2),
            fps: 0.0,
        };
        assert_eq!(plan.total_shots(), 0);
    }

    #[test]
    fn test_count_plan_total_shots() {
        let plan = ShotPlan::Count {
            shots: 5,
            interval: Duration::ZERO,
        };
        assert_eq!(plan.total_shots(), 5);
    }
}
