//! Clock and timing utilities for frame-accurate export.
//!
//! Export runs are driven by frame index, never by wall-clock time. This
//! module provides:
//! - Conversion from timeline seconds to frame indices
//! - Loop-wrapping of timestamps onto shorter background sources
//! - A run clock that anchors a wall-clock epoch for artifact naming
//! - A rolling per-frame cost estimator for progress ETAs

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Maps frame indices onto the export timeline at a fixed rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameClock {
    fps: u32,
}

impl FrameClock {
    /// Create a clock for the given frame rate. A rate of zero is treated as 1.
    pub fn new(fps: u32) -> Self {
        Self { fps: fps.max(1) }
    }

    /// Nearest frame index for a timestamp (`round(t * fps)`).
    pub fn secs_to_frame(&self, secs: f64) -> u64 {
        (secs.max(0.0) * self.fps as f64).round() as u64
    }
}

/// Wrap a timeline timestamp onto a looping source of `native_secs` length.
///
/// Sources without a finite, positive native duration are not wrapped.
pub fn wrap_time(t: f64, native_secs: Option<f64>) -> f64 {
    match native_secs {
        Some(len) if len.is_finite() && len > 0.0 => t.rem_euclid(len),
        _ => t,
    }
}

/// Wall-clock anchor for one export run.
#[derive(Debug, Clone)]
pub struct RunClock {
    epoch: Instant,
    epoch_wall: chrono::DateTime<chrono::Utc>,
}

impl RunClock {
    /// Create a clock anchored to now.
    pub fn start() -> Self {
        Self {
            epoch: Instant::now(),
            epoch_wall: chrono::Utc::now(),
        }
    }

    /// Seconds elapsed since the run started.
    pub fn elapsed_secs(&self) -> f64 {
        self.epoch.elapsed().as_secs_f64()
    }

    /// Wall-clock time at run start.
    pub fn epoch_utc(&self) -> chrono::DateTime<chrono::Utc> {
        self.epoch_wall
    }
}

/// Rolling estimate of the remaining wall-clock time of an export.
///
/// Reports nothing until `warmup_frames` samples exist, then averages the
/// most recent `window` per-frame costs.
#[derive(Debug, Clone)]
pub struct EtaEstimator {
    warmup_frames: usize,
    window: usize,
    samples: VecDeque<Duration>,
    recorded: usize,
}

impl EtaEstimator {
    pub fn new(warmup_frames: usize, window: usize) -> Self {
        let window = window.max(1);
        Self {
            warmup_frames,
            window,
            samples: VecDeque::with_capacity(window),
            recorded: 0,
        }
    }

    /// Record the wall-clock cost of one processed frame.
    pub fn record(&mut self, cost: Duration) {
        if self.samples.len() == self.window {
            self.samples.pop_front();
        }
        self.samples.push_back(cost);
        self.recorded += 1;
    }

    /// Number of frames recorded so far.
    pub fn recorded(&self) -> usize {
        self.recorded
    }

    /// Average per-frame cost over the rolling window, once warmed up.
    pub fn average_frame_secs(&self) -> Option<f64> {
        if self.recorded < self.warmup_frames || self.samples.is_empty() {
            return None;
        }
        let total: f64 = self.samples.iter().map(Duration::as_secs_f64).sum();
        Some(total / self.samples.len() as f64)
    }

    /// Estimated seconds left for `frames_remaining` frames.
    pub fn estimate_remaining_secs(&self, frames_remaining: u64) -> Option<f64> {
        self.average_frame_secs()
            .map(|avg| avg * frames_remaining as f64)
    }
}

impl Default for EtaEstimator {
    fn default() -> Self {
        Self::new(10, 30)
    }
}
