//! Motion gate.
//!
//! Decides per processed frame whether the recognition engine should run.
//! A running-average background is kept over a downscaled luma image; every
//! `check_interval` the number of foreground pixels is compared with
//! `pixel_threshold`. Crossing it opens a motion window of `motion_window`
//! during which every frame is eligible. Outside the window only every
//! `skip_rate`th frame is.
//!
//! The gate is a cost policy. A missed motion check delays recognition until
//! the next cadence frame; it never affects deduplication or authorization.

use std::time::{Duration, Instant};

use crate::frame::Frame;

#[derive(Clone, Debug, PartialEq)]
pub struct MotionConfig {
    pub check_interval: Duration,
    pub motion_window: Duration,
    /// Outside a motion window, recognize every Nth frame.
    pub skip_rate: u64,
    /// Foreground pixels (on the downscaled image) that count as motion.
    pub pixel_threshold: usize,
    /// Keep one pixel out of `downscale` in each direction.
    pub downscale: u32,
    /// Absolute luma difference from the background that marks foreground.
    pub diff_threshold: u8,
    /// Background adaptation rate per frame, in (0, 1].
    pub learning_rate: f32,
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(3),
            motion_window: Duration::from_secs(3),
            skip_rate: 5,
            pixel_threshold: 2500,
            downscale: 4,
            diff_threshold: 25,
            learning_rate: 0.002,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MotionDecision {
    /// Foreground pixel count for this frame.
    pub motion_level: usize,
    /// A motion window is open.
    pub motion_active: bool,
    /// This frame is the first after the window opened.
    pub motion_started: bool,
    pub run_recognition: bool,
}

/// Per-camera motion gate. Owned by the camera's processing thread.
pub struct MotionGate {
    config: MotionConfig,
    background: Vec<f32>,
    dims: (u32, u32),
    frame_count: u64,
    last_check: Option<Instant>,
    motion_since: Option<Instant>,
}

impl MotionGate {
    pub fn new(config: MotionConfig) -> Self {
        Self {
            config,
            background: Vec::new(),
            dims: (0, 0),
            frame_count: 0,
            last_check: None,
            motion_since: None,
        }
    }

    pub fn config(&self) -> &MotionConfig {
        &self.config
    }

    /// Update the background with `frame` and decide whether to recognize it.
    pub fn observe(&mut self, frame: &Frame, now: Instant) -> MotionDecision {
        self.frame_count += 1;
        let motion_level = self.update_background(frame);

        let mut motion_started = false;
        let check_due = self
            .last_check
            .map_or(true, |last| now.duration_since(last) >= self.config.check_interval);
        if check_due {
            self.last_check = Some(now);
            if motion_level > self.config.pixel_threshold {
                log::debug!(
                    "motion={} on camera {}",
                    motion_level,
                    frame.camera_id
                );
                self.motion_since = Some(now);
                motion_started = true;
            }
        }

        let motion_active = self
            .motion_since
            .is_some_and(|since| now.duration_since(since) <= self.config.motion_window);
        let on_cadence = self.frame_count % self.config.skip_rate.max(1) == 0;

        MotionDecision {
            motion_level,
            motion_active,
            motion_started,
            run_recognition: motion_active || on_cadence,
        }
    }

    /// Returns the foreground pixel count against the background as it was
    /// before this frame, then blends the frame in.
    fn update_background(&mut self, frame: &Frame) -> usize {
        let step = self.config.downscale.max(1);
        let dims = (frame.width.div_ceil(step), frame.height.div_ceil(step));
        if dims != self.dims || self.background.is_empty() {
            self.dims = dims;
            self.background = sample_luma(frame, step)
                .map(f32::from)
                .collect();
            return 0;
        }

        let alpha = self.config.learning_rate.clamp(f32::EPSILON, 1.0);
        let threshold = f32::from(self.config.diff_threshold);
        let mut foreground = 0;
        for (bg, luma) in self.background.iter_mut().zip(sample_luma(frame, step)) {
            let value = f32::from(luma);
            if (value - *bg).abs() > threshold {
                foreground += 1;
            }
            *bg += alpha * (value - *bg);
        }
        foreground
    }
}

fn sample_luma(frame: &Frame, step: u32) -> impl Iterator<Item = u8> + '_ {
    (0..frame.height)
        .step_by(step as usize)
        .flat_map(move |y| {
            (0..frame.width)
                .step_by(step as usize)
                .map(move |x| frame.luma_at(x, y))
        })
}
