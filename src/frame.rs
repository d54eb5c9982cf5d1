//! Frame buffers and the single-slot handoff between ingest and processing.
//!
//! - `Frame`: owned pixel buffer tagged with its camera and capture instant.
//!   Pixels are zeroized on drop.
//! - `FrameSlot`: capacity-one, drop-oldest holding slot. The producer never
//!   blocks and never queues; publishing into a full slot replaces its content.

use anyhow::{anyhow, Result};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use zeroize::Zeroize;

// ----------------------------------------------------------------------------
// Frame
// ----------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PixelFormat {
    Gray8,
    Rgb8,
    Bgr8,
}

impl PixelFormat {
    pub fn channels(self) -> usize {
        match self {
            PixelFormat::Gray8 => 1,
            PixelFormat::Rgb8 | PixelFormat::Bgr8 => 3,
        }
    }
}

/// A decoded camera frame.
///
/// Frames are never cloned on the hot path: a frame moves from the source into
/// the camera's slot, then into the processing thread, then optionally into the
/// display slot.
pub struct Frame {
    data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub camera_id: String,
    captured_at: Instant,
}

impl Frame {
    /// Wrap a pixel buffer. The buffer length must match the dimensions.
    pub fn new(
        camera_id: impl Into<String>,
        data: Vec<u8>,
        width: u32,
        height: u32,
        format: PixelFormat,
    ) -> Result<Self> {
        let expected = (width as usize) * (height as usize) * format.channels();
        if data.len() != expected {
            return Err(anyhow!(
                "frame buffer is {} bytes, expected {} for {}x{} {:?}",
                data.len(),
                expected,
                width,
                height,
                format
            ));
        }
        Ok(Self {
            data,
            width,
            height,
            format,
            camera_id: camera_id.into(),
            captured_at: Instant::now(),
        })
    }

    pub fn pixels(&self) -> &[u8] {
        &self.data
    }

    pub fn captured_at(&self) -> Instant {
        self.captured_at
    }

    pub fn age(&self) -> Duration {
        self.captured_at.elapsed()
    }

    pub fn byte_len(&self) -> usize {
        self.data.len()
    }

    /// Luma of the pixel at (x, y), BT.601 weights for colour formats.
    pub fn luma_at(&self, x: u32, y: u32) -> u8 {
        let channels = self.format.channels();
        let idx = ((y as usize) * (self.width as usize) + x as usize) * channels;
        match self.format {
            PixelFormat::Gray8 => self.data[idx],
            PixelFormat::Rgb8 => luma(self.data[idx], self.data[idx + 1], self.data[idx + 2]),
            PixelFormat::Bgr8 => luma(self.data[idx + 2], self.data[idx + 1], self.data[idx]),
        }
    }
}

fn luma(r: u8, g: u8, b: u8) -> u8 {
    ((r as u32 * 299 + g as u32 * 587 + b as u32 * 114) / 1000) as u8
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("camera_id", &self.camera_id)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("format", &self.format)
            .finish_non_exhaustive()
    }
}

impl Drop for Frame {
    fn drop(&mut self) {
        self.data.zeroize();
    }
}

// ----------------------------------------------------------------------------
// FrameSlot: capacity-one drop-oldest buffer
// ----------------------------------------------------------------------------

/// Single-slot frame buffer shared by one producer and one consumer.
#[derive(Default)]
pub struct FrameSlot {
    slot: Mutex<Option<Frame>>,
    ready: Condvar,
}

impl FrameSlot {
    pub fn new() -> Self {
        Self::default()
    }

    fn guard(&self) -> MutexGuard<'_, Option<Frame>> {
        // A panicking holder can only leave a whole frame or nothing behind.
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Publish a frame, replacing any unconsumed one. Returns `true` if a frame
    /// was overwritten.
    pub fn publish(&self, frame: Frame) -> bool {
        let replaced = self.guard().replace(frame).is_some();
        self.ready.notify_one();
        replaced
    }

    /// Take the current frame without waiting.
    pub fn take(&self) -> Option<Frame> {
        self.guard().take()
    }

    /// Take the current frame, waiting up to `timeout` for one to arrive.
    pub fn take_timeout(&self, timeout: Duration) -> Option<Frame> {
        let guard = self.guard();
        let (mut guard, _) = self
            .ready
            .wait_timeout_while(guard, timeout, |slot| slot.is_none())
            .unwrap_or_else(PoisonError::into_inner);
        guard.take()
    }

    /// Number of frames held: always 0 or 1.
    pub fn len(&self) -> usize {
        usize::from(self.guard().is_some())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop any held frame.
    pub fn clear(&self) {
        self.guard().take();
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
