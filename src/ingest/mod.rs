//! Frame ingestion.
//!
//! A `FrameSource` is the boundary to stream decoding: `open(uri)`, `read()`,
//! `close()`. Sources are created per camera by a `SourceFactory` each time the
//! pipeline starts, and driven by `run_ingestor`, which owns reconnection and
//! publishes into the camera's `FrameSlot`.
//!
//! The ingest layer MUST NOT:
//! - Queue frames (the slot holds the freshest frame only)
//! - Exit on transient I/O failure
//! - Store frames to disk

mod ingestor;
pub mod rtsp;

pub use ingestor::{run_ingestor, IngestConfig};
pub use rtsp::{RtspConfig, RtspSource, RtspSourceFactory};

use anyhow::Result;

use crate::frame::Frame;
use crate::storage::CameraConfig;

/// Outcome of a single read from an open source.
#[derive(Debug)]
pub enum SourceRead {
    Frame(Frame),
    EndOfStream,
}

/// Stream decoding boundary for one camera.
pub trait FrameSource: Send {
    /// Open the stream. A failed open leaves the source closed.
    fn open(&mut self, uri: &str) -> Result<()>;

    /// Read the next frame. Blocks for at most the source's read timeout.
    fn read(&mut self) -> Result<SourceRead>;

    /// Release the stream handle. Idempotent.
    fn close(&mut self);

    fn is_open(&self) -> bool;
}

/// Creates one source per camera at pipeline start.
pub trait SourceFactory: Send + Sync {
    fn create(&self, camera: &CameraConfig) -> Box<dyn FrameSource>;
}
