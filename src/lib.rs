//! Plate Gate Kernel
//!
//! This crate implements the core of a gate controller driven by license plate
//! recognition on several live camera streams.
//!
//! # Architecture
//!
//! Each configured camera gets two threads:
//!
//! 1. **Ingest**: pulls frames from a `FrameSource` and publishes the freshest one
//!    into a single-slot `FrameSlot` (drop-oldest, never a backlog).
//! 2. **Process**: takes frames from the slot, consults the per-camera `MotionGate`,
//!    runs the shared recognition engine through the `DetectionInvoker`, and feeds
//!    accepted plates through the `Deduplicator` into the `EventRecorder`.
//!
//! The cooldown map and the engine critical section are the only state shared
//! across cameras. The `Supervisor` owns both and exposes the command surface
//! (`start`, `stop`, `set_camera_uri`, `add_authorized`, `remove_authorized`,
//! `export_events`).
//!
//! # Module Structure
//!
//! - `frame`: Frame buffers and the single-slot handoff
//! - `ingest`: Frame sources and the per-camera ingest loop
//! - `motion`: Adaptive-background motion gate
//! - `detect`: Recognition engine boundary and serialized invoker
//! - `dedup`: Plate normalization and cooldown tracking
//! - `storage`: Record store (authorized identities, events, camera settings)
//! - `gate`: Gate actuators
//! - `pipeline`: Authorization resolution, event recording, processing loop
//! - `stats`: Per-camera counters
//! - `supervisor`: Lifecycle state machine
//! - `config`: Daemon configuration (TOML file + environment overrides)

use anyhow::Result;
use rand::RngCore;
use rusqlite::{Connection, OpenFlags};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

pub mod config;
pub mod dedup;
pub mod detect;
pub mod frame;
pub mod gate;
pub mod ingest;
pub mod motion;
pub mod pipeline;
pub mod stats;
pub mod storage;
pub mod supervisor;

pub use dedup::{Admission, CooldownConfig, CooldownTracker, Deduplicator};
pub use detect::{
    engine_from_name, DetectionCandidate, DetectionInvoker, PlateBox, RecognitionEngine,
    ScriptedEngine, StubEngine,
};
pub use frame::{Frame, FrameSlot, PixelFormat};
pub use gate::{CommandActuator, DetachedActuator, GateActuator, LogActuator};
pub use ingest::{
    run_ingestor, FrameSource, IngestConfig, RtspConfig, RtspSource, RtspSourceFactory,
    SourceFactory, SourceRead,
};
pub use motion::{MotionConfig, MotionDecision, MotionGate};
pub use pipeline::{AuthorizationResolver, EventRecorder, ProcessingWorker, Resolution, UNKNOWN_NAME};
pub use stats::{CameraStats, CameraStatsSnapshot};
pub use storage::{
    AuthorizedIdentity, AuthorizedFilter, CameraConfig, EventFilter, EventRecord, GateEvent,
    InMemoryRecordStore, RecordStore, SharedStore, SqliteRecordStore,
};
pub use supervisor::{PipelineConfig, PipelineState, Supervisor};

pub fn shared_memory_uri() -> String {
    let mut bytes = [0u8; 8];
    rand::thread_rng().fill_bytes(&mut bytes);
    format!(
        "file:plate_gate_{:x}?mode=memory&cache=shared",
        u64::from_le_bytes(bytes)
    )
}

pub(crate) fn open_db_connection(db_path: &str) -> Result<Connection> {
    if db_path.starts_with("file:") {
        return Ok(Connection::open_with_flags(
            db_path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_URI,
        )?);
    }
    Ok(Connection::open(db_path)?)
}

// -------------------- Validation Errors --------------------

/// A user-facing rejection (duplicate plate, edit while running, ...).
///
/// Returned through `anyhow::Error`; callers that need to tell validation
/// failures apart from system faults use `err.downcast_ref::<ValidationError>()`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValidationError {
    pub code: &'static str,
    pub message: String,
}

impl ValidationError {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}
impl std::error::Error for ValidationError {}

// -------------------- Normalized Plates --------------------

/// Canonical plate text: uppercase, alphanumeric characters only.
///
/// This is the identity key for both deduplication and authorization lookup.
/// Matching is exact; near-miss OCR reads are distinct plates.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NormalizedPlate(String);

impl NormalizedPlate {
    /// Normalize raw OCR text. Returns `None` when nothing alphanumeric remains.
    pub fn parse(raw: &str) -> Option<Self> {
        let plate: String = raw
            .trim()
            .chars()
            .flat_map(char::to_uppercase)
            .filter(|c| c.is_alphanumeric())
            .collect();
        if plate.is_empty() {
            None
        } else {
            Some(Self(plate))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for NormalizedPlate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

// -------------------- Stop Signal --------------------

const STOP_POLL: Duration = Duration::from_millis(50);

/// Cooperative cancellation flag shared by every worker of one pipeline run.
#[derive(Clone, Debug, Default)]
pub struct StopSignal {
    raised: Arc<AtomicBool>,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&self) {
        self.raised.store(true, Ordering::SeqCst);
    }

    pub fn is_raised(&self) -> bool {
        self.raised.load(Ordering::SeqCst)
    }

    /// Sleep for `duration`, waking early if the signal is raised.
    /// Returns `true` when the signal was raised.
    pub fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        loop {
            if self.is_raised() {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            std::thread::sleep(STOP_POLL.min(deadline - now));
        }
    }
}

// -------------------- Tests --------------------
