use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Per-camera pipeline counters, shared by the ingest and process threads.
#[derive(Debug, Default)]
pub struct CameraStats {
    frames_ingested: AtomicU64,
    frames_overwritten: AtomicU64,
    connect_failures: AtomicU64,
    stream_interruptions: AtomicU64,
    frames_processed: AtomicU64,
    recognitions: AtomicU64,
    events: AtomicU64,
    suppressed: AtomicU64,
    persist_failures: AtomicU64,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct CameraStatsSnapshot {
    pub frames_ingested: u64,
    pub frames_overwritten: u64,
    pub connect_failures: u64,
    pub stream_interruptions: u64,
    pub frames_processed: u64,
    pub recognitions: u64,
    pub events: u64,
    pub suppressed: u64,
    pub persist_failures: u64,
}

macro_rules! counter {
    ($inc:ident, $field:ident) => {
        pub fn $inc(&self) {
            self.$field.fetch_add(1, Ordering::Relaxed);
        }
    };
}

impl CameraStats {
    pub fn new() -> Self {
        Self::default()
    }

    counter!(frame_ingested, frames_ingested);
    counter!(frame_overwritten, frames_overwritten);
    counter!(connect_failed, connect_failures);
    counter!(stream_interrupted, stream_interruptions);
    counter!(frame_processed, frames_processed);
    counter!(recognition_ran, recognitions);
    counter!(event_recorded, events);
    counter!(duplicate_suppressed, suppressed);
    counter!(persist_failed, persist_failures);

    pub fn snapshot(&self) -> CameraStatsSnapshot {
        CameraStatsSnapshot {
            frames_ingested: self.frames_ingested.load(Ordering::Relaxed),
            frames_overwritten: self.frames_overwritten.load(Ordering::Relaxed),
            connect_failures: self.connect_failures.load(Ordering::Relaxed),
            stream_interruptions: self.stream_interruptions.load(Ordering::Relaxed),
            frames_processed: self.frames_processed.load(Ordering::Relaxed),
            recognitions: self.recognitions.load(Ordering::Relaxed),
            events: self.events.load(Ordering::Relaxed),
            suppressed: self.suppressed.load(Ordering::Relaxed),
            persist_failures: self.persist_failures.load(Ordering::Relaxed),
        }
    }
}
