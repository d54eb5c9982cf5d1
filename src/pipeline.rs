//! Per-camera processing: motion gate, recognition, dedup, authorization,
//! event persistence and gate actuation.

use anyhow::Result;
use chrono::{Local, NaiveDateTime, Timelike};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::dedup::{Admission, Deduplicator};
use crate::detect::DetectionInvoker;
use crate::frame::{Frame, FrameSlot};
use crate::gate::{DetachedActuator, GateActuator};
use crate::motion::MotionGate;
use crate::stats::CameraStats;
use crate::storage::{with_store, GateEvent, SharedStore};
use crate::{NormalizedPlate, StopSignal};

/// Name recorded for plates that are not in the authorized set.
pub const UNKNOWN_NAME: &str = "Unknown";

const SLOT_WAIT: Duration = Duration::from_millis(200);

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Resolution {
    pub name: String,
    pub authorized: bool,
}

impl Resolution {
    fn unknown() -> Self {
        Self {
            name: UNKNOWN_NAME.to_string(),
            authorized: false,
        }
    }
}

// -------------------- Authorization --------------------

#[derive(Clone)]
pub struct AuthorizationResolver {
    store: SharedStore,
}

impl AuthorizationResolver {
    pub fn new(store: SharedStore) -> Self {
        Self { store }
    }

    /// Exact-match lookup. A store failure resolves to unknown so the gate
    /// stays closed.
    pub fn resolve(&self, plate: &NormalizedPlate) -> Resolution {
        match with_store(&self.store, |store| store.lookup_authorized(plate)) {
            Ok(Some(identity)) => Resolution {
                name: identity.name,
                authorized: true,
            },
            Ok(None) => Resolution::unknown(),
            Err(err) => {
                log::warn!("authorization lookup failed for {}: {}", plate, err);
                Resolution::unknown()
            }
        }
    }
}

// -------------------- Event Recording --------------------

/// Resolves, persists and actuates accepted plates.
///
/// The gate actuator runs on its own thread behind a bounded queue, so a
/// slow or hung relay never stalls the camera that produced the event.
pub struct EventRecorder {
    store: SharedStore,
    resolver: AuthorizationResolver,
    actuator: DetachedActuator,
}

impl EventRecorder {
    pub fn new(store: SharedStore, actuator: Box<dyn GateActuator>) -> Result<Self> {
        Ok(Self {
            resolver: AuthorizationResolver::new(store.clone()),
            store,
            actuator: DetachedActuator::spawn(actuator)?,
        })
    }

    /// Resolve, persist and queue actuation for one accepted plate.
    pub fn record(
        &self,
        plate: &NormalizedPlate,
        camera_id: &str,
        stats: &CameraStats,
    ) -> GateEvent {
        let resolution = self.resolver.resolve(plate);
        let event = GateEvent {
            plate: plate.clone(),
            name: resolution.name,
            camera_id: camera_id.to_string(),
            timestamp: local_now(),
            authorized: resolution.authorized,
        };
        stats.event_recorded();

        match with_store(&self.store, |store| store.append_event(&event)) {
            Ok(id) => log::info!(
                "event #{} plate={} name={} camera={} authorized={}",
                id,
                event.plate,
                event.name,
                event.camera_id,
                event.authorized
            ),
            Err(err) => {
                stats.persist_failed();
                log::error!(
                    "failed to persist event plate={} camera={}: {}",
                    event.plate,
                    event.camera_id,
                    err
                );
            }
        }

        if event.authorized {
            self.actuator.trigger(camera_id);
        }
        event
    }
}

fn local_now() -> NaiveDateTime {
    let now = Local::now().naive_local();
    now.with_nanosecond(0).unwrap_or(now)
}

// -------------------- Processing Loop --------------------

/// Everything one camera's processing thread needs.
pub struct ProcessingWorker {
    camera_id: String,
    frames: Arc<FrameSlot>,
    display: Arc<FrameSlot>,
    motion: MotionGate,
    invoker: Arc<DetectionInvoker>,
    dedup: Arc<Deduplicator>,
    recorder: Arc<EventRecorder>,
    stop: StopSignal,
    stats: Arc<CameraStats>,
    show_feed: bool,
}

impl ProcessingWorker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        camera_id: impl Into<String>,
        frames: Arc<FrameSlot>,
        display: Arc<FrameSlot>,
        motion: MotionGate,
        invoker: Arc<DetectionInvoker>,
        dedup: Arc<Deduplicator>,
        recorder: Arc<EventRecorder>,
        stop: StopSignal,
        stats: Arc<CameraStats>,
        show_feed: bool,
    ) -> Self {
        Self {
            camera_id: camera_id.into(),
            frames,
            display,
            motion,
            invoker,
            dedup,
            recorder,
            stop,
            stats,
            show_feed,
        }
    }

    pub fn run(mut self) {
        log::info!("processing started for camera {}", self.camera_id);
        while !self.stop.is_raised() {
            if let Some(frame) = self.frames.take_timeout(SLOT_WAIT) {
                self.process_frame(frame, Instant::now());
            }
        }
        log::info!("processing stopped for camera {}", self.camera_id);
    }

    /// Handle one frame. Returns the events it produced.
    pub fn process_frame(&mut self, frame: Frame, now: Instant) -> Vec<GateEvent> {
        self.stats.frame_processed();
        let decision = self.motion.observe(&frame, now);
        if decision.motion_started {
            log::debug!(
                "motion on camera {} (level {})",
                self.camera_id,
                decision.motion_level
            );
        }

        let mut events = Vec::new();
        if decision.run_recognition {
            self.stats.recognition_ran();
            for candidate in self.invoker.predict(&frame) {
                match self.dedup.evaluate(&candidate, now) {
                    Admission::Accepted(plate) => {
                        events.push(self.recorder.record(&plate, &self.camera_id, &self.stats));
                    }
                    Admission::Suppressed(_) => self.stats.duplicate_suppressed(),
                    Admission::Rejected => {}
                }
            }
        }

        if self.show_feed {
            let shown = if decision.run_recognition {
                self.invoker.annotate(&frame)
            } else {
                None
            };
            self.display.publish(shown.unwrap_or(frame));
        }
        events
    }
}
