//! Pipeline lifecycle.
//!
//! `Stopped → Running → Stopping → Stopped`. A run owns its stop signal,
//! frame slots and threads; the deduplicator, engine invoker, record store
//! and gate actuator thread outlive runs, so cooldowns survive a stop/start
//! cycle.

use anyhow::{anyhow, Result};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::dedup::{CooldownConfig, CooldownTracker, Deduplicator};
use crate::detect::DetectionInvoker;
use crate::frame::{Frame, FrameSlot};
use crate::gate::GateActuator;
use crate::ingest::{run_ingestor, IngestConfig, SourceFactory};
use crate::motion::{MotionConfig, MotionGate};
use crate::pipeline::{EventRecorder, ProcessingWorker};
use crate::stats::{CameraStats, CameraStatsSnapshot};
use crate::storage::{
    with_store, AuthorizedIdentity, CameraConfig, EventFilter, EventRecord, SharedStore,
};
use crate::{NormalizedPlate, StopSignal, ValidationError};

const DEFAULT_STOP_GRACE_SECS: u64 = 5;
const JOIN_POLL: Duration = Duration::from_millis(10);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Stopped,
    Running,
    /// Stop signal raised, workers not yet joined. Entered by
    /// `request_stop`; `stop` moves on to `Stopped`.
    Stopping,
}

#[derive(Clone, Debug, PartialEq)]
pub struct PipelineConfig {
    pub cooldown: CooldownConfig,
    pub motion: MotionConfig,
    pub ingest: IngestConfig,
    /// Publish processed frames to the per-camera display slots.
    pub show_feed: bool,
    /// `stop` warns when joining takes longer than this.
    pub stop_grace: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            cooldown: CooldownConfig::default(),
            motion: MotionConfig::default(),
            ingest: IngestConfig::default(),
            show_feed: false,
            stop_grace: Duration::from_secs(DEFAULT_STOP_GRACE_SECS),
        }
    }
}

struct CameraRuntime {
    camera: CameraConfig,
    frames: Arc<FrameSlot>,
    display: Arc<FrameSlot>,
    stats: Arc<CameraStats>,
}

struct Run {
    stop: StopSignal,
    handles: Vec<(String, JoinHandle<()>)>,
}

pub struct Supervisor {
    config: PipelineConfig,
    store: SharedStore,
    invoker: Arc<DetectionInvoker>,
    dedup: Arc<Deduplicator>,
    recorder: Arc<EventRecorder>,
    sources: Arc<dyn SourceFactory>,
    state: PipelineState,
    cameras: Vec<CameraRuntime>,
    run: Option<Run>,
}

impl Supervisor {
    pub fn new(
        config: PipelineConfig,
        store: SharedStore,
        invoker: Arc<DetectionInvoker>,
        actuator: Box<dyn GateActuator>,
        sources: Arc<dyn SourceFactory>,
    ) -> Result<Self> {
        Ok(Self {
            dedup: Arc::new(Deduplicator::new(config.cooldown.clone())),
            recorder: Arc::new(EventRecorder::new(store.clone(), actuator)?),
            config,
            store,
            invoker,
            sources,
            state: PipelineState::Stopped,
            cameras: Vec::new(),
            run: None,
        })
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn cooldowns(&self) -> &CooldownTracker {
        self.dedup.tracker()
    }

    /// Spawn ingest and processing threads for every configured camera, plus
    /// the cooldown janitor.
    pub fn start(&mut self) -> Result<()> {
        if self.state != PipelineState::Stopped {
            return Err(ValidationError::new(
                "PIPELINE_NOT_STOPPED",
                format!("cannot start while {:?}", self.state),
            )
            .into());
        }
        let cameras = with_store(&self.store, |store| store.camera_settings())?;
        if cameras.is_empty() {
            return Err(ValidationError::new("NO_CAMERAS", "no cameras configured").into());
        }

        self.cameras = cameras
            .into_iter()
            .map(|camera| CameraRuntime {
                camera,
                frames: Arc::new(FrameSlot::new()),
                display: Arc::new(FrameSlot::new()),
                stats: Arc::new(CameraStats::new()),
            })
            .collect();

        let mut run = Run {
            stop: StopSignal::new(),
            handles: Vec::new(),
        };
        if let Err(err) = self.spawn_workers(&mut run) {
            log::error!("pipeline start failed: {}", err);
            run.stop.raise();
            join_all(run.handles, self.config.stop_grace);
            return Err(err);
        }

        log::info!(
            "pipeline running: {} cameras, engine {}",
            self.cameras.len(),
            self.invoker.engine_name()
        );
        self.run = Some(run);
        self.state = PipelineState::Running;
        Ok(())
    }

    fn spawn_workers(&self, run: &mut Run) -> Result<()> {
        for runtime in &self.cameras {
            let camera = runtime.camera.clone();
            let mut source = self.sources.create(&camera);
            let frames = runtime.frames.clone();
            let stop = run.stop.clone();
            let ingest = self.config.ingest.clone();
            let stats = runtime.stats.clone();
            let name = format!("ingest-{}", camera.camera_id);
            let handle = spawn_named(&name, move || {
                run_ingestor(&camera, source.as_mut(), &frames, &stop, &ingest, &stats)
            })?;
            run.handles.push((name, handle));

            let worker = ProcessingWorker::new(
                runtime.camera.camera_id.clone(),
                runtime.frames.clone(),
                runtime.display.clone(),
                MotionGate::new(self.config.motion.clone()),
                self.invoker.clone(),
                self.dedup.clone(),
                self.recorder.clone(),
                run.stop.clone(),
                runtime.stats.clone(),
                self.config.show_feed,
            );
            let name = format!("process-{}", runtime.camera.camera_id);
            let handle = spawn_named(&name, move || worker.run())?;
            run.handles.push((name, handle));
        }

        let dedup = self.dedup.clone();
        let stop = run.stop.clone();
        let interval = self.config.cooldown.cleanup_interval;
        let handle = spawn_named("cooldown-janitor", move || {
            while !stop.sleep(interval) {
                let removed = dedup.cleanup(Instant::now());
                if removed > 0 {
                    log::debug!("janitor removed {} stale cooldown entries", removed);
                }
            }
        })?;
        run.handles.push(("cooldown-janitor".to_string(), handle));
        Ok(())
    }

    /// Raise the stop signal without waiting for workers. A running pipeline
    /// moves to `Stopping` and stays there until `stop` joins it.
    pub fn request_stop(&mut self) {
        if let Some(run) = &self.run {
            if self.state == PipelineState::Running {
                log::info!("stopping pipeline");
                self.state = PipelineState::Stopping;
            }
            run.stop.raise();
        }
    }

    /// Raise the stop signal and join every worker. Stopping a stopped
    /// pipeline is a no-op.
    pub fn stop(&mut self) -> Result<()> {
        self.request_stop();
        let Some(run) = self.run.take() else {
            self.state = PipelineState::Stopped;
            return Ok(());
        };
        let panicked = join_all(run.handles, self.config.stop_grace);
        for runtime in &self.cameras {
            runtime.frames.clear();
        }
        self.state = PipelineState::Stopped;
        log::info!("pipeline stopped");
        if panicked.is_empty() {
            Ok(())
        } else {
            Err(anyhow!("worker threads panicked: {}", panicked.join(", ")))
        }
    }

    // -------------------- Commands --------------------

    /// Change a camera's stream URI. Only allowed while stopped.
    pub fn set_camera_uri(&mut self, camera_id: &str, stream_uri: &str) -> Result<()> {
        if self.state != PipelineState::Stopped {
            return Err(ValidationError::new(
                "PIPELINE_RUNNING",
                "stop the pipeline before changing camera settings",
            )
            .into());
        }
        let (camera_id, stream_uri) = (camera_id.trim(), stream_uri.trim());
        if camera_id.is_empty() || stream_uri.is_empty() {
            return Err(ValidationError::new(
                "EMPTY_CAMERA_FIELD",
                "camera id and stream URI must not be empty",
            )
            .into());
        }
        with_store(&self.store, |store| store.set_camera_uri(camera_id, stream_uri))?;
        log::info!("camera {} now streams from {}", camera_id, stream_uri);
        Ok(())
    }

    pub fn add_authorized(&self, name: &str, plate: &str) -> Result<i64> {
        let plate = NormalizedPlate::parse(plate).ok_or_else(|| {
            ValidationError::new("EMPTY_PLATE", "plate has no letters or digits")
        })?;
        let id = with_store(&self.store, |store| store.add_authorized(name, &plate))?;
        log::info!("authorized plate {} for {}", plate, name.trim());
        Ok(id)
    }

    pub fn remove_authorized(&self, id: i64) -> Result<bool> {
        with_store(&self.store, |store| store.remove_authorized(id))
    }

    pub fn list_authorized(&self) -> Result<Vec<AuthorizedIdentity>> {
        with_store(&self.store, |store| store.list_authorized())
    }

    pub fn export_events(&self, filter: &EventFilter) -> Result<Vec<EventRecord>> {
        with_store(&self.store, |store| store.export_events(filter))
    }

    pub fn cameras(&self) -> Result<Vec<CameraConfig>> {
        with_store(&self.store, |store| store.camera_settings())
    }

    /// Counters of the current (or last) run, by camera id.
    pub fn stats(&self) -> BTreeMap<String, CameraStatsSnapshot> {
        self.cameras
            .iter()
            .map(|runtime| (runtime.camera.camera_id.clone(), runtime.stats.snapshot()))
            .collect()
    }

    /// Latest processed frame for a camera when `show_feed` is on.
    pub fn take_display_frame(&self, camera_id: &str) -> Option<Frame> {
        self.cameras
            .iter()
            .find(|runtime| runtime.camera.camera_id == camera_id)
            .and_then(|runtime| runtime.display.take())
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        if let Err(err) = self.stop() {
            log::error!("pipeline shutdown: {}", err);
        }
    }
}

fn spawn_named<F>(name: &str, body: F) -> Result<JoinHandle<()>>
where
    F: FnOnce() + Send + 'static,
{
    std::thread::Builder::new()
        .name(name.to_string())
        .spawn(body)
        .map_err(|e| anyhow!("failed to spawn {} thread: {}", name, e))
}

/// Join every handle; warns once the grace period is exceeded. Returns the
/// names of threads that panicked.
fn join_all(handles: Vec<(String, JoinHandle<()>)>, grace: Duration) -> Vec<String> {
    let deadline = Instant::now() + grace;
    let mut warned = false;
    let mut panicked = Vec::new();
    for (name, handle) in handles {
        while !handle.is_finished() && Instant::now() < deadline {
            std::thread::sleep(JOIN_POLL);
        }
        if !handle.is_finished() && !warned {
            log::warn!(
                "thread {} still running after {}s grace period; waiting",
                name,
                grace.as_secs()
            );
            warned = true;
        }
        if handle.join().is_err() {
            log::error!("thread {} panicked", name);
            panicked.push(name);
        }
    }
    panicked
}
