use anyhow::{anyhow, Result};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use plate_gate::{
    CameraConfig, CooldownConfig, DetectionInvoker, EventFilter, Frame, FrameSource, GateActuator,
    InMemoryRecordStore, IngestConfig, MotionConfig, NormalizedPlate, PipelineConfig,
    PipelineState, PixelFormat, RecordStore, ScriptedEngine, SourceFactory, SourceRead,
    SqliteRecordStore, Supervisor, UNKNOWN_NAME,
};

// -------------------- Fakes --------------------

#[derive(Default)]
struct SourceCounters {
    open_handles: AtomicUsize,
    reads: AtomicU64,
    failed_opens: AtomicUsize,
}

struct FakeSource {
    camera_id: String,
    counters: Arc<SourceCounters>,
    fail_first_opens: usize,
    open: bool,
}

impl FrameSource for FakeSource {
    fn open(&mut self, _uri: &str) -> Result<()> {
        if self.counters.failed_opens.load(Ordering::SeqCst) < self.fail_first_opens {
            self.counters.failed_opens.fetch_add(1, Ordering::SeqCst);
            return Err(anyhow!("connection refused"));
        }
        if !self.open {
            self.open = true;
            self.counters.open_handles.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    fn read(&mut self) -> Result<SourceRead> {
        std::thread::sleep(Duration::from_millis(5));
        self.counters.reads.fetch_add(1, Ordering::SeqCst);
        let frame = Frame::new(
            self.camera_id.clone(),
            vec![30; 16 * 16],
            16,
            16,
            PixelFormat::Gray8,
        )?;
        Ok(SourceRead::Frame(frame))
    }

    fn close(&mut self) {
        if self.open {
            self.open = false;
            self.counters.open_handles.fetch_sub(1, Ordering::SeqCst);
        }
    }

    fn is_open(&self) -> bool {
        self.open
    }
}

impl Drop for FakeSource {
    fn drop(&mut self) {
        self.close();
    }
}

struct FakeFactory {
    counters: Arc<SourceCounters>,
    fail_first_opens: usize,
}

impl SourceFactory for FakeFactory {
    fn create(&self, camera: &CameraConfig) -> Box<dyn FrameSource> {
        Box::new(FakeSource {
            camera_id: camera.camera_id.clone(),
            counters: self.counters.clone(),
            fail_first_opens: self.fail_first_opens,
            open: false,
        })
    }
}

struct RecordingActuator {
    calls: Arc<Mutex<Vec<String>>>,
}

impl GateActuator for RecordingActuator {
    fn trigger(&self, camera_id: &str) {
        self.calls.lock().unwrap().push(camera_id.to_string());
    }
}

// -------------------- Harness --------------------

struct Harness {
    supervisor: Supervisor,
    counters: Arc<SourceCounters>,
    gate_calls: Arc<Mutex<Vec<String>>>,
}

fn pipeline_config() -> PipelineConfig {
    PipelineConfig {
        cooldown: CooldownConfig::default(),
        motion: MotionConfig {
            skip_rate: 1,
            ..MotionConfig::default()
        },
        ingest: IngestConfig {
            connect_backoff: Duration::from_millis(50),
            reconnect_delay: Duration::from_millis(50),
        },
        show_feed: false,
        stop_grace: Duration::from_secs(2),
    }
}

fn harness<S: RecordStore + 'static>(
    mut store: S,
    cameras: &[&str],
    plates: &[&str],
    fail_first_opens: usize,
) -> Result<Harness> {
    for camera in cameras {
        store.set_camera_uri(camera, &format!("stub://{}", camera.to_lowercase()))?;
    }
    store.add_authorized("Mert Akten", &NormalizedPlate::parse("34ABC123").expect("plate"))?;

    let plates: Vec<String> = plates.iter().map(|p| p.to_string()).collect();
    let counters = Arc::new(SourceCounters::default());
    let gate_calls = Arc::new(Mutex::new(Vec::new()));
    let supervisor = Supervisor::new(
        pipeline_config(),
        Arc::new(Mutex::new(store)),
        Arc::new(DetectionInvoker::new(Box::new(ScriptedEngine::cycling(
            &plates, 0.99,
        )))),
        Box::new(RecordingActuator {
            calls: gate_calls.clone(),
        }),
        Arc::new(FakeFactory {
            counters: counters.clone(),
            fail_first_opens,
        }),
    )?;
    Ok(Harness {
        supervisor,
        counters,
        gate_calls,
    })
}

fn wait_until(timeout: Duration, mut done: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if done() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(20));
    }
    done()
}

fn processed(supervisor: &Supervisor) -> u64 {
    supervisor
        .stats()
        .values()
        .map(|stats| stats.frames_processed)
        .sum()
}

// -------------------- Tests --------------------

#[test]
fn cooldown_survives_restart_and_spans_cameras() -> Result<()> {
    let mut h = harness(
        InMemoryRecordStore::new(),
        &["Entrance", "Exit"],
        &["34 abc 123"],
        0,
    )?;

    h.supervisor.start()?;
    assert!(wait_until(Duration::from_secs(5), || {
        h.supervisor
            .export_events(&EventFilter::default())
            .map(|events| !events.is_empty())
            .unwrap_or(false)
    }));
    assert!(wait_until(Duration::from_secs(5), || processed(&h.supervisor) > 10));
    h.supervisor.stop()?;

    h.supervisor.start()?;
    assert!(wait_until(Duration::from_secs(5), || processed(&h.supervisor) > 10));
    h.supervisor.stop()?;

    let events = h.supervisor.export_events(&EventFilter::default())?;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].plate, "34ABC123");
    assert_eq!(events[0].name, "Mert Akten");
    assert!(events[0].authorized);
    // Actuation is queued to its own thread.
    assert!(wait_until(Duration::from_secs(2), || {
        !h.gate_calls.lock().unwrap().is_empty()
    }));
    assert_eq!(h.gate_calls.lock().unwrap().len(), 1);

    let suppressed: u64 = h.supervisor.stats().values().map(|s| s.suppressed).sum();
    assert!(suppressed > 0);
    Ok(())
}

#[test]
fn unauthorized_plate_is_logged_and_gate_stays_closed() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("gate.db");
    let store = SqliteRecordStore::open(path.to_str().expect("utf-8 path"))?;
    let mut h = harness(store, &["Exit"], &["ZZ0000"], 0)?;

    h.supervisor.start()?;
    assert!(wait_until(Duration::from_secs(5), || {
        h.supervisor
            .export_events(&EventFilter::default())
            .map(|events| !events.is_empty())
            .unwrap_or(false)
    }));
    h.supervisor.stop()?;

    let events = h.supervisor.export_events(&EventFilter::default())?;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].name, UNKNOWN_NAME);
    assert_eq!(events[0].camera_id, "Exit");
    assert!(!events[0].authorized);
    drop(h.supervisor);
    assert!(h.gate_calls.lock().unwrap().is_empty());
    Ok(())
}

#[test]
fn stop_releases_handles_and_halts_ingest() -> Result<()> {
    let mut h = harness(
        InMemoryRecordStore::new(),
        &["Entrance", "Exit"],
        &["06MERT06"],
        0,
    )?;

    h.supervisor.start()?;
    assert!(wait_until(Duration::from_secs(5), || {
        h.counters.open_handles.load(Ordering::SeqCst) == 2
    }));

    let started = Instant::now();
    h.supervisor.stop()?;
    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(h.supervisor.state(), PipelineState::Stopped);
    assert_eq!(h.counters.open_handles.load(Ordering::SeqCst), 0);

    let reads = h.counters.reads.load(Ordering::SeqCst);
    std::thread::sleep(Duration::from_millis(100));
    assert_eq!(h.counters.reads.load(Ordering::SeqCst), reads);
    Ok(())
}

#[test]
fn ingest_retries_failed_connections() -> Result<()> {
    let mut h = harness(
        InMemoryRecordStore::new(),
        &["Entrance"],
        &["06MERT06"],
        3,
    )?;

    h.supervisor.start()?;
    assert!(wait_until(Duration::from_secs(5), || {
        h.supervisor
            .stats()
            .get("Entrance")
            .is_some_and(|stats| stats.frames_ingested > 0)
    }));
    h.supervisor.stop()?;

    let stats = h.supervisor.stats();
    assert_eq!(stats["Entrance"].connect_failures, 3);
    Ok(())
}

#[test]
fn camera_change_applies_on_next_start() -> Result<()> {
    let mut h = harness(
        InMemoryRecordStore::new(),
        &["Entrance"],
        &["06MERT06"],
        0,
    )?;
    h.supervisor.start()?;
    assert!(h.supervisor.set_camera_uri("Rear", "stub://rear").is_err());
    h.supervisor.stop()?;

    h.supervisor.set_camera_uri("Rear", "stub://rear")?;
    h.supervisor.start()?;
    assert!(wait_until(Duration::from_secs(5), || {
        h.counters.open_handles.load(Ordering::SeqCst) == 2
    }));
    h.supervisor.stop()?;
    assert_eq!(
        h.supervisor.stats().keys().cloned().collect::<Vec<_>>(),
        vec!["Entrance".to_string(), "Rear".to_string()]
    );
    Ok(())
}
