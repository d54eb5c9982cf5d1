//! gated - plate gate daemon
//!
//! This daemon:
//! 1. Loads configuration (PLATE_GATE_CONFIG + environment overrides)
//! 2. Opens the record store and seeds configured cameras
//! 3. Starts one ingest and one processing thread per camera
//! 4. Opens the gate for authorized plates, logs every accepted plate
//! 5. Logs per-camera health until Ctrl-C, then stops cleanly

use anyhow::{anyhow, Result};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex};

use plate_gate::config::GatedConfig;
use plate_gate::{
    engine_from_name, CommandActuator, DetectionInvoker, GateActuator,
    LogActuator, RecordStore, RtspSourceFactory, SqliteRecordStore, Supervisor,
};

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cfg = GatedConfig::load()?;

    let mut store = SqliteRecordStore::open(&cfg.db_path)?;
    for camera in &cfg.cameras {
        if store.seed_camera(camera)? {
            log::info!("camera {} seeded with {}", camera.camera_id, camera.stream_uri);
        }
    }
    let store = Arc::new(Mutex::new(store));

    let engine = engine_from_name(&cfg.engine.name, &cfg.engine.plates, cfg.engine.confidence)?;
    let invoker = Arc::new(DetectionInvoker::new(engine));
    invoker.warm_up()?;

    let relay: Box<dyn GateActuator> = match &cfg.gate.command {
        Some(program) => {
            log::info!("gate relay: {}", program.display());
            Box::new(CommandActuator::new(program.clone(), cfg.gate.args.clone()))
        }
        None => {
            log::warn!("no gate relay configured; gate openings are only logged");
            Box::new(LogActuator)
        }
    };

    let mut supervisor = Supervisor::new(
        cfg.pipeline_config(),
        store,
        invoker,
        relay,
        Arc::new(RtspSourceFactory::new(cfg.rtsp.clone())),
    )?;

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .map_err(|e| anyhow!("error setting Ctrl-C handler: {}", e))?;

    supervisor.start()?;
    log::info!("gated running. writing to {}", cfg.db_path);
    for camera in supervisor.cameras()? {
        log::info!("camera {} -> {}", camera.camera_id, camera.stream_uri);
    }

    loop {
        match rx.recv_timeout(cfg.health_log_interval) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {
                for (camera_id, stats) in supervisor.stats() {
                    log::info!(
                        "camera {} health: ingested={} dropped={} connect_failures={} interruptions={} processed={} recognitions={} events={} suppressed={} persist_failures={}",
                        camera_id,
                        stats.frames_ingested,
                        stats.frames_overwritten,
                        stats.connect_failures,
                        stats.stream_interruptions,
                        stats.frames_processed,
                        stats.recognitions,
                        stats.events,
                        stats.suppressed,
                        stats.persist_failures
                    );
                }
            }
        }
    }

    log::info!("shutdown signal received, stopping pipeline...");
    supervisor.stop()?;
    Ok(())
}
