//! Gate actuators.
//!
//! The processing loop only ever sees a `DetachedActuator`: `trigger` enqueues
//! the camera id and returns, the wrapped actuator runs on its own thread.

use anyhow::{anyhow, Result};
use std::path::PathBuf;
use std::process::Command;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, SyncSender, TrySendError};
use std::thread::JoinHandle;

/// Triggers that may wait while the relay is busy.
pub const ACTUATOR_QUEUE_DEPTH: usize = 8;

pub trait GateActuator: Send + Sync {
    fn trigger(&self, camera_id: &str);
}

/// Logs the gate opening. Default when no relay is configured.
#[derive(Debug, Default)]
pub struct LogActuator;

impl GateActuator for LogActuator {
    fn trigger(&self, camera_id: &str) {
        log::info!("gate open on camera {}", camera_id);
    }
}

/// Runs an external program with the camera id as its last argument.
#[derive(Debug, Clone)]
pub struct CommandActuator {
    program: PathBuf,
    args: Vec<String>,
}

impl CommandActuator {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    pub fn run(&self, camera_id: &str) -> Result<()> {
        let status = Command::new(&self.program)
            .args(&self.args)
            .arg(camera_id)
            .status()
            .map_err(|e| anyhow!("failed to run {}: {}", self.program.display(), e))?;
        if !status.success() {
            return Err(anyhow!(
                "{} exited with {} for camera {}",
                self.program.display(),
                status,
                camera_id
            ));
        }
        Ok(())
    }
}

impl GateActuator for CommandActuator {
    fn trigger(&self, camera_id: &str) {
        match self.run(camera_id) {
            Ok(()) => log::info!("gate relay fired for camera {}", camera_id),
            Err(err) => log::error!("gate relay failed: {}", err),
        }
    }
}

/// Queues triggers to a dedicated actuator thread.
///
/// The queue is bounded: while the relay is busy at most
/// `ACTUATOR_QUEUE_DEPTH` triggers wait, later ones are dropped and counted.
/// Dropping it closes the queue and joins the thread after pending triggers
/// have run.
pub struct DetachedActuator {
    tx: Option<SyncSender<String>>,
    dropped: AtomicU64,
    join: Option<JoinHandle<()>>,
}

impl DetachedActuator {
    pub fn spawn(inner: Box<dyn GateActuator>) -> Result<Self> {
        let (tx, rx) = mpsc::sync_channel::<String>(ACTUATOR_QUEUE_DEPTH);
        let join = std::thread::Builder::new()
            .name("gate-actuator".to_string())
            .spawn(move || {
                for camera_id in rx {
                    inner.trigger(&camera_id);
                }
            })
            .map_err(|e| anyhow!("failed to spawn actuator thread: {}", e))?;
        Ok(Self {
            tx: Some(tx),
            dropped: AtomicU64::new(0),
            join: Some(join),
        })
    }

    /// Triggers discarded because the queue was full or the thread was gone.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl GateActuator for DetachedActuator {
    fn trigger(&self, camera_id: &str) {
        let Some(tx) = self.tx.as_ref() else {
            return;
        };
        let reason = match tx.try_send(camera_id.to_string()) {
            Ok(()) => return,
            Err(TrySendError::Full(_)) => "queue full",
            Err(TrySendError::Disconnected(_)) => "actuator thread gone",
        };
        self.dropped.fetch_add(1, Ordering::Relaxed);
        log::error!("gate trigger for camera {} dropped: {}", camera_id, reason);
    }
}

impl Drop for DetachedActuator {
    fn drop(&mut self) {
        self.tx.take();
        if let Some(join) = self.join.take() {
            if join.join().is_err() {
                log::error!("gate actuator thread panicked");
            }
        }
    }
}
