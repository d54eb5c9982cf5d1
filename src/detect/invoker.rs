use anyhow::{anyhow, Result};
use std::sync::Mutex;

use super::backend::RecognitionEngine;
use super::result::DetectionCandidate;
use crate::frame::Frame;

/// Serialized access to the single recognition engine.
///
/// Shared by every camera's processing thread. The mutex is the engine
/// critical section: exactly one `predict` or `annotate` runs at a time.
pub struct DetectionInvoker {
    engine: Mutex<Box<dyn RecognitionEngine>>,
    name: &'static str,
}

impl DetectionInvoker {
    pub fn new(engine: Box<dyn RecognitionEngine>) -> Self {
        let name = engine.name();
        Self {
            engine: Mutex::new(engine),
            name,
        }
    }

    pub fn engine_name(&self) -> &'static str {
        self.name
    }

    pub fn warm_up(&self) -> Result<()> {
        self.with_engine(|engine| engine.warm_up())
    }

    /// Run plate recognition. Engine faults degrade to no candidates.
    pub fn predict(&self, frame: &Frame) -> Vec<DetectionCandidate> {
        match self.with_engine(|engine| engine.predict(frame)) {
            Ok(candidates) => candidates,
            Err(err) => {
                log::warn!(
                    "recognition engine {} failed on camera {}: {}",
                    self.name,
                    frame.camera_id,
                    err
                );
                Vec::new()
            }
        }
    }

    /// Display overlay for `frame`, if the engine draws one.
    pub fn annotate(&self, frame: &Frame) -> Option<Frame> {
        match self.with_engine(|engine| engine.annotate(frame)) {
            Ok(annotated) => annotated,
            Err(err) => {
                log::debug!("annotation failed on camera {}: {}", frame.camera_id, err);
                None
            }
        }
    }

    fn with_engine<T>(
        &self,
        call: impl FnOnce(&mut dyn RecognitionEngine) -> Result<T>,
    ) -> Result<T> {
        let mut guard = self
            .engine
            .lock()
            .map_err(|_| anyhow!("recognition engine lock poisoned"))?;
        call(&mut **guard)
    }
}
