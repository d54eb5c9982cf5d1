use anyhow::Result;

use crate::detect::backend::RecognitionEngine;
use crate::detect::result::DetectionCandidate;
use crate::frame::Frame;

/// Stub engine for deployments without a model: never reads a plate.
#[derive(Default)]
pub struct StubEngine {
    calls: u64,
}

impl StubEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> u64 {
        self.calls
    }
}

impl RecognitionEngine for StubEngine {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn predict(&mut self, _frame: &Frame) -> Result<Vec<DetectionCandidate>> {
        self.calls += 1;
        Ok(Vec::new())
    }
}
