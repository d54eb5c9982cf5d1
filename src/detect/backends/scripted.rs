use anyhow::{anyhow, Result};
use std::collections::VecDeque;

use crate::detect::backend::RecognitionEngine;
use crate::detect::result::DetectionCandidate;
use crate::frame::Frame;

/// Engine that replays prepared results, one entry per `predict` call.
///
/// In cycling mode the script repeats forever; otherwise it is consumed once
/// and later calls return nothing. A `None` entry simulates an engine fault.
pub struct ScriptedEngine {
    script: VecDeque<Option<Vec<DetectionCandidate>>>,
    cycle: bool,
}

impl ScriptedEngine {
    pub fn new(script: Vec<Option<Vec<DetectionCandidate>>>) -> Self {
        Self {
            script: script.into(),
            cycle: false,
        }
    }

    /// One candidate per call, rotating through `plates`.
    pub fn cycling(plates: &[String], confidence: f32) -> Self {
        let script = plates
            .iter()
            .map(|plate| Some(vec![DetectionCandidate::new(plate.clone(), confidence)]))
            .collect();
        Self {
            script,
            cycle: true,
        }
    }

    pub fn remaining(&self) -> usize {
        self.script.len()
    }
}

impl RecognitionEngine for ScriptedEngine {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn predict(&mut self, _frame: &Frame) -> Result<Vec<DetectionCandidate>> {
        let Some(step) = self.script.pop_front() else {
            return Ok(Vec::new());
        };
        if self.cycle {
            self.script.push_back(step.clone());
        }
        step.ok_or_else(|| anyhow!("scripted engine fault"))
    }
}
