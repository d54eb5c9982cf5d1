pub mod scripted;
pub mod stub;

pub use scripted::ScriptedEngine;
pub use stub::StubEngine;

use anyhow::{anyhow, Result};

use super::RecognitionEngine;

/// Build an engine by configured backend name.
///
/// `scripted` cycles through `plates` at `confidence`; it is meant for demos
/// and soak tests against synthetic streams.
pub fn engine_from_name(
    name: &str,
    plates: &[String],
    confidence: f32,
) -> Result<Box<dyn RecognitionEngine>> {
    match name {
        "stub" => Ok(Box::new(StubEngine::new())),
        "scripted" => {
            if plates.is_empty() {
                return Err(anyhow!("scripted engine requires at least one plate"));
            }
            Ok(Box::new(ScriptedEngine::cycling(plates, confidence)))
        }
        other => Err(anyhow!("unknown recognition engine '{}'", other)),
    }
}
