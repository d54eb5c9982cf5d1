use serde::{Deserialize, Serialize};

/// One plate read produced by the recognition engine.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DetectionCandidate {
    /// Raw OCR text, before normalization.
    pub text: String,
    /// OCR confidence in 0..=1.
    pub confidence: f32,
    /// Plate location, when the engine reports one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<PlateBox>,
}

impl DetectionCandidate {
    pub fn new(text: impl Into<String>, confidence: f32) -> Self {
        Self {
            text: text.into(),
            confidence,
            region: None,
        }
    }
}

/// Bounding box in normalized 0..1 image coordinates.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PlateBox {
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
}
