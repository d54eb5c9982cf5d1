use anyhow::Result;

use crate::detect::result::DetectionCandidate;
use crate::frame::Frame;

/// Plate recognition engine boundary.
///
/// Engines are assumed not to tolerate concurrent invocation; the pipeline only
/// reaches them through `DetectionInvoker`, which serializes every call.
/// Implementations must treat the frame as read-only and must not retain it.
pub trait RecognitionEngine: Send {
    /// Engine identifier.
    fn name(&self) -> &'static str;

    /// Detect plates in a frame.
    fn predict(&mut self, frame: &Frame) -> Result<Vec<DetectionCandidate>>;

    /// Draw the latest predictions for display. Engines without overlays
    /// return `Ok(None)` and the raw frame is shown instead.
    fn annotate(&mut self, _frame: &Frame) -> Result<Option<Frame>> {
        Ok(None)
    }

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
