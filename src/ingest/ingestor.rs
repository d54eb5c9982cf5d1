use std::time::Duration;

use super::{FrameSource, SourceRead};
use crate::frame::FrameSlot;
use crate::stats::CameraStats;
use crate::storage::CameraConfig;
use crate::StopSignal;

const DEFAULT_CONNECT_BACKOFF_SECS: u64 = 5;
const DEFAULT_RECONNECT_DELAY_SECS: u64 = 3;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IngestConfig {
    /// Wait after a failed open before trying again.
    pub connect_backoff: Duration,
    /// Wait after a read failure or end of stream before reopening.
    pub reconnect_delay: Duration,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            connect_backoff: Duration::from_secs(DEFAULT_CONNECT_BACKOFF_SECS),
            reconnect_delay: Duration::from_secs(DEFAULT_RECONNECT_DELAY_SECS),
        }
    }
}

/// Ingest loop for one camera. Returns only once `stop` is raised; the source
/// is always closed on return.
pub fn run_ingestor(
    camera: &CameraConfig,
    source: &mut dyn FrameSource,
    slot: &FrameSlot,
    stop: &StopSignal,
    config: &IngestConfig,
    stats: &CameraStats,
) {
    while !stop.is_raised() {
        if !source.is_open() {
            log::info!("connecting to camera {}", camera.camera_id);
            match source.open(&camera.stream_uri) {
                Ok(()) => log::info!("camera {} connected", camera.camera_id),
                Err(err) => {
                    stats.connect_failed();
                    log::error!(
                        "cannot open camera {}: {}. retrying in {}s",
                        camera.camera_id,
                        err,
                        config.connect_backoff.as_secs()
                    );
                    stop.sleep(config.connect_backoff);
                    continue;
                }
            }
        }

        let interruption = match source.read() {
            Ok(SourceRead::Frame(frame)) => {
                stats.frame_ingested();
                if slot.publish(frame) {
                    stats.frame_overwritten();
                }
                continue;
            }
            Ok(SourceRead::EndOfStream) => "end of stream".to_string(),
            Err(err) => err.to_string(),
        };

        stats.stream_interrupted();
        log::warn!(
            "lost camera {} ({}), reconnecting in {}s",
            camera.camera_id,
            interruption,
            config.reconnect_delay.as_secs()
        );
        source.close();
        stop.sleep(config.reconnect_delay);
    }

    source.close();
    log::info!("ingest for camera {} stopped", camera.camera_id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{Frame, PixelFormat};
    use anyhow::{anyhow, Result};
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    enum Step {
        OpenFails,
        Frame(u8),
        Eos,
        ReadFails,
    }

    struct ScriptedSource {
        steps: VecDeque<Step>,
        open: bool,
        opens: Arc<AtomicUsize>,
        closes: Arc<AtomicUsize>,
        stop_when_drained: StopSignal,
    }

    impl FrameSource for ScriptedSource {
        fn open(&mut self, _uri: &str) -> Result<()> {
            self.opens.fetch_add(1, Ordering::SeqCst);
            if matches!(self.steps.front(), Some(Step::OpenFails)) {
                self.steps.pop_front();
                return Err(anyhow!("connection refused"));
            }
            self.open = true;
            Ok(())
        }

        fn read(&mut self) -> Result<SourceRead> {
            match self.steps.pop_front() {
                Some(Step::Frame(v)) => Ok(SourceRead::Frame(Frame::new(
                    "gate",
                    vec![v; 4],
                    2,
                    2,
                    PixelFormat::Gray8,
                )?)),
                Some(Step::Eos) => Ok(SourceRead::EndOfStream),
                Some(Step::ReadFails) => Err(anyhow!("socket reset")),
                Some(Step::OpenFails) => Err(anyhow!("unexpected step")),
                None => {
                    self.stop_when_drained.raise();
                    Ok(SourceRead::EndOfStream)
                }
            }
        }

        fn close(&mut self) {
            if self.open {
                self.closes.fetch_add(1, Ordering::SeqCst);
            }
            self.open = false;
        }

        fn is_open(&self) -> bool {
            self.open
        }
    }

    fn fast_config() -> IngestConfig {
        IngestConfig {
            connect_backoff: Duration::from_millis(5),
            reconnect_delay: Duration::from_millis(5),
        }
    }

    #[test]
    fn ingestor_retries_and_reconnects_until_stopped() {
        let stop = StopSignal::new();
        let opens = Arc::new(AtomicUsize::new(0));
        let closes = Arc::new(AtomicUsize::new(0));
        let mut source = ScriptedSource {
            steps: VecDeque::from(vec![
                Step::OpenFails,
                Step::OpenFails,
                Step::Frame(1),
                Step::Frame(2),
                Step::ReadFails,
                Step::Frame(3),
                Step::Eos,
                Step::Frame(4),
            ]),
            open: false,
            opens: opens.clone(),
            closes: closes.clone(),
            stop_when_drained: stop.clone(),
        };
        let camera = CameraConfig::new("gate", "stub://gate");
        let slot = FrameSlot::new();
        let stats = CameraStats::new();

        run_ingestor(&camera, &mut source, &slot, &stop, &fast_config(), &stats);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.connect_failures, 2);
        assert_eq!(snapshot.frames_ingested, 4);
        // read failure, EOS, and the final drained EOS
        assert_eq!(snapshot.stream_interruptions, 3);
        assert_eq!(snapshot.frames_overwritten, 3);
        assert_eq!(opens.load(Ordering::SeqCst), 5);
        assert!(!source.is_open());
        assert_eq!(closes.load(Ordering::SeqCst), 3);
        assert_eq!(slot.len(), 1);
        assert_eq!(slot.take().expect("latest").pixels()[0], 4);
    }

    #[test]
    fn ingestor_returns_immediately_when_already_stopped() {
        let stop = StopSignal::new();
        stop.raise();
        let opens = Arc::new(AtomicUsize::new(0));
        let mut source = ScriptedSource {
            steps: VecDeque::new(),
            open: false,
            opens: opens.clone(),
            closes: Arc::new(AtomicUsize::new(0)),
            stop_when_drained: stop.clone(),
        };
        let camera = CameraConfig::new("gate", "stub://gate");
        run_ingestor(
            &camera,
            &mut source,
            &FrameSlot::new(),
            &stop,
            &fast_config(),
            &CameraStats::new(),
        );
        assert_eq!(opens.load(Ordering::SeqCst), 0);
    }
}
