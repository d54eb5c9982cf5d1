//! RTSP frame source.
//!
//! `RtspSource` opens camera streams by URI:
//! - `stub://<name>` produces synthetic grayscale frames (a static scene with a
//!   bright block passing through periodically), paced at the target frame rate.
//! - Any other URI is decoded with GStreamer (feature `rtsp-gstreamer`).
//!
//! The source is created closed; `run_ingestor` drives open/read/close.

#[cfg(feature = "rtsp-gstreamer")]
use anyhow::Context;
use anyhow::{anyhow, Result};
use std::time::{Duration, Instant};

use super::{FrameSource, SourceFactory, SourceRead};
use crate::frame::{Frame, PixelFormat};
use crate::storage::CameraConfig;

/// Decode parameters for an RTSP source.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RtspConfig {
    /// Target frame rate (frames per second). Synthetic sources are paced to it.
    pub target_fps: u32,
    /// Frame width for synthetic frames.
    pub width: u32,
    /// Frame height for synthetic frames.
    pub height: u32,
}

impl Default for RtspConfig {
    fn default() -> Self {
        Self {
            target_fps: 10,
            width: 640,
            height: 480,
        }
    }
}

impl RtspConfig {
    fn frame_interval(&self) -> Duration {
        if self.target_fps == 0 {
            Duration::ZERO
        } else {
            Duration::from_millis(1000 / self.target_fps as u64)
        }
    }
}

/// RTSP frame source for one camera.
pub struct RtspSource {
    camera_id: String,
    config: RtspConfig,
    backend: Option<RtspBackend>,
    frames_captured: u64,
}

enum RtspBackend {
    Synthetic(SyntheticRtspSource),
    #[cfg(feature = "rtsp-gstreamer")]
    Gstreamer(GstreamerRtspSource),
}

impl RtspSource {
    pub fn new(camera_id: impl Into<String>, config: RtspConfig) -> Self {
        Self {
            camera_id: camera_id.into(),
            config,
            backend: None,
            frames_captured: 0,
        }
    }

    pub fn frames_captured(&self) -> u64 {
        self.frames_captured
    }
}

impl FrameSource for RtspSource {
    fn open(&mut self, uri: &str) -> Result<()> {
        self.close();
        let backend = if uri.starts_with("stub://") {
            RtspBackend::Synthetic(SyntheticRtspSource::new(
                self.camera_id.clone(),
                self.config.clone(),
            ))
        } else {
            #[cfg(feature = "rtsp-gstreamer")]
            {
                RtspBackend::Gstreamer(GstreamerRtspSource::open(
                    self.camera_id.clone(),
                    uri,
                    &self.config,
                )?)
            }
            #[cfg(not(feature = "rtsp-gstreamer"))]
            {
                return Err(anyhow!(
                    "cannot open {}: RTSP decoding requires the rtsp-gstreamer feature",
                    uri
                ));
            }
        };
        self.backend = Some(backend);
        Ok(())
    }

    fn read(&mut self) -> Result<SourceRead> {
        let read = match self.backend.as_mut() {
            Some(RtspBackend::Synthetic(source)) => source.read(),
            #[cfg(feature = "rtsp-gstreamer")]
            Some(RtspBackend::Gstreamer(source)) => source.read(),
            None => return Err(anyhow!("stream for camera {} is not open", self.camera_id)),
        }?;
        if matches!(read, SourceRead::Frame(_)) {
            self.frames_captured += 1;
        }
        Ok(read)
    }

    fn close(&mut self) {
        #[cfg(feature = "rtsp-gstreamer")]
        if let Some(RtspBackend::Gstreamer(source)) = self.backend.as_mut() {
            source.close();
        }
        self.backend = None;
    }

    fn is_open(&self) -> bool {
        self.backend.is_some()
    }
}

impl Drop for RtspSource {
    fn drop(&mut self) {
        self.close();
    }
}

/// Builds an `RtspSource` per camera with shared decode parameters.
#[derive(Clone, Debug, Default)]
pub struct RtspSourceFactory {
    pub config: RtspConfig,
}

impl RtspSourceFactory {
    pub fn new(config: RtspConfig) -> Self {
        Self { config }
    }
}

impl SourceFactory for RtspSourceFactory {
    fn create(&self, camera: &CameraConfig) -> Box<dyn FrameSource> {
        Box::new(RtspSource::new(
            camera.camera_id.clone(),
            self.config.clone(),
        ))
    }
}

// ----------------------------------------------------------------------------
// Synthetic source (stub://)
// ----------------------------------------------------------------------------

/// Frames between synthetic "vehicle" passes.
const PASS_PERIOD_FRAMES: u64 = 100;
/// Frames a pass takes to cross the scene.
const PASS_LENGTH_FRAMES: u64 = 20;

struct SyntheticRtspSource {
    camera_id: String,
    config: RtspConfig,
    frame_count: u64,
    next_frame_at: Instant,
}

impl SyntheticRtspSource {
    fn new(camera_id: String, config: RtspConfig) -> Self {
        log::info!("RtspSource: camera {} using synthetic frames", camera_id);
        Self {
            camera_id,
            config,
            frame_count: 0,
            next_frame_at: Instant::now(),
        }
    }

    fn read(&mut self) -> Result<SourceRead> {
        let now = Instant::now();
        if self.next_frame_at > now {
            std::thread::sleep(self.next_frame_at - now);
        }
        self.next_frame_at = Instant::now() + self.config.frame_interval();
        self.frame_count += 1;

        let pixels = self.generate_pixels();
        Ok(SourceRead::Frame(Frame::new(
            self.camera_id.clone(),
            pixels,
            self.config.width,
            self.config.height,
            PixelFormat::Gray8,
        )?))
    }

    /// Static horizontal gradient, plus a bright block sweeping left to right
    /// during the first `PASS_LENGTH_FRAMES` of every pass period.
    fn generate_pixels(&self) -> Vec<u8> {
        let width = self.config.width as usize;
        let height = self.config.height as usize;
        let mut pixels = vec![0u8; width * height];
        for (i, pixel) in pixels.iter_mut().enumerate() {
            *pixel = ((i % width.max(1)) * 128 / width.max(1)) as u8;
        }

        let phase = self.frame_count % PASS_PERIOD_FRAMES;
        if phase < PASS_LENGTH_FRAMES {
            let block_w = width / 3;
            let block_h = height / 3;
            let x0 = (width.saturating_sub(block_w)) * phase as usize / PASS_LENGTH_FRAMES as usize;
            let y0 = height / 3;
            for y in y0..(y0 + block_h).min(height) {
                let row = y * width;
                for x in x0..(x0 + block_w).min(width) {
                    pixels[row + x] = 255;
                }
            }
        }
        pixels
    }
}

// ----------------------------------------------------------------------------
// Production RTSP source using GStreamer
// ----------------------------------------------------------------------------

#[cfg(feature = "rtsp-gstreamer")]
struct GstreamerRtspSource {
    camera_id: String,
    pipeline: gstreamer::Pipeline,
    appsink: gstreamer_app::AppSink,
    read_timeout: Duration,
}

#[cfg(feature = "rtsp-gstreamer")]
impl GstreamerRtspSource {
    /// Build `rtspsrc ! decodebin ! videoconvert ! appsink` and start playing.
    fn open(camera_id: String, uri: &str, config: &RtspConfig) -> Result<Self> {
        gstreamer::init().context("initialize gstreamer")?;

        let pipeline_description = format!(
            "rtspsrc location={} latency=0 ! decodebin ! videoconvert ! video/x-raw,format=RGB ! \
             appsink name=appsink sync=false max-buffers=1 drop=true",
            uri
        );
        let pipeline = gstreamer::parse::launch(&pipeline_description)
            .context("build RTSP pipeline")?
            .downcast::<gstreamer::Pipeline>()
            .map_err(|_| anyhow!("RTSP pipeline is not a Pipeline"))?;

        let appsink = pipeline
            .by_name("appsink")
            .context("appsink element missing from pipeline")?
            .downcast::<gstreamer_app::AppSink>()
            .map_err(|_| anyhow!("appsink element has unexpected type"))?;

        let caps = gstreamer::Caps::builder("video/x-raw")
            .field("format", "RGB")
            .build();
        appsink.set_caps(Some(&caps));
        appsink.set_max_buffers(1);
        appsink.set_drop(true);
        appsink.set_sync(false);

        pipeline
            .set_state(gstreamer::State::Playing)
            .context("set RTSP pipeline to Playing")?;

        let base_ms = if config.target_fps == 0 {
            2_000
        } else {
            (1000 / config.target_fps as u64).saturating_mul(20)
        };
        Ok(Self {
            camera_id,
            pipeline,
            appsink,
            read_timeout: Duration::from_millis(base_ms.max(2_000)),
        })
    }

    fn read(&mut self) -> Result<SourceRead> {
        self.poll_bus()?;

        let timeout = gstreamer::ClockTime::from_mseconds(self.read_timeout.as_millis() as u64);
        let Some(sample) = self.appsink.try_pull_sample(timeout) else {
            if self.appsink.is_eos() {
                return Ok(SourceRead::EndOfStream);
            }
            return Err(anyhow!("RTSP stream stalled"));
        };

        let (pixels, width, height) = sample_to_pixels(&sample)?;
        Ok(SourceRead::Frame(Frame::new(
            self.camera_id.clone(),
            pixels,
            width,
            height,
            PixelFormat::Rgb8,
        )?))
    }

    fn close(&mut self) {
        if let Err(err) = self.pipeline.set_state(gstreamer::State::Null) {
            log::warn!("camera {}: failed to stop RTSP pipeline: {}", self.camera_id, err);
        }
    }

    fn poll_bus(&mut self) -> Result<()> {
        let Some(bus) = self.pipeline.bus() else {
            return Ok(());
        };
        while let Some(message) = bus.pop() {
            use gstreamer::MessageView;
            match message.view() {
                MessageView::Error(err) => {
                    return Err(anyhow!(
                        "gstreamer error from {:?}: {}",
                        err.src().map(|s| s.path_string()),
                        err.error()
                    ));
                }
                MessageView::Eos(..) => return Err(anyhow!("gstreamer reached EOS")),
                _ => {}
            }
        }
        Ok(())
    }
}

#[cfg(feature = "rtsp-gstreamer")]
fn sample_to_pixels(sample: &gstreamer::Sample) -> Result<(Vec<u8>, u32, u32)> {
    let buffer = sample.buffer().context("RTSP sample missing buffer")?;
    let caps = sample.caps().context("RTSP sample missing caps")?;
    let info =
        gstreamer_video::VideoInfo::from_caps(caps).context("parse RTSP caps as video info")?;

    let width = info.width();
    let height = info.height();
    let row_bytes = (width as usize) * 3;
    let stride = info.stride()[0] as usize;

    let map = buffer.map_readable().context("map RTSP buffer")?;
    let data = map.as_slice();

    if stride == row_bytes {
        let frame_bytes = data
            .get(..row_bytes * height as usize)
            .context("RTSP buffer is shorter than its caps")?;
        return Ok((frame_bytes.to_vec(), width, height));
    }

    let mut pixels = Vec::with_capacity(row_bytes * height as usize);
    for row in 0..height as usize {
        let start = row * stride;
        let end = start + row_bytes;
        pixels.extend_from_slice(
            data.get(start..end)
                .context("RTSP buffer row is out of bounds")?,
        );
    }

    Ok((pixels, width, height))
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn stub_config() -> RtspConfig {
        RtspConfig {
            target_fps: 0,
            width: 64,
            height: 48,
        }
    }

    fn read_frame(source: &mut RtspSource) -> Result<Frame> {
        match source.read()? {
            SourceRead::Frame(frame) => Ok(frame),
            SourceRead::EndOfStream => Err(anyhow!("unexpected end of stream")),
        }
    }

    #[test]
    fn stub_source_produces_frames_after_open() -> Result<()> {
        let mut source = RtspSource::new("Entrance", stub_config());
        assert!(!source.is_open());
        assert!(source.read().is_err());

        source.open("stub://entrance")?;
        assert!(source.is_open());

        let frame = read_frame(&mut source)?;
        assert_eq!(frame.width, 64);
        assert_eq!(frame.height, 48);
        assert_eq!(frame.camera_id, "Entrance");
        assert_eq!(source.frames_captured(), 1);

        source.close();
        assert!(!source.is_open());
        Ok(())
    }

    #[test]
    fn stub_source_scene_changes_during_a_pass() -> Result<()> {
        let mut source = RtspSource::new("Exit", stub_config());
        source.open("stub://exit")?;

        let during_pass = read_frame(&mut source)?;
        let mut after_pass = read_frame(&mut source)?;
        for _ in 0..PASS_LENGTH_FRAMES {
            after_pass = read_frame(&mut source)?;
        }
        assert_ne!(during_pass.pixels(), after_pass.pixels());
        Ok(())
    }

    #[cfg(not(feature = "rtsp-gstreamer"))]
    #[test]
    fn real_uri_requires_gstreamer_feature() {
        let mut source = RtspSource::new("Entrance", stub_config());
        assert!(source.open("rtsp://192.0.2.1:554/stream").is_err());
        assert!(!source.is_open());
    }

    #[test]
    fn factory_tags_sources_with_camera_id() -> Result<()> {
        let factory = RtspSourceFactory::new(stub_config());
        let mut source = factory.create(&CameraConfig::new("Exit", "stub://exit"));
        source.open("stub://exit")?;
        match source.read()? {
            SourceRead::Frame(frame) => assert_eq!(frame.camera_id, "Exit"),
            SourceRead::EndOfStream => panic!("stub source ended"),
        }
        Ok(())
    }
}
