use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::dedup::CooldownConfig;
use crate::ingest::{IngestConfig, RtspConfig};
use crate::motion::MotionConfig;
use crate::storage::CameraConfig;
use crate::supervisor::PipelineConfig;

const DEFAULT_DB_PATH: &str = "plate_gate.db";
const DEFAULT_STOP_GRACE_SECS: u64 = 5;
const DEFAULT_HEALTH_LOG_SECS: u64 = 30;
const DEFAULT_ENGINE: &str = "stub";
const DEFAULT_SCRIPTED_CONFIDENCE: f32 = 0.97;
const DEFAULT_CAMERAS: [(&str, &str); 2] =
    [("Entrance", "stub://entrance"), ("Exit", "stub://exit")];

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct GatedConfigFile {
    db_path: Option<String>,
    show_feed: Option<bool>,
    stop_grace_secs: Option<u64>,
    health_log_secs: Option<u64>,
    dedup: Option<DedupConfigFile>,
    motion: Option<MotionConfigFile>,
    ingest: Option<IngestConfigFile>,
    engine: Option<EngineConfigFile>,
    gate: Option<GateConfigFile>,
    cameras: Option<Vec<CameraConfig>>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct DedupConfigFile {
    cooldown_secs: Option<u64>,
    retention_secs: Option<u64>,
    cleanup_interval_secs: Option<u64>,
    min_confidence: Option<f32>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct MotionConfigFile {
    check_interval_secs: Option<u64>,
    window_secs: Option<u64>,
    skip_rate: Option<u64>,
    pixel_threshold: Option<usize>,
    downscale: Option<u32>,
    diff_threshold: Option<u8>,
    learning_rate: Option<f32>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct IngestConfigFile {
    connect_backoff_secs: Option<u64>,
    reconnect_delay_secs: Option<u64>,
    target_fps: Option<u32>,
    width: Option<u32>,
    height: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct EngineConfigFile {
    name: Option<String>,
    plates: Option<Vec<String>>,
    confidence: Option<f32>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct GateConfigFile {
    command: Option<PathBuf>,
    args: Option<Vec<String>>,
}

#[derive(Debug, Clone)]
pub struct GatedConfig {
    pub db_path: String,
    pub show_feed: bool,
    pub stop_grace: Duration,
    pub health_log_interval: Duration,
    pub dedup: CooldownConfig,
    pub motion: MotionConfig,
    pub ingest: IngestConfig,
    pub rtsp: RtspConfig,
    pub engine: EngineSettings,
    pub gate: GateSettings,
    pub cameras: Vec<CameraConfig>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EngineSettings {
    pub name: String,
    /// Plates replayed by the `scripted` engine.
    pub plates: Vec<String>,
    pub confidence: f32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GateSettings {
    /// Relay program; `None` only logs gate openings.
    pub command: Option<PathBuf>,
    pub args: Vec<String>,
}

impl GatedConfig {
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("PLATE_GATE_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) if !path.trim().is_empty() => Some(read_config_file(Path::new(path))?),
            _ => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            cooldown: self.dedup.clone(),
            motion: self.motion.clone(),
            ingest: self.ingest.clone(),
            show_feed: self.show_feed,
            stop_grace: self.stop_grace,
        }
    }

    fn from_file(file: GatedConfigFile) -> Self {
        let dedup_file = file.dedup.unwrap_or_default();
        let defaults = CooldownConfig::default();
        let dedup = CooldownConfig {
            cooldown: secs_or(dedup_file.cooldown_secs, defaults.cooldown),
            retention: secs_or(dedup_file.retention_secs, defaults.retention),
            cleanup_interval: secs_or(dedup_file.cleanup_interval_secs, defaults.cleanup_interval),
            min_confidence: dedup_file.min_confidence.unwrap_or(defaults.min_confidence),
        };

        let motion_file = file.motion.unwrap_or_default();
        let defaults = MotionConfig::default();
        let motion = MotionConfig {
            check_interval: secs_or(motion_file.check_interval_secs, defaults.check_interval),
            motion_window: secs_or(motion_file.window_secs, defaults.motion_window),
            skip_rate: motion_file.skip_rate.unwrap_or(defaults.skip_rate),
            pixel_threshold: motion_file.pixel_threshold.unwrap_or(defaults.pixel_threshold),
            downscale: motion_file.downscale.unwrap_or(defaults.downscale),
            diff_threshold: motion_file.diff_threshold.unwrap_or(defaults.diff_threshold),
            learning_rate: motion_file.learning_rate.unwrap_or(defaults.learning_rate),
        };

        let ingest_file = file.ingest.unwrap_or_default();
        let defaults = IngestConfig::default();
        let ingest = IngestConfig {
            connect_backoff: secs_or(ingest_file.connect_backoff_secs, defaults.connect_backoff),
            reconnect_delay: secs_or(ingest_file.reconnect_delay_secs, defaults.reconnect_delay),
        };
        let defaults = RtspConfig::default();
        let rtsp = RtspConfig {
            target_fps: ingest_file.target_fps.unwrap_or(defaults.target_fps),
            width: ingest_file.width.unwrap_or(defaults.width),
            height: ingest_file.height.unwrap_or(defaults.height),
        };

        let engine_file = file.engine.unwrap_or_default();
        let engine = EngineSettings {
            name: engine_file
                .name
                .unwrap_or_else(|| DEFAULT_ENGINE.to_string()),
            plates: engine_file.plates.unwrap_or_default(),
            confidence: engine_file
                .confidence
                .unwrap_or(DEFAULT_SCRIPTED_CONFIDENCE),
        };

        let gate = file
            .gate
            .map(|gate| GateSettings {
                command: gate.command,
                args: gate.args.unwrap_or_default(),
            })
            .unwrap_or_default();

        let cameras = file.cameras.unwrap_or_else(|| {
            DEFAULT_CAMERAS
                .iter()
                .map(|(id, uri)| CameraConfig::new(*id, *uri))
                .collect()
        });

        Self {
            db_path: file.db_path.unwrap_or_else(|| DEFAULT_DB_PATH.to_string()),
            show_feed: file.show_feed.unwrap_or(false),
            stop_grace: Duration::from_secs(file.stop_grace_secs.unwrap_or(DEFAULT_STOP_GRACE_SECS)),
            health_log_interval: Duration::from_secs(
                file.health_log_secs.unwrap_or(DEFAULT_HEALTH_LOG_SECS),
            ),
            dedup,
            motion,
            ingest,
            rtsp,
            engine,
            gate,
            cameras,
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(path) = std::env::var("PLATE_GATE_DB_PATH") {
            if !path.trim().is_empty() {
                self.db_path = path;
            }
        }
        if let Ok(cooldown) = std::env::var("PLATE_GATE_COOLDOWN_SECS") {
            let seconds: u64 = cooldown.trim().parse().map_err(|_| {
                anyhow!("PLATE_GATE_COOLDOWN_SECS must be an integer number of seconds")
            })?;
            self.dedup.cooldown = Duration::from_secs(seconds);
        }
        if let Ok(confidence) = std::env::var("PLATE_GATE_MIN_CONFIDENCE") {
            self.dedup.min_confidence = confidence
                .trim()
                .parse()
                .map_err(|_| anyhow!("PLATE_GATE_MIN_CONFIDENCE must be a number"))?;
        }
        if let Ok(engine) = std::env::var("PLATE_GATE_ENGINE") {
            if !engine.trim().is_empty() {
                self.engine.name = engine.trim().to_string();
            }
        }
        if let Ok(cameras) = std::env::var("PLATE_GATE_CAMERAS") {
            let parsed = parse_cameras(&cameras)?;
            if !parsed.is_empty() {
                self.cameras = parsed;
            }
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        if self.db_path.trim().is_empty() {
            return Err(anyhow!("db_path must not be empty"));
        }
        for (name, value) in [
            ("dedup.cooldown_secs", self.dedup.cooldown),
            ("dedup.retention_secs", self.dedup.retention),
            ("dedup.cleanup_interval_secs", self.dedup.cleanup_interval),
            ("motion.check_interval_secs", self.motion.check_interval),
            ("motion.window_secs", self.motion.motion_window),
            ("health_log_secs", self.health_log_interval),
        ] {
            if value.is_zero() {
                return Err(anyhow!("{} must be greater than zero", name));
            }
        }
        if self.dedup.retention < self.dedup.cooldown {
            return Err(anyhow!("dedup retention must be at least the cooldown"));
        }
        if !(0.0..=1.0).contains(&self.dedup.min_confidence) {
            return Err(anyhow!("dedup.min_confidence must be within 0..=1"));
        }
        if !(0.0..=1.0).contains(&self.engine.confidence) {
            return Err(anyhow!("engine.confidence must be within 0..=1"));
        }
        if self.motion.skip_rate == 0 {
            return Err(anyhow!("motion.skip_rate must be at least 1"));
        }
        if self.motion.downscale == 0 {
            return Err(anyhow!("motion.downscale must be at least 1"));
        }
        if !(self.motion.learning_rate > 0.0 && self.motion.learning_rate <= 1.0) {
            return Err(anyhow!("motion.learning_rate must be within (0, 1]"));
        }
        if self.rtsp.target_fps == 0 || self.rtsp.width == 0 || self.rtsp.height == 0 {
            return Err(anyhow!("ingest fps, width and height must be greater than zero"));
        }

        let mut seen = HashSet::new();
        for camera in &mut self.cameras {
            camera.camera_id = camera.camera_id.trim().to_string();
            camera.stream_uri = camera.stream_uri.trim().to_string();
            if camera.camera_id.is_empty() || camera.stream_uri.is_empty() {
                return Err(anyhow!("camera id and stream URI must not be empty"));
            }
            if !seen.insert(camera.camera_id.clone()) {
                return Err(anyhow!("duplicate camera id '{}'", camera.camera_id));
            }
        }
        Ok(())
    }
}

fn secs_or(value: Option<u64>, default: Duration) -> Duration {
    value.map(Duration::from_secs).unwrap_or(default)
}

fn read_config_file(path: &Path) -> Result<GatedConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = toml::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}

/// Parse `id=uri,id=uri`.
fn parse_cameras(value: &str) -> Result<Vec<CameraConfig>> {
    value
        .split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let (id, uri) = entry
                .split_once('=')
                .ok_or_else(|| anyhow!("PLATE_GATE_CAMERAS entry '{}' is not id=uri", entry))?;
            Ok(CameraConfig::new(id.trim(), uri.trim()))
        })
        .collect()
}
