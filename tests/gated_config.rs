use std::sync::Mutex;
use std::time::Duration;

use tempfile::NamedTempFile;

use plate_gate::config::GatedConfig;
use plate_gate::CameraConfig;

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "PLATE_GATE_CONFIG",
        "PLATE_GATE_DB_PATH",
        "PLATE_GATE_COOLDOWN_SECS",
        "PLATE_GATE_MIN_CONFIDENCE",
        "PLATE_GATE_ENGINE",
        "PLATE_GATE_CAMERAS",
    ] {
        std::env::remove_var(key);
    }
}

fn write_config(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("temp config");
    std::io::Write::write_all(&mut file, contents.as_bytes()).expect("write config");
    file
}

#[test]
fn loads_config_from_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = write_config(
        r#"
        db_path = "gate_prod.db"
        show_feed = true
        stop_grace_secs = 8
        health_log_secs = 60

        [dedup]
        cooldown_secs = 15
        retention_secs = 900
        min_confidence = 0.9

        [motion]
        check_interval_secs = 2
        skip_rate = 3
        pixel_threshold = 1800

        [ingest]
        connect_backoff_secs = 7
        target_fps = 15

        [engine]
        name = "scripted"
        plates = ["34ABC123", "06MERT06"]

        [gate]
        command = "/usr/local/bin/open-gate"
        args = ["--pulse-ms", "500"]

        [[cameras]]
        camera_id = "Entrance"
        stream_uri = "rtsp://192.0.2.10/live"

        [[cameras]]
        camera_id = "Exit"
        stream_uri = "rtsp://192.0.2.11/live"
        "#,
    );

    std::env::set_var("PLATE_GATE_CONFIG", file.path());
    std::env::set_var("PLATE_GATE_COOLDOWN_SECS", "20");
    std::env::set_var("PLATE_GATE_ENGINE", "stub");

    let cfg = GatedConfig::load().expect("load config");

    assert_eq!(cfg.db_path, "gate_prod.db");
    assert!(cfg.show_feed);
    assert_eq!(cfg.stop_grace, Duration::from_secs(8));
    assert_eq!(cfg.health_log_interval, Duration::from_secs(60));
    assert_eq!(cfg.dedup.cooldown, Duration::from_secs(20));
    assert_eq!(cfg.dedup.retention, Duration::from_secs(900));
    assert_eq!(cfg.dedup.cleanup_interval, Duration::from_secs(30));
    assert_eq!(cfg.dedup.min_confidence, 0.9);
    assert_eq!(cfg.motion.check_interval, Duration::from_secs(2));
    assert_eq!(cfg.motion.skip_rate, 3);
    assert_eq!(cfg.motion.pixel_threshold, 1800);
    assert_eq!(cfg.ingest.connect_backoff, Duration::from_secs(7));
    assert_eq!(cfg.ingest.reconnect_delay, Duration::from_secs(3));
    assert_eq!(cfg.rtsp.target_fps, 15);
    assert_eq!(cfg.engine.name, "stub");
    assert_eq!(cfg.engine.plates, vec!["34ABC123", "06MERT06"]);
    assert_eq!(
        cfg.gate.command.as_deref(),
        Some(std::path::Path::new("/usr/local/bin/open-gate"))
    );
    assert_eq!(cfg.gate.args, vec!["--pulse-ms", "500"]);
    assert_eq!(
        cfg.cameras,
        vec![
            CameraConfig::new("Entrance", "rtsp://192.0.2.10/live"),
            CameraConfig::new("Exit", "rtsp://192.0.2.11/live"),
        ]
    );

    let pipeline = cfg.pipeline_config();
    assert!(pipeline.show_feed);
    assert_eq!(pipeline.cooldown.cooldown, Duration::from_secs(20));

    clear_env();
}

#[test]
fn defaults_apply_without_config_file() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();
    std::env::set_var("PLATE_GATE_CAMERAS", "Gate=stub://gate");

    let cfg = GatedConfig::load().expect("load config");
    assert_eq!(cfg.db_path, "plate_gate.db");
    assert_eq!(cfg.dedup.cooldown, Duration::from_secs(10));
    assert_eq!(cfg.dedup.retention, Duration::from_secs(600));
    assert_eq!(cfg.dedup.min_confidence, 0.95);
    assert_eq!(cfg.motion.skip_rate, 5);
    assert_eq!(cfg.cameras, vec![CameraConfig::new("Gate", "stub://gate")]);
    assert!(cfg.gate.command.is_none());

    clear_env();
}

#[test]
fn invalid_values_are_rejected() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("PLATE_GATE_MIN_CONFIDENCE", "1.5");
    assert!(GatedConfig::load().is_err());
    std::env::remove_var("PLATE_GATE_MIN_CONFIDENCE");

    std::env::set_var("PLATE_GATE_COOLDOWN_SECS", "ten");
    assert!(GatedConfig::load().is_err());
    std::env::remove_var("PLATE_GATE_COOLDOWN_SECS");

    let file = write_config(
        r#"
        [motion]
        skip_rate = 0
        "#,
    );
    std::env::set_var("PLATE_GATE_CONFIG", file.path());
    assert!(GatedConfig::load().is_err());

    let file = write_config("unknown_key = 1\n");
    std::env::set_var("PLATE_GATE_CONFIG", file.path());
    assert!(GatedConfig::load().is_err());

    clear_env();
}
