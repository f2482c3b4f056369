use miclock_app::{AppConfig, EngineSection};
use miclock_foundation::Settings;
use serial_test::serial;
use std::io::Write;
use std::time::Duration;
use tempfile::NamedTempFile;

fn write_config(contents: &str) -> NamedTempFile {
    let mut file = tempfile::Builder::new()
        .suffix(".toml")
        .tempfile()
        .expect("create temp config");
    file.write_all(contents.as_bytes()).expect("write config");
    file
}

#[test]
#[serial]
fn missing_file_is_an_error() {
    assert!(AppConfig::from_path("/nonexistent/miclock.toml").is_err());
}

#[test]
#[serial]
fn empty_file_yields_defaults() {
    let file = write_config("");
    let config = AppConfig::from_path(file.path()).unwrap();
    assert_eq!(config.lock, Settings::default());
    assert_eq!(config.engine, EngineSection::default());
}

#[test]
#[serial]
fn file_values_override_defaults() {
    let file = write_config(
        r#"
[lock]
lock_enabled = false
target_volume = 0.65
poll_interval_secs = 1.5
epsilon = 0.05

[engine]
max_retry_attempts = 2
initial_retry_delay_ms = 100
"#,
    );
    let config = AppConfig::from_path(file.path()).unwrap();

    assert!(!config.lock.lock_enabled);
    assert!((config.lock.target_volume - 0.65).abs() < f32::EPSILON);
    assert!((config.lock.poll_interval_secs - 1.5).abs() < f32::EPSILON);
    assert!((config.lock.epsilon - 0.05).abs() < f32::EPSILON);

    let engine = config.engine.engine_config();
    assert_eq!(engine.retry.max_attempts, 2);
    assert_eq!(engine.retry.initial_delay, Duration::from_millis(100));
    // Unspecified knobs keep their defaults.
    assert_eq!(engine.debounce_window, Duration::from_millis(100));
}

#[test]
#[serial]
fn out_of_range_values_are_sanitized() {
    let file = write_config(
        r#"
[lock]
target_volume = 2.5
poll_interval_secs = 0.001
epsilon = -1.0
"#,
    );
    let config = AppConfig::from_path(file.path()).unwrap();
    assert!((config.lock.target_volume - 1.0).abs() < f32::EPSILON);
    assert!(config.lock.poll_interval_secs >= 0.05);
    assert!(config.lock.epsilon >= 0.0);
}

#[test]
#[serial]
fn environment_overrides_file() {
    let file = write_config("[lock]\ntarget_volume = 0.7\n");
    std::env::set_var("MICLOCK__LOCK__TARGET_VOLUME", "0.55");
    let result = AppConfig::from_path(file.path());
    std::env::remove_var("MICLOCK__LOCK__TARGET_VOLUME");

    let config = result.unwrap();
    assert!((config.lock.target_volume - 0.55).abs() < f32::EPSILON);
}
