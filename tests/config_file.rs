use std::time::Duration;

use meshbackup::config::{Config, DEFAULT_PORT};

#[test]
fn loads_overrides_from_toml_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("meshbackup.toml");
    std::fs::write(
        &path,
        r#"
[device]
port = "/dev/ttyACM0"
baud_rate = 38400

[backup]
settle_delay_ms = 250

[logging]
level = "debug"
"#,
    )
    .unwrap();

    let cfg = tokio_test::block_on(Config::load(path.to_str().unwrap())).expect("load");

    assert_eq!(cfg.resolve_port(None), "/dev/ttyACM0");
    assert_eq!(cfg.link_settings().baud_rate, 38400);
    assert_eq!(cfg.settle_delay(), Duration::from_millis(250));
    assert_eq!(cfg.logging.level_filter(), Some(log::LevelFilter::Debug));
}

#[test]
fn created_default_file_loads_back_to_defaults() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("starter.toml");
    let path = path.to_str().unwrap();

    tokio_test::block_on(Config::create_default(path)).expect("create");
    let cfg = tokio_test::block_on(Config::load(path)).expect("load");

    assert_eq!(cfg.device.port, DEFAULT_PORT);
    assert_eq!(cfg.settle_delay(), Duration::from_secs(2));
}

#[test]
fn invalid_values_are_rejected_with_path() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("bad.toml");
    std::fs::write(&path, "[device]\nhop_limit = 12\n").unwrap();

    let err = tokio_test::block_on(Config::load(path.to_str().unwrap())).unwrap_err();

    let msg = err.to_string();
    assert!(msg.contains("bad.toml"), "{msg}");
    assert!(msg.contains("hop_limit"), "{msg}");
}

#[test]
fn missing_file_is_an_error() {
    let err = tokio_test::block_on(Config::load("/nonexistent/meshbackup.toml")).unwrap_err();
    assert!(err.to_string().contains("Failed to read config file"));
}

#[test]
fn oversized_connect_timeout_fails_to_load() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("slow.toml");
    std::fs::write(&path, "[device]\nconnect_timeout_secs = 9223372036854775807\n").unwrap();

    let err = tokio_test::block_on(Config::load(path.to_str().unwrap())).unwrap_err();

    let msg = err.to_string();
    assert!(msg.contains("Invalid config file"), "{msg}");
    assert!(msg.contains("connect_timeout_secs"), "{msg}");
}
