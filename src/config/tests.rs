use super::*;
use serial_test::serial;
use std::io::Write;

fn write_yaml(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::Builder::new()
        .suffix(".yaml")
        .tempfile()
        .unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

#[test]
fn test_config_default() {
    let config = Config::default();
    assert_eq!(config.session.bus, BusKind::Session);
    assert!(config.session.requested_name().is_none());
    assert_eq!(config.signals.queue_capacity, 1024);
    assert_eq!(config.signals.overflow_policy(), OverflowPolicy::Drop);
    assert!(config.listen.is_none());
}

#[test]
fn test_empty_name_is_none() {
    let session = SessionConfig {
        bus: BusKind::System,
        name: Some(String::new()),
    };
    assert!(session.requested_name().is_none());
}

#[test]
fn test_wait_mode_uses_timeout() {
    let signals = SignalConfig {
        overflow: OverflowMode::Wait,
        enqueue_timeout_ms: 250,
        ..SignalConfig::default()
    };
    assert_eq!(
        signals.overflow_policy(),
        OverflowPolicy::Wait(Duration::from_millis(250))
    );
}

#[test]
#[serial]
fn test_load_from_file() {
    let file = write_yaml(
        r#"
session:
  bus: system
  name: com.example.App
signals:
  queue_capacity: 16
  overflow: block
listen:
  path: /com/example/Sender
  sender: com.example.Sender
  interface: com.example.Sender
  member: StateChanged
"#,
    );

    let config = Config::load(file.path().to_str()).unwrap();
    assert_eq!(config.session.bus, BusKind::System);
    assert_eq!(config.session.requested_name(), Some("com.example.App"));
    assert_eq!(config.signals.queue_capacity, 16);
    assert_eq!(config.signals.overflow_policy(), OverflowPolicy::Block);
    assert_eq!(config.signals.enqueue_timeout_ms, DEFAULT_ENQUEUE_TIMEOUT_MS);

    let listen = config.listen.unwrap();
    assert_eq!(listen.sender, "com.example.Sender");
    assert_eq!(listen.member, "StateChanged");
}

#[test]
#[serial]
fn test_env_overrides_file() {
    let file = write_yaml("signals:\n  queue_capacity: 16\n");
    std::env::set_var("BUSLINE__SIGNALS__QUEUE_CAPACITY", "32");
    std::env::set_var("BUSLINE__SIGNALS__OVERFLOW", "wait");

    let config = Config::load(file.path().to_str());

    std::env::remove_var("BUSLINE__SIGNALS__QUEUE_CAPACITY");
    std::env::remove_var("BUSLINE__SIGNALS__OVERFLOW");

    let config = config.unwrap();
    assert_eq!(config.signals.queue_capacity, 32);
    assert_eq!(config.signals.overflow, OverflowMode::Wait);
}

#[test]
#[serial]
fn test_config_env_var_file() {
    let file = write_yaml("session:\n  bus: system\n");
    std::env::set_var(CONFIG_ENV_VAR, file.path());

    let config = Config::load(None);

    std::env::remove_var(CONFIG_ENV_VAR);
    assert_eq!(config.unwrap().session.bus, BusKind::System);
}

#[test]
#[serial]
fn test_missing_explicit_file_fails() {
    assert!(Config::load(Some("/nonexistent/busline.yaml")).is_err());
}

#[test]
#[serial]
fn test_invalid_overflow_mode_fails() {
    let file = write_yaml("signals:\n  overflow: sometimes\n");
    assert!(Config::load(file.path().to_str()).is_err());
}
