//! Configuration loading tests

use std::io::Write;
use std::time::Duration;

use campus_breaker::Error;
use campus_breaker::config::{CircuitBreakerConfig, Config};
use pretty_assertions::assert_eq;

fn write_config(yaml: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::Builder::new()
        .suffix(".yaml")
        .tempfile()
        .unwrap();
    file.write_all(yaml.as_bytes()).unwrap();
    file
}

#[test]
fn test_load_without_file_uses_defaults() {
    let config = Config::load(None).unwrap();
    assert_eq!(config.breakers.defaults, CircuitBreakerConfig::default());
    assert!(config.breakers.overrides.is_empty());
}

#[test]
fn test_load_missing_file() {
    let err = Config::load(Some(std::path::Path::new("/nonexistent/breakers.yaml"))).unwrap_err();
    assert!(matches!(err, Error::Config(msg) if msg.contains("Config file not found")));
}

#[test]
fn test_load_yaml_with_overrides() {
    let file = write_config(
        r"
breakers:
  defaults:
    requests: 50
    error_rate: 0.25
    timeout: 30s
  overrides:
    user-rpc:
      requests: 10
      window: 5s
      buckets: 20
",
    );

    let config = Config::load(Some(file.path())).unwrap();

    let defaults = &config.breakers.defaults;
    assert_eq!(defaults.requests, 50);
    assert!((defaults.error_rate - 0.25).abs() < f64::EPSILON);
    assert_eq!(defaults.timeout, Duration::from_secs(30));
    assert_eq!(defaults.window, Duration::from_secs(10));
    assert_eq!(defaults.buckets, 40);

    let user = config.breakers.for_name("user-rpc");
    assert_eq!(user.requests, 10);
    assert_eq!(user.window, Duration::from_secs(5));
    assert_eq!(user.buckets, 20);
    // Overrides replace the defaults wholesale
    assert!((user.error_rate - 0.5).abs() < f64::EPSILON);

    assert_eq!(config.breakers.for_name("chat-rpc"), defaults);
}

#[test]
fn test_load_rejects_invalid_error_rate() {
    let file = write_config(
        r"
breakers:
  defaults:
    error_rate: 1.5
",
    );

    let err = Config::load(Some(file.path())).unwrap_err();
    assert!(err.to_string().contains("error_rate"));
}

#[test]
fn test_load_rejects_malformed_duration() {
    let file = write_config(
        r"
breakers:
  defaults:
    timeout: forever
",
    );

    assert!(matches!(
        Config::load(Some(file.path())),
        Err(Error::Config(_))
    ));
}

#[test]
fn test_config_round_trips_through_yaml() {
    let file = write_config(
        r"
breakers:
  overrides:
    chat-rpc:
      enabled: false
",
    );
    let config = Config::load(Some(file.path())).unwrap();

    let yaml = serde_yaml::to_string(&config).unwrap();
    assert!(yaml.contains("chat-rpc"));
    assert!(yaml.contains("timeout: 1m"));

    let reparsed: Config = serde_yaml::from_str(&yaml).unwrap();
    assert_eq!(reparsed, config);
}

#[test]
fn test_load_rejects_timeout_past_clock_range() {
    let file = write_config(
        r"
breakers:
  defaults:
    requests: 1
    timeout: 500000000000years
",
    );

    let err = Config::load(Some(file.path())).unwrap_err();
    assert!(err.to_string().contains("timeout"));
}
