//! Tests for configuration validation

use taskfleet::config::EngineConfig;

#[test]
fn test_engine_config_validation() {
    let valid = EngineConfig::default();
    assert!(valid.validate().is_ok());
}

#[test]
fn test_engine_config_invalid_cap() {
    let invalid = EngineConfig {
        account_concurrency_cap: 0,
        ..EngineConfig::default()
    };
    assert!(invalid.validate().is_err());
}

#[test]
fn test_engine_config_invalid_poll_interval() {
    let invalid = EngineConfig {
        poll_interval_ms: 0,
        ..EngineConfig::default()
    };
    let err = invalid.validate().unwrap_err();
    assert!(err.contains("poll_interval_ms"));
}

#[test]
fn test_engine_config_from_json() {
    let json = r#"{
        "poll_interval_ms": 500,
        "account_concurrency_cap": 2,
        "default_job_timeout_secs": 120
    }"#;
    let cfg = EngineConfig::from_json_str(json).unwrap();
    assert_eq!(cfg.poll_interval_ms, 500);
    assert_eq!(cfg.account_concurrency_cap, 2);
    assert_eq!(cfg.default_job_timeout_secs, 120);
    assert_eq!(cfg.max_allocation_failures, 3);
    assert_eq!(cfg.area_queue_max_depth, 1024);
}

#[test]
fn test_engine_config_from_json_rejects_invalid() {
    assert!(EngineConfig::from_json_str(r#"{"sweep_workers": 0}"#).is_err());
    assert!(EngineConfig::from_json_str("not json").is_err());
}

#[test]
fn test_engine_config_roundtrip_defaults() {
    let cfg = EngineConfig::default();
    let json = serde_json::to_string(&cfg).unwrap();
    assert_eq!(EngineConfig::from_json_str(&json).unwrap(), cfg);
}

#[test]
fn test_engine_config_from_env() {
    std::env::set_var("TASKFLEET_AUDIT_BUFFER", "16");
    let cfg = EngineConfig::from_env().unwrap();
    std::env::remove_var("TASKFLEET_AUDIT_BUFFER");
    assert_eq!(cfg.audit_buffer, 16);
}
