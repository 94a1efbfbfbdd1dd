//! Tests for utility functions

use taskfleet::util::{now_ms, secs_to_ms, TrackId, MS_PER_SEC};

#[test]
fn test_secs_to_ms() {
    assert_eq!(secs_to_ms(0), 0);
    assert_eq!(secs_to_ms(600), 600 * MS_PER_SEC);
}

#[test]
fn test_now_ms_is_recent() {
    // 2020-01-01T00:00:00Z
    assert!(now_ms() > 1_577_836_800_000);
}

#[test]
fn test_track_ids_are_unique_hex() {
    let a = TrackId::generate();
    let b = TrackId::generate();
    assert_ne!(a, b);
    assert_eq!(a.as_str().len(), 32);
    assert!(a.as_str().chars().all(|c| c.is_ascii_hexdigit()));
}

#[test]
fn test_track_id_serializes_as_string() {
    let id = TrackId::from("abc");
    assert_eq!(serde_json::to_string(&id).unwrap(), "\"abc\"");
}

#[test]
fn test_init_tracing_is_idempotent() {
    taskfleet::util::init_tracing();
    taskfleet::util::init_tracing();
    tracing::info!("tracing initialized");
}
