//! Tests for error types

use taskfleet::core::EngineError;

#[test]
fn test_queue_full_error() {
    let err = EngineError::QueueFull(3);
    assert_eq!(format!("{}", err), "queue full for area 3");
}

#[test]
fn test_allocation_shortfall_error() {
    let err = EngineError::AllocationShortfall {
        requested: 3,
        allocated: 1,
    };
    assert_eq!(
        format!("{}", err),
        "allocation shortfall: requested 3, allocated 1"
    );
}

#[test]
fn test_unknown_track_id_error() {
    let err = EngineError::UnknownTrackId("abc".to_string());
    assert_eq!(format!("{}", err), "unknown track id: abc");
}

#[test]
fn test_only_persistence_is_fatal() {
    assert!(EngineError::Persistence("down".into()).is_fatal());
    for err in [
        EngineError::Configuration("x".into()),
        EngineError::NoEligibleArea,
        EngineError::DispatchTimeout,
        EngineError::UnknownTrackId("t".into()),
        EngineError::Halted,
    ] {
        assert!(!err.is_fatal(), "{err}");
    }
}

#[test]
fn test_engine_error_converts_to_anyhow() {
    let app: taskfleet::core::AppResult<()> = Err(EngineError::NoEligibleArea.into());
    assert_eq!(app.unwrap_err().to_string(), "no eligible area");
}
