//! Tests for the agent-facing codec

use taskfleet::core::{DispatchMessage, EngineError, ResultMessage, ResultStatus, MAX_TEXT_BYTES};
use taskfleet::runtime::{decode_dispatch, decode_result, encode_dispatch, encode_result};

fn dispatch() -> DispatchMessage {
    DispatchMessage {
        track_id: "0f3a".into(),
        task_id: 12,
        account_ref: 5,
        category_processor: "fb_like".into(),
        configure: r#"{"post":"x"}"#.into(),
    }
}

#[test]
fn test_dispatch_codec() {
    let json = encode_dispatch(&dispatch()).unwrap();
    assert_eq!(decode_dispatch(&json).unwrap(), dispatch());
}

#[test]
fn test_oversized_configure_is_rejected() {
    let mut message = dispatch();
    message.configure = "x".repeat(MAX_TEXT_BYTES + 1);
    assert!(matches!(
        encode_dispatch(&message),
        Err(EngineError::InvalidMessage(_))
    ));
}

#[test]
fn test_decode_agent_result() {
    let result = decode_result(r#"{"track_id":"0f3a","status":"succeed","result":"liked"}"#)
        .unwrap();
    assert_eq!(result.status, ResultStatus::Succeed);
    assert_eq!(result.result, "liked");
    assert_eq!(result.traceback, None);
}

#[test]
fn test_decode_rejects_bad_results() {
    assert!(decode_result(r#"{"track_id":"","status":"succeed","result":""}"#).is_err());
    assert!(decode_result(r#"{"track_id":"a","status":"ok","result":""}"#).is_err());
    assert!(decode_result("{").is_err());
}

#[test]
fn test_encode_failed_result_keeps_traceback() {
    let json = encode_result(&ResultMessage::failed("t".into(), "", "stack")).unwrap();
    assert!(json.contains(r#""status":"failed""#));
    assert!(json.contains(r#""traceback":"stack""#));
}
