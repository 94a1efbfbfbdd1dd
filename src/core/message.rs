//! Agent wire contract: dispatch and result messages.
//!
//! Field names and the `"succeed"`/`"failed"` status strings are part of the
//! contract with agents and must not change.

use serde::{Deserialize, Serialize};

use crate::core::error::{EngineError, EngineResult};
use crate::core::model::MAX_TEXT_BYTES;
use crate::util::serde::{AccountId, TaskId, TrackId};

/// Engine to area queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchMessage {
    /// Correlation token for the result.
    pub track_id: TrackId,
    /// Owning task.
    pub task_id: TaskId,
    /// Account the agent must act as.
    pub account_ref: AccountId,
    /// Processor the agent must invoke.
    pub category_processor: String,
    /// Engine-opaque task payload.
    pub configure: String,
}

impl DispatchMessage {
    /// Check the size limits of the contract.
    pub fn validate(&self) -> EngineResult<()> {
        check_len("configure", &self.configure)
    }
}

/// Outcome reported by an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultStatus {
    /// The processor succeeded.
    Succeed,
    /// The processor failed.
    Failed,
}

/// Agent to engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultMessage {
    /// Token from the dispatch message.
    pub track_id: TrackId,
    /// Outcome.
    pub status: ResultStatus,
    /// Processor return value.
    #[serde(default)]
    pub result: String,
    /// Failure detail.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub traceback: Option<String>,
}

impl ResultMessage {
    /// A success report.
    pub fn succeed(track_id: TrackId, result: impl Into<String>) -> Self {
        Self {
            track_id,
            status: ResultStatus::Succeed,
            result: result.into(),
            traceback: None,
        }
    }

    /// A failure report.
    pub fn failed(track_id: TrackId, result: impl Into<String>, traceback: impl Into<String>) -> Self {
        Self {
            track_id,
            status: ResultStatus::Failed,
            result: result.into(),
            traceback: Some(traceback.into()),
        }
    }

    /// Check the contract: non-empty track id and size limits.
    pub fn validate(&self) -> EngineResult<()> {
        if self.track_id.as_str().is_empty() {
            return Err(EngineError::InvalidMessage("empty track_id".into()));
        }
        check_len("result", &self.result)?;
        if let Some(traceback) = &self.traceback {
            check_len("traceback", traceback)?;
        }
        Ok(())
    }
}

fn check_len(field: &str, value: &str) -> EngineResult<()> {
    if value.len() > MAX_TEXT_BYTES {
        return Err(EngineError::InvalidMessage(format!(
            "{field} is {} bytes, limit is {MAX_TEXT_BYTES}",
            value.len()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_result_wire_format() {
        let msg: ResultMessage = serde_json::from_str(
            r#"{"track_id":"ab12","status":"failed","result":"","traceback":"boom"}"#,
        )
        .unwrap();
        assert_eq!(msg.track_id.as_str(), "ab12");
        assert_eq!(msg.status, ResultStatus::Failed);
        assert_eq!(msg.traceback.as_deref(), Some("boom"));
    }

    #[test]
    fn test_traceback_is_optional() {
        let msg: ResultMessage =
            serde_json::from_str(r#"{"track_id":"x","status":"succeed","result":"ok"}"#).unwrap();
        assert!(msg.traceback.is_none());
        assert!(!serde_json::to_string(&msg).unwrap().contains("traceback"));
    }

    #[test]
    fn test_unknown_status_is_rejected() {
        let parsed = serde_json::from_str::<ResultMessage>(
            r#"{"track_id":"x","status":"done","result":""}"#,
        );
        assert!(parsed.is_err());
    }

    #[test]
    fn test_oversized_fields_fail_validation() {
        let msg = ResultMessage::succeed("x".into(), "r".repeat(MAX_TEXT_BYTES + 1));
        assert!(matches!(msg.validate(), Err(EngineError::InvalidMessage(_))));
        let msg = ResultMessage::succeed("".into(), "ok");
        assert!(msg.validate().is_err());
    }

    #[test]
    fn test_dispatch_wire_format() {
        let msg = DispatchMessage {
            track_id: "t1".into(),
            task_id: 4,
            account_ref: 9,
            category_processor: "fb_like".into(),
            configure: "{}".into(),
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["track_id"], "t1");
        assert_eq!(json["task_id"], 4);
        assert_eq!(json["account_ref"], 9);
        assert_eq!(json["category_processor"], "fb_like");
    }
}
