//! Agent-facing JSON codec and read-only status models.

use serde::{Deserialize, Serialize};

use crate::core::{
    DispatchMessage, Engine, EngineError, EngineResult, ResultMessage, TaskStatus,
};
use crate::util::serde::TaskId;

/// Serialize a dispatch message for an agent transport.
pub fn encode_dispatch(message: &DispatchMessage) -> EngineResult<String> {
    message.validate()?;
    serde_json::to_string(message).map_err(|e| EngineError::InvalidMessage(e.to_string()))
}

/// Parse and validate a dispatch message.
pub fn decode_dispatch(input: &str) -> EngineResult<DispatchMessage> {
    let message: DispatchMessage =
        serde_json::from_str(input).map_err(|e| EngineError::InvalidMessage(e.to_string()))?;
    message.validate()?;
    Ok(message)
}

/// Serialize a result message.
pub fn encode_result(message: &ResultMessage) -> EngineResult<String> {
    message.validate()?;
    serde_json::to_string(message).map_err(|e| EngineError::InvalidMessage(e.to_string()))
}

/// Parse and validate a result message reported by an agent.
pub fn decode_result(input: &str) -> EngineResult<ResultMessage> {
    let message: ResultMessage =
        serde_json::from_str(input).map_err(|e| EngineError::InvalidMessage(e.to_string()))?;
    message.validate()?;
    Ok(message)
}

/// Task status response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskStatusResponse {
    /// Task identifier.
    pub task_id: TaskId,
    /// Current status.
    pub status: TaskStatus,
    /// Successful jobs so far.
    pub succeed_counts: u32,
    /// Failed jobs so far.
    pub failed_counts: u32,
    /// Accounts bound on the latest fire.
    pub real_accounts_num: u32,
    /// Summary line.
    pub result: String,
}

/// Health response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Health {
    /// Healthy flag: the engine is dispatching.
    pub ok: bool,
    /// Results waiting for recovery.
    pub deferred_results: usize,
}

/// Status of one task.
pub fn task_status(engine: &Engine, task_id: TaskId) -> EngineResult<TaskStatusResponse> {
    let task = engine.task(task_id)?;
    Ok(TaskStatusResponse {
        task_id,
        status: task.status,
        succeed_counts: task.succeed_counts,
        failed_counts: task.failed_counts,
        real_accounts_num: task.real_accounts_num,
        result: task.result,
    })
}

/// Return a health payload.
pub fn health(engine: &Engine) -> Health {
    Health {
        ok: !engine.is_halted(),
        deferred_results: engine.deferred_results(),
    }
}
