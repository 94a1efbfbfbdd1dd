//! Error types for engine operations.

use thiserror::Error;

use crate::util::serde::{AreaId, TaskId};

/// Errors produced by engine components.
///
/// Everything except [`EngineError::Persistence`] is contained to the task or
/// job it concerns and recorded on that entity.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    /// Invalid scheduler or task parameters. Fatal to that task only.
    #[error("configuration error: {0}")]
    Configuration(String),
    /// Fewer eligible accounts than requested.
    #[error("allocation shortfall: requested {requested}, allocated {allocated}")]
    AllocationShortfall {
        /// Accounts the task asked for on this fire.
        requested: u32,
        /// Accounts actually bound to new jobs.
        allocated: u32,
    },
    /// No enabled area can serve the job.
    #[error("no eligible area")]
    NoEligibleArea,
    /// An area queue refused the dispatch message.
    #[error("queue full for area {0}")]
    QueueFull(AreaId),
    /// No agent result arrived before the job deadline.
    #[error("dispatch timeout")]
    DispatchTimeout,
    /// A result referenced a track id the engine never issued.
    #[error("unknown track id: {0}")]
    UnknownTrackId(String),
    /// A lifecycle transition not allowed by the transition table.
    #[error("invalid transition for task {task}: {from} -> {to}")]
    InvalidTransition {
        /// Task being transitioned.
        task: TaskId,
        /// Current status.
        from: String,
        /// Requested status.
        to: String,
    },
    /// Referenced entity does not exist.
    #[error("not found: {0}")]
    NotFound(String),
    /// A wire message violated the agent contract.
    #[error("invalid message: {0}")]
    InvalidMessage(String),
    /// The persistence collaborator is unavailable.
    #[error("persistence error: {0}")]
    Persistence(String),
    /// New dispatch is halted until the engine recovers.
    #[error("engine halted")]
    Halted,
}

impl EngineError {
    /// Whether this error must stop new dispatch engine-wide.
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::Persistence(_))
    }
}

/// Result alias for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Application-facing result using anyhow for higher-level contexts.
pub type AppResult<T> = Result<T, anyhow::Error>;
