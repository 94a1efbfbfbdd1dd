//! Audit trail of task and job lifecycle events.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::util::clock::now_ms;
use crate::util::serde::{AreaId, TaskId, TrackId};

/// Lifecycle action recorded by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    /// A schedule fired.
    Fire,
    /// A job was enqueued on an area.
    Dispatch,
    /// An agent picked a job up.
    Ack,
    /// A job succeeded.
    Succeed,
    /// A job failed.
    Fail,
    /// A job missed its deadline.
    Timeout,
    /// A task was cancelled.
    Cancel,
    /// A task was paused.
    Pause,
    /// A task was resumed.
    Resume,
    /// A task's schedule expired.
    Expire,
}

impl AuditAction {
    /// Stable lowercase name.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Fire => "fire",
            Self::Dispatch => "dispatch",
            Self::Ack => "ack",
            Self::Succeed => "succeed",
            Self::Fail => "fail",
            Self::Timeout => "timeout",
            Self::Cancel => "cancel",
            Self::Pause => "pause",
            Self::Resume => "resume",
            Self::Expire => "expire",
        }
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Audit event structure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Event identifier.
    pub event_id: String,
    /// Related task.
    pub task_id: TaskId,
    /// Related job, by track id.
    pub track_id: Option<TrackId>,
    /// Area involved, if any.
    pub area: Option<AreaId>,
    /// Action taken.
    pub action: AuditAction,
    /// Timestamp milliseconds.
    pub created_at_ms: u128,
    /// Additional context.
    pub payload: Option<String>,
}

/// Audit sink abstraction.
pub trait AuditSink: Send {
    /// Record an audit event.
    fn record(&mut self, event: AuditEvent);
}

/// Sink handle shared with the engine.
pub type SharedAuditSink = Arc<Mutex<dyn AuditSink>>;

/// In-memory audit sink for testing and dev.
pub struct InMemoryAuditSink {
    events: VecDeque<AuditEvent>,
    max_events: usize,
}

impl InMemoryAuditSink {
    /// Create a new in-memory sink with a bounded buffer.
    pub fn new(max_events: usize) -> Self {
        Self {
            events: VecDeque::with_capacity(max_events.min(1024)),
            max_events,
        }
    }

    /// Retrieve a snapshot of stored events.
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.iter().cloned().collect()
    }

    /// Events recorded for one task, oldest first.
    pub fn for_task(&self, task_id: TaskId) -> Vec<AuditEvent> {
        self.events
            .iter()
            .filter(|e| e.task_id == task_id)
            .cloned()
            .collect()
    }
}

impl AuditSink for InMemoryAuditSink {
    fn record(&mut self, event: AuditEvent) {
        if self.max_events == 0 {
            return;
        }
        if self.events.len() >= self.max_events {
            self.events.pop_front();
        }
        self.events.push_back(event);
    }
}

/// Helper to build an audit event from context.
pub fn build_audit_event(
    task_id: TaskId,
    track_id: Option<TrackId>,
    area: Option<AreaId>,
    action: AuditAction,
    payload: Option<String>,
) -> AuditEvent {
    AuditEvent {
        event_id: Uuid::new_v4().to_string(),
        task_id,
        track_id,
        area,
        action,
        created_at_ms: now_ms(),
        payload,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ring_buffer_drops_oldest() {
        let mut sink = InMemoryAuditSink::new(2);
        for task in 1..=3 {
            sink.record(build_audit_event(task, None, None, AuditAction::Fire, None));
        }
        let tasks: Vec<_> = sink.events().iter().map(|e| e.task_id).collect();
        assert_eq!(tasks, vec![2, 3]);
    }

    #[test]
    fn test_action_serializes_snake_case() {
        let json = serde_json::to_string(&AuditAction::Timeout).unwrap();
        assert_eq!(json, "\"timeout\"");
        assert_eq!(AuditAction::Dispatch.to_string(), "dispatch");
    }
}
