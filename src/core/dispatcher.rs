//! Job dispatcher: area queues, track ids and monotonic deadlines.
//!
//! Deadlines are [`Instant`]s so that wall-clock adjustments can neither
//! expire a job early nor keep it alive forever. The dispatcher only tracks
//! them; the engine decides what a missed deadline means.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};

use crate::core::error::{EngineError, EngineResult};
use crate::core::message::DispatchMessage;
use crate::util::serde::{AreaId, JobId, TaskId, TrackId};

/// Abstraction for area queue backends agents consume from.
pub trait AreaQueue: Send {
    /// Append a message if space permits.
    fn enqueue(&mut self, message: DispatchMessage) -> Result<(), EngineError>;
    /// Take the oldest message.
    fn dequeue(&mut self) -> Option<DispatchMessage>;
    /// Drop every queued message of `task`, returning how many were removed.
    fn purge_task(&mut self, task: TaskId) -> usize;
    /// Maximum depth allowed for this queue.
    fn max_depth(&self) -> usize;
    /// Current depth.
    fn len(&self) -> usize;
    /// Whether the queue is empty.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Queue handle shared between the dispatcher and the agents of one area.
pub type SharedQueue = Arc<Mutex<Box<dyn AreaQueue>>>;

/// A dispatched job waiting for its result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline {
    /// Job the deadline belongs to.
    pub job: JobId,
    /// Monotonic expiry.
    pub at: Instant,
}

/// Enqueues placed jobs and tracks their deadlines.
#[derive(Default)]
pub struct JobDispatcher {
    queues: RwLock<HashMap<AreaId, SharedQueue>>,
    deadlines: Mutex<HashMap<TrackId, Deadline>>,
}

impl JobDispatcher {
    /// Create a dispatcher without queues.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach the queue backing `area`, replacing any previous one.
    pub fn register_queue(&self, area: AreaId, queue: Box<dyn AreaQueue>) {
        self.queues.write().insert(area, Arc::new(Mutex::new(queue)));
    }

    /// Queue handle for agents bound to `area`.
    pub fn queue(&self, area: AreaId) -> Option<SharedQueue> {
        self.queues.read().get(&area).cloned()
    }

    /// Depth of `area`'s queue.
    pub fn queue_depth(&self, area: AreaId) -> usize {
        self.queue(area).map_or(0, |q| q.lock().len())
    }

    /// Issue a fresh track id.
    pub fn issue_track_id(&self) -> TrackId {
        TrackId::generate()
    }

    /// Enqueue `message` on `area` and arm its deadline `timeout` after `now`.
    ///
    /// The deadline is armed before the push so a result racing the enqueue
    /// always finds something to disarm; a refused push disarms it again.
    pub fn dispatch(
        &self,
        area: AreaId,
        job: JobId,
        message: DispatchMessage,
        timeout: Duration,
        now: Instant,
    ) -> EngineResult<()> {
        message.validate()?;
        let queue = self
            .queue(area)
            .ok_or_else(|| EngineError::NotFound(format!("queue for area {area}")))?;
        let track_id = message.track_id.clone();
        self.deadlines.lock().insert(
            track_id.clone(),
            Deadline {
                job,
                at: now + timeout,
            },
        );
        let pushed = queue.lock().enqueue(message);
        if let Err(err) = pushed {
            self.deadlines.lock().remove(&track_id);
            tracing::warn!(area, job, "dispatch refused: {err}");
            return Err(err);
        }
        tracing::debug!(area, job, track_id = %track_id, "job enqueued");
        Ok(())
    }

    /// Stop tracking a job. Returns false if it was not tracked.
    pub fn disarm(&self, track_id: &TrackId) -> bool {
        self.deadlines.lock().remove(track_id).is_some()
    }

    /// Whether a deadline is armed for `track_id`.
    pub fn is_armed(&self, track_id: &TrackId) -> bool {
        self.deadlines.lock().contains_key(track_id)
    }

    /// Put back a deadline taken by [`Self::take_overdue`] that could not be processed.
    pub fn rearm(&self, track_id: TrackId, deadline: Deadline) {
        self.deadlines.lock().insert(track_id, deadline);
    }

    /// Remove and return every deadline that expired at or before `now`.
    pub fn take_overdue(&self, now: Instant) -> Vec<(TrackId, Deadline)> {
        let mut deadlines = self.deadlines.lock();
        let expired: Vec<TrackId> = deadlines
            .iter()
            .filter(|(_, d)| d.at <= now)
            .map(|(track_id, _)| track_id.clone())
            .collect();
        let mut overdue: Vec<(TrackId, Deadline)> = expired
            .into_iter()
            .filter_map(|track_id| deadlines.remove(&track_id).map(|d| (track_id, d)))
            .collect();
        overdue.sort_by_key(|(_, d)| (d.at, d.job));
        overdue
    }

    /// Remove queued messages of `task` from every area queue.
    pub fn purge_task(&self, task: TaskId) -> usize {
        let queues: Vec<SharedQueue> = self.queues.read().values().cloned().collect();
        queues.iter().map(|q| q.lock().purge_task(task)).sum()
    }

    /// Jobs dispatched and not yet resolved.
    pub fn in_flight(&self) -> usize {
        self.deadlines.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::queue::InMemoryAreaQueue;

    fn message(track: &TrackId) -> DispatchMessage {
        DispatchMessage {
            track_id: track.clone(),
            task_id: 1,
            account_ref: 1,
            category_processor: "p".into(),
            configure: String::new(),
        }
    }

    #[test]
    fn test_dispatch_enqueues_and_arms() {
        let dispatcher = JobDispatcher::new();
        dispatcher.register_queue(1, Box::new(InMemoryAreaQueue::new(1, 4)));
        let track = dispatcher.issue_track_id();
        let now = Instant::now();
        dispatcher
            .dispatch(1, 10, message(&track), Duration::from_secs(5), now)
            .unwrap();
        assert_eq!(dispatcher.queue_depth(1), 1);
        assert_eq!(dispatcher.in_flight(), 1);
        assert!(dispatcher.take_overdue(now).is_empty());
        let overdue = dispatcher.take_overdue(now + Duration::from_secs(5));
        assert_eq!(overdue.len(), 1);
        assert_eq!(overdue[0].1.job, 10);
        assert_eq!(dispatcher.in_flight(), 0);
    }

    #[test]
    fn test_refused_push_disarms() {
        let dispatcher = JobDispatcher::new();
        dispatcher.register_queue(1, Box::new(InMemoryAreaQueue::new(1, 1)));
        let now = Instant::now();
        let first = dispatcher.issue_track_id();
        dispatcher
            .dispatch(1, 1, message(&first), Duration::from_secs(5), now)
            .unwrap();
        let second = dispatcher.issue_track_id();
        let err = dispatcher
            .dispatch(1, 2, message(&second), Duration::from_secs(5), now)
            .unwrap_err();
        assert_eq!(err, EngineError::QueueFull(1));
        assert_eq!(dispatcher.in_flight(), 1);
    }

    #[test]
    fn test_missing_queue_is_reported() {
        let dispatcher = JobDispatcher::new();
        let track = dispatcher.issue_track_id();
        let err = dispatcher
            .dispatch(9, 1, message(&track), Duration::from_secs(1), Instant::now())
            .unwrap_err();
        assert!(matches!(err, EngineError::NotFound(_)));
        assert_eq!(dispatcher.in_flight(), 0);
    }

    #[test]
    fn test_disarm_is_idempotent() {
        let dispatcher = JobDispatcher::new();
        dispatcher.register_queue(1, Box::new(InMemoryAreaQueue::new(1, 4)));
        let track = dispatcher.issue_track_id();
        dispatcher
            .dispatch(1, 1, message(&track), Duration::from_secs(1), Instant::now())
            .unwrap();
        assert!(dispatcher.disarm(&track));
        assert!(!dispatcher.disarm(&track));
    }
}
