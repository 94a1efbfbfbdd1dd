//! In-memory FIFO area queue.

use std::collections::VecDeque;

use crate::core::dispatcher::AreaQueue;
use crate::core::error::EngineError;
use crate::core::message::DispatchMessage;
use crate::util::serde::{AreaId, TaskId};

/// Bounded FIFO queue for one area.
pub struct InMemoryAreaQueue {
    area: AreaId,
    max_depth: usize,
    messages: VecDeque<DispatchMessage>,
}

impl InMemoryAreaQueue {
    /// Create a queue for `area` holding at most `max_depth` messages.
    pub fn new(area: AreaId, max_depth: usize) -> Self {
        Self {
            area,
            max_depth,
            messages: VecDeque::with_capacity(max_depth.min(1024)),
        }
    }
}

impl AreaQueue for InMemoryAreaQueue {
    fn enqueue(&mut self, message: DispatchMessage) -> Result<(), EngineError> {
        if self.len() >= self.max_depth() {
            return Err(EngineError::QueueFull(self.area));
        }
        self.messages.push_back(message);
        Ok(())
    }

    fn dequeue(&mut self) -> Option<DispatchMessage> {
        self.messages.pop_front()
    }

    fn purge_task(&mut self, task: TaskId) -> usize {
        let before = self.messages.len();
        self.messages.retain(|m| m.task_id != task);
        before - self.messages.len()
    }

    fn max_depth(&self) -> usize {
        self.max_depth
    }

    fn len(&self) -> usize {
        self.messages.len()
    }
}
