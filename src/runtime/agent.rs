//! In-process agent draining one area queue.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use crate::core::{
    Agent, Applied, AppResult, DispatchMessage, Engine, EngineError, EngineResult, Processor,
    SharedQueue, Spawn,
};
use crate::util::clock::now_ms;
use crate::util::serde::{AgentId, AreaId};

/// Agent that runs a [`Processor`] for every message of its area queue.
///
/// The agent acknowledges pickup, runs the processor and reports the result
/// back to the engine; it is the only writer of job outcomes.
pub struct LocalAgent<P: Processor> {
    id: AgentId,
    area: AreaId,
    engine: Arc<Engine>,
    queue: SharedQueue,
    processor: P,
    idle: Duration,
}

impl<P: Processor> LocalAgent<P> {
    /// Bind `agent` to its area queue on `engine`.
    pub fn new(engine: Arc<Engine>, agent: &Agent, processor: P) -> EngineResult<Self> {
        let queue = engine
            .queue(agent.area)
            .ok_or_else(|| EngineError::NotFound(format!("queue for area {}", agent.area)))?;
        Ok(Self {
            id: agent.id,
            area: agent.area,
            engine,
            queue,
            processor,
            idle: Duration::from_millis(100),
        })
    }

    /// Sleep between polls of an empty queue.
    #[must_use]
    pub const fn with_idle(mut self, idle: Duration) -> Self {
        self.idle = idle;
        self
    }

    /// Agent id.
    pub const fn id(&self) -> AgentId {
        self.id
    }

    /// Take one message and run it. Returns `None` when the queue is empty.
    pub async fn run_once(&self) -> AppResult<Option<Applied>> {
        let Some(message) = self.next_message() else {
            return Ok(None);
        };
        match self.engine.acknowledge(&message.track_id, now_ms()) {
            Ok(_) => {}
            Err(err @ EngineError::UnknownTrackId(_)) => {
                tracing::warn!(agent = self.id, "dropping message: {err}");
                return Ok(None);
            }
            Err(err) => tracing::warn!(agent = self.id, "ack failed: {err}"),
        }
        tracing::debug!(
            agent = self.id,
            area = self.area,
            track_id = %message.track_id,
            processor = %message.category_processor,
            "processing job"
        );
        let result = self
            .processor
            .process(message.clone())
            .await
            .into_result(&message);
        let applied = self.engine.deliver_result(result, now_ms())?;
        Ok(Some(applied))
    }

    /// Process messages until the queue is empty. Returns how many ran.
    pub async fn drain(&self) -> AppResult<usize> {
        let mut ran = 0;
        while !self.queue_is_empty() {
            if self.run_once().await?.is_some() {
                ran += 1;
            }
        }
        Ok(ran)
    }

    /// Poll the queue until `shutdown` is triggered.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(agent = self.id, area = self.area, "agent started");
        loop {
            if *shutdown.borrow() {
                break;
            }
            match self.run_once().await {
                Ok(Some(_)) => continue,
                Ok(None) => {}
                Err(err) => tracing::warn!(agent = self.id, "agent step failed: {err:#}"),
            }
            tokio::select! {
                () = tokio::time::sleep(self.idle) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
        tracing::info!(agent = self.id, "agent stopped");
    }

    /// Start [`LocalAgent::run`] on `spawner`.
    pub fn spawn<S: Spawn>(self, spawner: &S, shutdown: &super::Shutdown) {
        spawner.spawn(self.run(shutdown.subscribe()));
    }

    fn next_message(&self) -> Option<DispatchMessage> {
        self.queue.lock().dequeue()
    }

    fn queue_is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }
}
