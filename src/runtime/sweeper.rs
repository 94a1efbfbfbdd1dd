//! Periodic sweep loop.
//!
//! Each tick reaps overdue jobs and then processes every open task on a
//! bounded set of tokio tasks. Tasks never share a worker at the same time
//! because the engine serializes work per task.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use tokio::time::{Instant, MissedTickBehavior};

use crate::core::{AppResult, Engine, EngineError, Spawn, SweepReport};
use crate::util::clock::now_ms;

/// Cooperative stop signal shared by the sweeper and local agents.
#[derive(Clone)]
pub struct Shutdown {
    tx: Arc<watch::Sender<bool>>,
}

impl Shutdown {
    /// Create an untriggered signal.
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Receiver for a loop to watch.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }

    /// Ask every loop to stop after its current step.
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

/// Drives [`Engine`] sweeps on a fixed period.
pub struct Sweeper {
    engine: Arc<Engine>,
    workers: usize,
    period: Duration,
}

impl Sweeper {
    /// Create a sweeper using the engine's `poll_interval_ms` and `sweep_workers`.
    pub fn new(engine: Arc<Engine>) -> Self {
        let workers = engine.config().sweep_workers.max(1);
        let period = engine.config().poll_interval();
        Self {
            engine,
            workers,
            period,
        }
    }

    /// Run one sweep. A halted engine first tries to recover.
    pub async fn sweep_once(&self) -> AppResult<SweepReport> {
        let engine = &self.engine;
        if engine.is_halted() {
            let recovery = engine.recover(now_ms())?;
            tracing::info!(
                replayed = recovery.replayed,
                orphaned = recovery.orphaned,
                cancelled = recovery.cancelled,
                recounted = recovery.recounted,
                "engine recovered"
            );
        }
        let now = Instant::now().into_std();
        let wall_ms = now_ms();
        let mut report = SweepReport {
            timed_out: engine.reap_timeouts(now, wall_ms)?,
            ..SweepReport::default()
        };

        let semaphore = Arc::new(Semaphore::new(self.workers));
        let mut set = JoinSet::new();
        for id in engine.open_tasks()? {
            let permit = Arc::clone(&semaphore).acquire_owned().await?;
            let engine = Arc::clone(engine);
            set.spawn(async move {
                let _permit = permit;
                (id, engine.process_task(id, wall_ms, now))
            });
        }

        let mut fatal: Option<EngineError> = None;
        while let Some(joined) = set.join_next().await {
            let (id, outcome) = joined?;
            match outcome {
                Ok(tick) => report.record(&tick),
                Err(err) if err.is_fatal() || err == EngineError::Halted => {
                    fatal.get_or_insert(err);
                }
                Err(err) => {
                    tracing::warn!(task = id, "task processing failed: {err}");
                    report.errors.push((id, err));
                }
            }
        }
        if let Some(err) = fatal {
            return Err(err.into());
        }
        tracing::debug!(
            processed = report.processed,
            fired = report.fired,
            dispatched = report.dispatched,
            timed_out = report.timed_out,
            "sweep complete"
        );
        Ok(report)
    }

    /// Sweep every period until `shutdown` is triggered.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(
            period_ms = self.period.as_millis(),
            workers = self.workers,
            "sweeper started"
        );
        let mut interval = tokio::time::interval(self.period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(err) = self.sweep_once().await {
                        tracing::warn!("sweep failed: {err:#}");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        tracing::info!("sweeper stopped");
    }

    /// Start [`Sweeper::run`] on `spawner`.
    pub fn spawn<S: Spawn>(self, spawner: &S, shutdown: &Shutdown) {
        spawner.spawn(self.run(shutdown.subscribe()));
    }
}
