//! Task lifecycle controller.
//!
//! [`Engine`] drives every task through `new -> pending -> running ->
//! {succeed, failed, cancelled}` with `pausing` as a resumable side state. It
//! owns the shared counters, the dispatcher and the aggregator, and serializes
//! all work on one task behind a per-task lock. Work on different tasks runs
//! concurrently; there is no global lock.
//!
//! Wall-clock time (`now_ms`) drives schedules and timestamps. Job deadlines
//! use a monotonic [`Instant`] supplied by the caller.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, MutexGuard, RwLock};
use serde::{Deserialize, Serialize};

use crate::config::EngineConfig;
use crate::core::account_pool::AccountPool;
use crate::core::aggregator::{Applied, ResultAggregator, Settlement};
use crate::core::area_index::{AreaLoad, AreaLoadIndex};
use crate::core::audit::{build_audit_event, AuditAction, SharedAuditSink};
use crate::core::balancer::AreaBalancer;
use crate::core::counter::saturating_u32;
use crate::core::decomposer::decompose;
use crate::core::dispatcher::{AreaQueue, JobDispatcher, SharedQueue};
use crate::core::error::{EngineError, EngineResult};
use crate::core::message::{DispatchMessage, ResultMessage, ResultStatus};
use crate::core::model::{
    Account, Agent, Area, FailureReason, Job, JobStatus, NewTask, Task, TaskCategory, TaskStatus,
    User, MAX_TEXT_BYTES,
};
use crate::core::schedule::Scheduler;
use crate::core::store::Store;
use crate::util::serde::{AccountId, AgentId, AreaId, TaskCategoryId, TaskId, TrackId, UserId};

/// What one pass over a task did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskTick {
    /// Task processed.
    pub task: TaskId,
    /// The schedule fired.
    pub fired: bool,
    /// Jobs enqueued by this pass.
    pub dispatched: u32,
    /// Status after the pass.
    pub status: TaskStatus,
}

/// Summary of one sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Tasks examined.
    pub processed: usize,
    /// Tasks whose schedule fired.
    pub fired: usize,
    /// Jobs enqueued.
    pub dispatched: u32,
    /// Jobs failed for missing their deadline.
    pub timed_out: usize,
    /// Errors contained to individual tasks.
    pub errors: Vec<(TaskId, EngineError)>,
}

/// A counter that disagrees with the live job set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterDrift {
    /// Area or account id.
    pub id: u64,
    /// Value held by the counter.
    pub recorded: u32,
    /// Value derived from active jobs.
    pub live: u32,
}

/// Task counters that disagree with the job table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskDrift {
    /// Task id.
    pub task: TaskId,
    /// `(succeed, failed)` on the task row.
    pub recorded: (u32, u32),
    /// `(succeed, failed)` counted from its jobs.
    pub live: (u32, u32),
}

/// Result of [`Engine::recover`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Recovery {
    /// Buffered results applied.
    pub replayed: usize,
    /// Abandoned jobs failed as `aborted`.
    pub orphaned: usize,
    /// Jobs of an interrupted cancel failed as `cancelled`.
    pub cancelled: usize,
    /// Tasks whose outcome totals were recounted from their jobs.
    pub recounted: usize,
}

/// Result of [`Engine::reconcile`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileReport {
    /// Areas whose `running_tasks` drifted.
    pub areas: Vec<CounterDrift>,
    /// Accounts whose `using` drifted.
    pub accounts: Vec<CounterDrift>,
    /// Tasks whose outcome counters drifted.
    pub tasks: Vec<TaskDrift>,
}

impl ReconcileReport {
    /// Whether every counter matched.
    pub fn is_clean(&self) -> bool {
        self.areas.is_empty() && self.accounts.is_empty() && self.tasks.is_empty()
    }
}

/// Point-in-time engine statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineStats {
    /// Task count per status.
    pub tasks_by_status: BTreeMap<TaskStatus, usize>,
    /// Pending or running jobs.
    pub active_jobs: usize,
    /// Jobs with an armed deadline.
    pub in_flight: usize,
    /// Accounts with at least one running job.
    pub accounts_in_use: usize,
    /// Per-area load.
    pub areas: Vec<AreaLoad>,
    /// Results buffered during an outage.
    pub deferred_results: usize,
    /// Whether new dispatch is halted.
    pub halted: bool,
}

type TaskLocks = Mutex<HashMap<TaskId, Arc<Mutex<()>>>>;

/// Handle on one task's lock. The map entry goes away with the last handle.
struct TaskLock<'a> {
    locks: &'a TaskLocks,
    id: TaskId,
    lock: Arc<Mutex<()>>,
}

impl TaskLock<'_> {
    fn lock(&self) -> MutexGuard<'_, ()> {
        self.lock.lock()
    }
}

impl Drop for TaskLock<'_> {
    fn drop(&mut self) {
        let mut locks = self.locks.lock();
        // Held by the map and by this handle only.
        if locks
            .get(&self.id)
            .is_some_and(|held| Arc::strong_count(held) == 2)
        {
            locks.remove(&self.id);
        }
    }
}

/// Task decomposition and dispatch engine.
pub struct Engine {
    config: EngineConfig,
    store: Arc<dyn Store>,
    accounts: Arc<AccountPool>,
    areas: Arc<AreaLoadIndex>,
    balancer: AreaBalancer,
    dispatcher: Arc<JobDispatcher>,
    aggregator: ResultAggregator,
    categories: RwLock<HashMap<TaskCategoryId, TaskCategory>>,
    users: RwLock<HashMap<UserId, User>>,
    agents: RwLock<BTreeMap<AgentId, Agent>>,
    task_locks: TaskLocks,
    halted: AtomicBool,
    deferred: Mutex<VecDeque<ResultMessage>>,
    audit: Option<SharedAuditSink>,
}

impl Engine {
    /// Create an engine over `store`. `config` must already be valid.
    pub fn new(config: EngineConfig, store: Arc<dyn Store>) -> Self {
        let accounts = Arc::new(AccountPool::new(config.account_concurrency_cap));
        let areas = Arc::new(AreaLoadIndex::new());
        let dispatcher = Arc::new(JobDispatcher::new());
        let aggregator = ResultAggregator::new(
            Arc::clone(&store),
            Arc::clone(&accounts),
            Arc::clone(&areas),
            Arc::clone(&dispatcher),
        );
        Self {
            config,
            store,
            balancer: AreaBalancer::new(Arc::clone(&areas)),
            accounts,
            areas,
            dispatcher,
            aggregator,
            categories: RwLock::new(HashMap::new()),
            users: RwLock::new(HashMap::new()),
            agents: RwLock::new(BTreeMap::new()),
            task_locks: Mutex::new(HashMap::new()),
            halted: AtomicBool::new(false),
            deferred: Mutex::new(VecDeque::new()),
            audit: None,
        }
    }

    /// Attach an audit sink.
    pub fn set_audit_sink(&mut self, sink: SharedAuditSink) {
        self.audit = Some(sink);
    }

    // -- registries -------------------------------------------------------

    /// Add or replace a task category.
    pub fn register_category(&self, category: TaskCategory) {
        self.categories.write().insert(category.id, category);
    }

    /// Add or replace a user.
    pub fn register_user(&self, user: User) {
        self.users.write().insert(user.id, user);
    }

    /// Add or replace an account.
    pub fn register_account(&self, account: Account) {
        self.accounts.register(account);
    }

    /// Add or replace an area together with the queue its agents consume.
    pub fn register_area(&self, area: Area, queue: Box<dyn AreaQueue>) {
        let id = area.id;
        self.areas.register(area);
        self.dispatcher.register_queue(id, queue);
    }

    /// Register an agent bound to a known area.
    pub fn register_agent(&self, agent: Agent) -> EngineResult<()> {
        if self.areas.get(agent.area).is_none() {
            return Err(EngineError::NotFound(format!("area {}", agent.area)));
        }
        self.agents.write().insert(agent.id, agent);
        Ok(())
    }

    /// Registered agents bound to `area`.
    pub fn agents_in(&self, area: AreaId) -> Vec<Agent> {
        self.agents
            .read()
            .values()
            .filter(|a| a.area == area)
            .cloned()
            .collect()
    }

    /// Task category by id.
    pub fn category(&self, id: TaskCategoryId) -> Option<TaskCategory> {
        self.categories.read().get(&id).cloned()
    }

    // -- accessors --------------------------------------------------------

    /// Active configuration.
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Account pool.
    pub fn accounts(&self) -> &Arc<AccountPool> {
        &self.accounts
    }

    /// Area load index.
    pub fn areas(&self) -> &Arc<AreaLoadIndex> {
        &self.areas
    }

    /// Job dispatcher.
    pub fn dispatcher(&self) -> &Arc<JobDispatcher> {
        &self.dispatcher
    }

    /// Queue agents of `area` consume.
    pub fn queue(&self, area: AreaId) -> Option<SharedQueue> {
        self.dispatcher.queue(area)
    }

    /// Load a task.
    pub fn task(&self, id: TaskId) -> EngineResult<Task> {
        self.store
            .get_task(id)?
            .ok_or_else(|| EngineError::NotFound(format!("task {id}")))
    }

    /// Every job of a task, ascending by id.
    pub fn jobs(&self, task: TaskId) -> EngineResult<Vec<Job>> {
        self.store.task_jobs(task)
    }

    /// Look a job up by its track id.
    pub fn job_by_track(&self, track_id: &TrackId) -> EngineResult<Option<Job>> {
        self.store.job_by_track(track_id)
    }

    /// Non-terminal task ids, ascending.
    pub fn open_tasks(&self) -> EngineResult<Vec<TaskId>> {
        self.store.open_tasks()
    }

    /// Whether new dispatch is halted after a persistence failure.
    pub fn is_halted(&self) -> bool {
        self.halted.load(Ordering::Acquire)
    }

    /// Results waiting for [`Engine::recover`].
    pub fn deferred_results(&self) -> usize {
        self.deferred.lock().len()
    }

    // -- user operations --------------------------------------------------

    /// Validate and persist a new task in status `new`.
    pub fn create_task(&self, params: NewTask, now_ms: u128) -> EngineResult<TaskId> {
        let category = self.category(params.category).ok_or_else(|| {
            EngineError::Configuration(format!("unknown task category {}", params.category))
        })?;
        if let Some(user) = self.users.read().get(&params.creator) {
            if !user.may_create(category.id) {
                return Err(EngineError::Configuration(format!(
                    "user {} may not create tasks of category {}",
                    user.id, category.id
                )));
            }
        }
        if params.accounts_num == 0 {
            return Err(EngineError::Configuration("accounts_num must be at least 1".into()));
        }
        if params.limit_counts == 0 {
            return Err(EngineError::Configuration("limit_counts must be at least 1".into()));
        }
        if params.configure.len() > MAX_TEXT_BYTES {
            return Err(EngineError::Configuration(format!(
                "configure exceeds {MAX_TEXT_BYTES} bytes"
            )));
        }
        if let Some(missing) = params
            .account_ids
            .iter()
            .find(|id| self.accounts.get(**id).is_none())
        {
            return Err(EngineError::Configuration(format!("unknown account {missing}")));
        }
        let scheduler = Scheduler::from_record(params.scheduler.clone())?;
        let mut task = Task::new(params, scheduler);
        task.last_update = Some(now_ms);
        let id = self.store.create_task(task)?;
        tracing::info!(task = id, category = category.id, "task created");
        Ok(id)
    }

    /// Enable a `new` task: it becomes `pending` and its schedule starts.
    pub fn activate(&self, id: TaskId, now_ms: u128) -> EngineResult<()> {
        let lock = self.task_lock(id);
        let _guard = lock.lock();
        let mut task = self.task(id)?;
        task.transition(TaskStatus::Pending, now_ms)?;
        task.fire.activated_at_ms.get_or_insert(now_ms);
        self.store.update_task(&task)
    }

    /// Create and activate in one step.
    pub fn submit(&self, params: NewTask, now_ms: u128) -> EngineResult<TaskId> {
        let id = self.create_task(params, now_ms)?;
        self.activate(id, now_ms)?;
        Ok(id)
    }

    /// Stop firing a task; in-flight jobs still complete.
    pub fn pause(&self, id: TaskId, now_ms: u128) -> EngineResult<()> {
        let lock = self.task_lock(id);
        let _guard = lock.lock();
        let mut task = self.task(id)?;
        if task.status == TaskStatus::New {
            return Err(EngineError::InvalidTransition {
                task: id,
                from: task.status.to_string(),
                to: TaskStatus::Pausing.to_string(),
            });
        }
        task.transition(TaskStatus::Pausing, now_ms)?;
        self.store.update_task(&task)?;
        self.audit(id, None, None, AuditAction::Pause, None);
        Ok(())
    }

    /// Resume a paused task.
    pub fn resume(&self, id: TaskId, now_ms: u128) -> EngineResult<()> {
        let lock = self.task_lock(id);
        let _guard = lock.lock();
        let mut task = self.task(id)?;
        if task.status != TaskStatus::Pausing {
            return Err(EngineError::InvalidTransition {
                task: id,
                from: task.status.to_string(),
                to: TaskStatus::Running.to_string(),
            });
        }
        task.transition(TaskStatus::Running, now_ms)?;
        self.store.update_task(&task)?;
        self.audit(id, None, None, AuditAction::Resume, None);
        Ok(())
    }

    /// Cancel a task.
    ///
    /// Every active job is failed with reason `cancelled` and its account and
    /// area slot are released right away; agents are not consulted. Messages
    /// still queued for the task are dropped. Returns the number of jobs
    /// cancelled.
    ///
    /// The `cancelled` status is persisted before any job is touched. If the
    /// store fails part way, the engine halts and [`Engine::recover`] fails
    /// the jobs that are still active.
    pub fn cancel(&self, id: TaskId, now_ms: u128) -> EngineResult<usize> {
        self.cancel_task(id, now_ms).map_err(|err| self.fatal(err))
    }

    fn cancel_task(&self, id: TaskId, now_ms: u128) -> EngineResult<usize> {
        let lock = self.task_lock(id);
        let _guard = lock.lock();
        let mut task = self.task(id)?;
        if !task.status.can_transition_to(TaskStatus::Cancelled) {
            return Err(EngineError::InvalidTransition {
                task: id,
                from: task.status.to_string(),
                to: TaskStatus::Cancelled.to_string(),
            });
        }
        task.transition(TaskStatus::Cancelled, now_ms)?;
        task.note("cancelled");
        self.store.update_task(&task)?;

        let purged = self.dispatcher.purge_task(id);
        let mut cancelled = 0;
        for job in self.store.active_jobs(id)? {
            if self.settle_cancelled(&mut task, job, now_ms)? {
                cancelled += 1;
            }
        }
        self.store.update_task(&task)?;
        tracing::info!(task = id, jobs = cancelled, purged, "task cancelled");
        self.audit(id, None, None, AuditAction::Cancel, None);
        Ok(cancelled)
    }

    // -- scheduling -------------------------------------------------------

    /// Evaluate one task: fire it if due, dispatch its jobs and settle its status.
    ///
    /// A persistence error halts the engine before it is returned.
    pub fn process_task(&self, id: TaskId, now_ms: u128, now: Instant) -> EngineResult<TaskTick> {
        if self.is_halted() {
            return Err(EngineError::Halted);
        }
        self.tick_task(id, now_ms, now).map_err(|err| self.fatal(err))
    }

    fn tick_task(&self, id: TaskId, now_ms: u128, now: Instant) -> EngineResult<TaskTick> {
        let lock = self.task_lock(id);
        let _guard = lock.lock();
        let mut task = self.task(id)?;
        let mut tick = TaskTick {
            task: id,
            fired: false,
            dispatched: 0,
            status: task.status,
        };
        if !task.status.is_schedulable() {
            if task.status == TaskStatus::Pausing {
                let active = self.store.active_jobs(id)?.len();
                if self.reevaluate(&mut task, active, now_ms)? {
                    self.store.update_task(&task)?;
                }
                tick.status = task.status;
            }
            return Ok(tick);
        }

        let eval = task.scheduler.evaluate(&task.fire, now_ms);
        let mut active = self.store.active_jobs(id)?;
        if eval.should_fire_now && !task.limit_reached() {
            match self.category(task.category) {
                Some(category) => {
                    let dispatched = self.fire(&mut task, &category, &active, now_ms, now)?;
                    tick.fired = true;
                    tick.dispatched = dispatched;
                    active = self.store.active_jobs(id)?;
                }
                None => {
                    let err = EngineError::Configuration(format!(
                        "task category {} is not registered",
                        task.category
                    ));
                    tracing::warn!(task = id, "{err}");
                    task.note(&err.to_string());
                    task.transition(TaskStatus::Failed, now_ms)?;
                }
            }
        }
        self.reevaluate(&mut task, active.len(), now_ms)?;
        self.store.update_task(&task)?;
        tick.status = task.status;
        Ok(tick)
    }

    /// Run one sweep: reap timeouts, then process every open task.
    ///
    /// Errors on one task are recorded in the report and do not stop the
    /// sweep. A persistence error halts the engine and ends the sweep.
    pub fn sweep(&self, now_ms: u128, now: Instant) -> EngineResult<SweepReport> {
        if self.is_halted() {
            return Err(EngineError::Halted);
        }
        let mut report = SweepReport {
            timed_out: self.reap_timeouts(now, now_ms)?,
            ..SweepReport::default()
        };
        let ids = self.open_tasks().map_err(|err| self.fatal(err))?;
        for id in ids {
            match self.process_task(id, now_ms, now) {
                Ok(tick) => report.record(&tick),
                Err(err) if err.is_fatal() => return Err(err),
                Err(err) => {
                    tracing::warn!(task = id, "task processing failed: {err}");
                    report.errors.push((id, err));
                }
            }
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

    // -- agent boundary ---------------------------------------------------

    /// Record that an agent picked up the job behind `track_id`.
    pub fn acknowledge(&self, track_id: &TrackId, now_ms: u128) -> EngineResult<bool> {
        self.apply_ack(track_id, now_ms).map_err(|err| self.fatal(err))
    }

    fn apply_ack(&self, track_id: &TrackId, now_ms: u128) -> EngineResult<bool> {
        let Some(job) = self.store.job_by_track(track_id)? else {
            tracing::warn!(track_id = %track_id, "ack for unknown track id discarded");
            return Err(EngineError::UnknownTrackId(track_id.to_string()));
        };
        let lock = self.task_lock(job.task);
        let _guard = lock.lock();
        let Some(mut job) = self.store.get_job(job.id)? else {
            return Err(EngineError::NotFound(format!("job {}", job.id)));
        };
        let moved = self.aggregator.acknowledge(&mut job, now_ms)?;
        if moved {
            self.audit(job.task, Some(track_id), job.area, AuditAction::Ack, None);
        }
        Ok(moved)
    }

    /// Apply an agent result.
    ///
    /// Unknown track ids are discarded with [`EngineError::UnknownTrackId`].
    /// A result for a job that is already terminal changes nothing. When the
    /// store is unavailable the message is buffered, the engine halts, and
    /// [`Applied::Deferred`] is returned.
    pub fn deliver_result(&self, message: ResultMessage, now_ms: u128) -> EngineResult<Applied> {
        if let Err(err) = message.validate() {
            tracing::warn!(track_id = %message.track_id, "result rejected: {err}");
            return Err(err);
        }
        if self.is_halted() {
            self.defer(message);
            return Ok(Applied::Deferred);
        }
        match self.apply_result(&message, now_ms) {
            Err(err) if err.is_fatal() => {
                self.fatal(err);
                self.defer(message);
                Ok(Applied::Deferred)
            }
            other => other,
        }
    }

    /// Fail every job whose deadline passed at `now`.
    ///
    /// Skipped while halted; deadlines stay armed until the store is back.
    pub fn reap_timeouts(&self, now: Instant, now_ms: u128) -> EngineResult<usize> {
        if self.is_halted() {
            return Ok(0);
        }
        let mut overdue = self.dispatcher.take_overdue(now).into_iter();
        let mut reaped = 0;
        while let Some((track_id, deadline)) = overdue.next() {
            match self.expire_job(&track_id, deadline.job, now_ms) {
                Ok(true) => reaped += 1,
                Ok(false) => {}
                Err(err) if err.is_fatal() => {
                    self.dispatcher.rearm(track_id, deadline);
                    for (track_id, deadline) in overdue {
                        self.dispatcher.rearm(track_id, deadline);
                    }
                    return Err(self.fatal(err));
                }
                Err(err) => tracing::warn!(track_id = %track_id, "timeout handling failed: {err}"),
            }
        }
        Ok(reaped)
    }

    // -- recovery and observability ---------------------------------------

    /// Resume after a persistence outage.
    ///
    /// Jobs left active without an armed deadline were abandoned half-way
    /// through a launch; they are failed as `aborted`. Their resources were
    /// already given back when the launch failed. Jobs still active under a
    /// cancelled task are failed as `cancelled`.
    ///
    /// Job rows are written before their task, so an outage between the two
    /// writes leaves task totals behind. Every task whose totals disagree with
    /// its jobs is recounted and re-evaluated. Buffered results are then
    /// replayed in arrival order.
    pub fn recover(&self, now_ms: u128) -> EngineResult<Recovery> {
        self.store.ping()?;
        let (orphaned, cancelled) = self.fail_orphans(now_ms).map_err(|err| self.fatal(err))?;
        let recounted = self.recount_tasks(now_ms).map_err(|err| self.fatal(err))?;
        if self.halted.swap(false, Ordering::AcqRel) {
            tracing::info!(
                orphaned,
                cancelled,
                recounted,
                "store reachable again, dispatch resumed"
            );
        }
        let mut pending = std::mem::take(&mut *self.deferred.lock()).into_iter();
        let mut replayed = 0;
        while let Some(message) = pending.next() {
            match self.deliver_result(message, now_ms) {
                Ok(Applied::Deferred) => {
                    self.deferred.lock().extend(pending);
                    return Err(EngineError::Halted);
                }
                Ok(_) => replayed += 1,
                Err(err) => tracing::warn!("buffered result dropped: {err}"),
            }
        }
        Ok(Recovery {
            replayed,
            orphaned,
            cancelled,
            recounted,
        })
    }

    /// Compare the shared counters and task totals with the job table.
    ///
    /// With `repair`, the area and account counters are overwritten with the
    /// live values and drifted task totals are recounted.
    pub fn reconcile(&self, repair: bool) -> EngineResult<ReconcileReport> {
        let active = self.store.all_active_jobs()?;
        let mut live_areas: HashMap<AreaId, u32> = HashMap::new();
        let mut live_accounts: HashMap<AccountId, u32> = HashMap::new();
        for job in &active {
            if let Some(area) = job.area {
                *live_areas.entry(area).or_default() += 1;
            }
            *live_accounts.entry(job.account).or_default() += 1;
        }

        let mut report = ReconcileReport::default();
        for load in self.areas.loads() {
            let live = live_areas.get(&load.id).copied().unwrap_or(0);
            if live != load.running_tasks {
                report.areas.push(CounterDrift {
                    id: load.id,
                    recorded: load.running_tasks,
                    live,
                });
                if repair {
                    self.areas.force_running_tasks(load.id, live);
                }
            }
        }
        for usage in self.accounts.usage() {
            let live = live_accounts.get(&usage.id).copied().unwrap_or(0);
            if live != usage.using {
                report.accounts.push(CounterDrift {
                    id: usage.id,
                    recorded: usage.using,
                    live,
                });
                if repair {
                    self.accounts.force_using(usage.id, live);
                }
            }
        }
        for task in self.store.list_tasks()? {
            let lock = self.task_lock(task.id);
            let _guard = lock.lock();
            let Some(mut task) = self.store.get_task(task.id)? else {
                continue;
            };
            let jobs = self.store.task_jobs(task.id)?;
            if let Some(drift) = recount_outcomes(&mut task, &jobs) {
                report.tasks.push(drift);
                if repair {
                    self.store.update_task(&task)?;
                }
            }
        }
        if !report.is_clean() {
            tracing::warn!(
                areas = report.areas.len(),
                accounts = report.accounts.len(),
                tasks = report.tasks.len(),
                repair,
                "counter drift detected"
            );
        }
        Ok(report)
    }

    /// Snapshot of engine state.
    pub fn stats(&self) -> EngineResult<EngineStats> {
        let mut tasks_by_status = BTreeMap::new();
        for task in self.store.list_tasks()? {
            *tasks_by_status.entry(task.status).or_default() += 1;
        }
        Ok(EngineStats {
            tasks_by_status,
            active_jobs: self.store.all_active_jobs()?.len(),
            in_flight: self.dispatcher.in_flight(),
            accounts_in_use: self.accounts.usage().iter().filter(|u| u.using > 0).count(),
            areas: self.areas.loads(),
            deferred_results: self.deferred_results(),
            halted: self.is_halted(),
        })
    }

    // -- internals --------------------------------------------------------

    fn task_lock(&self, id: TaskId) -> TaskLock<'_> {
        let lock = Arc::clone(self.task_locks.lock().entry(id).or_default());
        TaskLock {
            locks: &self.task_locks,
            id,
            lock,
        }
    }

    fn fatal(&self, err: EngineError) -> EngineError {
        if err.is_fatal() && !self.halted.swap(true, Ordering::AcqRel) {
            tracing::error!("halting dispatch: {err}");
        }
        err
    }

    fn defer(&self, message: ResultMessage) {
        tracing::warn!(track_id = %message.track_id, "result buffered until recovery");
        self.deferred.lock().push_back(message);
    }

    fn audit(
        &self,
        task: TaskId,
        track_id: Option<&TrackId>,
        area: Option<AreaId>,
        action: AuditAction,
        payload: Option<String>,
    ) {
        if let Some(sink) = &self.audit {
            sink.lock()
                .record(build_audit_event(task, track_id.cloned(), area, action, payload));
        }
    }

    /// Decompose, place and dispatch one fire. Returns the jobs enqueued.
    fn fire(
        &self,
        task: &mut Task,
        category: &TaskCategory,
        active: &[Job],
        now_ms: u128,
        now: Instant,
    ) -> EngineResult<u32> {
        let decomposition = decompose(&self.accounts, task, category, active, now_ms);
        let requested = decomposition.requested;
        let allocated = saturating_u32(decomposition.jobs.len());
        let timeout = self.config.job_timeout(category.job_timeout_secs);
        tracing::info!(task = task.id, requested, allocated, "task fired");

        let mut dispatched = 0;
        let mut jobs = decomposition.jobs.into_iter();
        while let Some(job) = jobs.next() {
            let account = job.account;
            match self.launch(task, category, job, timeout, now_ms, now) {
                Ok(true) => dispatched += 1,
                Ok(false) => {}
                Err(err) => {
                    self.accounts.release(account);
                    for rest in jobs {
                        self.accounts.release(rest.account);
                    }
                    return Err(err);
                }
            }
        }

        if requested > 0 && dispatched == 0 {
            task.allocation_failures = task.allocation_failures.saturating_add(1);
        } else if dispatched > 0 {
            task.allocation_failures = 0;
        }
        if dispatched > 0 || !task.scheduler.policy.is_once() {
            task.fire.record_fire(now_ms);
            task.start_time.get_or_insert(now_ms);
        }
        task.real_accounts_num = saturating_u32(active.len()).saturating_add(dispatched);
        if allocated < requested {
            let shortfall = EngineError::AllocationShortfall {
                requested,
                allocated,
            };
            task.note(&shortfall.to_string());
        }
        task.last_update = Some(now_ms);
        self.audit(
            task.id,
            None,
            None,
            AuditAction::Fire,
            Some(format!("requested={requested} dispatched={dispatched}")),
        );
        Ok(dispatched)
    }

    /// Persist, place and enqueue one job. Returns false when the job failed
    /// before dispatch; its resources are already released in that case.
    /// On error the account slot is still held by the caller.
    fn launch(
        &self,
        task: &mut Task,
        category: &TaskCategory,
        mut job: Job,
        timeout: Duration,
        now_ms: u128,
        now: Instant,
    ) -> EngineResult<bool> {
        job.id = self.store.create_job(job.clone())?;
        task.jobs_created = task.jobs_created.saturating_add(1);

        let placed = self
            .accounts
            .get(job.account)
            .ok_or(EngineError::NoEligibleArea)
            .and_then(|account| self.balancer.place(&account));
        let area = match placed {
            Ok(area) => area,
            Err(err) => {
                tracing::warn!(task = task.id, job = job.id, "job aborted before dispatch: {err}");
                let settlement =
                    Settlement::failed(FailureReason::NoEligibleArea, "", err.to_string());
                self.settle_or_hold(task, job, &settlement, now_ms)?;
                return Ok(false);
            }
        };

        let track_id = self.dispatcher.issue_track_id();
        job.area = Some(area);
        job.track_id = Some(track_id.clone());
        if let Err(err) = self.store.update_job(&job) {
            self.balancer.release(area);
            return Err(err);
        }

        let message = DispatchMessage {
            track_id: track_id.clone(),
            task_id: task.id,
            account_ref: job.account,
            category_processor: category.processor.clone(),
            configure: task.configure.clone(),
        };
        if let Err(err) = self.dispatcher.dispatch(area, job.id, message, timeout, now) {
            let reason = match err {
                EngineError::QueueFull(_) => FailureReason::QueueFull,
                _ => FailureReason::NoEligibleArea,
            };
            let settlement = Settlement::failed(reason, "", err.to_string());
            self.settle_or_hold(task, job, &settlement, now_ms)?;
            return Ok(false);
        }
        self.audit(task.id, Some(&track_id), Some(area), AuditAction::Dispatch, None);
        Ok(true)
    }

    /// Settle a job that never reached an agent. On a store error the job's
    /// area slot is released here and the account slot is left to the caller.
    fn settle_or_hold(
        &self,
        task: &mut Task,
        job: Job,
        settlement: &Settlement,
        now_ms: u128,
    ) -> EngineResult<()> {
        let area = job.area;
        match self.aggregator.settle(task, job, settlement, now_ms) {
            Ok(_) => Ok(()),
            Err(err) => {
                if let Some(area) = area {
                    self.balancer.release(area);
                }
                Err(err)
            }
        }
    }

    /// Move a task to the status its counters and schedule call for.
    /// Returns true if the status changed.
    fn reevaluate(&self, task: &mut Task, active: usize, now_ms: u128) -> EngineResult<bool> {
        let before = task.status;
        if before.is_terminal() || before == TaskStatus::New {
            return Ok(false);
        }
        if task.limit_reached() {
            task.transition(TaskStatus::Succeed, now_ms)?;
            task.note(&format!(
                "limit reached: {} succeeded, {} failed",
                task.succeed_counts, task.failed_counts
            ));
        } else if active > 0 {
            if before == TaskStatus::Pending {
                task.transition(TaskStatus::Running, now_ms)?;
            }
        } else {
            let eval = task.scheduler.evaluate(&task.fire, now_ms);
            if eval.is_terminal && !eval.should_fire_now {
                task.note(if eval.expired { "expired" } else { "schedule exhausted" });
                task.transition(TaskStatus::Failed, now_ms)?;
                if eval.expired {
                    self.audit(task.id, None, None, AuditAction::Expire, None);
                }
            } else if task.allocation_failures >= self.config.max_allocation_failures {
                task.note(&format!(
                    "allocation failed on {} consecutive fires",
                    task.allocation_failures
                ));
                task.transition(TaskStatus::Failed, now_ms)?;
            }
        }
        Ok(task.status != before)
    }

    fn apply_result(&self, message: &ResultMessage, now_ms: u128) -> EngineResult<Applied> {
        let Some(job) = self.store.job_by_track(&message.track_id)? else {
            tracing::warn!(track_id = %message.track_id, "result for unknown track id discarded");
            return Err(EngineError::UnknownTrackId(message.track_id.to_string()));
        };
        let lock = self.task_lock(job.task);
        let _guard = lock.lock();
        let mut task = self.task(job.task)?;
        let Some(job) = self.store.get_job(job.id)? else {
            return Err(EngineError::NotFound(format!("job {}", job.id)));
        };
        let area = job.area;
        let settlement = match message.status {
            ResultStatus::Succeed => Settlement::succeed(message.result.clone()),
            ResultStatus::Failed => Settlement::failed(
                FailureReason::Agent,
                message.result.clone(),
                message.traceback.clone().unwrap_or_default(),
            ),
        };
        let applied = self.aggregator.settle(&mut task, job, &settlement, now_ms)?;
        if applied == Applied::Recorded {
            let active = self.store.active_jobs(task.id)?.len();
            self.reevaluate(&mut task, active, now_ms)?;
            self.store.update_task(&task)?;
            let action = match message.status {
                ResultStatus::Succeed => AuditAction::Succeed,
                ResultStatus::Failed => AuditAction::Fail,
            };
            self.audit(task.id, Some(&message.track_id), area, action, None);
        }
        Ok(applied)
    }

    /// Fail jobs abandoned mid-launch and finish interrupted cancels.
    /// Returns `(aborted, cancelled)`.
    fn fail_orphans(&self, now_ms: u128) -> EngineResult<(usize, usize)> {
        let mut orphaned = 0;
        let mut cancelled = 0;
        for candidate in self.store.all_active_jobs()? {
            let lock = self.task_lock(candidate.task);
            let _guard = lock.lock();
            let Some(mut job) = self.store.get_job(candidate.id)? else {
                continue;
            };
            if !job.status.is_active() {
                continue;
            }
            let mut task = self.task(job.task)?;
            if task.status == TaskStatus::Cancelled {
                self.dispatcher.purge_task(task.id);
                if self.settle_cancelled(&mut task, job, now_ms)? {
                    self.store.update_task(&task)?;
                    tracing::warn!(task = task.id, "job of cancelled task failed on recovery");
                    cancelled += 1;
                }
                continue;
            }
            let armed = job
                .track_id
                .as_ref()
                .is_some_and(|track_id| self.dispatcher.is_armed(track_id));
            if armed {
                continue;
            }
            if !job.finish(
                JobStatus::Failed,
                Some(FailureReason::Aborted),
                "",
                "lost during store outage",
                now_ms,
            ) {
                continue;
            }
            self.store.update_job(&job)?;
            task.failed_counts += 1;
            task.jobs_created = task
                .jobs_created
                .max(saturating_u32(self.store.task_jobs(task.id)?.len()));
            task.last_update = Some(now_ms);
            let active = self.store.active_jobs(task.id)?.len();
            self.reevaluate(&mut task, active, now_ms)?;
            self.store.update_task(&task)?;
            tracing::warn!(task = task.id, job = job.id, "orphaned job aborted");
            orphaned += 1;
        }
        Ok((orphaned, cancelled))
    }

    /// Fail one job of a cancelled task. The caller persists `task`.
    fn settle_cancelled(&self, task: &mut Task, job: Job, now_ms: u128) -> EngineResult<bool> {
        let track_id = job.track_id.clone();
        let area = job.area;
        let settlement = Settlement::failed(FailureReason::Cancelled, "", "task cancelled");
        if self.aggregator.settle(task, job, &settlement, now_ms)? == Applied::Duplicate {
            return Ok(false);
        }
        self.audit(
            task.id,
            track_id.as_ref(),
            area,
            AuditAction::Fail,
            Some("cancelled".into()),
        );
        Ok(true)
    }

    /// Recount outcome totals of every task whose row disagrees with its jobs.
    fn recount_tasks(&self, now_ms: u128) -> EngineResult<usize> {
        let mut recounted = 0;
        for listed in self.store.list_tasks()? {
            let lock = self.task_lock(listed.id);
            let _guard = lock.lock();
            let Some(mut task) = self.store.get_task(listed.id)? else {
                continue;
            };
            let jobs = self.store.task_jobs(task.id)?;
            let Some(drift) = recount_outcomes(&mut task, &jobs) else {
                continue;
            };
            task.last_update = Some(now_ms);
            let active = jobs.iter().filter(|job| job.status.is_active()).count();
            self.reevaluate(&mut task, active, now_ms)?;
            self.store.update_task(&task)?;
            tracing::warn!(
                task = task.id,
                recorded = ?drift.recorded,
                live = ?drift.live,
                status = %task.status,
                "task totals recounted from jobs"
            );
            recounted += 1;
        }
        Ok(recounted)
    }

    fn expire_job(&self, track_id: &TrackId, job: u64, now_ms: u128) -> EngineResult<bool> {
        let Some(job) = self.store.get_job(job)? else {
            return Ok(false);
        };
        let lock = self.task_lock(job.task);
        let _guard = lock.lock();
        let mut task = self.task(job.task)?;
        let Some(job) = self.store.get_job(job.id)? else {
            return Ok(false);
        };
        let area = job.area;
        let settlement = Settlement::failed(
            FailureReason::Timeout,
            "",
            EngineError::DispatchTimeout.to_string(),
        );
        if self.aggregator.settle(&mut task, job, &settlement, now_ms)? == Applied::Duplicate {
            return Ok(false);
        }
        tracing::warn!(task = task.id, track_id = %track_id, "job timed out");
        let active = self.store.active_jobs(task.id)?.len();
        self.reevaluate(&mut task, active, now_ms)?;
        self.store.update_task(&task)?;
        self.audit(task.id, Some(track_id), area, AuditAction::Timeout, None);
        Ok(true)
    }
}

/// Set `task`'s outcome totals to those counted from `jobs`. Returns the
/// drift when they disagreed.
fn recount_outcomes(task: &mut Task, jobs: &[Job]) -> Option<TaskDrift> {
    let count = |status: JobStatus| {
        saturating_u32(jobs.iter().filter(|j| j.status == status).count())
    };
    let live = (count(JobStatus::Succeed), count(JobStatus::Failed));
    let recorded = (task.succeed_counts, task.failed_counts);
    if live == recorded {
        return None;
    }
    (task.succeed_counts, task.failed_counts) = live;
    task.jobs_created = task.jobs_created.max(saturating_u32(jobs.len()));
    Some(TaskDrift {
        task: task.id,
        recorded,
        live,
    })
}

impl SweepReport {
    pub(crate) fn record(&mut self, tick: &TaskTick) {
        self.processed += 1;
        if tick.fired {
            self.fired += 1;
        }
        self.dispatched += tick.dispatched;
    }
}
