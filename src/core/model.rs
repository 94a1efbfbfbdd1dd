//! Persistent entities and their closed status enumerations.
//!
//! Status fields are enums with explicit transition tables; every mutation of
//! a task status goes through [`Task::transition`].

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::core::error::{EngineError, EngineResult};
use crate::core::schedule::{FireState, Scheduler};
use crate::util::serde::{
    AccountCategoryId, AccountId, AgentId, AreaId, JobId, TaskCategoryId, TaskId, TrackId, UserId,
};

/// Upper bound, in bytes, for free-form text columns (`configure`, `result`, `traceback`).
pub const MAX_TEXT_BYTES: usize = 2048;

/// Clip `text` to at most [`MAX_TEXT_BYTES`] on a char boundary.
pub fn clip_text(text: &str) -> String {
    if text.len() <= MAX_TEXT_BYTES {
        return text.to_string();
    }
    let mut end = MAX_TEXT_BYTES;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    text[..end].to_string()
}

/// Lifecycle status of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Created, not yet enabled.
    New,
    /// Enabled, waiting for its first active job.
    Pending,
    /// At least one job has been dispatched.
    Running,
    /// `succeed_counts` reached `limit_counts`.
    Succeed,
    /// Schedule exhausted without reaching the limit, or allocation kept failing.
    Failed,
    /// Cancelled by the user.
    Cancelled,
    /// Paused by the user; no new fires.
    Pausing,
}

impl TaskStatus {
    /// Terminal states never transition again.
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Succeed | Self::Failed | Self::Cancelled)
    }

    /// Whether the scheduler may fire the task in this state.
    pub const fn is_schedulable(self) -> bool {
        matches!(self, Self::Pending | Self::Running)
    }

    /// Transition table.
    pub const fn can_transition_to(self, next: Self) -> bool {
        use TaskStatus::{Cancelled, Failed, New, Pausing, Pending, Running, Succeed};
        match self {
            New => matches!(next, Pending | Cancelled),
            Pending => matches!(next, Running | Failed | Cancelled | Pausing),
            Running => matches!(next, Running | Succeed | Failed | Cancelled | Pausing),
            Pausing => matches!(next, Running | Succeed | Failed | Cancelled),
            Succeed | Failed | Cancelled => false,
        }
    }

    /// Storage representation.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Succeed => "succeed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::Pausing => "pausing",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Execution status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Created or enqueued, not yet picked up.
    Pending,
    /// Acknowledged by an agent.
    Running,
    /// Agent reported success.
    Succeed,
    /// Agent reported failure, or the engine failed it.
    Failed,
}

impl JobStatus {
    /// Pending or running.
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Pending | Self::Running)
    }

    /// Succeed or failed.
    pub const fn is_terminal(self) -> bool {
        !self.is_active()
    }

    /// Transition table.
    pub const fn can_transition_to(self, next: Self) -> bool {
        match self {
            Self::Pending => matches!(next, Self::Running | Self::Succeed | Self::Failed),
            Self::Running => matches!(next, Self::Succeed | Self::Failed),
            Self::Succeed | Self::Failed => false,
        }
    }

    /// Storage representation.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Succeed => "succeed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a job ended in `failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// The agent reported a failure.
    Agent,
    /// No result before the deadline.
    Timeout,
    /// The owning task was cancelled.
    Cancelled,
    /// Placement found no area; never dispatched.
    NoEligibleArea,
    /// The area queue refused the message; never dispatched.
    QueueFull,
    /// The engine lost track of the job during a store outage.
    Aborted,
}

impl FailureReason {
    /// Short label recorded in the job traceback.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Agent => "agent",
            Self::Timeout => "timeout",
            Self::Cancelled => "cancelled",
            Self::NoEligibleArea => "no_eligible_area",
            Self::QueueFull => "queue_full",
            Self::Aborted => "aborted",
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Account health as recorded by operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountStatus {
    /// Usable.
    #[default]
    Valid,
    /// Banned or broken credentials.
    Invalid,
    /// Under verification.
    Verifying,
    /// Anything else.
    Other,
}

/// Task taxonomy entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskCategory {
    /// Category id.
    pub id: TaskCategoryId,
    /// Display name.
    pub name: String,
    /// Processor function an agent must invoke for this category.
    pub processor: String,
    /// Schema of configurable parameters, one `name:title:type:default[:options]` per line.
    #[serde(default)]
    pub configure_schema: String,
    /// Account category the jobs of this task category run under.
    pub account_category: AccountCategoryId,
    /// Per-category job timeout overriding the engine default.
    #[serde(default)]
    pub job_timeout_secs: Option<u64>,
}

/// Account taxonomy entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountCategory {
    /// Category id.
    pub id: AccountCategoryId,
    /// Display name.
    pub name: String,
}

/// Task creator.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct User {
    /// User id.
    pub id: UserId,
    /// Task categories this user may create; empty allows all.
    #[serde(default)]
    pub enable_tasks: Vec<TaskCategoryId>,
}

impl User {
    /// Whether this user may create tasks of `category`.
    pub fn may_create(&self, category: TaskCategoryId) -> bool {
        self.enable_tasks.is_empty() || self.enable_tasks.contains(&category)
    }
}

/// Credentialed identity consumed by jobs.
///
/// The `using` counter is not part of this record; it lives in the
/// [`AccountPool`](crate::core::AccountPool) as an atomic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    /// Account id.
    pub id: AccountId,
    /// Account category.
    pub category: AccountCategoryId,
    /// Owning user.
    pub owner: UserId,
    /// Login name.
    pub account: String,
    /// Health.
    #[serde(default)]
    pub status: AccountStatus,
    /// Task categories this account may serve; empty allows all.
    #[serde(default)]
    pub enable_tasks: Vec<TaskCategoryId>,
    /// Preferred placement area.
    #[serde(default)]
    pub active_area: Option<AreaId>,
    /// Opaque per-account settings.
    #[serde(default)]
    pub configure: String,
}

impl Account {
    /// Whether this account may serve tasks of `category`.
    pub fn serves(&self, category: TaskCategoryId) -> bool {
        self.enable_tasks.is_empty() || self.enable_tasks.contains(&category)
    }
}

/// Placement partition backed by one queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Area {
    /// Area id.
    pub id: AreaId,
    /// Unique name, usually also the queue name.
    pub name: String,
    /// Disabled areas receive no placements.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Maximum concurrent jobs; `None` is unbounded.
    #[serde(default)]
    pub capacity: Option<u32>,
    /// Account categories this area serves; empty serves all.
    #[serde(default)]
    pub account_categories: Vec<AccountCategoryId>,
    /// Free-form description.
    #[serde(default)]
    pub description: String,
}

const fn default_enabled() -> bool {
    true
}

impl Area {
    /// Create an enabled, unbounded area serving every category.
    pub fn new(id: AreaId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            enabled: true,
            capacity: None,
            account_categories: Vec::new(),
            description: String::new(),
        }
    }

    /// Whether this area can host jobs for accounts of `category`.
    pub fn serves(&self, category: AccountCategoryId) -> bool {
        self.account_categories.is_empty() || self.account_categories.contains(&category)
    }
}

/// Worker process bound to an area.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Agent {
    /// Agent id.
    pub id: AgentId,
    /// Area whose queue this agent drains.
    pub area: AreaId,
    /// Opaque agent settings.
    #[serde(default)]
    pub configure: String,
}

/// Parameters for creating a task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTask {
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// Task category.
    pub category: TaskCategoryId,
    /// Creating user.
    pub creator: UserId,
    /// Recurrence policy as stored.
    pub scheduler: crate::core::schedule::SchedulerRecord,
    /// Maximum successful jobs over the task's life.
    pub limit_counts: u32,
    /// Desired concurrent accounts.
    pub accounts_num: u32,
    /// Opaque payload forwarded to agents.
    #[serde(default)]
    pub configure: String,
    /// Accounts the task is pinned to; empty draws from the whole pool.
    #[serde(default)]
    pub account_ids: Vec<AccountId>,
}

/// A user-defined unit of recurring or one-shot automation work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    /// Task id, assigned by the store.
    pub id: TaskId,
    /// Display name.
    pub name: String,
    /// Task category.
    pub category: TaskCategoryId,
    /// Creating user.
    pub creator: UserId,
    /// Owned recurrence policy.
    pub scheduler: Scheduler,
    /// Scheduler bookkeeping.
    pub fire: FireState,
    /// Lifecycle status.
    pub status: TaskStatus,
    /// Maximum successful jobs over the task's life.
    pub limit_counts: u32,
    /// Jobs that succeeded.
    pub succeed_counts: u32,
    /// Jobs that failed.
    pub failed_counts: u32,
    /// Jobs ever created.
    pub jobs_created: u32,
    /// Desired concurrent accounts.
    pub accounts_num: u32,
    /// Accounts actually bound to active jobs after the last fire.
    pub real_accounts_num: u32,
    /// Consecutive fires that could not dispatch a single job.
    pub allocation_failures: u32,
    /// Pinned accounts; empty draws from the whole pool.
    pub account_ids: Vec<AccountId>,
    /// Opaque payload forwarded to agents.
    pub configure: String,
    /// Human-readable summary of the latest notable outcome.
    pub result: String,
    /// First real start (ms since epoch).
    pub start_time: Option<u128>,
    /// Terminal transition time (ms since epoch).
    pub end_time: Option<u128>,
    /// Last counter or status change (ms since epoch).
    pub last_update: Option<u128>,
}

impl Task {
    /// Build a `new` task from validated parts.
    pub fn new(params: NewTask, scheduler: Scheduler) -> Self {
        Self {
            id: 0,
            name: params.name,
            category: params.category,
            creator: params.creator,
            scheduler,
            fire: FireState::default(),
            status: TaskStatus::New,
            limit_counts: params.limit_counts,
            succeed_counts: 0,
            failed_counts: 0,
            jobs_created: 0,
            accounts_num: params.accounts_num,
            real_accounts_num: 0,
            allocation_failures: 0,
            account_ids: params.account_ids,
            configure: params.configure,
            result: String::new(),
            start_time: None,
            end_time: None,
            last_update: None,
        }
    }

    /// Whether the success limit has been reached.
    pub const fn limit_reached(&self) -> bool {
        self.succeed_counts >= self.limit_counts
    }

    /// Move to `next`, enforcing the transition table.
    pub fn transition(&mut self, next: TaskStatus, now_ms: u128) -> EngineResult<()> {
        if self.status == next {
            return Ok(());
        }
        if !self.status.can_transition_to(next) {
            return Err(EngineError::InvalidTransition {
                task: self.id,
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }
        tracing::info!(task = self.id, from = %self.status, to = %next, "task transition");
        self.status = next;
        if next.is_terminal() {
            self.end_time = Some(now_ms);
        }
        self.last_update = Some(now_ms);
        Ok(())
    }

    /// Record a summary line in `result`.
    pub fn note(&mut self, text: &str) {
        self.result = clip_text(text);
    }
}

/// One execution attempt of a task against one account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    /// Job id, assigned by the store.
    pub id: JobId,
    /// Owning task.
    pub task: TaskId,
    /// Bound account.
    pub account: AccountId,
    /// Placement area, set by the balancer.
    pub area: Option<AreaId>,
    /// Execution status.
    pub status: JobStatus,
    /// Correlation token, set right before enqueue.
    pub track_id: Option<TrackId>,
    /// Why the job failed, when it did.
    pub failure: Option<FailureReason>,
    /// Creation time (ms since epoch).
    pub created_at: u128,
    /// Agent pickup time (ms since epoch).
    pub start_time: Option<u128>,
    /// Terminal time (ms since epoch).
    pub end_time: Option<u128>,
    /// Processor return value.
    pub result: String,
    /// Failure detail.
    pub traceback: String,
}

impl Job {
    /// A fresh pending job binding `task` to `account`.
    pub const fn pending(task: TaskId, account: AccountId, now_ms: u128) -> Self {
        Self {
            id: 0,
            task,
            account,
            area: None,
            status: JobStatus::Pending,
            track_id: None,
            failure: None,
            created_at: now_ms,
            start_time: None,
            end_time: None,
            result: String::new(),
            traceback: String::new(),
        }
    }

    /// Finish the job. Returns false if it was already terminal.
    pub fn finish(
        &mut self,
        status: JobStatus,
        failure: Option<FailureReason>,
        result: &str,
        traceback: &str,
        now_ms: u128,
    ) -> bool {
        if !self.status.can_transition_to(status) || status.is_active() {
            return false;
        }
        self.status = status;
        self.failure = failure;
        self.result = clip_text(result);
        self.traceback = clip_text(traceback);
        self.end_time = Some(now_ms);
        true
    }
}
