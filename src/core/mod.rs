//! Core engine: entities, counters, scheduling, dispatch and aggregation.

pub mod account_pool;
pub mod aggregator;
pub mod area_index;
pub mod audit;
pub mod balancer;
mod counter;
pub mod decomposer;
pub mod dispatcher;
pub mod error;
pub mod executor;
pub mod lifecycle;
pub mod message;
pub mod model;
pub mod schedule;
pub mod store;

pub use account_pool::{AccountPool, AccountUsage};
pub use aggregator::{Applied, ResultAggregator, Settlement};
pub use area_index::{AreaLoad, AreaLoadIndex};
pub use audit::{
    build_audit_event, AuditAction, AuditEvent, AuditSink, InMemoryAuditSink, SharedAuditSink,
};
pub use balancer::AreaBalancer;
pub use decomposer::{account_eligible, decompose, Decomposition};
pub use dispatcher::{AreaQueue, Deadline, JobDispatcher, SharedQueue};
pub use error::{AppResult, EngineError, EngineResult};
pub use executor::{ProcessOutcome, Processor, Spawn};
pub use lifecycle::{
    CounterDrift, Engine, EngineStats, ReconcileReport, Recovery, SweepReport, TaskDrift, TaskTick,
};
pub use message::{DispatchMessage, ResultMessage, ResultStatus};
pub use model::{
    Account, AccountCategory, AccountStatus, Agent, Area, FailureReason, Job, JobStatus, NewTask,
    Task, TaskCategory, TaskStatus, User, MAX_TEXT_BYTES,
};
pub use schedule::{Evaluation, FireState, SchedulePolicy, Scheduler, SchedulerRecord};
pub use store::Store;
