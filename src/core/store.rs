//! Persistence collaborator for tasks and jobs.

use crate::core::error::EngineResult;
use crate::core::model::{Job, Task};
use crate::util::serde::{JobId, TaskId, TrackId};

/// Durable storage of tasks and jobs.
///
/// Implementations return [`crate::core::EngineError::Persistence`] when the
/// backing store is unreachable; the engine treats that as fatal and halts
/// new dispatch. Ids are assigned by the store on create.
pub trait Store: Send + Sync {
    /// Check the backend is reachable.
    fn ping(&self) -> EngineResult<()>;

    /// Insert a task and return its id.
    fn create_task(&self, task: Task) -> EngineResult<TaskId>;
    /// Load a task.
    fn get_task(&self, id: TaskId) -> EngineResult<Option<Task>>;
    /// Overwrite a task.
    fn update_task(&self, task: &Task) -> EngineResult<()>;
    /// Ids of tasks not in a terminal status, ascending.
    fn open_tasks(&self) -> EngineResult<Vec<TaskId>>;
    /// Every task, ascending by id.
    fn list_tasks(&self) -> EngineResult<Vec<Task>>;

    /// Insert a job and return its id.
    fn create_job(&self, job: Job) -> EngineResult<JobId>;
    /// Load a job.
    fn get_job(&self, id: JobId) -> EngineResult<Option<Job>>;
    /// Overwrite a job, indexing its track id when present.
    fn update_job(&self, job: &Job) -> EngineResult<()>;
    /// Look a job up by track id.
    fn job_by_track(&self, track_id: &TrackId) -> EngineResult<Option<Job>>;
    /// Pending or running jobs of one task.
    fn active_jobs(&self, task: TaskId) -> EngineResult<Vec<Job>>;
    /// Pending or running jobs of every task.
    fn all_active_jobs(&self) -> EngineResult<Vec<Job>>;
    /// Every job of one task, ascending by id.
    fn task_jobs(&self, task: TaskId) -> EngineResult<Vec<Job>>;
}
