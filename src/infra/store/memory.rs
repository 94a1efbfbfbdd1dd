//! In-memory store with outage injection.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;

use crate::core::error::{EngineError, EngineResult};
use crate::core::model::{Job, Task};
use crate::core::store::Store;
use crate::util::serde::{JobId, TaskId, TrackId};

#[derive(Default)]
struct Tables {
    next_task: TaskId,
    next_job: JobId,
    tasks: BTreeMap<TaskId, Task>,
    jobs: BTreeMap<JobId, Job>,
    tracks: HashMap<TrackId, JobId>,
}

/// Store backed by in-process maps.
///
/// [`InMemoryStore::set_available`] simulates an outage: while unavailable,
/// every call fails with [`EngineError::Persistence`].
pub struct InMemoryStore {
    tables: RwLock<Tables>,
    available: AtomicBool,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
            available: AtomicBool::new(true),
        }
    }
}

impl InMemoryStore {
    /// Create an empty, available store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Toggle availability.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::Release);
    }

    fn check(&self) -> EngineResult<()> {
        if self.available.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(EngineError::Persistence("store unavailable".into()))
        }
    }
}

impl Store for InMemoryStore {
    fn ping(&self) -> EngineResult<()> {
        self.check()
    }

    fn create_task(&self, mut task: Task) -> EngineResult<TaskId> {
        self.check()?;
        let mut tables = self.tables.write();
        tables.next_task += 1;
        let id = tables.next_task;
        task.id = id;
        tables.tasks.insert(id, task);
        Ok(id)
    }

    fn get_task(&self, id: TaskId) -> EngineResult<Option<Task>> {
        self.check()?;
        Ok(self.tables.read().tasks.get(&id).cloned())
    }

    fn update_task(&self, task: &Task) -> EngineResult<()> {
        self.check()?;
        let mut tables = self.tables.write();
        match tables.tasks.get_mut(&task.id) {
            Some(stored) => {
                *stored = task.clone();
                Ok(())
            }
            None => Err(EngineError::NotFound(format!("task {}", task.id))),
        }
    }

    fn open_tasks(&self) -> EngineResult<Vec<TaskId>> {
        self.check()?;
        Ok(self
            .tables
            .read()
            .tasks
            .values()
            .filter(|t| !t.status.is_terminal())
            .map(|t| t.id)
            .collect())
    }

    fn list_tasks(&self) -> EngineResult<Vec<Task>> {
        self.check()?;
        Ok(self.tables.read().tasks.values().cloned().collect())
    }

    fn create_job(&self, mut job: Job) -> EngineResult<JobId> {
        self.check()?;
        let mut tables = self.tables.write();
        tables.next_job += 1;
        let id = tables.next_job;
        job.id = id;
        if let Some(track_id) = &job.track_id {
            tables.tracks.insert(track_id.clone(), id);
        }
        tables.jobs.insert(id, job);
        Ok(id)
    }

    fn get_job(&self, id: JobId) -> EngineResult<Option<Job>> {
        self.check()?;
        Ok(self.tables.read().jobs.get(&id).cloned())
    }

    fn update_job(&self, job: &Job) -> EngineResult<()> {
        self.check()?;
        let mut tables = self.tables.write();
        if !tables.jobs.contains_key(&job.id) {
            return Err(EngineError::NotFound(format!("job {}", job.id)));
        }
        if let Some(track_id) = &job.track_id {
            tables.tracks.insert(track_id.clone(), job.id);
        }
        tables.jobs.insert(job.id, job.clone());
        Ok(())
    }

    fn job_by_track(&self, track_id: &TrackId) -> EngineResult<Option<Job>> {
        self.check()?;
        let tables = self.tables.read();
        Ok(tables
            .tracks
            .get(track_id)
            .and_then(|id| tables.jobs.get(id))
            .cloned())
    }

    fn active_jobs(&self, task: TaskId) -> EngineResult<Vec<Job>> {
        self.check()?;
        Ok(self
            .tables
            .read()
            .jobs
            .values()
            .filter(|j| j.task == task && j.status.is_active())
            .cloned()
            .collect())
    }

    fn all_active_jobs(&self) -> EngineResult<Vec<Job>> {
        self.check()?;
        Ok(self
            .tables
            .read()
            .jobs
            .values()
            .filter(|j| j.status.is_active())
            .cloned()
            .collect())
    }

    fn task_jobs(&self, task: TaskId) -> EngineResult<Vec<Job>> {
        self.check()?;
        Ok(self
            .tables
            .read()
            .jobs
            .values()
            .filter(|j| j.task == task)
            .cloned()
            .collect())
    }
}
