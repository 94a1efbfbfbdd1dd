//! Result aggregator: folds job outcomes into task counters.

use std::sync::Arc;

use crate::core::account_pool::AccountPool;
use crate::core::area_index::AreaLoadIndex;
use crate::core::dispatcher::JobDispatcher;
use crate::core::error::EngineResult;
use crate::core::model::{FailureReason, Job, JobStatus, Task};
use crate::core::store::Store;

/// Outcome of applying a job result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    /// The job moved to a terminal status and counters changed.
    Recorded,
    /// The job was already terminal; nothing changed.
    Duplicate,
    /// The store was unavailable; the result is buffered until recovery.
    Deferred,
}

/// Terminal outcome to apply to a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settlement {
    /// `Succeed` or `Failed`.
    pub status: JobStatus,
    /// Failure reason for engine-originated failures.
    pub failure: Option<FailureReason>,
    /// Processor return value.
    pub result: String,
    /// Failure detail.
    pub traceback: String,
}

impl Settlement {
    /// A processor success.
    pub fn succeed(result: impl Into<String>) -> Self {
        Self {
            status: JobStatus::Succeed,
            failure: None,
            result: result.into(),
            traceback: String::new(),
        }
    }

    /// A failure with `reason`.
    pub fn failed(
        reason: FailureReason,
        result: impl Into<String>,
        traceback: impl Into<String>,
    ) -> Self {
        Self {
            status: JobStatus::Failed,
            failure: Some(reason),
            result: result.into(),
            traceback: traceback.into(),
        }
    }
}

/// Applies terminal outcomes to jobs and releases their resources.
pub struct ResultAggregator {
    store: Arc<dyn Store>,
    accounts: Arc<AccountPool>,
    areas: Arc<AreaLoadIndex>,
    dispatcher: Arc<JobDispatcher>,
}

impl ResultAggregator {
    /// Create an aggregator over the shared engine state.
    pub fn new(
        store: Arc<dyn Store>,
        accounts: Arc<AccountPool>,
        areas: Arc<AreaLoadIndex>,
        dispatcher: Arc<JobDispatcher>,
    ) -> Self {
        Self {
            store,
            accounts,
            areas,
            dispatcher,
        }
    }

    /// Mark a pending job as picked up by an agent.
    ///
    /// Returns false when the job is not pending; acknowledgements are
    /// advisory and never fail a job.
    pub fn acknowledge(&self, job: &mut Job, now_ms: u128) -> EngineResult<bool> {
        if job.status != JobStatus::Pending {
            return Ok(false);
        }
        job.status = JobStatus::Running;
        job.start_time = Some(now_ms);
        self.store.update_job(job)?;
        Ok(true)
    }

    /// Apply `settlement` to `job`, a job of `task`.
    ///
    /// The job row is written first; counters and resources only move once it
    /// is durably terminal, so a persistence error leaves everything as it was.
    /// The caller persists `task`. Applying to a terminal job is a no-op.
    pub fn settle(
        &self,
        task: &mut Task,
        mut job: Job,
        settlement: &Settlement,
        now_ms: u128,
    ) -> EngineResult<Applied> {
        if !job.finish(
            settlement.status,
            settlement.failure,
            &settlement.result,
            &settlement.traceback,
            now_ms,
        ) {
            tracing::debug!(job = job.id, status = %job.status, "duplicate result ignored");
            return Ok(Applied::Duplicate);
        }
        self.store.update_job(&job)?;

        match settlement.status {
            JobStatus::Succeed => task.succeed_counts += 1,
            _ => task.failed_counts += 1,
        }
        task.last_update = Some(now_ms);

        if let Some(track_id) = &job.track_id {
            self.dispatcher.disarm(track_id);
        }
        self.accounts.release(job.account);
        if let Some(area) = job.area {
            self.areas.release(area);
        }
        tracing::debug!(
            task = task.id,
            job = job.id,
            status = %job.status,
            succeed = task.succeed_counts,
            failed = task.failed_counts,
            "job settled"
        );
        Ok(Applied::Recorded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::model::{Account, AccountStatus, Area, NewTask};
    use crate::core::schedule::{Scheduler, SchedulerRecord};
    use crate::infra::store::InMemoryStore;

    struct Fixture {
        store: Arc<InMemoryStore>,
        accounts: Arc<AccountPool>,
        areas: Arc<AreaLoadIndex>,
        aggregator: ResultAggregator,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(InMemoryStore::new());
        let accounts = Arc::new(AccountPool::new(1));
        accounts.register(Account {
            id: 1,
            category: 1,
            owner: 1,
            account: "a".into(),
            status: AccountStatus::Valid,
            enable_tasks: Vec::new(),
            active_area: None,
            configure: String::new(),
        });
        let areas = Arc::new(AreaLoadIndex::new());
        areas.register(Area::new(1, "eu"));
        let aggregator = ResultAggregator::new(
            store.clone(),
            Arc::clone(&accounts),
            Arc::clone(&areas),
            Arc::new(JobDispatcher::new()),
        );
        Fixture {
            store,
            accounts,
            areas,
            aggregator,
        }
    }

    fn task() -> Task {
        let record = SchedulerRecord::default();
        let scheduler = Scheduler::from_record(record.clone()).unwrap();
        Task::new(
            NewTask {
                name: "t".into(),
                category: 1,
                creator: 1,
                scheduler: record,
                limit_counts: 1,
                accounts_num: 1,
                configure: String::new(),
                account_ids: Vec::new(),
            },
            scheduler,
        )
    }

    fn placed_job(f: &Fixture) -> Job {
        assert!(f.accounts.try_acquire(1));
        assert!(f.areas.try_occupy(1));
        let mut job = Job::pending(1, 1, 0);
        job.area = Some(1);
        job.id = f.store.create_job(job.clone()).unwrap();
        job
    }

    #[test]
    fn test_settle_releases_once() {
        let f = fixture();
        let mut task = task();
        let job = placed_job(&f);

        let applied = f
            .aggregator
            .settle(&mut task, job.clone(), &Settlement::succeed("ok"), 10)
            .unwrap();
        assert_eq!(applied, Applied::Recorded);
        assert_eq!(task.succeed_counts, 1);
        assert_eq!(task.last_update, Some(10));
        assert_eq!(f.accounts.using(1), Some(0));
        assert_eq!(f.areas.running_tasks(1), Some(0));

        let stored = f.store.get_job(job.id).unwrap().unwrap();
        let again = f
            .aggregator
            .settle(&mut task, stored, &Settlement::succeed("ok"), 20)
            .unwrap();
        assert_eq!(again, Applied::Duplicate);
        assert_eq!(task.succeed_counts, 1);
        assert_eq!(task.last_update, Some(10));
    }

    #[test]
    fn test_failure_counts_and_records_traceback() {
        let f = fixture();
        let mut task = task();
        let job = placed_job(&f);
        let settlement = Settlement::failed(FailureReason::Agent, "", "boom");
        f.aggregator.settle(&mut task, job.clone(), &settlement, 5).unwrap();
        assert_eq!(task.failed_counts, 1);
        let stored = f.store.get_job(job.id).unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Failed);
        assert_eq!(stored.traceback, "boom");
    }

    #[test]
    fn test_persistence_failure_moves_nothing() {
        let f = fixture();
        let mut task = task();
        let job = placed_job(&f);
        f.store.set_available(false);
        let err = f
            .aggregator
            .settle(&mut task, job, &Settlement::succeed("ok"), 5)
            .unwrap_err();
        assert!(err.is_fatal());
        assert_eq!(task.succeed_counts, 0);
        assert_eq!(f.accounts.using(1), Some(1));
        assert_eq!(f.areas.running_tasks(1), Some(1));
    }

    #[test]
    fn test_acknowledge_only_moves_pending() {
        let f = fixture();
        let mut job = placed_job(&f);
        assert!(f.aggregator.acknowledge(&mut job, 3).unwrap());
        assert_eq!(job.status, JobStatus::Running);
        assert_eq!(job.start_time, Some(3));
        assert!(!f.aggregator.acknowledge(&mut job, 4).unwrap());
    }
}
