//! Task decomposer: turns one fire of a task into pending jobs.

use std::collections::HashSet;

use crate::core::account_pool::AccountPool;
use crate::core::counter::saturating_u32;
use crate::core::model::{Account, Job, Task, TaskCategory};
use crate::util::serde::AccountId;

/// Jobs produced by one fire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decomposition {
    /// Accounts the fire asked for.
    pub requested: u32,
    /// Pending jobs, one per acquired account. Not yet persisted.
    pub jobs: Vec<Job>,
}

impl Decomposition {
    /// Whether fewer accounts were bound than requested.
    pub fn is_short(&self) -> bool {
        self.jobs.len() < self.requested as usize
    }
}

/// Whether `account` may run jobs of `task`, ignoring concurrency.
pub fn account_eligible(account: &Account, task: &Task, category: &TaskCategory) -> bool {
    account.category == category.account_category
        && account.serves(task.category)
        && (task.account_ids.is_empty() || task.account_ids.contains(&account.id))
}

/// Decompose one fire of `task` into jobs.
///
/// The fire asks for `accounts_num` minus the jobs still active, so a task
/// never holds more than `accounts_num` concurrent jobs. Accounts already bound
/// to an active job of the task are skipped. Each returned job owns one
/// acquired account slot; the caller must release it if the job is dropped.
pub fn decompose(
    pool: &AccountPool,
    task: &Task,
    category: &TaskCategory,
    active: &[Job],
    now_ms: u128,
) -> Decomposition {
    let busy: HashSet<AccountId> = active.iter().map(|j| j.account).collect();
    let requested = task.accounts_num.saturating_sub(saturating_u32(busy.len()));
    let accounts = pool.allocate(requested as usize, |account| {
        !busy.contains(&account.id) && account_eligible(account, task, category)
    });
    if accounts.len() < requested as usize {
        tracing::warn!(
            task = task.id,
            requested,
            allocated = accounts.len(),
            "allocation shortfall"
        );
    }
    Decomposition {
        requested,
        jobs: accounts
            .into_iter()
            .map(|account| Job::pending(task.id, account, now_ms))
            .collect(),
    }
}
