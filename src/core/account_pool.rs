//! Account pool with lock-free `using` counters.
//!
//! The registry map sits behind a `parking_lot::RwLock` (read-heavy); each
//! account's concurrency counter is an `AtomicU32` adjusted with a CAS loop so
//! that concurrent tasks competing for the same account can never push it over
//! the cap.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::core::counter::{decrement_floor, try_increment_below};
use crate::core::model::{Account, AccountStatus};
use crate::util::serde::AccountId;

struct AccountSlot {
    account: RwLock<Account>,
    using: AtomicU32,
    uses: AtomicU64,
}

/// Point-in-time view of one account's counters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountUsage {
    /// Account id.
    pub id: AccountId,
    /// Jobs currently bound to the account.
    pub using: u32,
    /// Jobs ever assigned to the account.
    pub uses: u64,
}

/// Registry of accounts and their concurrency counters.
pub struct AccountPool {
    cap: u32,
    accounts: RwLock<BTreeMap<AccountId, Arc<AccountSlot>>>,
}

impl AccountPool {
    /// Create an empty pool where each account may back at most `cap` active jobs.
    pub fn new(cap: u32) -> Self {
        Self {
            cap: cap.max(1),
            accounts: RwLock::new(BTreeMap::new()),
        }
    }

    /// Concurrency cap per account.
    pub const fn cap(&self) -> u32 {
        self.cap
    }

    /// Add or replace an account. Counters of a replaced account are kept.
    pub fn register(&self, account: Account) {
        let mut accounts = self.accounts.write();
        if let Some(slot) = accounts.get(&account.id) {
            *slot.account.write() = account;
            return;
        }
        let id = account.id;
        accounts.insert(
            id,
            Arc::new(AccountSlot {
                account: RwLock::new(account),
                using: AtomicU32::new(0),
                uses: AtomicU64::new(0),
            }),
        );
    }

    /// Update an account's status. Returns false if the account is unknown.
    pub fn set_status(&self, id: AccountId, status: AccountStatus) -> bool {
        self.slot(id).is_some_and(|slot| {
            slot.account.write().status = status;
            true
        })
    }

    /// Snapshot of an account record.
    pub fn get(&self, id: AccountId) -> Option<Account> {
        self.slot(id).map(|slot| slot.account.read().clone())
    }

    /// Current `using` counter.
    pub fn using(&self, id: AccountId) -> Option<u32> {
        self.slot(id).map(|slot| slot.using.load(Ordering::Acquire))
    }

    /// Counters of every account, ordered by id.
    pub fn usage(&self) -> Vec<AccountUsage> {
        self.accounts
            .read()
            .iter()
            .map(|(id, slot)| AccountUsage {
                id: *id,
                using: slot.using.load(Ordering::Acquire),
                uses: slot.uses.load(Ordering::Relaxed),
            })
            .collect()
    }

    /// Number of registered accounts.
    pub fn len(&self) -> usize {
        self.accounts.read().len()
    }

    /// Whether the pool is empty.
    pub fn is_empty(&self) -> bool {
        self.accounts.read().is_empty()
    }

    /// Take one concurrency slot on an account. Fails if the account is unknown,
    /// not valid, or already at the cap.
    pub fn try_acquire(&self, id: AccountId) -> bool {
        let Some(slot) = self.slot(id) else {
            return false;
        };
        if slot.account.read().status != AccountStatus::Valid {
            return false;
        }
        if try_increment_below(&slot.using, self.cap) {
            slot.uses.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(account = id, "account acquired");
            true
        } else {
            false
        }
    }

    /// Give back one concurrency slot, flooring at zero.
    pub fn release(&self, id: AccountId) {
        match self.slot(id) {
            Some(slot) => {
                if !decrement_floor(&slot.using) {
                    tracing::warn!(account = id, "release on idle account ignored");
                }
            }
            None => tracing::warn!(account = id, "release on unknown account ignored"),
        }
    }

    /// Acquire up to `need` eligible accounts.
    ///
    /// Candidates are valid accounts below the cap that pass `eligible`,
    /// ordered by fewest uses first and then by ascending id. A candidate lost to
    /// a concurrent acquirer is skipped.
    pub fn allocate<F>(&self, need: usize, eligible: F) -> Vec<AccountId>
    where
        F: Fn(&Account) -> bool,
    {
        if need == 0 {
            return Vec::new();
        }
        let mut candidates: Vec<(u64, AccountId)> = self
            .accounts
            .read()
            .iter()
            .filter(|(_, slot)| slot.using.load(Ordering::Acquire) < self.cap)
            .filter(|(_, slot)| {
                let account = slot.account.read();
                account.status == AccountStatus::Valid && eligible(&account)
            })
            .map(|(id, slot)| (slot.uses.load(Ordering::Relaxed), *id))
            .collect();
        candidates.sort_unstable();

        let mut taken = Vec::with_capacity(need);
        for (_, id) in candidates {
            if taken.len() == need {
                break;
            }
            if self.try_acquire(id) {
                taken.push(id);
            }
        }
        taken
    }

    /// Overwrite an account's `using`; used by reconciliation only.
    pub fn force_using(&self, id: AccountId, value: u32) -> bool {
        self.slot(id).is_some_and(|slot| {
            slot.using.store(value, Ordering::Release);
            true
        })
    }

    fn slot(&self, id: AccountId) -> Option<Arc<AccountSlot>> {
        self.accounts.read().get(&id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account(id: AccountId) -> Account {
        Account {
            id,
            category: 1,
            owner: 1,
            account: format!("acc-{id}"),
            status: AccountStatus::Valid,
            enable_tasks: Vec::new(),
            active_area: None,
            configure: String::new(),
        }
    }

    fn pool(ids: &[AccountId]) -> AccountPool {
        let pool = AccountPool::new(1);
        for id in ids {
            pool.register(account(*id));
        }
        pool
    }

    #[test]
    fn test_allocate_prefers_least_used_then_lowest_id() {
        let pool = pool(&[1, 2, 3]);
        assert!(pool.try_acquire(1));
        pool.release(1);
        assert_eq!(pool.allocate(2, |_| true), vec![2, 3]);
    }

    #[test]
    fn test_allocate_skips_invalid_and_busy_accounts() {
        let pool = pool(&[1, 2, 3]);
        pool.set_status(1, AccountStatus::Invalid);
        assert!(pool.try_acquire(2));
        assert_eq!(pool.allocate(3, |_| true), vec![3]);
    }

    #[test]
    fn test_allocate_honors_filter() {
        let pool = pool(&[1, 2, 3]);
        assert_eq!(pool.allocate(3, |a| a.id != 2), vec![1, 3]);
    }

    #[test]
    fn test_cap_bounds_using() {
        let pool = AccountPool::new(2);
        pool.register(account(7));
        assert!(pool.try_acquire(7));
        assert!(pool.try_acquire(7));
        assert!(!pool.try_acquire(7));
        assert_eq!(pool.using(7), Some(2));
    }

    #[test]
    fn test_release_never_goes_negative() {
        let pool = pool(&[1]);
        pool.release(1);
        assert_eq!(pool.using(1), Some(0));
    }

    #[test]
    fn test_reregister_keeps_counters() {
        let pool = pool(&[1]);
        assert!(pool.try_acquire(1));
        let mut updated = account(1);
        updated.account = "renamed".into();
        pool.register(updated);
        assert_eq!(pool.using(1), Some(1));
        assert_eq!(pool.get(1).unwrap().account, "renamed");
    }
}
