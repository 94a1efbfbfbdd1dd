//! Area load balancer.

use std::sync::Arc;

use crate::core::area_index::AreaLoadIndex;
use crate::core::error::{EngineError, EngineResult};
use crate::core::model::Account;
use crate::util::serde::AreaId;

/// Places jobs on the least-loaded compatible area.
pub struct AreaBalancer {
    index: Arc<AreaLoadIndex>,
}

impl AreaBalancer {
    /// Create a balancer over `index`.
    pub const fn new(index: Arc<AreaLoadIndex>) -> Self {
        Self { index }
    }

    /// Choose an area for a job running under `account` and occupy one slot there.
    ///
    /// The account's `active_area` wins unless it is disabled, incompatible or at
    /// capacity; otherwise the lowest `running_tasks` wins with ties broken by
    /// ascending area id. Slots are taken with compare-and-increment, so an area
    /// that fills up between the snapshot and the increment is skipped.
    pub fn place(&self, account: &Account) -> EngineResult<AreaId> {
        let mut candidates = self.index.candidates(account.category);
        if candidates.is_empty() {
            tracing::warn!(account = account.id, "no enabled area serves account category");
            return Err(EngineError::NoEligibleArea);
        }

        if let Some(hint) = account.active_area {
            let hinted = candidates.iter().any(|c| c.id == hint && !c.at_capacity());
            if hinted && self.index.try_occupy(hint) {
                tracing::debug!(account = account.id, area = hint, "placed on preferred area");
                return Ok(hint);
            }
        }

        candidates.retain(|c| !c.at_capacity());
        candidates.sort_by_key(|c| (c.running_tasks, c.id));
        for candidate in candidates {
            if self.index.try_occupy(candidate.id) {
                tracing::debug!(
                    account = account.id,
                    area = candidate.id,
                    load = candidate.running_tasks,
                    "placed on least-loaded area"
                );
                return Ok(candidate.id);
            }
        }
        tracing::warn!(account = account.id, "every compatible area is at capacity");
        Err(EngineError::NoEligibleArea)
    }

    /// Give back the slot a job held on `area`.
    pub fn release(&self, area: AreaId) {
        self.index.release(area);
    }
}
