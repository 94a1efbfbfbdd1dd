//! Area load index: one atomic `running_tasks` counter per area.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::core::counter::{decrement_floor, try_increment_below};
use crate::core::model::Area;
use crate::util::serde::{AccountCategoryId, AreaId};

struct AreaSlot {
    area: RwLock<Area>,
    running: AtomicU32,
}

impl AreaSlot {
    fn cap(&self) -> u32 {
        self.area.read().capacity.unwrap_or(u32::MAX)
    }
}

/// Point-in-time load of one area.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AreaLoad {
    /// Area id.
    pub id: AreaId,
    /// Jobs currently pending or running in the area.
    pub running_tasks: u32,
    /// Configured capacity.
    pub capacity: Option<u32>,
    /// Whether the area accepts placements.
    pub enabled: bool,
}

impl AreaLoad {
    /// Whether the area has no free slot.
    pub fn at_capacity(&self) -> bool {
        self.capacity.is_some_and(|cap| self.running_tasks >= cap)
    }
}

/// Running-task counters for every area.
#[derive(Default)]
pub struct AreaLoadIndex {
    areas: RwLock<BTreeMap<AreaId, Arc<AreaSlot>>>,
}

impl AreaLoadIndex {
    /// Create an empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace an area. The counter of a replaced area is kept.
    pub fn register(&self, area: Area) {
        let mut areas = self.areas.write();
        if let Some(slot) = areas.get(&area.id) {
            *slot.area.write() = area;
            return;
        }
        areas.insert(
            area.id,
            Arc::new(AreaSlot {
                area: RwLock::new(area),
                running: AtomicU32::new(0),
            }),
        );
    }

    /// Enable or disable placement on an area. Returns false if unknown.
    pub fn set_enabled(&self, id: AreaId, enabled: bool) -> bool {
        self.slot(id).is_some_and(|slot| {
            slot.area.write().enabled = enabled;
            true
        })
    }

    /// Snapshot of an area record.
    pub fn get(&self, id: AreaId) -> Option<Area> {
        self.slot(id).map(|slot| slot.area.read().clone())
    }

    /// Current `running_tasks` of an area.
    pub fn running_tasks(&self, id: AreaId) -> Option<u32> {
        self.slot(id).map(|slot| slot.running.load(Ordering::Acquire))
    }

    /// Loads of every area, ordered by id.
    pub fn loads(&self) -> Vec<AreaLoad> {
        self.areas
            .read()
            .iter()
            .map(|(id, slot)| {
                let area = slot.area.read();
                AreaLoad {
                    id: *id,
                    running_tasks: slot.running.load(Ordering::Acquire),
                    capacity: area.capacity,
                    enabled: area.enabled,
                }
            })
            .collect()
    }

    /// Loads of enabled areas serving `category`, including those at capacity.
    pub fn candidates(&self, category: AccountCategoryId) -> Vec<AreaLoad> {
        self.areas
            .read()
            .iter()
            .filter(|(_, slot)| {
                let area = slot.area.read();
                area.enabled && area.serves(category)
            })
            .map(|(id, slot)| AreaLoad {
                id: *id,
                running_tasks: slot.running.load(Ordering::Acquire),
                capacity: slot.area.read().capacity,
                enabled: true,
            })
            .collect()
    }

    /// Take one slot on an area if it is enabled and below capacity.
    pub fn try_occupy(&self, id: AreaId) -> bool {
        let Some(slot) = self.slot(id) else {
            return false;
        };
        if !slot.area.read().enabled {
            return false;
        }
        try_increment_below(&slot.running, slot.cap())
    }

    /// Free one slot, flooring at zero.
    pub fn release(&self, id: AreaId) {
        match self.slot(id) {
            Some(slot) => {
                if !decrement_floor(&slot.running) {
                    tracing::warn!(area = id, "release on idle area ignored");
                }
            }
            None => tracing::warn!(area = id, "release on unknown area ignored"),
        }
    }

    /// Overwrite an area's counter; used by reconciliation only.
    pub fn force_running_tasks(&self, id: AreaId, value: u32) -> bool {
        self.slot(id).is_some_and(|slot| {
            slot.running.store(value, Ordering::Release);
            true
        })
    }

    fn slot(&self, id: AreaId) -> Option<Arc<AreaSlot>> {
        self.areas.read().get(&id).cloned()
    }
}
