//! Bounded atomic counters shared by the account pool and the area index.

use std::sync::atomic::{AtomicU32, Ordering};

/// Increment `counter` if it is below `cap`, using a CAS loop.
/// Returns true if the slot was taken.
pub(crate) fn try_increment_below(counter: &AtomicU32, cap: u32) -> bool {
    let mut current = counter.load(Ordering::Acquire);
    loop {
        if current >= cap {
            return false;
        }
        match counter.compare_exchange_weak(
            current,
            current + 1,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => return true,
            Err(actual) => current = actual,
        }
    }
}

/// Decrement `counter`, flooring at zero. Returns false if it was already zero.
pub(crate) fn decrement_floor(counter: &AtomicU32) -> bool {
    counter
        .fetch_update(Ordering::AcqRel, Ordering::Acquire, |c| c.checked_sub(1))
        .is_ok()
}

/// `n` as a counter value, saturating at `u32::MAX`.
pub(crate) fn saturating_u32(n: usize) -> u32 {
    u32::try_from(n).unwrap_or(u32::MAX)
}
