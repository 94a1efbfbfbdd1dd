//! Recurrence policy and the scheduler policy evaluator.
//!
//! Schedulers are stored as flat [`SchedulerRecord`]s (integer mode plus
//! mode-dependent fields) and converted into the tagged [`SchedulePolicy`] on
//! load, so that an interval mode with a non-positive interval cannot exist
//! past validation.
//!
//! All timestamps are milliseconds since the Unix epoch.

use std::num::NonZeroU64;

use serde::{Deserialize, Serialize};

use crate::core::error::{EngineError, EngineResult};
use crate::util::clock::secs_to_ms;

/// Default interval of a stored scheduler, in seconds.
pub const DEFAULT_INTERVAL_SECS: i64 = 600;

/// Scheduler row as persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerRecord {
    /// Row id.
    #[serde(default)]
    pub id: u64,
    /// 0 immediate-once, 1 interval-deferred-start, 2 interval-immediate-start, 3 fixed-time-once.
    #[serde(default)]
    pub mode: i32,
    /// Interval in seconds; meaningful for modes 1 and 2.
    #[serde(default = "default_interval")]
    pub interval: i64,
    /// First fire for mode 1, the fire time for mode 3.
    #[serde(default)]
    pub start_date: Option<u128>,
    /// No fire at or after this instant.
    #[serde(default)]
    pub end_date: Option<u128>,
}

const fn default_interval() -> i64 {
    DEFAULT_INTERVAL_SECS
}

impl Default for SchedulerRecord {
    fn default() -> Self {
        Self {
            id: 0,
            mode: 0,
            interval: DEFAULT_INTERVAL_SECS,
            start_date: None,
            end_date: None,
        }
    }
}

/// Recurrence policy, one variant per mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum SchedulePolicy {
    /// Fire once, right after activation.
    ImmediateOnce,
    /// Fire first at `start_at_ms` (or one interval after activation), then every interval.
    IntervalDeferredStart {
        /// Period in seconds.
        interval_secs: NonZeroU64,
        /// Requested first fire.
        start_at_ms: Option<u128>,
    },
    /// Fire right after activation, then every interval.
    IntervalImmediateStart {
        /// Period in seconds.
        interval_secs: NonZeroU64,
    },
    /// Fire once at a fixed instant.
    FixedTimeOnce {
        /// Fire instant.
        at_ms: u128,
    },
}

impl SchedulePolicy {
    /// Whether the policy fires at most once.
    pub const fn is_once(&self) -> bool {
        matches!(self, Self::ImmediateOnce | Self::FixedTimeOnce { .. })
    }
}

/// A task's recurrence rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scheduler {
    /// Row id of the stored record.
    pub id: u64,
    /// Mode and mode-specific fields.
    pub policy: SchedulePolicy,
    /// No fire at or after this instant.
    pub end_at_ms: Option<u128>,
}

impl TryFrom<SchedulerRecord> for Scheduler {
    type Error = EngineError;

    fn try_from(record: SchedulerRecord) -> Result<Self, Self::Error> {
        let interval = || {
            u64::try_from(record.interval)
                .ok()
                .and_then(NonZeroU64::new)
                .ok_or_else(|| {
                    EngineError::Configuration(format!(
                        "scheduler {}: interval must be positive, got {}",
                        record.id, record.interval
                    ))
                })
        };
        let policy = match record.mode {
            0 => SchedulePolicy::ImmediateOnce,
            1 => SchedulePolicy::IntervalDeferredStart {
                interval_secs: interval()?,
                start_at_ms: record.start_date,
            },
            2 => SchedulePolicy::IntervalImmediateStart {
                interval_secs: interval()?,
            },
            3 => SchedulePolicy::FixedTimeOnce {
                at_ms: record.start_date.ok_or_else(|| {
                    EngineError::Configuration(format!(
                        "scheduler {}: fixed-time mode requires start_date",
                        record.id
                    ))
                })?,
            },
            other => {
                return Err(EngineError::Configuration(format!(
                    "scheduler {}: unknown mode {other}",
                    record.id
                )))
            }
        };
        Ok(Self {
            id: record.id,
            policy,
            end_at_ms: record.end_date,
        })
    }
}

impl From<&Scheduler> for SchedulerRecord {
    fn from(scheduler: &Scheduler) -> Self {
        let (mode, interval, start_date) = match scheduler.policy {
            SchedulePolicy::ImmediateOnce => (0, DEFAULT_INTERVAL_SECS, None),
            SchedulePolicy::IntervalDeferredStart {
                interval_secs,
                start_at_ms,
            } => (1, secs_as_i64(interval_secs), start_at_ms),
            SchedulePolicy::IntervalImmediateStart { interval_secs } => {
                (2, secs_as_i64(interval_secs), None)
            }
            SchedulePolicy::FixedTimeOnce { at_ms } => (3, DEFAULT_INTERVAL_SECS, Some(at_ms)),
        };
        Self {
            id: scheduler.id,
            mode,
            interval,
            start_date,
            end_date: scheduler.end_at_ms,
        }
    }
}

fn secs_as_i64(secs: NonZeroU64) -> i64 {
    i64::try_from(secs.get()).unwrap_or(i64::MAX)
}

/// Per-task firing bookkeeping.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FireState {
    /// When the task was enabled.
    pub activated_at_ms: Option<u128>,
    /// Most recent fire.
    pub last_fired_ms: Option<u128>,
    /// Number of fires so far.
    pub fires: u32,
}

impl FireState {
    /// Record a fire at `now_ms`.
    pub fn record_fire(&mut self, now_ms: u128) {
        self.last_fired_ms = Some(now_ms);
        self.fires = self.fires.saturating_add(1);
    }
}

/// Result of evaluating a scheduler at one instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Evaluation {
    /// The task is due now.
    pub should_fire_now: bool,
    /// Next instant the task becomes due, if any.
    pub next_fire_at: Option<u128>,
    /// No fire will happen after this evaluation's own fire, if any.
    pub is_terminal: bool,
    /// Terminal because the schedule's time ran out, not because it completed.
    pub expired: bool,
}

impl Evaluation {
    const fn fire(next_fire_at: Option<u128>) -> Self {
        Self {
            should_fire_now: true,
            next_fire_at,
            is_terminal: next_fire_at.is_none(),
            expired: false,
        }
    }

    const fn wait(next_fire_at: u128) -> Self {
        Self {
            should_fire_now: false,
            next_fire_at: Some(next_fire_at),
            is_terminal: false,
            expired: false,
        }
    }

    const fn done(expired: bool) -> Self {
        Self {
            should_fire_now: false,
            next_fire_at: None,
            is_terminal: true,
            expired,
        }
    }
}

impl Scheduler {
    /// Build a scheduler from a stored record.
    pub fn from_record(record: SchedulerRecord) -> EngineResult<Self> {
        Self::try_from(record)
    }

    /// Whether `end_at_ms` has passed at `now_ms`.
    pub fn end_passed(&self, now_ms: u128) -> bool {
        self.end_at_ms.is_some_and(|end| now_ms >= end)
    }

    /// Decide whether the task fires at `now_ms` and when it fires next.
    ///
    /// A task that was never activated is evaluated as if activated at `now_ms`.
    pub fn evaluate(&self, state: &FireState, now_ms: u128) -> Evaluation {
        if self.end_passed(now_ms) {
            return Evaluation::done(true);
        }
        let activated = state.activated_at_ms.unwrap_or(now_ms);

        match self.policy {
            SchedulePolicy::ImmediateOnce => {
                if state.fires == 0 {
                    Evaluation::fire(None)
                } else {
                    Evaluation::done(false)
                }
            }
            SchedulePolicy::FixedTimeOnce { at_ms } => {
                if state.fires > 0 {
                    Evaluation::done(false)
                } else if at_ms < activated {
                    Evaluation::done(true)
                } else if now_ms >= at_ms {
                    Evaluation::fire(None)
                } else {
                    self.bounded_wait(at_ms)
                }
            }
            SchedulePolicy::IntervalImmediateStart { interval_secs } => {
                self.evaluate_interval(state, activated, secs_to_ms(interval_secs.get()), now_ms)
            }
            SchedulePolicy::IntervalDeferredStart {
                interval_secs,
                start_at_ms,
            } => {
                let interval = secs_to_ms(interval_secs.get());
                let anchor = match start_at_ms {
                    Some(start) if start > activated => start,
                    _ => activated + interval,
                };
                self.evaluate_interval(state, anchor, interval, now_ms)
            }
        }
    }

    fn evaluate_interval(
        &self,
        state: &FireState,
        anchor: u128,
        interval: u128,
        now_ms: u128,
    ) -> Evaluation {
        let due = state
            .last_fired_ms
            .map_or(anchor, |last| grid_after(anchor, interval, last));
        if now_ms < due {
            return self.bounded_wait(due);
        }
        let next = grid_after(anchor, interval, now_ms);
        Evaluation::fire(self.within_end(next))
    }

    fn bounded_wait(&self, at: u128) -> Evaluation {
        match self.within_end(at) {
            Some(at) => Evaluation::wait(at),
            None => Evaluation::done(true),
        }
    }

    fn within_end(&self, at: u128) -> Option<u128> {
        match self.end_at_ms {
            Some(end) if at >= end => None,
            _ => Some(at),
        }
    }
}

/// First grid point `anchor + k * interval` strictly after `t` (or `anchor` if `t < anchor`).
const fn grid_after(anchor: u128, interval: u128, t: u128) -> u128 {
    if t < anchor {
        anchor
    } else {
        anchor + interval * ((t - anchor) / interval + 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MIN: u128 = 60_000;

    fn scheduler(mode: i32, interval: i64, start: Option<u128>, end: Option<u128>) -> Scheduler {
        Scheduler::from_record(SchedulerRecord {
            id: 1,
            mode,
            interval,
            start_date: start,
            end_date: end,
        })
        .unwrap()
    }

    fn activated(at: u128) -> FireState {
        FireState {
            activated_at_ms: Some(at),
            ..FireState::default()
        }
    }

    #[test]
    fn test_non_positive_interval_is_rejected() {
        for interval in [0, -5] {
            let err = Scheduler::from_record(SchedulerRecord {
                mode: 2,
                interval,
                ..SchedulerRecord::default()
            })
            .unwrap_err();
            assert!(matches!(err, EngineError::Configuration(_)));
        }
    }

    #[test]
    fn test_immediate_once_mode_ignores_interval() {
        let s = scheduler(0, 0, None, None);
        assert_eq!(s.policy, SchedulePolicy::ImmediateOnce);
    }

    #[test]
    fn test_unknown_mode_and_missing_fixed_time() {
        assert!(Scheduler::from_record(SchedulerRecord {
            mode: 7,
            ..SchedulerRecord::default()
        })
        .is_err());
        assert!(Scheduler::from_record(SchedulerRecord {
            mode: 3,
            ..SchedulerRecord::default()
        })
        .is_err());
    }

    #[test]
    fn test_record_round_trip_preserves_mode() {
        let s = scheduler(1, 30, Some(5 * MIN), Some(60 * MIN));
        let back = Scheduler::from_record(SchedulerRecord::from(&s)).unwrap();
        assert_eq!(back, s);
    }

    #[test]
    fn test_immediate_once_fires_once() {
        let s = scheduler(0, 600, None, None);
        let mut state = activated(0);
        let eval = s.evaluate(&state, 0);
        assert!(eval.should_fire_now && eval.is_terminal);
        state.record_fire(0);
        let eval = s.evaluate(&state, 10);
        assert!(!eval.should_fire_now && eval.is_terminal && !eval.expired);
    }

    #[test]
    fn test_interval_immediate_fires_on_grid_until_end() {
        let s = scheduler(2, 600, None, Some(20 * MIN));
        let mut state = activated(0);

        let first = s.evaluate(&state, 0);
        assert!(first.should_fire_now);
        assert_eq!(first.next_fire_at, Some(10 * MIN));
        state.record_fire(0);

        let idle = s.evaluate(&state, 5 * MIN);
        assert!(!idle.should_fire_now);
        assert_eq!(idle.next_fire_at, Some(10 * MIN));

        let second = s.evaluate(&state, 10 * MIN);
        assert!(second.should_fire_now);
        assert!(second.is_terminal);
        state.record_fire(10 * MIN);

        let after_end = s.evaluate(&state, 20 * MIN);
        assert!(!after_end.should_fire_now && after_end.is_terminal);
    }

    #[test]
    fn test_interval_skips_missed_slots_without_drift() {
        let s = scheduler(2, 60, None, None);
        let mut state = activated(0);
        state.record_fire(0);
        let late = s.evaluate(&state, 3 * MIN + 10_000);
        assert!(late.should_fire_now);
        assert_eq!(late.next_fire_at, Some(4 * MIN));
    }

    #[test]
    fn test_interval_deferred_waits_for_start_date() {
        let s = scheduler(1, 60, Some(10 * MIN), None);
        let state = activated(0);
        let eval = s.evaluate(&state, 0);
        assert!(!eval.should_fire_now);
        assert_eq!(eval.next_fire_at, Some(10 * MIN));
        assert!(s.evaluate(&state, 10 * MIN).should_fire_now);
    }

    #[test]
    fn test_interval_deferred_with_past_start_waits_one_interval() {
        let s = scheduler(1, 60, Some(MIN), None);
        let state = activated(5 * MIN);
        let eval = s.evaluate(&state, 5 * MIN);
        assert!(!eval.should_fire_now);
        assert_eq!(eval.next_fire_at, Some(6 * MIN));
    }

    #[test]
    fn test_fixed_time_fires_once_at_start_date() {
        let s = scheduler(3, 600, Some(10 * MIN), None);
        let mut state = activated(0);
        assert_eq!(s.evaluate(&state, MIN).next_fire_at, Some(10 * MIN));
        let eval = s.evaluate(&state, 10 * MIN);
        assert!(eval.should_fire_now && eval.is_terminal);
        state.record_fire(10 * MIN);
        assert!(!s.evaluate(&state, 11 * MIN).should_fire_now);
    }

    #[test]
    fn test_fixed_time_in_the_past_expires() {
        let s = scheduler(3, 600, Some(MIN), None);
        let eval = s.evaluate(&activated(5 * MIN), 5 * MIN);
        assert!(!eval.should_fire_now);
        assert!(eval.is_terminal && eval.expired);
    }

    #[test]
    fn test_end_date_in_the_past_expires() {
        let s = scheduler(0, 600, None, Some(MIN));
        let eval = s.evaluate(&activated(2 * MIN), 2 * MIN);
        assert!(!eval.should_fire_now);
        assert!(eval.is_terminal && eval.expired);
    }

    #[test]
    fn test_next_fire_is_monotonic() {
        for mode in [1, 2, 3] {
            let s = scheduler(mode, 90, Some(7 * MIN), Some(120 * MIN));
            let mut state = activated(0);
            let mut last_next: Option<u128> = None;
            let mut ended = false;
            for step in 0..200u128 {
                let now = step * 37_000;
                let eval = s.evaluate(&state, now);
                match (last_next, eval.next_fire_at) {
                    (Some(prev), Some(next)) => assert!(next >= prev, "mode {mode} at {now}"),
                    (_, None) => ended = true,
                    (None, Some(_)) => assert!(!ended, "mode {mode} resumed after end"),
                }
                if eval.next_fire_at.is_some() {
                    last_next = eval.next_fire_at;
                }
                if eval.should_fire_now {
                    state.record_fire(now);
                }
            }
        }
    }
}
