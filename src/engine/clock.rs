//! Logical time and timers.
//!
//! The engine never reads the wall clock itself: the live driver samples a
//! [`Clock`] and advances the engine, a backtest advances it with event
//! timestamps. Timers are therefore identical in both modes.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::sync::atomic::{AtomicI64, Ordering as AtomicOrdering};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::domain::{StrategyId, TimerId};

pub trait Clock: Send + Sync {
    fn now_ms(&self) -> i64;
}

/// Wall clock (UTC)
#[derive(Debug, Clone, Copy, Default)]
pub struct LiveClock;

impl Clock for LiveClock {
    fn now_ms(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

/// Externally driven clock for replays and tests
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Arc<AtomicI64>,
}

impl ManualClock {
    pub fn new(start_ms: i64) -> Self {
        Self {
            now: Arc::new(AtomicI64::new(start_ms)),
        }
    }

    pub fn set(&self, now_ms: i64) {
        self.now.store(now_ms, AtomicOrdering::SeqCst);
    }

    pub fn advance(&self, delta_ms: i64) {
        self.now.fetch_add(delta_ms, AtomicOrdering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> i64 {
        self.now.load(AtomicOrdering::SeqCst)
    }
}

/// Timer that came due
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FiredTimer {
    pub id: TimerId,
    pub owner: StrategyId,
    pub due_ms: i64,
}

#[derive(Debug)]
struct TimerEntry {
    owner: StrategyId,
    period_ms: Option<i64>,
}

#[derive(Debug, PartialEq, Eq)]
struct ScheduledTimer {
    due_ms: i64,
    sequence: u64, // FIFO among timers due at the same instant
    id: TimerId,
}

impl PartialOrd for ScheduledTimer {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScheduledTimer {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap: earliest due, then lowest sequence, on top
        match other.due_ms.cmp(&self.due_ms) {
            Ordering::Equal => other.sequence.cmp(&self.sequence),
            ord => ord,
        }
    }
}

/// One-shot and repeating timers on logical time
#[derive(Debug, Default)]
pub struct TimerService {
    heap: BinaryHeap<ScheduledTimer>,
    active: HashMap<TimerId, TimerEntry>,
    next_id: u64,
    sequence: u64,
}

impl TimerService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fire once at `now + delay`, saturating at the end of time
    pub fn set_timer(&mut self, owner: &StrategyId, now_ms: i64, delay_ms: i64) -> TimerId {
        let id = self.allocate(owner, None);
        let due_ms = now_ms.saturating_add(delay_ms.max(0));
        self.schedule(id, due_ms);
        debug!(strategy = %owner, timer = %id, due_ms, "timer set");
        id
    }

    /// Fire at `now + k * period` for k = 1, 2, ...
    pub fn set_interval(&mut self, owner: &StrategyId, now_ms: i64, period_ms: i64) -> TimerId {
        let period_ms = if period_ms <= 0 {
            warn!(strategy = %owner, period_ms, "non-positive interval clamped to 1ms");
            1
        } else {
            period_ms
        };
        let id = self.allocate(owner, Some(period_ms));
        self.schedule(id, now_ms.saturating_add(period_ms));
        debug!(strategy = %owner, timer = %id, period_ms, "interval set");
        id
    }

    /// Idempotent. Returns whether the timer was still active.
    pub fn cancel(&mut self, id: TimerId) -> bool {
        let removed = self.active.remove(&id).is_some();
        if removed {
            debug!(timer = %id, "timer canceled");
        }
        removed
    }

    /// Discard every timer owned by `owner`
    pub fn cancel_owned_by(&mut self, owner: &StrategyId) -> usize {
        let before = self.active.len();
        self.active.retain(|_, entry| &entry.owner != owner);
        before - self.active.len()
    }

    /// Only ids whose owner matches can be canceled through a strategy context
    pub fn is_owned_by(&self, id: TimerId, owner: &StrategyId) -> bool {
        self.active.get(&id).is_some_and(|e| &e.owner == owner)
    }

    pub fn next_due(&mut self) -> Option<i64> {
        self.discard_canceled();
        self.heap.peek().map(|t| t.due_ms)
    }

    /// Pop the earliest timer due at or before `until_ms`, rescheduling intervals.
    pub fn pop_due(&mut self, until_ms: i64) -> Option<FiredTimer> {
        self.discard_canceled();
        if self.heap.peek()?.due_ms > until_ms {
            return None;
        }
        let scheduled = self.heap.pop()?;
        let entry = self.active.get(&scheduled.id)?;
        let period_ms = entry.period_ms;
        let fired = FiredTimer {
            id: scheduled.id,
            owner: entry.owner.clone(),
            due_ms: scheduled.due_ms,
        };
        // an interval whose next tick would overflow is retired
        match period_ms.and_then(|period| scheduled.due_ms.checked_add(period)) {
            Some(next_due) => self.schedule(scheduled.id, next_due),
            None => {
                self.active.remove(&scheduled.id);
            }
        }
        Some(fired)
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    fn allocate(&mut self, owner: &StrategyId, period_ms: Option<i64>) -> TimerId {
        self.next_id += 1;
        let id = TimerId(self.next_id);
        self.active.insert(
            id,
            TimerEntry {
                owner: owner.clone(),
                period_ms,
            },
        );
        id
    }

    fn schedule(&mut self, id: TimerId, due_ms: i64) {
        self.sequence += 1;
        self.heap.push(ScheduledTimer {
            due_ms,
            sequence: self.sequence,
            id,
        });
    }

    // Canceled timers are dropped lazily from the heap
    fn discard_canceled(&mut self) {
        while let Some(top) = self.heap.peek() {
            if self.active.contains_key(&top.id) {
                break;
            }
            self.heap.pop();
        }
    }
}
