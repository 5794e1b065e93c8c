//! Cancellable timers on a virtual clock.
//!
//! The host advances the clock explicitly, which keeps debounce and periodic
//! flush behaviour deterministic under test.

use std::time::Duration;

use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    /// Recurring write of the persistence cache while a book is open.
    PersistFlush,
    /// Quiet period after the last find-input edit.
    SearchDebounce,
}

#[derive(Debug, Clone)]
struct Entry {
    id: TimerId,
    kind: TimerKind,
    deadline: Duration,
    period: Option<Duration>,
}

#[derive(Debug, Default)]
pub struct Timers {
    now: Duration,
    next_id: u64,
    entries: Vec<Entry>,
}

impl Timers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn now(&self) -> Duration {
        self.now
    }

    pub fn schedule_once(&mut self, kind: TimerKind, delay: Duration) -> TimerId {
        self.insert(kind, delay, None)
    }

    pub fn schedule_repeating(&mut self, kind: TimerKind, period: Duration) -> TimerId {
        // a zero period would fire forever within one advance
        let period = period.max(Duration::from_millis(1));
        self.insert(kind, period, Some(period))
    }

    pub fn cancel(&mut self, id: TimerId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|entry| entry.id != id);
        before != self.entries.len()
    }

    /// Cancels every pending timer of `kind`; returns how many were dropped.
    pub fn cancel_kind(&mut self, kind: TimerKind) -> usize {
        let before = self.entries.len();
        self.entries.retain(|entry| entry.kind != kind);
        let cancelled = before - self.entries.len();
        if cancelled > 0 {
            debug!(?kind, cancelled, "cancelled timers");
        }
        cancelled
    }

    pub fn active(&self, kind: TimerKind) -> usize {
        self.entries.iter().filter(|entry| entry.kind == kind).count()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Moves the clock forward and returns fired timers in deadline order.
    /// Repeating timers re-arm and may fire several times in one call.
    pub fn advance_to(&mut self, now: Duration) -> Vec<TimerKind> {
        if now < self.now {
            return Vec::new();
        }
        self.now = now;

        let mut fired = Vec::new();
        loop {
            let next = self
                .entries
                .iter()
                .enumerate()
                .filter(|(_, entry)| entry.deadline <= now)
                .min_by_key(|(_, entry)| (entry.deadline, entry.id))
                .map(|(idx, _)| idx);
            let Some(idx) = next else {
                break;
            };

            let kind = self.entries[idx].kind;
            match self.entries[idx].period {
                Some(period) => self.entries[idx].deadline += period,
                None => {
                    self.entries.remove(idx);
                }
            }
            fired.push(kind);
        }
        fired
    }

    pub fn advance_by(&mut self, delta: Duration) -> Vec<TimerKind> {
        let target = self.now + delta;
        self.advance_to(target)
    }

    fn insert(&mut self, kind: TimerKind, delay: Duration, period: Option<Duration>) -> TimerId {
        self.next_id += 1;
        let id = TimerId(self.next_id);
        self.entries.push(Entry {
            id,
            kind,
            deadline: self.now + delay,
            period,
        });
        id
    }
}
