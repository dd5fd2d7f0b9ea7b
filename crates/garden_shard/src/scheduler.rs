//! Coalescing scheduler: many deadlines, one timer.
//!
//! Plants never get a timer of their own. Every deadline goes into a
//! [`TimeBuckets`] queue and the scheduler keeps a single armed wake-up at
//! the earliest deadline rounded up to the next multiple of `min_step`.
//! Deadlines that land inside the same step share one wake-up, which bounds
//! how often a worker wakes no matter how many plants it holds.
//!
//! The scheduler does not own a runtime timer. Its owner sleeps until
//! [`Scheduler::deadline`] and then calls [`Scheduler::tick`]; the armed
//! wake-up is the only timer that exists for it at any moment.

use crate::buckets::TimeBuckets;
use crate::clock::Clock;
use crate::types::Millis;
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{error, trace};

/// Default minimum distance between two wake-ups.
pub const DEFAULT_MIN_STEP_MS: Millis = 1_000;

/// Counters describing scheduler activity.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerStats {
    /// Wake-ups that found at least one due deadline.
    pub batches: u64,
    /// Deadlines consumed across all wake-ups.
    pub deadlines_fired: u64,
    /// Batches whose run function returned an error.
    pub failures: u64,
}

#[derive(Debug)]
pub struct Scheduler<T> {
    label: String,
    queue: TimeBuckets<T>,
    min_step: Millis,
    armed: Option<Millis>,
    stats: SchedulerStats,
}

impl<T> Scheduler<T> {
    pub fn new(label: impl Into<String>, min_step: Millis) -> Self {
        Self {
            label: label.into(),
            queue: TimeBuckets::new(),
            min_step: min_step.max(1),
            armed: None,
            stats: SchedulerStats::default(),
        }
    }

    /// Queues `item` to run no earlier than `due`.
    pub fn add(&mut self, due: Millis, item: T) {
        self.queue.push(due, item);
        self.arm();
    }

    /// Fires every deadline `<= now` as one batch.
    ///
    /// `run` is invoked at most once, with all due items. Follow-up deadlines
    /// pushed into the second argument are queued after `run` returns, even if
    /// it fails. A failing batch is logged and never stops later wake-ups.
    ///
    /// Returns the number of distinct deadlines consumed.
    pub fn tick<F, E>(&mut self, now: Millis, run: F) -> usize
    where
        F: FnOnce(Vec<T>, &mut Vec<(Millis, T)>) -> Result<(), E>,
        E: fmt::Display,
    {
        self.armed = None;

        let due = self.queue.take_due(now);
        let fired = due.len();

        if fired > 0 {
            let items: Vec<T> = due.into_iter().flat_map(|(_, items)| items).collect();
            trace!(scheduler = %self.label, deadlines = fired, items = items.len(), "⏰ Running due batch");

            let mut follow_ups = Vec::new();
            if let Err(e) = run(items, &mut follow_ups) {
                self.stats.failures += 1;
                error!(scheduler = %self.label, "❌ Error during executing task: {e}");
            }
            for (at, item) in follow_ups {
                self.queue.push(at, item);
            }

            self.stats.batches += 1;
            self.stats.deadlines_fired += fired as u64;
        }

        self.arm();
        fired
    }

    /// Time of the single armed wake-up, if any.
    pub fn next_wakeup(&self) -> Option<Millis> {
        self.armed
    }

    /// How long to sleep from `now` until the armed wake-up.
    pub fn delay(&self, now: Millis) -> Option<Duration> {
        self.armed
            .map(|at| Duration::from_millis(at.saturating_sub(now)))
    }

    /// Runtime instant of the armed wake-up on `clock`.
    pub fn deadline(&self, clock: &Clock) -> Option<Instant> {
        self.armed.map(|at| clock.instant_at(at))
    }

    /// Number of timers currently armed. Never more than one.
    pub fn timers(&self) -> usize {
        usize::from(self.armed.is_some())
    }

    /// Pending distinct deadlines.
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    pub fn is_idle(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn min_step(&self) -> Millis {
        self.min_step
    }

    pub fn stats(&self) -> SchedulerStats {
        self.stats
    }

    /// Points the wake-up at the earliest pending deadline, rounded up to the
    /// step grid. An earlier deadline replaces a later armed wake-up.
    fn arm(&mut self) {
        let Some(first) = self.queue.first_key() else {
            self.armed = None;
            return;
        };

        let wake = round_up(first, self.min_step);
        match self.armed {
            Some(armed) if armed <= wake => {}
            _ => self.armed = Some(wake),
        }
    }
}

fn round_up(at: Millis, step: Millis) -> Millis {
    match at % step {
        0 => at,
        rest => at.saturating_add(step - rest),
    }
}
