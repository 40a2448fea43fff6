//! Keyed deadline timers for Washday room actors.
//!
//! A room schedules many independent delayed callbacks: bot steps, the
//! bot's second shop decision, the empty-room cleanup. Each is stored
//! under a key; scheduling an existing key replaces its deadline, and a
//! key can be cancelled at any time, so a stale callback never fires.
//!
//! # Idle mode
//!
//! With nothing scheduled, [`Timers::expired`] pends forever. That is the
//! right behavior inside a room actor's `tokio::select!`, where commands
//! keep flowing on the other branch:
//!
//! ```ignore
//! loop {
//!     tokio::select! {
//!         Some(cmd) = commands.recv() => { /* handle command */ }
//!         fired = timers.expired() => { /* handle fired.key */ }
//!     }
//! }
//! ```
//!
//! `expired` is cancel-safe: it only removes the entry after the sleep
//! completes, so dropping it from a losing `select!` branch loses nothing.

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::time::{self, Instant};
use tracing::{debug, trace};

// ---------------------------------------------------------------------------
// DelayRange
// ---------------------------------------------------------------------------

/// An inclusive range of delays, sampled uniformly at millisecond
/// granularity. Used to make bot timing look human.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelayRange {
    /// Shortest delay.
    pub min: Duration,
    /// Longest delay.
    pub max: Duration,
}

impl DelayRange {
    /// A range between `min` and `max`. Reversed bounds are swapped.
    pub fn new(min: Duration, max: Duration) -> Self {
        if max < min {
            Self { min: max, max: min }
        } else {
            Self { min, max }
        }
    }

    /// A range that always yields `delay`.
    pub const fn fixed(delay: Duration) -> Self {
        Self {
            min: delay,
            max: delay,
        }
    }

    /// Shorthand for a range in milliseconds.
    pub fn millis(min: u64, max: u64) -> Self {
        Self::new(Duration::from_millis(min), Duration::from_millis(max))
    }

    /// Picks a delay from the range.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Duration {
        if self.max <= self.min {
            return self.min;
        }
        let span = (self.max - self.min).as_millis() as u64;
        self.min + Duration::from_millis(rng.random_range(0..=span))
    }
}

// ---------------------------------------------------------------------------
// Fired / stats
// ---------------------------------------------------------------------------

/// A timer that reached its deadline, returned by [`Timers::expired`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fired<K> {
    /// The key the timer was scheduled under.
    pub key: K,
    /// How far past the deadline the timer was observed.
    pub late_by: Duration,
}

/// Running counters, mostly for logging.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimerStats {
    /// Calls to [`Timers::schedule`].
    pub scheduled: u64,
    /// Timers that replaced a pending timer with the same key.
    pub replaced: u64,
    /// Timers removed before firing.
    pub cancelled: u64,
    /// Timers that fired.
    pub fired: u64,
}

// ---------------------------------------------------------------------------
// Timers
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
struct Entry {
    deadline: Instant,
    /// Insertion order, breaks ties between equal deadlines.
    seq: u64,
}

/// A set of pending deadlines, at most one per key.
pub struct Timers<K> {
    entries: HashMap<K, Entry>,
    next_seq: u64,
    stats: TimerStats,
}

impl<K> Timers<K>
where
    K: Eq + Hash + Clone + fmt::Debug,
{
    /// Creates an empty timer set.
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
            next_seq: 0,
            stats: TimerStats::default(),
        }
    }

    /// Arms `key` to fire after `delay`, replacing any pending deadline
    /// for the same key.
    pub fn schedule(&mut self, key: K, delay: Duration) -> Instant {
        let deadline = Instant::now() + delay;
        let seq = self.next_seq;
        self.next_seq += 1;
        self.stats.scheduled += 1;

        if self.entries.insert(key.clone(), Entry { deadline, seq }).is_some() {
            self.stats.replaced += 1;
            trace!(?key, ?delay, "timer rescheduled");
        } else {
            trace!(?key, ?delay, "timer scheduled");
        }
        deadline
    }

    /// Cancels the timer for `key`. Returns `true` if one was pending.
    pub fn cancel(&mut self, key: &K) -> bool {
        let removed = self.entries.remove(key).is_some();
        if removed {
            self.stats.cancelled += 1;
            trace!(?key, "timer cancelled");
        }
        removed
    }

    /// Cancels every timer whose key matches `predicate`. Returns how many
    /// were removed.
    pub fn cancel_where(&mut self, mut predicate: impl FnMut(&K) -> bool) -> usize {
        let before = self.entries.len();
        self.entries.retain(|key, _| !predicate(key));
        let removed = before - self.entries.len();
        if removed > 0 {
            self.stats.cancelled += removed as u64;
            debug!(removed, "timers cancelled");
        }
        removed
    }

    /// Whether a timer is pending for `key`.
    pub fn contains(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    /// Number of pending timers.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no timer is pending.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Snapshot of the running counters.
    pub fn stats(&self) -> TimerStats {
        self.stats
    }

    /// Waits for the earliest pending timer and removes it.
    ///
    /// Pends forever while the set is empty.
    pub async fn expired(&mut self) -> Fired<K> {
        loop {
            let Some((key, deadline)) = self.earliest() else {
                std::future::pending::<()>().await;
                continue;
            };

            time::sleep_until(deadline).await;

            if self.entries.remove(&key).is_some() {
                self.stats.fired += 1;
                let late_by = Instant::now().saturating_duration_since(deadline);
                trace!(?key, ?late_by, "timer fired");
                return Fired { key, late_by };
            }
        }
    }

    fn earliest(&self) -> Option<(K, Instant)> {
        self.entries
            .iter()
            .min_by_key(|(_, e)| (e.deadline, e.seq))
            .map(|(k, e)| (k.clone(), e.deadline))
    }
}

impl<K> Default for Timers<K>
where
    K: Eq + Hash + Clone + fmt::Debug,
{
    fn default() -> Self {
        Self::new()
    }
}
