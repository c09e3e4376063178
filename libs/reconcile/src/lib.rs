//! Reconciliation loop primitives.
//!
//! This library provides the vocabulary shared by the controllers that
//! drive declared resources toward running infrastructure. Key concepts:
//!
//! - **Action**: what the trigger mechanism should do after an invocation
//!   (retry now, retry after a delay, or nothing further).
//! - **Progress**: whether a step converged or is waiting on the outside world.
//! - **ErrorClass**: how a failure affects scheduling (retry, give up, re-read).
//!
//! # Invariants
//!
//! - Lower components report a classification; only the resource's
//!   reconciler turns it into an [`Action`]
//! - A key is queued at most once; the earliest due time wins
//! - Nothing in here sleeps or loops; callers own the clock

use std::collections::{BTreeMap, BTreeSet};
use std::time::{Duration, Instant};

/// Outcome of a single reconciliation invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Run again as soon as the trigger mechanism allows.
    Requeue,

    /// Run again once the given delay has elapsed.
    RequeueAfter(Duration),

    /// No further action requested; periodic resync still applies.
    Done,
}

impl Action {
    /// Delay before the next invocation, if one was requested.
    pub fn delay(&self) -> Option<Duration> {
        match self {
            Self::Requeue => Some(Duration::ZERO),
            Self::RequeueAfter(delay) => Some(*delay),
            Self::Done => None,
        }
    }

    /// Returns true if another invocation was requested.
    pub fn is_requeue(&self) -> bool {
        !matches!(self, Self::Done)
    }
}

/// Result of a convergence step that completed without error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Progress {
    /// The step reached its desired state.
    Complete,

    /// The outside world has not caught up yet; try again later.
    Pending { reason: String },
}

impl Progress {
    /// Build a pending result with a human-readable reason.
    pub fn pending(reason: impl Into<String>) -> Self {
        Self::Pending {
            reason: reason.into(),
        }
    }

    /// Returns true if the step converged.
    pub fn is_complete(&self) -> bool {
        matches!(self, Self::Complete)
    }
}

/// Scheduling class of a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Transient; retry after a bounded delay without recording failure.
    Retryable,

    /// Requires operator or owner intervention; record and stop.
    Terminal,

    /// Stale write rejected by the store; re-read and retry immediately.
    Conflict,
}

/// Keyed queue of pending reconciliations.
///
/// Each key appears at most once. Scheduling a key that is already queued
/// keeps whichever due time is earlier, so an immediate trigger is never
/// delayed by an older back-off.
#[derive(Debug, Clone)]
pub struct WorkQueue<K: Ord + Clone> {
    due: BTreeMap<K, Instant>,
}

impl<K: Ord + Clone> Default for WorkQueue<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Ord + Clone> WorkQueue<K> {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self {
            due: BTreeMap::new(),
        }
    }

    /// Schedule `key` to run at `at`.
    pub fn schedule(&mut self, key: K, at: Instant) {
        self.due
            .entry(key)
            .and_modify(|current| {
                if at < *current {
                    *current = at;
                }
            })
            .or_insert(at);
    }

    /// Schedule `key` according to the action returned by its reconciler.
    ///
    /// `Done` falls back to the periodic resync interval.
    pub fn schedule_action(&mut self, key: K, action: Action, now: Instant, resync: Duration) {
        let delay = action.delay().unwrap_or(resync);
        self.schedule(key, now + delay);
    }

    /// Remove and return every key due at or before `now`, in key order.
    pub fn pop_due(&mut self, now: Instant) -> Vec<K> {
        let ready: Vec<K> = self
            .due
            .iter()
            .filter(|(_, at)| **at <= now)
            .map(|(k, _)| k.clone())
            .collect();

        for key in &ready {
            self.due.remove(key);
        }

        ready
    }

    /// Drop keys that are no longer present in `live`.
    pub fn retain_live(&mut self, live: &BTreeSet<K>) {
        self.due.retain(|k, _| live.contains(k));
    }

    /// Returns true if `key` is queued.
    pub fn contains(&self, key: &K) -> bool {
        self.due.contains_key(key)
    }

    /// Due time for `key`, if queued.
    pub fn due_at(&self, key: &K) -> Option<Instant> {
        self.due.get(key).copied()
    }

    /// Number of queued keys.
    pub fn len(&self) -> usize {
        self.due.len()
    }

    /// Returns true if nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.due.is_empty()
    }
}

/// Default periodic resync interval.
pub const DEFAULT_RESYNC_INTERVAL: Duration = Duration::from_secs(30);

/// Default delay before retrying a retryable condition.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(60);

/// Default period of the expiry sweep.
pub const DEFAULT_EXPIRY_INTERVAL: Duration = Duration::from_secs(5 * 60); // 5 minutes

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_delay() {
        assert_eq!(Action::Requeue.delay(), Some(Duration::ZERO));
        assert_eq!(
            Action::RequeueAfter(Duration::from_secs(5)).delay(),
            Some(Duration::from_secs(5))
        );
        assert_eq!(Action::Done.delay(), None);
        assert!(!Action::Done.is_requeue());
    }

    #[test]
    fn test_schedule_keeps_earliest() {
        let now = Instant::now();
        let mut queue = WorkQueue::new();

        queue.schedule("svc-a".to_string(), now + Duration::from_secs(60));
        queue.schedule("svc-a".to_string(), now + Duration::from_secs(5));
        queue.schedule("svc-a".to_string(), now + Duration::from_secs(30));

        assert_eq!(queue.len(), 1);
        assert_eq!(
            queue.due_at(&"svc-a".to_string()),
            Some(now + Duration::from_secs(5))
        );
    }

    #[test]
    fn test_pop_due() {
        let now = Instant::now();
        let mut queue = WorkQueue::new();

        queue.schedule("b", now);
        queue.schedule("a", now);
        queue.schedule("c", now + Duration::from_secs(10));

        assert_eq!(queue.pop_due(now), vec!["a", "b"]);
        assert_eq!(queue.len(), 1);
        assert!(queue.pop_due(now).is_empty());
        assert_eq!(queue.pop_due(now + Duration::from_secs(10)), vec!["c"]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_schedule_action() {
        let now = Instant::now();
        let resync = Duration::from_secs(30);
        let mut queue = WorkQueue::new();

        queue.schedule_action("a", Action::Requeue, now, resync);
        queue.schedule_action("b", Action::RequeueAfter(Duration::from_secs(60)), now, resync);
        queue.schedule_action("c", Action::Done, now, resync);

        assert_eq!(queue.due_at(&"a"), Some(now));
        assert_eq!(queue.due_at(&"b"), Some(now + Duration::from_secs(60)));
        assert_eq!(queue.due_at(&"c"), Some(now + resync));
    }

    #[test]
    fn test_retain_live() {
        let now = Instant::now();
        let mut queue = WorkQueue::new();
        queue.schedule("a", now);
        queue.schedule("gone", now);

        let live: BTreeSet<_> = ["a"].into_iter().collect();
        queue.retain_live(&live);

        assert!(queue.contains(&"a"));
        assert!(!queue.contains(&"gone"));
    }

    #[test]
    fn test_progress() {
        assert!(Progress::Complete.is_complete());
        let pending = Progress::pending("ip not assigned");
        assert!(!pending.is_complete());
        assert_eq!(
            pending,
            Progress::Pending {
                reason: "ip not assigned".to_string()
            }
        );
    }
}
