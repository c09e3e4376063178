//! Controller worker: drives a reconciler from a keyed work queue.
//!
//! Each tick lists the live keys, queues any key not already queued, then
//! runs every due key once. Keys due in the same tick run concurrently; a
//! key is never run twice at the same time because it leaves the queue
//! while its invocation is in flight.

use std::collections::BTreeSet;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures_util::future::join_all;
use pac_reconcile::{Action, WorkQueue, DEFAULT_RESYNC_INTERVAL};
use tokio::sync::watch;
use tracing::{debug, error, info, instrument};

use crate::error::Result;

/// A reconciler the worker can drive.
#[async_trait]
pub trait Reconcile: Send + Sync {
    /// Resource kind, for logging.
    fn kind(&self) -> &'static str;

    /// Names of every resource that currently exists.
    async fn keys(&self) -> Result<Vec<String>>;

    /// Run one invocation. Never fails: failures are folded into the action.
    async fn reconcile(&self, key: &str) -> Action;
}

#[derive(Debug, Clone)]
pub struct ControllerWorkerConfig {
    /// How often the queue is checked.
    pub tick: Duration,

    /// Delay before re-running a key whose last invocation returned `Done`.
    pub resync_interval: Duration,
}

impl Default for ControllerWorkerConfig {
    fn default() -> Self {
        Self {
            tick: Duration::from_secs(1),
            resync_interval: DEFAULT_RESYNC_INTERVAL,
        }
    }
}

pub struct ControllerWorker<R> {
    reconciler: R,
    config: ControllerWorkerConfig,
}

impl<R: Reconcile> ControllerWorker<R> {
    pub fn new(reconciler: R, config: ControllerWorkerConfig) -> Self {
        Self { reconciler, config }
    }

    /// Run until shutdown is signaled.
    #[instrument(skip(self, shutdown), fields(kind = self.reconciler.kind()))]
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            tick_ms = self.config.tick.as_millis() as u64,
            resync_secs = self.config.resync_interval.as_secs(),
            "Starting controller worker"
        );

        let mut queue = WorkQueue::new();
        let mut interval = tokio::time::interval(self.config.tick);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.run_pass(&mut queue, Instant::now()).await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Controller worker shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// Run every key due at `now`. Returns the number of invocations.
    pub async fn run_pass(&self, queue: &mut WorkQueue<String>, now: Instant) -> usize {
        let keys = match self.reconciler.keys().await {
            Ok(keys) => keys,
            Err(e) => {
                error!(kind = self.reconciler.kind(), error = %e, "Failed to list resources");
                return 0;
            }
        };

        let live: BTreeSet<String> = keys.into_iter().collect();
        queue.retain_live(&live);
        for key in live {
            if !queue.contains(&key) {
                queue.schedule(key, now);
            }
        }

        let due = queue.pop_due(now);
        if due.is_empty() {
            return 0;
        }
        debug!(kind = self.reconciler.kind(), count = due.len(), "Reconciling due resources");

        let started = tokio::time::Instant::now();
        let outcomes = join_all(due.into_iter().map(|key| async move {
            let action = self.reconciler.reconcile(&key).await;
            (key, action, started.elapsed())
        }))
        .await;

        // Delays count from when each invocation finished.
        let ran = outcomes.len();
        for (key, action, elapsed) in outcomes {
            queue.schedule_action(key, action, now + elapsed, self.config.resync_interval);
        }
        ran
    }
}
