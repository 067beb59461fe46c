//! Tracked background workers with stop-aware spawning.
//!
//! The daemon runs a handful of long-lived consumer loops. A
//! [`WorkerGroup`] tracks them so shutdown can (a) refuse new workers once
//! stopping has begun and (b) wait for in-flight workers, bounded by a
//! caller deadline. Spawning after stop is a logged no-op, not an error.

use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use tokio::task::JoinSet;

struct GroupState {
    stopping: bool,
    join: JoinSet<()>,
}

/// A stoppable group of background tasks.
#[derive(Default)]
pub struct WorkerGroup {
    inner: Mutex<GroupState>,
}

impl Default for GroupState {
    fn default() -> Self {
        Self {
            stopping: false,
            join: JoinSet::new(),
        }
    }
}

impl WorkerGroup {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn a tracked worker. Returns `false` (and logs) if the group is
    /// already stopping; the future is dropped unstarted in that case.
    pub fn spawn<F>(&self, name: &'static str, fut: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut inner = self.inner.lock().expect("worker group lock poisoned");
        if inner.stopping {
            tracing::warn!(worker = name, "refusing to spawn worker during shutdown");
            return false;
        }
        tracing::debug!(worker = name, "spawning background worker");
        inner.join.spawn(fut);
        true
    }

    /// Number of workers that have not yet been reaped.
    pub fn len(&self) -> usize {
        self.inner.lock().expect("worker group lock poisoned").join.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_stopping(&self) -> bool {
        self.inner.lock().expect("worker group lock poisoned").stopping
    }

    /// Begin shutdown and wait for all workers, up to `deadline`.
    ///
    /// Returns `true` when every worker exited in time. On timeout the
    /// stragglers are aborted and `false` is returned.
    pub async fn stop_and_wait(&self, deadline: Duration) -> bool {
        let mut join = {
            let mut inner = self.inner.lock().expect("worker group lock poisoned");
            inner.stopping = true;
            std::mem::take(&mut inner.join)
        };

        let drained = tokio::time::timeout(deadline, async {
            while join.join_next().await.is_some() {}
        })
        .await;

        match drained {
            Ok(()) => true,
            Err(_) => {
                tracing::warn!(
                    remaining = join.len(),
                    "worker group stop deadline expired, aborting stragglers"
                );
                join.abort_all();
                while join.join_next().await.is_some() {}
                false
            }
        }
    }
}
