//! Tracked background work.
//!
//! Relay tasks and post-resolution work (title generation) are spawned through
//! [`BackgroundTasks`] so the server can wait for them before exiting.

// The mutex guards a plain Vec and is never held across an await.
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::task::JoinHandle;
use tracing::{debug, warn};

// ============================================================================
// BackgroundTasks
// ============================================================================

/// Cloneable set of spawned tasks that can be drained on shutdown.
#[derive(Clone, Default)]
pub struct BackgroundTasks {
    label: &'static str,
    handles: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl BackgroundTasks {
    #[must_use]
    pub fn new() -> Self {
        Self::named("background")
    }

    /// Create a task set whose log lines carry `label`.
    #[must_use]
    pub fn named(label: &'static str) -> Self {
        Self {
            label,
            handles: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Spawn `future` on the runtime and track its handle.
    ///
    /// The handle is recorded before this returns, so a task that finishes
    /// immediately is still observed by a concurrent [`shutdown`](Self::shutdown).
    pub fn spawn<F>(&self, future: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(future);
        let mut handles = self.lock();
        handles.retain(|h| !h.is_finished());
        handles.push(handle);
    }

    /// Await every tracked task, including tasks spawned while draining.
    pub async fn shutdown(&self) {
        loop {
            let handles = std::mem::take(&mut *self.lock());
            if handles.is_empty() {
                return;
            }

            debug!(tasks = self.label, count = handles.len(), "Draining background tasks");
            for handle in handles {
                if let Err(e) = handle.await {
                    warn!(tasks = self.label, error = %e, "Background task failed");
                }
            }
        }
    }

    /// Number of tasks that have not finished yet.
    pub fn pending_count(&self) -> usize {
        let mut handles = self.lock();
        handles.retain(|h| !h.is_finished());
        handles.len()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.handles.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn shutdown_waits_for_every_task() {
        let done = Arc::new(AtomicUsize::new(0));
        let tasks = BackgroundTasks::new();

        for delay in [5, 15, 25] {
            let done = done.clone();
            tasks.spawn(async move {
                tokio::time::sleep(Duration::from_millis(delay)).await;
                done.fetch_add(1, Ordering::SeqCst);
            });
        }

        tasks.shutdown().await;
        assert_eq!(done.load(Ordering::SeqCst), 3);
        assert_eq!(tasks.pending_count(), 0);
    }

    #[tokio::test]
    async fn shutdown_drains_tasks_spawned_during_shutdown() {
        let done = Arc::new(AtomicUsize::new(0));
        let tasks = BackgroundTasks::named("nested");

        let inner_tasks = tasks.clone();
        let inner_done = done.clone();
        tasks.spawn(async move {
            let done = inner_done.clone();
            inner_tasks.spawn(async move {
                tokio::time::sleep(Duration::from_millis(10)).await;
                done.fetch_add(1, Ordering::SeqCst);
            });
        });

        tasks.shutdown().await;
        assert_eq!(done.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn panicking_task_does_not_abort_shutdown() {
        let tasks = BackgroundTasks::new();
        tasks.spawn(async { panic!("boom") });
        tasks.shutdown().await;
    }
}
