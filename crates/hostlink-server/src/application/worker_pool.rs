//! Bounded pool for broadcast fan-out and parallel batch sub-requests.
//!
//! The pool does not own threads.  It is a [`Semaphore`] with `max_workers`
//! permits in front of the Tokio runtime: every job waits for a permit before
//! it runs, so at most `max_workers` jobs are in flight no matter how many
//! sessions submit work at once.

use std::future::Future;
use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

/// Cheaply clonable handle to the shared pool.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    permits: Arc<Semaphore>,
    max_workers: usize,
    runtime: Handle,
}

impl WorkerPool {
    /// Creates a pool running jobs on `runtime`.  `max_workers` is clamped to
    /// at least one.
    pub fn new(max_workers: usize, runtime: Handle) -> Self {
        let max_workers = max_workers.max(1);
        Self {
            permits: Arc::new(Semaphore::new(max_workers)),
            max_workers,
            runtime,
        }
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    /// Permits not currently held by a running job.
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Runs an async job once a permit is free.  Returns immediately.
    pub fn spawn<F>(&self, job: F) -> JoinHandle<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let permits = Arc::clone(&self.permits);
        self.runtime.spawn(async move {
            // The semaphore is never closed, so acquisition only fails if the
            // pool is being torn down; the job is skipped in that case.
            if let Ok(_permit) = permits.acquire_owned().await {
                job.await;
            }
        })
    }

    /// Runs a blocking closure on the runtime's blocking threads once a
    /// permit is free.
    ///
    /// Resolves to `None` if the closure panicked.
    pub fn spawn_blocking<F, R>(&self, job: F) -> JoinHandle<Option<R>>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        let permits = Arc::clone(&self.permits);
        self.runtime.spawn(async move {
            let permit = permits.acquire_owned().await.ok()?;
            let result = tokio::task::spawn_blocking(job).await.ok();
            drop(permit);
            result
        })
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_max_workers_is_at_least_one() {
        let pool = WorkerPool::new(0, Handle::current());
        assert_eq!(pool.max_workers(), 1);
    }

    #[tokio::test]
    async fn test_spawn_blocking_returns_closure_result() {
        let pool = WorkerPool::new(2, Handle::current());
        let result = pool.spawn_blocking(|| 21 * 2).await.unwrap();
        assert_eq!(result, Some(42));
    }

    #[tokio::test]
    async fn test_spawn_blocking_reports_panic_as_none() {
        let pool = WorkerPool::new(2, Handle::current());
        let result = pool.spawn_blocking(|| -> u8 { panic!("boom") }).await.unwrap();
        assert_eq!(result, None);
        assert_eq!(pool.available(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrency_never_exceeds_max_workers() {
        // Arrange
        let pool = WorkerPool::new(2, Handle::current());
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        // Act
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let running = Arc::clone(&running);
                let peak = Arc::clone(&peak);
                pool.spawn_blocking(move || {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    std::thread::sleep(Duration::from_millis(20));
                    running.fetch_sub(1, Ordering::SeqCst);
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }

        // Assert
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_spawn_runs_async_job() {
        let pool = WorkerPool::new(1, Handle::current());
        let (tx, rx) = tokio::sync::oneshot::channel();
        pool.spawn(async move {
            let _ = tx.send(7);
        });
        assert_eq!(rx.await.unwrap(), 7);
    }
}
