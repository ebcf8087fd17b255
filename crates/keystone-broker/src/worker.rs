//! Bounded pool for subscription callbacks.

use std::future::Future;
use std::num::NonZeroUsize;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

/// Runs callbacks with bounded concurrency.
///
/// [`WorkerPool::execute`] waits for a free worker before spawning, so a
/// subscription that outpaces its handlers stops pulling messages instead
/// of piling up tasks.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    permits: Arc<Semaphore>,
    size: usize,
}

impl WorkerPool {
    /// Creates a pool of `size` workers (at least one).
    #[must_use]
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        Self {
            permits: Arc::new(Semaphore::new(size)),
            size,
        }
    }

    /// Returns `2 * cpus + 1`.
    #[must_use]
    pub fn default_size() -> usize {
        std::thread::available_parallelism().map_or(1, NonZeroUsize::get) * 2 + 1
    }

    /// Returns the number of workers.
    #[must_use]
    pub const fn size(&self) -> usize {
        self.size
    }

    /// Returns how many workers are idle.
    #[must_use]
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Waits for an idle worker and runs `task` on it.
    pub async fn execute<F>(&self, task: F) -> JoinHandle<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        // The semaphore is never closed, so a permit is always granted.
        let permit = Arc::clone(&self.permits).acquire_owned().await.ok();
        tokio::spawn(async move {
            let _permit = permit;
            task.await;
        })
    }
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self::new(Self::default_size())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_default_size() {
        let pool = WorkerPool::default();
        assert!(pool.size() >= 3);
        assert_eq!(pool.size() % 2, 1);
        assert_eq!(WorkerPool::new(0).size(), 1);
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let pool = WorkerPool::new(2);
        let gate = Arc::new(Semaphore::new(0));
        let running = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..2 {
            let gate = Arc::clone(&gate);
            let running = Arc::clone(&running);
            handles.push(
                pool.execute(async move {
                    running.fetch_add(1, Ordering::SeqCst);
                    let _ = gate.acquire().await;
                })
                .await,
            );
        }
        assert_eq!(pool.available(), 0);

        let third = pool.execute(async {});
        tokio::pin!(third);
        assert!(futures::poll!(third.as_mut()).is_pending());

        while running.load(Ordering::SeqCst) < 2 {
            tokio::task::yield_now().await;
        }
        gate.add_permits(2);
        for handle in handles {
            handle.await.unwrap();
        }
        third.await.await.unwrap();
        assert_eq!(pool.available(), 2);
    }
}
