//! Process-scoped resources.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use tokio::sync::OnceCell;

/// A value initialized at most once per process and shared by reference.
///
/// Database pools and broker connections live in a `Resource`: the first
/// caller of [`Resource::get_or_try_init`] runs the initializer, concurrent
/// callers wait for it, and everyone receives the same value. A failed
/// initialization leaves the resource empty so a later call can retry.
///
/// Clones share the same cell.
///
/// # Example
///
/// ```rust
/// use keystone_server::Resource;
///
/// # tokio_test::block_on(async {
/// let pool: Resource<String> = Resource::new("pool");
/// let value = pool
///     .get_or_try_init(|| async { Ok::<_, std::io::Error>("connected".to_string()) })
///     .await
///     .unwrap();
/// assert_eq!(value, "connected");
/// assert!(pool.is_initialized());
/// # });
/// ```
pub struct Resource<T> {
    name: &'static str,
    cell: Arc<OnceCell<T>>,
}

impl<T> Resource<T> {
    /// Creates an empty resource.
    #[must_use]
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            cell: Arc::new(OnceCell::new()),
        }
    }

    /// Returns the name used in logs.
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// Returns the value if it has been initialized.
    pub fn get(&self) -> Option<&T> {
        self.cell.get()
    }

    /// Returns `true` once initialized.
    pub fn is_initialized(&self) -> bool {
        self.cell.initialized()
    }

    /// Returns the value, running `init` if nobody has yet.
    pub async fn get_or_try_init<F, Fut, E>(&self, init: F) -> Result<&T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let name = self.name;
        self.cell
            .get_or_try_init(|| async move {
                tracing::info!(resource = name, "Initializing resource");
                init().await
            })
            .await
    }
}

impl<T> Clone for Resource<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name,
            cell: Arc::clone(&self.cell),
        }
    }
}

impl<T> fmt::Debug for Resource<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resource")
            .field("name", &self.name)
            .field("initialized", &self.cell.initialized())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_first_use_initializes_once() {
        let resource: Resource<usize> = Resource::new("pool");
        let inits = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<_> = (0..32)
            .map(|_| {
                let resource = resource.clone();
                let inits = Arc::clone(&inits);
                tokio::spawn(async move {
                    let value = resource
                        .get_or_try_init(|| async {
                            tokio::time::sleep(Duration::from_millis(20)).await;
                            Ok::<_, ()>(inits.fetch_add(1, Ordering::SeqCst) + 100)
                        })
                        .await
                        .copied();
                    value
                })
            })
            .collect();

        for task in tasks {
            assert_eq!(task.await.unwrap(), Ok(100));
        }
        assert_eq!(inits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_init_can_be_retried() {
        let resource: Resource<&str> = Resource::new("broker");

        let err = resource
            .get_or_try_init(|| async { Err::<&str, _>("refused") })
            .await
            .unwrap_err();
        assert_eq!(err, "refused");
        assert!(resource.get().is_none());

        let value = resource
            .get_or_try_init(|| async { Ok::<_, &str>("up") })
            .await
            .unwrap();
        assert_eq!(*value, "up");
    }
}
