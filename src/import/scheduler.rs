//! Bounded worker pool for import jobs.
//!
//! Every submitted job runs as its own task but must hold a permit while it
//! processes rows, so at most `max_concurrent_jobs` jobs touch the
//! repositories at once. Excess jobs wait in FIFO order.
//!
//! ```ignore
//! let scheduler = ImportScheduler::new(5);
//! let permit = scheduler.acquire().await;
//! // run the job while holding the permit...
//! drop(permit);
//! ```

use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

// ─────────────────────────────────────────────────────────────────────────────
// ImportScheduler
// ─────────────────────────────────────────────────────────────────────────────

/// Limits the number of import jobs running at the same time.
#[derive(Clone)]
pub struct ImportScheduler {
    sem: Arc<Semaphore>,
    max: usize,
}

impl ImportScheduler {
    /// # Panics
    ///
    /// Panics if `max_concurrent` is 0. `ImportConfig::validate` rejects that
    /// value before a scheduler is built.
    pub fn new(max_concurrent: usize) -> Self {
        assert!(max_concurrent > 0, "max_concurrent must be greater than 0");

        Self {
            sem: Arc::new(Semaphore::new(max_concurrent)),
            max: max_concurrent,
        }
    }

    /// Waits for a free slot.
    ///
    /// Queued jobs still run during shutdown, so the pool is never closed.
    pub async fn acquire(&self) -> ImportPermit {
        let permit = self
            .sem
            .clone()
            .acquire_owned()
            .await
            .unwrap_or_else(|_| unreachable!("import pool semaphore is never closed"));

        ImportPermit { _permit: permit }
    }

    /// Jobs currently holding a slot.
    pub fn active_jobs(&self) -> usize {
        self.max - self.sem.available_permits()
    }
}

/// A running-job slot, released on drop.
pub struct ImportPermit {
    _permit: OwnedSemaphorePermit,
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    #[test]
    #[should_panic(expected = "max_concurrent must be greater than 0")]
    fn test_new_panics_on_zero() {
        let _ = ImportScheduler::new(0);
    }

    #[tokio::test]
    async fn test_permits_are_released_on_drop() {
        let scheduler = ImportScheduler::new(2);

        let first = scheduler.acquire().await;
        let second = scheduler.acquire().await;
        assert_eq!(scheduler.active_jobs(), 2);

        drop(first);
        assert_eq!(scheduler.active_jobs(), 1);
        drop(second);
        assert_eq!(scheduler.active_jobs(), 0);
    }

    #[tokio::test]
    async fn test_acquire_waits_for_a_free_slot() {
        let scheduler = ImportScheduler::new(1);
        let held = scheduler.acquire().await;
        assert_eq!(scheduler.active_jobs(), 1);

        let waiter = scheduler.clone();
        let handle = tokio::spawn(async move { waiter.acquire().await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!handle.is_finished(), "second job should be queued");

        drop(held);
        let _permit = timeout(Duration::from_millis(100), handle)
            .await
            .expect("queued job should start once the slot frees")
            .expect("task should not panic");
        assert_eq!(scheduler.active_jobs(), 1);
    }
}
