//! Concurrency governor for replication work
//!
//! This crate bounds the number of transfer operations that may be in flight at the same time
//! across a whole replication run, including work that is discovered while the run is already
//! underway (a "file" that turns out to be a subdirectory spawns a new directory replication).
//!
//! # Overview
//!
//! The governor hands out units of work in **batches**. Before a directory dispatches its entries
//! it asks for a batch whose width is `min(max_operations, entries)`:
//!
//! ```rust,no_run
//! use throttle::Governor;
//!
//! # async fn example() {
//! let governor = Governor::new(16);
//! let width = governor.effective_width(40);
//! let mut batch = governor.admit(width).await;
//! while let Some(slot) = batch.take() {
//!     // start a task holding `slot`, the unit is released when the slot is dropped
//!     // or handed back with `batch.restore(slot)` so a queued entry can reuse it
//!     drop(slot);
//! }
//! # }
//! ```
//!
//! # Soft ceiling
//!
//! The governor is built on a fair counting semaphore with `max_operations + 1` units. The extra
//! unit is slack reserved for recursive dispatch: a directory discovered while its parent batch is
//! still in flight can be admitted next to a batch that already uses the full nominal budget. The
//! number of active operations is therefore bounded by `max_operations + 1`, not `max_operations`.
//!
//! Tasks are never blocked individually once their batch has been admitted, and a batch never
//! waits for the directories it discovers, so admission cannot deadlock.
//!
//! # Fairness
//!
//! Admission requests are served in the order they were made. A wide batch waiting for units is
//! not overtaken by narrower requests that arrive later.

mod batch;

pub use batch::{Batch, Slot};

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Units admitted above `max_operations` to keep recursive dispatch from starving.
pub const SLACK: usize = 1;

/// Shared concurrency budget for one replication run.
#[derive(Debug)]
pub struct Governor {
    max_operations: usize,
    capacity: usize,
    sem: Arc<tokio::sync::Semaphore>,
    peak: AtomicUsize,
}

impl Governor {
    /// Creates a governor allowing `max_operations` (plus [`SLACK`]) simultaneous operations.
    ///
    /// # Panics
    ///
    /// Panics if `max_operations` is 0 or does not fit in a `u32`.
    pub fn new(max_operations: usize) -> Self {
        assert!(max_operations > 0, "max_operations must be greater than 0");
        assert!(
            u32::try_from(max_operations + SLACK).is_ok(),
            "max_operations is too large: {max_operations}"
        );
        let capacity = max_operations + SLACK;
        Self {
            max_operations,
            capacity,
            sem: Arc::new(tokio::sync::Semaphore::new(capacity)),
            peak: AtomicUsize::new(0),
        }
    }

    pub fn max_operations(&self) -> usize {
        self.max_operations
    }

    /// Number of units currently reserved by batches or held by slots.
    pub fn active_operations(&self) -> usize {
        self.capacity - self.sem.available_permits()
    }

    /// Highest number of active operations observed right after an admission.
    pub fn peak_operations(&self) -> usize {
        self.peak.load(Ordering::Acquire)
    }

    /// Width of the batch a directory with `entries` entries should ask for.
    pub fn effective_width(&self, entries: usize) -> usize {
        std::cmp::min(self.max_operations, entries)
    }

    /// Waits until `width` units are free and reserves all of them at once.
    ///
    /// A `width` of 0 returns an empty batch without waiting. Widths above `max_operations` are
    /// clamped.
    pub async fn admit(&self, width: usize) -> Batch {
        let width = std::cmp::min(width, self.max_operations);
        if width == 0 {
            return Batch::empty(self.sem.clone());
        }
        tracing::trace!(
            "batch of {} waiting for admission, active operations: {}",
            width,
            self.active_operations()
        );
        // width <= max_operations and the constructor checked that capacity fits in u32
        let units = u32::try_from(width).expect("batch width should fit in u32");
        self.sem
            .acquire_many(units)
            .await
            .expect("governor semaphore is never closed")
            .forget();
        self.record_peak();
        tracing::trace!(
            "batch of {} admitted, active operations: {}",
            width,
            self.active_operations()
        );
        Batch::new(self.sem.clone(), width)
    }

    /// Registers a single unit of work outside of any batch.
    pub async fn acquire(&self) -> Slot {
        self.sem
            .acquire()
            .await
            .expect("governor semaphore is never closed")
            .forget();
        self.record_peak();
        Slot::new(self.sem.clone())
    }

    fn record_peak(&self) {
        self.peak
            .fetch_max(self.active_operations(), Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn effective_width_is_capped() {
        let governor = Governor::new(4);
        assert_eq!(governor.effective_width(0), 0);
        assert_eq!(governor.effective_width(3), 3);
        assert_eq!(governor.effective_width(4), 4);
        assert_eq!(governor.effective_width(50), 4);
    }

    #[tokio::test]
    async fn admit_reserves_and_releases() {
        let governor = Governor::new(4);
        {
            let batch = governor.admit(3).await;
            assert_eq!(batch.available(), 3);
            assert_eq!(governor.active_operations(), 3);
        }
        assert_eq!(governor.active_operations(), 0);
        assert_eq!(governor.peak_operations(), 3);
    }

    #[tokio::test]
    async fn empty_batch_does_not_wait() {
        let governor = Governor::new(1);
        let _slot = governor.acquire().await;
        let _other = governor.acquire().await;
        // both units (max + slack) are taken, an empty batch must still be admitted
        let mut batch = governor.admit(0).await;
        assert!(batch.take().is_none());
        assert_eq!(governor.active_operations(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn admission_allows_one_unit_of_slack() {
        let governor = Governor::new(4);
        let first = governor.acquire().await;
        // 1 active + 4 requested == max + 1
        let batch = governor.admit(4).await;
        assert_eq!(governor.active_operations(), 5);
        drop(batch);
        let _second = governor.acquire().await;
        // 2 active + 4 requested > max + 1
        let blocked = tokio::time::timeout(Duration::from_millis(100), governor.admit(4)).await;
        assert!(blocked.is_err());
        drop(first);
        let admitted = tokio::time::timeout(Duration::from_millis(100), governor.admit(4)).await;
        assert!(admitted.is_ok());
        assert_eq!(governor.peak_operations(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn wide_batch_is_not_overtaken() {
        let governor = Arc::new(Governor::new(4));
        let held = governor.admit(2).await;
        let waiter = {
            let governor = governor.clone();
            tokio::spawn(async move {
                let batch = governor.admit(4).await;
                batch.available()
            })
        };
        // let the wide request queue up
        tokio::task::yield_now().await;
        // 3 units are free, but the wide batch asked first
        let narrow = tokio::time::timeout(Duration::from_millis(100), governor.admit(1)).await;
        assert!(narrow.is_err());
        drop(held);
        assert_eq!(waiter.await.unwrap(), 4);
    }

    #[tokio::test]
    async fn take_and_restore_keep_units_reserved() {
        let governor = Governor::new(4);
        let mut batch = governor.admit(2).await;
        let first = batch.take().unwrap();
        let second = batch.take().unwrap();
        assert!(batch.take().is_none());
        assert_eq!(governor.active_operations(), 2);
        batch.restore(first);
        assert_eq!(batch.available(), 1);
        assert_eq!(governor.active_operations(), 2);
        drop(second);
        assert_eq!(governor.active_operations(), 1);
        drop(batch);
        assert_eq!(governor.active_operations(), 0);
    }

    #[tokio::test]
    async fn slot_released_on_panic() {
        let governor = Arc::new(Governor::new(2));
        let mut batch = governor.admit(2).await;
        let slot = batch.take().unwrap();
        let handle = tokio::spawn(async move {
            let _slot = slot;
            panic!("transfer task failed");
        });
        assert!(handle.await.is_err());
        assert_eq!(governor.active_operations(), 1);
        drop(batch);
        assert_eq!(governor.active_operations(), 0);
    }
}
