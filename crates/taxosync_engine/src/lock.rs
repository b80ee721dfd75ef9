//! Per-dataset exclusion lock.

use crate::config::LockPolicy;
use crate::error::{SyncError, SyncResult};
use parking_lot::{Condvar, Mutex};
use std::collections::HashSet;
use std::time::Instant;
use taxosync_model::DatasetId;

/// Tracks which datasets have a run in flight.
///
/// At most one [`DatasetGuard`] exists per dataset; runs on different
/// datasets never wait for each other.
#[derive(Debug, Default)]
pub struct DatasetLocks {
    held: Mutex<HashSet<DatasetId>>,
    released: Condvar,
}

impl DatasetLocks {
    /// Creates an empty lock table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Takes the dataset lock without waiting.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::LockContention`] if the dataset is held.
    pub fn try_acquire(&self, dataset: DatasetId) -> SyncResult<DatasetGuard<'_>> {
        let mut held = self.held.lock();
        if !held.insert(dataset) {
            return Err(SyncError::LockContention { dataset });
        }
        Ok(DatasetGuard {
            locks: self,
            dataset,
        })
    }

    /// Takes the dataset lock according to `policy`.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::LockContention`] if the dataset is still held
    /// when the policy gives up.
    pub fn acquire(&self, dataset: DatasetId, policy: LockPolicy) -> SyncResult<DatasetGuard<'_>> {
        let wait = match policy {
            LockPolicy::FailFast => return self.try_acquire(dataset),
            LockPolicy::Wait(wait) => wait,
        };

        let deadline = Instant::now() + wait;
        let mut held = self.held.lock();
        while held.contains(&dataset) {
            if self.released.wait_until(&mut held, deadline).timed_out() && held.contains(&dataset) {
                return Err(SyncError::LockContention { dataset });
            }
        }
        held.insert(dataset);
        Ok(DatasetGuard {
            locks: self,
            dataset,
        })
    }

    /// Returns true if a run holds the dataset.
    #[must_use]
    pub fn is_locked(&self, dataset: DatasetId) -> bool {
        self.held.lock().contains(&dataset)
    }

    fn release(&self, dataset: DatasetId) {
        self.held.lock().remove(&dataset);
        self.released.notify_all();
    }
}

/// Holds a dataset lock; dropping it releases the dataset.
#[derive(Debug)]
pub struct DatasetGuard<'a> {
    locks: &'a DatasetLocks,
    dataset: DatasetId,
}

impl DatasetGuard<'_> {
    /// Returns the locked dataset.
    #[must_use]
    pub fn dataset(&self) -> DatasetId {
        self.dataset
    }
}

impl Drop for DatasetGuard<'_> {
    fn drop(&mut self) {
        self.locks.release(self.dataset);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn lock_prevents_second_holder() {
        let locks = DatasetLocks::new();
        let ds = DatasetId::new(1);
        let _guard = locks.try_acquire(ds).unwrap();

        let err = locks.try_acquire(ds).unwrap_err();
        assert!(matches!(err, SyncError::LockContention { dataset } if dataset == ds));
        assert!(locks.try_acquire(DatasetId::new(2)).is_ok());
    }

    #[test]
    fn lock_released_on_drop() {
        let locks = DatasetLocks::new();
        let ds = DatasetId::new(1);
        {
            let guard = locks.try_acquire(ds).unwrap();
            assert_eq!(guard.dataset(), ds);
            assert!(locks.is_locked(ds));
        }
        assert!(!locks.is_locked(ds));
        assert!(locks.try_acquire(ds).is_ok());
    }

    #[test]
    fn bounded_wait_gives_up() {
        let locks = DatasetLocks::new();
        let ds = DatasetId::new(1);
        let _guard = locks.try_acquire(ds).unwrap();

        let started = Instant::now();
        let err = locks
            .acquire(ds, LockPolicy::Wait(Duration::from_millis(50)))
            .unwrap_err();
        assert!(err.is_lock_contention());
        assert!(started.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn waiter_gets_lock_after_release() {
        let locks = Arc::new(DatasetLocks::new());
        let ds = DatasetId::new(3);
        let guard = locks.try_acquire(ds).unwrap();

        let waiter = {
            let locks = Arc::clone(&locks);
            thread::spawn(move || {
                locks
                    .acquire(ds, LockPolicy::Wait(Duration::from_secs(5)))
                    .map(|g| g.dataset())
            })
        };
        thread::sleep(Duration::from_millis(20));
        drop(guard);

        assert_eq!(waiter.join().unwrap().unwrap(), ds);
    }
}
