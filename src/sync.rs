use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use crate::errors::InventoryError;

/// Identity of one ledger row. Ordering is warehouse id then product id;
/// multi-pair operations acquire locks in this order so that two
/// concurrent transfers in opposite directions cannot deadlock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StockKey {
    pub warehouse_id: Uuid,
    pub product_id: Uuid,
}

impl StockKey {
    pub fn new(product_id: Uuid, warehouse_id: Uuid) -> Self {
        Self {
            warehouse_id,
            product_id,
        }
    }
}

/// Holds the acquired pair locks for the duration of a unit of work.
/// Dropping the guard releases every pair at once.
#[derive(Debug)]
pub struct PairGuard {
    _guards: Vec<OwnedMutexGuard<()>>,
}

/// Keyed mutual exclusion over (product, warehouse) pairs.
///
/// Operations on the same pair serialize; operations on different pairs
/// run in parallel. Acquisition is bounded: exceeding the timeout fails
/// with `LockTimeout` and releases anything already held, so a timed-out
/// multi-pair acquisition leaves no partial state.
///
/// Entries are created on first use and kept for the life of the manager;
/// the population is bounded by the (product × warehouse) pairs actually
/// traded.
pub struct PairLockManager {
    locks: DashMap<StockKey, Arc<Mutex<()>>>,
    timeout: Duration,
}

impl PairLockManager {
    pub fn new(timeout: Duration) -> Self {
        Self {
            locks: DashMap::new(),
            timeout,
        }
    }

    fn slot(&self, key: StockKey) -> Arc<Mutex<()>> {
        self.locks
            .entry(key)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    pub async fn acquire(&self, key: StockKey) -> Result<PairGuard, InventoryError> {
        self.acquire_many(&[key]).await
    }

    /// Acquires every distinct key in the fixed global order.
    pub async fn acquire_many(&self, keys: &[StockKey]) -> Result<PairGuard, InventoryError> {
        let mut ordered = keys.to_vec();
        ordered.sort();
        ordered.dedup();

        let mut guards = Vec::with_capacity(ordered.len());
        for key in ordered {
            let slot = self.slot(key);
            let guard = tokio::time::timeout(self.timeout, slot.lock_owned())
                .await
                .map_err(|_| InventoryError::LockTimeout {
                    product_id: key.product_id,
                    warehouse_id: key.warehouse_id,
                    timeout_ms: self.timeout.as_millis() as u64,
                })?;
            guards.push(guard);
        }
        Ok(PairGuard { _guards: guards })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> StockKey {
        StockKey::new(Uuid::new_v4(), Uuid::new_v4())
    }

    #[tokio::test(start_paused = true)]
    async fn contended_pair_times_out() {
        let manager = PairLockManager::new(Duration::from_millis(100));
        let k = key();
        let _held = manager.acquire(k).await.unwrap();

        let err = manager.acquire(k).await.unwrap_err();
        assert!(matches!(err, InventoryError::LockTimeout { .. }));
    }

    #[tokio::test]
    async fn distinct_pairs_do_not_contend() {
        let manager = PairLockManager::new(Duration::from_millis(100));
        let _a = manager.acquire(key()).await.unwrap();
        let _b = manager.acquire(key()).await.unwrap();
    }

    #[tokio::test]
    async fn release_unblocks_next_acquire() {
        let manager = PairLockManager::new(Duration::from_millis(100));
        let k = key();
        let held = manager.acquire(k).await.unwrap();
        drop(held);
        let _again = manager.acquire(k).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn opposite_order_multi_acquires_do_not_deadlock() {
        let manager = Arc::new(PairLockManager::new(Duration::from_secs(5)));
        let a = key();
        let b = key();

        let mut tasks = Vec::new();
        for i in 0..50 {
            let manager = manager.clone();
            let keys = if i % 2 == 0 { [a, b] } else { [b, a] };
            tasks.push(tokio::spawn(async move {
                let _guard = manager.acquire_many(&keys).await.unwrap();
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }
    }

    #[tokio::test(start_paused = true)]
    async fn timed_out_multi_acquire_releases_earlier_pairs() {
        let manager = PairLockManager::new(Duration::from_millis(50));
        let a = key();
        let b = key();
        let first = if a < b { a } else { b };
        let second = if a < b { b } else { a };

        let _held = manager.acquire(second).await.unwrap();
        let err = manager.acquire_many(&[first, second]).await.unwrap_err();
        assert!(matches!(err, InventoryError::LockTimeout { .. }));

        // The first pair must have been released by the failed attempt.
        let _free = manager.acquire(first).await.unwrap();
    }
}
