//! Per-key mutual exclusion for ledger mutations.
//!
//! Every mutation of a (ship, year) key is serialized through its own
//! mutex; two-key operations acquire both locks in a fixed global order
//! (lexicographic key order) so opposing transfers cannot deadlock. All
//! acquisitions are bounded and fail fast instead of queueing forever.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::error::ComplianceError;
use crate::models::ShipYearKey;

pub struct KeyLocks {
    registry: Mutex<HashMap<ShipYearKey, Arc<AsyncMutex<()>>>>,
    max_wait: Duration,
}

impl KeyLocks {
    pub fn new(max_wait: Duration) -> Self {
        Self {
            registry: Mutex::new(HashMap::new()),
            max_wait,
        }
    }

    fn handle(&self, key: &ShipYearKey) -> Arc<AsyncMutex<()>> {
        let mut registry = self.registry.lock();
        registry.entry(key.clone()).or_default().clone()
    }

    /// Serialize mutations of a single key.
    pub async fn acquire(
        &self,
        key: &ShipYearKey,
    ) -> Result<OwnedMutexGuard<()>, ComplianceError> {
        let handle = self.handle(key);
        tokio::time::timeout(self.max_wait, handle.lock_owned())
            .await
            .map_err(|_| ComplianceError::ConcurrentModification)
    }

    /// Serialize a two-key mutation. Locks are taken in lexicographic key
    /// order regardless of argument order.
    pub async fn acquire_pair(
        &self,
        a: &ShipYearKey,
        b: &ShipYearKey,
    ) -> Result<(OwnedMutexGuard<()>, OwnedMutexGuard<()>), ComplianceError> {
        debug_assert_ne!(a, b, "two-key acquisition requires distinct keys");
        let (first, second) = if a <= b { (a, b) } else { (b, a) };
        let first_guard = self.acquire(first).await?;
        let second_guard = self.acquire(second).await?;
        Ok((first_guard, second_guard))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn contended_key_fails_fast() {
        let locks = KeyLocks::new(Duration::from_millis(50));
        let key = ShipYearKey::new("R001", 2024);

        let _held = locks.acquire(&key).await.unwrap();
        let err = locks.acquire(&key).await.unwrap_err();
        assert!(matches!(err, ComplianceError::ConcurrentModification));
    }

    #[tokio::test]
    async fn pair_acquisition_is_order_independent() {
        let locks = KeyLocks::new(Duration::from_millis(50));
        let a = ShipYearKey::new("R001", 2024);
        let b = ShipYearKey::new("R002", 2024);

        let (ga, gb) = locks.acquire_pair(&a, &b).await.unwrap();
        drop((ga, gb));

        // Opposite argument order acquires the same locks without deadlock.
        let (gb, ga) = locks.acquire_pair(&b, &a).await.unwrap();
        drop((gb, ga));
    }

    #[tokio::test]
    async fn distinct_keys_do_not_contend() {
        let locks = KeyLocks::new(Duration::from_millis(50));
        let _a = locks.acquire(&ShipYearKey::new("R001", 2024)).await.unwrap();
        let _b = locks.acquire(&ShipYearKey::new("R001", 2025)).await.unwrap();
    }
}
