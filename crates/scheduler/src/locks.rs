//! Per-instance mutual exclusion.

use std::collections::HashMap;
use std::sync::Arc;

use event_store::InstanceId;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Table of per-instance async locks.
///
/// Every operation that reads an instance history and appends to it (a
/// scheduler pass, an outcome recording, a termination) holds the instance
/// lock for the whole read-decide-append sequence. Clones share the table.
#[derive(Clone, Default)]
pub struct InstanceLocks {
    locks: Arc<Mutex<HashMap<InstanceId, Arc<Mutex<()>>>>>,
}

impl InstanceLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits for and returns the lock of one instance.
    pub async fn lock(&self, instance_id: &InstanceId) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            // Drop entries nobody holds or waits on.
            locks.retain(|id, lock| id == instance_id || Arc::strong_count(lock) > 1);
            locks.entry(instance_id.clone()).or_default().clone()
        };
        lock.lock_owned().await
    }

    #[cfg(test)]
    async fn tracked_instances(&self) -> usize {
        self.locks.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn same_instance_is_serialized() {
        let locks = InstanceLocks::new();
        let id = InstanceId::from("a");

        let guard = locks.lock(&id).await;
        let second = tokio::time::timeout(Duration::from_millis(20), locks.lock(&id)).await;
        assert!(second.is_err());

        drop(guard);
        let third = tokio::time::timeout(Duration::from_millis(200), locks.lock(&id)).await;
        assert!(third.is_ok());
    }

    #[tokio::test]
    async fn different_instances_do_not_block() {
        let locks = InstanceLocks::new();

        let _a = locks.lock(&InstanceId::from("a")).await;
        let b = tokio::time::timeout(
            Duration::from_millis(200),
            locks.lock(&InstanceId::from("b")),
        )
        .await;
        assert!(b.is_ok());
    }

    #[tokio::test]
    async fn released_entries_are_pruned() {
        let locks = InstanceLocks::new();
        for i in 0..10 {
            let _guard = locks.lock(&InstanceId::from(format!("i-{i}"))).await;
        }
        assert!(locks.tracked_instances().await <= 1);
    }
}
