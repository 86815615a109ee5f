use std::sync::Arc;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use datacache_core::PartitionKey;

use crate::error::DataError;
use crate::storage::{Lifecycle, SaveReport};

// ---------------------------------------------------------------------------
// ManagedData trait
// ---------------------------------------------------------------------------

/// Type-erased view of a data instance, as seen by the auto-save scheduler.
///
/// Every `Data<V>` implements this regardless of its value type, so one
/// registry can hold instances of different shapes.
#[async_trait]
pub trait ManagedData: Send + Sync {
    /// The partition the instance fronts; unique among live instances.
    fn partition(&self) -> &PartitionKey;

    /// Whether auto-save sweeps include this instance.
    fn can_auto_save(&self) -> bool;

    /// Whether the instance is torn down when its player leaves.
    fn destroy_on_leave(&self) -> bool;

    /// Number of dirty keys.
    fn dirty_count(&self) -> usize;

    fn lifecycle(&self) -> Lifecycle;

    /// Stop accepting operations ahead of teardown. Returns `false` if
    /// another caller already started it.
    fn begin_close(&self) -> bool;

    /// Save every dirty key once. Works while closing; a closed instance
    /// reports nothing.
    async fn flush(&self) -> SaveReport;

    /// Finish teardown (final save, `on_close` callbacks), starting it first
    /// if needed. Idempotent.
    async fn close(&self) -> SaveReport;
}

// ---------------------------------------------------------------------------
// DataRegistry
// ---------------------------------------------------------------------------

/// Live data instances, keyed by partition.
///
/// At most one instance per partition: registering a second one fails with
/// [`DataError::DuplicatePartition`] while the first is open and with
/// [`DataError::Releasing`] while it is closing. A closed one is replaced.
/// Closed instances are also pruned whenever a snapshot is taken.
pub struct DataRegistry {
    instances: DashMap<PartitionKey, Arc<dyn ManagedData>>,
}

impl DataRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            instances: DashMap::new(),
        }
    }

    /// Register an instance under its partition.
    ///
    /// # Errors
    ///
    /// [`DataError::DuplicatePartition`] if an open instance already holds
    /// the partition; [`DataError::Releasing`] if one is still closing.
    pub fn register(&self, instance: Arc<dyn ManagedData>) -> Result<(), DataError> {
        let entry = self.instances.entry(instance.partition().clone());
        if let Entry::Occupied(existing) = &entry {
            let partition = existing.key().to_string();
            match existing.get().lifecycle() {
                Lifecycle::Open => return Err(DataError::DuplicatePartition { partition }),
                Lifecycle::Closing => return Err(DataError::Releasing { partition }),
                Lifecycle::Closed => {}
            }
        }
        entry.insert(instance);
        Ok(())
    }

    /// Remove and return the instance registered under `partition`.
    pub fn remove(&self, partition: &PartitionKey) -> Option<Arc<dyn ManagedData>> {
        self.instances.remove(partition).map(|(_, instance)| instance)
    }

    /// Remove the entry under `partition` if its instance has finished
    /// closing. Returns whether anything was removed.
    pub fn remove_closed(&self, partition: &PartitionKey) -> bool {
        self.instances
            .remove_if(partition, |_, instance| instance.lifecycle() == Lifecycle::Closed)
            .is_some()
    }

    pub fn get(&self, partition: &PartitionKey) -> Option<Arc<dyn ManagedData>> {
        self.instances.get(partition).map(|entry| entry.value().clone())
    }

    #[must_use]
    pub fn contains(&self, partition: &PartitionKey) -> bool {
        self.instances.contains_key(partition)
    }

    /// Open and closing instances, ordered by partition. Drops closed ones
    /// first.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Arc<dyn ManagedData>> {
        self.instances
            .retain(|_, instance| instance.lifecycle() != Lifecycle::Closed);
        let mut live: Vec<Arc<dyn ManagedData>> = self
            .instances
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        live.sort_by_cached_key(|instance| instance.partition().to_string());
        live
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.instances.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }
}

impl Default for DataRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use parking_lot::Mutex;

    use super::*;

    struct FakeData {
        partition: PartitionKey,
        lifecycle: Mutex<Lifecycle>,
    }

    impl FakeData {
        fn new(scope: &str) -> Arc<Self> {
            Arc::new(Self {
                partition: PartitionKey::new("Players", scope, false).unwrap(),
                lifecycle: Mutex::new(Lifecycle::Open),
            })
        }
    }

    #[async_trait]
    impl ManagedData for FakeData {
        fn partition(&self) -> &PartitionKey {
            &self.partition
        }

        fn can_auto_save(&self) -> bool {
            true
        }

        fn destroy_on_leave(&self) -> bool {
            false
        }

        fn dirty_count(&self) -> usize {
            0
        }

        fn lifecycle(&self) -> Lifecycle {
            *self.lifecycle.lock()
        }

        fn begin_close(&self) -> bool {
            let mut lifecycle = self.lifecycle.lock();
            if *lifecycle != Lifecycle::Open {
                return false;
            }
            *lifecycle = Lifecycle::Closing;
            true
        }

        async fn flush(&self) -> SaveReport {
            SaveReport::default()
        }

        async fn close(&self) -> SaveReport {
            *self.lifecycle.lock() = Lifecycle::Closed;
            SaveReport::default()
        }
    }

    #[test]
    fn register_and_lookup() {
        let registry = DataRegistry::new();
        let instance = FakeData::new("player_1");
        registry.register(instance.clone()).unwrap();

        assert_eq!(registry.len(), 1);
        assert!(registry.contains(&instance.partition));
        assert!(registry.get(&instance.partition).is_some());
    }

    #[test]
    fn duplicate_live_partition_is_rejected() {
        let registry = DataRegistry::new();
        registry.register(FakeData::new("server")).unwrap();

        let err = registry.register(FakeData::new("server")).unwrap_err();
        assert!(matches!(err, DataError::DuplicatePartition { .. }));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn closing_partition_stays_reserved() {
        let registry = DataRegistry::new();
        let leaving = FakeData::new("player_2");
        registry.register(leaving.clone()).unwrap();
        assert!(leaving.begin_close());

        let err = registry.register(FakeData::new("player_2")).unwrap_err();
        assert!(matches!(err, DataError::Releasing { .. }));
        assert!(err.is_retryable());
        // Not closed yet, so nothing to remove.
        assert!(!registry.remove_closed(&leaving.partition));
        assert_eq!(registry.snapshot().len(), 1);
    }

    #[tokio::test]
    async fn closed_partition_can_be_replaced() {
        let registry = DataRegistry::new();
        let first = FakeData::new("player_7");
        registry.register(first.clone()).unwrap();
        first.close().await;

        let second = FakeData::new("player_7");
        registry.register(second.clone()).unwrap();
        let current = registry.get(&second.partition).unwrap();
        assert_eq!(current.lifecycle(), Lifecycle::Open);
    }

    #[tokio::test]
    async fn snapshot_prunes_closed_and_sorts() {
        let registry = DataRegistry::new();
        let b = FakeData::new("b");
        let a = FakeData::new("a");
        let c = FakeData::new("c");
        registry.register(b.clone()).unwrap();
        registry.register(a.clone()).unwrap();
        registry.register(c.clone()).unwrap();
        c.close().await;

        let live = registry.snapshot();
        let scopes: Vec<&str> = live.iter().map(|i| i.partition().scope()).collect();
        assert_eq!(scopes, vec!["a", "b"]);
        assert_eq!(registry.len(), 2);
    }

    #[tokio::test]
    async fn remove_and_remove_closed() {
        let registry = DataRegistry::new();
        let a = FakeData::new("a");
        let b = FakeData::new("b");
        registry.register(a.clone()).unwrap();
        registry.register(b.clone()).unwrap();

        assert!(registry.remove(&a.partition).is_some());
        assert!(registry.remove(&a.partition).is_none());

        b.close().await;
        assert!(registry.remove_closed(&b.partition));
        assert!(registry.is_empty());
    }
}
