//! Remote key/value store abstraction consumed by the cache.
//!
//! Defines [`BackingStore`], the adapter over the slow, rate-limited remote
//! store. A [`Data`](super::Data) instance calls `get()` only to load an
//! unloaded key and `set()` / `update()` / `remove()` only when flushing a
//! dirty one; everything in between is served from the cache.

use std::sync::Arc;

use async_trait::async_trait;
use datacache_core::{PartitionKey, StorageValue};

/// Listener for store-confirmed writes of one key.
///
/// Receives `true` when a value was written and `false` when it was removed.
pub type StoreListener = Arc<dyn Fn(bool) + Send + Sync>;

/// Transform for [`BackingStore::update`].
///
/// Receives the value currently held by the store and returns the value to
/// write, or `None` to leave the key untouched. Stores may invoke it more
/// than once when a concurrent writer wins a race.
pub type UpdateFn = Box<dyn FnMut(Option<&StorageValue>) -> Option<StorageValue> + Send>;

/// Handle identifying a registered [`StoreListener`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

/// Remote persistence backend for [`Data`](super::Data) instances.
///
/// Every call may be slow or fail (network, throttling, outage); failures are
/// reported as `anyhow::Error` and never retried here.
///
/// Used as `Arc<dyn BackingStore>`.
#[async_trait]
pub trait BackingStore: Send + Sync {
    /// Load a single key. Returns `None` if the store holds nothing for it.
    async fn get(&self, partition: &PartitionKey, key: &str)
        -> anyhow::Result<Option<StorageValue>>;

    /// Overwrite a key.
    async fn set(
        &self,
        partition: &PartitionKey,
        key: &str,
        value: &StorageValue,
    ) -> anyhow::Result<()>;

    /// Remove a key.
    async fn remove(&self, partition: &PartitionKey, key: &str) -> anyhow::Result<()>;

    /// Atomic read-modify-write computed by the store itself.
    ///
    /// Returns the value the key holds afterwards.
    async fn update(
        &self,
        partition: &PartitionKey,
        key: &str,
        transform: UpdateFn,
    ) -> anyhow::Result<Option<StorageValue>>;

    /// Register a listener for store-confirmed writes of `key`.
    async fn subscribe(
        &self,
        partition: &PartitionKey,
        key: &str,
        listener: StoreListener,
    ) -> anyhow::Result<SubscriptionId>;

    /// Drop a listener registered with [`subscribe()`](BackingStore::subscribe).
    async fn unsubscribe(
        &self,
        partition: &PartitionKey,
        key: &str,
        id: SubscriptionId,
    ) -> anyhow::Result<()>;

    /// List an ordered partition's entries sorted by numeric value.
    ///
    /// Stores without ordered partitions keep the default, which fails.
    async fn sorted(
        &self,
        partition: &PartitionKey,
        ascending: bool,
        limit: usize,
    ) -> anyhow::Result<Vec<(String, StorageValue)>> {
        let _ = (ascending, limit);
        anyhow::bail!("store does not support ordered queries on {partition}")
    }

    /// Whether writes outlive the process.
    ///
    /// Returns `true` by default. In-memory implementations override to return `false`.
    fn is_persistent(&self) -> bool {
        true
    }
}
