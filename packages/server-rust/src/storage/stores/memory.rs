//! In-memory [`BackingStore`] implementation.
//!
//! [`MemoryStore`] keeps everything in a [`DashMap`] and loses it when the
//! process exits. It backs mock mode and tests, so besides the store contract
//! it can simulate the remote store misbehaving: going offline, failing
//! individual keys, and answering slowly. Every call is counted per method.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use datacache_core::{DataMethod, PartitionKey, StorageValue};
use parking_lot::RwLock;

use crate::storage::backing_store::{BackingStore, StoreListener, SubscriptionId, UpdateFn};

type SlotKey = (PartitionKey, String);

/// Non-persistent store for mock mode and tests.
#[derive(Default)]
pub struct MemoryStore {
    entries: DashMap<SlotKey, StorageValue>,
    listeners: DashMap<SlotKey, Vec<(SubscriptionId, StoreListener)>>,
    next_subscription: AtomicU64,
    offline: AtomicBool,
    failing_keys: RwLock<HashSet<String>>,
    latency: RwLock<Duration>,
    calls: DashMap<DataMethod, u64>,
}

impl MemoryStore {
    /// Creates a new, empty, online store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every call fail (`true`) or succeed again (`false`).
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Makes every call touching `key` fail until [`heal_key`](Self::heal_key).
    pub fn fail_key(&self, key: &str) {
        self.failing_keys.write().insert(key.to_string());
    }

    /// Stops failing calls for `key`.
    pub fn heal_key(&self, key: &str) {
        self.failing_keys.write().remove(key);
    }

    /// Delays every call by `latency` before it takes effect.
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.write() = latency;
    }

    /// Number of calls made for `method`, successful or not.
    #[must_use]
    pub fn calls(&self, method: DataMethod) -> u64 {
        self.calls.get(&method).map_or(0, |count| *count)
    }

    /// Raw stored value, bypassing latency, faults and counters.
    #[must_use]
    pub fn peek(&self, partition: &PartitionKey, key: &str) -> Option<StorageValue> {
        self.entries
            .get(&(partition.clone(), key.to_string()))
            .map(|v| v.clone())
    }

    /// Seeds a value without notifying listeners or counting a call.
    pub fn seed(&self, partition: &PartitionKey, key: &str, value: StorageValue) {
        self.entries
            .insert((partition.clone(), key.to_string()), value);
    }

    /// Number of stored keys across all partitions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the store holds no keys.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of live store subscriptions on `key`.
    #[must_use]
    pub fn listener_count(&self, partition: &PartitionKey, key: &str) -> usize {
        self.listeners
            .get(&(partition.clone(), key.to_string()))
            .map_or(0, |list| list.len())
    }

    /// Counts the call, waits out the configured latency, then applies faults.
    async fn enter(&self, method: DataMethod, key: Option<&str>) -> anyhow::Result<()> {
        *self.calls.entry(method).or_insert(0) += 1;

        let latency = *self.latency.read();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        self.check_faults(key)
    }

    fn check_faults(&self, key: Option<&str>) -> anyhow::Result<()> {
        if self.offline.load(Ordering::SeqCst) {
            anyhow::bail!("store unavailable");
        }
        if let Some(key) = key {
            if self.failing_keys.read().contains(key) {
                anyhow::bail!("request for key {key:?} rejected by store");
            }
        }
        Ok(())
    }

    fn notify(&self, slot: &SlotKey, is_saved: bool) {
        // Clone out of the map so listeners run without holding a shard lock.
        let listeners: Vec<StoreListener> = self
            .listeners
            .get(slot)
            .map(|list| list.iter().map(|(_, l)| l.clone()).collect())
            .unwrap_or_default();
        for listener in listeners {
            listener(is_saved);
        }
    }
}

#[async_trait]
impl BackingStore for MemoryStore {
    async fn get(
        &self,
        partition: &PartitionKey,
        key: &str,
    ) -> anyhow::Result<Option<StorageValue>> {
        self.enter(DataMethod::Get, Some(key)).await?;
        Ok(self.peek(partition, key))
    }

    async fn set(
        &self,
        partition: &PartitionKey,
        key: &str,
        value: &StorageValue,
    ) -> anyhow::Result<()> {
        self.enter(DataMethod::Set, Some(key)).await?;
        let slot = (partition.clone(), key.to_string());
        self.entries.insert(slot.clone(), value.clone());
        self.notify(&slot, true);
        Ok(())
    }

    async fn remove(&self, partition: &PartitionKey, key: &str) -> anyhow::Result<()> {
        self.enter(DataMethod::Remove, Some(key)).await?;
        let slot = (partition.clone(), key.to_string());
        self.entries.remove(&slot);
        self.notify(&slot, false);
        Ok(())
    }

    async fn update(
        &self,
        partition: &PartitionKey,
        key: &str,
        mut transform: UpdateFn,
    ) -> anyhow::Result<Option<StorageValue>> {
        self.enter(DataMethod::Update, Some(key)).await?;
        let slot = (partition.clone(), key.to_string());

        // The shard lock makes read-transform-write atomic, so the transform
        // runs exactly once here.
        let written = {
            let entry = self.entries.entry(slot.clone());
            let current = match &entry {
                Entry::Occupied(occupied) => Some(occupied.get().clone()),
                Entry::Vacant(_) => None,
            };
            let Some(next) = transform(current.as_ref()) else {
                return Ok(current);
            };
            entry.insert(next.clone());
            Some(next)
        };

        self.notify(&slot, true);
        Ok(written)
    }

    async fn subscribe(
        &self,
        partition: &PartitionKey,
        key: &str,
        listener: StoreListener,
    ) -> anyhow::Result<SubscriptionId> {
        self.enter(DataMethod::OnUpdate, Some(key)).await?;
        let id = SubscriptionId(self.next_subscription.fetch_add(1, Ordering::Relaxed));
        self.listeners
            .entry((partition.clone(), key.to_string()))
            .or_default()
            .push((id, listener));
        Ok(id)
    }

    async fn unsubscribe(
        &self,
        partition: &PartitionKey,
        key: &str,
        id: SubscriptionId,
    ) -> anyhow::Result<()> {
        // Not counted: `DataMethod` has no unsubscribe operation.
        self.check_faults(Some(key))?;
        let slot = (partition.clone(), key.to_string());
        if let Some(mut list) = self.listeners.get_mut(&slot) {
            list.retain(|(existing, _)| *existing != id);
        }
        self.listeners.remove_if(&slot, |_, list| list.is_empty());
        Ok(())
    }

    async fn sorted(
        &self,
        partition: &PartitionKey,
        ascending: bool,
        limit: usize,
    ) -> anyhow::Result<Vec<(String, StorageValue)>> {
        if !partition.is_ordered() {
            anyhow::bail!("partition {partition} is not ordered");
        }
        self.enter(DataMethod::Get, None).await?;

        let mut rows: Vec<(f64, String, StorageValue)> = self
            .entries
            .iter()
            .filter(|entry| entry.key().0 == *partition)
            .filter_map(|entry| {
                let score = entry.value().as_f64()?;
                Some((score, entry.key().1.clone(), entry.value().clone()))
            })
            .collect();

        rows.sort_by(|a, b| a.0.total_cmp(&b.0).then_with(|| a.1.cmp(&b.1)));
        if !ascending {
            rows.reverse();
        }
        Ok(rows
            .into_iter()
            .take(limit)
            .map(|(_, key, value)| (key, value))
            .collect())
    }

    fn is_persistent(&self) -> bool {
        false
    }
}
