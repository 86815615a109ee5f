//! Write-back cache over one store partition.
//!
//! [`Data`] fronts a single `(name, scope)` partition of a [`BackingStore`].
//! Reads are served from the cache once a key is loaded; writes mutate the
//! cache and mark the key dirty; dirty keys reach the store only through
//! [`save()`](Data::save) / [`save_all()`](Data::save_all), the auto-save
//! scheduler, or teardown.
//!
//! Store calls are coalesced per key: at most one load and one save are in
//! flight at a time, and concurrent callers await the same shared future.
//! Loads and saves run as spawned tasks, so they finish and update the cache
//! even if every caller stops waiting.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use datacache_core::partition::validate_key;
use datacache_core::{DataMethod, Incrementable, PartitionKey, StorageValue};
use futures_util::future::{join_all, FutureExt};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::DataConfig;
use crate::error::DataError;
use crate::metrics;
use crate::scheduler::ManagedData;
use crate::storage::backing_store::{BackingStore, StoreListener, SubscriptionId};
use crate::storage::entry::{CacheEntry, InflightSave, SharedLoad, SharedSave};
use crate::storage::signal::{DataFailure, DataSuccess, Signal};

/// Values a [`Data`] instance can cache: cloneable, `MsgPack`-serializable,
/// and shareable across tasks.
pub trait CacheValue: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {}

impl<T> CacheValue for T where T: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {}

/// How a dirty value is written back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SaveMode {
    /// Plain `set`.
    #[default]
    Overwrite,
    /// The store's atomic read-modify-write `update`.
    AtomicUpdate,
}

/// Outcome of saving a set of keys.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SaveReport {
    /// Keys confirmed persisted.
    pub saved: Vec<String>,
    /// Keys whose save failed, still dirty.
    pub failed: Vec<(String, DataError)>,
    /// Some keys were skipped because persistence is suppressed.
    pub suppressed: bool,
}

impl SaveReport {
    /// Returns `true` if no key failed.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }

    /// Folds several reports into one.
    #[must_use]
    pub fn combine(reports: impl IntoIterator<Item = SaveReport>) -> SaveReport {
        let mut combined = SaveReport::default();
        for report in reports {
            combined.merge(report);
        }
        combined
    }

    fn merge(&mut self, other: SaveReport) {
        self.saved.extend(other.saved);
        self.failed.extend(other.failed);
        self.suppressed |= other.suppressed;
    }
}

const OPEN: u8 = 0;
const CLOSING: u8 = 1;
const CLOSED: u8 = 2;

/// Teardown progress of a [`Data`] instance.
///
/// State machine: Open -> Closing -> Closed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    /// Accepting operations.
    Open,
    /// Teardown started: operations are rejected, final saves are running.
    Closing,
    /// Teardown finished; the cache is discarded.
    Closed,
}

type CloseCallback = Box<dyn FnOnce() + Send>;

enum LoadStep<V> {
    Ready(Option<V>),
    Pending(SharedLoad<V>),
}

enum SaveStep {
    Clean,
    Suppressed,
    Pending { future: SharedSave, issued: bool },
}

enum SaveOutcome {
    Clean,
    Saved,
    Suppressed,
}

struct DataInner<V> {
    partition: PartitionKey,
    store: Arc<dyn BackingStore>,
    config: Arc<DataConfig>,
    entries: DashMap<String, CacheEntry<V>>,
    can_auto_save: AtomicBool,
    destroy_on_leave: AtomicBool,
    atomic_update: AtomicBool,
    lifecycle: AtomicU8,
    // Set by whichever caller runs the final teardown steps.
    finishing: AtomicBool,
    success: Signal<DataSuccess>,
    failed: Signal<DataFailure>,
    // `None` once the callbacks have run.
    on_close: Mutex<Option<Vec<CloseCallback>>>,
    subscriptions: Mutex<Vec<(String, SubscriptionId)>>,
}

/// Write-back cache for one store partition.
///
/// Cheap to clone; clones share the same cache.
pub struct Data<V> {
    inner: Arc<DataInner<V>>,
}

impl<V> Clone for Data<V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<V> std::fmt::Debug for Data<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Data")
            .field("partition", &self.inner.partition)
            .finish_non_exhaustive()
    }
}

impl<V: CacheValue> Data<V> {
    /// Creates an open instance with auto-save enabled, `destroy_on_leave`
    /// off and [`SaveMode::Overwrite`].
    ///
    /// Most callers go through [`DataFactory`](super::DataFactory), which also
    /// registers the instance with the auto-save scheduler.
    #[must_use]
    pub fn new(
        partition: PartitionKey,
        store: Arc<dyn BackingStore>,
        config: Arc<DataConfig>,
    ) -> Self {
        Self {
            inner: Arc::new(DataInner {
                partition,
                store,
                config,
                entries: DashMap::new(),
                can_auto_save: AtomicBool::new(true),
                destroy_on_leave: AtomicBool::new(false),
                atomic_update: AtomicBool::new(false),
                lifecycle: AtomicU8::new(OPEN),
                finishing: AtomicBool::new(false),
                success: Signal::new(),
                failed: Signal::new(),
                on_close: Mutex::new(Some(Vec::new())),
                subscriptions: Mutex::new(Vec::new()),
            }),
        }
    }

    /// The partition this instance fronts.
    #[must_use]
    pub fn partition(&self) -> &PartitionKey {
        &self.inner.partition
    }

    /// Reads `key`, loading it from the store on first access.
    ///
    /// # Errors
    ///
    /// [`DataError::Load`] if the key is not cached and the store call fails.
    pub async fn get(&self, key: &str) -> Result<Option<V>, DataError> {
        self.inner.ensure_open()?;
        validate_key(key)?;
        self.inner.read(key, None).await
    }

    /// Reads `key`, falling back to `default` when it holds nothing.
    ///
    /// If this call triggers the load and the store is empty, `default` is
    /// cached (clean). An already-loaded absent key returns `default` without
    /// caching it.
    ///
    /// # Errors
    ///
    /// [`DataError::Load`] if the key is not cached and the store call fails.
    pub async fn get_or(&self, key: &str, default: V) -> Result<V, DataError> {
        self.inner.ensure_open()?;
        validate_key(key)?;
        let value = self.inner.read(key, Some(default.clone())).await?;
        Ok(value.unwrap_or(default))
    }

    /// Replaces the cached value of `key` and marks it dirty.
    ///
    /// An unloaded key is loaded first, so a store outage rejects the write
    /// instead of letting it overwrite state the cache has never seen. Does
    /// not wait for persistence.
    ///
    /// # Errors
    ///
    /// [`DataError::Load`] if the key had to be loaded and the load failed;
    /// the cache is left untouched.
    pub async fn set(&self, key: &str, value: V) -> Result<(), DataError> {
        self.write(key, Some(value)).await
    }

    /// Clears `key`; its next save removes it from the store.
    ///
    /// # Errors
    ///
    /// Same as [`set()`](Self::set).
    pub async fn delete(&self, key: &str) -> Result<(), DataError> {
        self.write(key, None).await
    }

    async fn write(&self, key: &str, value: Option<V>) -> Result<(), DataError> {
        self.inner.ensure_open()?;
        validate_key(key)?;
        self.inner.read(key, None).await?;
        self.inner.mutate(key, |entry| {
            entry.value = value;
            Ok(())
        })
    }

    /// Flags `key` dirty without changing its value.
    ///
    /// For callers that changed a cached value in place.
    ///
    /// # Errors
    ///
    /// [`DataError::StaleWrite`] if the key has never been loaded.
    pub fn mark_dirty(&self, key: &str) -> Result<(), DataError> {
        self.inner.ensure_open()?;
        validate_key(key)?;
        match self.inner.entries.get_mut(key) {
            Some(mut entry) if entry.loaded => {
                entry.mark_dirty();
                Ok(())
            }
            _ => Err(DataError::StaleWrite {
                key: key.to_string(),
            }),
        }
    }

    /// Registers `callback` for store-confirmed writes of `key`.
    ///
    /// Local cache mutations do not trigger it; saves (including this
    /// instance's own) do. The callback receives `true` for a write and
    /// `false` for a removal. The subscription is dropped on
    /// [`close()`](Self::close).
    ///
    /// # Errors
    ///
    /// [`DataError::Subscribe`] if the store rejects the subscription.
    pub async fn on_update(
        &self,
        key: &str,
        callback: impl Fn(bool) + Send + Sync + 'static,
    ) -> Result<SubscriptionId, DataError> {
        self.inner.ensure_open()?;
        validate_key(key)?;
        let listener: StoreListener = Arc::new(callback);
        let inner = &self.inner;
        match inner.store.subscribe(&inner.partition, key, listener).await {
            Ok(id) => {
                metrics::record_store_call(DataMethod::OnUpdate, true);
                {
                    // `close()` leaves Open before taking the list under this lock.
                    let mut subscriptions = inner.subscriptions.lock();
                    if inner.lifecycle() == Lifecycle::Open {
                        subscriptions.push((key.to_string(), id));
                        drop(subscriptions);
                        inner.emit_success(DataMethod::OnUpdate, key);
                        return Ok(id);
                    }
                }
                if let Err(err) = inner.store.unsubscribe(&inner.partition, key, id).await {
                    warn!(
                        partition = %inner.partition,
                        key,
                        error = %format!("{err:#}"),
                        "unsubscribe after close failed"
                    );
                }
                Err(DataError::Closed {
                    partition: inner.partition.to_string(),
                })
            }
            Err(err) => {
                metrics::record_store_call(DataMethod::OnUpdate, false);
                let reason = format!("{err:#}");
                warn!(partition = %inner.partition, key, error = %reason, "subscribe failed");
                inner.emit_failure(DataMethod::OnUpdate, key, &reason);
                Err(DataError::Subscribe {
                    key: key.to_string(),
                    reason,
                })
            }
        }
    }

    /// Drops a subscription made with [`on_update()`](Self::on_update).
    /// Unknown ids are ignored.
    ///
    /// # Errors
    ///
    /// [`DataError::Subscribe`] if the store call fails.
    pub async fn unsubscribe(&self, id: SubscriptionId) -> Result<(), DataError> {
        let inner = &self.inner;
        let key = {
            let subscriptions = inner.subscriptions.lock();
            let Some((key, _)) = subscriptions.iter().find(|(_, existing)| *existing == id) else {
                return Ok(());
            };
            key.clone()
        };
        // The id stays tracked until the store confirms, so a failed call can
        // be retried here or by `close()`.
        inner
            .store
            .unsubscribe(&inner.partition, &key, id)
            .await
            .map_err(|err| DataError::Subscribe {
                key,
                reason: format!("{err:#}"),
            })?;
        inner.subscriptions.lock().retain(|(_, existing)| *existing != id);
        Ok(())
    }

    /// Persists `key` if it is dirty.
    ///
    /// Joins a save already in flight for the key. If that joined save
    /// carried an older version than the cache now holds, one follow-up
    /// save is issued for the newer value. Failures are not retried.
    ///
    /// # Errors
    ///
    /// [`DataError::Save`] if the store call fails; the key stays dirty.
    pub async fn save(&self, key: &str) -> Result<(), DataError> {
        self.inner.ensure_open()?;
        validate_key(key)?;
        self.inner.save_key(key).await.map(|_| ())
    }

    /// Saves every key that is dirty right now, concurrently.
    ///
    /// Resolves once every save has settled; one key failing does not stop
    /// the others.
    ///
    /// # Errors
    ///
    /// [`DataError::Closed`] if the instance has been torn down. Per-key
    /// failures are reported in the [`SaveReport`].
    pub async fn save_all(&self) -> Result<SaveReport, DataError> {
        self.inner.ensure_open()?;
        Ok(self.inner.save_all().await)
    }

    /// Lists an ordered partition sorted by numeric value.
    ///
    /// Reads the store directly; the cache is neither consulted nor filled.
    ///
    /// # Errors
    ///
    /// [`DataError::NotOrdered`] on an unordered partition,
    /// [`DataError::Query`] if the store call fails or returns undecodable
    /// values.
    pub async fn sorted(&self, ascending: bool, limit: usize) -> Result<Vec<(String, V)>, DataError> {
        self.inner.ensure_open()?;
        let inner = &self.inner;
        if !inner.partition.is_ordered() {
            return Err(DataError::NotOrdered {
                partition: inner.partition.to_string(),
            });
        }
        let query_error = |err: anyhow::Error| DataError::Query {
            partition: inner.partition.to_string(),
            reason: format!("{err:#}"),
        };
        let rows = inner
            .store
            .sorted(&inner.partition, ascending, limit)
            .await
            .map_err(query_error)?;
        rows.into_iter()
            .map(|(key, raw)| Ok((key, raw.decode::<V>().map_err(query_error)?)))
            .collect()
    }

    /// Tears the instance down.
    ///
    /// Waits for in-flight saves, saves every dirty key once, drops store
    /// subscriptions, runs the [`on_close()`](Self::on_close) callbacks, and
    /// discards the cache. Later operations fail with [`DataError::Closed`].
    /// Finishes a teardown the scheduler has begun. Closing twice is a no-op
    /// that returns an empty report.
    pub async fn close(&self) -> SaveReport {
        self.inner.close().await
    }

    /// Registers a callback run exactly once when the instance closes. Runs
    /// immediately if it already has.
    pub fn on_close(&self, callback: impl FnOnce() + Send + 'static) {
        let mut callbacks = self.inner.on_close.lock();
        if let Some(pending) = callbacks.as_mut() {
            pending.push(Box::new(callback));
            return;
        }
        drop(callbacks);
        callback();
    }

    /// Includes (`true`) or excludes this instance from auto-save sweeps.
    pub fn set_can_auto_save(&self, enabled: bool) {
        self.inner.can_auto_save.store(enabled, Ordering::Relaxed);
    }

    #[must_use]
    pub fn can_auto_save(&self) -> bool {
        self.inner.can_auto_save.load(Ordering::Relaxed)
    }

    /// Whether the instance is torn down when its player leaves.
    pub fn set_destroy_on_leave(&self, enabled: bool) {
        self.inner.destroy_on_leave.store(enabled, Ordering::Relaxed);
    }

    #[must_use]
    pub fn destroy_on_leave(&self) -> bool {
        self.inner.destroy_on_leave.load(Ordering::Relaxed)
    }

    pub fn set_save_mode(&self, mode: SaveMode) {
        self.inner
            .atomic_update
            .store(mode == SaveMode::AtomicUpdate, Ordering::Relaxed);
    }

    #[must_use]
    pub fn save_mode(&self) -> SaveMode {
        self.inner.save_mode()
    }

    /// Whether `key` has been loaded.
    #[must_use]
    pub fn is_loaded(&self, key: &str) -> bool {
        self.inner.entries.get(key).is_some_and(|entry| entry.loaded)
    }

    /// Whether `key` holds a mutation not yet confirmed persisted.
    #[must_use]
    pub fn is_dirty(&self, key: &str) -> bool {
        self.inner.entries.get(key).is_some_and(|entry| entry.is_dirty())
    }

    /// Dirty keys, sorted.
    #[must_use]
    pub fn dirty_keys(&self) -> Vec<String> {
        self.inner.dirty_keys()
    }

    /// Cached value of a loaded key, without touching the store.
    #[must_use]
    pub fn cached(&self, key: &str) -> Option<V> {
        self.inner
            .entries
            .get(key)
            .filter(|entry| entry.loaded)
            .and_then(|entry| entry.value.clone())
    }

    /// Whether operations are rejected: teardown has started or finished.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.lifecycle() != Lifecycle::Open
    }

    #[must_use]
    pub fn lifecycle(&self) -> Lifecycle {
        self.inner.lifecycle()
    }

    /// Fired after every successful store call.
    #[must_use]
    pub fn success(&self) -> &Signal<DataSuccess> {
        &self.inner.success
    }

    /// Fired after every failed store call.
    #[must_use]
    pub fn failed(&self) -> &Signal<DataFailure> {
        &self.inner.failed
    }
}

impl<V: CacheValue + Incrementable> Data<V> {
    /// Adds `delta` to the value of `key` and returns the result.
    ///
    /// An absent value counts as zero. The sum is computed in the cache and
    /// the key marked dirty; the store's atomic update is not used.
    ///
    /// # Errors
    ///
    /// [`DataError::Load`] if the key had to be loaded and the load failed.
    /// [`DataError::TypeMismatch`] if the cached value or `delta` is not
    /// numeric or the sum overflows; value and dirty state are unchanged.
    pub async fn increment(&self, key: &str, delta: V) -> Result<V, DataError> {
        self.inner.ensure_open()?;
        validate_key(key)?;
        self.inner.read(key, None).await?;
        self.inner.mutate(key, |entry| {
            let current = entry.value.clone().unwrap_or_else(V::zero);
            let next = current
                .checked_increment(&delta)
                .map_err(|err| DataError::TypeMismatch {
                    key: key.to_string(),
                    reason: err.to_string(),
                })?;
            entry.value = Some(next.clone());
            Ok(next)
        })
    }
}

impl<V: CacheValue> DataInner<V> {
    fn lifecycle(&self) -> Lifecycle {
        match self.lifecycle.load(Ordering::Acquire) {
            OPEN => Lifecycle::Open,
            CLOSING => Lifecycle::Closing,
            _ => Lifecycle::Closed,
        }
    }

    fn ensure_open(&self) -> Result<(), DataError> {
        if self.lifecycle.load(Ordering::Acquire) == OPEN {
            Ok(())
        } else {
            Err(DataError::Closed {
                partition: self.partition.to_string(),
            })
        }
    }

    fn save_mode(&self) -> SaveMode {
        if self.atomic_update.load(Ordering::Relaxed) {
            SaveMode::AtomicUpdate
        } else {
            SaveMode::Overwrite
        }
    }

    fn dirty_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .entries
            .iter()
            .filter(|entry| entry.is_dirty())
            .map(|entry| entry.key().clone())
            .collect();
        keys.sort();
        keys
    }

    /// Returns the cached value of `key`, loading it first if needed.
    async fn read(self: &Arc<Self>, key: &str, default: Option<V>) -> Result<Option<V>, DataError> {
        match self.begin_load(key, default.clone()) {
            LoadStep::Ready(value) => {
                debug!(partition = %self.partition, key, "cache hit");
                Ok(value.or(default))
            }
            LoadStep::Pending(load) => Ok(load.await?.or(default)),
        }
    }

    fn begin_load(self: &Arc<Self>, key: &str, default: Option<V>) -> LoadStep<V> {
        let mut entry = self.entries.entry(key.to_string()).or_default();
        if entry.loaded {
            return LoadStep::Ready(entry.value.clone());
        }
        if let Some(load) = &entry.inflight_load {
            return LoadStep::Pending(load.clone());
        }
        let inner = Arc::clone(self);
        let owned_key = key.to_string();
        let failed_key = owned_key.clone();
        let load = tokio::spawn(async move { inner.load(owned_key, default).await })
            .map(move |joined| {
                joined.unwrap_or_else(|err| {
                    Err(DataError::Load {
                        key: failed_key,
                        reason: err.to_string(),
                    })
                })
            })
            .boxed()
            .shared();
        entry.inflight_load = Some(load.clone());
        LoadStep::Pending(load)
    }

    async fn load(&self, key: String, default: Option<V>) -> Result<Option<V>, DataError> {
        debug!(partition = %self.partition, key = %key, "loading");
        let fetched = self
            .store
            .get(&self.partition, &key)
            .await
            .and_then(|raw| raw.as_ref().map(StorageValue::decode::<V>).transpose());

        let outcome = {
            let mut entry = self.entries.entry(key.clone()).or_default();
            entry.inflight_load = None;
            match fetched {
                Ok(stored) => {
                    entry.on_loaded(stored.or(default));
                    Ok(entry.value.clone())
                }
                Err(err) => Err(format!("{err:#}")),
            }
        };

        match outcome {
            Ok(value) => {
                metrics::record_store_call(DataMethod::Get, true);
                self.emit_success(DataMethod::Get, &key);
                Ok(value)
            }
            Err(reason) => {
                metrics::record_store_call(DataMethod::Get, false);
                warn!(partition = %self.partition, key = %key, error = %reason, "load failed");
                self.emit_failure(DataMethod::Get, &key, &reason);
                Err(DataError::Load { key, reason })
            }
        }
    }

    /// Applies `change` to a loaded entry and marks it dirty if it succeeds.
    fn mutate<R>(
        &self,
        key: &str,
        change: impl FnOnce(&mut CacheEntry<V>) -> Result<R, DataError>,
    ) -> Result<R, DataError> {
        self.ensure_open()?;
        let mut entry = match self.entries.get_mut(key) {
            Some(entry) if entry.loaded => entry,
            _ => {
                return Err(DataError::StaleWrite {
                    key: key.to_string(),
                })
            }
        };
        let result = change(&mut *entry)?;
        entry.mark_dirty();
        Ok(result)
    }

    async fn save_key(self: &Arc<Self>, key: &str) -> Result<SaveOutcome, DataError> {
        let (future, issued) = match self.begin_save(key) {
            SaveStep::Clean => return Ok(SaveOutcome::Clean),
            SaveStep::Suppressed => return Ok(SaveOutcome::Suppressed),
            SaveStep::Pending { future, issued } => (future, issued),
        };
        future.await?;
        if issued {
            return Ok(SaveOutcome::Saved);
        }
        // The joined save may have carried an older version.
        match self.begin_save(key) {
            SaveStep::Clean => Ok(SaveOutcome::Saved),
            SaveStep::Suppressed => Ok(SaveOutcome::Suppressed),
            SaveStep::Pending { future, .. } => future.await.map(|()| SaveOutcome::Saved),
        }
    }

    fn begin_save(self: &Arc<Self>, key: &str) -> SaveStep {
        let Some(mut entry) = self.entries.get_mut(key) else {
            return SaveStep::Clean;
        };
        if !entry.is_dirty() {
            return SaveStep::Clean;
        }
        if let Some(inflight) = &entry.inflight_save {
            return SaveStep::Pending {
                future: inflight.future.clone(),
                issued: false,
            };
        }
        if self.config.persistence_suppressed() {
            metrics::record_suppressed_save();
            debug!(partition = %self.partition, key, "save suppressed in development");
            return SaveStep::Suppressed;
        }

        let version = entry.version;
        let value = entry.value.clone();
        let method = self.method_for(value.as_ref());
        let inner = Arc::clone(self);
        let owned_key = key.to_string();
        let failed_key = owned_key.clone();
        let future = tokio::spawn(async move { inner.persist(owned_key, value, version, method).await })
            .map(move |joined| {
                joined.unwrap_or_else(|err| {
                    Err(DataError::Save {
                        method,
                        key: failed_key,
                        reason: err.to_string(),
                    })
                })
            })
            .boxed()
            .shared();
        entry.inflight_save = Some(InflightSave {
            version,
            future: future.clone(),
        });
        SaveStep::Pending {
            future,
            issued: true,
        }
    }

    fn method_for(&self, value: Option<&V>) -> DataMethod {
        match (value, self.save_mode()) {
            (None, _) => DataMethod::Remove,
            (Some(_), SaveMode::Overwrite) => DataMethod::Set,
            (Some(_), SaveMode::AtomicUpdate) => DataMethod::Update,
        }
    }

    async fn persist(
        &self,
        key: String,
        value: Option<V>,
        version: u64,
        method: DataMethod,
    ) -> Result<(), DataError> {
        let result = self.write_through(&key, value.as_ref(), method).await;

        if let Some(mut entry) = self.entries.get_mut(&key) {
            entry.inflight_save = None;
            if result.is_ok() {
                entry.on_stored(version);
            }
        }

        metrics::record_store_call(method, result.is_ok());
        match result {
            Ok(()) => {
                debug!(partition = %self.partition, key = %key, method = %method, version, "saved");
                self.emit_success(method, &key);
                Ok(())
            }
            Err(err) => {
                let reason = format!("{err:#}");
                warn!(partition = %self.partition, key = %key, method = %method, error = %reason, "save failed");
                self.emit_failure(method, &key, &reason);
                Err(DataError::Save {
                    method,
                    key,
                    reason,
                })
            }
        }
    }

    async fn write_through(
        &self,
        key: &str,
        value: Option<&V>,
        method: DataMethod,
    ) -> anyhow::Result<()> {
        let Some(value) = value else {
            return self.store.remove(&self.partition, key).await;
        };
        let encoded = StorageValue::encode(value)?;
        match method {
            DataMethod::Update => {
                self.store
                    .update(
                        &self.partition,
                        key,
                        Box::new(move |_current: Option<&StorageValue>| Some(encoded.clone())),
                    )
                    .await?;
                Ok(())
            }
            _ => self.store.set(&self.partition, key, &encoded).await,
        }
    }

    async fn save_all(self: &Arc<Self>) -> SaveReport {
        let keys = self.dirty_keys();
        let results = join_all(keys.into_iter().map(|key| async move {
            let result = self.save_key(&key).await;
            (key, result)
        }))
        .await;

        let mut report = SaveReport::default();
        for (key, result) in results {
            match result {
                Ok(SaveOutcome::Saved) => report.saved.push(key),
                Ok(SaveOutcome::Suppressed) => report.suppressed = true,
                Ok(SaveOutcome::Clean) => {}
                Err(err) => report.failed.push((key, err)),
            }
        }
        report
    }

    /// Waits for every save currently in flight, ignoring outcomes.
    async fn drain(&self) {
        let pending: Vec<SharedSave> = self
            .entries
            .iter()
            .filter_map(|entry| entry.inflight_save.as_ref().map(|save| save.future.clone()))
            .collect();
        if !pending.is_empty() {
            debug!(partition = %self.partition, count = pending.len(), "draining in-flight saves");
            join_all(pending).await;
        }
    }

    /// Moves Open -> Closing. Returns `false` if teardown already started.
    fn begin_close(&self) -> bool {
        let begun = self
            .lifecycle
            .compare_exchange(OPEN, CLOSING, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if begun {
            info!(partition = %self.partition, "closing data instance");
        }
        begun
    }

    /// Starts teardown if needed, then runs the final steps once.
    async fn close(self: &Arc<Self>) -> SaveReport {
        self.begin_close();
        if self.finishing.swap(true, Ordering::AcqRel) {
            return SaveReport::default();
        }

        self.drain().await;
        let report = self.save_all().await;
        if !report.is_success() {
            warn!(
                partition = %self.partition,
                failed = report.failed.len(),
                "final save left dirty keys; they are discarded"
            );
        }

        let subscriptions = std::mem::take(&mut *self.subscriptions.lock());
        for (key, id) in subscriptions {
            if let Err(err) = self.store.unsubscribe(&self.partition, &key, id).await {
                let reason = format!("{err:#}");
                warn!(partition = %self.partition, key = %key, error = %reason, "unsubscribe failed");
            }
        }

        let callbacks = self.on_close.lock().take().unwrap_or_default();
        for callback in callbacks {
            callback();
        }

        self.success.disconnect_all();
        self.failed.disconnect_all();
        self.entries.clear();
        self.lifecycle.store(CLOSED, Ordering::Release);
        info!(partition = %self.partition, saved = report.saved.len(), "data instance closed");
        report
    }

    /// Flush used by the scheduler; unlike `save_all()` on [`Data`] it does
    /// not fail on a closed instance, it just finds nothing to save.
    async fn flush(self: &Arc<Self>) -> SaveReport {
        if self.lifecycle.load(Ordering::Acquire) == CLOSED {
            return SaveReport::default();
        }
        self.save_all().await
    }

    fn emit_success(&self, method: DataMethod, key: &str) {
        self.success.fire(&DataSuccess {
            method,
            key: key.to_string(),
        });
    }

    fn emit_failure(&self, method: DataMethod, key: &str, reason: &str) {
        self.failed.fire(&DataFailure {
            method,
            key: key.to_string(),
            error: reason.to_string(),
        });
    }
}

#[async_trait]
impl<V: CacheValue> ManagedData for Data<V> {
    fn partition(&self) -> &PartitionKey {
        &self.inner.partition
    }

    fn can_auto_save(&self) -> bool {
        Data::can_auto_save(self)
    }

    fn destroy_on_leave(&self) -> bool {
        Data::destroy_on_leave(self)
    }

    fn dirty_count(&self) -> usize {
        self.inner.entries.iter().filter(|entry| entry.is_dirty()).count()
    }

    fn lifecycle(&self) -> Lifecycle {
        Data::lifecycle(self)
    }

    fn begin_close(&self) -> bool {
        self.inner.begin_close()
    }

    async fn flush(&self) -> SaveReport {
        self.inner.flush().await
    }

    async fn close(&self) -> SaveReport {
        self.inner.close().await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use datacache_core::Value;

    use super::*;
    use crate::config::Environment;
    use crate::storage::stores::MemoryStore;

    fn partition(ordered: bool) -> PartitionKey {
        PartitionKey::new("Players", "global", ordered).unwrap()
    }

    fn setup() -> (Arc<MemoryStore>, Data<Value>) {
        setup_with(DataConfig::default(), false)
    }

    fn setup_with(config: DataConfig, ordered: bool) -> (Arc<MemoryStore>, Data<Value>) {
        let store = Arc::new(MemoryStore::new());
        let data = Data::new(partition(ordered), store.clone(), Arc::new(config));
        (store, data)
    }

    fn stored(store: &MemoryStore, key: &str) -> Option<Value> {
        store
            .peek(&partition(false), key)
            .map(|raw| raw.decode().unwrap())
    }

    fn record_events(data: &Data<Value>) -> (Arc<Mutex<Vec<DataSuccess>>>, Arc<Mutex<Vec<DataFailure>>>) {
        let successes = Arc::new(Mutex::new(Vec::new()));
        let failures = Arc::new(Mutex::new(Vec::new()));
        let sink = successes.clone();
        data.success().connect(move |event| sink.lock().push(event.clone()));
        let sink = failures.clone();
        data.failed().connect(move |event| sink.lock().push(event.clone()));
        (successes, failures)
    }

    // -- Get / Set / Save scenario --

    #[tokio::test]
    async fn get_set_save_scenario() {
        let (store, data) = setup();
        let (successes, _) = record_events(&data);

        let coins = data.get_or("coins", Value::Int(0)).await.unwrap();
        assert_eq!(coins, Value::Int(0));
        assert!(data.is_loaded("coins"));
        assert!(!data.is_dirty("coins"));

        data.set("coins", Value::Int(50)).await.unwrap();
        assert_eq!(data.cached("coins"), Some(Value::Int(50)));
        assert!(data.is_dirty("coins"));

        data.save("coins").await.unwrap();
        assert_eq!(store.calls(DataMethod::Set), 1);
        assert_eq!(stored(&store, "coins"), Some(Value::Int(50)));
        assert!(!data.is_dirty("coins"));
        assert!(successes.lock().contains(&DataSuccess {
            method: DataMethod::Set,
            key: "coins".to_string(),
        }));
    }

    #[tokio::test]
    async fn get_hits_cache_after_first_load() {
        let (store, data) = setup();
        store.seed(&partition(false), "level", StorageValue::encode(&Value::Int(7)).unwrap());

        assert_eq!(data.get("level").await.unwrap(), Some(Value::Int(7)));
        assert_eq!(data.get("level").await.unwrap(), Some(Value::Int(7)));
        assert_eq!(store.calls(DataMethod::Get), 1);
    }

    #[tokio::test]
    async fn absent_loaded_key_returns_default_without_caching_it() {
        let (_store, data) = setup();
        assert_eq!(data.get("title").await.unwrap(), None);

        let title = data.get_or("title", Value::from("rookie")).await.unwrap();
        assert_eq!(title, Value::from("rookie"));
        assert_eq!(data.cached("title"), None);
    }

    #[tokio::test]
    async fn first_set_loads_exactly_once() {
        let (store, data) = setup();
        data.set("coins", Value::Int(1)).await.unwrap();
        data.set("coins", Value::Int(2)).await.unwrap();
        assert_eq!(store.calls(DataMethod::Get), 1);
        assert_eq!(store.calls(DataMethod::Set), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_gets_share_one_load() {
        let (store, data) = setup();
        store.set_latency(Duration::from_millis(200));

        let (a, b, c) = tokio::join!(
            data.get("coins"),
            data.get_or("coins", Value::Int(9)),
            data.get("coins"),
        );
        assert_eq!(a.unwrap(), None);
        // Joiner with its own default sees it since the load cached nothing.
        assert_eq!(b.unwrap(), Value::Int(9));
        assert_eq!(c.unwrap(), None);
        assert_eq!(store.calls(DataMethod::Get), 1);
    }

    #[tokio::test]
    async fn set_while_offline_rejects_and_leaves_entry_untouched() {
        let (store, data) = setup();
        let (_, failures) = record_events(&data);
        store.set_offline(true);

        let err = data.set("coins", Value::Int(50)).await.unwrap_err();
        assert!(matches!(err, DataError::Load { ref key, .. } if key == "coins"));
        assert!(!data.is_loaded("coins"));
        assert!(!data.is_dirty("coins"));
        assert_eq!(failures.lock().len(), 1);
        assert_eq!(failures.lock()[0].method, DataMethod::Get);

        // Load is retryable once the store recovers.
        store.set_offline(false);
        data.set("coins", Value::Int(50)).await.unwrap();
        assert!(data.is_dirty("coins"));
    }

    #[tokio::test]
    async fn undecodable_value_is_a_load_failure() {
        let store = Arc::new(MemoryStore::new());
        let data: Data<i64> = Data::new(partition(false), store.clone(), Arc::new(DataConfig::default()));
        store.seed(&partition(false), "coins", StorageValue::encode("not a number").unwrap());

        let err = data.get("coins").await.unwrap_err();
        assert!(matches!(err, DataError::Load { .. }));
        assert!(!data.is_loaded("coins"));
    }

    #[tokio::test]
    async fn save_clean_key_makes_no_store_call() {
        let (store, data) = setup();
        data.set("coins", Value::Int(5)).await.unwrap();
        data.save("coins").await.unwrap();
        data.save("coins").await.unwrap();
        data.save("never-touched").await.unwrap();
        assert_eq!(store.calls(DataMethod::Set), 1);
    }

    #[tokio::test]
    async fn delete_saves_as_remove() {
        let (store, data) = setup();
        store.seed(&partition(false), "coins", StorageValue::encode(&Value::Int(3)).unwrap());

        data.delete("coins").await.unwrap();
        assert_eq!(data.get("coins").await.unwrap(), None);
        assert!(data.is_dirty("coins"));

        data.save("coins").await.unwrap();
        assert_eq!(store.calls(DataMethod::Remove), 1);
        assert!(store.peek(&partition(false), "coins").is_none());
    }

    #[tokio::test]
    async fn atomic_update_mode_saves_through_update() {
        let (store, data) = setup();
        let (successes, _) = record_events(&data);
        data.set_save_mode(SaveMode::AtomicUpdate);

        data.set("coins", Value::Int(8)).await.unwrap();
        data.save("coins").await.unwrap();

        assert_eq!(store.calls(DataMethod::Update), 1);
        assert_eq!(store.calls(DataMethod::Set), 0);
        assert_eq!(stored(&store, "coins"), Some(Value::Int(8)));
        assert_eq!(successes.lock().last().unwrap().method, DataMethod::Update);
    }

    // -- Save failure and coalescing --

    #[tokio::test]
    async fn failed_save_leaves_key_dirty_and_is_not_retried() {
        let (store, data) = setup();
        data.set("coins", Value::Int(5)).await.unwrap();
        store.fail_key("coins");

        let err = data.save("coins").await.unwrap_err();
        assert!(matches!(err, DataError::Save { method: DataMethod::Set, .. }));
        assert!(data.is_dirty("coins"));
        assert_eq!(store.calls(DataMethod::Set), 1);

        store.heal_key("coins");
        data.save("coins").await.unwrap();
        assert!(!data.is_dirty("coins"));
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_saves_share_one_store_call() {
        let (store, data) = setup();
        data.set("coins", Value::Int(5)).await.unwrap();
        store.set_latency(Duration::from_millis(100));

        let (a, b) = tokio::join!(data.save("coins"), data.save("coins"));
        a.unwrap();
        b.unwrap();
        assert_eq!(store.calls(DataMethod::Set), 1);
        assert!(!data.is_dirty("coins"));
    }

    #[tokio::test(start_paused = true)]
    async fn mutation_during_save_keeps_key_dirty() {
        let (store, data) = setup();
        data.set("coins", Value::Int(1)).await.unwrap();
        store.set_latency(Duration::from_millis(100));

        let saver = data.clone();
        let pending = tokio::spawn(async move { saver.save("coins").await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        data.set("coins", Value::Int(2)).await.unwrap();
        pending.await.unwrap().unwrap();

        assert!(data.is_dirty("coins"));
        assert_eq!(stored(&store, "coins"), Some(Value::Int(1)));

        data.save("coins").await.unwrap();
        assert!(!data.is_dirty("coins"));
        assert_eq!(stored(&store, "coins"), Some(Value::Int(2)));
    }

    #[tokio::test(start_paused = true)]
    async fn joined_save_follows_up_for_newer_value() {
        let (store, data) = setup();
        data.set("coins", Value::Int(1)).await.unwrap();
        store.set_latency(Duration::from_millis(100));

        let saver = data.clone();
        let first = tokio::spawn(async move { saver.save("coins").await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        data.set("coins", Value::Int(2)).await.unwrap();
        // Joins the in-flight save of version 1, then saves version 2.
        data.save("coins").await.unwrap();
        first.await.unwrap().unwrap();

        assert_eq!(store.calls(DataMethod::Set), 2);
        assert!(!data.is_dirty("coins"));
        assert_eq!(stored(&store, "coins"), Some(Value::Int(2)));
    }

    #[tokio::test]
    async fn save_all_reports_each_key_independently() {
        let (store, data) = setup();
        let (successes, failures) = record_events(&data);
        data.set("a", Value::Int(1)).await.unwrap();
        data.set("b", Value::Int(2)).await.unwrap();
        store.fail_key("a");
        successes.lock().clear();

        let report = data.save_all().await.unwrap();

        assert_eq!(report.saved, vec!["b".to_string()]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, "a");
        assert!(data.is_dirty("a"));
        assert!(!data.is_dirty("b"));

        let successes = successes.lock();
        let failures = failures.lock();
        assert_eq!(successes.len(), 1);
        assert_eq!(successes[0].key, "b");
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].key, "a");
        assert_eq!(failures[0].method, DataMethod::Set);
    }

    // -- Increment / MarkDirty --

    #[tokio::test]
    async fn increment_adds_and_marks_dirty() {
        let (_store, data) = setup();
        data.set("coins", Value::Int(10)).await.unwrap();
        data.save("coins").await.unwrap();

        let next = data.increment("coins", Value::Int(5)).await.unwrap();
        assert_eq!(next, Value::Int(15));
        assert_eq!(data.cached("coins"), Some(Value::Int(15)));
        assert!(data.is_dirty("coins"));
    }

    #[tokio::test]
    async fn increment_absent_counts_from_zero() {
        let store = Arc::new(MemoryStore::new());
        let data: Data<i64> = Data::new(partition(false), store.clone(), Arc::new(DataConfig::default()));
        assert_eq!(data.increment("kills", 3).await.unwrap(), 3);
        assert_eq!(store.calls(DataMethod::Update), 0);
    }

    #[tokio::test]
    async fn increment_non_numeric_is_type_mismatch() {
        let (_store, data) = setup();
        data.set("name", Value::from("ada")).await.unwrap();
        data.save("name").await.unwrap();

        let err = data.increment("name", Value::Int(1)).await.unwrap_err();
        assert!(matches!(err, DataError::TypeMismatch { .. }));
        assert_eq!(data.cached("name"), Some(Value::from("ada")));
        assert!(!data.is_dirty("name"));

        data.set("coins", Value::Int(1)).await.unwrap();
        data.save("coins").await.unwrap();
        let err = data.increment("coins", Value::from("x")).await.unwrap_err();
        assert!(matches!(err, DataError::TypeMismatch { .. }));
        assert!(!data.is_dirty("coins"));
    }

    #[tokio::test]
    async fn increment_mismatch_keeps_dirty_key_dirty() {
        let (store, data) = setup();
        data.set("name", Value::from("ada")).await.unwrap();
        assert!(data.is_dirty("name"));

        let err = data.increment("name", Value::Int(1)).await.unwrap_err();
        assert!(matches!(err, DataError::TypeMismatch { .. }));
        assert!(data.is_dirty("name"));
        assert_eq!(data.cached("name"), Some(Value::from("ada")));

        // The pending write is still the one that reaches the store.
        data.save("name").await.unwrap();
        let stored: Value = store.peek(&partition(false), "name").unwrap().decode().unwrap();
        assert_eq!(stored, Value::from("ada"));
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_set_and_get_share_one_load() {
        let (store, data) = setup();
        store.seed(&partition(false), "coins", StorageValue::encode(&Value::Int(3)).unwrap());
        store.set_latency(Duration::from_millis(200));

        let (set, got) = tokio::join!(data.set("coins", Value::Int(7)), data.get("coins"));
        set.unwrap();
        let got = got.unwrap();
        assert!(got == Some(Value::Int(3)) || got == Some(Value::Int(7)));

        assert_eq!(store.calls(DataMethod::Get), 1);
        assert_eq!(data.cached("coins"), Some(Value::Int(7)));
        assert!(data.is_dirty("coins"));
    }

    #[tokio::test]
    async fn mark_dirty_requires_loaded_key() {
        let (store, data) = setup();
        let err = data.mark_dirty("inventory").unwrap_err();
        assert_eq!(
            err,
            DataError::StaleWrite {
                key: "inventory".to_string()
            }
        );

        data.get("inventory").await.unwrap();
        data.mark_dirty("inventory").unwrap();
        assert!(data.is_dirty("inventory"));
        data.save("inventory").await.unwrap();
        // Absent value saves as a removal.
        assert_eq!(store.calls(DataMethod::Remove), 1);
    }

    #[tokio::test]
    async fn invalid_key_is_rejected() {
        let (store, data) = setup();
        let err = data.get("").await.unwrap_err();
        assert!(matches!(err, DataError::InvalidKey(_)));
        assert_eq!(store.calls(DataMethod::Get), 0);
    }

    // -- OnUpdate --

    #[tokio::test]
    async fn on_update_fires_for_store_writes_only() {
        let (store, data) = setup();
        let saved = Arc::new(AtomicUsize::new(0));
        let removed = Arc::new(AtomicUsize::new(0));
        let (s, r) = (saved.clone(), removed.clone());
        let id = data
            .on_update("coins", move |is_saved| {
                if is_saved {
                    s.fetch_add(1, Ordering::SeqCst);
                } else {
                    r.fetch_add(1, Ordering::SeqCst);
                }
            })
            .await
            .unwrap();

        data.set("coins", Value::Int(1)).await.unwrap();
        assert_eq!(saved.load(Ordering::SeqCst), 0);

        data.save("coins").await.unwrap();
        assert_eq!(saved.load(Ordering::SeqCst), 1);

        data.delete("coins").await.unwrap();
        data.save("coins").await.unwrap();
        assert_eq!(removed.load(Ordering::SeqCst), 1);

        data.unsubscribe(id).await.unwrap();
        data.set("coins", Value::Int(2)).await.unwrap();
        data.save("coins").await.unwrap();
        assert_eq!(saved.load(Ordering::SeqCst), 1);
        assert!(store.calls(DataMethod::OnUpdate) >= 1);
    }

    #[tokio::test]
    async fn on_update_failure_is_reported() {
        let (store, data) = setup();
        let (_, failures) = record_events(&data);
        store.set_offline(true);

        let err = data.on_update("coins", |_| {}).await.unwrap_err();
        assert!(matches!(err, DataError::Subscribe { .. }));
        assert_eq!(failures.lock()[0].method, DataMethod::OnUpdate);
    }

    #[tokio::test(start_paused = true)]
    async fn subscription_landing_after_close_is_dropped() {
        let (store, data) = setup();
        store.set_latency(Duration::from_millis(100));

        let (subscribed, _) = tokio::join!(data.on_update("coins", |_| {}), async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            data.close().await
        });

        assert!(matches!(subscribed, Err(DataError::Closed { .. })));
        assert_eq!(store.listener_count(&partition(false), "coins"), 0);
    }

    #[tokio::test]
    async fn failed_unsubscribe_is_retried_on_close() {
        let (store, data) = setup();
        let id = data.on_update("coins", |_| {}).await.unwrap();

        store.fail_key("coins");
        let err = data.unsubscribe(id).await.unwrap_err();
        assert!(matches!(err, DataError::Subscribe { .. }));
        assert_eq!(store.listener_count(&partition(false), "coins"), 1);

        store.heal_key("coins");
        data.close().await;
        assert_eq!(store.listener_count(&partition(false), "coins"), 0);
    }

    // -- Suppression --

    #[tokio::test]
    async fn development_suppresses_saves() {
        let config = DataConfig {
            environment: Environment::Development,
            ..DataConfig::default()
        };
        let (store, data) = setup_with(config, false);
        data.set("coins", Value::Int(5)).await.unwrap();

        data.save("coins").await.unwrap();
        let report = data.save_all().await.unwrap();

        assert!(report.suppressed);
        assert!(report.saved.is_empty());
        assert!(data.is_dirty("coins"));
        assert_eq!(store.calls(DataMethod::Set), 0);
    }

    // -- Ordered --

    #[tokio::test]
    async fn sorted_reads_ordered_partition() {
        let (store, data) = setup_with(DataConfig::default(), true);
        for (key, score) in [("ann", 30), ("bob", 10), ("cyd", 20)] {
            store.seed(&partition(true), key, StorageValue::encode(&Value::Int(score)).unwrap());
        }

        let top = data.sorted(false, 2).await.unwrap();
        assert_eq!(
            top,
            vec![
                ("ann".to_string(), Value::Int(30)),
                ("cyd".to_string(), Value::Int(20)),
            ]
        );
    }

    #[tokio::test]
    async fn sorted_on_unordered_partition_fails() {
        let (_store, data) = setup();
        let err = data.sorted(true, 10).await.unwrap_err();
        assert!(matches!(err, DataError::NotOrdered { .. }));
    }

    // -- Teardown --

    #[tokio::test]
    async fn close_flushes_runs_callbacks_once_and_rejects_later_calls() {
        let (store, data) = setup();
        let closed = Arc::new(AtomicUsize::new(0));
        let counter = closed.clone();
        data.on_close(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        data.set("coins", Value::Int(5)).await.unwrap();

        let report = data.close().await;
        assert_eq!(report.saved, vec!["coins".to_string()]);
        assert_eq!(stored(&store, "coins"), Some(Value::Int(5)));
        assert_eq!(closed.load(Ordering::SeqCst), 1);

        let again = data.close().await;
        assert!(again.saved.is_empty());
        assert_eq!(closed.load(Ordering::SeqCst), 1);

        assert!(data.is_closed());
        assert!(matches!(data.get("coins").await, Err(DataError::Closed { .. })));
        assert!(matches!(data.mark_dirty("coins"), Err(DataError::Closed { .. })));

        // Registered after close: runs at once.
        let counter = closed.clone();
        data.on_close(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(closed.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn close_drains_in_flight_save() {
        let (store, data) = setup();
        data.set("coins", Value::Int(1)).await.unwrap();
        store.set_latency(Duration::from_millis(100));

        let saver = data.clone();
        let pending = tokio::spawn(async move { saver.save("coins").await });
        tokio::time::sleep(Duration::from_millis(10)).await;

        let report = data.close().await;
        pending.await.unwrap().unwrap();

        // The drained save persisted the key; nothing was left to flush.
        assert!(report.saved.is_empty());
        assert!(report.is_success());
        assert_eq!(store.calls(DataMethod::Set), 1);
        assert_eq!(stored(&store, "coins"), Some(Value::Int(1)));
    }

    #[tokio::test]
    async fn close_drops_store_subscriptions() {
        let (store, data) = setup();
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        data.on_update("coins", move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .await
        .unwrap();
        data.close().await;

        // Writing straight to the store must not reach the dropped listener.
        store
            .set(&partition(false), "coins", &StorageValue::encode(&Value::Int(1)).unwrap())
            .await
            .unwrap();
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert_eq!(data.failed().listener_count(), 0);
    }

    #[test]
    fn combine_merges_reports() {
        let a = SaveReport {
            saved: vec!["x".to_string()],
            failed: Vec::new(),
            suppressed: false,
        };
        let b = SaveReport {
            saved: Vec::new(),
            failed: vec![(
                "y".to_string(),
                DataError::StaleWrite {
                    key: "y".to_string(),
                },
            )],
            suppressed: true,
        };
        let combined = SaveReport::combine([a, b]);
        assert_eq!(combined.saved.len(), 1);
        assert_eq!(combined.failed.len(), 1);
        assert!(combined.suppressed);
        assert!(!combined.is_success());
    }
}
