//! Factory for creating scheduler-registered [`Data`] instances.
//!
//! [`DataFactory`] is the dependency injection point for one data module: it
//! binds a module name to a backing store, the process configuration, and the
//! auto-save scheduler, and hands out the single live [`Data`] instance for
//! each scope.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use datacache_core::partition::{player_scope, SERVER_SCOPE};
use datacache_core::PartitionKey;
use tracing::{debug, info};

use crate::config::DataConfig;
use crate::error::DataError;
use crate::scheduler::{AutoSaveScheduler, ReleaseReport};
use crate::storage::backing_store::BackingStore;
use crate::storage::data::{CacheValue, Data, Lifecycle};
use crate::storage::stores::MemoryStore;

/// Hands out per-scope [`Data`] instances for one module name.
///
/// Holds the backing store (swapped for a [`MemoryStore`] when
/// `use_mock_store` is set), shared configuration, and the scheduler every
/// created instance is registered with. Repeated requests for the same
/// scope return the same live instance.
pub struct DataFactory<V> {
    name: String,
    store: Arc<dyn BackingStore>,
    config: Arc<DataConfig>,
    scheduler: Arc<AutoSaveScheduler>,
    instances: DashMap<PartitionKey, Data<V>>,
}

impl<V: CacheValue> DataFactory<V> {
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        store: Arc<dyn BackingStore>,
        config: Arc<DataConfig>,
        scheduler: Arc<AutoSaveScheduler>,
    ) -> Self {
        let name = name.into();
        let store: Arc<dyn BackingStore> = if config.use_mock_store {
            info!(module = %name, "using in-memory mock store");
            Arc::new(MemoryStore::new())
        } else {
            store
        };
        Self {
            name,
            store,
            config,
            scheduler,
            instances: DashMap::new(),
        }
    }

    /// The module name shared by every instance of this factory.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The store instances are created against.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn BackingStore> {
        &self.store
    }

    /// The live instance for `(name, scope)`, created if needed.
    ///
    /// # Errors
    ///
    /// [`DataError::InvalidKey`] if the scope is empty or too long;
    /// [`DataError::Releasing`] while the previous instance for the scope is
    /// still flushing its final saves (retry once it has closed);
    /// [`DataError::DuplicatePartition`] if the partition is already held by
    /// an instance this factory did not create.
    pub fn instance(&self, scope: &str, ordered: bool) -> Result<Data<V>, DataError> {
        self.instance_with(scope, ordered, false)
    }

    /// The instance for player `user_id`, torn down when the player leaves.
    ///
    /// # Errors
    ///
    /// Same as [`instance()`](Self::instance).
    pub fn for_player(&self, user_id: u64, ordered: bool) -> Result<Data<V>, DataError> {
        self.instance_with(&player_scope(user_id), ordered, true)
    }

    /// The process-wide server instance.
    ///
    /// # Errors
    ///
    /// Same as [`instance()`](Self::instance).
    pub fn for_server(&self, ordered: bool) -> Result<Data<V>, DataError> {
        self.instance_with(SERVER_SCOPE, ordered, false)
    }

    fn instance_with(
        &self,
        scope: &str,
        ordered: bool,
        destroy_on_leave: bool,
    ) -> Result<Data<V>, DataError> {
        let partition = PartitionKey::new(self.name.as_str(), scope, ordered)?;
        match self.instances.entry(partition.clone()) {
            Entry::Occupied(live) if live.get().lifecycle() == Lifecycle::Open => {
                Ok(live.get().clone())
            }
            Entry::Occupied(leaving) if leaving.get().lifecycle() == Lifecycle::Closing => {
                debug!(partition = %leaving.key(), "instance requested while still closing");
                Err(DataError::Releasing {
                    partition: leaving.key().to_string(),
                })
            }
            entry => {
                let data = Data::new(partition, Arc::clone(&self.store), Arc::clone(&self.config));
                data.set_destroy_on_leave(destroy_on_leave);
                self.scheduler.register(Arc::new(data.clone()))?;
                debug!(partition = %data.partition(), "data instance created");
                entry.insert(data.clone());
                Ok(data)
            }
        }
    }

    /// Tears down every instance of player `user_id` marked
    /// `destroy_on_leave`, flushing each under the player-left retry policy.
    ///
    /// Each instance keeps its partition until it has closed: asking for it
    /// again meanwhile fails with [`DataError::Releasing`]. Instances with
    /// `destroy_on_leave` cleared stay live, and instances already being
    /// released are left to that release.
    pub async fn player_left(&self, user_id: u64) -> Vec<ReleaseReport> {
        let scope = player_scope(user_id);
        let leaving: Vec<(PartitionKey, Data<V>)> = self
            .instances
            .iter()
            .filter(|entry| {
                entry.key().scope() == scope
                    && entry.value().destroy_on_leave()
                    && entry.value().lifecycle() == Lifecycle::Open
            })
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();

        let mut reports = Vec::with_capacity(leaving.len());
        for (partition, data) in leaving {
            match self.scheduler.release(&partition).await {
                Some(report) => reports.push(report),
                // Not registered with the scheduler; close it directly.
                None if !self.scheduler.registry().contains(&partition) => {
                    data.close().await;
                }
                None => {}
            }
            self.instances
                .remove_if(&partition, |_, instance| instance.lifecycle() == Lifecycle::Closed);
        }
        reports
    }
}
