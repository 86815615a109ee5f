//! Write-back caching layer.
//!
//! - [`BackingStore`]: adapter trait over the remote key/value store, with
//!   [`MemoryStore`] as the in-memory implementation for mock mode and tests
//! - [`CacheEntry`]: per-key load/dirty/save state
//! - [`Data`]: the cache for one `(name, scope)` partition
//! - [`DataFactory`]: hands out per-player and per-server instances and
//!   registers them with the auto-save scheduler
//! - [`Signal`]: multi-subscriber success/failure notifications

pub mod backing_store;
pub mod data;
pub mod entry;
pub mod factory;
pub mod signal;
pub mod stores;

pub use backing_store::{BackingStore, StoreListener, SubscriptionId, UpdateFn};
pub use data::{CacheValue, Data, Lifecycle, SaveMode, SaveReport};
pub use entry::CacheEntry;
pub use factory::DataFactory;
pub use signal::{Connection, DataFailure, DataSuccess, Signal};
pub use stores::MemoryStore;
