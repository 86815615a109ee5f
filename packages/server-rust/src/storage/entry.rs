//! Per-key cache state.
//!
//! A [`CacheEntry`] tracks one key of a [`Data`](super::Data) instance: its
//! cached value, whether the value has been loaded from the store, and the
//! versions used for dirty tracking. In-flight loads and saves are kept as
//! shared futures so concurrent callers join a single store call.

use futures_util::future::{BoxFuture, Shared};

use crate::error::DataError;

/// Pending load of one key, shared by every caller waiting on it.
///
/// Resolves to the value cached by the load (`None` when the store held
/// nothing and the initiating caller supplied no default).
pub type SharedLoad<V> = Shared<BoxFuture<'static, Result<Option<V>, DataError>>>;

/// Pending save of one key, shared by every caller waiting on it.
pub type SharedSave = Shared<BoxFuture<'static, Result<(), DataError>>>;

/// A save that has been issued to the store and not yet settled.
pub struct InflightSave {
    /// Entry version carried by this save.
    pub version: u64,
    pub future: SharedSave,
}

/// Cached state of a single key.
///
/// Dirty tracking compares two counters instead of a flag: `version` is
/// bumped by every local mutation and `stored_version` is raised to the
/// version a successful save carried. A mutation that lands while a save is
/// in flight therefore keeps the entry dirty after that save succeeds.
pub struct CacheEntry<V> {
    /// Cached value. `None` means absent (never written, or deleted).
    pub value: Option<V>,
    /// Whether a load (or a defaulted load) has completed.
    pub loaded: bool,
    /// Local mutation counter.
    pub version: u64,
    /// Highest version confirmed persisted.
    pub stored_version: u64,
    pub inflight_load: Option<SharedLoad<V>>,
    pub inflight_save: Option<InflightSave>,
}

impl<V> CacheEntry<V> {
    /// Creates an unloaded, clean entry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            value: None,
            loaded: false,
            version: 0,
            stored_version: 0,
            inflight_load: None,
            inflight_save: None,
        }
    }

    /// Records a completed load. Has no effect if the entry is already loaded.
    pub fn on_loaded(&mut self, value: Option<V>) {
        if !self.loaded {
            self.value = value;
            self.loaded = true;
        }
    }

    /// Records a local mutation.
    pub fn mark_dirty(&mut self) {
        self.version = self.version.saturating_add(1);
    }

    /// Records a successful save that carried `version`.
    pub fn on_stored(&mut self, version: u64) {
        self.stored_version = self.stored_version.max(version);
    }

    /// Returns `true` if a local mutation has not been confirmed persisted.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.version > self.stored_version
    }
}

impl<V> Default for CacheEntry<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: std::fmt::Debug> std::fmt::Debug for CacheEntry<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheEntry")
            .field("value", &self.value)
            .field("loaded", &self.loaded)
            .field("version", &self.version)
            .field("stored_version", &self.stored_version)
            .field("loading", &self.inflight_load.is_some())
            .field("saving", &self.inflight_save.as_ref().map(|s| s.version))
            .finish()
    }
}
