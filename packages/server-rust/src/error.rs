//! Error taxonomy for cache operations.
//!
//! Adapter errors arrive as `anyhow::Error` and are flattened to text here, so
//! [`DataError`] stays `Clone`: a single coalesced load or save hands the same
//! error to every caller awaiting it.

use datacache_core::{DataMethod, PartitionError};

/// Errors returned by [`Data`](crate::storage::Data) operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DataError {
    /// Initial load of a key failed; nothing was cached.
    #[error("failed to load key {key:?}: {reason}")]
    Load { key: String, reason: String },
    /// Persisting a key failed; the key is still dirty.
    #[error("failed to {method} key {key:?}: {reason}")]
    Save {
        method: DataMethod,
        key: String,
        reason: String,
    },
    /// Increment on a non-numeric value or with a non-numeric delta.
    #[error("cannot increment key {key:?}: {reason}")]
    TypeMismatch { key: String, reason: String },
    /// A mutation would overwrite store state the cache never loaded.
    #[error("refusing to write key {key:?}: its stored state was never loaded")]
    StaleWrite { key: String },
    /// Registering a store-level change listener failed.
    #[error("failed to subscribe to key {key:?}: {reason}")]
    Subscribe { key: String, reason: String },
    /// Ordered range query failed at the store.
    #[error("ordered query on {partition} failed: {reason}")]
    Query { partition: String, reason: String },
    /// Ordered query issued against an unordered partition.
    #[error("partition {partition} is not ordered")]
    NotOrdered { partition: String },
    /// The instance has been torn down.
    #[error("data instance {partition} is closed")]
    Closed { partition: String },
    /// Another live instance already fronts this partition.
    #[error("data instance {partition} is already registered")]
    DuplicatePartition { partition: String },
    /// The previous instance of this partition is still flushing its final
    /// saves; a new one can be created once its teardown completes.
    #[error("data instance {partition} is still being released")]
    Releasing { partition: String },
    #[error(transparent)]
    InvalidKey(#[from] PartitionError),
}

impl DataError {
    /// Whether retrying the same call later can succeed.
    ///
    /// Store-side failures and a pending release are transient; type errors
    /// and the other lifecycle errors are not.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Load { .. }
                | Self::Save { .. }
                | Self::Subscribe { .. }
                | Self::Query { .. }
                | Self::Releasing { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_failures_are_retryable() {
        let load = DataError::Load {
            key: "coins".to_string(),
            reason: "offline".to_string(),
        };
        let save = DataError::Save {
            method: DataMethod::Set,
            key: "coins".to_string(),
            reason: "throttled".to_string(),
        };
        assert!(load.is_retryable());
        assert!(save.is_retryable());
    }

    #[test]
    fn pending_release_is_retryable_but_duplicate_is_not() {
        let releasing = DataError::Releasing {
            partition: "Players/player_2".to_string(),
        };
        let duplicate = DataError::DuplicatePartition {
            partition: "Players/player_2".to_string(),
        };
        assert!(releasing.is_retryable());
        assert!(!duplicate.is_retryable());
    }

    #[test]
    fn programmer_errors_are_not_retryable() {
        let mismatch = DataError::TypeMismatch {
            key: "name".to_string(),
            reason: "current value is not numeric (found string)".to_string(),
        };
        let stale = DataError::StaleWrite {
            key: "inventory".to_string(),
        };
        assert!(!mismatch.is_retryable());
        assert!(!stale.is_retryable());
    }

    #[test]
    fn save_error_names_method() {
        let err = DataError::Save {
            method: DataMethod::Remove,
            key: "coins".to_string(),
            reason: "store unavailable".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "failed to remove key \"coins\": store unavailable"
        );
    }
}
