//! Partition identity for cached key spaces.
//!
//! A partition is the `(name, scope)` pair a cache instance fronts, plus
//! whether the backing store keeps it ordered. This module provides:
//!
//! - [`PartitionKey`]: validated partition identity
//! - [`player_scope`] / [`SERVER_SCOPE`]: deterministic scope derivation
//! - [`validate_key`]: per-entry key validation
//!
//! Length limits mirror the remote store's limits on store names, scopes and
//! keys.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Maximum length in bytes of a partition name.
pub const MAX_NAME_LEN: usize = 50;
/// Maximum length in bytes of a partition scope.
pub const MAX_SCOPE_LEN: usize = 50;
/// Maximum length in bytes of an entry key.
pub const MAX_KEY_LEN: usize = 50;

/// Scope of the single well-known server-wide partition.
pub const SERVER_SCOPE: &str = "server";

/// Rejected partition component.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PartitionError {
    #[error("{field} must not be empty")]
    Empty { field: &'static str },
    #[error("{field} is {len} bytes, limit is {max}")]
    TooLong {
        field: &'static str,
        len: usize,
        max: usize,
    },
}

fn check(field: &'static str, value: &str, max: usize) -> Result<(), PartitionError> {
    if value.is_empty() {
        return Err(PartitionError::Empty { field });
    }
    if value.len() > max {
        return Err(PartitionError::TooLong {
            field,
            len: value.len(),
            max,
        });
    }
    Ok(())
}

/// Validates an entry key.
///
/// # Errors
///
/// Returns [`PartitionError`] if the key is empty or longer than [`MAX_KEY_LEN`].
pub fn validate_key(key: &str) -> Result<(), PartitionError> {
    check("key", key, MAX_KEY_LEN)
}

/// Scope for a player's partition. Deterministic in `user_id`.
///
/// # Examples
///
/// ```
/// use datacache_core::partition::player_scope;
///
/// assert_eq!(player_scope(1234), "player_1234");
/// ```
#[must_use]
pub fn player_scope(user_id: u64) -> String {
    format!("player_{user_id}")
}

/// Identity of one cached key space.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PartitionKey {
    name: String,
    scope: String,
    ordered: bool,
}

impl PartitionKey {
    /// Creates a validated partition key.
    ///
    /// # Errors
    ///
    /// Returns [`PartitionError`] if `name` or `scope` is empty or too long.
    pub fn new(
        name: impl Into<String>,
        scope: impl Into<String>,
        ordered: bool,
    ) -> Result<Self, PartitionError> {
        let name = name.into();
        let scope = scope.into();
        check("name", &name, MAX_NAME_LEN)?;
        check("scope", &scope, MAX_SCOPE_LEN)?;
        Ok(Self {
            name,
            scope,
            ordered,
        })
    }

    /// Module name shared by every scope of this data set.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Scope distinguishing this key space from others under the same name.
    #[must_use]
    pub fn scope(&self) -> &str {
        &self.scope
    }

    /// Whether the backing partition supports ordered range queries.
    #[must_use]
    pub fn is_ordered(&self) -> bool {
        self.ordered
    }
}

impl fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.name, self.scope)?;
        if self.ordered {
            f.write_str(" (ordered)")?;
        }
        Ok(())
    }
}
