//! Store operations reported through success/failure events.

use std::fmt;

use serde::{Deserialize, Serialize};

/// The backing-store call an event refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataMethod {
    /// Read of a key (initial load).
    Get,
    /// Plain overwrite of a key.
    Set,
    /// Removal of a key.
    Remove,
    /// Atomic read-modify-write computed by the store.
    Update,
    /// Subscription to store-level changes of a key.
    OnUpdate,
}

impl DataMethod {
    /// Stable lowercase name, used in logs, metrics labels and events.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "get",
            Self::Set => "set",
            Self::Remove => "remove",
            Self::Update => "update",
            Self::OnUpdate => "on_update",
        }
    }
}

impl fmt::Display for DataMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
