//! Datacache Core: value model, `MsgPack` codec, partition identity and
//! numeric increments shared by the caching engine and its store adapters.

pub mod method;
pub mod numeric;
pub mod partition;
pub mod types;

pub use method::DataMethod;
pub use numeric::{IncrementError, Incrementable};
pub use partition::{PartitionError, PartitionKey};
pub use types::{StorageValue, Value};
