//! Concrete [`BackingStore`](super::BackingStore) implementations.

pub mod memory;

pub use memory::MemoryStore;
