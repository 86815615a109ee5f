//! Datacache Server: write-back persistence cache over a remote key/value
//! store, with load/save coalescing, dirty tracking, and scheduled auto-save.

pub mod config;
pub mod error;
pub mod metrics;
pub mod scheduler;
pub mod storage;

pub use config::{DataArgs, DataConfig, Environment, RetryPolicy};
pub use error::DataError;
pub use scheduler::{AutoSaveScheduler, Clock, ManualClock, SweepReport, TokioClock};
pub use storage::{BackingStore, Data, DataFactory, Lifecycle, MemoryStore, SaveMode, SaveReport};
