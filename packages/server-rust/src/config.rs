//! Process-wide cache configuration.
//!
//! [`DataConfig`] is the plain runtime configuration; [`DataArgs`] is its
//! `clap` surface (flags plus environment variables) for binaries.

use std::time::Duration;

/// Execution environment of the host process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum Environment {
    /// Live deployment: saves always reach the backing store.
    #[default]
    Production,
    /// Local iteration: saves are suppressed unless explicitly enabled.
    Development,
}

/// How many times, and how far apart, a flush is re-attempted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Delay between consecutive attempts.
    pub interval: Duration,
    /// Attempt cap. `None` retries until the flush succeeds.
    pub max_attempts: Option<u32>,
}

impl RetryPolicy {
    /// A single attempt, no retries.
    #[must_use]
    pub fn once() -> Self {
        Self {
            interval: Duration::ZERO,
            max_attempts: Some(1),
        }
    }

    /// Retries forever at `interval`.
    #[must_use]
    pub fn unbounded(interval: Duration) -> Self {
        Self {
            interval,
            max_attempts: None,
        }
    }

    /// Whether another attempt is allowed after `attempts_made` attempts.
    #[must_use]
    pub fn allows(&self, attempts_made: u32) -> bool {
        self.max_attempts.map_or(true, |max| attempts_made < max)
    }
}

/// Configuration shared by every data instance in the process.
#[derive(Debug, Clone)]
pub struct DataConfig {
    /// Substitute the non-persistent in-memory store for the real one.
    pub use_mock_store: bool,
    /// Interval between auto-save sweeps.
    pub auto_save_interval: Duration,
    /// Retry interval for the final flush when a player's data is released.
    pub player_left_save_interval: Duration,
    /// Attempt cap for the final flush when a player's data is released.
    pub player_left_max_attempts: u32,
    /// Allow saves while running in [`Environment::Development`].
    pub save_in_development: bool,
    /// Where the process is running.
    pub environment: Environment,
    /// Fixed pause between two instances within one auto-save sweep.
    pub autosave_stagger: Duration,
    /// Upper bound of the random pause added on top of the stagger.
    pub autosave_jitter: Duration,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            use_mock_store: false,
            auto_save_interval: Duration::from_secs(60),
            player_left_save_interval: Duration::from_secs(10),
            player_left_max_attempts: 5,
            save_in_development: false,
            environment: Environment::Production,
            autosave_stagger: Duration::from_secs(1),
            autosave_jitter: Duration::from_millis(500),
        }
    }
}

impl DataConfig {
    /// Whether saves must skip the backing store entirely.
    #[must_use]
    pub fn persistence_suppressed(&self) -> bool {
        self.environment == Environment::Development && !self.save_in_development
    }

    /// Retry policy for the final flush of a departing player's data.
    #[must_use]
    pub fn player_left_retry(&self) -> RetryPolicy {
        RetryPolicy {
            interval: self.player_left_save_interval,
            max_attempts: Some(self.player_left_max_attempts.max(1)),
        }
    }
}

/// Command-line / environment surface for [`DataConfig`].
#[derive(Debug, Clone, clap::Args)]
pub struct DataArgs {
    /// Use the in-memory store instead of the remote one.
    #[arg(long, env = "DATACACHE_MOCK_STORE", default_value_t = false)]
    pub mock_store: bool,

    /// Seconds between auto-save sweeps.
    #[arg(long, env = "DATACACHE_AUTO_SAVE_SECS", default_value_t = 60)]
    pub auto_save_secs: u64,

    /// Seconds between final-flush retries after a player leaves.
    #[arg(long, env = "DATACACHE_PLAYER_LEFT_SAVE_SECS", default_value_t = 10)]
    pub player_left_save_secs: u64,

    /// Maximum final-flush attempts after a player leaves.
    #[arg(long, env = "DATACACHE_PLAYER_LEFT_ATTEMPTS", default_value_t = 5)]
    pub player_left_attempts: u32,

    /// Persist even when running in development.
    #[arg(long, env = "DATACACHE_SAVE_IN_DEVELOPMENT", default_value_t = false)]
    pub save_in_development: bool,

    /// Execution environment.
    #[arg(long, env = "DATACACHE_ENVIRONMENT", value_enum, default_value_t = Environment::Production)]
    pub environment: Environment,

    /// Milliseconds between instances within a sweep.
    #[arg(long, env = "DATACACHE_AUTOSAVE_STAGGER_MS", default_value_t = 1000)]
    pub autosave_stagger_ms: u64,

    /// Maximum random jitter in milliseconds added to the stagger.
    #[arg(long, env = "DATACACHE_AUTOSAVE_JITTER_MS", default_value_t = 500)]
    pub autosave_jitter_ms: u64,
}

impl From<DataArgs> for DataConfig {
    fn from(args: DataArgs) -> Self {
        Self {
            use_mock_store: args.mock_store,
            auto_save_interval: Duration::from_secs(args.auto_save_secs),
            player_left_save_interval: Duration::from_secs(args.player_left_save_secs),
            player_left_max_attempts: args.player_left_attempts,
            save_in_development: args.save_in_development,
            environment: args.environment,
            autosave_stagger: Duration::from_millis(args.autosave_stagger_ms),
            autosave_jitter: Duration::from_millis(args.autosave_jitter_ms),
        }
    }
}
