//! Periodic auto-save and teardown of data instances.
//!
//! [`AutoSaveScheduler`] owns a [`DataRegistry`] of live instances and a
//! [`Clock`]. Once started, a background worker sweeps the registry every
//! `auto_save_interval`, calling `flush()` on each instance that allows
//! auto-save, paced by a stagger plus random jitter so a sweep does not hit
//! the store in one burst. Sweeps are the only automatic retry path for
//! failed saves: a key that failed stays dirty and is picked up again next
//! sweep.
//!
//! Teardown goes through [`release()`](AutoSaveScheduler::release), which
//! retries the final flush under the configured [`RetryPolicy`] before
//! closing the instance. The instance stays registered, in its closing
//! state, until teardown completes, so its partition cannot be claimed by a
//! new instance while the final saves are still pending.

pub mod clock;
pub mod registry;
pub mod worker;

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use async_trait::async_trait;
use datacache_core::PartitionKey;
use futures_util::future::join_all;
use rand::Rng;
use tokio::sync::{oneshot, watch};
use tracing::{debug, info, warn};

pub use clock::{Clock, ManualClock, TokioClock};
pub use registry::{DataRegistry, ManagedData};
pub use worker::{BackgroundRunnable, BackgroundWorker};

use crate::config::{DataConfig, RetryPolicy};
use crate::error::DataError;
use crate::metrics;
use crate::storage::{Lifecycle, SaveReport};

/// Lifecycle of the background sweep loop.
///
/// State machine: Idle -> Running -> Stopped (-> Running on restart)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    /// Constructed, loop never started.
    Idle,
    Running,
    /// Loop halted; may be started again.
    Stopped,
}

/// Outcome of one sweep over the registry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Instances flushed.
    pub visited: usize,
    /// Instances skipped because auto-save is disabled on them or they are
    /// being released.
    pub skipped: usize,
    /// Keys persisted across all instances.
    pub saved: usize,
    /// Keys that failed, per instance. They stay dirty for the next sweep.
    pub failed: Vec<(PartitionKey, String, DataError)>,
}

/// Outcome of tearing one instance down.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseReport {
    pub partition: PartitionKey,
    /// Flush attempts made before closing.
    pub attempts: u32,
    /// Keys saved over all attempts; `failed` lists keys discarded dirty.
    pub report: SaveReport,
}

/// Work the running loop accepts besides its periodic tick.
enum SchedulerTask {
    Sweep(oneshot::Sender<SweepReport>),
}

struct SchedulerCore {
    registry: DataRegistry,
    clock: Arc<dyn Clock>,
    config: Arc<DataConfig>,
    sweeps: watch::Sender<u64>,
}

struct SweepRunnable {
    core: Arc<SchedulerCore>,
}

#[async_trait]
impl BackgroundRunnable for SweepRunnable {
    type Task = SchedulerTask;

    async fn run(&mut self, task: SchedulerTask) {
        match task {
            SchedulerTask::Sweep(reply) => {
                let report = self.core.sweep().await;
                let _ = reply.send(report);
            }
        }
    }

    async fn on_tick(&mut self) {
        self.core.sweep().await;
    }

    async fn shutdown(&mut self) {
        debug!("auto-save loop exited");
    }
}

/// Explicit, constructible auto-save scheduler.
pub struct AutoSaveScheduler {
    core: Arc<SchedulerCore>,
    state: ArcSwap<SchedulerState>,
    worker: parking_lot::Mutex<Option<BackgroundWorker<SweepRunnable>>>,
}

impl AutoSaveScheduler {
    /// Creates an idle scheduler with an empty registry.
    #[must_use]
    pub fn new(config: Arc<DataConfig>, clock: Arc<dyn Clock>) -> Self {
        let (sweeps, _rx) = watch::channel(0);
        Self {
            core: Arc::new(SchedulerCore {
                registry: DataRegistry::new(),
                clock,
                config,
                sweeps,
            }),
            state: ArcSwap::from_pointee(SchedulerState::Idle),
            worker: parking_lot::Mutex::new(None),
        }
    }

    /// Creates a scheduler driven by the tokio timer.
    #[must_use]
    pub fn with_tokio_clock(config: Arc<DataConfig>) -> Self {
        Self::new(config, Arc::new(TokioClock::new()))
    }

    #[must_use]
    pub fn registry(&self) -> &DataRegistry {
        &self.core.registry
    }

    #[must_use]
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.core.clock
    }

    /// Add an instance to future sweeps.
    ///
    /// # Errors
    ///
    /// [`DataError::DuplicatePartition`] if a live instance already holds the
    /// partition.
    pub fn register(&self, instance: Arc<dyn ManagedData>) -> Result<(), DataError> {
        self.core.registry.register(instance)
    }

    /// Spawns the sweep loop. Returns `false` if it is already running.
    pub fn start(&self) -> bool {
        let mut worker = self.worker.lock();
        if worker.is_some() {
            return false;
        }
        let interval = self.core.config.auto_save_interval;
        *worker = Some(BackgroundWorker::start(
            SweepRunnable {
                core: Arc::clone(&self.core),
            },
            Arc::clone(&self.core.clock),
            interval,
        ));
        self.state.store(Arc::new(SchedulerState::Running));
        info!(interval_ms = interval.as_millis(), "auto-save scheduler started");
        true
    }

    /// Halts the sweep loop, letting a sweep in progress finish first.
    pub async fn stop(&self) {
        let worker = self.worker.lock().take();
        let Some(mut worker) = worker else {
            return;
        };
        worker.stop().await;
        self.state.store(Arc::new(SchedulerState::Stopped));
        info!("auto-save scheduler stopped");
    }

    #[must_use]
    pub fn state(&self) -> SchedulerState {
        **self.state.load()
    }

    /// Runs one sweep on the caller's task.
    pub async fn sweep_now(&self) -> SweepReport {
        self.core.sweep().await
    }

    /// Asks the running loop for an immediate sweep and waits for it.
    ///
    /// Returns `None` if the loop is not running.
    pub async fn request_sweep(&self) -> Option<SweepReport> {
        let sender = self.worker.lock().as_ref().and_then(BackgroundWorker::sender)?;
        let (reply, report) = oneshot::channel();
        sender.send(SchedulerTask::Sweep(reply)).await.ok()?;
        report.await.ok()
    }

    /// Number of sweeps completed so far.
    #[must_use]
    pub fn completed_sweeps(&self) -> u64 {
        *self.core.sweeps.borrow()
    }

    /// Receiver that observes the completed-sweep counter.
    #[must_use]
    pub fn sweep_watch(&self) -> watch::Receiver<u64> {
        self.core.sweeps.subscribe()
    }

    /// Tears down the instance registered under `partition`: flushes it
    /// under the player-left [`RetryPolicy`], closes it, then unregisters it.
    ///
    /// Returns `None` if nothing is registered under `partition` or another
    /// caller already started its teardown.
    pub async fn release(&self, partition: &PartitionKey) -> Option<ReleaseReport> {
        let instance = self.core.registry.get(partition)?;
        if !instance.begin_close() {
            return None;
        }
        let policy = self.core.config.player_left_retry();
        Some(self.core.release(instance, &policy).await)
    }

    /// Stops the loop and releases every registered instance concurrently.
    ///
    /// Instances already being released elsewhere are left to that release.
    pub async fn shutdown(&self) -> Vec<ReleaseReport> {
        self.stop().await;
        let instances: Vec<Arc<dyn ManagedData>> = self
            .core
            .registry
            .snapshot()
            .into_iter()
            .filter(|instance| instance.begin_close())
            .collect();
        info!(instances = instances.len(), "releasing all data instances");
        let policy = self.core.config.player_left_retry();
        join_all(
            instances
                .into_iter()
                .map(|instance| self.core.release(instance, &policy)),
        )
        .await
    }
}

impl SchedulerCore {
    async fn sweep(&self) -> SweepReport {
        let started = self.clock.now();
        let mut report = SweepReport::default();

        for instance in self.registry.snapshot() {
            if !instance.can_auto_save() || instance.lifecycle() != Lifecycle::Open {
                report.skipped += 1;
                continue;
            }
            if report.visited > 0 {
                self.clock.sleep(self.pause()).await;
            }
            report.visited += 1;

            let flushed = instance.flush().await;
            report.saved += flushed.saved.len();
            for (key, error) in flushed.failed {
                warn!(partition = %instance.partition(), key = %key, error = %error, "auto-save failed");
                report.failed.push((instance.partition().clone(), key, error));
            }
        }

        let elapsed = self.clock.now().saturating_sub(started);
        metrics::record_sweep(report.visited, report.failed.len(), elapsed);
        self.sweeps.send_modify(|count| *count += 1);
        debug!(
            visited = report.visited,
            skipped = report.skipped,
            saved = report.saved,
            failed = report.failed.len(),
            "auto-save sweep finished"
        );
        report
    }

    /// Gap before the next instance in a sweep: stagger plus up to
    /// `autosave_jitter` of random delay.
    fn pause(&self) -> Duration {
        let jitter_ms = u64::try_from(self.config.autosave_jitter.as_millis()).unwrap_or(u64::MAX);
        let jitter = if jitter_ms == 0 {
            Duration::ZERO
        } else {
            Duration::from_millis(rand::rng().random_range(0..=jitter_ms))
        };
        self.config.autosave_stagger + jitter
    }

    /// Flushes and closes an instance whose teardown the caller has begun.
    async fn release(&self, instance: Arc<dyn ManagedData>, policy: &RetryPolicy) -> ReleaseReport {
        let partition = instance.partition().clone();
        let mut attempts = 0;
        let mut saved = Vec::new();

        loop {
            let flushed = instance.flush().await;
            attempts += 1;
            saved.extend(flushed.saved);
            if flushed.failed.is_empty() {
                break;
            }
            if !policy.allows(attempts) {
                warn!(
                    partition = %partition,
                    attempts,
                    dirty = flushed.failed.len(),
                    "giving up on final flush"
                );
                break;
            }
            warn!(
                partition = %partition,
                attempt = attempts,
                retry_in_ms = policy.interval.as_millis(),
                "final flush failed, retrying"
            );
            self.clock.sleep(policy.interval).await;
        }

        let mut report = instance.close().await;
        self.registry.remove_closed(&partition);
        saved.append(&mut report.saved);
        report.saved = saved;
        info!(partition = %partition, attempts, saved = report.saved.len(), "data instance released");
        ReleaseReport {
            partition,
            attempts,
            report,
        }
    }
}
