//! Demo driver for the write-back cache.
//!
//! Runs a small session against the in-memory store: a few players join,
//! earn coins, the auto-save loop flushes them, one player leaves, and the
//! process shuts down with a final flush. Prints a JSON summary to stdout.
//!
//! ```text
//! data-demo --players 3 --auto-save-secs 1 --store-latency-ms 20
//! ```

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use datacache_core::{DataMethod, Value};
use datacache_server::storage::BackingStore;
use datacache_server::{AutoSaveScheduler, DataArgs, DataConfig, DataFactory, MemoryStore};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "data-demo", about = "Exercise the write-back cache against an in-memory store")]
struct Cli {
    #[command(flatten)]
    data: DataArgs,

    /// Number of simulated players.
    #[arg(long, default_value_t = 3)]
    players: u64,

    /// Artificial latency added to every store call.
    #[arg(long, default_value_t = 0)]
    store_latency_ms: u64,

    /// Keep the auto-save loop running until Ctrl-C before shutting down.
    #[arg(long, default_value_t = false)]
    wait_for_ctrl_c: bool,

    /// Emit logs as JSON.
    #[arg(long, default_value_t = false)]
    json_logs: bool,
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    let config = Arc::new(DataConfig::from(cli.data));
    info!(
        auto_save_ms = config.auto_save_interval.as_millis(),
        environment = ?config.environment,
        suppressed = config.persistence_suppressed(),
        "configuration loaded"
    );

    let remote = Arc::new(MemoryStore::new());
    remote.set_latency(Duration::from_millis(cli.store_latency_ms));
    let store: Arc<dyn BackingStore> = remote.clone();

    let scheduler = Arc::new(AutoSaveScheduler::with_tokio_clock(config.clone()));
    let players: DataFactory<Value> =
        DataFactory::new("Players", store, config.clone(), scheduler.clone());
    let server = players.for_server(false).context("creating server data")?;
    scheduler.start();

    for user_id in 1..=cli.players {
        let data = players
            .for_player(user_id, false)
            .with_context(|| format!("creating data for player {user_id}"))?;
        let coins = data.get_or("coins", Value::Int(0)).await?;
        info!(user_id, coins = ?coins, "player joined");

        let reward = i64::try_from(user_id).unwrap_or(i64::MAX).saturating_mul(10);
        data.increment("coins", Value::Int(reward)).await?;
        data.set("name", Value::from(format!("player-{user_id}"))).await?;
        server.increment("joins", Value::Int(1)).await?;
    }

    let sweep = scheduler
        .request_sweep()
        .await
        .context("auto-save loop is not running")?;
    info!(saved = sweep.saved, failed = sweep.failed.len(), "requested sweep finished");

    let left = players.player_left(1).await;

    if cli.wait_for_ctrl_c {
        info!("auto-save loop running; press Ctrl-C to shut down");
        tokio::signal::ctrl_c().await.context("waiting for Ctrl-C")?;
    }

    let released = scheduler.shutdown().await;

    let summary = serde_json::json!({
        "players": cli.players,
        "sweep": { "visited": sweep.visited, "saved": sweep.saved, "failed": sweep.failed.len() },
        "player_left": left.iter().map(|r| serde_json::json!({
            "partition": r.partition.to_string(),
            "attempts": r.attempts,
            "saved": r.report.saved,
        })).collect::<Vec<_>>(),
        "shutdown": released.iter().map(|r| serde_json::json!({
            "partition": r.partition.to_string(),
            "attempts": r.attempts,
            "saved": r.report.saved,
            "discarded": r.report.failed.iter().map(|(key, _)| key.clone()).collect::<Vec<_>>(),
        })).collect::<Vec<_>>(),
        "store_calls": {
            "get": remote.calls(DataMethod::Get),
            "set": remote.calls(DataMethod::Set),
            "remove": remote.calls(DataMethod::Remove),
            "update": remote.calls(DataMethod::Update),
        },
        "completed_sweeps": scheduler.completed_sweeps(),
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
