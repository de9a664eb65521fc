//! 📡 bkx — a resilient bulk ingest client.
//!
//! 🧠 Knowledge graph:
//! - `common`: `Event`, `EncodedEvent`, `PublishStats`, the nouns
//! - `encoding`: `Event` → `EncodedEvent` (index/pipeline selectors, body bytes)
//! - `payload`: `[EncodedEvent]` → `_bulk` body, plain or gzip
//! - `transport`: `Connection` + `ConnectionPool` (round robin, dead-host backoff)
//! - `response`: streaming scanner + classifier over the bulk reply
//! - `policy`: what happens to events the server will never accept
//! - `client`: the composition root that wires all of the above
//! - `workers`: retry loop over a channel of batches
//! - `source` / `summary` / `app_config`: the CLI's file, receipt, and settings
//!
//! 🦆 `run` is what the CLI calls. Everything else is for embedding.

pub mod app_config;
pub mod client;
pub mod common;
pub mod encoding;
pub mod payload;
pub mod policy;
pub mod response;
pub mod source;
pub mod summary;
pub mod transport;
pub mod workers;

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use futures::future::join_all;
use tracing::info;

use crate::app_config::{AppConfig, RuntimeConfig};
use crate::client::{Client, ClientConfig, OnConnectRegistry, ShutdownSignal};
use crate::common::{Event, PublishStats};
use crate::workers::{PublishWorker, RetryBackoff, Worker};

pub use crate::client::{AllHostsUnreachable, OnConnect, PublishOutcome};
pub use crate::policy::NonIndexablePolicy;

/// 🚀 Read the configured NDJSON file and publish all of it.
pub async fn run(config: AppConfig) -> Result<PublishStats> {
    run_until(config, ShutdownSignal::new()).await
}

/// 🚀 `run`, but with a shutdown signal someone else can pull.
pub async fn run_until(config: AppConfig, shutdown: ShutdownSignal) -> Result<PublishStats> {
    let events = source::read_events(Path::new(&config.source.file_name)).await?;
    info!(
        "📖 {} event(s) loaded from '{}'",
        events.len(),
        config.source.file_name
    );
    publish_all(&config.client, &config.runtime, events, shutdown).await
}

/// 🧵 Fan `events` out to `runtime.workers` publish workers in `batch_size` chunks.
pub async fn publish_all(
    client_config: &ClientConfig,
    runtime: &RuntimeConfig,
    events: Vec<Event>,
    shutdown: ShutdownSignal,
) -> Result<PublishStats> {
    if runtime.workers == 0 || runtime.batch_size == 0 || runtime.queue_capacity == 0 {
        anyhow::bail!(
            "💀 runtime.workers, runtime.batch_size and runtime.queue_capacity all have to be at least 1"
        );
    }
    let backoff = RetryBackoff::new(
        Duration::from_millis(runtime.retry_backoff_init_ms),
        Duration::from_millis(runtime.retry_backoff_max_ms),
    );

    let (tx, rx) = async_channel::bounded::<Vec<Event>>(runtime.queue_capacity);
    let mut handles = Vec::with_capacity(runtime.workers);
    for id in 0..runtime.workers {
        let client = Client::new(client_config.clone(), OnConnectRegistry::new())
            .context("💀 could not build a client for a publish worker")?
            .with_shutdown(shutdown.clone());
        client.connect().await?;
        handles.push(PublishWorker::new(id, rx.clone(), client, backoff, shutdown.clone()).start());
    }
    drop(rx);

    let mut events = events.into_iter();
    loop {
        let batch: Vec<Event> = events.by_ref().take(runtime.batch_size).collect();
        if batch.is_empty() {
            break;
        }
        tx.send(batch)
            .await
            .context("💀 every publish worker hung up before the events ran out")?;
    }
    drop(tx);

    let mut total = PublishStats::default();
    for joined in join_all(handles).await {
        let stats = joined.context("💀 a publish worker panicked")??;
        total.merge(&stats);
    }
    info!("🏁 publish finished: {total:?}");
    Ok(total)
}
