//! 🎬 *[a channel fills with batches. somewhere, a cluster is having a bad day.]*
//! *[the worker does not panic. the worker waits, jitters, and tries again.]*
//!
//! 📡 The PublishWorker — drains `Vec<Event>` batches from an `async_channel`,
//! publishes each one through its own `Client`, and owns the retry loop the
//! client deliberately doesn't have:
//!
//! - retryable events go around again, up to `max_retries` extra attempts,
//!   with exponential backoff and ±10% jitter between attempts
//! - dead-letter follow-ups go out right away, they don't spend a retry
//! - `AllHostsUnreachable` is just "everything is retryable, and wait a bit"
//! - whatever is still pending when the budget runs out is counted as `failed`
//!
//! 🛑 On shutdown it stops starting publishes, but keeps draining the channel
//! (counting what it skips as failed) so the producer never blocks on a full queue.

use std::time::Duration;

use anyhow::Result;
use async_channel::Receiver;
use rand::Rng;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::Worker;
use crate::client::{AllHostsUnreachable, Client, PublishOutcome, ShutdownSignal};
use crate::common::{Event, PublishStats};

/// ⏳ Exponential backoff between publish attempts. `init * 2^attempt`, capped, jittered.
#[derive(Debug, Clone, Copy)]
pub struct RetryBackoff {
    init: Duration,
    max: Duration,
}

impl RetryBackoff {
    pub fn new(init: Duration, max: Duration) -> Self {
        Self {
            init,
            max: max.max(init),
        }
    }

    /// ⏱️ How long to sleep before retry number `attempt` (0-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(20);
        let raw = self.init.saturating_mul(2u32.saturating_pow(exponent));
        let capped = raw.min(self.max);
        let jitter = rand::thread_rng().gen_range(0.9..=1.1);
        capped.mul_f64(jitter).clamp(self.init, self.max)
    }
}

/// 📡 One client, one channel, one retry budget per batch.
#[derive(Debug)]
pub struct PublishWorker {
    id: usize,
    rx: Receiver<Vec<Event>>,
    client: Client,
    backoff: RetryBackoff,
    shutdown: ShutdownSignal,
}

impl PublishWorker {
    pub fn new(
        id: usize,
        rx: Receiver<Vec<Event>>,
        client: Client,
        backoff: RetryBackoff,
        shutdown: ShutdownSignal,
    ) -> Self {
        Self {
            id,
            rx,
            client,
            backoff,
            shutdown,
        }
    }

    /// 🔄 Publish one batch until nothing is pending or the budget is spent.
    ///
    /// `retryable` in the returned stats counts every retry decision along the way;
    /// `failed` counts only what was finally given up on.
    pub async fn publish_with_retries(&mut self, batch: Vec<Event>) -> Result<PublishStats> {
        let max_retries = self.client.config().max_retries;
        let mut stats = PublishStats::default();
        let mut pending = batch;
        let mut attempt = 0u32;

        while !pending.is_empty() {
            let outcome = match self.client.publish(pending).await {
                Ok(outcome) => outcome,
                Err(err) => {
                    let unreachable = err.downcast::<AllHostsUnreachable>()?;
                    warn!("📡 worker {}: {unreachable}", self.id);
                    PublishOutcome {
                        stats: PublishStats {
                            retryable: unreachable.events.len(),
                            ..Default::default()
                        },
                        retry: unreachable.events,
                        ..Default::default()
                    }
                }
            };
            stats.merge(&outcome.stats);

            let retry_due = !outcome.retry.is_empty();
            pending = outcome.retry;
            pending.extend(outcome.dead_letter);

            if !retry_due {
                // 🪦 only dead letters left (or nothing). they don't spend a retry.
                continue;
            }
            if attempt >= max_retries || self.shutdown.is_triggered() {
                warn!(
                    "⏳ worker {}: giving up on {} event(s) after {} retr{}",
                    self.id,
                    pending.len(),
                    attempt,
                    if attempt == 1 { "y" } else { "ies" }
                );
                stats.failed += pending.len();
                break;
            }

            let delay = self.backoff.delay(attempt);
            attempt += 1;
            debug!(
                "🔄 worker {}: retry #{attempt} of {} event(s) in {delay:?}",
                self.id,
                pending.len()
            );
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = self.shutdown.triggered() => {}
            }
        }
        Ok(stats)
    }
}

impl Worker for PublishWorker {
    fn start(mut self) -> JoinHandle<Result<PublishStats>> {
        tokio::spawn(async move {
            debug!("📥 worker {} started draining the channel", self.id);
            let mut total = PublishStats::default();
            while let Ok(batch) = self.rx.recv().await {
                if self.shutdown.is_triggered() {
                    total.failed += batch.len();
                    continue;
                }
                debug!("🪣 worker {} received a batch of {} event(s)", self.id, batch.len());
                let stats = self.publish_with_retries(batch).await?;
                total.merge(&stats);
            }
            info!("🏁 worker {}: channel closed, done. {total:?}", self.id);
            self.client.close();
            Ok(total)
        })
    }
}
