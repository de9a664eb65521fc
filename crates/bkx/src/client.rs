// ai
//! 🎬 *[INT. COMPOSITION ROOT — the wires are all here, and none of them are connected yet.]*
//!
//! 🎯 The `Client` — one publish call, start to finish:
//!
//! ```text
//!   Vec<Event> ──encode──▶ Vec<EncodedEvent> ──build──▶ BulkPayload
//!                  │                                       │
//!                  └─▶ encode_failures (never sent)        ▼
//!                                                 pool.get_connection().send_bulk()
//!                                                          │
//!           transport error ◀──────────────────────────────┤
//!           (mark dead, all retry)                         ▼
//!                                          classify_bulk_response(status, body, events, policy)
//!                                                          │
//!                               PublishOutcome { retry, dead_letter, stats } ◀┘
//! ```
//!
//! 🧠 Knowledge graph:
//! - `ClientConfig` lives here, next to the thing it configures.
//! - Each worker owns its own `Client`. The encoder keeps a size hint, the
//!   client takes `&mut self` to encode, so sharing one is a compile error. 🦀
//! - The caller only ever sees "these events need retry", never a raw network error.
//!   Except when *every* host of a multi-host pool is dead: then `publish` fails with
//!   `AllHostsUnreachable`, which still carries the events (`downcast` for them).
//! - `ShutdownSignal` stops new publish attempts. An in-flight one runs to completion.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::common::{EncodeFailure, EncodedEvent, Event, PublishStats};
use crate::encoding::EventEncoder;
use crate::payload::{PayloadEncoder, build_bulk_payload};
use crate::policy::NonIndexablePolicy;
use crate::response::classify_bulk_response;
use crate::transport::{Connection, ConnectionPool, Pool};

// ===== Config =====

/// 📡 Everything one `Client` needs to know. Defaults are the boring, safe kind.
#[derive(Debug, Deserialize, Clone)]
pub struct ClientConfig {
    /// 📡 `"es1:9200"` or `"https://es1:9200"`. At least one. More is a round robin.
    #[serde(default)]
    pub hosts: Vec<String>,
    /// 🔧 Scheme for hosts that don't bring their own.
    #[serde(default = "default_protocol")]
    pub protocol: String,
    /// 🧭 URL prefix, for clusters living behind a proxy path.
    #[serde(default)]
    pub path: Option<String>,
    /// 🔒 Basic auth. The bouncer at the club.
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    /// 🔒 API key. Wins over basic auth when both are set.
    #[serde(default)]
    pub api_key: Option<String>,
    /// 📋 Static headers on every request.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// 📋 Static query parameters on every request.
    #[serde(default)]
    pub params: BTreeMap<String, String>,
    /// ⏱️ Per request. Bulk calls can be meaty.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// 🔄 Extra publish attempts the worker makes for retryable events.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// 🫁 0 = off, 1..=9 = gzip level.
    #[serde(default)]
    pub compression_level: u32,
    /// 🎯 Index name pattern, `%{[field]}` and `%{+yyyy.MM.dd}` welcome.
    #[serde(default = "default_index")]
    pub index: String,
    /// 🚰 Ingest pipeline pattern. Optional.
    #[serde(default)]
    pub pipeline: Option<String>,
    #[serde(default)]
    pub non_indexable_policy: NonIndexablePolicy,
    /// 🪦 Base of the dead-host backoff, doubled per consecutive failure.
    #[serde(default = "default_dead_timeout_secs")]
    pub dead_timeout_secs: u64,
}

fn default_protocol() -> String {
    "http".to_string()
}

fn default_timeout_secs() -> u64 {
    90
}

fn default_max_retries() -> u32 {
    3
}

fn default_index() -> String {
    "events-%{+yyyy.MM.dd}".to_string()
}

fn default_dead_timeout_secs() -> u64 {
    60
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            hosts: Vec::new(),
            protocol: default_protocol(),
            path: None,
            username: None,
            password: None,
            api_key: None,
            headers: BTreeMap::new(),
            params: BTreeMap::new(),
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
            compression_level: 0,
            index: default_index(),
            pipeline: None,
            non_indexable_policy: NonIndexablePolicy::default(),
            dead_timeout_secs: default_dead_timeout_secs(),
        }
    }
}

// ===== Errors & outcomes =====

/// 💀 Every host in the pool is benched and the last attempt failed at the transport
/// layer too. The batch rides along so nothing is lost.
#[derive(Debug)]
pub struct AllHostsUnreachable {
    pub events: Vec<Event>,
}

impl fmt::Display for AllHostsUnreachable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "💀 every configured host is unreachable; {} event(s) handed back for later",
            self.events.len()
        )
    }
}

impl std::error::Error for AllHostsUnreachable {}

/// 📬 What one publish call produced.
#[derive(Debug, Default)]
pub struct PublishOutcome {
    /// 🔄 send these again, in this order
    pub retry: Vec<Event>,
    /// 🪦 send these next, they're bound for the dead-letter index
    pub dead_letter: Vec<Event>,
    /// 💀 never encoded, never sent
    pub encode_failures: Vec<EncodeFailure>,
    pub stats: PublishStats,
}

impl PublishOutcome {
    fn retry_all(events: Vec<EncodedEvent>) -> Self {
        let retry: Vec<Event> = events.into_iter().map(EncodedEvent::into_event).collect();
        Self {
            stats: PublishStats {
                retryable: retry.len(),
                ..Default::default()
            },
            retry,
            ..Default::default()
        }
    }
}

// ===== On-connect callbacks =====

/// 🔌 Runs against every healthy connection during `Client::connect`.
///
/// Install templates, check licenses, create pipelines... whatever needs to be
/// true before the first bulk request lands.
#[async_trait]
pub trait OnConnect: Send + Sync {
    fn name(&self) -> &str;
    async fn on_connect(&self, connection: &Connection) -> Result<()>;
}

/// 📒 The callbacks, owned by whoever composes the client. No global registry.
#[derive(Clone, Default)]
pub struct OnConnectRegistry {
    callbacks: Vec<Arc<dyn OnConnect>>,
}

impl OnConnectRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, callback: impl OnConnect + 'static) -> &mut Self {
        self.callbacks.push(Arc::new(callback));
        self
    }

    pub fn len(&self) -> usize {
        self.callbacks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.callbacks.is_empty()
    }
}

impl fmt::Debug for OnConnectRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.callbacks.iter().map(|c| c.name()))
            .finish()
    }
}

// ===== Shutdown =====

/// 🛑 "Please stop starting things." Cloned into every worker and client.
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    sender: Arc<watch::Sender<bool>>,
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownSignal {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(false);
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn trigger(&self) {
        self.sender.send_replace(true);
    }

    pub fn is_triggered(&self) -> bool {
        *self.sender.borrow()
    }

    /// ⏳ Resolves once `trigger` was called, from anywhere.
    pub async fn triggered(&self) {
        let mut receiver = self.sender.subscribe();
        // the sender lives in self, so the channel can't close under us
        let _ = receiver.wait_for(|stop| *stop).await;
    }
}

// ===== Client =====

/// 🎯 Encoder + pool + policy. One per worker.
#[derive(Debug)]
pub struct Client {
    config: ClientConfig,
    pool: ConnectionPool,
    encoder: EventEncoder,
    body_encoder: PayloadEncoder,
    on_connect: OnConnectRegistry,
    shutdown: ShutdownSignal,
}

impl Client {
    /// 🚀 Validate the config and wire everything up. No network yet.
    pub fn new(config: ClientConfig, on_connect: OnConnectRegistry) -> Result<Self> {
        Self::build(config, on_connect, None)
    }

    /// 🔌 Like `new`, but every connection dials through `http` instead of a
    /// client built from `timeout_secs`. TLS roots, proxies, and client certs
    /// are the caller's business here; auth, headers and params still come from `config`.
    pub fn with_http_client(
        config: ClientConfig,
        on_connect: OnConnectRegistry,
        http: reqwest::Client,
    ) -> Result<Self> {
        Self::build(config, on_connect, Some(http))
    }

    fn build(
        config: ClientConfig,
        on_connect: OnConnectRegistry,
        http: Option<reqwest::Client>,
    ) -> Result<Self> {
        if config.hosts.is_empty() {
            anyhow::bail!("💀 client.hosts is empty. A bulk client with nowhere to send bulk. Bold.");
        }
        config.non_indexable_policy.validate()?;
        let body_encoder = PayloadEncoder::from_compression_level(config.compression_level)?;
        let encoder = EventEncoder::new(&config.index, config.pipeline.as_deref())
            .context("💀 the index/pipeline pattern didn't compile")?;
        let connections = config
            .hosts
            .iter()
            .map(|host| {
                let connection = Connection::new(host, &config)?;
                // 🧬 reqwest::Client is an Arc inside; every host shares the one connection pool
                Ok(match &http {
                    Some(http) => connection.with_http_client(http.clone()),
                    None => connection,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        let pool =
            ConnectionPool::new(connections, Duration::from_secs(config.dead_timeout_secs))?;

        Ok(Self {
            config,
            pool,
            encoder,
            body_encoder,
            on_connect,
            shutdown: ShutdownSignal::new(),
        })
    }

    /// 🛑 Share a shutdown signal with the rest of the process.
    pub fn with_shutdown(mut self, shutdown: ShutdownSignal) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    /// 🩺 Probe every host and run the on-connect callbacks on the healthy ones.
    ///
    /// Hosts that fail either step are marked dead. Fails only if nobody passed.
    pub async fn connect(&self) -> Result<()> {
        let mut healthy = 0usize;
        for connection in self.pool.connections() {
            match self.prepare(connection).await {
                Ok(version) => {
                    info!("✅ connected to {} (version {version})", connection.url());
                    healthy += 1;
                }
                Err(err) => {
                    warn!("🪦 {} failed to connect: {err:#}", connection.url());
                    self.pool.mark_dead(connection);
                }
            }
        }
        if healthy == 0 {
            anyhow::bail!(
                "💀 none of the {} configured host(s) passed the connect checks",
                self.pool.connections().len()
            );
        }
        Ok(())
    }

    async fn prepare(&self, connection: &Connection) -> Result<String> {
        let version = connection.probe().await?;
        for callback in &self.on_connect.callbacks {
            callback
                .on_connect(connection)
                .await
                .with_context(|| format!("💀 on-connect callback '{}' failed", callback.name()))?;
        }
        Ok(version)
    }

    /// 🔄 Encode a batch. Failures come back separately and never touch the payload.
    pub fn encode(&mut self, events: Vec<Event>) -> (Vec<EncodedEvent>, Vec<EncodeFailure>) {
        let mut encoded = Vec::with_capacity(events.len());
        let mut failures = Vec::new();
        for event in events {
            match self.encoder.encode(event) {
                Ok(e) => encoded.push(e),
                Err(failure) => {
                    warn!("💀 dropping an event that failed to encode: {:#}", failure.error);
                    failures.push(failure);
                }
            }
        }
        (encoded, failures)
    }

    /// 📡 Encode and publish one batch.
    pub async fn publish(&mut self, events: Vec<Event>) -> Result<PublishOutcome> {
        let (encoded, failures) = self.encode(events);
        let mut outcome = self.publish_encoded(encoded).await?;
        outcome.stats.encode_failures += failures.len();
        outcome.encode_failures = failures;
        Ok(outcome)
    }

    /// 📡 Publish events that were already encoded, in the given order.
    pub async fn publish_encoded(&self, events: Vec<EncodedEvent>) -> Result<PublishOutcome> {
        if events.is_empty() {
            return Ok(PublishOutcome::default());
        }
        if self.shutdown.is_triggered() {
            info!(
                "🛑 shutting down; not starting a publish of {} event(s)",
                events.len()
            );
            return Ok(PublishOutcome::retry_all(events));
        }

        let payload = match build_bulk_payload(&events, &self.body_encoder) {
            Ok(Some(payload)) => payload,
            Ok(None) => return Ok(PublishOutcome::default()),
            Err(err) => {
                error!("💀 could not build the bulk body: {err:#}");
                return Ok(PublishOutcome::retry_all(events));
            }
        };

        let connection = self.pool.get_connection();
        let reply = match connection.send_bulk(&payload).await {
            Ok(reply) => reply,
            Err(err) => {
                error!("📡 {} is unreachable: {err:#}", connection.url());
                self.pool.mark_dead(&connection);
                if !self.pool.is_single() && self.pool.live_count() == 0 {
                    return Err(AllHostsUnreachable {
                        events: events.into_iter().map(EncodedEvent::into_event).collect(),
                    }
                    .into());
                }
                return Ok(PublishOutcome::retry_all(events));
            }
        };

        match reply.status {
            503 | 504 => self.pool.mark_dead(&connection),
            status if status < 300 => self.pool.mark_live(&connection),
            _ => {}
        }

        let classification =
            classify_bulk_response(reply.status, &reply.body, events, &self.config.non_indexable_policy);
        debug!("📊 publish via {}: {:?}", connection.url(), classification.stats);
        Ok(PublishOutcome {
            retry: classification.retry,
            dead_letter: classification.dead_letter,
            encode_failures: Vec::new(),
            stats: classification.stats,
        })
    }

    /// 🧹 Cancel resurrection timers. The connections go when the client goes.
    pub fn close(&self) {
        self.pool.close();
    }
}
