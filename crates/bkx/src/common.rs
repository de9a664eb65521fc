//! 📦 Common data structures — the building blocks of bkx
//!
//! ---
//!
//! 🎬 COLD OPEN — INT. INGEST PIPELINE — 3:47 AM
//!
//! 🌩️ An `Event` arrives. It has a timestamp, a bag of fields, and a little
//! envelope of metadata that nobody reads until something goes wrong. It does
//! not know which index it will land in. It does not know if the cluster is
//! healthy. It only knows that it happened, and that someone wants it stored.
//!
//! Later it becomes an `EncodedEvent`: bytes, a target index, an action verb.
//! Ready for the wire. Ready for `_bulk`. Ready to be judged by a 409.
//!
//! 🦆
//!
//! ---
//!
//! ⚠️ Positional correspondence lives and dies in this module's types:
//! the Nth `EncodedEvent` in a payload is the Nth item in the response.
//! Nothing that failed to encode is ever an `EncodedEvent`. That's the whole trick.

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use serde_json::{Map, Value};

/// 🔑 Meta key that overrides the target index for one event.
pub const META_INDEX: &str = "index";
/// 🔑 Meta key that overrides the ingest pipeline for one event.
pub const META_PIPELINE: &str = "pipeline";
/// 🔑 Meta key that carries an explicit document id (flips the action to `create`).
pub const META_ID: &str = "_id";

/// 🎯 One structured event. The thing the upstream queue hands us by the thousand.
///
/// - `fields` become the document body.
/// - `meta` is routing info (`index`, `pipeline`, `_id`) that never hits the body.
/// - `dead_letter` is set once an event has been re-routed to the dead-letter index.
///   A dead-lettered event that fails again is dropped, not re-routed. No loops. No ouroboros.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub timestamp: DateTime<Utc>,
    pub meta: Map<String, Value>,
    pub fields: Map<String, Value>,
    pub dead_letter: bool,
}

impl Event {
    /// 🏗️ A fresh event with no metadata. It has fields. It has a time. It has hope.
    pub fn new(timestamp: DateTime<Utc>, fields: Map<String, Value>) -> Self {
        Self {
            timestamp,
            meta: Map::new(),
            fields,
            dead_letter: false,
        }
    }

    /// 🔧 Builder-style meta setter. Mostly for tests and for callers that route by hand.
    pub fn with_meta(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.meta.insert(key.to_string(), value.into());
        self
    }

    /// 📥 Parse one NDJSON line into an `Event`.
    ///
    /// `@timestamp` (RFC 3339) is lifted out of the body, `@metadata` becomes `meta`,
    /// and everything else stays a field. No `@timestamp`? You get `now()`.
    /// Time is a construct. The index pattern still needs one though.
    pub fn from_json_line(line: &[u8]) -> Result<Self> {
        let mut fields: Map<String, Value> = serde_json::from_slice(line)
            .context("💀 This line claims to be a JSON object. It is not. It is a cry for help with curly braces.")?;

        let timestamp = match fields.remove("@timestamp") {
            Some(Value::String(raw)) => DateTime::parse_from_rfc3339(&raw)
                .with_context(|| format!("💀 '@timestamp' = '{raw}' is not RFC 3339. Time is relative, but not THAT relative."))?
                .with_timezone(&Utc),
            Some(other) => anyhow::bail!(
                "💀 '@timestamp' must be a string, got {other}. Numbers are for epochs and we are not doing epochs today."
            ),
            None => Utc::now(),
        };

        let meta = match fields.remove("@metadata") {
            Some(Value::Object(meta)) => meta,
            Some(other) => anyhow::bail!("💀 '@metadata' must be an object, got {other}."),
            None => Map::new(),
        };

        Ok(Self {
            timestamp,
            meta,
            fields,
            dead_letter: false,
        })
    }

    /// 🔍 A meta value, if it exists and is a non-empty string.
    pub(crate) fn meta_str(&self, key: &str) -> Option<&str> {
        match self.meta.get(key) {
            Some(Value::String(s)) if !s.is_empty() => Some(s.as_str()),
            _ => None,
        }
    }

    /// 🔍 Look up a field by dotted path.
    ///
    /// A literal key containing dots wins over a nested walk, because some
    /// shippers flatten (`"host.name": "x"`) and some nest (`{"host":{"name":"x"}}`).
    /// We take both. We're not picky. We're tired.
    pub(crate) fn field(&self, path: &str) -> Option<&Value> {
        if let Some(flat) = self.fields.get(path) {
            return Some(flat);
        }
        let mut segments = path.split('.');
        let mut current = self.fields.get(segments.next()?)?;
        for segment in segments {
            current = current.as_object()?.get(segment)?;
        }
        Some(current)
    }

    /// 📅 The timestamp as the document body spells it: RFC 3339, millis, `Z`.
    pub(crate) fn timestamp_rfc3339(&self) -> String {
        self.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)
    }
}

/// 🎬 The bulk action verb. Two of them. We don't do `update`/`delete` here.
///
/// `Create` whenever the event carries an explicit `_id`: a duplicate natural key
/// should come back as a 409, not silently overwrite yesterday's document.
/// `Index` otherwise, and the server picks the id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BulkAction {
    Index,
    Create,
}

impl BulkAction {
    pub fn as_str(self) -> &'static str {
        match self {
            BulkAction::Index => "index",
            BulkAction::Create => "create",
        }
    }
}

/// 📦 An event that survived encoding: routing resolved, body serialized, ready to ship.
///
/// Immutable once built. The original `Event` rides along because the classifier
/// hands it back on retry and re-encodes it on dead-letter.
#[derive(Debug, Clone)]
pub struct EncodedEvent {
    pub(crate) event: Event,
    pub(crate) action: BulkAction,
    pub(crate) index: String,
    pub(crate) pipeline: Option<String>,
    pub(crate) id: Option<String>,
    pub(crate) source: Vec<u8>,
}

impl EncodedEvent {
    pub fn event(&self) -> &Event {
        &self.event
    }

    pub fn into_event(self) -> Event {
        self.event
    }

    pub fn action(&self) -> BulkAction {
        self.action
    }

    pub fn index(&self) -> &str {
        &self.index
    }

    pub fn pipeline(&self) -> Option<&str> {
        self.pipeline.as_deref()
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    /// 📦 The pre-encoded document body. Raw bytes. No trailing newline.
    pub fn source(&self) -> &[u8] {
        &self.source
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.event.timestamp
    }
}

/// 💀 An event the encoder could not place. It never touches the network.
///
/// The event is handed back untouched, with the reason, so the caller can report
/// it as a local drop. Distinct from anything the server said, because the server
/// never got a say.
#[derive(Debug)]
pub struct EncodeFailure {
    pub event: Event,
    pub error: anyhow::Error,
}

/// 📊 Per-publish counters. Accumulated, reported, discarded. Like a sprint velocity chart.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PublishStats {
    /// ✅ durably stored (item status < 300)
    pub acked: usize,
    /// 🔁 409 on `create` — already there, treated as success
    pub duplicates: usize,
    /// 🔄 429 / 5xx / whole-batch failures — go around again
    pub retryable: usize,
    /// 🗑️ permanently rejected and dropped
    pub non_indexable: usize,
    /// 🪦 permanently rejected and re-routed to the dead-letter index
    pub dead_lettered: usize,
    /// 💀 never made it past the encoder
    pub encode_failures: usize,
    /// ⏳ gave up after exhausting retries (only the worker sets this)
    pub failed: usize,
}

impl PublishStats {
    /// 🔗 Fold another set of counters into this one.
    pub fn merge(&mut self, other: &PublishStats) {
        self.acked += other.acked;
        self.duplicates += other.duplicates;
        self.retryable += other.retryable;
        self.non_indexable += other.non_indexable;
        self.dead_lettered += other.dead_lettered;
        self.encode_failures += other.encode_failures;
        self.failed += other.failed;
    }
}
