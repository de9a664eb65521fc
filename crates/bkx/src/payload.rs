// ai
//! 🎬 *[the events are encoded. the action lines are not. the buffer is empty.]*
//! *["Build me," whispers the payload. "Two lines per event. In order. Always in order."]*
//!
//! 📦 The Payload module — assembling encoded events into one `_bulk` request body.
//!
//! 🧠 Knowledge graph:
//! - `build_bulk_payload`: `[EncodedEvent]` → `{"action":{...}}\n{body}\n` × N → `BulkPayload`
//! - `BodyEncoder`: what happens to the finished bytes before they hit the socket
//!   - `PlainBody` (`plain.rs`): nothing. bytes are bytes.
//!   - `GzipBody` (`gzip.rs`): squish, and say `Content-Encoding: gzip`
//! - `PayloadEncoder`: the enum dispatcher, resolved once from `compression_level`.
//!   Same trait → impls → enum pattern as everywhere else in this crate.
//!
//! ⚠️ Order is the contract. Item N of the response is event N of this payload.
//! If you ever sort, dedupe, or parallelize this loop, the classifier will blame the
//! wrong events for the wrong failures, and it will do it silently. 🦆

mod gzip;
mod plain;

use std::io::Write;

use anyhow::{Context, Result};
use serde::Serialize;

use crate::common::EncodedEvent;

pub use gzip::GzipBody;
pub use plain::PlainBody;

// ===== Trait =====

/// 🫁 Post-processes a finished bulk body. Compression, or the lack of it.
pub trait BodyEncoder: std::fmt::Debug {
    /// 📡 The `Content-Encoding` header value, if any.
    fn content_encoding(&self) -> Option<&'static str>;
    /// 🔄 Turn the raw NDJSON body into what goes on the wire.
    fn encode(&self, raw: Vec<u8>) -> Result<Vec<u8>>;
}

// ===== Dispatcher Enum =====

/// 🎭 The polymorphic body encoder. Picked once at construction, never re-branched per call.
#[derive(Debug, Clone)]
pub enum PayloadEncoder {
    Plain(PlainBody),
    Gzip(GzipBody),
}

impl PayloadEncoder {
    /// 🔧 `0` → plain, `1..=9` → gzip at that level, anything else → config error.
    pub fn from_compression_level(level: u32) -> Result<Self> {
        match level {
            0 => Ok(Self::Plain(PlainBody)),
            1..=9 => Ok(Self::Gzip(GzipBody::new(level))),
            nope => anyhow::bail!(
                "💀 compression_level = {nope}? gzip goes from 0 (off) to 9 (maximum squish). We checked. Twice."
            ),
        }
    }
}

impl BodyEncoder for PayloadEncoder {
    fn content_encoding(&self) -> Option<&'static str> {
        match self {
            Self::Plain(e) => e.content_encoding(),
            Self::Gzip(e) => e.content_encoding(),
        }
    }

    fn encode(&self, raw: Vec<u8>) -> Result<Vec<u8>> {
        match self {
            Self::Plain(e) => e.encode(raw),
            Self::Gzip(e) => e.encode(raw),
        }
    }
}

// ===== The payload =====

/// 📦 One bulk request body, built fresh per attempt and never persisted.
#[derive(Debug, Clone)]
pub struct BulkPayload {
    pub(crate) body: Vec<u8>,
    pub(crate) content_encoding: Option<&'static str>,
    pub(crate) event_count: usize,
    pub(crate) raw_len: usize,
}

impl BulkPayload {
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn content_encoding(&self) -> Option<&'static str> {
        self.content_encoding
    }

    pub fn event_count(&self) -> usize {
        self.event_count
    }

    /// 📏 Size before compression. For the logs. For you. At 3am.
    pub fn raw_len(&self) -> usize {
        self.raw_len
    }
}

/// 🏷️ The inside of the action line. Absent fields are omitted, not nulled.
#[derive(Serialize)]
struct ActionMeta<'a> {
    #[serde(rename = "_index")]
    index: &'a str,
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pipeline: Option<&'a str>,
}

/// 🏗️ Build the bulk body for `events`, in order.
///
/// Returns `Ok(None)` when there is nothing to send. That's "nothing to do", not an error.
pub fn build_bulk_payload(
    events: &[EncodedEvent],
    encoder: &PayloadEncoder,
) -> Result<Option<BulkPayload>> {
    if events.is_empty() {
        return Ok(None);
    }

    // 🧮 body + ~96 bytes of action line per event. vibes-based, usually close.
    let estimated: usize = events.iter().map(|e| e.source.len() + 96).sum();
    let mut raw = Vec::with_capacity(estimated);

    for event in events {
        write_action_line(&mut raw, event)?;
        raw.extend_from_slice(&event.source);
        raw.push(b'\n');
    }

    let raw_len = raw.len();
    let body = encoder
        .encode(raw)
        .context("💀 The bulk body was built and then the body encoder choked on it.")?;

    Ok(Some(BulkPayload {
        body,
        content_encoding: encoder.content_encoding(),
        event_count: events.len(),
        raw_len,
    }))
}

fn write_action_line(buf: &mut Vec<u8>, event: &EncodedEvent) -> Result<()> {
    write!(buf, "{{\"{}\":", event.action.as_str())?;
    serde_json::to_writer(
        &mut *buf,
        &ActionMeta {
            index: &event.index,
            id: event.id.as_deref(),
            pipeline: event.pipeline.as_deref(),
        },
    )
    .context("💀 The JSON that describes JSON failed to become JSON.")?;
    buf.extend_from_slice(b"}\n");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::{Event, META_ID, META_PIPELINE};
    use crate::encoding::EventEncoder;
    use chrono::Utc;
    use serde_json::{Value, json};
    use std::io::Read;

    fn encoded(fields: Value, meta: &[(&str, &str)]) -> EncodedEvent {
        let mut event = Event::new(Utc::now(), fields.as_object().cloned().unwrap_or_default());
        for (k, v) in meta {
            event = event.with_meta(k, *v);
        }
        EventEncoder::new("logs", None)
            .and_then(|mut enc| enc.encode(event).map_err(|f| f.error))
            .expect("💀 test encoder should encode")
    }

    #[test]
    fn the_one_where_every_event_gets_exactly_two_lines_in_order() -> Result<()> {
        let events = vec![
            encoded(json!({"n": 1}), &[]),
            encoded(json!({"n": 2}), &[(META_ID, "id-2"), (META_PIPELINE, "pipe")]),
        ];
        let payload = build_bulk_payload(&events, &PayloadEncoder::from_compression_level(0)?)?
            .expect("💀 two events should make a payload");

        assert_eq!(payload.event_count(), 2);
        assert_eq!(payload.content_encoding(), None);
        let text = String::from_utf8(payload.body().to_vec())?;
        assert!(text.ends_with('\n'), "trailing newline after the last doc is mandatory");
        let lines: Vec<&str> = text.trim_end_matches('\n').split('\n').collect();
        assert_eq!(lines.len(), 4);

        let first_action: Value = serde_json::from_str(lines[0])?;
        assert_eq!(first_action, json!({"index": {"_index": "logs"}}));
        assert_eq!(serde_json::from_str::<Value>(lines[1])?["n"], json!(1));

        let second_action: Value = serde_json::from_str(lines[2])?;
        assert_eq!(
            second_action,
            json!({"create": {"_index": "logs", "_id": "id-2", "pipeline": "pipe"}})
        );
        assert_eq!(serde_json::from_str::<Value>(lines[3])?["n"], json!(2));
        Ok(())
    }

    #[test]
    fn the_one_where_no_events_means_no_payload() -> Result<()> {
        let payload = build_bulk_payload(&[], &PayloadEncoder::from_compression_level(0)?)?;
        assert!(payload.is_none());
        Ok(())
    }

    #[test]
    fn the_one_where_gzip_squishes_and_unsquishes() -> Result<()> {
        let events = vec![encoded(json!({"msg": "a".repeat(500)}), &[])];
        let plain = build_bulk_payload(&events, &PayloadEncoder::from_compression_level(0)?)?
            .expect("💀 payload");
        let squished = build_bulk_payload(&events, &PayloadEncoder::from_compression_level(6)?)?
            .expect("💀 payload");

        assert_eq!(squished.content_encoding(), Some("gzip"));
        assert!(squished.body().len() < plain.body().len());
        assert_eq!(squished.raw_len(), plain.body().len());

        let mut unsquished = Vec::new();
        flate2::read::GzDecoder::new(squished.body()).read_to_end(&mut unsquished)?;
        assert_eq!(unsquished, plain.body());
        Ok(())
    }

    #[test]
    fn the_one_where_compression_level_ten_is_not_a_thing() {
        assert!(PayloadEncoder::from_compression_level(10).is_err());
    }
}
