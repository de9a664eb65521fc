//! 🏭 EventEncoder — turns an `Event` into an `EncodedEvent` before anyone asks for it.
//!
//! 🧠 Knowledge graph:
//! - Input: one `Event`, owned.
//! - Output: `EncodedEvent` (body bytes + index + pipeline + action) or `EncodeFailure`
//!   (the event, handed back, with a reason).
//! - Index/pipeline resolution order: event meta wins, then the configured selector.
//! - Names get lower-cased, because the server refuses upper-case index names
//!   and yelling at the user is cheaper than dropping their data.
//! - Remembers how big the last body was and sizes the next buffer to match,
//!   so one encoder per worker. Not `Sync`-shared. Not ever.

use anyhow::Result;
use serde::ser::{Serialize, SerializeMap, Serializer};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use super::selector::IndexSelector;
use crate::common::{BulkAction, EncodeFailure, EncodedEvent, Event, META_ID, META_INDEX, META_PIPELINE};

const TIMESTAMP_KEY: &str = "@timestamp";

/// 📄 What the document body looks like on the wire: timestamp first, fields flattened.
///
/// A stray `@timestamp` inside `fields` is skipped. The event's own timestamp
/// is the only one that gets written, because the server 400s on duplicate keys.
struct Document<'a> {
    timestamp: String,
    fields: &'a Map<String, Value>,
}

impl Serialize for Document<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        map.serialize_entry(TIMESTAMP_KEY, &self.timestamp)?;
        for (key, value) in self.fields {
            if key != TIMESTAMP_KEY {
                map.serialize_entry(key, value)?;
            }
        }
        map.end()
    }
}

/// 🏭 The encoder. One per publisher. Carries a size hint from one body to the next.
#[derive(Debug)]
pub struct EventEncoder {
    index: IndexSelector,
    pipeline: Option<IndexSelector>,
    size_hint: usize,
}

impl EventEncoder {
    /// 🔧 Compile the index pattern (and optional pipeline pattern) up front.
    pub fn new(index_pattern: &str, pipeline_pattern: Option<&str>) -> Result<Self> {
        let index = IndexSelector::compile(index_pattern)?;
        if index.is_constant() {
            debug!("🎯 every event goes to '{}'", index.pattern());
        } else {
            debug!("🎯 index resolved per event from '{}'", index.pattern());
        }
        let pipeline = pipeline_pattern
            .filter(|p| !p.trim().is_empty())
            .map(IndexSelector::compile)
            .transpose()?;
        Ok(Self {
            index,
            pipeline,
            size_hint: 1024,
        })
    }

    /// 🚀 Encode one event. No I/O. No shared state. Just bytes and decisions.
    ///
    /// On failure the event comes back inside `EncodeFailure` so the caller can
    /// report it as a local drop. It must not go anywhere near the payload.
    pub fn encode(&mut self, event: Event) -> Result<EncodedEvent, EncodeFailure> {
        match self.encode_parts(&event) {
            Ok((index, pipeline, id, source)) => {
                let action = if id.is_some() {
                    BulkAction::Create
                } else {
                    BulkAction::Index
                };
                Ok(EncodedEvent {
                    event,
                    action,
                    index,
                    pipeline,
                    id,
                    source,
                })
            }
            Err(error) => Err(EncodeFailure { event, error }),
        }
    }

    #[allow(clippy::type_complexity)]
    fn encode_parts(&mut self, event: &Event) -> Result<(String, Option<String>, Option<String>, Vec<u8>)> {
        let index = self.resolve_index(event)?;
        let pipeline = self.resolve_pipeline(event)?;
        let id = event.meta_str(META_ID).map(str::to_string);

        // 📏 the bytes end up owned by the EncodedEvent, so each body gets its own buffer
        let mut source = Vec::with_capacity(self.size_hint);
        serde_json::to_writer(
            &mut source,
            &Document {
                timestamp: event.timestamp_rfc3339(),
                fields: &event.fields,
            },
        )?;
        self.size_hint = source.len().max(64);
        Ok((index, pipeline, id, source))
    }

    fn resolve_index(&self, event: &Event) -> Result<String> {
        let raw = match event.meta_str(META_INDEX) {
            Some(over) => over.to_string(),
            None => self.index.resolve(event)?,
        };
        if raw.is_empty() {
            anyhow::bail!(
                "💀 Index selector '{}' resolved to an empty name. An index with no name is just a dream.",
                self.index.pattern()
            );
        }
        Ok(lowercase_with_warning("index", raw))
    }

    fn resolve_pipeline(&self, event: &Event) -> Result<Option<String>> {
        // 🪦 dead letters go in bare. no pipeline gets a second shot at them.
        if event.dead_letter {
            return Ok(None);
        }
        let raw = match (event.meta_str(META_PIPELINE), &self.pipeline) {
            (Some(over), _) => over.to_string(),
            (None, Some(selector)) => selector.resolve(event)?,
            (None, None) => return Ok(None),
        };
        if raw.is_empty() {
            return Ok(None);
        }
        Ok(Some(lowercase_with_warning("pipeline", raw)))
    }
}

fn lowercase_with_warning(kind: &str, name: String) -> String {
    if name.chars().any(char::is_uppercase) {
        let lowered = name.to_lowercase();
        warn!(
            "⚠️ {kind} name '{name}' has upper-case letters; the server won't take that, sending '{lowered}' instead"
        );
        lowered
    } else {
        name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    fn event(fields: Value) -> Event {
        Event::new(
            Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap(),
            fields.as_object().cloned().unwrap_or_default(),
        )
    }

    #[test]
    fn the_one_where_no_id_means_index_and_the_body_gets_a_timestamp() -> Result<()> {
        let mut encoder = EventEncoder::new("logs-%{+yyyy.MM.dd}", None)?;
        let encoded = encoder.encode(event(json!({"msg": "hello"}))).map_err(|f| f.error)?;

        assert_eq!(encoded.action(), BulkAction::Index);
        assert_eq!(encoded.index(), "logs-2024.01.02");
        assert_eq!(encoded.pipeline(), None);
        assert_eq!(encoded.id(), None);
        let body: Value = serde_json::from_slice(encoded.source())?;
        assert_eq!(body, json!({"@timestamp": "2024-01-02T03:04:05.000Z", "msg": "hello"}));
        Ok(())
    }

    #[test]
    fn the_one_where_an_explicit_id_turns_index_into_create() -> Result<()> {
        let mut encoder = EventEncoder::new("logs", None)?;
        let encoded = encoder
            .encode(event(json!({"a": 1})).with_meta(META_ID, "natural-key-7"))
            .map_err(|f| f.error)?;
        assert_eq!(encoded.action(), BulkAction::Create);
        assert_eq!(encoded.id(), Some("natural-key-7"));
        Ok(())
    }

    #[test]
    fn the_one_where_meta_overrides_and_shouting_gets_lowercased() -> Result<()> {
        let mut encoder = EventEncoder::new("logs", Some("Default-Pipe"))?;
        let plain = encoder.encode(event(json!({}))).map_err(|f| f.error)?;
        assert_eq!(plain.pipeline(), Some("default-pipe"));

        let routed = encoder
            .encode(
                event(json!({}))
                    .with_meta(META_INDEX, "LOUD-Index")
                    .with_meta(META_PIPELINE, "Special"),
            )
            .map_err(|f| f.error)?;
        assert_eq!(routed.index(), "loud-index");
        assert_eq!(routed.pipeline(), Some("special"));
        Ok(())
    }

    #[test]
    fn the_one_where_a_missing_field_hands_the_event_back() -> Result<()> {
        let mut encoder = EventEncoder::new("logs-%{[tenant]}", None)?;
        let original = event(json!({"msg": "no tenant here"}));
        let failure = encoder.encode(original.clone()).unwrap_err();
        assert_eq!(failure.event, original);
        assert!(failure.error.to_string().contains("tenant"));
        Ok(())
    }

    #[test]
    fn the_one_where_dead_letters_skip_the_pipeline() -> Result<()> {
        let mut encoder = EventEncoder::new("logs", Some("enrich"))?;
        let mut dead = event(json!({"message": "{}"}));
        dead.dead_letter = true;
        let encoded = encoder.encode(dead).map_err(|f| f.error)?;
        assert_eq!(encoded.pipeline(), None);
        Ok(())
    }

    #[test]
    fn the_one_where_a_small_body_follows_a_big_one_cleanly() -> Result<()> {
        let mut encoder = EventEncoder::new("logs", None)?;
        let first = encoder
            .encode(event(json!({"big": "x".repeat(200)})))
            .map_err(|f| f.error)?;
        assert_eq!(encoder.size_hint, first.source().len());
        let second = encoder.encode(event(json!({"s": 1}))).map_err(|f| f.error)?;
        assert!(first.source().len() > second.source().len());
        // 📏 the small one was sized for the big one, and the hint shrinks back down
        assert!(second.source.capacity() >= first.source().len());
        assert_eq!(encoder.size_hint, 64.max(second.source().len()));
        let body: Value = serde_json::from_slice(second.source())?;
        assert_eq!(body["s"], json!(1));
        Ok(())
    }

    #[test]
    fn the_one_where_a_hand_built_event_brings_its_own_timestamp_field() -> Result<()> {
        let mut encoder = EventEncoder::new("logs", None)?;
        let encoded = encoder
            .encode(event(json!({"@timestamp": "2020-01-01T00:00:00Z", "m": 1})))
            .map_err(|f| f.error)?;

        let body = std::str::from_utf8(encoded.source())?;
        assert_eq!(body.matches("@timestamp").count(), 1);
        let body: Value = serde_json::from_str(body)?;
        assert_eq!(body, json!({"@timestamp": "2024-01-02T03:04:05.000Z", "m": 1}));
        Ok(())
    }
}
