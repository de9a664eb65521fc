// ai
//! ⚖️ The classifier — reading the verdict on every single event in a bulk response.
//!
//! 🎬 *[the jury returns. ten thousand verdicts. in order. no skipping.]*
//!
//! 🧠 Knowledge graph:
//! - Input: HTTP status of the whole bulk call, its raw body, and the `EncodedEvent`s
//!   that were in the payload, in payload order.
//! - Walk `items[]` with the `JsonReader`, exactly `events.len()` times.
//! - Per item: unwrap `{"<action>": {...}}`, read `status`, grab the raw `error` span.
//! - Status → verdict:
//!   - `< 300` ✅ acked
//!   - `409` 🔁 duplicate (`create` on an existing id — idempotent, not a failure)
//!   - `< 500` and not `429` 🪦 permanently rejected → non-indexable policy
//!   - everything else (`429`, `5xx`) 🔄 retry
//! - Whole call `>= 300`: don't even look at the body. Everything retries.
//! - Body won't parse: everything retries too. A half-read response is not a
//!   partially-trustworthy response, it's an untrustworthy one.
//!
//! ⚠️ Verdicts are collected while streaming and only applied once the walk
//! finished cleanly. That costs one small `Vec` per publish and buys us "never
//! ack anything from a response we couldn't finish reading". Fair trade. 🦆

use serde_json::{Map, Value, json};
use tracing::{debug, error, warn};

use super::scanner::JsonReader;
use crate::common::{EncodedEvent, Event, META_INDEX, PublishStats};
use crate::policy::NonIndexablePolicy;

/// 📏 How much of a bad response body makes it into an `error!` line.
const LOGGED_BODY_LIMIT: usize = 1024;

/// 📬 What came out of one classification pass.
#[derive(Debug, Default)]
pub struct Classification {
    /// 🔄 original events to send again, in original relative order
    pub retry: Vec<Event>,
    /// 🪦 re-encoded, tagged events bound for the dead-letter index
    pub dead_letter: Vec<Event>,
    pub stats: PublishStats,
    /// 💀 the body could not be parsed, so everything became retryable
    pub malformed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Verdict {
    Acked,
    Duplicate,
    Rejected { status: i64, reason: Option<String> },
    Retry,
}

/// ⚖️ One status code in, one verdict out.
pub(crate) fn verdict_for(status: i64) -> Verdict {
    if status < 300 {
        Verdict::Acked
    } else if status == 409 {
        Verdict::Duplicate
    } else if status < 500 && status != 429 {
        Verdict::Rejected {
            status,
            reason: None,
        }
    } else {
        Verdict::Retry
    }
}

/// ⚖️ Classify a bulk reply against the events that produced it.
///
/// Never fails. Anything it can't make sense of becomes "retry everything".
pub fn classify_bulk_response(
    http_status: u16,
    body: &[u8],
    events: Vec<EncodedEvent>,
    policy: &NonIndexablePolicy,
) -> Classification {
    if http_status >= 300 {
        warn!(
            "📡 bulk request answered {http_status}; all {} event(s) go back for retry. body: {}",
            events.len(),
            truncated(body)
        );
        return retry_everything(events, false);
    }

    match read_item_verdicts(body, events.len()) {
        Ok(verdicts) => apply_verdicts(events, verdicts, policy),
        Err(err) => {
            error!(
                "💀 bulk response could not be parsed ({err:#}); retrying all {} event(s). body: {}",
                events.len(),
                truncated(body)
            );
            debug!("📄 full unparsable bulk response: {}", String::from_utf8_lossy(body));
            retry_everything(events, true)
        }
    }
}

/// 🔍 Walk `items[]` and produce one verdict per expected event.
pub(crate) fn read_item_verdicts(body: &[u8], expected: usize) -> anyhow::Result<Vec<Verdict>> {
    let mut reader = JsonReader::new(body);
    reader.expect_dict()?;
    loop {
        match reader.next_field_name()? {
            Some(b"items") => break,
            Some(_) => {
                reader.ignore_next()?;
            }
            None => anyhow::bail!("💀 the bulk response has no 'items' array. We looked. It's not there."),
        }
    }
    reader.expect_array()?;

    let mut verdicts = Vec::with_capacity(expected);
    for item in 0..expected {
        reader.expect_dict().map_err(|e| {
            e.context(format!(
                "💀 expected item #{item} of {expected}; the response disagrees about how many events we sent"
            ))
        })?;
        let action = reader
            .next_field_name()?
            .ok_or_else(|| anyhow::anyhow!("💀 item #{item} is an empty object, no action key"))?;
        reader.expect_dict()?;

        let mut status = None;
        let mut reason = None;
        while let Some(field) = reader.next_field_name()? {
            match field {
                b"status" => status = Some(reader.next_int()?),
                b"error" => reason = Some(reader.ignore_next()?),
                _ => {
                    reader.ignore_next()?;
                }
            }
        }
        if reader.next_field_name()?.is_some() {
            anyhow::bail!(
                "💀 item #{item} carries more than one action (byte {}); that's not a bulk item shape we know",
                reader.position()
            );
        }
        let status = status.ok_or_else(|| {
            anyhow::anyhow!(
                "💀 item #{item} ('{}') has no status",
                String::from_utf8_lossy(action)
            )
        })?;

        let verdict = match verdict_for(status) {
            Verdict::Duplicate => {
                debug!("🔁 item #{item}: 409, already indexed, counting it as done");
                Verdict::Duplicate
            }
            Verdict::Rejected { status, .. } => {
                let reason = reason.map(|span| String::from_utf8_lossy(span).into_owned());
                warn!(
                    "🪦 item #{item} permanently rejected with {status}: {}",
                    reason.as_deref().unwrap_or("<no error given>")
                );
                Verdict::Rejected { status, reason }
            }
            Verdict::Retry => {
                debug!(
                    "🔄 item #{item}: {status}, will retry. error: {}",
                    reason.map(String::from_utf8_lossy).unwrap_or_default()
                );
                Verdict::Retry
            }
            acked => acked,
        };
        verdicts.push(verdict);
    }
    Ok(verdicts)
}

fn apply_verdicts(
    events: Vec<EncodedEvent>,
    verdicts: Vec<Verdict>,
    policy: &NonIndexablePolicy,
) -> Classification {
    let mut out = Classification::default();
    for (encoded, verdict) in events.into_iter().zip(verdicts) {
        match verdict {
            Verdict::Acked => out.stats.acked += 1,
            Verdict::Duplicate => out.stats.duplicates += 1,
            Verdict::Retry => {
                out.stats.retryable += 1;
                out.retry.push(encoded.into_event());
            }
            Verdict::Rejected { status, reason } => {
                match policy.dead_letter_index() {
                    Some(_) if encoded.event().dead_letter => {
                        // 🪦 already a dead letter. no second graveyard.
                        warn!(
                            "🗑️ dead-letter event for '{}' was rejected too ({status}); dropping it",
                            encoded.index()
                        );
                        out.stats.non_indexable += 1;
                    }
                    Some(index) => {
                        out.stats.dead_lettered += 1;
                        out.dead_letter
                            .push(into_dead_letter(encoded, index, status, reason));
                    }
                    None => out.stats.non_indexable += 1,
                }
            }
        }
    }
    out
}

/// 🪦 Wrap a rejected event as a bare document for the dead-letter index.
///
/// The whole original body goes into `message` as a string, so no mapping on
/// earth can object to it.
pub(crate) fn into_dead_letter(
    encoded: EncodedEvent,
    index: &str,
    status: i64,
    reason: Option<String>,
) -> Event {
    let timestamp = encoded.timestamp();
    let message = String::from_utf8_lossy(&encoded.source).into_owned();
    let original_index = encoded.index;

    let mut fields = Map::new();
    fields.insert("message".to_string(), Value::String(message));
    fields.insert(
        "error".to_string(),
        json!({
            "status": status,
            "message": reason,
            "index": original_index,
        }),
    );
    let mut meta = Map::new();
    meta.insert(META_INDEX.to_string(), Value::String(index.to_string()));

    Event {
        timestamp,
        meta,
        fields,
        dead_letter: true,
    }
}

fn retry_everything(events: Vec<EncodedEvent>, malformed: bool) -> Classification {
    let retry: Vec<Event> = events.into_iter().map(EncodedEvent::into_event).collect();
    Classification {
        stats: PublishStats {
            retryable: retry.len(),
            ..Default::default()
        },
        retry,
        dead_letter: Vec::new(),
        malformed,
    }
}

fn truncated(body: &[u8]) -> String {
    if body.len() <= LOGGED_BODY_LIMIT {
        String::from_utf8_lossy(body).into_owned()
    } else {
        format!(
            "{}… ({} more bytes)",
            String::from_utf8_lossy(&body[..LOGGED_BODY_LIMIT]),
            body.len() - LOGGED_BODY_LIMIT
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::META_ID;
    use crate::encoding::EventEncoder;
    use crate::payload::{PayloadEncoder, build_bulk_payload};
    use chrono::Utc;

    fn batch(n: usize) -> Vec<EncodedEvent> {
        let mut encoder = EventEncoder::new("logs", None).expect("💀 encoder");
        (0..n)
            .map(|i| {
                let mut fields = Map::new();
                fields.insert("n".to_string(), json!(i));
                encoder
                    .encode(Event::new(Utc::now(), fields))
                    .expect("💀 encode")
            })
            .collect()
    }

    fn response(statuses: &[u16]) -> Vec<u8> {
        let items: Vec<String> = statuses
            .iter()
            .map(|s| {
                if *s >= 300 {
                    format!(r#"{{"index":{{"_index":"logs","status":{s},"error":{{"type":"boom","reason":"status {s}"}}}}}}"#)
                } else {
                    format!(r#"{{"index":{{"_index":"logs","status":{s},"result":"created"}}}}"#)
                }
            })
            .collect();
        format!(r#"{{"took":7,"errors":true,"items":[{}]}}"#, items.join(",")).into_bytes()
    }

    fn n_of(event: &Event) -> i64 {
        event.fields["n"].as_i64().unwrap_or(-1)
    }

    #[test]
    fn the_one_where_a_mixed_response_sorts_itself_out() {
        let events = batch(3);
        let out = classify_bulk_response(
            200,
            &response(&[200, 409, 503]),
            events,
            &NonIndexablePolicy::Drop,
        );
        assert_eq!(out.stats.acked, 1);
        assert_eq!(out.stats.duplicates, 1);
        assert_eq!(out.stats.retryable, 1);
        assert_eq!(out.retry.len(), 1);
        assert_eq!(n_of(&out.retry[0]), 2);
        assert!(!out.malformed);
    }

    #[test]
    fn the_one_where_failing_positions_map_back_to_the_right_events() {
        for n in [1usize, 2, 5, 17] {
            for failing in 0..n {
                let mut statuses = vec![201u16; n];
                statuses[failing] = 500;
                let out = classify_bulk_response(
                    200,
                    &response(&statuses),
                    batch(n),
                    &NonIndexablePolicy::Drop,
                );
                let retried: Vec<i64> = out.retry.iter().map(n_of).collect();
                assert_eq!(retried, vec![failing as i64], "n={n} failing={failing}");
                assert_eq!(out.stats.acked, n - 1);
            }
        }
    }

    #[test]
    fn the_one_where_retries_keep_their_original_order() {
        let out = classify_bulk_response(
            200,
            &response(&[429, 200, 502, 200, 503]),
            batch(5),
            &NonIndexablePolicy::Drop,
        );
        let retried: Vec<i64> = out.retry.iter().map(n_of).collect();
        assert_eq!(retried, vec![0, 2, 4]);
    }

    #[test]
    fn the_one_where_a_400_under_drop_just_disappears() {
        let out = classify_bulk_response(
            200,
            &response(&[400, 200]),
            batch(2),
            &NonIndexablePolicy::Drop,
        );
        assert_eq!(out.stats.non_indexable, 1);
        assert!(out.retry.is_empty());
        assert!(out.dead_letter.is_empty());
    }

    #[test]
    fn the_one_where_a_400_goes_to_the_graveyard_exactly_once() {
        let policy = NonIndexablePolicy::DeadLetterIndex {
            index: "graveyard".to_string(),
        };
        let events = batch(1);
        let born_at = events[0].timestamp();
        let out = classify_bulk_response(200, &response(&[400]), events, &policy);
        assert_eq!(out.stats.dead_lettered, 1);
        assert!(out.retry.is_empty());
        assert_eq!(out.dead_letter.len(), 1);

        let dead = &out.dead_letter[0];
        assert!(dead.dead_letter);
        assert_eq!(dead.meta_str(META_INDEX), Some("graveyard"));
        assert_eq!(dead.timestamp, born_at);
        let original: Value = serde_json::from_str(
            dead.fields["message"].as_str().expect("💀 message is a string"),
        )
        .expect("💀 message holds the original document");
        assert_eq!(original["n"], json!(0));
        assert!(dead.fields["error"]["message"].as_str().unwrap_or("").contains("boom"));

        // 🔁 round two: the dead letter itself gets a 400
        let mut encoder = EventEncoder::new("logs", None).expect("💀 encoder");
        let re_encoded = encoder
            .encode(out.dead_letter[0].clone())
            .expect("💀 dead letter encodes");
        assert_eq!(re_encoded.index(), "graveyard");
        let again = classify_bulk_response(200, &response(&[400]), vec![re_encoded], &policy);
        assert_eq!(again.stats.non_indexable, 1);
        assert_eq!(again.stats.dead_lettered, 0);
        assert!(again.dead_letter.is_empty());
        assert!(again.retry.is_empty());
    }

    #[test]
    fn the_one_where_a_truncated_body_retries_everything() {
        let mut body = response(&[200, 200, 200]);
        body.truncate(body.len() / 2);
        let out = classify_bulk_response(200, &body, batch(3), &NonIndexablePolicy::Drop);
        assert!(out.malformed);
        assert_eq!(out.stats.retryable, 3);
        assert_eq!(out.stats.acked, 0);
        assert_eq!(out.stats.duplicates, 0);
        assert_eq!(out.retry.len(), 3);
    }

    #[test]
    fn the_one_where_too_few_items_is_malformed_not_partial_success() {
        let out = classify_bulk_response(
            200,
            &response(&[200, 200]),
            batch(3),
            &NonIndexablePolicy::Drop,
        );
        assert!(out.malformed);
        assert_eq!(out.stats.acked, 0);
        assert_eq!(out.stats.retryable, 3);
    }

    #[test]
    fn the_one_where_a_batch_level_failure_skips_the_body_entirely() {
        let out = classify_bulk_response(
            503,
            &response(&[200, 200]),
            batch(2),
            &NonIndexablePolicy::Drop,
        );
        assert_eq!(out.stats.acked, 0);
        assert_eq!(out.stats.retryable, 2);
        assert!(!out.malformed);
    }

    #[test]
    fn the_one_where_old_string_errors_and_extra_fields_are_fine() {
        let body = br#"{"took":1,"errors":true,"items":[
            {"create":{"_index":"logs","_id":"a","status":409,"error":"DocumentAlreadyExistsException[[logs][0] [a]]"}},
            {"index":{"_index":"logs","_shards":{"total":2,"successful":1,"failed":0},"_seq_no":4,"status":201}}
        ],"extra":[1,2,3]}"#;
        let out = classify_bulk_response(200, body, batch(2), &NonIndexablePolicy::Drop);
        assert_eq!(out.stats.duplicates, 1);
        assert_eq!(out.stats.acked, 1);
    }

    #[test]
    fn the_one_where_status_codes_get_their_verdicts() {
        assert_eq!(verdict_for(200), Verdict::Acked);
        assert_eq!(verdict_for(201), Verdict::Acked);
        assert_eq!(verdict_for(409), Verdict::Duplicate);
        assert!(matches!(verdict_for(400), Verdict::Rejected { status: 400, .. }));
        assert!(matches!(verdict_for(404), Verdict::Rejected { .. }));
        assert_eq!(verdict_for(429), Verdict::Retry);
        assert_eq!(verdict_for(500), Verdict::Retry);
        assert_eq!(verdict_for(503), Verdict::Retry);
    }

    #[test]
    fn the_one_where_the_encoder_and_builder_round_trip_to_all_acked() -> anyhow::Result<()> {
        let mut encoder = EventEncoder::new("logs-%{+yyyy}", Some("pipe"))?;
        let mut events = Vec::new();
        for i in 0..4 {
            let mut fields = Map::new();
            fields.insert("i".to_string(), json!(i));
            let mut event = Event::new(Utc::now(), fields);
            if i % 2 == 0 {
                event = event.with_meta(META_ID, format!("id-{i}"));
            }
            events.push(encoder.encode(event).map_err(|f| f.error)?);
        }
        let payload = build_bulk_payload(&events, &PayloadEncoder::from_compression_level(0)?)?
            .ok_or_else(|| anyhow::anyhow!("💀 expected a payload"))?;

        // 🔍 a second reader instance walks our own request body: 2 lines per event
        let body = String::from_utf8(payload.body().to_vec())?;
        let action_lines = body.lines().step_by(2).count();
        assert_eq!(action_lines, events.len());
        for line in body.lines() {
            let mut reader = JsonReader::new(line.as_bytes());
            reader.ignore_next()?;
        }

        let out = classify_bulk_response(
            200,
            &response(&vec![200; events.len()]),
            events,
            &NonIndexablePolicy::Drop,
        );
        assert_eq!(out.stats.acked, 4);
        assert!(out.retry.is_empty());
        Ok(())
    }
}
