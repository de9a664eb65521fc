//! 📂 Source — NDJSON files in, `Event`s out.
//!
//! One JSON object per line. `@timestamp` and `@metadata` get lifted off by
//! `Event::from_json_line`; everything else becomes fields. Blank lines are
//! skipped, garbage lines are logged and skipped. The run goes on. 🦆

use std::path::Path;

use anyhow::{Context, Result};
use memchr::memchr_iter;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::common::Event;

// -- 📂 "It's just a file", said no sysadmin ever before the disk filled up.
#[derive(Debug, Deserialize, Clone)]
pub struct SourceConfig {
    pub file_name: String,
}

/// 📖 Read and parse a whole NDJSON file.
pub async fn read_events(path: &Path) -> Result<Vec<Event>> {
    let bytes = tokio::fs::read(path).await.with_context(|| {
        format!(
            "💀 The door to '{}' would not budge. Missing file, wrong permissions, or both.",
            path.display()
        )
    })?;
    let (events, skipped) = parse_events(&bytes);
    debug!(
        "📖 read {} event(s) from '{}' ({skipped} line(s) skipped)",
        events.len(),
        path.display()
    );
    Ok(events)
}

/// 🔪 Split on `\n` and parse each non-blank line. Returns the events and how many lines were garbage.
pub fn parse_events(bytes: &[u8]) -> (Vec<Event>, usize) {
    let mut events = Vec::new();
    let mut skipped = 0usize;
    let mut start = 0usize;
    let ends = memchr_iter(b'\n', bytes).chain(std::iter::once(bytes.len()));
    for (line_no, end) in ends.enumerate() {
        let line = bytes[start..end].trim_ascii();
        start = end + 1;
        if line.is_empty() {
            continue;
        }
        match Event::from_json_line(line) {
            Ok(event) => events.push(event),
            Err(err) => {
                skipped += 1;
                warn!("🗑️ line {} is not an event, skipping: {err:#}", line_no + 1);
            }
        }
    }
    (events, skipped)
}
