//! 🧭 Index selectors — "where does this event live?" answered once per event.
//!
//! A pattern is literal text plus placeholders:
//!
//! ```text
//! events-%{[service.name]}-%{+yyyy.MM.dd}
//!        └── field value ─┘ └─ timestamp ─┘
//! ```
//!
//! Compiled once at construction, resolved per event. A placeholder pointing at a
//! field that isn't there is a resolution failure, and the event never ships.
//! 🦆

use anyhow::{Context, Result};
use serde_json::Value;

use crate::common::Event;

#[derive(Debug, Clone, PartialEq)]
enum Part {
    Literal(String),
    /// dotted field path
    Field(String),
    /// already translated to a chrono/strftime format
    Date(String),
}

/// 🧭 A compiled selector pattern.
#[derive(Debug, Clone)]
pub(crate) struct IndexSelector {
    pattern: String,
    parts: Vec<Part>,
}

impl IndexSelector {
    /// 🔧 Compile a pattern. Unterminated or unknown placeholders are a config error.
    pub(crate) fn compile(pattern: &str) -> Result<Self> {
        if pattern.trim().is_empty() {
            anyhow::bail!("💀 An empty selector pattern selects nothing. Give it a name. Any name.");
        }

        let mut parts = Vec::new();
        let mut rest = pattern;
        while let Some(start) = rest.find("%{") {
            if start > 0 {
                parts.push(Part::Literal(rest[..start].to_string()));
            }
            let after_open = &rest[start + 2..];
            let end = after_open.find('}').with_context(|| {
                format!("💀 Selector '{pattern}' opens a '%{{' and never closes it. Commitment issues.")
            })?;
            let inner = &after_open[..end];
            parts.push(compile_placeholder(inner).with_context(|| {
                format!("💀 Selector '{pattern}' has a placeholder we can't read: '%{{{inner}}}'")
            })?);
            rest = &after_open[end + 1..];
        }
        if !rest.is_empty() {
            parts.push(Part::Literal(rest.to_string()));
        }

        Ok(Self {
            pattern: pattern.to_string(),
            parts,
        })
    }

    /// 📌 True when the pattern has no placeholders at all.
    pub(crate) fn is_constant(&self) -> bool {
        self.parts.iter().all(|p| matches!(p, Part::Literal(_)))
    }

    pub(crate) fn pattern(&self) -> &str {
        &self.pattern
    }

    /// 🎯 Resolve the pattern against one event.
    pub(crate) fn resolve(&self, event: &Event) -> Result<String> {
        let mut out = String::with_capacity(self.pattern.len() + 16);
        for part in &self.parts {
            match part {
                Part::Literal(text) => out.push_str(text),
                Part::Date(format) => {
                    out.push_str(&event.timestamp.format(format).to_string());
                }
                Part::Field(path) => match event.field(path) {
                    Some(Value::String(s)) => out.push_str(s),
                    Some(Value::Number(n)) => out.push_str(&n.to_string()),
                    Some(Value::Bool(b)) => out.push_str(if *b { "true" } else { "false" }),
                    Some(other) => anyhow::bail!(
                        "💀 Field '{path}' is {other}, which is not something you can put in an index name."
                    ),
                    None => anyhow::bail!(
                        "💀 Selector '{}' wants field '{path}'. The event does not have it. Nobody told the event.",
                        self.pattern
                    ),
                },
            }
        }
        Ok(out)
    }
}

fn compile_placeholder(inner: &str) -> Result<Part> {
    if let Some(date_format) = inner.strip_prefix('+') {
        return Ok(Part::Date(joda_to_strftime(date_format)?));
    }
    if let Some(path) = inner.strip_prefix('[').and_then(|s| s.strip_suffix(']')) {
        if path.is_empty() {
            anyhow::bail!("empty field reference");
        }
        return Ok(Part::Field(path.to_string()));
    }
    anyhow::bail!("expected '%{{[field.path]}}' or '%{{+date.format}}'")
}

/// 📅 Translate the Joda-ish date format people write in index names
/// (`yyyy.MM.dd`) into the strftime dialect chrono speaks (`%Y.%m.%d`).
fn joda_to_strftime(format: &str) -> Result<String> {
    let chars: Vec<char> = format.chars().collect();
    let mut out = String::with_capacity(format.len() * 2);
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        // 'quoted' runs are literal text
        if c == '\'' {
            let close = chars[i + 1..]
                .iter()
                .position(|&q| q == '\'')
                .context("unterminated quote in date format")?;
            for &q in &chars[i + 1..i + 1 + close] {
                if q == '%' {
                    out.push_str("%%");
                } else {
                    out.push(q);
                }
            }
            i += close + 2;
            continue;
        }
        let mut run = 1;
        while i + run < chars.len() && chars[i + run] == c {
            run += 1;
        }
        if c.is_ascii_alphabetic() {
            let token = match (c, run) {
                ('y', 4) => "%Y",
                ('y', 2) => "%y",
                ('M', 2) => "%m",
                ('d', 2) => "%d",
                ('H', 2) => "%H",
                ('m', 2) => "%M",
                ('s', 2) => "%S",
                _ => anyhow::bail!(
                    "unsupported date token '{}' (try yyyy, yy, MM, dd, HH, mm, ss)",
                    c.to_string().repeat(run)
                ),
            };
            out.push_str(token);
        } else {
            for _ in 0..run {
                if c == '%' {
                    out.push_str("%%");
                } else {
                    out.push(c);
                }
            }
        }
        i += run;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use serde_json::{Map, json};

    fn event_at(fields: Value) -> Event {
        let fields: Map<String, Value> = fields.as_object().cloned().unwrap_or_default();
        Event::new(Utc.with_ymd_and_hms(2024, 3, 5, 7, 8, 9).unwrap(), fields)
    }

    #[test]
    fn the_one_where_a_constant_stays_constant() -> Result<()> {
        let selector = IndexSelector::compile("just-logs")?;
        assert!(selector.is_constant());
        assert_eq!(selector.resolve(&event_at(json!({})))?, "just-logs");
        Ok(())
    }

    #[test]
    fn the_one_where_the_date_stamp_comes_from_the_event_not_the_wall_clock() -> Result<()> {
        let selector = IndexSelector::compile("events-%{+yyyy.MM.dd}")?;
        assert!(!selector.is_constant());
        assert_eq!(selector.resolve(&event_at(json!({})))?, "events-2024.03.05");
        Ok(())
    }

    #[test]
    fn the_one_where_fields_and_dates_share_a_name() -> Result<()> {
        let selector = IndexSelector::compile("%{[service.name]}-%{+yy.MM}-%{[shard]}")?;
        let event = event_at(json!({"service": {"name": "checkout"}, "shard": 3}));
        assert_eq!(selector.resolve(&event)?, "checkout-24.03-3");
        Ok(())
    }

    #[test]
    fn the_one_where_a_missing_field_is_a_resolution_failure() -> Result<()> {
        let selector = IndexSelector::compile("logs-%{[team]}")?;
        let err = selector.resolve(&event_at(json!({"other": 1}))).unwrap_err();
        assert!(err.to_string().contains("team"));
        Ok(())
    }

    #[test]
    fn the_one_where_objects_are_not_index_names() -> Result<()> {
        let selector = IndexSelector::compile("logs-%{[nested]}")?;
        assert!(selector.resolve(&event_at(json!({"nested": {"a": 1}}))).is_err());
        Ok(())
    }

    #[test]
    fn the_one_where_bad_patterns_fail_at_compile_time() {
        assert!(IndexSelector::compile("").is_err());
        assert!(IndexSelector::compile("logs-%{+yyyy").is_err());
        assert!(IndexSelector::compile("logs-%{wat}").is_err());
        assert!(IndexSelector::compile("logs-%{+QQQ}").is_err());
        assert!(IndexSelector::compile("logs-%{[]}").is_err());
    }

    #[test]
    fn the_one_where_joda_learns_strftime() -> Result<()> {
        assert_eq!(joda_to_strftime("yyyy.MM.dd")?, "%Y.%m.%d");
        assert_eq!(joda_to_strftime("yyyy-MM-dd'T'HH")?, "%Y-%m-%dT%H");
        assert!(joda_to_strftime("yyyy'T").is_err());
        assert_eq!(joda_to_strftime("100%")?, "100%%");
        Ok(())
    }
}
