//! 📊 Summary — the end-of-run receipt.
//!
//! Counters on the left, numbers on the right, a rate at the bottom.
//! Built with comfy-table, because a table so comfy it has lumbar support
//! is the least we can offer someone who just watched 2 million events go by.

use std::time::Duration;

use comfy_table::{Cell, CellAlignment, ContentArrangement, Table, presets::UTF8_FULL};

use crate::common::PublishStats;

/// 🔢 "1000000" → "1,000,000". You're welcome, eyes.
fn format_number(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

/// ⏱️ MM:SS, or HH:MM:SS for the long hauls.
fn format_duration(duration: Duration) -> String {
    let total = duration.as_secs();
    let (hours, minutes, seconds) = (total / 3600, (total % 3600) / 60, total % 60);
    if hours > 0 {
        format!("{hours:02}:{minutes:02}:{seconds:02}")
    } else {
        format!("{minutes:02}:{seconds:02}")
    }
}

/// 🎨 Render the counters of a finished run.
pub fn render_summary(stats: &PublishStats, elapsed: Duration) -> String {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec!["outcome", "events"]);

    let rows: [(&str, usize); 7] = [
        ("✅ acked", stats.acked),
        ("🔁 duplicates", stats.duplicates),
        ("🔄 retried", stats.retryable),
        ("🪦 dead-lettered", stats.dead_lettered),
        ("🗑️ non-indexable (dropped)", stats.non_indexable),
        ("💀 encode failures", stats.encode_failures),
        ("⏳ failed after retries", stats.failed),
    ];
    for (label, count) in rows {
        table.add_row(vec![
            Cell::new(label),
            Cell::new(format_number(count as u64)).set_alignment(CellAlignment::Right),
        ]);
    }

    let stored = (stats.acked + stats.duplicates) as f64;
    let secs = elapsed.as_secs_f64();
    let rate = if secs > 0.0 { stored / secs } else { 0.0 };
    table.add_row(vec![
        Cell::new(format!("⏱️ {} elapsed", format_duration(elapsed))),
        Cell::new(format!("{} events/s", format_number(rate as u64)))
            .set_alignment(CellAlignment::Right),
    ]);
    table.to_string()
}
