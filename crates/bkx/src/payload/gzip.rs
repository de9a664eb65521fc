// ai
//! 🫁 **GzipBody** — because bandwidth is expensive and bytes are squishy.
//!
//! 🧠 Knowledge graph:
//! - Chosen when `compression_level` is 1..=9
//! - Adds `Content-Encoding: gzip` to the bulk request
//! - Compresses the whole finished body in one go; the action lines squish
//!   beautifully because they all look the same. Repetition: finally useful.

use std::io::Write;

use super::BodyEncoder;
use anyhow::{Context, Result};
use flate2::Compression;
use flate2::write::GzEncoder;

#[derive(Debug, Clone, Copy)]
pub struct GzipBody {
    level: u32,
}

impl GzipBody {
    pub fn new(level: u32) -> Self {
        Self { level }
    }
}

impl BodyEncoder for GzipBody {
    fn content_encoding(&self) -> Option<&'static str> {
        Some("gzip")
    }

    fn encode(&self, raw: Vec<u8>) -> Result<Vec<u8>> {
        // 🧮 bulk bodies compress well; a quarter of the raw size is a decent first guess
        let mut encoder = GzEncoder::new(
            Vec::with_capacity(raw.len() / 4),
            Compression::new(self.level),
        );
        encoder
            .write_all(&raw)
            .context("💀 gzip refused to accept our bytes. Into a Vec. Which cannot fail. And yet.")?;
        encoder
            .finish()
            .context("💀 gzip could not finish. It was so close.")
    }
}
