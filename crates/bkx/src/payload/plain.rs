// ai
//! 📄 **PlainBody** — the body encoder that does nothing, on purpose.
//!
//! `compression_level = 0`. No header, no squish, no CPU. The bytes go out exactly
//! as `build_bulk_payload` wrote them. The laziest encoder that ever lived.

use super::BodyEncoder;
use anyhow::Result;

#[derive(Debug, Clone, Copy)]
pub struct PlainBody;

impl BodyEncoder for PlainBody {
    #[inline]
    fn content_encoding(&self) -> Option<&'static str> {
        None
    }

    #[inline]
    fn encode(&self, raw: Vec<u8>) -> Result<Vec<u8>> {
        Ok(raw)
    }
}
