//! 🔄 Encoding — events in, wire-ready fragments out, well before flush time.
//!
//! 🧠 Knowledge graph:
//! - `selector`: the `%{[field]}` / `%{+yyyy.MM.dd}` pattern language for index and pipeline names
//! - `event_encoder`: `EventEncoder::encode(Event) -> Result<EncodedEvent, EncodeFailure>`
//! - Downstream: `payload` writes the action line + this body into the bulk request
//!
//! 🦆 The duck was encoded once. It came back lower-cased.

mod event_encoder;
pub(crate) mod selector;

pub use event_encoder::EventEncoder;
