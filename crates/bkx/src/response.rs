//! 📬 Response — what the server said about the batch, one event at a time.
//!
//! 🧠 Knowledge graph:
//! - `scanner`: `JsonReader`, the streaming pull-scanner. No DOM, no recursion.
//! - `classifier`: `classify_bulk_response` turns status + body + events into
//!   acked / duplicate / retry / rejected, and feeds rejects to the `NonIndexablePolicy`.

mod classifier;
mod scanner;

pub use classifier::{Classification, classify_bulk_response};
