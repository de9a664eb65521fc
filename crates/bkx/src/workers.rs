//! 🧵 Workers: the ones who actually call `publish`, again and again, until the
//! cluster says yes or the retry budget says no.
//!
//! 🚀 One worker, one `Client`, one encoder. No sharing, no drama. 🦆

use anyhow::Result;
use tokio::task::JoinHandle;

use crate::common::PublishStats;

mod publish_worker;
pub use publish_worker::{PublishWorker, RetryBackoff};

/// 🏗️ A background worker, that does work. duh.
///
/// "What's the DEAL with lifetime annotations? You borrow something,
///  you give it back. It's not that hard, Jerry!" — Seinfeld, on Rust
pub trait Worker {
    /// 🚀 Start the worker. The handle resolves to everything it published.
    fn start(self) -> JoinHandle<Result<PublishStats>>;
}
