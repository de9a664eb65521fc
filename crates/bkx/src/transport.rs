//! 📡 Transport — the part that actually talks to the cluster.
//!
//! 🧠 Knowledge graph:
//! - `connection`: one host, its HTTP client, auth, and health record
//! - `pool`: round robin selection, dead-marking with exponential backoff, resurrection

mod connection;
mod pool;

pub use connection::{BulkReply, Connection};
pub use pool::{ConnectionPool, Pool, RoundRobinPool, SinglePool};
