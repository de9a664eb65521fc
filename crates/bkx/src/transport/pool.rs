//! 🏊 The connection pool — who gets the next request, and who sits in the penalty box.
//!
//! 🧠 Knowledge graph:
//! - `Pool` trait → `SinglePool` / `RoundRobinPool` → `ConnectionPool` enum dispatcher,
//!   picked once by how many hosts were configured.
//! - `get_connection` never fails and never blocks. Round robin over the live ones;
//!   if a whole lap finds nobody alive, pick uniformly at random from *everyone*,
//!   so a flapping cluster still gets poked before its timers fire.
//! - `mark_dead`: dead flag up, counter up, resurrection scheduled after
//!   `base * 2^(count-1)`. The exponent stops growing at 2^6 so a host that's been
//!   down all weekend comes back within ~an hour of being fixed, not next month.
//! - Resurrection only clears the flag. The counter stays until a real success
//!   (`mark_live`) proves the host is healthy, so a flapper keeps earning longer timeouts.
//! - One host? Nothing to fail over to. Marks are no-ops, selection is O(1).
//!
//! ⚠️ The resurrection timer runs on its own tokio task. All health state lives behind
//! the connection's mutex; nobody reads a bare bool.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use rand::Rng;
use tokio::runtime::Handle;
use tracing::{debug, info, warn};

use super::connection::Connection;

/// 📈 `2^6` × base is as long as anyone waits.
const MAX_BACKOFF_EXPONENT: u32 = 6;

// ===== Trait =====

/// 🏊 Picks connections and keeps their health ledger.
pub trait Pool {
    fn get_connection(&self) -> Arc<Connection>;
    fn mark_dead(&self, connection: &Arc<Connection>);
    fn mark_live(&self, connection: &Connection);
    /// 🩺 How many connections are currently not flagged dead.
    fn live_count(&self) -> usize;
}

// ===== Single =====

/// 1️⃣ One host. All the interface, none of the bookkeeping.
#[derive(Debug)]
pub struct SinglePool {
    connection: Arc<Connection>,
}

impl Pool for SinglePool {
    fn get_connection(&self) -> Arc<Connection> {
        Arc::clone(&self.connection)
    }

    fn mark_dead(&self, connection: &Arc<Connection>) {
        debug!(
            "🤷 {} failed, but it's the only host we have; not benching it",
            connection.url()
        );
    }

    fn mark_live(&self, _connection: &Connection) {}

    fn live_count(&self) -> usize {
        1
    }
}

// ===== Round robin =====

/// 🔄 Many hosts, a cursor, and a grudge-holding health ledger.
#[derive(Debug)]
pub struct RoundRobinPool {
    connections: Vec<Arc<Connection>>,
    cursor: Mutex<usize>,
    dead_timeout: Duration,
}

impl RoundRobinPool {
    fn backoff_for(&self, dead_count: u32) -> Duration {
        let exponent = dead_count.saturating_sub(1).min(MAX_BACKOFF_EXPONENT);
        self.dead_timeout * 2u32.pow(exponent)
    }
}

impl Pool for RoundRobinPool {
    fn get_connection(&self) -> Arc<Connection> {
        let len = self.connections.len();
        let mut cursor = self
            .cursor
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        for _ in 0..len {
            let candidate = &self.connections[*cursor % len];
            *cursor = (*cursor + 1) % len;
            if !candidate.is_dead() {
                return Arc::clone(candidate);
            }
        }
        drop(cursor);

        let pick = rand::thread_rng().gen_range(0..len);
        debug!(
            "🎲 every host is benched; rolling the dice and trying {} anyway",
            self.connections[pick].url()
        );
        Arc::clone(&self.connections[pick])
    }

    fn mark_dead(&self, connection: &Arc<Connection>) {
        let mut health = connection.health();
        if health.dead {
            return;
        }
        health.dead = true;
        health.dead_count += 1;
        let delay = self.backoff_for(health.dead_count);
        health.last_backoff = Some(delay);
        if let Some(stale) = health.resurrection.take() {
            stale.abort();
        }

        warn!(
            "🪦 {} marked dead (failure #{}); resurrection in {:?}",
            connection.url(),
            health.dead_count,
            delay
        );

        match Handle::try_current() {
            Ok(runtime) => {
                let target = Arc::clone(connection);
                health.resurrection = Some(runtime.spawn(async move {
                    tokio::time::sleep(delay).await;
                    let mut health = target.health();
                    health.dead = false;
                    health.resurrection = None;
                    info!("🧟 {} is eligible for requests again", target.url());
                }));
            }
            Err(_) => warn!(
                "⏰ no tokio runtime to schedule resurrection on; {} stays dead until it succeeds again",
                connection.url()
            ),
        }
    }

    fn mark_live(&self, connection: &Connection) {
        let mut health = connection.health();
        if health.dead || health.dead_count > 0 {
            debug!("💚 {} is healthy again, backoff reset", connection.url());
        }
        health.dead = false;
        health.dead_count = 0;
        health.last_backoff = None;
        if let Some(timer) = health.resurrection.take() {
            timer.abort();
        }
    }

    fn live_count(&self) -> usize {
        self.connections.iter().filter(|c| !c.is_dead()).count()
    }
}

// ===== Dispatcher Enum =====

/// 🎭 The pool the client actually holds. Shape decided once, by host count.
#[derive(Debug)]
pub enum ConnectionPool {
    Single(SinglePool),
    RoundRobin(RoundRobinPool),
}

impl ConnectionPool {
    /// 🚀 Zero connections is a config error. One is a `SinglePool`. More is a party.
    pub fn new(connections: Vec<Connection>, dead_timeout: Duration) -> Result<Self> {
        let mut connections: Vec<Arc<Connection>> = connections.into_iter().map(Arc::new).collect();
        match connections.len() {
            0 => anyhow::bail!(
                "💀 a connection pool with zero connections. Where would the requests even go?"
            ),
            1 => Ok(Self::Single(SinglePool {
                connection: connections.remove(0),
            })),
            _ => Ok(Self::RoundRobin(RoundRobinPool {
                connections,
                cursor: Mutex::new(0),
                dead_timeout,
            })),
        }
    }

    pub fn connections(&self) -> &[Arc<Connection>] {
        match self {
            Self::Single(p) => std::slice::from_ref(&p.connection),
            Self::RoundRobin(p) => &p.connections,
        }
    }

    /// 🤷 A single-host pool can't run out of alternatives it never had.
    pub fn is_single(&self) -> bool {
        matches!(self, Self::Single(_))
    }

    /// 🧹 Cancel every pending resurrection. Called on shutdown.
    pub fn close(&self) {
        for connection in self.connections() {
            if let Some(timer) = connection.health().resurrection.take() {
                timer.abort();
            }
        }
    }
}

impl Pool for ConnectionPool {
    fn get_connection(&self) -> Arc<Connection> {
        match self {
            Self::Single(p) => p.get_connection(),
            Self::RoundRobin(p) => p.get_connection(),
        }
    }

    fn mark_dead(&self, connection: &Arc<Connection>) {
        match self {
            Self::Single(p) => p.mark_dead(connection),
            Self::RoundRobin(p) => p.mark_dead(connection),
        }
    }

    fn mark_live(&self, connection: &Connection) {
        match self {
            Self::Single(p) => p.mark_live(connection),
            Self::RoundRobin(p) => p.mark_live(connection),
        }
    }

    fn live_count(&self) -> usize {
        match self {
            Self::Single(p) => p.live_count(),
            Self::RoundRobin(p) => p.live_count(),
        }
    }
}
