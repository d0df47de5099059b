//! Rate limiting in front of the voting engine.
//!
//! Each protected endpoint allows a client at most `times` operations per `window`. Counters live
//! in a [`WindowStore`]; with [`RedisStore`] they are shared by every instance of the service, so
//! the limit is fleet-wide. A counter is created by the first hit in a window and expires on its
//! own when the window ends.
//!
//! Admission fails open: if the store cannot be reached, requests are let through. Voting staying
//! available matters more than strict enforcement.

use crate::error::{Error, Result};
use redis::{aio::ConnectionManager, Script};
use std::{collections::HashMap, future::Future, time::Duration};
use tokio::{sync::Mutex, time::Instant};

/// How many operations a single client may perform per window.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Limit {
    pub times: u64,
    pub window: Duration,
}

impl Limit {
    pub const fn new(times: u64, window: Duration) -> Self {
        Self { times, window }
    }
}

/// Shared storage for windowed counters.
pub trait WindowStore {
    /// Count one hit against `key` and return the number of hits in the current window.
    ///
    /// The first hit opens a window of length `window`; the count restarts once it has passed.
    fn hit(&self, key: &str, window: Duration) -> impl Future<Output = anyhow::Result<u64>> + Send;
}

/// Admission control gate.
#[derive(Clone, Debug)]
pub struct Gate<S> {
    store: S,
}

impl<S: WindowStore> Gate<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Admit or reject one operation by `client` on `endpoint`.
    pub async fn admit(&self, endpoint: &str, client: &str, limit: Limit) -> Result<()> {
        let key = format!("rate_limit:{endpoint}:{client}");
        match self.store.hit(&key, limit.window).await {
            Ok(count) if count > limit.times => {
                tracing::debug!(endpoint, client, count, "rate limited");
                Err(Error::RateLimited {
                    times: limit.times,
                    window: limit.window,
                })
            }
            Ok(_) => Ok(()),
            Err(err) => {
                tracing::warn!(endpoint, client, "rate limit store unavailable, admitting: {err:#}");
                Ok(())
            }
        }
    }
}

/// Increment the counter and start its expiry clock, atomically. Later hits in the same window do
/// not push the expiry back.
const HIT_SCRIPT: &str = r"
local count = redis.call('INCR', KEYS[1])
if count == 1 then
    redis.call('PEXPIRE', KEYS[1], ARGV[1])
end
return count
";

/// Counters in Redis, expired by Redis' own TTLs.
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
    script: Script,
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore").finish_non_exhaustive()
    }
}

impl RedisStore {
    pub async fn connect(url: &str) -> anyhow::Result<Self> {
        let client = redis::Client::open(url)?;
        let conn = client.get_connection_manager().await?;
        Ok(Self {
            conn,
            script: Script::new(HIT_SCRIPT),
        })
    }
}

impl WindowStore for RedisStore {
    async fn hit(&self, key: &str, window: Duration) -> anyhow::Result<u64> {
        let mut conn = self.conn.clone();
        let count: u64 = self
            .script
            .key(key)
            .arg(window.as_millis() as u64)
            .invoke_async(&mut conn)
            .await?;
        Ok(count)
    }
}

#[derive(Clone, Copy, Debug)]
struct Window {
    count: u64,
    expires: Instant,
}

/// Counters in process memory.
///
/// Limits are only enforced per process. This is the fallback when no shared store is
/// configured or reachable.
#[derive(Debug, Default)]
pub struct MemoryStore {
    windows: Mutex<HashMap<String, Window>>,
}

impl WindowStore for MemoryStore {
    async fn hit(&self, key: &str, window: Duration) -> anyhow::Result<u64> {
        let now = Instant::now();
        let mut windows = self.windows.lock().await;
        windows.retain(|_, w| w.expires > now);
        let entry = windows.entry(key.to_string()).or_insert(Window {
            count: 0,
            expires: now + window,
        });
        entry.count += 1;
        Ok(entry.count)
    }
}

/// Either store, chosen at startup.
#[derive(Debug)]
pub enum Backend {
    Redis(RedisStore),
    Memory(MemoryStore),
}

impl Backend {
    /// Connect to Redis at `url`, falling back to process memory if no URL is given or the server
    /// cannot be reached.
    pub async fn connect(url: Option<&str>) -> Self {
        let Some(url) = url else {
            tracing::warn!("no shared rate limit store configured, limits are per process");
            return Self::Memory(Default::default());
        };
        match RedisStore::connect(url).await {
            Ok(store) => {
                tracing::info!("connected to rate limit store");
                Self::Redis(store)
            }
            Err(err) => {
                tracing::warn!("rate limit store unreachable, limits are per process: {err:#}");
                Self::Memory(Default::default())
            }
        }
    }
}

impl WindowStore for Backend {
    async fn hit(&self, key: &str, window: Duration) -> anyhow::Result<u64> {
        match self {
            Self::Redis(store) => store.hit(key, window).await,
            Self::Memory(store) => store.hit(key, window).await,
        }
    }
}
