//! External-store adapter. Tunes local effective limits only — it never
//! performs a charge remotely, so enforcement across multiple daemon
//! instances is approximate (N × limit in the worst case), which is
//! documented and deliberate.

use async_trait::async_trait;
use tokio::sync::Mutex as AsyncMutex;

/// A key-value store the sync loop can query for an overriding limit.
#[async_trait]
pub trait LimitBackend: Send + Sync {
    /// Fetches the raw stored value for `key`, or `None` if absent or the
    /// backend is unreachable. Parsing (plain integer vs. a JSON envelope)
    /// is the caller's responsibility since it depends on
    /// `RedisBackendCfg.LimiterValueField`.
    async fn fetch_raw(&self, key: &str) -> Option<String>;
}

/// No-op backend used when `LimiterBackend = memory` (the default) — every
/// limiter's effective limit stays exactly what its rule configures.
pub struct MemoryBackend;

#[async_trait]
impl LimitBackend for MemoryBackend {
    async fn fetch_raw(&self, _key: &str) -> Option<String> {
        None
    }
}

/// `redis`-backed adapter. The connection is established lazily on first
/// use and cached; if the backend is unreachable, `fetch_raw` logs once and
/// returns `None`, leaving the limiter's existing (locally configured)
/// limit untouched. Reconnection is retried on each sync cycle.
pub struct RedisBackend {
    client: redis::Client,
    conn: AsyncMutex<Option<redis::aio::ConnectionManager>>,
}

impl RedisBackend {
    pub fn new(endpoint: &str, password: Option<&str>) -> redis::RedisResult<Self> {
        let url = match password {
            Some(pw) if !pw.is_empty() => format!("redis://:{pw}@{endpoint}"),
            _ => format!("redis://{endpoint}"),
        };
        let client = redis::Client::open(url)?;
        Ok(Self {
            client,
            conn: AsyncMutex::new(None),
        })
    }

    async fn connection(&self) -> Option<redis::aio::ConnectionManager> {
        let mut guard = self.conn.lock().await;
        if guard.is_none() {
            match self.client.get_connection_manager().await {
                Ok(manager) => *guard = Some(manager),
                Err(err) => {
                    tracing::warn!(error = %err, "redis backend unreachable, falling back to local limits");
                    return None;
                }
            }
        }
        guard.clone()
    }
}

#[async_trait]
impl LimitBackend for RedisBackend {
    async fn fetch_raw(&self, key: &str) -> Option<String> {
        let mut conn = self.connection().await?;
        redis::AsyncCommands::get(&mut conn, key).await.ok()
    }
}

/// Interprets a raw backend value as an effective limit: a plain integer
/// when no `limiter_value_field` is configured, or the named field of a
/// JSON document otherwise. Non-positive or unparseable values are
/// discarded rather than overriding the limiter.
pub fn parse_limit_payload(raw: &str, value_field: Option<&str>) -> Option<i64> {
    let parsed = match value_field {
        None => raw.trim().parse::<i64>().ok(),
        Some(field) => {
            let doc: serde_json::Value = serde_json::from_str(raw).ok()?;
            doc.get(field)?.as_i64()
        }
    };
    parsed.filter(|v| *v > 0)
}
