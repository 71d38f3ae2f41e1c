//! RedisResultCache - Redis を使った result cache（feature = "redis"）
//!
//! # 接続方式
//! - **Direct**: primary のアドレスを直接指定
//! - **Sentinel**: sentinel に問い合わせて primary を発見（フェイルオーバー対応）
//!
//! TTL は Redis 側の期限切れ（PX）に任せるので `purge_expired` は既定のまま。

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::sentinel::{SentinelClient, SentinelServerType};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::domain::{CourierError, Result, Task, TaskId};
use crate::ports::ResultCache;

/// How a save maps onto Redis commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Expiry {
    /// zero TTL: nothing retrievable, DEL whatever was there
    Delete,
    /// SET ... PX <millis>
    Millis(u64),
    /// SET without expiry
    Never,
}

impl Expiry {
    fn from_ttl(ttl: Option<Duration>) -> Self {
        match ttl {
            None => Self::Never,
            Some(ttl) if ttl.is_zero() => Self::Delete,
            // sub-millisecond TTLs round up so the key still expires
            Some(ttl) => Self::Millis(u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)),
        }
    }
}

fn cache_key(prefix: &str, task_id: &TaskId) -> String {
    format!("{prefix}{task_id}")
}

enum ConnectionSource {
    Direct(redis::Client),
    Sentinel(Mutex<SentinelClient>),
}

pub struct RedisResultCache {
    source: ConnectionSource,
    connection: Mutex<Option<MultiplexedConnection>>,
    key_prefix: String,
    name: &'static str,
}

impl RedisResultCache {
    /// Connect to a primary at `address` (e.g. `redis://127.0.0.1:6379`).
    pub async fn connect(address: &str, key_prefix: impl Into<String>) -> Result<Self> {
        let client = redis::Client::open(address)
            .map_err(|e| CourierError::config(format!("invalid redis address {address}: {e}")))?;
        let cache = Self {
            source: ConnectionSource::Direct(client),
            connection: Mutex::new(None),
            key_prefix: key_prefix.into(),
            name: "redis",
        };
        cache.connection().await?;
        info!(address, "redis result cache connected");
        Ok(cache)
    }

    /// Discover the primary of `service_name` through the given sentinels.
    pub async fn connect_sentinel(
        sentinels: &[(String, u16)],
        service_name: &str,
        key_prefix: impl Into<String>,
    ) -> Result<Self> {
        let nodes: Vec<String> = sentinels
            .iter()
            .map(|(host, port)| format!("redis://{host}:{port}"))
            .collect();
        let client = SentinelClient::build(
            nodes,
            service_name.to_string(),
            None,
            SentinelServerType::Master,
        )
        .map_err(|e| CourierError::config(format!("invalid sentinel configuration: {e}")))?;

        let cache = Self {
            source: ConnectionSource::Sentinel(Mutex::new(client)),
            connection: Mutex::new(None),
            key_prefix: key_prefix.into(),
            name: "redis-sentinel",
        };
        cache.connection().await?;
        info!(service_name, sentinels = sentinels.len(), "redis primary discovered");
        Ok(cache)
    }

    fn key(&self, task_id: &TaskId) -> String {
        cache_key(&self.key_prefix, task_id)
    }

    fn unavailable(&self, err: redis::RedisError) -> CourierError {
        CourierError::unavailable(self.name, err.to_string())
    }

    /// Cached connection, (re)connecting or re-discovering the primary when
    /// there is none.
    async fn connection(&self) -> Result<MultiplexedConnection> {
        let mut slot = self.connection.lock().await;
        if let Some(conn) = slot.as_ref() {
            return Ok(conn.clone());
        }

        let client = match &self.source {
            ConnectionSource::Direct(client) => client.clone(),
            ConnectionSource::Sentinel(sentinel) => sentinel
                .lock()
                .await
                .async_get_client()
                .await
                .map_err(|e| self.unavailable(e))?,
        };
        let conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| self.unavailable(e))?;
        *slot = Some(conn.clone());
        Ok(conn)
    }

    /// Drop the cached connection so the next call reconnects; after a
    /// failover this is what moves us to the new primary.
    async fn invalidate(&self, err: redis::RedisError) -> CourierError {
        warn!(backend = self.name, error = %err, "redis command failed, dropping connection");
        *self.connection.lock().await = None;
        self.unavailable(err)
    }
}

#[async_trait]
impl ResultCache for RedisResultCache {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn save_task(&self, task: &Task, ttl: Option<Duration>) -> Result<()> {
        let key = self.key(task.task_id());
        let mut conn = self.connection().await?;

        let result: redis::RedisResult<()> = match Expiry::from_ttl(ttl) {
            Expiry::Delete => redis::cmd("DEL").arg(&key).query_async(&mut conn).await,
            Expiry::Millis(millis) => {
                redis::cmd("SET")
                    .arg(&key)
                    .arg(serde_json::to_string(task)?)
                    .arg("PX")
                    .arg(millis)
                    .query_async(&mut conn)
                    .await
            }
            Expiry::Never => {
                redis::cmd("SET")
                    .arg(&key)
                    .arg(serde_json::to_string(task)?)
                    .query_async(&mut conn)
                    .await
            }
        };
        match result {
            Ok(()) => Ok(()),
            Err(e) => Err(self.invalidate(e).await),
        }
    }

    async fn get_task(&self, task_id: &TaskId) -> Result<Task> {
        let mut conn = self.connection().await?;
        let raw: redis::RedisResult<Option<String>> = redis::cmd("GET")
            .arg(self.key(task_id))
            .query_async(&mut conn)
            .await;

        match raw {
            Ok(Some(raw)) => Ok(serde_json::from_str(&raw)?),
            Ok(None) => Err(CourierError::TaskNotFound(task_id.clone())),
            Err(e) => Err(self.invalidate(e).await),
        }
    }

    async fn close(&self) -> Result<()> {
        *self.connection.lock().await = None;
        Ok(())
    }
}
