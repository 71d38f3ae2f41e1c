//! Impls - ports の実装と、設定マップから実装を選ぶ factory
//!
//! # 含まれる実装
//! - **InMemoryQueueBackend**: reference queue backend（"dummy"）
//! - **InMemoryResultCache**: reference result cache（"dummy"）
//! - **RedisResultCache**: Redis / Redis Sentinel（feature = "redis"）
//! - **ChannelReceiver**: mpsc チャネルを入口にする Pipeline Receiver

pub mod channel_receiver;
pub mod inmem_cache;
pub mod inmem_queue;
#[cfg(feature = "redis")]
pub mod redis_cache;

use std::sync::Arc;

use tracing::info;

pub use self::channel_receiver::ChannelReceiver;
pub use self::inmem_cache::InMemoryResultCache;
pub use self::inmem_queue::InMemoryQueueBackend;
#[cfg(feature = "redis")]
pub use self::redis_cache::RedisResultCache;

use crate::config::{CacheConfig, QueueConfig};
use crate::domain::Result;
#[cfg(not(feature = "redis"))]
use crate::domain::CourierError;
use crate::ports::{QueueBackend, ResultCache};

/// Build a queue backend from a configuration map such as `{"backend": "dummy"}`.
pub async fn create_queue_backend(config: &serde_json::Value) -> Result<Arc<dyn QueueBackend>> {
    let config = QueueConfig::from_value(config)?;
    queue_backend_from_config(&config).await
}

pub async fn queue_backend_from_config(config: &QueueConfig) -> Result<Arc<dyn QueueBackend>> {
    match config {
        QueueConfig::Dummy {} => {
            info!(backend = "dummy", "queue backend created");
            Ok(Arc::new(InMemoryQueueBackend::new()))
        }
    }
}

/// Build a result cache from a configuration map, e.g.
/// `{"backend": "redis", "address": "redis://127.0.0.1:6379"}`.
pub async fn create_result_cache(config: &serde_json::Value) -> Result<Arc<dyn ResultCache>> {
    let config = CacheConfig::from_value(config)?;
    result_cache_from_config(&config).await
}

pub async fn result_cache_from_config(config: &CacheConfig) -> Result<Arc<dyn ResultCache>> {
    config.validate()?;
    match config {
        CacheConfig::Dummy {} => {
            info!(backend = "dummy", "result cache created");
            Ok(Arc::new(InMemoryResultCache::new()))
        }
        #[cfg(feature = "redis")]
        CacheConfig::Redis {
            address,
            key_prefix,
        } => Ok(Arc::new(
            RedisResultCache::connect(address, key_prefix.clone()).await?,
        )),
        #[cfg(feature = "redis")]
        CacheConfig::RedisSentinel {
            sentinels,
            service_name,
            key_prefix,
        } => Ok(Arc::new(
            RedisResultCache::connect_sentinel(sentinels, service_name, key_prefix.clone())
                .await?,
        )),
        #[cfg(not(feature = "redis"))]
        CacheConfig::Redis { .. } | CacheConfig::RedisSentinel { .. } => Err(CourierError::config(
            "redis result caches need courier-core built with the `redis` feature",
        )),
    }
}
