//! Dispatcher - task name で TypedRegistry の Handler を選ぶ worker callback
//!
//! # フロー
//! 1. `task.name` で handler を引く（未登録なら Handler エラー → release）
//! 2. payload を decode して handler を実行
//! 3. 出力 payload があれば、同じ task_id で result cache に保存（TTL は任意）
//! 4. ack

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use super::worker_loop::{Callback, Delivery};
use crate::domain::{CourierError, Result};
use crate::ports::ResultCache;
use crate::typed::TypedRegistry;

pub struct Dispatcher {
    registry: Arc<TypedRegistry>,
    cache: Option<Arc<dyn ResultCache>>,
    ttl: Option<Duration>,
}

impl Dispatcher {
    pub fn new(registry: TypedRegistry) -> Self {
        Self {
            registry: Arc::new(registry),
            cache: None,
            ttl: None,
        }
    }

    /// Store handler output in `cache`, expiring after `ttl` if given.
    pub fn with_cache(mut self, cache: Arc<dyn ResultCache>, ttl: Option<Duration>) -> Self {
        self.cache = Some(cache);
        self.ttl = ttl;
        self
    }

    pub fn registry(&self) -> &TypedRegistry {
        &self.registry
    }
}

#[async_trait]
impl Callback for Dispatcher {
    async fn call(&self, delivery: Delivery) -> Result<()> {
        let task = delivery.task();
        let handler = self.registry.get(task.name()).ok_or_else(|| {
            CourierError::handler(format!("no handler registered for task '{}'", task.name()))
        })?;

        let output = handler.handle_dyn(task.payload().clone()).await?;
        match (&self.cache, output) {
            (Some(cache), Some(output)) => {
                cache.save_task(&task.with_payload(output), self.ttl).await?;
                debug!(task_id = %task.task_id(), cache = cache.name(), "result cached");
            }
            _ => debug!(task_id = %task.task_id(), "nothing to cache"),
        }

        delivery.ack().await
    }
}
