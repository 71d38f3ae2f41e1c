//! Producer - queue backend への投入口

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::domain::{Result, Task};
use crate::ports::{Consumer, QueueBackend};

/// Producer は task を backend に push するだけ（バッファリングしない）
///
/// # 所有権
/// - `Producer::new`: backend を他と共有する。`close()` は何もしない
/// - `Producer::exclusive`: backend を専有する。`close()` で backend も閉じる
pub struct Producer {
    backend: Arc<dyn QueueBackend>,
    owns_backend: bool,
}

impl Producer {
    pub fn new(backend: Arc<dyn QueueBackend>) -> Self {
        Self {
            backend,
            owns_backend: false,
        }
    }

    pub fn exclusive(backend: Arc<dyn QueueBackend>) -> Self {
        Self {
            backend,
            owns_backend: true,
        }
    }

    pub fn backend(&self) -> &Arc<dyn QueueBackend> {
        &self.backend
    }

    pub async fn push(&self, task: Task) -> Result<()> {
        debug!(task_id = %task.task_id(), name = task.name(), "pushing task");
        self.backend.push(task).await
    }

    pub async fn close(&self) -> Result<()> {
        if self.owns_backend {
            self.backend.close().await?;
        }
        Ok(())
    }
}

/// Pipeline の出口として使えるようにする
#[async_trait]
impl Consumer<Task> for Producer {
    async fn consume(&self, message: Task) -> Result<()> {
        self.push(message).await
    }

    async fn stop(&self) -> Result<()> {
        self.close().await
    }
}
