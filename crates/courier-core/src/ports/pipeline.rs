//! Pipeline ports - Receiver（入口）と Consumer（出口）
//!
//! Pipeline は Receiver に MessageHandler を渡し、受信した message を
//! filter 列 → Consumer の順に流します。

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::oneshot;

use crate::domain::Result;

/// Receiver が受信した message を渡す先
#[async_trait]
pub trait MessageHandler<M: Send + 'static>: Send + Sync {
    async fn handle(&self, message: M) -> Result<()>;
}

/// Receiver は受信ループを持つ入口
///
/// # 契約
/// - `receive` は受信を開始したら `started.notify()` を呼び、`stop` されるまで戻らない
/// - handler のエラーで受信ループを止めない（ログに残して続行）
#[async_trait]
pub trait Receiver<M: Send + 'static>: Send + Sync {
    async fn receive(&self, handler: Arc<dyn MessageHandler<M>>, started: StartSignal)
    -> Result<()>;

    async fn stop(&self) -> Result<()>;
}

/// Consumer は Pipeline の最終段
#[async_trait]
pub trait Consumer<M: Send + 'static>: Send + Sync {
    async fn start(&self) -> Result<()> {
        Ok(())
    }

    async fn consume(&self, message: M) -> Result<()>;

    async fn stop(&self) -> Result<()> {
        Ok(())
    }
}

/// One-shot confirmation from a receiver that its loop has begun.
#[derive(Debug)]
pub struct StartSignal {
    tx: Option<oneshot::Sender<()>>,
}

impl StartSignal {
    pub fn new() -> (Self, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();
        (Self { tx: Some(tx) }, rx)
    }

    /// A signal nobody waits on (blocking start).
    pub fn detached() -> Self {
        Self { tx: None }
    }

    /// Idempotent.
    pub fn notify(&mut self) {
        if let Some(tx) = self.tx.take() {
            // the waiting side may already be gone
            let _ = tx.send(());
        }
    }
}
