//! QueueBackend port - producer と consumer をつなぐ名前付きチャネル
//!
//! # 実装
//! - **InMemoryQueueBackend**（"dummy"）: 単一プロセス・テスト用、永続性なし
//!
//! 他の backend も同じ契約（claim の原子性・ack の冪等性）を守ること。

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::{ConsumerId, Message, Result, Task};

/// Snapshot of a backend's contents.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub pending: usize,
    pub claimed: usize,
}

/// QueueBackend はタスクを配送するためのキュー
///
/// # 設計原則
/// - claim は同一 backend 上の並行 claimer に対して原子的（compare-and-set）
/// - poll は claim 済みの message を返さない
/// - 順序保証は実装ごとに明記されたものだけ（既定では「どれか 1 つ」）
/// - 到達不能なら BackendUnavailable を返す（リトライ判断は呼び出し側）
#[async_trait]
pub trait QueueBackend: Send + Sync {
    /// Short name used in logs and errors.
    fn name(&self) -> &'static str;

    /// Wrap `task` in a new message and append it.
    async fn push(&self, task: Task) -> Result<()>;

    /// Some unclaimed message, or `None` if there is none.
    async fn poll(&self) -> Result<Option<Message>>;

    /// Set the ownership marker iff the message is still present and unclaimed.
    /// On success `message` is updated to carry the marker as well.
    async fn claim(&self, message: &mut Message, consumer: ConsumerId) -> Result<bool>;

    /// Clear the ownership marker so a later poll can pick the message up again.
    async fn release(&self, message: &mut Message) -> Result<()>;

    /// Remove the message permanently. Acking a removed message is a no-op.
    async fn ack(&self, message: &Message) -> Result<()>;

    async fn stats(&self) -> Result<QueueStats>;

    /// Release resources. Consumers using the backend must be stopped first.
    async fn close(&self) -> Result<()>;
}
