//! ResultCache port - Task の結果（スナップショット）を task_id で保存
//!
//! # 実装
//! - **InMemoryResultCache**（"dummy"）: 遅延判定 + `purge_expired` による掃除
//! - **RedisResultCache**（feature = "redis"）: 直接接続 / Sentinel 経由。Redis 側の期限切れ

use async_trait::async_trait;
use std::time::Duration;

use crate::domain::{Result, Task, TaskId};

/// ResultCache は TTL 付きで Task を保存
///
/// # 時間に関する契約
/// - ttl を指定した entry は、save_task が戻ってから ttl 経過後に参照不能になる
/// - 期限切れの entry を返してはならない（遅延判定でも即時削除でもよい）
/// - 「存在しない」と「期限切れ」はどちらも TaskNotFound（区別しない）
/// - 同じ task_id への並行 save は後勝ち
#[async_trait]
pub trait ResultCache: Send + Sync {
    fn name(&self) -> &'static str;

    async fn save_task(&self, task: &Task, ttl: Option<Duration>) -> Result<()>;

    async fn get_task(&self, task_id: &TaskId) -> Result<Task>;

    /// Eagerly drop expired entries and return how many were removed.
    /// Backends with native expiry keep the default.
    async fn purge_expired(&self) -> Result<usize> {
        Ok(0)
    }

    async fn close(&self) -> Result<()>;
}
