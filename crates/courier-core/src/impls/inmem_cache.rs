//! InMemoryResultCache - 開発・テスト用の result cache（"dummy"）
//!
//! 期限切れは参照時に判定して捨てる（遅延削除）。
//! まとめて掃除したい場合は `purge_expired` か `CacheSweeper` を使う。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::debug;

use crate::domain::{CourierError, Result, Task, TaskId};
use crate::ports::{Clock, ResultCache, SystemClock};

const BACKEND_NAME: &str = "memory";

#[derive(Debug, Clone)]
struct CacheEntry {
    task: Task,
    expires_at: Option<DateTime<Utc>>,
}

impl CacheEntry {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires_at| now >= expires_at)
    }
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<TaskId, CacheEntry>,
    closed: bool,
}

pub struct InMemoryResultCache {
    state: RwLock<CacheState>,
    clock: Arc<dyn Clock>,
}

impl InMemoryResultCache {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: RwLock::new(CacheState::default()),
            clock,
        }
    }

    /// Number of stored entries, expired ones included until purged.
    pub async fn len(&self) -> usize {
        self.state.read().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    fn expires_at(&self, ttl: Option<Duration>) -> Option<DateTime<Utc>> {
        let ttl = ttl?;
        let ttl = chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX);
        Some(
            self.clock
                .now()
                .checked_add_signed(ttl)
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
        )
    }
}

impl Default for InMemoryResultCache {
    fn default() -> Self {
        Self::new()
    }
}

fn closed_error() -> CourierError {
    CourierError::unavailable(BACKEND_NAME, "cache is closed")
}

#[async_trait]
impl ResultCache for InMemoryResultCache {
    fn name(&self) -> &'static str {
        BACKEND_NAME
    }

    async fn save_task(&self, task: &Task, ttl: Option<Duration>) -> Result<()> {
        let mut state = self.state.write().await;
        if state.closed {
            return Err(closed_error());
        }
        // TTL は lock 取得後の時刻から数える
        let entry = CacheEntry {
            task: task.clone(),
            expires_at: self.expires_at(ttl),
        };
        state.entries.insert(task.task_id().clone(), entry);
        Ok(())
    }

    async fn get_task(&self, task_id: &TaskId) -> Result<Task> {
        let now = self.clock.now();
        {
            let state = self.state.read().await;
            if state.closed {
                return Err(closed_error());
            }
            match state.entries.get(task_id) {
                None => return Err(CourierError::TaskNotFound(task_id.clone())),
                Some(entry) if !entry.is_expired(now) => return Ok(entry.task.clone()),
                Some(_) => {}
            }
        }

        // expired: drop it unless a newer save replaced it in the meantime
        let mut state = self.state.write().await;
        if state
            .entries
            .get(task_id)
            .is_some_and(|entry| entry.is_expired(now))
        {
            state.entries.remove(task_id);
            debug!(task_id = %task_id, "expired entry dropped on lookup");
        }
        Err(CourierError::TaskNotFound(task_id.clone()))
    }

    async fn purge_expired(&self) -> Result<usize> {
        let now = self.clock.now();
        let mut state = self.state.write().await;
        if state.closed {
            return Err(closed_error());
        }
        let before = state.entries.len();
        state.entries.retain(|_, entry| !entry.is_expired(now));
        Ok(before - state.entries.len())
    }

    async fn close(&self) -> Result<()> {
        let mut state = self.state.write().await;
        state.closed = true;
        state.entries.clear();
        Ok(())
    }
}
