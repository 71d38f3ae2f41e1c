//! InMemoryQueueBackend - 開発・テスト用の queue backend（"dummy"）
//!
//! # 実装詳細
//! - インスタンスごとにストレージを持つ（プロセス全体のシングルトンにしない）
//! - BTreeMap<seq, Message> で追加順を保持し、poll は FIFO
//! - tokio::sync::Mutex 1 本で claim の compare-and-set を原子的にする

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use crate::domain::{ConsumerId, CourierError, Message, MessageId, Result, Task};
use crate::ports::{IdGenerator, QueueBackend, QueueStats, SystemClock, UlidGenerator};

const BACKEND_NAME: &str = "memory";

#[derive(Default)]
struct InMemoryQueueState {
    /// 追加順（seq）で並んだ message
    messages: BTreeMap<u64, Message>,
    /// MessageId -> seq
    index: HashMap<MessageId, u64>,
    next_seq: u64,
    closed: bool,
}

impl InMemoryQueueState {
    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(CourierError::unavailable(BACKEND_NAME, "backend is closed"));
        }
        Ok(())
    }

    fn get_mut(&mut self, message_id: MessageId) -> Option<&mut Message> {
        let seq = self.index.get(&message_id)?;
        self.messages.get_mut(seq)
    }
}

/// InMemoryQueueBackend は永続性のない reference backend
///
/// # 順序
/// poll は「最も古い未 claim の message」を返します（FIFO を保証）。
///
/// # 使用例
/// ```ignore
/// let backend = InMemoryQueueBackend::new();
/// backend.push(task).await?;
/// let message = backend.poll().await?;
/// ```
pub struct InMemoryQueueBackend {
    state: Mutex<InMemoryQueueState>,
    ids: Arc<dyn IdGenerator>,
}

impl InMemoryQueueBackend {
    pub fn new() -> Self {
        Self::with_id_generator(Arc::new(UlidGenerator::new(SystemClock)))
    }

    pub fn with_id_generator(ids: Arc<dyn IdGenerator>) -> Self {
        Self {
            state: Mutex::new(InMemoryQueueState::default()),
            ids,
        }
    }
}

impl Default for InMemoryQueueBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl QueueBackend for InMemoryQueueBackend {
    fn name(&self) -> &'static str {
        BACKEND_NAME
    }

    async fn push(&self, task: Task) -> Result<()> {
        let message = Message::new(self.ids.generate_message_id(), task);

        let mut state = self.state.lock().await;
        state.ensure_open()?;

        let seq = state.next_seq;
        state.next_seq += 1;
        debug!(message_id = %message.message_id(), task_id = %message.task().task_id(), "pushed");
        state.index.insert(message.message_id(), seq);
        state.messages.insert(seq, message);
        Ok(())
    }

    async fn poll(&self) -> Result<Option<Message>> {
        let state = self.state.lock().await;
        state.ensure_open()?;
        Ok(state
            .messages
            .values()
            .find(|message| !message.is_claimed())
            .cloned())
    }

    async fn claim(&self, message: &mut Message, consumer: ConsumerId) -> Result<bool> {
        let mut state = self.state.lock().await;
        state.ensure_open()?;

        let Some(stored) = state.get_mut(message.message_id()) else {
            // already acked
            return Ok(false);
        };
        if !stored.mark_claimed(consumer) {
            return Ok(false);
        }
        *message = stored.clone();
        Ok(true)
    }

    async fn release(&self, message: &mut Message) -> Result<()> {
        let mut state = self.state.lock().await;
        state.ensure_open()?;

        if let Some(stored) = state.get_mut(message.message_id()) {
            stored.clear_claim();
        }
        message.clear_claim();
        Ok(())
    }

    async fn ack(&self, message: &Message) -> Result<()> {
        let mut state = self.state.lock().await;
        state.ensure_open()?;

        if let Some(seq) = state.index.remove(&message.message_id()) {
            state.messages.remove(&seq);
            debug!(message_id = %message.message_id(), "acked");
        }
        Ok(())
    }

    async fn stats(&self) -> Result<QueueStats> {
        let state = self.state.lock().await;
        state.ensure_open()?;

        let claimed = state.messages.values().filter(|m| m.is_claimed()).count();
        Ok(QueueStats {
            pending: state.messages.len() - claimed,
            claimed,
        })
    }

    async fn close(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        state.closed = true;
        state.messages.clear();
        state.index.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Payload;
    use serde_json::json;
    use ulid::Ulid;

    fn task(name: &str) -> Task {
        let mut payload = Payload::new();
        payload.insert("name".into(), json!(name));
        Task::new(name, payload)
    }

    fn consumer() -> ConsumerId {
        ConsumerId::from_ulid(Ulid::new())
    }

    #[tokio::test]
    async fn test_push_poll_roundtrip() {
        let backend = InMemoryQueueBackend::new();
        let pushed = task("a");
        backend.push(pushed.clone()).await.unwrap();

        let polled = backend.poll().await.unwrap().unwrap();
        assert_eq!(polled.task(), &pushed);
        assert!(!polled.is_claimed());
    }

    #[tokio::test]
    async fn test_poll_empty_returns_none() {
        let backend = InMemoryQueueBackend::new();
        assert!(backend.poll().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_poll_is_fifo_and_skips_claimed() {
        let backend = InMemoryQueueBackend::new();
        backend.push(task("first")).await.unwrap();
        backend.push(task("second")).await.unwrap();

        let mut first = backend.poll().await.unwrap().unwrap();
        assert_eq!(first.task().name(), "first");

        assert!(backend.claim(&mut first, consumer()).await.unwrap());
        assert!(first.is_claimed());

        let next = backend.poll().await.unwrap().unwrap();
        assert_eq!(next.task().name(), "second");
    }

    #[tokio::test]
    async fn test_second_claim_loses() {
        let backend = InMemoryQueueBackend::new();
        backend.push(task("a")).await.unwrap();

        let mut copy1 = backend.poll().await.unwrap().unwrap();
        let mut copy2 = copy1.clone();
        let winner = consumer();

        assert!(backend.claim(&mut copy1, winner).await.unwrap());
        assert!(!backend.claim(&mut copy2, consumer()).await.unwrap());
        assert_eq!(copy1.claimed_by(), Some(winner));
        assert!(!copy2.is_claimed());
    }

    #[tokio::test]
    async fn test_exactly_one_concurrent_claim_succeeds() {
        let backend = Arc::new(InMemoryQueueBackend::new());
        backend.push(task("contended")).await.unwrap();
        let message = backend.poll().await.unwrap().unwrap();

        let mut joins = Vec::new();
        for _ in 0..16 {
            let backend = Arc::clone(&backend);
            let mut message = message.clone();
            joins.push(tokio::spawn(async move {
                backend.claim(&mut message, consumer()).await.unwrap()
            }));
        }

        let mut wins = 0;
        for join in joins {
            if join.await.unwrap() {
                wins += 1;
            }
        }
        assert_eq!(wins, 1);
    }

    #[tokio::test]
    async fn test_release_makes_message_pollable_again() {
        let backend = InMemoryQueueBackend::new();
        backend.push(task("a")).await.unwrap();

        let mut message = backend.poll().await.unwrap().unwrap();
        assert!(backend.claim(&mut message, consumer()).await.unwrap());
        assert!(backend.poll().await.unwrap().is_none());

        backend.release(&mut message).await.unwrap();
        assert!(!message.is_claimed());

        let mut again = backend.poll().await.unwrap().unwrap();
        assert_eq!(again.message_id(), message.message_id());
        assert!(backend.claim(&mut again, consumer()).await.unwrap());
    }

    #[tokio::test]
    async fn test_ack_is_idempotent() {
        let backend = InMemoryQueueBackend::new();
        backend.push(task("a")).await.unwrap();

        let mut message = backend.poll().await.unwrap().unwrap();
        backend.claim(&mut message, consumer()).await.unwrap();

        backend.ack(&message).await.unwrap();
        backend.ack(&message).await.unwrap();

        assert!(backend.poll().await.unwrap().is_none());
        assert_eq!(backend.stats().await.unwrap(), QueueStats::default());
    }

    #[tokio::test]
    async fn test_claim_after_ack_fails() {
        let backend = InMemoryQueueBackend::new();
        backend.push(task("a")).await.unwrap();

        let message = backend.poll().await.unwrap().unwrap();
        let mut stale = message.clone();
        backend.ack(&message).await.unwrap();

        assert!(!backend.claim(&mut stale, consumer()).await.unwrap());
    }

    #[tokio::test]
    async fn test_stats_counts_pending_and_claimed() {
        let backend = InMemoryQueueBackend::new();
        backend.push(task("a")).await.unwrap();
        backend.push(task("b")).await.unwrap();

        let mut message = backend.poll().await.unwrap().unwrap();
        backend.claim(&mut message, consumer()).await.unwrap();

        let stats = backend.stats().await.unwrap();
        assert_eq!(stats.pending, 1);
        assert_eq!(stats.claimed, 1);
    }

    #[tokio::test]
    async fn test_closed_backend_is_unavailable() {
        let backend = InMemoryQueueBackend::new();
        backend.close().await.unwrap();

        let err = backend.push(task("a")).await.unwrap_err();
        assert!(matches!(err, CourierError::BackendUnavailable { .. }));
        assert!(backend.poll().await.is_err());
    }

    #[tokio::test]
    async fn test_instances_do_not_share_storage() {
        let a = InMemoryQueueBackend::new();
        let b = InMemoryQueueBackend::new();
        a.push(task("only-in-a")).await.unwrap();

        assert!(b.poll().await.unwrap().is_none());
    }
}
