//! Message - queue backend を流れる Task の運搬用データ

use serde::{Deserialize, Serialize};

use super::{ConsumerId, MessageId, Task};

/// Message は Task を 1 つだけ包み、所有権マーカーを持つ
///
/// # 所有権マーカー（claimed_by）
/// - None: 未 claim（poll の対象）
/// - Some(consumer): その consumer が処理中
///
/// マーカーを書き換えてよいのは backend の claim / release だけです。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    message_id: MessageId,
    task: Task,
    claimed_by: Option<ConsumerId>,
}

impl Message {
    /// Wrap a task. Only backends create messages, inside `push`.
    pub fn new(message_id: MessageId, task: Task) -> Self {
        Self {
            message_id,
            task,
            claimed_by: None,
        }
    }

    pub fn message_id(&self) -> MessageId {
        self.message_id
    }

    pub fn task(&self) -> &Task {
        &self.task
    }

    pub fn into_task(self) -> Task {
        self.task
    }

    pub fn claimed_by(&self) -> Option<ConsumerId> {
        self.claimed_by
    }

    pub fn is_claimed(&self) -> bool {
        self.claimed_by.is_some()
    }

    /// Backend hook for `QueueBackend::claim`. Returns false if the marker was
    /// already set.
    pub fn mark_claimed(&mut self, consumer: ConsumerId) -> bool {
        if self.claimed_by.is_some() {
            return false;
        }
        self.claimed_by = Some(consumer);
        true
    }

    /// Backend hook for `QueueBackend::release`.
    pub fn clear_claim(&mut self) {
        self.claimed_by = None;
    }
}
