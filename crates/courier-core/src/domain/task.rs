use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use super::TaskId;

/// Task payload: a JSON object (string keys, arbitrary values).
pub type Payload = serde_json::Map<String, serde_json::Value>;

/// Task は処理単位（name + payload）と、その識別子 task_id
///
/// # 不変条件
/// - 生成後は変更しない（setter を持たない）
/// - 等価性は task_id / name / payload の 3 つで判定
/// - cache を経由しても `content_hash()` が変わらない
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    task_id: TaskId,
    name: String,
    payload: Payload,
}

impl Task {
    /// 新しい Task を作成（task_id は自動生成）
    pub fn new(name: impl Into<String>, payload: Payload) -> Self {
        Self::with_id(TaskId::generate(), name, payload)
    }

    /// 呼び出し側が task_id を指定して Task を作成
    pub fn with_id(task_id: impl Into<TaskId>, name: impl Into<String>, payload: Payload) -> Self {
        Self {
            task_id: task_id.into(),
            name: name.into(),
            payload,
        }
    }

    /// Same id and name, different payload. Used to store a computed result
    /// under the identity of the task that produced it.
    pub fn with_payload(&self, payload: Payload) -> Self {
        Self {
            task_id: self.task_id.clone(),
            name: self.name.clone(),
            payload,
        }
    }

    pub fn task_id(&self) -> &TaskId {
        &self.task_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    /// Stable hash over id, name and payload.
    pub fn content_hash(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.hash(&mut hasher);
        hasher.finish()
    }
}

impl Hash for Task {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.task_id.hash(state);
        self.name.hash(state);
        // serde_json::Map is key-ordered, so the rendering is canonical.
        serde_json::Value::Object(self.payload.clone())
            .to_string()
            .hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload(value: serde_json::Value) -> Payload {
        match value {
            serde_json::Value::Object(map) => map,
            _ => panic!("payload must be an object"),
        }
    }

    #[test]
    fn new_generates_distinct_ids() {
        let a = Task::new("x", payload(json!({"n": 1})));
        let b = Task::new("x", payload(json!({"n": 1})));

        assert_ne!(a.task_id(), b.task_id());
        assert_ne!(a, b);
    }

    #[test]
    fn equality_covers_all_fields() {
        let a = Task::with_id("t-1", "x", payload(json!({"n": 1})));
        let same = Task::with_id("t-1", "x", payload(json!({"n": 1})));
        let other_name = Task::with_id("t-1", "y", payload(json!({"n": 1})));
        let other_payload = Task::with_id("t-1", "x", payload(json!({"n": 2})));

        assert_eq!(a, same);
        assert_eq!(a.content_hash(), same.content_hash());
        assert_ne!(a, other_name);
        assert_ne!(a.content_hash(), other_payload.content_hash());
    }

    #[test]
    fn hash_is_independent_of_key_insertion_order() {
        let mut first = Payload::new();
        first.insert("a".into(), json!(1));
        first.insert("b".into(), json!(2));

        let mut second = Payload::new();
        second.insert("b".into(), json!(2));
        second.insert("a".into(), json!(1));

        let a = Task::with_id("t-1", "x", first);
        let b = Task::with_id("t-1", "x", second);
        assert_eq!(a.content_hash(), b.content_hash());
    }

    #[test]
    fn json_roundtrip_preserves_hash() {
        let task = Task::new("resize", payload(json!({"w": 640, "tags": ["a", "b"]})));

        let encoded = serde_json::to_string(&task).unwrap();
        let decoded: Task = serde_json::from_str(&encoded).unwrap();

        assert_eq!(decoded, task);
        assert_eq!(decoded.content_hash(), task.content_hash());
    }

    #[test]
    fn with_payload_keeps_identity() {
        let task = Task::new("x", payload(json!({"n": 1})));
        let result = task.with_payload(payload(json!({"n": 2})));

        assert_eq!(result.task_id(), task.task_id());
        assert_eq!(result.name(), "x");
        assert_eq!(result.payload()["n"], 2);
    }
}
