//! TypedTask trait - task name と payload 型の対応付け
//!
//! # 学習ポイント
//! - Associated Constants (`const NAME`)
//! - payload（JSON object）と Rust 型の相互変換を serde に任せる

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::domain::{CourierError, Payload, Result, Task};

/// TypedTask は task name と payload 型を対応付ける
///
/// # 使用例
/// ```ignore
/// #[derive(Serialize, Deserialize)]
/// struct Resize {
///     width: u32,
///     height: u32,
/// }
///
/// impl TypedTask for Resize {
///     const NAME: &'static str = "image.resize";
/// }
///
/// producer.push(Resize { width: 64, height: 64 }.to_task()?).await?;
/// ```
pub trait TypedTask: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// `Task::name` of tasks carrying this payload.
    const NAME: &'static str;

    /// Wrap `self` as a `Task` with a fresh id. The type must serialize to a
    /// JSON object.
    fn to_task(&self) -> Result<Task> {
        Ok(Task::new(Self::NAME, to_payload(self)?))
    }

    /// Decode a task's payload. The task name is not checked.
    fn from_task(task: &Task) -> Result<Self> {
        from_payload(task.payload().clone())
    }
}

pub(crate) fn to_payload<T: Serialize>(value: &T) -> Result<Payload> {
    match serde_json::to_value(value)? {
        serde_json::Value::Object(map) => Ok(map),
        other => Err(CourierError::Other(format!(
            "typed payload must serialize to a JSON object, got {other}"
        ))),
    }
}

pub(crate) fn from_payload<T: DeserializeOwned>(payload: Payload) -> Result<T> {
    Ok(serde_json::from_value(serde_json::Value::Object(payload))?)
}
