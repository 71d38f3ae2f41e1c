//! Handler trait - TypedTask を処理する Handler の定義
//!
//! # 二層構造
//! - `Handler<T>`: 型付き。payload は decode 済みの `T`
//! - `DynHandler`: object-safe。`TypedHandler<T, H>` で型消去して registry に格納

use async_trait::async_trait;
use std::marker::PhantomData;

use super::task::{TypedTask, from_payload};
use crate::domain::{CourierError, Payload, Result};

/// Handler は TypedTask を処理し、結果の payload を返す
///
/// `Some(payload)` は dispatcher が result cache に保存する。
/// `None` は保存するものが無いことを表す。
///
/// # 使用例
/// ```ignore
/// struct ResizeHandler;
///
/// #[async_trait]
/// impl Handler<Resize> for ResizeHandler {
///     async fn handle(&self, task: Resize) -> Result<Option<Payload>> {
///         let thumb = resize(task.width, task.height).await?;
///         Ok(Some(thumb.into_payload()))
///     }
/// }
/// ```
#[async_trait]
pub trait Handler<T: TypedTask>: Send + Sync {
    async fn handle(&self, task: T) -> Result<Option<Payload>>;
}

/// DynHandler は object-safe な Handler
#[async_trait]
pub trait DynHandler: Send + Sync {
    async fn handle_dyn(&self, payload: Payload) -> Result<Option<Payload>>;
    fn name(&self) -> &'static str;
}

pub struct TypedHandler<T: TypedTask, H: Handler<T>> {
    handler: H,
    _marker: PhantomData<fn(T)>,
}

impl<T: TypedTask, H: Handler<T>> TypedHandler<T, H> {
    pub fn new(handler: H) -> Self {
        Self {
            handler,
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<T: TypedTask, H: Handler<T>> DynHandler for TypedHandler<T, H> {
    async fn handle_dyn(&self, payload: Payload) -> Result<Option<Payload>> {
        let task: T = from_payload(payload)
            .map_err(|e| CourierError::handler(format!("decode {}: {e}", T::NAME)))?;
        self.handler.handle(task).await
    }

    fn name(&self) -> &'static str {
        T::NAME
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::typed::fixtures::{Increment, IncrementHandler};
    use serde_json::json;

    #[tokio::test]
    async fn test_typed_handler_decodes_and_runs() {
        let handler = TypedHandler::<Increment, _>::new(IncrementHandler);
        assert_eq!(handler.name(), Increment::NAME);

        let mut payload = Payload::new();
        payload.insert("n".into(), json!(1));
        let output = handler.handle_dyn(payload).await.unwrap().unwrap();
        assert_eq!(output["n"], 2);
    }

    #[tokio::test]
    async fn test_decode_failure_is_handler_error() {
        let handler = TypedHandler::<Increment, _>::new(IncrementHandler);

        let mut payload = Payload::new();
        payload.insert("n".into(), json!("one"));
        let err = handler.handle_dyn(payload).await.unwrap_err();
        assert!(matches!(err, CourierError::Handler(_)));
    }
}
