//! TypedRegistry - task name → Handler の登録と管理
//!
//! # 内部実装
//! - `register::<T, H>(handler)` で TypedHandler にラップして型消去
//! - `HashMap<&'static str, Arc<dyn DynHandler>>` で管理

use std::collections::HashMap;
use std::sync::Arc;

use super::handler::{DynHandler, Handler, TypedHandler};
use super::task::TypedTask;

/// TypedRegistry は型付き Handler を task name で引けるようにする
///
/// # 使用例
/// ```ignore
/// let mut registry = TypedRegistry::new();
/// registry.register::<Resize, _>(ResizeHandler)?;
///
/// let handler = registry.get("image.resize");
/// ```
#[derive(Default)]
pub struct TypedRegistry {
    handlers: HashMap<&'static str, Arc<dyn DynHandler>>,
}

/// RegistryError は TypedRegistry の操作エラー
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("handler for task '{0}' is already registered")]
    AlreadyRegistered(String),
}

impl TypedRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<T: TypedTask, H: Handler<T> + 'static>(
        &mut self,
        handler: H,
    ) -> Result<(), RegistryError> {
        if self.handlers.contains_key(T::NAME) {
            return Err(RegistryError::AlreadyRegistered(T::NAME.to_string()));
        }
        self.handlers
            .insert(T::NAME, Arc::new(TypedHandler::<T, H>::new(handler)));
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn DynHandler>> {
        self.handlers.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    /// Registered task names, sorted.
    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.handlers.keys().copied().collect();
        names.sort_unstable();
        names
    }
}
