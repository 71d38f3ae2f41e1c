//! Typed - 型付き Task API
//!
//! task name の typo を型で排除し、payload の decode を serde に任せる。
//!
//! # 二層構造
//! - **表層（Typed）**: `TypedTask` trait, `Handler<T>` trait
//! - **内部（Dyn）**: `DynHandler` trait - object-safe, type erasure

pub mod handler;
pub mod registry;
pub mod task;

pub use self::handler::{DynHandler, Handler, TypedHandler};
pub use self::registry::{RegistryError, TypedRegistry};
pub use self::task::TypedTask;
