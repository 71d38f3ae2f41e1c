//! courier-core
//!
//! Task queue with pluggable backends, a TTL result cache, consumer worker
//! loops and a receiver → filters → consumer pipeline.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, task, message, errors）
//! - **ports**: 抽象化レイヤー（QueueBackend, ResultCache, Receiver/Consumer, Clock, IdGenerator）
//! - **impls**: 実装（in-memory queue / cache, Redis cache, ChannelReceiver）と factory
//! - **app**: アプリケーションロジック（worker_loop, producer, pipeline, dispatcher, cache_sweeper）
//! - **typed**: 型付き Task API（TypedTask, Handler, TypedRegistry）
//! - **config**: backend 設定マップとプロセス設定

pub mod app;
pub mod config;
pub mod domain;
pub mod impls;
pub mod ports;
pub mod typed;

pub use app::{
    Delivery, Dispatcher, Pipeline, PipelineState, Producer, StartMode, WorkerGroup, WorkerLoop,
};
pub use config::CourierConfig;
pub use domain::{CourierError, Result, Task, TaskId};
pub use impls::{create_queue_backend, create_result_cache};
pub use ports::{QueueBackend, ResultCache};
