//! App - アプリケーション層
//!
//! ports を組み合わせてアプリケーションロジックを実装します。
//!
//! # 主要コンポーネント
//! - **WorkerLoop / WorkerGroup**: 消費ループ（poll→claim→callback→ack/release）
//! - **Producer**: backend への投入口
//! - **Pipeline / PipelineBuilder**: Receiver → filters → Consumer
//! - **Dispatcher**: task name で型付き Handler を選ぶ callback
//! - **CacheSweeper**: 期限切れ cache entry の掃除

pub mod builder;
pub mod cache_sweeper;
pub mod dispatcher;
pub mod pipeline;
pub mod producer;
pub mod worker_loop;

pub use self::builder::PipelineBuilder;
pub use self::cache_sweeper::{CacheSweeper, SweeperHandle};
pub use self::dispatcher::Dispatcher;
pub use self::pipeline::{Filter, Pipeline, PipelineState, StartMode};
pub use self::producer::Producer;
pub use self::worker_loop::{
    Callback, CycleOutcome, Delivery, WorkerGroup, WorkerHandle, WorkerLoop,
};
