//! Ports - 抽象化レイヤー
//!
//! 外部システム（キュー、キャッシュ、受信元）へのインターフェースを trait として定義し、
//! 実装の詳細は `impls` に閉じ込めます。

pub mod clock;
pub mod id_generator;
pub mod pipeline;
pub mod queue_backend;
pub mod result_cache;

pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::pipeline::{Consumer, MessageHandler, Receiver, StartSignal};
pub use self::queue_backend::{QueueBackend, QueueStats};
pub use self::result_cache::ResultCache;
