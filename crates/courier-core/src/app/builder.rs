//! PipelineBuilder - Pipeline の組み立て
//!
//! receiver / consumer の有無は build() では検証しない。
//! 欠けていれば `Pipeline::start()` が ConfigurationError を返す。

use std::sync::Arc;

use super::pipeline::{Filter, Pipeline};
use crate::ports::{Consumer, Receiver};

/// PipelineBuilder は Pipeline を構築
///
/// # 使用例
/// ```ignore
/// let (tx, receiver) = ChannelReceiver::channel(64);
/// let pipeline = Pipeline::<Task>::builder()
///     .receiver(receiver)
///     .filter(|task: Task| (task.name() != "noop").then_some(task))
///     .consumer(Producer::new(backend))
///     .build();
/// pipeline.start(StartMode::NonBlocking).await?;
/// ```
pub struct PipelineBuilder<M: Send + 'static> {
    receiver: Option<Arc<dyn Receiver<M>>>,
    filters: Vec<Filter<M>>,
    consumer: Option<Arc<dyn Consumer<M>>>,
}

impl<M: Send + 'static> PipelineBuilder<M> {
    pub fn new() -> Self {
        Self {
            receiver: None,
            filters: Vec::new(),
            consumer: None,
        }
    }

    pub fn receiver<R: Receiver<M> + 'static>(self, receiver: R) -> Self {
        self.receiver_arc(Arc::new(receiver))
    }

    pub fn receiver_arc(mut self, receiver: Arc<dyn Receiver<M>>) -> Self {
        self.receiver = Some(receiver);
        self
    }

    /// Append a filter; filters run in the order they were added.
    pub fn filter<F>(mut self, filter: F) -> Self
    where
        F: Fn(M) -> Option<M> + Send + Sync + 'static,
    {
        self.filters.push(Arc::new(filter));
        self
    }

    pub fn consumer<C: Consumer<M> + 'static>(self, consumer: C) -> Self {
        self.consumer_arc(Arc::new(consumer))
    }

    pub fn consumer_arc(mut self, consumer: Arc<dyn Consumer<M>>) -> Self {
        self.consumer = Some(consumer);
        self
    }

    pub fn build(self) -> Pipeline<M> {
        Pipeline::from_parts(self.receiver, self.filters, self.consumer)
    }
}

impl<M: Send + 'static> Default for PipelineBuilder<M> {
    fn default() -> Self {
        Self::new()
    }
}
