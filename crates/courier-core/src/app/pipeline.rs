//! Pipeline - Receiver → filters → Consumer
//!
//! # 状態遷移
//! ```text
//! NotStarted --start()--> Running --stop()--> Stopped
//!      |                                        ^
//!      +------ startup failure -----------------+
//! ```
//! - start() は NotStarted からのみ。stop() は Running からのみ
//! - Stopped からは再起動できない
//! - receiver / consumer が無いまま start() すると ConfigurationError（状態は変わらない）

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::builder::PipelineBuilder;
use crate::domain::{CourierError, Result};
use crate::ports::{Consumer, MessageHandler, Receiver, StartSignal};

/// Message transform/predicate. `None` drops the message.
pub type Filter<M> = Arc<dyn Fn(M) -> Option<M> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    NotStarted,
    Running,
    Stopped,
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::NotStarted => "not started",
            Self::Running => "running",
            Self::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartMode {
    /// Run the receive loop on the calling task until it ends.
    Blocking,
    /// Spawn the receive loop; return once the receiver has begun.
    NonBlocking,
}

/// 内部フェーズ。Starting / Stopping は外からは前後の状態に見える
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    NotStarted,
    Starting,
    Running,
    Stopping,
    Stopped,
}

impl Phase {
    fn public(self) -> PipelineState {
        match self {
            Self::NotStarted | Self::Starting => PipelineState::NotStarted,
            Self::Running | Self::Stopping => PipelineState::Running,
            Self::Stopped => PipelineState::Stopped,
        }
    }
}

struct Lifecycle {
    phase: Phase,
    receive_task: Option<JoinHandle<Result<()>>>,
}

/// filters と consumer。Receiver には MessageHandler として渡す
struct PipelineCore<M> {
    filters: Vec<Filter<M>>,
    consumer: Option<Arc<dyn Consumer<M>>>,
}

impl<M: Send + 'static> PipelineCore<M> {
    async fn process(&self, message: M) -> Result<()> {
        let mut message = message;
        for (index, filter) in self.filters.iter().enumerate() {
            match filter(message) {
                Some(next) => message = next,
                None => {
                    debug!(filter = index, "message dropped by filter");
                    return Ok(());
                }
            }
        }
        match &self.consumer {
            Some(consumer) => consumer.consume(message).await,
            None => Err(CourierError::config("pipeline has no consumer")),
        }
    }
}

#[async_trait]
impl<M: Send + 'static> MessageHandler<M> for PipelineCore<M> {
    async fn handle(&self, message: M) -> Result<()> {
        self.process(message).await
    }
}

pub struct Pipeline<M: Send + 'static> {
    receiver: Option<Arc<dyn Receiver<M>>>,
    core: Arc<PipelineCore<M>>,
    lifecycle: Mutex<Lifecycle>,
    /// Blocking モードの受信ループが戻ったら true
    blocking_done: watch::Sender<bool>,
}

impl<M: Send + 'static> Pipeline<M> {
    pub fn builder() -> PipelineBuilder<M> {
        PipelineBuilder::new()
    }

    pub(crate) fn from_parts(
        receiver: Option<Arc<dyn Receiver<M>>>,
        filters: Vec<Filter<M>>,
        consumer: Option<Arc<dyn Consumer<M>>>,
    ) -> Self {
        Self {
            receiver,
            core: Arc::new(PipelineCore { filters, consumer }),
            lifecycle: Mutex::new(Lifecycle {
                phase: Phase::NotStarted,
                receive_task: None,
            }),
            blocking_done: watch::channel(false).0,
        }
    }

    pub fn state(&self) -> PipelineState {
        self.lifecycle().phase.public()
    }

    /// Thread `message` through the filters, then hand it to the consumer.
    pub async fn process_message(&self, message: M) -> Result<()> {
        self.core.process(message).await
    }

    pub async fn start(&self, mode: StartMode) -> Result<()> {
        let (receiver, consumer) = {
            let mut lifecycle = self.lifecycle();
            if lifecycle.phase != Phase::NotStarted {
                return Err(illegal("start", lifecycle.phase));
            }
            let (Some(receiver), Some(consumer)) = (&self.receiver, &self.core.consumer) else {
                return Err(CourierError::config(
                    "pipeline needs both a receiver and a consumer to start",
                ));
            };
            lifecycle.phase = Phase::Starting;
            (Arc::clone(receiver), Arc::clone(consumer))
        };

        if let Err(e) = consumer.start().await {
            error!(error = %e, "consumer failed to start");
            self.shutdown_after_failure(&receiver, &consumer).await;
            return Err(e);
        }

        let handler: Arc<dyn MessageHandler<M>> = self.core.clone();
        match mode {
            StartMode::Blocking => {
                self.set_phase(Phase::Running);
                info!(mode = ?mode, "pipeline running");
                let result = receiver.receive(handler, StartSignal::detached()).await;
                self.blocking_done.send_replace(true);
                self.finish_blocking(&receiver, &consumer, result).await
            }
            StartMode::NonBlocking => {
                let (signal, started) = StartSignal::new();
                let task_receiver = Arc::clone(&receiver);
                let join = tokio::spawn(async move { task_receiver.receive(handler, signal).await });

                if started.await.is_err() {
                    // receive が開始を通知せずに終わった
                    let err = match join.await {
                        Ok(Err(e)) => e,
                        Ok(Ok(())) => CourierError::Other(
                            "receiver exited before confirming start".to_string(),
                        ),
                        Err(e) => CourierError::Other(format!("receiver panicked: {e}")),
                    };
                    error!(error = %err, "receiver failed to start");
                    self.shutdown_after_failure(&receiver, &consumer).await;
                    return Err(err);
                }

                let mut lifecycle = self.lifecycle();
                lifecycle.receive_task = Some(join);
                lifecycle.phase = Phase::Running;
                info!(mode = ?mode, "pipeline running");
                Ok(())
            }
        }
    }

    pub async fn stop(&self) -> Result<()> {
        let join = {
            let mut lifecycle = self.lifecycle();
            if lifecycle.phase != Phase::Running {
                return Err(illegal("stop", lifecycle.phase));
            }
            lifecycle.phase = Phase::Stopping;
            lifecycle.receive_task.take()
        };
        info!("pipeline stopping");

        // 1. 新しい message の受け付けを止める
        let mut first_error = None;
        if let Some(receiver) = &self.receiver {
            if let Err(e) = receiver.stop().await {
                warn!(error = %e, "receiver stop failed");
                first_error.get_or_insert(e);
            }
        }

        // 2. 処理中の message が consumer を通り抜けるのを待つ
        match join {
            Some(join) => match join.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(error = %e, "receive loop ended with an error"),
                Err(e) => error!(error = %e, "receive loop task failed"),
            },
            None => {
                // blocking: 受信ループは start() を呼んだタスク上で回っている
                let mut done = self.blocking_done.subscribe();
                let _ = done.wait_for(|done| *done).await;
            }
        }

        // 3. consumer を止める
        if let Some(consumer) = &self.core.consumer {
            if let Err(e) = consumer.stop().await {
                warn!(error = %e, "consumer stop failed");
                first_error.get_or_insert(e);
            }
        }

        self.set_phase(Phase::Stopped);
        info!("pipeline stopped");
        first_error.map_or(Ok(()), Err)
    }

    /// Blocking receive loop returned. Unless `stop()` is already tearing
    /// the pipeline down, finish the shutdown here.
    async fn finish_blocking(
        &self,
        receiver: &Arc<dyn Receiver<M>>,
        consumer: &Arc<dyn Consumer<M>>,
        result: Result<()>,
    ) -> Result<()> {
        let stopping_elsewhere = {
            let mut lifecycle = self.lifecycle();
            let elsewhere = lifecycle.phase != Phase::Running;
            if !elsewhere {
                lifecycle.phase = Phase::Stopping;
            }
            elsewhere
        };
        if !stopping_elsewhere {
            if let Err(e) = &result {
                error!(error = %e, "receive loop failed");
            }
            self.shutdown_after_failure(receiver, consumer).await;
        }
        result
    }

    async fn shutdown_after_failure(
        &self,
        receiver: &Arc<dyn Receiver<M>>,
        consumer: &Arc<dyn Consumer<M>>,
    ) {
        if let Err(e) = receiver.stop().await {
            warn!(error = %e, "receiver stop failed during shutdown");
        }
        if let Err(e) = consumer.stop().await {
            warn!(error = %e, "consumer stop failed during shutdown");
        }
        self.set_phase(Phase::Stopped);
    }

    fn set_phase(&self, phase: Phase) {
        self.lifecycle().phase = phase;
    }

    fn lifecycle(&self) -> MutexGuard<'_, Lifecycle> {
        // 保持中に panic しうるコードは無いので poison は無視してよい
        self.lifecycle
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

fn illegal(operation: &'static str, phase: Phase) -> CourierError {
    CourierError::IllegalState {
        operation,
        state: phase.public().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::impls::ChannelReceiver;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Default)]
    struct Collect {
        items: tokio::sync::Mutex<Vec<u32>>,
        started: AtomicBool,
        stopped: AtomicBool,
    }

    #[async_trait]
    impl Consumer<u32> for Collect {
        async fn start(&self) -> Result<()> {
            self.started.store(true, Ordering::SeqCst);
            Ok(())
        }

        async fn consume(&self, message: u32) -> Result<()> {
            self.items.lock().await.push(message);
            Ok(())
        }

        async fn stop(&self) -> Result<()> {
            self.stopped.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    struct FailingReceiver;

    #[async_trait]
    impl Receiver<u32> for FailingReceiver {
        async fn receive(
            &self,
            _handler: Arc<dyn MessageHandler<u32>>,
            _started: StartSignal,
        ) -> Result<()> {
            Err(CourierError::unavailable("socket", "connection refused"))
        }

        async fn stop(&self) -> Result<()> {
            Ok(())
        }
    }

    struct RefusingConsumer;

    #[async_trait]
    impl Consumer<u32> for RefusingConsumer {
        async fn start(&self) -> Result<()> {
            Err(CourierError::unavailable("sink", "not reachable"))
        }

        async fn consume(&self, _message: u32) -> Result<()> {
            Ok(())
        }
    }

    /// Consumer whose `consume` takes a while; records whether `stop` ran
    /// while a message was still being consumed.
    #[derive(Default)]
    struct SlowConsumer {
        entered: tokio::sync::Notify,
        in_flight: AtomicBool,
        consumed: AtomicUsize,
        stopped_mid_message: AtomicBool,
        stopped: AtomicBool,
    }

    #[async_trait]
    impl Consumer<u32> for SlowConsumer {
        async fn consume(&self, _message: u32) -> Result<()> {
            self.in_flight.store(true, Ordering::SeqCst);
            self.entered.notify_one();
            tokio::time::sleep(Duration::from_millis(200)).await;
            self.consumed.fetch_add(1, Ordering::SeqCst);
            self.in_flight.store(false, Ordering::SeqCst);
            Ok(())
        }

        async fn stop(&self) -> Result<()> {
            if self.in_flight.load(Ordering::SeqCst) {
                self.stopped_mid_message.store(true, Ordering::SeqCst);
            }
            self.stopped.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    fn channel_pipeline(consumer: Arc<Collect>) -> (tokio::sync::mpsc::Sender<u32>, Pipeline<u32>) {
        let (tx, receiver) = ChannelReceiver::channel(16);
        let pipeline = Pipeline::<u32>::builder()
            .receiver(receiver)
            .consumer_arc(consumer)
            .build();
        (tx, pipeline)
    }

    async fn wait_for_items(consumer: &Collect, n: usize) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while consumer.items.lock().await.len() < n {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("messages were not consumed");
    }

    #[tokio::test]
    async fn test_zero_filters_deliver_unchanged() {
        let consumer = Arc::new(Collect::default());
        let pipeline = Pipeline::<u32>::builder().consumer_arc(consumer.clone()).build();

        pipeline.process_message(7).await.unwrap();
        assert_eq!(*consumer.items.lock().await, vec![7]);
    }

    #[tokio::test]
    async fn test_filters_apply_in_order() {
        let consumer = Arc::new(Collect::default());
        let pipeline = Pipeline::<u32>::builder()
            .filter(|n: u32| Some(n + 1))
            .filter(|n: u32| Some(n * 10))
            .consumer_arc(consumer.clone())
            .build();

        pipeline.process_message(1).await.unwrap();
        assert_eq!(*consumer.items.lock().await, vec![20]);
    }

    #[tokio::test]
    async fn test_filter_short_circuits() {
        let consumer = Arc::new(Collect::default());
        let later_calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&later_calls);
        let pipeline = Pipeline::<u32>::builder()
            .filter(|n: u32| (n % 2 == 0).then_some(n))
            .filter(move |n: u32| {
                counter.fetch_add(1, Ordering::SeqCst);
                Some(n)
            })
            .consumer_arc(consumer.clone())
            .build();

        pipeline.process_message(3).await.unwrap();
        pipeline.process_message(4).await.unwrap();

        assert_eq!(*consumer.items.lock().await, vec![4]);
        assert_eq!(later_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_lifecycle_transitions() {
        let consumer = Arc::new(Collect::default());
        let (_tx, pipeline) = channel_pipeline(consumer.clone());
        assert_eq!(pipeline.state(), PipelineState::NotStarted);

        let err = pipeline.stop().await.unwrap_err();
        assert!(matches!(err, CourierError::IllegalState { operation: "stop", .. }));

        pipeline.start(StartMode::NonBlocking).await.unwrap();
        assert_eq!(pipeline.state(), PipelineState::Running);
        assert!(consumer.started.load(Ordering::SeqCst));

        let err = pipeline.start(StartMode::NonBlocking).await.unwrap_err();
        assert!(matches!(err, CourierError::IllegalState { operation: "start", .. }));

        pipeline.stop().await.unwrap();
        assert_eq!(pipeline.state(), PipelineState::Stopped);
        assert!(consumer.stopped.load(Ordering::SeqCst));

        assert!(matches!(
            pipeline.stop().await.unwrap_err(),
            CourierError::IllegalState { .. }
        ));
        assert!(matches!(
            pipeline.start(StartMode::Blocking).await.unwrap_err(),
            CourierError::IllegalState { .. }
        ));
    }

    #[tokio::test]
    async fn test_missing_parts_leave_state_unchanged() {
        let consumer = Arc::new(Collect::default());
        let no_receiver = Pipeline::<u32>::builder().consumer_arc(consumer).build();
        let err = no_receiver.start(StartMode::NonBlocking).await.unwrap_err();
        assert!(matches!(err, CourierError::Configuration(_)));
        assert_eq!(no_receiver.state(), PipelineState::NotStarted);

        let (_tx, receiver) = ChannelReceiver::<u32>::channel(1);
        let no_consumer = Pipeline::<u32>::builder().receiver(receiver).build();
        let err = no_consumer.start(StartMode::Blocking).await.unwrap_err();
        assert!(matches!(err, CourierError::Configuration(_)));
        assert_eq!(no_consumer.state(), PipelineState::NotStarted);
    }

    #[tokio::test]
    async fn test_receiver_startup_failure_stops_pipeline() {
        let consumer = Arc::new(Collect::default());
        let pipeline = Pipeline::<u32>::builder()
            .receiver(FailingReceiver)
            .consumer_arc(consumer.clone())
            .build();

        let err = pipeline.start(StartMode::NonBlocking).await.unwrap_err();
        assert!(matches!(err, CourierError::BackendUnavailable { .. }));
        assert_eq!(pipeline.state(), PipelineState::Stopped);
        assert!(consumer.stopped.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_consumer_startup_failure_stops_pipeline() {
        let (_tx, receiver) = ChannelReceiver::<u32>::channel(1);
        let pipeline = Pipeline::<u32>::builder()
            .receiver(receiver)
            .consumer(RefusingConsumer)
            .build();

        let err = pipeline.start(StartMode::NonBlocking).await.unwrap_err();
        assert!(matches!(err, CourierError::BackendUnavailable { .. }));
        assert_eq!(pipeline.state(), PipelineState::Stopped);
    }

    #[tokio::test]
    async fn test_non_blocking_flow() {
        let consumer = Arc::new(Collect::default());
        let (tx, receiver) = ChannelReceiver::channel(16);
        let pipeline = Pipeline::<u32>::builder()
            .receiver(receiver)
            .filter(|n: u32| (n != 0).then_some(n))
            .consumer_arc(consumer.clone())
            .build();

        pipeline.start(StartMode::NonBlocking).await.unwrap();
        for n in [1, 0, 2, 3] {
            tx.send(n).await.unwrap();
        }
        wait_for_items(&consumer, 3).await;
        pipeline.stop().await.unwrap();

        assert_eq!(*consumer.items.lock().await, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_blocking_start_returns_after_stop() {
        let consumer = Arc::new(Collect::default());
        let (tx, pipeline) = channel_pipeline(consumer.clone());
        let pipeline = Arc::new(pipeline);

        let running = tokio::spawn({
            let pipeline = Arc::clone(&pipeline);
            async move { pipeline.start(StartMode::Blocking).await }
        });

        tx.send(5).await.unwrap();
        wait_for_items(&consumer, 1).await;
        assert_eq!(pipeline.state(), PipelineState::Running);

        pipeline.stop().await.unwrap();
        tokio::time::timeout(Duration::from_secs(1), running)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(pipeline.state(), PipelineState::Stopped);
    }

    #[tokio::test]
    async fn test_blocking_loop_ending_on_its_own_stops_pipeline() {
        let consumer = Arc::new(Collect::default());
        let (tx, pipeline) = channel_pipeline(consumer.clone());
        tx.send(1).await.unwrap();
        drop(tx);

        pipeline.start(StartMode::Blocking).await.unwrap();

        assert_eq!(pipeline.state(), PipelineState::Stopped);
        assert_eq!(*consumer.items.lock().await, vec![1]);
        assert!(consumer.stopped.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_non_blocking_stop_drains_in_flight_message() {
        let consumer = Arc::new(SlowConsumer::default());
        let (tx, receiver) = ChannelReceiver::channel(4);
        let pipeline = Pipeline::<u32>::builder()
            .receiver(receiver)
            .consumer_arc(consumer.clone())
            .build();

        pipeline.start(StartMode::NonBlocking).await.unwrap();
        tx.send(1).await.unwrap();
        consumer.entered.notified().await;
        pipeline.stop().await.unwrap();

        assert_eq!(consumer.consumed.load(Ordering::SeqCst), 1);
        assert!(consumer.stopped.load(Ordering::SeqCst));
        assert!(!consumer.stopped_mid_message.load(Ordering::SeqCst));
        assert_eq!(pipeline.state(), PipelineState::Stopped);
    }

    #[tokio::test]
    async fn test_blocking_stop_drains_in_flight_message() {
        let consumer = Arc::new(SlowConsumer::default());
        let (tx, receiver) = ChannelReceiver::channel(4);
        let pipeline = Arc::new(
            Pipeline::<u32>::builder()
                .receiver(receiver)
                .consumer_arc(consumer.clone())
                .build(),
        );

        let running = tokio::spawn({
            let pipeline = Arc::clone(&pipeline);
            async move { pipeline.start(StartMode::Blocking).await }
        });

        tx.send(1).await.unwrap();
        consumer.entered.notified().await;
        pipeline.stop().await.unwrap();

        assert_eq!(consumer.consumed.load(Ordering::SeqCst), 1);
        assert!(!consumer.stopped_mid_message.load(Ordering::SeqCst));
        assert_eq!(pipeline.state(), PipelineState::Stopped);
        tokio::time::timeout(Duration::from_secs(1), running)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }
}
