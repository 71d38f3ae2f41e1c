//! WorkerLoop - queue backend を poll して callback を呼ぶ消費ループ
//!
//! # フロー（1 サイクル）
//! 1. `poll()` で未 claim の message を取得（なければ sleep）
//! 2. すでに所有権マーカーが付いていればスキップ
//! 3. `claim()` に負けたらスキップ
//! 4. callback を実行（ack は callback 自身が `Delivery::ack` で行う）
//! 5. callback が失敗・panic したら `release()` して再試行可能にする
//! 6. poll 間隔だけ sleep して繰り返す
//!
//! backend のエラーもサイクル単位の一時的な失敗として扱い、ループは止めない。
//! 止まるのは `stop()`（または handle の drop）のときだけ。

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::config::WorkerConfig;
use crate::domain::{ConsumerId, Message, Result, Task};
use crate::ports::{IdGenerator, QueueBackend, SystemClock, UlidGenerator};

/// A claimed message handed to a callback, with the means to ack it.
#[derive(Clone)]
pub struct Delivery {
    message: Message,
    backend: Arc<dyn QueueBackend>,
}

impl Delivery {
    pub fn message(&self) -> &Message {
        &self.message
    }

    pub fn task(&self) -> &Task {
        self.message.task()
    }

    /// Remove the message from the backend. Call once the work is committed.
    pub async fn ack(&self) -> Result<()> {
        self.backend.ack(&self.message).await
    }
}

/// Callback invoked once per claimed message.
///
/// `Ok` means the callback has taken care of acking; `Err` makes the loop
/// release the claim so the message is retried.
#[async_trait]
pub trait Callback: Send + Sync {
    async fn call(&self, delivery: Delivery) -> Result<()>;
}

#[async_trait]
impl<F, Fut> Callback for F
where
    F: Fn(Delivery) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    async fn call(&self, delivery: Delivery) -> Result<()> {
        (self)(delivery).await
    }
}

/// What a single polling cycle did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Nothing to do.
    Idle,
    /// Message was already owned, or the claim was lost.
    Skipped,
    /// Callback returned `Ok`.
    Processed,
    /// Callback failed or panicked; the claim was released.
    Failed,
    /// The backend could not be reached this cycle.
    BackendError,
}

/// WorkerLoop は 1 つの consumer identity で backend を消費する
pub struct WorkerLoop {
    consumer_id: ConsumerId,
    backend: Arc<dyn QueueBackend>,
    callback: Arc<dyn Callback>,
    poll_interval: Duration,
}

impl WorkerLoop {
    /// Fails with `Configuration` when `config` does not validate
    /// (e.g. a zero poll interval).
    pub fn new(
        backend: Arc<dyn QueueBackend>,
        callback: Arc<dyn Callback>,
        config: &WorkerConfig,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            consumer_id: UlidGenerator::new(SystemClock).generate_consumer_id(),
            backend,
            callback,
            poll_interval: config.poll_interval(),
        })
    }

    pub fn with_consumer_id(mut self, consumer_id: ConsumerId) -> Self {
        self.consumer_id = consumer_id;
        self
    }

    pub fn consumer_id(&self) -> ConsumerId {
        self.consumer_id
    }

    /// Start the loop on its own task.
    pub fn spawn(self) -> WorkerHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let consumer_id = self.consumer_id;
        let span = info_span!("worker", consumer_id = %consumer_id);
        let join = tokio::spawn(self.run(shutdown_rx).instrument(span));

        WorkerHandle {
            consumer_id,
            shutdown_tx,
            join,
        }
    }

    async fn run(self, mut shutdown_rx: watch::Receiver<bool>) {
        info!(backend = self.backend.name(), "worker started");
        loop {
            if *shutdown_rx.borrow_and_update() {
                break;
            }

            self.run_once().await;

            // sleep は shutdown と競合させる（callback の実行中は割り込まない）
            tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() {
                        // handle が drop された
                        break;
                    }
                }
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }
        info!("worker stopped");
    }

    /// Run one poll → claim → callback cycle.
    pub async fn run_once(&self) -> CycleOutcome {
        let mut message = match self.backend.poll().await {
            Ok(Some(message)) => message,
            Ok(None) => return CycleOutcome::Idle,
            Err(e) => {
                warn!(error = %e, "poll failed");
                return CycleOutcome::BackendError;
            }
        };
        let task_id = message.task().task_id().clone();

        if let Some(owner) = message.claimed_by() {
            debug!(task_id = %task_id, owner = %owner, "message already owned, skipping");
            return CycleOutcome::Skipped;
        }

        match self.backend.claim(&mut message, self.consumer_id).await {
            Ok(true) => {}
            Ok(false) => {
                debug!(task_id = %task_id, "lost claim race");
                return CycleOutcome::Skipped;
            }
            Err(e) => {
                warn!(task_id = %task_id, error = %e, "claim failed");
                return CycleOutcome::BackendError;
            }
        }

        let delivery = Delivery {
            message: message.clone(),
            backend: Arc::clone(&self.backend),
        };
        let callback = Arc::clone(&self.callback);
        // 別タスクで実行して panic も JoinError として受け止める
        let result = tokio::spawn(async move { callback.call(delivery).await }).await;

        let failure = match result {
            Ok(Ok(())) => {
                debug!(task_id = %task_id, "message processed");
                return CycleOutcome::Processed;
            }
            Ok(Err(e)) => e.to_string(),
            Err(join_error) => format!("callback panicked: {join_error}"),
        };

        error!(task_id = %task_id, error = %failure, "callback failed, releasing claim");
        if let Err(e) = self.backend.release(&mut message).await {
            error!(task_id = %task_id, error = %e, "release failed");
        }
        CycleOutcome::Failed
    }
}

/// Handle of a running worker loop.
///
/// Dropping the handle also stops the loop (after the current cycle).
pub struct WorkerHandle {
    consumer_id: ConsumerId,
    shutdown_tx: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl WorkerHandle {
    pub fn consumer_id(&self) -> ConsumerId {
        self.consumer_id
    }

    /// Ask the loop to stop without waiting for it.
    pub fn request_stop(&self) {
        self.shutdown_tx.send_replace(true);
    }

    /// Stop the loop: an in-flight sleep is cut short, an in-flight callback
    /// runs to completion, and no new cycle starts.
    pub async fn stop(self) {
        self.request_stop();
        if let Err(e) = self.join.await {
            error!(consumer_id = %self.consumer_id, error = %e, "worker task ended abnormally");
        }
    }
}

/// Worker group handle.
/// - 同じ backend に対して N 本の WorkerLoop を回す（正しさは claim の原子性に依存）
/// - `shutdown_and_join()` で全ワーカーの終了を待てる
pub struct WorkerGroup {
    workers: Vec<WorkerHandle>,
}

impl WorkerGroup {
    /// Spawn `config.concurrency` workers.
    pub fn spawn(
        backend: Arc<dyn QueueBackend>,
        callback: Arc<dyn Callback>,
        config: &WorkerConfig,
    ) -> Result<Self> {
        config.validate()?;
        let workers = (0..config.concurrency)
            .map(|_| {
                WorkerLoop::new(Arc::clone(&backend), Arc::clone(&callback), config)
                    .map(WorkerLoop::spawn)
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { workers })
    }

    pub fn consumer_ids(&self) -> Vec<ConsumerId> {
        self.workers.iter().map(WorkerHandle::consumer_id).collect()
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    pub fn request_shutdown(&self) {
        for worker in &self.workers {
            worker.request_stop();
        }
    }

    pub async fn shutdown_and_join(self) {
        self.request_shutdown();
        for worker in self.workers {
            worker.stop().await;
        }
    }
}
