//! ChannelReceiver - tokio mpsc をそのまま Pipeline の入口にする Receiver

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, mpsc, watch};
use tracing::{debug, warn};

use crate::domain::{CourierError, Result};
use crate::ports::{MessageHandler, Receiver, StartSignal};

/// ChannelReceiver は mpsc チャネルから message を受け取る
///
/// # 停止条件
/// - `stop()` が呼ばれた
/// - 送信側がすべて drop された
///
/// 受信ループは 1 回しか回せない（mpsc::Receiver を取り出して使うため）。
pub struct ChannelReceiver<M> {
    rx: Mutex<Option<mpsc::Receiver<M>>>,
    shutdown: watch::Sender<bool>,
}

impl<M: Send + 'static> ChannelReceiver<M> {
    /// Channel with the given buffer size; returns the sending half too.
    pub fn channel(buffer: usize) -> (mpsc::Sender<M>, Self) {
        let (tx, rx) = mpsc::channel(buffer);
        (tx, Self::from_receiver(rx))
    }

    pub fn from_receiver(rx: mpsc::Receiver<M>) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            rx: Mutex::new(Some(rx)),
            shutdown,
        }
    }
}

#[async_trait]
impl<M: Send + 'static> Receiver<M> for ChannelReceiver<M> {
    async fn receive(
        &self,
        handler: Arc<dyn MessageHandler<M>>,
        mut started: StartSignal,
    ) -> Result<()> {
        let mut rx = self
            .rx
            .lock()
            .await
            .take()
            .ok_or_else(|| CourierError::IllegalState {
                operation: "receive",
                state: "already receiving".to_string(),
            })?;
        let mut shutdown = self.shutdown.subscribe();
        started.notify();

        loop {
            if *shutdown.borrow_and_update() {
                break;
            }
            tokio::select! {
                _ = shutdown.changed() => continue,
                message = rx.recv() => {
                    let Some(message) = message else {
                        debug!("all senders dropped, receive loop ends");
                        break;
                    };
                    if let Err(e) = handler.handle(message).await {
                        warn!(error = %e, "message handler failed");
                    }
                }
            }
        }
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        // send_replace also records the flag when no loop has subscribed yet
        self.shutdown.send_replace(true);
        Ok(())
    }
}
