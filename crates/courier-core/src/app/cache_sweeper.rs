//! CacheSweeper - 期限切れ cache entry の定期削除
//!
//! get_task は期限切れを lazy に消すが、読まれない entry は残り続ける。
//! CacheSweeper は一定間隔で `purge_expired()` を呼んで掃除する。

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::ports::ResultCache;

pub struct CacheSweeper {
    cache: Arc<dyn ResultCache>,
    interval: Duration,
}

impl CacheSweeper {
    pub fn new(cache: Arc<dyn ResultCache>, interval: Duration) -> Self {
        Self { cache, interval }
    }

    pub fn spawn(self) -> SweeperHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let span = info_span!("cache_sweeper", cache = self.cache.name());
        let join = tokio::spawn(self.run(shutdown_rx).instrument(span));
        SweeperHandle { shutdown_tx, join }
    }

    async fn run(self, mut shutdown_rx: watch::Receiver<bool>) {
        info!(interval_ms = self.interval.as_millis() as u64, "cache sweeper started");
        loop {
            tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                }
                _ = tokio::time::sleep(self.interval) => {
                    match self.cache.purge_expired().await {
                        Ok(0) => {}
                        Ok(purged) => debug!(purged, "expired entries purged"),
                        Err(e) => warn!(error = %e, "purge failed"),
                    }
                }
            }
        }
        info!("cache sweeper stopped");
    }
}

pub struct SweeperHandle {
    shutdown_tx: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl SweeperHandle {
    pub async fn stop(self) {
        self.shutdown_tx.send_replace(true);
        if let Err(e) = self.join.await {
            error!(error = %e, "cache sweeper task ended abnormally");
        }
    }
}
