//! WorkerPool - 固定数のワーカーで claim -> process を回す
//!
//! - claim はストアで原子的。同じ task を 2 つのワーカーが同時に処理することはない
//! - 1 タスクの結果を保存してから次を claim する
//! - shutdown は新しい claim を止めるだけ。処理中のタスクは最後まで走る
//! - reaper が `reap_interval` ごとに期限切れの claim を回収する（ワーカーが落ちても task が残らない）

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::processor::Processor;
use crate::domain::WorkerId;

/// Worker group handle.
/// - `request_shutdown` で全ワーカーが次の claim 前に止まる
/// - `shutdown_and_join` で全ワーカーの終了を待てる
pub struct WorkerPool {
    shutdown_tx: watch::Sender<bool>,
    joins: Vec<JoinHandle<()>>,
    reaper: JoinHandle<()>,
}

impl WorkerPool {
    /// Spawn `n` workers and the lease reaper.
    pub fn spawn(
        n: usize,
        processor: Arc<Processor>,
        idle_poll: Duration,
        reap_interval: Duration,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let joins = (0..n)
            .map(|i| {
                let processor = Arc::clone(&processor);
                let rx = shutdown_rx.clone();
                tokio::spawn(worker_loop(WorkerId(i), processor, idle_poll, rx))
            })
            .collect();
        let reaper = tokio::spawn(reaper_loop(processor, reap_interval, shutdown_rx));
        info!(workers = n, "worker pool started");

        Self {
            shutdown_tx,
            joins,
            reaper,
        }
    }

    pub fn size(&self) -> usize {
        self.joins.len()
    }

    pub fn request_shutdown(&self) {
        // ignore send error: receivers may already be dropped
        let _ = self.shutdown_tx.send(true);
    }

    /// Shutdown and wait for all workers.
    pub async fn shutdown_and_join(self) {
        self.request_shutdown();
        for j in self.joins {
            let _ = j.await;
        }
        let _ = self.reaper.await;
        info!("worker pool stopped");
    }
}

async fn worker_loop(
    worker: WorkerId,
    processor: Arc<Processor>,
    idle_poll: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        let idle = match processor.claim(worker).await {
            Ok(Some(task)) => match processor.process(worker, task).await {
                Ok(state) => {
                    debug!(%worker, ?state, "task processed");
                    false
                }
                Err(e) => {
                    error!(%worker, error = %e, "task store error while processing");
                    true
                }
            },
            Ok(None) => true,
            Err(e) => {
                error!(%worker, error = %e, "claim failed");
                true
            }
        };

        if idle {
            tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = tokio::time::sleep(idle_poll) => {}
            }
        }
    }
    debug!(%worker, "worker stopped");
}

async fn reaper_loop(
    processor: Arc<Processor>,
    interval: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        if *shutdown_rx.borrow() {
            break;
        }
        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            _ = tokio::time::sleep(interval) => {
                match processor.reap().await {
                    Ok(0) => {}
                    Ok(n) => warn!(reclaimed = n, "expired claims taken back"),
                    Err(e) => error!(error = %e, "reaper pass failed"),
                }
            }
        }
    }
    debug!("reaper stopped");
}
