// Copyright (c) Simcore Contributors
// SPDX-License-Identifier: Apache-2.0

//! The periodic snapshot scheduler (§4.5). Ticks on a fixed interval and
//! calls back into the lifecycle manager's `save_all`, which itself skips
//! any basis still mid-save from the previous tick rather than queuing a
//! second one behind it. Structurally this follows `JWKObserver`: a
//! `tokio::select!` loop between an `Interval` and a `oneshot` close
//! signal, torn down with an explicit `shutdown()`.

use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::metrics::Metrics;

/// Periodically invokes an async callback (`save_all`) until shut down.
pub struct SnapshotCron {
    close_tx: oneshot::Sender<()>,
    join_handle: JoinHandle<()>,
}

impl SnapshotCron {
    pub fn spawn<F>(interval: Duration, metrics: std::sync::Arc<Metrics>, save_all: F) -> Self
    where
        F: Fn() -> BoxFuture<'static, ()> + Send + Sync + 'static,
    {
        let (close_tx, close_rx) = oneshot::channel();
        let join_handle = tokio::spawn(Self::run(interval, metrics, save_all, close_rx));
        tracing::info!(?interval, "snapshot cron spawned");
        Self {
            close_tx,
            join_handle,
        }
    }

    async fn run<F>(
        interval: Duration,
        metrics: std::sync::Arc<Metrics>,
        save_all: F,
        close_rx: oneshot::Receiver<()>,
    ) where
        F: Fn() -> BoxFuture<'static, ()> + Send + Sync + 'static,
    {
        // §4.5: the first fire happens after an initial delay of `interval`,
        // not immediately — `tokio::time::interval`'s first tick completes
        // right away, so the start instant is pushed out by one period.
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut close_rx = close_rx.into_stream();
        use futures::StreamExt;
        loop {
            tokio::select! {
                _ = ticker.tick().fuse() => {
                    metrics.record_cron_run();
                    save_all().await;
                },
                _ = close_rx.select_next_some() => {
                    break;
                }
            }
        }
    }

    pub async fn shutdown(self) {
        let Self {
            close_tx,
            join_handle,
        } = self;
        let _ = close_tx.send(());
        let _ = join_handle.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn ticks_invoke_the_callback_until_shutdown() {
        let count = Arc::new(AtomicU64::new(0));
        let metrics = Arc::new(Metrics::new());
        let cron = {
            let count = count.clone();
            SnapshotCron::spawn(Duration::from_millis(10), metrics.clone(), move || {
                let count = count.clone();
                async move {
                    count.fetch_add(1, Ordering::SeqCst);
                }
                .boxed()
            })
        };
        tokio::time::sleep(Duration::from_millis(55)).await;
        cron.shutdown().await;
        assert!(count.load(Ordering::SeqCst) >= 2);
        assert!(metrics.snapshot().cron_runs >= 2);
    }
}
