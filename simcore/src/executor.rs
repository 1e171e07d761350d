// Copyright (c) Simcore Contributors
// SPDX-License-Identifier: Apache-2.0

//! The Executor Pool (§4.3, §5): one dedicated OS thread per basis writer
//! (and one more for the management executor), each driving its own
//! single-threaded Tokio runtime so kernel calls can stay `async` without
//! needing fine-grained locking in the kernel. Mirrors the
//! `spawn_named_runtime` + `runtime.spawn(...)` idiom for giving a
//! component its own scheduling domain.
//!
//! A bounded reader pool handles read-only operations; it rejects work past
//! its queue capacity rather than letting callbacks dangle (§9 flags the
//! source's silent-drop rejection handler as a bug to not repeat).

use std::future::Future;
use std::sync::Arc;
use std::thread::JoinHandle;

use futures::future::BoxFuture;
use simcore_config::ReaderPoolConfig;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot, Semaphore};

use crate::error::EngineError;
use crate::metrics::Metrics;

type Job = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>;

/// A single-threaded worker with its own dedicated runtime, processing jobs
/// strictly in submission order. Used both for the one management executor
/// and for each basis's writer executor.
///
/// The worker thread keeps one `block_on` call alive for its whole lifetime,
/// looping over a tokio `mpsc` channel rather than calling `block_on` once
/// per job. This is what lets `handle()` be used to spawn a second,
/// long-running task (the basis's Listener Bridge, §4.1) onto the same
/// runtime: a `block_on` that is only ever invoked per-job would leave that
/// task unpolled between jobs, since nothing would be driving the runtime's
/// scheduler while the thread blocks synchronously waiting on the next job.
///
/// `shutdown` takes `&self` rather than consuming the executor: callers
/// typically reach it through an `Arc<BasisRuntime>` shared with in-flight
/// jobs, so taking it out of the struct happens behind a lock rather than
/// by unwrapping the `Arc`.
pub struct WriterExecutor {
    sender: parking_lot::Mutex<Option<mpsc::UnboundedSender<Job>>>,
    thread: parking_lot::Mutex<Option<JoinHandle<()>>>,
    handle: Handle,
}

impl WriterExecutor {
    pub fn spawn(name: impl Into<String>) -> Self {
        let (sender, mut receiver) = mpsc::unbounded_channel::<Job>();
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .expect("failed to build writer executor runtime");
        let handle = runtime.handle().clone();
        let thread_name = name.into();
        let thread = std::thread::Builder::new()
            .name(thread_name.clone())
            .spawn(move || {
                runtime.block_on(async move {
                    while let Some(job) = receiver.recv().await {
                        job().await;
                    }
                });
                tracing::debug!(executor = %thread_name, "writer executor drained and exiting");
            })
            .expect("failed to spawn writer executor thread");
        Self {
            sender: parking_lot::Mutex::new(Some(sender)),
            thread: parking_lot::Mutex::new(Some(thread)),
            handle,
        }
    }

    /// A handle onto this executor's dedicated runtime, for spawning a task
    /// that should live alongside submitted jobs (the Listener Bridge) rather
    /// than run as one of them — a perpetual task submitted via `submit`
    /// would occupy the queue forever and starve every later write.
    pub fn handle(&self) -> Handle {
        self.handle.clone()
    }

    /// Enqueues a job and returns immediately; the dispatcher never blocks
    /// on I/O (§5). Submission order across calls on the same executor is
    /// preserved by the underlying channel and by running one job to
    /// completion before starting the next.
    pub fn submit<F, Fut>(&self, job: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let boxed: Job = Box::new(move || Box::pin(job()));
        if let Some(sender) = self.sender.lock().as_ref() {
            // A send failure means the worker thread already exited (it
            // would only do so after the channel closed or it panicked);
            // either way there is nothing left to serialize against, so the
            // job is simply dropped rather than panicking the caller.
            let _ = sender.send(boxed);
        }
    }

    /// Submits `job` and awaits its result through a oneshot reply, so the
    /// caller observes completion (e.g. to know when a snapshot save has
    /// actually finished) without the executor itself blocking on anything.
    pub async fn run<F, Fut, T>(&self, job: F) -> Option<T>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        self.submit(move || async move {
            let _ = tx.send(job().await);
        });
        rx.await.ok()
    }

    /// Closes the queue and waits for the worker to drain it, then joins the
    /// thread. Used when tearing down a basis (cascading `del`) so the
    /// executor is fully gone before the basis's catalog entries disappear.
    pub async fn shutdown(&self) {
        self.sender.lock().take();
        let thread = self.thread.lock().take();
        if let Some(thread) = thread {
            let _ = tokio::task::spawn_blocking(move || thread.join()).await;
        }
    }
}

/// A bounded pool serving read-only operations (`vget`, `vids`, `iget`,
/// `rget`, `rrec`, `bget`). `queue_capacity` bounds the number of requests
/// outstanding (running or waiting); `max_workers` bounds how many run
/// concurrently. Both come from `ReaderPoolConfig`, which fixes
/// `max_workers` within `[53, 83]` per §5.
pub struct ReaderPool {
    queue_slots: Arc<Semaphore>,
    worker_slots: Arc<Semaphore>,
    metrics: Arc<Metrics>,
}

impl ReaderPool {
    pub fn new(config: ReaderPoolConfig, metrics: Arc<Metrics>) -> Self {
        Self {
            queue_slots: Arc::new(Semaphore::new(config.queue_capacity)),
            worker_slots: Arc::new(Semaphore::new(config.max_workers)),
            metrics,
        }
    }

    /// Runs `job` on the pool, or rejects it immediately if the queue is
    /// already at capacity. Unlike the source's rejection handler (§9), this
    /// always produces a reply, never a dangling callback.
    pub async fn submit<F, Fut, T>(&self, job: F) -> Result<T, EngineError>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let queue_permit = match self.queue_slots.clone().try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                self.metrics.record_rejected();
                return Err(EngineError::Rejected);
            },
        };
        let worker_slots = self.worker_slots.clone();
        let handle = tokio::spawn(async move {
            let _worker_permit = worker_slots
                .acquire_owned()
                .await
                .expect("reader pool semaphore should never be closed");
            let result = job().await;
            drop(queue_permit);
            result
        });
        handle
            .await
            .map_err(|join_error| EngineError::Internal(format!("reader task failed: {join_error}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn writer_executor_runs_jobs_in_submission_order() {
        let executor = WriterExecutor::spawn("test-writer");
        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));
        for i in 0..20 {
            let order = order.clone();
            executor.submit(move || async move {
                order.lock().push(i);
            });
        }
        executor.shutdown().await;
        assert_eq!(order.lock().clone(), (0..20).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn reader_pool_rejects_past_queue_capacity() {
        let metrics = Arc::new(Metrics::new());
        let pool = ReaderPool::new(
            ReaderPoolConfig {
                min_workers: 1,
                max_workers: 1,
                queue_capacity: 1,
            },
            metrics,
        );
        // Occupy the one queue slot with a slow job.
        let blocker = {
            let pool = &pool;
            pool.submit(|| async {
                tokio::time::sleep(Duration::from_millis(200)).await;
            })
        };
        tokio::pin!(blocker);
        // Give the spawned task a moment to acquire the queue permit.
        tokio::time::sleep(Duration::from_millis(20)).await;
        let rejected = pool.submit(|| async { 1u64 }).await;
        assert!(matches!(rejected, Err(EngineError::Rejected)));
        blocker.await.unwrap();

        let counter = Arc::new(AtomicU64::new(0));
        let counter2 = counter.clone();
        let accepted = pool
            .submit(move || async move {
                counter2.fetch_add(1, Ordering::SeqCst);
                42u64
            })
            .await
            .unwrap();
        assert_eq!(accepted, 42);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
