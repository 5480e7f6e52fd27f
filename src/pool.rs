use crate::errors::{AppError, Result};
use futures::future::BoxFuture;
use log::debug;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Notify};

/// Bounded-concurrency executor for fetch and download jobs.
///
/// Jobs are started in FIFO submission order, at most `max_concurrency` at a
/// time. The queue is unbounded and submission never blocks. There is no
/// priority and no cancellation: a submitted job always runs to completion.
#[derive(Clone)]
pub struct WorkerPool {
    queue: mpsc::UnboundedSender<BoxFuture<'static, ()>>,
    shared: Arc<Shared>,
}

struct Shared {
    limit: AtomicUsize,
    active: AtomicUsize,
    slot_freed: Notify,
}

impl WorkerPool {
    /// Creates a pool running at most `max_concurrency` jobs at once.
    /// A value of 0 is clamped to 1.
    pub fn new(max_concurrency: usize) -> Self {
        let (queue, mut jobs) = mpsc::unbounded_channel::<BoxFuture<'static, ()>>();
        let shared = Arc::new(Shared {
            limit: AtomicUsize::new(max_concurrency.max(1)),
            active: AtomicUsize::new(0),
            slot_freed: Notify::new(),
        });

        // Single dispatcher task: admits queued jobs in FIFO order whenever
        // a slot is free. Only the dispatcher increments `active`.
        let dispatcher = Arc::clone(&shared);
        tokio::spawn(async move {
            while let Some(job) = jobs.recv().await {
                dispatcher.acquire_slot().await;
                let shared = Arc::clone(&dispatcher);
                tokio::spawn(async move {
                    job.await;
                    shared.active.fetch_sub(1, Ordering::SeqCst);
                    shared.slot_freed.notify_one();
                });
            }
            debug!("Worker pool queue closed, dispatcher exiting");
        });

        Self { queue, shared }
    }

    /// Enqueues a job. Never blocks; the job starts once it reaches the
    /// front of the queue and a slot is free.
    pub fn submit<F>(&self, job: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        // The receiver only closes when every pool handle is dropped, so a
        // failed send can only happen during shutdown.
        let _ = self.queue.send(Box::pin(job));
    }

    /// Changes the concurrency limit for subsequently started jobs. Jobs
    /// already running are unaffected. Zero is rejected and the previous
    /// limit is retained.
    pub fn set_max_concurrency(&self, max_concurrency: usize) -> Result<()> {
        if max_concurrency == 0 {
            return Err(AppError::Validation(
                "Worker pool concurrency must be at least 1".to_string(),
            ));
        }
        self.shared.limit.store(max_concurrency, Ordering::SeqCst);
        self.shared.slot_freed.notify_one();
        Ok(())
    }

    pub fn max_concurrency(&self) -> usize {
        self.shared.limit.load(Ordering::SeqCst)
    }
}

impl Shared {
    async fn acquire_slot(&self) {
        loop {
            let freed = self.slot_freed.notified();
            if self.active.load(Ordering::SeqCst) < self.limit.load(Ordering::SeqCst) {
                self.active.fetch_add(1, Ordering::SeqCst);
                return;
            }
            freed.await;
        }
    }
}
