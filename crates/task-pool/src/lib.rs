//! Bounded worker pool draining a shared FIFO task queue.
//!
//! A fixed set of workers pulls boxed futures off a single queue, so tasks
//! are dequeued in submission order but run in parallel; observable
//! completion order is arbitrary. Each submission yields a [`TaskHandle`]
//! the caller can await for the task outcome. A task that fails or panics
//! is logged and the worker continues.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

/// Workers spawned when the caller does not supply a count.
const MIN_WORKERS: usize = 4;

/// Outcome of a pooled task, observed through its [`TaskHandle`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TaskError {
    #[error("task failed: {0}")]
    Failed(String),

    #[error("task panicked")]
    Panicked,

    #[error("pool shut down before the task ran")]
    Shutdown,
}

struct Job {
    fut: BoxFuture<'static, Result<(), String>>,
    done: oneshot::Sender<Result<(), TaskError>>,
}

/// Completion handle returned by [`TaskPool::submit`].
pub struct TaskHandle {
    rx: oneshot::Receiver<Result<(), TaskError>>,
}

impl TaskHandle {
    /// Waits for the task to finish and returns its outcome.
    pub async fn wait(self) -> Result<(), TaskError> {
        self.rx.await.unwrap_or(Err(TaskError::Shutdown))
    }
}

/// Fixed-size pool of parallel workers over one FIFO queue.
pub struct TaskPool {
    tx: mpsc::UnboundedSender<Job>,
    queue: Arc<Mutex<mpsc::UnboundedReceiver<Job>>>,
    queued: Arc<AtomicUsize>,
    workers: std::sync::Mutex<Vec<JoinHandle<()>>>,
    worker_count: usize,
    cancel: CancellationToken,
}

impl TaskPool {
    /// Creates a pool with `count` workers. Zero means the CPU parallelism;
    /// either way at least [`MIN_WORKERS`] workers are spawned.
    pub fn new(count: usize) -> Self {
        let count = if count == 0 {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(MIN_WORKERS)
        } else {
            count
        }
        .max(MIN_WORKERS);

        let (tx, rx) = mpsc::unbounded_channel::<Job>();
        let queue = Arc::new(Mutex::new(rx));
        let queued = Arc::new(AtomicUsize::new(0));
        let cancel = CancellationToken::new();

        let mut workers = Vec::with_capacity(count);
        for idx in 0..count {
            workers.push(tokio::spawn(worker_loop(
                idx,
                queue.clone(),
                queued.clone(),
                cancel.clone(),
            )));
        }

        Self {
            tx,
            queue,
            queued,
            workers: std::sync::Mutex::new(workers),
            worker_count: count,
            cancel,
        }
    }

    /// Enqueues a task and returns its completion handle.
    ///
    /// After shutdown the handle resolves to [`TaskError::Shutdown`]
    /// without the task running.
    pub fn submit<F>(&self, fut: F) -> TaskHandle
    where
        F: Future<Output = Result<(), String>> + Send + 'static,
    {
        let (done_tx, done_rx) = oneshot::channel();
        let job = Job {
            fut: fut.boxed(),
            done: done_tx,
        };
        if self.cancel.is_cancelled() || self.tx.send(job).is_err() {
            // Dropping the job's `done` sender resolves the handle.
            return TaskHandle { rx: done_rx };
        }
        self.queued.fetch_add(1, Ordering::Relaxed);
        TaskHandle { rx: done_rx }
    }

    /// Tasks queued but not yet picked up by a worker.
    pub fn queue_depth(&self) -> usize {
        self.queued.load(Ordering::Relaxed)
    }

    /// Number of workers in the pool.
    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    /// Stops the pool: in-flight tasks finish, queued tasks are dropped
    /// unexecuted (their handles resolve to [`TaskError::Shutdown`]), and
    /// all workers are joined.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let handles: Vec<_> = self.workers.lock().unwrap().drain(..).collect();
        for handle in handles {
            let _ = handle.await;
        }
        // Drain whatever the workers never reached.
        let mut rx = self.queue.lock().await;
        while let Ok(_job) = rx.try_recv() {
            self.queued.fetch_sub(1, Ordering::Relaxed);
        }
    }
}

async fn worker_loop(
    idx: usize,
    queue: Arc<Mutex<mpsc::UnboundedReceiver<Job>>>,
    queued: Arc<AtomicUsize>,
    cancel: CancellationToken,
) {
    loop {
        if cancel.is_cancelled() {
            break;
        }
        let job = tokio::select! {
            _ = cancel.cancelled() => break,
            job = async { queue.lock().await.recv().await } => match job {
                Some(job) => job,
                None => break,
            },
        };
        queued.fetch_sub(1, Ordering::Relaxed);

        let outcome = match std::panic::AssertUnwindSafe(job.fut).catch_unwind().await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                warn!(worker = idx, error = %e, "task failed");
                Err(TaskError::Failed(e))
            }
            Err(_) => {
                error!(worker = idx, "task panicked");
                Err(TaskError::Panicked)
            }
        };
        let _ = job.done.send(outcome);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn all_tasks_run_to_completion() {
        let pool = TaskPool::new(4);
        let counter = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..20 {
            let c = counter.clone();
            handles.push(pool.submit(async move {
                c.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }));
        }
        for h in handles {
            h.wait().await.unwrap();
        }
        assert_eq!(counter.load(Ordering::SeqCst), 20);
        pool.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn failed_task_surfaces_and_pool_survives() {
        let pool = TaskPool::new(4);

        let failed = pool.submit(async { Err("disk on fire".to_string()) });
        assert_eq!(
            failed.wait().await,
            Err(TaskError::Failed("disk on fire".into()))
        );

        // The worker that ran the failing task keeps serving.
        let ok = pool.submit(async { Ok(()) });
        ok.wait().await.unwrap();
        pool.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn panicking_task_is_contained() {
        let pool = TaskPool::new(4);

        let bad = pool.submit(async { panic!("boom") });
        assert_eq!(bad.wait().await, Err(TaskError::Panicked));

        let ok = pool.submit(async { Ok(()) });
        ok.wait().await.unwrap();
        pool.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn shutdown_drops_queued_tasks() {
        let pool = Arc::new(TaskPool::new(4));

        // Occupy every worker so later submissions stay queued.
        let gate = Arc::new(tokio::sync::Notify::new());
        let mut busy = Vec::new();
        for _ in 0..pool.worker_count() {
            let g = gate.clone();
            busy.push(pool.submit(async move {
                g.notified().await;
                Ok(())
            }));
        }
        tokio::time::sleep(Duration::from_millis(50)).await;

        let ran = Arc::new(AtomicUsize::new(0));
        let r = ran.clone();
        let queued = pool.submit(async move {
            r.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        assert!(pool.queue_depth() >= 1);

        // Shutdown sets the stop flag first, then joins; release the busy
        // workers once the flag is guaranteed set.
        let p = pool.clone();
        let shutdown = tokio::spawn(async move { p.shutdown().await });
        tokio::time::sleep(Duration::from_millis(50)).await;
        gate.notify_waiters();
        shutdown.await.unwrap();

        for h in busy {
            h.wait().await.unwrap();
        }
        assert_eq!(queued.wait().await, Err(TaskError::Shutdown));
        assert_eq!(ran.load(Ordering::SeqCst), 0);
        assert_eq!(pool.queue_depth(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn submit_after_shutdown_resolves_shutdown() {
        let pool = TaskPool::new(4);
        pool.shutdown().await;
        let handle = pool.submit(async { Ok(()) });
        assert_eq!(handle.wait().await, Err(TaskError::Shutdown));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn worker_count_floor() {
        let pool = TaskPool::new(1);
        assert_eq!(pool.worker_count(), 4);
        pool.shutdown().await;
    }
}
