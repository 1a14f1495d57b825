use anyhow::{Context, Result, anyhow, ensure};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::debug;

type Job = Pin<Box<dyn Future<Output = ()> + Send>>;

/// A worker-limited queue with an optional pacing delay between tasks.
///
/// Jobs are pulled from a shared channel by `max_workers` workers; after
/// finishing a job a worker sleeps `delay_between_tasks` before taking the
/// next one. Use this to throttle heavier per-item pipelines independently
/// of the transaction fetch pool.
pub struct TaskQueue {
    tx: mpsc::UnboundedSender<Job>,
    pending: Arc<AtomicUsize>,
    workers: Vec<JoinHandle<()>>,
}

impl TaskQueue {
    pub fn new(max_workers: usize, delay_between_tasks: Duration) -> Result<Self> {
        ensure!(max_workers > 0, "max_workers must be greater than 0");

        let (tx, rx) = mpsc::unbounded_channel::<Job>();
        let rx = Arc::new(Mutex::new(rx));
        let pending = Arc::new(AtomicUsize::new(0));

        let workers = (0..max_workers)
            .map(|_| {
                let rx = Arc::clone(&rx);
                let pending = Arc::clone(&pending);
                tokio::spawn(async move {
                    loop {
                        let job = {
                            let mut rx = rx.lock().await;
                            rx.recv().await
                        };
                        let Some(job) = job else { break };
                        job.await;
                        pending.fetch_sub(1, Ordering::SeqCst);
                        if !delay_between_tasks.is_zero() {
                            sleep(delay_between_tasks).await;
                        }
                    }
                })
            })
            .collect();

        debug!(
            "Task queue initialized with {} worker(s), {:?} between tasks",
            max_workers, delay_between_tasks
        );

        Ok(TaskQueue {
            tx,
            pending,
            workers,
        })
    }

    /// Enqueue a task and wait for its completion, returning its result.
    pub async fn add<T, Fut>(&self, task: Fut) -> Result<T>
    where
        T: Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let (done_tx, done_rx) = oneshot::channel();
        self.pending.fetch_add(1, Ordering::SeqCst);

        let job: Job = Box::pin(async move {
            let _ = done_tx.send(task.await);
        });
        if self.tx.send(job).is_err() {
            self.pending.fetch_sub(1, Ordering::SeqCst);
            return Err(anyhow!("task queue is closed"));
        }

        done_rx
            .await
            .context("task dropped before it could complete")?
    }

    /// Wait until the queue is drained and every worker is idle.
    pub async fn wait(&self) {
        while self.pending.load(Ordering::SeqCst) > 0 {
            sleep(Duration::from_millis(50)).await;
        }
    }
}

impl Drop for TaskQueue {
    fn drop(&mut self) {
        for worker in &self.workers {
            worker.abort();
        }
    }
}
