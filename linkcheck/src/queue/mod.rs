//! Persistent task queue
//!
//! The task queue owns a bounded dispatch channel and a fixed pool of
//! workers. Every accepted task is recorded in the store before it is handed
//! to the channel, so a task is never lost without a trace on disk.

mod recovery;
mod worker;

pub use recovery::RestoreReport;

use crate::{
    checker::Probe,
    config::QueueConfig,
    model::{LinksNum, PendingTask, Task},
    store::{Store, StoreError},
};
use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};
use thiserror::Error;
use tokio::{
    sync::{Mutex, mpsc},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use worker::Worker;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("task queue is not started")]
    NotStarted,

    #[error("task queue is shutting down")]
    ShuttingDown,

    #[error("shutdown timed out after {0:?}, some tasks may not be finished")]
    ShutdownTimeout(Duration),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// How far an accepted task got.
///
/// Both variants mean the task is durably recorded. Only `Dispatched`
/// guarantees a worker will pick it up in this process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Dispatched,
    /// The channel stayed full for the whole enqueue timeout. The task is
    /// retried by the recovery pass of the next start.
    Deferred,
}

struct HandleHolder {
    name: String,
    handle: JoinHandle<()>,
}

/// Persistent task queue.
///
/// # Fields
/// * `task_tx` - Dispatch channel sender; `None` once shutdown has begun
/// * `task_rx` - Dispatch channel receiver, shared by every worker
/// * `cancel` - Cancels workers that outlive the shutdown timeout
/// * `accepting` - Set once startup recovery is over; enqueue is refused before
pub struct TaskQueue {
    store: Arc<Store>,
    probe: Arc<dyn Probe>,
    conf: QueueConfig,
    task_tx: Mutex<Option<mpsc::Sender<Task>>>,
    task_rx: Arc<Mutex<mpsc::Receiver<Task>>>,
    cancel: CancellationToken,
    started: AtomicBool,
    accepting: AtomicBool,
    handles: Mutex<Vec<HandleHolder>>,
}

impl TaskQueue {
    pub fn new(store: Arc<Store>, probe: Arc<dyn Probe>, conf: QueueConfig) -> Self {
        let (task_tx, task_rx) = mpsc::channel::<Task>(conf.channel_capacity.max(1));

        Self {
            store,
            probe,
            conf,
            task_tx: Mutex::new(Some(task_tx)),
            task_rx: Arc::new(Mutex::new(task_rx)),
            cancel: CancellationToken::new(),
            started: AtomicBool::new(false),
            accepting: AtomicBool::new(false),
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Spawns the worker pool, then redispatches tasks left by a previous run.
    ///
    /// Only the first call has any effect.
    pub async fn start(&self) -> RestoreReport {
        if self.started.swap(true, Ordering::SeqCst) {
            tracing::warn!("TaskQueue already started");
            return RestoreReport::default();
        }

        {
            let mut handles = self.handles.lock().await;
            for i in 0..self.conf.num_workers {
                let worker = Worker::new(
                    i,
                    self.store.clone(),
                    self.probe.clone(),
                    self.task_rx.clone(),
                    self.cancel.clone(),
                );
                let name = worker.name.clone();

                let handle = tokio::spawn(async move {
                    worker.run().await;
                });
                handles.push(HandleHolder { name, handle });
            }
        }

        tracing::info!("TaskQueue started with {} workers", self.conf.num_workers);

        let report = self.restore_pending_tasks().await;
        self.accepting.store(true, Ordering::SeqCst);
        report
    }

    /// Accepts a check of `url` in links set `links_num`.
    ///
    /// The pending marker is saved before dispatch is attempted. If the
    /// channel stays full for the enqueue timeout the task is still accepted
    /// and `EnqueueOutcome::Deferred` is returned. A failed save is reported,
    /// but the marker stays in memory and goes out with the next save.
    ///
    /// Tasks are refused with `QueueError::NotStarted` until `start` has
    /// finished restoring, so a marker is never dispatched twice.
    pub async fn enqueue(
        &self,
        links_num: LinksNum,
        url: &str,
    ) -> Result<EnqueueOutcome, QueueError> {
        let tx = {
            // Held until the marker is on disk so shutdown cannot slip in between.
            let guard = self.task_tx.lock().await;
            let Some(tx) = guard.as_ref() else {
                return Err(QueueError::ShuttingDown);
            };
            if !self.accepting.load(Ordering::SeqCst) {
                return Err(QueueError::NotStarted);
            }

            self.store
                .add_pending_task(PendingTask::new(links_num, url))
                .await;
            self.store.save().await?;

            tx.clone()
        };

        let task = Task {
            links_num,
            url: url.to_string(),
        };
        match tx.send_timeout(task, self.conf.enqueue_timeout).await {
            Ok(()) => Ok(EnqueueOutcome::Dispatched),
            Err(e) => {
                tracing::warn!(
                    "Task for {} (links set {}) accepted but not dispatched: {}",
                    url,
                    links_num,
                    e
                );
                Ok(EnqueueOutcome::Deferred)
            }
        }
    }

    /// Stops accepting tasks and waits for the workers to drain the channel.
    ///
    /// Workers still running after `timeout` are cancelled and
    /// `QueueError::ShutdownTimeout` is returned; their tasks keep their markers.
    pub async fn shutdown(&self, timeout: Duration) -> Result<(), QueueError> {
        // Dropping the sender closes the channel once its buffer is drained.
        self.task_tx.lock().await.take();

        let handles = std::mem::take(&mut *self.handles.lock().await);
        tracing::info!("Shutting down TaskQueue with {} workers", handles.len());

        let wait_all = async {
            for holder in handles {
                match holder.handle.await {
                    Ok(()) => tracing::debug!("{} completed successfully", holder.name),
                    Err(e) => tracing::warn!("{} failed: {}", holder.name, e),
                }
            }
        };

        match tokio::time::timeout(timeout, wait_all).await {
            Ok(()) => {
                tracing::info!("TaskQueue shutdown complete");
                Ok(())
            }
            Err(_) => {
                self.cancel.cancel();
                tracing::warn!(
                    "TaskQueue shutdown timed out after {:?}, cancelling workers",
                    timeout
                );
                Err(QueueError::ShutdownTimeout(timeout))
            }
        }
    }

    pub async fn pending_count(&self) -> usize {
        self.store.pending_count().await
    }

    pub async fn pending_tasks(&self) -> Vec<PendingTask> {
        self.store.get_pending_tasks().await
    }
}
