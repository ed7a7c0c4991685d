use crate::{checker::Probe, model::Task, store::Store};
use std::sync::Arc;
use tokio::sync::{Mutex, mpsc::Receiver};
use tokio_util::sync::CancellationToken;

/// Prefix for worker instance names
const WORKER_NAME_PREFIX: &str = "Worker";

/// Worker that takes tasks off the dispatch channel and checks them.
///
/// # Fields
/// * `name` - Name of the worker instance (e.g., "Worker-0")
/// * `store` - Shared state store
/// * `probe` - Reachability check used for every task
/// * `rx` - Dispatch channel receiver, shared by every worker of the pool
/// * `cancel` - Pool-wide cancellation token
pub(super) struct Worker {
    pub(super) name: String,
    store: Arc<Store>,
    probe: Arc<dyn Probe>,
    rx: Arc<Mutex<Receiver<Task>>>,
    cancel: CancellationToken,
}

impl Worker {
    pub(super) fn new(
        id: usize,
        store: Arc<Store>,
        probe: Arc<dyn Probe>,
        rx: Arc<Mutex<Receiver<Task>>>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            name: format!("{}-{}", WORKER_NAME_PREFIX, id),
            store,
            probe,
            rx,
            cancel,
        }
    }

    /// Runs until the channel is closed and drained, or the pool is cancelled.
    pub(super) async fn run(&self) {
        tracing::debug!("{} started", self.name);

        loop {
            let task = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    tracing::info!("{}: Cancellation received", self.name);
                    break;
                }
                task = self.receive() => task,
            };

            match task {
                Some(task) => self.process_task(task).await,
                None => {
                    tracing::debug!("{}: Task channel closed", self.name);
                    break;
                }
            }
        }

        tracing::debug!("{} stopped", self.name);
    }

    async fn receive(&self) -> Option<Task> {
        let mut rx = self.rx.lock().await;
        rx.recv().await
    }

    /// Checks one task and records the outcome.
    ///
    /// The processing phase is persisted before the probe runs. If the pool is
    /// cancelled mid-check the task is abandoned with its marker left in place.
    async fn process_task(&self, task: Task) {
        tracing::debug!("{} checking {} (links set {})", self.name, task.url, task.links_num);

        if self.store.mark_processing(task.links_num, &task.url).await {
            if let Err(e) = self.store.save().await {
                tracing::warn!("{}: Failed to persist processing phase: {}", self.name, e);
            }
        } else {
            tracing::debug!(
                "{}: No pending marker for {} (links set {}), checking anyway",
                self.name,
                task.url,
                task.links_num
            );
        }

        let status = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            status = self.probe.check(&task.url, &self.cancel) => Some(status),
        };

        let Some(status) = status.filter(|_| !self.cancel.is_cancelled()) else {
            tracing::warn!(
                "{}: Cancelled while checking {} (links set {}), marker left in place",
                self.name,
                task.url,
                task.links_num
            );
            return;
        };

        self.store
            .complete_task(task.links_num, &task.url, status)
            .await;

        if let Err(e) = self.store.save().await {
            tracing::error!("{}: Failed to save state: {}", self.name, e);
        }

        tracing::debug!("{}: {} is {}", self.name, task.url, status);
    }
}
