//! Startup recovery
//!
//! Puts markers persisted by a previous run back onto the dispatch channel.

use super::TaskQueue;
use crate::model::{Task, TaskPhase};
use std::fmt;
use tokio::sync::mpsc::error::TrySendError;

/// Outcome of a restore pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RestoreReport {
    /// Markers pushed onto the dispatch channel
    pub redispatched: usize,
    /// Markers that did not fit in the channel and stay on disk
    pub skipped: usize,
    /// Markers left in the processing phase and not retried
    pub left_processing: usize,
}

impl fmt::Display for RestoreReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "redispatched: {}, skipped: {}, left processing: {}",
            self.redispatched, self.skipped, self.left_processing
        )
    }
}

impl TaskQueue {
    /// Redispatches persisted markers without blocking.
    ///
    /// Processing markers belong to checks that never finished; they are reset
    /// to pending first when `retry_processing` is enabled. A marker that does
    /// not fit in the channel is not retried in this run.
    pub(super) async fn restore_pending_tasks(&self) -> RestoreReport {
        let mut report = RestoreReport::default();

        if self.conf.retry_processing {
            let reset = self.store.reset_processing().await;
            if reset > 0 {
                tracing::info!("Retrying {} tasks interrupted while processing", reset);
                if let Err(e) = self.store.save().await {
                    tracing::warn!("Failed to persist reset tasks: {}", e);
                }
            }
        }

        let pending_tasks = self.store.get_pending_tasks().await;
        if pending_tasks.is_empty() {
            return report;
        }

        let Some(tx) = self.task_tx.lock().await.clone() else {
            tracing::warn!("Queue is shutting down, {} tasks not restored", pending_tasks.len());
            report.skipped = pending_tasks.len();
            return report;
        };

        for pending in &pending_tasks {
            if pending.phase == TaskPhase::Processing {
                report.left_processing += 1;
                continue;
            }

            match tx.try_send(Task::from(pending)) {
                Ok(()) => report.redispatched += 1,
                Err(TrySendError::Full(task)) | Err(TrySendError::Closed(task)) => {
                    tracing::debug!(
                        "No room for {} (links set {}), left for a later restart",
                        task.url,
                        task.links_num
                    );
                    report.skipped += 1;
                }
            }
        }

        tracing::info!("Restored pending tasks: {}", report);
        report
    }
}
