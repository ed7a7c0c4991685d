//! Wires the store, the task queue and the HTTP server together and owns the
//! process lifecycle: startup, serving until SIGINT/SIGTERM, and an orderly
//! shutdown that ends with a final snapshot.
use crate::{
    api::{self, AppState},
    checker::{Checker, Probe},
    config::Config,
    queue::TaskQueue,
    store::Store,
};
use anyhow::{Context, Result};
use std::{sync::Arc, time::Duration};
use tokio::{
    net::TcpListener,
    signal::unix::{SignalKind, signal},
    task::JoinHandle,
    time::timeout,
};
use tokio_util::sync::CancellationToken;

pub struct Controller {
    conf: Config,
}

impl Controller {
    pub fn new(conf: Config) -> Self {
        Self { conf }
    }

    /// Runs the service until a termination signal arrives.
    ///
    /// A corrupt or unreadable snapshot aborts startup. Failures during
    /// shutdown are logged; the process exits regardless.
    pub async fn start(&self) -> Result<()> {
        let store = Arc::new(
            Store::open(&self.conf.storage.state_file)
                .await
                .with_context(|| "Failed to load state")?,
        );
        let probe: Arc<dyn Probe> = Arc::new(Checker::new(&self.conf.checker)?);
        let queue = Arc::new(TaskQueue::new(
            store.clone(),
            probe.clone(),
            self.conf.queue.clone(),
        ));
        queue.start().await;

        let listener = TcpListener::bind(self.conf.server.listen)
            .await
            .with_context(|| format!("Failed to bind {}", self.conf.server.listen))?;
        tracing::info!("Server listening on {}", self.conf.server.listen);

        let shutdown = CancellationToken::new();
        let app = api::router(AppState {
            store: store.clone(),
            queue: queue.clone(),
            probe,
        });
        let mut server: JoinHandle<std::io::Result<()>> = {
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                axum::serve(listener, app)
                    .with_graceful_shutdown(shutdown.cancelled_owned())
                    .await
            })
        };

        let mut sigint_stream = signal(SignalKind::interrupt()).context("watch SIGINT failed")?;
        let mut sigterm_stream =
            signal(SignalKind::terminate()).context("watch SIGTERM failed")?;
        tokio::select! {
            _ = sigint_stream.recv() => {
                tracing::info!("SIGINT received, shutdown initiated...");
            }
            _ = sigterm_stream.recv() => {
                tracing::info!("SIGTERM received, shutdown initiated...");
            }
            result = &mut server => {
                tracing::error!("HTTP server stopped unexpectedly: {:?}", result);
            }
        }

        shutdown.cancel();
        if !server.is_finished() {
            Self::wait_for_server(self.conf.queue.shutdown_timeout, server).await;
        }

        if let Err(e) = queue.shutdown(self.conf.queue.shutdown_timeout).await {
            tracing::warn!("Error while stopping the task queue: {}", e);
        }

        if let Err(e) = store.save().await {
            tracing::error!("Failed to save final state: {}", e);
        }

        tracing::info!("Server stopped");
        Ok(())
    }

    async fn wait_for_server(wait_timeout: Duration, handle: JoinHandle<std::io::Result<()>>) {
        match timeout(wait_timeout, handle).await {
            Ok(Ok(Ok(()))) => tracing::debug!("HTTP server shutdown completed successfully"),
            Ok(Ok(Err(e))) => tracing::warn!("HTTP server shutdown error: {}", e),
            Ok(Err(e)) => tracing::warn!("HTTP server task failed: {}", e),
            Err(_) => tracing::warn!(
                "HTTP server shutdown timed out after {} seconds",
                wait_timeout.as_secs()
            ),
        }
    }
}
