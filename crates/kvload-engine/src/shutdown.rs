use parking_lot::Mutex;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Turns an external stop request into the cancellation state seen by the
/// workers, then stops the metrics sink once the workers are done.
///
/// Workers and the sink have separate tokens: the sink keeps serving
/// scrapes while workers drain and only then gets `sink_grace` to finish.
pub struct ShutdownCoordinator {
    workers: CancellationToken,
    sink: CancellationToken,
    sink_grace: Duration,
    sink_task: Mutex<Option<JoinHandle<()>>>,
}

impl ShutdownCoordinator {
    pub fn new(sink_grace: Duration) -> Self {
        Self {
            workers: CancellationToken::new(),
            sink: CancellationToken::new(),
            sink_grace,
            sink_task: Mutex::new(None),
        }
    }

    /// Token observed by workers at every iteration boundary.
    pub fn worker_token(&self) -> CancellationToken {
        self.workers.clone()
    }

    /// Token the metrics sink task should stop on.
    pub fn sink_token(&self) -> CancellationToken {
        self.sink.clone()
    }

    /// Hand over the metrics sink task so [`finish`](Self::finish) can wait for it.
    pub fn attach_sink(&self, handle: JoinHandle<()>) {
        *self.sink_task.lock() = Some(handle);
    }

    /// Request a stop. Idempotent.
    pub fn trigger(&self) {
        if !self.workers.is_cancelled() {
            tracing::info!("shutdown requested, stopping workers");
        }
        self.workers.cancel();
    }

    pub fn is_triggered(&self) -> bool {
        self.workers.is_cancelled()
    }

    /// Spawn a task that triggers shutdown on SIGINT (Ctrl+C) or SIGTERM.
    pub fn listen_for_signals(&self) -> JoinHandle<()> {
        let token = self.workers.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = shutdown_signal() => {
                    tracing::info!("shutdown signal received, stopping workers");
                    token.cancel();
                }
                _ = token.cancelled() => {}
            }
        })
    }

    /// Trigger shutdown after `after` unless it already happened.
    pub fn stop_after(&self, after: Duration) -> JoinHandle<()> {
        let token = self.workers.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(after) => {
                    tracing::info!(after = ?after, "run duration reached, stopping workers");
                    token.cancel();
                }
                _ = token.cancelled() => {}
            }
        })
    }

    /// Stop the sink and wait up to the grace period for it to exit.
    /// Call once every worker has stopped.
    pub async fn finish(&self) {
        self.workers.cancel();
        self.sink.cancel();

        let Some(mut handle) = self.sink_task.lock().take() else {
            return;
        };

        match tokio::time::timeout(self.sink_grace, &mut handle).await {
            Ok(Ok(())) => tracing::debug!("metrics sink stopped"),
            Ok(Err(e)) => tracing::warn!(error = %e, "metrics sink task failed"),
            Err(_) => {
                tracing::warn!(
                    grace = ?self.sink_grace,
                    "metrics sink did not stop within grace period, aborting"
                );
                handle.abort();
            }
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {},
                    _ = sigterm.recv() => {},
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "SIGTERM handler unavailable, listening for Ctrl+C only");
                ctrl_c.await.ok();
            }
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }
}
