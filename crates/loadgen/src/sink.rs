use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use kvload_engine::{LoadMetrics, MetricsSnapshot};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

const REPORT_INTERVAL: Duration = Duration::from_secs(5);

/// Shared state for the metrics router.
#[derive(Clone)]
pub struct SinkState {
    pub metrics: Arc<LoadMetrics>,
    pub prometheus: PrometheusHandle,
}

pub fn router(state: SinkState) -> Router {
    Router::new()
        .route("/metrics", get(prometheus_handler))
        .route("/status", get(status_handler))
        .route("/health", get(health))
        .with_state(state)
}

/// GET /metrics: Prometheus text exposition.
async fn prometheus_handler(State(state): State<SinkState>) -> String {
    state.prometheus.render()
}

/// GET /status: one-shot JSON view of the counters.
async fn status_handler(State(state): State<SinkState>) -> Json<MetricsSnapshot> {
    Json(state.metrics.snapshot())
}

async fn health() -> &'static str {
    "ok"
}

/// Serve the metrics endpoint and log throughput until `shutdown` fires.
pub async fn run_sink(listener: TcpListener, state: SinkState, shutdown: CancellationToken) {
    let metrics = Arc::clone(&state.metrics);
    let server_shutdown = shutdown.clone();

    let server = async move {
        if let Err(e) = axum::serve(listener, router(state))
            .with_graceful_shutdown(server_shutdown.cancelled_owned())
            .await
        {
            tracing::error!(error = %e, "metrics server error");
        }
    };

    tokio::join!(server, report_throughput(metrics, shutdown));
}

/// Log interval and cumulative throughput, plus a final line on shutdown.
async fn report_throughput(metrics: Arc<LoadMetrics>, shutdown: CancellationToken) {
    let mut interval = tokio::time::interval(REPORT_INTERVAL);
    interval.tick().await;
    let mut prev = 0u64;

    loop {
        tokio::select! {
            _ = interval.tick() => {
                let snap = metrics.snapshot();
                let delta = snap.total_operations.saturating_sub(prev);
                prev = snap.total_operations;
                tracing::info!(
                    total = snap.total_operations,
                    interval_ops_per_sec = format!("{:.0}", delta as f64 / REPORT_INTERVAL.as_secs_f64()),
                    ops_per_sec = format!("{:.0}", snap.operations_per_second),
                    get_errors = snap.get_errors,
                    put_errors = snap.put_errors,
                    "throughput"
                );
            }
            _ = shutdown.cancelled() => {
                let snap = metrics.snapshot();
                tracing::info!(
                    total = snap.total_operations,
                    get_operations = snap.get_operations,
                    put_operations = snap.put_operations,
                    get_errors = snap.get_errors,
                    put_errors = snap.put_errors,
                    keys_found = snap.keys_found,
                    keys_not_found = snap.keys_not_found,
                    "final metrics"
                );
                return;
            }
        }
    }
}
