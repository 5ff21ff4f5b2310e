mod config;
mod sink;

use clap::error::ErrorKind;
use clap::Parser;
use config::{Args, LogFormat, Settings, StoreKind};
use kvload_client::{MemoryStore, RespStoreClient};
use kvload_engine::{
    Engine, LoadMetrics, MetricLabels, ShutdownCoordinator, StoreClient, StoreError,
};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};
use sink::SinkState;
use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Exit status for failures before any worker starts.
const EXIT_PREFLIGHT: u8 = 1;
/// Exit status when the worker group stopped on a fault.
const EXIT_FAULT: u8 = 2;

#[derive(Debug, thiserror::Error)]
enum StartupError {
    #[error("install metrics recorder: {0}")]
    Recorder(#[from] BuildError),
    #[error("store client: {0}")]
    Store(#[from] StoreError),
    #[error("bind metrics endpoint {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => {
            e.exit()
        }
        Err(e) => {
            let _ = e.print();
            return ExitCode::from(EXIT_PREFLIGHT);
        }
    };

    init_tracing(args.log_format);

    let settings = match args.into_settings() {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(error = %e, "invalid configuration");
            return ExitCode::from(EXIT_PREFLIGHT);
        }
    };

    match run(settings).await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!(error = %e, "startup failed");
            ExitCode::from(EXIT_PREFLIGHT)
        }
    }
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match format {
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init(),
    }
}

async fn run(settings: Settings) -> Result<ExitCode, StartupError> {
    // Install Prometheus recorder before any metric handle is registered
    let prometheus = PrometheusBuilder::new().install_recorder()?;
    LoadMetrics::describe();

    let metrics = Arc::new(LoadMetrics::new(MetricLabels {
        workers: settings.engine.workers,
        batch_size: settings.engine.batch_size,
    }));

    let client: Arc<dyn StoreClient> = match settings.store {
        StoreKind::Resp => Arc::new(RespStoreClient::connect(settings.client.clone()).await?),
        StoreKind::Memory => {
            tracing::warn!("using in-process memory store, no traffic leaves this process");
            Arc::new(MemoryStore::new())
        }
    };

    let listener = tokio::net::TcpListener::bind(settings.metrics_addr)
        .await
        .map_err(|source| StartupError::Bind {
            addr: settings.metrics_addr,
            source,
        })?;

    tracing::info!(
        store = ?settings.store,
        addresses = ?settings.client.addresses,
        workers = settings.engine.workers,
        batch_size = settings.engine.batch_size,
        duplicate_percentage = settings.engine.duplicate_percentage,
        duplicate_pool_size = settings.engine.duplicate_pool_size,
        hash_ranges = settings.client.hash_ranges,
        metrics = %settings.metrics_addr,
        duration = ?settings.duration,
        "loadgen starting"
    );

    let shutdown = ShutdownCoordinator::new(settings.shutdown_grace);
    let sink_state = SinkState {
        metrics: Arc::clone(&metrics),
        prometheus,
    };
    shutdown.attach_sink(tokio::spawn(sink::run_sink(
        listener,
        sink_state,
        shutdown.sink_token(),
    )));
    shutdown.listen_for_signals();
    if let Some(limit) = settings.duration {
        shutdown.stop_after(limit);
    }

    let engine = Engine::new(settings.engine, Arc::clone(&client), metrics);
    let report = engine.run(&shutdown).await;

    if let Err(e) = client.close().await {
        tracing::warn!(error = %e, "failed to close store client");
    }

    Ok(match report.fault {
        None => {
            tracing::info!("loadgen shut down");
            ExitCode::SUCCESS
        }
        Some(fault) => {
            tracing::error!(error = %fault, "loadgen stopped on worker fault");
            ExitCode::from(EXIT_FAULT)
        }
    })
}
