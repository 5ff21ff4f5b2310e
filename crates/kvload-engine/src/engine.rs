use crate::client::StoreClient;
use crate::config::EngineConfig;
use crate::metrics::LoadMetrics;
use crate::shutdown::ShutdownCoordinator;
use crate::worker::{Worker, WorkerFault, WorkerOutcome};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;

/// Fault that stopped the worker group.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("worker {worker} faulted: {fault}")]
    Worker { worker: usize, fault: WorkerFault },
    #[error("worker task panicked: {0}")]
    Panicked(String),
}

/// Aggregate result of one [`Engine::run`].
#[derive(Debug, Clone)]
pub struct RunReport {
    pub total_operations: u64,
    pub elapsed: Duration,
    /// First fault observed. `None` on ordinary cancellation.
    pub fault: Option<EngineError>,
    /// Per-worker terminal status, indexed by worker id. `None` only for a
    /// worker whose task panicked.
    pub outcomes: Vec<Option<WorkerOutcome>>,
}

impl RunReport {
    pub fn throughput(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.total_operations as f64 / secs
        } else {
            0.0
        }
    }

    pub fn into_result(self) -> Result<RunReport, EngineError> {
        match self.fault.clone() {
            Some(fault) => Err(fault),
            None => Ok(self),
        }
    }
}

/// Fixed-size worker pool supervised as a fail-fast group.
pub struct Engine<C: ?Sized> {
    config: Arc<EngineConfig>,
    client: Arc<C>,
    metrics: Arc<LoadMetrics>,
    seed: Option<u64>,
}

impl<C: StoreClient + ?Sized + 'static> Engine<C> {
    pub fn new(config: EngineConfig, client: Arc<C>, metrics: Arc<LoadMetrics>) -> Self {
        Self {
            config: Arc::new(config),
            client,
            metrics,
            seed: None,
        }
    }

    /// Seed every worker's key generator (worker `i` gets `seed + i`).
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn metrics(&self) -> &Arc<LoadMetrics> {
        &self.metrics
    }

    /// Run `config.workers` workers until the shutdown coordinator's worker
    /// token is cancelled or one of them faults.
    ///
    /// A fault cancels the remaining workers. Cancellation is not a fault.
    /// Returns only after every worker has stopped and the coordinator has
    /// drained the metrics sink.
    pub async fn run(&self, shutdown: &ShutdownCoordinator) -> RunReport {
        let started = Instant::now();
        let group = shutdown.worker_token().child_token();

        tracing::info!(
            workers = self.config.workers,
            batch_size = self.config.batch_size,
            duplicate_percentage = self.config.duplicate_percentage,
            duplicate_pool_size = self.config.duplicate_pool_size,
            ttl = ?self.config.ttl,
            "load generation starting"
        );

        let mut tasks = JoinSet::new();
        for id in 0..self.config.workers {
            let mut worker = Worker::new(
                id,
                Arc::clone(&self.config),
                Arc::clone(&self.client),
                Arc::clone(&self.metrics),
            );
            if let Some(seed) = self.seed {
                worker = worker.with_rng(StdRng::seed_from_u64(seed.wrapping_add(id as u64)));
            }
            let token = group.clone();
            tasks.spawn(async move { (id, worker.run(token).await) });
        }

        let mut outcomes: Vec<Option<WorkerOutcome>> = vec![None; self.config.workers];
        let mut fault = None;

        while let Some(joined) = tasks.join_next().await {
            let escalate = match joined {
                Ok((id, outcome)) => {
                    let escalate = match &outcome {
                        WorkerOutcome::Cancelled => None,
                        WorkerOutcome::Faulted(f) => Some(EngineError::Worker {
                            worker: id,
                            fault: f.clone(),
                        }),
                    };
                    outcomes[id] = Some(outcome);
                    escalate
                }
                Err(e) => Some(EngineError::Panicked(e.to_string())),
            };

            if let Some(err) = escalate {
                if fault.is_none() {
                    tracing::error!(error = %err, "stopping worker group");
                    group.cancel();
                    fault = Some(err);
                }
            }
        }

        shutdown.finish().await;

        let report = RunReport {
            total_operations: self.metrics.total_operations(),
            elapsed: started.elapsed(),
            fault,
            outcomes,
        };

        tracing::info!(
            total_operations = report.total_operations,
            elapsed = ?report.elapsed,
            ops_per_sec = format!("{:.1}", report.throughput()),
            faulted = report.fault.is_some(),
            "load generation finished"
        );

        report
    }
}
