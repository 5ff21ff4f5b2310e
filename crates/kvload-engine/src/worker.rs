use crate::client::StoreClient;
use crate::config::EngineConfig;
use crate::generator::generate_batch;
use crate::metrics::LoadMetrics;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::HashSet;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Unrecoverable worker condition. Escalated by the engine to the whole group.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum WorkerFault {
    #[error("existence result has {actual} entries for a batch of {expected}")]
    MisalignedExistence { expected: usize, actual: usize },
}

/// Terminal status of a worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerOutcome {
    /// Stopped because the shared token was cancelled.
    Cancelled,
    Faulted(WorkerFault),
}

/// Outcome of one existence check, split per key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExistenceSplit {
    pub found: u64,
    pub not_found: u64,
    /// Absent keys in first-seen order, without repeats.
    pub missing: Vec<String>,
}

/// Pair every key with its existence flag and collect the absent ones.
///
/// A key that appears several times in the batch is queued once.
pub fn split_existence(batch: &[String], exists: &[bool]) -> Result<ExistenceSplit, WorkerFault> {
    if batch.len() != exists.len() {
        return Err(WorkerFault::MisalignedExistence {
            expected: batch.len(),
            actual: exists.len(),
        });
    }

    let mut found = 0u64;
    let mut not_found = 0u64;
    let mut seen = HashSet::new();
    let mut missing = Vec::new();
    for (key, &present) in batch.iter().zip(exists) {
        if present {
            found += 1;
        } else {
            not_found += 1;
            if seen.insert(key.as_str()) {
                missing.push(key.clone());
            }
        }
    }

    Ok(ExistenceSplit {
        found,
        not_found,
        missing,
    })
}

/// One load loop: generate, check existence, insert the missing keys.
pub struct Worker<C: ?Sized> {
    id: usize,
    config: Arc<EngineConfig>,
    client: Arc<C>,
    metrics: Arc<LoadMetrics>,
    rng: StdRng,
}

impl<C: StoreClient + ?Sized> Worker<C> {
    pub fn new(
        id: usize,
        config: Arc<EngineConfig>,
        client: Arc<C>,
        metrics: Arc<LoadMetrics>,
    ) -> Self {
        Self {
            id,
            config,
            client,
            metrics,
            rng: StdRng::from_entropy(),
        }
    }

    /// Replace the entropy-seeded generator, e.g. for reproducible runs.
    pub fn with_rng(mut self, rng: StdRng) -> Self {
        self.rng = rng;
        self
    }

    pub fn id(&self) -> usize {
        self.id
    }

    /// Loop until `cancel` fires or a fault occurs.
    ///
    /// Cancellation is only observed between iterations, so an in-flight
    /// store call always completes first.
    pub async fn run(mut self, cancel: CancellationToken) -> WorkerOutcome {
        tracing::debug!(worker = self.id, "worker started");
        loop {
            if cancel.is_cancelled() {
                tracing::debug!(worker = self.id, "worker stopped");
                return WorkerOutcome::Cancelled;
            }
            if let Err(fault) = self.iterate().await {
                tracing::error!(worker = self.id, error = %fault, "worker fault");
                return WorkerOutcome::Faulted(fault);
            }
            // Stores that answer without suspending would otherwise never
            // let the scheduler run anything else on this thread.
            tokio::task::yield_now().await;
        }
    }

    async fn iterate(&mut self) -> Result<(), WorkerFault> {
        let batch = generate_batch(&self.config, &mut self.rng);

        match self.client.get(&batch).await {
            Ok(exists) => {
                let split = split_existence(&batch, &exists)?;
                self.metrics.record_get(split.found, split.not_found);

                if !split.missing.is_empty() {
                    match self.client.put(&split.missing, self.config.ttl).await {
                        Ok(()) => self.metrics.record_put(),
                        Err(e) => {
                            self.metrics.record_put_error();
                            tracing::warn!(
                                worker = self.id,
                                op = "put",
                                keys = split.missing.len(),
                                error = %e,
                                "store operation failed"
                            );
                        }
                    }
                }
            }
            Err(e) => {
                self.metrics.record_get_error();
                tracing::warn!(
                    worker = self.id,
                    op = "get",
                    keys = batch.len(),
                    error = %e,
                    "store operation failed"
                );
            }
        }

        self.metrics.record_operation();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::StoreError;
    use crate::metrics::MetricLabels;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::time::Duration;

    fn keys(list: &[&str]) -> Vec<String> {
        list.iter().map(|k| k.to_string()).collect()
    }

    #[test]
    fn split_queues_exactly_the_absent_keys() {
        let batch = keys(&["a", "b", "c", "d"]);
        let split = split_existence(&batch, &[true, false, true, false]).unwrap();
        assert_eq!(split.found, 2);
        assert_eq!(split.not_found, 2);
        assert_eq!(split.missing, keys(&["b", "d"]));
    }

    #[test]
    fn split_collapses_repeated_keys() {
        let batch = keys(&["dup-key-0", "dup-key-0", "x"]);
        let split = split_existence(&batch, &[false, false, false]).unwrap();
        assert_eq!(split.not_found, 3);
        assert_eq!(split.missing, keys(&["dup-key-0", "x"]));
    }

    #[test]
    fn split_rejects_misaligned_result() {
        let batch = keys(&["a", "b"]);
        assert_eq!(
            split_existence(&batch, &[false]),
            Err(WorkerFault::MisalignedExistence {
                expected: 2,
                actual: 1
            })
        );
    }

    /// Reports every key absent, records puts, optionally fails puts.
    struct AbsentStore {
        puts: Mutex<Vec<Vec<String>>>,
        fail_puts: bool,
    }

    #[async_trait]
    impl StoreClient for AbsentStore {
        async fn get(&self, keys: &[String]) -> Result<Vec<bool>, StoreError> {
            Ok(vec![false; keys.len()])
        }

        async fn put(&self, keys: &[String], _ttl: Duration) -> Result<(), StoreError> {
            self.puts.lock().push(keys.to_vec());
            if self.fail_puts {
                Err(StoreError::Server("READONLY".into()))
            } else {
                Ok(())
            }
        }

        async fn close(&self) -> Result<(), StoreError> {
            Ok(())
        }
    }

    fn worker(store: Arc<AbsentStore>, batch_size: usize) -> (Worker<AbsentStore>, Arc<LoadMetrics>) {
        let config = Arc::new(EngineConfig {
            workers: 1,
            batch_size,
            duplicate_percentage: 0,
            ..EngineConfig::default()
        });
        let metrics = Arc::new(LoadMetrics::new(MetricLabels {
            workers: 1,
            batch_size,
        }));
        let w = Worker::new(0, config, store, Arc::clone(&metrics))
            .with_rng(StdRng::seed_from_u64(11));
        (w, metrics)
    }

    #[tokio::test]
    async fn single_iteration_inserts_missing_keys() {
        let store = Arc::new(AbsentStore {
            puts: Mutex::new(Vec::new()),
            fail_puts: false,
        });
        let (mut w, metrics) = worker(Arc::clone(&store), 3);

        w.iterate().await.unwrap();

        let snap = metrics.snapshot();
        assert_eq!(snap.get_operations, 1);
        assert_eq!(snap.keys_not_found, 3);
        assert_eq!(snap.put_operations, 1);
        assert_eq!(snap.total_operations, 1);
        let puts = store.puts.lock();
        assert_eq!(puts.len(), 1);
        assert_eq!(puts[0].len(), 3);
    }

    #[tokio::test]
    async fn put_failure_is_counted_and_absorbed() {
        let store = Arc::new(AbsentStore {
            puts: Mutex::new(Vec::new()),
            fail_puts: true,
        });
        let (mut w, metrics) = worker(store, 2);

        assert!(w.iterate().await.is_ok());
        assert!(w.iterate().await.is_ok());

        let snap = metrics.snapshot();
        assert_eq!(snap.put_errors, 2);
        assert_eq!(snap.put_operations, 0);
        assert_eq!(snap.total_operations, 2);
    }

    #[tokio::test]
    async fn cancelled_before_start_does_nothing() {
        let store = Arc::new(AbsentStore {
            puts: Mutex::new(Vec::new()),
            fail_puts: false,
        });
        let (w, metrics) = worker(Arc::clone(&store), 4);
        let cancel = CancellationToken::new();
        cancel.cancel();

        assert_eq!(w.run(cancel).await, WorkerOutcome::Cancelled);
        assert_eq!(metrics.total_operations(), 0);
        assert!(store.puts.lock().is_empty());
    }
}
