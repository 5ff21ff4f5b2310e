//! Load generation engine for distributed key-value stores.
//!
//! A fixed pool of workers repeatedly generates key batches with a
//! controlled duplicate ratio, checks which keys exist in the store and
//! inserts the missing ones. Counters are shared through [`LoadMetrics`]
//! and shutdown is driven by a [`ShutdownCoordinator`].

pub mod client;
pub mod config;
pub mod engine;
pub mod generator;
pub mod metrics;
pub mod shutdown;
pub mod worker;

pub use crate::client::{StoreClient, StoreError};
pub use crate::config::{ConfigError, EngineConfig};
pub use crate::engine::{Engine, EngineError, RunReport};
pub use crate::generator::{generate_batch, KeyBatch};
pub use crate::metrics::{LoadMetrics, MetricLabels, MetricsSnapshot};
pub use crate::shutdown::ShutdownCoordinator;
pub use crate::worker::{Worker, WorkerFault, WorkerOutcome};
