use clap::{Parser, ValueEnum};
use kvload_client::{ClientSettings, RetryPolicy};
use kvload_engine::{ConfigError as EngineConfigError, EngineConfig};
use std::net::SocketAddr;
use std::time::Duration;

/// kvload load generator: sustained Get/Put traffic against a key-value store.
#[derive(Parser, Debug, Clone)]
#[command(name = "loadgen", version)]
pub struct Args {
    /// Store node addresses (host:port), comma separated
    #[arg(long, env = "KVLOAD_ADDRESSES", value_delimiter = ',')]
    pub addresses: Vec<String>,

    /// Keys generated per worker iteration
    #[arg(long, env = "KVLOAD_BATCH_SIZE", default_value_t = 100)]
    pub batch_size: usize,

    /// Number of concurrent workers
    #[arg(long, env = "KVLOAD_WORKERS", default_value_t = 10)]
    pub workers: usize,

    /// Per-key chance (0-100) of drawing from the duplicate pool
    #[arg(long, env = "KVLOAD_DUPLICATE_PERCENTAGE", default_value_t = 10)]
    pub duplicate_percentage: u32,

    /// Distinct keys in the duplicate pool
    #[arg(long, env = "KVLOAD_DUPLICATE_POOL_SIZE", default_value_t = 1000)]
    pub duplicate_pool_size: u64,

    /// Expiry of inserted keys (e.g. 1h, 90s)
    #[arg(long, env = "KVLOAD_TTL", default_value = "1h", value_parser = humantime::parse_duration)]
    pub ttl: Duration,

    /// Hash ranges keys are spread over
    #[arg(long, env = "KVLOAD_HASH_RANGES", default_value_t = 1024)]
    pub hash_ranges: u64,

    /// Retries of a transient store failure
    #[arg(long, env = "KVLOAD_MAX_RETRIES", default_value_t = 3)]
    pub max_retries: u32,

    /// First retry backoff
    #[arg(long, env = "KVLOAD_RETRY_BASE_DELAY", default_value = "50ms", value_parser = humantime::parse_duration)]
    pub retry_base_delay: Duration,

    /// Backoff ceiling
    #[arg(long, env = "KVLOAD_RETRY_MAX_DELAY", default_value = "2s", value_parser = humantime::parse_duration)]
    pub retry_max_delay: Duration,

    /// Bound on a single connect or request
    #[arg(long, env = "KVLOAD_REQUEST_TIMEOUT", default_value = "5s", value_parser = humantime::parse_duration)]
    pub request_timeout: Duration,

    /// Idle connections kept per store node
    #[arg(long, env = "KVLOAD_POOL_SIZE", default_value_t = 16)]
    pub pool_size: usize,

    /// Store backend
    #[arg(long, env = "KVLOAD_STORE", value_enum, default_value_t = StoreKind::Resp)]
    pub store: StoreKind,

    /// Metrics endpoint listen address
    #[arg(long, env = "KVLOAD_METRICS_ADDR", default_value = "0.0.0.0:9100")]
    pub metrics_addr: SocketAddr,

    /// Time the metrics endpoint gets to stop after the workers
    #[arg(long, env = "KVLOAD_SHUTDOWN_GRACE", default_value = "5s", value_parser = humantime::parse_duration)]
    pub shutdown_grace: Duration,

    /// Stop after this long (default: run until interrupted)
    #[arg(long, env = "KVLOAD_DURATION", value_parser = humantime::parse_duration)]
    pub duration: Option<Duration>,

    /// Log output format
    #[arg(long, env = "KVLOAD_LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StoreKind {
    /// RESP2 cluster at --addresses
    Resp,
    /// In-process store, for dry runs
    Memory,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("at least one store address is required")]
    NoAddresses,
    #[error("store address must not be empty")]
    BlankAddress,
    #[error("hash range count must be at least 1")]
    NoHashRanges,
    #[error("retry base delay {base:?} exceeds max delay {max:?}")]
    RetryDelays { base: Duration, max: Duration },
    #[error("request timeout must be positive")]
    ZeroTimeout,
    #[error(transparent)]
    Engine(#[from] EngineConfigError),
}

/// Validated settings handed to the engine and the store client.
#[derive(Debug, Clone)]
pub struct Settings {
    pub engine: EngineConfig,
    pub client: ClientSettings,
    pub store: StoreKind,
    pub metrics_addr: SocketAddr,
    pub shutdown_grace: Duration,
    pub duration: Option<Duration>,
}

impl Args {
    pub fn into_settings(self) -> Result<Settings, ConfigError> {
        let duplicate_percentage = u8::try_from(self.duplicate_percentage)
            .map_err(|_| EngineConfigError::DuplicatePercentage(self.duplicate_percentage))?;

        let engine = EngineConfig {
            workers: self.workers,
            batch_size: self.batch_size,
            duplicate_percentage,
            duplicate_pool_size: self.duplicate_pool_size,
            ttl: self.ttl,
        };
        engine.validate()?;

        let addresses: Vec<String> = self
            .addresses
            .iter()
            .map(|a| a.trim().to_string())
            .collect();
        if self.store == StoreKind::Resp {
            if addresses.is_empty() {
                return Err(ConfigError::NoAddresses);
            }
            if addresses.iter().any(String::is_empty) {
                return Err(ConfigError::BlankAddress);
            }
        }
        if self.hash_ranges == 0 {
            return Err(ConfigError::NoHashRanges);
        }
        if self.retry_base_delay > self.retry_max_delay {
            return Err(ConfigError::RetryDelays {
                base: self.retry_base_delay,
                max: self.retry_max_delay,
            });
        }
        if self.request_timeout.is_zero() {
            return Err(ConfigError::ZeroTimeout);
        }

        Ok(Settings {
            engine,
            client: ClientSettings {
                addresses,
                hash_ranges: self.hash_ranges,
                retry: RetryPolicy {
                    max_retries: self.max_retries,
                    base_delay: self.retry_base_delay,
                    max_delay: self.retry_max_delay,
                },
                request_timeout: self.request_timeout,
                pool_size: self.pool_size,
            },
            store: self.store,
            metrics_addr: self.metrics_addr,
            shutdown_grace: self.shutdown_grace,
            duration: self.duration,
        })
    }
}
