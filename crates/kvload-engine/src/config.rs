use std::time::Duration;

/// Immutable engine settings, shared read-only by every worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    pub workers: usize,
    pub batch_size: usize,
    /// Per-key probability, in percent, of drawing from the duplicate pool.
    pub duplicate_percentage: u8,
    /// Number of distinct keys in the duplicate pool.
    pub duplicate_pool_size: u64,
    /// Expiry applied to every inserted key.
    pub ttl: Duration,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("worker count must be at least 1")]
    NoWorkers,
    #[error("batch size must be at least 1")]
    EmptyBatch,
    #[error("duplicate percentage must be within 0..=100, got {0}")]
    DuplicatePercentage(u32),
    #[error("duplicate pool size must be at least 1 when duplicates are enabled")]
    EmptyDuplicatePool,
    #[error("ttl must be positive")]
    ZeroTtl,
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == 0 {
            return Err(ConfigError::NoWorkers);
        }
        if self.batch_size == 0 {
            return Err(ConfigError::EmptyBatch);
        }
        if self.duplicate_percentage > 100 {
            return Err(ConfigError::DuplicatePercentage(
                self.duplicate_percentage as u32,
            ));
        }
        if self.duplicate_percentage > 0 && self.duplicate_pool_size == 0 {
            return Err(ConfigError::EmptyDuplicatePool);
        }
        if self.ttl.is_zero() {
            return Err(ConfigError::ZeroTtl);
        }
        Ok(())
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            workers: 10,
            batch_size: 100,
            duplicate_percentage: 10,
            duplicate_pool_size: 1000,
            ttl: Duration::from_secs(3600),
        }
    }
}
