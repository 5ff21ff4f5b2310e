use async_trait::async_trait;
use std::time::Duration;

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("connect {addr}: {reason}")]
    Connect { addr: String, reason: String },
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("timeout after {0:?}")]
    Timeout(Duration),
    #[error("server error: {0}")]
    Server(String),
    #[error("protocol: {0}")]
    Protocol(String),
    #[error("client closed")]
    Closed,
}

impl StoreError {
    /// Whether retrying the same request may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Connect { .. } | Self::Io(_) | Self::Timeout(_)
        )
    }
}

/// Contract the engine consumes from a store client.
///
/// Implementations own key hashing, connection handling and retry/backoff.
/// The engine treats every returned error as non-fatal.
#[async_trait]
pub trait StoreClient: Send + Sync {
    /// Presence of each key, positionally aligned with `keys`.
    async fn get(&self, keys: &[String]) -> Result<Vec<bool>, StoreError>;

    /// Insert every key with the same expiry.
    async fn put(&self, keys: &[String], ttl: Duration) -> Result<(), StoreError>;

    /// Release connections. Called once at shutdown.
    async fn close(&self) -> Result<(), StoreError>;
}
