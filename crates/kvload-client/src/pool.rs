use crate::connection::Connection;
use kvload_engine::StoreError;
use parking_lot::Mutex;
use redis_protocol::resp2::types::BytesFrame;
use std::time::Duration;

/// Idle connections to a single store node.
///
/// A connection goes back to the pool only after a clean exchange; any
/// error drops it so a half-read reply can never leak into the next request.
pub struct NodePool {
    addr: String,
    idle: Mutex<Vec<Connection>>,
    max_idle: usize,
    timeout: Duration,
}

impl NodePool {
    pub fn new(addr: String, max_idle: usize, timeout: Duration) -> Self {
        Self {
            addr,
            idle: Mutex::new(Vec::with_capacity(max_idle)),
            max_idle,
            timeout,
        }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub fn idle_len(&self) -> usize {
        self.idle.lock().len()
    }

    async fn checkout(&self) -> Result<Connection, StoreError> {
        let idle = self.idle.lock().pop();
        match idle {
            Some(conn) => Ok(conn),
            None => Connection::connect(&self.addr, self.timeout).await,
        }
    }

    fn checkin(&self, conn: Connection) {
        let mut idle = self.idle.lock();
        if idle.len() < self.max_idle {
            idle.push(conn);
        }
    }

    /// Pipeline `commands` on one pooled connection, bounded by the request timeout.
    pub async fn exchange(&self, commands: &[BytesFrame]) -> Result<Vec<BytesFrame>, StoreError> {
        let mut conn = self.checkout().await?;
        match tokio::time::timeout(self.timeout, conn.pipeline(commands)).await {
            Ok(Ok(replies)) => {
                self.checkin(conn);
                Ok(replies)
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(StoreError::Timeout(self.timeout)),
        }
    }

    /// Drop every idle connection.
    pub fn clear(&self) {
        self.idle.lock().clear();
    }
}
