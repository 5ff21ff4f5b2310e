use crate::connection::{exists, exists_reply, ping, set_with_ttl, status_reply};
use crate::pool::NodePool;
use crate::retry::RetryPolicy;
use crate::ring::{NodeBatch, RangeMap};
use async_trait::async_trait;
use futures_util::future::try_join_all;
use kvload_engine::{StoreClient, StoreError};
use redis_protocol::resp2::types::BytesFrame;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Settings for [`RespStoreClient`].
#[derive(Debug, Clone)]
pub struct ClientSettings {
    pub addresses: Vec<String>,
    /// Number of hash ranges keys are spread over.
    pub hash_ranges: u64,
    pub retry: RetryPolicy,
    /// Bound on a single connect or pipelined exchange.
    pub request_timeout: Duration,
    /// Idle connections kept per node.
    pub pool_size: usize,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            addresses: vec!["127.0.0.1:6379".to_string()],
            hash_ranges: 1024,
            retry: RetryPolicy::default(),
            request_timeout: Duration::from_secs(5),
            pool_size: 16,
        }
    }
}

/// Store client speaking RESP2 to a set of nodes.
///
/// Each batch is split by owning node, pipelined per node, and the nodes
/// are contacted concurrently. Replies are reassembled in input order.
pub struct RespStoreClient {
    ranges: RangeMap,
    nodes: Vec<NodePool>,
    retry: RetryPolicy,
    closed: AtomicBool,
}

impl RespStoreClient {
    /// Build the client and PING every node once.
    pub async fn connect(settings: ClientSettings) -> Result<Self, StoreError> {
        if settings.addresses.is_empty() {
            return Err(StoreError::Connect {
                addr: String::new(),
                reason: "no store addresses configured".to_string(),
            });
        }

        let nodes: Vec<NodePool> = settings
            .addresses
            .iter()
            .map(|addr| NodePool::new(addr.clone(), settings.pool_size, settings.request_timeout))
            .collect();

        let probe = [ping()];
        for node in &nodes {
            let replies = settings
                .retry
                .run("ping", || node.exchange(&probe))
                .await?;
            status_reply(&replies[0], "PONG")?;
            tracing::debug!(addr = node.addr(), "store node reachable");
        }

        tracing::info!(
            nodes = nodes.len(),
            hash_ranges = settings.hash_ranges,
            max_retries = settings.retry.max_retries,
            "store client connected"
        );

        Ok(Self {
            ranges: RangeMap::new(settings.hash_ranges, nodes.len()),
            nodes,
            retry: settings.retry,
            closed: AtomicBool::new(false),
        })
    }

    fn ensure_open(&self) -> Result<(), StoreError> {
        if self.closed.load(Ordering::Acquire) {
            Err(StoreError::Closed)
        } else {
            Ok(())
        }
    }

    /// Send one command per key to the owning nodes, concurrently.
    async fn fan_out<F>(
        &self,
        what: &str,
        keys: &[String],
        build: F,
    ) -> Result<Vec<(NodeBatch, Vec<BytesFrame>)>, StoreError>
    where
        F: Fn(&str) -> BytesFrame,
    {
        let requests = self.ranges.partition(keys).into_iter().map(move |group| {
            let node = &self.nodes[group.node];
            let commands: Vec<BytesFrame> = group.keys.iter().map(|k| build(k.as_str())).collect();
            async move {
                let replies = self.retry.run(what, || node.exchange(&commands)).await?;
                Ok::<_, StoreError>((group, replies))
            }
        });
        try_join_all(requests).await
    }
}

#[async_trait]
impl StoreClient for RespStoreClient {
    async fn get(&self, keys: &[String]) -> Result<Vec<bool>, StoreError> {
        self.ensure_open()?;
        let mut present = vec![false; keys.len()];
        for (group, replies) in self.fan_out("get", keys, exists).await? {
            for (&pos, reply) in group.positions.iter().zip(&replies) {
                present[pos] = exists_reply(reply)?;
            }
        }
        Ok(present)
    }

    async fn put(&self, keys: &[String], ttl: Duration) -> Result<(), StoreError> {
        self.ensure_open()?;
        let build = |key: &str| set_with_ttl(key, ttl);
        for (_, replies) in self.fan_out("put", keys, build).await? {
            for reply in &replies {
                status_reply(reply, "OK")?;
            }
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), StoreError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        for node in &self.nodes {
            node.clear();
        }
        tracing::info!(nodes = self.nodes.len(), "store client closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;
    use parking_lot::Mutex;
    use redis_protocol::resp2::decode::decode_bytes;
    use redis_protocol::resp2::encode::extend_encode;
    use std::collections::HashSet;
    use std::sync::Arc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    type Keys = Arc<Mutex<HashSet<String>>>;

    fn arg(frame: &BytesFrame) -> String {
        match frame {
            BytesFrame::BulkString(b) => String::from_utf8_lossy(b).into_owned(),
            _ => String::new(),
        }
    }

    /// Minimal node: PING, EXISTS and SET. Keys prefixed `ro-` are rejected.
    fn reply(frame: &BytesFrame, keys: &Keys) -> BytesFrame {
        let BytesFrame::Array(args) = frame else {
            return BytesFrame::Error("ERR expected array".into());
        };
        match arg(&args[0]).to_uppercase().as_str() {
            "PING" => BytesFrame::SimpleString("PONG".into()),
            "EXISTS" => BytesFrame::Integer(keys.lock().contains(&arg(&args[1])) as i64),
            "SET" => {
                let key = arg(&args[1]);
                if key.starts_with("ro-") {
                    return BytesFrame::Error("READONLY replica".into());
                }
                keys.lock().insert(key);
                BytesFrame::SimpleString("OK".into())
            }
            other => BytesFrame::Error(format!("ERR unknown command '{other}'").into()),
        }
    }

    async fn serve(mut stream: TcpStream, keys: Keys) {
        let mut buf = BytesMut::with_capacity(4096);
        loop {
            match stream.read_buf(&mut buf).await {
                Ok(0) | Err(_) => return,
                Ok(_) => {}
            }
            while let Ok(Some((frame, consumed))) = decode_bytes(&buf.clone().freeze()) {
                let _ = buf.split_to(consumed);
                let mut out = BytesMut::new();
                extend_encode(&mut out, &reply(&frame, &keys), false).unwrap();
                if stream.write_all(&out).await.is_err() {
                    return;
                }
            }
        }
    }

    async fn spawn_node() -> (String, Keys) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let keys: Keys = Arc::default();
        let node_keys = Arc::clone(&keys);
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(serve(stream, Arc::clone(&node_keys)));
            }
        });
        (addr, keys)
    }

    fn settings(addresses: Vec<String>) -> ClientSettings {
        ClientSettings {
            addresses,
            hash_ranges: 64,
            retry: RetryPolicy {
                max_retries: 0,
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(5),
            },
            request_timeout: Duration::from_secs(2),
            pool_size: 4,
        }
    }

    fn batch(prefix: &str, n: usize) -> Vec<String> {
        (0..n).map(|i| format!("{prefix}{i}")).collect()
    }

    #[tokio::test]
    async fn put_then_get_across_nodes() {
        let (a, keys_a) = spawn_node().await;
        let (b, keys_b) = spawn_node().await;
        let client = RespStoreClient::connect(settings(vec![a, b])).await.unwrap();

        let keys = batch("key-", 60);
        assert_eq!(client.get(&keys).await.unwrap(), vec![false; 60]);

        client.put(&keys, Duration::from_secs(30)).await.unwrap();
        assert_eq!(client.get(&keys).await.unwrap(), vec![true; 60]);

        let on_a = keys_a.lock().len();
        let on_b = keys_b.lock().len();
        assert_eq!(on_a + on_b, 60);
        assert!(on_a > 0 && on_b > 0, "a={on_a} b={on_b}");
    }

    #[tokio::test]
    async fn get_preserves_input_order() {
        let (a, _) = spawn_node().await;
        let (b, _) = spawn_node().await;
        let (c, _) = spawn_node().await;
        let client = RespStoreClient::connect(settings(vec![a, b, c])).await.unwrap();

        let keys = batch("k", 40);
        let even: Vec<String> = keys.iter().step_by(2).cloned().collect();
        client.put(&even, Duration::from_secs(30)).await.unwrap();

        let present = client.get(&keys).await.unwrap();
        let expected: Vec<bool> = (0..40).map(|i| i % 2 == 0).collect();
        assert_eq!(present, expected);
    }

    #[tokio::test]
    async fn connections_are_reused() {
        let (a, _) = spawn_node().await;
        let client = RespStoreClient::connect(settings(vec![a])).await.unwrap();
        assert_eq!(client.nodes[0].idle_len(), 1);

        for _ in 0..5 {
            client.get(&batch("x", 3)).await.unwrap();
        }
        assert_eq!(client.nodes[0].idle_len(), 1);
    }

    #[tokio::test]
    async fn error_reply_fails_the_put() {
        let (a, _) = spawn_node().await;
        let client = RespStoreClient::connect(settings(vec![a])).await.unwrap();

        let keys = vec!["fine".to_string(), "ro-blocked".to_string()];
        let err = client.put(&keys, Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, StoreError::Server(ref m) if m.contains("READONLY")));
    }

    #[tokio::test]
    async fn unreachable_node_fails_construction() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let err = RespStoreClient::connect(settings(vec![addr]))
            .await
            .err()
            .expect("connect should fail");
        assert!(matches!(err, StoreError::Connect { .. }));
    }

    #[tokio::test]
    async fn empty_address_list_is_rejected() {
        let err = RespStoreClient::connect(settings(vec![]))
            .await
            .err()
            .expect("connect should fail");
        assert!(matches!(err, StoreError::Connect { .. }));
    }

    #[tokio::test]
    async fn closed_client_refuses_requests() {
        let (a, _) = spawn_node().await;
        let client = RespStoreClient::connect(settings(vec![a])).await.unwrap();
        client.close().await.unwrap();
        client.close().await.unwrap();

        assert!(matches!(
            client.get(&batch("k", 1)).await,
            Err(StoreError::Closed)
        ));
        assert!(matches!(
            client.put(&batch("k", 1), Duration::from_secs(1)).await,
            Err(StoreError::Closed)
        ));
        assert_eq!(client.nodes[0].idle_len(), 0);
    }

    #[tokio::test]
    async fn empty_batches_skip_the_network() {
        let (a, _) = spawn_node().await;
        let client = RespStoreClient::connect(settings(vec![a])).await.unwrap();
        assert!(client.get(&[]).await.unwrap().is_empty());
        client.put(&[], Duration::from_secs(1)).await.unwrap();
    }
}
