use bytes::{Bytes, BytesMut};
use kvload_engine::StoreError;
use redis_protocol::resp2::decode::decode_bytes;
use redis_protocol::resp2::encode::extend_encode;
use redis_protocol::resp2::types::BytesFrame;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

/// A single RESP2 connection to one store node.
pub struct Connection {
    stream: TcpStream,
    buf: BytesMut,
    addr: String,
}

impl Connection {
    pub async fn connect(addr: &str, timeout: Duration) -> Result<Self, StoreError> {
        let stream = match tokio::time::timeout(timeout, TcpStream::connect(addr)).await {
            Ok(Ok(s)) => s,
            Ok(Err(e)) => {
                return Err(StoreError::Connect {
                    addr: addr.to_string(),
                    reason: e.to_string(),
                })
            }
            Err(_) => {
                return Err(StoreError::Connect {
                    addr: addr.to_string(),
                    reason: format!("timed out after {timeout:?}"),
                })
            }
        };
        stream.set_nodelay(true)?;

        Ok(Self {
            stream,
            buf: BytesMut::with_capacity(4096),
            addr: addr.to_string(),
        })
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Write every command, then read exactly one reply per command.
    pub async fn pipeline(&mut self, commands: &[BytesFrame]) -> Result<Vec<BytesFrame>, StoreError> {
        let mut out = BytesMut::new();
        for cmd in commands {
            // false = don't encode integers as bulk strings (standard RESP2)
            extend_encode(&mut out, cmd, false).map_err(|e| StoreError::Protocol(e.to_string()))?;
        }
        self.stream.write_all(&out).await?;

        let mut replies = Vec::with_capacity(commands.len());
        while replies.len() < commands.len() {
            // clone().freeze() gives us &Bytes without copying the data
            match decode_bytes(&self.buf.clone().freeze()) {
                Ok(Some((frame, consumed))) => {
                    let _ = self.buf.split_to(consumed);
                    replies.push(frame);
                    continue;
                }
                Ok(None) => {} // Need more data
                Err(e) => return Err(StoreError::Protocol(e.to_string())),
            }

            if self.stream.read_buf(&mut self.buf).await? == 0 {
                return Err(StoreError::Io(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    format!("{} closed the connection", self.addr),
                )));
            }
        }

        Ok(replies)
    }
}

pub fn command(parts: &[Bytes]) -> BytesFrame {
    BytesFrame::Array(parts.iter().cloned().map(BytesFrame::BulkString).collect())
}

pub fn ping() -> BytesFrame {
    command(&[Bytes::from_static(b"PING")])
}

pub fn exists(key: &str) -> BytesFrame {
    command(&[
        Bytes::from_static(b"EXISTS"),
        Bytes::copy_from_slice(key.as_bytes()),
    ])
}

/// `SET key 1 PX <ttl ms>`
pub fn set_with_ttl(key: &str, ttl: Duration) -> BytesFrame {
    let millis = ttl.as_millis().max(1);
    command(&[
        Bytes::from_static(b"SET"),
        Bytes::copy_from_slice(key.as_bytes()),
        Bytes::from_static(b"1"),
        Bytes::from_static(b"PX"),
        Bytes::from(millis.to_string()),
    ])
}

/// Turn an error reply into [`StoreError::Server`].
pub fn check_reply(frame: &BytesFrame) -> Result<(), StoreError> {
    match frame {
        BytesFrame::Error(msg) => Err(StoreError::Server(msg.to_string())),
        _ => Ok(()),
    }
}

/// Interpret an `EXISTS` reply.
pub fn exists_reply(frame: &BytesFrame) -> Result<bool, StoreError> {
    check_reply(frame)?;
    match frame {
        BytesFrame::Integer(n) => Ok(*n > 0),
        other => Err(StoreError::Protocol(format!(
            "unexpected EXISTS reply: {other:?}"
        ))),
    }
}

/// Interpret a `SET` or `PING` status reply.
pub fn status_reply(frame: &BytesFrame, expected: &str) -> Result<(), StoreError> {
    check_reply(frame)?;
    match frame {
        BytesFrame::SimpleString(s) if &s[..] == expected.as_bytes() => Ok(()),
        other => Err(StoreError::Protocol(format!(
            "expected {expected}, got {other:?}"
        ))),
    }
}
