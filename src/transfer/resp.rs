//! RESP network endpoint
//!
//! [`RespEndpoint`] talks to a Redis-compatible server over TCP using the
//! codec in `keyshift_core::protocol`. Connections are pooled: a semaphore
//! bounds how many are in use at once and idle ones are parked in a
//! `parking_lot::Mutex<Vec<_>>`. Only a connection whose request ran to the
//! last reply goes back to the pool; after an error, a timeout, or a caller
//! abandoning the request its reply stream can no longer be trusted, so it
//! is closed.
//!
//! Every request is bounded by the request timeout; opening a connection
//! (including `AUTH`) is bounded by the connect timeout.

use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{Semaphore, SemaphorePermit};
use tracing::{debug, trace, warn};

use keyshift_core::config::{EndpointConfig, TimeoutConfig, TransferSettings};
use keyshift_core::protocol::{encode_frame, Frame, FrameScanner, ParserLimits};
use keyshift_core::EndpointAddr;

use super::endpoint::{
    Endpoint, EndpointError, EndpointResult, FlushOutcome, Key, SerializedValue, TimeToLive,
    WriteIntent,
};
use super::report::{FailureStage, KeyFailure};

const READ_BUFFER_SIZE: usize = 16 * 1024;
const NO_ARGS: [Bytes; 0] = [];

/// Connection pool and timeout settings.
#[derive(Debug, Clone)]
pub struct RespOptions {
    /// Bound on TCP connect plus `AUTH`
    pub connect_timeout: Duration,
    /// Bound on one request, or one pipeline chunk
    pub request_timeout: Duration,
    /// Maximum connections in use at once
    pub max_connections: usize,
    /// Commands per pipeline round-trip in [`Endpoint::restore_batch`]
    pub pipeline_batch: usize,
}

impl Default for RespOptions {
    fn default() -> Self {
        let timeouts = TimeoutConfig::default();
        let transfer = TransferSettings::default();
        Self {
            connect_timeout: timeouts.connect(),
            request_timeout: timeouts.request(),
            max_connections: transfer.workers,
            pipeline_batch: transfer.pipeline_batch,
        }
    }
}

impl RespOptions {
    /// Derive options for one endpoint. The pool defaults to one connection
    /// per worker.
    pub fn from_config(
        endpoint: &EndpointConfig,
        timeouts: &TimeoutConfig,
        transfer: &TransferSettings,
    ) -> Self {
        Self {
            connect_timeout: timeouts.connect(),
            request_timeout: timeouts.request(),
            max_connections: endpoint.max_connections.unwrap_or(transfer.workers).max(1),
            pipeline_batch: transfer.pipeline_batch.max(1),
        }
    }
}

// ── Connection ──────────────────────────────────────────────────────────

struct RespConnection {
    stream: TcpStream,
    buf: BytesMut,
    scanner: FrameScanner,
    limits: ParserLimits,
}

impl RespConnection {
    async fn open(addr: &EndpointAddr) -> EndpointResult<Self> {
        let stream = TcpStream::connect(addr.socket_addr())
            .await
            .map_err(|e| EndpointError::Connection(format!("connect to {}: {}", addr, e)))?;
        stream
            .set_nodelay(true)
            .map_err(|e| EndpointError::Connection(e.to_string()))?;

        let mut conn = Self {
            stream,
            buf: BytesMut::with_capacity(READ_BUFFER_SIZE),
            scanner: FrameScanner::new(),
            limits: ParserLimits::default(),
        };

        if let Some(password) = &addr.password {
            let mut args = Vec::with_capacity(2);
            if let Some(user) = &addr.username {
                args.push(Bytes::from(user.clone()));
            }
            args.push(Bytes::from(password.clone()));

            conn.write_frames(&[Frame::command("AUTH", args)]).await?;
            let reply = conn.read_reply().await?;
            if let Some(msg) = reply.error_message() {
                return Err(EndpointError::Connection(format!(
                    "authentication to {} failed: {}",
                    addr, msg
                )));
            }
        }

        Ok(conn)
    }

    async fn write_frames(&mut self, frames: &[Frame]) -> EndpointResult<()> {
        let mut out = BytesMut::new();
        for frame in frames {
            encode_frame(frame, &mut out);
        }
        self.stream
            .write_all(&out)
            .await
            .map_err(|e| EndpointError::Connection(e.to_string()))
    }

    async fn read_reply(&mut self) -> EndpointResult<Frame> {
        loop {
            if let Some(frame) = self
                .scanner
                .parse(&mut self.buf, &self.limits)
                .map_err(|e| EndpointError::Protocol(e.to_string()))?
            {
                return Ok(frame);
            }

            let n = self
                .stream
                .read_buf(&mut self.buf)
                .await
                .map_err(|e| EndpointError::Connection(e.to_string()))?;
            if n == 0 {
                return Err(EndpointError::Connection(
                    "connection closed by server".to_string(),
                ));
            }
        }
    }
}

/// A checked-out connection. Dropped on release unless a request completed
/// on it, so a request abandoned mid-flight never leaves its reply behind
/// for the next caller.
struct PooledConnection<'a> {
    conn: Option<RespConnection>,
    reusable: bool,
    idle: &'a Mutex<Vec<RespConnection>>,
    _permit: SemaphorePermit<'a>,
}

impl PooledConnection<'_> {
    /// Every reply has been read; the connection may go back to the pool.
    fn mark_reusable(&mut self) {
        self.reusable = true;
    }
}

impl Drop for PooledConnection<'_> {
    fn drop(&mut self) {
        match self.conn.take() {
            Some(conn) if self.reusable => self.idle.lock().push(conn),
            _ => {}
        }
    }
}

// ── Endpoint ────────────────────────────────────────────────────────────

/// A Redis-compatible server reached over TCP.
pub struct RespEndpoint {
    name: String,
    addr: EndpointAddr,
    options: RespOptions,
    idle: Mutex<Vec<RespConnection>>,
    permits: Semaphore,
}

impl RespEndpoint {
    /// Create an endpoint without touching the network. Connections are
    /// opened on first use.
    pub fn new(name: impl Into<String>, addr: EndpointAddr, options: RespOptions) -> Self {
        let permits = Semaphore::new(options.max_connections.max(1));
        Self {
            name: name.into(),
            addr,
            options,
            idle: Mutex::new(Vec::new()),
            permits,
        }
    }

    /// Create an endpoint and verify it answers `PING`.
    pub async fn connect(
        name: impl Into<String>,
        addr: EndpointAddr,
        options: RespOptions,
    ) -> EndpointResult<Self> {
        let endpoint = Self::new(name, addr, options);
        endpoint.ping().await?;
        debug!(endpoint = %endpoint.name, addr = %endpoint.addr, "Connected");
        Ok(endpoint)
    }

    /// Server address (credentials masked on display)
    pub fn addr(&self) -> &EndpointAddr {
        &self.addr
    }

    /// Connections currently parked in the pool
    pub fn idle_connections(&self) -> usize {
        self.idle.lock().len()
    }

    async fn checkout(&self) -> EndpointResult<PooledConnection<'_>> {
        let permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| EndpointError::Connection("connection pool closed".to_string()))?;

        let parked = self.idle.lock().pop();
        let conn = match parked {
            Some(conn) => conn,
            None => self.open().await?,
        };

        Ok(PooledConnection {
            conn: Some(conn),
            reusable: false,
            idle: &self.idle,
            _permit: permit,
        })
    }

    async fn open(&self) -> EndpointResult<RespConnection> {
        trace!(endpoint = %self.name, addr = %self.addr, "Opening connection");
        tokio::time::timeout(self.options.connect_timeout, RespConnection::open(&self.addr))
            .await
            .map_err(|_| {
                EndpointError::Timeout(format!(
                    "connecting to {} after {:?}",
                    self.addr, self.options.connect_timeout
                ))
            })?
    }

    /// Send `frames` in one write and read exactly as many replies.
    /// Error replies are returned as frames, not as errors.
    async fn execute(&self, frames: Vec<Frame>, label: &str) -> EndpointResult<Vec<Frame>> {
        let mut pooled = self.checkout().await?;
        let Some(conn) = pooled.conn.as_mut() else {
            return Err(EndpointError::Connection(
                "pooled connection missing".to_string(),
            ));
        };

        let expected = frames.len();
        let result = tokio::time::timeout(self.options.request_timeout, async {
            conn.write_frames(&frames).await?;
            let mut replies = Vec::with_capacity(expected);
            for _ in 0..expected {
                replies.push(conn.read_reply().await?);
            }
            Ok::<_, EndpointError>(replies)
        })
        .await;

        match result {
            Ok(Ok(replies)) => {
                pooled.mark_reusable();
                Ok(replies)
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(EndpointError::Timeout(format!(
                "{} on {} after {:?}",
                label, self.name, self.options.request_timeout
            ))),
        }
    }

    /// Run one command. Error replies become [`EndpointError::Server`].
    async fn call(&self, frame: Frame, label: &str) -> EndpointResult<Frame> {
        let reply = self
            .execute(vec![frame], label)
            .await?
            .pop()
            .ok_or_else(|| EndpointError::Protocol(format!("{}: no reply", label)))?;

        match reply.error_message() {
            Some(msg) => Err(EndpointError::Server(msg)),
            None => Ok(reply),
        }
    }
}

fn restore_command(key: &Key, value: &SerializedValue, ttl: TimeToLive, replace: bool) -> Frame {
    let mut args = vec![
        key.as_bytes().clone(),
        Bytes::from(ttl.restore_millis().to_string()),
        value.as_bytes().clone(),
    ];
    if replace {
        args.push(Bytes::from_static(b"REPLACE"));
    }
    Frame::command("RESTORE", args)
}

fn expect_integer(reply: &Frame, label: &str) -> EndpointResult<i64> {
    reply
        .as_integer()
        .ok_or_else(|| EndpointError::Protocol(format!("{}: expected integer, got {:?}", label, reply)))
}

fn expect_ok(reply: &Frame, label: &str) -> EndpointResult<()> {
    match reply {
        Frame::Simple(_) => Ok(()),
        other => Err(EndpointError::Protocol(format!(
            "{}: expected status reply, got {:?}",
            label, other
        ))),
    }
}

fn key_list(reply: Frame, label: &str) -> EndpointResult<Vec<Key>> {
    let items = match reply {
        Frame::Array(Some(items)) => items,
        Frame::Array(None) | Frame::Null => Vec::new(),
        other => {
            return Err(EndpointError::Protocol(format!(
                "{}: expected array, got {:?}",
                label, other
            )))
        }
    };

    items
        .into_iter()
        .map(|item| {
            item.into_bytes()
                .map(Key::new)
                .ok_or_else(|| EndpointError::Protocol(format!("{}: non-string key", label)))
        })
        .collect()
}

#[async_trait]
impl Endpoint for RespEndpoint {
    fn name(&self) -> &str {
        &self.name
    }

    async fn ping(&self) -> EndpointResult<()> {
        let reply = self.call(Frame::command("PING", NO_ARGS), "PING").await?;
        match reply.as_str() {
            Some(s) if s.eq_ignore_ascii_case("PONG") => Ok(()),
            _ => Err(EndpointError::Protocol(format!(
                "PING: unexpected reply {:?}",
                reply
            ))),
        }
    }

    async fn count(&self) -> EndpointResult<u64> {
        let reply = self.call(Frame::command("DBSIZE", NO_ARGS), "DBSIZE").await?;
        let n = expect_integer(&reply, "DBSIZE")?;
        u64::try_from(n).map_err(|_| EndpointError::Protocol(format!("DBSIZE: negative count {}", n)))
    }

    async fn clear(&self) -> EndpointResult<()> {
        let reply = self.call(Frame::command("FLUSHALL", NO_ARGS), "FLUSHALL").await?;
        expect_ok(&reply, "FLUSHALL")
    }

    async fn list_keys(&self, pattern: &str) -> EndpointResult<Vec<Key>> {
        let cmd = Frame::command("KEYS", [Bytes::copy_from_slice(pattern.as_bytes())]);
        let reply = self.call(cmd, "KEYS").await?;
        key_list(reply, "KEYS")
    }

    async fn scan_keys(
        &self,
        cursor: u64,
        pattern: &str,
        count: u64,
    ) -> EndpointResult<(u64, Vec<Key>)> {
        let cmd = Frame::command(
            "SCAN",
            [
                Bytes::from(cursor.to_string()),
                Bytes::from_static(b"MATCH"),
                Bytes::copy_from_slice(pattern.as_bytes()),
                Bytes::from_static(b"COUNT"),
                Bytes::from(count.to_string()),
            ],
        );
        let reply = self.call(cmd, "SCAN").await?;

        let mut parts = reply
            .into_array()
            .filter(|parts| parts.len() == 2)
            .ok_or_else(|| EndpointError::Protocol("SCAN: expected [cursor, keys]".to_string()))?;
        let keys = key_list(parts.pop().unwrap_or(Frame::Null), "SCAN")?;
        let next = parts
            .pop()
            .and_then(|c| c.as_str().and_then(|s| s.parse::<u64>().ok()))
            .ok_or_else(|| EndpointError::Protocol("SCAN: invalid cursor".to_string()))?;

        Ok((next, keys))
    }

    async fn exists(&self, key: &Key) -> EndpointResult<bool> {
        let reply = self
            .call(Frame::command("EXISTS", [key.as_bytes().clone()]), "EXISTS")
            .await?;
        Ok(expect_integer(&reply, "EXISTS")? > 0)
    }

    async fn dump(&self, key: &Key) -> EndpointResult<SerializedValue> {
        let reply = self
            .call(Frame::command("DUMP", [key.as_bytes().clone()]), "DUMP")
            .await?;
        if reply.is_null() {
            return Err(EndpointError::NotFound(key.clone()));
        }
        reply
            .into_bytes()
            .map(SerializedValue::new)
            .ok_or_else(|| EndpointError::Protocol("DUMP: expected bulk string".to_string()))
    }

    async fn ttl(&self, key: &Key) -> EndpointResult<TimeToLive> {
        let reply = self
            .call(Frame::command("PTTL", [key.as_bytes().clone()]), "PTTL")
            .await?;
        let millis = expect_integer(&reply, "PTTL")?;
        TimeToLive::from_pttl(millis).ok_or_else(|| EndpointError::NotFound(key.clone()))
    }

    async fn restore(
        &self,
        key: &Key,
        value: &SerializedValue,
        ttl: TimeToLive,
        replace: bool,
    ) -> EndpointResult<()> {
        let reply = self
            .call(restore_command(key, value, ttl, replace), "RESTORE")
            .await?;
        expect_ok(&reply, "RESTORE")
    }

    async fn restore_batch(&self, intents: Vec<WriteIntent>) -> EndpointResult<FlushOutcome> {
        let mut outcome = FlushOutcome::default();
        let chunk_size = self.options.pipeline_batch.max(1);

        for chunk in intents.chunks(chunk_size) {
            let frames = chunk
                .iter()
                .map(|i| restore_command(&i.key, &i.value, i.ttl, true))
                .collect();
            let replies = self.execute(frames, "RESTORE pipeline").await?;

            for (intent, reply) in chunk.iter().zip(replies) {
                match reply.error_message() {
                    None => outcome.applied += 1,
                    Some(reason) => {
                        warn!(key = %intent.key, %reason, "Destination rejected key");
                        outcome.rejected.push(KeyFailure {
                            key: intent.key.clone(),
                            stage: FailureStage::Restore,
                            reason,
                        });
                    }
                }
            }
            debug!(
                endpoint = %self.name,
                chunk = chunk.len(),
                applied = outcome.applied,
                "Pipeline chunk flushed"
            );
        }

        Ok(outcome)
    }
}
