//! Shared test utilities for keyshift integration tests.
//!
//! Import via `mod common;` in integration test files:
//! ```rust,ignore
//! mod common;
//! use common::*;
//! ```

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

use keyshift::protocol::{encode_frame, parse_frame, Frame};
use keyshift::transfer::{
    Endpoint, EndpointError, EndpointResult, FlushOutcome, Key, MemoryEndpoint, SerializedValue,
    TimeToLive, WriteIntent,
};

// ============================================================================
// Store helpers
// ============================================================================

/// A memory store holding `n` persistent keys `key:0 .. key:{n-1}`.
#[allow(dead_code)]
pub fn populated_store(name: &str, n: usize) -> Arc<MemoryEndpoint> {
    let store = MemoryEndpoint::new(name);
    for i in 0..n {
        store.insert(format!("key:{}", i), format!("value:{}", i), TimeToLive::Persistent);
    }
    Arc::new(store)
}

// ============================================================================
// Fault-injecting endpoint
// ============================================================================

/// Wraps a [`MemoryEndpoint`] and injects failures on selected keys.
#[allow(dead_code)]
pub struct FaultyEndpoint {
    inner: Arc<MemoryEndpoint>,
    /// Deleted from the store right after `list_keys` reports them
    vanish_after_list: Mutex<HashSet<Key>>,
    /// Deleted right after `exists` reports them present
    vanish_after_exists: Mutex<HashSet<Key>>,
    /// `dump` fails with a connection error
    fail_dump: Mutex<HashSet<Key>>,
    /// `ttl` fails with a timeout
    fail_ttl: Mutex<HashSet<Key>>,
    /// `list_keys` reports every key twice
    duplicate_listing: Mutex<bool>,
    /// `list_keys` fails
    fail_list: Mutex<bool>,
    /// `clear` fails
    fail_clear: Mutex<bool>,
    /// `count` fails
    fail_count: Mutex<bool>,
    /// `restore_batch` fails with a connection error
    fail_flush: Mutex<bool>,
    /// `restore_batch` silently drops this many intents
    drop_on_flush: AtomicUsize,
    /// Artificial latency per `dump`
    dump_delay: Mutex<Option<Duration>>,
    /// Artificial latency per `ttl`, applied before the store is read
    ttl_delay: Mutex<Option<Duration>>,
    pub dump_calls: AtomicU64,
    pub clear_calls: AtomicU64,
    pub flush_calls: AtomicU64,
}

#[allow(dead_code)]
impl FaultyEndpoint {
    pub fn new(inner: Arc<MemoryEndpoint>) -> Self {
        Self {
            inner,
            vanish_after_list: Mutex::new(HashSet::new()),
            vanish_after_exists: Mutex::new(HashSet::new()),
            fail_dump: Mutex::new(HashSet::new()),
            fail_ttl: Mutex::new(HashSet::new()),
            duplicate_listing: Mutex::new(false),
            fail_list: Mutex::new(false),
            fail_clear: Mutex::new(false),
            fail_count: Mutex::new(false),
            fail_flush: Mutex::new(false),
            drop_on_flush: AtomicUsize::new(0),
            dump_delay: Mutex::new(None),
            ttl_delay: Mutex::new(None),
            dump_calls: AtomicU64::new(0),
            clear_calls: AtomicU64::new(0),
            flush_calls: AtomicU64::new(0),
        }
    }

    pub fn store(&self) -> &MemoryEndpoint {
        &self.inner
    }

    pub fn vanish_after_list(self, key: &str) -> Self {
        self.vanish_after_list.lock().insert(Key::from(key.to_string()));
        self
    }

    pub fn vanish_after_exists(self, key: &str) -> Self {
        self.vanish_after_exists
            .lock()
            .insert(Key::from(key.to_string()));
        self
    }

    pub fn fail_dump(self, key: &str) -> Self {
        self.fail_dump.lock().insert(Key::from(key.to_string()));
        self
    }

    pub fn fail_ttl(self, key: &str) -> Self {
        self.fail_ttl.lock().insert(Key::from(key.to_string()));
        self
    }

    pub fn duplicate_listing(self) -> Self {
        *self.duplicate_listing.lock() = true;
        self
    }

    pub fn fail_list(self) -> Self {
        *self.fail_list.lock() = true;
        self
    }

    pub fn fail_clear(self) -> Self {
        *self.fail_clear.lock() = true;
        self
    }

    pub fn fail_count(&self, fail: bool) {
        *self.fail_count.lock() = fail;
    }

    pub fn fail_flush(self) -> Self {
        *self.fail_flush.lock() = true;
        self
    }

    pub fn drop_on_flush(self, n: usize) -> Self {
        self.drop_on_flush.store(n, Ordering::SeqCst);
        self
    }

    pub fn dump_delay(self, delay: Duration) -> Self {
        *self.dump_delay.lock() = Some(delay);
        self
    }

    pub fn ttl_delay(self, delay: Duration) -> Self {
        *self.ttl_delay.lock() = Some(delay);
        self
    }
}

#[async_trait]
impl Endpoint for FaultyEndpoint {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn ping(&self) -> EndpointResult<()> {
        self.inner.ping().await
    }

    async fn count(&self) -> EndpointResult<u64> {
        if *self.fail_count.lock() {
            return Err(EndpointError::Connection("injected count failure".into()));
        }
        self.inner.count().await
    }

    async fn clear(&self) -> EndpointResult<()> {
        self.clear_calls.fetch_add(1, Ordering::SeqCst);
        if *self.fail_clear.lock() {
            return Err(EndpointError::Server("ERR injected clear failure".into()));
        }
        self.inner.clear().await
    }

    async fn list_keys(&self, pattern: &str) -> EndpointResult<Vec<Key>> {
        if *self.fail_list.lock() {
            return Err(EndpointError::Timeout("KEYS".into()));
        }
        let mut keys = self.inner.list_keys(pattern).await?;
        for key in self.vanish_after_list.lock().iter() {
            self.inner.remove(key);
        }
        if *self.duplicate_listing.lock() {
            let copy = keys.clone();
            keys.extend(copy);
        }
        Ok(keys)
    }

    async fn scan_keys(
        &self,
        cursor: u64,
        pattern: &str,
        count: u64,
    ) -> EndpointResult<(u64, Vec<Key>)> {
        self.inner.scan_keys(cursor, pattern, count).await
    }

    async fn exists(&self, key: &Key) -> EndpointResult<bool> {
        let present = self.inner.exists(key).await?;
        if present && self.vanish_after_exists.lock().contains(key) {
            self.inner.remove(key);
        }
        Ok(present)
    }

    async fn dump(&self, key: &Key) -> EndpointResult<SerializedValue> {
        self.dump_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.dump_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_dump.lock().contains(key) {
            return Err(EndpointError::Connection("injected dump failure".into()));
        }
        self.inner.dump(key).await
    }

    async fn ttl(&self, key: &Key) -> EndpointResult<TimeToLive> {
        let delay = *self.ttl_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_ttl.lock().contains(key) {
            return Err(EndpointError::Timeout("PTTL".into()));
        }
        self.inner.ttl(key).await
    }

    async fn restore(
        &self,
        key: &Key,
        value: &SerializedValue,
        ttl: TimeToLive,
        replace: bool,
    ) -> EndpointResult<()> {
        self.inner.restore(key, value, ttl, replace).await
    }

    async fn restore_batch(&self, mut intents: Vec<WriteIntent>) -> EndpointResult<FlushOutcome> {
        self.flush_calls.fetch_add(1, Ordering::SeqCst);
        if *self.fail_flush.lock() {
            return Err(EndpointError::Connection("injected flush failure".into()));
        }
        let dropped = self.drop_on_flush.load(Ordering::SeqCst).min(intents.len());
        intents.drain(..dropped);
        let mut outcome = self.inner.restore_batch(intents).await?;
        // Lost writes are reported as applied
        outcome.applied += dropped as u64;
        Ok(outcome)
    }
}

// ============================================================================
// Mock RESP server
// ============================================================================

/// Payload the mock server refuses to restore
#[allow(dead_code)]
pub const CORRUPT_PAYLOAD: &[u8] = b"corrupt";

/// A minimal Redis-compatible server backed by a [`MemoryEndpoint`].
///
/// Supports PING, AUTH, DBSIZE, FLUSHALL, KEYS, SCAN, EXISTS, DUMP, PTTL and
/// RESTORE. Commands named in `stall` are read but never answered; those in
/// `slow` are answered after `slow_delay`.
#[allow(dead_code)]
pub struct MockServer {
    pub addr: String,
    pub store: Arc<MemoryEndpoint>,
    pub connections: Arc<AtomicU64>,
    handle: JoinHandle<()>,
}

#[allow(dead_code)]
#[derive(Clone, Default)]
pub struct MockOptions {
    pub password: Option<String>,
    pub stall: Vec<&'static str>,
    pub slow: Vec<&'static str>,
    pub slow_delay: Duration,
}

#[allow(dead_code)]
impl MockServer {
    pub async fn start() -> Self {
        Self::start_with(MockOptions::default()).await
    }

    pub async fn start_with(options: MockOptions) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("should bind to random port");
        let addr = listener
            .local_addr()
            .expect("should have local addr")
            .to_string();
        let store = Arc::new(MemoryEndpoint::new("mock"));
        let connections = Arc::new(AtomicU64::new(0));

        let handle = {
            let store = store.clone();
            let connections = connections.clone();
            tokio::spawn(async move {
                while let Ok((socket, _)) = listener.accept().await {
                    connections.fetch_add(1, Ordering::SeqCst);
                    let store = store.clone();
                    let options = options.clone();
                    tokio::spawn(async move {
                        let _ = serve(socket, store, options).await;
                    });
                }
            })
        };

        Self {
            addr,
            store,
            connections,
            handle,
        }
    }

    /// Connection string with an optional password
    pub fn url(&self, password: Option<&str>) -> String {
        match password {
            Some(p) => format!("redis://:{}@{}", p, self.addr),
            None => format!("redis://{}", self.addr),
        }
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn serve(
    mut socket: TcpStream,
    store: Arc<MemoryEndpoint>,
    options: MockOptions,
) -> std::io::Result<()> {
    let mut buf = BytesMut::with_capacity(4096);
    let mut authed = options.password.is_none();

    loop {
        while let Ok(Some(frame)) = parse_frame(&mut buf) {
            let args: Vec<Bytes> = frame
                .into_array()
                .unwrap_or_default()
                .into_iter()
                .filter_map(Frame::into_bytes)
                .collect();
            let name = args
                .first()
                .map(|a| String::from_utf8_lossy(a).to_ascii_uppercase())
                .unwrap_or_default();

            if options.stall.iter().any(|s| *s == name) {
                continue;
            }
            if options.slow.iter().any(|s| *s == name) {
                tokio::time::sleep(options.slow_delay).await;
            }

            let reply = if name == "AUTH" {
                let given = args.last().map(|a| String::from_utf8_lossy(a).into_owned());
                if given == options.password {
                    authed = true;
                    Frame::simple("OK")
                } else {
                    Frame::error("WRONGPASS invalid username-password pair")
                }
            } else if !authed {
                Frame::error("NOAUTH Authentication required.")
            } else {
                execute(&store, &name, &args[1.min(args.len())..]).await
            };

            let mut out = BytesMut::new();
            encode_frame(&reply, &mut out);
            socket.write_all(&out).await?;
        }

        if socket.read_buf(&mut buf).await? == 0 {
            return Ok(());
        }
    }
}

fn arg_str(args: &[Bytes], i: usize) -> String {
    args.get(i)
        .map(|a| String::from_utf8_lossy(a).into_owned())
        .unwrap_or_default()
}

async fn execute(store: &MemoryEndpoint, name: &str, args: &[Bytes]) -> Frame {
    let key = || Key::new(args.first().cloned().unwrap_or_default());

    match name {
        "PING" => Frame::simple("PONG"),
        "DBSIZE" => Frame::Integer(store.len() as i64),
        "FLUSHALL" => {
            let _ = store.clear().await;
            Frame::simple("OK")
        }
        "KEYS" => {
            let keys = store.list_keys(&arg_str(args, 0)).await.unwrap_or_default();
            Frame::array(keys.into_iter().map(|k| Frame::bulk(k.into_bytes())).collect())
        }
        "SCAN" => {
            let cursor = arg_str(args, 0).parse().unwrap_or(0);
            let mut pattern = "*".to_string();
            let mut count = 10;
            let mut i = 1;
            while i + 1 < args.len() {
                match arg_str(args, i).to_ascii_uppercase().as_str() {
                    "MATCH" => pattern = arg_str(args, i + 1),
                    "COUNT" => count = arg_str(args, i + 1).parse().unwrap_or(10),
                    _ => {}
                }
                i += 2;
            }
            let (next, keys) = store
                .scan_keys(cursor, &pattern, count)
                .await
                .unwrap_or_default();
            Frame::array(vec![
                Frame::bulk(next.to_string()),
                Frame::array(keys.into_iter().map(|k| Frame::bulk(k.into_bytes())).collect()),
            ])
        }
        "EXISTS" => Frame::Integer(i64::from(store.get(&key()).is_some())),
        "DUMP" => match store.get(&key()) {
            Some((value, _)) => Frame::bulk(value),
            None => Frame::null(),
        },
        "PTTL" => match store.get(&key()) {
            Some((_, TimeToLive::Persistent)) => Frame::Integer(-1),
            Some((_, TimeToLive::Expires(d))) => Frame::Integer(d.as_millis() as i64),
            None => Frame::Integer(-2),
        },
        "RESTORE" => {
            let ttl_ms: u64 = arg_str(args, 1).parse().unwrap_or(0);
            let payload = args.get(2).cloned().unwrap_or_default();
            let replace = arg_str(args, 3).eq_ignore_ascii_case("REPLACE");
            if payload.as_ref() == CORRUPT_PAYLOAD {
                return Frame::error("ERR DUMP payload version or checksum are wrong");
            }
            let ttl = if ttl_ms == 0 {
                TimeToLive::Persistent
            } else {
                TimeToLive::Expires(Duration::from_millis(ttl_ms))
            };
            match store
                .restore(&key(), &SerializedValue::new(payload), ttl, replace)
                .await
            {
                Ok(()) => Frame::simple("OK"),
                Err(EndpointError::Server(msg)) => Frame::error(msg),
                Err(e) => Frame::error(format!("ERR {}", e)),
            }
        }
        other => Frame::error(format!("ERR unknown command '{}'", other)),
    }
}
