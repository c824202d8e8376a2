//! Endpoint contract
//!
//! An [`Endpoint`] is one connected store, source or destination. The
//! transfer engine only ever talks to stores through this trait, so the
//! network client ([`RespEndpoint`](super::resp::RespEndpoint)) and the
//! in-process store ([`MemoryEndpoint`](super::memory::MemoryEndpoint)) are
//! interchangeable.
//!
//! Implementations must be safe to share across workers (`Send + Sync`) and
//! must bound every request in time.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Serialize, Serializer};

use super::report::{FailureStage, KeyFailure};

/// An opaque, binary-safe key.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Key(Bytes);

impl Key {
    /// Wrap raw key bytes
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Key(bytes.into())
    }

    /// Raw key bytes
    pub fn as_bytes(&self) -> &Bytes {
        &self.0
    }

    /// Consume into raw bytes
    pub fn into_bytes(self) -> Bytes {
        self.0
    }

    /// Key length in bytes
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the key is the empty byte string
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&String::from_utf8_lossy(&self.0))
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Key({:?})", String::from_utf8_lossy(&self.0))
    }
}

impl Serialize for Key {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&String::from_utf8_lossy(&self.0))
    }
}

impl From<&'static str> for Key {
    fn from(s: &'static str) -> Self {
        Key(Bytes::from_static(s.as_bytes()))
    }
}

impl From<String> for Key {
    fn from(s: String) -> Self {
        Key(Bytes::from(s))
    }
}

impl From<Vec<u8>> for Key {
    fn from(v: Vec<u8>) -> Self {
        Key(Bytes::from(v))
    }
}

impl From<Bytes> for Key {
    fn from(b: Bytes) -> Self {
        Key(b)
    }
}

/// A value in the store's native `DUMP` format. Never inspected, only
/// carried byte-for-byte from source to destination.
#[derive(Clone, PartialEq, Eq)]
pub struct SerializedValue(Bytes);

impl SerializedValue {
    /// Wrap a dump payload
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        SerializedValue(bytes.into())
    }

    /// Payload bytes
    pub fn as_bytes(&self) -> &Bytes {
        &self.0
    }

    /// Payload size in bytes
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the payload is empty
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for SerializedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SerializedValue({} bytes)", self.0.len())
    }
}

/// Remaining lifetime of a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeToLive {
    /// The key never expires
    Persistent,
    /// The key expires after this much time
    Expires(Duration),
}

impl TimeToLive {
    /// Interpret a `PTTL` reply. `-2` (no such key) yields `None`.
    pub fn from_pttl(millis: i64) -> Option<Self> {
        match millis {
            -2 => None,
            n if n < 0 => Some(TimeToLive::Persistent),
            n => Some(TimeToLive::Expires(Duration::from_millis(n as u64))),
        }
    }

    /// The `ttl` argument for `RESTORE`, where `0` means no expiry.
    ///
    /// A key with less than a millisecond left is restored with 1ms so it
    /// still expires instead of becoming persistent.
    pub fn restore_millis(&self) -> u64 {
        match self {
            TimeToLive::Persistent => 0,
            TimeToLive::Expires(d) => (d.as_millis() as u64).max(1),
        }
    }

    /// Whether the key has an expiry
    pub fn is_persistent(&self) -> bool {
        matches!(self, TimeToLive::Persistent)
    }
}

/// One key ready to be written to the destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteIntent {
    /// Destination key
    pub key: Key,
    /// Dump payload
    pub value: SerializedValue,
    /// Lifetime captured at fetch time
    pub ttl: TimeToLive,
}

/// Result of a bulk restore.
#[derive(Debug, Clone, Default)]
pub struct FlushOutcome {
    /// Writes the destination accepted
    pub applied: u64,
    /// Writes the destination answered with an error reply
    pub rejected: Vec<KeyFailure>,
}

/// Endpoint operation errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum EndpointError {
    /// The key does not exist (vanished or expired)
    #[error("key not found: {0}")]
    NotFound(Key),

    /// Could not connect or the connection broke
    #[error("connection error: {0}")]
    Connection(String),

    /// A request did not complete in time
    #[error("request timed out: {0}")]
    Timeout(String),

    /// The server sent something the client cannot interpret
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The server answered with an error reply
    #[error("server error: {0}")]
    Server(String),
}

impl EndpointError {
    /// Whether this error means the key is simply absent
    pub fn is_not_found(&self) -> bool {
        matches!(self, EndpointError::NotFound(_))
    }
}

/// Result alias for endpoint operations
pub type EndpointResult<T> = std::result::Result<T, EndpointError>;

/// One connected key-value store.
#[async_trait]
pub trait Endpoint: Send + Sync {
    /// Label used in logs and reports
    fn name(&self) -> &str;

    /// Reachability check (`PING`)
    async fn ping(&self) -> EndpointResult<()>;

    /// Total number of keys (`DBSIZE`)
    async fn count(&self) -> EndpointResult<u64>;

    /// Remove every key (`FLUSHALL`). Idempotent.
    async fn clear(&self) -> EndpointResult<()>;

    /// All keys matching a glob-style pattern (`KEYS`)
    async fn list_keys(&self, pattern: &str) -> EndpointResult<Vec<Key>>;

    /// One cursor step (`SCAN`). A returned cursor of 0 ends the iteration.
    /// Keys may be reported more than once across steps.
    async fn scan_keys(
        &self,
        cursor: u64,
        pattern: &str,
        count: u64,
    ) -> EndpointResult<(u64, Vec<Key>)>;

    /// Whether a key exists (`EXISTS`)
    async fn exists(&self, key: &Key) -> EndpointResult<bool>;

    /// Serialized value of a key (`DUMP`). [`EndpointError::NotFound`] if absent.
    #[doc(alias = "get")]
    async fn dump(&self, key: &Key) -> EndpointResult<SerializedValue>;

    /// Remaining lifetime of a key (`PTTL`). [`EndpointError::NotFound`] if absent.
    async fn ttl(&self, key: &Key) -> EndpointResult<TimeToLive>;

    /// Materialize a dumped value (`RESTORE`). With `replace`, existing data
    /// at the key is overwritten instead of failing.
    #[doc(alias = "put")]
    async fn restore(
        &self,
        key: &Key,
        value: &SerializedValue,
        ttl: TimeToLive,
        replace: bool,
    ) -> EndpointResult<()>;

    /// Apply many restores with replace semantics.
    ///
    /// An error reply for an individual write is recorded in
    /// [`FlushOutcome::rejected`]; any other error aborts the batch.
    async fn restore_batch(&self, intents: Vec<WriteIntent>) -> EndpointResult<FlushOutcome> {
        let mut outcome = FlushOutcome::default();
        for intent in intents {
            match self
                .restore(&intent.key, &intent.value, intent.ttl, true)
                .await
            {
                Ok(()) => outcome.applied += 1,
                Err(EndpointError::Server(reason)) => outcome.rejected.push(KeyFailure {
                    key: intent.key,
                    stage: FailureStage::Restore,
                    reason,
                }),
                Err(e) => return Err(e),
            }
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_display_is_lossy() {
        let key = Key::from(vec![b'k', 0xff, b'1']);
        assert_eq!(key.to_string(), "k\u{fffd}1");
        assert_eq!(key.len(), 3);
    }

    #[test]
    fn test_key_serializes_as_string() {
        let json = serde_json::to_string(&Key::from("user:1")).unwrap();
        assert_eq!(json, "\"user:1\"");
    }

    #[test]
    fn test_ttl_from_pttl() {
        assert_eq!(TimeToLive::from_pttl(-2), None);
        assert_eq!(TimeToLive::from_pttl(-1), Some(TimeToLive::Persistent));
        assert_eq!(
            TimeToLive::from_pttl(60_000),
            Some(TimeToLive::Expires(Duration::from_secs(60)))
        );
    }

    #[test]
    fn test_restore_millis() {
        assert_eq!(TimeToLive::Persistent.restore_millis(), 0);
        assert_eq!(
            TimeToLive::Expires(Duration::from_millis(1500)).restore_millis(),
            1500
        );
        // Must not turn into "no expiry"
        assert_eq!(TimeToLive::Expires(Duration::ZERO).restore_millis(), 1);
    }

    #[test]
    fn test_serialized_value_debug_hides_payload() {
        let value = SerializedValue::new(Bytes::from_static(b"\x00\x03abc"));
        assert_eq!(format!("{:?}", value), "SerializedValue(5 bytes)");
    }

    #[test]
    fn test_not_found_predicate() {
        assert!(EndpointError::NotFound(Key::from("a")).is_not_found());
        assert!(!EndpointError::Timeout("PTTL".into()).is_not_found());
    }
}
