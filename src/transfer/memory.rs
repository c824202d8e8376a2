//! In-process endpoint
//!
//! A `HashMap` behind a `parking_lot::RwLock`, with the same observable
//! semantics as a real server for every [`Endpoint`] operation. Values are
//! stored as their dump payload, so a `dump` from one `MemoryEndpoint`
//! restores verbatim into another. Expired entries behave as absent.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;

use super::endpoint::{Endpoint, EndpointError, EndpointResult, Key, SerializedValue, TimeToLive};

#[derive(Debug, Clone)]
struct Entry {
    value: Bytes,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| at > now)
    }

    fn ttl(&self, now: Instant) -> TimeToLive {
        match self.expires_at {
            None => TimeToLive::Persistent,
            Some(at) => TimeToLive::Expires(at.saturating_duration_since(now)),
        }
    }
}

fn deadline(ttl: TimeToLive) -> Option<Instant> {
    match ttl {
        TimeToLive::Persistent => None,
        TimeToLive::Expires(d) => Some(Instant::now() + d),
    }
}

/// An in-memory store implementing [`Endpoint`].
pub struct MemoryEndpoint {
    name: String,
    entries: RwLock<HashMap<Key, Entry>>,
}

impl MemoryEndpoint {
    /// Create an empty store
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Insert or overwrite a key
    pub fn insert(&self, key: impl Into<Key>, value: impl Into<Bytes>, ttl: TimeToLive) {
        self.entries.write().insert(
            key.into(),
            Entry {
                value: value.into(),
                expires_at: deadline(ttl),
            },
        );
    }

    /// Delete a key, returning whether it was live
    pub fn remove(&self, key: &Key) -> bool {
        self.entries
            .write()
            .remove(key)
            .is_some_and(|e| e.is_live(Instant::now()))
    }

    /// Value and remaining TTL of a live key
    pub fn get(&self, key: &Key) -> Option<(Bytes, TimeToLive)> {
        let now = Instant::now();
        self.entries
            .read()
            .get(key)
            .filter(|e| e.is_live(now))
            .map(|e| (e.value.clone(), e.ttl(now)))
    }

    /// Number of live keys
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries.read().values().filter(|e| e.is_live(now)).count()
    }

    /// Whether there are no live keys
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Live keys in sorted order
    pub fn keys(&self) -> Vec<Key> {
        let now = Instant::now();
        let mut keys: Vec<Key> = self
            .entries
            .read()
            .iter()
            .filter(|(_, e)| e.is_live(now))
            .map(|(k, _)| k.clone())
            .collect();
        keys.sort();
        keys
    }

    fn matching_keys(&self, pattern: &str) -> Vec<Key> {
        let pattern = pattern.as_bytes();
        self.keys()
            .into_iter()
            .filter(|k| glob_match(pattern, k.as_bytes()))
            .collect()
    }
}

#[async_trait]
impl Endpoint for MemoryEndpoint {
    fn name(&self) -> &str {
        &self.name
    }

    async fn ping(&self) -> EndpointResult<()> {
        Ok(())
    }

    async fn count(&self) -> EndpointResult<u64> {
        Ok(self.len() as u64)
    }

    async fn clear(&self) -> EndpointResult<()> {
        self.entries.write().clear();
        Ok(())
    }

    async fn list_keys(&self, pattern: &str) -> EndpointResult<Vec<Key>> {
        Ok(self.matching_keys(pattern))
    }

    async fn scan_keys(
        &self,
        cursor: u64,
        pattern: &str,
        count: u64,
    ) -> EndpointResult<(u64, Vec<Key>)> {
        // The cursor is an offset into the sorted key space, filtered after
        // slicing like the server does.
        let keys = self.keys();
        let start = (cursor as usize).min(keys.len());
        let end = start.saturating_add(count.max(1) as usize).min(keys.len());
        let next = if end >= keys.len() { 0 } else { end as u64 };

        let pattern = pattern.as_bytes();
        let page = keys[start..end]
            .iter()
            .filter(|k| glob_match(pattern, k.as_bytes()))
            .cloned()
            .collect();
        Ok((next, page))
    }

    async fn exists(&self, key: &Key) -> EndpointResult<bool> {
        Ok(self.get(key).is_some())
    }

    async fn dump(&self, key: &Key) -> EndpointResult<SerializedValue> {
        self.get(key)
            .map(|(value, _)| SerializedValue::new(value))
            .ok_or_else(|| EndpointError::NotFound(key.clone()))
    }

    async fn ttl(&self, key: &Key) -> EndpointResult<TimeToLive> {
        self.get(key)
            .map(|(_, ttl)| ttl)
            .ok_or_else(|| EndpointError::NotFound(key.clone()))
    }

    async fn restore(
        &self,
        key: &Key,
        value: &SerializedValue,
        ttl: TimeToLive,
        replace: bool,
    ) -> EndpointResult<()> {
        let mut entries = self.entries.write();
        let now = Instant::now();
        if !replace && entries.get(key).is_some_and(|e| e.is_live(now)) {
            return Err(EndpointError::Server(
                "BUSYKEY Target key name already exists.".to_string(),
            ));
        }
        let expires_at = match ttl {
            TimeToLive::Persistent => None,
            TimeToLive::Expires(_) => Some(now + Duration::from_millis(ttl.restore_millis())),
        };
        entries.insert(
            key.clone(),
            Entry {
                value: value.as_bytes().clone(),
                expires_at,
            },
        );
        Ok(())
    }
}

/// Redis-style glob matching: `*`, `?`, `[abc]`, `[^a-z]`, and `\` escapes.
pub fn glob_match(pattern: &[u8], subject: &[u8]) -> bool {
    let (mut p, mut s) = (0usize, 0usize);
    // Position to resume from after the most recent '*'
    let mut backtrack: Option<(usize, usize)> = None;

    while s < subject.len() {
        if p < pattern.len() {
            match pattern[p] {
                b'*' => {
                    while p < pattern.len() && pattern[p] == b'*' {
                        p += 1;
                    }
                    if p == pattern.len() {
                        return true;
                    }
                    backtrack = Some((p, s));
                    continue;
                }
                b'?' => {
                    p += 1;
                    s += 1;
                    continue;
                }
                b'[' => {
                    if let Some((matched, next)) = match_class(pattern, p, subject[s]) {
                        if matched {
                            p = next;
                            s += 1;
                            continue;
                        }
                    } else if subject[s] == b'[' {
                        // Unterminated class is a literal '['
                        p += 1;
                        s += 1;
                        continue;
                    }
                }
                b'\\' if p + 1 < pattern.len() => {
                    if pattern[p + 1] == subject[s] {
                        p += 2;
                        s += 1;
                        continue;
                    }
                }
                c => {
                    if c == subject[s] {
                        p += 1;
                        s += 1;
                        continue;
                    }
                }
            }
        }

        match backtrack {
            Some((bp, bs)) => {
                p = bp;
                s = bs + 1;
                backtrack = Some((bp, bs + 1));
            }
            None => return false,
        }
    }

    pattern[p..].iter().all(|&c| c == b'*')
}

/// Match `c` against the class starting at `pattern[start] == b'['`.
/// Returns whether it matched and the index just past the closing `]`, or
/// `None` if the class is unterminated.
fn match_class(pattern: &[u8], start: usize, c: u8) -> Option<(bool, usize)> {
    let mut i = start + 1;
    let negate = pattern.get(i) == Some(&b'^');
    if negate {
        i += 1;
    }

    let mut matched = false;
    let mut first = true;
    while i < pattern.len() {
        let b = pattern[i];
        if b == b']' && !first {
            return Some((matched != negate, i + 1));
        }
        first = false;

        if b == b'\\' && i + 1 < pattern.len() {
            matched |= pattern[i + 1] == c;
            i += 2;
        } else if i + 2 < pattern.len() && pattern[i + 1] == b'-' && pattern[i + 2] != b']' {
            let (lo, hi) = if b <= pattern[i + 2] {
                (b, pattern[i + 2])
            } else {
                (pattern[i + 2], b)
            };
            matched |= (lo..=hi).contains(&c);
            i += 3;
        } else {
            matched |= b == c;
            i += 1;
        }
    }
    None
}
