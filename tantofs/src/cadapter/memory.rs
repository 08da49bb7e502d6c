//! In-process key-value backend (implements `KvConnector`).
//!
//! Every connection handed out by one `MemoryConnector` sees the same map, so
//! it behaves like many sockets to one server. Used by tests and by
//! `tantofs mount --memory`.

use super::{KvConnection, KvConnector, WireError, WireResult};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

type Map = BTreeMap<Vec<u8>, Bytes>;

#[derive(Clone, Default)]
pub struct MemoryConnector {
    map: Arc<Mutex<Map>>,
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys currently stored.
    pub fn len(&self) -> usize {
        lock(&self.map).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains_key(&self, key: &str) -> bool {
        lock(&self.map).contains_key(key.as_bytes())
    }

    /// Raw value of `key`, bypassing the connection API.
    pub fn value(&self, key: &str) -> Option<Bytes> {
        lock(&self.map).get(key.as_bytes()).cloned()
    }
}

#[async_trait]
impl KvConnector for MemoryConnector {
    type Connection = MemoryConnection;

    async fn connect(&self) -> WireResult<MemoryConnection> {
        Ok(MemoryConnection {
            map: Arc::clone(&self.map),
        })
    }
}

pub struct MemoryConnection {
    map: Arc<Mutex<Map>>,
}

#[async_trait]
impl KvConnection for MemoryConnection {
    async fn get(&mut self, key: &[u8], dst: &mut [u8]) -> WireResult<usize> {
        let map = lock(&self.map);
        let value = map.get(key).ok_or(WireError::NotFound)?;
        let n = value.len().min(dst.len());
        dst[..n].copy_from_slice(&value[..n]);
        Ok(n)
    }

    async fn set(&mut self, key: &[u8], value: &[u8]) -> WireResult<()> {
        lock(&self.map).insert(key.to_vec(), Bytes::copy_from_slice(value));
        Ok(())
    }

    async fn del(&mut self, key: &[u8]) -> WireResult<()> {
        lock(&self.map).remove(key);
        Ok(())
    }

    async fn keys(&mut self, pattern: &[u8], capacity: usize) -> WireResult<Vec<(Bytes, usize)>> {
        let map = lock(&self.map);
        Ok(map
            .keys()
            .filter(|k| glob_match(pattern, k))
            .map(|k| {
                let n = k.len().min(capacity);
                (Bytes::copy_from_slice(&k[..n]), k.len())
            })
            .collect())
    }
}

fn lock(map: &Mutex<Map>) -> MutexGuard<'_, Map> {
    map.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Redis-style glob: `*`, `?`, `[abc]`, `[^a-z]` and `\` escapes.
pub fn glob_match(pattern: &[u8], text: &[u8]) -> bool {
    let (mut p, mut t) = (0, 0);
    // position after the last `*` and the text index it is currently matched up to
    let mut backtrack: Option<(usize, usize)> = None;

    while t < text.len() {
        if p < pattern.len() {
            match pattern[p] {
                b'*' => {
                    backtrack = Some((p + 1, t));
                    p += 1;
                    continue;
                }
                b'?' => {
                    p += 1;
                    t += 1;
                    continue;
                }
                b'[' => {
                    if let Some((matched, next)) = match_class(pattern, p, text[t]) {
                        if matched {
                            p = next;
                            t += 1;
                            continue;
                        }
                    }
                }
                b'\\' if p + 1 < pattern.len() => {
                    if pattern[p + 1] == text[t] {
                        p += 2;
                        t += 1;
                        continue;
                    }
                }
                c => {
                    if c == text[t] {
                        p += 1;
                        t += 1;
                        continue;
                    }
                }
            }
        }
        match backtrack {
            Some((star_p, star_t)) => {
                p = star_p;
                t = star_t + 1;
                backtrack = Some((star_p, star_t + 1));
            }
            None => return false,
        }
    }

    pattern[p..].iter().all(|&c| c == b'*')
}

/// Match `c` against the class starting at `pattern[open] == b'['`.
/// Returns whether it matched and the index just past the closing `]`, or
/// `None` for an unterminated class.
fn match_class(pattern: &[u8], open: usize, c: u8) -> Option<(bool, usize)> {
    let mut i = open + 1;
    let negate = pattern.get(i) == Some(&b'^');
    if negate {
        i += 1;
    }
    let mut matched = false;
    loop {
        let cur = *pattern.get(i)?;
        if cur == b']' {
            break;
        }
        if cur == b'\\' {
            i += 1;
            if *pattern.get(i)? == c {
                matched = true;
            }
            i += 1;
        } else if pattern.get(i + 1) == Some(&b'-') && pattern.get(i + 2).is_some_and(|&e| e != b']') {
            let (lo, hi) = (cur.min(pattern[i + 2]), cur.max(pattern[i + 2]));
            if (lo..=hi).contains(&c) {
                matched = true;
            }
            i += 3;
        } else {
            if cur == c {
                matched = true;
            }
            i += 1;
        }
    }
    Some((matched != negate, i + 1))
}
