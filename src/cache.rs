// SPDX-FileCopyrightText: 2025 Alexandre Gomes Gaigalas <alganet@gmail.com>
//
// SPDX-License-Identifier: ISC

//! Content-addressed memoization of expensive transforms.
//!
//! Entries are keyed by the SHA-256 of the raw input bytes, not of the
//! configuration, so one cache instance must only ever see a single active
//! configuration. Concurrent callers for a key that is still being computed
//! wait for the first computation instead of starting their own.

use crate::error::TransformError;
use bytes::Bytes;
use rand::Rng;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tracing::{debug, trace, warn};

/// Lower bound of [`jittered_ttl`].
pub const TTL_MIN: Duration = Duration::from_secs(120);
/// Upper bound of [`jittered_ttl`].
pub const TTL_MAX: Duration = Duration::from_secs(300);

/// A TTL drawn uniformly from `TTL_MIN..TTL_MAX` so entries created together
/// do not expire together.
pub fn jittered_ttl() -> Duration {
    let secs = rand::thread_rng().gen_range(TTL_MIN.as_secs_f64()..TTL_MAX.as_secs_f64());
    Duration::from_secs_f64(secs)
}

/// Source of "now" for expiry decisions.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<Instant>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            now: Mutex::new(Instant::now()),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

pub type ContentHash = [u8; 32];

pub fn content_hash(content: &[u8]) -> ContentHash {
    Sha256::digest(content).into()
}

type Outcome = Result<Bytes, String>;

enum Slot {
    Ready { value: Bytes, expires_at: Instant },
    Pending(broadcast::Sender<Outcome>),
}

enum Lookup {
    Hit(Bytes),
    Wait(broadcast::Receiver<Outcome>),
    Lead,
}

pub struct TransformCache {
    slots: Mutex<HashMap<ContentHash, Slot>>,
    clock: Arc<dyn Clock>,
    computations: AtomicU64,
    coalesced: AtomicU64,
}

impl TransformCache {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            clock,
            computations: AtomicU64::new(0),
            coalesced: AtomicU64::new(0),
        }
    }

    fn slots(&self) -> MutexGuard<'_, HashMap<ContentHash, Slot>> {
        self.slots.lock().unwrap_or_else(|e| {
            warn!("TransformCache lock poisoned, recovering");
            e.into_inner()
        })
    }

    /// Return the cached output for `content`, computing it when absent or
    /// expired. Failures are returned to every waiting caller and not stored.
    pub async fn memoize<F, Fut>(
        &self,
        content: Bytes,
        ttl: Duration,
        compute: F,
    ) -> Result<Bytes, TransformError>
    where
        F: FnOnce(Bytes) -> Fut,
        Fut: Future<Output = Result<Bytes, TransformError>>,
    {
        let key = content_hash(&content);
        loop {
            let lookup = {
                let mut slots = self.slots();
                let now = self.clock.now();
                let lookup = match slots.get(&key) {
                    Some(Slot::Ready { value, expires_at }) if *expires_at > now => {
                        Lookup::Hit(value.clone())
                    }
                    Some(Slot::Pending(tx)) => Lookup::Wait(tx.subscribe()),
                    _ => Lookup::Lead,
                };
                if let Lookup::Lead = lookup {
                    let (tx, _) = broadcast::channel(1);
                    slots.insert(key, Slot::Pending(tx));
                }
                lookup
            };

            match lookup {
                Lookup::Hit(value) => {
                    trace!(key = %hex::encode(&key[..8]), "transform cache hit");
                    return Ok(value);
                }
                Lookup::Wait(mut rx) => {
                    self.coalesced.fetch_add(1, Ordering::Relaxed);
                    debug!(key = %hex::encode(&key[..8]), "waiting for in-flight transform");
                    match rx.recv().await {
                        Ok(Ok(value)) => return Ok(value),
                        Ok(Err(msg)) => return Err(TransformError::Coalesced(msg)),
                        // Leader was dropped before finishing; take over.
                        Err(_) => continue,
                    }
                }
                Lookup::Lead => break,
            }
        }

        let guard = PendingGuard {
            cache: self,
            key,
            armed: true,
        };
        self.computations.fetch_add(1, Ordering::Relaxed);
        let result = compute(content).await;
        guard.complete(&result, ttl);
        result
    }

    /// Drop expired entries. Pending computations are left alone.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let mut slots = self.slots();
        let before = slots.len();
        slots.retain(|_, slot| match slot {
            Slot::Ready { expires_at, .. } => *expires_at > now,
            Slot::Pending(_) => true,
        });
        let removed = before - slots.len();
        if removed > 0 {
            debug!(removed, "purged expired transform cache entries");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.slots().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// How many times a compute closure has been started.
    pub fn computations(&self) -> u64 {
        self.computations.load(Ordering::Relaxed)
    }

    /// How many callers waited on another caller's computation.
    pub fn coalesced(&self) -> u64 {
        self.coalesced.load(Ordering::Relaxed)
    }
}

impl Default for TransformCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Owns the pending slot of a leader; releases it if the leader is dropped.
struct PendingGuard<'a> {
    cache: &'a TransformCache,
    key: ContentHash,
    armed: bool,
}

impl PendingGuard<'_> {
    fn complete(mut self, result: &Result<Bytes, TransformError>, ttl: Duration) {
        self.armed = false;
        let previous = {
            let mut slots = self.cache.slots();
            match result {
                Ok(value) => slots.insert(
                    self.key,
                    Slot::Ready {
                        value: value.clone(),
                        expires_at: self.cache.clock.now() + ttl,
                    },
                ),
                Err(_) => slots.remove(&self.key),
            }
        };
        if let Some(Slot::Pending(tx)) = previous {
            let outcome = match result {
                Ok(value) => Ok(value.clone()),
                Err(e) => Err(e.to_string()),
            };
            // No receivers is fine.
            let _ = tx.send(outcome);
        }
    }
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut slots = self.cache.slots();
        if let Some(Slot::Pending(_)) = slots.get(&self.key) {
            slots.remove(&self.key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn upper(content: Bytes) -> impl Future<Output = Result<Bytes, TransformError>> {
        async move { Ok(Bytes::from(content.to_ascii_uppercase())) }
    }

    #[tokio::test]
    async fn second_call_within_ttl_is_a_hit() {
        let cache = TransformCache::new();
        let calls = AtomicUsize::new(0);
        for _ in 0..2 {
            let out = cache
                .memoize(Bytes::from_static(b"abc"), Duration::from_secs(60), |c| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    upper(c)
                })
                .await
                .unwrap();
            assert_eq!(out, Bytes::from_static(b"ABC"));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.computations(), 1);
    }

    #[tokio::test]
    async fn expired_entries_are_recomputed() {
        let clock = Arc::new(ManualClock::new());
        let cache = TransformCache::with_clock(clock.clone());
        let ttl = Duration::from_secs(120);

        cache.memoize(Bytes::from_static(b"x"), ttl, upper).await.unwrap();
        clock.advance(Duration::from_secs(119));
        cache.memoize(Bytes::from_static(b"x"), ttl, upper).await.unwrap();
        assert_eq!(cache.computations(), 1);

        clock.advance(Duration::from_secs(1));
        cache.memoize(Bytes::from_static(b"x"), ttl, upper).await.unwrap();
        assert_eq!(cache.computations(), 2);
    }

    #[tokio::test]
    async fn purge_removes_only_expired() {
        let clock = Arc::new(ManualClock::new());
        let cache = TransformCache::with_clock(clock.clone());
        cache
            .memoize(Bytes::from_static(b"short"), Duration::from_secs(10), upper)
            .await
            .unwrap();
        cache
            .memoize(Bytes::from_static(b"long"), Duration::from_secs(100), upper)
            .await
            .unwrap();
        clock.advance(Duration::from_secs(50));
        assert_eq!(cache.purge_expired(), 1);
        assert_eq!(cache.len(), 1);
        // purging twice is harmless
        assert_eq!(cache.purge_expired(), 0);
    }

    #[tokio::test]
    async fn failures_are_not_cached() {
        let cache = TransformCache::new();
        let ttl = Duration::from_secs(60);
        let err = cache
            .memoize(Bytes::from_static(b"boom"), ttl, |_| async {
                Err(TransformError::Other("broken".into()))
            })
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "broken");
        assert!(cache.is_empty());

        let ok = cache
            .memoize(Bytes::from_static(b"boom"), ttl, upper)
            .await
            .unwrap();
        assert_eq!(ok, Bytes::from_static(b"BOOM"));
        assert_eq!(cache.computations(), 2);
    }

    #[tokio::test]
    async fn concurrent_callers_share_one_computation() {
        let cache = TransformCache::new();
        let calls = AtomicUsize::new(0);
        let slow = |c: Bytes| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                Ok(Bytes::from(c.to_ascii_uppercase()))
            }
        };
        let ttl = Duration::from_secs(60);
        let (a, b) = tokio::join!(
            cache.memoize(Bytes::from_static(b"same"), ttl, slow),
            cache.memoize(Bytes::from_static(b"same"), ttl, slow),
        );
        assert_eq!(a.unwrap(), b.unwrap());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.coalesced(), 1);
    }

    #[tokio::test]
    async fn waiters_see_leader_failure() {
        let cache = TransformCache::new();
        let ttl = Duration::from_secs(60);
        let failing = |_: Bytes| async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            Err(TransformError::Other("nope".into()))
        };
        let (a, b) = tokio::join!(
            cache.memoize(Bytes::from_static(b"k"), ttl, failing),
            cache.memoize(Bytes::from_static(b"k"), ttl, failing),
        );
        assert!(a.is_err());
        assert!(matches!(b, Err(TransformError::Coalesced(ref m)) if m == "nope"));
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn dropped_leader_releases_pending_slot() {
        let cache = TransformCache::new();
        let ttl = Duration::from_secs(60);
        let never = |_: Bytes| async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(Bytes::new())
        };
        let res = tokio::time::timeout(
            Duration::from_millis(10),
            cache.memoize(Bytes::from_static(b"k"), ttl, never),
        )
        .await;
        assert!(res.is_err());
        assert!(cache.is_empty());

        let out = cache
            .memoize(Bytes::from_static(b"k"), ttl, upper)
            .await
            .unwrap();
        assert_eq!(out, Bytes::from_static(b"K"));
    }

    #[test]
    fn jittered_ttl_stays_in_window() {
        for _ in 0..100 {
            let ttl = jittered_ttl();
            assert!(ttl >= TTL_MIN && ttl < TTL_MAX, "{ttl:?}");
        }
    }

    #[test]
    fn content_hash_depends_only_on_bytes() {
        assert_eq!(content_hash(b"a"), content_hash(b"a"));
        assert_ne!(content_hash(b"a"), content_hash(b"b"));
    }
}
