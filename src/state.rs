// SPDX-FileCopyrightText: 2025 Alexandre Gomes Gaigalas <alganet@gmail.com>
//
// SPDX-License-Identifier: ISC

//! Per-URL Last-Modified bookkeeping for conditional requests.

use crate::cache::{Clock, SystemClock};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
struct Record {
    last_modified: String,
    recorded_at: Instant,
}

/// Thread-safe, bounded store of the most recent upstream `Last-Modified`
/// value per request URL.
///
/// Entries older than the TTL are ignored and removed by
/// [`ConditionalState::cleanup_expired`]; when the table is full the oldest
/// record is evicted to make room.
pub struct ConditionalState {
    store: Arc<RwLock<HashMap<String, Record>>>,
    ttl: Duration,
    max_entries: usize,
    clock: Arc<dyn Clock>,
}

impl ConditionalState {
    pub fn new(ttl_seconds: u64, max_entries: usize) -> Self {
        Self::with_clock(ttl_seconds, max_entries, Arc::new(SystemClock))
    }

    pub fn with_clock(ttl_seconds: u64, max_entries: usize, clock: Arc<dyn Clock>) -> Self {
        Self {
            store: Arc::new(RwLock::new(HashMap::new())),
            ttl: Duration::from_secs(ttl_seconds),
            max_entries: max_entries.max(1),
            clock,
        }
    }

    /// Remember the Last-Modified value observed for `url`.
    pub fn record(&self, url: &str, last_modified: &str) {
        let now = self.clock.now();
        match self.store.write() {
            Ok(mut store) => {
                if !store.contains_key(url) && store.len() >= self.max_entries {
                    let oldest = store
                        .iter()
                        .min_by_key(|(_, r)| r.recorded_at)
                        .map(|(k, _)| k.clone());
                    if let Some(k) = oldest {
                        store.remove(&k);
                    }
                }
                store.insert(
                    url.to_string(),
                    Record {
                        last_modified: last_modified.to_string(),
                        recorded_at: now,
                    },
                );
            }
            Err(_) => {
                tracing::warn!("ConditionalState lock poisoned during write");
            }
        }
    }

    /// The last recorded value for `url`, if it has not expired.
    pub fn last_modified(&self, url: &str) -> Option<String> {
        let now = self.clock.now();
        match self.store.read() {
            Ok(store) => store
                .get(url)
                .filter(|r| now.saturating_duration_since(r.recorded_at) <= self.ttl)
                .map(|r| r.last_modified.clone()),
            Err(_) => {
                tracing::warn!("ConditionalState lock poisoned during read");
                None
            }
        }
    }

    /// Remove expired entries from the store.
    pub fn cleanup_expired(&self) -> usize {
        let now = self.clock.now();
        match self.store.write() {
            Ok(mut store) => {
                let before = store.len();
                store.retain(|_, r| now.saturating_duration_since(r.recorded_at) <= self.ttl);
                before - store.len()
            }
            Err(_) => {
                tracing::warn!("ConditionalState lock poisoned during cleanup");
                0
            }
        }
    }

    pub fn len(&self) -> usize {
        self.store.read().map(|s| s.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
