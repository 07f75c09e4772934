//! TTL response cache.
//!
//! Responses are cached under the request as it was forwarded, so
//! different client-side labels for the same backend map to the same
//! entry. A single mutex guards the map; it is never held across a
//! backend round-trip.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use bytes::Bytes;

use crate::message::PduType;

/// Identity of a cacheable request.
///
/// Equality is structural; the derived hash combines all five fields.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    /// Routing label the client supplied.
    pub backend_host: String,
    /// Real community forwarded to the backend.
    pub community: String,
    /// Context suffix (`@index`) forwarded to the backend, or empty.
    pub community_index: String,
    pub pdu_type: PduType,
    /// Opaque request tail (error fields + varbind list).
    pub data: Bytes,
}

#[derive(Debug)]
struct CacheEntry {
    /// Opaque response tail, as received from the backend or
    /// synthesized for a timeout.
    response_data: Bytes,
    inserted_at: Instant,
}

/// Mutex-guarded TTL map from request identity to response tail.
///
/// Unbounded; entries only leave by TTL expiry, either inline on a
/// stale lookup or via [`sweep_expired`](Self::sweep_expired).
#[derive(Debug)]
pub struct ResponseCache {
    entries: Mutex<HashMap<CacheKey, CacheEntry>>,
    ttl: Duration,
}

impl ResponseCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    /// Entry lifetime and sweep period.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Look up a fresh entry. A stale entry is evicted and reported as
    /// absent.
    pub fn lookup(&self, key: &CacheKey, now: Instant) -> Option<Bytes> {
        let mut entries = self.entries.lock().expect("cache mutex poisoned");
        let entry = entries.get(key)?;
        if now.saturating_duration_since(entry.inserted_at) > self.ttl {
            entries.remove(key);
            return None;
        }
        Some(entry.response_data.clone())
    }

    /// Insert a response tail, overwriting any existing entry.
    pub fn insert(&self, key: CacheKey, response_data: Bytes, now: Instant) {
        let mut entries = self.entries.lock().expect("cache mutex poisoned");
        entries.insert(
            key,
            CacheEntry {
                response_data,
                inserted_at: now,
            },
        );
    }

    /// Remove every expired entry, returning how many were removed.
    pub fn sweep_expired(&self, now: Instant) -> usize {
        let mut entries = self.entries.lock().expect("cache mutex poisoned");
        let before = entries.len();
        entries.retain(|_, entry| now.saturating_duration_since(entry.inserted_at) <= self.ttl);
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().expect("cache mutex poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
