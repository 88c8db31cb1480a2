//! Verified-claim cache.
//!
//! # Purpose
//! Memoizes [`ClaimSet`]s by [`TokenFingerprint`] so repeated calls with the
//! same token skip signature verification.
//!
//! # Key invariants
//! - An entry never outlives its token: `expires_at = min(now + ttl, exp)`.
//! - Stale entries are removed on lookup and reported as misses.
//! - The cache is an optimization only. [`DisabledClaimCache`] must yield the
//!   same decisions as a warm [`LruClaimCache`].
//!
//! # Concurrency model
//! One `parking_lot::Mutex` around the LRU. Entries are fully built before the
//! lock is taken, and the critical section is a single push or pop.
use crate::errors::AuthzResult;
use crate::fingerprint::TokenFingerprint;
use crate::token::ClaimSet;
use lru::LruCache;
use parking_lot::Mutex;
use serde::Serialize;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant, SystemTime};

pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(300);
pub const DEFAULT_CACHE_CAPACITY: usize = 10_000;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub expired: u64,
    pub evictions: u64,
    pub entries: u64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let lookups = self.hits + self.misses;
        if lookups == 0 {
            return 0.0;
        }
        self.hits as f64 / lookups as f64
    }
}

/// Storage for verified claims.
///
/// Implementations may fail; the engine treats any error as a miss and falls
/// back to full verification.
pub trait ClaimCache: Send + Sync {
    fn get(&self, fingerprint: &TokenFingerprint) -> AuthzResult<Option<Arc<ClaimSet>>>;
    fn put(&self, fingerprint: TokenFingerprint, claims: Arc<ClaimSet>) -> AuthzResult<()>;
    fn invalidate(&self, fingerprint: &TokenFingerprint);
    fn clear(&self);
    fn stats(&self) -> CacheStats;
}

#[derive(Debug, Clone)]
struct CacheEntry {
    claims: Arc<ClaimSet>,
    inserted_at: Instant,
    expires_at: Instant,
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    expired: AtomicU64,
    evictions: AtomicU64,
}

/// Capacity-bounded LRU with per-entry TTL.
pub struct LruClaimCache {
    ttl: Duration,
    entries: Mutex<LruCache<TokenFingerprint, CacheEntry>>,
    counters: Counters,
}

impl LruClaimCache {
    /// A zero capacity is raised to one.
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            ttl,
            entries: Mutex::new(LruCache::new(capacity)),
            counters: Counters::default(),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn get_at(
        &self,
        fingerprint: &TokenFingerprint,
        now: Instant,
    ) -> Option<Arc<ClaimSet>> {
        let mut entries = self.entries.lock();
        let lookup = entries
            .get(fingerprint)
            .map(|entry| (entry.claims.clone(), entry.inserted_at, entry.expires_at));
        let fresh = match lookup {
            None => None,
            Some((claims, _, expires_at)) if expires_at > now => Some(claims),
            Some((_, inserted_at, _)) => {
                entries.pop(fingerprint);
                self.counters.expired.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(
                    fingerprint = %fingerprint.short(),
                    age_ms = now.saturating_duration_since(inserted_at).as_millis() as u64,
                    "claim cache entry expired"
                );
                None
            }
        };
        drop(entries);
        match fresh {
            Some(claims) => {
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                Some(claims)
            }
            None => {
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    fn put_at(
        &self,
        fingerprint: TokenFingerprint,
        claims: Arc<ClaimSet>,
        now: Instant,
        wall_now: SystemTime,
    ) {
        let lifetime = self.ttl.min(claims.remaining_lifetime(wall_now));
        if lifetime.is_zero() {
            return;
        }
        let entry = CacheEntry {
            claims,
            inserted_at: now,
            expires_at: now + lifetime,
        };
        let displaced = self.entries.lock().push(fingerprint, entry);
        if let Some((evicted, _)) = displaced
            && evicted != fingerprint
        {
            self.counters.evictions.fetch_add(1, Ordering::Relaxed);
        }
    }
}

impl ClaimCache for LruClaimCache {
    fn get(&self, fingerprint: &TokenFingerprint) -> AuthzResult<Option<Arc<ClaimSet>>> {
        Ok(self.get_at(fingerprint, Instant::now()))
    }

    fn put(&self, fingerprint: TokenFingerprint, claims: Arc<ClaimSet>) -> AuthzResult<()> {
        self.put_at(fingerprint, claims, Instant::now(), SystemTime::now());
        Ok(())
    }

    fn invalidate(&self, fingerprint: &TokenFingerprint) {
        self.entries.lock().pop(fingerprint);
    }

    fn clear(&self) {
        self.entries.lock().clear();
    }

    fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            expired: self.counters.expired.load(Ordering::Relaxed),
            evictions: self.counters.evictions.load(Ordering::Relaxed),
            entries: self.entries.lock().len() as u64,
        }
    }
}

/// Always misses. Used when caching is switched off.
#[derive(Default)]
pub struct DisabledClaimCache {
    misses: AtomicU64,
}

impl ClaimCache for DisabledClaimCache {
    fn get(&self, _fingerprint: &TokenFingerprint) -> AuthzResult<Option<Arc<ClaimSet>>> {
        self.misses.fetch_add(1, Ordering::Relaxed);
        Ok(None)
    }

    fn put(&self, _fingerprint: TokenFingerprint, _claims: Arc<ClaimSet>) -> AuthzResult<()> {
        Ok(())
    }

    fn invalidate(&self, _fingerprint: &TokenFingerprint) {}

    fn clear(&self) {}

    fn stats(&self) -> CacheStats {
        CacheStats {
            misses: self.misses.load(Ordering::Relaxed),
            ..CacheStats::default()
        }
    }
}
