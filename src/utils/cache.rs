//! Verdict Cache
//!
//! Thread-safe TTL cache of successful analysis verdicts, keyed by the
//! SHA-256 of the contract source. DashMap gives concurrent access without a
//! global lock.
//!
//! Only complete verdicts go in. Unavailable/malformed outcomes are never
//! cached, so a retry after an oracle outage really re-runs the analysis.

use dashmap::DashMap;
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

use crate::models::AnalysisVerdict;
use crate::utils::constants::DEFAULT_CACHE_TTL_SECS;

/// Cache entry with its insertion time
#[derive(Clone, Debug)]
pub struct CacheEntry {
    pub verdict: AnalysisVerdict,
    pub created_at: Instant,
    pub ttl_secs: u64,
}

impl CacheEntry {
    pub fn is_expired(&self) -> bool {
        self.created_at.elapsed() >= Duration::from_secs(self.ttl_secs)
    }

    /// Seconds left before expiry
    pub fn remaining_ttl(&self) -> u64 {
        let elapsed = self.created_at.elapsed().as_secs();
        self.ttl_secs.saturating_sub(elapsed)
    }
}

/// Content-addressed verdict cache
#[derive(Clone)]
pub struct VerdictCache {
    /// sha256(source) hex -> entry
    store: Arc<DashMap<String, CacheEntry>>,
    ttl_secs: u64,
    hits: Arc<AtomicU64>,
    misses: Arc<AtomicU64>,
}

impl Default for VerdictCache {
    fn default() -> Self {
        Self::new()
    }
}

impl VerdictCache {
    pub fn new() -> Self {
        Self::with_ttl(DEFAULT_CACHE_TTL_SECS)
    }

    /// `ttl_secs == 0` disables caching
    pub fn with_ttl(ttl_secs: u64) -> Self {
        Self {
            store: Arc::new(DashMap::new()),
            ttl_secs,
            hits: Arc::new(AtomicU64::new(0)),
            misses: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.ttl_secs > 0
    }

    /// Cache key for a contract source
    pub fn key_for(source: &str) -> String {
        hex::encode(Sha256::digest(source.as_bytes()))
    }

    /// Cached verdict for `source`, if present and fresh
    pub fn get(&self, source: &str) -> Option<AnalysisVerdict> {
        if !self.is_enabled() {
            return None;
        }
        let key = Self::key_for(source);

        if let Some(entry) = self.store.get(&key) {
            if entry.is_expired() {
                drop(entry);
                self.store.remove(&key);
                self.misses.fetch_add(1, Ordering::Relaxed);
                debug!("📭 CACHE MISS (expired): {}", &key[..12]);
                None
            } else {
                self.hits.fetch_add(1, Ordering::Relaxed);
                info!("✅ CACHE HIT: {} (TTL: {}s remaining)", &key[..12], entry.remaining_ttl());
                Some(entry.verdict.clone())
            }
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            debug!("📭 CACHE MISS: {}", &key[..12]);
            None
        }
    }

    /// Store a complete verdict
    pub fn set(&self, source: &str, verdict: AnalysisVerdict) {
        if !self.is_enabled() {
            return;
        }
        let key = Self::key_for(source);
        debug!("💾 CACHE SET: {} (TTL: {}s)", &key[..12], self.ttl_secs);
        self.store.insert(
            key,
            CacheEntry {
                verdict,
                created_at: Instant::now(),
                ttl_secs: self.ttl_secs,
            },
        );
    }

    pub fn invalidate(&self, source: &str) {
        self.store.remove(&Self::key_for(source));
    }

    /// Drop expired entries, returning how many were removed
    pub fn cleanup_expired(&self) -> usize {
        let before = self.store.len();
        self.store.retain(|_, entry| !entry.is_expired());
        let removed = before.saturating_sub(self.store.len());
        if removed > 0 {
            info!("🧹 CACHE CLEANUP: {} expired entries removed", removed);
        }
        removed
    }

    pub fn stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        let hit_rate = if total > 0 {
            (hits as f64 / total as f64) * 100.0
        } else {
            0.0
        };

        CacheStats {
            entries: self.store.len(),
            hits,
            misses,
            hit_rate,
            ttl_secs: self.ttl_secs,
        }
    }

    pub fn clear(&self) {
        self.store.clear();
        info!("🗑️ CACHE CLEARED");
    }
}

/// Cache statistics for monitoring
#[derive(Debug, Clone, serde::Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
    pub ttl_secs: u64,
}
