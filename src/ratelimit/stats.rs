//! Counters exposed to observability collaborators.
//!
//! Per-limit counters are keyed by fully qualified key and live in a registry
//! that outlives any single limiter bank, so totals survive reconfiguration.

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Hit counters for one configured limit.
#[derive(Debug)]
pub struct LimitStats {
    domain: String,
    key: String,
    total_hits: AtomicU64,
    over_limit: AtomicU64,
    within_limit: AtomicU64,
}

/// A point-in-time copy of a [`LimitStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LimitCounts {
    pub total_hits: u64,
    pub over_limit: u64,
    pub within_limit: u64,
}

impl LimitStats {
    /// Split `domain.rest` into its metric labels.
    fn new(full_key: &str) -> Self {
        let (domain, key) = match full_key.split_once('.') {
            Some((domain, key)) => (domain.to_string(), key.to_string()),
            None => (String::new(), full_key.to_string()),
        };
        Self {
            domain,
            key,
            total_hits: AtomicU64::new(0),
            over_limit: AtomicU64::new(0),
            within_limit: AtomicU64::new(0),
        }
    }

    /// Record one evaluated hit.
    pub fn record(&self, allowed: bool) {
        self.total_hits.fetch_add(1, Ordering::Relaxed);
        if allowed {
            self.within_limit.fetch_add(1, Ordering::Relaxed);
        } else {
            self.over_limit.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// The fully qualified key without its domain prefix.
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn counts(&self) -> LimitCounts {
        LimitCounts {
            total_hits: self.total_hits.load(Ordering::Relaxed),
            over_limit: self.over_limit.load(Ordering::Relaxed),
            within_limit: self.within_limit.load(Ordering::Relaxed),
        }
    }
}

/// Service-wide counters.
#[derive(Debug, Default)]
pub struct Stats {
    config_load_success: AtomicU64,
    config_load_error: AtomicU64,
    limits: DashMap<String, Arc<LimitStats>>,
}

impl Stats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get or register the counters for a fully qualified limit key.
    ///
    /// Entries are never removed, so the map grows to the number of distinct
    /// keys ever configured. Keys dropped by a reload keep their totals.
    pub fn limit(&self, full_key: &str) -> Arc<LimitStats> {
        if let Some(stats) = self.limits.get(full_key) {
            return stats.clone();
        }
        self.limits
            .entry(full_key.to_string())
            .or_insert_with(|| Arc::new(LimitStats::new(full_key)))
            .clone()
    }

    /// Counters for `(domain, key)`, if that limit has ever been configured.
    pub fn limit_counts(&self, domain: &str, key: &str) -> Option<LimitCounts> {
        self.limits
            .get(&format!("{domain}.{key}"))
            .map(|stats| stats.counts())
    }

    /// Counters for every limit ever configured, as `(domain, key, counts)`.
    pub fn all_limits(&self) -> Vec<(String, String, LimitCounts)> {
        self.limits
            .iter()
            .map(|entry| {
                let stats = entry.value();
                (stats.domain.clone(), stats.key.clone(), stats.counts())
            })
            .collect()
    }

    pub fn record_load_success(&self) {
        self.config_load_success.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_load_error(&self) {
        self.config_load_error.fetch_add(1, Ordering::Relaxed);
    }

    pub fn config_load_success(&self) -> u64 {
        self.config_load_success.load(Ordering::Relaxed)
    }

    pub fn config_load_error(&self) -> u64 {
        self.config_load_error.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_labels_split_on_first_dot() {
        let stats = Stats::new();
        let limit = stats.limit("edge.path_/login.user");
        assert_eq!(limit.domain(), "edge");
        assert_eq!(limit.key(), "path_/login.user");
    }

    #[test]
    fn test_limit_registry_is_shared() {
        let stats = Stats::new();
        stats.limit("d.k").record(true);
        stats.limit("d.k").record(false);
        stats.limit("d.k").record(true);

        let counts = stats.limit_counts("d", "k").unwrap();
        assert_eq!(
            counts,
            LimitCounts {
                total_hits: 3,
                over_limit: 1,
                within_limit: 2,
            }
        );
        assert!(stats.limit_counts("d", "missing").is_none());
        assert_eq!(stats.all_limits().len(), 1);
    }

    #[test]
    fn test_load_counters() {
        let stats = Stats::new();
        stats.record_load_success();
        stats.record_load_error();
        stats.record_load_error();
        assert_eq!(stats.config_load_success(), 1);
        assert_eq!(stats.config_load_error(), 2);
    }
}
