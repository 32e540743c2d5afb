//! The limiter bank: one token bucket per configured limit key.

use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, trace};

use super::bucket::TokenBucket;
use super::rules::RateLimit;
use super::stats::{LimitStats, Stats};

/// Result of checking one key against the bank.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Allowed,
    Denied,
    /// The key has no bucket in this bank.
    Unknown,
}

struct BankEntry {
    bucket: TokenBucket,
    stats: Arc<LimitStats>,
}

/// Token buckets indexed by fully qualified limit key.
///
/// A bank is never updated in place; reconfiguration builds a new one, so
/// every bucket of a fresh bank starts full. The key set is fixed at
/// construction, so lookups need no lock and each bucket synchronizes only
/// its own token accounting.
pub struct LimiterBank {
    limiters: HashMap<String, BankEntry>,
}

impl LimiterBank {
    /// An empty bank. Every key evaluates to [`Verdict::Unknown`].
    pub fn empty() -> Self {
        Self {
            limiters: HashMap::new(),
        }
    }

    /// Build a bank from per-key refill rates in requests per second.
    pub fn rebuild(rates: impl IntoIterator<Item = (String, f64)>, stats: &Stats) -> Self {
        let limiters = rates
            .into_iter()
            .map(|(key, rate)| {
                let bucket = TokenBucket::new(rate);
                debug!(
                    key = %key,
                    rate = rate,
                    capacity = bucket.capacity(),
                    "Creating rate limiter"
                );
                let entry = BankEntry {
                    bucket,
                    stats: stats.limit(&key),
                };
                (key, entry)
            })
            .collect();

        Self { limiters }
    }

    /// Build a bank from the limits collected out of a configuration.
    pub fn from_limits(limits: &HashMap<String, RateLimit>, stats: &Stats) -> Self {
        Self::rebuild(
            limits
                .iter()
                .map(|(key, limit)| (key.clone(), limit.per_second())),
            stats,
        )
    }

    /// Consume one token for `key`.
    pub fn evaluate(&self, key: &str) -> Verdict {
        let Some(entry) = self.limiters.get(key) else {
            trace!(key = %key, "No limiter for key");
            return Verdict::Unknown;
        };

        let allowed = entry.bucket.try_acquire();
        entry.stats.record(allowed);

        if allowed {
            Verdict::Allowed
        } else {
            debug!(key = %key, "Rate limit exceeded");
            Verdict::Denied
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.limiters.contains_key(key)
    }

    /// Get the number of limiters in the bank.
    pub fn len(&self) -> usize {
        self.limiters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.limiters.is_empty()
    }

    /// The bucket behind `key`, for inspection.
    pub fn bucket(&self, key: &str) -> Option<&TokenBucket> {
        self.limiters.get(key).map(|entry| &entry.bucket)
    }
}

impl std::fmt::Debug for LimiterBank {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut keys: Vec<&String> = self.limiters.keys().collect();
        keys.sort();
        f.debug_struct("LimiterBank").field("keys", &keys).finish()
    }
}

impl Default for LimiterBank {
    fn default() -> Self {
        Self::empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::rules::Configuration;

    fn bank(rates: &[(&str, f64)], stats: &Stats) -> LimiterBank {
        LimiterBank::rebuild(rates.iter().map(|(k, r)| (k.to_string(), *r)), stats)
    }

    #[test]
    fn test_unknown_key() {
        let stats = Stats::new();
        let bank = bank(&[("d.k", 10.0)], &stats);

        assert_eq!(bank.evaluate("d.other"), Verdict::Unknown);
        assert_eq!(LimiterBank::empty().evaluate("d.k"), Verdict::Unknown);
        assert!(stats.limit_counts("d", "other").is_none());
    }

    #[test]
    fn test_two_per_minute() {
        let yaml = r#"
domain: svc
descriptors:
  - key: rl
    rate_limit:
      requests_per_unit: 2
      unit: minute
"#;
        let stats = Stats::new();
        let config = Configuration::from_yaml(yaml).unwrap();
        let bank = LimiterBank::from_limits(&config.collect_limit_keys(), &stats);

        let bucket = bank.bucket("svc.rl").unwrap();
        assert!((bucket.rate() - 0.0333).abs() < 0.001);
        assert_eq!(bucket.capacity(), 1);

        assert_eq!(bank.evaluate("svc.rl"), Verdict::Allowed);
        assert_eq!(bank.evaluate("svc.rl"), Verdict::Denied);
    }

    #[test]
    fn test_keys_are_independent() {
        let stats = Stats::new();
        let bank = bank(&[("d.a", 0.5), ("d.b", 0.5)], &stats);

        assert_eq!(bank.evaluate("d.a"), Verdict::Allowed);
        assert_eq!(bank.evaluate("d.a"), Verdict::Denied);
        assert_eq!(bank.evaluate("d.b"), Verdict::Allowed);
    }

    #[test]
    fn test_zero_limit_denies() {
        let stats = Stats::new();
        let bank = bank(&[("d.k", 0.0)], &stats);
        assert_eq!(bank.evaluate("d.k"), Verdict::Denied);
    }

    #[test]
    fn test_rebuild_starts_full_and_keeps_stats() {
        let stats = Stats::new();
        let first = bank(&[("d.k", 0.01)], &stats);
        assert_eq!(first.evaluate("d.k"), Verdict::Allowed);
        assert_eq!(first.evaluate("d.k"), Verdict::Denied);

        let second = bank(&[("d.k", 0.01)], &stats);
        assert_eq!(second.evaluate("d.k"), Verdict::Allowed);

        let counts = stats.limit_counts("d", "k").unwrap();
        assert_eq!(counts.total_hits, 3);
        assert_eq!(counts.within_limit, 2);
        assert_eq!(counts.over_limit, 1);
    }

    #[test]
    fn test_concurrent_evaluations_single_grant() {
        let stats = Stats::new();
        let bank = bank(&[("d.k", 2.0 / 60.0)], &stats);
        let threads = 32;

        let verdicts: Vec<Verdict> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..threads)
                .map(|_| s.spawn(|| bank.evaluate("d.k")))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        let allowed = verdicts.iter().filter(|v| **v == Verdict::Allowed).count();
        let denied = verdicts.iter().filter(|v| **v == Verdict::Denied).count();
        assert_eq!(allowed, 1);
        assert_eq!(denied, threads - 1);
    }
}
