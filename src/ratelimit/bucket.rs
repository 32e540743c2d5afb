//! Token bucket implementation and rate limit time units.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::{Duration, Instant};

/// Time unit of a configured limit (matches Envoy's configuration format).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeUnit {
    Second,
    Minute,
    Hour,
    Day,
    Month,
    Year,
}

impl TimeUnit {
    /// Get the duration of this time unit.
    pub fn duration(&self) -> Duration {
        match self {
            TimeUnit::Second => Duration::from_secs(1),
            TimeUnit::Minute => Duration::from_secs(60),
            TimeUnit::Hour => Duration::from_secs(3600),
            TimeUnit::Day => Duration::from_secs(86_400),
            TimeUnit::Month => Duration::from_secs(30 * 86_400),
            TimeUnit::Year => Duration::from_secs(365 * 86_400),
        }
    }

    /// Convert `requests` per one of this unit into requests per second.
    pub fn per_second(&self, requests: u32) -> f64 {
        f64::from(requests) / self.duration().as_secs_f64()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TimeUnit::Second => "second",
            TimeUnit::Minute => "minute",
            TimeUnit::Hour => "hour",
            TimeUnit::Day => "day",
            TimeUnit::Month => "month",
            TimeUnit::Year => "year",
        }
    }
}

impl FromStr for TimeUnit {
    type Err = String;

    /// Case-insensitive, so `MINUTE` and `minute` are both accepted.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "second" => Ok(TimeUnit::Second),
            "minute" => Ok(TimeUnit::Minute),
            "hour" => Ok(TimeUnit::Hour),
            "day" => Ok(TimeUnit::Day),
            "month" => Ok(TimeUnit::Month),
            "year" => Ok(TimeUnit::Year),
            _ => Err(s.to_string()),
        }
    }
}

impl std::fmt::Display for TimeUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

/// A non-blocking token bucket.
///
/// Tokens refill continuously at `rate` per second up to `capacity`, which is
/// `ceil(rate)`. A new bucket starts full. All state lives behind one mutex so
/// concurrent callers never receive the same token twice.
#[derive(Debug)]
pub struct TokenBucket {
    rate: f64,
    capacity: f64,
    state: Mutex<BucketState>,
}

impl TokenBucket {
    /// Create a bucket refilling at `rate` tokens per second.
    pub fn new(rate: f64) -> Self {
        let rate = if rate.is_finite() { rate.max(0.0) } else { 0.0 };
        let capacity = rate.ceil();
        Self {
            rate,
            capacity,
            state: Mutex::new(BucketState {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Take one token if available. Never blocks beyond the bucket's own lock.
    pub fn try_acquire(&self) -> bool {
        self.try_acquire_at(Instant::now())
    }

    /// Take one token as of `now`. Times earlier than the last refill add nothing.
    pub fn try_acquire_at(&self, now: Instant) -> bool {
        let mut state = self.state.lock();

        let elapsed = now.saturating_duration_since(state.last_refill);
        if now > state.last_refill {
            state.last_refill = now;
        }
        state.tokens = (state.tokens + elapsed.as_secs_f64() * self.rate).min(self.capacity);

        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Refill rate in tokens per second.
    pub fn rate(&self) -> f64 {
        self.rate
    }

    /// Maximum number of tokens the bucket holds.
    pub fn capacity(&self) -> u64 {
        self.capacity as u64
    }
}
