//! Rate limiting logic and state management.

mod backend;
mod bucket;
mod descriptor;
mod engine;
mod limiter;
pub mod rules;
mod snapshot;
mod stats;

pub use backend::RateLimiterBackend;
pub use bucket::{TimeUnit, TokenBucket};
pub use descriptor::{
    Code, CurrentLimit, DescriptorStatus, Entry, RateLimitDescriptor, RateLimitOverride,
    RateLimitRequest, RateLimitResponse,
};
pub use engine::Engine;
pub use limiter::{LimiterBank, Verdict};
pub use rules::{Configuration, DocumentError, LoadError, RateLimit};
pub use snapshot::{Snapshot, SnapshotHandle};
pub use stats::{LimitCounts, LimitStats, Stats};
