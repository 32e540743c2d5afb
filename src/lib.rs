//! Shardlimit - Sharded Rate Limiting Sidecar
//!
//! This crate implements the decision engine of a rate limiting sidecar that
//! speaks Envoy's rate limit request model. Each replica enforces its share of
//! a global limit by dividing every configured limit by the number of replicas
//! it observes; replicas never talk to each other.
//!
//! The pieces are wired together like this:
//!
//! ```no_run
//! use std::sync::Arc;
//! use shardlimit::ratelimit::{Engine, SnapshotHandle, Stats};
//! use shardlimit::reload::Coordinator;
//!
//! let snapshots = SnapshotHandle::new();
//! let stats = Arc::new(Stats::new());
//! let coordinator = Coordinator::new(snapshots.clone(), stats.clone());
//! let engine = Engine::new(snapshots, stats);
//! # let _ = (coordinator, engine);
//! ```

pub mod config;
pub mod error;
pub mod ratelimit;
pub mod reload;
