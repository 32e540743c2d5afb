//! Request and response types exchanged with the transport layer.
//!
//! These mirror the shape of Envoy's `RateLimitRequest` / `RateLimitResponse`
//! so that a gRPC front end can convert to and from them field by field.

use serde::{Deserialize, Serialize};

use super::bucket::TimeUnit;

/// A single label of a descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Entry {
    pub key: String,
    #[serde(default)]
    pub value: String,
}

impl Entry {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// A per-request limit override. Accepted on the wire, rejected by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitOverride {
    pub requests_per_unit: u32,
    pub unit: TimeUnit,
}

/// An ordered list of labels identifying what is being rate limited.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitDescriptor {
    pub entries: Vec<Entry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<RateLimitOverride>,
}

impl RateLimitDescriptor {
    /// Build a descriptor from `(key, value)` pairs.
    pub fn from_pairs<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            entries: pairs.into_iter().map(|(k, v)| Entry::new(k, v)).collect(),
            limit: None,
        }
    }

    /// Parse the `k=v,k2=v2` form used on the command line.
    ///
    /// A label without `=` gets an empty value.
    pub fn parse_pairs(s: &str) -> Self {
        let entries = s
            .split(',')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(|part| match part.split_once('=') {
                Some((k, v)) => Entry::new(k.trim(), v.trim()),
                None => Entry::new(part, ""),
            })
            .collect();
        Self {
            entries,
            limit: None,
        }
    }
}

impl std::fmt::Display for RateLimitDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let entries: Vec<String> = self
            .entries
            .iter()
            .map(|e| format!("{}={}", e.key, e.value))
            .collect();
        write!(f, "[{}]", entries.join(","))
    }
}

/// A rate limit check request for one domain.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitRequest {
    pub domain: String,
    pub descriptors: Vec<RateLimitDescriptor>,
    /// Accepted for protocol compatibility. Every descriptor consumes exactly
    /// one token per call regardless of this value.
    #[serde(default)]
    pub hits_addend: u32,
}

/// Outcome code for a descriptor or a whole response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Code {
    Ok,
    OverLimit,
    Unknown,
}

/// The limit that applied to a descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrentLimit {
    pub requests_per_unit: u32,
    pub unit: TimeUnit,
}

/// Per-descriptor result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DescriptorStatus {
    pub code: Code,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_limit: Option<CurrentLimit>,
}

impl DescriptorStatus {
    pub fn unknown() -> Self {
        Self {
            code: Code::Unknown,
            current_limit: None,
        }
    }
}

/// Response to a [`RateLimitRequest`], one status per descriptor in request order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitResponse {
    pub overall_code: Code,
    pub statuses: Vec<DescriptorStatus>,
}

impl RateLimitResponse {
    /// Aggregate per-descriptor statuses. Only `OverLimit` affects the overall code.
    pub fn from_statuses(statuses: Vec<DescriptorStatus>) -> Self {
        let overall_code = if statuses.iter().any(|s| s.code == Code::OverLimit) {
            Code::OverLimit
        } else {
            Code::Ok
        };
        Self {
            overall_code,
            statuses,
        }
    }
}
