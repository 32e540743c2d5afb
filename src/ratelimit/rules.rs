//! Rate limit rules configuration and matching.
//!
//! Rules are loaded from Envoy-style YAML documents, one domain per document.
//! Each document becomes a tree of descriptor nodes keyed by `key` or
//! `key_value`, and every node that carries a limit gets a fully qualified,
//! dot-joined key that indexes the limiter bank.

use serde::Deserialize;
use std::collections::HashMap;
use thiserror::Error;
use tracing::{debug, error, info};

use super::bucket::TimeUnit;
use super::descriptor::{CurrentLimit, RateLimitDescriptor};
use crate::error::EvaluateError;

/// Reasons a configuration document is rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoadError {
    #[error("failed to parse rate limit config: {0}")]
    Parse(String),
    #[error("no domain in config file")]
    NoDomain,
    #[error("duplicate domain in config file: {0}")]
    DuplicateDomain(String),
    #[error("descriptor has empty key")]
    EmptyDescriptorKey,
    #[error("duplicate descriptor: {0}")]
    DuplicateDescriptor(String),
    #[error("invalid unit: {0:?}")]
    InvalidUnit(String),
}

/// A load error attributed to the document that caused it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{name}: {error}")]
pub struct DocumentError {
    pub name: String,
    pub error: LoadError,
}

/// On-disk shape of one configuration document.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct DocumentConfig {
    #[serde(default)]
    domain: String,
    #[serde(default)]
    descriptors: Vec<DescriptorConfig>,
}

/// On-disk shape of a descriptor entry.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct DescriptorConfig {
    #[serde(default)]
    key: String,
    #[serde(default)]
    value: Option<String>,
    #[serde(default)]
    rate_limit: Option<RateLimitConfig>,
    #[serde(default)]
    descriptors: Vec<DescriptorConfig>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RateLimitConfig {
    requests_per_unit: u32,
    unit: String,
}

/// A configured limit attached to a descriptor node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimit {
    /// Fully qualified key, `domain.node.node...`
    pub full_key: String,
    pub requests_per_unit: u32,
    pub unit: TimeUnit,
}

impl RateLimit {
    /// The refill rate of this limit in requests per second.
    pub fn per_second(&self) -> f64 {
        self.unit.per_second(self.requests_per_unit)
    }

    pub fn current_limit(&self) -> CurrentLimit {
        CurrentLimit {
            requests_per_unit: self.requests_per_unit,
            unit: self.unit,
        }
    }
}

impl std::fmt::Display for RateLimit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.requests_per_unit, self.unit)
    }
}

/// One level of the descriptor hierarchy.
#[derive(Debug, Clone, Default)]
pub struct Descriptor {
    /// Key of this node in its parent's map: `key` or `key_value`.
    pub key: String,
    pub full_key: String,
    pub descriptors: HashMap<String, Descriptor>,
    pub limit: Option<RateLimit>,
}

impl Descriptor {
    fn root(domain: &str) -> Self {
        Self {
            key: domain.to_string(),
            full_key: domain.to_string(),
            ..Default::default()
        }
    }

    /// Build every child of `self` from its configuration, failing on the
    /// first invalid entry anywhere below.
    fn load_descriptors(&mut self, configs: Vec<DescriptorConfig>) -> Result<(), LoadError> {
        for config in configs {
            let descriptor = self.build_child(config)?;
            self.descriptors.insert(descriptor.key.clone(), descriptor);
        }
        Ok(())
    }

    fn build_child(&self, config: DescriptorConfig) -> Result<Descriptor, LoadError> {
        if config.key.is_empty() {
            return Err(LoadError::EmptyDescriptorKey);
        }

        let key = match config.value.as_deref() {
            Some(value) if !value.is_empty() => format!("{}_{}", config.key, value),
            _ => config.key,
        };
        let full_key = format!("{}.{}", self.full_key, key);
        if self.descriptors.contains_key(&key) {
            return Err(LoadError::DuplicateDescriptor(full_key));
        }

        let limit = config
            .rate_limit
            .map(|rl| -> Result<RateLimit, LoadError> {
                let unit = rl.unit.parse::<TimeUnit>().map_err(LoadError::InvalidUnit)?;
                Ok(RateLimit {
                    full_key: full_key.clone(),
                    requests_per_unit: rl.requests_per_unit,
                    unit,
                })
            })
            .transpose()?;

        match &limit {
            Some(limit) => debug!(key = %full_key, limit = %limit, "Loading descriptor"),
            None => debug!(key = %full_key, "Loading descriptor"),
        }

        let mut descriptor = Descriptor {
            key,
            full_key,
            descriptors: HashMap::new(),
            limit,
        };
        descriptor.load_descriptors(config.descriptors)?;
        Ok(descriptor)
    }

    fn divide_by(&mut self, replicas: u32) {
        if let Some(limit) = self.limit.as_mut() {
            limit.requests_per_unit /= replicas;
        }
        for child in self.descriptors.values_mut() {
            child.divide_by(replicas);
        }
    }

    fn collect_limits(&self, limits: &mut HashMap<String, RateLimit>) {
        if let Some(limit) = &self.limit {
            limits.insert(limit.full_key.clone(), limit.clone());
        }
        for child in self.descriptors.values() {
            child.collect_limits(limits);
        }
    }
}

/// A complete rate limit configuration: every loaded domain's descriptor tree.
#[derive(Debug, Clone, Default)]
pub struct Configuration {
    domains: HashMap<String, Descriptor>,
}

impl Configuration {
    /// Create an empty configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a set of named YAML documents.
    ///
    /// Documents are loaded in iteration order. An invalid document is skipped
    /// and reported; the rest still load. A domain defined twice keeps the
    /// first definition.
    pub fn load<N, B>(documents: impl IntoIterator<Item = (N, B)>) -> (Self, Vec<DocumentError>)
    where
        N: AsRef<str>,
        B: AsRef<[u8]>,
    {
        let mut config = Configuration::new();
        let mut errors = Vec::new();

        for (name, content) in documents {
            let name = name.as_ref();
            if let Err(err) = config.load_document(content.as_ref()) {
                error!(document = %name, error = %err, "Load config failed");
                errors.push(DocumentError {
                    name: name.to_string(),
                    error: err,
                });
            }
        }

        (config, errors)
    }

    /// Load a single YAML string. Convenience for tests and one-shot tools.
    pub fn from_yaml(yaml: &str) -> std::result::Result<Self, LoadError> {
        let mut config = Configuration::new();
        config.load_document(yaml.as_bytes())?;
        Ok(config)
    }

    fn load_document(&mut self, content: &[u8]) -> Result<(), LoadError> {
        let document: DocumentConfig =
            serde_yaml::from_slice(content).map_err(|e| LoadError::Parse(e.to_string()))?;

        if document.domain.is_empty() {
            return Err(LoadError::NoDomain);
        }
        if self.domains.contains_key(&document.domain) {
            return Err(LoadError::DuplicateDomain(document.domain));
        }

        debug!(domain = %document.domain, "Loading domain");
        let mut root = Descriptor::root(&document.domain);
        root.load_descriptors(document.descriptors)?;
        self.domains.insert(document.domain, root);
        Ok(())
    }

    /// Number of loaded domains.
    pub fn domain_count(&self) -> usize {
        self.domains.len()
    }

    /// Get the root descriptor of a domain.
    pub fn get_domain(&self, domain: &str) -> Option<&Descriptor> {
        self.domains.get(domain)
    }

    /// Divide every limit by the replica count. No-op for 0 or 1.
    pub fn divide_by_replicas(&mut self, replicas: u32) {
        if replicas <= 1 {
            return;
        }
        for root in self.domains.values_mut() {
            root.divide_by(replicas);
        }
        info!(replicas = replicas, "Request units divided by replicas");
    }

    /// Every limit in the configuration, indexed by fully qualified key.
    pub fn collect_limit_keys(&self) -> HashMap<String, RateLimit> {
        let mut limits = HashMap::new();
        for root in self.domains.values() {
            root.collect_limits(&mut limits);
        }
        limits
    }

    /// Find the limit that applies to a descriptor within a domain.
    ///
    /// Each entry first matches the `key_value` child, then the `key` child.
    /// Only a limit on the node matched by the last entry applies; any dead
    /// end yields `Ok(None)`. An unknown domain also yields `Ok(None)`.
    pub fn find_limit(
        &self,
        domain: &str,
        descriptor: &RateLimitDescriptor,
    ) -> std::result::Result<Option<&RateLimit>, EvaluateError> {
        let Some(root) = self.get_domain(domain) else {
            debug!(domain = %domain, "Unknown domain");
            return Ok(None);
        };

        if descriptor.limit.is_some() {
            return Err(EvaluateError::UnsupportedRateLimitOverride);
        }

        let mut descriptors = &root.descriptors;
        let last = descriptor.entries.len().saturating_sub(1);

        for (i, entry) in descriptor.entries.iter().enumerate() {
            let next = descriptors
                .get(&format!("{}_{}", entry.key, entry.value))
                .or_else(|| descriptors.get(&entry.key));

            let Some(next) = next else {
                return Ok(None);
            };

            if i == last {
                if let Some(limit) = &next.limit {
                    debug!(key = %limit.full_key, "Found rate limit");
                    return Ok(Some(limit));
                }
            }

            if next.descriptors.is_empty() {
                return Ok(None);
            }
            descriptors = &next.descriptors;
        }

        Ok(None)
    }
}
