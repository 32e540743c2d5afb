//! The evaluation engine: turns a request into limiter lookups and a verdict.

use std::sync::Arc;
use tracing::{debug, trace, warn};

use super::descriptor::{Code, DescriptorStatus, RateLimitRequest, RateLimitResponse};
use super::limiter::Verdict;
use super::rules::RateLimit;
use super::snapshot::SnapshotHandle;
use super::stats::Stats;
use crate::error::EvaluateError;

/// Evaluates rate limit requests against the currently published snapshot.
///
/// Cheap to clone; clones share the snapshot slot and counters.
#[derive(Debug, Clone)]
pub struct Engine {
    snapshots: SnapshotHandle,
    stats: Arc<Stats>,
}

impl Engine {
    pub fn new(snapshots: SnapshotHandle, stats: Arc<Stats>) -> Self {
        Self { snapshots, stats }
    }

    pub fn snapshots(&self) -> &SnapshotHandle {
        &self.snapshots
    }

    pub fn stats(&self) -> &Arc<Stats> {
        &self.stats
    }

    /// Decide whether the request's descriptors are within their limits.
    ///
    /// Every descriptor is resolved before any token is consumed, and the
    /// whole request is evaluated against one snapshot.
    pub fn evaluate(&self, request: &RateLimitRequest) -> Result<RateLimitResponse, EvaluateError> {
        if request.domain.is_empty() {
            warn!("Received rate limit request with empty domain");
            return Err(EvaluateError::EmptyDomain);
        }
        if request.descriptors.is_empty() {
            warn!(domain = %request.domain, "Received rate limit request with no descriptors");
            return Err(EvaluateError::EmptyDescriptors);
        }

        let Some(snapshot) = self.snapshots.load() else {
            return Err(EvaluateError::NoConfiguration);
        };

        if request.hits_addend > 1 {
            trace!(
                hits_addend = request.hits_addend,
                "hits_addend ignored, consuming one token per descriptor"
            );
        }

        let mut limits: Vec<Option<&RateLimit>> = Vec::with_capacity(request.descriptors.len());
        for descriptor in &request.descriptors {
            let limit = snapshot.config.find_limit(&request.domain, descriptor)?;
            debug!(
                descriptor = %descriptor,
                limit = %limit.map(ToString::to_string).unwrap_or_default(),
                "Resolved descriptor"
            );
            limits.push(limit);
        }

        let statuses = limits
            .into_iter()
            .map(|limit| match limit {
                None => DescriptorStatus::unknown(),
                Some(limit) => {
                    let code = match snapshot.bank.evaluate(&limit.full_key) {
                        Verdict::Allowed => Code::Ok,
                        Verdict::Denied => Code::OverLimit,
                        Verdict::Unknown => return DescriptorStatus::unknown(),
                    };
                    DescriptorStatus {
                        code,
                        current_limit: Some(limit.current_limit()),
                    }
                }
            })
            .collect();

        let response = RateLimitResponse::from_statuses(statuses);
        debug!(
            domain = %request.domain,
            overall_code = ?response.overall_code,
            "Rate limit decision made"
        );
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::descriptor::RateLimitDescriptor;
    use crate::ratelimit::limiter::LimiterBank;
    use crate::ratelimit::rules::Configuration;
    use crate::ratelimit::snapshot::Snapshot;

    const CONFIG: &str = r#"
domain: edge
descriptors:
  - key: path
    value: /login
    rate_limit:
      requests_per_unit: 2
      unit: minute
  - key: path
    rate_limit:
      requests_per_unit: 1000
      unit: second
  - key: user
    descriptors:
      - key: plan
        value: free
        rate_limit:
          requests_per_unit: 1
          unit: hour
"#;

    fn engine_with(yaml: &str) -> Engine {
        let stats = Arc::new(Stats::new());
        let config = Configuration::from_yaml(yaml).unwrap();
        let bank = LimiterBank::from_limits(&config.collect_limit_keys(), &stats);
        let snapshots = SnapshotHandle::new();
        snapshots.publish(Snapshot {
            config,
            bank,
            replicas: 1,
        });
        Engine::new(snapshots, stats)
    }

    fn request(domain: &str, descriptors: &[&[(&str, &str)]]) -> RateLimitRequest {
        RateLimitRequest {
            domain: domain.to_string(),
            descriptors: descriptors
                .iter()
                .map(|entries| RateLimitDescriptor::from_pairs(entries.iter().copied()))
                .collect(),
            hits_addend: 1,
        }
    }

    fn codes(response: &RateLimitResponse) -> Vec<Code> {
        response.statuses.iter().map(|s| s.code).collect()
    }

    #[test]
    fn test_validation() {
        let engine = engine_with(CONFIG);

        assert_eq!(
            engine.evaluate(&request("", &[&[("path", "/")]])),
            Err(EvaluateError::EmptyDomain)
        );
        assert_eq!(
            engine.evaluate(&request("edge", &[])),
            Err(EvaluateError::EmptyDescriptors)
        );

        let unconfigured = Engine::new(SnapshotHandle::new(), Arc::new(Stats::new()));
        assert_eq!(
            unconfigured.evaluate(&request("edge", &[&[("path", "/")]])),
            Err(EvaluateError::NoConfiguration)
        );
    }

    #[test]
    fn test_over_limit_after_burst() {
        let engine = engine_with(CONFIG);
        let req = request("edge", &[&[("path", "/login")]]);

        let first = engine.evaluate(&req).unwrap();
        assert_eq!(first.overall_code, Code::Ok);
        assert_eq!(first.statuses[0].current_limit.as_ref().unwrap().requests_per_unit, 2);

        let second = engine.evaluate(&req).unwrap();
        assert_eq!(second.overall_code, Code::OverLimit);
        assert_eq!(codes(&second), vec![Code::OverLimit]);
    }

    #[test]
    fn test_unknown_does_not_force_over_limit() {
        let engine = engine_with(CONFIG);
        let response = engine
            .evaluate(&request("edge", &[&[("nothing", "here")], &[("path", "/home")]]))
            .unwrap();

        assert_eq!(codes(&response), vec![Code::Unknown, Code::Ok]);
        assert_eq!(response.overall_code, Code::Ok);
        assert!(response.statuses[0].current_limit.is_none());
    }

    #[test]
    fn test_mixed_ok_and_over_limit() {
        let engine = engine_with(CONFIG);
        engine
            .evaluate(&request("edge", &[&[("path", "/login")]]))
            .unwrap();

        let response = engine
            .evaluate(&request("edge", &[&[("path", "/home")], &[("path", "/login")]]))
            .unwrap();
        assert_eq!(codes(&response), vec![Code::Ok, Code::OverLimit]);
        assert_eq!(response.overall_code, Code::OverLimit);
    }

    #[test]
    fn test_exhausted_entries_are_unknown() {
        let engine = engine_with(CONFIG);

        // `user` has no limit of its own; stopping there is never a denial.
        for _ in 0..3 {
            let response = engine.evaluate(&request("edge", &[&[("user", "alice")]])).unwrap();
            assert_eq!(codes(&response), vec![Code::Unknown]);
            assert_eq!(response.overall_code, Code::Ok);
        }

        let response = engine
            .evaluate(&request("edge", &[&[("user", "alice"), ("plan", "free")]]))
            .unwrap();
        assert_eq!(codes(&response), vec![Code::Ok]);
    }

    #[test]
    fn test_unknown_domain() {
        let engine = engine_with(CONFIG);
        let response = engine
            .evaluate(&request("other", &[&[("path", "/login")], &[("path", "/")]]))
            .unwrap();
        assert_eq!(codes(&response), vec![Code::Unknown, Code::Unknown]);
        assert_eq!(response.overall_code, Code::Ok);
    }

    #[test]
    fn test_override_rejects_whole_request_without_consuming() {
        use crate::ratelimit::bucket::TimeUnit;
        use crate::ratelimit::descriptor::RateLimitOverride;

        let engine = engine_with(CONFIG);
        let mut req = request("edge", &[&[("path", "/login")], &[("path", "/login")]]);
        req.descriptors[1].limit = Some(RateLimitOverride {
            requests_per_unit: 10,
            unit: TimeUnit::Second,
        });

        assert_eq!(
            engine.evaluate(&req),
            Err(EvaluateError::UnsupportedRateLimitOverride)
        );

        // The first descriptor's token is still there.
        let response = engine.evaluate(&request("edge", &[&[("path", "/login")]])).unwrap();
        assert_eq!(response.overall_code, Code::Ok);
    }

    #[test]
    fn test_hits_addend_ignored() {
        let engine = engine_with(CONFIG);
        let mut req = request("edge", &[&[("path", "/login")]]);
        req.hits_addend = 50;

        assert_eq!(engine.evaluate(&req).unwrap().overall_code, Code::Ok);
        assert_eq!(engine.evaluate(&req).unwrap().overall_code, Code::OverLimit);
    }

    #[test]
    fn test_each_descriptor_consumes_independently() {
        let engine = engine_with(CONFIG);
        let response = engine
            .evaluate(&request("edge", &[&[("path", "/login")], &[("path", "/login")]]))
            .unwrap();
        assert_eq!(codes(&response), vec![Code::Ok, Code::OverLimit]);
    }

    #[test]
    fn test_stats_recorded() {
        let engine = engine_with(CONFIG);
        let req = request("edge", &[&[("path", "/login")]]);
        engine.evaluate(&req).unwrap();
        engine.evaluate(&req).unwrap();
        engine.evaluate(&req).unwrap();

        let counts = engine.stats().limit_counts("edge", "path_/login").unwrap();
        assert_eq!(counts.total_hits, 3);
        assert_eq!(counts.within_limit, 1);
        assert_eq!(counts.over_limit, 2);
    }

    #[test]
    fn test_concurrent_requests_share_bucket() {
        let engine = engine_with(CONFIG);
        let req = request("edge", &[&[("path", "/login")]]);

        let codes: Vec<Code> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..16)
                .map(|_| s.spawn(|| engine.evaluate(&req).unwrap().overall_code))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(codes.iter().filter(|c| **c == Code::Ok).count(), 1);
        assert_eq!(codes.iter().filter(|c| **c == Code::OverLimit).count(), 15);
    }
}
