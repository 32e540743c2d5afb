//! Rate limiter trait a transport layer calls into.

use async_trait::async_trait;

use super::descriptor::{RateLimitRequest, RateLimitResponse};
use super::engine::Engine;
use crate::error::EvaluateError;

/// Trait for rate limiter implementations.
///
/// A gRPC or other front end holds a `RateLimiterBackend` and maps
/// [`EvaluateError`] onto its own status codes.
#[async_trait]
pub trait RateLimiterBackend: Send + Sync {
    /// Decide whether rate limiting should take place for a request.
    async fn should_rate_limit(
        &self,
        request: RateLimitRequest,
    ) -> Result<RateLimitResponse, EvaluateError>;
}

#[async_trait]
impl RateLimiterBackend for Engine {
    async fn should_rate_limit(
        &self,
        request: RateLimitRequest,
    ) -> Result<RateLimitResponse, EvaluateError> {
        self.evaluate(&request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::{Code, RateLimitDescriptor, SnapshotHandle, Stats};
    use std::sync::Arc;

    async fn check<B: RateLimiterBackend>(
        backend: &B,
        domain: &str,
    ) -> Result<RateLimitResponse, EvaluateError> {
        backend
            .should_rate_limit(RateLimitRequest {
                domain: domain.to_string(),
                descriptors: vec![RateLimitDescriptor::from_pairs([("test_key", "test_value")])],
                hits_addend: 1,
            })
            .await
    }

    #[tokio::test]
    async fn test_backend_without_configuration() {
        let engine = Engine::new(SnapshotHandle::new(), Arc::new(Stats::new()));

        let err = check(&engine, "test").await.unwrap_err();
        assert_eq!(err, EvaluateError::NoConfiguration);
        assert!(!err.is_invalid_argument());

        let err = check(&engine, "").await.unwrap_err();
        assert!(err.is_invalid_argument());
    }

    #[tokio::test]
    async fn test_backend_valid_request() {
        let stats = Arc::new(Stats::new());
        let coordinator = crate::reload::Coordinator::new(SnapshotHandle::new(), stats.clone());
        coordinator
            .on_configuration_changed(
                [("rules.yaml".to_string(), b"domain: test\ndescriptors: []\n".to_vec())]
                    .into_iter()
                    .collect(),
            )
            .unwrap();
        let engine = Engine::new(coordinator.snapshots().clone(), stats);

        let response = check(&engine, "test").await.unwrap();
        assert_eq!(response.overall_code, Code::Ok);
        assert_eq!(response.statuses.len(), 1);
        assert_eq!(response.statuses[0].code, Code::Unknown);
    }
}
