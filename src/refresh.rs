//! Key push freshness
//!
//! A pushed key is trusted for [`PUSH_EXPIRY`](crate::config::PUSH_EXPIRY)
//! after the push succeeded. Before every command the scheduler re-pushes if
//! that window has passed.

use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use crate::error::Result;
use crate::publisher::KeyPublisher;
use crate::resolver::InstanceResolver;

/// Whether the last push can still be relied on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushState {
    /// Never pushed, or the last push expired or failed
    Stale,
    /// Last successful push
    Fresh { pushed_at: Instant },
}

#[derive(Debug)]
pub struct RefreshScheduler {
    expiry: Duration,
    state: PushState,
}

impl RefreshScheduler {
    pub fn new(expiry: Duration) -> Self {
        Self {
            expiry,
            state: PushState::Stale,
        }
    }

    /// Current state, with expiry applied
    pub fn state(&self) -> PushState {
        match self.state {
            PushState::Fresh { pushed_at } if pushed_at.elapsed() <= self.expiry => self.state,
            _ => PushState::Stale,
        }
    }

    pub fn is_fresh(&self) -> bool {
        matches!(self.state(), PushState::Fresh { .. })
    }

    /// Push the key unless a push is still fresh.
    ///
    /// On failure the state is left stale and the error returned, so the
    /// next call tries again. Resolution goes through the resolver's cache.
    pub async fn ensure_fresh(
        &mut self,
        resolver: &mut InstanceResolver,
        publisher: &KeyPublisher,
        os_user: &str,
        public_key: &str,
    ) -> Result<()> {
        if self.is_fresh() {
            return Ok(());
        }

        debug!("Public key expiring or not sent, pushing now");
        self.state = PushState::Stale;

        let identity = resolver.resolve().await?;
        publisher.push(identity, os_user, public_key).await?;

        self.state = PushState::Fresh {
            pushed_at: Instant::now(),
        };
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EicSshError;
    use crate::provider::{AddressFilter, InstanceRecord};
    use crate::testing::{ApiCall, FakeApi};
    use std::sync::Arc;

    const EXPIRY: Duration = Duration::from_secs(45);
    const KEY: &str = "ssh-rsa AAAAB3Nza";

    struct Harness {
        api: Arc<FakeApi>,
        resolver: InstanceResolver,
        publisher: KeyPublisher,
        scheduler: RefreshScheduler,
    }

    impl Harness {
        fn new(api: FakeApi, instance_id: Option<&str>, address: &str) -> Self {
            let api = Arc::new(api);
            let timeout = Duration::from_secs(5);
            Self {
                resolver: InstanceResolver::new(
                    api.clone(),
                    instance_id.map(str::to_string),
                    address,
                    timeout,
                ),
                publisher: KeyPublisher::new(api.clone(), timeout),
                scheduler: RefreshScheduler::new(EXPIRY),
                api,
            }
        }

        async fn ensure_fresh(&mut self) -> Result<()> {
            self.scheduler
                .ensure_fresh(&mut self.resolver, &self.publisher, "ec2-user", KEY)
                .await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_explicit_id_first_push() {
        let mut h = Harness::new(
            FakeApi::new().with_instance("i-0123", "us-west-2a"),
            Some("i-0123"),
            "10.0.0.5",
        );
        assert_eq!(h.scheduler.state(), PushState::Stale);

        h.ensure_fresh().await.unwrap();

        let calls = h.api.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0], ApiCall::DescribeById("i-0123".to_string()));
        assert!(matches!(calls[1], ApiCall::Push(ref r) if r.availability_zone == "us-west-2a"));
        assert!(h.scheduler.is_fresh());
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_call_within_window_does_not_push() {
        let mut h = Harness::new(
            FakeApi::new().with_instance("i-0123", "us-west-2a"),
            Some("i-0123"),
            "10.0.0.5",
        );

        h.ensure_fresh().await.unwrap();
        tokio::time::advance(Duration::from_secs(30)).await;
        h.ensure_fresh().await.unwrap();

        assert_eq!(h.api.push_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_push_repeated_after_window() {
        let mut h = Harness::new(
            FakeApi::new().with_instance("i-0123", "us-west-2a"),
            Some("i-0123"),
            "10.0.0.5",
        );

        h.ensure_fresh().await.unwrap();
        tokio::time::advance(EXPIRY + Duration::from_secs(1)).await;
        assert!(!h.scheduler.is_fresh());
        h.ensure_fresh().await.unwrap();

        assert_eq!(h.api.push_count(), 2);
        // identity comes from the cache the second time
        assert_eq!(h.api.lookup_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reverse_lookup_then_push() {
        let mut h = Harness::new(
            FakeApi::new().with_match(
                AddressFilter::PrivateIp,
                "10.0.0.5",
                InstanceRecord::new("i-0abc", "us-east-1a"),
            ),
            None,
            "10.0.0.5",
        );

        h.ensure_fresh().await.unwrap();

        let calls = h.api.calls();
        assert_eq!(
            calls[..2],
            [
                ApiCall::DescribeByFilter(AddressFilter::PublicIp, "10.0.0.5".to_string()),
                ApiCall::DescribeByFilter(AddressFilter::PrivateIp, "10.0.0.5".to_string()),
            ]
        );
        match &calls[2] {
            ApiCall::Push(request) => {
                assert_eq!(request.instance_id, "i-0abc");
                assert_eq!(request.availability_zone, "us-east-1a");
                assert_eq!(request.os_user, "ec2-user");
                assert_eq!(request.public_key, KEY);
            }
            other => panic!("expected push, got {other:?}"),
        }
        assert_eq!(calls.len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_push_stays_stale_and_keeps_identity() {
        let api = FakeApi::new().with_instance("i-0123", "us-west-2a");
        api.reject_pushes(Some("AccessDeniedException"));
        let mut h = Harness::new(api, Some("i-0123"), "10.0.0.5");

        let err = h.ensure_fresh().await.unwrap_err();
        assert!(matches!(err, EicSshError::PushRejected { .. }));
        assert_eq!(h.scheduler.state(), PushState::Stale);
        assert_eq!(h.resolver.cached().unwrap().instance_id, "i-0123");

        h.api.reject_pushes(None);
        h.ensure_fresh().await.unwrap();

        assert!(h.scheduler.is_fresh());
        assert_eq!(h.api.push_count(), 2);
        assert_eq!(h.api.lookup_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_resolution_stays_stale() {
        let mut h = Harness::new(FakeApi::new(), None, "10.9.9.9");

        let err = h.ensure_fresh().await.unwrap_err();
        assert!(matches!(err, EicSshError::InstanceNotFound(_)));
        assert!(!h.scheduler.is_fresh());
        assert_eq!(h.api.push_count(), 0);
    }
}
