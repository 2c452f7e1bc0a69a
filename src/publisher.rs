//! Public key push

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::{EicSshError, Result};
use crate::provider::{with_deadline, InstanceConnectApi, PushRequest};
use crate::resolver::InstanceIdentity;

/// Pushes the session public key to the provider.
///
/// Each [`push`](KeyPublisher::push) is exactly one provider call; retrying is
/// left to the caller.
pub struct KeyPublisher {
    api: Arc<dyn InstanceConnectApi>,
    call_timeout: Duration,
}

impl KeyPublisher {
    pub fn new(api: Arc<dyn InstanceConnectApi>, call_timeout: Duration) -> Self {
        Self { api, call_timeout }
    }

    /// Authorize `public_key` for `os_user` on the identified instance
    pub async fn push(
        &self,
        identity: &InstanceIdentity,
        os_user: &str,
        public_key: &str,
    ) -> Result<()> {
        let request = PushRequest {
            instance_id: identity.instance_id.clone(),
            availability_zone: identity.availability_zone.clone(),
            os_user: os_user.to_string(),
            public_key: public_key.to_string(),
        };

        debug!(
            "Pushing public key for {}@{} ({})",
            os_user, identity.instance_id, identity.availability_zone
        );

        with_deadline(self.call_timeout, self.api.send_ssh_public_key(&request))
            .await
            .map_err(|e| match e {
                EicSshError::Provider(reason) => {
                    warn!("Key push to {} rejected: {}", identity.instance_id, reason);
                    EicSshError::PushRejected {
                        instance_id: identity.instance_id.clone(),
                        reason,
                    }
                }
                other => other,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ApiCall, FakeApi};
    use std::time::SystemTime;

    fn identity() -> InstanceIdentity {
        InstanceIdentity {
            instance_id: "i-0123".to_string(),
            availability_zone: "us-east-1a".to_string(),
            resolved_at: SystemTime::now(),
        }
    }

    #[tokio::test]
    async fn test_push_sends_one_request() {
        let api = Arc::new(FakeApi::new());
        let publisher = KeyPublisher::new(api.clone(), Duration::from_secs(5));

        publisher
            .push(&identity(), "ec2-user", "ssh-rsa AAAAB3Nza")
            .await
            .unwrap();

        assert_eq!(
            api.calls(),
            vec![ApiCall::Push(PushRequest {
                instance_id: "i-0123".to_string(),
                availability_zone: "us-east-1a".to_string(),
                os_user: "ec2-user".to_string(),
                public_key: "ssh-rsa AAAAB3Nza".to_string(),
            })]
        );
    }

    #[tokio::test]
    async fn test_rejection_carries_provider_reason() {
        let api = Arc::new(FakeApi::new());
        api.reject_pushes(Some("AccessDeniedException: not authorized"));
        let publisher = KeyPublisher::new(api.clone(), Duration::from_secs(5));

        let err = publisher
            .push(&identity(), "ubuntu", "ssh-rsa AAAAB3Nza")
            .await
            .unwrap_err();

        match err {
            EicSshError::PushRejected {
                instance_id,
                reason,
            } => {
                assert_eq!(instance_id, "i-0123");
                assert!(reason.contains("AccessDenied"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(api.push_count(), 1);
    }
}
