//! EC2 / EC2 Instance Connect provider
//!
//! Lookups go through `DescribeInstances`, the push through
//! `SendSSHPublicKey`. Both SDK clients share one `SdkConfig` built from the
//! session's [`ProviderCredentials`] and [`ProviderPolicy`].

use async_trait::async_trait;
use aws_config::retry::RetryConfig;
use aws_config::timeout::TimeoutConfig;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_ec2::config::Credentials;
use aws_sdk_ec2::error::{DisplayErrorContext, ProvideErrorMetadata};
use aws_sdk_ec2::operation::describe_instances::DescribeInstancesOutput;
use aws_sdk_ec2::types::Filter;
use tracing::debug;

use super::{AddressFilter, InstanceConnectApi, InstanceRecord, PushRequest};
use crate::config::{ProviderCredentials, ProviderPolicy};
use crate::error::{EicSshError, Result};

const CREDENTIALS_SOURCE: &str = "eic-ssh";

/// EC2 error codes for an unknown or malformed instance id
const INVALID_INSTANCE_ID_PREFIX: &str = "InvalidInstanceID.";

/// AWS implementation of [`InstanceConnectApi`]
#[derive(Clone, Debug)]
pub struct AwsInstanceConnect {
    ec2: aws_sdk_ec2::Client,
    instance_connect: aws_sdk_ec2instanceconnect::Client,
}

impl AwsInstanceConnect {
    /// Build both SDK clients.
    ///
    /// Credentials or region left unset fall back to the SDK's default
    /// provider chain.
    pub async fn new(credentials: &ProviderCredentials, policy: &ProviderPolicy) -> Self {
        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .timeout_config(
                TimeoutConfig::builder()
                    .operation_timeout(policy.timeout)
                    .build(),
            )
            .retry_config(RetryConfig::standard().with_max_attempts(policy.max_attempts));

        if let Some(ref region) = credentials.region {
            loader = loader.region(Region::new(region.clone()));
        }

        if let (Some(access_key), Some(secret_key)) =
            (&credentials.access_key, &credentials.secret_key)
        {
            loader = loader.credentials_provider(Credentials::new(
                access_key.clone(),
                secret_key.clone(),
                None,
                None,
                CREDENTIALS_SOURCE,
            ));
        }

        let sdk_config = loader.load().await;
        debug!(
            "AWS clients configured for region {:?}",
            sdk_config.region().map(|r| r.as_ref().to_string())
        );

        Self {
            ec2: aws_sdk_ec2::Client::new(&sdk_config),
            instance_connect: aws_sdk_ec2instanceconnect::Client::new(&sdk_config),
        }
    }
}

/// Flatten reservations into instance records
fn instance_records(output: &DescribeInstancesOutput) -> Vec<InstanceRecord> {
    output
        .reservations()
        .iter()
        .flat_map(|reservation| reservation.instances())
        .filter_map(|instance| {
            instance.instance_id().map(|id| InstanceRecord {
                instance_id: id.to_string(),
                availability_zone: instance
                    .placement()
                    .and_then(|p| p.availability_zone())
                    .map(str::to_string),
            })
        })
        .collect()
}

/// EC2 rejects unknown ids instead of returning no reservations
fn describe_by_id_error(instance_id: &str, code: Option<&str>, detail: &str) -> EicSshError {
    match code {
        Some(code) if code.starts_with(INVALID_INSTANCE_ID_PREFIX) => {
            debug!("DescribeInstances {}: {}", instance_id, code);
            EicSshError::InstanceNotFound(instance_id.to_string())
        }
        _ => EicSshError::provider(format!("DescribeInstances {}: {}", instance_id, detail)),
    }
}

#[async_trait]
impl InstanceConnectApi for AwsInstanceConnect {
    async fn describe_instances_by_filter(
        &self,
        filter: AddressFilter,
        value: &str,
    ) -> Result<Vec<InstanceRecord>> {
        let output = self
            .ec2
            .describe_instances()
            .filters(
                Filter::builder()
                    .name(filter.filter_name())
                    .values(value)
                    .build(),
            )
            .send()
            .await
            .map_err(|e| {
                EicSshError::provider(format!(
                    "DescribeInstances {}={}: {}",
                    filter,
                    value,
                    DisplayErrorContext(&e)
                ))
            })?;

        Ok(instance_records(&output))
    }

    async fn describe_instances_by_id(&self, instance_id: &str) -> Result<Vec<InstanceRecord>> {
        let output = self
            .ec2
            .describe_instances()
            .instance_ids(instance_id)
            .send()
            .await
            .map_err(|e| {
                describe_by_id_error(instance_id, e.code(), &DisplayErrorContext(&e).to_string())
            })?;

        Ok(instance_records(&output))
    }

    async fn send_ssh_public_key(&self, request: &PushRequest) -> Result<()> {
        self.instance_connect
            .send_ssh_public_key()
            .instance_id(&request.instance_id)
            .availability_zone(&request.availability_zone)
            .instance_os_user(&request.os_user)
            .ssh_public_key(&request.public_key)
            .send()
            .await
            .map_err(|e| EicSshError::provider(DisplayErrorContext(&e).to_string()))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aws_sdk_ec2::types::{Instance, Placement, Reservation};

    fn instance(id: Option<&str>, zone: Option<&str>) -> Instance {
        let mut builder = Instance::builder();
        if let Some(id) = id {
            builder = builder.instance_id(id);
        }
        if let Some(zone) = zone {
            builder = builder.placement(Placement::builder().availability_zone(zone).build());
        }
        builder.build()
    }

    #[test]
    fn test_instance_records_flatten_reservations() {
        let output = DescribeInstancesOutput::builder()
            .reservations(
                Reservation::builder()
                    .instances(instance(Some("i-0abc"), Some("us-east-1a")))
                    .instances(instance(None, Some("us-east-1a")))
                    .build(),
            )
            .reservations(
                Reservation::builder()
                    .instances(instance(Some("i-0def"), None))
                    .build(),
            )
            .build();

        let records = instance_records(&output);

        assert_eq!(
            records,
            [
                InstanceRecord::new("i-0abc", "us-east-1a"),
                InstanceRecord {
                    instance_id: "i-0def".to_string(),
                    availability_zone: None,
                },
            ]
        );
    }

    #[test]
    fn test_instance_records_empty_output() {
        let output = DescribeInstancesOutput::builder().build();
        assert!(instance_records(&output).is_empty());
    }

    #[test]
    fn test_unknown_instance_id_is_not_found() {
        for code in ["InvalidInstanceID.NotFound", "InvalidInstanceID.Malformed"] {
            let err = describe_by_id_error("i-0bad", Some(code), "service error");
            assert!(matches!(err, EicSshError::InstanceNotFound(ref id) if id == "i-0bad"));
            assert!(!err.is_retryable());
        }
    }

    #[test]
    fn test_other_describe_errors_are_provider_errors() {
        let err = describe_by_id_error("i-0123", Some("RequestLimitExceeded"), "slow down");
        assert!(matches!(err, EicSshError::Provider(ref msg) if msg.contains("slow down")));

        let err = describe_by_id_error("i-0123", None, "dispatch failure");
        assert!(matches!(err, EicSshError::Provider(_)));
    }
}
