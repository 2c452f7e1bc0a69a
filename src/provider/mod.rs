//! Cloud provider seam
//!
//! The core talks to the provider only through [`InstanceConnectApi`]: two
//! instance lookups and the public key push. The AWS implementation lives in
//! [`aws`].

#[cfg(feature = "aws")]
pub mod aws;

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{EicSshError, Result};

#[cfg(feature = "aws")]
pub use aws::AwsInstanceConnect;

/// Address kinds usable for reverse lookup, in lookup order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressFilter {
    /// Public IPv4 address
    PublicIp,
    /// Private IPv4 address
    PrivateIp,
    /// Private DNS name
    PrivateDnsName,
}

impl AddressFilter {
    /// Order in which reverse lookup tries each kind
    pub const LOOKUP_ORDER: [AddressFilter; 3] = [
        AddressFilter::PublicIp,
        AddressFilter::PrivateIp,
        AddressFilter::PrivateDnsName,
    ];

    /// DescribeInstances filter name
    pub fn filter_name(self) -> &'static str {
        match self {
            AddressFilter::PublicIp => "ip-address",
            AddressFilter::PrivateIp => "private-ip-address",
            AddressFilter::PrivateDnsName => "private-dns-name",
        }
    }
}

impl std::fmt::Display for AddressFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.filter_name())
    }
}

/// One instance from a describe response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceRecord {
    pub instance_id: String,
    pub availability_zone: Option<String>,
}

impl InstanceRecord {
    pub fn new(instance_id: impl Into<String>, availability_zone: impl Into<String>) -> Self {
        Self {
            instance_id: instance_id.into(),
            availability_zone: Some(availability_zone.into()),
        }
    }
}

/// Arguments of a SendSSHPublicKey call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushRequest {
    pub instance_id: String,
    pub availability_zone: String,
    pub os_user: String,
    pub public_key: String,
}

/// Provider operations consumed by the core
#[async_trait]
pub trait InstanceConnectApi: Send + Sync {
    /// Describe instances whose `filter` address equals `value`
    async fn describe_instances_by_filter(
        &self,
        filter: AddressFilter,
        value: &str,
    ) -> Result<Vec<InstanceRecord>>;

    /// Describe a single instance by id
    async fn describe_instances_by_id(&self, instance_id: &str) -> Result<Vec<InstanceRecord>>;

    /// Authorize `request.public_key` for `request.os_user` on the instance.
    ///
    /// A refusal is reported as [`EicSshError::Provider`] carrying the
    /// provider's reason.
    async fn send_ssh_public_key(&self, request: &PushRequest) -> Result<()>;
}

/// Run a provider call under a deadline
pub(crate) async fn with_deadline<T>(
    deadline: Duration,
    call: impl Future<Output = Result<T>>,
) -> Result<T> {
    match tokio::time::timeout(deadline, call).await {
        Ok(result) => result,
        Err(_) => Err(EicSshError::Timeout(deadline.as_millis() as u64)),
    }
}
