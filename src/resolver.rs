//! Instance identity resolution
//!
//! Maps the session target to the instance id and availability zone the push
//! API needs. With an explicit instance id only the zone is looked up;
//! otherwise the target address is searched as a public IP, then a private
//! IP, then a private DNS name. The first successful resolution is cached
//! for the rest of the session.

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tracing::{debug, info};

use crate::error::{EicSshError, Result};
use crate::provider::{with_deadline, AddressFilter, InstanceConnectApi, InstanceRecord};

/// Instance id plus locality, as required by the push API
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceIdentity {
    pub instance_id: String,
    pub availability_zone: String,
    pub resolved_at: SystemTime,
}

/// Cache state of a resolver
#[derive(Debug, Clone)]
enum Resolution {
    Unresolved,
    Resolved(InstanceIdentity),
}

/// Resolves and caches the identity of one target
pub struct InstanceResolver {
    api: Arc<dyn InstanceConnectApi>,
    explicit_instance_id: Option<String>,
    target_address: String,
    call_timeout: Duration,
    resolution: Resolution,
}

impl InstanceResolver {
    pub fn new(
        api: Arc<dyn InstanceConnectApi>,
        explicit_instance_id: Option<String>,
        target_address: impl Into<String>,
        call_timeout: Duration,
    ) -> Self {
        Self {
            api,
            explicit_instance_id,
            target_address: target_address.into(),
            call_timeout,
            resolution: Resolution::Unresolved,
        }
    }

    /// The cached identity, if resolution already succeeded
    pub fn cached(&self) -> Option<&InstanceIdentity> {
        match &self.resolution {
            Resolution::Resolved(identity) => Some(identity),
            Resolution::Unresolved => None,
        }
    }

    /// Resolve the target, returning the cached identity when available.
    ///
    /// Failures are not cached; the next call queries the provider again.
    pub async fn resolve(&mut self) -> Result<&InstanceIdentity> {
        if let Resolution::Resolved(ref identity) = self.resolution {
            debug!(
                "Using {} resolved {}s ago",
                identity.instance_id,
                identity.resolved_at.elapsed().unwrap_or_default().as_secs()
            );
        } else {
            let identity = match self.explicit_instance_id.clone() {
                Some(instance_id) => self.resolve_by_id(&instance_id).await?,
                None => self.reverse_lookup().await?,
            };
            info!(
                "Resolved {} to {} in {}",
                self.target_address, identity.instance_id, identity.availability_zone
            );
            self.resolution = Resolution::Resolved(identity);
        }

        match &self.resolution {
            Resolution::Resolved(identity) => Ok(identity),
            Resolution::Unresolved => unreachable!("resolution stored above"),
        }
    }

    /// Look up the zone of a caller-supplied instance id
    async fn resolve_by_id(&self, instance_id: &str) -> Result<InstanceIdentity> {
        debug!("Looking up availability zone of {}", instance_id);

        let records = with_deadline(
            self.call_timeout,
            self.api.describe_instances_by_id(instance_id),
        )
        .await?;

        let record = records
            .into_iter()
            .find(|r| r.instance_id == instance_id)
            .ok_or_else(|| EicSshError::InstanceNotFound(instance_id.to_string()))?;

        identity_from(record)
    }

    /// Search the target address under each address kind in turn
    async fn reverse_lookup(&self) -> Result<InstanceIdentity> {
        debug!("No instance id provided, looking up {}", self.target_address);

        for filter in AddressFilter::LOOKUP_ORDER {
            let records = with_deadline(
                self.call_timeout,
                self.api
                    .describe_instances_by_filter(filter, &self.target_address),
            )
            .await?;

            let mut matches: Vec<InstanceRecord> = Vec::new();
            for record in records {
                if !matches.iter().any(|m| m.instance_id == record.instance_id) {
                    matches.push(record);
                }
            }

            match matches.len() {
                0 => debug!("{}={} matched no instances", filter, self.target_address),
                1 => {
                    let record = matches.remove(0);
                    debug!(
                        "{}={} matched {}",
                        filter, self.target_address, record.instance_id
                    );
                    return identity_from(record);
                }
                _ => {
                    return Err(EicSshError::AmbiguousInstance {
                        filter: filter.filter_name().to_string(),
                        value: self.target_address.clone(),
                        candidates: matches.into_iter().map(|m| m.instance_id).collect(),
                    });
                }
            }
        }

        Err(EicSshError::InstanceNotFound(self.target_address.clone()))
    }
}

fn identity_from(record: InstanceRecord) -> Result<InstanceIdentity> {
    let availability_zone = record.availability_zone.ok_or_else(|| {
        EicSshError::provider(format!(
            "instance {} has no availability zone",
            record.instance_id
        ))
    })?;

    Ok(InstanceIdentity {
        instance_id: record.instance_id,
        availability_zone,
        resolved_at: SystemTime::now(),
    })
}

impl std::fmt::Debug for InstanceResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstanceResolver")
            .field("explicit_instance_id", &self.explicit_instance_id)
            .field("target_address", &self.target_address)
            .field("resolution", &self.resolution)
            .finish_non_exhaustive()
    }
}
