//! eic-ssh - SSH to cloud instances with ephemeral, pushed keys
//!
//! This crate runs remote commands over SSH against EC2 instances whose
//! access is granted through EC2 Instance Connect. Instead of relying on a
//! long-lived authorized key, each session owns a keypair and pushes its
//! public half to the instance shortly before every command, re-pushing once
//! the previous push is likely to have expired.
//!
//! # Components
//!
//! - [`keys`] - loads a supplied OpenSSH key or generates an ephemeral RSA key
//!   in an owner-only temporary file
//! - [`resolver`] - finds the instance id and availability zone for a target,
//!   by id or by reverse address lookup, and caches it
//! - [`publisher`] - sends the public key through the provider's push API
//! - [`refresh`] - decides before each command whether a new push is needed
//! - [`session`] - composes the above around any [`Transport`]
//!
//! # Example Usage (CLI)
//!
//! ```bash
//! eic-ssh --host=10.0.0.5 --user=ec2-user --region=us-east-1 -- uptime
//! ```

pub mod config;
pub mod error;
pub mod keys;
pub mod provider;
pub mod publisher;
pub mod refresh;
pub mod resolver;
pub mod session;
pub mod transport;

#[cfg(test)]
mod testing;

// Re-exports for convenience
pub use config::{
    Args, Config, ProviderCredentials, ProviderPolicy, SessionConfig, SshOptions, TransportKind,
};
pub use error::{EicSshError, Result};
pub use keys::{obtain_keypair, Keypair};
pub use provider::{AddressFilter, InstanceConnectApi, InstanceRecord, PushRequest};
pub use publisher::KeyPublisher;
pub use refresh::{PushState, RefreshScheduler};
pub use resolver::{InstanceIdentity, InstanceResolver};
pub use session::InstanceConnectSession;
pub use transport::{
    CommandOutput, OpenSshTransport, RusshTransport, SshHandler, Transport, TransportAuth,
};

#[cfg(feature = "aws")]
pub use provider::AwsInstanceConnect;
