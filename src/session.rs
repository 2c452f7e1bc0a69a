//! Instance Connect session
//!
//! Wraps any [`Transport`] so that a fresh key push always precedes the
//! command it carries. One session serves one target sequentially and owns
//! its keypair, resolver, publisher and refresh state.

use std::path::Path;
use std::sync::Arc;

use tracing::{debug, error, info, info_span, warn, Instrument, Span};

use crate::config::SessionConfig;
use crate::error::{EicSshError, Result};
use crate::keys::{obtain_keypair, Keypair};
use crate::provider::InstanceConnectApi;
use crate::publisher::KeyPublisher;
use crate::refresh::{PushState, RefreshScheduler};
use crate::resolver::{InstanceIdentity, InstanceResolver};
use crate::transport::{CommandOutput, Transport, TransportAuth};

/// SSH session whose key is authorized through the provider's push API
pub struct InstanceConnectSession<T: Transport> {
    transport: T,
    keypair: Keypair,
    resolver: InstanceResolver,
    publisher: KeyPublisher,
    scheduler: RefreshScheduler,
    os_user: String,
    auth: TransportAuth,
    span: Span,
}

impl<T: Transport> InstanceConnectSession<T> {
    /// Set up a session, loading or generating its keypair.
    ///
    /// Nothing is sent to the provider until the first command.
    pub fn new(
        config: &SessionConfig,
        api: Arc<dyn InstanceConnectApi>,
        transport: T,
    ) -> Result<Self> {
        let span = info_span!(
            "eic_session",
            host = %config.target_address,
            user = %config.os_user
        );

        let keypair = span.in_scope(|| obtain_keypair(config.private_key_file.as_deref()))?;

        let resolver = InstanceResolver::new(
            api.clone(),
            config.instance_id.clone(),
            &config.target_address,
            config.provider_timeout,
        );
        let publisher = KeyPublisher::new(api, config.provider_timeout);

        Ok(Self {
            transport,
            keypair,
            resolver,
            publisher,
            scheduler: RefreshScheduler::new(config.push_expiry),
            os_user: config.os_user.clone(),
            auth: TransportAuth::default(),
            span,
        })
    }

    /// Start from existing transport auth parameters.
    ///
    /// Password parameters are cleared again before every command.
    pub fn with_auth(mut self, auth: TransportAuth) -> Self {
        self.auth = auth;
        self
    }

    /// Public key pushed to the provider
    pub fn public_key(&self) -> &str {
        self.keypair.public_key()
    }

    /// Private key file handed to the transport
    pub fn private_key_file(&self) -> &Path {
        self.keypair.private_key_file()
    }

    /// Resolved identity of the target, once known
    pub fn identity(&self) -> Option<&InstanceIdentity> {
        self.resolver.cached()
    }

    pub fn push_state(&self) -> PushState {
        self.scheduler.state()
    }

    /// Run `command` on the target after making sure the key is authorized.
    ///
    /// A failed push aborts only this command; the next call retries.
    pub async fn exec_command(
        &mut self,
        command: &str,
        in_data: Option<&[u8]>,
    ) -> Result<CommandOutput> {
        if command.trim().is_empty() {
            return Err(EicSshError::invalid_params("command must not be empty"));
        }

        let span = self.span.clone();
        async {
            self.scheduler
                .ensure_fresh(
                    &mut self.resolver,
                    &self.publisher,
                    &self.os_user,
                    self.keypair.public_key(),
                )
                .await
                .inspect_err(|e| {
                    if e.is_retryable() {
                        warn!("Key push failed, next command retries: {}", e);
                    } else {
                        error!("Key push failed: {}", e);
                    }
                })?;

            self.auth.use_key_file(self.keypair.private_key_file());

            debug!("Executing remote command");
            self.transport
                .exec_command(command, in_data, &self.auth)
                .await
        }
        .instrument(span)
        .await
    }

    /// Close the transport and release the keypair, deleting a generated
    /// key file
    pub async fn close(mut self) -> Result<()> {
        let span = self.span.clone();
        async move {
            self.transport.close().await;
            self.keypair.discard()?;
            info!("Session closed");
            Ok(())
        }
        .instrument(span)
        .await
    }
}

impl<T: Transport> std::fmt::Debug for InstanceConnectSession<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstanceConnectSession")
            .field("os_user", &self.os_user)
            .field("keypair", &self.keypair)
            .field("resolver", &self.resolver)
            .field("scheduler", &self.scheduler)
            .finish_non_exhaustive()
    }
}
