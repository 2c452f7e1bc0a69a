//! SSH client handler implementation
//!
//! Implements the `russh::client::Handler` trait to verify server host keys.

use tracing::{debug, warn};

/// SSH client handler for russh
///
/// Checks the server key against the user's `known_hosts` file. With host
/// key checking disabled every key is accepted, which is what freshly
/// launched instances usually need.
#[derive(Debug, Clone)]
pub struct SshHandler {
    host: String,
    port: u16,
    host_key_checking: bool,
}

impl SshHandler {
    /// Create a handler for `host:port`
    pub fn new(host: impl Into<String>, port: u16, host_key_checking: bool) -> Self {
        Self {
            host: host.into(),
            port,
            host_key_checking,
        }
    }
}

impl russh::client::Handler for SshHandler {
    type Error = anyhow::Error;

    /// Verify the server's host key
    async fn check_server_key(
        &mut self,
        server_public_key: &russh::keys::PublicKey,
    ) -> Result<bool, Self::Error> {
        if !self.host_key_checking {
            debug!("Host key checking disabled, accepting key for {}", self.host);
            return Ok(true);
        }

        match russh::keys::check_known_hosts(&self.host, self.port, server_public_key) {
            Ok(true) => Ok(true),
            Ok(false) => {
                warn!(
                    "Host key for {}:{} is not in known_hosts; use --no-host-key-checking to accept it",
                    self.host, self.port
                );
                Ok(false)
            }
            Err(e) => {
                warn!("Host key verification for {} failed: {}", self.host, e);
                Ok(false)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handler_creation() {
        let handler = SshHandler::new("10.0.0.5", 22, true);
        let debug = format!("{:?}", handler);
        assert!(debug.contains("SshHandler"));
        assert!(debug.contains("10.0.0.5"));
    }
}
