//! In-process SSH transport
//!
//! Keeps one persistent russh connection per target, reconnecting when the
//! server closed it. Each command runs on its own session channel.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use russh::client::{self, Handle};
use russh::keys::PrivateKeyWithHashAlg;
use russh::{Channel, ChannelMsg};
use tokio::time::timeout;
use tracing::{debug, error, info};

use super::handler::SshHandler;
use super::{CommandOutput, Transport, TransportAuth};
use crate::config::SshOptions;
use crate::error::{EicSshError, Result};

/// Transport backed by the russh client
pub struct RusshTransport {
    host: String,
    username: String,
    options: SshOptions,
    session: Option<Handle<SshHandler>>,
}

impl RusshTransport {
    /// Create a transport for `username@host`.
    ///
    /// Does not connect; the first command does.
    pub fn new(host: impl Into<String>, username: impl Into<String>, options: SshOptions) -> Self {
        Self {
            host: host.into(),
            username: username.into(),
            options,
            session: None,
        }
    }

    /// Check if the connection is active
    pub fn is_connected(&self) -> bool {
        self.session.as_ref().is_some_and(|s| !s.is_closed())
    }

    /// Connect and authenticate unless an open connection exists
    async fn ensure_connected(&mut self, auth: &TransportAuth) -> Result<()> {
        if self.is_connected() {
            return Ok(());
        }

        if self.session.take().is_some() {
            debug!("Previous connection to {} was closed, reconnecting", self.host);
        }

        let session = self.connect(auth).await?;
        self.session = Some(session);
        Ok(())
    }

    /// Internal connection logic
    async fn connect(&self, auth: &TransportAuth) -> Result<Handle<SshHandler>> {
        info!(
            "Connecting to SSH server {}:{}...",
            self.host, self.options.port
        );

        let ssh_config = Arc::new(client::Config::default());
        let handler = SshHandler::new(
            &self.host,
            self.options.port,
            self.options.host_key_checking,
        );

        let addr = (self.host.as_str(), self.options.port);
        let connect_result = timeout(
            self.options.connect_timeout,
            client::connect(ssh_config, addr, handler),
        )
        .await;

        let mut session = match connect_result {
            Ok(Ok(session)) => session,
            Ok(Err(e)) => {
                error!("SSH connection failed: {}", e);
                return Err(EicSshError::connection(e.to_string()));
            }
            Err(_) => {
                let secs = self.options.connect_timeout.as_secs();
                error!("SSH connection timeout after {}s", secs);
                return Err(EicSshError::connection(format!(
                    "Connection timeout after {}s",
                    secs
                )));
            }
        };

        self.authenticate(&mut session, auth).await?;

        info!(
            "Successfully connected to {}@{}:{}",
            self.username, self.host, self.options.port
        );

        Ok(session)
    }

    /// Authenticate with the SSH server
    async fn authenticate(
        &self,
        session: &mut Handle<SshHandler>,
        auth: &TransportAuth,
    ) -> Result<()> {
        if let Some(ref key_path) = auth.private_key_file {
            debug!(
                "Attempting key authentication for user '{}' with {}",
                self.username,
                key_path.display()
            );

            let key = russh::keys::load_secret_key(key_path, None).map_err(|e| {
                EicSshError::key_load(key_path, format!("Failed to parse private key: {}", e))
            })?;

            // RSA keys need the server's preferred signature hash
            let hash_alg = if key.algorithm().is_rsa() {
                session.best_supported_rsa_hash().await.ok().flatten().flatten()
            } else {
                None
            };
            let key_with_alg = PrivateKeyWithHashAlg::new(Arc::new(key), hash_alg);

            let auth_result = session
                .authenticate_publickey(&self.username, key_with_alg)
                .await
                .map_err(|e| EicSshError::auth(e.to_string()))?;

            return if auth_result.success() {
                info!("Key authentication successful");
                Ok(())
            } else {
                Err(EicSshError::auth("Key authentication rejected"))
            };
        }

        if let Some(ref password) = auth.password {
            debug!(
                "Attempting password authentication for user '{}'",
                self.username
            );
            let auth_result = session
                .authenticate_password(&self.username, password)
                .await
                .map_err(|e| EicSshError::auth(e.to_string()))?;

            return if auth_result.success() {
                info!("Password authentication successful");
                Ok(())
            } else {
                Err(EicSshError::auth("Password authentication rejected"))
            };
        }

        Err(EicSshError::auth(
            "No authentication method available (require password or private key file)",
        ))
    }

    /// Open a new session channel
    async fn open_channel(&self) -> Result<Channel<client::Msg>> {
        let session = self
            .session
            .as_ref()
            .ok_or_else(|| EicSshError::connection("SSH connection not established"))?;

        session
            .channel_open_session()
            .await
            .map_err(|e| EicSshError::connection(format!("Failed to open channel: {}", e)))
    }

    /// Execute command via a new exec channel
    async fn exec_via_channel(
        &self,
        command: &str,
        in_data: Option<&[u8]>,
        timeout_duration: Duration,
    ) -> Result<CommandOutput> {
        let mut channel = self.open_channel().await?;
        run_on_channel(&mut channel, command, in_data, timeout_duration).await
    }
}

/// The channel operations one exec goes through
#[async_trait]
trait ExecChannel: Send {
    async fn exec(&mut self, command: &str) -> std::result::Result<(), russh::Error>;
    async fn data(&mut self, data: &[u8]) -> std::result::Result<(), russh::Error>;
    async fn eof(&mut self) -> std::result::Result<(), russh::Error>;
    async fn wait(&mut self) -> Option<ChannelMsg>;
}

#[async_trait]
impl ExecChannel for Channel<client::Msg> {
    async fn exec(&mut self, command: &str) -> std::result::Result<(), russh::Error> {
        Channel::exec(self, true, command).await
    }

    async fn data(&mut self, data: &[u8]) -> std::result::Result<(), russh::Error> {
        Channel::data(self, data).await
    }

    async fn eof(&mut self) -> std::result::Result<(), russh::Error> {
        Channel::eof(self).await
    }

    async fn wait(&mut self) -> Option<ChannelMsg> {
        Channel::wait(self).await
    }
}

/// Run `command` on `channel` with the whole exchange under one deadline.
///
/// Sending input can block on the channel window when the remote side does
/// not read stdin, so exec, input, eof and output collection share the timeout.
async fn run_on_channel<C: ExecChannel>(
    channel: &mut C,
    command: &str,
    in_data: Option<&[u8]>,
    timeout_duration: Duration,
) -> Result<CommandOutput> {
    let exchange = async {
        channel
            .exec(command)
            .await
            .map_err(|e| EicSshError::connection(format!("Failed to exec command: {}", e)))?;

        if let Some(data) = in_data {
            channel
                .data(data)
                .await
                .map_err(|e| EicSshError::connection(format!("Failed to send input: {}", e)))?;
        }
        channel
            .eof()
            .await
            .map_err(|e| EicSshError::connection(format!("Failed to close input: {}", e)))?;

        Ok::<_, EicSshError>(collect_channel_output(channel).await)
    };

    match timeout(timeout_duration, exchange).await {
        Ok(result) => result,
        Err(_) => Err(EicSshError::Timeout(timeout_duration.as_millis() as u64)),
    }
}

/// Collect output from a channel until it closes
async fn collect_channel_output<C: ExecChannel>(channel: &mut C) -> CommandOutput {
    let mut output = CommandOutput::new();

    while let Some(msg) = channel.wait().await {
        match msg {
            ChannelMsg::Data { data } => {
                output.stdout.push_str(&String::from_utf8_lossy(&data));
            }
            ChannelMsg::ExtendedData { data, ext } => {
                // ext == 1 is stderr
                if ext == 1 {
                    output.stderr.push_str(&String::from_utf8_lossy(&data));
                } else {
                    output.stdout.push_str(&String::from_utf8_lossy(&data));
                }
            }
            ChannelMsg::ExitStatus { exit_status } => {
                output.exit_code = Some(exit_status);
            }
            ChannelMsg::Close => break,
            _ => {}
        }
    }

    debug!(
        "Command completed: exit_code={:?}, stdout_len={}, stderr_len={}",
        output.exit_code,
        output.stdout.len(),
        output.stderr.len()
    );

    output
}

#[async_trait]
impl Transport for RusshTransport {
    async fn exec_command(
        &mut self,
        command: &str,
        in_data: Option<&[u8]>,
        auth: &TransportAuth,
    ) -> Result<CommandOutput> {
        self.ensure_connected(auth).await?;

        let result = self
            .exec_via_channel(command, in_data, self.options.command_timeout)
            .await;

        // A dead connection is rebuilt on the next command
        if matches!(result, Err(EicSshError::Connection(_))) && !self.is_connected() {
            self.session = None;
        }

        result
    }

    async fn close(&mut self) {
        if let Some(session) = self.session.take() {
            let _ = session
                .disconnect(russh::Disconnect::ByApplication, "", "")
                .await;
            info!("SSH connection to {} closed", self.host);
        }
    }
}

impl std::fmt::Debug for RusshTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RusshTransport")
            .field("host", &self.host)
            .field("port", &self.options.port)
            .field("username", &self.username)
            .field("connected", &self.is_connected())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_not_connected_initially() {
        let transport = RusshTransport::new("localhost", "ec2-user", SshOptions::default());
        assert!(!transport.is_connected());

        // Should return error when trying to open channel without connecting
        assert!(transport.open_channel().await.is_err());
    }

    #[tokio::test]
    async fn test_connect_failure_is_connection_error() {
        let options = SshOptions {
            // Reserved port, nothing listens there
            port: 1,
            connect_timeout: Duration::from_secs(2),
            ..SshOptions::default()
        };
        let mut transport = RusshTransport::new("127.0.0.1", "ec2-user", options);
        let mut auth = TransportAuth::default();
        auth.use_key_file("/nonexistent/key");

        let err = transport
            .exec_command("true", None, &auth)
            .await
            .unwrap_err();
        assert!(matches!(err, EicSshError::Connection(_)));
        assert!(!transport.is_connected());
    }

    /// Channel whose input side never gets window credit
    #[derive(Default)]
    struct StalledChannel {
        steps: Vec<&'static str>,
    }

    #[async_trait]
    impl ExecChannel for StalledChannel {
        async fn exec(&mut self, _command: &str) -> std::result::Result<(), russh::Error> {
            self.steps.push("exec");
            Ok(())
        }

        async fn data(&mut self, _data: &[u8]) -> std::result::Result<(), russh::Error> {
            self.steps.push("data");
            std::future::pending().await
        }

        async fn eof(&mut self) -> std::result::Result<(), russh::Error> {
            self.steps.push("eof");
            Ok(())
        }

        async fn wait(&mut self) -> Option<ChannelMsg> {
            self.steps.push("wait");
            None
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_blocked_input_hits_command_timeout() {
        let mut channel = StalledChannel::default();

        let err = run_on_channel(
            &mut channel,
            "sleep 600",
            Some(&[0u8; 4096]),
            Duration::from_secs(5),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, EicSshError::Timeout(5000)));
        assert_eq!(channel.steps, ["exec", "data"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_channel_without_input_sends_eof() {
        let mut channel = StalledChannel::default();

        let output = run_on_channel(&mut channel, "true", None, Duration::from_secs(5))
            .await
            .unwrap();

        assert!(output.exit_code.is_none());
        assert_eq!(channel.steps, ["exec", "eof", "wait"]);
    }

    #[tokio::test]
    async fn test_close_without_connection_is_noop() {
        let mut transport = RusshTransport::new("localhost", "ec2-user", SshOptions::default());
        transport.close().await;
        assert!(!transport.is_connected());
    }
}
