//! SSH transports
//!
//! A [`Transport`] runs one remote command at a time using the auth
//! parameters it is handed on each call. The session sets those parameters
//! right before every exec, so a transport never has to know about key
//! pushes.

pub mod handler;
pub mod openssh;
pub mod russh_client;

use std::path::PathBuf;

use async_trait::async_trait;

use crate::error::Result;

pub use handler::SshHandler;
pub use openssh::OpenSshTransport;
pub use russh_client::RusshTransport;

/// Output from a command execution
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    /// Standard output from the command
    pub stdout: String,

    /// Standard error from the command
    pub stderr: String,

    /// Exit code of the command (if available)
    pub exit_code: Option<u32>,
}

impl CommandOutput {
    /// Create a new empty CommandOutput
    pub fn new() -> Self {
        Self::default()
    }

    /// Check if the command exited with status 0.
    ///
    /// A command killed by a signal reports no exit code and did not succeed.
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Authentication parameters for one exec
#[derive(Clone, Default)]
pub struct TransportAuth {
    /// Private key file to authenticate with
    pub private_key_file: Option<PathBuf>,

    /// Password for password authentication
    pub password: Option<String>,

    /// Prompt to answer with the password
    pub password_prompt: Option<String>,
}

impl TransportAuth {
    /// Authenticate with `path` only, dropping any password parameters
    pub fn use_key_file(&mut self, path: impl Into<PathBuf>) {
        self.private_key_file = Some(path.into());
        self.password = None;
        self.password_prompt = None;
    }
}

impl std::fmt::Debug for TransportAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportAuth")
            .field("private_key_file", &self.private_key_file)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("password_prompt", &self.password_prompt)
            .finish()
    }
}

/// A generic SSH exec capability
#[async_trait]
pub trait Transport: Send {
    /// Run `command` on the remote host, feeding it `in_data` on stdin
    async fn exec_command(
        &mut self,
        command: &str,
        in_data: Option<&[u8]>,
        auth: &TransportAuth,
    ) -> Result<CommandOutput>;

    /// Tear down any open connection
    async fn close(&mut self);
}

#[async_trait]
impl Transport for Box<dyn Transport> {
    async fn exec_command(
        &mut self,
        command: &str,
        in_data: Option<&[u8]>,
        auth: &TransportAuth,
    ) -> Result<CommandOutput> {
        (**self).exec_command(command, in_data, auth).await
    }

    async fn close(&mut self) {
        (**self).close().await
    }
}
