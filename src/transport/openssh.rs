//! Transport over the system OpenSSH client
//!
//! Spawns `ssh` once per command. Connection reuse is up to OpenSSH itself
//! (`ControlMaster`/`ControlPath` given through the extra arguments).

use std::ffi::OsString;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::debug;

use super::{CommandOutput, Transport, TransportAuth};
use crate::config::SshOptions;
use crate::error::{EicSshError, Result};

/// ssh exits with this code when it failed itself, not the remote command
const SSH_ERROR_EXIT: i32 = 255;

/// Transport that shells out to `ssh`
#[derive(Debug, Clone)]
pub struct OpenSshTransport {
    host: String,
    username: String,
    options: SshOptions,
}

impl OpenSshTransport {
    pub fn new(host: impl Into<String>, username: impl Into<String>, options: SshOptions) -> Self {
        Self {
            host: host.into(),
            username: username.into(),
            options,
        }
    }

    /// Arguments passed to the ssh executable for `command`
    pub fn build_args(&self, command: &str, auth: &TransportAuth) -> Result<Vec<OsString>> {
        let mut args: Vec<OsString> = self.options.ssh_args.iter().map(OsString::from).collect();
        let mut option = |value: String| {
            args.push("-o".into());
            args.push(value.into());
        };

        if !self.options.host_key_checking {
            option("StrictHostKeyChecking=no".to_string());
            option("UserKnownHostsFile=/dev/null".to_string());
        }

        option(format!("Port={}", self.options.port));

        match (&auth.private_key_file, &auth.password) {
            (Some(key_file), _) => {
                option(format!("IdentityFile=\"{}\"", key_file.display()));
                option("IdentitiesOnly=yes".to_string());
                option("KbdInteractiveAuthentication=no".to_string());
                option(
                    "PreferredAuthentications=gssapi-with-mic,gssapi-keyex,hostbased,publickey"
                        .to_string(),
                );
                option("PasswordAuthentication=no".to_string());
            }
            (None, Some(_)) => {
                return Err(EicSshError::auth(
                    "password authentication is not supported by the openssh transport",
                ));
            }
            (None, None) => {}
        }

        option(format!("User={}", self.username));
        option(format!(
            "ConnectTimeout={}",
            self.options.connect_timeout.as_secs().max(1)
        ));

        if let Some(ref control_path) = self.options.control_path {
            option(format!("ControlPath=\"{}\"", control_path.display()));
        }

        args.push(self.host.as_str().into());
        args.push(command.into());
        Ok(args)
    }
}

#[async_trait]
impl Transport for OpenSshTransport {
    async fn exec_command(
        &mut self,
        command: &str,
        in_data: Option<&[u8]>,
        auth: &TransportAuth,
    ) -> Result<CommandOutput> {
        let args = self.build_args(command, auth)?;
        debug!(
            "Running {} {:?}",
            self.options.ssh_executable.display(),
            args
        );

        let mut child = Command::new(&self.options.ssh_executable)
            .args(&args)
            .stdin(if in_data.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                EicSshError::connection(format!(
                    "Failed to run {}: {}",
                    self.options.ssh_executable.display(),
                    e
                ))
            })?;

        let stdin = child.stdin.take();
        let feed_input = async move {
            if let (Some(mut stdin), Some(data)) = (stdin, in_data) {
                stdin.write_all(data).await?;
                stdin.shutdown().await?;
            }
            Ok::<_, std::io::Error>(())
        };

        let timeout_duration = self.options.command_timeout;
        let (fed, output) = timeout(timeout_duration, async {
            tokio::join!(feed_input, child.wait_with_output())
        })
        .await
        .map_err(|_| EicSshError::Timeout(timeout_duration.as_millis() as u64))?;

        let output = output?;
        if let Err(e) = fed {
            debug!("Remote command did not consume all input: {}", e);
        }

        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        if output.status.code() == Some(SSH_ERROR_EXIT) {
            return Err(EicSshError::connection(format!(
                "ssh to {} failed: {}",
                self.host,
                stderr.trim()
            )));
        }

        Ok(CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr,
            exit_code: output.status.code().map(|code| code as u32),
        })
    }

    async fn close(&mut self) {
        // each command is its own process
    }
}
