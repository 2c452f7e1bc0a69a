//! Configuration and CLI argument parsing for eic-ssh

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};

use crate::error::{EicSshError, Result};

/// Default timeout for command execution in milliseconds
pub const DEFAULT_TIMEOUT_MS: u64 = 60_000; // 60 seconds

/// Connection timeout in seconds
pub const CONNECTION_TIMEOUT_SECS: u64 = 30;

/// A pushed key is assumed expired after this long.
///
/// EC2 Instance Connect keeps a pushed key for 60 seconds.
pub const PUSH_EXPIRY: Duration = Duration::from_secs(45);

/// Default deadline for a single provider call in seconds
pub const DEFAULT_PROVIDER_TIMEOUT_SECS: u64 = 10;

/// Default number of attempts the provider SDK makes per call
pub const DEFAULT_PROVIDER_MAX_ATTEMPTS: u32 = 3;

/// Which SSH implementation carries the commands
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum TransportKind {
    /// In-process client (russh)
    Russh,
    /// System OpenSSH client
    Openssh,
}

/// eic-ssh CLI Arguments
#[derive(Parser, Debug, Clone)]
#[command(name = "eic-ssh")]
#[command(version)]
#[command(about = "Run a command over SSH on an EC2 instance using an ephemeral Instance Connect key")]
pub struct Args {
    /// Target address (public IP, private IP or private DNS name)
    #[arg(long, env = "EIC_SSH_HOST")]
    pub host: String,

    /// SSH port
    #[arg(long, default_value = "22", env = "EIC_SSH_PORT")]
    pub port: u16,

    /// Remote OS user the key is pushed for
    #[arg(long, default_value = "ec2-user", env = "EIC_SSH_USER")]
    pub user: String,

    /// Instance id; looked up from --host when omitted
    #[arg(long, env = "EIC_SSH_INSTANCE_ID")]
    pub instance_id: Option<String>,

    /// OpenSSH private key to push instead of a generated one
    #[arg(long, env = "EIC_SSH_KEY")]
    pub key: Option<PathBuf>,

    /// AWS region
    #[arg(long, env = "AWS_REGION")]
    pub region: Option<String>,

    /// AWS access key id
    #[arg(long, env = "AWS_ACCESS_KEY_ID", hide_env_values = true)]
    pub aws_access_key: Option<String>,

    /// AWS secret access key
    #[arg(long, env = "AWS_SECRET_ACCESS_KEY", hide_env_values = true)]
    pub aws_secret_key: Option<String>,

    /// SSH implementation
    #[arg(long, value_enum, default_value = "russh", env = "EIC_SSH_TRANSPORT")]
    pub transport: TransportKind,

    /// ssh binary for the openssh transport
    #[arg(long, default_value = "ssh", env = "EIC_SSH_EXECUTABLE")]
    pub ssh_executable: PathBuf,

    /// Extra argument for the openssh transport (repeatable)
    #[arg(long = "ssh-arg", allow_hyphen_values = true)]
    pub ssh_args: Vec<String>,

    /// ControlPath for the openssh transport
    #[arg(long, env = "EIC_SSH_CONTROL_PATH")]
    pub control_path: Option<PathBuf>,

    /// Connection timeout in seconds
    #[arg(long, default_value = "30", env = "EIC_SSH_CONNECT_TIMEOUT")]
    pub connect_timeout: u64,

    /// Command execution timeout in milliseconds
    #[arg(long, default_value = "60000", env = "EIC_SSH_TIMEOUT")]
    pub timeout: u64,

    /// Accept any host key
    #[arg(long, default_value = "false", env = "EIC_SSH_NO_HOST_KEY_CHECKING")]
    pub no_host_key_checking: bool,

    /// Deadline for each provider call in seconds
    #[arg(long, default_value = "10", env = "EIC_SSH_PROVIDER_TIMEOUT")]
    pub provider_timeout: u64,

    /// Attempts the provider SDK makes per call
    #[arg(long, default_value = "3", env = "EIC_SSH_PROVIDER_MAX_ATTEMPTS")]
    pub provider_max_attempts: u32,

    /// Forward local stdin to the remote command
    #[arg(long)]
    pub stdin: bool,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Remote command
    #[arg(trailing_var_arg = true, allow_hyphen_values = true, required = true)]
    pub command: Vec<String>,
}

/// Provider credentials snapshot, resolved once per session
#[derive(Clone, Default)]
pub struct ProviderCredentials {
    pub region: Option<String>,
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
}

impl std::fmt::Debug for ProviderCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderCredentials")
            .field("region", &self.region)
            .field("access_key", &self.access_key)
            .field("secret_key", &self.secret_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Deadline and retry policy for provider calls
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProviderPolicy {
    /// Deadline for a single call
    pub timeout: Duration,

    /// Attempts the SDK makes before failing a call
    pub max_attempts: u32,
}

impl Default for ProviderPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(DEFAULT_PROVIDER_TIMEOUT_SECS),
            max_attempts: DEFAULT_PROVIDER_MAX_ATTEMPTS,
        }
    }
}

/// SSH options passed through to the transport untouched
#[derive(Debug, Clone)]
pub struct SshOptions {
    pub port: u16,
    pub connect_timeout: Duration,
    pub command_timeout: Duration,
    pub host_key_checking: bool,
    pub ssh_executable: PathBuf,
    pub ssh_args: Vec<String>,
    pub control_path: Option<PathBuf>,
}

impl Default for SshOptions {
    fn default() -> Self {
        Self {
            port: 22,
            connect_timeout: Duration::from_secs(CONNECTION_TIMEOUT_SECS),
            command_timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            host_key_checking: true,
            ssh_executable: PathBuf::from("ssh"),
            ssh_args: Vec::new(),
            control_path: None,
        }
    }
}

/// What a session needs to know about its target
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Address the transport connects to and reverse lookup searches for
    pub target_address: String,

    /// OS user the key is pushed for
    pub os_user: String,

    /// Skip reverse lookup and use this instance
    pub instance_id: Option<String>,

    /// Push this key instead of generating one
    pub private_key_file: Option<PathBuf>,

    /// Staleness window for pushed keys
    pub push_expiry: Duration,

    /// Deadline applied to each provider call
    pub provider_timeout: Duration,
}

impl SessionConfig {
    pub fn new(target_address: impl Into<String>, os_user: impl Into<String>) -> Self {
        Self {
            target_address: target_address.into(),
            os_user: os_user.into(),
            instance_id: None,
            private_key_file: None,
            push_expiry: PUSH_EXPIRY,
            provider_timeout: Duration::from_secs(DEFAULT_PROVIDER_TIMEOUT_SECS),
        }
    }

    pub fn with_instance_id(mut self, instance_id: impl Into<String>) -> Self {
        self.instance_id = Some(instance_id.into());
        self
    }

    pub fn with_private_key_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.private_key_file = Some(path.into());
        self
    }

    pub fn with_provider_timeout(mut self, timeout: Duration) -> Self {
        self.provider_timeout = timeout;
        self
    }
}

/// Parsed and validated configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub session: SessionConfig,
    pub credentials: ProviderCredentials,
    pub provider_policy: ProviderPolicy,
    pub transport: TransportKind,
    pub ssh: SshOptions,
    pub forward_stdin: bool,

    /// Remote command line
    pub command: String,
}

impl Config {
    /// Create Config from CLI Args
    pub fn from_args(args: Args) -> Result<Self> {
        validate_args(&args)?;

        let provider_policy = ProviderPolicy {
            timeout: Duration::from_secs(args.provider_timeout),
            max_attempts: args.provider_max_attempts,
        };

        let mut session = SessionConfig::new(&args.host, &args.user)
            .with_provider_timeout(provider_policy.timeout);
        session.instance_id = non_empty(args.instance_id);
        session.private_key_file = args.key;

        Ok(Config {
            session,
            credentials: ProviderCredentials {
                region: non_empty(args.region),
                access_key: non_empty(args.aws_access_key),
                secret_key: non_empty(args.aws_secret_key),
            },
            provider_policy,
            transport: args.transport,
            ssh: SshOptions {
                port: args.port,
                connect_timeout: Duration::from_secs(args.connect_timeout),
                command_timeout: Duration::from_millis(args.timeout),
                host_key_checking: !args.no_host_key_checking,
                ssh_executable: args.ssh_executable,
                ssh_args: args.ssh_args,
                control_path: args.control_path,
            },
            forward_stdin: args.stdin,
            command: args.command.join(" "),
        })
    }
}

/// Validate CLI arguments
fn validate_args(args: &Args) -> Result<()> {
    let mut errors = Vec::new();

    if args.host.trim().is_empty() {
        errors.push("Missing required --host".to_string());
    }

    if args.user.trim().is_empty() {
        errors.push("Missing required --user".to_string());
    }

    if args.command.iter().all(|part| part.trim().is_empty()) {
        errors.push("Missing remote command".to_string());
    }

    if let Some(ref key_path) = args.key {
        if !key_path.exists() {
            errors.push(format!("SSH key file not found: {}", key_path.display()));
        }
    }

    if args.connect_timeout == 0 {
        errors.push("--connect-timeout must be greater than 0".to_string());
    }

    if args.timeout == 0 {
        errors.push("--timeout must be greater than 0".to_string());
    }

    if args.provider_timeout == 0 {
        errors.push("--provider-timeout must be greater than 0".to_string());
    }

    if args.provider_max_attempts == 0 {
        errors.push("--provider-max-attempts must be at least 1".to_string());
    }

    if args.transport == TransportKind::Russh
        && (args.control_path.is_some() || !args.ssh_args.is_empty())
    {
        errors.push("--control-path and --ssh-arg require --transport openssh".to_string());
    }

    if !errors.is_empty() {
        return Err(EicSshError::config(format!(
            "{} invalid setting(s)\n{}",
            errors.len(),
            errors.join("\n")
        )));
    }

    Ok(())
}

/// Treat empty strings as absent
fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}
