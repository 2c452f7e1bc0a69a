//! eic-ssh - Entry point
//!
//! Parses CLI arguments, builds the AWS provider and the selected transport,
//! runs the command through an Instance Connect session and exits with the
//! remote exit code.

use std::io::Write;
use std::sync::Arc;

use clap::Parser;
use tokio::io::AsyncReadExt;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use eic_ssh::config::{Args, Config, TransportKind};
use eic_ssh::error::{EicSshError, Result};
use eic_ssh::provider::AwsInstanceConnect;
use eic_ssh::session::InstanceConnectSession;
use eic_ssh::transport::{CommandOutput, OpenSshTransport, RusshTransport, Transport};

/// Exit status when the remote side reported none, as ssh(1) does
const NO_EXIT_STATUS: i32 = 255;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let args = Args::parse();

    // Logs go to stderr; stdout carries only remote output
    init_tracing(args.verbose);

    // Validate and create config
    let config = Config::from_args(args)?;

    info!("eic-ssh v{} starting...", env!("CARGO_PKG_VERSION"));
    info!(
        "Target {}@{}:{} via {:?}",
        config.session.os_user, config.session.target_address, config.ssh.port, config.transport
    );

    let api = Arc::new(AwsInstanceConnect::new(&config.credentials, &config.provider_policy).await);

    let transport: Box<dyn Transport> = match config.transport {
        TransportKind::Russh => Box::new(RusshTransport::new(
            &config.session.target_address,
            &config.session.os_user,
            config.ssh.clone(),
        )),
        TransportKind::Openssh => Box::new(OpenSshTransport::new(
            &config.session.target_address,
            &config.session.os_user,
            config.ssh.clone(),
        )),
    };

    let mut session = InstanceConnectSession::new(&config.session, api, transport)?;

    let input = if config.forward_stdin {
        let mut buf = Vec::new();
        tokio::io::stdin().read_to_end(&mut buf).await?;
        Some(buf)
    } else {
        None
    };

    let result = tokio::select! {
        result = session.exec_command(&config.command, input.as_deref()) => result,
        _ = shutdown_signal() => Err(EicSshError::connection("interrupted")),
    };

    // Always tear down, so a generated key never outlives the run
    if let Err(e) = session.close().await {
        error!("Failed to clean up session: {}", e);
    }

    let output = result.inspect_err(|e| error!("{}", e))?;

    print!("{}", output.stdout);
    eprint!("{}", output.stderr);
    std::io::stdout().flush()?;

    if output.success() {
        return Ok(());
    }
    std::process::exit(exit_status(&output))
}

/// Local exit status mirroring the remote command
fn exit_status(output: &CommandOutput) -> i32 {
    match output.exit_code {
        Some(code) => code as i32,
        None => {
            error!("Remote command ended without an exit status");
            NO_EXIT_STATUS
        }
    }
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("warn,eic_ssh={}", level)));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Resolve on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received SIGINT (Ctrl+C), shutting down...");
        }
        _ = async {
            #[cfg(unix)]
            {
                match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                    Ok(mut sigterm) => {
                        sigterm.recv().await;
                    }
                    Err(e) => {
                        error!("Failed to register SIGTERM handler: {}", e);
                        std::future::pending::<()>().await;
                    }
                }
            }
            #[cfg(not(unix))]
            {
                std::future::pending::<()>().await;
            }
        } => {
            info!("Received SIGTERM, shutting down...");
        }
    }
}
