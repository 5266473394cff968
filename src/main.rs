//! Binary entry point for the `scaleway-csi` plugin.

use std::io::{self, Write};
use std::process;
use std::sync::Arc;

use clap::Parser;
use thiserror::Error;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use scaleway_csi::bootstrap::{self, BootstrapError, NodeHost};
use scaleway_csi::command::ProcessCommandRunner;
use scaleway_csi::config::{ConfigError, DriverConfig, LogFormat, ScalewayConfig};
use scaleway_csi::driver::types::ProbeResponse;
use scaleway_csi::lifecycle::ReadinessGate;
use scaleway_csi::mount::LinuxMountExecutor;
use scaleway_csi::rpc::{CsiRequest, CsiResponse, RpcClient, TransportError};
use scaleway_csi::scaleway::ScalewayBackend;
use scaleway_csi::stats::LinuxStatsProvider;

mod cli;

use cli::{Cli, EndpointArgs};

#[derive(Debug, Error)]
enum CliError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Bootstrap(#[from] BootstrapError),
    #[error("plugin socket error: {0}")]
    Transport(#[from] TransportError),
    #[error("probe failed: {0}")]
    Probe(String),
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let exit_code = match dispatch(cli).await {
        Ok(code) => code,
        Err(err) => {
            report_error(&err);
            1
        }
    };

    process::exit(exit_code);
}

async fn dispatch(cli: Cli) -> Result<i32, CliError> {
    match cli {
        Cli::Serve(args) => serve(args).await.map(|()| 0),
        Cli::Probe(args) => probe(args).await,
    }
}

fn load_driver_config(args: EndpointArgs) -> Result<DriverConfig, CliError> {
    Ok(DriverConfig::load_without_cli_args()?.with_endpoint(args.endpoint))
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr);
    match format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.with_target(false).compact().init(),
    }
}

async fn serve(args: EndpointArgs) -> Result<(), CliError> {
    let driver_config = load_driver_config(args)?;
    init_tracing(driver_config.log_format()?);
    let socket = driver_config.socket_path()?;
    let scaleway_config = ScalewayConfig::load_without_cli_args()?;
    let backend = ScalewayBackend::new(&scaleway_config)?;

    let gate = ReadinessGate::new();
    let identity =
        bootstrap::resolve_identity(&driver_config, &scaleway_config.default_zone).await?;
    let host = NodeHost {
        mounts: Arc::new(LinuxMountExecutor::new(ProcessCommandRunner, identity.zone)),
        stats: Arc::new(LinuxStatsProvider),
    };

    let driver =
        bootstrap::start(Arc::new(backend), &identity.server_id, host, &gate).await?;
    bootstrap::serve(driver, &socket, &gate, shutdown_signal()).await?;
    Ok(())
}

async fn probe(args: EndpointArgs) -> Result<i32, CliError> {
    let socket = load_driver_config(args)?.socket_path()?;
    let mut client = RpcClient::connect(&socket).await?;
    match client.call(&CsiRequest::Probe).await? {
        CsiResponse::Probe(ProbeResponse { ready }) => {
            let label = if ready { "ready" } else { "not ready" };
            writeln!(io::stdout(), "{label}").ok();
            Ok(if ready { 0 } else { 1 })
        }
        CsiResponse::Error(status) => Err(CliError::Probe(status.to_string())),
        other => Err(CliError::Probe(format!("unexpected response: {other:?}"))),
    }
}

async fn shutdown_signal() {
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(err) = result {
                warn!(error = %err, "cannot listen for ctrl-c");
            }
        }
        () = terminate => {}
    }
    info!("shutdown requested");
}

fn report_error(err: &CliError) {
    write_error(io::stderr(), err);
}

fn write_error(mut target: impl Write, err: &CliError) {
    writeln!(target, "{err}").ok();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errors_are_written_as_single_lines() {
        let mut buffer = Vec::new();
        write_error(&mut buffer, &CliError::Probe(String::from("plugin not ready")));
        assert_eq!(
            String::from_utf8(buffer).expect("utf8"),
            "probe failed: plugin not ready\n"
        );
    }

    #[test]
    fn cli_parses_endpoint_override() {
        let cli = Cli::try_parse_from(["scaleway-csi", "serve", "--endpoint", "unix:///csi.sock"])
            .expect("parse");
        let Cli::Serve(args) = cli else {
            panic!("expected serve");
        };
        assert_eq!(args.endpoint.as_deref(), Some("unix:///csi.sock"));
    }
}
