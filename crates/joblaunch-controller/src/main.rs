//! `launcher` binary
//!
//! `launcher -np <instance-count> -hostfile <path> <executable-path>`
//!
//! Exit codes: 0 when every host reported, 2 on configuration or setup
//! failure, 130 when interrupted.

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use tracing::{error, info};

use joblaunch_controller::cli::Args;
use joblaunch_controller::interrupt::InterruptHandler;
use joblaunch_controller::session::{SessionController, SessionOutcome};
use joblaunch_controller::transport::{TcpTransport, TcpTransportConfig};
use joblaunch_core::LauncherConfig;
use joblaunch_core::config::load_config;
use joblaunch_core::hosts::load_hostfile;
use joblaunch_core::tracing_init::{default_filter, init_tracing};

const EXIT_SETUP_FAILURE: u8 = 2;
const EXIT_INTERRUPTED: u8 = 130;

#[tokio::main]
#[allow(clippy::print_stderr)]
async fn main() -> ExitCode {
    let args = match Args::try_parse_normalized(std::env::args_os()) {
        Ok(args) => args,
        Err(e) => e.exit(),
    };

    // Logging depends on the config, so config errors go straight to stderr
    let config = match resolve_config(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("launcher: {e:#}");
            return ExitCode::from(EXIT_SETUP_FAILURE);
        }
    };
    init_tracing(&default_filter(&config.log_level), args.log_json);

    match launch(&args, &config).await {
        Ok(SessionOutcome::Completed) => ExitCode::SUCCESS,
        Ok(SessionOutcome::Interrupted) => ExitCode::from(EXIT_INTERRUPTED),
        Err(e) => {
            error!(error = %format!("{e:#}"), "Launch failed");
            ExitCode::from(EXIT_SETUP_FAILURE)
        }
    }
}

fn resolve_config(args: &Args) -> anyhow::Result<LauncherConfig> {
    let mut config = load_config(args.config.as_deref())?;
    args.apply_overrides(&mut config);
    config.validate()?;
    Ok(config)
}

async fn launch(args: &Args, config: &LauncherConfig) -> anyhow::Result<SessionOutcome> {
    let request = args.launch_request();
    request.validate(config.max_instances)?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        instances = request.instances,
        hostfile = %request.hostfile.display(),
        executable = %request.executable,
        "Starting launch"
    );

    let hosts = load_hostfile(&request.hostfile, config)
        .with_context(|| format!("Cannot use hostfile {}", request.hostfile.display()))?;

    let (interrupts, signal) = InterruptHandler::new();
    let _listener = interrupts
        .listen()
        .context("Failed to install interrupt handler")?;

    let transport = Arc::new(TcpTransport::new(TcpTransportConfig::from(config)));
    let mut controller =
        SessionController::new(transport, signal).with_max_instances(config.max_instances);

    let mut session = controller.setup(&request, hosts).await?;
    let outcome = controller.run(&mut session).await?;

    info!(
        session_id = %session.id(),
        ?outcome,
        acks_received = session.acks_received(),
        active_connections = session.active_connections(),
        "Launch finished"
    );
    Ok(outcome)
}
