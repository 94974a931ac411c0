//! `podscp` application entry point.
//!
//! This binary copies a container image between image stores. It uses
//! `eyre` for opaque error handling while starting up; transfer failures are
//! reported as a single `Error: ...` line and exit status 125.
//!
//! Configuration is loaded with layered precedence via `OrthoConfig`:
//! 1. Application defaults
//! 2. Configuration file (`~/.config/podscp/config.toml` or path from `PODSCP_CONFIG_PATH`)
//! 3. Environment variables (`PODSCP_*`)
//! 4. Command-line arguments

use std::process::ExitCode;

use camino::Utf8Path;
use clap::Parser;
use eyre::{Report, Result as EyreResult, WrapErr};
use mockable::DefaultEnv;
use nix::unistd::geteuid;
use podscp::api::{TransferOptions, TransferServices, transfer};
use podscp::config::{AppConfig, Cli, load_config};
use podscp::connections::ContainersConfStore;
use podscp::engine::{EngineCli, EngineConnector, HostLauncher, ImageStore, SocketResolver};
use podscp::transport::OpenSshClient;
use podscp::users::SystemUsers;
use tracing_subscriber::EnvFilter;

/// Exit status for any failed transfer.
const FAILURE_EXIT: u8 = 125;

/// Application entry point.
///
/// Startup failures (configuration, runtime) are returned as `eyre`
/// reports; a transfer failure prints its error line and exits 125.
fn main() -> EyreResult<ExitCode> {
    let cli = Cli::parse();
    init_logging(&cli);

    let config = load_config(&cli).map_err(Report::from)?;
    let runtime = tokio::runtime::Runtime::new().wrap_err("failed to create async runtime")?;

    runtime.block_on(run(&cli, &config))
}

/// Installs the `tracing` subscriber writing to stderr.
///
/// `--log-level` wins over `RUST_LOG`; `--quiet` lowers the default to
/// errors only.
fn init_logging(cli: &Cli) {
    let default_level = if cli.quiet { "error" } else { "warn" };
    let filter = cli.log_level.as_deref().map_or_else(
        || EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        EnvFilter::new,
    );
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Wires the host services and runs one transfer.
#[expect(clippy::print_stdout, reason = "CLI output is the intended behaviour")]
#[expect(clippy::print_stderr, reason = "CLI output is the intended behaviour")]
async fn run(cli: &Cli, config: &AppConfig) -> EyreResult<ExitCode> {
    let env = DefaultEnv::new();
    let users = SystemUsers::new();
    let effective_uid = geteuid().as_raw();
    let launcher = HostLauncher::new(config.privilege.switch_program.as_str(), effective_uid);
    let shell = OpenSshClient::new(
        config.ssh.program.as_str(),
        config.ssh.remote_engine_program.as_str(),
        config.transfer.connect_timeout(),
    );

    let connections = match ContainersConfStore::locate(&env, config.containers_conf.as_deref()) {
        Some(path) => ContainersConfStore::load(&path).map_err(Report::from)?,
        None => ContainersConfStore::empty(Utf8Path::new("containers.conf")),
    };

    let resolver = SocketResolver::new(&env);
    let socket =
        EngineConnector::resolve_socket(config.engine_socket.as_deref(), &resolver, effective_uid);
    let api_store = match socket.as_deref() {
        Some(socket) => match EngineConnector::connect_and_verify_async(socket).await {
            Ok(docker) => Some(docker),
            Err(error) => {
                tracing::info!(
                    event = "engine.api_unavailable",
                    socket = %socket,
                    error = %error,
                    "using the engine CLI for the invoking user's store"
                );
                None
            }
        },
        None => {
            tracing::debug!(
                event = "engine.api_skipped",
                "no engine socket of the invoking user; using the engine CLI"
            );
            None
        }
    };
    let cli_store = EngineCli::local(&launcher, config.engine.program.as_str(), None);
    let invoker_store: &dyn ImageStore = match &api_store {
        Some(docker) => docker,
        None => &cli_store,
    };

    let services = TransferServices {
        users: &users,
        connections: &connections,
        launcher: &launcher,
        shell: &shell,
        invoker_store,
        engine_program: config.engine.program.as_str(),
    };
    let options = TransferOptions {
        quiet: cli.quiet,
        deadline: config.transfer.deadline(),
    };

    let result = transfer(&cli.source, cli.destination_or_default(), options, services).await;
    match (result.success, result.message) {
        (true, _) => {
            if !cli.quiet
                && let Some(image) = result.image
            {
                println!("Loaded image: {image}");
            }
            Ok(ExitCode::SUCCESS)
        }
        (false, message) => {
            eprintln!("{}", message.unwrap_or_else(|| String::from("Error: transfer failed")));
            Ok(ExitCode::from(FAILURE_EXIT))
        }
    }
}
