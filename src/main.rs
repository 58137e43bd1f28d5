//! Binary entry point for the Welder CLI.

use std::io::{self, Write};
use std::process;

use camino::Utf8Path;
use clap::Parser;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use welder::credentials::CredentialsError;
use welder::keys::SshKeygen;
use welder::resource_config::{ConfigError, ValidationError};
use welder::welder::delete_existing_device;
use welder::{
    DeviceDetails, MetalCredentials, MetalProvider, Overrides, ProcessCommandRunner,
    ResourceConfig, RunError, ShellError, ShellSettings, SshShell, StreamingCommandRunner,
    TestRunner, ValidatedConfig, Welder, WelderError, create_standalone,
};

mod cli;

use cli::{Cli, CommonArgs, CreateDeviceCommand, DeleteDeviceCommand, RunE2eCommand};

const LOG_ENV: &str = "WELDER_LOG";
const DEFAULT_LOG_FILTER: &str = "info";

type MetalWelder =
    Welder<MetalProvider, SshShell<StreamingCommandRunner>, SshKeygen<ProcessCommandRunner>>;

#[derive(Debug, Error)]
enum CliError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Credentials(#[from] CredentialsError),
    #[error("ssh error: {0}")]
    Shell(#[from] ShellError),
    #[error(transparent)]
    Run(#[from] RunError),
    #[error(transparent)]
    Welder(#[from] WelderError),
}

#[tokio::main]
async fn main() {
    init_tracing();
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

fn init_tracing() {
    let filter =
        EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init()
        .ok();
}

async fn dispatch(cli: Cli) -> Result<i32, CliError> {
    match cli {
        Cli::RunE2e(args) => run_e2e(args).await,
        Cli::CreateDevice(args) => create_device(args).await,
        Cli::DeleteDevice(args) => delete_device(&args).await,
    }
}

async fn run_e2e(args: RunE2eCommand) -> Result<i32, CliError> {
    let overrides = run_overrides(&args);
    let config = load_config(&args.common, overrides)?.validate_for_run()?;
    let mut runner = TestRunner::new(metal_welder(config)?);

    let result = runner.execute().await;
    if runner.welder().config().skip_teardown() {
        write_left_running(
            io::stdout(),
            runner.device_id(),
            runner.device_details().as_ref(),
            runner.welder().ssh_user(),
        );
    }

    Ok(result?.exit_code)
}

async fn create_device(args: CreateDeviceCommand) -> Result<i32, CliError> {
    let overrides = Overrides {
        project_id: args.project_id,
        ..common_overrides(&args.common)
    };
    let config = load_config(&args.common, overrides)?.validate_for_create()?;
    let mut welder = metal_welder(config)?;

    let details = create_standalone(&mut welder).await?;
    write_device_report(io::stdout(), &details, welder.ssh_user());
    Ok(0)
}

async fn delete_device(args: &DeleteDeviceCommand) -> Result<i32, CliError> {
    let credentials = MetalCredentials::load_without_cli_args()?;
    delete_existing_device(&MetalProvider::new(&credentials), &args.device_id).await?;
    Ok(0)
}

fn common_overrides(common: &CommonArgs) -> Overrides {
    Overrides {
        org_id: common.org_id.clone(),
        ssh_key_name: common.ssh_key_name.clone(),
        device_name: common.device_name.clone(),
        ..Overrides::default()
    }
}

fn run_overrides(args: &RunE2eCommand) -> Overrides {
    Overrides {
        project_id: args.project_id.clone(),
        project_name: args.project_name.clone(),
        device_id: args.existing_device_id.clone(),
        skip_teardown: args.skip_teardown.then_some(true),
        ..common_overrides(&args.common)
    }
}

fn load_config(common: &CommonArgs, overrides: Overrides) -> Result<ResourceConfig, CliError> {
    let mut config = ResourceConfig::default();
    if let Some(path) = &common.config {
        config.load(Utf8Path::new(path))?;
    }
    config.apply_overrides(overrides);
    Ok(config)
}

fn metal_welder(config: ValidatedConfig) -> Result<MetalWelder, CliError> {
    let credentials = MetalCredentials::load_without_cli_args()?;
    let settings = ShellSettings::load_without_cli_args()?;
    let shell = SshShell::new(settings, StreamingCommandRunner)?;
    Ok(Welder::new(
        config,
        MetalProvider::new(&credentials),
        shell,
        SshKeygen::new(ProcessCommandRunner),
    )
    .with_cancellation(cancel_on_interrupt()))
}

/// Returns a token that fires on Ctrl-C so readiness waits unwind to
/// teardown.
fn cancel_on_interrupt() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received; cancelling");
            trigger.cancel();
        }
    });
    token
}

fn write_device_report(mut target: impl Write, details: &DeviceDetails, user: &str) {
    writeln!(target, "device id: {}", details.device_id).ok();
    writeln!(target, "device ip: {}", details.ip).ok();
    writeln!(target, "connect with: {}", details.ssh_command(user)).ok();
}

/// Reports a device left behind by a skipped teardown, including one that
/// never received an address.
fn write_left_running(
    mut target: impl Write,
    device_id: Option<&str>,
    details: Option<&DeviceDetails>,
    user: &str,
) {
    match (details, device_id) {
        (Some(resolved), _) => write_device_report(target, resolved, user),
        (None, Some(id)) => {
            writeln!(target, "device id: {id}").ok();
            writeln!(target, "device ip: not assigned yet").ok();
        }
        (None, None) => {}
    }
}

fn report_error(err: &CliError) {
    write_error(io::stderr(), err);
}

fn write_error(mut target: impl Write, err: &CliError) {
    writeln!(target, "{err}").ok();
}
