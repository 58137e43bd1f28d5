//! Command-line interface definitions for the `welder` binary.
//!
//! This module centralises the clap parser structures so both the main binary
//! and the build script can reuse them when generating the manual page.

use clap::{Args, Parser};

/// Top-level CLI for the `welder` binary.
#[derive(Debug, Parser)]
#[command(
    name = "welder",
    about = "Provision Equinix Metal devices and run the flintlock end-to-end suite",
    arg_required_else_help = true
)]
pub(crate) enum Cli {
    /// Provision (or reuse) a device, run the suite, and tear down.
    #[command(
        name = "run-e2e",
        about = "Provision (or reuse) a device, run the suite, and tear down"
    )]
    RunE2e(RunE2eCommand),
    /// Provision a device in an existing project and leave it running.
    #[command(
        name = "create-device",
        about = "Provision a device in an existing project and leave it running"
    )]
    CreateDevice(CreateDeviceCommand),
    /// Delete a device by id.
    #[command(name = "delete-device", about = "Delete a device by id")]
    DeleteDevice(DeleteDeviceCommand),
}

/// Options shared by every subcommand that reads a configuration file.
#[derive(Debug, Args)]
pub(crate) struct CommonArgs {
    /// YAML configuration file merged over the built-in defaults.
    #[arg(long, value_name = "PATH")]
    pub(crate) config: Option<String>,
    /// Equinix Metal organisation that owns created projects.
    #[arg(long, value_name = "ID")]
    pub(crate) org_id: Option<String>,
    /// Label for the SSH key; names an existing key when key creation is
    /// disabled in the configuration.
    #[arg(long, value_name = "NAME")]
    pub(crate) ssh_key_name: Option<String>,
    /// Hostname for a created device.
    #[arg(long, value_name = "NAME")]
    pub(crate) device_name: Option<String>,
}

/// Arguments for the `welder run-e2e` subcommand.
#[derive(Debug, Parser)]
pub(crate) struct RunE2eCommand {
    #[command(flatten)]
    pub(crate) common: CommonArgs,
    /// Name for the project created for this run.
    #[arg(long, value_name = "NAME", conflicts_with = "project_id")]
    pub(crate) project_name: Option<String>,
    /// Existing project to provision into; it is never deleted.
    #[arg(long, value_name = "ID")]
    pub(crate) project_id: Option<String>,
    /// Run against an existing device instead of creating one.
    ///
    /// The device and key are reused, and teardown is skipped.
    #[arg(long, value_name = "ID")]
    pub(crate) existing_device_id: Option<String>,
    /// Leave every resource running after the suite finishes.
    #[arg(long)]
    pub(crate) skip_teardown: bool,
}

/// Arguments for the `welder create-device` subcommand.
#[derive(Debug, Parser)]
pub(crate) struct CreateDeviceCommand {
    #[command(flatten)]
    pub(crate) common: CommonArgs,
    /// Project to create the device in.
    #[arg(long, value_name = "ID")]
    pub(crate) project_id: Option<String>,
}

/// Arguments for the `welder delete-device` subcommand.
#[derive(Debug, Parser)]
pub(crate) struct DeleteDeviceCommand {
    /// Device to delete.
    #[arg(long, value_name = "ID", required = true)]
    pub(crate) device_id: String,
}
