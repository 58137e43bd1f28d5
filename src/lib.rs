//! Core library for the Welder end-to-end test harness.
//!
//! The crate provisions one bare-metal device (with its project and SSH key)
//! on Equinix Metal, waits until the device has finished bootstrapping, runs
//! the flintlock end-to-end suite over SSH, and deletes exactly the
//! resources it created.

pub mod credentials;
pub mod keys;
pub mod metal;
pub mod provider;
pub mod resource_config;
pub mod runner;
pub mod shell;
pub mod test_support;
pub mod welder;

pub use credentials::{CredentialsError, MetalCredentials};
pub use keys::{KeyError, Keysmith, SshKeygen};
pub use metal::MetalProvider;
pub use provider::{Device, DeviceRequest, Project, Provider, ProviderError, SshKey};
pub use resource_config::{ConfigError, Overrides, ResourceConfig, ValidatedConfig, ValidationError};
pub use runner::{RunError, RunReport, TestRunner, create_standalone};
pub use shell::{
    ProcessCommandRunner, RemoteCommand, RemoteShell, ShellError, ShellSettings, SshShell,
    StreamingCommandRunner,
};
pub use welder::{DeviceDetails, Ownership, Stage, TeardownError, Welder, WelderError};
