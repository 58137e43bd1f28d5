//! SSH client settings loaded via `ortho-config`.

use ortho_config::OrthoConfig;
use serde::Deserialize;

use super::ShellError;

/// User the engine connects as on provisioned devices.
pub const DEFAULT_SSH_USER: &str = "root";

/// Settings for the system `ssh` client used to reach devices.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(prefix = "WELDER")]
pub struct ShellSettings {
    /// Path to the `ssh` executable.
    #[ortho_config(default = "ssh".to_owned())]
    pub ssh_bin: String,
    /// Remote user to connect as.
    #[ortho_config(default = DEFAULT_SSH_USER.to_owned())]
    pub ssh_user: String,
    /// TCP port of the remote SSH daemon.
    #[ortho_config(default = 22)]
    pub ssh_port: u16,
    /// Seconds to wait for the TCP connection before giving up.
    #[ortho_config(default = 10)]
    pub ssh_connect_timeout_secs: u32,
    /// Whether to force batch mode for SSH to avoid password prompts.
    #[ortho_config(default = true)]
    pub ssh_batch_mode: bool,
    /// Whether to enforce host key checking; freshly provisioned devices
    /// present unknown keys, so this defaults to off.
    #[ortho_config(default = false)]
    pub ssh_strict_host_key_checking: bool,
    /// Known hosts file override; defaults to `/dev/null` for ephemeral hosts.
    #[ortho_config(default = "/dev/null".to_owned())]
    pub ssh_known_hosts_file: String,
}

impl ShellSettings {
    /// Settings suited to freshly provisioned hosts, matching the loader
    /// defaults.
    #[must_use]
    pub fn for_ephemeral_hosts() -> Self {
        Self {
            ssh_bin: String::from("ssh"),
            ssh_user: String::from(DEFAULT_SSH_USER),
            ssh_port: 22,
            ssh_connect_timeout_secs: 10,
            ssh_batch_mode: true,
            ssh_strict_host_key_checking: false,
            ssh_known_hosts_file: String::from("/dev/null"),
        }
    }

    /// Loads settings from defaults, configuration files, and environment
    /// variables without parsing CLI arguments.
    ///
    /// # Errors
    ///
    /// Returns [`ShellError::Load`] when merging sources fails.
    pub fn load_without_cli_args() -> Result<Self, ShellError> {
        Self::load_from_iter([std::ffi::OsString::from("welder")])
            .map_err(|err| ShellError::Load(err.to_string()))
    }

    /// Ensures required values are present after trimming whitespace.
    ///
    /// # Errors
    ///
    /// Returns [`ShellError::InvalidSettings`] naming the first blank field.
    pub fn validate(&self) -> Result<(), ShellError> {
        Self::require_value(&self.ssh_bin, "ssh_bin")?;
        Self::require_value(&self.ssh_user, "ssh_user")?;
        if self.ssh_port == 0 {
            return Err(ShellError::InvalidSettings {
                field: String::from("ssh_port"),
            });
        }
        Ok(())
    }

    fn require_value(value: &str, field: &str) -> Result<(), ShellError> {
        if value.trim().is_empty() {
            return Err(ShellError::InvalidSettings {
                field: field.to_owned(),
            });
        }
        Ok(())
    }
}
