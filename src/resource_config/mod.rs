//! Resource configuration: defaults, file merge, overrides, and validation.
//!
//! A [`ResourceConfig`] is mutable only while it is being assembled:
//! defaults, then [`ResourceConfig::load`], then
//! [`ResourceConfig::apply_overrides`]. Validation consumes it and yields a
//! [`ValidatedConfig`] with every derived and generated value filled in,
//! which the engine treats as read-only input.

mod schema;
mod userdata;
mod validate;

use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use schema::SchemaViolation;
pub use userdata::{BOOTSTRAP_FRAGMENT, DISK_SETUP_FRAGMENT, TEST_USERDATA_FRAGMENT};

/// Device name used when none is configured.
pub const DEFAULT_DEVICE_NAME: &str = "T-800";
/// Hardware plan used when none is configured.
pub const DEFAULT_PLAN: &str = "c3.small.x86";
/// Operating system slug used when none is configured.
pub const DEFAULT_OPERATING_SYSTEM: &str = "ubuntu_18_04";
/// Facility tried when none are configured.
pub const DEFAULT_FACILITY: &str = "am6";
/// Billing cycle used when none is configured.
pub const DEFAULT_BILLING_CYCLE: &str = "hourly";

/// Placement behaviour when no configured facility has capacity.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Placement {
    /// Log a warning and let the provider choose a facility.
    #[default]
    Fallback,
    /// Abort the run.
    Strict,
}

/// Project selection.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct ProjectConfig {
    /// Existing project to reuse.
    pub id: Option<String>,
    /// Name for a project the engine creates.
    pub name: Option<String>,
}

/// Device shape and readiness timing.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct DeviceConfig {
    /// Existing device to run against instead of creating one.
    pub id: Option<String>,
    /// Hostname for a created device.
    pub name: Option<String>,
    /// Hardware plan slug.
    pub plan: String,
    /// Operating system slug.
    pub operating_system: String,
    /// Facilities probed for capacity, in preference order.
    pub facilities: Vec<String>,
    /// Billing cycle.
    pub billing_cycle: String,
    /// Bootstrap script; composed from fragments when absent.
    pub userdata: Option<String>,
    /// Skips the thin-pool disk setup fragment.
    pub skip_dmsetup: bool,
    /// Repository branch exported to the bootstrap script.
    pub branch: Option<String>,
    /// Directory the bootstrap fragments are read from.
    pub script_root: Utf8PathBuf,
    /// Behaviour when no facility has capacity.
    pub placement: Placement,
    /// Seconds between readiness polls.
    pub poll_interval_secs: u64,
    /// Seconds to wait for the provider to report the device active.
    pub active_timeout_secs: u64,
    /// Seconds to wait for the bootstrap sentinel.
    pub bootstrap_timeout_secs: u64,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            id: None,
            name: Some(String::from(DEFAULT_DEVICE_NAME)),
            plan: String::from(DEFAULT_PLAN),
            operating_system: String::from(DEFAULT_OPERATING_SYSTEM),
            facilities: vec![String::from(DEFAULT_FACILITY)],
            billing_cycle: String::from(DEFAULT_BILLING_CYCLE),
            userdata: None,
            skip_dmsetup: false,
            branch: None,
            script_root: Utf8PathBuf::from("."),
            placement: Placement::Fallback,
            poll_interval_secs: 10,
            active_timeout_secs: 1800,
            bootstrap_timeout_secs: 1800,
        }
    }
}

/// SSH key policy.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct SshConfig {
    /// Generate and register a fresh key pair.
    pub create_new: bool,
    /// Key label; generated when absent and a new key is created.
    pub name: Option<String>,
    /// Base directory holding a `keys/` directory.
    pub path: Option<Utf8PathBuf>,
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            create_new: true,
            name: None,
            path: None,
        }
    }
}

/// Verbosity passed to the remote test suite.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct LogLevels {
    /// `flintlockd` log level.
    pub flintlockd: String,
    /// `containerd` log level.
    pub containerd: String,
}

impl Default for LogLevels {
    fn default() -> Self {
        Self {
            flintlockd: String::from("2"),
            containerd: String::from("debug"),
        }
    }
}

/// Test-run options.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct TestConfig {
    /// Leaves every resource in place after the run.
    pub skip_teardown: bool,
    /// Asks the remote suite to keep what it creates; implies `skip_teardown`.
    pub skip_delete: bool,
    /// Remote log levels.
    pub log_levels: LogLevels,
}

/// Configuration under assembly.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct ResourceConfig {
    /// Owning organisation.
    pub org_id: Option<String>,
    /// Project selection.
    pub project: ProjectConfig,
    /// Device selection and shape.
    pub device: DeviceConfig,
    /// SSH key policy.
    pub ssh: SshConfig,
    /// Test-run options.
    pub test: TestConfig,
}

/// Command-line values that take precedence over the file.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Overrides {
    /// Replaces `org_id`.
    pub org_id: Option<String>,
    /// Replaces `project.id`.
    pub project_id: Option<String>,
    /// Replaces `project.name`.
    pub project_name: Option<String>,
    /// Replaces `ssh.name`.
    pub ssh_key_name: Option<String>,
    /// Replaces `device.name`.
    pub device_name: Option<String>,
    /// Replaces `device.id`.
    pub device_id: Option<String>,
    /// Replaces `test.skip_teardown`.
    pub skip_teardown: Option<bool>,
}

impl ResourceConfig {
    /// Applies every present override; absent ones leave values untouched.
    pub fn apply_overrides(&mut self, overrides: Overrides) {
        let Overrides {
            org_id,
            project_id,
            project_name,
            ssh_key_name,
            device_name,
            device_id,
            skip_teardown,
        } = overrides;

        if org_id.is_some() {
            self.org_id = org_id;
        }
        if project_id.is_some() {
            self.project.id = project_id;
        }
        if project_name.is_some() {
            self.project.name = project_name;
        }
        if ssh_key_name.is_some() {
            self.ssh.name = ssh_key_name;
        }
        if device_name.is_some() {
            self.device.name = device_name;
        }
        if device_id.is_some() {
            self.device.id = device_id;
        }
        if let Some(skip) = skip_teardown {
            self.test.skip_teardown = skip;
        }
    }
}

/// Errors raised while loading a configuration file.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read {path}: {message}")]
    Io {
        /// File that could not be read.
        path: Utf8PathBuf,
        /// Operating system error string.
        message: String,
    },
    /// The file is not valid YAML.
    #[error("failed to parse {path}: {message}")]
    Parse {
        /// File that failed to parse.
        path: Utf8PathBuf,
        /// Parser error message.
        message: String,
    },
    /// The document does not match the configuration schema.
    #[error("{path} does not match the configuration schema: {}", schema::render(.violations))]
    Schema {
        /// File that was checked.
        path: Utf8PathBuf,
        /// Every violation found, ordered by key.
        violations: Vec<SchemaViolation>,
    },
    /// The merged document could not be converted into a configuration.
    #[error("failed to apply {path}: {message}")]
    Decode {
        /// File that was merged.
        path: Utf8PathBuf,
        /// Decoder error message.
        message: String,
    },
}

/// Errors raised when a configuration is not fit for the requested action.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ValidationError {
    /// A field is missing or inconsistent.
    #[error("invalid configuration: {field}: {message}")]
    Invalid {
        /// Dotted path of the offending field.
        field: String,
        /// What is wrong with it.
        message: String,
    },
    /// A bootstrap fragment could not be read.
    #[error("failed to read bootstrap fragment {path}: {message}")]
    Fragment {
        /// Fragment path.
        path: Utf8PathBuf,
        /// Operating system error string.
        message: String,
    },
}

impl ValidationError {
    fn invalid(field: &str, message: impl Into<String>) -> Self {
        Self::Invalid {
            field: field.to_owned(),
            message: message.into(),
        }
    }
}

/// Configuration that passed validation and has every default resolved.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ValidatedConfig {
    config: ResourceConfig,
}

impl ValidatedConfig {
    /// Returns the resolved configuration record.
    #[must_use]
    pub const fn config(&self) -> &ResourceConfig {
        &self.config
    }

    /// Owning organisation.
    #[must_use]
    pub fn org_id(&self) -> &str {
        self.config.org_id.as_deref().unwrap_or_default()
    }

    /// Device to run against instead of creating one.
    #[must_use]
    pub fn existing_device_id(&self) -> Option<&str> {
        self.config.device.id.as_deref()
    }

    /// Project to reuse, if any.
    #[must_use]
    pub fn existing_project_id(&self) -> Option<&str> {
        self.config.project.id.as_deref()
    }

    /// Name for a created project.
    #[must_use]
    pub fn project_name(&self) -> &str {
        self.config.project.name.as_deref().unwrap_or_default()
    }

    /// Hostname for a created device.
    #[must_use]
    pub fn device_name(&self) -> &str {
        self.config.device.name.as_deref().unwrap_or_default()
    }

    /// Key label.
    #[must_use]
    pub fn key_name(&self) -> &str {
        self.config.ssh.name.as_deref().unwrap_or_default()
    }

    /// Whether the engine generates and owns the key.
    #[must_use]
    pub const fn creates_key(&self) -> bool {
        self.config.ssh.create_new
    }

    /// Directory holding the key material.
    #[must_use]
    pub fn key_dir(&self) -> Utf8PathBuf {
        crate::keys::key_dir(self.key_name(), self.config.ssh.path.as_deref())
    }

    /// Composed bootstrap script.
    #[must_use]
    pub fn userdata(&self) -> &str {
        self.config.device.userdata.as_deref().unwrap_or_default()
    }

    /// Delay between readiness polls.
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.config.device.poll_interval_secs)
    }

    /// Deadline for the device to become active.
    #[must_use]
    pub const fn active_timeout(&self) -> Duration {
        Duration::from_secs(self.config.device.active_timeout_secs)
    }

    /// Deadline for the bootstrap sentinel to appear.
    #[must_use]
    pub const fn bootstrap_timeout(&self) -> Duration {
        Duration::from_secs(self.config.device.bootstrap_timeout_secs)
    }

    /// Whether teardown is skipped.
    #[must_use]
    pub const fn skip_teardown(&self) -> bool {
        self.config.test.skip_teardown
    }
}

/// Returns `true` when `value` is present and not blank.
fn is_set(value: Option<&str>) -> bool {
    value.is_some_and(|text| !text.trim().is_empty())
}

/// Reads `path` relative to the working directory when it is not absolute.
fn read_file(path: &Utf8Path) -> Result<String, String> {
    use cap_std::{ambient_authority, fs_utf8::Dir};

    let parent = match path.parent() {
        Some(dir) if !dir.as_str().is_empty() => dir,
        _ => Utf8Path::new("."),
    };
    let file_name = path
        .file_name()
        .ok_or_else(|| format!("path has no file name: {path}"))?;
    let dir = Dir::open_ambient_dir(parent, ambient_authority()).map_err(|err| err.to_string())?;
    dir.read_to_string(file_name).map_err(|err| err.to_string())
}

#[cfg(test)]
mod tests;
