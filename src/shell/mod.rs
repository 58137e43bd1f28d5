//! Remote command execution over the system `ssh` client.
//!
//! [`SshShell`] turns an argv plus optional working directory into a single
//! escaped remote command line and runs it through a [`CommandRunner`]. The
//! client's reserved exit status `255` is reported as
//! [`ShellError::Connect`] so callers can retry an unreachable host without
//! confusing it with a failing remote command.

use std::ffi::OsString;
use std::net::IpAddr;

use camino::{Utf8Path, Utf8PathBuf};
use shell_escape::unix::escape;
use thiserror::Error;

mod settings;
mod types;

pub use settings::{DEFAULT_SSH_USER, ShellSettings};
pub use types::{
    CommandOutput, CommandRunner, ProcessCommandRunner, RemoteCommandOutput,
    StreamingCommandRunner,
};

/// Exit status the OpenSSH client reserves for its own failures.
const SSH_CLIENT_FAILURE: i32 = 255;

/// Errors surfaced while running commands locally or over SSH.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ShellError {
    /// A required SSH setting is blank or invalid.
    #[error("invalid ssh setting: {field}")]
    InvalidSettings {
        /// Setting that failed validation.
        field: String,
    },
    /// The SSH settings could not be loaded.
    #[error("ssh settings could not be loaded: {0}")]
    Load(String),
    /// A command could not be spawned.
    #[error("failed to spawn {program}: {message}")]
    Spawn {
        /// Command that failed to start.
        program: String,
        /// Operating system error string.
        message: String,
    },
    /// The SSH client could not establish a session.
    #[error("could not connect to {host}: {stderr}")]
    Connect {
        /// Host the client tried to reach.
        host: String,
        /// Diagnostic output from the client.
        stderr: String,
    },
}

impl ShellError {
    /// Returns `true` when the host was unreachable and a retry may succeed.
    #[must_use]
    pub const fn is_connect(&self) -> bool {
        matches!(self, Self::Connect { .. })
    }
}

/// Host and credentials used to open a session.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SshTarget {
    /// Address of the remote host.
    pub host: IpAddr,
    /// Private key presented to the host.
    pub identity_file: Utf8PathBuf,
}

impl SshTarget {
    /// Creates a target for `host` authenticated with `identity_file`.
    #[must_use]
    pub fn new(host: IpAddr, identity_file: &Utf8Path) -> Self {
        Self {
            host,
            identity_file: identity_file.to_path_buf(),
        }
    }
}

/// Command to execute remotely.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RemoteCommand {
    /// Program and arguments; each element is escaped individually.
    pub argv: Vec<String>,
    /// Working directory to change into first.
    pub cwd: Option<String>,
}

impl RemoteCommand {
    /// Creates a command from an argv.
    #[must_use]
    pub fn new<I, S>(argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            argv: argv.into_iter().map(Into::into).collect(),
            cwd: None,
        }
    }

    /// Sets the working directory.
    #[must_use]
    pub fn in_dir(mut self, cwd: impl Into<String>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    /// Renders the command as a single shell-escaped line.
    #[must_use]
    pub fn render(&self) -> String {
        let command = self
            .argv
            .iter()
            .map(|arg| escape(arg.as_str().into()).into_owned())
            .collect::<Vec<_>>()
            .join(" ");
        match &self.cwd {
            Some(dir) => format!("cd {} && {command}", escape(dir.as_str().into())),
            None => command,
        }
    }
}

/// Execution channel to a remote host.
pub trait RemoteShell {
    /// Runs `command` on `target`, returning its exit status and output.
    ///
    /// # Errors
    ///
    /// Returns [`ShellError::Connect`] when no session could be opened and
    /// [`ShellError::Spawn`] when the local client could not start. A
    /// non-zero remote exit status is not an error.
    fn run(
        &self,
        target: &SshTarget,
        command: &RemoteCommand,
    ) -> Result<RemoteCommandOutput, ShellError>;

    /// Returns the user sessions are opened as.
    fn user(&self) -> &str;
}

/// [`RemoteShell`] backed by the system `ssh` client.
#[derive(Clone, Debug)]
pub struct SshShell<R: CommandRunner> {
    settings: ShellSettings,
    runner: R,
}

impl<R: CommandRunner> SshShell<R> {
    /// Creates a shell using the provided settings and runner.
    ///
    /// # Errors
    ///
    /// Returns [`ShellError::InvalidSettings`] when validation fails.
    pub fn new(settings: ShellSettings, runner: R) -> Result<Self, ShellError> {
        settings.validate()?;
        Ok(Self { settings, runner })
    }

    /// Returns a reference to the underlying settings.
    #[must_use]
    pub const fn settings(&self) -> &ShellSettings {
        &self.settings
    }

    fn build_ssh_args(&self, target: &SshTarget, remote_command: &str) -> Vec<OsString> {
        let mut args = vec![
            OsString::from("-p"),
            OsString::from(self.settings.ssh_port.to_string()),
            OsString::from("-i"),
            OsString::from(target.identity_file.as_str()),
            OsString::from("-o"),
            OsString::from(format!(
                "ConnectTimeout={}",
                self.settings.ssh_connect_timeout_secs
            )),
        ];

        if self.settings.ssh_batch_mode {
            args.push(OsString::from("-o"));
            args.push(OsString::from("BatchMode=yes"));
        }

        if !self.settings.ssh_strict_host_key_checking {
            args.push(OsString::from("-o"));
            args.push(OsString::from("StrictHostKeyChecking=no"));
        }

        if !self.settings.ssh_known_hosts_file.trim().is_empty() {
            args.push(OsString::from("-o"));
            args.push(OsString::from(format!(
                "UserKnownHostsFile={}",
                self.settings.ssh_known_hosts_file
            )));
        }

        args.push(OsString::from(format!(
            "{}@{}",
            self.settings.ssh_user, target.host
        )));
        args.push(OsString::from(remote_command));
        args
    }
}

impl<R: CommandRunner> RemoteShell for SshShell<R> {
    fn run(
        &self,
        target: &SshTarget,
        command: &RemoteCommand,
    ) -> Result<RemoteCommandOutput, ShellError> {
        let args = self.build_ssh_args(target, &command.render());
        let output = self.runner.run(&self.settings.ssh_bin, &args)?;

        if output.code == Some(SSH_CLIENT_FAILURE) {
            return Err(ShellError::Connect {
                host: target.host.to_string(),
                stderr: output.stderr,
            });
        }

        Ok(RemoteCommandOutput {
            exit_code: output.code,
            stdout: output.stdout,
            stderr: output.stderr,
        })
    }

    fn user(&self) -> &str {
        &self.settings.ssh_user
    }
}
