//! Engine error types.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

use super::Stage;
use crate::keys::KeyError;
use crate::provider::{ProviderError, ResourceKind};
use crate::shell::ShellError;

/// No configured facility reported room for the device.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error("no capacity for plan {plan} in facilities [{}]", .facilities.join(", "))]
pub struct CapacityError {
    /// Plan that was requested.
    pub plan: String,
    /// Facilities that were probed, in order.
    pub facilities: Vec<String>,
}

/// Errors surfaced by the provisioning engine.
#[derive(Debug, Error)]
pub enum WelderError {
    /// Capacity was required but unavailable.
    #[error(transparent)]
    Capacity(#[from] CapacityError),
    /// A referenced resource does not exist.
    #[error("{kind} {id} does not exist")]
    NotFound {
        /// Kind of resource.
        kind: ResourceKind,
        /// Identifier that was looked up.
        id: String,
    },
    /// A provider call failed.
    #[error("{operation} failed: {source}")]
    Provider {
        /// Operation being performed.
        operation: &'static str,
        /// Underlying provider error.
        #[source]
        source: ProviderError,
    },
    /// Key material could not be produced.
    #[error(transparent)]
    Key(#[from] KeyError),
    /// The remote shell could not run a command.
    #[error(transparent)]
    Shell(#[from] ShellError),
    /// A remote command exited non-zero when success was required.
    #[error("remote command exited with status {exit_code}: {stderr}")]
    RemoteCommand {
        /// Exit status reported by the command.
        exit_code: i32,
        /// Captured standard output.
        stdout: String,
        /// Captured standard error.
        stderr: String,
    },
    /// The remote command terminated without an exit status.
    #[error("remote command `{command}` terminated without an exit status")]
    MissingExitStatus {
        /// Rendered command line.
        command: String,
    },
    /// A readiness wait exceeded its deadline.
    #[error("{stage} did not complete within {} seconds", .waited.as_secs())]
    TimedOut {
        /// Stage that was being waited on.
        stage: Stage,
        /// Deadline that elapsed.
        waited: Duration,
    },
    /// The run was cancelled.
    #[error("cancelled while waiting for {stage}")]
    Cancelled {
        /// Stage that was interrupted.
        stage: Stage,
    },
    /// A readiness probe reported an unrecoverable failure.
    #[error("{stage} failed: {reason}")]
    NotReady {
        /// Stage that failed.
        stage: Stage,
        /// Reason reported by the probe.
        reason: String,
    },
    /// A remote operation was requested before a device was resolved.
    #[error("no device has been provisioned or fetched yet")]
    NoDevice,
}

impl WelderError {
    /// Builds a mapper that turns provider errors for `operation` into engine
    /// errors, keeping "not found" as its own variant.
    pub(super) fn provider(operation: &'static str) -> impl Fn(ProviderError) -> Self {
        move |source| match source {
            ProviderError::NotFound { kind, id } => Self::NotFound { kind, id },
            other => Self::Provider {
                operation,
                source: other,
            },
        }
    }
}

/// A single resource teardown could not delete.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TeardownFailure {
    /// Kind of resource.
    pub kind: ResourceKind,
    /// Identifier of the resource.
    pub id: String,
    /// Why the deletion failed.
    pub message: String,
}

impl fmt::Display for TeardownFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}: {}", self.kind, self.id, self.message)
    }
}

/// Every deletion that failed during teardown.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error("teardown left resources behind: {}", render(.failures))]
pub struct TeardownError {
    /// Failed deletions, in the order they were attempted.
    pub failures: Vec<TeardownFailure>,
}

fn render(failures: &[TeardownFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
