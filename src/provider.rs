//! Provider abstraction for the bare-metal cloud the engine provisions on.
//!
//! The engine only talks to the provider through [`Provider`], so the real
//! Equinix Metal client and the scripted test double are interchangeable.

use std::future::Future;
use std::net::IpAddr;
use std::pin::Pin;
use std::str::FromStr;

use thiserror::Error;

/// Resource kinds addressed by provider lookups and deletions.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ResourceKind {
    /// An organisation project.
    Project,
    /// A project-scoped SSH key.
    SshKey,
    /// A bare-metal device.
    Device,
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Project => "project",
            Self::SshKey => "ssh key",
            Self::Device => "device",
        };
        f.write_str(label)
    }
}

/// Project returned by the provider.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Project {
    /// Provider identifier.
    pub id: String,
    /// Display name.
    pub name: String,
}

/// SSH key registered with a project.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SshKey {
    /// Provider identifier.
    pub id: String,
    /// Label the key was registered under.
    pub label: String,
}

/// Address assigned to a device.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct IpAssignment {
    /// Textual address as reported by the provider.
    pub address: String,
    /// Whether the address is publicly routable.
    pub public: bool,
    /// Address family (`4` or `6`).
    pub address_family: u8,
}

/// Device snapshot returned by the provider.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Device {
    /// Provider identifier.
    pub id: String,
    /// Hostname the device was created with.
    pub hostname: String,
    /// Provisioning state (for example `queued`, `provisioning`, `active`).
    pub state: String,
    /// Addresses assigned so far; empty until the network is configured.
    pub ip_addresses: Vec<IpAssignment>,
}

/// Provider state reported once a device has finished provisioning.
pub const ACTIVE_STATE: &str = "active";

impl Device {
    /// Returns `true` when the provider reports the device as active.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state == ACTIVE_STATE
    }

    /// Returns the first public IPv4 address, falling back to the first
    /// parseable address of any kind.
    #[must_use]
    pub fn public_ip(&self) -> Option<IpAddr> {
        let parse = |assignment: &IpAssignment| IpAddr::from_str(&assignment.address).ok();
        self.ip_addresses
            .iter()
            .filter(|ip| ip.public && ip.address_family == 4)
            .find_map(parse)
            .or_else(|| self.ip_addresses.iter().find_map(parse))
    }
}

/// Parameters for a single device creation call.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DeviceRequest {
    /// Project the device is billed to.
    pub project_id: String,
    /// Hostname for the new device.
    pub hostname: String,
    /// Hardware plan slug.
    pub plan: String,
    /// Operating system slug.
    pub operating_system: String,
    /// Facility chosen by the capacity check. `None` lets the provider pick.
    pub facility: Option<String>,
    /// Billing cycle (for example `hourly`).
    pub billing_cycle: String,
    /// Project SSH keys to install. Empty installs every project key.
    pub ssh_key_ids: Vec<String>,
    /// Bootstrap script executed on first boot.
    pub userdata: String,
}

/// Errors raised by provider implementations.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ProviderError {
    /// The referenced resource does not exist.
    #[error("{kind} {id} not found")]
    NotFound {
        /// Kind of resource that was looked up.
        kind: ResourceKind,
        /// Identifier used for the lookup.
        id: String,
    },
    /// Network failure or server-side error that may succeed on retry.
    #[error("transient provider failure: {message}")]
    Transient {
        /// Description of the failure.
        message: String,
    },
    /// The provider rejected the request.
    #[error("provider rejected request ({status}): {message}")]
    Api {
        /// HTTP status code returned by the API.
        status: u16,
        /// Body or error message returned by the API.
        message: String,
    },
    /// The provider response could not be decoded.
    #[error("failed to decode provider response: {message}")]
    Decode {
        /// Decoder error message.
        message: String,
    },
}

impl ProviderError {
    /// Returns `true` for failures worth retrying.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }

    /// Returns `true` when the resource does not exist.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Future returned by provider operations.
pub type ProviderFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, ProviderError>> + Send + 'a>>;

/// Operations the provisioning engine needs from the cloud provider.
pub trait Provider {
    /// Fetches a project by id.
    fn get_project<'a>(&'a self, id: &'a str) -> ProviderFuture<'a, Project>;

    /// Creates a project owned by `org_id`.
    fn create_project<'a>(&'a self, org_id: &'a str, name: &'a str)
    -> ProviderFuture<'a, Project>;

    /// Returns whether `count` devices of `plan` fit in `facility`.
    fn validate_capacity<'a>(
        &'a self,
        facility: &'a str,
        plan: &'a str,
        count: u32,
    ) -> ProviderFuture<'a, bool>;

    /// Registers a public key with a project.
    fn create_ssh_key<'a>(
        &'a self,
        project_id: &'a str,
        label: &'a str,
        public_key: &'a str,
    ) -> ProviderFuture<'a, SshKey>;

    /// Issues a device creation request.
    fn create_device<'a>(&'a self, request: &'a DeviceRequest) -> ProviderFuture<'a, Device>;

    /// Fetches the current snapshot of a device.
    fn get_device<'a>(&'a self, id: &'a str) -> ProviderFuture<'a, Device>;

    /// Deletes a device.
    fn delete_device<'a>(&'a self, id: &'a str) -> ProviderFuture<'a, ()>;

    /// Deletes an SSH key.
    fn delete_ssh_key<'a>(&'a self, id: &'a str) -> ProviderFuture<'a, ()>;

    /// Deletes a project.
    fn delete_project<'a>(&'a self, id: &'a str) -> ProviderFuture<'a, ()>;
}
