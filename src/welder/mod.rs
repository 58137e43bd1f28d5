//! Provisioning engine: acquires a project, key, and device, waits for the
//! device to finish bootstrapping, runs remote commands, and tears down
//! exactly what it created.
//!
//! Every resource has an [`Ownership`] record. Acquisition sets it once;
//! [`Welder::teardown`] deletes only [`Ownership::Owned`] resources, in
//! reverse acquisition order, and keeps going past individual failures.
//! Readiness waits are bounded by deadlines and observe a
//! [`CancellationToken`].

mod error;
mod ownership;
mod poll;

use std::fmt;
use std::net::IpAddr;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::keys::{Keysmith, PRIVATE_KEY_FILE};
use crate::provider::{Device, DeviceRequest, Project, Provider, ProviderError, ResourceKind};
use crate::resource_config::{Placement, ValidatedConfig};
use crate::shell::{RemoteCommand, RemoteCommandOutput, RemoteShell, SshTarget};

pub use error::{CapacityError, TeardownError, TeardownFailure, WelderError};
pub use ownership::Ownership;
pub use poll::{PollOutcome, PollPolicy, Probe, poll_until};

/// File the bootstrap script creates once it has finished.
pub const READY_SENTINEL: &str = "/flintlock_ready";

const FAILED_STATE: &str = "failed";
const DEFAULT_REMOVAL_TIMEOUT: Duration = Duration::from_secs(600);
const DEFAULT_LOOKUP_TIMEOUT: Duration = Duration::from_secs(300);

/// Progress through the provisioning sequence.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Stage {
    /// Nothing has happened yet.
    Idle,
    /// A facility was selected, or placement was left to the provider.
    CapacityChecked,
    /// A project is held.
    ProjectAcquired,
    /// Key material is held.
    KeyAcquired,
    /// The device creation request was accepted.
    DeviceCreated,
    /// The provider reports the device active.
    DeviceActive,
    /// The bootstrap sentinel was observed.
    BootstrapConfirmed,
    /// The device is usable.
    Ready,
    /// An existing device was found.
    DeviceLookedUp,
    /// The existing device's address is known.
    IpResolved,
    /// An owned device is being removed.
    DeviceRemoval,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Idle => "idle",
            Self::CapacityChecked => "capacity check",
            Self::ProjectAcquired => "project acquisition",
            Self::KeyAcquired => "key acquisition",
            Self::DeviceCreated => "device creation",
            Self::DeviceActive => "device activation",
            Self::BootstrapConfirmed => "bootstrap confirmation",
            Self::Ready => "ready",
            Self::DeviceLookedUp => "device lookup",
            Self::IpResolved => "address resolution",
            Self::DeviceRemoval => "device removal",
        };
        f.write_str(label)
    }
}

/// Key material the engine connects with.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct KeyHandle {
    /// Key label.
    pub name: String,
    /// Directory holding the key files.
    pub dir: Utf8PathBuf,
    /// Provider identifier; only set for keys the engine registered.
    pub provider_id: Option<String>,
}

/// Where a usable device can be reached.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DeviceDetails {
    /// Provider identifier of the device.
    pub device_id: String,
    /// Address the device is reached on.
    pub ip: IpAddr,
    /// Directory holding the private key.
    pub key_dir: Utf8PathBuf,
}

impl DeviceDetails {
    /// Command an operator can paste to reach the device.
    #[must_use]
    pub fn ssh_command(&self, user: &str) -> String {
        format!(
            "ssh -i {} {user}@{}",
            self.key_dir.join(PRIVATE_KEY_FILE),
            self.ip
        )
    }
}

/// The provisioning engine.
#[derive(Debug)]
pub struct Welder<P, S, K> {
    provider: P,
    shell: S,
    keysmith: K,
    config: ValidatedConfig,
    cancel: CancellationToken,
    poll_interval: Duration,
    active_timeout: Duration,
    bootstrap_timeout: Duration,
    removal_timeout: Duration,
    lookup_timeout: Duration,
    stage: Stage,
    project: Ownership<Project>,
    key: Ownership<KeyHandle>,
    device: Ownership<Device>,
    ip: Option<IpAddr>,
}

impl<P, S, K> Welder<P, S, K>
where
    P: Provider,
    S: RemoteShell,
    K: Keysmith,
{
    /// Creates an engine that takes its timing from `config`.
    #[must_use]
    pub fn new(config: ValidatedConfig, provider: P, shell: S, keysmith: K) -> Self {
        Self {
            poll_interval: config.poll_interval(),
            active_timeout: config.active_timeout(),
            bootstrap_timeout: config.bootstrap_timeout(),
            removal_timeout: DEFAULT_REMOVAL_TIMEOUT,
            lookup_timeout: DEFAULT_LOOKUP_TIMEOUT,
            provider,
            shell,
            keysmith,
            config,
            cancel: CancellationToken::new(),
            stage: Stage::Idle,
            project: Ownership::Unacquired,
            key: Ownership::Unacquired,
            device: Ownership::Unacquired,
            ip: None,
        }
    }

    /// Uses `token` to interrupt readiness waits.
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Overrides the delay between readiness polls.
    ///
    /// This is primarily used by tests to keep polling scenarios fast.
    #[must_use]
    pub const fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Overrides the deadlines for activation, bootstrap, and removal.
    #[must_use]
    pub const fn with_timeouts(
        mut self,
        active: Duration,
        bootstrap: Duration,
        removal: Duration,
    ) -> Self {
        self.active_timeout = active;
        self.bootstrap_timeout = bootstrap;
        self.removal_timeout = removal;
        self
    }

    /// Overrides how long transient project lookups are retried.
    ///
    /// This is primarily used by tests.
    #[must_use]
    pub const fn with_lookup_timeout(mut self, timeout: Duration) -> Self {
        self.lookup_timeout = timeout;
        self
    }

    /// Current stage.
    #[must_use]
    pub const fn stage(&self) -> Stage {
        self.stage
    }

    /// Project ownership record.
    #[must_use]
    pub const fn project(&self) -> &Ownership<Project> {
        &self.project
    }

    /// Key ownership record.
    #[must_use]
    pub const fn key(&self) -> &Ownership<KeyHandle> {
        &self.key
    }

    /// Device ownership record.
    #[must_use]
    pub const fn device(&self) -> &Ownership<Device> {
        &self.device
    }

    /// Configuration the engine was built with.
    #[must_use]
    pub const fn config(&self) -> &ValidatedConfig {
        &self.config
    }

    /// Token observed by readiness waits.
    #[must_use]
    pub const fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// User remote sessions are opened as.
    #[must_use]
    pub fn ssh_user(&self) -> &str {
        self.shell.user()
    }

    /// Id of the held device, known before its address is.
    #[must_use]
    pub fn device_id(&self) -> Option<&str> {
        self.device.handle().map(|device| device.id.as_str())
    }

    /// Device id and address once a device is usable.
    #[must_use]
    pub fn device_details(&self) -> Option<DeviceDetails> {
        let device = self.device.handle()?;
        let ip = self.ip?;
        Some(DeviceDetails {
            device_id: device.id.clone(),
            ip,
            key_dir: self.key_dir(),
        })
    }

    fn key_dir(&self) -> Utf8PathBuf {
        self.key
            .handle()
            .map_or_else(|| self.config.key_dir(), |key| key.dir.clone())
    }

    fn ssh_target(&self, ip: IpAddr) -> SshTarget {
        SshTarget::new(ip, &self.key_dir().join(PRIVATE_KEY_FILE))
    }

    const fn policy(&self, timeout: Duration) -> PollPolicy {
        PollPolicy::new(self.poll_interval, timeout)
    }

    /// Runs the full create sequence and returns the ready device.
    ///
    /// # Errors
    ///
    /// Returns the first [`WelderError`]. Resources acquired before the
    /// failure stay recorded so [`Welder::teardown`] can remove them.
    pub async fn create_all(&mut self) -> Result<DeviceDetails, WelderError> {
        let facility = self.select_facility().await?;
        let project = self.acquire_project().await?;
        let key = self.acquire_key(&project.id).await?;
        let device = self
            .create_device(&project.id, &key, facility.as_deref())
            .await?;
        let ip = self.wait_until_ready(&device.id).await?;
        self.stage = Stage::Ready;
        info!(device_id = %device.id, %ip, "device ready");
        Ok(DeviceDetails {
            device_id: device.id,
            ip,
            key_dir: key.dir,
        })
    }

    /// Returns the first configured facility with room for one device.
    ///
    /// Queries stop at the first facility that reports capacity. A failed
    /// query counts as "no room" for that facility.
    ///
    /// # Errors
    ///
    /// Returns [`CapacityError`] when no facility qualifies.
    pub async fn check_capacity(&self) -> Result<String, CapacityError> {
        let device = &self.config.config().device;
        for facility in &device.facilities {
            match self
                .provider
                .validate_capacity(facility, &device.plan, 1)
                .await
            {
                Ok(true) => {
                    info!(%facility, plan = %device.plan, "facility has capacity");
                    return Ok(facility.clone());
                }
                Ok(false) => debug!(%facility, plan = %device.plan, "facility has no capacity"),
                Err(err) => warn!(%facility, error = %err, "capacity query failed"),
            }
        }
        Err(CapacityError {
            plan: device.plan.clone(),
            facilities: device.facilities.clone(),
        })
    }

    /// Applies the placement policy to the capacity check.
    ///
    /// # Errors
    ///
    /// Returns [`WelderError::Capacity`] when no facility has room and
    /// placement is strict.
    pub async fn select_facility(&mut self) -> Result<Option<String>, WelderError> {
        let selected = match self.check_capacity().await {
            Ok(facility) => Some(facility),
            Err(err) => match self.config.config().device.placement {
                Placement::Fallback => {
                    warn!(error = %err, "no facility has capacity; letting the provider place the device");
                    None
                }
                Placement::Strict => return Err(err.into()),
            },
        };
        self.stage = Stage::CapacityChecked;
        Ok(selected)
    }

    /// Reuses the configured project when it exists, otherwise creates one.
    ///
    /// # Errors
    ///
    /// Transient lookup failures are retried with backoff until the lookup
    /// deadline passes.
    ///
    /// # Errors
    ///
    /// Returns [`WelderError::Provider`] when the lookup fails for a reason
    /// other than absence, or when creation fails, and
    /// [`WelderError::TimedOut`] or [`WelderError::Cancelled`] when the
    /// provider stays unreachable.
    pub async fn acquire_project(&mut self) -> Result<Project, WelderError> {
        if let Some(id) = self.config.existing_project_id() {
            match self.find_project(id).await? {
                Some(project) => {
                    info!(project_id = %project.id, "reusing project");
                    self.project = Ownership::Reused(project.clone());
                    self.stage = Stage::ProjectAcquired;
                    return Ok(project);
                }
                None => warn!(project_id = %id, "project not found; creating a new one"),
            }
        }

        let project = self
            .provider
            .create_project(self.config.org_id(), self.config.project_name())
            .await
            .map_err(WelderError::provider("project creation"))?;
        info!(project_id = %project.id, name = %project.name, "created project");
        self.project = Ownership::Owned(project.clone());
        self.stage = Stage::ProjectAcquired;
        Ok(project)
    }

    fn discard_unregistered(&self, dir: &Utf8Path) {
        if let Err(cleanup) = self.keysmith.discard(dir) {
            warn!(key_dir = %dir, error = %cleanup, "failed to remove unregistered key");
        }
    }

    async fn find_project(&self, id: &str) -> Result<Option<Project>, WelderError> {
        let provider = &self.provider;
        let outcome = poll_until(
            self.policy(self.lookup_timeout),
            &self.cancel,
            move || async move {
                match provider.get_project(id).await {
                    Ok(project) => Probe::Ready(Ok(Some(project))),
                    Err(err) if err.is_not_found() => Probe::Ready(Ok(None)),
                    Err(err) if err.is_transient() => Probe::Transient(err.to_string()),
                    Err(err) => Probe::Ready(Err(err)),
                }
            },
        )
        .await;
        let found: Result<Option<Project>, ProviderError> =
            settle(outcome, Stage::ProjectAcquired, self.lookup_timeout)?;
        found.map_err(WelderError::provider("project lookup"))
    }

    /// Reuses configured key material or generates and registers a new pair.
    ///
    /// # Errors
    ///
    /// Returns [`WelderError::Key`] when generation fails and
    /// [`WelderError::Provider`] when registration fails. Either way the
    /// key directory is removed before returning.
    pub async fn acquire_key(&mut self, project_id: &str) -> Result<KeyHandle, WelderError> {
        let name = self.config.key_name().to_owned();
        let dir = self.config.key_dir();

        if !self.config.creates_key() {
            info!(key = %name, key_dir = %dir, "reusing ssh key");
            let handle = KeyHandle {
                name,
                dir,
                provider_id: None,
            };
            self.key = Ownership::Reused(handle.clone());
            self.stage = Stage::KeyAcquired;
            return Ok(handle);
        }

        let pair = match self.keysmith.forge(&dir) {
            Ok(pair) => pair,
            Err(err) => {
                self.discard_unregistered(&dir);
                return Err(err.into());
            }
        };
        let registered = match self
            .provider
            .create_ssh_key(project_id, &name, &pair.public_openssh)
            .await
        {
            Ok(key) => key,
            Err(err) => {
                self.discard_unregistered(&dir);
                return Err(WelderError::provider("ssh key registration")(err));
            }
        };

        info!(key = %name, key_id = %registered.id, key_dir = %dir, "registered ssh key");
        let handle = KeyHandle {
            name,
            dir,
            provider_id: Some(registered.id),
        };
        self.key = Ownership::Owned(handle.clone());
        self.stage = Stage::KeyAcquired;
        Ok(handle)
    }

    /// Issues the device creation request.
    ///
    /// A reused key is not passed explicitly; the provider then installs
    /// every key registered with the project.
    ///
    /// # Errors
    ///
    /// Returns [`WelderError::Provider`] when the request is rejected.
    pub async fn create_device(
        &mut self,
        project_id: &str,
        key: &KeyHandle,
        facility: Option<&str>,
    ) -> Result<Device, WelderError> {
        let device_config = &self.config.config().device;
        let request = DeviceRequest {
            project_id: project_id.to_owned(),
            hostname: self.config.device_name().to_owned(),
            plan: device_config.plan.clone(),
            operating_system: device_config.operating_system.clone(),
            facility: facility.map(str::to_owned),
            billing_cycle: device_config.billing_cycle.clone(),
            ssh_key_ids: key.provider_id.iter().cloned().collect(),
            userdata: self.config.userdata().to_owned(),
        };

        let device = self
            .provider
            .create_device(&request)
            .await
            .map_err(WelderError::provider("device creation"))?;
        info!(device_id = %device.id, hostname = %device.hostname, facility = ?facility, "created device");
        self.device = Ownership::Owned(device.clone());
        self.stage = Stage::DeviceCreated;
        Ok(device)
    }

    /// Waits for the provider to report the device active, then for the
    /// bootstrap sentinel to appear over SSH.
    ///
    /// Lookup failures and refused connections count as "not ready yet".
    ///
    /// # Errors
    ///
    /// Returns [`WelderError::TimedOut`] when a phase exceeds its deadline,
    /// [`WelderError::Cancelled`] when cancelled, and
    /// [`WelderError::NotReady`] when the device or shell fails outright.
    pub async fn wait_until_ready(&mut self, device_id: &str) -> Result<IpAddr, WelderError> {
        let ip = self.wait_until_active(device_id).await?;
        self.ip = Some(ip);
        self.stage = Stage::DeviceActive;
        info!(%device_id, %ip, "device active; waiting for bootstrap");

        self.wait_for_bootstrap(ip).await?;
        self.stage = Stage::BootstrapConfirmed;
        info!(%device_id, %ip, "bootstrap complete");
        Ok(ip)
    }

    async fn wait_until_active(&self, device_id: &str) -> Result<IpAddr, WelderError> {
        let provider = &self.provider;
        let outcome = poll_until(
            self.policy(self.active_timeout),
            &self.cancel,
            move || async move {
                match provider.get_device(device_id).await {
                    Ok(device) => activation_probe(&device),
                    Err(err) if err.is_transient() || err.is_not_found() => {
                        Probe::Transient(err.to_string())
                    }
                    Err(err) => Probe::Failed(err.to_string()),
                }
            },
        )
        .await;
        settle(outcome, Stage::DeviceActive, self.active_timeout)
    }

    async fn wait_for_bootstrap(&self, ip: IpAddr) -> Result<(), WelderError> {
        let target = self.ssh_target(ip);
        let probe_command = RemoteCommand::new(["test", "-f", READY_SENTINEL]);
        let outcome = poll_until(self.policy(self.bootstrap_timeout), &self.cancel, || {
            let result = self.shell.run(&target, &probe_command);
            async move {
                match result {
                    Ok(output) if output.exit_code == Some(0) => Probe::Ready(()),
                    Ok(_) => Probe::Pending,
                    Err(err) if err.is_connect() => Probe::Transient(err.to_string()),
                    Err(err) => Probe::Failed(err.to_string()),
                }
            }
        })
        .await;
        settle(outcome, Stage::BootstrapConfirmed, self.bootstrap_timeout)
    }

    /// Runs `command` on the device.
    ///
    /// Output is streamed by the shell as it arrives. With `allow_error`
    /// the exit status is returned for the caller to inspect.
    ///
    /// # Errors
    ///
    /// Returns [`WelderError::NoDevice`] before a device is resolved,
    /// [`WelderError::Shell`] when the session cannot be opened,
    /// [`WelderError::MissingExitStatus`] when the command was killed, and
    /// [`WelderError::RemoteCommand`] for a non-zero exit without
    /// `allow_error`.
    pub fn run_remote(
        &self,
        command: &RemoteCommand,
        allow_error: bool,
    ) -> Result<RemoteCommandOutput, WelderError> {
        let ip = self.ip.ok_or(WelderError::NoDevice)?;
        let rendered = command.render();
        info!(%ip, command = %rendered, "running remote command");

        let output = self.shell.run(&self.ssh_target(ip), command)?;
        let Some(code) = output.exit_code else {
            return Err(WelderError::MissingExitStatus { command: rendered });
        };
        if code != 0 && !allow_error {
            return Err(WelderError::RemoteCommand {
                exit_code: code,
                stdout: output.stdout,
                stderr: output.stderr,
            });
        }
        Ok(output)
    }

    /// Resolves an existing device without creating anything.
    ///
    /// The device and key are recorded as reused, so teardown leaves them
    /// alone.
    ///
    /// # Errors
    ///
    /// Returns [`WelderError::NotFound`] for an unknown id and
    /// [`WelderError::NotReady`] when the device has no address.
    pub async fn fetch(&mut self, device_id: &str) -> Result<DeviceDetails, WelderError> {
        let device = self.lookup_device(device_id).await?;
        self.stage = Stage::DeviceLookedUp;
        let ip = address_of(&device)?;

        let key = KeyHandle {
            name: self.config.key_name().to_owned(),
            dir: self.config.key_dir(),
            provider_id: None,
        };
        let details = DeviceDetails {
            device_id: device.id.clone(),
            ip,
            key_dir: key.dir.clone(),
        };
        self.key = Ownership::Reused(key);
        self.device = Ownership::Reused(device);
        self.ip = Some(ip);
        self.stage = Stage::IpResolved;
        info!(%device_id, %ip, "using existing device");
        self.stage = Stage::Ready;
        Ok(details)
    }

    /// Looks up a device and returns its address.
    ///
    /// # Errors
    ///
    /// Returns [`WelderError::NotFound`] for an unknown id and
    /// [`WelderError::NotReady`] when the device has no address.
    pub async fn get_device_ip(&self, device_id: &str) -> Result<IpAddr, WelderError> {
        let device = self.lookup_device(device_id).await?;
        address_of(&device)
    }

    /// Deletes a device by id after confirming it exists.
    ///
    /// # Errors
    ///
    /// Returns [`WelderError::NotFound`] for an unknown id and
    /// [`WelderError::Provider`] when deletion fails.
    pub async fn delete_device(&self, device_id: &str) -> Result<(), WelderError> {
        delete_existing_device(&self.provider, device_id).await
    }

    async fn lookup_device(&self, device_id: &str) -> Result<Device, WelderError> {
        lookup_device(&self.provider, device_id).await
    }

    /// Deletes every owned resource, device first and project last.
    ///
    /// Each deletion is attempted regardless of earlier failures. The
    /// project is only removed after the provider stops reporting the
    /// device. Every record is reset afterwards, so a second call does
    /// nothing.
    ///
    /// # Errors
    ///
    /// Returns [`TeardownError`] listing every deletion that failed.
    pub async fn teardown(&mut self) -> Result<(), TeardownError> {
        let mut failures = Vec::new();

        if let Ownership::Owned(device) = self.device.release() {
            self.remove_device(&device.id, &mut failures).await;
        }
        if let Ownership::Owned(key) = self.key.release() {
            self.remove_key(&key, &mut failures).await;
        }
        if let Ownership::Owned(project) = self.project.release() {
            match self.provider.delete_project(&project.id).await {
                Ok(()) => info!(project_id = %project.id, "deleted project"),
                Err(err) => failures.push(failure(ResourceKind::Project, &project.id, &err)),
            }
        }
        self.ip = None;
        self.stage = Stage::Idle;

        if failures.is_empty() {
            return Ok(());
        }
        for failed in &failures {
            error!(kind = %failed.kind, id = %failed.id, error = %failed.message, "teardown failed");
        }
        Err(TeardownError { failures })
    }

    async fn remove_device(&self, device_id: &str, failures: &mut Vec<TeardownFailure>) {
        match self.provider.delete_device(device_id).await {
            Ok(()) => info!(%device_id, "deleted device"),
            Err(err) if err.is_not_found() => {
                info!(%device_id, "device already gone");
                return;
            }
            Err(err) => {
                failures.push(failure(ResourceKind::Device, device_id, &err));
                return;
            }
        }
        if let Err(err) = self.wait_until_gone(device_id).await {
            failures.push(failure(ResourceKind::Device, device_id, &err));
        }
    }

    async fn remove_key(&self, key: &KeyHandle, failures: &mut Vec<TeardownFailure>) {
        if let Some(key_id) = &key.provider_id {
            match self.provider.delete_ssh_key(key_id).await {
                Ok(()) => info!(%key_id, key = %key.name, "deleted ssh key"),
                Err(err) => failures.push(failure(ResourceKind::SshKey, key_id, &err)),
            }
        }
        match self.keysmith.discard(&key.dir) {
            Ok(()) => info!(key_dir = %key.dir, "removed key material"),
            Err(err) => failures.push(failure(ResourceKind::SshKey, key.dir.as_str(), &err)),
        }
    }

    /// Waits until the provider no longer reports the device. Uses its own
    /// token so an interrupted run still cleans up.
    async fn wait_until_gone(&self, device_id: &str) -> Result<(), WelderError> {
        let provider = &self.provider;
        let outcome = poll_until(
            self.policy(self.removal_timeout),
            &CancellationToken::new(),
            move || async move {
                match provider.get_device(device_id).await {
                    Ok(device) => {
                        debug!(device_id = %device.id, state = %device.state, "device still present");
                        Probe::Pending
                    }
                    Err(err) if err.is_not_found() => Probe::Ready(()),
                    Err(err) if err.is_transient() => Probe::Transient(err.to_string()),
                    Err(err) => Probe::Failed(err.to_string()),
                }
            },
        )
        .await;
        settle(outcome, Stage::DeviceRemoval, self.removal_timeout)
    }
}

/// Deletes a device by id after confirming it exists, without an engine.
///
/// # Errors
///
/// Returns [`WelderError::NotFound`] for an unknown id and
/// [`WelderError::Provider`] when deletion fails.
pub async fn delete_existing_device<P: Provider>(
    provider: &P,
    device_id: &str,
) -> Result<(), WelderError> {
    lookup_device(provider, device_id).await?;
    provider
        .delete_device(device_id)
        .await
        .map_err(WelderError::provider("device deletion"))?;
    info!(%device_id, "deleted device");
    Ok(())
}

async fn lookup_device<P: Provider>(provider: &P, device_id: &str) -> Result<Device, WelderError> {
    provider
        .get_device(device_id)
        .await
        .map_err(WelderError::provider("device lookup"))
}

fn activation_probe(device: &Device) -> Probe<IpAddr> {
    if device.state == FAILED_STATE {
        return Probe::Failed(format!("device {} entered state {FAILED_STATE}", device.id));
    }
    if !device.is_active() {
        debug!(device_id = %device.id, state = %device.state, "device not active yet");
        return Probe::Pending;
    }
    device.public_ip().map_or_else(
        || {
            debug!(device_id = %device.id, "device active without an address");
            Probe::Pending
        },
        Probe::Ready,
    )
}

fn address_of(device: &Device) -> Result<IpAddr, WelderError> {
    device.public_ip().ok_or_else(|| WelderError::NotReady {
        stage: Stage::IpResolved,
        reason: format!("device {} has no address", device.id),
    })
}

fn settle<T>(outcome: PollOutcome<T>, stage: Stage, waited: Duration) -> Result<T, WelderError> {
    match outcome {
        PollOutcome::Ready(value) => Ok(value),
        PollOutcome::TimedOut => Err(WelderError::TimedOut { stage, waited }),
        PollOutcome::Cancelled => Err(WelderError::Cancelled { stage }),
        PollOutcome::Failed(reason) => Err(WelderError::NotReady { stage, reason }),
    }
}

fn failure(kind: ResourceKind, id: &str, err: &dyn fmt::Display) -> TeardownFailure {
    TeardownFailure {
        kind,
        id: id.to_owned(),
        message: err.to_string(),
    }
}
