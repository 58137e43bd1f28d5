//! Test support utilities shared across unit and integration tests.
//!
//! The doubles share their state behind `Arc<Mutex<_>>`, so a clone handed
//! to the engine and the original kept by the test observe the same calls.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::ffi::OsString;
use std::rc::Rc;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use camino::{Utf8Path, Utf8PathBuf};

use crate::keys::{KeyError, KeyPair, Keysmith};
use crate::provider::{
    ACTIVE_STATE, Device, DeviceRequest, IpAssignment, Project, Provider, ProviderError,
    ProviderFuture, ResourceKind, SshKey,
};
use crate::shell::{
    CommandOutput, CommandRunner, DEFAULT_SSH_USER, RemoteCommand, RemoteCommandOutput,
    RemoteShell, ShellError, SshTarget,
};

/// Address assigned to devices created by [`FakeProvider`].
pub const FAKE_DEVICE_IP: &str = "147.75.1.2";

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Scripted command runner that returns pre-seeded outputs in FIFO order.
///
/// Used to drive deterministic command outcomes without spawning processes.
#[derive(Clone, Debug, Default)]
pub struct ScriptedRunner {
    responses: Rc<RefCell<VecDeque<CommandOutput>>>,
    invocations: Rc<RefCell<Vec<CommandInvocation>>>,
}

/// Records a single invocation made through [`ScriptedRunner`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandInvocation {
    /// Program name as passed to the runner.
    pub program: String,
    /// Arguments passed to the program.
    pub args: Vec<OsString>,
}

impl CommandInvocation {
    /// Returns a shell-like command string for assertions.
    #[must_use]
    pub fn command_string(&self) -> String {
        std::iter::once(self.program.clone())
            .chain(
                self.args
                    .iter()
                    .map(|arg| arg.to_string_lossy().into_owned()),
            )
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl ScriptedRunner {
    /// Creates a new runner with no queued responses.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot of all invocations recorded so far.
    #[must_use]
    pub fn invocations(&self) -> Vec<CommandInvocation> {
        self.invocations.borrow().clone()
    }

    /// Pushes a successful exit status.
    pub fn push_success(&self) {
        self.push_output(Some(0), "", "");
    }

    /// Pushes an explicit command output response.
    pub fn push_output(
        &self,
        code: Option<i32>,
        stdout: impl Into<String>,
        stderr: impl Into<String>,
    ) {
        self.responses.borrow_mut().push_back(CommandOutput {
            code,
            stdout: stdout.into(),
            stderr: stderr.into(),
        });
    }
}

impl CommandRunner for ScriptedRunner {
    fn run(&self, program: &str, args: &[OsString]) -> Result<CommandOutput, ShellError> {
        self.invocations.borrow_mut().push(CommandInvocation {
            program: program.to_owned(),
            args: args.to_vec(),
        });
        self.responses
            .borrow_mut()
            .pop_front()
            .ok_or_else(|| ShellError::Spawn {
                program: program.to_owned(),
                message: String::from("no scripted response available"),
            })
    }
}

/// Provider operations recorded by [`FakeProvider`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ProviderCall {
    /// `get_project(id)`.
    GetProject(String),
    /// `create_project(org_id, name)`.
    CreateProject {
        /// Organisation the project was created in.
        org_id: String,
        /// Requested name.
        name: String,
    },
    /// `validate_capacity(facility, plan, count)`.
    ValidateCapacity {
        /// Facility queried.
        facility: String,
        /// Plan queried.
        plan: String,
        /// Device count queried.
        count: u32,
    },
    /// `create_ssh_key(project_id, label, ..)`.
    CreateSshKey {
        /// Project the key was registered with.
        project_id: String,
        /// Key label.
        label: String,
    },
    /// `create_device(request)`.
    CreateDevice(DeviceRequest),
    /// `get_device(id)`.
    GetDevice(String),
    /// `delete_device(id)`.
    DeleteDevice(String),
    /// `delete_ssh_key(id)`.
    DeleteSshKey(String),
    /// `delete_project(id)`.
    DeleteProject(String),
}

impl ProviderCall {
    /// Returns `true` for deletions.
    #[must_use]
    pub const fn is_delete(&self) -> bool {
        matches!(
            self,
            Self::DeleteDevice(_) | Self::DeleteSshKey(_) | Self::DeleteProject(_)
        )
    }

    /// Returns `true` for creations.
    #[must_use]
    pub const fn is_create(&self) -> bool {
        matches!(
            self,
            Self::CreateProject { .. } | Self::CreateSshKey { .. } | Self::CreateDevice(_)
        )
    }
}

/// Operations [`FakeProvider`] can be told to reject.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FailPoint {
    /// `create_project`.
    CreateProject,
    /// `create_ssh_key`.
    CreateSshKey,
    /// `create_device`.
    CreateDevice,
    /// `delete_device`.
    DeleteDevice,
    /// `delete_ssh_key`.
    DeleteSshKey,
    /// `delete_project`.
    DeleteProject,
}

#[derive(Debug, Default)]
struct ProviderState {
    calls: Vec<ProviderCall>,
    projects: Vec<Project>,
    devices: Vec<Device>,
    device_states: VecDeque<String>,
    capacity: Vec<(String, bool)>,
    failures: Vec<FailPoint>,
    transient_lookups: u32,
    transient_project_lookups: u32,
    lingering: Vec<(String, u32)>,
    next_id: u32,
}

impl ProviderState {
    fn next_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}-{}", self.next_id)
    }

    fn device_mut(&mut self, id: &str) -> Option<&mut Device> {
        self.devices.iter_mut().find(|device| device.id == id)
    }

    fn remove_device(&mut self, id: &str) -> bool {
        let before = self.devices.len();
        self.devices.retain(|device| device.id != id);
        self.devices.len() != before
    }

    fn remove_project(&mut self, id: &str) -> bool {
        let before = self.projects.len();
        self.projects.retain(|project| project.id != id);
        self.projects.len() != before
    }

    fn check(&self, point: FailPoint) -> Result<(), ProviderError> {
        if self.failures.contains(&point) {
            return Err(ProviderError::Api {
                status: 422,
                message: format!("injected {point:?} failure"),
            });
        }
        Ok(())
    }
}

fn device_with_state(id: &str, hostname: &str, state: &str) -> Device {
    let ip_addresses = if state == ACTIVE_STATE {
        vec![IpAssignment {
            address: String::from(FAKE_DEVICE_IP),
            public: true,
            address_family: 4,
        }]
    } else {
        Vec::new()
    };
    Device {
        id: id.to_owned(),
        hostname: hostname.to_owned(),
        state: state.to_owned(),
        ip_addresses,
    }
}

/// In-memory [`Provider`] with a call log and scripted behaviour.
///
/// Created devices are active immediately unless states are scripted with
/// [`FakeProvider::script_device_states`]. Capacity defaults to available.
#[derive(Clone, Debug, Default)]
pub struct FakeProvider {
    state: Arc<Mutex<ProviderState>>,
}

impl FakeProvider {
    /// Creates an empty provider.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a pre-existing project.
    pub fn add_project(&self, id: &str, name: &str) {
        lock(&self.state).projects.push(Project {
            id: id.to_owned(),
            name: name.to_owned(),
        });
    }

    /// Registers a pre-existing active device.
    pub fn add_device(&self, id: &str) {
        lock(&self.state)
            .devices
            .push(device_with_state(id, id, ACTIVE_STATE));
    }

    /// States reported by successive `get_device` calls; the last one
    /// sticks once the script runs out.
    pub fn script_device_states<I, S>(&self, states: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        lock(&self.state)
            .device_states
            .extend(states.into_iter().map(Into::into));
    }

    /// Sets whether `facility` reports capacity.
    pub fn set_capacity(&self, facility: &str, available: bool) {
        let mut state = lock(&self.state);
        state.capacity.retain(|(known, _)| known != facility);
        state.capacity.push((facility.to_owned(), available));
    }

    /// Makes `point` fail with an API error.
    pub fn fail(&self, point: FailPoint) {
        let mut state = lock(&self.state);
        if !state.failures.contains(&point) {
            state.failures.push(point);
        }
    }

    /// Makes the next `count` device lookups fail transiently.
    pub fn fail_lookups_transiently(&self, count: u32) {
        lock(&self.state).transient_lookups = count;
    }

    /// Makes the next `count` project lookups fail transiently.
    pub fn fail_project_lookups_transiently(&self, count: u32) {
        lock(&self.state).transient_project_lookups = count;
    }

    /// Keeps reporting a deleted device for `lookups` more calls.
    pub fn linger_after_delete(&self, device_id: &str, lookups: u32) {
        let mut state = lock(&self.state);
        state.lingering.retain(|(id, _)| id != device_id);
        state.lingering.push((device_id.to_owned(), lookups));
    }

    /// Snapshot of every call made so far.
    #[must_use]
    pub fn calls(&self) -> Vec<ProviderCall> {
        lock(&self.state).calls.clone()
    }

    /// Deletion calls made so far.
    #[must_use]
    pub fn delete_calls(&self) -> Vec<ProviderCall> {
        self.calls()
            .into_iter()
            .filter(ProviderCall::is_delete)
            .collect()
    }

    /// Creation calls made so far.
    #[must_use]
    pub fn create_calls(&self) -> Vec<ProviderCall> {
        self.calls()
            .into_iter()
            .filter(ProviderCall::is_create)
            .collect()
    }

    /// Devices currently known to the provider.
    #[must_use]
    pub fn device_ids(&self) -> Vec<String> {
        lock(&self.state)
            .devices
            .iter()
            .map(|device| device.id.clone())
            .collect()
    }

    fn record(&self, call: ProviderCall) -> MutexGuard<'_, ProviderState> {
        let mut state = lock(&self.state);
        state.calls.push(call);
        state
    }

    fn lookup_device(&self, id: &str) -> Result<Device, ProviderError> {
        let mut state = self.record(ProviderCall::GetDevice(id.to_owned()));
        if state.transient_lookups > 0 {
            state.transient_lookups -= 1;
            return Err(ProviderError::Transient {
                message: String::from("502 Bad Gateway"),
            });
        }
        if let Some((_, remaining)) = state
            .lingering
            .iter_mut()
            .find(|(lingering, left)| lingering == id && *left > 0)
        {
            *remaining -= 1;
            return Ok(device_with_state(id, id, "deprovisioning"));
        }

        let next_state = state.device_states.pop_front();
        let Some(device) = state.device_mut(id) else {
            return Err(ProviderError::NotFound {
                kind: ResourceKind::Device,
                id: id.to_owned(),
            });
        };
        if let Some(reported) = next_state {
            *device = device_with_state(&device.id, &device.hostname, &reported);
        }
        Ok(device.clone())
    }

    fn delete(
        &self,
        call: ProviderCall,
        point: FailPoint,
        remove: impl FnOnce(&mut ProviderState) -> bool,
        kind: ResourceKind,
        id: &str,
    ) -> Result<(), ProviderError> {
        let mut state = self.record(call);
        state.check(point)?;
        if remove(&mut state) {
            Ok(())
        } else {
            Err(ProviderError::NotFound {
                kind,
                id: id.to_owned(),
            })
        }
    }
}

impl Provider for FakeProvider {
    fn get_project<'a>(&'a self, id: &'a str) -> ProviderFuture<'a, Project> {
        let mut state = self.record(ProviderCall::GetProject(id.to_owned()));
        let result = if state.transient_project_lookups > 0 {
            state.transient_project_lookups -= 1;
            Err(ProviderError::Transient {
                message: String::from("502 Bad Gateway"),
            })
        } else {
            state
                .projects
                .iter()
                .find(|project| project.id == id)
                .cloned()
                .ok_or_else(|| ProviderError::NotFound {
                    kind: ResourceKind::Project,
                    id: id.to_owned(),
                })
        };
        drop(state);
        Box::pin(async move { result })
    }

    fn create_project<'a>(
        &'a self,
        org_id: &'a str,
        name: &'a str,
    ) -> ProviderFuture<'a, Project> {
        let mut state = self.record(ProviderCall::CreateProject {
            org_id: org_id.to_owned(),
            name: name.to_owned(),
        });
        let result = state.check(FailPoint::CreateProject).map(|()| {
            let project = Project {
                id: state.next_id("prj"),
                name: name.to_owned(),
            };
            state.projects.push(project.clone());
            project
        });
        drop(state);
        Box::pin(async move { result })
    }

    fn validate_capacity<'a>(
        &'a self,
        facility: &'a str,
        plan: &'a str,
        count: u32,
    ) -> ProviderFuture<'a, bool> {
        let state = self.record(ProviderCall::ValidateCapacity {
            facility: facility.to_owned(),
            plan: plan.to_owned(),
            count,
        });
        let available = state
            .capacity
            .iter()
            .find(|(known, _)| known == facility)
            .is_none_or(|(_, available)| *available);
        drop(state);
        Box::pin(async move { Ok(available) })
    }

    fn create_ssh_key<'a>(
        &'a self,
        project_id: &'a str,
        label: &'a str,
        _public_key: &'a str,
    ) -> ProviderFuture<'a, SshKey> {
        let mut state = self.record(ProviderCall::CreateSshKey {
            project_id: project_id.to_owned(),
            label: label.to_owned(),
        });
        let result = state.check(FailPoint::CreateSshKey).map(|()| SshKey {
            id: state.next_id("key"),
            label: label.to_owned(),
        });
        drop(state);
        Box::pin(async move { result })
    }

    fn create_device<'a>(&'a self, request: &'a DeviceRequest) -> ProviderFuture<'a, Device> {
        let mut state = self.record(ProviderCall::CreateDevice(request.clone()));
        let result = state.check(FailPoint::CreateDevice).map(|()| {
            let id = state.next_id("dev");
            let initial = if state.device_states.is_empty() {
                ACTIVE_STATE
            } else {
                "queued"
            };
            let device = device_with_state(&id, &request.hostname, initial);
            state.devices.push(device.clone());
            device
        });
        drop(state);
        Box::pin(async move { result })
    }

    fn get_device<'a>(&'a self, id: &'a str) -> ProviderFuture<'a, Device> {
        let result = self.lookup_device(id);
        Box::pin(async move { result })
    }

    fn delete_device<'a>(&'a self, id: &'a str) -> ProviderFuture<'a, ()> {
        let result = self.delete(
            ProviderCall::DeleteDevice(id.to_owned()),
            FailPoint::DeleteDevice,
            |state| state.remove_device(id),
            ResourceKind::Device,
            id,
        );
        Box::pin(async move { result })
    }

    fn delete_ssh_key<'a>(&'a self, id: &'a str) -> ProviderFuture<'a, ()> {
        let result = self.delete(
            ProviderCall::DeleteSshKey(id.to_owned()),
            FailPoint::DeleteSshKey,
            |_| true,
            ResourceKind::SshKey,
            id,
        );
        Box::pin(async move { result })
    }

    fn delete_project<'a>(&'a self, id: &'a str) -> ProviderFuture<'a, ()> {
        let result = self.delete(
            ProviderCall::DeleteProject(id.to_owned()),
            FailPoint::DeleteProject,
            |state| state.remove_project(id),
            ResourceKind::Project,
            id,
        );
        Box::pin(async move { result })
    }
}

/// Reply [`FakeShell`] gives to a command.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ShellReply {
    /// The command exited with this status.
    Exit(i32),
    /// The host refused the connection.
    Unreachable,
    /// The command died without an exit status.
    Killed,
}

#[derive(Debug, Default)]
struct ShellState {
    replies: VecDeque<ShellReply>,
    commands: Vec<(SshTarget, RemoteCommand)>,
}

/// [`RemoteShell`] that replays scripted replies in FIFO order and exits
/// `0` once the script runs out.
#[derive(Clone, Debug, Default)]
pub struct FakeShell {
    state: Arc<Mutex<ShellState>>,
}

impl FakeShell {
    /// Creates a shell whose commands all succeed.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues replies for upcoming commands.
    pub fn script<I: IntoIterator<Item = ShellReply>>(&self, replies: I) {
        lock(&self.state).replies.extend(replies);
    }

    /// Rendered commands run so far.
    #[must_use]
    pub fn commands(&self) -> Vec<String> {
        lock(&self.state)
            .commands
            .iter()
            .map(|(_, command)| command.render())
            .collect()
    }

    /// Targets commands were sent to.
    #[must_use]
    pub fn targets(&self) -> Vec<SshTarget> {
        lock(&self.state)
            .commands
            .iter()
            .map(|(target, _)| target.clone())
            .collect()
    }
}

impl RemoteShell for FakeShell {
    fn run(
        &self,
        target: &SshTarget,
        command: &RemoteCommand,
    ) -> Result<RemoteCommandOutput, ShellError> {
        let mut state = lock(&self.state);
        state.commands.push((target.clone(), command.clone()));
        let reply = state.replies.pop_front().unwrap_or(ShellReply::Exit(0));
        match reply {
            ShellReply::Exit(code) => Ok(RemoteCommandOutput {
                exit_code: Some(code),
                stdout: String::new(),
                stderr: if code == 0 {
                    String::new()
                } else {
                    format!("exit {code}")
                },
            }),
            ShellReply::Unreachable => Err(ShellError::Connect {
                host: target.host.to_string(),
                stderr: String::from("Connection refused"),
            }),
            ShellReply::Killed => Ok(RemoteCommandOutput {
                exit_code: None,
                stdout: String::new(),
                stderr: String::new(),
            }),
        }
    }

    fn user(&self) -> &str {
        DEFAULT_SSH_USER
    }
}

#[derive(Debug, Default)]
struct KeysmithState {
    forged: Vec<Utf8PathBuf>,
    discarded: Vec<Utf8PathBuf>,
    fail_forge: bool,
}

/// [`Keysmith`] that records directories without touching the filesystem.
#[derive(Clone, Debug, Default)]
pub struct FakeKeysmith {
    state: Arc<Mutex<KeysmithState>>,
}

impl FakeKeysmith {
    /// Creates a keysmith whose forging succeeds.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every forge attempt fail.
    pub fn fail_forge(&self) {
        lock(&self.state).fail_forge = true;
    }

    /// Directories key pairs were forged in.
    #[must_use]
    pub fn forged(&self) -> Vec<Utf8PathBuf> {
        lock(&self.state).forged.clone()
    }

    /// Directories that were discarded.
    #[must_use]
    pub fn discarded(&self) -> Vec<Utf8PathBuf> {
        lock(&self.state).discarded.clone()
    }
}

impl Keysmith for FakeKeysmith {
    fn forge(&self, dir: &Utf8Path) -> Result<KeyPair, KeyError> {
        let mut state = lock(&self.state);
        if state.fail_forge {
            return Err(KeyError::Generate {
                code: Some(1),
                stderr: String::from("forge disabled"),
            });
        }
        state.forged.push(dir.to_path_buf());
        Ok(KeyPair {
            dir: dir.to_path_buf(),
            public_openssh: String::from("ssh-rsa AAAAfake welder"),
        })
    }

    fn discard(&self, dir: &Utf8Path) -> Result<(), KeyError> {
        lock(&self.state).discarded.push(dir.to_path_buf());
        Ok(())
    }
}
