//! Runs the flintlock end-to-end suite on a provisioned or existing device.
//!
//! The runner acquires a device through the engine, executes the fixed test
//! script over SSH, and tears down whatever the engine owns exactly once,
//! whether setup, the test run, or neither failed. Remote exit codes are
//! returned to the caller rather than treated as errors.

use std::fmt::Display;

use thiserror::Error;
use tracing::{info, warn};

use crate::keys::Keysmith;
use crate::provider::Provider;
use crate::resource_config::ResourceConfig;
use crate::shell::{RemoteCommand, RemoteShell};
use crate::welder::{DeviceDetails, TeardownError, Welder, WelderError};

/// Checkout the test script runs from.
pub const TEST_WORKDIR: &str = "/root/work/flintlock";
/// Suite entry point relative to [`TEST_WORKDIR`].
pub const TEST_SCRIPT: &str = "./test/e2e/test.sh";
/// Thin pool prepared by the bootstrap script.
pub const THINPOOL_NAME: &str = "flintlock-thinpool";

/// Builds the suite invocation for `config`.
#[must_use]
pub fn test_command(config: &ResourceConfig) -> RemoteCommand {
    let levels = &config.test.log_levels;
    let mut argv = vec![
        String::from(TEST_SCRIPT),
        String::from("-level.flintlockd"),
        levels.flintlockd.clone(),
        String::from("-level.containerd"),
        levels.containerd.clone(),
        String::from("-skip.setup.thinpool"),
        String::from("-thinpool"),
        String::from(THINPOOL_NAME),
    ];
    if config.test.skip_delete {
        argv.extend([String::from("-skip.teardown"), String::from("-skip.delete")]);
    }
    RemoteCommand::new(argv).in_dir(TEST_WORKDIR)
}

/// Errors surfaced by a test run.
#[derive(Debug, Error)]
pub enum RunError {
    /// The device could not be acquired.
    #[error("setup failed: {message}")]
    Setup {
        /// Failure description, including any teardown failure.
        message: String,
        /// Engine error that stopped setup.
        #[source]
        source: WelderError,
    },
    /// The suite could not be executed.
    #[error("test run failed: {message}")]
    Tests {
        /// Failure description, including any teardown failure.
        message: String,
        /// Engine error raised while running the suite.
        #[source]
        source: WelderError,
    },
    /// Teardown failed after the suite ran.
    #[error(transparent)]
    Teardown(#[from] TeardownError),
}

/// Outcome of a completed test run.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RunReport {
    /// Exit status of the remote suite.
    pub exit_code: i32,
    /// Device the suite ran on.
    pub details: DeviceDetails,
    /// Whether owned resources were removed afterwards.
    pub torn_down: bool,
}

/// Sequences setup, the test suite, and teardown.
#[derive(Debug)]
pub struct TestRunner<P, S, K> {
    welder: Welder<P, S, K>,
}

impl<P, S, K> TestRunner<P, S, K>
where
    P: Provider,
    S: RemoteShell,
    K: Keysmith,
{
    /// Wraps an engine built from a run-validated configuration.
    #[must_use]
    pub const fn new(welder: Welder<P, S, K>) -> Self {
        Self { welder }
    }

    /// Returns the underlying engine.
    #[must_use]
    pub const fn welder(&self) -> &Welder<P, S, K> {
        &self.welder
    }

    /// Fetches the configured device, or provisions a fresh one.
    ///
    /// # Errors
    ///
    /// Returns the engine error that stopped setup. Teardown is left to the
    /// caller.
    pub async fn setup(&mut self) -> Result<DeviceDetails, WelderError> {
        match self.welder.config().existing_device_id().map(str::to_owned) {
            Some(device_id) => self.welder.fetch(&device_id).await,
            None => self.welder.create_all().await,
        }
    }

    /// Runs the suite and returns its exit status.
    ///
    /// # Errors
    ///
    /// Returns [`WelderError`] when the session cannot be opened or the
    /// suite dies without an exit status.
    pub fn run_tests(&self) -> Result<i32, WelderError> {
        let command = test_command(self.welder.config().config());
        let output = self.welder.run_remote(&command, true)?;
        output
            .exit_code
            .ok_or_else(|| WelderError::MissingExitStatus {
                command: command.render(),
            })
    }

    /// Id of the device setup acquired, even when it never got an address.
    #[must_use]
    pub fn device_id(&self) -> Option<&str> {
        self.welder.device_id()
    }

    /// Device id and address once setup has resolved a device.
    #[must_use]
    pub fn device_details(&self) -> Option<DeviceDetails> {
        self.welder.device_details()
    }

    /// Runs setup and the suite, then tears down unless teardown is
    /// skipped.
    ///
    /// Teardown runs once on every path. A teardown failure is appended to
    /// an earlier error, or reported on its own after a completed suite.
    ///
    /// # Errors
    ///
    /// Returns [`RunError`] when setup, the suite, or teardown fail. A
    /// non-zero suite exit is not an error.
    pub async fn execute(&mut self) -> Result<RunReport, RunError> {
        let outcome = self.setup_and_test().await;
        let skip_teardown = self.welder.config().skip_teardown();

        let teardown_error = if skip_teardown {
            info!("skipping teardown; resources are left running");
            None
        } else {
            self.welder.teardown().await.err()
        };

        match outcome {
            Ok((details, exit_code)) => {
                if let Some(err) = teardown_error {
                    return Err(RunError::Teardown(err));
                }
                info!(exit_code, device_id = %details.device_id, "test run complete");
                Ok(RunReport {
                    exit_code,
                    details,
                    torn_down: !skip_teardown,
                })
            }
            Err(Phase::Setup(source)) => Err(RunError::Setup {
                message: append_teardown_note(source.to_string(), teardown_error.as_ref()),
                source,
            }),
            Err(Phase::Tests(source)) => Err(RunError::Tests {
                message: append_teardown_note(source.to_string(), teardown_error.as_ref()),
                source,
            }),
        }
    }

    async fn setup_and_test(&mut self) -> Result<(DeviceDetails, i32), Phase> {
        let details = self.setup().await.map_err(Phase::Setup)?;
        let exit_code = self.run_tests().map_err(Phase::Tests)?;
        if exit_code != 0 {
            warn!(exit_code, "test suite reported failures");
        }
        Ok((details, exit_code))
    }
}

/// Provisions a standalone device in an existing project and leaves it
/// running. Anything acquired before a failure is torn down.
///
/// # Errors
///
/// Returns [`RunError::Setup`] when provisioning fails.
pub async fn create_standalone<P, S, K>(
    welder: &mut Welder<P, S, K>,
) -> Result<DeviceDetails, RunError>
where
    P: Provider,
    S: RemoteShell,
    K: Keysmith,
{
    match welder.create_all().await {
        Ok(details) => Ok(details),
        Err(source) => {
            let teardown_error = welder.teardown().await.err();
            Err(RunError::Setup {
                message: append_teardown_note(source.to_string(), teardown_error.as_ref()),
                source,
            })
        }
    }
}

enum Phase {
    Setup(WelderError),
    Tests(WelderError),
}

fn append_teardown_note<E: Display>(message: String, teardown_error: Option<&E>) -> String {
    if let Some(teardown) = teardown_error {
        format!("{message} (teardown also failed: {teardown})")
    } else {
        message
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use rstest::{fixture, rstest};

    use super::*;
    use crate::test_support::{FailPoint, FakeKeysmith, FakeProvider, FakeShell, ShellReply};

    type TestRunnerFor = TestRunner<FakeProvider, FakeShell, FakeKeysmith>;

    #[derive(Clone, Default)]
    struct Doubles {
        provider: FakeProvider,
        shell: FakeShell,
        keysmith: FakeKeysmith,
    }

    impl Doubles {
        fn runner(&self, config: ResourceConfig) -> TestRunnerFor {
            let validated = config.validate_for_run().expect("config should validate");
            let welder = Welder::new(
                validated,
                self.provider.clone(),
                self.shell.clone(),
                self.keysmith.clone(),
            )
            .with_poll_interval(Duration::from_millis(1));
            TestRunner::new(welder)
        }
    }

    #[fixture]
    fn doubles() -> Doubles {
        Doubles::default()
    }

    #[fixture]
    fn config() -> ResourceConfig {
        let mut config = ResourceConfig {
            org_id: Some(String::from("acme")),
            ..ResourceConfig::default()
        };
        config.device.userdata = Some(String::from("#!/bin/bash\n"));
        config
    }

    #[rstest]
    fn test_command_uses_configured_log_levels(mut config: ResourceConfig) {
        config.test.log_levels.flintlockd = String::from("9");

        assert_eq!(
            test_command(&config).render(),
            "cd /root/work/flintlock && ./test/e2e/test.sh -level.flintlockd 9 \
             -level.containerd debug -skip.setup.thinpool -thinpool flintlock-thinpool"
        );
    }

    #[rstest]
    fn skip_delete_is_forwarded_to_the_suite(mut config: ResourceConfig) {
        config.test.skip_delete = true;

        let argv = test_command(&config).argv;

        assert_eq!(
            argv.iter().rev().take(2).map(String::as_str).collect::<Vec<_>>(),
            vec!["-skip.delete", "-skip.teardown"]
        );
    }

    #[rstest]
    #[tokio::test]
    async fn execute_returns_the_suite_exit_code(doubles: Doubles, config: ResourceConfig) {
        doubles.shell.script([ShellReply::Exit(0), ShellReply::Exit(4)]);
        let mut runner = doubles.runner(config);

        let report = runner.execute().await.expect("run completes");

        assert_eq!(report.exit_code, 4);
        assert!(report.torn_down);
        assert_eq!(doubles.provider.delete_calls().len(), 3);
        assert_eq!(runner.device_details(), None);
    }

    #[rstest]
    #[tokio::test]
    async fn execute_skips_teardown_when_configured(doubles: Doubles, mut config: ResourceConfig) {
        config.test.skip_teardown = true;
        let mut runner = doubles.runner(config);

        let report = runner.execute().await.expect("run completes");

        assert!(!report.torn_down);
        assert!(doubles.provider.delete_calls().is_empty());
        assert_eq!(runner.device_details(), Some(report.details));
    }

    #[rstest]
    #[tokio::test]
    async fn skipped_teardown_keeps_the_id_of_an_unready_device(
        doubles: Doubles,
        mut config: ResourceConfig,
    ) {
        config.test.skip_teardown = true;
        doubles.provider.script_device_states(["failed"]);
        let mut runner = doubles.runner(config);

        runner.execute().await.expect_err("device fails to activate");

        assert!(doubles.provider.delete_calls().is_empty());
        assert_eq!(runner.device_details(), None);
        assert_eq!(runner.device_id(), Some("dev-3"));
    }

    #[rstest]
    #[tokio::test]
    async fn setup_failure_still_tears_down(doubles: Doubles, config: ResourceConfig) {
        doubles.provider.fail(FailPoint::CreateDevice);
        let mut runner = doubles.runner(config);

        let err = runner.execute().await.expect_err("device creation fails");

        assert!(matches!(err, RunError::Setup { .. }));
        assert_eq!(doubles.provider.delete_calls().len(), 2);
        assert!(doubles.shell.commands().is_empty());
    }

    #[rstest]
    #[tokio::test]
    async fn teardown_failure_is_appended_to_the_setup_error(
        doubles: Doubles,
        config: ResourceConfig,
    ) {
        doubles.provider.fail(FailPoint::CreateDevice);
        doubles.provider.fail(FailPoint::DeleteProject);
        let mut runner = doubles.runner(config);

        let err = runner.execute().await.expect_err("device creation fails");

        let message = err.to_string();
        assert!(message.starts_with("setup failed: device creation failed"));
        assert!(message.contains("(teardown also failed: teardown left resources behind: project prj-1"));
    }

    #[rstest]
    #[tokio::test]
    async fn teardown_failure_after_a_clean_run_is_reported(
        doubles: Doubles,
        config: ResourceConfig,
    ) {
        let mut runner = doubles.runner(config);
        doubles.provider.fail(FailPoint::DeleteSshKey);

        let err = runner.execute().await.expect_err("key deletion fails");

        assert!(matches!(err, RunError::Teardown(ref teardown) if teardown.failures.len() == 1));
    }

    #[rstest]
    #[tokio::test]
    async fn unreachable_suite_is_a_test_error(doubles: Doubles, config: ResourceConfig) {
        doubles
            .shell
            .script([ShellReply::Exit(0), ShellReply::Unreachable]);
        let mut runner = doubles.runner(config);

        let err = runner.execute().await.expect_err("session fails");

        assert!(matches!(err, RunError::Tests { .. }));
        assert_eq!(doubles.provider.delete_calls().len(), 3);
    }

    #[rstest]
    #[tokio::test]
    async fn create_standalone_cleans_up_after_failure(doubles: Doubles, mut config: ResourceConfig) {
        doubles.provider.add_project("prj-shared", "shared");
        config.project.id = Some(String::from("prj-shared"));
        doubles.provider.fail(FailPoint::CreateDevice);
        let validated = config.validate_for_create().expect("config should validate");
        let mut welder = Welder::new(
            validated,
            doubles.provider.clone(),
            doubles.shell.clone(),
            doubles.keysmith.clone(),
        );

        let err = create_standalone(&mut welder)
            .await
            .expect_err("device creation fails");

        assert!(matches!(err, RunError::Setup { .. }));
        assert_eq!(doubles.provider.delete_calls().len(), 1);
        assert_eq!(doubles.keysmith.discarded().len(), 1);
    }
}
