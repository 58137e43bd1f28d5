//! BDD step definitions for the `welder run-e2e` workflow.

use rstest_bdd_macros::{given, then, when};
use tokio::runtime::Runtime;
use welder::test_support::{FailPoint, ProviderCall, ShellReply};

use super::test_helpers::{RunOutcome, RunnerContext, RunnerTestError};

#[derive(Debug, thiserror::Error)]
pub enum StepError {
    #[error(transparent)]
    Setup(#[from] RunnerTestError),
    #[error("assertion failed: {0}")]
    Assertion(String),
}

#[given("a runnable configuration")]
fn runnable_configuration(mut runner_context: RunnerContext) -> RunnerContext {
    runner_context.config.org_id = Some(String::from("acme"));
    runner_context.config.project.name = Some(String::from("p1"));
    runner_context.config.device.facilities = vec![String::from("ewr1")];
    runner_context.config.device.userdata = Some(String::from("#!/bin/bash\n"));
    runner_context
}

#[given("the device reports \"{state}\" before becoming active")]
fn device_state_before_active(runner_context: RunnerContext, state: String) -> RunnerContext {
    runner_context
        .provider
        .script_device_states([state, String::from("active")]);
    runner_context
}

#[given("the test suite exits with code \"{code}\"")]
fn suite_exit_code(runner_context: RunnerContext, code: i32) -> RunnerContext {
    runner_context
        .shell
        .script([ShellReply::Exit(0), ShellReply::Exit(code)]);
    runner_context
}

#[given("an existing device \"{device_id}\"")]
fn existing_device(mut runner_context: RunnerContext, device_id: String) -> RunnerContext {
    runner_context.provider.add_device(&device_id);
    runner_context.config.device.id = Some(device_id);
    runner_context.config.ssh.name = Some(String::from("ci-key"));
    runner_context.config.ssh.path = Some(runner_context.key_base.clone());
    runner_context
}

#[given("project \"{project_id}\" exists but its first \"{count}\" lookups fail")]
fn flaky_project(
    mut runner_context: RunnerContext,
    project_id: String,
    count: u32,
) -> RunnerContext {
    runner_context.provider.add_project(&project_id, "shared");
    runner_context.provider.fail_project_lookups_transiently(count);
    runner_context.config.project.id = Some(project_id);
    runner_context
}

#[given("device creation fails")]
fn device_creation_fails(runner_context: RunnerContext) -> RunnerContext {
    runner_context.provider.fail(FailPoint::CreateDevice);
    runner_context
}

#[given("project deletion fails")]
fn project_deletion_fails(runner_context: RunnerContext) -> RunnerContext {
    runner_context.provider.fail(FailPoint::DeleteProject);
    runner_context
}

#[given("teardown is skipped")]
fn teardown_skipped(mut runner_context: RunnerContext) -> RunnerContext {
    runner_context.config.test.skip_teardown = true;
    runner_context
}

#[when("I execute the test runner")]
fn execute_runner(runner_context: RunnerContext) -> Result<RunnerContext, StepError> {
    let runtime = Runtime::new().map_err(|err| StepError::Assertion(err.to_string()))?;
    let mut runner = runner_context.runner()?;

    let result = runtime.block_on(async move { runner.execute().await });
    let outcome = match result {
        Ok(report) => RunOutcome::Report(report),
        Err(err) => RunOutcome::Failure(err.to_string()),
    };

    Ok(RunnerContext {
        outcome: Some(outcome),
        ..runner_context
    })
}

#[then("the run exit code is \"{code}\"")]
fn run_exit_code(runner_context: &RunnerContext, code: i32) -> Result<(), StepError> {
    match &runner_context.outcome {
        Some(RunOutcome::Report(report)) if report.exit_code == code => Ok(()),
        Some(RunOutcome::Report(report)) => Err(StepError::Assertion(format!(
            "expected exit code {code}, got {}",
            report.exit_code
        ))),
        Some(RunOutcome::Failure(err)) => Err(StepError::Assertion(format!(
            "run failed unexpectedly: {err}"
        ))),
        None => Err(StepError::Assertion(String::from("missing outcome"))),
    }
}

#[then("the run fails mentioning \"{expected}\"")]
fn run_fails_mentioning(runner_context: &RunnerContext, expected: String) -> Result<(), StepError> {
    match &runner_context.outcome {
        Some(RunOutcome::Failure(message)) if message.contains(expected.as_str()) => Ok(()),
        other => Err(StepError::Assertion(format!(
            "expected a failure mentioning '{expected}', got {other:?}"
        ))),
    }
}

#[then("the provider deleted \"{count}\" resources")]
fn provider_deleted(runner_context: &RunnerContext, count: usize) -> Result<(), StepError> {
    let deletes = runner_context.provider.delete_calls();
    if deletes.len() == count {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected {count} deletions, got {deletes:?}"
        )))
    }
}

#[then("the provider saw exactly one device lookup")]
fn single_device_lookup(runner_context: &RunnerContext) -> Result<(), StepError> {
    let calls = runner_context.provider.calls();
    match calls.as_slice() {
        [ProviderCall::GetDevice(_)] => Ok(()),
        other => Err(StepError::Assertion(format!(
            "expected a single device lookup, got {other:?}"
        ))),
    }
}

#[then("the device was reached over ssh \"{count}\" times")]
fn ssh_sessions(runner_context: &RunnerContext, count: usize) -> Result<(), StepError> {
    let commands = runner_context.shell.commands();
    if commands.len() == count {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected {count} ssh sessions, got {commands:?}"
        )))
    }
}
