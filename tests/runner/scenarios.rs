//! BDD scenarios for the test runner.

use rstest_bdd_macros::scenario;

use super::test_helpers::{RunnerContext, runner_context};

#[scenario(
    path = "tests/features/runner.feature",
    name = "Fresh run provisions, tests, and tears down"
)]
fn scenario_fresh_run(runner_context: RunnerContext) {
    let _ = runner_context;
}

#[scenario(
    path = "tests/features/runner.feature",
    name = "Failing suite exit code is propagated"
)]
fn scenario_failing_suite(runner_context: RunnerContext) {
    let _ = runner_context;
}

#[scenario(
    path = "tests/features/runner.feature",
    name = "Existing device is reused and kept"
)]
fn scenario_existing_device(runner_context: RunnerContext) {
    let _ = runner_context;
}

#[scenario(
    path = "tests/features/runner.feature",
    name = "Setup failure still tears down"
)]
fn scenario_setup_failure(runner_context: RunnerContext) {
    let _ = runner_context;
}

#[scenario(
    path = "tests/features/runner.feature",
    name = "Teardown failure is reported after a clean run"
)]
fn scenario_teardown_failure(runner_context: RunnerContext) {
    let _ = runner_context;
}

#[scenario(
    path = "tests/features/runner.feature",
    name = "Skipped teardown keeps resources running"
)]
fn scenario_skipped_teardown(runner_context: RunnerContext) {
    let _ = runner_context;
}

#[scenario(
    path = "tests/features/runner.feature",
    name = "Flaky project lookup still reuses the project"
)]
fn scenario_flaky_project_lookup(runner_context: RunnerContext) {
    let _ = runner_context;
}
