//! Smoke tests for the `welder` binary's argument handling and early
//! failures. None of these reach the provider.

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use rstest::{fixture, rstest};
use tempfile::TempDir;

#[fixture]
fn workdir() -> TempDir {
    TempDir::new().expect("temp dir")
}

fn welder_in(dir: &TempDir) -> assert_cmd::Command {
    let mut cmd = cargo_bin_cmd!("welder");
    cmd.current_dir(dir.path())
        .env_remove("METAL_AUTH_TOKEN")
        .env_remove("WELDER_LOG");
    cmd
}

#[rstest]
fn help_is_printed_without_arguments(workdir: TempDir) {
    welder_in(&workdir)
        .assert()
        .failure()
        .stderr(predicate::str::contains("run-e2e"))
        .stderr(predicate::str::contains("delete-device"));
}

#[rstest]
fn run_requires_an_organisation(workdir: TempDir) {
    welder_in(&workdir)
        .arg("run-e2e")
        .assert()
        .code(1)
        .stdout("")
        .stderr(predicate::str::contains("org_id: must be set"));
}

#[rstest]
fn schema_violations_are_reported_per_field(workdir: TempDir) {
    let config = workdir.path().join("welder.yaml");
    std::fs::write(&config, "org_id: acme\ncolour: blue\ndevice:\n  plan: 7\n")
        .expect("write config");

    welder_in(&workdir)
        .args(["run-e2e", "--config"])
        .arg(&config)
        .assert()
        .code(1)
        .stderr(predicate::str::contains("colour: unknown key"))
        .stderr(predicate::str::contains("device.plan: expected a string"));
}

#[rstest]
fn create_device_requires_a_project(workdir: TempDir) {
    welder_in(&workdir)
        .args(["create-device", "--org-id", "acme"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("project.id"));
}

#[rstest]
fn delete_device_requires_credentials(workdir: TempDir) {
    welder_in(&workdir)
        .args(["delete-device", "--device-id", "dev-123"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("METAL_AUTH_TOKEN"));
}
