//! Unit tests for configuration assembly and validation.

use camino::{Utf8Path, Utf8PathBuf};
use rstest::{fixture, rstest};
use tempfile::TempDir;

use super::validate::{MAX_WAIT_SECS, generated_name};
use super::*;

/// Scratch directory holding bootstrap fragments.
struct Scripts {
    _tmp: TempDir,
    root: Utf8PathBuf,
}

#[fixture]
fn scripts() -> Scripts {
    let tmp = TempDir::new().expect("temp dir");
    let root = Utf8PathBuf::from_path_buf(tmp.path().to_path_buf()).expect("utf8 path");
    for (fragment, body) in [
        (BOOTSTRAP_FRAGMENT, "echo bootstrap"),
        (DISK_SETUP_FRAGMENT, "echo lvm"),
        (TEST_USERDATA_FRAGMENT, "touch /flintlock_ready"),
    ] {
        let path = root.join(fragment);
        std::fs::create_dir_all(path.parent().expect("fragment parent")).expect("mkdir");
        std::fs::write(&path, body).expect("write fragment");
    }
    Scripts { _tmp: tmp, root }
}

fn runnable(scripts: &Scripts) -> ResourceConfig {
    let mut config = ResourceConfig {
        org_id: Some(String::from("acme")),
        ..ResourceConfig::default()
    };
    config.device.script_root = scripts.root.clone();
    config
}

fn merge(config: &mut ResourceConfig, yaml: &str) -> Result<(), ConfigError> {
    config.merge_document(Utf8Path::new("welder.yaml"), yaml)
}

fn invalid_field(err: &ValidationError) -> &str {
    match err {
        ValidationError::Invalid { field, .. } => field,
        ValidationError::Fragment { .. } => "<fragment>",
    }
}

#[rstest]
fn defaults_describe_a_small_device() {
    let config = ResourceConfig::default();
    assert_eq!(config.device.name.as_deref(), Some(DEFAULT_DEVICE_NAME));
    assert_eq!(config.device.plan, DEFAULT_PLAN);
    assert_eq!(config.device.facilities, vec![String::from(DEFAULT_FACILITY)]);
    assert!(config.ssh.create_new);
    assert_eq!(config.test.log_levels.flintlockd, "2");
    assert_eq!(config.test.log_levels.containerd, "debug");
    assert_eq!(config.device.placement, Placement::Fallback);
}

#[rstest]
fn merge_overwrites_scalars_and_keeps_siblings() {
    let mut config = ResourceConfig::default();
    merge(
        &mut config,
        "org_id: acme\ndevice:\n  plan: m3.large.x86\n  facilities: [ewr1, dc13]\n",
    )
    .expect("document should merge");

    assert_eq!(config.org_id.as_deref(), Some("acme"));
    assert_eq!(config.device.plan, "m3.large.x86");
    assert_eq!(config.device.facilities, vec!["ewr1", "dc13"]);
    assert_eq!(config.device.operating_system, DEFAULT_OPERATING_SYSTEM);
    assert_eq!(config.device.name.as_deref(), Some(DEFAULT_DEVICE_NAME));
}

#[rstest]
fn merge_recurses_into_nested_sections() {
    let mut config = ResourceConfig::default();
    merge(&mut config, "test:\n  log_levels:\n    containerd: info\n").expect("merge");

    assert_eq!(config.test.log_levels.containerd, "info");
    assert_eq!(config.test.log_levels.flintlockd, "2");
}

#[rstest]
fn empty_document_changes_nothing() {
    let mut config = ResourceConfig::default();
    merge(&mut config, "").expect("empty document is valid");
    assert_eq!(config, ResourceConfig::default());
}

#[rstest]
fn schema_reports_every_violation_with_its_path() {
    let mut config = ResourceConfig::default();
    let err = merge(
        &mut config,
        "colour: red\ndevice:\n  plan: 7\n  facilities: [ewr1, 3]\n  placement: nearest\nssh:\n  create_new: maybe\n",
    )
    .expect_err("document should be rejected");

    let ConfigError::Schema { violations, .. } = &err else {
        panic!("expected schema error, got {err:?}");
    };
    let paths: Vec<&str> = violations.iter().map(|v| v.path.as_str()).collect();
    assert_eq!(
        paths,
        vec![
            "colour",
            "device.facilities[1]",
            "device.placement",
            "device.plan",
            "ssh.create_new",
        ]
    );
    assert_eq!(config, ResourceConfig::default(), "rejected file must not merge");
}

#[rstest]
fn schema_rejects_null_in_required_field() {
    let mut config = ResourceConfig::default();
    let err = merge(&mut config, "device:\n  plan: null\n").expect_err("null plan");
    assert!(err.to_string().contains("device.plan: expected a string"));
}

#[rstest]
fn schema_rejects_non_mapping_root() {
    let mut config = ResourceConfig::default();
    let err = merge(&mut config, "- one\n- two\n").expect_err("list root");
    assert!(err.to_string().contains("<root>: expected a mapping"));
}

#[rstest]
fn load_reads_file_from_disk() {
    let tmp = TempDir::new().expect("temp dir");
    let path = Utf8PathBuf::from_path_buf(tmp.path().join("welder.yaml")).expect("utf8");
    std::fs::write(&path, "project:\n  name: p1\n").expect("write config");

    let mut config = ResourceConfig::default();
    config.load(&path).expect("load should succeed");
    assert_eq!(config.project.name.as_deref(), Some("p1"));
}

#[rstest]
fn load_reports_missing_file() {
    let mut config = ResourceConfig::default();
    let err = config
        .load(Utf8Path::new("/nonexistent/welder.yaml"))
        .expect_err("missing file");
    assert!(matches!(err, ConfigError::Io { .. }));
}

#[rstest]
fn overrides_replace_only_present_values() {
    let mut config = ResourceConfig::default();
    merge(&mut config, "org_id: from-file\nproject:\n  name: file-project\n").expect("merge");

    config.apply_overrides(Overrides {
        project_name: Some(String::from("flag-project")),
        skip_teardown: Some(true),
        ..Overrides::default()
    });

    assert_eq!(config.org_id.as_deref(), Some("from-file"));
    assert_eq!(config.project.name.as_deref(), Some("flag-project"));
    assert!(config.test.skip_teardown);
}

#[rstest]
fn run_requires_org_id() {
    let err = ResourceConfig::default()
        .validate_for_run()
        .expect_err("org id missing");
    assert_eq!(invalid_field(&err), "org_id");
}

#[rstest]
fn run_rejects_empty_facilities(scripts: Scripts) {
    let mut config = runnable(&scripts);
    config.device.facilities.clear();
    let err = config.validate_for_run().expect_err("no facilities");
    assert_eq!(invalid_field(&err), "device.facilities");
}

#[rstest]
#[case("active_timeout_secs", "device.active_timeout_secs")]
#[case("bootstrap_timeout_secs", "device.bootstrap_timeout_secs")]
#[case("poll_interval_secs", "device.poll_interval_secs")]
fn oversized_waits_are_rejected(scripts: Scripts, #[case] key: &str, #[case] field: &str) {
    let mut config = runnable(&scripts);
    merge(&mut config, &format!("device:\n  {key}: 18446744073709551615\n"))
        .expect("schema accepts any unsigned value");

    let err = config.validate_for_run().expect_err("wait is capped");

    assert_eq!(invalid_field(&err), field);
}

#[rstest]
fn longest_allowed_wait_is_accepted(scripts: Scripts) {
    let mut config = runnable(&scripts);
    config.device.active_timeout_secs = MAX_WAIT_SECS;
    config.device.bootstrap_timeout_secs = MAX_WAIT_SECS;

    assert!(config.validate_for_run().is_ok());
}

#[rstest]
#[case(Some(true))]
#[case(Some(false))]
#[case(None)]
fn existing_device_forces_reuse_and_skips_teardown(
    scripts: Scripts,
    #[case] skip_teardown: Option<bool>,
) {
    let key_root = scripts.root.join("reused");
    std::fs::create_dir_all(key_root.join("keys")).expect("mkdir");
    std::fs::write(key_root.join("keys/private.key"), "PRIVATE").expect("write key");

    let mut config = runnable(&scripts);
    config.ssh.name = Some(String::from("existing"));
    config.ssh.path = Some(key_root);
    config.apply_overrides(Overrides {
        device_id: Some(String::from("dev-123")),
        device_name: Some(String::from("ignored")),
        skip_teardown,
        ..Overrides::default()
    });

    let validated = config.validate_for_run().expect("valid");
    assert!(!validated.config().ssh.create_new);
    assert_eq!(validated.config().device.name, None);
    assert!(validated.skip_teardown());
    assert_eq!(validated.existing_device_id(), Some("dev-123"));
    assert_eq!(validated.config().device.userdata, None);
}

#[rstest]
fn skip_delete_implies_skip_teardown(scripts: Scripts) {
    let mut config = runnable(&scripts);
    config.test.skip_delete = true;
    let validated = config.validate_for_run().expect("valid");
    assert!(validated.skip_teardown());
}

#[rstest]
fn key_reuse_requires_private_key_on_disk(scripts: Scripts) {
    let mut config = runnable(&scripts);
    config.ssh.create_new = false;
    config.ssh.name = Some(String::from("existing"));
    config.ssh.path = Some(scripts.root.join("missing"));

    let err = config.validate_for_run().expect_err("key is missing");
    assert_eq!(invalid_field(&err), "ssh.path");
    assert!(err.to_string().contains("private.key"));
}

#[rstest]
#[case(None, Some("/srv"), "ssh.name")]
#[case(Some("existing"), None, "ssh.path")]
fn key_reuse_requires_name_and_path(
    scripts: Scripts,
    #[case] name: Option<&str>,
    #[case] path: Option<&str>,
    #[case] field: &str,
) {
    let mut config = runnable(&scripts);
    config.ssh.create_new = false;
    config.ssh.name = name.map(str::to_owned);
    config.ssh.path = path.map(Utf8PathBuf::from);

    let err = config.validate_for_run().expect_err("key reuse should fail");
    assert_eq!(invalid_field(&err), field);
}

#[rstest]
fn run_resolves_generated_names_and_userdata(scripts: Scripts) {
    let validated = runnable(&scripts).validate_for_run().expect("valid");

    assert!(validated.project_name().starts_with("flintlock-prj-"));
    assert!(validated.key_name().starts_with("flintlock-key-"));
    assert_eq!(
        validated.key_dir(),
        Utf8PathBuf::from(format!("/tmp/{}/keys", validated.key_name()))
    );
    assert_eq!(
        validated.userdata(),
        "#!/bin/bash\nexport THINPOOL_DISK_NAME=sdb\necho bootstrap\necho lvm\ntouch /flintlock_ready\n"
    );
}

#[rstest]
fn userdata_omits_disk_setup_and_exports_branch(scripts: Scripts) {
    let mut config = runnable(&scripts);
    config.device.skip_dmsetup = true;
    config.device.branch = Some(String::from("feature/x"));

    let validated = config.validate_for_run().expect("valid");
    assert_eq!(
        validated.userdata(),
        "#!/bin/bash\nexport FLINTLOCK_BRANCH=feature/x\necho bootstrap\ntouch /flintlock_ready\n"
    );
}

#[rstest]
fn explicit_userdata_is_kept(scripts: Scripts) {
    let mut config = runnable(&scripts);
    config.device.userdata = Some(String::from("#!/bin/sh\n"));
    let validated = config.validate_for_run().expect("valid");
    assert_eq!(validated.userdata(), "#!/bin/sh\n");
}

#[rstest]
fn missing_fragment_is_reported() {
    let mut config = ResourceConfig {
        org_id: Some(String::from("acme")),
        ..ResourceConfig::default()
    };
    config.device.script_root = Utf8PathBuf::from("/nonexistent-scripts");
    let err = config.validate_for_run().expect_err("fragments missing");
    assert!(matches!(err, ValidationError::Fragment { .. }));
}

#[rstest]
fn create_requires_project_id(scripts: Scripts) {
    let err = runnable(&scripts)
        .validate_for_create()
        .expect_err("project id missing");
    assert_eq!(invalid_field(&err), "project.id");
}

#[rstest]
fn create_rejects_existing_device(scripts: Scripts) {
    let mut config = runnable(&scripts);
    config.project.id = Some(String::from("prj-1"));
    config.device.id = Some(String::from("dev-1"));
    let err = config.validate_for_create().expect_err("device id set");
    assert_eq!(invalid_field(&err), "device.id");
}

#[rstest]
fn create_accepts_existing_project(scripts: Scripts) {
    let mut config = runnable(&scripts);
    config.project.id = Some(String::from("prj-1"));
    let validated = config.validate_for_create().expect("valid");
    assert_eq!(validated.existing_project_id(), Some("prj-1"));
    assert!(!validated.skip_teardown());
}

#[rstest]
fn generated_names_are_distinct() {
    let first = generated_name("flintlock-key-");
    let second = generated_name("flintlock-key-");
    assert_ne!(first, second);
    assert_eq!(first.len(), "flintlock-key-".len() + 10);
}
