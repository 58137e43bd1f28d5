//! Bootstrap script composition.

use camino::Utf8Path;
use shell_escape::unix::escape;

use super::{ValidationError, read_file};

/// Installs the runtime prerequisites.
pub const BOOTSTRAP_FRAGMENT: &str = "hack/scripts/bootstrap.sh";
/// Prepares the thin-pool backing disk.
pub const DISK_SETUP_FRAGMENT: &str = "hack/scripts/direct_lvm.sh";
/// Checks out the test tree and drops the readiness sentinel.
pub const TEST_USERDATA_FRAGMENT: &str = "test/tools/userdata.sh";

const THINPOOL_DISK: &str = "sdb";

/// Fragment paths in execution order.
pub(super) fn fragments(skip_dmsetup: bool) -> Vec<&'static str> {
    let mut selected = vec![BOOTSTRAP_FRAGMENT];
    if !skip_dmsetup {
        selected.push(DISK_SETUP_FRAGMENT);
    }
    selected.push(TEST_USERDATA_FRAGMENT);
    selected
}

/// Builds the script header: shebang plus the environment markers the
/// fragments read.
pub(super) fn header(skip_dmsetup: bool, branch: Option<&str>) -> String {
    let mut header = String::from("#!/bin/bash\n");
    if !skip_dmsetup {
        header.push_str(&format!("export THINPOOL_DISK_NAME={THINPOOL_DISK}\n"));
    }
    if let Some(name) = branch.filter(|name| !name.trim().is_empty()) {
        header.push_str(&format!("export FLINTLOCK_BRANCH={}\n", escape(name.into())));
    }
    header
}

/// Reads the selected fragments under `root` and concatenates them after
/// the header, each followed by a newline.
pub(super) fn compose(
    root: &Utf8Path,
    skip_dmsetup: bool,
    branch: Option<&str>,
) -> Result<String, ValidationError> {
    let mut script = header(skip_dmsetup, branch);
    for fragment in fragments(skip_dmsetup) {
        let path = root.join(fragment);
        let body = read_file(&path).map_err(|message| ValidationError::Fragment {
            path: path.clone(),
            message,
        })?;
        script.push_str(&body);
        script.push('\n');
    }
    Ok(script)
}
