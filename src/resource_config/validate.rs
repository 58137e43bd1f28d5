//! Validation, derived fields, and generated defaults.

use uuid::Uuid;

use super::{ResourceConfig, ValidatedConfig, ValidationError, is_set, userdata};
use crate::keys;

const PROJECT_NAME_PREFIX: &str = "flintlock-prj-";
const KEY_NAME_PREFIX: &str = "flintlock-key-";
const RANDOM_SUFFIX_LEN: usize = 10;
/// Longest accepted poll interval or readiness deadline: one day.
pub(super) const MAX_WAIT_SECS: u64 = 86_400;

/// Returns `prefix` followed by a short random suffix.
pub(super) fn generated_name(prefix: &str) -> String {
    let suffix: String = Uuid::new_v4()
        .simple()
        .to_string()
        .chars()
        .take(RANDOM_SUFFIX_LEN)
        .collect();
    format!("{prefix}{suffix}")
}

impl ResourceConfig {
    /// Validates the configuration for a full test run.
    ///
    /// Reusing an existing device forces key reuse, drops the device name,
    /// and skips teardown. `test.skip_delete` also skips teardown.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError`] naming the first offending field, or
    /// when a bootstrap fragment cannot be read.
    pub fn validate_for_run(mut self) -> Result<ValidatedConfig, ValidationError> {
        self.require_org_id()?;

        if self.device.id.is_some() {
            self.ssh.create_new = false;
            self.device.name = None;
            self.test.skip_teardown = true;
        }
        if self.test.skip_delete {
            self.test.skip_teardown = true;
        }

        self.validate_common()?;
        self.resolve_defaults()
    }

    /// Validates the configuration for creating a standalone device in an
    /// existing project.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError`] when the organisation or project id is
    /// missing, when `device.id` is set, or when a common check fails.
    pub fn validate_for_create(self) -> Result<ValidatedConfig, ValidationError> {
        self.require_org_id()?;
        if !is_set(self.project.id.as_deref()) {
            return Err(ValidationError::invalid(
                "project.id",
                "must be set to create a device",
            ));
        }
        if self.device.id.is_some() {
            return Err(ValidationError::invalid(
                "device.id",
                "must not be set when creating a device",
            ));
        }

        self.validate_common()?;
        self.resolve_defaults()
    }

    fn require_org_id(&self) -> Result<(), ValidationError> {
        if is_set(self.org_id.as_deref()) {
            Ok(())
        } else {
            Err(ValidationError::invalid("org_id", "must be set"))
        }
    }

    fn validate_common(&self) -> Result<(), ValidationError> {
        if self.device.id.is_none() && !is_set(self.device.name.as_deref()) {
            return Err(ValidationError::invalid("device.name", "must not be empty"));
        }
        if self.device.facilities.is_empty() {
            return Err(ValidationError::invalid(
                "device.facilities",
                "must list at least one facility",
            ));
        }
        if self.device.poll_interval_secs == 0 {
            return Err(ValidationError::invalid(
                "device.poll_interval_secs",
                "must be greater than zero",
            ));
        }
        for (field, secs) in [
            ("device.poll_interval_secs", self.device.poll_interval_secs),
            ("device.active_timeout_secs", self.device.active_timeout_secs),
            ("device.bootstrap_timeout_secs", self.device.bootstrap_timeout_secs),
        ] {
            if secs > MAX_WAIT_SECS {
                return Err(ValidationError::invalid(
                    field,
                    format!("must not exceed {MAX_WAIT_SECS} seconds"),
                ));
            }
        }
        if !self.ssh.create_new {
            self.validate_key_reuse()?;
        }
        Ok(())
    }

    fn validate_key_reuse(&self) -> Result<(), ValidationError> {
        let Some(name) = self.ssh.name.as_deref().filter(|name| is_set(Some(name))) else {
            return Err(ValidationError::invalid(
                "ssh.name",
                "must be set when reusing an existing key",
            ));
        };
        let Some(path) = self.ssh.path.as_deref() else {
            return Err(ValidationError::invalid(
                "ssh.path",
                "must be set when reusing an existing key",
            ));
        };

        let dir = keys::key_dir(name, Some(path));
        if keys::private_key_exists(&dir) {
            Ok(())
        } else {
            Err(ValidationError::invalid(
                "ssh.path",
                format!("no {} found in {dir}", keys::PRIVATE_KEY_FILE),
            ))
        }
    }

    /// Fills generated names and composes the bootstrap script. Runs last
    /// because fragment selection depends on the otherwise final values.
    fn resolve_defaults(mut self) -> Result<ValidatedConfig, ValidationError> {
        if !is_set(self.project.name.as_deref()) {
            self.project.name = Some(generated_name(PROJECT_NAME_PREFIX));
        }
        if !is_set(self.ssh.name.as_deref()) {
            self.ssh.name = Some(generated_name(KEY_NAME_PREFIX));
        }
        if self.device.id.is_none() && self.device.userdata.is_none() {
            self.device.userdata = Some(userdata::compose(
                &self.device.script_root,
                self.device.skip_dmsetup,
                self.device.branch.as_deref(),
            )?);
        }
        Ok(ValidatedConfig { config: self })
    }
}
