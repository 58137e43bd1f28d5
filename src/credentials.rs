//! Provider credentials loaded via `ortho-config`.

use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

/// Default Equinix Metal API endpoint.
pub const DEFAULT_API_URL: &str = "https://api.equinix.com/metal/v1";

/// Equinix Metal credentials derived from environment variables and
/// configuration files.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(prefix = "METAL")]
pub struct MetalCredentials {
    /// API token used for authentication. This value is required.
    pub auth_token: String,
    /// Base URL of the REST API.
    #[ortho_config(default = DEFAULT_API_URL.to_owned())]
    pub api_url: String,
}

/// Metadata for a credential field, used to generate actionable error messages.
struct FieldMetadata {
    description: &'static str,
    env_var: &'static str,
}

impl MetalCredentials {
    fn require_field(value: &str, metadata: &FieldMetadata) -> Result<(), CredentialsError> {
        if value.trim().is_empty() {
            return Err(CredentialsError::MissingField(format!(
                "missing {}: set {}",
                metadata.description, metadata.env_var
            )));
        }
        Ok(())
    }

    /// Loads credentials without attempting to parse CLI arguments.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialsError::Parse`] when the loader fails to merge
    /// sources, which includes the token being absent altogether.
    pub fn load_without_cli_args() -> Result<Self, CredentialsError> {
        let credentials = Self::load_from_iter([std::ffi::OsString::from("welder")])
            .map_err(|err| CredentialsError::Parse(err.to_string()))?;
        credentials.validate()?;
        Ok(credentials)
    }

    /// Performs semantic validation on required fields.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialsError::MissingField`] when a required field is
    /// empty.
    pub fn validate(&self) -> Result<(), CredentialsError> {
        Self::require_field(
            &self.auth_token,
            &FieldMetadata {
                description: "Equinix Metal API token",
                env_var: "METAL_AUTH_TOKEN",
            },
        )?;
        Self::require_field(
            &self.api_url,
            &FieldMetadata {
                description: "Equinix Metal API URL",
                env_var: "METAL_API_URL",
            },
        )?;
        Ok(())
    }
}

/// Errors raised while loading credentials.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum CredentialsError {
    /// A required credential is empty.
    #[error("missing credential: {0}")]
    MissingField(String),
    /// Surfaces errors from the `ortho-config` loader.
    #[error("credential loading failed (is METAL_AUTH_TOKEN set?): {0}")]
    Parse(String),
}

impl From<ortho_config::OrthoError> for CredentialsError {
    fn from(value: ortho_config::OrthoError) -> Self {
        Self::Parse(value.to_string())
    }
}
