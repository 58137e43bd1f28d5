//! Equinix Metal implementation of [`Provider`].
//!
//! Calls go straight to the REST API with `reqwest`; every response is
//! classified into [`ProviderError`] so the engine can tell a missing
//! resource from a flaky network.

mod types;

use std::sync::LazyLock;
use std::time::Duration;

use reqwest::{Method, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::credentials::MetalCredentials;
use crate::provider::{
    Device, DeviceRequest, Project, Provider, ProviderError, ProviderFuture, ResourceKind, SshKey,
};
use types::{
    CapacityBody, CapacityServer, CreateDeviceBody, CreateProjectBody, CreateSshKeyBody,
    DeviceBody, ProjectBody, SshKeyBody,
};

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);
const AUTH_HEADER: &str = "X-Auth-Token";

static HTTP_CLIENT: LazyLock<reqwest::Client> = LazyLock::new(|| {
    reqwest::Client::builder()
        .timeout(HTTP_TIMEOUT)
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
});

/// Resource addressed by a request, used to build `NotFound` errors.
#[derive(Clone, Copy)]
struct Target<'a> {
    kind: ResourceKind,
    id: &'a str,
}

/// Provider client for the Equinix Metal API.
#[derive(Clone, Debug)]
pub struct MetalProvider {
    base_url: String,
    auth_token: String,
}

impl MetalProvider {
    /// Builds a client from validated credentials.
    #[must_use]
    pub fn new(credentials: &MetalCredentials) -> Self {
        Self {
            base_url: credentials.api_url.trim_end_matches('/').to_owned(),
            auth_token: credentials.auth_token.clone(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn send_raw<B: Serialize + Sync>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> Result<(StatusCode, Vec<u8>), ProviderError> {
        debug!(%method, path, "metal api request");
        let mut request = HTTP_CLIENT
            .request(method, self.url(path))
            .header(AUTH_HEADER, &self.auth_token);
        if let Some(payload) = body {
            request = request.json(payload);
        }

        let response = request
            .send()
            .await
            .map_err(|err| ProviderError::Transient {
                message: err.to_string(),
            })?;
        let status = response.status();
        let bytes = response
            .bytes()
            .await
            .map_err(|err| ProviderError::Transient {
                message: err.to_string(),
            })?;
        Ok((status, bytes.to_vec()))
    }

    async fn send<B: Serialize + Sync>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
        target: Target<'_>,
    ) -> Result<Vec<u8>, ProviderError> {
        let (status, bytes) = self.send_raw(method, path, body).await?;
        classify(status, &bytes, target)?;
        Ok(bytes)
    }

    async fn fetch<T, B>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
        target: Target<'_>,
    ) -> Result<T, ProviderError>
    where
        T: DeserializeOwned,
        B: Serialize + Sync,
    {
        let bytes = self.send(method, path, body, target).await?;
        serde_json::from_slice(&bytes).map_err(|err| ProviderError::Decode {
            message: err.to_string(),
        })
    }

    async fn delete(&self, path: &str, target: Target<'_>) -> Result<(), ProviderError> {
        self.send::<()>(Method::DELETE, path, None, target)
            .await
            .map(|_| ())
    }
}

/// Maps an HTTP status onto the provider error taxonomy.
fn classify(status: StatusCode, body: &[u8], target: Target<'_>) -> Result<(), ProviderError> {
    if status.is_success() {
        return Ok(());
    }
    if status == StatusCode::NOT_FOUND {
        return Err(ProviderError::NotFound {
            kind: target.kind,
            id: target.id.to_owned(),
        });
    }

    let message = String::from_utf8_lossy(body).into_owned();
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        return Err(ProviderError::Transient {
            message: format!("{status}: {message}"),
        });
    }
    Err(ProviderError::Api {
        status: status.as_u16(),
        message,
    })
}

/// Capacity answers: `503` and `422` mean "no room"; other failures are
/// classified like any other response.
fn capacity_verdict(
    status: StatusCode,
    body: &[u8],
    target: Target<'_>,
) -> Result<bool, ProviderError> {
    if status == StatusCode::SERVICE_UNAVAILABLE || status == StatusCode::UNPROCESSABLE_ENTITY {
        return Ok(false);
    }
    classify(status, body, target).map(|()| true)
}

impl Provider for MetalProvider {
    fn get_project<'a>(&'a self, id: &'a str) -> ProviderFuture<'a, Project> {
        Box::pin(async move {
            let target = Target {
                kind: ResourceKind::Project,
                id,
            };
            let body: ProjectBody = self
                .fetch::<_, ()>(Method::GET, &format!("/projects/{id}"), None, target)
                .await?;
            Ok(body.into())
        })
    }

    fn create_project<'a>(
        &'a self,
        org_id: &'a str,
        name: &'a str,
    ) -> ProviderFuture<'a, Project> {
        Box::pin(async move {
            let target = Target {
                kind: ResourceKind::Project,
                id: name,
            };
            let body: ProjectBody = self
                .fetch(
                    Method::POST,
                    &format!("/organizations/{org_id}/projects"),
                    Some(&CreateProjectBody { name }),
                    target,
                )
                .await?;
            Ok(body.into())
        })
    }

    fn validate_capacity<'a>(
        &'a self,
        facility: &'a str,
        plan: &'a str,
        count: u32,
    ) -> ProviderFuture<'a, bool> {
        Box::pin(async move {
            let payload = CapacityBody {
                servers: vec![CapacityServer {
                    facility,
                    plan,
                    quantity: count,
                }],
            };
            let target = Target {
                kind: ResourceKind::Device,
                id: plan,
            };
            let (status, body) = self
                .send_raw(Method::POST, "/capacity", Some(&payload))
                .await?;
            capacity_verdict(status, &body, target)
        })
    }

    fn create_ssh_key<'a>(
        &'a self,
        project_id: &'a str,
        label: &'a str,
        public_key: &'a str,
    ) -> ProviderFuture<'a, SshKey> {
        Box::pin(async move {
            let target = Target {
                kind: ResourceKind::Project,
                id: project_id,
            };
            let body: SshKeyBody = self
                .fetch(
                    Method::POST,
                    &format!("/projects/{project_id}/ssh-keys"),
                    Some(&CreateSshKeyBody {
                        label,
                        key: public_key,
                    }),
                    target,
                )
                .await?;
            Ok(body.into())
        })
    }

    fn create_device<'a>(&'a self, request: &'a DeviceRequest) -> ProviderFuture<'a, Device> {
        Box::pin(async move {
            let target = Target {
                kind: ResourceKind::Project,
                id: &request.project_id,
            };
            let body: DeviceBody = self
                .fetch(
                    Method::POST,
                    &format!("/projects/{}/devices", request.project_id),
                    Some(&CreateDeviceBody::from(request)),
                    target,
                )
                .await?;
            Ok(body.into())
        })
    }

    fn get_device<'a>(&'a self, id: &'a str) -> ProviderFuture<'a, Device> {
        Box::pin(async move {
            let target = Target {
                kind: ResourceKind::Device,
                id,
            };
            let body: DeviceBody = self
                .fetch::<_, ()>(Method::GET, &format!("/devices/{id}"), None, target)
                .await?;
            Ok(body.into())
        })
    }

    fn delete_device<'a>(&'a self, id: &'a str) -> ProviderFuture<'a, ()> {
        Box::pin(async move {
            let target = Target {
                kind: ResourceKind::Device,
                id,
            };
            self.delete(&format!("/devices/{id}"), target).await
        })
    }

    fn delete_ssh_key<'a>(&'a self, id: &'a str) -> ProviderFuture<'a, ()> {
        Box::pin(async move {
            let target = Target {
                kind: ResourceKind::SshKey,
                id,
            };
            self.delete(&format!("/ssh-keys/{id}"), target).await
        })
    }

    fn delete_project<'a>(&'a self, id: &'a str) -> ProviderFuture<'a, ()> {
        Box::pin(async move {
            let target = Target {
                kind: ResourceKind::Project,
                id,
            };
            self.delete(&format!("/projects/{id}"), target).await
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    const DEVICE: Target<'static> = Target {
        kind: ResourceKind::Device,
        id: "dev-1",
    };

    #[rstest]
    fn classify_maps_not_found() {
        let err = classify(StatusCode::NOT_FOUND, b"{}", DEVICE).expect_err("404 is an error");
        assert_eq!(
            err,
            ProviderError::NotFound {
                kind: ResourceKind::Device,
                id: String::from("dev-1"),
            }
        );
    }

    #[rstest]
    #[case(StatusCode::BAD_GATEWAY)]
    #[case(StatusCode::SERVICE_UNAVAILABLE)]
    #[case(StatusCode::TOO_MANY_REQUESTS)]
    fn classify_marks_retryable_statuses_transient(#[case] status: StatusCode) {
        let err = classify(status, b"busy", DEVICE).expect_err("status is an error");
        assert!(err.is_transient(), "unexpected classification: {err:?}");
    }

    #[rstest]
    fn classify_keeps_client_errors_as_api_errors() {
        let err = classify(StatusCode::UNPROCESSABLE_ENTITY, b"bad plan", DEVICE)
            .expect_err("422 is an error");
        assert_eq!(
            err,
            ProviderError::Api {
                status: 422,
                message: String::from("bad plan"),
            }
        );
    }

    #[rstest]
    fn classify_accepts_no_content() {
        assert!(classify(StatusCode::NO_CONTENT, b"", DEVICE).is_ok());
    }

    #[rstest]
    #[case(StatusCode::SERVICE_UNAVAILABLE, false)]
    #[case(StatusCode::UNPROCESSABLE_ENTITY, false)]
    #[case(StatusCode::NO_CONTENT, true)]
    #[case(StatusCode::OK, true)]
    fn capacity_verdict_reads_status(#[case] status: StatusCode, #[case] expected: bool) {
        assert_eq!(capacity_verdict(status, b"", DEVICE), Ok(expected));
    }

    #[rstest]
    fn capacity_verdict_propagates_other_failures() {
        assert!(matches!(
            capacity_verdict(StatusCode::FORBIDDEN, b"denied", DEVICE),
            Err(ProviderError::Api { status: 403, .. })
        ));
    }

    #[rstest]
    fn url_joins_base_and_path() {
        let provider = MetalProvider {
            base_url: String::from("https://metal.example/v1"),
            auth_token: String::from("token"),
        };
        assert_eq!(
            provider.url("/devices/abc"),
            "https://metal.example/v1/devices/abc"
        );
    }
}
