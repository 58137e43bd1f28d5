//! Wire types for the Equinix Metal REST API.

use serde::{Deserialize, Serialize};

use crate::provider::{Device, DeviceRequest, IpAssignment, Project, SshKey};

/// Facility value that lets the API choose a location.
const ANY_FACILITY: &str = "any";

#[derive(Serialize)]
pub(super) struct CreateProjectBody<'a> {
    pub(super) name: &'a str,
}

#[derive(Serialize)]
pub(super) struct CreateSshKeyBody<'a> {
    pub(super) label: &'a str,
    pub(super) key: &'a str,
}

#[derive(Serialize)]
pub(super) struct CapacityServer<'a> {
    pub(super) facility: &'a str,
    pub(super) plan: &'a str,
    pub(super) quantity: u32,
}

#[derive(Serialize)]
pub(super) struct CapacityBody<'a> {
    pub(super) servers: Vec<CapacityServer<'a>>,
}

#[derive(Debug, Serialize)]
pub(super) struct CreateDeviceBody<'a> {
    hostname: &'a str,
    plan: &'a str,
    operating_system: &'a str,
    facility: Vec<&'a str>,
    billing_cycle: &'a str,
    #[serde(skip_serializing_if = "<[String]>::is_empty")]
    project_ssh_keys: &'a [String],
    userdata: &'a str,
}

impl<'a> From<&'a DeviceRequest> for CreateDeviceBody<'a> {
    fn from(request: &'a DeviceRequest) -> Self {
        Self {
            hostname: &request.hostname,
            plan: &request.plan,
            operating_system: &request.operating_system,
            facility: vec![request.facility.as_deref().unwrap_or(ANY_FACILITY)],
            billing_cycle: &request.billing_cycle,
            project_ssh_keys: &request.ssh_key_ids,
            userdata: &request.userdata,
        }
    }
}

#[derive(Deserialize)]
pub(super) struct ProjectBody {
    id: String,
    #[serde(default)]
    name: String,
}

impl From<ProjectBody> for Project {
    fn from(body: ProjectBody) -> Self {
        Self {
            id: body.id,
            name: body.name,
        }
    }
}

#[derive(Deserialize)]
pub(super) struct SshKeyBody {
    id: String,
    #[serde(default)]
    label: String,
}

impl From<SshKeyBody> for SshKey {
    fn from(body: SshKeyBody) -> Self {
        Self {
            id: body.id,
            label: body.label,
        }
    }
}

#[derive(Deserialize)]
struct IpAddressBody {
    address: String,
    #[serde(default)]
    public: bool,
    #[serde(default)]
    address_family: u8,
}

#[derive(Deserialize)]
pub(super) struct DeviceBody {
    id: String,
    #[serde(default)]
    hostname: String,
    #[serde(default)]
    state: String,
    #[serde(default)]
    ip_addresses: Vec<IpAddressBody>,
}

impl From<DeviceBody> for Device {
    fn from(body: DeviceBody) -> Self {
        Self {
            id: body.id,
            hostname: body.hostname,
            state: body.state,
            ip_addresses: body
                .ip_addresses
                .into_iter()
                .map(|ip| IpAssignment {
                    address: ip.address,
                    public: ip.public,
                    address_family: ip.address_family,
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(facility: Option<&str>, keys: Vec<String>) -> DeviceRequest {
        DeviceRequest {
            project_id: String::from("prj"),
            hostname: String::from("T-800"),
            plan: String::from("c3.small.x86"),
            operating_system: String::from("ubuntu_18_04"),
            facility: facility.map(str::to_owned),
            billing_cycle: String::from("hourly"),
            ssh_key_ids: keys,
            userdata: String::from("#!/bin/bash\n"),
        }
    }

    #[test]
    fn device_body_uses_selected_facility_and_keys() {
        let req = request(Some("ewr1"), vec![String::from("key-1")]);
        let json = serde_json::to_value(CreateDeviceBody::from(&req)).expect("serialise");
        assert_eq!(json["facility"], serde_json::json!(["ewr1"]));
        assert_eq!(json["project_ssh_keys"], serde_json::json!(["key-1"]));
        assert_eq!(json["hostname"], "T-800");
        assert_eq!(json["userdata"], "#!/bin/bash\n");
    }

    #[test]
    fn device_body_defers_placement_without_facility() {
        let req = request(None, Vec::new());
        let json = serde_json::to_value(CreateDeviceBody::from(&req)).expect("serialise");
        assert_eq!(json["facility"], serde_json::json!(["any"]));
        assert!(json.get("project_ssh_keys").is_none());
    }

    #[test]
    fn device_body_decodes_addresses() {
        let raw = r#"{
            "id": "dev-1",
            "hostname": "T-800",
            "state": "active",
            "ip_addresses": [
                {"address": "147.75.1.2", "public": true, "address_family": 4}
            ]
        }"#;
        let body: DeviceBody = serde_json::from_str(raw).expect("decode");
        let device = Device::from(body);
        assert!(device.is_active());
        assert_eq!(device.public_ip(), Some([147, 75, 1, 2].into()));
    }
}
