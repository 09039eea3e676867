//! Wire types of the fleet API.
//!
//! Responses are decoded leniently (every field optional) so that one
//! malformed container in a bulk listing can be rejected on its own by the
//! caller instead of failing the whole snapshot.

use serde::{Deserialize, Serialize};

use zonegrid_state::{ZoneMode, ZoneState};

/// `ContainerStatusResponse` as returned by every fleet endpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ContainerStatus {
    #[serde(default)]
    pub uuid: Option<String>,
    #[serde(default)]
    pub server_id: Option<String>,
    #[serde(default)]
    pub space_id: Option<String>,
    #[serde(default)]
    pub space_version: Option<String>,
    #[serde(default)]
    pub space_mode: Option<String>,
    #[serde(default)]
    pub ip_address: Option<String>,
    #[serde(default)]
    pub port: Option<i64>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub gd_server_version: Option<String>,
}

impl ContainerStatus {
    /// Fleet-reported state, if present and recognised.
    pub fn zone_state(&self) -> Option<ZoneState> {
        self.state.as_deref().and_then(|s| s.parse().ok())
    }

    /// Fleet-reported mode, if present and recognised.
    pub fn zone_mode(&self) -> Option<ZoneMode> {
        self.space_mode.as_deref().and_then(|s| s.parse().ok())
    }

    /// Port, if present and within range.
    pub fn port_u16(&self) -> Option<u16> {
        self.port.and_then(|p| u16::try_from(p).ok())
    }
}

/// Body of `POST /containers`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CreateContainerRequest {
    pub pack_url: String,
    pub binary_url: String,
    pub override_cfg_url: String,
    pub space_id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub space_version: Option<String>,
    pub space_mode: ZoneMode,
    pub server_arguments: String,
    pub gd_server_version: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn container_status_tolerates_missing_fields() {
        let status: ContainerStatus = serde_json::from_str(r#"{"uuid":"abc"}"#).unwrap();
        assert_eq!(status.uuid.as_deref(), Some("abc"));
        assert_eq!(status.zone_state(), None);
        assert_eq!(status.port_u16(), None);
    }

    #[test]
    fn container_status_parses_known_values() {
        let status: ContainerStatus = serde_json::from_str(
            r#"{"uuid":"abc","space_mode":"play","state":"READY","port":7777}"#,
        )
        .unwrap();
        assert_eq!(status.zone_mode(), Some(ZoneMode::Play));
        assert_eq!(status.zone_state(), Some(ZoneState::Ready));
        assert_eq!(status.port_u16(), Some(7777));
    }

    #[test]
    fn out_of_range_port_is_rejected() {
        let status = ContainerStatus {
            port: Some(70_000),
            ..Default::default()
        };
        assert_eq!(status.port_u16(), None);
    }

    #[test]
    fn build_request_omits_version() {
        let req = CreateContainerRequest {
            pack_url: String::new(),
            binary_url: "https://cdn.example/server.x86_64".to_string(),
            override_cfg_url: String::new(),
            space_id: "space-1".to_string(),
            name: "Lobby".to_string(),
            space_version: None,
            space_mode: ZoneMode::Build,
            server_arguments: String::new(),
            gd_server_version: "4.2.1".to_string(),
        };
        let json = serde_json::to_value(&req).unwrap();
        assert!(json.get("space_version").is_none());
        assert_eq!(json["space_mode"], "BUILD");
    }
}
