//! Domain types for the ZoneGrid state store.
//!
//! These types represent the locally cached Zones and the read-mostly Space
//! data mirrored from the space service. All types are serializable to/from
//! JSON for storage in redb tables.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::str::FromStr;

/// Store-assigned identifier of a zone.
pub type ZoneId = String;

/// Identifier of a space (virtual-world definition).
pub type SpaceId = String;

/// Identifier of an immutable published space snapshot.
pub type SpaceVersionId = String;

/// Identifier of a user.
pub type UserId = String;

// ── Zone ──────────────────────────────────────────────────────────

/// Whether a zone hosts an editing session or a play session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ZoneMode {
    /// Editing session; at most one per space.
    Build,
    /// Runtime play session bound to a space version; unbounded per space.
    Play,
}

impl ZoneMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ZoneMode::Build => "BUILD",
            ZoneMode::Play => "PLAY",
        }
    }
}

impl fmt::Display for ZoneMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ZoneMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "BUILD" => Ok(ZoneMode::Build),
            "PLAY" => Ok(ZoneMode::Play),
            other => Err(format!("unknown zone mode: {other:?}")),
        }
    }
}

/// Container lifecycle state as reported by the fleet.
///
/// Transitions are never computed locally: the zone mirrors whatever the
/// fleet last reported (QUEUED → BOOTING → READY, any → ERROR).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ZoneState {
    Queued,
    Booting,
    Ready,
    Error,
}

impl ZoneState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ZoneState::Queued => "QUEUED",
            ZoneState::Booting => "BOOTING",
            ZoneState::Ready => "READY",
            ZoneState::Error => "ERROR",
        }
    }
}

impl fmt::Display for ZoneState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ZoneState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "QUEUED" => Ok(ZoneState::Queued),
            "BOOTING" => Ok(ZoneState::Booting),
            "READY" => Ok(ZoneState::Ready),
            "ERROR" => Ok(ZoneState::Error),
            other => Err(format!("unknown zone state: {other:?}")),
        }
    }
}

/// One ephemeral game-server instance, mirroring one fleet container.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Zone {
    /// Store-assigned, stable id. Empty until the zone is inserted.
    pub id: ZoneId,
    pub name: String,
    pub owner: Option<UserId>,
    pub zone_mode: ZoneMode,
    pub space: SpaceId,
    /// Required for PLAY zones, forbidden for BUILD zones.
    pub space_version: Option<SpaceVersionId>,
    /// Game-server build running in the container.
    pub gd_server_version: String,
    /// Fleet-assigned container id.
    pub uuid: Option<String>,
    pub ip_address: Option<String>,
    pub port: Option<u16>,
    pub url: Option<String>,
    pub state: ZoneState,
    pub users_present: BTreeSet<UserId>,
    /// Unix timestamp of the last successful reconciliation touch.
    pub container_last_refreshed: Option<u64>,
    pub created_at: u64,
    pub updated_at: u64,
}

impl Zone {
    /// A fresh, not-yet-persisted zone in `QUEUED` state.
    pub fn new(
        name: impl Into<String>,
        zone_mode: ZoneMode,
        space: impl Into<SpaceId>,
        space_version: Option<SpaceVersionId>,
        gd_server_version: impl Into<String>,
    ) -> Self {
        Self {
            id: String::new(),
            name: name.into(),
            owner: None,
            zone_mode,
            space: space.into(),
            space_version,
            gd_server_version: gd_server_version.into(),
            uuid: None,
            ip_address: None,
            port: None,
            url: None,
            state: ZoneState::Queued,
            users_present: BTreeSet::new(),
            container_last_refreshed: None,
            created_at: 0,
            updated_at: 0,
        }
    }

    /// A zone is unusable when the fleet never assigned it a container or
    /// reported the container as failed.
    pub fn is_in_bad_state(&self) -> bool {
        is_in_bad_state(self)
    }

    /// Check the write-time invariants.
    pub fn validate(&self) -> Result<(), String> {
        if self.space.trim().is_empty() {
            return Err("zone.space is required".to_string());
        }
        match (self.zone_mode, self.space_version.as_deref()) {
            (ZoneMode::Play, None) => {
                return Err("PLAY zone requires a space_version".to_string());
            }
            (ZoneMode::Play, Some(v)) if v.trim().is_empty() => {
                return Err("PLAY zone requires a non-empty space_version".to_string());
            }
            (ZoneMode::Build, Some(_)) => {
                return Err("BUILD zone must not carry a space_version".to_string());
            }
            _ => {}
        }
        if matches!(self.uuid.as_deref(), Some(u) if u.trim().is_empty()) {
            return Err("zone.uuid must be absent or non-empty".to_string());
        }
        Ok(())
    }

    /// Number of users currently holding a slot in this zone.
    pub fn occupancy(&self) -> usize {
        self.users_present.len()
    }

    /// Key in the `zone_spaces` index.
    pub fn space_key(&self) -> (&str, &str) {
        (self.space.as_str(), self.id.as_str())
    }
}

/// `uuid` absent OR `state == ERROR`.
pub fn is_in_bad_state(zone: &Zone) -> bool {
    zone.uuid.is_none() || zone.state == ZoneState::Error
}

/// Client-facing address of a container, when the fleet reported both parts.
pub fn connection_url(ip_address: Option<&str>, port: Option<u16>) -> Option<String> {
    match (ip_address, port) {
        (Some(ip), Some(port)) if !ip.is_empty() => Some(format!("{ip}:{port}")),
        _ => None,
    }
}

// ── Space ─────────────────────────────────────────────────────────

/// Role a user holds on a space. Ordered from least to most privileged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpaceRole {
    Observer,
    Contributor,
    Manager,
    Owner,
}

/// Read-mostly mirror of a space definition.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Space {
    pub id: SpaceId,
    pub name: String,
    pub owner: UserId,
    /// Maximum concurrent occupants of any zone of this space.
    pub max_users: u32,
    /// Version used for PLAY joins that do not name one.
    pub active_space_version: Option<SpaceVersionId>,
    /// Public spaces grant observer standing to everyone.
    #[serde(default)]
    pub public: bool,
    #[serde(default)]
    pub members: HashMap<UserId, SpaceRole>,
    /// Pack loaded by BUILD servers.
    #[serde(default)]
    pub pack_url: Option<String>,
    #[serde(default)]
    pub updated_at: u64,
}

impl Space {
    /// The user's explicit or implied role on this space.
    pub fn role_of(&self, user_id: &str) -> Option<SpaceRole> {
        if self.owner == user_id {
            return Some(SpaceRole::Owner);
        }
        match self.members.get(user_id) {
            Some(role) => Some(*role),
            None if self.public => Some(SpaceRole::Observer),
            None => None,
        }
    }

    pub fn has_role_at_least(&self, user_id: &str, role: SpaceRole) -> bool {
        self.role_of(user_id).is_some_and(|r| r >= role)
    }
}

/// Immutable published snapshot of a space.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SpaceVersion {
    pub id: SpaceVersionId,
    pub space: SpaceId,
    #[serde(default)]
    pub name: String,
    /// Pack loaded by PLAY servers for this version.
    pub pack_url: String,
    #[serde(default)]
    pub created_at: u64,
}

/// Current Unix epoch in seconds.
pub fn epoch_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_zone() -> Zone {
        Zone::new("space-1 build", ZoneMode::Build, "space-1", None, "4.2.1")
    }

    #[test]
    fn fresh_zone_is_in_bad_state_until_uuid_assigned() {
        let mut zone = build_zone();
        assert!(zone.is_in_bad_state());

        zone.uuid = Some("c0ffee00-0000-4000-8000-000000000001".to_string());
        assert!(!zone.is_in_bad_state());

        zone.state = ZoneState::Error;
        assert!(is_in_bad_state(&zone));
    }

    #[test]
    fn play_zone_requires_version() {
        let zone = Zone::new("p", ZoneMode::Play, "space-1", None, "4.2.1");
        assert!(zone.validate().is_err());

        let zone = Zone::new("p", ZoneMode::Play, "space-1", Some(" ".into()), "4.2.1");
        assert!(zone.validate().is_err());

        let zone = Zone::new("p", ZoneMode::Play, "space-1", Some("v1".into()), "4.2.1");
        assert!(zone.validate().is_ok());
    }

    #[test]
    fn build_zone_rejects_version() {
        let zone = Zone::new("b", ZoneMode::Build, "space-1", Some("v1".into()), "4.2.1");
        assert!(zone.validate().is_err());
        assert!(build_zone().validate().is_ok());
    }

    #[test]
    fn zone_requires_space() {
        let zone = Zone::new("b", ZoneMode::Build, "", None, "4.2.1");
        assert!(zone.validate().is_err());
    }

    #[test]
    fn mode_and_state_parse_case_insensitively() {
        assert_eq!("play".parse::<ZoneMode>(), Ok(ZoneMode::Play));
        assert_eq!("BUILD".parse::<ZoneMode>(), Ok(ZoneMode::Build));
        assert!("edit".parse::<ZoneMode>().is_err());

        assert_eq!("ready".parse::<ZoneState>(), Ok(ZoneState::Ready));
        assert_eq!(" Booting ".parse::<ZoneState>(), Ok(ZoneState::Booting));
        assert!("running".parse::<ZoneState>().is_err());
    }

    #[test]
    fn mode_serializes_uppercase() {
        let json = serde_json::to_string(&ZoneMode::Play).unwrap();
        assert_eq!(json, "\"PLAY\"");
        let json = serde_json::to_string(&ZoneState::Queued).unwrap();
        assert_eq!(json, "\"QUEUED\"");
    }

    #[test]
    fn connection_url_needs_both_parts() {
        assert_eq!(
            connection_url(Some("10.0.0.4"), Some(7777)),
            Some("10.0.0.4:7777".to_string())
        );
        assert_eq!(connection_url(Some("10.0.0.4"), None), None);
        assert_eq!(connection_url(None, Some(7777)), None);
        assert_eq!(connection_url(Some(""), Some(7777)), None);
    }

    #[test]
    fn space_roles() {
        let mut space = Space {
            id: "space-1".to_string(),
            name: "Lobby".to_string(),
            owner: "alice".to_string(),
            max_users: 8,
            active_space_version: None,
            public: false,
            members: HashMap::new(),
            pack_url: None,
            updated_at: 0,
        };
        space.members.insert("bob".to_string(), SpaceRole::Contributor);

        assert_eq!(space.role_of("alice"), Some(SpaceRole::Owner));
        assert_eq!(space.role_of("bob"), Some(SpaceRole::Contributor));
        assert_eq!(space.role_of("carol"), None);
        assert!(space.has_role_at_least("bob", SpaceRole::Observer));
        assert!(!space.has_role_at_least("bob", SpaceRole::Manager));

        space.public = true;
        assert_eq!(space.role_of("carol"), Some(SpaceRole::Observer));
    }
}
