//! Inbound status messages from running game servers.

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::error::ZoneResult;
use crate::notify::ZoneEvent;
use crate::orchestrator::{TeardownOutcome, ZoneOrchestrator};

/// Fleet uuids are at least this long; shorter ids come from servers the
/// fleet does not manage (local development builds).
pub const MIN_FLEET_UUID_LEN: usize = 32;

/// A status report sent periodically by a game server.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServerStatus {
    pub uuid: String,
    #[serde(default)]
    pub players: u32,
    #[serde(default)]
    pub seconds_empty: u64,
    /// Game-server build the process is running.
    #[serde(default)]
    pub version: Option<String>,
    /// Authoritative occupant list, when the server reports one.
    #[serde(default)]
    pub users_present: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum StatusOutcome {
    /// Not a fleet-managed server.
    Ignored,
    /// No zone tracks this uuid.
    Untracked,
    /// The zone record was refreshed from the report.
    Updated,
    /// The server was idle past the threshold and has been torn down.
    TornDown { zone_id: String },
}

impl ZoneOrchestrator {
    /// Apply a status report, then evaluate idle teardown.
    pub async fn handle_server_status(
        &self,
        status: &ServerStatus,
        idle_threshold_secs: u64,
    ) -> ZoneResult<StatusOutcome> {
        let uuid = status.uuid.trim();
        if uuid.len() < MIN_FLEET_UUID_LEN {
            trace!(%uuid, "ignoring status from non-fleet server");
            return Ok(StatusOutcome::Ignored);
        }

        let updated = self.store().update_zone_by_uuid(uuid, |zone| {
            if let Some(users) = &status.users_present {
                zone.users_present = users.iter().cloned().collect();
            }
            if let Some(version) = status.version.as_deref().filter(|v| !v.is_empty()) {
                zone.gd_server_version = version.to_string();
            }
        })?;
        let Some((zone, ())) = updated else {
            debug!(%uuid, "status from untracked server");
            return Ok(StatusOutcome::Untracked);
        };
        self.publish(ZoneEvent::Updated {
            zone_id: zone.id.clone(),
            space: zone.space.clone(),
            state: zone.state,
        });

        match self
            .request_idle_teardown(uuid, status.players, status.seconds_empty, idle_threshold_secs)
            .await?
        {
            TeardownOutcome::TornDown { zone_id } => Ok(StatusOutcome::TornDown { zone_id }),
            TeardownOutcome::AlreadyGone => Ok(StatusOutcome::Untracked),
            TeardownOutcome::NotIdle => Ok(StatusOutcome::Updated),
        }
    }
}
