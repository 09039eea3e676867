//! ZoneOrchestrator: join-or-create semantics for BUILD and PLAY zones.
//!
//! The orchestrator is a thin mirror of fleet-reported truth: it never
//! computes zone state locally. It reads the zone store, creates or deletes
//! fleet containers, writes the store and publishes change events.
//!
//! Two races of the naive read-then-write design are closed here:
//! - BUILD creation runs under a per-space lock, and the store's unique
//!   `build_zones` index rejects a second BUILD zone written by another
//!   process. The loser deletes its container and returns the winner.
//! - Admission is an atomic check-and-insert in a single store transaction.

use std::sync::Arc;

use serde::Deserialize;
use tracing::{debug, info, warn};

use zonegrid_fleet::{CreateContainerRequest, FleetClient};
use zonegrid_state::*;

use crate::capacity::CapacityGuard;
use crate::error::{ZoneError, ZoneResult};
use crate::locks::KeyedLocks;
use crate::lookup::SpaceLookup;
use crate::notify::{NotificationBus, ZoneEvent};

/// Game-server launch settings sent with every container create.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct LaunchProfile {
    pub binary_url: String,
    pub override_cfg_url: String,
    pub gd_server_version: String,
    pub server_arguments: String,
}

impl Default for LaunchProfile {
    fn default() -> Self {
        Self {
            binary_url: String::new(),
            override_cfg_url: String::new(),
            gd_server_version: "0.0.0".to_string(),
            server_arguments: String::new(),
        }
    }
}

/// Input of [`ZoneOrchestrator::create_container_and_zone`].
#[derive(Debug, Clone, PartialEq)]
pub struct CreateZoneRequest {
    pub mode: ZoneMode,
    pub space_id: SpaceId,
    /// Required for PLAY, forbidden for BUILD.
    pub space_version_id: Option<SpaceVersionId>,
    pub owner: Option<UserId>,
    /// Defaults to the space name.
    pub name: Option<String>,
}

/// Result of an idle-teardown request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TeardownOutcome {
    /// Players are connected or the server has not been empty long enough.
    NotIdle,
    /// No zone tracks this uuid (already torn down, or never tracked).
    AlreadyGone,
    /// The container was deleted and the zone record removed.
    TornDown { zone_id: ZoneId },
}

/// Summary of an admin fleet-wide stop.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct StopAllReport {
    pub zones_removed: usize,
    pub containers_deleted: usize,
    /// Zones kept because their container could not be deleted.
    pub failures: Vec<String>,
}

/// Owns zone creation, joins, capacity enforcement and teardown.
pub struct ZoneOrchestrator {
    store: StateStore,
    spaces: Arc<dyn SpaceLookup>,
    fleet: Arc<dyn FleetClient>,
    launch: LaunchProfile,
    locks: KeyedLocks,
    /// Optional sink for zone change events.
    bus: Option<Arc<dyn NotificationBus>>,
}

impl ZoneOrchestrator {
    pub fn new(
        store: StateStore,
        spaces: Arc<dyn SpaceLookup>,
        fleet: Arc<dyn FleetClient>,
        launch: LaunchProfile,
    ) -> Self {
        Self {
            store,
            spaces,
            fleet,
            launch,
            locks: KeyedLocks::new(),
            bus: None,
        }
    }

    /// Publish zone change events on `bus`.
    pub fn with_bus(mut self, bus: Arc<dyn NotificationBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    pub fn fleet(&self) -> &Arc<dyn FleetClient> {
        &self.fleet
    }

    pub(crate) fn publish(&self, event: ZoneEvent) {
        if let Some(bus) = &self.bus {
            bus.publish(event);
        }
    }

    // ── Joins ──────────────────────────────────────────────────────

    /// Join the space's BUILD zone, creating it if none exists.
    ///
    /// Idempotent while the zone exists: every caller gets the same zone.
    pub async fn join_build(&self, user_id: &str, space_id: &str) -> ZoneResult<Zone> {
        require_id("user id", user_id)?;
        require_id("space id", space_id)?;

        let space = self.accessible_space(space_id, user_id)?;

        let zone = {
            let _guard = self.locks.lock(&format!("build:{space_id}")).await;
            let existing = match self.store.find_build_zone(space_id)? {
                Some(zone) if zone.is_in_bad_state() => {
                    warn!(zone_id = %zone.id, %space_id, state = %zone.state, "replacing BUILD zone in bad state");
                    self.discard_zone(&zone).await?;
                    None
                }
                other => other,
            };
            match existing {
                Some(zone) => zone,
                None => {
                    CapacityGuard::check_new_zone(&space)?;
                    self.create_container_and_zone(CreateZoneRequest {
                        mode: ZoneMode::Build,
                        space_id: space_id.to_string(),
                        space_version_id: None,
                        owner: Some(user_id.to_string()),
                        name: None,
                    })
                    .await?
                }
            }
        };

        let zone = self.admit(&space, &zone, user_id)?;
        self.record_recent(user_id, space_id);
        Ok(zone)
    }

    /// Join a specific PLAY zone by id.
    pub async fn join_play_by_zone_id(&self, user_id: &str, zone_id: &str) -> ZoneResult<Zone> {
        require_id("user id", user_id)?;
        require_id("zone id", zone_id)?;

        let zone = self
            .store
            .get_zone(zone_id)?
            .ok_or_else(|| ZoneError::NotFound(format!("zone {zone_id}")))?;
        if zone.zone_mode != ZoneMode::Play {
            return Err(ZoneError::Validation(format!("zone {zone_id} is not a PLAY zone")));
        }
        let space = self.accessible_space(&zone.space, user_id)?;
        let zone = self.admit(&space, &zone, user_id)?;
        self.record_recent(user_id, &space.id);
        Ok(zone)
    }

    /// Join a PLAY zone of the space's active version.
    ///
    /// Zones in bad state and full zones are skipped. With
    /// `create_if_missing`, a new zone is created when none has room.
    pub async fn join_play_by_space_id(
        &self,
        user_id: &str,
        space_id: &str,
        create_if_missing: bool,
    ) -> ZoneResult<Zone> {
        require_id("user id", user_id)?;
        require_id("space id", space_id)?;

        let space = self.accessible_space(space_id, user_id)?;
        let version = space
            .active_space_version
            .clone()
            .ok_or_else(|| ZoneError::NotFound(format!("space {space_id} has no active version")))?;

        let _guard = self.locks.lock(&format!("play:{version}")).await;

        let candidates: Vec<Zone> = self
            .store
            .list_play_zones_for_version(space_id, &version)?
            .into_iter()
            .filter(|z| !z.is_in_bad_state())
            .collect();

        let mut last_rejection = None;
        for candidate in &candidates {
            match self.admit(&space, candidate, user_id) {
                Ok(zone) => {
                    self.record_recent(user_id, space_id);
                    return Ok(zone);
                }
                Err(e @ ZoneError::CapacityExceeded { .. }) => last_rejection = Some(e),
                Err(ZoneError::NotFound(_)) => continue,
                Err(e) => return Err(e),
            }
        }

        if !create_if_missing {
            return Err(last_rejection.unwrap_or_else(|| {
                ZoneError::NotFound(format!("no PLAY zone for space version {version}"))
            }));
        }

        CapacityGuard::check_new_zone(&space)?;
        let zone = self
            .create_container_and_zone(CreateZoneRequest {
                mode: ZoneMode::Play,
                space_id: space_id.to_string(),
                space_version_id: Some(version),
                owner: Some(user_id.to_string()),
                name: None,
            })
            .await?;
        let zone = self.admit(&space, &zone, user_id)?;
        self.record_recent(user_id, space_id);
        Ok(zone)
    }

    // ── PLAY server management ─────────────────────────────────────

    /// Start a new PLAY zone for a space version on the caller's behalf.
    pub async fn create_play_server(
        &self,
        user_id: &str,
        space_version_id: &str,
    ) -> ZoneResult<Zone> {
        require_id("user id", user_id)?;
        require_id("space version id", space_version_id)?;

        let version = self.require_version(space_version_id)?;
        self.accessible_space(&version.space, user_id)?;
        self.create_container_and_zone(CreateZoneRequest {
            mode: ZoneMode::Play,
            space_id: version.space.clone(),
            space_version_id: Some(version.id.clone()),
            owner: Some(user_id.to_string()),
            name: None,
        })
        .await
    }

    /// PLAY zones bound to a space version, oldest first.
    pub fn list_play_servers(&self, user_id: &str, space_version_id: &str) -> ZoneResult<Vec<Zone>> {
        require_id("user id", user_id)?;
        require_id("space version id", space_version_id)?;

        let version = self.require_version(space_version_id)?;
        self.accessible_space(&version.space, user_id)?;
        Ok(self
            .store
            .list_play_zones_for_version(&version.space, &version.id)?)
    }

    // ── Creation ───────────────────────────────────────────────────

    /// Ask the fleet for a container and persist the zone that mirrors it.
    ///
    /// A fleet failure leaves no zone record. If persisting fails, the new
    /// container is deleted again. A BUILD insert that loses the
    /// one-per-space race returns the winning zone instead.
    pub async fn create_container_and_zone(&self, request: CreateZoneRequest) -> ZoneResult<Zone> {
        require_id("space id", &request.space_id)?;
        match (request.mode, request.space_version_id.as_deref()) {
            (ZoneMode::Play, None) => {
                return Err(ZoneError::Validation(
                    "PLAY zone requires a space version".to_string(),
                ));
            }
            (ZoneMode::Build, Some(_)) => {
                return Err(ZoneError::Validation(
                    "BUILD zone must not name a space version".to_string(),
                ));
            }
            _ => {}
        }

        let space = self.require_space(&request.space_id)?;
        let pack_url = match request.space_version_id.as_deref() {
            Some(version_id) => {
                let version = self.require_version(version_id)?;
                if version.space != space.id {
                    return Err(ZoneError::Validation(format!(
                        "space version {version_id} does not belong to space {}",
                        space.id
                    )));
                }
                version.pack_url
            }
            None => space.pack_url.clone().unwrap_or_default(),
        };
        let name = request.name.clone().unwrap_or_else(|| space.name.clone());

        let fleet_request = CreateContainerRequest {
            pack_url,
            binary_url: self.launch.binary_url.clone(),
            override_cfg_url: self.launch.override_cfg_url.clone(),
            space_id: space.id.clone(),
            name: name.clone(),
            space_version: request.space_version_id.clone(),
            space_mode: request.mode,
            server_arguments: self.launch.server_arguments.clone(),
            gd_server_version: self.launch.gd_server_version.clone(),
        };

        let container = self.fleet.create(&fleet_request).await.map_err(|e| {
            warn!(space_id = %space.id, mode = %request.mode, error = %e, "fleet create failed");
            ZoneError::from(e)
        })?;

        let uuid = container
            .uuid
            .clone()
            .filter(|u| !u.trim().is_empty())
            .ok_or_else(|| {
                ZoneError::ServiceUnavailable("fleet response carried no container uuid".to_string())
            })?;

        let mut zone = Zone::new(
            name.clone(),
            request.mode,
            space.id.clone(),
            request.space_version_id.clone(),
            container
                .gd_server_version
                .clone()
                .unwrap_or_else(|| self.launch.gd_server_version.clone()),
        );
        zone.owner = request.owner.clone();
        zone.uuid = Some(uuid.clone());
        zone.ip_address = container.ip_address.clone();
        zone.port = container.port_u16();
        zone.url = connection_url(zone.ip_address.as_deref(), zone.port);
        zone.state = container.zone_state().unwrap_or(ZoneState::Queued);
        zone.container_last_refreshed = Some(epoch_secs());

        match self.store.insert_zone(zone) {
            Ok(zone) => {
                info!(zone_id = %zone.id, %uuid, space_id = %zone.space, mode = %zone.zone_mode, "zone created");
                self.publish(ZoneEvent::Created {
                    zone_id: zone.id.clone(),
                    space: zone.space.clone(),
                });
                Ok(zone)
            }
            Err(StateError::Conflict(reason)) => {
                if let Some(tracked) = self.store.get_zone_by_uuid(&uuid)? {
                    return self.claim_adopted(tracked, &request, name);
                }
                if request.mode != ZoneMode::Build {
                    warn!(space_id = %space.id, %uuid, %reason, "failed to persist zone, releasing container");
                    self.release_container(&uuid).await;
                    return Err(StateError::Conflict(reason).into());
                }
                warn!(space_id = %space.id, %uuid, %reason, "lost BUILD zone race, releasing container");
                self.release_container(&uuid).await;
                self.store.find_build_zone(&space.id)?.ok_or_else(|| {
                    ZoneError::ServiceUnavailable(format!(
                        "BUILD zone for space {} vanished during creation",
                        space.id
                    ))
                })
            }
            Err(e) => {
                warn!(space_id = %space.id, %uuid, error = %e, "failed to persist zone, releasing container");
                self.release_container(&uuid).await;
                Err(e.into())
            }
        }
    }

    /// Take over a zone that reconciliation recorded for our container while
    /// the fleet create was still in flight. The container stays up.
    fn claim_adopted(
        &self,
        tracked: Zone,
        request: &CreateZoneRequest,
        name: String,
    ) -> ZoneResult<Zone> {
        let uuid = tracked.uuid.clone().unwrap_or_default();
        if tracked.space != request.space_id
            || tracked.zone_mode != request.mode
            || tracked.space_version != request.space_version_id
        {
            warn!(zone_id = %tracked.id, %uuid, space_id = %request.space_id, "new container already tracked by an unrelated zone");
            return Err(ZoneError::State(StateError::Conflict(format!(
                "container {uuid} is tracked by zone {} of space {}",
                tracked.id, tracked.space
            ))));
        }

        let owner = request.owner.clone();
        let (zone, ()) = self
            .store
            .update_zone(&tracked.id, |z| {
                z.name = name;
                if owner.is_some() {
                    z.owner = owner;
                }
            })?
            .ok_or_else(|| ZoneError::NotFound(format!("zone {}", tracked.id)))?;
        info!(zone_id = %zone.id, %uuid, space_id = %zone.space, mode = %zone.zone_mode, "claimed zone adopted during creation");
        Ok(zone)
    }

    // ── Teardown ───────────────────────────────────────────────────

    /// Tear down an idle server: once no players are connected and it has
    /// been empty for at least `threshold_secs`, delete its container and
    /// zone record.
    ///
    /// Safe to call repeatedly for the same uuid: once the zone record is
    /// gone, further calls return [`TeardownOutcome::AlreadyGone`] without
    /// touching the fleet.
    pub async fn request_idle_teardown(
        &self,
        uuid: &str,
        player_count: u32,
        seconds_empty: u64,
        threshold_secs: u64,
    ) -> ZoneResult<TeardownOutcome> {
        if player_count > 0 || seconds_empty < threshold_secs {
            return Ok(TeardownOutcome::NotIdle);
        }
        require_id("uuid", uuid)?;

        let _guard = self.locks.lock(&format!("uuid:{uuid}")).await;
        let Some(zone) = self.store.get_zone_by_uuid(uuid)? else {
            debug!(%uuid, "idle teardown: zone already gone");
            return Ok(TeardownOutcome::AlreadyGone);
        };

        match self.fleet.delete(uuid).await {
            Ok(_) => {}
            Err(e) if e.is_not_found() => debug!(%uuid, "idle teardown: container already gone"),
            Err(e) => {
                warn!(%uuid, error = %e, "idle teardown: fleet delete failed");
                return Err(e.into());
            }
        }

        self.store.delete_zone_by_uuid(uuid)?;
        info!(zone_id = %zone.id, %uuid, seconds_empty, "idle zone torn down");
        self.publish(ZoneEvent::Removed {
            zone_id: zone.id.clone(),
            space: zone.space.clone(),
        });
        Ok(TeardownOutcome::TornDown { zone_id: zone.id })
    }

    /// Tear down every tracked zone and its container.
    ///
    /// A container the fleet no longer knows counts as deleted. A zone whose
    /// container could not be deleted is kept and reported.
    pub async fn stop_all(&self) -> ZoneResult<StopAllReport> {
        let mut report = StopAllReport::default();

        for zone in self.store.list_zones()? {
            if let Some(uuid) = zone.uuid.as_deref() {
                match self.fleet.delete(uuid).await {
                    Ok(_) => report.containers_deleted += 1,
                    Err(e) if e.is_not_found() => {}
                    Err(e) => {
                        warn!(zone_id = %zone.id, %uuid, error = %e, "stop-all: fleet delete failed");
                        report.failures.push(format!("{}: {e}", zone.id));
                        continue;
                    }
                }
            }
            if self.store.delete_zone(&zone.id)?.is_some() {
                report.zones_removed += 1;
                self.publish(ZoneEvent::Removed {
                    zone_id: zone.id.clone(),
                    space: zone.space.clone(),
                });
            }
        }

        info!(
            zones_removed = report.zones_removed,
            containers_deleted = report.containers_deleted,
            failures = report.failures.len(),
            "stop-all finished"
        );
        Ok(report)
    }

    // ── Internal helpers ───────────────────────────────────────────

    /// Reserve a slot for `user_id`, atomically with the capacity check.
    fn admit(&self, space: &Space, zone: &Zone, user_id: &str) -> ZoneResult<Zone> {
        match self
            .store
            .admit_user(&zone.id, user_id, |z| CapacityGuard::admits(space, z))?
        {
            Some(Admission::Joined(zone)) | Some(Admission::AlreadyPresent(zone)) => Ok(zone),
            Some(Admission::Rejected(zone)) => {
                debug!(zone_id = %zone.id, %user_id, occupancy = zone.occupancy(), max_users = space.max_users, "join rejected, zone full");
                Err(ZoneError::CapacityExceeded {
                    zone_id: zone.id.clone(),
                    occupancy: zone.occupancy(),
                    max_users: space.max_users,
                })
            }
            None => Err(ZoneError::NotFound(format!("zone {}", zone.id))),
        }
    }

    /// Delete a zone that can no longer serve joins, container first.
    async fn discard_zone(&self, zone: &Zone) -> ZoneResult<()> {
        if let Some(uuid) = zone.uuid.as_deref() {
            self.release_container(uuid).await;
        }
        if self.store.delete_zone(&zone.id)?.is_some() {
            self.publish(ZoneEvent::Removed {
                zone_id: zone.id.clone(),
                space: zone.space.clone(),
            });
        }
        Ok(())
    }

    /// Best-effort container delete; reconciliation heals any leftover.
    async fn release_container(&self, uuid: &str) {
        match self.fleet.delete(uuid).await {
            Ok(_) => debug!(%uuid, "container released"),
            Err(e) if e.is_not_found() => {}
            Err(e) => warn!(%uuid, error = %e, "failed to release container"),
        }
    }

    fn require_space(&self, space_id: &str) -> ZoneResult<Space> {
        self.spaces
            .space(space_id)?
            .ok_or_else(|| ZoneError::NotFound(format!("space {space_id}")))
    }

    fn require_version(&self, space_version_id: &str) -> ZoneResult<SpaceVersion> {
        self.spaces
            .space_version(space_version_id)?
            .ok_or_else(|| ZoneError::NotFound(format!("space version {space_version_id}")))
    }

    /// The space, if it exists and the user has observer standing on it.
    /// Missing access is reported as not found.
    fn accessible_space(&self, space_id: &str, user_id: &str) -> ZoneResult<Space> {
        let space = self.require_space(space_id)?;
        if !self.spaces.has_observer_access(&space, user_id) {
            debug!(%space_id, %user_id, "access denied");
            return Err(ZoneError::NotFound(format!("space {space_id}")));
        }
        Ok(space)
    }

    fn record_recent(&self, user_id: &str, space_id: &str) {
        if let Err(e) = self.spaces.record_recent(user_id, space_id) {
            warn!(%user_id, %space_id, error = %e, "failed to record recent space");
        }
    }
}

fn require_id(what: &str, value: &str) -> ZoneResult<()> {
    if value.trim().is_empty() {
        return Err(ZoneError::Validation(format!("{what} is required")));
    }
    Ok(())
}
