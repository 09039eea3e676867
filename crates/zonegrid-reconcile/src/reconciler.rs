//! Reconciler: heals local zone records from the fleet snapshot.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::{Mutex, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use zonegrid_fleet::{ContainerStatus, FleetClient, FleetError};
use zonegrid_orchestrator::{MIN_FLEET_UUID_LEN, NotificationBus, ZoneEvent};
use zonegrid_state::*;

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("fleet listing failed: {0}")]
    Fleet(#[from] FleetError),

    #[error("state store error: {0}")]
    State(#[from] StateError),
}

/// What one pass changed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    /// Tracked zones refreshed from their container.
    pub updated: usize,
    /// Untracked containers recorded as new zones.
    pub adopted: usize,
    /// Stale zones whose container no longer exists.
    pub deleted: usize,
    /// Containers rejected as malformed or unwritable.
    pub skipped: usize,
}

/// A container that passed validation.
#[derive(Debug, Clone)]
struct ObservedContainer {
    uuid: String,
    name: String,
    space: SpaceId,
    mode: ZoneMode,
    space_version: Option<SpaceVersionId>,
    state: ZoneState,
    ip_address: Option<String>,
    port: Option<u16>,
    gd_server_version: Option<String>,
}

impl ObservedContainer {
    fn validate(container: &ContainerStatus) -> Result<Self, String> {
        let uuid = container
            .uuid
            .as_deref()
            .map(str::trim)
            .filter(|u| u.len() >= MIN_FLEET_UUID_LEN)
            .ok_or("missing or malformed uuid")?;
        let space = container
            .space_id
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .ok_or("missing space_id")?;
        let mode = container.zone_mode().ok_or("missing or unknown space_mode")?;
        let state = container.zone_state().ok_or("missing or unknown state")?;

        let space_version = match mode {
            ZoneMode::Play => Some(
                container
                    .space_version
                    .as_deref()
                    .filter(|v| !v.trim().is_empty())
                    .ok_or("PLAY container without space_version")?
                    .to_string(),
            ),
            ZoneMode::Build => None,
        };

        let port = match container.port {
            Some(_) => Some(container.port_u16().ok_or("port out of range")?),
            None => None,
        };

        Ok(Self {
            uuid: uuid.to_string(),
            name: container
                .server_id
                .clone()
                .unwrap_or_else(|| space.to_string()),
            space: space.to_string(),
            mode,
            space_version,
            state,
            ip_address: container.ip_address.clone().filter(|ip| !ip.is_empty()),
            port,
            gd_server_version: container.gd_server_version.clone(),
        })
    }

    /// Copy the fleet-owned fields onto a zone.
    fn apply(&self, zone: &mut Zone, now: u64) {
        zone.state = self.state;
        zone.ip_address = self.ip_address.clone();
        zone.port = self.port;
        zone.url = connection_url(zone.ip_address.as_deref(), zone.port);
        if let Some(version) = self.gd_server_version.as_deref().filter(|v| !v.is_empty()) {
            zone.gd_server_version = version.to_string();
        }
        zone.container_last_refreshed = Some(now);
    }

    fn to_zone(&self, now: u64) -> Zone {
        let mut zone = Zone::new(
            self.name.clone(),
            self.mode,
            self.space.clone(),
            self.space_version.clone(),
            String::new(),
        );
        zone.uuid = Some(self.uuid.clone());
        self.apply(&mut zone, now);
        zone
    }
}

/// Periodic, single-flight reconciliation of zones against the fleet.
pub struct Reconciler {
    store: StateStore,
    fleet: Arc<dyn FleetClient>,
    bus: Option<Arc<dyn NotificationBus>>,
    stale_after_secs: u64,
    running: Mutex<()>,
}

impl Reconciler {
    pub fn new(store: StateStore, fleet: Arc<dyn FleetClient>, stale_after_secs: u64) -> Self {
        Self {
            store,
            fleet,
            bus: None,
            stale_after_secs,
            running: Mutex::new(()),
        }
    }

    /// Publish zone change events on `bus`.
    pub fn with_bus(mut self, bus: Arc<dyn NotificationBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Run one pass, waiting for a pass already in progress to finish.
    pub async fn reconcile_once(&self) -> Result<ReconcileReport, ReconcileError> {
        let _running = self.running.lock().await;
        self.pass().await
    }

    /// Run one pass unless another is in progress, in which case `None`.
    pub async fn try_run(&self) -> Option<Result<ReconcileReport, ReconcileError>> {
        let Ok(_running) = self.running.try_lock() else {
            debug!("reconciliation already running, skipping");
            return None;
        };
        Some(self.pass().await)
    }

    /// Run passes every `interval` until `shutdown` flips.
    pub async fn run(&self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_secs = interval.as_secs(),
            stale_after_secs = self.stale_after_secs,
            "reconciler started"
        );

        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Some(Err(e)) = self.try_run().await {
                        error!(error = %e, "reconciliation pass failed");
                    }
                }
                _ = shutdown.changed() => {
                    info!("reconciler shutting down");
                    break;
                }
            }
        }
    }

    async fn pass(&self) -> Result<ReconcileReport, ReconcileError> {
        let now = epoch_secs();
        let stale = self.store.list_stale_zones(now, self.stale_after_secs)?;
        // An outage must not look like an empty fleet.
        let snapshot = self.fleet.list_all().await?;

        let mut report = ReconcileReport::default();
        let mut seen: HashSet<String> = HashSet::with_capacity(snapshot.len());

        for container in &snapshot {
            if let Some(uuid) = container.uuid.as_deref() {
                seen.insert(uuid.trim().to_string());
            }
            let observed = match ObservedContainer::validate(container) {
                Ok(observed) => observed,
                Err(reason) => {
                    warn!(uuid = ?container.uuid, %reason, "skipping invalid container record");
                    report.skipped += 1;
                    continue;
                }
            };
            self.upsert(&observed, now, &mut report);
        }

        for zone in stale {
            let vanished = zone.uuid.as_deref().is_none_or(|u| !seen.contains(u));
            if !vanished {
                continue;
            }
            if let Some(removed) = self.store.delete_zone(&zone.id)? {
                info!(zone_id = %removed.id, uuid = ?removed.uuid, space = %removed.space, "container vanished, zone removed");
                report.deleted += 1;
                self.publish(ZoneEvent::Removed {
                    zone_id: removed.id,
                    space: removed.space,
                });
            }
        }

        debug!(
            containers = snapshot.len(),
            updated = report.updated,
            adopted = report.adopted,
            deleted = report.deleted,
            skipped = report.skipped,
            "reconciliation pass finished"
        );
        Ok(report)
    }

    /// Write one observed container; failures only affect this record.
    fn upsert(&self, observed: &ObservedContainer, now: u64, report: &mut ReconcileReport) {
        let updated = self.store.update_zone_by_uuid(&observed.uuid, |zone| {
            let before = zone.state;
            observed.apply(zone, now);
            before
        });

        match updated {
            Ok(Some((zone, before))) => {
                report.updated += 1;
                if before != zone.state {
                    debug!(zone_id = %zone.id, from = %before, to = %zone.state, "zone state changed");
                    self.publish(ZoneEvent::Updated {
                        zone_id: zone.id,
                        space: zone.space,
                        state: zone.state,
                    });
                }
            }
            Ok(None) => match self.store.insert_zone(observed.to_zone(now)) {
                Ok(zone) => {
                    info!(zone_id = %zone.id, uuid = %observed.uuid, space = %zone.space, mode = %zone.zone_mode, "adopted untracked container");
                    report.adopted += 1;
                    self.publish(ZoneEvent::Created {
                        zone_id: zone.id,
                        space: zone.space,
                    });
                }
                Err(StateError::Conflict(reason)) => {
                    warn!(uuid = %observed.uuid, %reason, "not adopting container");
                    report.skipped += 1;
                }
                Err(e) => {
                    warn!(uuid = %observed.uuid, error = %e, "failed to adopt container");
                    report.skipped += 1;
                }
            },
            Err(e) => {
                warn!(uuid = %observed.uuid, error = %e, "failed to refresh zone");
                report.skipped += 1;
            }
        }
    }

    fn publish(&self, event: ZoneEvent) {
        if let Some(bus) = &self.bus {
            bus.publish(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use zonegrid_fleet::InMemoryFleet;
    use zonegrid_orchestrator::BroadcastBus;

    fn fleet_uuid(tag: char) -> String {
        std::iter::repeat_n(tag, 36).collect()
    }

    fn container(uuid: &str, state: &str, port: i64) -> ContainerStatus {
        ContainerStatus {
            uuid: Some(uuid.to_string()),
            server_id: Some(format!("srv-{port}")),
            space_id: Some("space-1".to_string()),
            space_version: Some("space-1-v1".to_string()),
            space_mode: Some("PLAY".to_string()),
            ip_address: Some("10.0.0.7".to_string()),
            port: Some(port),
            state: Some(state.to_string()),
            gd_server_version: Some("4.3.0".to_string()),
        }
    }

    fn tracked_zone(store: &StateStore, uuid: &str) -> Zone {
        let mut zone = Zone::new(
            "zone",
            ZoneMode::Play,
            "space-1",
            Some("space-1-v1".to_string()),
            "4.2.1",
        );
        zone.uuid = Some(uuid.to_string());
        store.insert_zone(zone).unwrap()
    }

    fn setup(stale_after_secs: u64) -> (StateStore, Arc<InMemoryFleet>, Reconciler) {
        let store = StateStore::open_in_memory().unwrap();
        let fleet = Arc::new(InMemoryFleet::new());
        let reconciler = Reconciler::new(store.clone(), fleet.clone(), stale_after_secs);
        (store, fleet, reconciler)
    }

    #[tokio::test]
    async fn snapshot_replaces_store_contents() {
        let (store, fleet, reconciler) = setup(60);
        let (a, b, c) = (fleet_uuid('a'), fleet_uuid('b'), fleet_uuid('c'));
        let za = tracked_zone(&store, &a);
        let zb = tracked_zone(&store, &b);
        let zc = tracked_zone(&store, &c);
        fleet.insert(container(&a, "READY", 7001)).await;
        fleet.insert(container(&b, "BOOTING", 7002)).await;

        let report = reconciler.reconcile_once().await.unwrap();
        assert_eq!(report.updated, 2);
        assert_eq!(report.deleted, 1);
        assert_eq!(report.adopted, 0);

        let zones = store.list_zones().unwrap();
        assert_eq!(zones.len(), 2);
        assert!(store.get_zone(&zc.id).unwrap().is_none());

        let za = store.get_zone(&za.id).unwrap().unwrap();
        assert_eq!(za.state, ZoneState::Ready);
        assert_eq!(za.ip_address.as_deref(), Some("10.0.0.7"));
        assert_eq!(za.port, Some(7001));
        assert_eq!(za.url.as_deref(), Some("10.0.0.7:7001"));
        assert_eq!(za.gd_server_version, "4.3.0");
        assert!(za.container_last_refreshed.is_some());

        let zb = store.get_zone(&zb.id).unwrap().unwrap();
        assert_eq!(zb.state, ZoneState::Booting);
        assert!(zb.container_last_refreshed.is_some());
    }

    #[tokio::test]
    async fn invalid_records_are_skipped_individually() {
        let (store, fleet, reconciler) = setup(60);
        let a = fleet_uuid('a');
        let za = tracked_zone(&store, &a);
        fleet.insert(container(&a, "READY", 7001)).await;

        let mut no_version = container(&fleet_uuid('b'), "READY", 7002);
        no_version.space_version = None;
        fleet.insert(no_version).await;
        fleet.insert(container(&fleet_uuid('c'), "EXPLODED", 7003)).await;
        fleet.insert(container(&fleet_uuid('d'), "READY", 99_999)).await;
        fleet.insert(container("short", "READY", 7004)).await;

        let report = reconciler.reconcile_once().await.unwrap();
        assert_eq!(report.skipped, 4);
        assert_eq!(report.updated, 1);
        assert_eq!(store.get_zone(&za.id).unwrap().unwrap().state, ZoneState::Ready);
        assert_eq!(store.list_zones().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn untracked_containers_are_adopted() {
        let (store, fleet, reconciler) = setup(60);
        let a = fleet_uuid('a');
        fleet.insert(container(&a, "READY", 7001)).await;

        let report = reconciler.reconcile_once().await.unwrap();
        assert_eq!(report.adopted, 1);

        let zone = store.get_zone_by_uuid(&a).unwrap().unwrap();
        assert_eq!(zone.zone_mode, ZoneMode::Play);
        assert_eq!(zone.space_version.as_deref(), Some("space-1-v1"));
        assert_eq!(zone.state, ZoneState::Ready);
    }

    #[tokio::test]
    async fn second_build_container_is_not_adopted() {
        let (store, fleet, reconciler) = setup(60);
        let mut existing = Zone::new("b", ZoneMode::Build, "space-1", None, "4.2.1");
        existing.uuid = Some(fleet_uuid('a'));
        let existing = store.insert_zone(existing).unwrap();

        let mut first = container(&fleet_uuid('a'), "READY", 7001);
        first.space_mode = Some("BUILD".to_string());
        let mut rogue = container(&fleet_uuid('b'), "READY", 7002);
        rogue.space_mode = Some("BUILD".to_string());
        fleet.insert(first).await;
        fleet.insert(rogue).await;

        let report = reconciler.reconcile_once().await.unwrap();
        assert_eq!(report.updated, 1);
        assert_eq!(report.adopted, 0);
        assert_eq!(report.skipped, 1);
        assert_eq!(store.find_build_zone("space-1").unwrap().unwrap().id, existing.id);
    }

    #[tokio::test]
    async fn fresh_zones_survive_a_lagging_snapshot() {
        let (store, _fleet, reconciler) = setup(60);
        let mut zone = Zone::new("z", ZoneMode::Build, "space-1", None, "4.2.1");
        zone.uuid = Some(fleet_uuid('a'));
        zone.container_last_refreshed = Some(epoch_secs());
        let zone = store.insert_zone(zone).unwrap();

        let report = reconciler.reconcile_once().await.unwrap();
        assert_eq!(report.deleted, 0);
        assert!(store.get_zone(&zone.id).unwrap().is_some());
    }

    #[tokio::test]
    async fn fleet_outage_changes_nothing() {
        let (store, fleet, reconciler) = setup(0);
        let za = tracked_zone(&store, &fleet_uuid('a'));
        fleet
            .set_failure(Some(FleetError::ServiceUnavailable("down".into())))
            .await;

        let err = reconciler.reconcile_once().await.unwrap_err();
        assert!(matches!(err, ReconcileError::Fleet(_)));
        assert!(store.get_zone(&za.id).unwrap().is_some());
    }

    #[tokio::test]
    async fn overlapping_pass_is_skipped() {
        let (_store, _fleet, reconciler) = setup(60);
        let held = reconciler.running.lock().await;
        assert!(reconciler.try_run().await.is_none());
        drop(held);
        assert!(reconciler.try_run().await.is_some());
    }

    #[tokio::test]
    async fn state_changes_are_published() {
        let store = StateStore::open_in_memory().unwrap();
        let fleet = Arc::new(InMemoryFleet::new());
        let bus = Arc::new(BroadcastBus::new(16));
        let mut rx = bus.subscribe();
        let reconciler = Reconciler::new(store.clone(), fleet.clone(), 60).with_bus(bus);

        let a = fleet_uuid('a');
        let za = tracked_zone(&store, &a);
        fleet.insert(container(&a, "READY", 7001)).await;
        reconciler.reconcile_once().await.unwrap();

        assert_eq!(
            rx.try_recv().unwrap(),
            ZoneEvent::Updated {
                zone_id: za.id,
                space: "space-1".into(),
                state: ZoneState::Ready
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn run_stops_on_shutdown() {
        let (_store, _fleet, reconciler) = setup(60);
        let reconciler = Arc::new(reconciler);
        let (tx, rx) = watch::channel(false);

        let task = {
            let reconciler = reconciler.clone();
            tokio::spawn(async move { reconciler.run(Duration::from_secs(30), rx).await })
        };
        tokio::time::sleep(Duration::from_secs(95)).await;
        tx.send(true).unwrap();
        task.await.unwrap();
    }
}
