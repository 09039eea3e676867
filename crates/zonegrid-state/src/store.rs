//! StateStore: redb-backed zone persistence for ZoneGrid.
//!
//! Provides typed CRUD and filtered queries over zones, plus the space
//! mirror and user recents. Zone writes maintain the uuid, space and
//! BUILD-singleton indexes inside the same write transaction, so a unique
//! constraint violation aborts the whole write. The store supports both
//! on-disk and in-memory backends (the latter for testing).

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable, WriteTransaction};
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// Maximum number of recent spaces kept per user.
pub const RECENT_SPACES_LIMIT: usize = 20;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Outcome of an atomic admission attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum Admission {
    /// The user took a free slot.
    Joined(Zone),
    /// The user already held a slot; nothing changed.
    AlreadyPresent(Zone),
    /// The admission check refused the user; nothing changed.
    Rejected(Zone),
}

impl Admission {
    pub fn zone(&self) -> &Zone {
        match self {
            Admission::Joined(z) | Admission::AlreadyPresent(z) | Admission::Rejected(z) => z,
        }
    }
}

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(ZONES).map_err(map_err!(Table))?;
        txn.open_table(ZONE_UUIDS).map_err(map_err!(Table))?;
        txn.open_table(ZONE_SPACES).map_err(map_err!(Table))?;
        txn.open_table(BUILD_ZONES).map_err(map_err!(Table))?;
        txn.open_table(SPACES).map_err(map_err!(Table))?;
        txn.open_table(SPACE_VERSIONS).map_err(map_err!(Table))?;
        txn.open_table(RECENTS).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Zones: writes ──────────────────────────────────────────────

    /// Persist a new zone, assigning it a fresh id.
    ///
    /// Fails with [`StateError::Invalid`] if the mode/version invariant does
    /// not hold and with [`StateError::Conflict`] if the uuid is already
    /// tracked or the space already has a BUILD zone.
    pub fn insert_zone(&self, mut zone: Zone) -> StateResult<Zone> {
        let now = epoch_secs();
        zone.id = uuid::Uuid::new_v4().to_string();
        if zone.created_at == 0 {
            zone.created_at = now;
        }
        zone.updated_at = now;

        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        write_zone(&txn, &zone, None)?;
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(zone_id = %zone.id, space = %zone.space, mode = %zone.zone_mode, "zone inserted");
        Ok(zone)
    }

    /// Apply `f` to the zone with the given id inside one write transaction.
    ///
    /// Returns `None` if no such zone exists. The id cannot be changed by
    /// `f`; all invariants and unique indexes are re-checked before commit.
    pub fn update_zone<F, R>(&self, id: &str, f: F) -> StateResult<Option<(Zone, R)>>
    where
        F: FnOnce(&mut Zone) -> R,
    {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let Some(previous) = read_zone_in(&txn, id)? else {
            return Ok(None);
        };
        let mut zone = previous.clone();
        let out = f(&mut zone);
        zone.id = previous.id.clone();
        zone.updated_at = epoch_secs();
        write_zone(&txn, &zone, Some(&previous))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(Some((zone, out)))
    }

    /// Like [`update_zone`](Self::update_zone), addressing the zone by fleet uuid.
    pub fn update_zone_by_uuid<F, R>(&self, uuid: &str, f: F) -> StateResult<Option<(Zone, R)>>
    where
        F: FnOnce(&mut Zone) -> R,
    {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let Some(id) = zone_id_for_uuid_in(&txn, uuid)? else {
            return Ok(None);
        };
        let Some(previous) = read_zone_in(&txn, &id)? else {
            return Ok(None);
        };
        let mut zone = previous.clone();
        let out = f(&mut zone);
        zone.id = previous.id.clone();
        zone.updated_at = epoch_secs();
        write_zone(&txn, &zone, Some(&previous))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(Some((zone, out)))
    }

    /// Atomically add `user_id` to a zone's occupants if `admit` allows it.
    ///
    /// The read, the decision and the write happen in one write transaction,
    /// so concurrent admissions for the last free slot cannot both succeed.
    /// A user already present is never re-checked. Returns `None` if the zone
    /// does not exist.
    pub fn admit_user<F>(&self, zone_id: &str, user_id: &str, admit: F) -> StateResult<Option<Admission>>
    where
        F: FnOnce(&Zone) -> bool,
    {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let Some(previous) = read_zone_in(&txn, zone_id)? else {
            return Ok(None);
        };
        if previous.users_present.contains(user_id) {
            return Ok(Some(Admission::AlreadyPresent(previous)));
        }
        if !admit(&previous) {
            return Ok(Some(Admission::Rejected(previous)));
        }
        let mut zone = previous.clone();
        zone.users_present.insert(user_id.to_string());
        zone.updated_at = epoch_secs();
        write_zone(&txn, &zone, Some(&previous))?;
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%zone_id, %user_id, occupancy = zone.occupancy(), "user admitted");
        Ok(Some(Admission::Joined(zone)))
    }

    /// Delete a zone by id. Returns the removed record, if it existed.
    pub fn delete_zone(&self, id: &str) -> StateResult<Option<Zone>> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let removed = match read_zone_in(&txn, id)? {
            Some(zone) => {
                remove_zone_in(&txn, &zone)?;
                Some(zone)
            }
            None => None,
        };
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(zone_id = %id, existed = removed.is_some(), "zone deleted");
        Ok(removed)
    }

    /// Delete the zone tracking the given fleet uuid. Returns the removed record.
    pub fn delete_zone_by_uuid(&self, uuid: &str) -> StateResult<Option<Zone>> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let mut removed = None;
        if let Some(id) = zone_id_for_uuid_in(&txn, uuid)?
            && let Some(zone) = read_zone_in(&txn, &id)?
        {
            remove_zone_in(&txn, &zone)?;
            removed = Some(zone);
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%uuid, existed = removed.is_some(), "zone deleted by uuid");
        Ok(removed)
    }

    // ── Zones: reads ───────────────────────────────────────────────

    /// Get a zone by id.
    pub fn get_zone(&self, id: &str) -> StateResult<Option<Zone>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(ZONES).map_err(map_err!(Table))?;
        match table.get(id).map_err(map_err!(Read))? {
            Some(guard) => {
                let zone: Zone =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(zone))
            }
            None => Ok(None),
        }
    }

    /// Get a zone by its fleet-assigned uuid.
    pub fn get_zone_by_uuid(&self, uuid: &str) -> StateResult<Option<Zone>> {
        let id = {
            let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
            let table = txn.open_table(ZONE_UUIDS).map_err(map_err!(Table))?;
            table
                .get(uuid)
                .map_err(map_err!(Read))?
                .map(|guard| guard.value().to_string())
        };
        match id {
            Some(id) => self.get_zone(&id),
            None => Ok(None),
        }
    }

    /// List all zones.
    pub fn list_zones(&self) -> StateResult<Vec<Zone>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(ZONES).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let zone: Zone =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(zone);
        }
        Ok(results)
    }

    /// List all zones of a space (via the `zone_spaces` index).
    pub fn list_zones_for_space(&self, space: &str) -> StateResult<Vec<Zone>> {
        let ids: Vec<String> = {
            let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
            let table = txn.open_table(ZONE_SPACES).map_err(map_err!(Table))?;
            let mut ids = Vec::new();
            for entry in table.range((space, "")..).map_err(map_err!(Read))? {
                let (key, value) = entry.map_err(map_err!(Read))?;
                if key.value().0 != space {
                    break;
                }
                ids.push(value.value().to_string());
            }
            ids
        };
        let mut results = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(zone) = self.get_zone(&id)? {
                results.push(zone);
            }
        }
        Ok(results)
    }

    /// The single BUILD zone of a space, if any.
    pub fn find_build_zone(&self, space: &str) -> StateResult<Option<Zone>> {
        let id = {
            let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
            let table = txn.open_table(BUILD_ZONES).map_err(map_err!(Table))?;
            table
                .get(space)
                .map_err(map_err!(Read))?
                .map(|guard| guard.value().to_string())
        };
        match id {
            Some(id) => self.get_zone(&id),
            None => Ok(None),
        }
    }

    /// All PLAY zones bound to a space version, oldest first.
    pub fn list_play_zones_for_version(
        &self,
        space: &str,
        space_version: &str,
    ) -> StateResult<Vec<Zone>> {
        let mut zones: Vec<Zone> = self
            .list_zones_for_space(space)?
            .into_iter()
            .filter(|z| {
                z.zone_mode == ZoneMode::Play && z.space_version.as_deref() == Some(space_version)
            })
            .collect();
        zones.sort_by_key(|z| z.created_at);
        Ok(zones)
    }

    /// Zones whose last reconciliation touch is unset or at least
    /// `stale_after_secs` older than `now`.
    pub fn list_stale_zones(&self, now: u64, stale_after_secs: u64) -> StateResult<Vec<Zone>> {
        Ok(self
            .list_zones()?
            .into_iter()
            .filter(|z| {
                z.container_last_refreshed
                    .is_none_or(|t| now.saturating_sub(t) >= stale_after_secs)
            })
            .collect())
    }

    // ── Space mirror ───────────────────────────────────────────────

    /// Insert or update a mirrored space.
    pub fn put_space(&self, space: &Space) -> StateResult<()> {
        let value = serde_json::to_vec(space).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(SPACES).map_err(map_err!(Table))?;
            table
                .insert(space.id.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(space_id = %space.id, "space stored");
        Ok(())
    }

    /// Get a mirrored space by id.
    pub fn get_space(&self, id: &str) -> StateResult<Option<Space>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(SPACES).map_err(map_err!(Table))?;
        match table.get(id).map_err(map_err!(Read))? {
            Some(guard) => {
                let space: Space =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(space))
            }
            None => Ok(None),
        }
    }

    /// Insert or update a mirrored space version.
    pub fn put_space_version(&self, version: &SpaceVersion) -> StateResult<()> {
        let value = serde_json::to_vec(version).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(SPACE_VERSIONS).map_err(map_err!(Table))?;
            table
                .insert(version.id.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Get a mirrored space version by id.
    pub fn get_space_version(&self, id: &str) -> StateResult<Option<SpaceVersion>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(SPACE_VERSIONS).map_err(map_err!(Table))?;
        match table.get(id).map_err(map_err!(Read))? {
            Some(guard) => {
                let version: SpaceVersion =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(version))
            }
            None => Ok(None),
        }
    }

    // ── Recents ────────────────────────────────────────────────────

    /// Move `space_id` to the front of the user's recent spaces.
    pub fn record_recent_space(&self, user_id: &str, space_id: &str) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(RECENTS).map_err(map_err!(Table))?;
            let mut recents: Vec<String> = match table.get(user_id).map_err(map_err!(Read))? {
                Some(guard) => {
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?
                }
                None => Vec::new(),
            };
            recents.retain(|s| s != space_id);
            recents.insert(0, space_id.to_string());
            recents.truncate(RECENT_SPACES_LIMIT);
            let value = serde_json::to_vec(&recents).map_err(map_err!(Serialize))?;
            table
                .insert(user_id, value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// The user's recent spaces, most recent first.
    pub fn recent_spaces(&self, user_id: &str) -> StateResult<Vec<String>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(RECENTS).map_err(map_err!(Table))?;
        match table.get(user_id).map_err(map_err!(Read))? {
            Some(guard) => serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize)),
            None => Ok(Vec::new()),
        }
    }
}

// ── Transaction helpers ────────────────────────────────────────────

fn read_zone_in(txn: &WriteTransaction, id: &str) -> StateResult<Option<Zone>> {
    let table = txn.open_table(ZONES).map_err(map_err!(Table))?;
    let bytes = table
        .get(id)
        .map_err(map_err!(Read))?
        .map(|guard| guard.value().to_vec());
    match bytes {
        Some(bytes) => Ok(Some(
            serde_json::from_slice(&bytes).map_err(map_err!(Deserialize))?,
        )),
        None => Ok(None),
    }
}

fn zone_id_for_uuid_in(txn: &WriteTransaction, uuid: &str) -> StateResult<Option<String>> {
    let table = txn.open_table(ZONE_UUIDS).map_err(map_err!(Table))?;
    let id = table
        .get(uuid)
        .map_err(map_err!(Read))?
        .map(|guard| guard.value().to_string());
    Ok(id)
}

/// Write a zone and its index entries. `previous` is the stored version of
/// the same zone, used to drop index entries that no longer apply.
fn write_zone(txn: &WriteTransaction, zone: &Zone, previous: Option<&Zone>) -> StateResult<()> {
    zone.validate().map_err(StateError::Invalid)?;
    let value = serde_json::to_vec(zone).map_err(map_err!(Serialize))?;

    {
        let mut uuids = txn.open_table(ZONE_UUIDS).map_err(map_err!(Table))?;
        if let Some(old) = previous.and_then(|p| p.uuid.as_deref())
            && zone.uuid.as_deref() != Some(old)
        {
            uuids.remove(old).map_err(map_err!(Write))?;
        }
        if let Some(uuid) = zone.uuid.as_deref() {
            let holder = uuids
                .get(uuid)
                .map_err(map_err!(Read))?
                .map(|guard| guard.value().to_string());
            if let Some(holder) = holder
                && holder != zone.id
            {
                return Err(StateError::Conflict(format!(
                    "uuid {uuid} is already tracked by zone {holder}"
                )));
            }
            uuids
                .insert(uuid, zone.id.as_str())
                .map_err(map_err!(Write))?;
        }
    }

    {
        let mut builds = txn.open_table(BUILD_ZONES).map_err(map_err!(Table))?;
        if let Some(prev) = previous
            && prev.zone_mode == ZoneMode::Build
            && (zone.zone_mode != ZoneMode::Build || zone.space != prev.space)
        {
            builds.remove(prev.space.as_str()).map_err(map_err!(Write))?;
        }
        if zone.zone_mode == ZoneMode::Build {
            let holder = builds
                .get(zone.space.as_str())
                .map_err(map_err!(Read))?
                .map(|guard| guard.value().to_string());
            if let Some(holder) = holder
                && holder != zone.id
            {
                return Err(StateError::Conflict(format!(
                    "space {} already has BUILD zone {holder}",
                    zone.space
                )));
            }
            builds
                .insert(zone.space.as_str(), zone.id.as_str())
                .map_err(map_err!(Write))?;
        }
    }

    {
        let mut spaces = txn.open_table(ZONE_SPACES).map_err(map_err!(Table))?;
        if let Some(prev) = previous
            && prev.space != zone.space
        {
            spaces
                .remove(prev.space_key())
                .map_err(map_err!(Write))?;
        }
        spaces
            .insert(zone.space_key(), zone.id.as_str())
            .map_err(map_err!(Write))?;
    }

    let mut table = txn.open_table(ZONES).map_err(map_err!(Table))?;
    table
        .insert(zone.id.as_str(), value.as_slice())
        .map_err(map_err!(Write))?;
    Ok(())
}

fn remove_zone_in(txn: &WriteTransaction, zone: &Zone) -> StateResult<()> {
    if let Some(uuid) = zone.uuid.as_deref() {
        let mut uuids = txn.open_table(ZONE_UUIDS).map_err(map_err!(Table))?;
        uuids.remove(uuid).map_err(map_err!(Write))?;
    }
    if zone.zone_mode == ZoneMode::Build {
        let mut builds = txn.open_table(BUILD_ZONES).map_err(map_err!(Table))?;
        let holder = builds
            .get(zone.space.as_str())
            .map_err(map_err!(Read))?
            .map(|guard| guard.value().to_string());
        if holder.as_deref() == Some(zone.id.as_str()) {
            builds.remove(zone.space.as_str()).map_err(map_err!(Write))?;
        }
    }
    {
        let mut spaces = txn.open_table(ZONE_SPACES).map_err(map_err!(Table))?;
        spaces
            .remove(zone.space_key())
            .map_err(map_err!(Write))?;
    }
    let mut table = txn.open_table(ZONES).map_err(map_err!(Table))?;
    table.remove(zone.id.as_str()).map_err(map_err!(Write))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn build_zone(space: &str, uuid: &str) -> Zone {
        let mut zone = Zone::new(format!("{space} build"), ZoneMode::Build, space, None, "4.2.1");
        zone.uuid = Some(uuid.to_string());
        zone
    }

    fn play_zone(space: &str, version: &str, uuid: &str) -> Zone {
        let mut zone = Zone::new(
            format!("{space} play"),
            ZoneMode::Play,
            space,
            Some(version.to_string()),
            "4.2.1",
        );
        zone.uuid = Some(uuid.to_string());
        zone
    }

    fn test_space(id: &str, max_users: u32) -> Space {
        Space {
            id: id.to_string(),
            name: format!("Space {id}"),
            owner: "owner-1".to_string(),
            max_users,
            active_space_version: Some(format!("{id}-v1")),
            public: true,
            members: HashMap::new(),
            pack_url: None,
            updated_at: 1000,
        }
    }

    // ── Zone CRUD ──────────────────────────────────────────────────

    #[test]
    fn zone_insert_assigns_id_and_get() {
        let store = StateStore::open_in_memory().unwrap();
        let zone = store.insert_zone(build_zone("space-1", "uuid-a")).unwrap();

        assert!(!zone.id.is_empty());
        assert!(zone.created_at > 0);
        assert_eq!(store.get_zone(&zone.id).unwrap(), Some(zone.clone()));
        assert_eq!(store.get_zone_by_uuid("uuid-a").unwrap(), Some(zone));
    }

    #[test]
    fn zone_get_nonexistent_returns_none() {
        let store = StateStore::open_in_memory().unwrap();
        assert!(store.get_zone("nope").unwrap().is_none());
        assert!(store.get_zone_by_uuid("nope").unwrap().is_none());
        assert!(store.find_build_zone("nope").unwrap().is_none());
    }

    #[test]
    fn play_zone_without_version_is_rejected() {
        let store = StateStore::open_in_memory().unwrap();
        let zone = Zone::new("p", ZoneMode::Play, "space-1", None, "4.2.1");
        let err = store.insert_zone(zone).unwrap_err();
        assert!(matches!(err, StateError::Invalid(_)));
        assert!(store.list_zones().unwrap().is_empty());
    }

    #[test]
    fn build_zone_with_version_is_rejected() {
        let store = StateStore::open_in_memory().unwrap();
        let zone = Zone::new("b", ZoneMode::Build, "space-1", Some("v1".into()), "4.2.1");
        assert!(matches!(store.insert_zone(zone), Err(StateError::Invalid(_))));
    }

    #[test]
    fn update_cannot_break_version_invariant() {
        let store = StateStore::open_in_memory().unwrap();
        let zone = store.insert_zone(play_zone("space-1", "v1", "uuid-a")).unwrap();

        let result = store.update_zone(&zone.id, |z| z.space_version = None);
        assert!(matches!(result, Err(StateError::Invalid(_))));

        let stored = store.get_zone(&zone.id).unwrap().unwrap();
        assert_eq!(stored.space_version.as_deref(), Some("v1"));
    }

    #[test]
    fn second_build_zone_for_space_conflicts() {
        let store = StateStore::open_in_memory().unwrap();
        let first = store.insert_zone(build_zone("space-1", "uuid-a")).unwrap();

        let err = store.insert_zone(build_zone("space-1", "uuid-b")).unwrap_err();
        assert!(matches!(err, StateError::Conflict(_)));

        // The losing write left nothing behind.
        assert_eq!(store.list_zones().unwrap().len(), 1);
        assert!(store.get_zone_by_uuid("uuid-b").unwrap().is_none());
        assert_eq!(store.find_build_zone("space-1").unwrap().unwrap().id, first.id);

        // Another space is unaffected.
        store.insert_zone(build_zone("space-2", "uuid-c")).unwrap();
    }

    #[test]
    fn build_slot_frees_after_delete() {
        let store = StateStore::open_in_memory().unwrap();
        let first = store.insert_zone(build_zone("space-1", "uuid-a")).unwrap();
        store.delete_zone(&first.id).unwrap();

        let second = store.insert_zone(build_zone("space-1", "uuid-b")).unwrap();
        assert_eq!(store.find_build_zone("space-1").unwrap().unwrap().id, second.id);
    }

    #[test]
    fn duplicate_uuid_conflicts() {
        let store = StateStore::open_in_memory().unwrap();
        store.insert_zone(play_zone("space-1", "v1", "uuid-a")).unwrap();
        let err = store.insert_zone(play_zone("space-2", "v9", "uuid-a")).unwrap_err();
        assert!(matches!(err, StateError::Conflict(_)));
    }

    #[test]
    fn play_zones_are_unbounded_per_space() {
        let store = StateStore::open_in_memory().unwrap();
        store.insert_zone(play_zone("space-1", "v1", "uuid-a")).unwrap();
        store.insert_zone(play_zone("space-1", "v1", "uuid-b")).unwrap();
        store.insert_zone(play_zone("space-1", "v2", "uuid-c")).unwrap();
        store.insert_zone(build_zone("space-1", "uuid-d")).unwrap();
        store.insert_zone(play_zone("space-10", "v1", "uuid-e")).unwrap();

        assert_eq!(store.list_zones_for_space("space-1").unwrap().len(), 4);
        assert_eq!(store.list_play_zones_for_version("space-1", "v1").unwrap().len(), 2);
        assert_eq!(store.list_play_zones_for_version("space-1", "v2").unwrap().len(), 1);
        assert_eq!(store.list_zones_for_space("space-10").unwrap().len(), 1);
    }

    #[test]
    fn space_listing_ignores_ids_sharing_a_prefix() {
        let store = StateStore::open_in_memory().unwrap();
        store.insert_zone(build_zone("a:b", "uuid-a")).unwrap();
        store.insert_zone(play_zone("a:b", "v1", "uuid-b")).unwrap();

        assert!(store.list_zones_for_space("a").unwrap().is_empty());
        assert!(store.list_zones_for_space("a:").unwrap().is_empty());
        assert_eq!(store.list_zones_for_space("a:b").unwrap().len(), 2);

        let a = store.insert_zone(build_zone("a", "uuid-c")).unwrap();
        let listed = store.list_zones_for_space("a").unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, a.id);

        store.delete_zone(&a.id).unwrap();
        assert_eq!(store.list_zones_for_space("a:b").unwrap().len(), 2);
    }

    #[test]
    fn update_by_uuid_and_reindex_uuid() {
        let store = StateStore::open_in_memory().unwrap();
        let zone = store.insert_zone(play_zone("space-1", "v1", "uuid-a")).unwrap();

        let (updated, ()) = store
            .update_zone_by_uuid("uuid-a", |z| {
                z.state = ZoneState::Ready;
                z.uuid = Some("uuid-b".to_string());
            })
            .unwrap()
            .unwrap();
        assert_eq!(updated.id, zone.id);
        assert_eq!(updated.state, ZoneState::Ready);

        assert!(store.get_zone_by_uuid("uuid-a").unwrap().is_none());
        assert_eq!(store.get_zone_by_uuid("uuid-b").unwrap().unwrap().id, zone.id);
        assert!(store.update_zone_by_uuid("uuid-a", |_| ()).unwrap().is_none());
    }

    #[test]
    fn delete_by_uuid_is_idempotent() {
        let store = StateStore::open_in_memory().unwrap();
        let zone = store.insert_zone(build_zone("space-1", "uuid-a")).unwrap();

        let removed = store.delete_zone_by_uuid("uuid-a").unwrap();
        assert_eq!(removed.map(|z| z.id), Some(zone.id.clone()));
        assert!(store.delete_zone_by_uuid("uuid-a").unwrap().is_none());
        assert!(store.delete_zone(&zone.id).unwrap().is_none());
        assert!(store.list_zones_for_space("space-1").unwrap().is_empty());
    }

    // ── Admission ──────────────────────────────────────────────────

    #[test]
    fn admit_user_respects_check_and_is_idempotent() {
        let store = StateStore::open_in_memory().unwrap();
        let zone = store.insert_zone(build_zone("space-1", "uuid-a")).unwrap();
        let max = 1;

        let first = store
            .admit_user(&zone.id, "alice", |z| z.occupancy() < max)
            .unwrap()
            .unwrap();
        assert!(matches!(first, Admission::Joined(_)));

        let again = store
            .admit_user(&zone.id, "alice", |z| z.occupancy() < max)
            .unwrap()
            .unwrap();
        assert!(matches!(again, Admission::AlreadyPresent(_)));

        let bob = store
            .admit_user(&zone.id, "bob", |z| z.occupancy() < max)
            .unwrap()
            .unwrap();
        assert!(matches!(bob, Admission::Rejected(_)));
        assert_eq!(bob.zone().occupancy(), 1);

        assert!(store.admit_user("missing", "bob", |_| true).unwrap().is_none());
    }

    // ── Staleness ──────────────────────────────────────────────────

    #[test]
    fn stale_zones_include_unrefreshed() {
        let store = StateStore::open_in_memory().unwrap();
        let mut fresh = build_zone("space-1", "uuid-a");
        fresh.container_last_refreshed = Some(1_000);
        let mut old = build_zone("space-2", "uuid-b");
        old.container_last_refreshed = Some(500);
        let never = build_zone("space-3", "uuid-c");
        store.insert_zone(fresh).unwrap();
        store.insert_zone(old).unwrap();
        store.insert_zone(never).unwrap();

        let stale = store.list_stale_zones(1_010, 60).unwrap();
        let mut spaces: Vec<_> = stale.iter().map(|z| z.space.as_str()).collect();
        spaces.sort();
        assert_eq!(spaces, vec!["space-2", "space-3"]);

        assert_eq!(store.list_stale_zones(1_010, 0).unwrap().len(), 3);
    }

    // ── Space mirror & recents ─────────────────────────────────────

    #[test]
    fn space_and_version_round_trip() {
        let store = StateStore::open_in_memory().unwrap();
        let space = test_space("space-1", 4);
        store.put_space(&space).unwrap();
        assert_eq!(store.get_space("space-1").unwrap(), Some(space));

        let version = SpaceVersion {
            id: "space-1-v1".to_string(),
            space: "space-1".to_string(),
            name: "first".to_string(),
            pack_url: "https://cdn.example/space-1-v1.pck".to_string(),
            created_at: 1000,
        };
        store.put_space_version(&version).unwrap();
        assert_eq!(store.get_space_version("space-1-v1").unwrap(), Some(version));
        assert!(store.get_space_version("nope").unwrap().is_none());
    }

    #[test]
    fn recents_are_deduplicated_and_capped() {
        let store = StateStore::open_in_memory().unwrap();
        store.record_recent_space("alice", "a").unwrap();
        store.record_recent_space("alice", "b").unwrap();
        store.record_recent_space("alice", "a").unwrap();
        assert_eq!(store.recent_spaces("alice").unwrap(), vec!["a", "b"]);

        for i in 0..30 {
            store.record_recent_space("bob", &format!("s{i}")).unwrap();
        }
        let recents = store.recent_spaces("bob").unwrap();
        assert_eq!(recents.len(), RECENT_SPACES_LIMIT);
        assert_eq!(recents[0], "s29");
        assert!(store.recent_spaces("carol").unwrap().is_empty());
    }

    // ── Persistence (on-disk) ──────────────────────────────────────

    #[test]
    fn persistence_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("test.redb");

        let id = {
            let store = StateStore::open(&db_path).unwrap();
            store.insert_zone(build_zone("space-1", "uuid-a")).unwrap().id
        };

        // Reopen the same database file; indexes survive too.
        let store = StateStore::open(&db_path).unwrap();
        assert_eq!(store.get_zone(&id).unwrap().unwrap().space, "space-1");
        assert_eq!(store.find_build_zone("space-1").unwrap().unwrap().id, id);
    }
}
