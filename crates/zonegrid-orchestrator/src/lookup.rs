//! Narrow view of the space service used by the orchestrator.

use zonegrid_state::{Space, SpaceRole, SpaceVersion, StateResult, StateStore};

/// Read-mostly access to spaces, versions, roles and recents.
///
/// The orchestrator depends on this trait rather than on the space service
/// itself; [`StateStore`] implements it over its local space mirror.
pub trait SpaceLookup: Send + Sync {
    fn space(&self, space_id: &str) -> StateResult<Option<Space>>;

    fn space_version(&self, space_version_id: &str) -> StateResult<Option<SpaceVersion>>;

    /// Remember that the user visited the space.
    fn record_recent(&self, user_id: &str, space_id: &str) -> StateResult<()>;

    /// Whether the user has at least observer standing on the space.
    fn has_observer_access(&self, space: &Space, user_id: &str) -> bool {
        space.has_role_at_least(user_id, SpaceRole::Observer)
    }
}

impl SpaceLookup for StateStore {
    fn space(&self, space_id: &str) -> StateResult<Option<Space>> {
        self.get_space(space_id)
    }

    fn space_version(&self, space_version_id: &str) -> StateResult<Option<SpaceVersion>> {
        self.get_space_version(space_version_id)
    }

    fn record_recent(&self, user_id: &str, space_id: &str) -> StateResult<()> {
        self.record_recent_space(user_id, space_id)
    }
}
