//! Capacity guard: admit or reject a user for a zone.

use zonegrid_state::{Space, Zone};

use crate::error::{ZoneError, ZoneResult};

/// Pure capacity decision. Atomicity comes from running it inside
/// [`StateStore::admit_user`](zonegrid_state::StateStore::admit_user).
pub struct CapacityGuard;

impl CapacityGuard {
    /// `true` while the zone holds fewer occupants than the space allows.
    pub fn admits(space: &Space, zone: &Zone) -> bool {
        (zone.occupancy() as u64) < u64::from(space.max_users)
    }

    /// Reject with `CapacityExceeded` iff `|users_present| >= max_users`.
    pub fn check(space: &Space, zone: &Zone) -> ZoneResult<()> {
        if Self::admits(space, zone) {
            Ok(())
        } else {
            Err(ZoneError::CapacityExceeded {
                zone_id: zone.id.clone(),
                occupancy: zone.occupancy(),
                max_users: space.max_users,
            })
        }
    }

    /// Reject before a container is started for a space that admits nobody.
    pub fn check_new_zone(space: &Space) -> ZoneResult<()> {
        if space.max_users > 0 {
            return Ok(());
        }
        Err(ZoneError::CapacityExceeded {
            zone_id: format!("(new in space {})", space.id),
            occupancy: 0,
            max_users: space.max_users,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use zonegrid_state::ZoneMode;

    fn space(max_users: u32) -> Space {
        Space {
            id: "space-1".to_string(),
            name: "Lobby".to_string(),
            owner: "alice".to_string(),
            max_users,
            active_space_version: None,
            public: true,
            members: HashMap::new(),
            pack_url: None,
            updated_at: 0,
        }
    }

    fn zone_with(users: &[&str]) -> Zone {
        let mut zone = Zone::new("z", ZoneMode::Build, "space-1", None, "4.2.1");
        zone.id = "zone-1".to_string();
        zone.users_present = users.iter().map(|u| u.to_string()).collect();
        zone
    }

    #[test]
    fn admits_below_limit() {
        assert!(CapacityGuard::check(&space(2), &zone_with(&["a"])).is_ok());
        assert!(CapacityGuard::check(&space(1), &zone_with(&[])).is_ok());
    }

    #[test]
    fn rejects_at_limit() {
        let err = CapacityGuard::check(&space(1), &zone_with(&["a"])).unwrap_err();
        assert!(matches!(
            err,
            ZoneError::CapacityExceeded { occupancy: 1, max_users: 1, .. }
        ));
        assert!(!CapacityGuard::admits(&space(2), &zone_with(&["a", "b", "c"])));
    }

    #[test]
    fn zero_capacity_admits_nobody() {
        assert!(!CapacityGuard::admits(&space(0), &zone_with(&[])));
        assert!(matches!(
            CapacityGuard::check_new_zone(&space(0)),
            Err(ZoneError::CapacityExceeded { occupancy: 0, max_users: 0, .. })
        ));
        assert!(CapacityGuard::check_new_zone(&space(1)).is_ok());
    }
}
