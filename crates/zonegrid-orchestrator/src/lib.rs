//! zonegrid-orchestrator: zone lifecycle for ZoneGrid.
//!
//! Decides when a user joins an existing zone and when a new fleet container
//! must be started for them:
//!
//! - **BUILD**: one zone per space, created on first join, shared afterwards.
//! - **PLAY**: any number of zones per space version; joins fill the oldest
//!   zone with room first.
//!
//! Capacity is enforced atomically by the store. Idle servers are torn down
//! from their own status reports ([`heartbeat`]). Fleet-side drift is
//! corrected separately by `zonegrid-reconcile`.

pub mod capacity;
pub mod error;
pub mod heartbeat;
pub mod locks;
pub mod lookup;
pub mod notify;
pub mod orchestrator;

pub use capacity::CapacityGuard;
pub use error::{ZoneError, ZoneResult};
pub use heartbeat::{MIN_FLEET_UUID_LEN, ServerStatus, StatusOutcome};
pub use lookup::SpaceLookup;
pub use notify::{BroadcastBus, NotificationBus, ZoneEvent};
pub use orchestrator::{
    CreateZoneRequest, LaunchProfile, StopAllReport, TeardownOutcome, ZoneOrchestrator,
};
