//! zonegrid-reconcile: periodic correction of zone records against the
//! authoritative fleet snapshot.
//!
//! # Pass
//!
//! ```text
//! stale    = zones with container_last_refreshed unset or older than stale_after
//! snapshot = fleet.list_all()
//!
//! for container in snapshot:
//!     invalid           -> skip, warn
//!     tracked by uuid   -> copy state/ip/port/url/version, refreshed = now
//!     untracked         -> adopt as a new zone (skipped on BUILD conflict)
//!
//! for zone in stale:
//!     uuid not in snapshot -> delete record
//! ```
//!
//! A failed fleet listing aborts the pass before anything is written, so an
//! outage never wipes the store. Passes are single-flight: a tick that fires
//! while the previous pass still runs is skipped.

pub mod reconciler;

pub use reconciler::{ReconcileError, ReconcileReport, Reconciler};
