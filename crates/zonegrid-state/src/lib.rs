//! zonegrid-state: embedded zone store for ZoneGrid.
//!
//! Backed by [redb](https://docs.rs/redb), holds the locally cached mirror of
//! fleet-backed Zones plus the read-mostly Space data the orchestrator needs
//! (capacity, active version, access roles) and per-user recent spaces.
//!
//! # Architecture
//!
//! All domain types are JSON-serialized into redb's `&[u8]` value columns.
//! Zones are keyed by their store-assigned id; three index tables are kept in
//! the same write transaction as the record itself:
//!
//! ```text
//! zones          {zone_id}          → Zone
//! zone_uuids     {uuid}             → zone_id   (unique)
//! zone_spaces    {space}:{zone_id}  → zone_id   (prefix scan)
//! build_zones    {space}            → zone_id   (unique: one BUILD zone per space)
//! ```
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and can be shared across async tasks.

pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use store::{Admission, StateStore};
pub use types::*;
