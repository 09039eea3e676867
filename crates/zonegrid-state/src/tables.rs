//! redb table definitions for the ZoneGrid state store.
//!
//! Tables use `&str` keys and `&[u8]` values (JSON-serialized domain types
//! or raw ids for index tables). The space index uses a tuple key so that a
//! scan over one space never spills into another.

use redb::TableDefinition;

/// Zone records keyed by store-assigned `{zone_id}`.
pub const ZONES: TableDefinition<&str, &[u8]> = TableDefinition::new("zones");

/// Unique index: fleet `{uuid}` → zone id.
pub const ZONE_UUIDS: TableDefinition<&str, &str> = TableDefinition::new("zone_uuids");

/// Secondary index keyed by `({space}, {zone_id})` → zone id.
pub const ZONE_SPACES: TableDefinition<(&str, &str), &str> = TableDefinition::new("zone_spaces");

/// Unique index: `{space}` → id of its single BUILD zone.
pub const BUILD_ZONES: TableDefinition<&str, &str> = TableDefinition::new("build_zones");

/// Space mirror keyed by `{space_id}`.
pub const SPACES: TableDefinition<&str, &[u8]> = TableDefinition::new("spaces");

/// Space version mirror keyed by `{space_version_id}`.
pub const SPACE_VERSIONS: TableDefinition<&str, &[u8]> = TableDefinition::new("space_versions");

/// Recently visited spaces keyed by `{user_id}`.
pub const RECENTS: TableDefinition<&str, &[u8]> = TableDefinition::new("recents");
