//! redb table definitions. Keys are `{app}:{time_ms:020}`.

use redb::TableDefinition;

/// Raw measurements, one row per app per scrape.
pub const MEASUREMENTS: TableDefinition<&str, &[u8]> = TableDefinition::new("measurements");

/// Measurements plus the executed delta, one row per app per scaling round.
pub const ACTIONS: TableDefinition<&str, &[u8]> = TableDefinition::new("actions");

/// Shape shared by both tables.
pub type RowTable = TableDefinition<'static, &'static str, &'static [u8]>;
