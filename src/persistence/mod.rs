// Persistence module for SQLite snapshot storage
//
// Every data user owns one table of daily snapshots keyed by (date_world, strategy).
// Writes go through delete-then-insert so re-running a day replaces that day's row.

mod store;

pub use store::{validate_table_name, SnapshotStore};
