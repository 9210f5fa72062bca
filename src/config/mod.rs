/// User configuration management
/// Handles resolving per-user tables, ids and exchange credentials

pub mod users;
