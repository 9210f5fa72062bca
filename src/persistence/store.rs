// store.rs - SQLite persistence implementation
//
// Provides SnapshotStore for managing account snapshots with:
// - WAL mode for concurrent reads
// - NORMAL synchronous mode for performance
// - One table per data user, created on demand

use anyhow::{anyhow, bail, Context, Result};
use chrono::NaiveDate;
use rusqlite::types::Type;
use rusqlite::{params, Connection, Row};
use std::path::Path;

use crate::models::AccountSnapshot;

const DATE_FORMAT: &str = "%Y-%m-%d";

const SNAPSHOT_COLUMNS: &str = "date_world, collateral, strategy, total_pnl, deposit, withdrawal, \
                                btc_pnl, eth_pnl, user_id, pos_size";

/// SnapshotStore manages the SQLite connection holding every user's snapshot table
///
/// Each row is keyed by (date_world, strategy); the unique index on that pair
/// backs the one-row-per-day invariant.
pub struct SnapshotStore {
    pub(crate) conn: Connection,
}

impl SnapshotStore {
    /// Open (or create) the database at `db_path`
    ///
    /// # Arguments
    /// * `db_path` - Path to SQLite database file
    ///
    /// # Returns
    /// * `Result<SnapshotStore>` - Opened store or error
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = Connection::open(db_path.as_ref())
            .context("Failed to open SQLite database")?;

        // WAL mode: enables concurrent reads during writes
        // NORMAL synchronous: balance between safety and performance
        conn.execute_batch(
            "PRAGMA journal_mode=WAL;
             PRAGMA synchronous=NORMAL;"
        ).context("Failed to configure database settings")?;

        Ok(SnapshotStore { conn })
    }

    /// Create the snapshot table (and its unique index) if missing
    pub fn ensure_table(&self, table: &str) -> Result<()> {
        validate_table_name(table)?;
        let schema_sql = include_str!("schema.sql").replace("{table}", table);
        self.conn
            .execute_batch(&schema_sql)
            .with_context(|| format!("Failed to initialize table {}", table))?;
        Ok(())
    }

    /// Get current journal mode (for testing)
    pub fn get_journal_mode(&self) -> Result<String> {
        let mode: String = self.conn
            .query_row("PRAGMA journal_mode", [], |row| row.get(0))
            .context("Failed to query journal_mode")?;
        Ok(mode)
    }

    /// Check if a table exists
    pub fn table_exists(&self, table_name: &str) -> Result<bool> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?1",
            params![table_name],
            |row| row.get(0),
        ).context("Failed to check table existence")?;
        Ok(count > 0)
    }

    /// Get column names for a table (for testing)
    pub fn get_table_columns(&self, table_name: &str) -> Result<Vec<String>> {
        validate_table_name(table_name)?;
        let mut stmt = self.conn
            .prepare(&format!("PRAGMA table_info(\"{}\")", table_name))
            .context("Failed to prepare table_info query")?;

        let columns = stmt
            .query_map([], |row| row.get::<_, String>(1))
            .context("Failed to query columns")?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("Failed to collect columns")?;

        Ok(columns)
    }

    /// Number of snapshots in a user's table
    pub fn snapshot_count(&self, table: &str) -> Result<i64> {
        self.ensure_table(table)?;
        let count: i64 = self.conn
            .query_row(&format!("SELECT COUNT(*) FROM \"{}\"", table), [], |row| row.get(0))
            .context("Failed to query snapshot count")?;
        Ok(count)
    }

    /// True if a row for (date, strategy) is already stored
    pub fn snapshot_exists(&self, table: &str, date: NaiveDate, strategy: &str) -> Result<bool> {
        self.ensure_table(table)?;
        let count: i64 = self.conn.query_row(
            &format!(
                "SELECT COUNT(*) FROM \"{}\" WHERE substr(date_world, 1, 10) = ?1 AND strategy = ?2",
                table
            ),
            params![date.format(DATE_FORMAT).to_string(), strategy],
            |row| row.get(0),
        ).context("Failed to check for existing snapshot")?;
        Ok(count > 0)
    }

    /// Insert a snapshot; fails if (date, strategy) already exists
    pub fn insert_snapshot(&self, table: &str, snapshot: &AccountSnapshot) -> Result<()> {
        self.ensure_table(table)?;
        insert_row(&self.conn, table, snapshot).context("Failed to insert snapshot")?;
        Ok(())
    }

    /// Replace the snapshot for (date, strategy): delete then insert
    ///
    /// Both statements run in one transaction so a failed insert leaves the
    /// previous row in place. Whoever writes last wins. The delete compares
    /// only the date part so legacy rows with a time suffix are replaced too.
    pub fn upsert_snapshot(&self, table: &str, snapshot: &AccountSnapshot) -> Result<()> {
        self.ensure_table(table)?;
        if snapshot.strategy.trim().is_empty() {
            bail!("Missing strategy for insertion");
        }

        let tx = self.conn
            .unchecked_transaction()
            .context("Failed to begin upsert transaction")?;

        tx.execute(
            &format!(
                "DELETE FROM \"{}\" WHERE substr(date_world, 1, 10) = ?1 AND strategy = ?2",
                table
            ),
            params![snapshot.date.format(DATE_FORMAT).to_string(), &snapshot.strategy],
        ).context("Failed to delete existing snapshot")?;

        insert_row(&tx, table, snapshot).context("Failed to insert snapshot")?;

        tx.commit().context("Failed to commit upsert")?;
        Ok(())
    }

    /// All snapshots of a user's table, ordered by date then strategy
    pub fn fetch_all(&self, table: &str) -> Result<Vec<AccountSnapshot>> {
        self.ensure_table(table)?;
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM \"{}\" ORDER BY date_world ASC, strategy ASC",
            SNAPSHOT_COLUMNS, table
        )).context("Failed to prepare fetch_all query")?;

        let rows = stmt
            .query_map([], snapshot_from_row)
            .context("Failed to execute fetch_all query")?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("Failed to collect snapshots")?;

        Ok(rows)
    }

    /// The most recent snapshot of a user's table, if any
    pub fn latest(&self, table: &str) -> Result<Option<AccountSnapshot>> {
        self.ensure_table(table)?;
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM \"{}\" ORDER BY date_world DESC, id DESC LIMIT 1",
            SNAPSHOT_COLUMNS, table
        )).context("Failed to prepare latest query")?;

        let mut rows = stmt
            .query_map([], snapshot_from_row)
            .context("Failed to execute latest query")?;

        match rows.next() {
            Some(row) => Ok(Some(row.context("Failed to read latest snapshot")?)),
            None => Ok(None),
        }
    }

    /// Distinct strategy names of a user's table, sorted
    pub fn strategies(&self, table: &str) -> Result<Vec<String>> {
        self.ensure_table(table)?;
        let mut stmt = self.conn
            .prepare(&format!("SELECT DISTINCT strategy FROM \"{}\" ORDER BY strategy", table))
            .context("Failed to prepare strategies query")?;

        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .context("Failed to query strategies")?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("Failed to collect strategies")?;

        Ok(names)
    }

    /// Snapshots of several users combined, each tagged with its user key
    ///
    /// # Arguments
    /// * `users` - (user key, table name) pairs
    pub fn fetch_all_users(&self, users: &[(&str, &str)]) -> Result<Vec<(String, AccountSnapshot)>> {
        let mut combined = Vec::new();
        for (user, table) in users {
            let rows = self.fetch_all(table)
                .with_context(|| format!("Failed to fetch data for {}", user))?;
            combined.extend(rows.into_iter().map(|r| (user.to_string(), r)));
        }
        Ok(combined)
    }
}

/// Table names are interpolated into SQL, so only `[A-Za-z0-9_]` is allowed
pub fn validate_table_name(table: &str) -> Result<()> {
    if table.is_empty() || table.len() > 64 {
        bail!("Table name must be 1-64 characters (found {})", table.len());
    }
    if !table.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(anyhow!(
            "Table name '{}' contains invalid characters. Use letters, digits and underscores.",
            table
        ));
    }
    Ok(())
}

fn insert_row(conn: &Connection, table: &str, s: &AccountSnapshot) -> rusqlite::Result<usize> {
    conn.execute(
        &format!(
            "INSERT INTO \"{}\" ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            table, SNAPSHOT_COLUMNS
        ),
        params![
            s.date.format(DATE_FORMAT).to_string(),
            s.collateral,
            &s.strategy,
            s.total_pnl,
            s.deposit,
            s.withdrawal,
            s.btc_pnl,
            s.eth_pnl,
            &s.user_id,
            s.pos_size,
        ],
    )
}

fn snapshot_from_row(row: &Row<'_>) -> rusqlite::Result<AccountSnapshot> {
    let raw_date: String = row.get(0)?;
    // Legacy rows may carry a time part ("2024-01-05 00:00:00")
    let date_part = raw_date.get(..10).unwrap_or(raw_date.as_str());
    let date = NaiveDate::parse_from_str(date_part, DATE_FORMAT)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, Type::Text, Box::new(e)))?;

    Ok(AccountSnapshot {
        date,
        collateral: row.get::<_, Option<f64>>(1)?.unwrap_or(0.0),
        strategy: row.get(2)?,
        total_pnl: row.get::<_, Option<f64>>(3)?.unwrap_or(0.0),
        deposit: row.get::<_, Option<f64>>(4)?.unwrap_or(0.0),
        withdrawal: row.get::<_, Option<f64>>(5)?.unwrap_or(0.0),
        btc_pnl: row.get::<_, Option<f64>>(6)?.unwrap_or(0.0),
        eth_pnl: row.get::<_, Option<f64>>(7)?.unwrap_or(0.0),
        user_id: row.get::<_, Option<String>>(8)?.unwrap_or_default(),
        pos_size: row.get::<_, Option<f64>>(9)?.unwrap_or(0.0),
    })
}
