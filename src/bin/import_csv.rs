// import_csv.rs - Import historical balance snapshots from CSV into SQLite
//
// Columns are matched by header name. `date_world` (or `date`), `strategy`
// and `collateral` are required; total_pnl, deposit, withdrawal, btc_pnl,
// eth_pnl, pos_size and user_id are optional and default to 0 / empty.
// The output of `account_history --format csv` imports as-is.

use anyhow::{anyhow, bail, Context, Result};
use chrono::NaiveDate;
use clap::Parser;
use dotenvy::dotenv;
use std::path::{Path, PathBuf};

use account_dashboard::models::AccountSnapshot;
use account_dashboard::persistence::SnapshotStore;
use account_dashboard::settings::Config;

#[derive(Parser, Debug)]
#[command(name = "import_csv")]
#[command(about = "Import historical balance snapshots from CSV into SQLite database")]
struct Args {
    /// Path to CSV file to import
    csv_file: PathBuf,

    /// Data user whose table receives the rows (resolved through VALID_USERS)
    #[arg(long, default_value = "user2")]
    user: String,

    /// Write into this table instead of the user's configured one
    #[arg(long)]
    table: Option<String>,

    /// Database path (overrides DB_PATH)
    #[arg(long)]
    db: Option<PathBuf>,

    /// Preview import without writing to database
    #[arg(long, default_value_t = false)]
    dry_run: bool,

    /// Replace rows whose (date, strategy) already exists instead of skipping them
    #[arg(long, default_value_t = false)]
    replace: bool,
}

struct ImportStats {
    total: usize,
    imported: usize,
    replaced: usize,
    skipped: usize,
    errors: usize,
}

impl ImportStats {
    fn new(total: usize) -> Self {
        Self {
            total,
            imported: 0,
            replaced: 0,
            skipped: 0,
            errors: 0,
        }
    }

    fn print_summary(&self) {
        println!("\nImport Summary:");
        println!("Total rows:    {:>6}", self.total);
        println!("Imported:      {:>6}", self.imported);
        println!("Replaced:      {:>6}", self.replaced);
        println!("Skipped:       {:>6} (already stored)", self.skipped);
        println!("Errors:        {:>6}", self.errors);
    }
}

/// Import snapshots into `table`
///
/// Existing (date, strategy) rows are skipped, or replaced when `replace` is set.
fn import_snapshots(
    store: &SnapshotStore,
    table: &str,
    snapshots: Vec<AccountSnapshot>,
    replace: bool,
) -> Result<ImportStats> {
    store.ensure_table(table)?;
    let mut stats = ImportStats::new(snapshots.len());

    for snapshot in snapshots {
        let exists = match store.snapshot_exists(table, snapshot.date, &snapshot.strategy) {
            Ok(exists) => exists,
            Err(e) => {
                eprintln!("Error checking {} {}: {}", snapshot.date, snapshot.strategy, e);
                stats.errors += 1;
                continue;
            }
        };

        let result = match (exists, replace) {
            (true, false) => {
                stats.skipped += 1;
                continue;
            }
            (true, true) => store.upsert_snapshot(table, &snapshot).map(|_| stats.replaced += 1),
            (false, _) => store.insert_snapshot(table, &snapshot).map(|_| stats.imported += 1),
        };

        if let Err(e) = result {
            eprintln!("Error writing {} {}: {:#}", snapshot.date, snapshot.strategy, e);
            stats.errors += 1;
        }
    }

    Ok(stats)
}

/// Result of reading CSV file - includes parsed snapshots and error counts
struct CsvReadResult {
    snapshots: Vec<AccountSnapshot>,
    parse_errors: usize,
    malformed_rows: usize,
}

/// Column positions resolved from the header row
struct Columns {
    date: usize,
    strategy: usize,
    collateral: usize,
    total_pnl: Option<usize>,
    deposit: Option<usize>,
    withdrawal: Option<usize>,
    btc_pnl: Option<usize>,
    eth_pnl: Option<usize>,
    pos_size: Option<usize>,
    user_id: Option<usize>,
}

impl Columns {
    fn from_headers(headers: &csv::StringRecord) -> Result<Self> {
        let find = |name: &str| headers.iter().position(|h| h.trim().eq_ignore_ascii_case(name));
        let required = |name: &str| find(name).ok_or_else(|| anyhow!("Missing required column '{}'", name));

        Ok(Self {
            date: find("date_world").or_else(|| find("date")).ok_or_else(|| anyhow!("Missing required column 'date_world'"))?,
            strategy: required("strategy")?,
            collateral: required("collateral")?,
            total_pnl: find("total_pnl"),
            deposit: find("deposit"),
            withdrawal: find("withdrawal"),
            btc_pnl: find("btc_pnl"),
            eth_pnl: find("eth_pnl"),
            pos_size: find("pos_size"),
            user_id: find("user_id"),
        })
    }

    fn width(&self) -> usize {
        [self.date, self.strategy, self.collateral].into_iter().max().unwrap_or(0) + 1
    }
}

/// Read CSV file and parse all rows into snapshots
/// Handles malformed rows gracefully by skipping them
fn read_csv_file<P: AsRef<Path>>(path: P) -> Result<CsvReadResult> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true) // Allow variable number of fields
        .from_path(path)
        .context("Failed to open CSV file")?;

    let columns = Columns::from_headers(reader.headers().context("Failed to read CSV header")?)?;

    let mut snapshots = Vec::new();
    let mut parse_errors = 0;
    let mut malformed_rows = 0;

    for (idx, result) in reader.records().enumerate() {
        // +2: one for the header, one for 1-based line numbers
        let line_num = idx + 2;
        let record = match result {
            Ok(r) => r,
            Err(e) => {
                eprintln!("Warning: Skipping malformed row at line {}: {}", line_num, e);
                malformed_rows += 1;
                continue;
            }
        };

        if record.len() < columns.width() {
            eprintln!(
                "Warning: Skipping row at line {} with {} fields (expected at least {})",
                line_num,
                record.len(),
                columns.width()
            );
            malformed_rows += 1;
            continue;
        }

        match parse_csv_row(&record, &columns) {
            Ok(snapshot) => snapshots.push(snapshot),
            Err(e) => {
                eprintln!("Warning: Failed to parse row at line {}: {}", line_num, e);
                parse_errors += 1;
            }
        }
    }

    Ok(CsvReadResult {
        snapshots,
        parse_errors,
        malformed_rows,
    })
}

/// Parse a CSV row into an AccountSnapshot
///
/// Dates may carry a time part ("2024-01-05 00:00:00"); it is dropped.
/// Empty numeric cells count as 0.
fn parse_csv_row(row: &csv::StringRecord, columns: &Columns) -> Result<AccountSnapshot> {
    let raw_date = row.get(columns.date).context("Missing date_world")?.trim();
    let date_part = raw_date.get(..10).unwrap_or(raw_date);
    let date = NaiveDate::parse_from_str(date_part, "%Y-%m-%d")
        .with_context(|| format!("Failed to parse date '{}'", raw_date))?;

    let strategy = row.get(columns.strategy).context("Missing strategy")?.trim();
    if strategy.is_empty() {
        bail!("Missing strategy");
    }

    let number = |col: Option<usize>, name: &str| -> Result<f64> {
        match col.and_then(|c| row.get(c)).map(str::trim) {
            None | Some("") => Ok(0.0),
            Some(raw) => raw
                .parse::<f64>()
                .with_context(|| format!("Failed to parse {} '{}'", name, raw)),
        }
    };

    let user_id = columns
        .user_id
        .and_then(|c| row.get(c))
        .map(|s| s.trim().to_string())
        .unwrap_or_default();

    Ok(AccountSnapshot {
        date,
        strategy: strategy.to_string(),
        collateral: number(Some(columns.collateral), "collateral")?,
        total_pnl: number(columns.total_pnl, "total_pnl")?,
        deposit: number(columns.deposit, "deposit")?,
        withdrawal: number(columns.withdrawal, "withdrawal")?,
        btc_pnl: number(columns.btc_pnl, "btc_pnl")?,
        eth_pnl: number(columns.eth_pnl, "eth_pnl")?,
        pos_size: number(columns.pos_size, "pos_size")?,
        user_id,
    })
}

fn main() -> Result<()> {
    dotenv().ok();
    let args = Args::parse();

    let config = Config::from_env()?;
    let db_path = args.db.clone().unwrap_or_else(|| PathBuf::from(&config.db_path));
    let table = match &args.table {
        Some(t) => t.clone(),
        None => config
            .user(&args.user)
            .map(|p| p.table_name.clone())
            .ok_or_else(|| anyhow!("Unknown user '{}'. Check VALID_USERS or pass --table.", args.user))?,
    };

    println!("CSV Import Tool");
    println!("CSV file: {}", args.csv_file.display());
    println!("Database: {}", db_path.display());
    println!("Table: {}", table);
    println!("Dry run: {}", args.dry_run);
    println!("Replace existing: {}", args.replace);

    println!("\nReading CSV file...");
    let csv_result = read_csv_file(&args.csv_file)
        .context("Failed to read CSV file")?;

    println!("Parsed {} snapshots ({} malformed rows skipped, {} parse errors)",
        csv_result.snapshots.len(),
        csv_result.malformed_rows,
        csv_result.parse_errors
    );

    if args.dry_run {
        println!("\nDry run - no data will be written to database");
        let mut stats = ImportStats::new(csv_result.snapshots.len());
        stats.errors = csv_result.parse_errors + csv_result.malformed_rows;
        stats.print_summary();
        return Ok(());
    }

    let store = SnapshotStore::new(&db_path)
        .context("Failed to open database")?;

    println!("\nImporting snapshots...");
    let mut stats = import_snapshots(&store, &table, csv_result.snapshots, args.replace)?;
    stats.errors += csv_result.parse_errors + csv_result.malformed_rows;
    stats.print_summary();

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const HEADER: &str = "date_world,collateral,strategy,total_pnl,deposit,withdrawal,btc_pnl,eth_pnl,user_id,pos_size";

    fn parse(content: &str) -> Result<AccountSnapshot> {
        let mut reader = csv::Reader::from_reader(content.as_bytes());
        let columns = Columns::from_headers(reader.headers().unwrap()).unwrap();
        let row = reader.records().next().unwrap().unwrap();
        parse_csv_row(&row, &columns)
    }

    fn write_temp(content: &str) -> NamedTempFile {
        let mut temp_file = NamedTempFile::new().expect("Failed to create temp file");
        temp_file.write_all(content.as_bytes()).expect("Failed to write to temp file");
        temp_file.flush().expect("Failed to flush temp file");
        temp_file
    }

    fn snap(day: u32, strategy: &str, collateral: f64) -> AccountSnapshot {
        AccountSnapshot {
            collateral,
            ..AccountSnapshot::new(NaiveDate::from_ymd_opt(2024, 1, day).unwrap(), strategy, "u")
        }
    }

    #[test]
    fn test_parse_csv_row_full() {
        let snapshot = parse(&format!(
            "{}\n2024-01-05,10500.5,Deribit Options,120.25,1000,0,60,40.5,user2_jf,0.3",
            HEADER
        ))
        .expect("Failed to parse CSV row");

        assert_eq!(snapshot.date, NaiveDate::from_ymd_opt(2024, 1, 5).unwrap());
        assert_eq!(snapshot.strategy, "Deribit Options");
        assert_eq!(snapshot.collateral, 10500.5);
        assert_eq!(snapshot.total_pnl, 120.25);
        assert_eq!(snapshot.deposit, 1000.0);
        assert_eq!(snapshot.eth_pnl, 40.5);
        assert_eq!(snapshot.pos_size, 0.3);
        assert_eq!(snapshot.user_id, "user2_jf");
    }

    #[test]
    fn test_parse_csv_row_minimal_columns_and_timestamp() {
        let snapshot = parse("date,strategy,collateral\n2024-02-01 00:00:00,HL,99.5").unwrap();
        assert_eq!(snapshot.date, NaiveDate::from_ymd_opt(2024, 2, 1).unwrap());
        assert_eq!(snapshot.collateral, 99.5);
        assert_eq!(snapshot.total_pnl, 0.0);
        assert_eq!(snapshot.user_id, "");
    }

    #[test]
    fn test_parse_csv_row_rejects_bad_values() {
        assert!(parse("date,strategy,collateral\n01/02/2024,HL,1").is_err());
        assert!(parse("date,strategy,collateral\n2024-02-01,,1").is_err());
        assert!(parse("date,strategy,collateral\n2024-02-01,HL,lots").is_err());
    }

    #[test]
    fn test_missing_required_column() {
        let mut reader = csv::Reader::from_reader("date,collateral\n2024-01-01,1".as_bytes());
        let err = Columns::from_headers(reader.headers().unwrap()).err().unwrap();
        assert!(err.to_string().contains("strategy"));
    }

    #[test]
    fn test_read_csv_file_with_malformed_rows() {
        let temp_file = write_temp(&format!(
            "{}\n2024-01-05,100,HL,0,0,0,0,0,u,0\nbad\n2024-01-06,nope,HL,0,0,0,0,0,u,0\n2024-01-07,110,HL,10,0,0,0,0,u,0",
            HEADER
        ));

        let result = read_csv_file(temp_file.path()).expect("Failed to read CSV file");

        assert_eq!(result.snapshots.len(), 2);
        assert_eq!(result.malformed_rows, 1);
        assert_eq!(result.parse_errors, 1);
    }

    #[test]
    fn test_import_snapshots_basic() {
        let store = SnapshotStore::new(":memory:").expect("Failed to create store");

        let stats = import_snapshots(&store, "account_data", vec![snap(1, "HL", 1.0), snap(1, "Bitget", 2.0)], false)
            .expect("Failed to import snapshots");

        assert_eq!(stats.total, 2);
        assert_eq!(stats.imported, 2);
        assert_eq!(stats.errors, 0);
        assert_eq!(store.snapshot_count("account_data").unwrap(), 2);
    }

    #[test]
    fn test_import_snapshots_skips_or_replaces_existing() {
        let store = SnapshotStore::new(":memory:").expect("Failed to create store");
        import_snapshots(&store, "account_data", vec![snap(1, "HL", 1.0)], false).unwrap();

        let stats = import_snapshots(&store, "account_data", vec![snap(1, "HL", 5.0), snap(2, "HL", 6.0)], false).unwrap();
        assert_eq!(stats.skipped, 1);
        assert_eq!(stats.imported, 1);
        assert_eq!(store.fetch_all("account_data").unwrap()[0].collateral, 1.0);

        let stats = import_snapshots(&store, "account_data", vec![snap(1, "HL", 5.0)], true).unwrap();
        assert_eq!(stats.replaced, 1);
        assert_eq!(store.fetch_all("account_data").unwrap()[0].collateral, 5.0);
        assert_eq!(store.snapshot_count("account_data").unwrap(), 2);
    }

    #[test]
    fn test_args_with_custom_values() {
        let args = Args::parse_from(["import_csv", "history.csv", "--table", "acct", "--dry-run", "--replace"]);
        assert_eq!(args.csv_file, PathBuf::from("history.csv"));
        assert_eq!(args.table.as_deref(), Some("acct"));
        assert_eq!(args.user, "user2");
        assert!(args.dry_run);
        assert!(args.replace);
    }
}
