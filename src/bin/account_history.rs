// account_history.rs - CLI tool for querying stored balance snapshots
//
// Usage:
//   cargo run --bin account_history -- --user user2                 # Recent snapshots
//   cargo run --bin account_history -- --user user2 --strategy HL   # One strategy
//   cargo run --bin account_history -- --user user2 --since 2024-01-01 --format csv
//   cargo run --bin account_history -- --user user2 --period monthly  # Rolled-up PnL

use anyhow::{anyhow, Result};
use chrono::NaiveDate;
use clap::{Parser, ValueEnum};
use dotenvy::dotenv;

use account_dashboard::models::{format_thousands, AccountSnapshot, TOTAL_ACCOUNT};
use account_dashboard::persistence::SnapshotStore;
use account_dashboard::processing::{filter_from, process_account_data, resample, summary, Frequency};
use account_dashboard::settings::Config;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Period {
    Weekly,
    Monthly,
    Quarterly,
}

impl From<Period> for Frequency {
    fn from(p: Period) -> Self {
        match p {
            Period::Weekly => Frequency::Weekly,
            Period::Monthly => Frequency::Monthly,
            Period::Quarterly => Frequency::Quarterly,
        }
    }
}

#[derive(Parser)]
#[command(name = "account_history")]
#[command(about = "Query stored balance snapshots from database")]
struct Args {
    /// Data user whose table is read (resolved through VALID_USERS)
    #[arg(long, default_value = "user2")]
    user: String,

    /// Read this table directly instead of the user's configured one
    #[arg(long)]
    table: Option<String>,

    /// Database path (overrides DB_PATH)
    #[arg(long)]
    db: Option<String>,

    /// Only show this strategy
    #[arg(long)]
    strategy: Option<String>,

    /// Only show snapshots on or after this date (YYYY-MM-DD)
    #[arg(long)]
    since: Option<NaiveDate>,

    /// Maximum number of (most recent) snapshots to show
    #[arg(long, default_value = "50")]
    limit: usize,

    /// Roll PnL up per period instead of listing snapshots
    #[arg(long, value_enum)]
    period: Option<Period>,

    /// Output format: table, csv, json
    #[arg(long, default_value = "table")]
    format: String,
}

fn main() -> Result<()> {
    dotenv().ok();
    let args = Args::parse();

    let config = Config::from_env()?;
    let db_path = args.db.clone().unwrap_or_else(|| config.db_path.clone());
    let table = match &args.table {
        Some(t) => t.clone(),
        None => config
            .user(&args.user)
            .map(|p| p.table_name.clone())
            .ok_or_else(|| anyhow!("Unknown user '{}'. Check VALID_USERS or pass --table.", args.user))?,
    };

    let store = SnapshotStore::new(&db_path)?;
    let rows = store.fetch_all(&table)?;

    if let Some(period) = args.period {
        let strategy = args.strategy.as_deref().unwrap_or(TOTAL_ACCOUNT);
        print_periods(&rows, strategy, args.since, period);
        return Ok(());
    }

    let snapshots = apply_filters(rows, args.strategy.as_deref(), args.since, args.limit);

    match args.format.to_lowercase().as_str() {
        "csv" => print_csv(&snapshots)?,
        "json" => print_json(&snapshots)?,
        _ => print_table(&snapshots),
    }

    Ok(())
}

/// Apply filters, keeping the `limit` most recent snapshots in date order
fn apply_filters(
    rows: Vec<AccountSnapshot>,
    strategy: Option<&str>,
    since: Option<NaiveDate>,
    limit: usize,
) -> Vec<AccountSnapshot> {
    let filtered: Vec<AccountSnapshot> = rows
        .into_iter()
        .filter(|s| strategy.map_or(true, |f| s.strategy.eq_ignore_ascii_case(f)))
        .filter(|s| since.map_or(true, |d| s.date >= d))
        .collect();

    let skip = filtered.len().saturating_sub(limit);
    filtered.into_iter().skip(skip).collect()
}

/// Print snapshots in a formatted table
fn print_table(snapshots: &[AccountSnapshot]) {
    println!("\n=== ACCOUNT HISTORY ===\n");

    if snapshots.is_empty() {
        println!("No snapshots found.");
        return;
    }

    println!(
        "{:<12} {:<20} {:>16} {:>14} {:>12} {:>12}",
        "Date", "Strategy", "Collateral", "PnL", "Deposit", "Withdrawal"
    );
    println!("{}", "-".repeat(92));

    for s in snapshots {
        println!(
            "{:<12} {:<20} {:>16} {:>14} {:>12} {:>12}",
            s.date.format("%Y-%m-%d"),
            s.strategy,
            format_thousands(s.collateral),
            format_thousands(s.total_pnl),
            format_thousands(s.deposit),
            format_thousands(s.withdrawal),
        );
    }

    println!("\nTotal snapshots: {}", snapshots.len());
    print_summary(snapshots);
}

/// Print snapshots as CSV (same columns as the import format)
fn print_csv(snapshots: &[AccountSnapshot]) -> Result<()> {
    let mut writer = csv::Writer::from_writer(std::io::stdout());
    writer.write_record([
        "date_world", "strategy", "collateral", "total_pnl", "deposit",
        "withdrawal", "btc_pnl", "eth_pnl", "pos_size", "user_id",
    ])?;
    for s in snapshots {
        writer.write_record([
            s.date.format("%Y-%m-%d").to_string(),
            s.strategy.clone(),
            s.collateral.to_string(),
            s.total_pnl.to_string(),
            s.deposit.to_string(),
            s.withdrawal.to_string(),
            s.btc_pnl.to_string(),
            s.eth_pnl.to_string(),
            s.pos_size.to_string(),
            s.user_id.clone(),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

/// Print snapshots in JSON format
fn print_json(snapshots: &[AccountSnapshot]) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(snapshots)?);
    Ok(())
}

/// Print summary statistics over the listed snapshots
fn print_summary(snapshots: &[AccountSnapshot]) {
    let points = process_account_data(snapshots, TOTAL_ACCOUNT);
    let Some(s) = summary(&points) else {
        return;
    };

    println!("\n=== SUMMARY ({} to {}) ===", s.start, s.end);
    println!("  Balance:     ${}", format_thousands(s.current_balance));
    println!("  Net PnL:     ${}", format_thousands(s.pnl_since_start));
    println!("  Last day:    ${}", format_thousands(s.daily_pnl));

    let deposits: f64 = snapshots.iter().map(|s| s.deposit).sum();
    let withdrawals: f64 = snapshots.iter().map(|s| s.withdrawal).sum();
    if deposits != 0.0 || withdrawals != 0.0 {
        println!("  Deposits:    ${}", format_thousands(deposits));
        println!("  Withdrawals: ${}", format_thousands(withdrawals));
    }
}

/// Print PnL rolled up per period
fn print_periods(rows: &[AccountSnapshot], strategy: &str, since: Option<NaiveDate>, period: Period) {
    let mut points = process_account_data(rows, strategy);
    if let Some(start) = since {
        points = filter_from(&points, start);
    }
    let periods = resample(&points, period.into());

    println!("\n=== {} PNL ({}) ===\n", format!("{:?}", period).to_uppercase(), strategy);
    if periods.is_empty() {
        println!("No snapshots found.");
        return;
    }

    println!("{:<12} {:>16} {:>14} {:>14}", "Period", "Equity", "Net PnL", "Cum PnL");
    println!("{}", "-".repeat(60));
    for p in &periods {
        println!(
            "{:<12} {:>16} {:>14} {:>14}",
            p.label,
            format_thousands(p.equity),
            format_thousands(p.net_pnl),
            format_thousands(p.cum_pnl),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snap(day: u32, strategy: &str, collateral: f64) -> AccountSnapshot {
        AccountSnapshot {
            collateral,
            ..AccountSnapshot::new(NaiveDate::from_ymd_opt(2024, 1, day).unwrap(), strategy, "u")
        }
    }

    #[test]
    fn test_apply_filters_by_strategy_and_date() {
        let rows = vec![snap(1, "HL", 1.0), snap(2, "Bitget", 2.0), snap(3, "HL", 3.0)];
        let filtered = apply_filters(rows, Some("hl"), NaiveDate::from_ymd_opt(2024, 1, 2), 50);
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].collateral, 3.0);
    }

    #[test]
    fn test_apply_filters_keeps_most_recent() {
        let rows = vec![snap(1, "HL", 1.0), snap(2, "HL", 2.0), snap(3, "HL", 3.0)];
        let filtered = apply_filters(rows, None, None, 2);
        let dates: Vec<u32> = filtered.iter().map(|s| s.collateral as u32).collect();
        assert_eq!(dates, vec![2, 3]);
    }

    #[test]
    fn test_print_table_empty() {
        print_table(&[]);
    }

    #[test]
    fn test_print_table_and_periods() {
        let rows = vec![snap(1, "HL", 100.0), snap(8, "HL", 110.0)];
        print_table(&rows);
        print_periods(&rows, "HL", None, Period::Weekly);
        print_periods(&rows, "HL", NaiveDate::from_ymd_opt(2025, 1, 1), Period::Monthly);
    }

    #[test]
    fn test_print_json_and_csv() {
        let rows = vec![snap(1, "HL", 100.0)];
        print_json(&rows).unwrap();
        print_csv(&rows).unwrap();
    }
}
