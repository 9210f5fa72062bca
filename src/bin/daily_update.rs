// daily_update.rs - scheduled balance update for one data user
//
// Usage:
//   cargo run --bin daily_update                              # user2, its configured exchanges
//   cargo run --bin daily_update -- --user user1              # another data user
//   cargo run --bin daily_update -- --exchange BitGet --exchange Deribit
//   cargo run --bin daily_update -- --date 2024-03-01         # backfill a specific day
//
// Exits with status 1 if any exchange failed, so cron can alert on it.

use anyhow::{anyhow, Context, Result};
use chrono::{Local, NaiveDate};
use clap::Parser;
use dotenvy::dotenv;
use tracing::{error, info};

use account_dashboard::init_tracing;
use account_dashboard::models::Exchange;
use account_dashboard::persistence::SnapshotStore;
use account_dashboard::reconcile::{exchanges_for, run_all};
use account_dashboard::settings::Config;

#[derive(Parser)]
#[command(name = "daily_update")]
#[command(about = "Fetch today's balances and store them as snapshots")]
struct Args {
    /// Data user to update (must be listed in VALID_USERS)
    #[arg(long, default_value = "user2")]
    user: String,

    /// Exchange to update (repeatable); defaults to every exchange configured for the user
    #[arg(long = "exchange")]
    exchanges: Vec<Exchange>,

    /// Snapshot date (YYYY-MM-DD), defaults to today
    #[arg(long)]
    date: Option<NaiveDate>,

    /// Database path (overrides DB_PATH)
    #[arg(long)]
    db: Option<String>,
}

fn main() {
    dotenv().ok();
    init_tracing();

    match run(Args::parse()) {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            error!(error = %format!("{:#}", e), "Daily update aborted");
            eprintln!("Error: {:#}", e);
            std::process::exit(1);
        }
    }
}

/// Returns Ok(false) when at least one exchange failed
fn run(args: Args) -> Result<bool> {
    let mut config = Config::from_env()?;
    if let Some(db) = args.db {
        config.db_path = db;
    }

    let profile = config
        .user(&args.user)
        .ok_or_else(|| anyhow!("Unknown user '{}'. Check VALID_USERS.", args.user))?;

    let exchanges = if args.exchanges.is_empty() {
        exchanges_for(profile)
    } else {
        args.exchanges
    };
    if exchanges.is_empty() {
        println!("No exchanges configured for {}.", profile.key);
        return Ok(false);
    }

    let today = args.date.unwrap_or_else(|| Local::now().date_naive());
    println!("Starting daily update for {} ({})...", profile.key, today.format("%Y-%m-%d"));

    let store = SnapshotStore::new(&config.db_path)
        .with_context(|| format!("Failed to open {}", config.db_path))?;
    let outcomes = run_all(&config, profile, &store, &exchanges, today)?;

    let mut success = true;
    for outcome in &outcomes {
        if outcome.success {
            println!("  ✓ {}", outcome.message);
        } else {
            println!("  ✗ {}", outcome.message);
            success = false;
        }
    }

    info!(user = %profile.key, exchanges = outcomes.len(), success, "Daily update finished");
    if success {
        println!("Daily update completed successfully.");
    } else {
        println!("Daily update completed with errors.");
    }
    Ok(success)
}
