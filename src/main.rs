/// Account Dashboard - HTTP server entry point
/// Serves stored balance snapshots and triggers the data loader on request

use anyhow::Result;
use dotenvy::dotenv;
use tracing::{info, warn};

use account_dashboard::api::start_api_server;
use account_dashboard::init_tracing;
use account_dashboard::persistence::SnapshotStore;
use account_dashboard::settings::Config;

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    init_tracing();

    let config = Config::from_env()?;
    if config.auth.is_empty() {
        warn!("AUTH_USERS is empty: every authenticated endpoint will answer 401");
    }

    // Create every user's table up front so a bad DB_PATH or table name fails fast
    {
        let store = SnapshotStore::new(&config.db_path)?;
        for user in &config.users {
            store.ensure_table(&user.table_name)?;
            info!(
                user = %user.key,
                table = %user.table_name,
                rows = store.snapshot_count(&user.table_name)?,
                "Data user ready"
            );
        }
    }

    let handle = start_api_server(config).await?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            println!("\nReceived shutdown signal, shutting down...");
        }
        _ = handle => {
            warn!("API server task ended");
        }
    }

    Ok(())
}
