// Account dashboard library
// Daily balance snapshots per user and strategy, reconciled from exchange
// APIs into SQLite and served as equity/PnL series over HTTP.

pub mod api;
pub mod auth;
pub mod config;
pub mod exchanges;
pub mod models;
pub mod persistence;
pub mod processing;
pub mod reconcile;
pub mod settings;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Install the fmt subscriber; RUST_LOG overrides the default filter
pub fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "account_dashboard=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
