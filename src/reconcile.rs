/// Balance reconciliation and upsert
///
/// For every exchange of a user the loader either fetches live collateral and
/// diffs it against the last stored row of the same strategy, or (Deribit)
/// copies the last manually maintained row forward to today. The result is
/// written with delete-then-insert so there is one row per (strategy, date).
/// Each exchange succeeds or fails on its own.

use anyhow::Result;
use chrono::NaiveDate;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::config::users::UserProfile;
use crate::exchanges::{self, CollateralSource};
use crate::models::{format_thousands, AccountSnapshot, Exchange, LoadOutcome};
use crate::persistence::SnapshotStore;
use crate::settings::{Config, DERIBIT_STRATEGY_PATTERNS};

/// Why one exchange could not be reconciled
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// Copy-forward found nothing to copy
    #[error("No existing data found to copy.")]
    NoHistory,
    /// The exchange could not be queried or its answer was unusable
    #[error("{0}")]
    Fetch(String),
    /// Every configured account failed
    #[error("No account could be fetched: {0}")]
    NoAccounts(String),
    /// The snapshot was computed but not saved
    #[error("Failed to save data.")]
    Store(#[source] anyhow::Error),
}

/// A reconciled snapshot plus how it was obtained
#[derive(Debug, Clone, PartialEq)]
pub struct Reconciliation {
    pub snapshot: AccountSnapshot,
    /// Number of accounts summed (0 for copy-forward)
    pub accounts_fetched: usize,
    /// Collateral of the previous row of this strategy, if any
    pub previous_collateral: Option<f64>,
    /// Per-account failures that did not abort the update
    pub warnings: Vec<String>,
}

/// True if `strategy` is one of the manually maintained Deribit/option buckets
pub fn is_copy_forward_strategy(strategy: &str) -> bool {
    let lower = strategy.to_lowercase();
    DERIBIT_STRATEGY_PATTERNS.iter().any(|p| lower.contains(p))
}

/// Latest snapshot (by date) matching `pred`; on equal dates the later entry wins
fn latest_matching<'a, P>(history: &'a [AccountSnapshot], pred: P) -> Option<&'a AccountSnapshot>
where
    P: Fn(&AccountSnapshot) -> bool,
{
    history.iter().filter(|s| pred(s)).max_by_key(|s| s.date)
}

/// Compute today's snapshot for one exchange without persisting it
///
/// # Arguments
/// * `exchange` - Exchange being updated
/// * `source` - Live collateral source (ignored for Deribit)
/// * `user_id` - Value stamped into the user_id column
/// * `history` - Every stored snapshot of the user
/// * `today` - Date the new row is written under
pub fn reconcile(
    exchange: Exchange,
    source: Option<&dyn CollateralSource>,
    user_id: &str,
    history: &[AccountSnapshot],
    today: NaiveDate,
) -> Result<AccountSnapshot, ReconcileError> {
    reconcile_detailed(exchange, source, user_id, history, today).map(|r| r.snapshot)
}

/// Same as [`reconcile`] but also reports account counts and warnings
pub fn reconcile_detailed(
    exchange: Exchange,
    source: Option<&dyn CollateralSource>,
    user_id: &str,
    history: &[AccountSnapshot],
    today: NaiveDate,
) -> Result<Reconciliation, ReconcileError> {
    let strategy = match exchange.strategy() {
        Some(s) => s,
        None => {
            // Backfills must not copy rows dated after the day being written
            let last = latest_matching(history, |s| {
                s.date <= today && is_copy_forward_strategy(&s.strategy)
            })
            .ok_or(ReconcileError::NoHistory)?;

            let mut snapshot = last.clone();
            snapshot.date = today;
            snapshot.user_id = user_id.to_string();

            return Ok(Reconciliation {
                snapshot,
                accounts_fetched: 0,
                previous_collateral: Some(last.collateral),
                warnings: Vec::new(),
            });
        }
    };

    let source = source.ok_or_else(|| {
        ReconcileError::Fetch(format!("No collateral source configured for {}", exchange))
    })?;

    let mut total_balance = 0.0;
    let mut accounts_fetched = 0;
    let mut warnings = Vec::new();

    for account in source.accounts() {
        match source.fetch_account(&account) {
            Ok(collateral) => {
                total_balance += collateral.balance;
                accounts_fetched += 1;
            }
            Err(e) => {
                warn!(%exchange, account = %account, error = %format!("{:#}", e), "Account fetch failed");
                warnings.push(format!("{} ({}): {:#}", exchange, account, e));
            }
        }
    }

    if accounts_fetched == 0 {
        // A single account failing is just a fetch error; several failing is reported as a group
        return Err(match warnings.len() {
            0 => ReconcileError::Fetch(format!("No accounts configured for {}", exchange)),
            1 => ReconcileError::Fetch(warnings.remove(0)),
            _ => ReconcileError::NoAccounts(warnings.join("; ")),
        });
    }

    // Rows already written for today are ignored so a rerun diffs against yesterday
    let previous_collateral = latest_matching(history, |s| s.strategy == strategy && s.date < today)
        .map(|s| s.collateral);
    let total_pnl = match previous_collateral {
        Some(prev) => total_balance - prev,
        None => 0.0,
    };

    let snapshot = AccountSnapshot {
        collateral: total_balance,
        total_pnl,
        ..AccountSnapshot::new(today, strategy, user_id)
    };

    Ok(Reconciliation {
        snapshot,
        accounts_fetched,
        previous_collateral,
        warnings,
    })
}

/// Reconcile one exchange, persist the result and render the outcome message
pub fn run_data_loading(
    exchange: Exchange,
    source: Option<&dyn CollateralSource>,
    profile: &UserProfile,
    store: &SnapshotStore,
    history: &[AccountSnapshot],
    today: NaiveDate,
) -> LoadOutcome {
    let reconciliation = match reconcile_detailed(exchange, source, &profile.user_id, history, today) {
        Ok(r) => r,
        Err(e) => {
            error!(%exchange, user = %profile.key, error = %e, "Reconciliation failed");
            return LoadOutcome::failed(exchange, format!("{}: {}", exchange, e));
        }
    };

    let snapshot = &reconciliation.snapshot;
    let label = exchange.strategy().unwrap_or(exchange.name());

    if let Err(e) = store.upsert_snapshot(&profile.table_name, snapshot) {
        let e = ReconcileError::Store(e);
        error!(%exchange, user = %profile.key, error = ?e, "Failed to persist snapshot");
        return LoadOutcome::failed(exchange, format!("{}: {}", label, e));
    }

    let mut message = match exchange {
        Exchange::Deribit => format!("Deribit: Copied data for {}", today.format("%Y-%m-%d")),
        _ => format!(
            "{}: Saved ${} (PnL: {})",
            label,
            format_thousands(snapshot.collateral),
            format_thousands(snapshot.total_pnl)
        ),
    };
    if exchange == Exchange::Hyperliquid && reconciliation.accounts_fetched > 1 {
        message.push_str(&format!(" [Sum of {} accounts]", reconciliation.accounts_fetched));
    }
    if !reconciliation.warnings.is_empty() {
        message.push_str(&format!(" [skipped: {}]", reconciliation.warnings.join("; ")));
    }

    info!(
        %exchange,
        user = %profile.key,
        strategy = %snapshot.strategy,
        collateral = snapshot.collateral,
        pnl = snapshot.total_pnl,
        "Snapshot saved"
    );
    LoadOutcome::ok(exchange, message)
}

/// Exchanges updated by default for a user
///
/// Hyperliquid when a wallet is configured, BitGet when credentials are
/// configured, Deribit when copy-forward is enabled.
pub fn exchanges_for(profile: &UserProfile) -> Vec<Exchange> {
    let mut exchanges = Vec::new();
    if !profile.hyperliquid.is_empty() {
        exchanges.push(Exchange::Hyperliquid);
    }
    if profile.bitget.is_some() {
        exchanges.push(Exchange::BitGet);
    }
    if profile.deribit_copy {
        exchanges.push(Exchange::Deribit);
    }
    exchanges
}

/// Resolve an exchange selection ("All" or a single exchange name)
pub fn select_exchanges(selection: &str, profile: &UserProfile) -> Result<Vec<Exchange>, String> {
    if selection.trim().eq_ignore_ascii_case("all") {
        Ok(exchanges_for(profile))
    } else {
        selection.parse::<Exchange>().map(|e| vec![e])
    }
}

/// Run every exchange independently, building sources with `make_source`
///
/// History is read once up front; a failing exchange never prevents the
/// others from being written.
pub fn run_all_with<F>(
    profile: &UserProfile,
    store: &SnapshotStore,
    exchanges: &[Exchange],
    today: NaiveDate,
    make_source: F,
) -> Result<Vec<LoadOutcome>>
where
    F: Fn(Exchange) -> Result<Box<dyn CollateralSource + Send>>,
{
    let history = store.fetch_all(&profile.table_name)?;
    if history.is_empty() {
        warn!(user = %profile.key, "No existing data found. PnL calculations may be rough.");
    }

    let mut outcomes = Vec::with_capacity(exchanges.len());
    for &exchange in exchanges {
        let source = if exchange.strategy().is_some() {
            match make_source(exchange) {
                Ok(s) => Some(s),
                Err(e) => {
                    error!(%exchange, user = %profile.key, error = %e, "No collateral source");
                    outcomes.push(LoadOutcome::failed(exchange, format!("{}: {:#}", exchange, e)));
                    continue;
                }
            }
        } else {
            None
        };

        let source_ref = source.as_deref().map(|s| s as &dyn CollateralSource);
        outcomes.push(run_data_loading(exchange, source_ref, profile, store, &history, today));
    }

    Ok(outcomes)
}

/// Run every exchange against the live exchange APIs
pub fn run_all(
    cfg: &Config,
    profile: &UserProfile,
    store: &SnapshotStore,
    exchanges: &[Exchange],
    today: NaiveDate,
) -> Result<Vec<LoadOutcome>> {
    run_all_with(profile, store, exchanges, today, |exchange| {
        exchanges::source_for(cfg, profile, exchange)
    })
}
