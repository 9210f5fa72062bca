/// Exchange collateral sources
///
/// Each source lists the accounts it can read and fetches one account's
/// collateral at a time. The reconciler sums accounts and decides what a
/// partial failure means, so sources stay dumb and easy to fake in tests.

pub mod bitget;
pub mod hyperliquid;

use anyhow::{anyhow, Result};
use reqwest::blocking::Client;

use crate::config::users::UserProfile;
use crate::models::{Collateral, Exchange};
use crate::settings::{Config, HTTP_TIMEOUT};

pub use bitget::BitgetClient;
pub use hyperliquid::HyperliquidClient;

/// Something that can report collateral for one or more accounts of a user
pub trait CollateralSource {
    /// Exchange this source reads from
    fn exchange(&self) -> Exchange;

    /// Account labels, in fetch order ("main", "hyperliquid2", ...)
    fn accounts(&self) -> Vec<String>;

    /// Fetch the collateral of one account
    fn fetch_account(&self, account: &str) -> Result<Collateral>;
}

/// Shared blocking HTTP client with the standard timeout
pub fn http_client() -> Result<Client> {
    Client::builder()
        .timeout(HTTP_TIMEOUT)
        .build()
        .map_err(|e| anyhow!("Failed to create HTTP client: {}", e))
}

/// Build the live source for `exchange`, or explain why the user has none
///
/// Deribit has no live source: its rows are copied forward from history.
pub fn source_for(
    cfg: &Config,
    profile: &UserProfile,
    exchange: Exchange,
) -> Result<Box<dyn CollateralSource + Send>> {
    match exchange {
        Exchange::BitGet => {
            let creds = profile.bitget.as_ref().ok_or_else(|| {
                anyhow!("No Bitget credentials found for user {}", profile.key)
            })?;
            let client = BitgetClient::new(http_client()?, &cfg.bitget_api_base, creds)?;
            Ok(Box::new(client))
        }
        Exchange::Hyperliquid => {
            if profile.hyperliquid.is_empty() {
                return Err(anyhow!("No Hyperliquid wallet configured for user {}", profile.key));
            }
            let client = HyperliquidClient::new(
                http_client()?,
                &cfg.hyperliquid_api_base,
                profile.hyperliquid.clone(),
            );
            Ok(Box::new(client))
        }
        Exchange::Deribit => Err(anyhow!("Deribit has no live collateral source")),
    }
}

/// Parse a numeric field that exchanges send as a JSON string
pub(crate) fn parse_amount(field: &str, raw: &str) -> Result<f64> {
    raw.trim()
        .parse::<f64>()
        .map_err(|_| anyhow!("Invalid {} value '{}'", field, raw))
}
