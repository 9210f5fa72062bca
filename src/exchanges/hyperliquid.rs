/// Hyperliquid perp account client
/// Reads account value through the public `/info` endpoint; no signing needed

use anyhow::{anyhow, Context, Result};
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{parse_amount, CollateralSource};
use crate::config::users::HyperliquidWallet;
use crate::models::{Collateral, Exchange};

const INFO_PATH: &str = "/info";

#[derive(Debug, Serialize)]
struct InfoRequest<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    user: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MarginSummary {
    account_value: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ClearinghouseState {
    margin_summary: MarginSummary,
    #[serde(default)]
    withdrawable: Option<String>,
}

/// Blocking client reading one or more wallets of a user
pub struct HyperliquidClient {
    http: Client,
    base_url: String,
    wallets: Vec<HyperliquidWallet>,
}

impl HyperliquidClient {
    /// Creates a client; addresses are checked per account when fetched
    pub fn new(http: Client, base_url: &str, wallets: Vec<HyperliquidWallet>) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            wallets,
        }
    }
}

impl CollateralSource for HyperliquidClient {
    fn exchange(&self) -> Exchange {
        Exchange::Hyperliquid
    }

    fn accounts(&self) -> Vec<String> {
        self.wallets.iter().map(|w| w.config_key.clone()).collect()
    }

    fn fetch_account(&self, account: &str) -> Result<Collateral> {
        let wallet = self.wallets
            .iter()
            .find(|w| w.config_key == account)
            .ok_or_else(|| anyhow!("Unknown Hyperliquid account {}", account))?;
        let address = validate_and_normalize_address(&wallet.address)
            .map_err(|e| anyhow!("{} wallet: {}", account, e))?;

        let request = InfoRequest {
            kind: "clearinghouseState",
            user: &address,
        };

        let body = self.http
            .post(format!("{}{}", self.base_url, INFO_PATH))
            .json(&request)
            .send()
            .context("Failed to reach Hyperliquid")?
            .error_for_status()
            .context("Hyperliquid returned an error status")?
            .text()
            .context("Failed to read Hyperliquid response")?;

        debug!(account, bytes = body.len(), "Hyperliquid clearinghouse response");
        parse_clearinghouse_state(&body)
    }
}

/// Parse a `clearinghouseState` response
///
/// Total account value is the balance; `withdrawable` is the free collateral.
pub fn parse_clearinghouse_state(body: &str) -> Result<Collateral> {
    let state: ClearinghouseState = serde_json::from_str(body)
        .context("Failed to retrieve collateral: unexpected Hyperliquid response")?;

    let balance = parse_amount("accountValue", &state.margin_summary.account_value)?;
    let free_collateral = match state.withdrawable.as_deref() {
        Some(raw) => parse_amount("withdrawable", raw)?,
        None => 0.0,
    };

    Ok(Collateral { balance, free_collateral })
}

/// Validates a wallet address and normalizes it to lowercase `0x...`
///
/// # Examples
/// ```
/// use account_dashboard::exchanges::hyperliquid::validate_and_normalize_address;
///
/// let addr = validate_and_normalize_address(" 0xABC123def456789012345678901234567890abcd ").unwrap();
/// assert_eq!(addr, "0xabc123def456789012345678901234567890abcd");
/// ```
pub fn validate_and_normalize_address(input: &str) -> Result<String, String> {
    let trimmed = input.trim();

    let without_prefix = match trimmed.get(..2) {
        Some(prefix) if prefix.eq_ignore_ascii_case("0x") => &trimmed[2..],
        _ => trimmed,
    };

    if without_prefix.len() != 40 {
        return Err(format!(
            "Address must be exactly 40 hex characters after 0x (found {}).",
            without_prefix.len()
        ));
    }

    if !without_prefix.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err("Address contains invalid characters. Must be hexadecimal (0-9, a-f, A-F).".to_string());
    }

    Ok(format!("0x{}", without_prefix.to_lowercase()))
}
