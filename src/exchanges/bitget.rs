/// BitGet futures account client
/// Reads USDT-M futures collateral through the signed v2 REST API
///
/// Requires per-user credentials:
/// - BITGET_{USER}_API_KEY
/// - BITGET_{USER}_API_SECRET
/// - BITGET_{USER}_PASSPHRASE

use anyhow::{anyhow, Context, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use hmac::{Hmac, Mac};
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use serde::Deserialize;
use sha2::Sha256;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::debug;

use super::{parse_amount, CollateralSource};
use crate::config::users::BitgetCreds;
use crate::models::{Collateral, Exchange};
use crate::settings::BITGET_PRODUCT_TYPE;

type HmacSha256 = Hmac<Sha256>;

const ACCOUNTS_PATH: &str = "/api/v2/mix/account/accounts";
const SUCCESS_CODE: &str = "00000";

/// Credentials with a pre-keyed HMAC for request signing
#[derive(Clone)]
pub struct PreparedBitgetCreds {
    pub api_key: String,
    pub passphrase: String,
    hmac_template: HmacSha256,
}

impl PreparedBitgetCreds {
    pub fn new(creds: &BitgetCreds) -> Result<Self> {
        let hmac_template = HmacSha256::new_from_slice(creds.api_secret.as_bytes())
            .map_err(|e| anyhow!("Invalid HMAC key: {}", e))?;

        Ok(Self {
            api_key: creds.api_key.clone(),
            passphrase: creds.passphrase.clone(),
            hmac_template,
        })
    }

    /// Sign `timestamp + METHOD + requestPath + body` and return base64
    pub fn sign(&self, timestamp_ms: &str, method: &str, request_path: &str, body: &str) -> String {
        let mut mac = self.hmac_template.clone();
        mac.update(timestamp_ms.as_bytes());
        mac.update(method.to_uppercase().as_bytes());
        mac.update(request_path.as_bytes());
        mac.update(body.as_bytes());
        STANDARD.encode(mac.finalize().into_bytes())
    }
}

/// Envelope of every BitGet v2 response
#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    code: String,
    #[serde(default)]
    msg: String,
    data: Option<T>,
}

/// One futures account entry (amounts arrive as strings)
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FuturesAccount {
    #[serde(default)]
    margin_coin: String,
    available: String,
    #[serde(default)]
    crossed_max_available: Option<String>,
}

/// Blocking client for one BitGet user
pub struct BitgetClient {
    http: Client,
    base_url: String,
    creds: PreparedBitgetCreds,
}

impl BitgetClient {
    pub fn new(http: Client, base_url: &str, creds: &BitgetCreds) -> Result<Self> {
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            creds: PreparedBitgetCreds::new(creds)?,
        })
    }

    fn auth_headers(&self, method: &str, request_path: &str, body: &str) -> Result<HeaderMap> {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .context("System clock before UNIX epoch")?
            .as_millis()
            .to_string();
        let signature = self.creds.sign(&timestamp, method, request_path, body);

        let mut headers = HeaderMap::new();
        headers.insert("ACCESS-KEY", HeaderValue::from_str(&self.creds.api_key)?);
        headers.insert("ACCESS-SIGN", HeaderValue::from_str(&signature)?);
        headers.insert("ACCESS-TIMESTAMP", HeaderValue::from_str(&timestamp)?);
        headers.insert("ACCESS-PASSPHRASE", HeaderValue::from_str(&self.creds.passphrase)?);
        headers.insert("locale", HeaderValue::from_static("en-US"));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Ok(headers)
    }
}

impl CollateralSource for BitgetClient {
    fn exchange(&self) -> Exchange {
        Exchange::BitGet
    }

    fn accounts(&self) -> Vec<String> {
        vec!["main".to_string()]
    }

    fn fetch_account(&self, _account: &str) -> Result<Collateral> {
        let request_path = format!("{}?productType={}", ACCOUNTS_PATH, BITGET_PRODUCT_TYPE);
        let headers = self.auth_headers("GET", &request_path, "")?;

        let response = self.http
            .get(format!("{}{}", self.base_url, request_path))
            .headers(headers)
            .send()
            .context("Failed to reach BitGet")?;
        let status = response.status();
        let body = response.text().context("Failed to read BitGet response")?;

        debug!(%status, bytes = body.len(), "BitGet accounts response");
        // Error statuses usually carry the JSON envelope with the real reason
        match parse_accounts_response(&body) {
            Err(e) if !status.is_success() => Err(anyhow!("BitGet returned {}: {:#}", status, e)),
            result => result,
        }
    }
}

/// Parse a futures accounts response into the first account's collateral
///
/// `available` is the balance the dashboard tracks; `crossedMaxAvailable`
/// is the free cross-margin collateral.
pub fn parse_accounts_response(body: &str) -> Result<Collateral> {
    let response: ApiResponse<Vec<FuturesAccount>> = serde_json::from_str(body)
        .context("Failed to parse BitGet response")?;

    if response.code != SUCCESS_CODE {
        return Err(anyhow!("Failed to retrieve collateral: {} ({})", response.msg, response.code));
    }

    let account = response
        .data
        .unwrap_or_default()
        .into_iter()
        .next()
        .ok_or_else(|| anyhow!("Failed to retrieve collateral: no futures account returned"))?;

    let balance = parse_amount("available", &account.available)?;
    let free_collateral = match account.crossed_max_available.as_deref() {
        Some(raw) => parse_amount("crossedMaxAvailable", raw)?,
        None => balance,
    };

    debug!(margin_coin = %account.margin_coin, balance, free_collateral, "BitGet collateral");
    Ok(Collateral { balance, free_collateral })
}
