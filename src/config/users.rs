/// Per-user configuration
/// Resolves table names, database user ids and exchange credentials from the environment

use std::collections::HashMap;

/// Highest numbered Hyperliquid sub-account key probed (HYPERLIQUID2 .. HYPERLIQUID9)
const MAX_HYPERLIQUID_ACCOUNTS: usize = 9;

/// Users assumed when VALID_USERS is not set
pub const DEFAULT_USERS: [&str; 2] = ["user1", "user2"];

/// BitGet API credentials for one user
#[derive(Clone, PartialEq)]
pub struct BitgetCreds {
    pub api_key: String,
    pub api_secret: String,
    pub passphrase: String,
}

impl std::fmt::Debug for BitgetCreds {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BitgetCreds")
            .field("api_key", &self.api_key)
            .field("api_secret", &"***")
            .field("passphrase", &"***")
            .finish()
    }
}

/// A Hyperliquid wallet to read collateral from
#[derive(Debug, Clone, PartialEq)]
pub struct HyperliquidWallet {
    /// Config key the wallet was found under ("hyperliquid", "hyperliquid2", ...)
    pub config_key: String,
    /// 0x-prefixed wallet address
    pub address: String,
}

/// Everything the loader and the dashboard need to know about one data user
#[derive(Debug, Clone, PartialEq)]
pub struct UserProfile {
    /// Config key, e.g. "user1"
    pub key: String,
    /// SQLite table holding this user's snapshots
    pub table_name: String,
    /// Value written to the user_id column (also the dashboard login it belongs to)
    pub user_id: String,
    pub bitget: Option<BitgetCreds>,
    pub hyperliquid: Vec<HyperliquidWallet>,
    /// Copy forward manually maintained Deribit/option rows on each update
    pub deribit_copy: bool,
}

impl UserProfile {
    /// Loads a profile from a key/value map (used by tests and tools)
    pub fn from_map(user_key: &str, vars: &HashMap<String, String>) -> Self {
        Self::from_lookup(user_key, |k| vars.get(k).cloned())
    }

    /// Loads a profile using an arbitrary variable lookup
    ///
    /// Keys are resolved the same way for every setting: `{USER}_{KEY}` first,
    /// then the generic `{KEY}`, then the default.
    pub fn from_lookup<F>(user_key: &str, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let user_key = user_key.trim();
        let upper = user_key.to_uppercase();

        let table_name = user_var(&lookup, user_key, "TABLE_NAME")
            .unwrap_or_else(|| user_key.to_string());
        let user_id = user_var(&lookup, user_key, "USER_ID")
            .unwrap_or_else(|| user_key.to_string());

        let bitget = match (
            non_empty(lookup(&format!("BITGET_{}_API_KEY", upper))),
            non_empty(lookup(&format!("BITGET_{}_API_SECRET", upper))),
            non_empty(lookup(&format!("BITGET_{}_PASSPHRASE", upper))),
        ) {
            (Some(api_key), Some(api_secret), Some(passphrase)) => Some(BitgetCreds {
                api_key,
                api_secret,
                passphrase,
            }),
            _ => None,
        };

        let mut hyperliquid = Vec::new();
        for n in 1..=MAX_HYPERLIQUID_ACCOUNTS {
            let config_key = if n == 1 {
                "hyperliquid".to_string()
            } else {
                format!("hyperliquid{}", n)
            };
            let prefix = config_key.to_uppercase();
            let address = non_empty(lookup(&format!("{}_{}_WALLET", prefix, upper)))
                .or_else(|| non_empty(lookup(&format!("{}_{}_API_KEY", prefix, upper))));
            if let Some(address) = address {
                hyperliquid.push(HyperliquidWallet { config_key, address });
            }
        }

        let deribit_copy = user_var(&lookup, user_key, "DERIBIT_COPY")
            .map(|v| parse_bool(&v))
            .unwrap_or(false);

        Self {
            key: user_key.to_string(),
            table_name,
            user_id,
            bitget,
            hyperliquid,
            deribit_copy,
        }
    }
}

/// Resolves `{USER}_{KEY}`, falling back to the generic `{KEY}`
pub fn user_var<F>(lookup: &F, user_key: &str, key: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    if !user_key.is_empty() {
        let full_key = format!("{}_{}", user_key.to_uppercase(), key);
        if let Some(v) = non_empty(lookup(&full_key)) {
            return Some(v);
        }
    }
    non_empty(lookup(key))
}

/// Parses the VALID_USERS list ("user1, user2"), dropping blanks
pub fn parse_user_list(raw: Option<&str>) -> Vec<String> {
    let users: Vec<String> = raw
        .unwrap_or("")
        .split(',')
        .map(|u| u.trim().to_string())
        .filter(|u| !u.is_empty())
        .collect();

    if users.is_empty() {
        DEFAULT_USERS.iter().map(|u| u.to_string()).collect()
    } else {
        users
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_bool(value: &str) -> bool {
    matches!(value.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}
