/// Settings and configuration management
/// Handles environment variable loading and validation

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::env;
use std::time::Duration;

use crate::auth::Authenticator;
use crate::config::users::{parse_user_list, UserProfile};

// ============================================================================
// Exchange Endpoints
// ============================================================================

pub const BITGET_API_BASE: &str = "https://api.bitget.com";
pub const HYPERLIQUID_API_BASE: &str = "https://api.hyperliquid.xyz";

/// BitGet futures product whose account holds the collateral
pub const BITGET_PRODUCT_TYPE: &str = "USDT-FUTURES";

pub const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

// ============================================================================
// Storage & API Defaults
// ============================================================================

pub const DEFAULT_DB_PATH: &str = "accounts.db";
pub const DEFAULT_API_PORT: u16 = 8080;
pub const DEFAULT_API_BIND: &str = "127.0.0.1";

/// Strategy name fragments copied forward by the Deribit loader
pub const DERIBIT_STRATEGY_PATTERNS: [&str; 2] = ["deribit", "option"];

// ============================================================================
// Config
// ============================================================================

/// Process-wide configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub db_path: String,
    pub users: Vec<UserProfile>,
    pub auth: Authenticator,
    pub api_bind: String,
    pub api_port: u16,
    pub bitget_api_base: String,
    pub hyperliquid_api_base: String,
}

impl Config {
    /// Load configuration from environment variables
    ///
    /// # Errors
    ///
    /// Returns an error if API_PORT or AUTH_USERS cannot be parsed.
    pub fn from_env() -> Result<Self> {
        let vars: HashMap<String, String> = env::vars().collect();
        Self::from_map(&vars)
    }

    /// Load configuration from an explicit variable map
    pub fn from_map(vars: &HashMap<String, String>) -> Result<Self> {
        let get = |k: &str| vars.get(k).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let users = parse_user_list(get("VALID_USERS").as_deref())
            .iter()
            .map(|key| UserProfile::from_map(key, vars))
            .collect();

        let auth = Authenticator::parse(&get("AUTH_USERS").unwrap_or_default())
            .context("AUTH_USERS is malformed. Format: login:password:role[,login:password:role]")?;

        let api_port = match get("API_PORT") {
            Some(p) => p
                .parse::<u16>()
                .with_context(|| format!("API_PORT must be a port number (found '{}')", p))?,
            None => DEFAULT_API_PORT,
        };

        Ok(Self {
            db_path: get("DB_PATH").unwrap_or_else(|| DEFAULT_DB_PATH.to_string()),
            users,
            auth,
            api_bind: get("API_BIND").unwrap_or_else(|| DEFAULT_API_BIND.to_string()),
            api_port,
            bitget_api_base: get("BITGET_API_BASE").unwrap_or_else(|| BITGET_API_BASE.to_string()),
            hyperliquid_api_base: get("HYPERLIQUID_API_BASE")
                .unwrap_or_else(|| HYPERLIQUID_API_BASE.to_string()),
        })
    }

    /// Finds a configured data user by key ("user1")
    pub fn user(&self, key: &str) -> Option<&UserProfile> {
        self.users.iter().find(|u| u.key.eq_ignore_ascii_case(key.trim()))
    }
}
