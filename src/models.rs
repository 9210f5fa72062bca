// src/models.rs
// Core types shared by the loader, the store and the dashboard API

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Pseudo strategy that sums every strategy per date
pub const TOTAL_ACCOUNT: &str = "Total_Account";

/// One end-of-day row for a (date, strategy) pair in a user's table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountSnapshot {
    pub date: NaiveDate,
    pub strategy: String,
    /// Account value at end of day (USD)
    pub collateral: f64,
    /// PnL for the day, including deposits
    pub total_pnl: f64,
    pub deposit: f64,
    pub withdrawal: f64,
    pub btc_pnl: f64,
    pub eth_pnl: f64,
    pub pos_size: f64,
    pub user_id: String,
}

impl AccountSnapshot {
    /// Snapshot with every money column zeroed
    pub fn new(date: NaiveDate, strategy: &str, user_id: &str) -> Self {
        Self {
            date,
            strategy: strategy.to_string(),
            collateral: 0.0,
            total_pnl: 0.0,
            deposit: 0.0,
            withdrawal: 0.0,
            btc_pnl: 0.0,
            eth_pnl: 0.0,
            pos_size: 0.0,
            user_id: user_id.to_string(),
        }
    }
}

/// Exchanges the loader knows how to update
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Exchange {
    BitGet,
    Hyperliquid,
    Deribit,
}

impl Exchange {
    pub const ALL: [Exchange; 3] = [Exchange::BitGet, Exchange::Hyperliquid, Exchange::Deribit];

    pub fn name(&self) -> &'static str {
        match self {
            Exchange::BitGet => "BitGet",
            Exchange::Hyperliquid => "Hyperliquid",
            Exchange::Deribit => "Deribit",
        }
    }

    /// Strategy label written for live-fetched exchanges.
    /// Deribit has none: it copies forward whatever manual strategy matches.
    pub fn strategy(&self) -> Option<&'static str> {
        match self {
            Exchange::BitGet => Some("Bitget"),
            Exchange::Hyperliquid => Some("HL"),
            Exchange::Deribit => None,
        }
    }
}

impl fmt::Display for Exchange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Exchange {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "bitget" => Ok(Exchange::BitGet),
            "hyperliquid" | "hl" => Ok(Exchange::Hyperliquid),
            "deribit" => Ok(Exchange::Deribit),
            other => Err(format!("Unknown exchange: {}", other)),
        }
    }
}

/// Balance reported by one exchange account
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Collateral {
    pub balance: f64,
    pub free_collateral: f64,
}

/// Result of loading one exchange, rendered for the caller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadOutcome {
    pub exchange: Exchange,
    pub success: bool,
    pub message: String,
}

impl LoadOutcome {
    pub fn ok(exchange: Exchange, message: String) -> Self {
        Self { exchange, success: true, message }
    }

    pub fn failed(exchange: Exchange, message: String) -> Self {
        Self { exchange, success: false, message }
    }
}

/// Format a number with thousands separators and two decimals ("12,345.67")
pub fn format_thousands(value: f64) -> String {
    let formatted = format!("{:.2}", value.abs());
    let (int_part, frac_part) = formatted.split_once('.').unwrap_or((&formatted, "00"));

    let mut grouped = String::with_capacity(int_part.len() + int_part.len() / 3);
    for (i, ch) in int_part.chars().enumerate() {
        if i > 0 && (int_part.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }

    let sign = if value < 0.0 && formatted != "0.00" { "-" } else { "" };
    format!("{}{}.{}", sign, grouped, frac_part)
}

// ============================================================================
// Tests
// ============================================================================
