//! Currency and asset types
//!
//! Settlement currencies supported by the LC engine. Amounts are carried as
//! `i64` minor units of the currency (e.g. micro-USDC), never floats.

use serde::{Deserialize, Serialize};

/// Settlement currencies accepted for LC escrow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Currency {
    /// USD Coin
    USDC,
    /// Tether
    USDT,
    /// Euro Coin
    EURC,
    /// Stellar Lumens
    XLM,
}

impl Currency {
    /// Currency code as string
    pub fn code(&self) -> &'static str {
        match self {
            Currency::USDC => "USDC",
            Currency::USDT => "USDT",
            Currency::EURC => "EURC",
            Currency::XLM => "XLM",
        }
    }

    /// Human-readable name
    pub fn name(&self) -> &'static str {
        match self {
            Currency::USDC => "USD Coin",
            Currency::USDT => "Tether",
            Currency::EURC => "Euro Coin",
            Currency::XLM => "Stellar Lumens",
        }
    }

    /// Conversion factor from whole units to minor (atomic) units
    pub fn minor_unit_factor(&self) -> i64 {
        match self {
            Currency::USDC | Currency::USDT | Currency::EURC => 1_000_000, // 6 decimals
            Currency::XLM => 10_000_000,                                   // 7 decimals (stroops)
        }
    }
}

impl std::fmt::Display for Currency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.code())
    }
}

impl std::str::FromStr for Currency {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "USDC" => Ok(Currency::USDC),
            "USDT" => Ok(Currency::USDT),
            "EURC" => Ok(Currency::EURC),
            "XLM" | "LUMENS" => Ok(Currency::XLM),
            _ => Err(format!("Unknown currency: {}", s)),
        }
    }
}

/// Asset descriptor on either side of a trade record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetInfo {
    pub code: String,
    pub name: String,
    /// Issuing account, absent for native assets
    pub issuer: Option<String>,
    pub asset_type: AssetType,
}

/// Kind of asset referenced in a trade
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetType {
    Native,
    CreditAlphanum4,
    CreditAlphanum12,
}
