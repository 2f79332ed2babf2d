//! Trade record enums shared with consumers of the engine

use serde::{Deserialize, Serialize};

/// Direction of a trade from the initiator's point of view
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeDirection {
    Buy,
    Sell,
}

/// Kind of trade recorded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeType {
    Otc,
    Market,
    Lc,
}

/// Lifecycle status of a trade record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeStatus {
    Pending,
    Completed,
    Failed,
    Cancelled,
    Expired,
}

impl TradeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeStatus::Pending => "pending",
            TradeStatus::Completed => "completed",
            TradeStatus::Failed => "failed",
            TradeStatus::Cancelled => "cancelled",
            TradeStatus::Expired => "expired",
        }
    }

    /// Terminal statuses can never change again
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TradeStatus::Pending)
    }
}

/// Role a user plays in a collaboration or trade
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartyRole {
    Buyer,
    Seller,
}

impl PartyRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            PartyRole::Buyer => "buyer",
            PartyRole::Seller => "seller",
        }
    }

    /// The opposite side of the trade
    pub fn counterpart(&self) -> Self {
        match self {
            PartyRole::Buyer => PartyRole::Seller,
            PartyRole::Seller => PartyRole::Buyer,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counterpart_is_involutive() {
        assert_eq!(PartyRole::Buyer.counterpart().counterpart(), PartyRole::Buyer);
    }

    #[test]
    fn pending_is_the_only_non_terminal_trade_status() {
        assert!(!TradeStatus::Pending.is_terminal());
        assert!(TradeStatus::Completed.is_terminal());
        assert!(TradeStatus::Expired.is_terminal());
    }
}
