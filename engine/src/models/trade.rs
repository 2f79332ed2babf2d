//! Trade records
//!
//! One record per financial trade, bound 1:1 to the hashed archive of the
//! negotiation that produced it. `is_archived` is only ever set together
//! with a verifiable archive.

use chrono::{DateTime, Utc};
use meridian_types::{AssetInfo, TradeDirection, TradeStatus, TradeType};
use serde::{Deserialize, Serialize};

use super::archive::ChatArchive;

/// A participant on a trade record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeParticipant {
    pub matrix_user_id: String,
    pub username: String,
    pub role: String,
}

/// Settlement transaction stamp from the ledger backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementTransaction {
    pub hash: String,
    pub source_account: String,
    pub operation_type: String,
    pub success: bool,
    pub ledger: Option<u64>,
    pub fee: Option<i64>,
    pub memo: Option<String>,
    pub error_message: Option<String>,
}

/// The financial outcome record of one trade
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeRecord {
    pub id: String,
    pub order_id: String,
    pub room_id: String,
    pub direction: TradeDirection,
    pub trade_type: TradeType,
    pub status: TradeStatus,
    pub base_asset: AssetInfo,
    pub counter_asset: AssetInfo,
    /// Minor units of the base asset
    pub amount: i64,
    /// Minor units of counter asset per unit of base asset
    pub price: i64,
    pub total_value: i64,
    pub initiator: TradeParticipant,
    pub counterparty: TradeParticipant,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub settlement_transaction: Option<SettlementTransaction>,
    pub chat_archive: Option<ChatArchive>,
    pub notes: Option<String>,
    pub tags: Vec<String>,
    pub is_archived: bool,
}

impl TradeRecord {
    /// Invariant check: archived records carry a verifiable archive
    pub fn archive_consistent(&self) -> bool {
        if !self.is_archived {
            return true;
        }
        self.chat_archive
            .as_ref()
            .map(|a| a.verify_integrity())
            .unwrap_or(false)
    }
}
