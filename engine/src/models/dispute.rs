//! Dispute cases
//!
//! Evidence is append-only; the resolution is write-once per review cycle,
//! and funds conservation is checked against a fresh escrow balance at the
//! moment of resolution, never against a cached figure.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Dispute lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisputeStatus {
    Open,
    UnderReview,
    Resolved,
    Appealed,
}

impl DisputeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DisputeStatus::Open => "open",
            DisputeStatus::UnderReview => "under_review",
            DisputeStatus::Resolved => "resolved",
            DisputeStatus::Appealed => "appealed",
        }
    }

    /// Evidence may be submitted while the case is still being argued
    pub fn accepts_evidence(&self) -> bool {
        matches!(self, DisputeStatus::Open | DisputeStatus::UnderReview)
    }
}

/// A single piece of submitted evidence
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Evidence {
    pub id: String,
    pub submitted_by: String,
    pub submitted_at: DateTime<Utc>,
    pub description: String,
    /// Content reference (document hash, archive hash, URI)
    pub reference: Option<String>,
}

/// Arbiter's binding decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionDecision {
    /// Full release to the seller
    ReleaseToSeller,
    /// Full refund to the buyer; the LC is cancelled
    RefundToBuyer,
    /// Split between both parties; the LC completes
    Split,
}

/// Write-once resolution record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub decision: ResolutionDecision,
    /// Minor units going back to the buyer
    pub buyer_amount: i64,
    /// Minor units released to the seller
    pub seller_amount: i64,
    pub reasoning: String,
    pub resolved_at: DateTime<Utc>,
    pub resolved_by: String,
}

/// A dispute raised against an in-flight LC
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisputeCase {
    pub id: String,
    pub lc_id: String,
    pub raised_by: String,
    pub raised_at: DateTime<Utc>,
    pub reason: String,
    pub evidence: Vec<Evidence>,
    pub status: DisputeStatus,
    pub arbiter: Option<String>,
    pub resolution: Option<Resolution>,
    /// A single appeal is permitted per case
    pub appeal_count: u8,
}

impl DisputeCase {
    pub fn can_appeal(&self) -> bool {
        self.status == DisputeStatus::Resolved && self.appeal_count == 0
    }
}
