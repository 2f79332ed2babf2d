//! Letter of Credit model and state machine tables
//!
//! `LcStatus` is a closed enum and every legal transition is listed in one
//! exhaustive table, so an illegal move is a construction-time concern rather
//! than a runtime string comparison. The table also pins, per transition,
//! which role may request it and which side-effect receipt must already
//! exist.

use chrono::{DateTime, NaiveDate, Utc};
use meridian_types::{Currency, PartyRole};
use serde::{Deserialize, Serialize};

/// LC payment instrument type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LcType {
    Sight,
    Usance,
    Revolving,
}

/// One party to the LC contract
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeParty {
    pub name: String,
    pub address: String,
    pub matrix_id: String,
    pub wallet_address: Option<String>,
}

/// Commercial terms, fixed at creation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LcTerms {
    pub lc_type: LcType,
    /// Minor units of `currency`; must equal `quantity * unit_price`
    pub amount: i64,
    pub currency: Currency,
    pub buyer: TradeParty,
    pub seller: TradeParty,
    pub commodity: String,
    pub quantity: i64,
    /// Minor units of `currency` per unit of commodity
    pub unit_price: i64,
    pub incoterms: String,
    pub port_of_loading: String,
    pub port_of_destination: String,
    pub expiry_date: NaiveDate,
    pub latest_shipment_date: NaiveDate,
    pub required_documents: Vec<String>,
    pub issuing_bank: Option<String>,
    pub confirming_bank: Option<String>,
    pub additional_terms: Option<String>,
    pub partial_shipments: bool,
    pub transhipment: bool,
}

impl LcTerms {
    /// Total contract value, `None` when the product overflows `i64`
    pub fn total_value(&self) -> Option<i64> {
        self.quantity.checked_mul(self.unit_price)
    }
}

/// Canonical LC status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LcStatus {
    Draft,
    Negotiating,
    Signed,
    Funded,
    Shipped,
    DocumentsSubmitted,
    Delivered,
    Completed,
    Disputed,
    Cancelled,
}

impl LcStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LcStatus::Draft => "draft",
            LcStatus::Negotiating => "negotiating",
            LcStatus::Signed => "signed",
            LcStatus::Funded => "funded",
            LcStatus::Shipped => "shipped",
            LcStatus::DocumentsSubmitted => "documents_submitted",
            LcStatus::Delivered => "delivered",
            LcStatus::Completed => "completed",
            LcStatus::Disputed => "disputed",
            LcStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, LcStatus::Completed | LcStatus::Cancelled)
    }

    /// Statuses from which a dispute may be raised
    pub fn dispute_eligible(&self) -> bool {
        matches!(
            self,
            LcStatus::Signed
                | LcStatus::Funded
                | LcStatus::Shipped
                | LcStatus::DocumentsSubmitted
                | LcStatus::Delivered
        )
    }

    /// Display-only progress lookup; monotonic along the happy path and
    /// never used as a gate.
    pub fn progress_percent(&self) -> u8 {
        match self {
            LcStatus::Draft => 5,
            LcStatus::Negotiating => 15,
            LcStatus::Signed => 30,
            LcStatus::Funded => 45,
            LcStatus::Shipped => 60,
            LcStatus::DocumentsSubmitted => 75,
            LcStatus::Delivered => 90,
            LcStatus::Completed => 100,
            LcStatus::Disputed => 90,
            LcStatus::Cancelled => 100,
        }
    }
}

/// Which role may request a given transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoleRule {
    BuyerOnly,
    SellerOnly,
    EitherParty,
}

/// Which side-effect receipt must accompany a given transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvidenceRule {
    None,
    FundingReceipt,
    ReleaseReceipt,
    RefundReceipt,
    VerifiedDocuments,
}

/// Authorization + precondition pair for one legal transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitionRule {
    pub role: RoleRule,
    pub evidence: EvidenceRule,
}

/// Proof that a required side-effect already completed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum TransitionEvidence {
    /// Escrow funding confirmed by the settlement coordinator
    FundingReceipt { tx_ref: String },
    /// Escrow release confirmed by the settlement coordinator
    ReleaseReceipt { tx_ref: String },
    /// Full refund to the buyer confirmed by the settlement coordinator
    RefundReceipt { tx_ref: String },
    /// Documents checked against the LC's required set
    VerifiedDocuments { documents: Vec<String> },
    /// Shipment notice, optional tracking reference
    ShipmentNotice { tracking: Option<String> },
}

impl TransitionEvidence {
    fn satisfies(&self, rule: EvidenceRule) -> bool {
        matches!(
            (self, rule),
            (TransitionEvidence::FundingReceipt { .. }, EvidenceRule::FundingReceipt)
                | (TransitionEvidence::ReleaseReceipt { .. }, EvidenceRule::ReleaseReceipt)
                | (TransitionEvidence::RefundReceipt { .. }, EvidenceRule::RefundReceipt)
                | (TransitionEvidence::VerifiedDocuments { .. }, EvidenceRule::VerifiedDocuments)
        )
    }
}

/// The exhaustive transition table.
///
/// Returns `None` when `target` is not a legal successor of `current`.
pub fn transition_rule(current: LcStatus, target: LcStatus) -> Option<TransitionRule> {
    use EvidenceRule as E;
    use LcStatus::*;
    use RoleRule as R;

    let rule = |role, evidence| Some(TransitionRule { role, evidence });

    match (current, target) {
        (Draft, Negotiating) => rule(R::EitherParty, E::None),
        (Negotiating, Signed) => rule(R::EitherParty, E::None),
        (Signed, Funded) => rule(R::BuyerOnly, E::FundingReceipt),
        (Funded, Shipped) => rule(R::SellerOnly, E::None),
        (Shipped, DocumentsSubmitted) => rule(R::SellerOnly, E::None),
        (DocumentsSubmitted, Delivered) => rule(R::BuyerOnly, E::VerifiedDocuments),
        (Delivered, Completed) => rule(R::EitherParty, E::ReleaseReceipt),

        // Disputes freeze the machine; reachable from signed through delivered.
        (Signed | Funded | Shipped | DocumentsSubmitted | Delivered, Disputed) => {
            rule(R::EitherParty, E::None)
        }
        // Resolution outcomes are the only exits from Disputed.
        (Disputed, Completed) => rule(R::EitherParty, E::ReleaseReceipt),
        (Disputed, Cancelled) => rule(R::EitherParty, E::RefundReceipt),

        // Cancellation is free before funding, refund-gated after.
        (Draft | Negotiating | Signed, Cancelled) => rule(R::EitherParty, E::None),
        (Funded | Shipped | DocumentsSubmitted | Delivered, Cancelled) => {
            rule(R::EitherParty, E::RefundReceipt)
        }

        _ => None,
    }
}

/// Who is requesting a transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionActor {
    /// One of the two trade parties
    Party(PartyRole),
    /// The settlement coordinator or an arbiter acting on confirmed
    /// receipts; role rules do not apply, evidence rules still do
    System,
}

/// Checks the (predecessor, role, evidence) triple for one transition.
///
/// Returns the reason a transition is rejected, or `Ok(rule)` when legal.
pub fn check_transition(
    current: LcStatus,
    target: LcStatus,
    actor: TransitionActor,
    evidence: Option<&TransitionEvidence>,
) -> std::result::Result<TransitionRule, TransitionDenied> {
    let rule = transition_rule(current, target).ok_or(TransitionDenied::NotASuccessor)?;

    // Settlement receipts are minted inside the engine after the ledger
    // confirms a movement, and the dispute freeze must create a dispute
    // case. Parties reach both through the coordinator and dispute
    // services; a caller-presented receipt proves nothing.
    let internal_only = target == LcStatus::Disputed
        || matches!(
            rule.evidence,
            EvidenceRule::FundingReceipt | EvidenceRule::ReleaseReceipt | EvidenceRule::RefundReceipt
        );
    if internal_only && actor != TransitionActor::System {
        return Err(TransitionDenied::InternalOnly);
    }

    let role_ok = match (rule.role, actor) {
        (_, TransitionActor::System) => true,
        (RoleRule::BuyerOnly, TransitionActor::Party(role)) => role == PartyRole::Buyer,
        (RoleRule::SellerOnly, TransitionActor::Party(role)) => role == PartyRole::Seller,
        (RoleRule::EitherParty, TransitionActor::Party(_)) => true,
    };
    if !role_ok {
        return Err(TransitionDenied::WrongRole(rule.role));
    }

    if rule.evidence != EvidenceRule::None {
        match evidence {
            Some(ev) if ev.satisfies(rule.evidence) => {}
            _ => return Err(TransitionDenied::MissingEvidence(rule.evidence)),
        }
    }

    Ok(rule)
}

/// Why `check_transition` rejected a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionDenied {
    NotASuccessor,
    WrongRole(RoleRule),
    MissingEvidence(EvidenceRule),
    /// The transition is driven by the engine itself, never requested
    /// directly by a party
    InternalOnly,
}

/// A Letter of Credit instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LetterOfCredit {
    pub id: String,
    /// Unique, human-referenceable number (e.g. LC-2026-0042)
    pub lc_number: String,
    pub terms: LcTerms,
    pub status: LcStatus,
    pub contract_address: Option<String>,
    pub escrow_address: Option<String>,
    pub deployment_tx: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub funded_at: Option<DateTime<Utc>>,
    pub shipped_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Negotiation channel, when one was opened
    pub matrix_room_id: Option<String>,
}

impl LetterOfCredit {
    /// Role the given user plays on this LC, if any
    pub fn role_of(&self, user_id: &str) -> Option<PartyRole> {
        if self.terms.buyer.matrix_id == user_id {
            Some(PartyRole::Buyer)
        } else if self.terms.seller.matrix_id == user_id {
            Some(PartyRole::Seller)
        } else {
            None
        }
    }

    /// Stamp the per-status timestamp on entry into `status`
    pub fn record_entry(&mut self, status: LcStatus, now: DateTime<Utc>) {
        self.status = status;
        self.updated_at = now;
        match status {
            LcStatus::Funded => self.funded_at = Some(now),
            LcStatus::Shipped => self.shipped_at = Some(now),
            LcStatus::Completed | LcStatus::Cancelled => self.completed_at = Some(now),
            _ => {}
        }
    }
}
