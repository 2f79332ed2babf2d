//! Collaboration invitations
//!
//! Two counterparties must mutually agree before any LC exists. An accepted
//! invitation is the only thing that authorizes LC creation for that exact
//! buyer/seller pair.
//!
//! Expiry is derived, not stored: `effective_status` re-checks the deadline
//! on every read, so a stale `Pending` row always reports `Expired` once the
//! deadline has passed, whether or not a background sweep ever ran.

use chrono::{DateTime, Utc};
use meridian_types::{Currency, PartyRole};
use serde::{Deserialize, Serialize};

/// One side of an invitation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvitationParty {
    pub user_id: String,
    pub role: PartyRole,
}

/// Optional commercial sketch attached to an invitation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreliminaryInfo {
    pub commodity: String,
    /// Minor units of `currency`
    pub estimated_amount: i64,
    pub currency: Currency,
    pub timeline: String,
}

/// Invitation lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvitationStatus {
    Pending,
    Accepted,
    Rejected,
    Expired,
    Cancelled,
}

impl InvitationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvitationStatus::Pending => "pending",
            InvitationStatus::Accepted => "accepted",
            InvitationStatus::Rejected => "rejected",
            InvitationStatus::Expired => "expired",
            InvitationStatus::Cancelled => "cancelled",
        }
    }

    /// Terminal statuses are immutable thereafter
    pub fn is_terminal(&self) -> bool {
        !matches!(self, InvitationStatus::Pending)
    }
}

/// Invitee's recorded answer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvitationResponse {
    pub accepted: bool,
    pub message: Option<String>,
    pub responded_at: DateTime<Utc>,
}

/// A collaboration invitation between two trading counterparties
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invitation {
    pub id: String,
    pub initiator: InvitationParty,
    pub invitee: InvitationParty,
    pub lc_title: String,
    pub message: Option<String>,
    pub preliminary_info: Option<PreliminaryInfo>,
    pub status: InvitationStatus,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub response: Option<InvitationResponse>,
}

impl Invitation {
    /// Status with time-based expiry applied.
    ///
    /// Must be consulted before any state-changing operation reads status.
    pub fn effective_status(&self, now: DateTime<Utc>) -> InvitationStatus {
        if self.status == InvitationStatus::Pending && now > self.expires_at {
            InvitationStatus::Expired
        } else {
            self.status
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.effective_status(now) == InvitationStatus::Expired
    }
}

/// Authorization to create an LC, produced by an accepted invitation.
///
/// Consumed by the state machine: `create_lc` requires an authorization for
/// exactly this buyer/seller pair. Retained after consumption for audit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LcCreationAuthorization {
    pub invitation_id: String,
    pub buyer_id: String,
    pub seller_id: String,
    pub authorized_at: DateTime<Utc>,
    pub consumed_by_lc: Option<String>,
}

impl LcCreationAuthorization {
    /// Whether this authorization covers exactly this buyer/seller pairing.
    /// Roles were fixed when the invitation was accepted, so a swapped pair
    /// does not match.
    pub fn covers(&self, buyer_id: &str, seller_id: &str) -> bool {
        self.buyer_id == buyer_id && self.seller_id == seller_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn pending_invitation(created: DateTime<Utc>) -> Invitation {
        Invitation {
            id: "inv-1".into(),
            initiator: InvitationParty { user_id: "@alice:m.org".into(), role: PartyRole::Buyer },
            invitee: InvitationParty { user_id: "@bob:m.org".into(), role: PartyRole::Seller },
            lc_title: "Coffee Q1".into(),
            message: None,
            preliminary_info: None,
            status: InvitationStatus::Pending,
            created_at: created,
            expires_at: created + Duration::days(5),
            response: None,
        }
    }

    #[test]
    fn pending_reports_expired_after_deadline() {
        let created = Utc::now();
        let inv = pending_invitation(created);
        assert_eq!(inv.effective_status(created + Duration::days(4)), InvitationStatus::Pending);
        assert_eq!(inv.effective_status(created + Duration::days(6)), InvitationStatus::Expired);
    }

    #[test]
    fn terminal_status_is_not_overridden_by_expiry() {
        let created = Utc::now();
        let mut inv = pending_invitation(created);
        inv.status = InvitationStatus::Rejected;
        assert_eq!(inv.effective_status(created + Duration::days(6)), InvitationStatus::Rejected);
    }

    #[test]
    fn authorization_binds_the_roles_it_was_accepted_with() {
        let auth = LcCreationAuthorization {
            invitation_id: "inv-1".into(),
            buyer_id: "@alice:m.org".into(),
            seller_id: "@bob:m.org".into(),
            authorized_at: Utc::now(),
            consumed_by_lc: None,
        };
        assert!(auth.covers("@alice:m.org", "@bob:m.org"));
        assert!(!auth.covers("@bob:m.org", "@alice:m.org"));
    }
}
