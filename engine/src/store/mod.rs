//! Persistence port
//!
//! The engine treats durable storage as an external collaborator: a keyed
//! document store with optimistic-concurrency writes. Every update names the
//! version it read; a mismatch means the caller lost a race and receives
//! `ConflictError` rather than silently overwriting concurrent state.

pub mod memory;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::dispute::DisputeCase;
use crate::models::invitation::{Invitation, LcCreationAuthorization};
use crate::models::lc::LetterOfCredit;
use crate::models::trade::TradeRecord;

/// A stored value together with the version that must be quoted to update it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Versioned<T> {
    pub value: T,
    pub version: u64,
}

/// Durable store keyed by entity id, with compare-and-swap updates.
///
/// Implementations map `expected_version` mismatches and duplicate inserts to
/// `EngineError::Conflict`; every other backend failure surfaces as
/// `EngineError::Storage`.
#[async_trait]
pub trait Store: Send + Sync {
    // Invitations
    async fn insert_invitation(&self, invitation: Invitation) -> Result<()>;
    async fn get_invitation(&self, id: &str) -> Result<Option<Versioned<Invitation>>>;
    async fn update_invitation(&self, invitation: Invitation, expected_version: u64) -> Result<u64>;
    /// All invitations where the user is initiator or invitee
    async fn invitations_for_user(&self, user_id: &str) -> Result<Vec<Invitation>>;
    /// All invitations still stored as pending (sweep input)
    async fn pending_invitations(&self) -> Result<Vec<Versioned<Invitation>>>;

    // LC creation authorizations
    async fn insert_authorization(&self, auth: LcCreationAuthorization) -> Result<()>;
    async fn find_authorization(
        &self,
        buyer_id: &str,
        seller_id: &str,
    ) -> Result<Option<Versioned<LcCreationAuthorization>>>;
    async fn update_authorization(
        &self,
        auth: LcCreationAuthorization,
        expected_version: u64,
    ) -> Result<u64>;

    // Letters of credit
    async fn insert_lc(&self, lc: LetterOfCredit) -> Result<()>;
    async fn get_lc(&self, id: &str) -> Result<Option<Versioned<LetterOfCredit>>>;
    async fn find_lc_by_number(&self, lc_number: &str) -> Result<Option<Versioned<LetterOfCredit>>>;
    async fn update_lc(&self, lc: LetterOfCredit, expected_version: u64) -> Result<u64>;

    // Disputes
    async fn insert_dispute(&self, dispute: DisputeCase) -> Result<()>;
    async fn get_dispute(&self, id: &str) -> Result<Option<Versioned<DisputeCase>>>;
    async fn find_dispute_by_lc(&self, lc_id: &str) -> Result<Option<Versioned<DisputeCase>>>;
    async fn update_dispute(&self, dispute: DisputeCase, expected_version: u64) -> Result<u64>;

    // Trade records
    async fn insert_trade(&self, trade: TradeRecord) -> Result<()>;
    async fn get_trade(&self, id: &str) -> Result<Option<Versioned<TradeRecord>>>;
    async fn update_trade(&self, trade: TradeRecord, expected_version: u64) -> Result<u64>;
}
