//! Engine error taxonomy
//!
//! Every operation exposed by the engine returns one of these variants.
//! The taxonomy is deliberately closed: callers branch on the variant to
//! decide whether an operation is safe to retry, must be reconciled, or
//! failed for good.

use thiserror::Error;

use crate::models::lc::LcStatus;

/// Errors surfaced by the LC lifecycle engine
#[derive(Error, Debug)]
pub enum EngineError {
    /// Malformed input, caller's fault, no side effect occurred
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Actor lacks the role or pairing required for the operation
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// No record with the given id
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// Invitation already reached a terminal status
    #[error("Invitation {0} has already been responded to")]
    AlreadyResponded(String),

    /// A second funding attempt hit an LC that is already funded
    #[error("LC {0} is already funded")]
    AlreadyFunded(String),

    /// Invitation deadline has passed
    #[error("Invitation {0} expired")]
    Expired(String),

    /// State-machine violation; carries both sides for diagnostics
    #[error("Illegal transition for LC {lc_id}: {current:?} -> {target:?}")]
    IllegalTransition {
        lc_id: String,
        current: LcStatus,
        target: LcStatus,
    },

    /// Lost a concurrent write race; safe to retry after a fresh read
    #[error("Conflict on {kind} {id}: stale version, re-read and retry")]
    Conflict { kind: &'static str, id: String },

    /// Dispute split does not conserve escrowed funds
    #[error(
        "Imbalanced resolution: buyer {buyer_amount} + seller {seller_amount} != escrow balance {balance}"
    )]
    ImbalancedResolution {
        buyer_amount: i64,
        seller_amount: i64,
        balance: i64,
    },

    /// Ledger outcome unknown; must be reconciled, never blindly retried
    #[error("Ledger outcome pending for key {idempotency_key}: reconcile before retrying")]
    LedgerPending { idempotency_key: String },

    /// Archive window does not fit inside the trade lifetime
    #[error("Archive window mismatch: {0}")]
    WindowMismatch(String),

    /// Definitive ledger-side failure; the debit did not happen
    #[error("Ledger error: {0}")]
    Ledger(#[source] anyhow::Error),

    /// Persistence collaborator failure
    #[error("Storage error: {0}")]
    Storage(#[source] anyhow::Error),

    /// Messaging collaborator failure
    #[error("Messaging error: {0}")]
    Messaging(#[source] anyhow::Error),
}

impl EngineError {
    /// True only for errors the caller may retry after a fresh read.
    pub fn is_retryable_after_reread(&self) -> bool {
        matches!(self, EngineError::Conflict { .. })
    }

    /// True for outcomes that must go through explicit reconciliation.
    pub fn requires_reconciliation(&self) -> bool {
        matches!(self, EngineError::LedgerPending { .. })
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
