//! Dispute resolution sub-process
//!
//! Open -> UnderReview -> Resolved, with one appeal cycle
//! (Resolved -> Appealed -> UnderReview) permitted. Raising a dispute moves
//! the LC to `Disputed`, which freezes every party-driven transition until
//! an arbiter resolves.
//!
//! Resolution is the only place split payouts happen. The conservation check
//! runs against a freshly queried escrow balance plus any payout a previous
//! partially-completed attempt already executed, so a retry after a pending
//! leg neither double-pays nor trips a false imbalance.

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::coordination::LcLockRegistry;
use crate::error::{EngineError, Result};
use crate::ledger::TransferStatus;
use crate::logging::{sanitize_amount, sanitize_id};
use crate::models::dispute::{
    DisputeCase, DisputeStatus, Evidence, Resolution, ResolutionDecision,
};
use crate::models::lc::{LcStatus, LetterOfCredit, TransitionEvidence};
use crate::models::ActorContext;
use crate::services::audit::{AuditAction, AuditEntry, AuditLog};
use crate::services::lifecycle::{ActorKind, LcLifecycle};
use crate::services::settlement::SettlementCoordinator;
use crate::store::Store;
use meridian_types::{Currency, PartyRole};

/// Evidence as submitted by a party, before the engine stamps it
#[derive(Debug, Clone)]
pub struct EvidenceSubmission {
    pub description: String,
    /// Optional pointer to supporting material, e.g. a trade record whose
    /// chat archive backs the claim
    pub reference: Option<String>,
}

pub struct DisputeService {
    store: Arc<dyn Store>,
    lifecycle: Arc<LcLifecycle>,
    settlement: Arc<SettlementCoordinator>,
    locks: Arc<LcLockRegistry>,
    audit: Arc<AuditLog>,
}

impl DisputeService {
    pub fn new(
        store: Arc<dyn Store>,
        lifecycle: Arc<LcLifecycle>,
        settlement: Arc<SettlementCoordinator>,
        locks: Arc<LcLockRegistry>,
        audit: Arc<AuditLog>,
    ) -> Self {
        Self { store, lifecycle, settlement, locks, audit }
    }

    /// Raise a dispute on an LC between Signed and Delivered. Moves the LC
    /// to `Disputed`; at most one dispute per LC.
    pub async fn raise_dispute(
        &self,
        ctx: &ActorContext,
        lc_id: &str,
        reason: &str,
        initial_evidence: Vec<EvidenceSubmission>,
    ) -> Result<DisputeCase> {
        let _guard = self.locks.acquire(lc_id).await;

        let lc = self.lifecycle.get_lc(lc_id).await?;
        let raiser_role = lc.role_of(&ctx.user_id).ok_or_else(|| {
            EngineError::Unauthorized("only a party to the LC may raise a dispute".into())
        })?;
        // One dispute per LC, checked ahead of eligibility so a second
        // attempt reports the existing case rather than the frozen status.
        if self.store.find_dispute_by_lc(lc_id).await?.is_some() {
            return Err(EngineError::Conflict { kind: "dispute", id: lc_id.into() });
        }
        if !lc.status.dispute_eligible() {
            return Err(EngineError::IllegalTransition {
                lc_id: lc_id.into(),
                current: lc.status,
                target: LcStatus::Disputed,
            });
        }
        if reason.trim().is_empty() {
            return Err(EngineError::Validation("dispute reason must not be empty".into()));
        }

        // The freeze is engine-driven; the party check above already ran.
        self.lifecycle
            .apply_transition(&ctx.user_id, ActorKind::System, lc_id, LcStatus::Disputed, None)
            .await?;

        let now = Utc::now();
        let mut evidence = Vec::with_capacity(initial_evidence.len());
        for submission in initial_evidence {
            evidence.push(self.stamp_evidence(&ctx.user_id, submission, now).await?);
        }
        let dispute = DisputeCase {
            id: Uuid::new_v4().to_string(),
            lc_id: lc_id.to_string(),
            raised_by: ctx.user_id.clone(),
            raised_at: now,
            reason: reason.to_string(),
            evidence,
            status: DisputeStatus::Open,
            arbiter: None,
            resolution: None,
            appeal_count: 0,
        };
        self.store.insert_dispute(dispute.clone()).await?;

        self.audit
            .append(
                AuditEntry::new(&ctx.user_id, AuditAction::Dispute, "dispute", &dispute.id)
                    .detail(format!("lc {lc_id}, raised by {}", raiser_role.as_str())),
            )
            .await;
        info!(
            dispute_id = %sanitize_id(&dispute.id),
            lc_id = %sanitize_id(lc_id),
            "Dispute raised; LC frozen"
        );
        Ok(dispute)
    }

    /// Assign an arbiter, moving the case to UnderReview. Valid from Open
    /// and, after an appeal, from Appealed. The arbiter must not be a party
    /// to the LC.
    pub async fn assign_arbiter(&self, dispute_id: &str, arbiter_id: &str) -> Result<DisputeCase> {
        let versioned = self.fetch(dispute_id).await?;
        let mut dispute = versioned.value;

        if !matches!(dispute.status, DisputeStatus::Open | DisputeStatus::Appealed) {
            return Err(EngineError::Validation(format!(
                "dispute {dispute_id} is {:?}, arbiter assignment requires Open or Appealed",
                dispute.status
            )));
        }
        let lc = self.lifecycle.get_lc(&dispute.lc_id).await?;
        if lc.role_of(arbiter_id).is_some() {
            return Err(EngineError::Validation(
                "arbiter must not be a party to the disputed LC".into(),
            ));
        }

        dispute.arbiter = Some(arbiter_id.to_string());
        dispute.status = DisputeStatus::UnderReview;
        self.store.update_dispute(dispute.clone(), versioned.version).await?;
        info!(dispute_id = %sanitize_id(dispute_id), "Arbiter assigned, case under review");
        Ok(dispute)
    }

    /// Append evidence. Allowed while the case is Open or UnderReview, from
    /// either party or the arbiter. Archive-backed references are
    /// integrity-verified before acceptance.
    pub async fn submit_evidence(
        &self,
        ctx: &ActorContext,
        dispute_id: &str,
        submission: EvidenceSubmission,
    ) -> Result<DisputeCase> {
        let versioned = self.fetch(dispute_id).await?;
        let mut dispute = versioned.value;

        if !dispute.status.accepts_evidence() {
            return Err(EngineError::Validation(format!(
                "dispute {dispute_id} is {:?} and no longer accepts evidence",
                dispute.status
            )));
        }
        let lc = self.lifecycle.get_lc(&dispute.lc_id).await?;
        let is_arbiter = dispute.arbiter.as_deref() == Some(ctx.user_id.as_str());
        if lc.role_of(&ctx.user_id).is_none() && !is_arbiter {
            return Err(EngineError::Unauthorized(
                "only the parties or the arbiter may submit evidence".into(),
            ));
        }

        let entry = self.stamp_evidence(&ctx.user_id, submission, Utc::now()).await?;
        dispute.evidence.push(entry);
        self.store.update_dispute(dispute.clone(), versioned.version).await?;
        Ok(dispute)
    }

    /// Binding resolution by the arbiter.
    ///
    /// The payout split must conserve the escrow balance exactly. Payouts
    /// run one leg at a time under the per-LC lock; a Pending leg leaves the
    /// case UnderReview for a later retry, whose replayed keys make the
    /// already-executed leg a no-op.
    pub async fn resolve(
        &self,
        ctx: &ActorContext,
        dispute_id: &str,
        decision: ResolutionDecision,
        buyer_amount: i64,
        seller_amount: i64,
        reasoning: &str,
    ) -> Result<DisputeCase> {
        let versioned = self.fetch(dispute_id).await?;
        let mut dispute = versioned.value;
        let lc_id = dispute.lc_id.clone();
        let _guard = self.locks.acquire(&lc_id).await;

        if dispute.arbiter.as_deref() != Some(ctx.user_id.as_str()) {
            return Err(EngineError::Unauthorized(
                "only the assigned arbiter may resolve a dispute".into(),
            ));
        }
        if dispute.status != DisputeStatus::UnderReview {
            return Err(EngineError::Validation(format!(
                "dispute {dispute_id} is {:?}, resolution requires UnderReview",
                dispute.status
            )));
        }
        if buyer_amount < 0 || seller_amount < 0 {
            return Err(EngineError::Validation("payout amounts must be non-negative".into()));
        }
        match decision {
            ResolutionDecision::ReleaseToSeller if buyer_amount != 0 => {
                return Err(EngineError::Validation(
                    "full release must not pay the buyer".into(),
                ))
            }
            ResolutionDecision::RefundToBuyer if seller_amount != 0 => {
                return Err(EngineError::Validation(
                    "full refund must not pay the seller".into(),
                ))
            }
            _ => {}
        }

        let lc = self.lifecycle.get_lc(&lc_id).await?;
        // A dispute raised before funding has no escrow account; that is a
        // zero balance, resolvable only by a zero/zero split.
        let escrow = lc.escrow_address.clone();
        let currency = lc.terms.currency;
        let buyer_key = format!("resolve-{dispute_id}-buyer");
        let seller_key = format!("resolve-{dispute_id}-seller");

        // Conservation: fresh balance, plus whatever an earlier attempt of
        // this same resolution already paid out, must match the split.
        let balance = match &escrow {
            Some(addr) => self.settlement.get_escrow_balance(addr, currency).await?,
            None => 0,
        };
        let already_paid = self.executed_payout(&buyer_key, buyer_amount).await?
            + self.executed_payout(&seller_key, seller_amount).await?;
        if buyer_amount + seller_amount != balance + already_paid {
            warn!(
                dispute_id = %sanitize_id(dispute_id),
                balance = %sanitize_amount(balance),
                "Rejected imbalanced resolution"
            );
            return Err(EngineError::ImbalancedResolution {
                buyer_amount,
                seller_amount,
                balance: balance + already_paid,
            });
        }

        let buyer_tx = self
            .payout_leg(&lc, &escrow, PartyRole::Buyer, buyer_amount, currency, &buyer_key)
            .await?;
        let seller_tx = self
            .payout_leg(&lc, &escrow, PartyRole::Seller, seller_amount, currency, &seller_key)
            .await?;

        let now = Utc::now();
        dispute.resolution = Some(Resolution {
            decision,
            buyer_amount,
            seller_amount,
            reasoning: reasoning.to_string(),
            resolved_at: now,
            resolved_by: ctx.user_id.clone(),
        });
        dispute.status = DisputeStatus::Resolved;
        self.store.update_dispute(dispute.clone(), versioned.version).await?;

        // A post-appeal re-resolution finds the LC already terminal; the
        // first resolution is the one that closes the state machine.
        if lc.status == LcStatus::Disputed {
            let (target, evidence) = match decision {
                ResolutionDecision::RefundToBuyer => (
                    LcStatus::Cancelled,
                    TransitionEvidence::RefundReceipt { tx_ref: buyer_tx.clone() },
                ),
                ResolutionDecision::ReleaseToSeller | ResolutionDecision::Split => (
                    LcStatus::Completed,
                    TransitionEvidence::ReleaseReceipt { tx_ref: seller_tx.clone() },
                ),
            };
            self.lifecycle
                .apply_transition(&ctx.user_id, ActorKind::System, &lc_id, target, Some(evidence))
                .await?;
        }

        self.audit
            .append(
                AuditEntry::new(&ctx.user_id, AuditAction::Resolve, "dispute", dispute_id)
                    .detail(format!(
                        "{decision:?}: buyer {buyer_tx}, seller {seller_tx}"
                    )),
            )
            .await;
        info!(dispute_id = %sanitize_id(dispute_id), ?decision, "Dispute resolved");
        Ok(dispute)
    }

    /// Appeal a resolved dispute. Permitted exactly once, by a party. The
    /// case sits in Appealed until an arbiter picks it back up.
    pub async fn appeal(&self, ctx: &ActorContext, dispute_id: &str) -> Result<DisputeCase> {
        let versioned = self.fetch(dispute_id).await?;
        let mut dispute = versioned.value;

        let lc = self.lifecycle.get_lc(&dispute.lc_id).await?;
        if lc.role_of(&ctx.user_id).is_none() {
            return Err(EngineError::Unauthorized(
                "only a party to the LC may appeal".into(),
            ));
        }
        if !dispute.can_appeal() {
            return Err(EngineError::Validation(format!(
                "dispute {dispute_id} cannot be appealed ({:?}, {} prior appeal(s))",
                dispute.status, dispute.appeal_count
            )));
        }

        dispute.appeal_count += 1;
        dispute.status = DisputeStatus::Appealed;
        self.store.update_dispute(dispute.clone(), versioned.version).await?;
        info!(dispute_id = %sanitize_id(dispute_id), "Resolution appealed");
        Ok(dispute)
    }

    pub async fn get_dispute(&self, dispute_id: &str) -> Result<DisputeCase> {
        Ok(self.fetch(dispute_id).await?.value)
    }

    async fn fetch(&self, dispute_id: &str) -> Result<crate::store::Versioned<DisputeCase>> {
        self.store
            .get_dispute(dispute_id)
            .await?
            .ok_or_else(|| EngineError::NotFound { kind: "dispute", id: dispute_id.into() })
    }

    /// Amount a prior attempt already moved under this payout key, or 0
    async fn executed_payout(&self, key: &str, amount: i64) -> Result<i64> {
        if amount == 0 {
            return Ok(0);
        }
        match self.settlement.reconcile_transfer(key).await? {
            Some(outcome) if outcome.status == TransferStatus::Succeeded => Ok(amount),
            _ => Ok(0),
        }
    }

    /// Execute one payout leg. A zero leg moves nothing and needs neither
    /// an escrow account nor a wallet on that side.
    async fn payout_leg(
        &self,
        lc: &LetterOfCredit,
        escrow: &Option<String>,
        side: PartyRole,
        amount: i64,
        currency: Currency,
        key: &str,
    ) -> Result<String> {
        if amount == 0 {
            return Ok("none".into());
        }
        // Conservation already bounded the amounts by the escrow balance,
        // so a positive leg implies a funded escrow.
        let escrow = escrow.as_deref().ok_or_else(|| {
            EngineError::Validation(format!("LC {} has no escrow address", lc.id))
        })?;
        let party = match side {
            PartyRole::Buyer => &lc.terms.buyer,
            PartyRole::Seller => &lc.terms.seller,
        };
        let account = party.wallet_address.as_deref().ok_or_else(|| {
            EngineError::Validation(format!(
                "{} has no wallet address on the LC terms",
                side.as_str()
            ))
        })?;
        self.settlement.escrow_transfer(escrow, account, amount, currency, key).await
    }

    /// Stamp a submission into stored evidence, verifying any archive it
    /// points at.
    async fn stamp_evidence(
        &self,
        submitter: &str,
        submission: EvidenceSubmission,
        now: chrono::DateTime<Utc>,
    ) -> Result<Evidence> {
        if submission.description.trim().is_empty() {
            return Err(EngineError::Validation("evidence description must not be empty".into()));
        }
        if let Some(reference) = &submission.reference {
            if let Some(trade) = self.store.get_trade(reference).await? {
                if let Some(archive) = &trade.value.chat_archive {
                    if !archive.verify_integrity() {
                        return Err(EngineError::Validation(format!(
                            "referenced archive {reference} fails integrity verification"
                        )));
                    }
                }
            }
        }
        Ok(Evidence {
            id: Uuid::new_v4().to_string(),
            submitted_by: submitter.to_string(),
            submitted_at: now,
            description: submission.description,
            reference: submission.reference,
        })
    }
}
