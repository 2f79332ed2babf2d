//! LC state machine service
//!
//! Owns the canonical status of every Letter of Credit. All mutations are
//! check-then-act against the store's authoritative version under the per-LC
//! lock; a lost version race surfaces as `ConflictError` and the caller
//! re-reads.

use std::sync::Arc;

use chrono::{Datelike, Utc};
use tracing::{info, warn};
use uuid::Uuid;

use crate::coordination::LcLockRegistry;
use crate::error::{EngineError, Result};
use crate::logging::sanitize_id;
use crate::messaging::MessagingClient;
use crate::models::lc::{
    check_transition, LcStatus, LcTerms, LetterOfCredit, TransitionActor, TransitionDenied,
    TransitionEvidence,
};
use crate::models::ActorContext;
use crate::services::audit::{AuditAction, AuditEntry, AuditLog};
use crate::store::Store;
use crate::validation::validate_terms;

/// LC lifecycle service
pub struct LcLifecycle {
    store: Arc<dyn Store>,
    messaging: Arc<dyn MessagingClient>,
    locks: Arc<LcLockRegistry>,
    audit: Arc<AuditLog>,
}

impl LcLifecycle {
    pub fn new(
        store: Arc<dyn Store>,
        messaging: Arc<dyn MessagingClient>,
        locks: Arc<LcLockRegistry>,
        audit: Arc<AuditLog>,
    ) -> Self {
        Self { store, messaging, locks, audit }
    }

    /// Create an LC in `Draft`.
    ///
    /// Requires an unconsumed LC creation authorization for exactly this
    /// buyer/seller pair (produced by an accepted invitation) and the caller
    /// must be one of the two parties. Opens a negotiation channel when the
    /// messaging layer cooperates.
    pub async fn create_lc(&self, ctx: &ActorContext, terms: LcTerms) -> Result<LetterOfCredit> {
        validate_terms(&terms)?;

        let buyer_id = terms.buyer.matrix_id.clone();
        let seller_id = terms.seller.matrix_id.clone();
        if ctx.user_id != buyer_id && ctx.user_id != seller_id {
            return Err(EngineError::Unauthorized(
                "caller is not a party to the proposed LC".into(),
            ));
        }

        let authorization = self
            .store
            .find_authorization(&buyer_id, &seller_id)
            .await?
            .ok_or_else(|| {
                EngineError::Unauthorized(
                    "no accepted invitation authorizes LC creation for this pair".into(),
                )
            })?;

        let now = Utc::now();
        let id = Uuid::new_v4().to_string();
        let lc_number = format!(
            "LC-{}-{}",
            now.year(),
            &id[..8].to_uppercase()
        );
        if self.store.find_lc_by_number(&lc_number).await?.is_some() {
            return Err(EngineError::Conflict { kind: "lc", id: lc_number });
        }

        let matrix_room_id = match self
            .messaging
            .create_negotiation_channel(&[buyer_id.clone(), seller_id.clone()])
            .await
        {
            Ok(room) => Some(room),
            Err(e) => {
                warn!(lc_number = %lc_number, "Negotiation channel creation failed: {e:#}");
                None
            }
        };

        let lc = LetterOfCredit {
            id: id.clone(),
            lc_number: lc_number.clone(),
            terms,
            status: LcStatus::Draft,
            contract_address: None,
            escrow_address: None,
            deployment_tx: None,
            created_at: now,
            updated_at: now,
            funded_at: None,
            shipped_at: None,
            completed_at: None,
            matrix_room_id: matrix_room_id.clone(),
        };

        self.store.insert_lc(lc.clone()).await?;

        // Consume the authorization; exactly one LC per accepted invitation.
        let mut auth = authorization.value;
        auth.consumed_by_lc = Some(id.clone());
        self.store.update_authorization(auth, authorization.version).await?;

        self.audit
            .append(
                AuditEntry::new(&ctx.user_id, AuditAction::Create, "lc", &id)
                    .detail(lc_number.clone()),
            )
            .await;
        info!(lc_id = %sanitize_id(&id), lc_number = %lc_number, "LC created in draft");

        if let Some(room) = &matrix_room_id {
            let _ = self
                .messaging
                .post_system_notice(room, &format!("Letter of credit {lc_number} opened"))
                .await;
        }

        Ok(lc)
    }

    /// Party-driven transition request. Serializes on the per-LC lock.
    /// Receipt-gated targets (Funded, Completed, post-funding Cancelled)
    /// and the dispute freeze are refused here; those run through the
    /// settlement coordinator and dispute service.
    pub async fn advance(
        &self,
        ctx: &ActorContext,
        lc_id: &str,
        target: LcStatus,
        evidence: Option<TransitionEvidence>,
    ) -> Result<LetterOfCredit> {
        let _guard = self.locks.acquire(lc_id).await;
        self.apply_transition(&ctx.user_id, ActorKind::Caller, lc_id, target, evidence)
            .await
    }

    /// Cancel the LC. Free before funding; once escrow is in play the
    /// settlement coordinator's refund path is the only way out.
    pub async fn cancel(
        &self,
        ctx: &ActorContext,
        lc_id: &str,
        reason: &str,
    ) -> Result<LetterOfCredit> {
        let _guard = self.locks.acquire(lc_id).await;
        let lc = self
            .apply_transition(&ctx.user_id, ActorKind::Caller, lc_id, LcStatus::Cancelled, None)
            .await?;
        self.audit
            .append(
                AuditEntry::new(&ctx.user_id, AuditAction::Cancel, "lc", lc_id).detail(reason),
            )
            .await;
        Ok(lc)
    }

    pub async fn get_lc(&self, lc_id: &str) -> Result<LetterOfCredit> {
        Ok(self
            .store
            .get_lc(lc_id)
            .await?
            .ok_or_else(|| EngineError::NotFound { kind: "lc", id: lc_id.into() })?
            .value)
    }

    /// Display-only progress for a stored LC
    pub async fn progress(&self, lc_id: &str) -> Result<u8> {
        Ok(self.get_lc(lc_id).await?.status.progress_percent())
    }

    /// Core check-then-act transition. Assumes the caller holds the per-LC
    /// lock. `ActorKind::System` is for coordinator/arbiter paths acting on
    /// confirmed receipts; role rules still bind `ActorKind::Caller`.
    pub(crate) async fn apply_transition(
        &self,
        actor_id: &str,
        kind: ActorKind,
        lc_id: &str,
        target: LcStatus,
        evidence: Option<TransitionEvidence>,
    ) -> Result<LetterOfCredit> {
        let versioned = self
            .store
            .get_lc(lc_id)
            .await?
            .ok_or_else(|| EngineError::NotFound { kind: "lc", id: lc_id.into() })?;
        let mut lc = versioned.value;
        let current = lc.status;

        let actor = match kind {
            ActorKind::System => TransitionActor::System,
            ActorKind::Caller => {
                let role = lc.role_of(actor_id).ok_or_else(|| {
                    EngineError::Unauthorized("caller is not a party to this LC".into())
                })?;
                TransitionActor::Party(role)
            }
        };

        match check_transition(current, target, actor, evidence.as_ref()) {
            Ok(_) => {}
            Err(TransitionDenied::WrongRole(rule)) => {
                return Err(EngineError::Unauthorized(format!(
                    "transition {:?} -> {:?} requires {:?}",
                    current, target, rule
                )));
            }
            Err(TransitionDenied::InternalOnly) => {
                return Err(EngineError::Unauthorized(format!(
                    "transition {:?} -> {:?} is driven by the engine, not requested directly",
                    current, target
                )));
            }
            Err(TransitionDenied::NotASuccessor | TransitionDenied::MissingEvidence(_)) => {
                return Err(EngineError::IllegalTransition {
                    lc_id: lc_id.into(),
                    current,
                    target,
                });
            }
        }

        // Document verification must cover the full required set.
        if let Some(TransitionEvidence::VerifiedDocuments { documents }) = &evidence {
            let missing: Vec<&String> = lc
                .terms
                .required_documents
                .iter()
                .filter(|d| !documents.contains(d))
                .collect();
            if !missing.is_empty() {
                return Err(EngineError::Validation(format!(
                    "verified documents missing required entries: {missing:?}"
                )));
            }
        }

        let now = Utc::now();
        lc.record_entry(target, now);
        if let Some(TransitionEvidence::ShipmentNotice { .. }) = &evidence {
            lc.shipped_at = Some(now);
        }

        self.store.update_lc(lc.clone(), versioned.version).await?;

        self.audit
            .append(
                AuditEntry::new(actor_id, AuditAction::Transition, "lc", lc_id)
                    .statuses(current.as_str(), target.as_str()),
            )
            .await;
        info!(
            lc_id = %sanitize_id(lc_id),
            from = current.as_str(),
            to = target.as_str(),
            "LC transition applied"
        );

        if let Some(room) = &lc.matrix_room_id {
            let _ = self
                .messaging
                .post_system_notice(
                    room,
                    &format!("{} moved to {}", lc.lc_number, target.as_str()),
                )
                .await;
        }

        Ok(lc)
    }
}

/// Whether a transition request comes from a checked party or an internal
/// receipt-bearing path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ActorKind {
    Caller,
    System,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::MemoryMessaging;
    use crate::models::invitation::LcCreationAuthorization;
    use crate::store::memory::MemoryStore;
    use crate::validation::tests::sample_terms;

    struct Fixture {
        lifecycle: LcLifecycle,
    }

    async fn fixture_with_authorization() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let messaging = Arc::new(MemoryMessaging::new());
        store
            .insert_authorization(LcCreationAuthorization {
                invitation_id: "inv-1".into(),
                buyer_id: "@alice:m.org".into(),
                seller_id: "@bob:m.org".into(),
                authorized_at: Utc::now(),
                consumed_by_lc: None,
            })
            .await
            .unwrap();
        Fixture {
            lifecycle: LcLifecycle::new(
                store,
                messaging,
                Arc::new(LcLockRegistry::new()),
                Arc::new(AuditLog::new()),
            ),
        }
    }

    fn alice() -> ActorContext {
        ActorContext::new("@alice:m.org")
    }

    fn bob() -> ActorContext {
        ActorContext::new("@bob:m.org")
    }

    #[tokio::test]
    async fn create_requires_pair_authorization() {
        let store = Arc::new(MemoryStore::new());
        let lifecycle = LcLifecycle::new(
            store,
            Arc::new(MemoryMessaging::new()),
            Arc::new(LcLockRegistry::new()),
            Arc::new(AuditLog::new()),
        );
        let err = lifecycle.create_lc(&alice(), sample_terms()).await.unwrap_err();
        assert!(matches!(err, EngineError::Unauthorized(_)));
    }

    #[tokio::test]
    async fn authorization_is_consumed_by_first_lc() {
        let f = fixture_with_authorization().await;
        let lc = f.lifecycle.create_lc(&alice(), sample_terms()).await.unwrap();
        assert_eq!(lc.status, LcStatus::Draft);
        assert!(lc.matrix_room_id.is_some());

        // Second creation for the same pair has no unconsumed authorization.
        let err = f.lifecycle.create_lc(&alice(), sample_terms()).await.unwrap_err();
        assert!(matches!(err, EngineError::Unauthorized(_)));
    }

    #[tokio::test]
    async fn outsider_cannot_advance() {
        let f = fixture_with_authorization().await;
        let lc = f.lifecycle.create_lc(&alice(), sample_terms()).await.unwrap();
        let mallory = ActorContext::new("@mallory:m.org");
        let err = f
            .lifecycle
            .advance(&mallory, &lc.id, LcStatus::Negotiating, None)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Unauthorized(_)));
    }

    #[tokio::test]
    async fn illegal_transition_reports_both_sides() {
        let f = fixture_with_authorization().await;
        let lc = f.lifecycle.create_lc(&alice(), sample_terms()).await.unwrap();
        let err = f
            .lifecycle
            .advance(&alice(), &lc.id, LcStatus::Shipped, None)
            .await
            .unwrap_err();
        match err {
            EngineError::IllegalTransition { current, target, .. } => {
                assert_eq!(current, LcStatus::Draft);
                assert_eq!(target, LcStatus::Shipped);
            }
            other => panic!("expected IllegalTransition, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn document_verification_must_cover_required_set() {
        let f = fixture_with_authorization().await;
        let lc = f.lifecycle.create_lc(&alice(), sample_terms()).await.unwrap();
        // Walk to DocumentsSubmitted through internal transitions.
        f.lifecycle
            .advance(&alice(), &lc.id, LcStatus::Negotiating, None)
            .await
            .unwrap();
        f.lifecycle.advance(&bob(), &lc.id, LcStatus::Signed, None).await.unwrap();
        f.lifecycle
            .apply_transition(
                "@alice:m.org",
                ActorKind::System,
                &lc.id,
                LcStatus::Funded,
                Some(TransitionEvidence::FundingReceipt { tx_ref: "tx1".into() }),
            )
            .await
            .unwrap();
        f.lifecycle.advance(&bob(), &lc.id, LcStatus::Shipped, None).await.unwrap();
        f.lifecycle
            .advance(&bob(), &lc.id, LcStatus::DocumentsSubmitted, None)
            .await
            .unwrap();

        let err = f
            .lifecycle
            .advance(
                &alice(),
                &lc.id,
                LcStatus::Delivered,
                Some(TransitionEvidence::VerifiedDocuments {
                    documents: vec!["bill_of_lading".into()],
                }),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));

        let advanced = f
            .lifecycle
            .advance(
                &alice(),
                &lc.id,
                LcStatus::Delivered,
                Some(TransitionEvidence::VerifiedDocuments {
                    documents: vec!["bill_of_lading".into(), "certificate_of_origin".into()],
                }),
            )
            .await
            .unwrap();
        assert_eq!(advanced.status, LcStatus::Delivered);
    }

    #[tokio::test]
    async fn pre_funding_cancel_is_free_post_funding_needs_refund() {
        let f = fixture_with_authorization().await;
        let lc = f.lifecycle.create_lc(&alice(), sample_terms()).await.unwrap();
        let cancelled = f
            .lifecycle
            .cancel(&alice(), &lc.id, "terms never agreed")
            .await
            .unwrap();
        assert_eq!(cancelled.status, LcStatus::Cancelled);

        // A funded LC only unwinds through the coordinator's refund path.
        let f2 = fixture_with_authorization().await;
        let lc2 = f2.lifecycle.create_lc(&alice(), sample_terms()).await.unwrap();
        f2.lifecycle
            .advance(&alice(), &lc2.id, LcStatus::Negotiating, None)
            .await
            .unwrap();
        f2.lifecycle.advance(&bob(), &lc2.id, LcStatus::Signed, None).await.unwrap();
        f2.lifecycle
            .apply_transition(
                "@alice:m.org",
                ActorKind::System,
                &lc2.id,
                LcStatus::Funded,
                Some(TransitionEvidence::FundingReceipt { tx_ref: "tx1".into() }),
            )
            .await
            .unwrap();
        let err = f2
            .lifecycle
            .cancel(&alice(), &lc2.id, "cold feet")
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Unauthorized(_)));
    }
}
