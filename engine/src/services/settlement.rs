//! Escrow settlement coordinator
//!
//! Mediates fund custody against the external ledger. The capacity check is
//! advisory only; `fund_escrow` is the sole authority on whether funding
//! happens, and its idempotency key (the lc_id) makes a concurrent double
//! submission collapse into one debit.
//!
//! Every mutating ledger outcome is classified: `Succeeded` moves the state
//! machine, `Failed` leaves it untouched and is safe to retry, `Pending`
//! surfaces `LedgerPendingError` and must be reconciled with a follow-up
//! query, never blind-retried.

use std::sync::Arc;

use meridian_types::Currency;
use tokio::time::timeout;
use tracing::{error, info};

use crate::config::EngineConfig;
use crate::coordination::LcLockRegistry;
use crate::error::{EngineError, Result};
use crate::ledger::{LedgerClient, TransferOutcome, TransferStatus};
use crate::logging::{sanitize_address, sanitize_amount, sanitize_id};
use crate::models::lc::{LcStatus, LetterOfCredit, TransitionEvidence};
use crate::models::ActorContext;
use crate::services::audit::{AuditAction, AuditEntry, AuditLog};
use crate::services::lifecycle::{ActorKind, LcLifecycle};
use crate::store::Store;

/// Advisory result of a funding capacity check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FundingCapacity {
    pub available: i64,
    pub required: i64,
}

impl FundingCapacity {
    pub fn sufficient(&self) -> bool {
        self.available >= self.required
    }
}

/// Escrow settlement coordinator
pub struct SettlementCoordinator {
    store: Arc<dyn Store>,
    ledger: Arc<dyn LedgerClient>,
    lifecycle: Arc<LcLifecycle>,
    locks: Arc<LcLockRegistry>,
    audit: Arc<AuditLog>,
    config: EngineConfig,
}

impl SettlementCoordinator {
    pub fn new(
        store: Arc<dyn Store>,
        ledger: Arc<dyn LedgerClient>,
        lifecycle: Arc<LcLifecycle>,
        locks: Arc<LcLockRegistry>,
        audit: Arc<AuditLog>,
        config: EngineConfig,
    ) -> Self {
        Self { store, ledger, lifecycle, locks, audit, config }
    }

    /// Read-only capacity check. Advisory/UX only: passing it guarantees
    /// nothing about a later `fund_escrow`, which re-checks at the ledger.
    pub async fn check_funding_capacity(
        &self,
        buyer_account: &str,
        amount: i64,
        currency: Currency,
    ) -> Result<FundingCapacity> {
        let available = self
            .ledger
            .query_balance(buyer_account, currency)
            .await
            .map_err(EngineError::Ledger)?;
        Ok(FundingCapacity { available, required: amount })
    }

    /// Read-only escrow balance query
    pub async fn get_escrow_balance(&self, escrow_address: &str, currency: Currency) -> Result<i64> {
        self.ledger
            .query_balance(escrow_address, currency)
            .await
            .map_err(EngineError::Ledger)
    }

    /// Move buyer funds into escrow and drive `Signed -> Funded`.
    ///
    /// At most once per LC: the idempotency key is the lc_id, so a retry
    /// after a `Failed` outcome re-debits safely while a duplicate of a
    /// succeeded call replays the original receipt.
    pub async fn fund_escrow(
        &self,
        ctx: &ActorContext,
        lc_id: &str,
        escrow_address: &str,
        amount: i64,
        currency: Currency,
    ) -> Result<LetterOfCredit> {
        let _guard = self.locks.acquire(lc_id).await;

        let versioned = self
            .store
            .get_lc(lc_id)
            .await?
            .ok_or_else(|| EngineError::NotFound { kind: "lc", id: lc_id.into() })?;
        let lc = versioned.value;

        if ctx.user_id != lc.terms.buyer.matrix_id {
            return Err(EngineError::Unauthorized("only the buyer may fund the escrow".into()));
        }
        match lc.status {
            LcStatus::Signed => {}
            LcStatus::Funded
            | LcStatus::Shipped
            | LcStatus::DocumentsSubmitted
            | LcStatus::Delivered => return Err(EngineError::AlreadyFunded(lc_id.into())),
            current => {
                return Err(EngineError::IllegalTransition {
                    lc_id: lc_id.into(),
                    current,
                    target: LcStatus::Funded,
                })
            }
        }
        if amount != lc.terms.amount || currency != lc.terms.currency {
            return Err(EngineError::Validation(format!(
                "funding {amount} {currency} does not match LC terms {} {}",
                lc.terms.amount, lc.terms.currency
            )));
        }
        let buyer_account = lc.terms.buyer.wallet_address.clone().ok_or_else(|| {
            EngineError::Validation("buyer has no wallet address on the LC terms".into())
        })?;

        info!(
            lc_id = %sanitize_id(lc_id),
            escrow = %sanitize_address(escrow_address),
            amount = %sanitize_amount(amount),
            "Funding escrow"
        );

        let idempotency_key = lc_id.to_string();
        let outcome = self
            .timed_transfer(&buyer_account, escrow_address, amount, currency, &idempotency_key)
            .await?;

        let tx_ref = self
            .classify(&outcome, &idempotency_key, "fund_escrow")
            .await?;

        // Persist the escrow address before the transition so the receipt
        // and the account it refers to land together.
        let mut funded = lc;
        funded.escrow_address = Some(escrow_address.to_string());
        funded.deployment_tx = Some(tx_ref.clone());
        self.store.update_lc(funded, versioned.version).await?;

        let lc = self
            .lifecycle
            .apply_transition(
                &ctx.user_id,
                ActorKind::System,
                lc_id,
                LcStatus::Funded,
                Some(TransitionEvidence::FundingReceipt { tx_ref: tx_ref.clone() }),
            )
            .await?;

        self.audit
            .append(
                AuditEntry::new(&ctx.user_id, AuditAction::Fund, "lc", lc_id)
                    .idempotency_key(&idempotency_key)
                    .statuses(LcStatus::Signed.as_str(), LcStatus::Funded.as_str())
                    .detail(tx_ref),
            )
            .await;

        Ok(lc)
    }

    /// Full release to the seller, driving `Delivered -> Completed`.
    ///
    /// Queries the escrow balance immediately before the transfer; a stale
    /// figure is never released.
    pub async fn release_to_seller(&self, ctx: &ActorContext, lc_id: &str) -> Result<LetterOfCredit> {
        let _guard = self.locks.acquire(lc_id).await;

        let lc = self.lifecycle.get_lc(lc_id).await?;
        if lc.status != LcStatus::Delivered {
            return Err(EngineError::IllegalTransition {
                lc_id: lc_id.into(),
                current: lc.status,
                target: LcStatus::Completed,
            });
        }
        let escrow = self.escrow_address(&lc)?;
        let recipient = lc.terms.seller.wallet_address.clone().ok_or_else(|| {
            EngineError::Validation("seller has no wallet address on the LC terms".into())
        })?;

        let balance = self.get_escrow_balance(&escrow, lc.terms.currency).await?;
        let key = format!("release-{lc_id}");
        let tx_ref = self
            .escrow_transfer(&escrow, &recipient, balance, lc.terms.currency, &key)
            .await?;

        let lc = self
            .lifecycle
            .apply_transition(
                &ctx.user_id,
                ActorKind::System,
                lc_id,
                LcStatus::Completed,
                Some(TransitionEvidence::ReleaseReceipt { tx_ref: tx_ref.clone() }),
            )
            .await?;

        self.audit
            .append(
                AuditEntry::new(&ctx.user_id, AuditAction::Release, "lc", lc_id)
                    .idempotency_key(&key)
                    .statuses(LcStatus::Delivered.as_str(), LcStatus::Completed.as_str())
                    .detail(tx_ref),
            )
            .await;

        Ok(lc)
    }

    /// Refund the full escrow balance to the buyer and cancel the LC.
    ///
    /// This is the only way to cancel after funding.
    pub async fn cancel_with_refund(
        &self,
        ctx: &ActorContext,
        lc_id: &str,
        reason: &str,
    ) -> Result<LetterOfCredit> {
        let _guard = self.locks.acquire(lc_id).await;

        let lc = self.lifecycle.get_lc(lc_id).await?;
        if lc.status.is_terminal() || lc.status == LcStatus::Disputed {
            return Err(EngineError::IllegalTransition {
                lc_id: lc_id.into(),
                current: lc.status,
                target: LcStatus::Cancelled,
            });
        }
        let escrow = self.escrow_address(&lc)?;
        let refund_account = lc.terms.buyer.wallet_address.clone().ok_or_else(|| {
            EngineError::Validation("buyer has no wallet address on the LC terms".into())
        })?;

        let balance = self.get_escrow_balance(&escrow, lc.terms.currency).await?;
        let key = format!("refund-{lc_id}");
        let tx_ref = self
            .escrow_transfer(&escrow, &refund_account, balance, lc.terms.currency, &key)
            .await?;

        let lc = self
            .lifecycle
            .apply_transition(
                &ctx.user_id,
                ActorKind::System,
                lc_id,
                LcStatus::Cancelled,
                Some(TransitionEvidence::RefundReceipt { tx_ref: tx_ref.clone() }),
            )
            .await?;

        self.audit
            .append(
                AuditEntry::new(&ctx.user_id, AuditAction::Refund, "lc", lc_id)
                    .idempotency_key(&key)
                    .detail(format!("{reason}; {tx_ref}")),
            )
            .await;

        Ok(lc)
    }

    /// Reconciliation query for a previously submitted transfer key.
    ///
    /// The only sanctioned follow-up to `LedgerPendingError`: returns the
    /// ledger's current view so the caller can decide on compensation.
    pub async fn reconcile_transfer(&self, idempotency_key: &str) -> Result<Option<TransferOutcome>> {
        self.ledger
            .lookup_transfer(idempotency_key)
            .await
            .map_err(EngineError::Ledger)
    }

    /// One escrow-out transfer with outcome classification. The caller is
    /// expected to hold the per-LC lock. Used by completion, refund and
    /// dispute-resolution paths.
    pub(crate) async fn escrow_transfer(
        &self,
        escrow: &str,
        recipient: &str,
        amount: i64,
        currency: Currency,
        idempotency_key: &str,
    ) -> Result<String> {
        if amount == 0 {
            // Zero-sided splits skip the ledger entirely.
            return Ok(String::from("none"));
        }
        let outcome = self
            .timed_transfer(escrow, recipient, amount, currency, idempotency_key)
            .await?;
        self.classify(&outcome, idempotency_key, "escrow_transfer").await
    }

    /// Transfer under the configured deadline. An elapsed deadline does not
    /// mean the ledger dropped the movement, so it is classified Pending and
    /// routed through reconciliation like any other unknown outcome.
    async fn timed_transfer(
        &self,
        from: &str,
        to: &str,
        amount: i64,
        currency: Currency,
        idempotency_key: &str,
    ) -> Result<TransferOutcome> {
        match timeout(
            self.config.ledger_timeout(),
            self.ledger.transfer(from, to, amount, currency, idempotency_key),
        )
        .await
        {
            Ok(outcome) => outcome.map_err(EngineError::Ledger),
            Err(_elapsed) => {
                error!(
                    key = %sanitize_id(idempotency_key),
                    "Ledger transfer exceeded its deadline; treating as pending"
                );
                Err(EngineError::LedgerPending { idempotency_key: idempotency_key.into() })
            }
        }
    }

    fn escrow_address(&self, lc: &LetterOfCredit) -> Result<String> {
        lc.escrow_address.clone().ok_or_else(|| {
            EngineError::Validation(format!("LC {} has no escrow address", lc.id))
        })
    }

    /// Map a three-valued ledger outcome to the engine's error classes.
    async fn classify(
        &self,
        outcome: &TransferOutcome,
        idempotency_key: &str,
        operation: &str,
    ) -> Result<String> {
        match outcome.status {
            TransferStatus::Succeeded => Ok(outcome
                .tx_ref
                .clone()
                .unwrap_or_else(|| idempotency_key.to_string())),
            TransferStatus::Failed => {
                let detail = outcome.error.clone().unwrap_or_else(|| "unspecified".into());
                error!(
                    key = %sanitize_id(idempotency_key),
                    operation,
                    "Ledger transfer failed: {detail}"
                );
                Err(EngineError::Ledger(anyhow::anyhow!("{operation} failed: {detail}")))
            }
            TransferStatus::Pending => {
                error!(
                    key = %sanitize_id(idempotency_key),
                    operation,
                    "Ledger transfer pending; reconciliation required"
                );
                Err(EngineError::LedgerPending { idempotency_key: idempotency_key.into() })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{InjectedFault, MemoryLedger};
    use crate::messaging::MemoryMessaging;
    use crate::models::invitation::LcCreationAuthorization;
    use crate::services::lifecycle::LcLifecycle;
    use crate::store::memory::MemoryStore;
    use crate::validation::tests::sample_terms;
    use chrono::Utc;

    struct Fixture {
        coordinator: SettlementCoordinator,
        lifecycle: Arc<LcLifecycle>,
        ledger: Arc<MemoryLedger>,
        audit: Arc<AuditLog>,
    }

    const BUYER_WALLET: &str = "GBUYERWALLETXXXXXXXX";
    const SELLER_WALLET: &str = "GSELLERWALLETXXXXXXX";
    const ESCROW: &str = "GESCROWXXXXXXXXXXXXX";

    async fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let ledger = Arc::new(MemoryLedger::new());
        let audit = Arc::new(AuditLog::new());
        let locks = Arc::new(LcLockRegistry::new());
        let lifecycle = Arc::new(LcLifecycle::new(
            store.clone(),
            Arc::new(MemoryMessaging::new()),
            locks.clone(),
            audit.clone(),
        ));
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
            coordinator: SettlementCoordinator::new(
                store,
                ledger.clone(),
                lifecycle.clone(),
                locks,
                audit.clone(),
                EngineConfig::default(),
            ),
            lifecycle,
            ledger,
            audit,
        }
    }

    fn alice() -> ActorContext {
        ActorContext::new("@alice:m.org")
    }

    fn bob() -> ActorContext {
        ActorContext::new("@bob:m.org")
    }

    fn wallet_terms() -> crate::models::lc::LcTerms {
        let mut terms = sample_terms();
        terms.buyer.wallet_address = Some(BUYER_WALLET.into());
        terms.seller.wallet_address = Some(SELLER_WALLET.into());
        terms
    }

    /// Create an LC and walk it to Signed.
    async fn signed_lc(f: &Fixture) -> String {
        let lc = f.lifecycle.create_lc(&alice(), wallet_terms()).await.unwrap();
        f.lifecycle.advance(&alice(), &lc.id, LcStatus::Negotiating, None).await.unwrap();
        f.lifecycle.advance(&bob(), &lc.id, LcStatus::Signed, None).await.unwrap();
        lc.id
    }

    #[tokio::test]
    async fn capacity_check_is_read_only() {
        let f = fixture().await;
        f.ledger.credit(BUYER_WALLET, Currency::USDC, 500).await;
        let capacity = f
            .coordinator
            .check_funding_capacity(BUYER_WALLET, 1_000, Currency::USDC)
            .await
            .unwrap();
        assert!(!capacity.sufficient());
        assert_eq!(
            f.ledger.query_balance(BUYER_WALLET, Currency::USDC).await.unwrap(),
            500
        );
    }

    #[tokio::test]
    async fn funding_drives_signed_to_funded_once() {
        let f = fixture().await;
        let amount = wallet_terms().amount;
        f.ledger.credit(BUYER_WALLET, Currency::USDC, amount * 2).await;
        let lc_id = signed_lc(&f).await;

        let lc = f
            .coordinator
            .fund_escrow(&alice(), &lc_id, ESCROW, amount, Currency::USDC)
            .await
            .unwrap();
        assert_eq!(lc.status, LcStatus::Funded);
        assert_eq!(lc.escrow_address.as_deref(), Some(ESCROW));

        // Second attempt is a duplicate-operation error, not a second debit.
        let err = f
            .coordinator
            .fund_escrow(&alice(), &lc_id, ESCROW, amount, Currency::USDC)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::AlreadyFunded(_)));
        assert_eq!(f.ledger.executed_transfer_count().await, 1);
        assert!(f.audit.verify_chain().await);
    }

    #[tokio::test]
    async fn fabricated_receipts_move_nothing() {
        let f = fixture().await;
        let lc_id = signed_lc(&f).await;

        // A party presenting its own funding receipt never reaches Funded;
        // only the coordinator mints receipts, after the ledger confirms.
        let err = f
            .lifecycle
            .advance(
                &alice(),
                &lc_id,
                LcStatus::Funded,
                Some(TransitionEvidence::FundingReceipt { tx_ref: "made-up-ref".into() }),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Unauthorized(_)));
        assert_eq!(f.ledger.executed_transfer_count().await, 0);
        assert_eq!(f.lifecycle.get_lc(&lc_id).await.unwrap().status, LcStatus::Signed);
    }

    #[tokio::test]
    async fn only_buyer_may_fund() {
        let f = fixture().await;
        let amount = wallet_terms().amount;
        let lc_id = signed_lc(&f).await;
        let err = f
            .coordinator
            .fund_escrow(&bob(), &lc_id, ESCROW, amount, Currency::USDC)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Unauthorized(_)));
    }

    #[tokio::test]
    async fn failed_ledger_leaves_lc_signed_and_retryable() {
        let f = fixture().await;
        let amount = wallet_terms().amount;
        f.ledger.credit(BUYER_WALLET, Currency::USDC, amount).await;
        let lc_id = signed_lc(&f).await;

        f.ledger.inject_fault(InjectedFault::FailNext).await;
        let err = f
            .coordinator
            .fund_escrow(&alice(), &lc_id, ESCROW, amount, Currency::USDC)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Ledger(_)));
        assert_eq!(f.lifecycle.get_lc(&lc_id).await.unwrap().status, LcStatus::Signed);

        // Same key retries cleanly after a definitive failure.
        let lc = f
            .coordinator
            .fund_escrow(&alice(), &lc_id, ESCROW, amount, Currency::USDC)
            .await
            .unwrap();
        assert_eq!(lc.status, LcStatus::Funded);
    }

    #[tokio::test]
    async fn pending_ledger_requires_reconciliation() {
        let f = fixture().await;
        let amount = wallet_terms().amount;
        f.ledger.credit(BUYER_WALLET, Currency::USDC, amount).await;
        let lc_id = signed_lc(&f).await;

        f.ledger.inject_fault(InjectedFault::PendNext).await;
        let err = f
            .coordinator
            .fund_escrow(&alice(), &lc_id, ESCROW, amount, Currency::USDC)
            .await
            .unwrap_err();
        assert!(err.requires_reconciliation());
        assert_eq!(f.lifecycle.get_lc(&lc_id).await.unwrap().status, LcStatus::Signed);

        // Reconcile: the ledger settles the held transfer, the follow-up
        // query reports success, and funding can be finalized by replay.
        f.ledger.settle_pending(&lc_id).await.unwrap();
        let outcome = f.coordinator.reconcile_transfer(&lc_id).await.unwrap().unwrap();
        assert_eq!(outcome.status, TransferStatus::Succeeded);
        let lc = f
            .coordinator
            .fund_escrow(&alice(), &lc_id, ESCROW, amount, Currency::USDC)
            .await
            .unwrap();
        assert_eq!(lc.status, LcStatus::Funded);
        assert_eq!(f.ledger.executed_transfer_count().await, 1);
    }

    #[tokio::test]
    async fn refund_cancels_a_funded_lc() {
        let f = fixture().await;
        let amount = wallet_terms().amount;
        f.ledger.credit(BUYER_WALLET, Currency::USDC, amount).await;
        let lc_id = signed_lc(&f).await;
        f.coordinator
            .fund_escrow(&alice(), &lc_id, ESCROW, amount, Currency::USDC)
            .await
            .unwrap();

        let lc = f
            .coordinator
            .cancel_with_refund(&alice(), &lc_id, "shipment window missed")
            .await
            .unwrap();
        assert_eq!(lc.status, LcStatus::Cancelled);
        assert_eq!(
            f.ledger.query_balance(BUYER_WALLET, Currency::USDC).await.unwrap(),
            amount
        );
        assert_eq!(f.ledger.query_balance(ESCROW, Currency::USDC).await.unwrap(), 0);
    }
}
