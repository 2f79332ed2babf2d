//! Ledger/wallet collaborator port
//!
//! The blockchain backend is external: the engine only consumes "query
//! balance" and "submit transfer" primitives. Transfers carry a caller
//! idempotency key; the ledger executes each key at most once and replays
//! the recorded outcome for duplicates.
//!
//! Outcomes are three-valued. `Pending` means submitted with unknown result:
//! it must be reconciled with `lookup_transfer`, never blindly retried,
//! because a blind retry risks double settlement.

use std::collections::HashMap;

use anyhow::{bail, Result};
use async_trait::async_trait;
use meridian_types::Currency;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

/// Classification of a submitted transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferStatus {
    /// Funds moved; `tx_ref` identifies the ledger transaction
    Succeeded,
    /// Definitively rejected; nothing moved, safe to retry
    Failed,
    /// Submitted, outcome unknown; reconcile before any compensating action
    Pending,
}

/// Result of one transfer submission
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferOutcome {
    pub status: TransferStatus,
    pub tx_ref: Option<String>,
    pub error: Option<String>,
}

/// External ledger/wallet backend
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Read-only balance query; never mutates
    async fn query_balance(&self, account: &str, currency: Currency) -> Result<i64>;

    /// Move funds; at most one execution per idempotency key
    async fn transfer(
        &self,
        from: &str,
        to: &str,
        amount: i64,
        currency: Currency,
        idempotency_key: &str,
    ) -> Result<TransferOutcome>;

    /// Reconciliation query for a previously submitted key
    async fn lookup_transfer(&self, idempotency_key: &str) -> Result<Option<TransferOutcome>>;
}

/// Fault to inject on the next transfer (test double control)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InjectedFault {
    FailNext,
    PendNext,
}

struct LedgerState {
    balances: HashMap<(String, Currency), i64>,
    /// idempotency key -> recorded outcome
    transfers: HashMap<String, TransferOutcome>,
    fault: Option<InjectedFault>,
    tx_counter: u64,
}

/// In-memory ledger double with idempotency-key replay and fault injection
pub struct MemoryLedger {
    state: Mutex<LedgerState>,
}

impl Default for MemoryLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(LedgerState {
                balances: HashMap::new(),
                transfers: HashMap::new(),
                fault: None,
                tx_counter: 0,
            }),
        }
    }

    /// Seed an account balance
    pub async fn credit(&self, account: &str, currency: Currency, amount: i64) {
        let mut state = self.state.lock().await;
        *state.balances.entry((account.to_string(), currency)).or_insert(0) += amount;
    }

    /// Make the next transfer fail or hang in Pending
    pub async fn inject_fault(&self, fault: InjectedFault) {
        self.state.lock().await.fault = Some(fault);
    }

    /// Settle a previously Pending transfer as succeeded (reconciliation
    /// test hook); applies the held debit/credit.
    pub async fn settle_pending(&self, idempotency_key: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        let outcome = match state.transfers.get(idempotency_key) {
            Some(o) if o.status == TransferStatus::Pending => o.clone(),
            _ => bail!("no pending transfer for key {idempotency_key}"),
        };
        // The pending record memoizes the intended movement in its error slot.
        let detail = outcome.error.clone().unwrap_or_default();
        let mut parts = detail.split('|');
        let (from, to, amount, currency) = (
            parts.next().unwrap_or_default().to_string(),
            parts.next().unwrap_or_default().to_string(),
            parts.next().unwrap_or_default().parse::<i64>().unwrap_or(0),
            parts.next().unwrap_or_default().parse::<Currency>().map_err(anyhow::Error::msg)?,
        );
        state.tx_counter += 1;
        let tx_ref = format!("tx-{:06}", state.tx_counter);
        apply_movement(&mut state.balances, &from, &to, amount, currency)?;
        state.transfers.insert(
            idempotency_key.to_string(),
            TransferOutcome {
                status: TransferStatus::Succeeded,
                tx_ref: Some(tx_ref),
                error: None,
            },
        );
        Ok(())
    }

    /// Number of executed (succeeded) debits, for idempotence assertions
    pub async fn executed_transfer_count(&self) -> usize {
        let state = self.state.lock().await;
        state
            .transfers
            .values()
            .filter(|o| o.status == TransferStatus::Succeeded)
            .count()
    }
}

fn apply_movement(
    balances: &mut HashMap<(String, Currency), i64>,
    from: &str,
    to: &str,
    amount: i64,
    currency: Currency,
) -> Result<()> {
    let from_key = (from.to_string(), currency);
    let available = balances.get(&from_key).copied().unwrap_or(0);
    if available < amount {
        bail!("insufficient funds: {available} < {amount} {currency}");
    }
    *balances.entry(from_key).or_insert(0) -= amount;
    *balances.entry((to.to_string(), currency)).or_insert(0) += amount;
    Ok(())
}

#[async_trait]
impl LedgerClient for MemoryLedger {
    async fn query_balance(&self, account: &str, currency: Currency) -> Result<i64> {
        let state = self.state.lock().await;
        Ok(state.balances.get(&(account.to_string(), currency)).copied().unwrap_or(0))
    }

    async fn transfer(
        &self,
        from: &str,
        to: &str,
        amount: i64,
        currency: Currency,
        idempotency_key: &str,
    ) -> Result<TransferOutcome> {
        let mut state = self.state.lock().await;

        // Replay: the key has already been executed or recorded.
        if let Some(existing) = state.transfers.get(idempotency_key) {
            return Ok(existing.clone());
        }

        match state.fault.take() {
            Some(InjectedFault::FailNext) => {
                let outcome = TransferOutcome {
                    status: TransferStatus::Failed,
                    tx_ref: None,
                    error: Some("injected ledger failure".into()),
                };
                // Failed outcomes are not memoized: the key stays usable.
                return Ok(outcome);
            }
            Some(InjectedFault::PendNext) => {
                let outcome = TransferOutcome {
                    status: TransferStatus::Pending,
                    tx_ref: None,
                    // Memoize the intended movement so settle_pending can apply it.
                    error: Some(format!("{from}|{to}|{amount}|{currency}")),
                };
                state.transfers.insert(idempotency_key.to_string(), outcome.clone());
                return Ok(outcome);
            }
            None => {}
        }

        if let Err(e) = apply_movement(&mut state.balances, from, to, amount, currency) {
            return Ok(TransferOutcome {
                status: TransferStatus::Failed,
                tx_ref: None,
                error: Some(e.to_string()),
            });
        }

        state.tx_counter += 1;
        let outcome = TransferOutcome {
            status: TransferStatus::Succeeded,
            tx_ref: Some(format!("tx-{:06}", state.tx_counter)),
            error: None,
        };
        state.transfers.insert(idempotency_key.to_string(), outcome.clone());
        Ok(outcome)
    }

    async fn lookup_transfer(&self, idempotency_key: &str) -> Result<Option<TransferOutcome>> {
        let state = self.state.lock().await;
        Ok(state.transfers.get(idempotency_key).cloned())
    }
}
