//! In-memory reference store
//!
//! Backs tests and embedded use. Faithful to the port contract: inserts
//! reject duplicate ids, updates compare-and-swap on version.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::{EngineError, Result};
use crate::models::dispute::DisputeCase;
use crate::models::invitation::{Invitation, InvitationStatus, LcCreationAuthorization};
use crate::models::lc::LetterOfCredit;
use crate::models::trade::TradeRecord;

use super::{Store, Versioned};

type Shelf<T> = RwLock<HashMap<String, Versioned<T>>>;

/// In-memory `Store` implementation
#[derive(Default)]
pub struct MemoryStore {
    invitations: Shelf<Invitation>,
    authorizations: Shelf<LcCreationAuthorization>,
    lcs: Shelf<LetterOfCredit>,
    disputes: Shelf<DisputeCase>,
    trades: Shelf<TradeRecord>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn insert_new<T: Clone>(
    map: &mut HashMap<String, Versioned<T>>,
    kind: &'static str,
    id: String,
    value: T,
) -> Result<()> {
    if map.contains_key(&id) {
        return Err(EngineError::Conflict { kind, id });
    }
    map.insert(id, Versioned { value, version: 1 });
    Ok(())
}

fn cas_update<T: Clone>(
    map: &mut HashMap<String, Versioned<T>>,
    kind: &'static str,
    id: String,
    value: T,
    expected_version: u64,
) -> Result<u64> {
    match map.get_mut(&id) {
        None => Err(EngineError::NotFound { kind, id }),
        Some(slot) if slot.version != expected_version => {
            Err(EngineError::Conflict { kind, id })
        }
        Some(slot) => {
            slot.value = value;
            slot.version += 1;
            Ok(slot.version)
        }
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn insert_invitation(&self, invitation: Invitation) -> Result<()> {
        let mut map = self.invitations.write().await;
        insert_new(&mut map, "invitation", invitation.id.clone(), invitation)
    }

    async fn get_invitation(&self, id: &str) -> Result<Option<Versioned<Invitation>>> {
        Ok(self.invitations.read().await.get(id).cloned())
    }

    async fn update_invitation(&self, invitation: Invitation, expected_version: u64) -> Result<u64> {
        let mut map = self.invitations.write().await;
        cas_update(&mut map, "invitation", invitation.id.clone(), invitation, expected_version)
    }

    async fn invitations_for_user(&self, user_id: &str) -> Result<Vec<Invitation>> {
        let map = self.invitations.read().await;
        let mut out: Vec<Invitation> = map
            .values()
            .filter(|v| {
                v.value.initiator.user_id == user_id || v.value.invitee.user_id == user_id
            })
            .map(|v| v.value.clone())
            .collect();
        out.sort_by_key(|i| i.created_at);
        Ok(out)
    }

    async fn pending_invitations(&self) -> Result<Vec<Versioned<Invitation>>> {
        let map = self.invitations.read().await;
        Ok(map
            .values()
            .filter(|v| v.value.status == InvitationStatus::Pending)
            .cloned()
            .collect())
    }

    async fn insert_authorization(&self, auth: LcCreationAuthorization) -> Result<()> {
        let mut map = self.authorizations.write().await;
        insert_new(&mut map, "authorization", auth.invitation_id.clone(), auth)
    }

    async fn find_authorization(
        &self,
        buyer_id: &str,
        seller_id: &str,
    ) -> Result<Option<Versioned<LcCreationAuthorization>>> {
        let map = self.authorizations.read().await;
        Ok(map
            .values()
            .find(|v| v.value.covers(buyer_id, seller_id) && v.value.consumed_by_lc.is_none())
            .cloned())
    }

    async fn update_authorization(
        &self,
        auth: LcCreationAuthorization,
        expected_version: u64,
    ) -> Result<u64> {
        let mut map = self.authorizations.write().await;
        cas_update(&mut map, "authorization", auth.invitation_id.clone(), auth, expected_version)
    }

    async fn insert_lc(&self, lc: LetterOfCredit) -> Result<()> {
        let mut map = self.lcs.write().await;
        insert_new(&mut map, "lc", lc.id.clone(), lc)
    }

    async fn get_lc(&self, id: &str) -> Result<Option<Versioned<LetterOfCredit>>> {
        Ok(self.lcs.read().await.get(id).cloned())
    }

    async fn find_lc_by_number(&self, lc_number: &str) -> Result<Option<Versioned<LetterOfCredit>>> {
        let map = self.lcs.read().await;
        Ok(map.values().find(|v| v.value.lc_number == lc_number).cloned())
    }

    async fn update_lc(&self, lc: LetterOfCredit, expected_version: u64) -> Result<u64> {
        let mut map = self.lcs.write().await;
        cas_update(&mut map, "lc", lc.id.clone(), lc, expected_version)
    }

    async fn insert_dispute(&self, dispute: DisputeCase) -> Result<()> {
        let mut map = self.disputes.write().await;
        insert_new(&mut map, "dispute", dispute.id.clone(), dispute)
    }

    async fn get_dispute(&self, id: &str) -> Result<Option<Versioned<DisputeCase>>> {
        Ok(self.disputes.read().await.get(id).cloned())
    }

    async fn find_dispute_by_lc(&self, lc_id: &str) -> Result<Option<Versioned<DisputeCase>>> {
        let map = self.disputes.read().await;
        Ok(map.values().find(|v| v.value.lc_id == lc_id).cloned())
    }

    async fn update_dispute(&self, dispute: DisputeCase, expected_version: u64) -> Result<u64> {
        let mut map = self.disputes.write().await;
        cas_update(&mut map, "dispute", dispute.id.clone(), dispute, expected_version)
    }

    async fn insert_trade(&self, trade: TradeRecord) -> Result<()> {
        let mut map = self.trades.write().await;
        insert_new(&mut map, "trade", trade.id.clone(), trade)
    }

    async fn get_trade(&self, id: &str) -> Result<Option<Versioned<TradeRecord>>> {
        Ok(self.trades.read().await.get(id).cloned())
    }

    async fn update_trade(&self, trade: TradeRecord, expected_version: u64) -> Result<u64> {
        let mut map = self.trades.write().await;
        cas_update(&mut map, "trade", trade.id.clone(), trade, expected_version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use meridian_types::PartyRole;

    use crate::models::invitation::InvitationParty;

    fn invitation(id: &str) -> Invitation {
        let now = Utc::now();
        Invitation {
            id: id.into(),
            initiator: InvitationParty { user_id: "@a:m.org".into(), role: PartyRole::Buyer },
            invitee: InvitationParty { user_id: "@b:m.org".into(), role: PartyRole::Seller },
            lc_title: "t".into(),
            message: None,
            preliminary_info: None,
            status: InvitationStatus::Pending,
            created_at: now,
            expires_at: now + Duration::days(5),
            response: None,
        }
    }

    #[tokio::test]
    async fn stale_version_update_conflicts() {
        let store = MemoryStore::new();
        store.insert_invitation(invitation("i1")).await.unwrap();

        let v1 = store.get_invitation("i1").await.unwrap().unwrap();
        let v2 = store.update_invitation(v1.value.clone(), v1.version).await.unwrap();
        assert_eq!(v2, 2);

        // Second writer quoting the old version loses the race.
        let err = store.update_invitation(v1.value, v1.version).await.unwrap_err();
        assert!(err.is_retryable_after_reread(), "got {err:?}");
    }

    #[tokio::test]
    async fn duplicate_insert_conflicts() {
        let store = MemoryStore::new();
        store.insert_invitation(invitation("i1")).await.unwrap();
        assert!(store.insert_invitation(invitation("i1")).await.is_err());
    }
}
