//! Invitation manager
//!
//! Creates, tracks, expires and resolves collaboration invitations between
//! two trading counterparties. Acceptance is what authorizes LC creation for
//! that exact pair; nothing financial exists before it.

use std::sync::Arc;

use chrono::Utc;
use meridian_types::PartyRole;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::logging::sanitize_id;
use crate::messaging::MessagingClient;
use crate::models::invitation::{
    Invitation, InvitationParty, InvitationResponse, InvitationStatus, LcCreationAuthorization,
    PreliminaryInfo,
};
use crate::models::ActorContext;
use crate::store::Store;
use crate::validation::validate_invitation;

/// Partitioned listing for one user
#[derive(Debug, Clone)]
pub struct InvitationList {
    pub sent: Vec<Invitation>,
    pub received: Vec<Invitation>,
    pub pending_sent: usize,
    pub pending_received: usize,
    pub total_pending: usize,
}

/// Invitation lifecycle service
pub struct InvitationService {
    store: Arc<dyn Store>,
    messaging: Arc<dyn MessagingClient>,
    config: EngineConfig,
}

impl InvitationService {
    pub fn new(
        store: Arc<dyn Store>,
        messaging: Arc<dyn MessagingClient>,
        config: EngineConfig,
    ) -> Self {
        Self { store, messaging, config }
    }

    /// Create a pending invitation from the caller to `invitee_user_id`.
    ///
    /// The caller names their own role; the invitee takes the counterpart
    /// role. Expiry is fixed at creation time from the configured TTL.
    pub async fn send_invitation(
        &self,
        ctx: &ActorContext,
        initiator_role: PartyRole,
        invitee_user_id: &str,
        lc_title: &str,
        message: Option<String>,
        preliminary_info: Option<PreliminaryInfo>,
    ) -> Result<Invitation> {
        validate_invitation(lc_title, &ctx.user_id, invitee_user_id)?;

        let now = Utc::now();
        let invitation = Invitation {
            id: Uuid::new_v4().to_string(),
            initiator: InvitationParty { user_id: ctx.user_id.clone(), role: initiator_role },
            invitee: InvitationParty {
                user_id: invitee_user_id.to_string(),
                role: initiator_role.counterpart(),
            },
            lc_title: lc_title.to_string(),
            message,
            preliminary_info,
            status: InvitationStatus::Pending,
            created_at: now,
            expires_at: now + self.config.invitation_ttl(),
            response: None,
        };

        self.store.insert_invitation(invitation.clone()).await?;
        info!(
            invitation_id = %sanitize_id(&invitation.id),
            initiator_role = initiator_role.as_str(),
            "Invitation created"
        );

        // Delivery is a collaborator concern; a failed notification leaves
        // the persisted invitation intact and the invitee can still list it.
        if let Err(e) = self
            .messaging
            .send_invite_notification(invitee_user_id, &invitation)
            .await
        {
            warn!(
                invitation_id = %sanitize_id(&invitation.id),
                "Invite notification delivery failed: {e:#}"
            );
        }

        Ok(invitation)
    }

    /// Record the invitee's answer. Accepting persists an LC creation
    /// authorization for this exact buyer/seller pair.
    pub async fn respond_to_invitation(
        &self,
        ctx: &ActorContext,
        invitation_id: &str,
        accepted: bool,
        message: Option<String>,
    ) -> Result<Invitation> {
        let versioned = self
            .store
            .get_invitation(invitation_id)
            .await?
            .ok_or_else(|| EngineError::NotFound { kind: "invitation", id: invitation_id.into() })?;
        let mut invitation = versioned.value;

        if invitation.invitee.user_id != ctx.user_id {
            return Err(EngineError::Unauthorized(
                "only the invitee may respond to an invitation".into(),
            ));
        }

        let now = Utc::now();
        match invitation.effective_status(now) {
            InvitationStatus::Pending => {}
            InvitationStatus::Expired => {
                // Persist the derived expiry so later reads are cheap; the
                // derivation stays authoritative either way.
                invitation.status = InvitationStatus::Expired;
                let _ = self.store.update_invitation(invitation, versioned.version).await;
                return Err(EngineError::Expired(invitation_id.into()));
            }
            _ => return Err(EngineError::AlreadyResponded(invitation_id.into())),
        }

        invitation.status = if accepted {
            InvitationStatus::Accepted
        } else {
            InvitationStatus::Rejected
        };
        invitation.response = Some(InvitationResponse { accepted, message, responded_at: now });

        self.store
            .update_invitation(invitation.clone(), versioned.version)
            .await?;

        if accepted {
            let (buyer_id, seller_id) = match invitation.initiator.role {
                PartyRole::Buyer => {
                    (invitation.initiator.user_id.clone(), invitation.invitee.user_id.clone())
                }
                PartyRole::Seller => {
                    (invitation.invitee.user_id.clone(), invitation.initiator.user_id.clone())
                }
            };
            self.store
                .insert_authorization(LcCreationAuthorization {
                    invitation_id: invitation.id.clone(),
                    buyer_id,
                    seller_id,
                    authorized_at: now,
                    consumed_by_lc: None,
                })
                .await?;
            info!(
                invitation_id = %sanitize_id(&invitation.id),
                "Invitation accepted, LC creation authorized"
            );
        } else {
            info!(invitation_id = %sanitize_id(&invitation.id), "Invitation rejected");
        }

        Ok(invitation)
    }

    /// Withdraw a pending invitation. Initiator only.
    pub async fn cancel_invitation(&self, ctx: &ActorContext, invitation_id: &str) -> Result<Invitation> {
        let versioned = self
            .store
            .get_invitation(invitation_id)
            .await?
            .ok_or_else(|| EngineError::NotFound { kind: "invitation", id: invitation_id.into() })?;
        let mut invitation = versioned.value;

        if invitation.initiator.user_id != ctx.user_id {
            return Err(EngineError::Unauthorized(
                "only the initiator may cancel an invitation".into(),
            ));
        }

        match invitation.effective_status(Utc::now()) {
            InvitationStatus::Pending => {}
            InvitationStatus::Expired => return Err(EngineError::Expired(invitation_id.into())),
            _ => return Err(EngineError::AlreadyResponded(invitation_id.into())),
        }

        invitation.status = InvitationStatus::Cancelled;
        self.store
            .update_invitation(invitation.clone(), versioned.version)
            .await?;
        info!(invitation_id = %sanitize_id(&invitation.id), "Invitation cancelled");
        Ok(invitation)
    }

    /// Sent/received partitions with effective (expiry-derived) statuses.
    ///
    /// Expired-but-unswept invitations surface as Expired, never silently
    /// dropped.
    pub async fn list_invitations(&self, user_id: &str) -> Result<InvitationList> {
        let now = Utc::now();
        let mut sent = Vec::new();
        let mut received = Vec::new();

        for mut invitation in self.store.invitations_for_user(user_id).await? {
            invitation.status = invitation.effective_status(now);
            if invitation.initiator.user_id == user_id {
                sent.push(invitation);
            } else {
                received.push(invitation);
            }
        }

        let pending_sent = sent.iter().filter(|i| i.status == InvitationStatus::Pending).count();
        let pending_received =
            received.iter().filter(|i| i.status == InvitationStatus::Pending).count();

        Ok(InvitationList {
            total_pending: pending_sent + pending_received,
            pending_sent,
            pending_received,
            sent,
            received,
        })
    }

    /// Optional background sweep persisting derived expiry.
    ///
    /// Purely an optimization: read-side derivation stays the source of
    /// truth, so a lost race here is harmless. Returns how many rows were
    /// marked.
    pub async fn sweep_expired(&self) -> Result<usize> {
        let now = Utc::now();
        let mut swept = 0;
        for versioned in self.store.pending_invitations().await? {
            let mut invitation = versioned.value;
            if invitation.is_expired(now) {
                invitation.status = InvitationStatus::Expired;
                match self.store.update_invitation(invitation, versioned.version).await {
                    Ok(_) => swept += 1,
                    Err(EngineError::Conflict { .. }) => {} // someone else won; fine
                    Err(e) => return Err(e),
                }
            }
        }
        if swept > 0 {
            info!(swept, "Expired invitations swept");
        }
        Ok(swept)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::MemoryMessaging;
    use crate::store::memory::MemoryStore;
    use chrono::Duration;

    fn service() -> (InvitationService, Arc<MemoryStore>, Arc<MemoryMessaging>) {
        let store = Arc::new(MemoryStore::new());
        let messaging = Arc::new(MemoryMessaging::new());
        let service = InvitationService::new(
            store.clone(),
            messaging.clone(),
            EngineConfig::default(),
        );
        (service, store, messaging)
    }

    fn alice() -> ActorContext {
        ActorContext::new("@alice:m.org")
    }

    fn bob() -> ActorContext {
        ActorContext::new("@bob:m.org")
    }

    #[tokio::test]
    async fn accept_creates_pair_authorization() {
        let (service, store, messaging) = service();
        let inv = service
            .send_invitation(&alice(), PartyRole::Buyer, "@bob:m.org", "Coffee Q1", None, None)
            .await
            .unwrap();
        assert_eq!(messaging.notifications().await.len(), 1);

        let responded = service
            .respond_to_invitation(&bob(), &inv.id, true, Some("deal".into()))
            .await
            .unwrap();
        assert_eq!(responded.status, InvitationStatus::Accepted);

        let auth = store
            .find_authorization("@alice:m.org", "@bob:m.org")
            .await
            .unwrap()
            .expect("authorization persisted");
        assert_eq!(auth.value.invitation_id, inv.id);
    }

    #[tokio::test]
    async fn only_invitee_may_respond() {
        let (service, _, _) = service();
        let inv = service
            .send_invitation(&alice(), PartyRole::Buyer, "@bob:m.org", "Coffee Q1", None, None)
            .await
            .unwrap();
        let err = service
            .respond_to_invitation(&alice(), &inv.id, true, None)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Unauthorized(_)));
    }

    #[tokio::test]
    async fn second_response_is_rejected() {
        let (service, _, _) = service();
        let inv = service
            .send_invitation(&alice(), PartyRole::Buyer, "@bob:m.org", "Coffee Q1", None, None)
            .await
            .unwrap();
        service.respond_to_invitation(&bob(), &inv.id, false, None).await.unwrap();
        let err = service.respond_to_invitation(&bob(), &inv.id, true, None).await.unwrap_err();
        assert!(matches!(err, EngineError::AlreadyResponded(_)));
    }

    #[tokio::test]
    async fn expired_invitation_cannot_be_accepted() {
        let (service, store, _) = service();
        let inv = service
            .send_invitation(&alice(), PartyRole::Buyer, "@bob:m.org", "Coffee Q1", None, None)
            .await
            .unwrap();

        // Age the invitation past its deadline.
        let versioned = store.get_invitation(&inv.id).await.unwrap().unwrap();
        let mut aged = versioned.value;
        aged.created_at = aged.created_at - Duration::days(6);
        aged.expires_at = aged.expires_at - Duration::days(6);
        store.update_invitation(aged, versioned.version).await.unwrap();

        let err = service.respond_to_invitation(&bob(), &inv.id, true, None).await.unwrap_err();
        assert!(matches!(err, EngineError::Expired(_)));
        assert!(store.find_authorization("@alice:m.org", "@bob:m.org").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn listing_partitions_and_derives_expiry() {
        let (service, store, _) = service();
        let inv = service
            .send_invitation(&alice(), PartyRole::Buyer, "@bob:m.org", "Coffee Q1", None, None)
            .await
            .unwrap();
        service
            .send_invitation(&bob(), PartyRole::Seller, "@alice:m.org", "Cocoa Q2", None, None)
            .await
            .unwrap();

        // Age the first invitation without sweeping.
        let versioned = store.get_invitation(&inv.id).await.unwrap().unwrap();
        let mut aged = versioned.value;
        aged.expires_at = Utc::now() - Duration::hours(1);
        store.update_invitation(aged, versioned.version).await.unwrap();

        let list = service.list_invitations("@alice:m.org").await.unwrap();
        assert_eq!(list.sent.len(), 1);
        assert_eq!(list.received.len(), 1);
        assert_eq!(list.sent[0].status, InvitationStatus::Expired);
        assert_eq!(list.pending_sent, 0);
        assert_eq!(list.pending_received, 1);
        assert_eq!(list.total_pending, 1);
    }

    #[tokio::test]
    async fn cancel_is_initiator_only_and_pending_only() {
        let (service, _, _) = service();
        let inv = service
            .send_invitation(&alice(), PartyRole::Buyer, "@bob:m.org", "Coffee Q1", None, None)
            .await
            .unwrap();
        assert!(matches!(
            service.cancel_invitation(&bob(), &inv.id).await.unwrap_err(),
            EngineError::Unauthorized(_)
        ));

        let cancelled = service.cancel_invitation(&alice(), &inv.id).await.unwrap();
        assert_eq!(cancelled.status, InvitationStatus::Cancelled);
        assert!(matches!(
            service.cancel_invitation(&alice(), &inv.id).await.unwrap_err(),
            EngineError::AlreadyResponded(_)
        ));
    }

    #[tokio::test]
    async fn sweep_marks_expired_rows() {
        let (service, store, _) = service();
        let inv = service
            .send_invitation(&alice(), PartyRole::Buyer, "@bob:m.org", "Coffee Q1", None, None)
            .await
            .unwrap();
        let versioned = store.get_invitation(&inv.id).await.unwrap().unwrap();
        let mut aged = versioned.value;
        aged.expires_at = Utc::now() - Duration::hours(1);
        store.update_invitation(aged, versioned.version).await.unwrap();

        assert_eq!(service.sweep_expired().await.unwrap(), 1);
        let stored = store.get_invitation(&inv.id).await.unwrap().unwrap();
        assert_eq!(stored.value.status, InvitationStatus::Expired);
    }
}
