//! Trade archival
//!
//! Runs alongside the LC lifecycle without touching it: archival reads the
//! negotiation transcript from the messaging collaborator, fixes it under a
//! deterministic hash, and binds it 1:1 to the trade record. `seal_trade` is
//! the terminal-state hook that does all of it in one pass.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use meridian_types::TradeStatus;
use tracing::info;

use crate::error::{EngineError, Result};
use crate::logging::sanitize_id;
use crate::messaging::MessagingClient;
use crate::models::archive::ChatArchive;
use crate::models::lc::{LcStatus, LetterOfCredit};
use crate::models::trade::{SettlementTransaction, TradeRecord};
use crate::models::ActorContext;
use crate::services::audit::{AuditAction, AuditEntry, AuditLog};
use crate::store::Store;

pub struct ArchiveService {
    store: Arc<dyn Store>,
    messaging: Arc<dyn MessagingClient>,
    audit: Arc<AuditLog>,
}

impl ArchiveService {
    pub fn new(
        store: Arc<dyn Store>,
        messaging: Arc<dyn MessagingClient>,
        audit: Arc<AuditLog>,
    ) -> Self {
        Self { store, messaging, audit }
    }

    /// Snapshot one message window into a hashed archive.
    ///
    /// The messaging collaborator returns the window ordered by timestamp;
    /// the hash covers the ordered set plus the window bounds, so the same
    /// window over the same transcript always reproduces the same hash.
    pub async fn archive_conversation(
        &self,
        room_id: &str,
        room_name: &str,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
    ) -> Result<ChatArchive> {
        if window_end < window_start {
            return Err(EngineError::Validation(
                "archive window end precedes its start".into(),
            ));
        }
        let messages = self
            .messaging
            .fetch_messages(room_id, window_start, window_end)
            .await
            .map_err(EngineError::Messaging)?;

        let mut participants: Vec<String> =
            messages.iter().map(|m| m.sender.clone()).collect();
        participants.sort();
        participants.dedup();

        let archive_hash =
            ChatArchive::compute_hash(room_id, window_start, window_end, &messages);
        info!(
            room_id = %sanitize_id(room_id),
            message_count = messages.len(),
            "Conversation archived"
        );
        Ok(ChatArchive {
            room_id: room_id.to_string(),
            room_name: room_name.to_string(),
            archive_timestamp: Utc::now(),
            start_timestamp: window_start,
            end_timestamp: window_end,
            participants,
            message_count: messages.len(),
            messages,
            archive_hash,
            encryption_key: None,
        })
    }

    /// Bind an archive to its trade record, 1:1.
    ///
    /// The archive window must fall inside the trade's lifetime; anything
    /// else is a `WindowMismatchError`, since a transcript from outside the
    /// trade proves nothing about it.
    pub async fn link_trade_to_archive(
        &self,
        trade_id: &str,
        archive: ChatArchive,
    ) -> Result<TradeRecord> {
        if !archive.verify_integrity() {
            return Err(EngineError::Validation(
                "archive fails integrity verification, refusing to link".into(),
            ));
        }

        let versioned = self
            .store
            .get_trade(trade_id)
            .await?
            .ok_or_else(|| EngineError::NotFound { kind: "trade", id: trade_id.into() })?;
        let mut trade = versioned.value;

        let lifetime_end = trade.completed_at.unwrap_or_else(Utc::now);
        if archive.start_timestamp < trade.created_at || archive.end_timestamp > lifetime_end {
            return Err(EngineError::WindowMismatch(format!(
                "archive window [{}, {}] falls outside trade lifetime [{}, {}]",
                archive.start_timestamp, archive.end_timestamp, trade.created_at, lifetime_end
            )));
        }

        trade.chat_archive = Some(archive);
        trade.is_archived = true;
        self.store.update_trade(trade.clone(), versioned.version).await?;
        info!(trade_id = %sanitize_id(trade_id), "Trade linked to archive");
        Ok(trade)
    }

    /// Recompute-and-compare over a stored trade's archive
    pub async fn verify_archive_integrity(&self, trade_id: &str) -> Result<bool> {
        let trade = self
            .store
            .get_trade(trade_id)
            .await?
            .ok_or_else(|| EngineError::NotFound { kind: "trade", id: trade_id.into() })?
            .value;
        Ok(trade.archive_consistent() && trade.chat_archive.is_some())
    }

    /// Terminal-state hook: archive the trade's negotiation over its full
    /// lifetime, link it, stamp the settlement transaction and close the
    /// record.
    pub async fn seal_trade(
        &self,
        ctx: &ActorContext,
        trade_id: &str,
        lc: &LetterOfCredit,
    ) -> Result<TradeRecord> {
        if !lc.status.is_terminal() {
            return Err(EngineError::Validation(format!(
                "LC {} is {:?}, sealing requires a terminal state",
                lc.id, lc.status
            )));
        }
        let room_id = lc.matrix_room_id.clone().ok_or_else(|| {
            EngineError::Validation(format!("LC {} has no negotiation channel", lc.id))
        })?;

        let versioned = self
            .store
            .get_trade(trade_id)
            .await?
            .ok_or_else(|| EngineError::NotFound { kind: "trade", id: trade_id.into() })?;
        let mut trade = versioned.value;

        let completed_at = lc.completed_at.unwrap_or_else(Utc::now);
        trade.completed_at = Some(completed_at);
        trade.status = match lc.status {
            LcStatus::Completed => TradeStatus::Completed,
            _ => TradeStatus::Cancelled,
        };
        if let Some(tx) = &lc.deployment_tx {
            trade.settlement_transaction = Some(SettlementTransaction {
                hash: tx.clone(),
                source_account: lc
                    .terms
                    .buyer
                    .wallet_address
                    .clone()
                    .unwrap_or_default(),
                operation_type: "escrow_settlement".into(),
                success: lc.status == LcStatus::Completed,
                ledger: None,
                fee: None,
                memo: Some(lc.lc_number.clone()),
                error_message: None,
            });
        }
        self.store.update_trade(trade.clone(), versioned.version).await?;

        let archive = self
            .archive_conversation(&room_id, &lc.lc_number, trade.created_at, completed_at)
            .await?;
        let trade = self.link_trade_to_archive(trade_id, archive).await?;

        self.audit
            .append(
                AuditEntry::new(&ctx.user_id, AuditAction::Archive, "trade", trade_id)
                    .detail(lc.lc_number.clone()),
            )
            .await;
        info!(trade_id = %sanitize_id(trade_id), lc_number = %lc.lc_number, "Trade sealed");
        Ok(trade)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::MemoryMessaging;
    use crate::models::archive::ArchivedMessage;
    use crate::models::lc::{LcTerms, TradeParty};
    use crate::models::trade::TradeParticipant;
    use crate::store::memory::MemoryStore;
    use chrono::{Duration, TimeZone};
    use meridian_types::{AssetInfo, AssetType, TradeDirection, TradeType};

    struct Fixture {
        archival: ArchiveService,
        messaging: Arc<MemoryMessaging>,
        store: Arc<MemoryStore>,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let messaging = Arc::new(MemoryMessaging::new());
        Fixture {
            archival: ArchiveService::new(
                store.clone(),
                messaging.clone(),
                Arc::new(AuditLog::new()),
            ),
            messaging,
            store,
        }
    }

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn message(id: &str, sender: &str, secs: i64, content: &str) -> ArchivedMessage {
        ArchivedMessage {
            id: id.into(),
            event_id: format!("$ev-{id}"),
            sender: sender.into(),
            sender_name: None,
            timestamp: t(secs),
            message_type: "m.text".into(),
            content: content.into(),
            is_encrypted: false,
            decrypted_content: None,
        }
    }

    fn usdc() -> AssetInfo {
        AssetInfo {
            code: "USDC".into(),
            name: "USD Coin".into(),
            issuer: Some("GISSUER".into()),
            asset_type: AssetType::CreditAlphanum4,
        }
    }

    fn trade(id: &str, room: &str, created: i64, completed: Option<i64>) -> TradeRecord {
        TradeRecord {
            id: id.into(),
            order_id: "ord-1".into(),
            room_id: room.into(),
            direction: TradeDirection::Buy,
            trade_type: TradeType::Lc,
            status: TradeStatus::Pending,
            base_asset: usdc(),
            counter_asset: usdc(),
            amount: 1_970,
            price: 50_000_000,
            total_value: 98_500_000_000,
            initiator: TradeParticipant {
                matrix_user_id: "@alice:m.org".into(),
                username: "alice".into(),
                role: "buyer".into(),
            },
            counterparty: TradeParticipant {
                matrix_user_id: "@bob:m.org".into(),
                username: "bob".into(),
                role: "seller".into(),
            },
            created_at: t(created),
            completed_at: completed.map(t),
            expires_at: None,
            settlement_transaction: None,
            chat_archive: None,
            notes: None,
            tags: vec![],
            is_archived: false,
        }
    }

    #[tokio::test]
    async fn archiving_is_deterministic_over_the_same_window() {
        let f = fixture();
        f.messaging
            .push_message("!neg:m.org", message("1", "@alice:m.org", 1_100, "offer"))
            .await;
        f.messaging
            .push_message("!neg:m.org", message("2", "@bob:m.org", 1_200, "accepted"))
            .await;

        let a = f
            .archival
            .archive_conversation("!neg:m.org", "Coffee Q1", t(1_000), t(2_000))
            .await
            .unwrap();
        let b = f
            .archival
            .archive_conversation("!neg:m.org", "Coffee Q1", t(1_000), t(2_000))
            .await
            .unwrap();
        assert_eq!(a.archive_hash, b.archive_hash);
        assert_eq!(a.message_count, 2);
        assert_eq!(a.participants, vec!["@alice:m.org", "@bob:m.org"]);
        assert!(a.verify_integrity());

        // A different window over the same room is a different archive.
        let c = f
            .archival
            .archive_conversation("!neg:m.org", "Coffee Q1", t(1_000), t(1_150))
            .await
            .unwrap();
        assert_ne!(a.archive_hash, c.archive_hash);
        assert_eq!(c.message_count, 1);
    }

    #[tokio::test]
    async fn linking_enforces_the_trade_lifetime_window() {
        let f = fixture();
        f.store.insert_trade(trade("tr-1", "!neg:m.org", 1_000, Some(2_000))).await.unwrap();
        f.messaging
            .push_message("!neg:m.org", message("1", "@alice:m.org", 1_100, "offer"))
            .await;

        // Window starting before the trade existed is rejected.
        let early = f
            .archival
            .archive_conversation("!neg:m.org", "Coffee Q1", t(500), t(1_500))
            .await
            .unwrap();
        let err = f.archival.link_trade_to_archive("tr-1", early).await.unwrap_err();
        assert!(matches!(err, EngineError::WindowMismatch(_)));

        let fitting = f
            .archival
            .archive_conversation("!neg:m.org", "Coffee Q1", t(1_000), t(2_000))
            .await
            .unwrap();
        let linked = f.archival.link_trade_to_archive("tr-1", fitting).await.unwrap();
        assert!(linked.is_archived);
        assert!(f.archival.verify_archive_integrity("tr-1").await.unwrap());
    }

    #[tokio::test]
    async fn sealing_archives_links_and_closes_the_trade() {
        let f = fixture();
        let created = Utc::now() - Duration::hours(2);
        let mut tr = trade("tr-1", "!neg:m.org", 0, None);
        tr.created_at = created;
        f.store.insert_trade(tr).await.unwrap();
        f.messaging
            .push_message(
                "!neg:m.org",
                ArchivedMessage {
                    timestamp: Utc::now() - Duration::hours(1),
                    ..message("1", "@alice:m.org", 0, "terms agreed")
                },
            )
            .await;

        let lc = LetterOfCredit {
            id: "lc-1".into(),
            lc_number: "LC-2026-AB12CD34".into(),
            terms: LcTerms {
                buyer: TradeParty {
                    name: "Alice Imports".into(),
                    address: "1 Dock Rd".into(),
                    matrix_id: "@alice:m.org".into(),
                    wallet_address: Some("GBUYER".into()),
                },
                ..crate::validation::tests::sample_terms()
            },
            status: LcStatus::Completed,
            contract_address: None,
            escrow_address: Some("GESCROW".into()),
            deployment_tx: Some("tx-000001".into()),
            created_at: created,
            updated_at: Utc::now(),
            funded_at: Some(created + Duration::minutes(10)),
            shipped_at: None,
            completed_at: Some(Utc::now()),
            matrix_room_id: Some("!neg:m.org".into()),
        };

        let sealed = f
            .archival
            .seal_trade(&ActorContext::new("@alice:m.org"), "tr-1", &lc)
            .await
            .unwrap();
        assert_eq!(sealed.status, TradeStatus::Completed);
        assert!(sealed.is_archived);
        assert!(sealed.archive_consistent());
        let settlement = sealed.settlement_transaction.unwrap();
        assert_eq!(settlement.hash, "tx-000001");
        assert_eq!(settlement.memo.as_deref(), Some("LC-2026-AB12CD34"));

        // Sealing a live LC is refused.
        let mut live = lc.clone();
        live.status = LcStatus::Funded;
        let err = f
            .archival
            .seal_trade(&ActorContext::new("@alice:m.org"), "tr-1", &live)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }
}
