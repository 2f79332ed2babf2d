//! Hash-chained audit log
//!
//! Append-only record of every financial-state mutation: funding, release,
//! refund, dispute resolution and the transitions they drive. Each record
//! hashes its own content plus the previous record's hash, so any later
//! modification breaks the chain and is detectable via `verify_chain`.
//!
//! Records carry the idempotency key and before/after status of the
//! mutation, enough for manual audit or replay.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use uuid::Uuid;

/// What kind of mutation the record describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Create,
    Transition,
    Fund,
    Release,
    Refund,
    Dispute,
    Resolve,
    Cancel,
    Archive,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::Create => "create",
            AuditAction::Transition => "transition",
            AuditAction::Fund => "fund",
            AuditAction::Release => "release",
            AuditAction::Refund => "refund",
            AuditAction::Dispute => "dispute",
            AuditAction::Resolve => "resolve",
            AuditAction::Cancel => "cancel",
            AuditAction::Archive => "archive",
        }
    }
}

/// One append-only audit record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub actor_id: String,
    pub action: AuditAction,
    pub resource_type: &'static str,
    pub resource_id: String,
    pub idempotency_key: Option<String>,
    pub old_status: Option<String>,
    pub new_status: Option<String>,
    pub detail: Option<String>,
    pub prev_hash: Option<String>,
    pub record_hash: String,
}

impl AuditRecord {
    fn compute_hash(&self) -> String {
        let mut hasher = Sha256::new();
        for field in [
            self.id.as_str(),
            self.actor_id.as_str(),
            self.action.as_str(),
            self.resource_type,
            self.resource_id.as_str(),
            self.idempotency_key.as_deref().unwrap_or(""),
            self.old_status.as_deref().unwrap_or(""),
            self.new_status.as_deref().unwrap_or(""),
            self.detail.as_deref().unwrap_or(""),
            self.prev_hash.as_deref().unwrap_or(""),
        ] {
            hasher.update(field.as_bytes());
            hasher.update([0x1f]);
        }
        hasher.update(self.timestamp.timestamp_millis().to_be_bytes());
        hex::encode(hasher.finalize())
    }
}

/// Builder mirroring the fields a caller knows at the mutation site
#[derive(Debug, Clone)]
pub struct AuditEntry {
    pub actor_id: String,
    pub action: AuditAction,
    pub resource_type: &'static str,
    pub resource_id: String,
    pub idempotency_key: Option<String>,
    pub old_status: Option<String>,
    pub new_status: Option<String>,
    pub detail: Option<String>,
}

impl AuditEntry {
    pub fn new(
        actor_id: impl Into<String>,
        action: AuditAction,
        resource_type: &'static str,
        resource_id: impl Into<String>,
    ) -> Self {
        Self {
            actor_id: actor_id.into(),
            action,
            resource_type,
            resource_id: resource_id.into(),
            idempotency_key: None,
            old_status: None,
            new_status: None,
            detail: None,
        }
    }

    pub fn idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }

    pub fn statuses(mut self, old: impl Into<String>, new: impl Into<String>) -> Self {
        self.old_status = Some(old.into());
        self.new_status = Some(new.into());
        self
    }

    pub fn detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

struct ChainState {
    records: Vec<AuditRecord>,
    last_hash: Option<String>,
}

/// Append-only, hash-chained audit log
pub struct AuditLog {
    state: Mutex<ChainState>,
}

impl Default for AuditLog {
    fn default() -> Self {
        Self::new()
    }
}

impl AuditLog {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ChainState { records: Vec::new(), last_hash: None }),
        }
    }

    /// Append a record, chaining it to the previous one
    pub async fn append(&self, entry: AuditEntry) -> AuditRecord {
        let mut state = self.state.lock().await;
        let mut record = AuditRecord {
            id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            actor_id: entry.actor_id,
            action: entry.action,
            resource_type: entry.resource_type,
            resource_id: entry.resource_id,
            idempotency_key: entry.idempotency_key,
            old_status: entry.old_status,
            new_status: entry.new_status,
            detail: entry.detail,
            prev_hash: state.last_hash.clone(),
            record_hash: String::new(),
        };
        record.record_hash = record.compute_hash();
        state.last_hash = Some(record.record_hash.clone());
        state.records.push(record.clone());
        record
    }

    /// Recompute every hash and verify the chain links
    pub async fn verify_chain(&self) -> bool {
        let state = self.state.lock().await;
        let mut prev: Option<&str> = None;
        for record in &state.records {
            if record.prev_hash.as_deref() != prev || record.record_hash != record.compute_hash() {
                return false;
            }
            prev = Some(record.record_hash.as_str());
        }
        true
    }

    /// Records for one resource, in append order
    pub async fn records_for(&self, resource_id: &str) -> Vec<AuditRecord> {
        let state = self.state.lock().await;
        state
            .records
            .iter()
            .filter(|r| r.resource_id == resource_id)
            .cloned()
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.records.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
