//! Chat archives
//!
//! An archive is an immutable snapshot of a closed message window, hashed so
//! any consumer (dispute evidence, audits) can verify it before trusting the
//! contents. The hash is a SHA-256 over a canonical ordered representation:
//! identical window + identical message set always reproduces the same hash.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// One archived chat message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchivedMessage {
    pub id: String,
    pub event_id: String,
    pub sender: String,
    pub sender_name: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub message_type: String,
    pub content: String,
    pub is_encrypted: bool,
    pub decrypted_content: Option<String>,
}

/// Immutable snapshot of a negotiation transcript
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatArchive {
    pub room_id: String,
    pub room_name: String,
    pub archive_timestamp: DateTime<Utc>,
    pub start_timestamp: DateTime<Utc>,
    pub end_timestamp: DateTime<Utc>,
    pub participants: Vec<String>,
    pub message_count: usize,
    /// Ordered by timestamp ascending at archival time
    pub messages: Vec<ArchivedMessage>,
    /// Hex SHA-256 over the canonical representation
    pub archive_hash: String,
    pub encryption_key: Option<String>,
}

impl ChatArchive {
    /// Recompute the content hash over the ordered message set + metadata.
    ///
    /// The canonical form hashes field-by-field with `\x1f` separators and a
    /// `\x1e` record terminator per message, so no field concatenation can
    /// collide with another message set.
    pub fn compute_hash(
        room_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        messages: &[ArchivedMessage],
    ) -> String {
        let mut hasher = Sha256::new();
        hasher.update(room_id.as_bytes());
        hasher.update([0x1f]);
        hasher.update(start.timestamp_millis().to_be_bytes());
        hasher.update(end.timestamp_millis().to_be_bytes());
        hasher.update(messages.len().to_be_bytes());
        hasher.update([0x1e]);
        for m in messages {
            for field in [&m.id, &m.event_id, &m.sender, &m.message_type, &m.content] {
                hasher.update(field.as_bytes());
                hasher.update([0x1f]);
            }
            hasher.update(m.timestamp.timestamp_millis().to_be_bytes());
            hasher.update([m.is_encrypted as u8]);
            hasher.update([0x1e]);
        }
        hex::encode(hasher.finalize())
    }

    /// True when the stored hash matches the recomputed one
    pub fn verify_integrity(&self) -> bool {
        self.message_count == self.messages.len()
            && self.archive_hash
                == Self::compute_hash(
                    &self.room_id,
                    self.start_timestamp,
                    self.end_timestamp,
                    &self.messages,
                )
    }
}
