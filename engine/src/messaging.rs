//! Messaging collaborator port
//!
//! Notification delivery and chat-room mechanics live outside the engine.
//! The engine only needs to request notifications, open a negotiation
//! channel, post system notices, and pull an ordered message window for
//! archival.

use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::models::archive::ArchivedMessage;
use crate::models::invitation::Invitation;

/// External messaging layer
#[async_trait]
pub trait MessagingClient: Send + Sync {
    /// Deliver an invitation notification to the invitee
    async fn send_invite_notification(&self, user_id: &str, invitation: &Invitation) -> Result<()>;

    /// Open a negotiation channel for the given participants
    async fn create_negotiation_channel(&self, participants: &[String]) -> Result<String>;

    /// Ordered (timestamp ascending) messages within `[from, to]`
    async fn fetch_messages(
        &self,
        channel_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<ArchivedMessage>>;

    /// Post a system notice into a channel
    async fn post_system_notice(&self, channel_id: &str, text: &str) -> Result<()>;
}

#[derive(Default)]
struct MessagingState {
    rooms: HashMap<String, Vec<ArchivedMessage>>,
    notices: Vec<(String, String)>,
    notifications: Vec<(String, String)>,
    room_counter: u64,
}

/// In-memory messaging double
#[derive(Default)]
pub struct MemoryMessaging {
    state: Mutex<MessagingState>,
}

impl MemoryMessaging {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a message into a room (test hook)
    pub async fn push_message(&self, channel_id: &str, message: ArchivedMessage) {
        let mut state = self.state.lock().await;
        state.rooms.entry(channel_id.to_string()).or_default().push(message);
    }

    /// Notices posted so far, `(channel_id, text)`
    pub async fn notices(&self) -> Vec<(String, String)> {
        self.state.lock().await.notices.clone()
    }

    /// Invite notifications delivered so far, `(user_id, invitation_id)`
    pub async fn notifications(&self) -> Vec<(String, String)> {
        self.state.lock().await.notifications.clone()
    }
}

#[async_trait]
impl MessagingClient for MemoryMessaging {
    async fn send_invite_notification(&self, user_id: &str, invitation: &Invitation) -> Result<()> {
        let mut state = self.state.lock().await;
        state.notifications.push((user_id.to_string(), invitation.id.clone()));
        Ok(())
    }

    async fn create_negotiation_channel(&self, _participants: &[String]) -> Result<String> {
        let mut state = self.state.lock().await;
        state.room_counter += 1;
        let channel_id = format!("!lc-{:04}:meridian.local", state.room_counter);
        state.rooms.entry(channel_id.clone()).or_default();
        Ok(channel_id)
    }

    async fn fetch_messages(
        &self,
        channel_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<ArchivedMessage>> {
        let state = self.state.lock().await;
        let mut messages: Vec<ArchivedMessage> = state
            .rooms
            .get(channel_id)
            .map(|msgs| {
                msgs.iter()
                    .filter(|m| m.timestamp >= from && m.timestamp <= to)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        messages.sort_by_key(|m| m.timestamp);
        Ok(messages)
    }

    async fn post_system_notice(&self, channel_id: &str, text: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        state.notices.push((channel_id.to_string(), text.to_string()));
        Ok(())
    }
}
