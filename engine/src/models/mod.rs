//! Persisted data models for the LC lifecycle engine

pub mod archive;
pub mod dispute;
pub mod invitation;
pub mod lc;
pub mod trade;

use serde::{Deserialize, Serialize};

/// Explicit caller identity passed into every operation.
///
/// No ambient session lookup: whoever drives the engine resolves the current
/// user first and hands it in, which keeps every operation's inputs explicit
/// and testable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActorContext {
    pub user_id: String,
}

impl ActorContext {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self { user_id: user_id.into() }
    }
}
