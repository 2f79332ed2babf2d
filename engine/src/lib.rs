//! Letter-of-credit lifecycle engine
//!
//! Drives trade-finance letters of credit from the initial invitation
//! handshake through negotiation, escrow funding, shipment, document
//! verification and settlement, with a dispute sub-process and a hashed
//! archive of the negotiation transcript bound to every closed trade.
//!
//! The engine owns state and money-movement decisions only. Persistence,
//! the settlement ledger and the messaging layer are collaborator ports
//! ([`store::Store`], [`ledger::LedgerClient`], [`messaging::MessagingClient`])
//! with in-memory reference implementations for tests.

pub mod config;
pub mod coordination;
pub mod error;
pub mod ledger;
pub mod logging;
pub mod messaging;
pub mod models;
pub mod services;
pub mod store;
pub mod validation;

pub use config::EngineConfig;
pub use error::{EngineError, Result};
pub use models::ActorContext;
