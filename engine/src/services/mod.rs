//! Engine services
//!
//! Each service owns one slice of the LC lifecycle and talks to the rest of
//! the world through the store, ledger and messaging ports. Construction is
//! plain `Arc` wiring; there is no service locator.

pub mod archival;
pub mod audit;
pub mod disputes;
pub mod invitations;
pub mod lifecycle;
pub mod settlement;

pub use archival::ArchiveService;
pub use audit::{AuditAction, AuditEntry, AuditLog, AuditRecord};
pub use disputes::{DisputeService, EvidenceSubmission};
pub use invitations::{InvitationList, InvitationService};
pub use lifecycle::LcLifecycle;
pub use settlement::{FundingCapacity, SettlementCoordinator};
