//! Meridian Shared Types
//!
//! Types shared between the LC lifecycle engine and any transport or client
//! layer built on top of it. Everything here is plain data: serde-friendly,
//! no engine logic, no collaborator handles.

pub mod currency;
pub mod trade;

pub use currency::*;
pub use trade::*;
