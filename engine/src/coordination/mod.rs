//! Concurrency coordination primitives

pub mod lc_locks;

pub use lc_locks::LcLockRegistry;
