//! Domain records persisted by txlab.
//!
//! # Invariants
//! - Deletion is a soft-delete tombstone unless explicitly purged.

pub mod user;
