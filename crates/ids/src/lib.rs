//! Record identifiers for the concept test harness.
//!
//! Test patients and test cases are keyed by a *record id*: a millisecond UTC timestamp
//! followed by a random suffix.
//!
//! ## Format
//! `YYYYMMDDTHHMMSS.mmmZ-<suffix>` where `<suffix>` is a v4 UUID rendered as
//! **32 lowercase hexadecimal characters** (no hyphens).
//!
//! Example:
//! `20260111T143522.045Z-550e8400e29b41d4a716446655440000`
//!
//! The timestamp keeps ids human-readable and roughly creation-ordered; the suffix makes
//! collisions vanishingly unlikely for the lifetime of an in-memory collection. Collisions
//! are not defended against.
//!
//! Identifiers that arrive from outside (CLI arguments, persisted JSON) should be checked
//! with [`RecordId::parse`]. Persisted collections are read back as plain strings, so a
//! malformed id in storage is never fatal.

mod record_id;

pub use record_id::{RandomSuffix, RecordId};

/// Error type for record id operations.
#[derive(Debug, thiserror::Error)]
pub enum IdError {
    /// Invalid input provided
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

/// Result type for record id operations.
pub type IdResult<T> = Result<T, IdError>;
