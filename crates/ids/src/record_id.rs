//! Timestamp-prefixed record identifiers.

use crate::{IdError, IdResult};
use chrono::{DateTime, Duration, NaiveDateTime, SubsecRound, Utc};
use std::{fmt, str::FromStr};
use uuid::Uuid;

const TIMESTAMP_FORMAT: &str = "%Y%m%dT%H%M%S%.3f";

/// The random half of a [`RecordId`]: a v4 UUID in its 32 lowercase hex character form.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RandomSuffix(Uuid);

impl Default for RandomSuffix {
    fn default() -> Self {
        Self::new()
    }
}

impl RandomSuffix {
    /// Generates a fresh random suffix.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Validates a suffix that must already be 32 lowercase hex characters.
    ///
    /// Hyphenated or uppercase forms are rejected rather than normalised, so that a given
    /// record id has exactly one textual spelling.
    ///
    /// # Errors
    ///
    /// Returns [`IdError::InvalidInput`] if `input` is not in canonical form.
    pub fn parse(input: &str) -> IdResult<Self> {
        if !Self::is_canonical(input) {
            return Err(IdError::InvalidInput(format!(
                "suffix must be 32 lowercase hex characters without hyphens, got: '{}'",
                input
            )));
        }

        Uuid::parse_str(input)
            .map(Self)
            .map_err(|e| IdError::InvalidInput(format!("invalid suffix '{}': {}", input, e)))
    }

    /// Returns true if `input` is exactly 32 lowercase hex characters.
    pub fn is_canonical(input: &str) -> bool {
        input.len() == 32
            && input
                .bytes()
                .all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
    }
}

impl fmt::Display for RandomSuffix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

/// Identifier for a test patient or test case.
///
/// Ordering follows the timestamp first, so sorting ids sorts records by creation time.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordId {
    timestamp: DateTime<Utc>,
    suffix: RandomSuffix,
}

impl RecordId {
    /// Generates a new record id stamped with the current time.
    pub fn generate() -> Self {
        Self::generate_after(None)
    }

    /// Generates a new record id.
    ///
    /// If `previous` is provided the new timestamp is strictly greater than the previous one
    /// (bumped by 1 ms if the clock has not moved on), so ids created in a tight loop still
    /// sort in creation order.
    pub fn generate_after(previous: Option<&RecordId>) -> Self {
        // Stored at display precision so that parse(to_string()) is lossless.
        let now = Utc::now().trunc_subsecs(3);

        let timestamp = match previous {
            Some(prev) if now <= prev.timestamp => prev.timestamp + Duration::milliseconds(1),
            _ => now,
        };

        Self {
            timestamp,
            suffix: RandomSuffix::new(),
        }
    }

    /// Validates and parses an externally supplied record id.
    ///
    /// # Errors
    ///
    /// Returns [`IdError::InvalidInput`] if the separator, the timestamp or the suffix is
    /// malformed.
    pub fn parse(input: &str) -> IdResult<Self> {
        let (ts_str, suffix_str) = input.split_once('-').ok_or_else(|| {
            IdError::InvalidInput(format!("Invalid record id format: '{}'", input))
        })?;

        let ts_no_z = ts_str.strip_suffix('Z').ok_or_else(|| {
            IdError::InvalidInput(format!("Timestamp must end with 'Z': '{}'", ts_str))
        })?;

        let naive = NaiveDateTime::parse_from_str(ts_no_z, TIMESTAMP_FORMAT).map_err(|e| {
            IdError::InvalidInput(format!("Invalid timestamp format '{}': {}", ts_str, e))
        })?;

        let suffix = RandomSuffix::parse(suffix_str)?;

        Ok(Self {
            timestamp: DateTime::<Utc>::from_naive_utc_and_offset(naive, Utc),
            suffix,
        })
    }

    /// Returns the creation timestamp.
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Returns the random suffix.
    pub fn suffix(&self) -> RandomSuffix {
        self.suffix
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}Z-{}",
            self.timestamp.format(TIMESTAMP_FORMAT),
            self.suffix()
        )
    }
}

impl FromStr for RecordId {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RecordId::parse(s)
    }
}
