//! Stored values and their expiration deadlines.
//!
//! An [`Entry`] pairs an opaque value with an optional expiration instant.
//! The deadline is fixed when the entry is built; replacing it means writing
//! a new entry under the same key.

use std::time::{Duration, Instant};

/// How an [`Entry`] decides when it expires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expiration {
    /// Expires at an absolute instant (which may already be in the past).
    At(Instant),
    /// Expires once this much time has passed since the entry was built.
    After(Duration),
    /// Never expires on its own.
    Never,
}

/// Represents a stored value with optional expiry time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry<V> {
    /// The actual value stored
    value: V,
    /// When this entry expires (None = never expires)
    expires_at: Option<Instant>,
}

impl<V> Entry<V> {
    /// Creates a new entry.
    ///
    /// A relative expiration is resolved against `Instant::now()`. A duration
    /// too large to represent as an instant behaves like [`Expiration::Never`].
    pub fn new(value: V, expiration: Expiration) -> Self {
        let expires_at = match expiration {
            Expiration::At(at) => Some(at),
            Expiration::After(ttl) => Instant::now().checked_add(ttl),
            Expiration::Never => None,
        };
        Self { value, expires_at }
    }

    /// Creates a new entry that expires after `ttl`.
    pub fn with_ttl(value: V, ttl: Duration) -> Self {
        Self::new(value, Expiration::After(ttl))
    }

    /// Creates a new entry that expires at `at`.
    pub fn expiring_at(value: V, at: Instant) -> Self {
        Self::new(value, Expiration::At(at))
    }

    /// Creates a new entry without expiry.
    pub fn persistent(value: V) -> Self {
        Self::new(value, Expiration::Never)
    }

    pub fn value(&self) -> &V {
        &self.value
    }

    pub fn into_value(self) -> V {
        self.value
    }

    /// Returns the expiration instant, or `None` if the entry never expires.
    pub fn expires_at(&self) -> Option<Instant> {
        self.expires_at
    }

    /// Returns `true` if this entry carries an expiration at all.
    pub fn expires(&self) -> bool {
        self.expires_at.is_some()
    }

    /// Checks if this entry has expired.
    #[inline]
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Instant::now())
    }

    #[inline]
    pub(crate) fn is_expired_at(&self, now: Instant) -> bool {
        self.expires_at.map(|exp| now >= exp).unwrap_or(false)
    }

    /// Returns the remaining time to live.
    ///
    /// Never negative: an overdue entry reports `Duration::ZERO`. An entry
    /// without expiry reports `Duration::MAX`.
    pub fn ttl(&self) -> Duration {
        self.expires_at
            .map(|exp| exp.saturating_duration_since(Instant::now()))
            .unwrap_or(Duration::MAX)
    }
}
