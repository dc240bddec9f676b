//! Map configuration.
//!
//! ```
//! use ttlmap::{MapOptions, KeyExist};
//!
//! let options = MapOptions::<String>::new()
//!     .with_capacity(1024)
//!     .on_will_expire(|key, entry| println!("expired: {}={}", key, entry.value()))
//!     .on_will_evict(|key, entry| println!("evicted: {}={}", key, entry.value()));
//!
//! assert_eq!(options.initial_capacity, 1024);
//! assert_eq!(KeyExist::default(), KeyExist::DontCare);
//! ```

use crate::storage::Entry;
use std::fmt;
use std::sync::Arc;

/// Listener invoked with the key and the entry that is about to leave the map.
///
/// Listeners run synchronously while the map's write lock is held. They must
/// not call back into the same map.
///
/// A listener that panics inside [`TtlMap::set`](crate::TtlMap::set) loses
/// that write: the replaced entry has been removed and the new one is not
/// stored.
pub type Listener<V> = Arc<dyn Fn(&str, &Entry<V>) + Send + Sync>;

/// Configuration for a new [`TtlMap`](crate::TtlMap).
pub struct MapOptions<V> {
    /// Number of entries to pre-allocate room for (default: 0).
    ///
    /// Only affects allocation, never behavior.
    pub initial_capacity: usize,

    /// Called when an entry is removed because its expiration passed.
    pub on_will_expire: Option<Listener<V>>,

    /// Called when an entry is removed for any other reason: overwritten by
    /// `set`, or flushed by `drain`.
    pub on_will_evict: Option<Listener<V>>,
}

impl<V> Default for MapOptions<V> {
    fn default() -> Self {
        Self {
            initial_capacity: 0,
            on_will_expire: None,
            on_will_evict: None,
        }
    }
}

impl<V> Clone for MapOptions<V> {
    fn clone(&self) -> Self {
        Self {
            initial_capacity: self.initial_capacity,
            on_will_expire: self.on_will_expire.clone(),
            on_will_evict: self.on_will_evict.clone(),
        }
    }
}

impl<V> fmt::Debug for MapOptions<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MapOptions")
            .field("initial_capacity", &self.initial_capacity)
            .field("on_will_expire", &self.on_will_expire.is_some())
            .field("on_will_evict", &self.on_will_evict.is_some())
            .finish()
    }
}

impl<V> MapOptions<V> {
    /// Creates a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the capacity hint
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.initial_capacity = capacity;
        self
    }

    /// Sets the listener for time-triggered removals
    pub fn on_will_expire<F>(mut self, listener: F) -> Self
    where
        F: Fn(&str, &Entry<V>) + Send + Sync + 'static,
    {
        self.on_will_expire = Some(Arc::new(listener));
        self
    }

    /// Sets the listener for overwrites and drain flushes
    pub fn on_will_evict<F>(mut self, listener: F) -> Self
    where
        F: Fn(&str, &Entry<V>) + Send + Sync + 'static,
    {
        self.on_will_evict = Some(Arc::new(listener));
        self
    }
}

/// What `set` requires of the key before writing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KeyExist {
    /// Insert or overwrite.
    #[default]
    DontCare,
    /// Insert only; fail with `AlreadyExists` if the key is present.
    MustNotExist,
    /// Overwrite only; fail with `NotFound` if the key is absent.
    MustExist,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options() {
        let options: MapOptions<u32> = MapOptions::default();
        assert_eq!(options.initial_capacity, 0);
        assert!(options.on_will_expire.is_none());
        assert!(options.on_will_evict.is_none());
    }

    #[test]
    fn test_builder_pattern_chaining() {
        let options = MapOptions::<u32>::new()
            .with_capacity(16)
            .on_will_evict(|_, _| {});

        assert_eq!(options.initial_capacity, 16);
        assert!(options.on_will_expire.is_none());
        assert!(options.on_will_evict.is_some());
        assert_eq!(
            format!("{:?}", options),
            "MapOptions { initial_capacity: 16, on_will_expire: false, on_will_evict: true }"
        );
    }
}
