//! The public map type.
//!
//! [`TtlMap`] is a thin facade over the storage engine: it owns the shared
//! engine and the handle of the reaper spawned for it, and it turns the
//! drain handshake into a single awaitable call.

use crate::error::{Error, Result};
use crate::options::{KeyExist, MapOptions};
use crate::storage::expiry::wait_until_set;
use crate::storage::{Entry, ExpiryReaper, StorageEngine};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tokio::runtime::Handle;

/// A concurrent string-keyed map whose entries expire on their own.
///
/// Each map spawns one reaper task on the Tokio runtime that is current when
/// it is built. The reaper sleeps until the soonest expiration, removes the
/// entries that are due and reports each one to the `on_will_expire`
/// listener.
///
/// A map is meant to be drained when it is no longer needed. Dropping it
/// without draining starts the drain in the background.
///
/// # Example
///
/// ```
/// use ttlmap::{Entry, KeyExist, MapOptions, TtlMap};
/// use std::time::Duration;
///
/// #[tokio::main]
/// async fn main() -> ttlmap::Result<()> {
///     let options = MapOptions::<String>::new()
///         .with_capacity(1024)
///         .on_will_expire(|key, entry| println!("expired: [{}={}]", key, entry.value()));
///     let map = TtlMap::new(options)?;
///
///     let hello = Entry::with_ttl("hello".to_string(), Duration::from_millis(100));
///     map.set("foo", hello, KeyExist::DontCare)?;
///     map.set_nx("bar", Entry::persistent("world".to_string()))?;
///     assert_eq!(map.get("foo")?.value(), "hello");
///
///     tokio::time::sleep(Duration::from_millis(200)).await;
///     assert!(map.get("foo").is_err());
///     assert_eq!(map.len(), 1);
///
///     map.drain().await;
///     assert!(map.is_empty());
///     Ok(())
/// }
/// ```
pub struct TtlMap<V> {
    engine: Arc<StorageEngine<V>>,
    reaper: ExpiryReaper<V>,
}

impl<V> TtlMap<V>
where
    V: Send + Sync + 'static,
{
    /// Creates a new map and spawns its reaper on the current Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoRuntime`] when called outside a Tokio runtime.
    pub fn new(options: MapOptions<V>) -> Result<Self> {
        let handle = Handle::try_current().map_err(|_| Error::NoRuntime)?;

        let engine = Arc::new(StorageEngine::new(options));
        let reaper = ExpiryReaper::start(Arc::clone(&engine), &handle);

        Ok(Self { engine, reaper })
    }
}

impl<V> TtlMap<V> {
    /// Returns the number of entries in the map.
    pub fn len(&self) -> usize {
        self.engine.len()
    }

    /// Returns `true` if the map holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns a copy of the entry stored under `key`.
    ///
    /// An entry whose deadline has passed but which the reaper has not
    /// reached yet is still returned.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] if the key is absent or the map is draining.
    pub fn get(&self, key: &str) -> Result<Entry<V>>
    where
        V: Clone,
    {
        self.engine.get(key)
    }

    /// Stores `entry` under `key`, subject to `mode`.
    ///
    /// If the key was already present, the old entry is handed to
    /// `on_will_expire` when it was overdue and to `on_will_evict` otherwise,
    /// before the new entry is installed.
    ///
    /// # Errors
    ///
    /// - [`Error::Drained`] once draining has begun
    /// - [`Error::AlreadyExists`] for [`KeyExist::MustNotExist`] on a present key
    /// - [`Error::NotFound`] for [`KeyExist::MustExist`] on an absent key
    ///
    /// # Panics
    ///
    /// A panic in the listener reporting the old entry propagates to the
    /// caller. The old entry is already gone at that point and the new one
    /// is never stored.
    pub fn set(&self, key: &str, entry: Entry<V>, mode: KeyExist) -> Result<()> {
        self.engine.set(key, entry, mode)
    }

    /// Inserts or overwrites; shorthand for [`KeyExist::DontCare`].
    pub fn insert(&self, key: &str, entry: Entry<V>) -> Result<()> {
        self.set(key, entry, KeyExist::DontCare)
    }

    /// Inserts only if absent; shorthand for [`KeyExist::MustNotExist`].
    pub fn set_nx(&self, key: &str, entry: Entry<V>) -> Result<()> {
        self.set(key, entry, KeyExist::MustNotExist)
    }

    /// Removes and returns the entry stored under `key`.
    ///
    /// Deleting is a deliberate caller action, so no listener is invoked.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] if the key is absent or the map is draining.
    pub fn delete(&self, key: &str) -> Result<Entry<V>> {
        self.engine.delete(key)
    }

    /// Returns a future that resolves once the map starts draining.
    ///
    /// The future does not borrow the map and may be polled from anywhere.
    pub fn draining(&self) -> impl Future<Output = ()> + Send + 'static {
        let mut draining_rx = self.engine.subscribe_draining();
        async move {
            // The sender lives as long as the engine, and the engine is only
            // released after the drain flag has been raised.
            let _ = wait_until_set(&mut draining_rx).await;
        }
    }

    /// Returns `true` once draining has begun.
    pub fn is_draining(&self) -> bool {
        self.engine.is_draining()
    }

    /// Returns `true` once a drain has fully completed and the reaper exited.
    pub fn is_drained(&self) -> bool {
        self.reaper.is_terminated()
    }

    /// Drains the map and waits for its reaper to shut down.
    ///
    /// All remaining entries are removed soonest-first: overdue ones through
    /// `on_will_expire`, the rest through `on_will_evict`. Afterwards every
    /// write fails with [`Error::Drained`] and every lookup with
    /// [`Error::NotFound`].
    ///
    /// Safe to call any number of times, concurrently: every caller resolves
    /// once the single flush has finished.
    ///
    /// # Panics
    ///
    /// If a listener panicked on the reaper task, the reaper has stopped
    /// expiring entries. The drain then flushes the map on the calling task
    /// and resumes that panic in the first caller.
    pub async fn drain(&self) {
        self.engine.begin_drain();
        self.reaper.terminated().await;
    }
}

impl<V> Drop for TtlMap<V> {
    fn drop(&mut self) {
        self.engine.begin_drain();
    }
}

impl<V> fmt::Debug for TtlMap<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TtlMap")
            .field("engine", &self.engine)
            .field("reaper", &self.reaper)
            .finish()
    }
}
